#![forbid(unsafe_code)]

//! Core device model for the SNEX gateway: URIs, capabilities, the driver
//! contract, the process-wide driver registry, the device registry with its
//! open-handle cache, and the batched memory-access pipeline helpers shared
//! by every driver.

mod error;
mod model;
mod uri;

pub mod driver;
pub mod memory;
pub mod registry;

pub use error::{DeviceError, Result};
pub use model::{
    Capability, CapabilitySet, DeviceDescriptor, MemoryReadRequest, MemoryReadResponse,
    MemoryWriteRequest, MemoryWriteResponse,
};
pub use uri::DeviceUri;

pub use driver::{Device, Driver, DriverRegistry};
pub use memory::Deadline;
pub use registry::{DeviceHandle, DeviceRegistry};

// Re-export the address model so drivers and the server only need one
// dependency for the common types.
pub use snex_mapping::{AddressSpace, MappingMode};
