#![forbid(unsafe_code)]

//! RetroArch network-command driver (`ra://host:port`).
//!
//! One UDP socket per device. On open the driver probes `VERSION` to pick
//! between the legacy (`*_CORE_RAM`, up to 1.9.0) and modern
//! (`*_CORE_MEMORY`) command dialects, then serves batched reads and writes
//! with 2 KiB chunking over the emulator's ASCII request/response framing.

mod driver;
pub mod protocol;
mod transport;

pub use driver::{RetroArchDevice, RetroArchDriver, DEFAULT_TIMEOUT};
