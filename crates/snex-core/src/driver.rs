//! The driver contract and the process-wide driver registry.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use snex_mapping::{AddressSpace, MappingMode};

use crate::error::{DeviceError, Result};
use crate::memory::Deadline;
use crate::model::{
    Capability, DeviceDescriptor, MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest,
    MemoryWriteResponse,
};
use crate::uri::DeviceUri;

/// A pluggable transport implementation bound to one URI scheme.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    fn scheme(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// Enumerate currently reachable devices. May probe hardware; must not
    /// mutate any registry state. Descriptors are ephemeral.
    async fn detect(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Open a device handle for `uri`. The registry caches the result.
    async fn open(&self, uri: &DeviceUri) -> Result<Arc<dyn Device>>;
}

/// An open connection to one device.
///
/// This is the single capability-bearing surface: drivers override the
/// operations they support and inherit `CapabilityUnavailable` for the rest,
/// mirroring the advertised [`CapabilitySet`].
#[async_trait]
pub trait Device: Send + Sync + 'static {
    fn descriptor(&self) -> &DeviceDescriptor;

    /// The address space this device's transport speaks; requests are
    /// translated into it before I/O.
    fn device_space(&self) -> AddressSpace;

    async fn multi_read(
        &self,
        mapping: MappingMode,
        reads: &[MemoryReadRequest],
        deadline: Deadline,
    ) -> Result<Vec<MemoryReadResponse>> {
        let _ = (mapping, reads, deadline);
        Err(DeviceError::CapabilityUnavailable(Capability::ReadMemory))
    }

    async fn multi_write(
        &self,
        mapping: MappingMode,
        writes: &[MemoryWriteRequest],
        deadline: Deadline,
    ) -> Result<Vec<MemoryWriteResponse>> {
        let _ = (mapping, writes, deadline);
        Err(DeviceError::CapabilityUnavailable(Capability::WriteMemory))
    }

    async fn reset(&self, deadline: Deadline) -> Result<()> {
        let _ = deadline;
        Err(DeviceError::CapabilityUnavailable(Capability::ResetSystem))
    }

    async fn pause_toggle(&self, deadline: Deadline) -> Result<()> {
        let _ = deadline;
        Err(DeviceError::CapabilityUnavailable(Capability::PauseToggle))
    }

    async fn pause_unpause(&self, paused: bool, deadline: Deadline) -> Result<()> {
        let _ = (paused, deadline);
        Err(DeviceError::CapabilityUnavailable(Capability::PauseToggle))
    }

    /// Release the transport. Called once when the registry drops the handle.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// The process-wide set of drivers. Populated once at startup, then sealed;
/// after sealing the set is immutable.
#[derive(Default)]
pub struct DriverRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    drivers: Vec<Arc<dyn Driver>>,
    sealed: bool,
}

impl DriverRegistry {
    pub fn new() -> DriverRegistry {
        DriverRegistry::default()
    }

    pub fn register(&self, driver: Arc<dyn Driver>) -> Result<()> {
        let mut inner = self.inner.write().expect("driver registry poisoned");
        if inner.sealed {
            return Err(DeviceError::RegistrySealed);
        }
        let scheme = driver.scheme();
        if inner.drivers.iter().any(|d| d.scheme() == scheme) {
            return Err(DeviceError::DuplicateScheme(scheme));
        }
        inner.drivers.push(driver);
        Ok(())
    }

    /// Freeze the registry. Further registration attempts fail.
    pub fn seal(&self) {
        self.inner.write().expect("driver registry poisoned").sealed = true;
    }

    pub fn drivers(&self) -> Vec<Arc<dyn Driver>> {
        self.inner
            .read()
            .expect("driver registry poisoned")
            .drivers
            .clone()
    }

    pub fn by_scheme(&self, scheme: &str) -> Result<Arc<dyn Driver>> {
        self.inner
            .read()
            .expect("driver registry poisoned")
            .drivers
            .iter()
            .find(|d| d.scheme() == scheme)
            .cloned()
            .ok_or_else(|| DeviceError::SchemeUnknown(scheme.to_string()))
    }
}
