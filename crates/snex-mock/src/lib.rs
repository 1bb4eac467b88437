#![forbid(unsafe_code)]

//! In-process mock driver (`mock://<slot>`).
//!
//! Each slot is a flat 16 MiB image covering the whole linear device space,
//! zeroed on open. Tests and loopback clients exercise the full pipeline
//! (translation, batching, chunk reassembly) against it without hardware.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use snex_core::memory::{plan_reads, plan_writes, Deadline};
use snex_core::{
    AddressSpace, Capability, CapabilitySet, Device, DeviceDescriptor, DeviceError, DeviceUri,
    Driver, MappingMode, MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest,
    MemoryWriteResponse, Result,
};

/// Covers every linear region, CMD window included.
const IMAGE_LEN: usize = 0x100_0000;

pub struct MockDriver;

impl MockDriver {
    pub fn new() -> MockDriver {
        MockDriver
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        MockDriver::new()
    }
}

fn make_descriptor(uri: &DeviceUri) -> DeviceDescriptor {
    DeviceDescriptor {
        uri: uri.clone(),
        display_name: format!("Mock device {}", uri.opaque()),
        kind: "mock",
        capabilities: CapabilitySet::of(&[
            Capability::ReadMemory,
            Capability::WriteMemory,
            Capability::ResetSystem,
        ]),
        default_address_space: AddressSpace::FxPakPro,
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn scheme(&self) -> &'static str {
        "mock"
    }

    fn display_name(&self) -> &'static str {
        "Mock"
    }

    async fn detect(&self) -> Result<Vec<DeviceDescriptor>> {
        let uri = DeviceUri::parse("mock://0")?;
        Ok(vec![make_descriptor(&uri)])
    }

    async fn open(&self, uri: &DeviceUri) -> Result<Arc<dyn Device>> {
        if uri.opaque().parse::<u32>().is_err() {
            return Err(DeviceError::InvalidUri {
                uri: uri.as_str().to_string(),
                reason: "mock slot must be a number",
            });
        }
        Ok(Arc::new(MockDevice {
            descriptor: make_descriptor(uri),
            image: Mutex::new(vec![0u8; IMAGE_LEN]),
        }))
    }
}

pub struct MockDevice {
    descriptor: DeviceDescriptor,
    image: Mutex<Vec<u8>>,
}

impl MockDevice {
    fn range_check(&self, address: u32, len: usize, mapping: MappingMode) -> Result<usize> {
        let start = address as usize;
        let end = start.checked_add(len).filter(|end| *end <= IMAGE_LEN);
        match end {
            Some(_) => Ok(start),
            None => Err(snex_mapping::AddressOutOfRange {
                address,
                space: AddressSpace::FxPakPro,
                target: AddressSpace::FxPakPro,
                mode: mapping,
            }
            .into()),
        }
    }
}

#[async_trait]
impl Device for MockDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn device_space(&self) -> AddressSpace {
        AddressSpace::FxPakPro
    }

    async fn multi_read(
        &self,
        mapping: MappingMode,
        reads: &[MemoryReadRequest],
        _deadline: Deadline,
    ) -> Result<Vec<MemoryReadResponse>> {
        let planned = plan_reads(self.device_space(), mapping, reads)?;
        let image = self.image.lock().expect("mock image poisoned");
        planned
            .iter()
            .map(|read| {
                let len = read.request.size as usize;
                let start = self.range_check(read.device_address, len, mapping)?;
                Ok(read.response(self.device_space(), image[start..start + len].to_vec()))
            })
            .collect()
    }

    async fn multi_write(
        &self,
        mapping: MappingMode,
        writes: &[MemoryWriteRequest],
        _deadline: Deadline,
    ) -> Result<Vec<MemoryWriteResponse>> {
        let planned = plan_writes(self.device_space(), mapping, writes)?;
        let mut image = self.image.lock().expect("mock image poisoned");
        planned
            .iter()
            .map(|write| {
                let data = &write.request.data;
                let start = self.range_check(write.device_address, data.len(), mapping)?;
                image[start..start + data.len()].copy_from_slice(data);
                Ok(write.response(self.device_space()))
            })
            .collect()
    }

    async fn reset(&self, _deadline: Deadline) -> Result<()> {
        self.image.lock().expect("mock image poisoned").fill(0);
        Ok(())
    }
}
