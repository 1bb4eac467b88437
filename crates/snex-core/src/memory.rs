//! Batched memory-access pipeline helpers shared by drivers.
//!
//! Every driver follows the same shape: translate the whole batch up front
//! (so a bad address fails atomically before any transport I/O), split
//! oversize requests into device-address-contiguous chunks bounded by the
//! transport's limit, dispatch in order, and reassemble. The helpers here
//! keep that behavior identical across drivers.

use std::time::Duration;

use snex_mapping::{translate, AddressSpace, MappingMode};
use tokio::time::Instant;

use crate::error::Result;
use crate::model::{
    MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest, MemoryWriteResponse,
};

/// An optional absolute deadline carried by every call.
///
/// Callers that do not supply one get the driver's per-transport-operation
/// default, measured from the start of each transport operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub const NONE: Deadline = Deadline(None);

    pub fn at(instant: Instant) -> Deadline {
        Deadline(Some(instant))
    }

    pub fn after(timeout: Duration) -> Deadline {
        Deadline(Some(Instant::now() + timeout))
    }

    pub fn instant(self) -> Option<Instant> {
        self.0
    }

    /// The absolute instant to time out at, applying `default` when the
    /// caller supplied no deadline.
    pub fn resolve(self, default: Duration) -> Instant {
        self.0.unwrap_or_else(|| Instant::now() + default)
    }
}

/// A read request with its translated device address.
#[derive(Debug, Clone, Copy)]
pub struct PlannedRead {
    pub request: MemoryReadRequest,
    pub device_address: u32,
}

impl PlannedRead {
    pub fn response(&self, device_space: AddressSpace, data: Vec<u8>) -> MemoryReadResponse {
        MemoryReadResponse {
            request_space: self.request.request_space,
            request_address: self.request.request_address,
            device_space,
            device_address: self.device_address,
            data,
        }
    }
}

/// A write request with its translated device address.
#[derive(Debug, Clone)]
pub struct PlannedWrite<'a> {
    pub request: &'a MemoryWriteRequest,
    pub device_address: u32,
}

impl PlannedWrite<'_> {
    pub fn response(&self, device_space: AddressSpace) -> MemoryWriteResponse {
        MemoryWriteResponse {
            request_space: self.request.request_space,
            request_address: self.request.request_address,
            device_space,
            device_address: self.device_address,
            size: self.request.data.len() as u32,
        }
    }
}

/// Translate a whole read batch into `device_space`. Any failure aborts the
/// batch before transport I/O happens.
pub fn plan_reads(
    device_space: AddressSpace,
    mapping: MappingMode,
    reads: &[MemoryReadRequest],
) -> Result<Vec<PlannedRead>> {
    reads
        .iter()
        .map(|request| {
            let device_address = translate(
                request.request_address,
                request.request_space,
                mapping,
                device_space,
            )?;
            Ok(PlannedRead {
                request: *request,
                device_address,
            })
        })
        .collect()
}

/// Translate a whole write batch into `device_space`.
pub fn plan_writes<'a>(
    device_space: AddressSpace,
    mapping: MappingMode,
    writes: &'a [MemoryWriteRequest],
) -> Result<Vec<PlannedWrite<'a>>> {
    writes
        .iter()
        .map(|request| {
            let device_address = translate(
                request.request_address,
                request.request_space,
                mapping,
                device_space,
            )?;
            Ok(PlannedWrite {
                request,
                device_address,
            })
        })
        .collect()
}

/// Split `(address, size)` into consecutive chunks of at most `max` bytes.
/// Chunk boundaries are invisible to callers: the chunks are contiguous in
/// device-address order and their sizes sum to `size`.
pub fn chunks(address: u32, size: u32, max: u32) -> impl Iterator<Item = (u32, u32)> {
    assert!(max > 0, "chunk limit must be positive");
    let mut addr = address;
    let mut remaining = size;
    core::iter::from_fn(move || {
        if remaining == 0 {
            return None;
        }
        let len = remaining.min(max);
        let chunk = (addr, len);
        addr = addr.wrapping_add(len);
        remaining -= len;
        Some(chunk)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_exactly_once() {
        let parts: Vec<_> = chunks(0x1000, 5000, 2048).collect();
        assert_eq!(parts, vec![(0x1000, 2048), (0x1800, 2048), (0x2000, 904)]);
        assert_eq!(parts.iter().map(|(_, len)| len).sum::<u32>(), 5000);
    }

    #[test]
    fn small_requests_stay_whole() {
        let parts: Vec<_> = chunks(0, 100, 2048).collect();
        assert_eq!(parts, vec![(0, 100)]);
    }

    #[test]
    fn zero_size_yields_nothing() {
        assert_eq!(chunks(0, 0, 2048).count(), 0);
    }

    #[test]
    fn bad_translation_fails_whole_plan() {
        let reads = [
            MemoryReadRequest {
                request_space: AddressSpace::SnesABus,
                request_address: 0x7E_0000,
                size: 4,
            },
            // PPU register window: no linear equivalent.
            MemoryReadRequest {
                request_space: AddressSpace::SnesABus,
                request_address: 0x00_2100,
                size: 4,
            },
        ];
        assert!(plan_reads(AddressSpace::FxPakPro, MappingMode::LoRom, &reads).is_err());
    }
}
