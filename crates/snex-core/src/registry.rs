//! Device registry and lifecycle.
//!
//! The registry owns every open handle, keyed by canonical URI. Handles are
//! opened lazily on first use, cached, and removed when a driver reports a
//! fatal transport error. A `std::sync` lock guards the URI map and is never
//! held across an await; each handle carries its own async mutex that
//! serializes in-flight operations per device.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use snex_mapping::{header, AddressSpace, MappingMode};
use tokio::sync::{Mutex, MutexGuard};

use crate::driver::{Device, DriverRegistry};
use crate::error::{DeviceError, Result};
use crate::memory::Deadline;
use crate::model::{
    CapabilitySet, DeviceDescriptor, MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest,
    MemoryWriteResponse,
};
use crate::uri::DeviceUri;

/// An open, cached connection to one device.
pub struct DeviceHandle {
    id: u64,
    uri: DeviceUri,
    device: Arc<dyn Device>,
    opened_at: Instant,
    healthy: AtomicBool,
    state: Mutex<HandleState>,
}

struct HandleState {
    mapping: MappingMode,
}

impl DeviceHandle {
    /// Identity of this open handle. A reopened device gets a fresh id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn uri(&self) -> &DeviceUri {
        &self.uri
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        self.device.descriptor()
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }
}

pub struct DeviceRegistry {
    drivers: Arc<DriverRegistry>,
    devices: RwLock<HashMap<DeviceUri, Arc<DeviceHandle>>>,
    next_handle_id: AtomicU64,
}

impl DeviceRegistry {
    pub fn new(drivers: Arc<DriverRegistry>) -> DeviceRegistry {
        DeviceRegistry {
            drivers,
            devices: RwLock::new(HashMap::new()),
            next_handle_id: AtomicU64::new(1),
        }
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    /// Enumerate devices across drivers. An empty `kinds` set queries every
    /// registered driver. Detection runs concurrently per driver and a
    /// failing driver contributes zero devices; it never aborts the call.
    pub async fn list_devices(&self, kinds: &[String]) -> Vec<DeviceDescriptor> {
        let selected: Vec<_> = self
            .drivers
            .drivers()
            .into_iter()
            .filter(|driver| kinds.is_empty() || kinds.iter().any(|k| k == driver.scheme()))
            .collect();

        let probes = selected.iter().map(|driver| async move {
            match driver.detect().await {
                Ok(found) => found,
                Err(err) => {
                    tracing::warn!(driver = driver.scheme(), error = %err, "device detection failed");
                    Vec::new()
                }
            }
        });

        futures_util::future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Look up the cached handle for `uri`, opening one if needed. Concurrent
    /// openers race on the map insert; losers close their fresh handle and
    /// adopt the winner's.
    pub async fn open_or_reuse(&self, uri: &DeviceUri) -> Result<Arc<DeviceHandle>> {
        if let Some(handle) = self.lookup(uri) {
            return Ok(handle);
        }

        let driver = self.drivers.by_scheme(uri.scheme())?;
        let device = driver.open(uri).await?;
        let handle = Arc::new(DeviceHandle {
            id: self.next_handle_id.fetch_add(1, Ordering::Relaxed),
            uri: uri.clone(),
            device,
            opened_at: Instant::now(),
            healthy: AtomicBool::new(true),
            state: Mutex::new(HandleState {
                mapping: MappingMode::Unknown,
            }),
        });

        let (winner, stale) = {
            let mut devices = self.devices.write().expect("device map poisoned");
            match devices.entry(uri.clone()) {
                Entry::Occupied(entry) if entry.get().is_healthy() => {
                    (Some(entry.get().clone()), None)
                }
                Entry::Occupied(mut entry) => {
                    let stale = entry.insert(handle.clone());
                    (None, Some(stale))
                }
                Entry::Vacant(entry) => {
                    entry.insert(handle.clone());
                    (None, None)
                }
            }
        };

        if let Some(stale) = stale {
            close_quietly(&stale).await;
        }

        match winner {
            Some(winner) => {
                // Lost the race: this opener's handle was never published.
                close_quietly(&handle).await;
                Ok(winner)
            }
            None => {
                tracing::info!(uri = %uri, handle = handle.id, "opened device");
                Ok(handle)
            }
        }
    }

    /// Drop the cached handle for `uri`, if any. The next use reopens.
    pub async fn invalidate(&self, uri: &DeviceUri) {
        let removed = {
            let mut devices = self.devices.write().expect("device map poisoned");
            devices.remove(uri)
        };
        if let Some(handle) = removed {
            tracing::info!(uri = %uri, handle = handle.id, "invalidated device handle");
            close_quietly(&handle).await;
        }
    }

    /// Close every cached handle.
    pub async fn shutdown(&self) {
        let all: Vec<_> = {
            let mut devices = self.devices.write().expect("device map poisoned");
            devices.drain().map(|(_, handle)| handle).collect()
        };
        for handle in all {
            close_quietly(&handle).await;
        }
    }

    /// The capability set of the device at `uri`, opening it if needed.
    pub async fn methods_for(&self, uri: &DeviceUri) -> Result<CapabilitySet> {
        let handle = self.open_or_reuse(uri).await?;
        Ok(handle.descriptor().capabilities)
    }

    pub async fn multi_read(
        &self,
        uri: &DeviceUri,
        mapping: MappingMode,
        reads: &[MemoryReadRequest],
        deadline: Deadline,
    ) -> Result<Vec<MemoryReadResponse>> {
        let handle = self.open_or_reuse(uri).await?;
        let mut state = handle.state.lock().await;
        let result = async {
            let mapping = ensure_mapping(&handle, &mut state, mapping, deadline).await?;
            handle.device.multi_read(mapping, reads, deadline).await
        }
        .await;
        drop(state);
        self.finish(&handle, result).await
    }

    pub async fn multi_write(
        &self,
        uri: &DeviceUri,
        mapping: MappingMode,
        writes: &[MemoryWriteRequest],
        deadline: Deadline,
    ) -> Result<Vec<MemoryWriteResponse>> {
        let handle = self.open_or_reuse(uri).await?;
        let mut state = handle.state.lock().await;
        let result = async {
            let mapping = ensure_mapping(&handle, &mut state, mapping, deadline).await?;
            handle.device.multi_write(mapping, writes, deadline).await
        }
        .await;
        drop(state);
        self.finish(&handle, result).await
    }

    pub async fn single_read(
        &self,
        uri: &DeviceUri,
        mapping: MappingMode,
        read: MemoryReadRequest,
        deadline: Deadline,
    ) -> Result<MemoryReadResponse> {
        let mut responses = self
            .multi_read(uri, mapping, std::slice::from_ref(&read), deadline)
            .await?;
        responses
            .pop()
            .ok_or_else(|| DeviceError::ProtocolError("empty read response batch".into()))
    }

    pub async fn single_write(
        &self,
        uri: &DeviceUri,
        mapping: MappingMode,
        write: MemoryWriteRequest,
        deadline: Deadline,
    ) -> Result<MemoryWriteResponse> {
        let mut responses = self
            .multi_write(uri, mapping, std::slice::from_ref(&write), deadline)
            .await?;
        responses
            .pop()
            .ok_or_else(|| DeviceError::ProtocolError("empty write response batch".into()))
    }

    pub async fn reset(&self, uri: &DeviceUri, deadline: Deadline) -> Result<()> {
        let handle = self.open_or_reuse(uri).await?;
        let state = handle.state.lock().await;
        let result = handle.device.reset(deadline).await;
        drop(state);
        self.finish(&handle, result).await
    }

    pub async fn pause_toggle(&self, uri: &DeviceUri, deadline: Deadline) -> Result<()> {
        let handle = self.open_or_reuse(uri).await?;
        let state = handle.state.lock().await;
        let result = handle.device.pause_toggle(deadline).await;
        drop(state);
        self.finish(&handle, result).await
    }

    pub async fn pause_unpause(
        &self,
        uri: &DeviceUri,
        paused: bool,
        deadline: Deadline,
    ) -> Result<()> {
        let handle = self.open_or_reuse(uri).await?;
        let state = handle.state.lock().await;
        let result = handle.device.pause_unpause(paused, deadline).await;
        drop(state);
        self.finish(&handle, result).await
    }

    fn lookup(&self, uri: &DeviceUri) -> Option<Arc<DeviceHandle>> {
        let devices = self.devices.read().expect("device map poisoned");
        devices.get(uri).filter(|h| h.is_healthy()).cloned()
    }

    /// Classify an operation result: fatal errors invalidate the handle so
    /// the next call reopens the device.
    async fn finish<T>(&self, handle: &Arc<DeviceHandle>, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                tracing::warn!(uri = %handle.uri, handle = handle.id, error = %err, "fatal device error; dropping handle");
                handle.healthy.store(false, Ordering::Release);
                let removed = {
                    let mut devices = self.devices.write().expect("device map poisoned");
                    let is_current = devices
                        .get(&handle.uri)
                        .is_some_and(|current| current.id == handle.id);
                    if is_current {
                        devices.remove(&handle.uri)
                    } else {
                        None
                    }
                };
                if let Some(removed) = removed {
                    close_quietly(&removed).await;
                }
            }
        }
        result
    }
}

async fn close_quietly(handle: &Arc<DeviceHandle>) {
    handle.healthy.store(false, Ordering::Release);
    if let Err(err) = handle.device.close().await {
        tracing::debug!(uri = %handle.uri, error = %err, "error closing device");
    }
}

/// Resolve the mapping mode to use for one batch. A client-supplied mode
/// wins and is cached; otherwise the cached mode is reused; otherwise the
/// cartridge header is read through the device and scored. The resolved mode
/// is fixed for the duration of the batch because the caller holds the
/// handle's state lock.
async fn ensure_mapping(
    handle: &DeviceHandle,
    state: &mut MutexGuard<'_, HandleState>,
    requested: MappingMode,
    deadline: Deadline,
) -> Result<MappingMode> {
    if !requested.is_unknown() {
        state.mapping = requested;
        return Ok(requested);
    }
    if !state.mapping.is_unknown() {
        return Ok(state.mapping);
    }

    let detected = detect_mapping(handle.device.as_ref(), deadline).await?;
    tracing::debug!(uri = %handle.uri, mapping = %detected, "detected cartridge mapping");
    state.mapping = detected;
    Ok(detected)
}

async fn detect_mapping(device: &dyn Device, deadline: Deadline) -> Result<MappingMode> {
    let detected = match device.device_space() {
        // The console exposes the active header at $00:FFC0 whatever the
        // mapping, so bus-speaking devices need a single probe.
        AddressSpace::SnesABus | AddressSpace::Raw => {
            let probe = MemoryReadRequest {
                request_space: AddressSpace::SnesABus,
                request_address: header::BUS_HEADER_ADDR,
                size: header::HEADER_LEN as u32,
            };
            let responses = device
                .multi_read(MappingMode::Unknown, &[probe], deadline)
                .await?;
            let bytes = responses.first().map(|r| r.data.as_slice()).unwrap_or(&[]);
            header::detect_from_bus_header(bytes)
        }
        AddressSpace::FxPakPro => {
            let candidates = [
                MappingMode::LoRom,
                MappingMode::HiRom,
                MappingMode::ExHiRom,
                MappingMode::Sa1,
            ];
            let probes: Vec<MemoryReadRequest> = candidates
                .iter()
                .filter_map(|mode| header::linear_header_addr(*mode))
                .map(|address| MemoryReadRequest {
                    request_space: AddressSpace::FxPakPro,
                    request_address: address,
                    size: header::HEADER_LEN as u32,
                })
                .collect();
            let responses = device
                .multi_read(MappingMode::Unknown, &probes, deadline)
                .await?;
            header::detect_from_candidates(
                candidates
                    .iter()
                    .zip(responses.iter())
                    .map(|(mode, rsp)| (*mode, rsp.data.as_slice())),
            )
        }
    };

    // An unreadable or junk header most often means a freshly booted menu;
    // LoROM is the least surprising projection to fall back to.
    Ok(detected.unwrap_or(MappingMode::LoRom))
}
