use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use snex_core::memory::{chunks, plan_reads, plan_writes, Deadline};
use snex_core::{
    AddressSpace, Capability, CapabilitySet, Device, DeviceDescriptor, DeviceError, Driver,
    DeviceUri, MappingMode, MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest,
    MemoryWriteResponse, Result,
};

use crate::protocol::{self, ResponseError, Version};
use crate::transport::UdpTransport;

/// Default per-transport-operation deadline, matching the emulator's own
/// command cadence.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(256);

const HOSTS_ENV: &str = "SNEX_RETROARCH_HOSTS";
const DEFAULT_HOST: &str = "localhost:55355";

/// Link lifecycle: `Closed -> Probing -> Ready -> Unhealthy`. `Closed` and
/// `Probing` exist only inside `open`; an open device is `Ready` until a
/// protocol or transport fault marks it `Unhealthy`, after which the registry
/// drops the handle (back to `Closed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum LinkState {
    Ready = 0,
    Unhealthy = 1,
}

pub struct RetroArchDriver;

impl RetroArchDriver {
    pub fn new() -> RetroArchDriver {
        RetroArchDriver
    }
}

impl Default for RetroArchDriver {
    fn default() -> Self {
        RetroArchDriver::new()
    }
}

fn probe_hosts() -> Vec<String> {
    let raw = std::env::var(HOSTS_ENV).unwrap_or_else(|_| DEFAULT_HOST.to_string());
    raw.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(|h| {
            if h.contains(':') {
                h.to_string()
            } else {
                format!("{h}:{}", protocol::DEFAULT_PORT)
            }
        })
        .collect()
}

async fn resolve(endpoint: &str) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host(endpoint).await?;
    addrs.next().ok_or_else(|| {
        DeviceError::Transport(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address for {endpoint}"),
        ))
    })
}

/// `VERSION\n` probe. An unparseable reply selects the modern dialect and is
/// logged, not retried.
async fn probe_version(transport: &UdpTransport, deadline: Deadline) -> Result<(String, bool)> {
    let reply = transport
        .send_then_recv(
            protocol::VERSION_COMMAND.as_bytes(),
            deadline.resolve(DEFAULT_TIMEOUT),
        )
        .await?;
    let raw = String::from_utf8_lossy(&reply).trim().to_string();
    let legacy = match Version::parse(&raw) {
        Some(version) => version.use_legacy_commands(),
        None => {
            tracing::warn!(peer = %transport.peer(), reply = %raw, "unparseable VERSION reply; assuming modern command set");
            false
        }
    };
    Ok((raw, legacy))
}

#[async_trait]
impl Driver for RetroArchDriver {
    fn scheme(&self) -> &'static str {
        "ra"
    }

    fn display_name(&self) -> &'static str {
        "RetroArch"
    }

    async fn detect(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut found = Vec::new();
        for host in probe_hosts() {
            let addr = match resolve(&host).await {
                Ok(addr) => addr,
                Err(err) => {
                    tracing::debug!(host = %host, error = %err, "cannot resolve retroarch host");
                    continue;
                }
            };
            let transport = match UdpTransport::connect(addr).await {
                Ok(t) => t,
                Err(err) => {
                    tracing::debug!(host = %host, error = %err, "cannot bind probe socket");
                    continue;
                }
            };
            match probe_version(&transport, Deadline::NONE).await {
                Ok((version, _)) => {
                    let uri = DeviceUri::parse(&format!("ra://{host}"))?;
                    found.push(make_descriptor(&uri, &version));
                }
                Err(err) => {
                    tracing::debug!(host = %host, error = %err, "no retroarch at host");
                }
            }
        }
        Ok(found)
    }

    async fn open(&self, uri: &DeviceUri) -> Result<Arc<dyn Device>> {
        let endpoint = if uri.opaque().contains(':') {
            uri.opaque().to_string()
        } else {
            format!("{}:{}", uri.opaque(), protocol::DEFAULT_PORT)
        };
        let addr = resolve(&endpoint).await?;
        let transport = UdpTransport::connect(addr).await?;

        // Probing: the device is usable only once the dialect is known.
        let (version, use_legacy_cmd) = probe_version(&transport, Deadline::NONE).await?;
        tracing::info!(peer = %addr, version = %version, legacy = use_legacy_cmd, "retroarch link ready");

        Ok(Arc::new(RetroArchDevice {
            descriptor: make_descriptor(uri, &version),
            transport,
            use_legacy_cmd,
            version,
            link: AtomicU8::new(LinkState::Ready as u8),
        }))
    }
}

fn make_descriptor(uri: &DeviceUri, version: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        uri: uri.clone(),
        display_name: format!("RetroArch {version} ({})", uri.opaque()),
        kind: "retroarch",
        capabilities: CapabilitySet::of(&[
            Capability::ReadMemory,
            Capability::WriteMemory,
            Capability::ResetSystem,
            Capability::PauseToggle,
        ]),
        default_address_space: AddressSpace::SnesABus,
    }
}

pub struct RetroArchDevice {
    descriptor: DeviceDescriptor,
    transport: UdpTransport,
    use_legacy_cmd: bool,
    version: String,
    link: AtomicU8,
}

impl RetroArchDevice {
    pub fn version(&self) -> &str {
        &self.version
    }

    fn check_ready(&self) -> Result<()> {
        if self.link.load(Ordering::Acquire) == LinkState::Ready as u8 {
            Ok(())
        } else {
            Err(DeviceError::ProtocolError(
                "link is unhealthy; reopen the device".to_string(),
            ))
        }
    }

    fn fail(&self, err: DeviceError) -> DeviceError {
        if err.is_fatal() {
            self.link
                .store(LinkState::Unhealthy as u8, Ordering::Release);
        }
        err
    }

    fn desync(&self, err: ResponseError) -> DeviceError {
        self.fail(DeviceError::ProtocolError(err.to_string()))
    }
}

#[async_trait]
impl Device for RetroArchDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn device_space(&self) -> AddressSpace {
        AddressSpace::SnesABus
    }

    async fn multi_read(
        &self,
        mapping: MappingMode,
        reads: &[MemoryReadRequest],
        deadline: Deadline,
    ) -> Result<Vec<MemoryReadResponse>> {
        self.check_ready()?;

        // Translate everything before any I/O so a bad address fails the
        // batch atomically.
        let planned = plan_reads(self.device_space(), mapping, reads)?;

        // All commands of the batch are packed into one datagram up front.
        let mut request = String::new();
        for read in &planned {
            for (addr, len) in chunks(read.device_address, read.request.size, protocol::MAX_CHUNK) {
                protocol::push_read_command(&mut request, self.use_legacy_cmd, addr, len);
            }
        }

        if !request.is_empty() {
            self.transport
                .send(request.as_bytes(), deadline.resolve(DEFAULT_TIMEOUT))
                .await
                .map_err(|err| self.fail(err))?;
        }

        // Responses arrive one datagram per command, in command order.
        let mut responses = Vec::with_capacity(planned.len());
        for read in &planned {
            let size = read.request.size as usize;
            let mut data = Vec::with_capacity(size);
            let mut expected_addr = read.device_address;

            while data.len() < size {
                let datagram = self
                    .transport
                    .recv(deadline.resolve(DEFAULT_TIMEOUT))
                    .await
                    .map_err(|err| self.fail(err))?;
                let chunk =
                    match protocol::parse_read_response(&datagram, self.use_legacy_cmd, expected_addr)
                    {
                        Ok(chunk) => chunk,
                        Err(ResponseError::NoCore) => return Err(DeviceError::NoCore),
                        Err(err) => return Err(self.desync(err)),
                    };
                if chunk.is_empty() {
                    return Err(self.desync(ResponseError::Malformed(
                        "empty data payload".to_string(),
                    )));
                }
                expected_addr = expected_addr.wrapping_add(chunk.len() as u32);
                data.extend_from_slice(&chunk);
            }

            data.truncate(size);
            responses.push(read.response(self.device_space(), data));
        }

        Ok(responses)
    }

    async fn multi_write(
        &self,
        mapping: MappingMode,
        writes: &[MemoryWriteRequest],
        deadline: Deadline,
    ) -> Result<Vec<MemoryWriteResponse>> {
        self.check_ready()?;

        let planned = plan_writes(self.device_space(), mapping, writes)?;

        for write in &planned {
            let mut offset = 0usize;
            for (addr, len) in chunks(
                write.device_address,
                write.request.data.len() as u32,
                protocol::MAX_CHUNK,
            ) {
                let mut command = String::new();
                protocol::push_write_command(
                    &mut command,
                    self.use_legacy_cmd,
                    addr,
                    &write.request.data[offset..offset + len as usize],
                );
                self.transport
                    .send(command.as_bytes(), deadline.resolve(DEFAULT_TIMEOUT))
                    .await
                    .map_err(|err| self.fail(err))?;
                offset += len as usize;
            }
        }

        // The legacy dialect never acknowledges writes.
        if !self.use_legacy_cmd {
            for write in &planned {
                for (addr, len) in chunks(
                    write.device_address,
                    write.request.data.len() as u32,
                    protocol::MAX_CHUNK,
                ) {
                    let datagram = self
                        .transport
                        .recv(deadline.resolve(DEFAULT_TIMEOUT))
                        .await
                        .map_err(|err| self.fail(err))?;
                    match protocol::parse_write_response(&datagram, addr, len) {
                        Ok(()) => {}
                        Err(ResponseError::NoCore) => return Err(DeviceError::NoCore),
                        Err(err) => return Err(self.desync(err)),
                    }
                }
            }
        }

        Ok(planned
            .iter()
            .map(|write| write.response(self.device_space()))
            .collect())
    }

    async fn reset(&self, deadline: Deadline) -> Result<()> {
        self.check_ready()?;
        self.transport
            .send(
                protocol::RESET_COMMAND.as_bytes(),
                deadline.resolve(DEFAULT_TIMEOUT),
            )
            .await
            .map_err(|err| self.fail(err))
    }

    async fn pause_toggle(&self, deadline: Deadline) -> Result<()> {
        self.check_ready()?;
        self.transport
            .send(
                protocol::PAUSE_TOGGLE_COMMAND.as_bytes(),
                deadline.resolve(DEFAULT_TIMEOUT),
            )
            .await
            .map_err(|err| self.fail(err))
    }

    // `pause_unpause` intentionally keeps the default `CapabilityUnavailable`
    // implementation: the network command interface has no absolute pause.
}
