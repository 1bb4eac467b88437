#![forbid(unsafe_code)]

//! Lua bridge driver (`luabridge://host:port`).
//!
//! Emulator-side Lua scripts expose a tiny line protocol over TCP:
//! `Read|<addr>|<size>` is answered with one line of comma-separated decimal
//! bytes, `Write|<addr>|<b0>|<b1>|...` and `Reset` go unacknowledged. Lua
//! scripts poll their socket once per frame, so the default deadline is much
//! looser than the UDP drivers'.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use snex_core::memory::{plan_reads, plan_writes, Deadline};
use snex_core::{
    AddressSpace, Capability, CapabilitySet, Device, DeviceDescriptor, DeviceError, DeviceUri,
    Driver, MappingMode, MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest,
    MemoryWriteResponse, Result,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

const HOSTS_ENV: &str = "SNEX_LUABRIDGE_HOSTS";

pub struct LuaBridgeDriver;

impl LuaBridgeDriver {
    pub fn new() -> LuaBridgeDriver {
        LuaBridgeDriver
    }
}

impl Default for LuaBridgeDriver {
    fn default() -> Self {
        LuaBridgeDriver::new()
    }
}

fn make_descriptor(uri: &DeviceUri) -> DeviceDescriptor {
    DeviceDescriptor {
        uri: uri.clone(),
        display_name: format!("Lua bridge ({})", uri.opaque()),
        kind: "luabridge",
        capabilities: CapabilitySet::of(&[
            Capability::ReadMemory,
            Capability::WriteMemory,
            Capability::ResetSystem,
        ]),
        default_address_space: AddressSpace::SnesABus,
    }
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

#[async_trait]
impl Driver for LuaBridgeDriver {
    fn scheme(&self) -> &'static str {
        "luabridge"
    }

    fn display_name(&self) -> &'static str {
        "Lua bridge"
    }

    /// Bridge scripts cannot announce themselves, so detection only probes
    /// endpoints the operator listed explicitly.
    async fn detect(&self) -> Result<Vec<DeviceDescriptor>> {
        let raw = match std::env::var(HOSTS_ENV) {
            Ok(raw) => raw,
            Err(_) => return Ok(Vec::new()),
        };

        let mut found = Vec::new();
        for host in raw.split(',').map(str::trim).filter(|h| !h.is_empty()) {
            let Ok(addr) = resolve(host).await else {
                continue;
            };
            match tokio::time::timeout(DEFAULT_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => {
                    let uri = DeviceUri::parse(&format!("luabridge://{host}"))?;
                    found.push(make_descriptor(&uri));
                }
                _ => {
                    tracing::debug!(host = %host, "no lua bridge at host");
                }
            }
        }
        Ok(found)
    }

    async fn open(&self, uri: &DeviceUri) -> Result<Arc<dyn Device>> {
        let addr = resolve(uri.opaque()).await?;
        let stream = match tokio::time::timeout(DEFAULT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(DeviceError::Transport(err)),
            Err(_) => return Err(DeviceError::DeadlineExceeded),
        };
        stream.set_nodelay(true)?;

        Ok(Arc::new(LuaBridgeDevice {
            descriptor: make_descriptor(uri),
            stream: Mutex::new(BufReader::new(stream)),
        }))
    }
}

pub struct LuaBridgeDevice {
    descriptor: DeviceDescriptor,
    stream: Mutex<BufReader<TcpStream>>,
}

impl LuaBridgeDevice {
    async fn send_line(
        stream: &mut BufReader<TcpStream>,
        line: &str,
        deadline: Instant,
    ) -> Result<()> {
        match tokio::time::timeout_at(deadline, stream.get_mut().write_all(line.as_bytes())).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(DeviceError::Transport(err)),
            Err(_) => Err(DeviceError::DeadlineExceeded),
        }
    }

    async fn recv_line(stream: &mut BufReader<TcpStream>, deadline: Instant) -> Result<String> {
        let mut line = String::new();
        match tokio::time::timeout_at(deadline, stream.read_line(&mut line)).await {
            Ok(Ok(0)) => Err(DeviceError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "bridge closed the connection",
            ))),
            Ok(Ok(_)) => Ok(line),
            Ok(Err(err)) => Err(DeviceError::Transport(err)),
            Err(_) => Err(DeviceError::DeadlineExceeded),
        }
    }
}

fn parse_byte_line(line: &str, expected: usize) -> Result<Vec<u8>> {
    let bytes: std::result::Result<Vec<u8>, _> = line
        .trim()
        .split(',')
        .filter(|part| !part.is_empty())
        .map(|part| part.trim().parse::<u8>())
        .collect();
    let bytes =
        bytes.map_err(|_| DeviceError::ProtocolError(format!("bad byte line {line:?}")))?;
    if bytes.len() != expected {
        return Err(DeviceError::ProtocolError(format!(
            "bridge returned {} bytes (expected {expected})",
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[async_trait]
impl Device for LuaBridgeDevice {
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
        let planned = plan_reads(self.device_space(), mapping, reads)?;
        let mut stream = self.stream.lock().await;

        let mut responses = Vec::with_capacity(planned.len());
        for read in &planned {
            let at = deadline.resolve(DEFAULT_TIMEOUT);
            let command = format!("Read|{}|{}\n", read.device_address, read.request.size);
            Self::send_line(&mut stream, &command, at).await?;
            let line = Self::recv_line(&mut stream, at).await?;
            let data = parse_byte_line(&line, read.request.size as usize)?;
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
        let planned = plan_writes(self.device_space(), mapping, writes)?;
        let mut stream = self.stream.lock().await;

        for write in &planned {
            let mut command = format!("Write|{}", write.device_address);
            for byte in &write.request.data {
                command.push_str(&format!("|{byte}"));
            }
            command.push('\n');
            Self::send_line(&mut stream, &command, deadline.resolve(DEFAULT_TIMEOUT)).await?;
        }

        Ok(planned
            .iter()
            .map(|write| write.response(self.device_space()))
            .collect())
    }

    async fn reset(&self, deadline: Deadline) -> Result<()> {
        let mut stream = self.stream.lock().await;
        Self::send_line(&mut stream, "Reset\n", deadline.resolve(DEFAULT_TIMEOUT)).await
    }
}
