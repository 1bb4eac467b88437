use std::io::{Read, Write};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use snex_core::memory::{chunks, plan_reads, plan_writes, Deadline};
use snex_core::{
    AddressSpace, Capability, CapabilitySet, Device, DeviceDescriptor, DeviceError, DeviceUri,
    Driver, MappingMode, MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest,
    MemoryWriteResponse, Result,
};

use crate::command::{self, MAX_TUPLES, MAX_TUPLE_LEN};

/// Menu transitions on the pak can stall the port for seconds; a short
/// deadline here would invalidate perfectly healthy hardware.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

const USB_VID: u16 = 0x1209;
const USB_PID: u16 = 0x5A22;

pub struct FxPakProDriver;

impl FxPakProDriver {
    pub fn new() -> FxPakProDriver {
        FxPakProDriver
    }
}

impl Default for FxPakProDriver {
    fn default() -> Self {
        FxPakProDriver::new()
    }
}

fn is_fxpak(port: &SerialPortInfo) -> bool {
    matches!(
        &port.port_type,
        SerialPortType::UsbPort(usb) if usb.vid == USB_VID && usb.pid == USB_PID
    )
}

fn make_descriptor(uri: &DeviceUri, product: Option<&str>) -> DeviceDescriptor {
    DeviceDescriptor {
        uri: uri.clone(),
        display_name: format!(
            "{} ({})",
            product.unwrap_or("FX Pak Pro"),
            uri.opaque()
        ),
        kind: "fxpakpro",
        capabilities: CapabilitySet::of(&[
            Capability::ReadMemory,
            Capability::WriteMemory,
            Capability::ResetSystem,
        ]),
        default_address_space: AddressSpace::FxPakPro,
    }
}

fn map_io(err: std::io::Error) -> DeviceError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        DeviceError::DeadlineExceeded
    } else {
        DeviceError::Transport(err)
    }
}

fn serial_err(err: serialport::Error) -> DeviceError {
    DeviceError::Transport(std::io::Error::new(
        std::io::ErrorKind::Other,
        err.to_string(),
    ))
}

/// Arm the port timeout with the time remaining before `deadline`.
fn arm_timeout(port: &mut Box<dyn SerialPort>, deadline: std::time::Instant) -> Result<()> {
    let remaining = deadline.saturating_duration_since(std::time::Instant::now());
    if remaining.is_zero() {
        return Err(DeviceError::DeadlineExceeded);
    }
    port.set_timeout(remaining).map_err(serial_err)
}

#[async_trait]
impl Driver for FxPakProDriver {
    fn scheme(&self) -> &'static str {
        "fxpakpro"
    }

    fn display_name(&self) -> &'static str {
        "FX Pak Pro"
    }

    async fn detect(&self) -> Result<Vec<DeviceDescriptor>> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(|err| {
                DeviceError::Transport(std::io::Error::new(std::io::ErrorKind::Other, err))
            })?
            .map_err(serial_err)?;

        let mut found = Vec::new();
        for port in ports.into_iter().filter(is_fxpak) {
            let product = match &port.port_type {
                SerialPortType::UsbPort(usb) => usb.product.clone(),
                _ => None,
            };
            let uri = DeviceUri::parse(&format!("fxpakpro://{}", port.port_name))?;
            found.push(make_descriptor(&uri, product.as_deref()));
        }
        Ok(found)
    }

    async fn open(&self, uri: &DeviceUri) -> Result<Arc<dyn Device>> {
        let path = uri.opaque().to_string();
        let port = tokio::task::spawn_blocking(move || {
            // Baud rate is a formality on the CDC-ACM link.
            serialport::new(path, 9600)
                .timeout(DEFAULT_TIMEOUT)
                .open()
        })
        .await
        .map_err(|err| DeviceError::Transport(std::io::Error::new(std::io::ErrorKind::Other, err)))?
        .map_err(serial_err)?;

        Ok(Arc::new(FxPakProDevice {
            descriptor: make_descriptor(uri, None),
            port: Arc::new(StdMutex::new(port)),
        }))
    }
}

pub struct FxPakProDevice {
    descriptor: DeviceDescriptor,
    port: Arc<StdMutex<Box<dyn SerialPort>>>,
}

/// One ≤255-byte slice of a batched request, tagged with the request it
/// reassembles into.
struct Piece {
    request_index: usize,
    address: u32,
    len: u32,
}

fn split_pieces(sizes: impl Iterator<Item = (usize, u32, u32)>) -> Vec<Piece> {
    let mut pieces = Vec::new();
    for (request_index, address, size) in sizes {
        for (addr, len) in chunks(address, size, MAX_TUPLE_LEN) {
            pieces.push(Piece {
                request_index,
                address: addr,
                len,
            });
        }
    }
    pieces
}

#[async_trait]
impl Device for FxPakProDevice {
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
        deadline: Deadline,
    ) -> Result<Vec<MemoryReadResponse>> {
        let planned = plan_reads(self.device_space(), mapping, reads)?;
        let pieces = split_pieces(
            planned
                .iter()
                .enumerate()
                .map(|(i, read)| (i, read.device_address, read.request.size)),
        );

        let deadline_at = deadline.resolve(DEFAULT_TIMEOUT).into_std();
        let port = self.port.clone();
        let piece_data: Vec<(usize, Vec<u8>)> = tokio::task::spawn_blocking(move || {
            let mut port = port.lock().expect("serial port poisoned");
            let mut out = Vec::with_capacity(pieces.len());
            for group in pieces.chunks(MAX_TUPLES) {
                arm_timeout(&mut port, deadline_at)?;

                let tuples: Vec<(u32, u8)> =
                    group.iter().map(|p| (p.address, p.len as u8)).collect();
                port.write_all(&command::vget(&tuples)).map_err(map_io)?;

                let total: usize = group.iter().map(|p| p.len as usize).sum();
                let mut buf = vec![0u8; command::padded_len(total)];
                port.read_exact(&mut buf).map_err(map_io)?;

                let mut offset = 0usize;
                for piece in group {
                    let len = piece.len as usize;
                    out.push((piece.request_index, buf[offset..offset + len].to_vec()));
                    offset += len;
                }
            }
            Ok::<_, DeviceError>(out)
        })
        .await
        .map_err(|err| DeviceError::Transport(std::io::Error::new(std::io::ErrorKind::Other, err)))??;

        let mut responses: Vec<MemoryReadResponse> = planned
            .iter()
            .map(|read| read.response(self.device_space(), Vec::new()))
            .collect();
        for (request_index, data) in piece_data {
            responses[request_index].data.extend_from_slice(&data);
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
        let pieces = split_pieces(
            planned
                .iter()
                .enumerate()
                .map(|(i, write)| (i, write.device_address, write.request.data.len() as u32)),
        );

        // Flatten the batch's payload in piece order so the blocking task
        // owns everything it sends.
        let mut payload = Vec::new();
        {
            let mut cursors = vec![0usize; planned.len()];
            for piece in &pieces {
                let data = &planned[piece.request_index].request.data;
                let start = cursors[piece.request_index];
                payload.extend_from_slice(&data[start..start + piece.len as usize]);
                cursors[piece.request_index] += piece.len as usize;
            }
        }

        let deadline_at = deadline.resolve(DEFAULT_TIMEOUT).into_std();
        let port = self.port.clone();
        tokio::task::spawn_blocking(move || {
            let mut port = port.lock().expect("serial port poisoned");
            let mut offset = 0usize;
            for group in pieces.chunks(MAX_TUPLES) {
                arm_timeout(&mut port, deadline_at)?;

                let tuples: Vec<(u32, u8)> =
                    group.iter().map(|p| (p.address, p.len as u8)).collect();
                port.write_all(&command::vput(&tuples)).map_err(map_io)?;

                let total: usize = group.iter().map(|p| p.len as usize).sum();
                let mut frame = vec![0u8; command::padded_len(total)];
                frame[..total].copy_from_slice(&payload[offset..offset + total]);
                port.write_all(&frame).map_err(map_io)?;
                offset += total;
            }
            Ok::<_, DeviceError>(())
        })
        .await
        .map_err(|err| DeviceError::Transport(std::io::Error::new(std::io::ErrorKind::Other, err)))??;

        Ok(planned
            .iter()
            .map(|write| write.response(self.device_space()))
            .collect())
    }

    async fn reset(&self, deadline: Deadline) -> Result<()> {
        let deadline_at = deadline.resolve(DEFAULT_TIMEOUT).into_std();
        let port = self.port.clone();
        tokio::task::spawn_blocking(move || {
            let mut port = port.lock().expect("serial port poisoned");
            arm_timeout(&mut port, deadline_at)?;
            port.write_all(&command::control(command::opcode::RESET))
                .map_err(map_io)
        })
        .await
        .map_err(|err| DeviceError::Transport(std::io::Error::new(std::io::ErrorKind::Other, err)))?
    }
}
