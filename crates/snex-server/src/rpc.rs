//! Wire types for the JSON API. The RPC layer is a thin dispatcher: these
//! records convert to and from the core model and carry payloads hex-encoded
//! so batches stay readable in logs and tests.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use snex_core::memory::Deadline;
use snex_core::{
    AddressSpace, DeviceDescriptor, MappingMode, MemoryReadRequest, MemoryReadResponse,
    MemoryWriteRequest, MemoryWriteResponse,
};

pub fn hex_encode(data: &[u8]) -> String {
    const TABLE: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push(TABLE[(byte >> 4) as usize] as char);
        out.push(TABLE[(byte & 0x0F) as usize] as char);
    }
    out
}

pub fn hex_decode(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.len() % 2 != 0 {
        return None;
    }
    let nibble = |b: u8| match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    };
    text.as_bytes()
        .chunks(2)
        .map(|pair| Some((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequestDto {
    pub space: AddressSpace,
    pub address: u32,
    pub size: u32,
}

impl ReadRequestDto {
    pub fn into_core(self) -> MemoryReadRequest {
        MemoryReadRequest {
            request_space: self.space,
            request_address: self.address,
            size: self.size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResponseDto {
    pub space: AddressSpace,
    pub address: u32,
    pub device_space: AddressSpace,
    pub device_address: u32,
    pub data: String,
}

impl From<MemoryReadResponse> for ReadResponseDto {
    fn from(rsp: MemoryReadResponse) -> ReadResponseDto {
        ReadResponseDto {
            space: rsp.request_space,
            address: rsp.request_address,
            device_space: rsp.device_space,
            device_address: rsp.device_address,
            data: hex_encode(&rsp.data),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequestDto {
    pub space: AddressSpace,
    pub address: u32,
    /// Hex-encoded payload.
    pub data: String,
}

impl WriteRequestDto {
    pub fn into_core(self) -> Option<MemoryWriteRequest> {
        Some(MemoryWriteRequest {
            request_space: self.space,
            request_address: self.address,
            data: hex_decode(&self.data)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponseDto {
    pub space: AddressSpace,
    pub address: u32,
    pub device_space: AddressSpace,
    pub device_address: u32,
    pub size: u32,
}

impl From<MemoryWriteResponse> for WriteResponseDto {
    fn from(rsp: MemoryWriteResponse) -> WriteResponseDto {
        WriteResponseDto {
            space: rsp.request_space,
            address: rsp.request_address,
            device_space: rsp.device_space,
            device_address: rsp.device_address,
            size: rsp.size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDto {
    pub uri: String,
    pub display_name: String,
    pub kind: String,
    pub capabilities: Vec<String>,
    pub default_address_space: AddressSpace,
}

impl From<DeviceDescriptor> for DeviceDto {
    fn from(descriptor: DeviceDescriptor) -> DeviceDto {
        DeviceDto {
            uri: descriptor.uri.as_str().to_string(),
            display_name: descriptor.display_name,
            kind: descriptor.kind.to_string(),
            capabilities: descriptor
                .capabilities
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            default_address_space: descriptor.default_address_space,
        }
    }
}

fn default_mapping() -> MappingMode {
    MappingMode::Unknown
}

#[derive(Debug, Clone, Deserialize)]
pub struct SingleReadBody {
    pub uri: String,
    #[serde(default = "default_mapping")]
    pub mapping: MappingMode,
    pub request: ReadRequestDto,
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SingleWriteBody {
    pub uri: String,
    #[serde(default = "default_mapping")]
    pub mapping: MappingMode,
    pub request: WriteRequestDto,
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultiReadBody {
    pub uri: String,
    #[serde(default = "default_mapping")]
    pub mapping: MappingMode,
    pub requests: Vec<ReadRequestDto>,
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultiWriteBody {
    pub uri: String,
    #[serde(default = "default_mapping")]
    pub mapping: MappingMode,
    pub requests: Vec<WriteRequestDto>,
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlBody {
    pub uri: String,
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PauseBody {
    pub uri: String,
    pub paused: bool,
    pub deadline_ms: Option<u64>,
}

pub fn deadline_from_ms(deadline_ms: Option<u64>) -> Deadline {
    match deadline_ms {
        Some(ms) if ms > 0 => Deadline::after(Duration::from_millis(ms)),
        _ => Deadline::NONE,
    }
}

/// One formatter per request family, used by the timing layer. Formatting is
/// only invoked when the corresponding log level is enabled.
pub trait MethodSummary {
    fn summary(&self) -> String;
}

impl MethodSummary for ReadRequestDto {
    fn summary(&self) -> String {
        format!(
            "{{address:{}(${:06x}),size:${:x}}}",
            self.space, self.address, self.size
        )
    }
}

impl MethodSummary for WriteRequestDto {
    fn summary(&self) -> String {
        format!(
            "{{address:{}(${:06x}),size:${:x}}}",
            self.space,
            self.address,
            self.data.len() / 2
        )
    }
}

impl MethodSummary for SingleReadBody {
    fn summary(&self) -> String {
        format!("uri:{:?},request:{}", self.uri, self.request.summary())
    }
}

impl MethodSummary for SingleWriteBody {
    fn summary(&self) -> String {
        format!("uri:{:?},request:{}", self.uri, self.request.summary())
    }
}

impl MethodSummary for MultiReadBody {
    fn summary(&self) -> String {
        let requests: Vec<String> = self.requests.iter().map(|r| r.summary()).collect();
        format!("uri:{:?},requests:[{}]", self.uri, requests.join(","))
    }
}

impl MethodSummary for MultiWriteBody {
    fn summary(&self) -> String {
        let requests: Vec<String> = self.requests.iter().map(|r| r.summary()).collect();
        format!("uri:{:?},requests:[{}]", self.uri, requests.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        assert_eq!(hex_encode(&[0xDE, 0xAD, 0x01]), "dead01");
        assert_eq!(hex_decode("dead01"), Some(vec![0xDE, 0xAD, 0x01]));
        assert_eq!(hex_decode("DEAD01"), Some(vec![0xDE, 0xAD, 0x01]));
        assert_eq!(hex_decode(""), Some(Vec::new()));
        assert_eq!(hex_decode("abc"), None);
        assert_eq!(hex_decode("zz"), None);
    }

    #[test]
    fn summaries_stay_compact() {
        let body = MultiReadBody {
            uri: "mock://0".to_string(),
            mapping: MappingMode::LoRom,
            requests: vec![ReadRequestDto {
                space: AddressSpace::SnesABus,
                address: 0x7E_0000,
                size: 0x10,
            }],
            deadline_ms: None,
        };
        assert_eq!(
            body.summary(),
            "uri:\"mock://0\",requests:[{address:snesabus($7e0000),size:$10}]"
        );
    }
}
