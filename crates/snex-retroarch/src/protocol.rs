//! The RetroArch network-command wire format.
//!
//! Requests and responses are ASCII lines. One command per datagram on the
//! way out (though a batch of read commands may be packed into a single
//! datagram); one or more datagrams per request on the way back. Everything
//! here is pure so the codec can be tested without sockets.

use core::fmt::Write as _;

use thiserror::Error;

/// RetroArch 1.9.0 caps reads at 2723 bytes; stay at a round 2048 to keep
/// the chunk math simple.
pub const MAX_CHUNK: u32 = 2048;

pub const DEFAULT_PORT: u16 = 55355;

pub const VERSION_COMMAND: &str = "VERSION\n";
pub const RESET_COMMAND: &str = "RESET\n";
pub const PAUSE_TOGGLE_COMMAND: &str = "PAUSE_TOGGLE\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Parse a `major.minor.patch` version reply. Trailing suffixes after the
    /// patch digits (`-rc1` and friends) are ignored.
    pub fn parse(raw: &str) -> Option<Version> {
        let mut parts = raw.trim().splitn(3, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch_digits: String = parts
            .next()?
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        let patch = patch_digits.parse().ok()?;
        Some(Version {
            major,
            minor,
            patch,
        })
    }

    /// The legacy `*_CORE_RAM` command set is required up to and including
    /// 1.9.0; `*_CORE_MEMORY` exists from 1.9.1 on.
    pub fn use_legacy_commands(self) -> bool {
        match self.major {
            0 => true,
            1 => self.minor < 9 || (self.minor == 9 && self.patch == 0),
            _ => false,
        }
    }
}

pub fn read_command(legacy: bool) -> &'static str {
    if legacy {
        "READ_CORE_RAM"
    } else {
        "READ_CORE_MEMORY"
    }
}

pub fn write_command(legacy: bool) -> &'static str {
    if legacy {
        "WRITE_CORE_RAM"
    } else {
        "WRITE_CORE_MEMORY"
    }
}

/// Append one read command line: `<CMD> <6-hex-addr> <decimal-size>\n`.
pub fn push_read_command(out: &mut String, legacy: bool, address: u32, size: u32) {
    let _ = writeln!(out, "{} {address:06x} {size}", read_command(legacy));
}

/// Append one write command line: `<CMD> <6-hex-addr> <hex-byte>...\n`.
pub fn push_write_command(out: &mut String, legacy: bool, address: u32, data: &[u8]) {
    let _ = write!(out, "{} {address:06x}", write_command(legacy));
    for byte in data {
        let _ = write!(out, " {byte:02x}");
    }
    out.push('\n');
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// The emulator answered `-1`: no core or no ROM is loaded.
    #[error("no core loaded")]
    NoCore,

    #[error("response for wrong address {got:06x} (expected {expected:06x})")]
    AddressMismatch { expected: u32, got: u32 },

    #[error("wrote {got} bytes (expected {expected})")]
    LengthMismatch { expected: u32, got: u32 },

    #[error("malformed response: {0}")]
    Malformed(String),
}

fn tokenize(raw: &[u8]) -> Result<Vec<&str>, ResponseError> {
    let text = core::str::from_utf8(raw)
        .map_err(|_| ResponseError::Malformed("non-ASCII response".to_string()))?;
    Ok(text.split_ascii_whitespace().collect())
}

fn parse_prefix<'a>(
    tokens: &'a [&'a str],
    command: &str,
    expected_addr: u32,
) -> Result<(u32, &'a [&'a str]), ResponseError> {
    let (&cmd, rest) = tokens
        .split_first()
        .ok_or_else(|| ResponseError::Malformed("empty response".to_string()))?;
    if cmd != command {
        return Err(ResponseError::Malformed(format!(
            "unexpected reply {cmd:?} (expected {command})"
        )));
    }
    let (&addr_token, rest) = rest
        .split_first()
        .ok_or_else(|| ResponseError::Malformed("missing address".to_string()))?;
    let addr = u32::from_str_radix(addr_token, 16)
        .map_err(|_| ResponseError::Malformed(format!("bad address {addr_token:?}")))?;

    // A `-1` in the first payload field outranks everything else: it is the
    // emulator's way of saying no core is loaded.
    if let Some(first) = rest.first() {
        if first.starts_with('-') && first[1..].parse::<i64>().is_ok() {
            return Err(ResponseError::NoCore);
        }
    }

    if addr != expected_addr {
        return Err(ResponseError::AddressMismatch {
            expected: expected_addr,
            got: addr,
        });
    }
    Ok((addr, rest))
}

/// Parse one read response datagram, returning the payload bytes.
pub fn parse_read_response(
    raw: &[u8],
    legacy: bool,
    expected_addr: u32,
) -> Result<Vec<u8>, ResponseError> {
    let tokens = tokenize(raw)?;
    let (_, payload) = parse_prefix(&tokens, read_command(legacy), expected_addr)?;

    payload
        .iter()
        .map(|token| {
            u8::from_str_radix(token, 16)
                .map_err(|_| ResponseError::Malformed(format!("bad data byte {token:?}")))
        })
        .collect()
}

/// Parse one write acknowledgement (modern dialect only), validating the
/// echoed address and byte count.
pub fn parse_write_response(
    raw: &[u8],
    expected_addr: u32,
    expected_len: u32,
) -> Result<(), ResponseError> {
    let tokens = tokenize(raw)?;
    let (_, payload) = parse_prefix(&tokens, write_command(false), expected_addr)?;

    let written: u32 = payload
        .first()
        .ok_or_else(|| ResponseError::Malformed("missing byte count".to_string()))?
        .parse()
        .map_err(|_| ResponseError::Malformed(format!("bad byte count {payload:?}")))?;
    if written != expected_len {
        return Err(ResponseError::LengthMismatch {
            expected: expected_len,
            got: written,
        });
    }
    Ok(())
}
