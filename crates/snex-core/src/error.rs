use thiserror::Error;

use crate::model::Capability;
use crate::uri::DeviceUri;

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Error kinds surfaced to gateway callers.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no device found at {0}")]
    DeviceNotFound(DeviceUri),

    #[error("no driver registered for scheme {0:?}")]
    SchemeUnknown(String),

    #[error("driver scheme {0:?} registered twice")]
    DuplicateScheme(&'static str),

    #[error("driver registry is sealed; drivers register only at startup")]
    RegistrySealed,

    #[error("invalid device uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: &'static str },

    #[error("device does not support {0}")]
    CapabilityUnavailable(Capability),

    #[error(transparent)]
    AddressOutOfRange(#[from] snex_mapping::AddressOutOfRange),

    #[error("no core or ROM loaded to satisfy the request")]
    NoCore,

    #[error("protocol desync: {0}")]
    ProtocolError(String),

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl DeviceError {
    /// Whether this error leaves the underlying transport in an indeterminate
    /// state. Fatal errors invalidate the cached handle; the next use of the
    /// URI reopens the device.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeviceError::ProtocolError(_)
                | DeviceError::Transport(_)
                | DeviceError::DeadlineExceeded
        )
    }

    /// Stable machine-readable kind name, used by the RPC layer.
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceError::DeviceNotFound(_) => "device_not_found",
            DeviceError::SchemeUnknown(_) => "scheme_unknown",
            DeviceError::DuplicateScheme(_) => "duplicate_scheme",
            DeviceError::RegistrySealed => "registry_sealed",
            DeviceError::InvalidUri { .. } => "invalid_uri",
            DeviceError::CapabilityUnavailable(_) => "capability_unavailable",
            DeviceError::AddressOutOfRange(_) => "address_out_of_range",
            DeviceError::NoCore => "no_core",
            DeviceError::ProtocolError(_) => "protocol_error",
            DeviceError::DeadlineExceeded => "deadline_exceeded",
            DeviceError::Transport(_) => "transport",
        }
    }
}
