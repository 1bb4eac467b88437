use crate::error::DeviceError;

/// A canonicalized device URI of the form `scheme://opaque`.
///
/// Canonicalization lower-cases the scheme and the host portion of the
/// opaque part and strips one trailing slash; ports and paths are preserved.
/// Two URIs that canonicalize equally name the same device handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceUri {
    canonical: String,
    scheme_len: usize,
}

impl DeviceUri {
    pub fn parse(raw: &str) -> Result<DeviceUri, DeviceError> {
        let invalid = |reason| DeviceError::InvalidUri {
            uri: raw.to_string(),
            reason,
        };

        let (scheme, opaque) = raw.split_once("://").ok_or(invalid("missing `://`"))?;
        if scheme.is_empty() {
            return Err(invalid("empty scheme"));
        }
        if !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid("scheme must be alphanumeric"));
        }
        let opaque = opaque.strip_suffix('/').unwrap_or(opaque);
        if opaque.is_empty() {
            return Err(invalid("empty device part"));
        }

        let mut canonical = String::with_capacity(raw.len());
        canonical.extend(scheme.chars().map(|c| c.to_ascii_lowercase()));
        canonical.push_str("://");

        // Lower-case the host, which runs up to the port or path separator.
        let host_end = opaque
            .find(|c| c == ':' || c == '/')
            .unwrap_or(opaque.len());
        canonical.extend(opaque[..host_end].chars().map(|c| c.to_ascii_lowercase()));
        canonical.push_str(&opaque[host_end..]);

        Ok(DeviceUri {
            canonical,
            scheme_len: scheme.len(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.canonical[..self.scheme_len]
    }

    /// The driver-defined part after `scheme://`.
    pub fn opaque(&self) -> &str {
        &self.canonical[self.scheme_len + 3..]
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl core::fmt::Display for DeviceUri {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl std::str::FromStr for DeviceUri {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceUri::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_scheme_and_host() {
        let uri = DeviceUri::parse("RA://Localhost:55355").unwrap();
        assert_eq!(uri.as_str(), "ra://localhost:55355");
        assert_eq!(uri.scheme(), "ra");
        assert_eq!(uri.opaque(), "localhost:55355");
    }

    #[test]
    fn strips_one_trailing_slash() {
        let uri = DeviceUri::parse("mock://0/").unwrap();
        assert_eq!(uri.as_str(), "mock://0");
    }

    #[test]
    fn preserves_path_case() {
        let uri = DeviceUri::parse("fxpakpro:///dev/ttyACM0").unwrap();
        assert_eq!(uri.opaque(), "/dev/ttyACM0");
    }

    #[test]
    fn equal_canonical_uris_are_equal() {
        let a = DeviceUri::parse("Mock://0").unwrap();
        let b = DeviceUri::parse("mock://0/").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_malformed_uris() {
        for raw in ["", "mock", "://x", "mock://", "bad scheme://x"] {
            assert!(DeviceUri::parse(raw).is_err(), "{raw:?}");
        }
    }
}
