/// Only SFTP v3 is spoken, see draft-ietf-secsh-filexfer-02
pub const SFTP_VERSION: u32 = 3;

/// Servers should accept packets at least this large, including the
/// length field.
pub const MAX_PACKET_LEN: usize = 34000;

/// Largest DATA payload sent in a single WRITE, or requested by a READ.
pub const DEFAULT_MAX_DATA_LEN: usize = 32768;

/// OpenSSH allows 256kB packets, less room for the header
pub const OPENSSH_MAX_DATA_LEN: usize = 256 * 1024 - 2 * 1024;

/// Server issued handles are at most this long
pub const MAX_HANDLE_LEN: usize = 256;

/// Outbound bytes buffered before new requests are paused
pub const DEFAULT_HIGH_WATER: usize = 32 * 1024;

/// A STATUS body (including the request id) shorter than this
/// has no message or language tag.
pub const STATUS_MIN_FULL_LEN: usize = 12;

// Identification string prefixes of peers with OpenSSH's limits and
// SYMLINK argument order.
const OPENSSH_IDENTS: [&str; 2] = ["SSH-2.0-OpenSSH", "SSH-2.0-dropbear"];

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest packet body accepted from the peer
    pub max_packet_len: usize,

    /// Outbound buffer size at which requests are paused until the
    /// transport drains it.
    pub high_water: usize,

    /// The peer's SSH identification string, eg `SSH-2.0-OpenSSH_9.6`
    pub remote_ident: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_packet_len: MAX_PACKET_LEN,
            high_water: DEFAULT_HIGH_WATER,
            remote_ident: None,
        }
    }
}

impl SessionConfig {
    pub fn with_remote_ident(ident: &str) -> Self {
        Self { remote_ident: Some(ident.into()), ..Default::default() }
    }

    /// Whether the peer is OpenSSH or dropbear
    pub fn is_openssh(&self) -> bool {
        self.remote_ident
            .as_deref()
            .is_some_and(|id| OPENSSH_IDENTS.iter().any(|p| id.starts_with(p)))
    }

    pub fn max_data_len(&self) -> usize {
        if self.is_openssh() {
            OPENSSH_MAX_DATA_LEN
        } else {
            DEFAULT_MAX_DATA_LEN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openssh_detection() {
        assert!(SessionConfig::with_remote_ident("SSH-2.0-OpenSSH_9.6p1").is_openssh());
        assert!(SessionConfig::with_remote_ident("SSH-2.0-dropbear_2022.83").is_openssh());
        assert!(!SessionConfig::with_remote_ident("SSH-2.0-Sunset").is_openssh());
        assert!(!SessionConfig::default().is_openssh());

        assert_eq!(SessionConfig::default().max_data_len(), 32768);
        assert_eq!(
            SessionConfig::with_remote_ident("SSH-2.0-OpenSSH_8.0").max_data_len(),
            260096
        );
    }
}
