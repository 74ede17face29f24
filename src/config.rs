//! Configuration and limits for WebSocket connections.

use std::time::Duration;

use bytes::Bytes;

use crate::connection::Role;
use crate::protocol::frame::MAX_HEADER_LEN;

/// Smallest accepted value for [`Limits::max_message_size`].
pub const MIN_MESSAGE_SIZE: usize = 16 * 1024;

/// Smallest accepted value for [`Config::fragment_size`].
pub const MIN_FRAGMENT_SIZE: usize = 4 * 1024;

/// Size limits for WebSocket connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a complete message in bytes, after reassembly.
    ///
    /// Default: 16 KB. Values below 16 KB are raised to 16 KB.
    pub max_message_size: usize,

    /// Maximum size of the handshake header block in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_size: MIN_MESSAGE_SIZE,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    ///
    /// `max_message_size` is clamped to [`MIN_MESSAGE_SIZE`].
    #[must_use]
    pub const fn new(max_message_size: usize, max_handshake_size: usize) -> Self {
        Self {
            max_message_size: clamp_min(max_message_size, MIN_MESSAGE_SIZE),
            max_handshake_size,
        }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooBig`](crate::Error::PayloadTooBig) if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: u64) -> Result<(), crate::Error> {
        if size > self.max_message_size as u64 {
            Err(crate::Error::PayloadTooBig {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a buffered handshake block has not reached the limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HeaderTooBig`](crate::Error::HeaderTooBig) once `size` reaches the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        if size >= self.max_handshake_size {
            Err(crate::Error::HeaderTooBig {
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Periodic ping / liveness check.
///
/// Every `interval` the connection checks when the peer was last heard from.
/// A peer silent for longer than `interval` is considered gone; otherwise a
/// ping carrying `message` is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keepalive {
    /// Ping payload, truncated to 125 bytes on the wire.
    pub message: Bytes,
    /// Check period and idle timeout.
    pub interval: Duration,
}

impl Keepalive {
    /// Create a keepalive with the given ping payload and interval.
    pub fn new(message: impl Into<Bytes>, interval: Duration) -> Self {
        Self {
            message: message.into(),
            interval,
        }
    }
}

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Largest payload per outgoing frame.
    ///
    /// Messages larger than this are split into continuation frames.
    ///
    /// Default: 4 KB. Values below 4 KB are raised to 4 KB.
    pub fragment_size: usize,

    /// Mask frames when sending.
    ///
    /// RFC 6455 requires clients to mask every frame and servers never to.
    ///
    /// Default: true
    pub mask_frames: bool,

    /// Initial read buffer capacity (in bytes).
    ///
    /// Default: 16 KB plus one maximal frame header.
    pub read_buffer_size: usize,

    /// Initial write buffer capacity (in bytes).
    ///
    /// Default: 4 KB plus one maximal frame header.
    pub write_buffer_size: usize,

    /// Keepalive settings. `None` or a zero interval disables the timer.
    ///
    /// Default: None
    pub keepalive: Option<Keepalive>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: MIN_FRAGMENT_SIZE,
            mask_frames: true,
            read_buffer_size: MIN_MESSAGE_SIZE + MAX_HEADER_LEN,
            write_buffer_size: MIN_FRAGMENT_SIZE + MAX_HEADER_LEN,
            keepalive: None,
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the maximum message size, clamped to [`MIN_MESSAGE_SIZE`].
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.limits.max_message_size = clamp_min(size, MIN_MESSAGE_SIZE);
        self
    }

    /// Set fragment size for outgoing messages, clamped to [`MIN_FRAGMENT_SIZE`].
    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = clamp_min(size, MIN_FRAGMENT_SIZE);
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set write buffer size.
    #[must_use]
    pub const fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Enable keepalive pings.
    #[must_use]
    pub fn with_keepalive(mut self, message: impl Into<Bytes>, interval: Duration) -> Self {
        self.keepalive = Some(Keepalive::new(message, interval));
        self
    }

    /// Defaults for `role`: clients mask every frame, servers never do.
    #[must_use]
    pub fn for_role(role: Role) -> Self {
        Self {
            mask_frames: role.must_mask(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn server() -> Self {
        Self::for_role(Role::Server)
    }

    #[must_use]
    pub fn client() -> Self {
        Self::for_role(Role::Client)
    }

    /// Keepalive settings if the timer should run.
    pub(crate) fn active_keepalive(&self) -> Option<&Keepalive> {
        self.keepalive
            .as_ref()
            .filter(|k| !k.interval.is_zero())
    }
}

const fn clamp_min(value: usize, min: usize) -> usize {
    if value < min { min } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_limits_default() {
        let limits = Limits::default();
        assert_eq!(limits.max_message_size, 16 * 1024);
        assert_eq!(limits.max_handshake_size, 8192);
    }

    #[test]
    fn test_limits_new_clamps() {
        let limits = Limits::new(100, 1024);
        assert_eq!(limits.max_message_size, MIN_MESSAGE_SIZE);
        assert_eq!(limits.max_handshake_size, 1024);

        let limits = Limits::new(1 << 20, 1024);
        assert_eq!(limits.max_message_size, 1 << 20);
    }

    #[test]
    fn test_limits_check_message_size() {
        let limits = Limits::default();
        assert!(limits.check_message_size(16 * 1024).is_ok());
        assert!(matches!(
            limits.check_message_size(16 * 1024 + 1),
            Err(Error::PayloadTooBig { size: 16385, max: 16384 })
        ));
    }

    #[test]
    fn test_limits_check_handshake_size() {
        let limits = Limits::default();
        assert!(limits.check_handshake_size(1024).is_ok());
        assert!(matches!(
            limits.check_handshake_size(8192),
            Err(Error::HeaderTooBig { max: 8192 })
        ));
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.fragment_size, 4096);
        assert_eq!(config.read_buffer_size, 16 * 1024 + 14);
        assert!(config.mask_frames);
        assert!(config.keepalive.is_none());
    }

    #[test]
    fn test_config_roles() {
        assert!(!Config::server().mask_frames);
        assert!(Config::client().mask_frames);
    }

    #[test]
    fn test_config_builder_clamps() {
        let config = Config::new()
            .with_fragment_size(100)
            .with_max_message_size(1000);
        assert_eq!(config.fragment_size, MIN_FRAGMENT_SIZE);
        assert_eq!(config.limits.max_message_size, MIN_MESSAGE_SIZE);

        let config = Config::new()
            .with_fragment_size(8192)
            .with_max_message_size(1 << 20);
        assert_eq!(config.fragment_size, 8192);
        assert_eq!(config.limits.max_message_size, 1 << 20);
    }

    #[test]
    fn test_config_buffer_size() {
        let config = Config::new()
            .with_read_buffer_size(1024)
            .with_write_buffer_size(2048);

        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.write_buffer_size, 2048);
    }

    #[test]
    fn test_config_keepalive() {
        let config = Config::new().with_keepalive("ping", Duration::from_secs(5));
        let keepalive = config.active_keepalive().unwrap();
        assert_eq!(keepalive.message, Bytes::from_static(b"ping"));
        assert_eq!(keepalive.interval, Duration::from_secs(5));

        let config = Config::new().with_keepalive("ping", Duration::ZERO);
        assert!(config.active_keepalive().is_none());
    }
}
