//! Which end of the connection this is.

/// Side of the connection.
///
/// Picks the default masking and whether `handshake` or `accept` is the
/// negotiation entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends the upgrade request and masks outgoing frames.
    Client,
    /// Answers the upgrade request and never masks.
    Server,
}

impl Role {
    /// RFC 6455: clients mask, servers must not.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Client)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::Client => "client",
            Role::Server => "server",
        })
    }
}
