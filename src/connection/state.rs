//! Connection lifecycle states.
//!
//! ```text
//! Closed --handshake/accept--> Negotiating --> Opened
//! Opened --close()--> ClosingLocal --close frame sent--> ClosingBoth
//! ClosingBoth --peer close / force_close--> Closed (terminal)
//! ```

/// WebSocket connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Fresh connection before negotiation, or torn down.
    #[default]
    Closed,
    /// Upgrade request or response in flight.
    Negotiating,
    /// Open for data in both directions.
    Opened,
    /// `close()` called; close frame being written.
    ClosingLocal,
    /// Close frame sent; waiting for the peer's close.
    ClosingBoth,
}

impl Status {
    /// Sending data frames is allowed only when open.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, Status::Opened)
    }

    /// A close handshake started by this side is in progress.
    #[must_use]
    #[inline]
    pub const fn is_closing(&self) -> bool {
        matches!(self, Status::ClosingLocal | Status::ClosingBoth)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Closed => "closed",
            Status::Negotiating => "negotiating",
            Status::Opened => "opened",
            Status::ClosingLocal => "closing_local",
            Status::ClosingBoth => "closing_both",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert_eq!(Status::default(), Status::Closed);
    }

    #[test]
    fn test_can_send_in_each_state() {
        assert!(!Status::Closed.can_send());
        assert!(!Status::Negotiating.can_send());
        assert!(Status::Opened.can_send());
        assert!(!Status::ClosingLocal.can_send());
        assert!(!Status::ClosingBoth.can_send());
    }

    #[test]
    fn test_is_closing() {
        assert!(Status::ClosingLocal.is_closing());
        assert!(Status::ClosingBoth.is_closing());
        assert!(!Status::Opened.is_closing());
        assert!(!Status::Closed.is_closing());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(Status::Negotiating.to_string(), "negotiating");
        assert_eq!(Status::ClosingBoth.to_string(), "closing_both");
    }
}
