//! Channel admission and global request policy

use tracing::{debug, warn};

/// SSH channel types a peer may open
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    Session,
    X11,
    DirectTcpip,
    ForwardedTcpip,
    Other(String),
}

impl ChannelKind {
    /// Parse the channel type string of a CHANNEL_OPEN message
    pub fn from_wire(name: &str) -> Self {
        match name {
            "session" => Self::Session,
            "x11" => Self::X11,
            "direct-tcpip" => Self::DirectTcpip,
            "forwarded-tcpip" => Self::ForwardedTcpip,
            other => Self::Other(other.to_string()),
        }
    }

    /// Channel type string as it appears on the wire
    pub fn as_str(&self) -> &str {
        match self {
            Self::Session => "session",
            Self::X11 => "x11",
            Self::DirectTcpip => "direct-tcpip",
            Self::ForwardedTcpip => "forwarded-tcpip",
            Self::Other(name) => name,
        }
    }
}

/// Decision on a CHANNEL_OPEN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Confirm the open
    Accept,
    /// Answer OPEN_FAILURE; the connection stays up
    Reject,
}

impl Admission {
    /// Whether the channel is confirmed
    pub const fn is_accept(self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Only `session` channels are admitted. Rejection leaves the connection up.
pub fn admit(kind: &ChannelKind, connection_id: &str) -> Admission {
    if *kind == ChannelKind::Session {
        debug!(event = "channel_accepted", connection_id, channel_type = kind.as_str());
        Admission::Accept
    } else {
        warn!(
            event = "channel_rejected",
            connection_id,
            channel_type = kind.as_str(),
            "Unknown channel type"
        );
        Admission::Reject
    }
}

/// Global requests are never honored; the returned value is the reply to send
/// when one was wanted.
pub fn discard_global_request(name: &str, connection_id: &str) -> bool {
    debug!(event = "global_request_discarded", connection_id, request = name);
    false
}
