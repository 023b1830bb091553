//! Per-channel subsystem negotiation
//!
//! A session channel starts in [`ChannelState::Open`]. The first `subsystem`
//! request naming `sftp` binds it; everything else is refused or ignored
//! depending on whether the peer asked for a reply. Refusal never closes the
//! channel.

use crate::protocol::SUBSYSTEM_NAME;
use tracing::{debug, info};

/// Lifecycle of one session channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Admitted, no subsystem yet
    Open,
    /// `sftp` accepted, router not yet started
    SubsystemBound,
    /// Router running on the channel
    Serving,
    Closed,
}

/// Channel request kinds the negotiator distinguishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Subsystem(String),
    Shell,
    Exec,
    PtyReq,
    Env,
    X11Req,
    WindowChange,
    Signal,
    Other(String),
}

impl RequestKind {
    /// Request type name as it appears on the wire
    pub fn as_str(&self) -> &str {
        match self {
            Self::Subsystem(_) => "subsystem",
            Self::Shell => "shell",
            Self::Exec => "exec",
            Self::PtyReq => "pty-req",
            Self::Env => "env",
            Self::X11Req => "x11-req",
            Self::WindowChange => "window-change",
            Self::Signal => "signal",
            Self::Other(name) => name,
        }
    }
}

/// A channel request as seen by the negotiator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub kind: RequestKind,
    pub want_reply: bool,
}

impl ChannelRequest {
    pub const fn new(kind: RequestKind, want_reply: bool) -> Self {
        Self { kind, want_reply }
    }
}

/// What to do with a channel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Reply success and start the router
    Serve,
    /// Reply failure
    Refuse,
    /// No reply was requested; drop it
    Ignore,
}

/// Subsystem state machine for one channel
#[derive(Debug)]
pub struct Negotiator {
    state: ChannelState,
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new()
    }
}

impl Negotiator {
    /// A negotiator for a freshly admitted channel
    pub const fn new() -> Self {
        Self { state: ChannelState::Open }
    }

    pub const fn state(&self) -> ChannelState {
        self.state
    }

    /// Decide on one channel request.
    pub fn on_request(&mut self, request: &ChannelRequest) -> Verdict {
        let accepted = self.state == ChannelState::Open
            && matches!(&request.kind, RequestKind::Subsystem(name) if name == SUBSYSTEM_NAME);

        if accepted {
            self.state = ChannelState::SubsystemBound;
            info!(event = "subsystem_bound", subsystem = SUBSYSTEM_NAME);
            return Verdict::Serve;
        }

        let verdict = if request.want_reply { Verdict::Refuse } else { Verdict::Ignore };
        debug!(
            event = "channel_request_declined",
            request = request.kind.as_str(),
            subsystem = match &request.kind {
                RequestKind::Subsystem(name) => name.as_str(),
                _ => "",
            },
            state = ?self.state,
            verdict = ?verdict,
        );
        verdict
    }

    /// Record that the router has started. Only valid after `Serve`.
    pub fn begin_serving(&mut self) -> bool {
        if self.state == ChannelState::SubsystemBound {
            self.state = ChannelState::Serving;
            true
        } else {
            false
        }
    }

    /// The channel is gone; every later request is refused.
    pub fn close(&mut self) {
        self.state = ChannelState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subsystem(name: &str, want_reply: bool) -> ChannelRequest {
        ChannelRequest::new(RequestKind::Subsystem(name.to_string()), want_reply)
    }

    #[test]
    fn test_sftp_binds_then_serves() {
        let mut n = Negotiator::new();
        assert_eq!(n.on_request(&subsystem("sftp", true)), Verdict::Serve);
        assert_eq!(n.state(), ChannelState::SubsystemBound);

        assert!(n.begin_serving());
        assert_eq!(n.state(), ChannelState::Serving);
        assert!(!n.begin_serving());

        n.close();
        assert_eq!(n.state(), ChannelState::Closed);
    }

    #[test]
    fn test_sftp_without_want_reply_still_serves() {
        let mut n = Negotiator::new();
        assert_eq!(n.on_request(&subsystem("sftp", false)), Verdict::Serve);
    }

    #[test]
    fn test_other_requests_refused_or_ignored() {
        let requests = [
            RequestKind::Subsystem("netconf".into()),
            RequestKind::Shell,
            RequestKind::Exec,
            RequestKind::PtyReq,
            RequestKind::Env,
            RequestKind::X11Req,
            RequestKind::WindowChange,
            RequestKind::Signal,
            RequestKind::Other("keepalive@openssh.com".into()),
        ];

        for kind in requests {
            let mut n = Negotiator::new();
            assert_eq!(n.on_request(&ChannelRequest::new(kind.clone(), true)), Verdict::Refuse);
            assert_eq!(n.on_request(&ChannelRequest::new(kind, false)), Verdict::Ignore);
            assert_eq!(n.state(), ChannelState::Open);
        }
    }

    #[test]
    fn test_refusal_keeps_channel_negotiable() {
        let mut n = Negotiator::new();
        assert_eq!(n.on_request(&subsystem("scp", true)), Verdict::Refuse);
        assert_eq!(n.on_request(&subsystem("sftp", true)), Verdict::Serve);
    }

    #[test]
    fn test_second_subsystem_refused() {
        let mut n = Negotiator::new();
        assert_eq!(n.on_request(&subsystem("sftp", true)), Verdict::Serve);
        assert_eq!(n.on_request(&subsystem("sftp", true)), Verdict::Refuse);

        n.begin_serving();
        assert_eq!(n.on_request(&subsystem("sftp", false)), Verdict::Ignore);
    }

    #[test]
    fn test_closed_channel_refuses() {
        let mut n = Negotiator::new();
        n.close();
        assert_eq!(n.on_request(&subsystem("sftp", true)), Verdict::Refuse);
        assert!(!n.begin_serving());
    }
}
