//! Signaling peer state machine.

use cohost_protocol::RtcState;

/// State of a session's real-time peer.
///
/// `New -> Negotiating -> Connected -> {Disconnected, Failed} -> Closed`.
/// `Closed` is reachable from every state and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Created, no offer yet.
    New,
    /// Offer sent, waiting for the connection to come up.
    Negotiating,
    /// ICE and DTLS are up.
    Connected,
    /// Connectivity lost.
    Disconnected,
    /// Negotiation or connectivity failed.
    Failed,
    /// Torn down.
    Closed,
}

impl PeerState {
    /// State after the local offer has been created.
    pub fn on_offer(self) -> Option<Self> {
        match self {
            Self::New | Self::Negotiating | Self::Connected => Some(Self::Negotiating),
            _ => None,
        }
    }

    /// State after the backend reported `rtc`. `None` means no change.
    pub fn on_rtc(self, rtc: RtcState) -> Option<Self> {
        let next = match (self, rtc) {
            (Self::Closed, _) => return None,
            (_, RtcState::Closed) => Self::Closed,
            (Self::New | Self::Negotiating, RtcState::Connecting) => Self::Negotiating,
            (Self::New | Self::Negotiating, RtcState::Connected) => Self::Connected,
            (Self::New | Self::Negotiating | Self::Connected, RtcState::Failed) => Self::Failed,
            (Self::Connected, RtcState::Disconnected) => Self::Disconnected,
            (Self::Negotiating, RtcState::Disconnected) => Self::Failed,
            _ => return None,
        };
        (next != self).then_some(next)
    }

    /// Whether the peer must be torn down.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "New"),
            Self::Negotiating => write!(f, "Negotiating"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Failed => write!(f, "Failed"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let s = PeerState::New.on_offer().unwrap();
        assert_eq!(s, PeerState::Negotiating);
        let s = s.on_rtc(RtcState::Connecting);
        assert_eq!(s, None);
        let s = PeerState::Negotiating.on_rtc(RtcState::Connected).unwrap();
        assert_eq!(s, PeerState::Connected);
        let s = s.on_rtc(RtcState::Disconnected).unwrap();
        assert!(s.is_terminal());
        assert_eq!(s.on_rtc(RtcState::Closed), Some(PeerState::Closed));
    }

    #[test]
    fn closed_is_terminal() {
        assert_eq!(PeerState::Closed.on_rtc(RtcState::Connected), None);
        assert_eq!(PeerState::Closed.on_offer(), None);
    }

    #[test]
    fn failure_while_negotiating() {
        assert_eq!(
            PeerState::Negotiating.on_rtc(RtcState::Failed),
            Some(PeerState::Failed)
        );
        assert_eq!(
            PeerState::Negotiating.on_rtc(RtcState::Disconnected),
            Some(PeerState::Failed)
        );
    }

    #[test]
    fn renegotiation_keeps_negotiating() {
        assert_eq!(PeerState::Connected.on_offer(), Some(PeerState::Negotiating));
    }
}
