use std::time::Duration;

use rdv_transport::ConnectionId;

use crate::envelope::Payload;
use crate::lobby::view::ClientView;
use crate::runtime::Severity;
use crate::types::PeerId;

// ── AuthorityAction ──────────────────────────────────────────────────────

/// Actions produced by [`LobbyAuthority`](super::LobbyAuthority).
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorityAction {
    /// Send a payload back on the connection that asked.
    Reply { conn: ConnectionId, payload: Payload },

    /// Send the same payload on several member connections.
    Broadcast {
        to: Vec<ConnectionId>,
        payload: Payload,
    },

    /// Close a connection (probes are always closed after one reply).
    Close { conn: ConnectionId },

    /// Give up the rendezvous identity; the lobby just became full.
    ReleaseClaim,

    Event(LobbyEvent),
}

// ── LobbyEvent ───────────────────────────────────────────────────────────

/// Coordinator-side membership events.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    /// A seeker asked on the rendezvous identity and was sent to us.
    Redirected {
        seeker: PeerId,
        current: usize,
        total: usize,
    },

    /// A seeker asked on the rendezvous identity while we were full.
    DiscoveryRejected { seeker: PeerId },

    /// A join-host arrived while we were full.
    JoinRejected { peer: PeerId },

    /// A member asked to join again; nothing changed.
    DuplicateJoin { peer: PeerId },

    MemberJoined {
        peer: PeerId,
        current: usize,
        total: usize,
    },

    /// The lobby reached capacity. `members[0]` is the host.
    LobbyFilled { members: Vec<PeerId> },

    MemberLeft {
        peer: PeerId,
        current: usize,
        total: usize,
        /// The departure took the lobby from full back to forming.
        reopened: bool,
    },
}

// ── DiscoveryAction ──────────────────────────────────────────────────────

/// Actions produced by [`DiscoveryClient`](super::DiscoveryClient).
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryAction {
    /// Open an outbound connection from our own endpoint.
    Connect { conn: ConnectionId, to: PeerId },

    Send { conn: ConnectionId, payload: Payload },

    Close { conn: ConnectionId },

    /// Try to claim the rendezvous identity again after `after`.
    ScheduleElection { after: Duration },

    /// Arm the join timeout for a freshly opened host link.
    StartJoinTimer,

    /// Host-ready received; the seeker is now a paired member.
    Paired(ClientView),

    Status(String),

    Log(Severity, String),
}
