//! Rendezvous lobby protocol.
//!
//! Independent processes agree on one coordinator by racing for a reserved
//! transport identity, form a fixed-size lobby through it, and then exchange
//! application messages over a star with at most one relay hop.
//!
//! Wire format: MessagePack (compact binary).
//! Core logic is pure (`RuntimeState` returns effects); all I/O happens in
//! the executor driven by the runtime loop.

pub mod envelope;
pub mod error;
pub mod lobby;
pub mod relay;
pub mod runtime;
pub mod supervisor;
pub mod sync;
pub mod types;

pub use envelope::{ChatMessage, Envelope, EnvelopeKind, Payload};
pub use error::LobbyError;
pub use lobby::{
    AuthorityAction, ClientView, DiscoveryAction, DiscoveryClient, ElectionUnit, LobbyAuthority,
    LobbyEvent, LobbySession, RetryDecision, RetryState, SeekerPhase,
};
pub use relay::{Delivery, RelayPlan};
pub use runtime::{
    ChannelObserver, LobbyObserver, LogEntry, MembershipSnapshot, ProtocolEvent, ProtocolRuntime,
    Role, RuntimeConfig, RuntimeHandle, Severity,
};
pub use sync::{SyncKind, Throttle};
pub use types::{now_ms, GridCell, PlayerState, TerrainChanges, Vec3};

pub use rdv_transport::{ConnectionId, EndpointId, PeerId, TransportError, TransportEvent};
