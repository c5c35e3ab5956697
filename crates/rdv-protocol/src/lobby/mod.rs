/// Lobby formation for the rendezvous protocol.
///
/// Election by identity exclusivity, seeker-side discovery, and the
/// coordinator's membership authority. Pure state machines: no I/O, every
/// decision is returned as actions for the runtime to execute.
pub mod authority;
pub mod discovery;
pub mod election;
pub mod session;
pub mod types;
pub mod view;

pub use authority::LobbyAuthority;
pub use discovery::{BackoffPolicy, DiscoveryClient, SeekerPhase};
pub use election::{ClaimOutcome, ElectionStart, ElectionUnit, RetryDecision, RetryState};
pub use session::{AdmitError, LobbySession};
pub use types::{AuthorityAction, DiscoveryAction, LobbyEvent};
pub use view::ClientView;
