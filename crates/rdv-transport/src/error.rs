use crate::{ConnectionId, PeerId};

/// Errors surfaced by the transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("identity {0} is already taken")]
    IdentityTaken(PeerId),

    #[error("could not connect to peer {0}")]
    UnknownPeer(PeerId),

    #[error("connection {0} is not open")]
    NotOpen(ConnectionId),

    #[error("endpoint was destroyed")]
    EndpointDestroyed,

    #[error("network is shut down")]
    Shutdown,
}
