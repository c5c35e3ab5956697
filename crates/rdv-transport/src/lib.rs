//! Transport adapter contract for the rendezvous lobby protocol.
//!
//! The protocol consumes a connection-oriented, point-to-point transport
//! through a narrow surface: open an endpoint under an identity, connect
//! to another identity, send, close, and observe events. Identities are
//! exclusive: opening an endpoint under an identity that is already held
//! fails with [`TransportError::IdentityTaken`].
//!
//! [`MemoryNetwork`] is an in-process implementation of that contract,
//! used to run several protocol instances side by side (simulation and
//! tests). It is not a network transport.
//!
//! # Quick start
//!
//! ```rust
//! use rdv_transport::{ConnectionId, EndpointId, MemoryNetwork, PeerId, TransportEvent};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let network = MemoryNetwork::new();
//! let mut alice = network.node();
//! let mut bob = network.node();
//!
//! let a = EndpointId::new();
//! let b = EndpointId::new();
//! alice.open(a, &PeerId::from("alice"));
//! bob.open(b, &PeerId::from("bob"));
//!
//! let conn = ConnectionId::new();
//! alice.connect(conn, a, &PeerId::from("bob"));
//! # let _ = alice.recv().await; // EndpointOpened
//! # let _ = alice.recv().await; // ConnectionOpened
//! alice.send(conn, b"hello").unwrap();
//!
//! # let _ = bob.recv().await; // EndpointOpened
//! # let _ = bob.recv().await; // Incoming
//! let event = bob.recv().await.unwrap();
//! assert!(matches!(event, TransportEvent::Data { .. }));
//! # }
//! ```

mod error;
mod event;
mod memory;

pub use error::TransportError;
pub use event::TransportEvent;
pub use memory::{MemoryNetwork, MemoryNode};

use std::fmt;

/// Process identity on the transport: an opaque, globally unique string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A random process identity of the form `<prefix>-<8 lowercase alphanumerics>`.
    pub fn random(prefix: &str) -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{prefix}-{}", &raw[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Handle for one endpoint opened under an identity.
///
/// Allocated by the caller so that asynchronous open/fail events can be
/// matched against the attempt that produced them.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(uuid::Uuid);

impl EndpointId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.simple().to_string();
        write!(f, "EndpointId({})", &s[..8])
    }
}

/// Handle for one side of a logical connection.
///
/// Outbound connections are allocated by the caller; inbound ones by the
/// transport and announced via [`TransportEvent::Incoming`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.simple().to_string();
        write!(f, "ConnectionId({})", &s[..8])
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_peer_id_has_prefix_and_suffix() {
        let id = PeerId::random("ChainNode");
        let s = id.as_str();
        assert!(s.starts_with("ChainNode-"));
        assert_eq!(s.len(), "ChainNode-".len() + 8);
    }

    #[test]
    fn random_peer_ids_differ() {
        assert_ne!(PeerId::random("p"), PeerId::random("p"));
    }

    #[test]
    fn blank_peer_id_is_empty() {
        assert!(PeerId::from("  ").is_empty());
        assert!(!PeerId::from("alice").is_empty());
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
        assert_ne!(EndpointId::new(), EndpointId::new());
    }
}
