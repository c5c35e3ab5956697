use rdv_transport::{ConnectionId, EndpointId, MemoryNode, PeerId, TransportError, TransportEvent};

/// Transport seam for the runtime.
///
/// In production: any connection-oriented point-to-point transport.
/// In simulation and tests: [`MemoryNode`].
///
/// Operations are fire-and-forget; their outcomes arrive later as
/// [`TransportEvent`]s through [`next_event`](Transport::next_event).
/// Only `send` reports failure synchronously.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Open an endpoint under `identity`.
    fn open(&mut self, endpoint: EndpointId, identity: &PeerId);

    /// Tear down an endpoint, releasing its identity.
    fn destroy(&mut self, endpoint: EndpointId);

    fn connect(&mut self, conn: ConnectionId, from: EndpointId, to: &PeerId);

    fn send(&mut self, conn: ConnectionId, data: &[u8]) -> Result<(), TransportError>;

    fn close(&mut self, conn: ConnectionId);

    fn is_open(&self, conn: ConnectionId) -> bool;

    /// Next transport event. `None` once the transport is gone.
    async fn next_event(&mut self) -> Option<TransportEvent>;
}

// ── Impl for MemoryNode ──────────────────────────────────────────────

#[async_trait::async_trait]
impl Transport for MemoryNode {
    fn open(&mut self, endpoint: EndpointId, identity: &PeerId) {
        MemoryNode::open(self, endpoint, identity);
    }

    fn destroy(&mut self, endpoint: EndpointId) {
        MemoryNode::destroy(self, endpoint);
    }

    fn connect(&mut self, conn: ConnectionId, from: EndpointId, to: &PeerId) {
        MemoryNode::connect(self, conn, from, to);
    }

    fn send(&mut self, conn: ConnectionId, data: &[u8]) -> Result<(), TransportError> {
        MemoryNode::send(self, conn, data)
    }

    fn close(&mut self, conn: ConnectionId) {
        MemoryNode::close(self, conn);
    }

    fn is_open(&self, conn: ConnectionId) -> bool {
        MemoryNode::is_open(self, conn)
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.recv().await
    }
}

// ── MockTransport (tests) ────────────────────────────────────────────

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// Records every call; sends fail for connections marked closed.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        pub calls: Arc<Mutex<Vec<MockCall>>>,
        sent: Arc<Mutex<Vec<(ConnectionId, Vec<u8>)>>>,
        closed: Arc<Mutex<HashSet<ConnectionId>>>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MockCall {
        Open(EndpointId, PeerId),
        Destroy(EndpointId),
        Connect(ConnectionId, PeerId),
        Close(ConnectionId),
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<(ConnectionId, Vec<u8>)> {
            self.sent.lock().unwrap().clone()
        }

        pub fn calls(&self) -> Vec<MockCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn mark_closed(&self, conn: ConnectionId) {
            self.closed.lock().unwrap().insert(conn);
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        fn open(&mut self, endpoint: EndpointId, identity: &PeerId) {
            self.calls
                .lock()
                .unwrap()
                .push(MockCall::Open(endpoint, identity.clone()));
        }

        fn destroy(&mut self, endpoint: EndpointId) {
            self.calls.lock().unwrap().push(MockCall::Destroy(endpoint));
        }

        fn connect(&mut self, conn: ConnectionId, _from: EndpointId, to: &PeerId) {
            self.calls
                .lock()
                .unwrap()
                .push(MockCall::Connect(conn, to.clone()));
        }

        fn send(&mut self, conn: ConnectionId, data: &[u8]) -> Result<(), TransportError> {
            if self.closed.lock().unwrap().contains(&conn) {
                return Err(TransportError::NotOpen(conn));
            }
            self.sent.lock().unwrap().push((conn, data.to_vec()));
            Ok(())
        }

        fn close(&mut self, conn: ConnectionId) {
            self.closed.lock().unwrap().insert(conn);
            self.calls.lock().unwrap().push(MockCall::Close(conn));
        }

        fn is_open(&self, conn: ConnectionId) -> bool {
            !self.closed.lock().unwrap().contains(&conn)
        }

        async fn next_event(&mut self) -> Option<TransportEvent> {
            None
        }
    }
}
