//! In-process network: every [`MemoryNode`] is one simulated process.
//!
//! Identity exclusivity is enforced by a shared registry, which is what
//! makes the rendezvous identity usable as a leader-election primitive.
//! Events are queued per node and consumed in order, so each node sees a
//! single, serialized event stream.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::{ConnectionId, EndpointId, PeerId, TransportError, TransportEvent};

type NodeKey = u64;

struct EndpointEntry {
    node: NodeKey,
    identity: PeerId,
    /// Live connection sides attached to this endpoint.
    links: HashSet<ConnectionId>,
}

/// One side of a live connection. Both sides are dropped together on close.
struct Link {
    node: NodeKey,
    endpoint: EndpointId,
    peer: ConnectionId,
}

#[derive(Default)]
struct NetworkInner {
    next_node: NodeKey,
    nodes: HashMap<NodeKey, mpsc::UnboundedSender<TransportEvent>>,
    /// Identity → endpoint currently holding it.
    identities: HashMap<PeerId, EndpointId>,
    endpoints: HashMap<EndpointId, EndpointEntry>,
    links: HashMap<ConnectionId, Link>,
}

impl NetworkInner {
    fn push(&self, node: NodeKey, event: TransportEvent) {
        if let Some(tx) = self.nodes.get(&node) {
            let _ = tx.send(event);
        }
    }

    /// Close both sides of a link, notifying whichever nodes are still alive.
    fn close_link(&mut self, conn: ConnectionId) {
        let Some(link) = self.detach(conn) else {
            return;
        };
        self.push(link.node, TransportEvent::ConnectionClosed { conn });

        if let Some(remote) = self.detach(link.peer) {
            self.push(remote.node, TransportEvent::ConnectionClosed { conn: link.peer });
        }
    }

    fn attach(&mut self, conn: ConnectionId, link: Link) {
        if let Some(entry) = self.endpoints.get_mut(&link.endpoint) {
            entry.links.insert(conn);
        }
        self.links.insert(conn, link);
    }

    /// Drop one connection side from the link table and its endpoint index.
    fn detach(&mut self, conn: ConnectionId) -> Option<Link> {
        let link = self.links.remove(&conn)?;
        if let Some(entry) = self.endpoints.get_mut(&link.endpoint) {
            entry.links.remove(&conn);
        }
        Some(link)
    }

    fn destroy_endpoint(&mut self, endpoint: EndpointId) {
        let Some(entry) = self.endpoints.remove(&endpoint) else {
            return;
        };
        if self.identities.get(&entry.identity) == Some(&endpoint) {
            self.identities.remove(&entry.identity);
            tracing::debug!(identity = %entry.identity, "memory: identity released");
        }
        for conn in entry.links {
            self.close_link(conn);
        }
    }
}

/// Shared in-memory network. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a new process to the network.
    pub fn node(&self) -> MemoryNode {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = {
            let mut inner = self.lock();
            let key = inner.next_node;
            inner.next_node += 1;
            inner.nodes.insert(key, tx);
            key
        };
        MemoryNode {
            network: self.clone(),
            key,
            events: rx,
        }
    }

    /// Whether some endpoint currently holds `identity`.
    pub fn is_claimed(&self, identity: &PeerId) -> bool {
        self.lock().identities.contains_key(identity)
    }

    /// Number of open connection sides across the network.
    pub fn open_links(&self) -> usize {
        self.lock().links.len()
    }
}

/// One process attached to a [`MemoryNetwork`].
///
/// Dropping the node behaves like the process exiting: its endpoints are
/// released and all of its connections close on the remote side.
pub struct MemoryNode {
    network: MemoryNetwork,
    key: NodeKey,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl MemoryNode {
    /// Open an endpoint under `identity`.
    ///
    /// Completes with [`TransportEvent::EndpointOpened`], or
    /// [`TransportEvent::EndpointFailed`] when the identity is held.
    pub fn open(&self, endpoint: EndpointId, identity: &PeerId) {
        let mut inner = self.network.lock();
        if inner.identities.contains_key(identity) {
            tracing::debug!(%identity, "memory: identity already claimed");
            inner.push(
                self.key,
                TransportEvent::EndpointFailed {
                    endpoint,
                    error: TransportError::IdentityTaken(identity.clone()),
                },
            );
            return;
        }
        inner.identities.insert(identity.clone(), endpoint);
        inner.endpoints.insert(
            endpoint,
            EndpointEntry {
                node: self.key,
                identity: identity.clone(),
                links: HashSet::new(),
            },
        );
        inner.push(
            self.key,
            TransportEvent::EndpointOpened {
                endpoint,
                identity: identity.clone(),
            },
        );
    }

    /// Destroy an endpoint, releasing its identity and closing its connections.
    pub fn destroy(&self, endpoint: EndpointId) {
        self.network.lock().destroy_endpoint(endpoint);
    }

    /// Connect from one of our endpoints to the endpoint holding `to`.
    pub fn connect(&self, conn: ConnectionId, from: EndpointId, to: &PeerId) {
        let mut inner = self.network.lock();

        let local_identity = match inner.endpoints.get(&from) {
            Some(entry) if entry.node == self.key => entry.identity.clone(),
            _ => {
                inner.push(
                    self.key,
                    TransportEvent::ConnectionError {
                        conn,
                        error: TransportError::EndpointDestroyed,
                    },
                );
                return;
            }
        };

        let target = inner
            .identities
            .get(to)
            .and_then(|ep| inner.endpoints.get(ep).map(|e| (*ep, e.node)));
        let Some((target_endpoint, target_node)) = target else {
            inner.push(
                self.key,
                TransportEvent::ConnectionError {
                    conn,
                    error: TransportError::UnknownPeer(to.clone()),
                },
            );
            return;
        };

        let remote_conn = ConnectionId::new();
        inner.attach(
            conn,
            Link {
                node: self.key,
                endpoint: from,
                peer: remote_conn,
            },
        );
        inner.attach(
            remote_conn,
            Link {
                node: target_node,
                endpoint: target_endpoint,
                peer: conn,
            },
        );

        inner.push(
            target_node,
            TransportEvent::Incoming {
                endpoint: target_endpoint,
                conn: remote_conn,
                remote: local_identity,
            },
        );
        inner.push(self.key, TransportEvent::ConnectionOpened { conn });
    }

    /// Send bytes over an open connection.
    pub fn send(&self, conn: ConnectionId, data: &[u8]) -> Result<(), TransportError> {
        let inner = self.network.lock();
        let link = inner
            .links
            .get(&conn)
            .filter(|l| l.node == self.key)
            .ok_or(TransportError::NotOpen(conn))?;
        let remote = inner
            .links
            .get(&link.peer)
            .ok_or(TransportError::NotOpen(conn))?;
        if !inner.nodes.contains_key(&remote.node) {
            return Err(TransportError::Shutdown);
        }
        inner.push(
            remote.node,
            TransportEvent::Data {
                conn: link.peer,
                data: data.to_vec(),
            },
        );
        Ok(())
    }

    /// Close a connection. Both sides receive `ConnectionClosed`.
    pub fn close(&self, conn: ConnectionId) {
        self.network.lock().close_link(conn);
    }

    pub fn is_open(&self, conn: ConnectionId) -> bool {
        self.network.lock().links.contains_key(&conn)
    }

    /// Wait for the next event. `None` once the node has shut down.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Next queued event, if any.
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }

    /// Detach from the network, releasing every endpoint this node holds.
    pub fn shutdown(&self) {
        let mut inner = self.network.lock();
        inner.nodes.remove(&self.key);
        let owned: Vec<EndpointId> = inner
            .endpoints
            .iter()
            .filter(|(_, e)| e.node == self.key)
            .map(|(id, _)| *id)
            .collect();
        for endpoint in owned {
            inner.destroy_endpoint(endpoint);
        }
    }
}

impl Drop for MemoryNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}
