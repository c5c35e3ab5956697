use crate::{ConnectionId, EndpointId, PeerId, TransportError};

/// Events delivered by the transport to the owning process.
///
/// Endpoint-level events mirror a peer object (`opened`, `error`,
/// `connection`); connection-level events mirror a data channel
/// (`open`, `data`, `close`, `error`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An endpoint is now registered under `identity`.
    EndpointOpened {
        endpoint: EndpointId,
        identity: PeerId,
    },
    /// An endpoint could not be opened, or failed after opening.
    EndpointFailed {
        endpoint: EndpointId,
        error: TransportError,
    },
    /// A remote peer connected to one of our endpoints.
    Incoming {
        endpoint: EndpointId,
        conn: ConnectionId,
        remote: PeerId,
    },
    /// An outbound connection is ready for sending.
    ConnectionOpened { conn: ConnectionId },
    /// Bytes arrived on a connection.
    Data { conn: ConnectionId, data: Vec<u8> },
    /// The connection was closed (by either side).
    ConnectionClosed { conn: ConnectionId },
    /// The connection failed.
    ConnectionError {
        conn: ConnectionId,
        error: TransportError,
    },
}
