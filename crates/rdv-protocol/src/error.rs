/// Errors surfaced by the lobby protocol.
///
/// Most failures never reach the application: claim conflicts, link
/// failures and capacity rejections are expected protocol outcomes and are
/// reported through the observer. The variants here cover what a caller of
/// the application surface can actually get back.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("transport error: {0}")]
    Transport(#[from] rdv_transport::TransportError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("protocol not initialized")]
    NotInitialized,

    #[error("message is empty")]
    EmptyMessage,

    #[error("no active connections")]
    NoActiveConnections,

    #[error("runtime has shut down")]
    ShutDown,
}

impl From<rmp_serde::encode::Error> for LobbyError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        LobbyError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for LobbyError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        LobbyError::Deserialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdv_transport::{PeerId, TransportError};

    #[test]
    fn test_display_config() {
        let err = LobbyError::Config("lobby_size must be at least 2".into());
        assert_eq!(err.to_string(), "invalid config: lobby_size must be at least 2");
    }

    #[test]
    fn test_display_no_active_connections() {
        assert_eq!(
            LobbyError::NoActiveConnections.to_string(),
            "no active connections"
        );
    }

    #[test]
    fn test_from_transport_error() {
        let err: LobbyError = TransportError::UnknownPeer(PeerId::from("ghost")).into();
        assert!(matches!(err, LobbyError::Transport(_)));
        assert_eq!(err.to_string(), "transport error: could not connect to peer ghost");
    }

    #[test]
    fn test_from_decode_error() {
        let err: LobbyError = rmp_serde::from_slice::<u32>(&[0xc1])
            .unwrap_err()
            .into();
        assert!(matches!(err, LobbyError::Deserialization(_)));
    }
}
