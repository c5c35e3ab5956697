use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::LobbyError;
use crate::types::{PeerId, PlayerState, TerrainChanges};

/// Protocol-level envelope, the unit exchanged over every link.
///
/// Serialized as MessagePack. The payload is a closed tagged enum, so a
/// receiver either decodes one of the known kinds or drops the bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Payload,
    /// Identity of the process that created the envelope.
    pub sender: PeerId,
    /// Creation time (Unix milliseconds).
    pub timestamp: u64,
    pub message_id: Option<String>,
}

impl Envelope {
    pub fn new(sender: PeerId, payload: Payload, timestamp: u64) -> Self {
        Self {
            payload,
            sender,
            timestamp,
            message_id: None,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.payload.kind()
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LobbyError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, LobbyError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Envelope payloads, one variant per wire kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Seeker → rendezvous identity: "is there a lobby I can join?"
    JoinDiscovery { peer_id: PeerId },
    /// Coordinator → seeker: connect to my real identity instead.
    Redirect {
        host_id: PeerId,
        current_players: usize,
        total_players: usize,
    },
    LobbyFull { message: String },
    /// Seeker → coordinator, on the direct link.
    JoinHost { peer_id: PeerId },
    Waiting {
        current: usize,
        total: usize,
        message: String,
    },
    /// Coordinator → every member once the lobby fills.
    HostReady {
        host_id: PeerId,
        all_players: Vec<PeerId>,
    },
    ChatMessage {
        messages: Vec<ChatMessage>,
        from: PeerId,
    },
    PlayerState {
        peer_id: PeerId,
        state: PlayerState,
        timestamp: u64,
    },
    TerrainDelta {
        peer_id: PeerId,
        changes: TerrainChanges,
        timestamp: u64,
    },
}

impl Payload {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Payload::JoinDiscovery { .. } => EnvelopeKind::JoinDiscovery,
            Payload::Redirect { .. } => EnvelopeKind::Redirect,
            Payload::LobbyFull { .. } => EnvelopeKind::LobbyFull,
            Payload::JoinHost { .. } => EnvelopeKind::JoinHost,
            Payload::Waiting { .. } => EnvelopeKind::Waiting,
            Payload::HostReady { .. } => EnvelopeKind::HostReady,
            Payload::ChatMessage { .. } => EnvelopeKind::ChatMessage,
            Payload::PlayerState { .. } => EnvelopeKind::PlayerState,
            Payload::TerrainDelta { .. } => EnvelopeKind::TerrainDelta,
        }
    }
}

/// Discriminant of [`Payload`], used for logging and routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    JoinDiscovery,
    Redirect,
    LobbyFull,
    JoinHost,
    Waiting,
    HostReady,
    ChatMessage,
    PlayerState,
    TerrainDelta,
}

impl EnvelopeKind {
    /// Application kinds travel over the relay; the rest are lobby control.
    pub fn is_application(self) -> bool {
        matches!(
            self,
            EnvelopeKind::ChatMessage | EnvelopeKind::PlayerState | EnvelopeKind::TerrainDelta
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::JoinDiscovery => "join-discovery",
            EnvelopeKind::Redirect => "redirect",
            EnvelopeKind::LobbyFull => "lobby-full",
            EnvelopeKind::JoinHost => "join-host",
            EnvelopeKind::Waiting => "waiting",
            EnvelopeKind::HostReady => "host-ready",
            EnvelopeKind::ChatMessage => "chat-message",
            EnvelopeKind::PlayerState => "player-state",
            EnvelopeKind::TerrainDelta => "terrain-delta",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `<peer>_<millis>_<9 random chars>`
    pub id: String,
    pub peer_id: PeerId,
    pub text: String,
    pub timestamp: u64,
}

impl ChatMessage {
    /// Build a message with a fresh id. `text` is stored as given.
    pub fn new(peer_id: PeerId, text: impl Into<String>, timestamp: u64) -> Self {
        let suffix: String = rand::rng()
            .sample_iter(&rand::distr::Alphanumeric)
            .take(9)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self {
            id: format!("{peer_id}_{timestamp}_{suffix}"),
            peer_id,
            text: text.into(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GridCell, Vec3};

    fn peer(s: &str) -> PeerId {
        PeerId::from(s)
    }

    #[test]
    fn test_control_envelope_roundtrip() {
        let env = Envelope::new(
            peer("A"),
            Payload::Redirect {
                host_id: peer("A"),
                current_players: 1,
                total_players: 3,
            },
            1_700_000_000_000,
        );
        let bytes = env.to_bytes().expect("encode");
        let decoded = Envelope::from_bytes(&bytes).expect("decode");
        assert_eq!(decoded, env);
        assert_eq!(decoded.kind(), EnvelopeKind::Redirect);
    }

    #[test]
    fn test_terrain_envelope_roundtrip() {
        let env = Envelope::new(
            peer("B"),
            Payload::TerrainDelta {
                peer_id: peer("B"),
                changes: TerrainChanges {
                    new_planes: vec![GridCell::new(1, 2), GridCell::new(-4, 0)],
                    removed_planes: vec![GridCell::new(9, 9)],
                },
                timestamp: 42,
            },
            42,
        );
        let decoded = Envelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_chat_envelope_keeps_message_id() {
        let msg = ChatMessage::new(peer("B"), "hi", 7);
        let env = Envelope::new(
            peer("B"),
            Payload::ChatMessage {
                messages: vec![msg.clone()],
                from: peer("B"),
            },
            7,
        )
        .with_message_id(msg.id.clone());
        let decoded = Envelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.message_id.as_deref(), Some(msg.id.as_str()));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = Envelope::from_bytes(b"not msgpack at all").unwrap_err();
        assert!(matches!(err, LobbyError::Deserialization(_)));
    }

    #[test]
    fn test_chat_id_shape() {
        let msg = ChatMessage::new(peer("ChainNode-abc"), "hello", 1234);
        let parts: Vec<&str> = msg.id.rsplitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], "ChainNode-abc");
        assert_eq!(parts[1], "1234");
        assert_eq!(parts[0].len(), 9);
        assert!(parts[0]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_application_kinds() {
        assert!(EnvelopeKind::ChatMessage.is_application());
        assert!(EnvelopeKind::PlayerState.is_application());
        assert!(EnvelopeKind::TerrainDelta.is_application());
        assert!(!EnvelopeKind::JoinHost.is_application());
        assert!(!EnvelopeKind::HostReady.is_application());
    }

    #[test]
    fn test_kind_names_match_wire_table() {
        let state = Payload::PlayerState {
            peer_id: peer("C"),
            state: PlayerState {
                position: Vec3::default(),
                rotation: Vec3::default(),
                surge_active: false,
            },
            timestamp: 0,
        };
        assert_eq!(state.kind().as_str(), "player-state");
        assert_eq!(EnvelopeKind::JoinDiscovery.to_string(), "join-discovery");
    }
}
