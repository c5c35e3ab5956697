use std::collections::HashMap;

use proptest::prelude::*;
use rdv_protocol::relay;
use rdv_protocol::{
    AuthorityAction, ChatMessage, ConnectionId, Envelope, GridCell, LobbyAuthority, LobbySession,
    Payload, PeerId, PlayerState, TerrainChanges, Vec3,
};

#[derive(Debug, Clone)]
enum Op {
    Join(u8),
    Leave(u8),
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            3 => (0..8u8).prop_map(Op::Join),
            1 => (0..8u8).prop_map(Op::Leave),
        ],
        0..60,
    )
}

fn peer(i: u8) -> PeerId {
    PeerId::from(format!("P{i}"))
}

proptest! {
    /// `len <= capacity` for every reachable session, and a join against a
    /// full session never changes it.
    #[test]
    fn session_never_exceeds_capacity(capacity in 2..6usize, ops in arb_ops()) {
        let mut session = LobbySession::new(PeerId::from("host"), capacity);
        for op in ops {
            match op {
                Op::Join(i) => {
                    let before = session.members().to_vec();
                    let was_full = session.is_full();
                    let result = session.admit(peer(i));
                    if was_full {
                        prop_assert!(result.is_err());
                        prop_assert_eq!(session.members(), &before[..]);
                    }
                }
                Op::Leave(i) => {
                    session.remove(&peer(i));
                }
            }
            prop_assert!(session.len() <= capacity);
            prop_assert_eq!(session.is_full(), session.len() == capacity);
            prop_assert_eq!(session.host().as_str(), "host");
        }
    }

    /// A second join with the same identity never grows the session.
    #[test]
    fn duplicate_join_is_a_no_op(capacity in 3..6usize, i in 0..8u8) {
        let mut session = LobbySession::new(PeerId::from("host"), capacity);
        session.admit(peer(i)).unwrap();
        let len = session.len();
        prop_assert!(session.admit(peer(i)).is_err());
        prop_assert_eq!(session.len(), len);
    }

    /// The claim is released exactly on the step that fills the lobby.
    #[test]
    fn claim_released_only_on_full_transition(capacity in 2..5usize, ops in arb_ops()) {
        let mut authority = LobbyAuthority::new(PeerId::from("host"), capacity);
        let mut links: HashMap<u8, ConnectionId> = HashMap::new();

        for op in ops {
            let was_full = authority.is_full();
            let actions = match op {
                Op::Join(i) => {
                    let conn = ConnectionId::new();
                    let actions = authority.handle_join(conn, peer(i));
                    if authority.session().contains(&peer(i)) {
                        links.entry(i).or_insert(conn);
                    }
                    actions
                }
                Op::Leave(i) => match links.remove(&i) {
                    Some(conn) => authority.handle_closed(conn),
                    None => Vec::new(),
                },
            };
            let released = actions
                .iter()
                .any(|a| matches!(a, AuthorityAction::ReleaseClaim));
            prop_assert_eq!(released, !was_full && authority.is_full());
            prop_assert!(authority.session().len() <= capacity);
        }
    }

    /// Relay never targets the excluded sender and never reports a closed
    /// link as delivered.
    #[test]
    fn relay_excludes_sender(
        members in prop::collection::btree_set(0..10u8, 0..8),
        exclude in 0..10u8,
        closed in prop::collection::btree_set(0..10u8, 0..4),
    ) {
        let conns: HashMap<u8, ConnectionId> =
            members.iter().map(|i| (*i, ConnectionId::new())).collect();
        let closed_conns: Vec<ConnectionId> =
            closed.iter().filter_map(|i| conns.get(i).copied()).collect();

        let plan = relay::relay(
            members.iter().map(|i| (peer(*i), conns[i])),
            Some(&peer(exclude)),
            |c| !closed_conns.contains(&c),
        );

        prop_assert!(plan.deliveries.iter().all(|d| d.peer != peer(exclude)));
        prop_assert!(plan.deliveries.iter().all(|d| !closed_conns.contains(&d.conn)));
        let expected = members.iter().filter(|i| **i != exclude).count();
        prop_assert_eq!(plan.deliveries.len() + plan.skipped.len(), expected);
    }

    /// Chat envelopes survive a MessagePack roundtrip.
    #[test]
    fn roundtrip_chat_envelope(text in ".{0,200}", ts in any::<u64>()) {
        let sender = PeerId::from("ChainNode-abcd1234");
        let message = ChatMessage::new(sender.clone(), text, ts);
        let env = Envelope::new(
            sender.clone(),
            Payload::ChatMessage { messages: vec![message.clone()], from: sender },
            ts,
        )
        .with_message_id(message.id);

        let bytes = env.to_bytes().expect("serialize");
        let decoded = Envelope::from_bytes(&bytes).expect("deserialize");
        prop_assert_eq!(&env, &decoded);
    }

    /// State-sync envelopes survive a MessagePack roundtrip.
    #[test]
    fn roundtrip_state_envelopes(
        x in -1000.0f32..1000.0,
        z in -1000.0f32..1000.0,
        surge in any::<bool>(),
        cells in prop::collection::vec((-50..50i32, -50..50i32), 0..60),
    ) {
        let sender = PeerId::from("ChainNode-abcd1234");
        let state = Envelope::new(
            sender.clone(),
            Payload::PlayerState {
                peer_id: sender.clone(),
                state: PlayerState {
                    position: Vec3::new(x, 1.0, z),
                    rotation: Vec3::new(0.0, z, 0.0),
                    surge_active: surge,
                },
                timestamp: 7,
            },
            7,
        );
        let planes: Vec<GridCell> = cells.iter().map(|(gx, gz)| GridCell::new(*gx, *gz)).collect();
        let terrain = Envelope::new(
            sender.clone(),
            Payload::TerrainDelta {
                peer_id: sender,
                changes: TerrainChanges { new_planes: planes.clone(), removed_planes: planes },
                timestamp: 7,
            },
            7,
        );

        for env in [state, terrain] {
            let decoded = Envelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
            prop_assert_eq!(&env, &decoded);
        }
    }
}
