/// LobbyAuthority: coordinator-side membership engine.
///
/// Runs only while this process holds (or recently held) the rendezvous
/// identity. Pure state machine: receives join requests and link
/// closures, returns `Vec<AuthorityAction>` for the runtime to execute.
///
/// Responsibilities:
/// - Answer discovery probes with a redirect or lobby-full
/// - Admit members on the direct link, enforcing capacity and uniqueness
/// - Broadcast host-ready and release the claim on the full transition
/// - Drop members whose link closed, reopening the lobby below capacity
use std::collections::HashMap;

use rdv_transport::ConnectionId;

use crate::envelope::Payload;
use crate::lobby::session::{AdmitError, LobbySession};
use crate::lobby::types::{AuthorityAction, LobbyEvent};
use crate::types::PeerId;

pub struct LobbyAuthority {
    session: LobbySession,
    /// Live link for every non-host member. Owned here only.
    connections: HashMap<PeerId, ConnectionId>,
}

impl LobbyAuthority {
    pub fn new(host: PeerId, capacity: usize) -> Self {
        Self {
            session: LobbySession::new(host, capacity),
            connections: HashMap::new(),
        }
    }

    pub fn session(&self) -> &LobbySession {
        &self.session
    }

    pub fn is_full(&self) -> bool {
        self.session.is_full()
    }

    /// The member whose link is `conn`, if any.
    pub fn member_of(&self, conn: ConnectionId) -> Option<&PeerId> {
        self.connections
            .iter()
            .find(|(_, c)| **c == conn)
            .map(|(peer, _)| peer)
    }

    /// Member links in join order.
    pub fn member_links(&self) -> Vec<(PeerId, ConnectionId)> {
        self.session
            .guests()
            .iter()
            .filter_map(|peer| self.connections.get(peer).map(|c| (peer.clone(), *c)))
            .collect()
    }

    /// Forget every member link, returning them for closing.
    pub fn drain_links(&mut self) -> Vec<ConnectionId> {
        let links = self.member_links().into_iter().map(|(_, c)| c).collect();
        self.connections.clear();
        links
    }

    // ── Discovery (rendezvous identity) ──────────────────────────────────

    /// A seeker sent join-discovery on a probe link.
    pub fn handle_discovery(&self, conn: ConnectionId, seeker: PeerId) -> Vec<AuthorityAction> {
        if self.session.is_full() {
            return vec![
                AuthorityAction::Event(LobbyEvent::DiscoveryRejected { seeker }),
                AuthorityAction::Reply {
                    conn,
                    payload: Payload::LobbyFull {
                        message: "Lobby is full, try again later".into(),
                    },
                },
                AuthorityAction::Close { conn },
            ];
        }

        let current = self.session.len();
        let total = self.session.capacity();
        vec![
            AuthorityAction::Event(LobbyEvent::Redirected {
                seeker,
                current,
                total,
            }),
            AuthorityAction::Reply {
                conn,
                payload: Payload::Redirect {
                    host_id: self.session.host().clone(),
                    current_players: current,
                    total_players: total,
                },
            },
            AuthorityAction::Close { conn },
        ]
    }

    // ── Join (direct link) ───────────────────────────────────────────────

    /// A seeker sent join-host on a direct link.
    pub fn handle_join(&mut self, conn: ConnectionId, joiner: PeerId) -> Vec<AuthorityAction> {
        if self.session.is_full() {
            return vec![
                AuthorityAction::Event(LobbyEvent::JoinRejected { peer: joiner }),
                AuthorityAction::Reply {
                    conn,
                    payload: Payload::LobbyFull {
                        message: "Lobby is full, try starting your own lobby".into(),
                    },
                },
                AuthorityAction::Close { conn },
            ];
        }

        match self.session.admit(joiner.clone()) {
            Err(AdmitError::Duplicate) => {
                let remaining = self.session.remaining();
                vec![
                    AuthorityAction::Event(LobbyEvent::DuplicateJoin { peer: joiner }),
                    AuthorityAction::Reply {
                        conn,
                        payload: Payload::Waiting {
                            current: self.session.len(),
                            total: self.session.capacity(),
                            message: format!(
                                "Already connected - waiting for {remaining} more {}",
                                players(remaining)
                            ),
                        },
                    },
                ]
            }
            // Unreachable after the is_full check above, answered the same way.
            Err(AdmitError::Full) => vec![
                AuthorityAction::Reply {
                    conn,
                    payload: Payload::LobbyFull {
                        message: "Lobby is full, try starting your own lobby".into(),
                    },
                },
                AuthorityAction::Close { conn },
            ],
            Ok(now_full) => {
                self.connections.insert(joiner.clone(), conn);
                let mut actions = vec![AuthorityAction::Event(LobbyEvent::MemberJoined {
                    peer: joiner,
                    current: self.session.len(),
                    total: self.session.capacity(),
                })];

                if now_full {
                    let to = self.member_links().into_iter().map(|(_, c)| c).collect();
                    actions.push(AuthorityAction::Event(LobbyEvent::LobbyFilled {
                        members: self.session.members().to_vec(),
                    }));
                    actions.push(AuthorityAction::Broadcast {
                        to,
                        payload: Payload::HostReady {
                            host_id: self.session.host().clone(),
                            all_players: self.session.members().to_vec(),
                        },
                    });
                    actions.push(AuthorityAction::ReleaseClaim);
                } else {
                    let remaining = self.session.remaining();
                    actions.push(AuthorityAction::Reply {
                        conn,
                        payload: Payload::Waiting {
                            current: self.session.len(),
                            total: self.session.capacity(),
                            message: format!("Waiting for {remaining} more {}", players(remaining)),
                        },
                    });
                }
                actions
            }
        }
    }

    // ── Departure ────────────────────────────────────────────────────────

    /// A direct link closed or failed. No-op unless it belonged to a member.
    pub fn handle_closed(&mut self, conn: ConnectionId) -> Vec<AuthorityAction> {
        let Some(peer) = self.member_of(conn).cloned() else {
            return vec![];
        };
        let was_full = self.session.is_full();
        self.connections.remove(&peer);
        self.session.remove(&peer);

        vec![AuthorityAction::Event(LobbyEvent::MemberLeft {
            peer,
            current: self.session.len(),
            total: self.session.capacity(),
            reopened: was_full && !self.session.is_full(),
        })]
    }
}

fn players(n: usize) -> &'static str {
    if n == 1 {
        "player"
    } else {
        "players"
    }
}
