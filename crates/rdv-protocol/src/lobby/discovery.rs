/// Seeker-side discovery: probe the rendezvous identity, follow the
/// redirect to the coordinator's real identity, and join on the direct link.
///
/// The rendezvous identity is bootstrap-only. Every probe carries exactly
/// one request and one reply; application traffic only ever uses the
/// direct link.
use std::time::Duration;

use rdv_transport::{ConnectionId, TransportError};

use crate::envelope::Payload;
use crate::lobby::election::{RetryDecision, RetryState};
use crate::lobby::types::DiscoveryAction;
use crate::lobby::view::ClientView;
use crate::runtime::Severity;
use crate::types::PeerId;

/// Delays applied after the various discovery outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub retry_base: Duration,
    pub retry_step: Duration,
    pub cooldown: Duration,
    /// After the probe link itself fails.
    pub failure_delay: Duration,
    /// After lobby-full on the direct link.
    pub rejected_delay: Duration,
}

impl BackoffPolicy {
    /// Delay before the next election after the `attempt`-th rejection.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base + self.retry_step * attempt
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            retry_base: Duration::from_secs(2),
            retry_step: Duration::from_secs(3),
            cooldown: Duration::from_secs(30),
            failure_delay: Duration::from_secs(3),
            rejected_delay: Duration::from_secs(1),
        }
    }
}

/// Where the seeker currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekerPhase {
    Idle,
    /// Probe open (or opening) towards the rendezvous identity.
    Probing { probe: ConnectionId },
    /// Direct link to the coordinator, join-host not yet answered.
    Joining { host: PeerId, link: ConnectionId },
    /// Admitted; waiting for the lobby to fill.
    Waiting {
        host: PeerId,
        link: ConnectionId,
        current: usize,
        total: usize,
    },
}

pub struct DiscoveryClient {
    local_id: PeerId,
    rendezvous: PeerId,
    phase: SeekerPhase,
    retry: RetryState,
    policy: BackoffPolicy,
}

impl DiscoveryClient {
    pub fn new(local_id: PeerId, rendezvous: PeerId, max_retries: u32, policy: BackoffPolicy) -> Self {
        Self {
            local_id,
            rendezvous,
            phase: SeekerPhase::Idle,
            retry: RetryState::new(max_retries),
            policy,
        }
    }

    pub fn phase(&self) -> &SeekerPhase {
        &self.phase
    }

    pub fn retry(&self) -> &RetryState {
        &self.retry
    }

    pub fn reset_retry(&mut self) {
        self.retry.reset();
    }

    /// A probe or a direct link is in flight.
    pub fn is_busy(&self) -> bool {
        self.phase != SeekerPhase::Idle
    }

    pub fn probe(&self) -> Option<ConnectionId> {
        match self.phase {
            SeekerPhase::Probing { probe } => Some(probe),
            _ => None,
        }
    }

    /// Direct link to the coordinator while joining or waiting.
    pub fn host_link(&self) -> Option<ConnectionId> {
        match self.phase {
            SeekerPhase::Joining { link, .. } | SeekerPhase::Waiting { link, .. } => Some(link),
            _ => None,
        }
    }

    /// Coordinator we are joining or waiting on.
    pub fn host(&self) -> Option<&PeerId> {
        match &self.phase {
            SeekerPhase::Joining { host, .. } | SeekerPhase::Waiting { host, .. } => Some(host),
            _ => None,
        }
    }

    /// Abandon whatever is in flight, returning the links to close.
    pub fn abort(&mut self) -> Vec<ConnectionId> {
        let conn = match std::mem::replace(&mut self.phase, SeekerPhase::Idle) {
            SeekerPhase::Idle => None,
            SeekerPhase::Probing { probe } => Some(probe),
            SeekerPhase::Joining { link, .. } | SeekerPhase::Waiting { link, .. } => Some(link),
        };
        conn.into_iter().collect()
    }

    // ── Probe ────────────────────────────────────────────────────────────

    /// Open a probe to the rendezvous identity.
    pub fn discover(&mut self) -> Vec<DiscoveryAction> {
        let mut actions: Vec<DiscoveryAction> = self
            .abort()
            .into_iter()
            .map(|conn| DiscoveryAction::Close { conn })
            .collect();

        let probe = ConnectionId::new();
        self.phase = SeekerPhase::Probing { probe };
        actions.push(DiscoveryAction::Status("Discovering lobby...".into()));
        actions.push(DiscoveryAction::Connect {
            conn: probe,
            to: self.rendezvous.clone(),
        });
        actions
    }

    pub fn on_probe_opened(&self, conn: ConnectionId) -> Vec<DiscoveryAction> {
        if self.probe() != Some(conn) {
            return vec![];
        }
        vec![
            DiscoveryAction::Send {
                conn,
                payload: Payload::JoinDiscovery {
                    peer_id: self.local_id.clone(),
                },
            },
            DiscoveryAction::Log(
                Severity::Info,
                "[Discovery] Sent discovery request to base".into(),
            ),
        ]
    }

    /// The single reply on a probe.
    pub fn on_probe_reply(&mut self, conn: ConnectionId, payload: &Payload) -> Vec<DiscoveryAction> {
        if self.probe() != Some(conn) {
            return vec![];
        }

        match payload {
            Payload::Redirect {
                host_id,
                current_players,
                total_players,
            } => {
                self.phase = SeekerPhase::Idle;
                let mut actions = vec![
                    DiscoveryAction::Close { conn },
                    DiscoveryAction::Log(
                        Severity::Info,
                        format!(
                            "[Discovery] Redirected to host: {host_id} ({current_players}/{total_players})"
                        ),
                    ),
                ];
                actions.extend(self.connect_to_host(host_id.clone()));
                actions
            }
            Payload::LobbyFull { .. } => {
                self.phase = SeekerPhase::Idle;
                let mut actions = vec![DiscoveryAction::Close { conn }];
                match self.retry.record_rejection() {
                    RetryDecision::Backoff { attempt } => {
                        actions.push(DiscoveryAction::Log(
                            Severity::Warn,
                            format!(
                                "[Discovery] Lobby is full, attempting to start new lobby (attempt {attempt}/{})...",
                                self.retry.max()
                            ),
                        ));
                        actions.push(DiscoveryAction::Status(
                            "Lobby full, starting new lobby...".into(),
                        ));
                        actions.push(DiscoveryAction::ScheduleElection {
                            after: self.policy.backoff(attempt),
                        });
                    }
                    RetryDecision::Cooldown => {
                        actions.push(DiscoveryAction::Log(
                            Severity::Error,
                            "[Discovery] Too many retry attempts, waiting longer before trying again..."
                                .into(),
                        ));
                        actions.push(DiscoveryAction::Status("All lobbies full, waiting...".into()));
                        actions.push(DiscoveryAction::ScheduleElection {
                            after: self.policy.cooldown,
                        });
                    }
                }
                actions
            }
            other => vec![DiscoveryAction::Log(
                Severity::Warn,
                format!("[Discovery] Unexpected {} on probe", other.kind()),
            )],
        }
    }

    pub fn on_probe_failed(&mut self, conn: ConnectionId, error: &TransportError) -> Vec<DiscoveryAction> {
        if self.probe() != Some(conn) {
            return vec![];
        }
        self.phase = SeekerPhase::Idle;
        vec![
            DiscoveryAction::Status("Failed to discover lobby".into()),
            DiscoveryAction::Log(Severity::Error, format!("[Discovery] Error: {error}")),
            DiscoveryAction::ScheduleElection {
                after: self.policy.failure_delay,
            },
        ]
    }

    /// The probe closed. Only meaningful if no reply arrived first.
    pub fn on_probe_closed(&mut self, conn: ConnectionId) -> Vec<DiscoveryAction> {
        if self.probe() != Some(conn) {
            return vec![];
        }
        self.phase = SeekerPhase::Idle;
        vec![
            DiscoveryAction::Log(
                Severity::Warn,
                "[Discovery] Probe closed before a reply".into(),
            ),
            DiscoveryAction::ScheduleElection {
                after: self.policy.failure_delay,
            },
        ]
    }

    // ── Direct link ──────────────────────────────────────────────────────

    /// Open the direct link to the coordinator's real identity.
    pub fn connect_to_host(&mut self, host: PeerId) -> Vec<DiscoveryAction> {
        let link = ConnectionId::new();
        self.phase = SeekerPhase::Joining {
            host: host.clone(),
            link,
        };
        vec![
            DiscoveryAction::Status("Connecting to host...".into()),
            DiscoveryAction::Connect { conn: link, to: host },
        ]
    }

    pub fn on_host_opened(&self, conn: ConnectionId) -> Vec<DiscoveryAction> {
        let (Some(link), Some(host)) = (self.host_link(), self.host()) else {
            return vec![];
        };
        if link != conn {
            return vec![];
        }
        vec![
            DiscoveryAction::Send {
                conn,
                payload: Payload::JoinHost {
                    peer_id: self.local_id.clone(),
                },
            },
            DiscoveryAction::Log(Severity::Info, format!("[Client] Connected to host: {host}")),
            DiscoveryAction::StartJoinTimer,
        ]
    }

    /// A lobby-control reply on the direct link.
    pub fn on_host_reply(&mut self, conn: ConnectionId, payload: &Payload) -> Vec<DiscoveryAction> {
        if self.host_link() != Some(conn) {
            return vec![];
        }

        match payload {
            Payload::HostReady {
                host_id,
                all_players,
            } => {
                self.phase = SeekerPhase::Idle;
                self.retry.reset();
                let view =
                    ClientView::from_host_ready(&self.local_id, host_id.clone(), all_players, conn);
                let others: Vec<&str> = view.other_members().iter().map(PeerId::as_str).collect();
                vec![
                    DiscoveryAction::Log(
                        Severity::Info,
                        format!(
                            "[Client] Lobby ready with host {host_id}, {} players total, others: [{}]",
                            all_players.len(),
                            others.join(", ")
                        ),
                    ),
                    DiscoveryAction::Status(format!(
                        "Connected to host in {}-player lobby!",
                        all_players.len()
                    )),
                    DiscoveryAction::Paired(view),
                ]
            }
            Payload::Waiting {
                current,
                total,
                message,
            } => {
                let host = self.host().cloned().unwrap_or_else(|| self.rendezvous.clone());
                self.phase = SeekerPhase::Waiting {
                    host,
                    link: conn,
                    current: *current,
                    total: *total,
                };
                vec![
                    DiscoveryAction::Log(
                        Severity::Info,
                        format!("[Client] Waiting for more players... ({current}/{total}) - {message}"),
                    ),
                    DiscoveryAction::Status(format!("Waiting in queue... ({current}/{total})")),
                ]
            }
            Payload::LobbyFull { .. } => {
                self.phase = SeekerPhase::Idle;
                vec![
                    DiscoveryAction::Log(
                        Severity::Warn,
                        "[Client] Host lobby is full, becoming host of new lobby...".into(),
                    ),
                    DiscoveryAction::Status("Lobby full, starting new lobby...".into()),
                    DiscoveryAction::Close { conn },
                    DiscoveryAction::ScheduleElection {
                        after: self.policy.rejected_delay,
                    },
                ]
            }
            _ => vec![],
        }
    }

    pub fn on_host_failed(&self, conn: ConnectionId, error: &TransportError) -> Vec<DiscoveryAction> {
        if self.host_link() != Some(conn) {
            return vec![];
        }
        vec![
            DiscoveryAction::Status("Failed to connect to host".into()),
            DiscoveryAction::Log(
                Severity::Error,
                format!("[Client] Host connection error: {error}"),
            ),
        ]
    }
}
