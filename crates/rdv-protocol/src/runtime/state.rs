//! RuntimeState: all protocol state in one struct, pure logic only.
//!
//! Each `handle_*` method returns `Vec<RuntimeEffect>`; nothing here does
//! I/O or reads the wall clock directly. The loop feeds it transport
//! events, timer expirations and application commands, then hands the
//! effects to the executor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rdv_transport::{ConnectionId, EndpointId, TransportError, TransportEvent};

use crate::envelope::{ChatMessage, Envelope, Payload};
use crate::error::LobbyError;
use crate::lobby::{
    AuthorityAction, ClaimOutcome, ClientView, DiscoveryAction, DiscoveryClient, ElectionUnit,
    LobbyAuthority, LobbyEvent, SeekerPhase,
};
use crate::relay::{self, RelayPlan};
use crate::supervisor::{self, LinkHealth, SweepAction, SweepInput};
use crate::sync::{SyncKind, Throttle};
use crate::types::{PeerId, PlayerState, TerrainChanges, MAX_TERRAIN_CHANGES};

use super::effect::RuntimeEffect;
use super::observer::{LogEntry, Severity};
use super::timer::{Clock, TimerKind};
use super::{MembershipSnapshot, ProtocolEvent, Role, RuntimeCommand, RuntimeConfig};

/// What a connection is for. Decides how its events are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkKind {
    /// Outbound probe to the rendezvous identity.
    Probe,
    /// Outbound direct link to a coordinator.
    HostLink,
    /// Inbound probe on our rendezvous claim.
    Discovery,
    /// Inbound link on our own identity.
    Direct,
}

#[derive(Debug, Clone)]
struct Link {
    kind: LinkKind,
    remote: PeerId,
    open: bool,
}

pub struct RuntimeState {
    local_id: PeerId,
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
    /// Endpoint under our own identity.
    own_endpoint: EndpointId,
    initialized: bool,
    /// Lost a claim and have not yet joined anything.
    seeking: bool,

    election: ElectionUnit,
    discovery: DiscoveryClient,
    authority: Option<LobbyAuthority>,
    view: Option<ClientView>,
    throttle: Throttle,

    links: HashMap<ConnectionId, Link>,
    /// Timers we believe are pending.
    armed: HashSet<TimerKind>,
    status: String,
}

impl RuntimeState {
    pub fn new(local_id: PeerId, config: RuntimeConfig, clock: Arc<dyn Clock>) -> Self {
        let election = ElectionUnit::new(config.rendezvous_id.clone());
        let discovery = DiscoveryClient::new(
            local_id.clone(),
            config.rendezvous_id.clone(),
            config.max_retries,
            config.backoff_policy(),
        );
        let throttle = Throttle::new(config.state_sync_interval, config.terrain_sync_interval);
        Self {
            local_id,
            config,
            clock,
            own_endpoint: EndpointId::new(),
            initialized: false,
            seeking: false,
            election,
            discovery,
            authority: None,
            view: None,
            throttle,
            links: HashMap::new(),
            armed: HashSet::new(),
            status: String::new(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Last status line reported to the observer.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn authority(&self) -> Option<&LobbyAuthority> {
        self.authority.as_ref()
    }

    pub fn view(&self) -> Option<&ClientView> {
        self.view.as_ref()
    }

    pub fn role(&self) -> Role {
        if !self.initialized {
            return Role::Idle;
        }
        if self.authority.is_some() {
            return Role::Coordinator;
        }
        if self.view.is_some() {
            return Role::Member;
        }
        match self.discovery.phase() {
            SeekerPhase::Waiting { .. } => Role::Waiting,
            SeekerPhase::Joining { .. } => Role::Joining,
            SeekerPhase::Probing { .. } => Role::Seeker,
            SeekerPhase::Idle if self.election.is_pending() => Role::Claiming,
            SeekerPhase::Idle if self.seeking => Role::Seeker,
            SeekerPhase::Idle => Role::Idle,
        }
    }

    /// Group members other than this process.
    pub fn group_member_ids(&self) -> Vec<PeerId> {
        if let Some(auth) = &self.authority {
            return auth.session().guests().to_vec();
        }
        if let Some(view) = &self.view {
            return view.group_member_ids();
        }
        Vec::new()
    }

    pub fn is_group_complete(&self) -> bool {
        if let Some(auth) = &self.authority {
            return auth.is_full();
        }
        self.view.as_ref().is_some_and(ClientView::is_paired)
    }

    pub fn snapshot(&self) -> MembershipSnapshot {
        let members = self.group_member_ids();
        let current = match (&self.authority, &self.view, self.discovery.phase()) {
            (Some(auth), _, _) => auth.session().len(),
            (None, Some(_), _) => members.len() + 1,
            (None, None, SeekerPhase::Waiting { current, .. }) => *current,
            _ => 0,
        };
        MembershipSnapshot {
            role: self.role(),
            complete: self.is_group_complete(),
            members,
            current,
            total: self.config.lobby_size,
        }
    }

    // ── Startup & shutdown ───────────────────────────────────────────

    /// Open our own identity and start the liveness sweep.
    pub fn start(&mut self) -> Vec<RuntimeEffect> {
        tracing::info!(local_id = %self.local_id, "starting lobby runtime");
        vec![
            RuntimeEffect::OpenEndpoint {
                endpoint: self.own_endpoint,
                identity: self.local_id.clone(),
            },
            self.schedule(TimerKind::Sweep, self.config.sweep_interval),
        ]
    }

    /// Release everything this process holds. No re-election follows.
    pub fn shutdown(&mut self) -> Vec<RuntimeEffect> {
        let mut effects = self.teardown();
        effects.push(RuntimeEffect::CancelTimer(TimerKind::Sweep));
        self.armed.clear();
        effects.push(RuntimeEffect::DestroyEndpoint(self.own_endpoint));
        self.initialized = false;
        effects
    }

    // ── Transport events ─────────────────────────────────────────────

    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Vec<RuntimeEffect> {
        match event {
            TransportEvent::EndpointOpened { endpoint, identity } => {
                self.handle_endpoint_opened(endpoint, identity)
            }
            TransportEvent::EndpointFailed { endpoint, error } => {
                self.handle_endpoint_failed(endpoint, error)
            }
            TransportEvent::Incoming {
                endpoint,
                conn,
                remote,
            } => self.handle_incoming(endpoint, conn, remote),
            TransportEvent::ConnectionOpened { conn } => self.handle_connection_opened(conn),
            TransportEvent::Data { conn, data } => self.handle_data(conn, &data),
            TransportEvent::ConnectionClosed { conn } => self.handle_connection_closed(conn),
            TransportEvent::ConnectionError { conn, error } => {
                self.handle_connection_error(conn, error)
            }
        }
    }

    fn handle_endpoint_opened(&mut self, endpoint: EndpointId, identity: PeerId) -> Vec<RuntimeEffect> {
        if endpoint == self.own_endpoint {
            if self.initialized {
                return vec![];
            }
            self.initialized = true;
            let mut effects = vec![
                self.set_status(format!("Connected as {}", self.local_id)),
                self.log(Severity::Info, format!("[Peer] Initialized: {}", self.local_id)),
                self.membership_changed(),
            ];
            effects.extend(self.attempt_election());
            return effects;
        }

        match self.election.on_opened(endpoint) {
            ClaimOutcome::Won => self.become_coordinator(),
            ClaimOutcome::Stale => {
                tracing::debug!(%identity, "releasing stale claim endpoint");
                vec![RuntimeEffect::DestroyEndpoint(endpoint)]
            }
        }
    }

    fn handle_endpoint_failed(&mut self, endpoint: EndpointId, error: TransportError) -> Vec<RuntimeEffect> {
        if endpoint == self.own_endpoint {
            return vec![
                self.set_status(format!("Peer error: {error}")),
                self.log(Severity::Error, format!("[Peer] Error: {error}")),
            ];
        }

        if !self.election.owns(endpoint) {
            tracing::debug!(?endpoint, "failure on stale claim endpoint: {error}");
            return vec![];
        }
        let held = self.election.holds_claim();
        self.election.on_failed(endpoint);

        if held {
            return vec![
                RuntimeEffect::DestroyEndpoint(endpoint),
                self.log(
                    Severity::Warn,
                    format!("[Base] Rendezvous endpoint failed: {error}"),
                ),
            ];
        }

        self.seeking = true;
        vec![
            RuntimeEffect::DestroyEndpoint(endpoint),
            self.log(
                Severity::Warn,
                format!(
                    "[Base] Rendezvous identity already taken ({error}), checking if lobby is available..."
                ),
            ),
            self.schedule(TimerKind::Discovery, self.config.discovery_delay),
            self.membership_changed(),
        ]
    }

    fn handle_incoming(
        &mut self,
        endpoint: EndpointId,
        conn: ConnectionId,
        remote: PeerId,
    ) -> Vec<RuntimeEffect> {
        if endpoint == self.own_endpoint {
            self.links.insert(
                conn,
                Link {
                    kind: LinkKind::Direct,
                    remote: remote.clone(),
                    open: true,
                },
            );
            return vec![self.log(
                Severity::Info,
                format!("[Conn] Incoming connection from {remote}"),
            )];
        }

        if self.election.owns(endpoint) && self.election.holds_claim() {
            tracing::debug!(%remote, %conn, "discovery probe on rendezvous identity");
            self.links.insert(
                conn,
                Link {
                    kind: LinkKind::Discovery,
                    remote,
                    open: true,
                },
            );
            return vec![];
        }

        tracing::debug!(%remote, %conn, "incoming on stale endpoint, closing");
        vec![RuntimeEffect::Close(conn)]
    }

    fn handle_connection_opened(&mut self, conn: ConnectionId) -> Vec<RuntimeEffect> {
        let Some(link) = self.links.get_mut(&conn) else {
            return vec![];
        };
        link.open = true;
        let actions = match link.kind {
            LinkKind::Probe => self.discovery.on_probe_opened(conn),
            LinkKind::HostLink => self.discovery.on_host_opened(conn),
            LinkKind::Discovery | LinkKind::Direct => return vec![],
        };
        self.discovery_effects(actions)
    }

    fn handle_data(&mut self, conn: ConnectionId, data: &[u8]) -> Vec<RuntimeEffect> {
        let Some(link) = self.links.get(&conn) else {
            tracing::debug!(%conn, "data on unknown connection");
            return vec![];
        };
        let (kind, remote) = (link.kind, link.remote.clone());

        let envelope = match Envelope::from_bytes(data) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(%remote, "bad envelope: {e}");
                return vec![self.log(
                    Severity::Warn,
                    format!("[Conn] Dropped malformed envelope from {remote}"),
                )];
            }
        };

        tracing::debug!(
            local_id = %self.local_id,
            kind = %envelope.kind(),
            from = %remote,
            role = self.role().as_str(),
            "received envelope"
        );
        self.dispatch(conn, kind, &envelope)
    }

    /// Route a decoded envelope by kind and by the link it arrived on.
    fn dispatch(&mut self, conn: ConnectionId, link: LinkKind, envelope: &Envelope) -> Vec<RuntimeEffect> {
        match (&envelope.payload, link) {
            (Payload::JoinDiscovery { peer_id }, LinkKind::Discovery) => {
                let Some(auth) = self.authority.as_ref() else {
                    return vec![RuntimeEffect::Close(conn)];
                };
                let actions = auth.handle_discovery(conn, peer_id.clone());
                self.authority_effects(actions)
            }

            (Payload::JoinHost { peer_id }, LinkKind::Direct) => match self.authority.as_mut() {
                Some(auth) => {
                    let actions = auth.handle_join(conn, peer_id.clone());
                    self.authority_effects(actions)
                }
                None => {
                    self.links.remove(&conn);
                    vec![
                        self.log(
                            Severity::Warn,
                            format!("[Conn] join-host from {peer_id} but not hosting, rejecting"),
                        ),
                        self.send(
                            conn,
                            Payload::LobbyFull {
                                message: "Not hosting a lobby".into(),
                            },
                        ),
                        RuntimeEffect::Close(conn),
                    ]
                }
            },

            (Payload::Redirect { .. } | Payload::LobbyFull { .. }, LinkKind::Probe) => {
                let actions = self.discovery.on_probe_reply(conn, &envelope.payload);
                self.discovery_effects(actions)
            }

            (
                Payload::Waiting { .. } | Payload::HostReady { .. } | Payload::LobbyFull { .. },
                LinkKind::HostLink,
            ) => {
                let actions = self.discovery.on_host_reply(conn, &envelope.payload);
                self.discovery_effects(actions)
            }

            (
                Payload::ChatMessage { .. } | Payload::PlayerState { .. } | Payload::TerrainDelta { .. },
                LinkKind::HostLink | LinkKind::Direct,
            ) => self.handle_application(conn, envelope),

            (
                Payload::JoinDiscovery { .. }
                | Payload::JoinHost { .. }
                | Payload::Redirect { .. }
                | Payload::LobbyFull { .. }
                | Payload::Waiting { .. }
                | Payload::HostReady { .. }
                | Payload::ChatMessage { .. }
                | Payload::PlayerState { .. }
                | Payload::TerrainDelta { .. },
                _,
            ) => {
                tracing::debug!(kind = %envelope.kind(), ?link, "unexpected envelope for link, ignored");
                vec![]
            }
        }
    }

    // ── Application envelopes ────────────────────────────────────────

    fn handle_application(&mut self, conn: ConnectionId, envelope: &Envelope) -> Vec<RuntimeEffect> {
        if envelope.sender == self.local_id {
            tracing::debug!(kind = %envelope.kind(), "dropping self-echo");
            return vec![];
        }

        let relay_from = match &self.authority {
            Some(auth) => match auth.member_of(conn) {
                Some(member) => Some(member.clone()),
                None => {
                    return vec![self.log(
                        Severity::Warn,
                        format!(
                            "[Host-Relay] Dropped {} from non-member {}",
                            envelope.kind(),
                            envelope.sender
                        ),
                    )];
                }
            },
            None => {
                if self.coordinator_link() != Some(conn) {
                    tracing::debug!(%conn, "application envelope off the coordinator link, ignored");
                    return vec![];
                }
                None
            }
        };

        let mut effects = deliver(envelope);

        if let (Some(from), Some(auth)) = (relay_from, self.authority.as_ref()) {
            let plan = relay::relay(auth.member_links(), Some(&from), |c| self.is_link_open(c));
            let chat = matches!(envelope.payload, Payload::ChatMessage { .. });
            let planned = plan.sent_count();
            effects.extend(self.plan_effects(plan, envelope, chat));
            if chat {
                effects.push(RuntimeEffect::ReportRelay { from });
            } else {
                tracing::trace!(kind = %envelope.kind(), %from, planned, "relayed");
            }
        }
        effects
    }

    /// Outbound targets: every member when hosting, the coordinator link
    /// otherwise. With `require_group` an unpaired joiner sends nothing.
    fn outbound_plan(&self, require_group: bool) -> RelayPlan {
        let is_open = |c: ConnectionId| self.is_link_open(c);
        if let Some(auth) = &self.authority {
            return relay::broadcast(auth.member_links(), is_open);
        }
        if let Some(view) = &self.view {
            return relay::to_coordinator(view.partner(), Some(view.link()), is_open);
        }
        if require_group {
            return RelayPlan::default();
        }
        match self.discovery.host() {
            Some(host) => relay::to_coordinator(host, self.discovery.host_link(), is_open),
            None => RelayPlan::default(),
        }
    }

    /// Plan a chat line to the group.
    ///
    /// `Ok` means sends were planned, not that any went out: execute the
    /// effects, then settle with [`chat_delivered`](Self::chat_delivered).
    pub fn send_chat(&mut self, text: &str) -> (Result<ChatMessage, LobbyError>, Vec<RuntimeEffect>) {
        if !self.initialized {
            return (
                Err(LobbyError::NotInitialized),
                vec![self.set_status("Error: Peer not initialized.")],
            );
        }
        let text = text.trim();
        if text.is_empty() {
            return (
                Err(LobbyError::EmptyMessage),
                vec![self.set_status("Error: Message cannot be empty.")],
            );
        }

        let now = self.clock.now_ms();
        let message = ChatMessage::new(self.local_id.clone(), text, now);
        let envelope = Envelope::new(
            self.local_id.clone(),
            Payload::ChatMessage {
                messages: vec![message.clone()],
                from: self.local_id.clone(),
            },
            now,
        )
        .with_message_id(message.id.clone());

        let plan = self.outbound_plan(false);
        let planned = plan.sent_count();
        let mut effects = self.plan_effects(plan, &envelope, true);

        if planned == 0 {
            effects.extend(self.no_active_connections());
            return (Err(LobbyError::NoActiveConnections), effects);
        }
        (Ok(message), effects)
    }

    /// Settle a planned chat against the sends the transport accepted.
    pub fn chat_delivered(
        &mut self,
        message: ChatMessage,
        delivered: usize,
    ) -> (Result<ChatMessage, LobbyError>, Vec<RuntimeEffect>) {
        if delivered == 0 {
            return (Err(LobbyError::NoActiveConnections), self.no_active_connections());
        }
        let effects = vec![
            self.log(
                Severity::Info,
                format!("[Send] Message sent to {delivered} peer(s)"),
            ),
            self.set_status(format!("Message sent to {delivered} peer(s).")),
        ];
        (Ok(message), effects)
    }

    fn no_active_connections(&mut self) -> Vec<RuntimeEffect> {
        vec![
            self.log(Severity::Error, "[Send] No active connections"),
            self.set_status("Error: No active connections."),
        ]
    }

    pub fn broadcast_player_state(&mut self, state: PlayerState) -> Vec<RuntimeEffect> {
        if self.authority.is_none() && self.view.is_none() {
            return vec![];
        }
        let now = self.clock.now_ms();
        if !self.throttle.permit(SyncKind::PlayerState, now) {
            return vec![];
        }
        let envelope = Envelope::new(
            self.local_id.clone(),
            Payload::PlayerState {
                peer_id: self.local_id.clone(),
                state,
                timestamp: now,
            },
            now,
        );
        let plan = self.outbound_plan(true);
        self.plan_effects(plan, &envelope, false)
    }

    pub fn broadcast_terrain_changes(&mut self, changes: TerrainChanges) -> Vec<RuntimeEffect> {
        if self.authority.is_none() && self.view.is_none() {
            return vec![];
        }
        if changes.is_empty() {
            return vec![];
        }
        let now = self.clock.now_ms();
        if !self.throttle.permit(SyncKind::Terrain, now) {
            return vec![];
        }
        let envelope = Envelope::new(
            self.local_id.clone(),
            Payload::TerrainDelta {
                peer_id: self.local_id.clone(),
                changes: changes.truncated(MAX_TERRAIN_CHANGES),
                timestamp: now,
            },
            now,
        );
        let plan = self.outbound_plan(true);
        self.plan_effects(plan, &envelope, false)
    }

    // ── Link lifecycle ───────────────────────────────────────────────

    fn handle_connection_closed(&mut self, conn: ConnectionId) -> Vec<RuntimeEffect> {
        let Some(link) = self.links.remove(&conn) else {
            return vec![];
        };
        match link.kind {
            LinkKind::Probe => {
                let actions = self.discovery.on_probe_closed(conn);
                self.discovery_effects(actions)
            }
            LinkKind::HostLink => {
                if self.view.as_ref().is_some_and(|v| v.link() == conn) {
                    vec![self.log(
                        Severity::Warn,
                        format!("[Client] Lost connection to host {}", link.remote),
                    )]
                } else if self.discovery.host_link() == Some(conn) {
                    vec![self.log(
                        Severity::Warn,
                        format!("[Client] Connection to host {} closed", link.remote),
                    )]
                } else {
                    vec![]
                }
            }
            LinkKind::Discovery => {
                tracing::debug!(remote = %link.remote, "discovery connection closed");
                vec![]
            }
            LinkKind::Direct => {
                let mut effects = vec![self.log(
                    Severity::Warn,
                    format!("[Conn] Connection closed: {}", link.remote),
                )];
                if let Some(auth) = self.authority.as_mut() {
                    let actions = auth.handle_closed(conn);
                    effects.extend(self.authority_effects(actions));
                }
                effects
            }
        }
    }

    fn handle_connection_error(&mut self, conn: ConnectionId, error: TransportError) -> Vec<RuntimeEffect> {
        let Some(link) = self.links.remove(&conn) else {
            return vec![];
        };
        match link.kind {
            LinkKind::Probe => {
                let actions = self.discovery.on_probe_failed(conn, &error);
                self.discovery_effects(actions)
            }
            LinkKind::HostLink => {
                let actions = self.discovery.on_host_failed(conn, &error);
                self.discovery_effects(actions)
            }
            LinkKind::Discovery => {
                tracing::debug!(remote = %link.remote, "discovery connection error: {error}");
                vec![]
            }
            LinkKind::Direct => {
                let mut effects = vec![self.log(Severity::Error, format!("[Conn] Error: {error}"))];
                if let Some(auth) = self.authority.as_mut() {
                    let actions = auth.handle_closed(conn);
                    effects.extend(self.authority_effects(actions));
                }
                effects
            }
        }
    }

    // ── Election & coordinator ───────────────────────────────────────

    /// Try to claim the rendezvous identity. Idempotent: any pending
    /// attempt is abandoned first.
    pub fn attempt_election(&mut self) -> Vec<RuntimeEffect> {
        if !self.initialized {
            tracing::debug!("election skipped, not initialized");
            return vec![];
        }
        if self.authority.is_some() {
            tracing::debug!("election skipped, already coordinator");
            return vec![];
        }
        if self.view.is_some() || self.discovery.host_link().is_some() {
            tracing::debug!("election skipped, already joining a lobby");
            return vec![];
        }

        let mut effects: Vec<RuntimeEffect> = Vec::new();
        for conn in self.discovery.abort() {
            self.links.remove(&conn);
            effects.push(RuntimeEffect::Close(conn));
        }
        if self.armed.contains(&TimerKind::Discovery) {
            effects.push(self.cancel(TimerKind::Discovery));
        }

        let start = self.election.begin();
        if let Some(old) = start.abandoned {
            effects.push(RuntimeEffect::DestroyEndpoint(old));
        }
        tracing::debug!(rendezvous = %start.identity, "attempting to claim rendezvous identity");
        effects.push(RuntimeEffect::OpenEndpoint {
            endpoint: start.endpoint,
            identity: start.identity,
        });
        effects
    }

    fn become_coordinator(&mut self) -> Vec<RuntimeEffect> {
        if self.view.is_some() {
            // Paired while the claim was in flight; keep the lobby we have.
            let mut effects = Vec::new();
            if let Some(endpoint) = self.election.release() {
                effects.push(RuntimeEffect::DestroyEndpoint(endpoint));
            }
            return effects;
        }

        let mut effects = vec![
            self.cancel(TimerKind::Election),
            self.cancel(TimerKind::Discovery),
            self.cancel(TimerKind::JoinTimeout),
        ];
        for conn in self.discovery.abort() {
            self.links.remove(&conn);
            effects.push(RuntimeEffect::Close(conn));
        }
        self.discovery.reset_retry();
        self.seeking = false;

        let size = self.config.lobby_size;
        self.authority = Some(LobbyAuthority::new(self.local_id.clone(), size));
        effects.push(self.log(
            Severity::Info,
            format!(
                "[Base] Became base peer! Initialized lobby with host: {}",
                self.local_id
            ),
        ));
        effects.push(self.set_status(format!("Waiting for {size} players... (1/{size})")));
        effects.push(self.membership_changed());
        effects
    }

    // ── Timers ───────────────────────────────────────────────────────

    pub fn handle_timer(&mut self, kind: TimerKind) -> Vec<RuntimeEffect> {
        self.armed.remove(&kind);
        match kind {
            TimerKind::Election => self.attempt_election(),
            TimerKind::Discovery => {
                if self.authority.is_some() || self.view.is_some() || !self.initialized {
                    return vec![];
                }
                let actions = self.discovery.discover();
                self.discovery_effects(actions)
            }
            TimerKind::JoinTimeout => {
                if self.discovery.host_link().is_none() {
                    return vec![];
                }
                let mut effects = vec![self.log(
                    Severity::Warn,
                    "[Client] Timed out waiting for the lobby to fill",
                )];
                effects.extend(self.reset());
                effects
            }
            TimerKind::Sweep => {
                let mut effects = vec![self.schedule(TimerKind::Sweep, self.config.sweep_interval)];
                effects.extend(self.sweep());
                effects
            }
        }
    }

    fn sweep(&mut self) -> Vec<RuntimeEffect> {
        let coordinator_link = match self.coordinator_link() {
            Some(conn) => match self.links.get(&conn) {
                Some(link) if link.open => LinkHealth::Open,
                Some(_) => LinkHealth::Pending,
                None => LinkHealth::Lost,
            },
            None => LinkHealth::Lost,
        };
        let (open_member_links, recorded_members) = match &self.authority {
            Some(auth) => (
                auth.member_links()
                    .into_iter()
                    .filter(|(_, c)| self.is_link_open(*c))
                    .count(),
                auth.session().guests().len(),
            ),
            None => (0, 0),
        };
        let input = SweepInput {
            initialized: self.initialized,
            role: self.role(),
            coordinator_link,
            open_member_links,
            recorded_members,
            in_flight: self.election.is_pending()
                || self.discovery.is_busy()
                || self.armed.contains(&TimerKind::Election)
                || self.armed.contains(&TimerKind::Discovery),
        };

        match supervisor::sweep(&input) {
            SweepAction::Nothing => vec![],
            SweepAction::Reset => {
                let host = self
                    .view
                    .as_ref()
                    .map(|v| v.partner().clone())
                    .or_else(|| self.discovery.host().cloned());
                let mut effects = vec![self.log(
                    Severity::Warn,
                    match host {
                        Some(host) => format!("[Auto] Lost connection to host {host}, resetting"),
                        None => "[Auto] Lost connection to host, resetting".to_string(),
                    },
                )];
                effects.extend(self.reset());
                effects
            }
            SweepAction::Degraded { open, total } => vec![self.log(
                Severity::Warn,
                format!("[Auto] Host has {open}/{total} active client connections"),
            )],
            SweepAction::Elect => {
                let mut effects = vec![self.log(
                    Severity::Info,
                    format!(
                        "[Auto] Not in lobby, attempting to find {}-player lobby...",
                        self.config.lobby_size
                    ),
                )];
                effects.extend(self.attempt_election());
                effects
            }
        }
    }

    // ── Reset ────────────────────────────────────────────────────────

    /// Leave whatever lobby we are in and re-elect after `reset_delay`.
    pub fn reset(&mut self) -> Vec<RuntimeEffect> {
        let mut effects = self.teardown();
        effects.push(self.set_status("Lobby disconnected, looking for new lobby..."));
        effects.push(self.log(
            Severity::Warn,
            format!(
                "[Rejoin] Starting search for new {}-player lobby...",
                self.config.lobby_size
            ),
        ));
        effects.push(self.membership_changed());
        effects.push(self.schedule(TimerKind::Election, self.config.reset_delay));
        effects
    }

    /// Drop claim, lobby, view and in-flight discovery.
    fn teardown(&mut self) -> Vec<RuntimeEffect> {
        let mut effects = vec![
            self.cancel(TimerKind::Election),
            self.cancel(TimerKind::Discovery),
            self.cancel(TimerKind::JoinTimeout),
        ];

        if let Some(endpoint) = self.election.release() {
            effects.push(RuntimeEffect::DestroyEndpoint(endpoint));
            effects.push(self.log(
                Severity::Info,
                "[Reset] Releasing rendezvous identity during reset",
            ));
        }

        let mut to_close: Vec<ConnectionId> = Vec::new();
        if let Some(mut auth) = self.authority.take() {
            to_close.extend(auth.drain_links());
        }
        if let Some(view) = self.view.take() {
            to_close.push(view.link());
        }
        to_close.extend(self.discovery.abort());
        for conn in to_close {
            self.links.remove(&conn);
            effects.push(RuntimeEffect::Close(conn));
        }
        self.links.retain(|_, l| l.kind != LinkKind::Discovery);
        self.seeking = false;
        effects
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn handle_command(&mut self, cmd: RuntimeCommand) -> Vec<RuntimeEffect> {
        match cmd {
            RuntimeCommand::BroadcastPlayerState { state } => self.broadcast_player_state(state),
            RuntimeCommand::BroadcastTerrainChanges { changes } => {
                self.broadcast_terrain_changes(changes)
            }
            RuntimeCommand::GetGroupMembers { reply } => {
                let _ = reply.send(self.group_member_ids());
                Vec::new()
            }
            RuntimeCommand::IsGroupComplete { reply } => {
                let _ = reply.send(self.is_group_complete());
                Vec::new()
            }
            RuntimeCommand::GetSnapshot { reply } => {
                let _ = reply.send(self.snapshot());
                Vec::new()
            }
            RuntimeCommand::Reset => self.reset(),

            // Handled in the loop: chat settles on real delivery counts and
            // shutdown breaks out.
            RuntimeCommand::SendChat { .. } | RuntimeCommand::Shutdown => Vec::new(),
        }
    }

    // ── Action conversion ────────────────────────────────────────────

    fn authority_effects(&mut self, actions: Vec<AuthorityAction>) -> Vec<RuntimeEffect> {
        let mut effects = Vec::new();
        for action in actions {
            match action {
                AuthorityAction::Reply { conn, payload } => {
                    effects.push(self.send(conn, payload));
                }
                AuthorityAction::Broadcast { to, payload } => {
                    let envelope = self.envelope(payload);
                    for conn in to {
                        if self.is_link_open(conn) {
                            effects.push(RuntimeEffect::Send {
                                conn,
                                envelope: envelope.clone(),
                            });
                        } else {
                            effects.push(self.log(
                                Severity::Warn,
                                format!("[Host] Connection {conn} is not open, {} skipped", envelope.kind()),
                            ));
                        }
                    }
                }
                AuthorityAction::Close { conn } => {
                    self.links.remove(&conn);
                    effects.push(RuntimeEffect::Close(conn));
                }
                AuthorityAction::ReleaseClaim => {
                    if let Some(endpoint) = self.election.release() {
                        effects.push(RuntimeEffect::DestroyEndpoint(endpoint));
                        effects.push(self.log(
                            Severity::Info,
                            "[Host] Releasing rendezvous identity to allow new lobbies to form",
                        ));
                        self.links.retain(|_, l| l.kind != LinkKind::Discovery);
                    }
                }
                AuthorityAction::Event(event) => effects.extend(self.lobby_event(event)),
            }
        }
        effects
    }

    fn lobby_event(&mut self, event: LobbyEvent) -> Vec<RuntimeEffect> {
        match event {
            LobbyEvent::Redirected {
                seeker,
                current,
                total,
            } => vec![self.log(
                Severity::Info,
                format!(
                    "[Base] Discovery request from {seeker}, redirecting to host {} ({current}/{total})",
                    self.local_id
                ),
            )],
            LobbyEvent::DiscoveryRejected { seeker } => vec![self.log(
                Severity::Warn,
                format!("[Base] Lobby already complete, rejecting {seeker}"),
            )],
            LobbyEvent::JoinRejected { peer } => vec![self.log(
                Severity::Warn,
                format!(
                    "[Host] Lobby full ({}), rejecting {peer}",
                    self.config.lobby_size
                ),
            )],
            LobbyEvent::DuplicateJoin { peer } => vec![self.log(
                Severity::Info,
                format!("[Host] Player {peer} is already in lobby, ignoring duplicate join"),
            )],
            LobbyEvent::MemberJoined {
                peer,
                current,
                total,
            } => vec![
                self.log(
                    Severity::Info,
                    format!("[Host] Player {current}/{total} joined: {peer}"),
                ),
                self.set_status(format!("Waiting for {total} players... ({current}/{total})")),
                self.membership_changed(),
            ],
            LobbyEvent::LobbyFilled { members } => {
                let names: Vec<&str> = members.iter().map(PeerId::as_str).collect();
                vec![
                    self.log(
                        Severity::Info,
                        format!(
                            "[Host] Lobby full! {} players total: {}",
                            members.len(),
                            names.join(", ")
                        ),
                    ),
                    self.set_status(format!(
                        "Hosting {}-player lobby! (1 host + {} clients)",
                        members.len(),
                        members.len().saturating_sub(1)
                    )),
                    self.membership_changed(),
                ]
            }
            LobbyEvent::MemberLeft {
                peer,
                current,
                total,
                reopened,
            } => {
                let mut effects = vec![self.log(
                    Severity::Warn,
                    format!(
                        "[Host] Player {peer} disconnected, removed from lobby. Current players: {current}/{total}"
                    ),
                )];
                if reopened {
                    effects.push(self.log(
                        Severity::Info,
                        format!("[Host] Lobby no longer full ({current}/{total}), accepting new players"),
                    ));
                }
                effects.push(self.set_status(format!(
                    "Waiting for {total} players... ({current}/{total})"
                )));
                effects.push(self.membership_changed());
                effects
            }
        }
    }

    fn discovery_effects(&mut self, actions: Vec<DiscoveryAction>) -> Vec<RuntimeEffect> {
        let mut effects = Vec::new();
        for action in actions {
            match action {
                DiscoveryAction::Connect { conn, to } => {
                    let kind = if self.discovery.probe() == Some(conn) {
                        LinkKind::Probe
                    } else {
                        LinkKind::HostLink
                    };
                    self.links.insert(
                        conn,
                        Link {
                            kind,
                            remote: to.clone(),
                            open: false,
                        },
                    );
                    effects.push(RuntimeEffect::Connect {
                        conn,
                        from: self.own_endpoint,
                        to,
                    });
                }
                DiscoveryAction::Send { conn, payload } => {
                    effects.push(self.send(conn, payload));
                }
                DiscoveryAction::Close { conn } => {
                    self.links.remove(&conn);
                    effects.push(RuntimeEffect::Close(conn));
                }
                DiscoveryAction::ScheduleElection { after } => {
                    effects.push(self.schedule(TimerKind::Election, after));
                }
                DiscoveryAction::StartJoinTimer => {
                    if let Some(timeout) = self.config.join_timeout {
                        effects.push(self.schedule(TimerKind::JoinTimeout, timeout));
                    }
                }
                DiscoveryAction::Paired(view) => {
                    self.view = Some(view);
                    self.seeking = false;
                    effects.push(self.cancel(TimerKind::JoinTimeout));
                    effects.push(self.membership_changed());
                }
                DiscoveryAction::Status(text) => effects.push(self.set_status(text)),
                DiscoveryAction::Log(severity, message) => effects.push(self.log(severity, message)),
            }
        }
        effects
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Link to our coordinator: the paired link, or the one we are joining on.
    fn coordinator_link(&self) -> Option<ConnectionId> {
        self.view
            .as_ref()
            .map(ClientView::link)
            .or_else(|| self.discovery.host_link())
    }

    fn is_link_open(&self, conn: ConnectionId) -> bool {
        self.links.get(&conn).is_some_and(|l| l.open)
    }

    fn envelope(&self, payload: Payload) -> Envelope {
        Envelope::new(self.local_id.clone(), payload, self.clock.now_ms())
    }

    fn send(&self, conn: ConnectionId, payload: Payload) -> RuntimeEffect {
        RuntimeEffect::Send {
            conn,
            envelope: self.envelope(payload),
        }
    }

    /// Sends for a relay plan. Skipped links go to the event feed only
    /// when `feed` is set; state-sync traffic is too frequent for that.
    fn plan_effects(&self, plan: RelayPlan, envelope: &Envelope, feed: bool) -> Vec<RuntimeEffect> {
        let mut effects: Vec<RuntimeEffect> = plan
            .deliveries
            .into_iter()
            .map(|d| RuntimeEffect::Send {
                conn: d.conn,
                envelope: envelope.clone(),
            })
            .collect();
        for peer in plan.skipped {
            if feed {
                effects.push(self.log(
                    Severity::Warn,
                    format!("[Relay] Connection to {peer} is not open"),
                ));
            } else {
                tracing::debug!(%peer, kind = %envelope.kind(), "skipped closed link");
            }
        }
        effects
    }

    fn schedule(&mut self, kind: TimerKind, after: Duration) -> RuntimeEffect {
        self.armed.insert(kind);
        RuntimeEffect::ScheduleTimer { kind, after }
    }

    fn cancel(&mut self, kind: TimerKind) -> RuntimeEffect {
        self.armed.remove(&kind);
        RuntimeEffect::CancelTimer(kind)
    }

    fn set_status(&mut self, status: impl Into<String>) -> RuntimeEffect {
        self.status = status.into();
        RuntimeEffect::Emit(ProtocolEvent::StatusChanged(self.status.clone()))
    }

    fn log(&self, severity: Severity, message: impl Into<String>) -> RuntimeEffect {
        let message = message.into();
        match severity {
            Severity::Info => tracing::info!(local_id = %self.local_id, "{message}"),
            Severity::Warn => tracing::warn!(local_id = %self.local_id, "{message}"),
            Severity::Error => tracing::error!(local_id = %self.local_id, "{message}"),
        }
        RuntimeEffect::Emit(ProtocolEvent::EventLogged(LogEntry::new(severity, message)))
    }

    fn membership_changed(&self) -> RuntimeEffect {
        RuntimeEffect::Emit(ProtocolEvent::MembershipChanged(self.snapshot()))
    }
}

/// Observer events for a received application envelope.
fn deliver(envelope: &Envelope) -> Vec<RuntimeEffect> {
    match &envelope.payload {
        Payload::ChatMessage { .. } => vec![RuntimeEffect::Emit(ProtocolEvent::Message(
            envelope.clone(),
        ))],
        Payload::PlayerState { peer_id, state, .. } => {
            vec![RuntimeEffect::Emit(ProtocolEvent::PlayerState {
                peer_id: peer_id.clone(),
                state: state.clone(),
            })]
        }
        Payload::TerrainDelta {
            peer_id, changes, ..
        } => vec![RuntimeEffect::Emit(ProtocolEvent::TerrainChanges {
            peer_id: peer_id.clone(),
            changes: changes.clone(),
        })],
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::executor::execute_effects;
    use crate::runtime::observer::NoopObserver;
    use crate::runtime::timer::{ManualClock, ManualTimers};
    use crate::runtime::transport::mock::MockTransport;

    fn peer(s: &str) -> PeerId {
        PeerId::from(s)
    }

    fn config(size: usize) -> RuntimeConfig {
        RuntimeConfig::default()
            .rendezvous_id("base")
            .lobby_size(size)
    }

    fn state(id: &str, size: usize) -> RuntimeState {
        RuntimeState::new(peer(id), config(size), Arc::new(ManualClock::new(1_000)))
    }

    fn data(sender: &str, payload: Payload) -> Vec<u8> {
        Envelope::new(peer(sender), payload, 1).to_bytes().unwrap()
    }

    fn claim_endpoint(effects: &[RuntimeEffect]) -> EndpointId {
        effects
            .iter()
            .find_map(|e| match e {
                RuntimeEffect::OpenEndpoint { endpoint, identity } if identity.as_str() == "base" => {
                    Some(*endpoint)
                }
                _ => None,
            })
            .expect("claim attempt")
    }

    fn sends(effects: &[RuntimeEffect]) -> Vec<(ConnectionId, Payload)> {
        effects
            .iter()
            .filter_map(|e| match e {
                RuntimeEffect::Send { conn, envelope } => Some((*conn, envelope.payload.clone())),
                _ => None,
            })
            .collect()
    }

    fn logs(effects: &[RuntimeEffect]) -> Vec<String> {
        effects
            .iter()
            .filter_map(|e| match e {
                RuntimeEffect::Emit(ProtocolEvent::EventLogged(entry)) => Some(entry.message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Initialize and return the effects of the own-identity open.
    fn initialized(s: &mut RuntimeState) -> Vec<RuntimeEffect> {
        s.start();
        s.handle_transport_event(TransportEvent::EndpointOpened {
            endpoint: s.own_endpoint,
            identity: s.local_id.clone(),
        })
    }

    /// Coordinator holding the rendezvous claim, and that claim's endpoint.
    fn coordinator_with_claim(id: &str, size: usize) -> (RuntimeState, EndpointId) {
        let mut s = state(id, size);
        let effects = initialized(&mut s);
        let claim = claim_endpoint(&effects);
        s.handle_transport_event(TransportEvent::EndpointOpened {
            endpoint: claim,
            identity: peer("base"),
        });
        assert_eq!(s.role(), Role::Coordinator);
        (s, claim)
    }

    fn coordinator(id: &str, size: usize) -> RuntimeState {
        coordinator_with_claim(id, size).0
    }

    /// Direct link from `who` plus its join-host.
    fn admit(s: &mut RuntimeState, who: &str) -> (ConnectionId, Vec<RuntimeEffect>) {
        let conn = ConnectionId::new();
        s.handle_transport_event(TransportEvent::Incoming {
            endpoint: s.own_endpoint,
            conn,
            remote: peer(who),
        });
        let effects = s.handle_transport_event(TransportEvent::Data {
            conn,
            data: data(who, Payload::JoinHost { peer_id: peer(who) }),
        });
        (conn, effects)
    }

    #[test]
    fn start_opens_own_identity_and_arms_sweep() {
        let mut s = state("A", 3);
        let effects = s.start();
        assert!(matches!(
            &effects[0],
            RuntimeEffect::OpenEndpoint { identity, .. } if identity.as_str() == "A"
        ));
        assert!(effects.contains(&RuntimeEffect::ScheduleTimer {
            kind: TimerKind::Sweep,
            after: s.config.sweep_interval,
        }));
        assert_eq!(s.role(), Role::Idle);
    }

    #[test]
    fn initialization_starts_election() {
        let mut s = state("A", 3);
        let effects = initialized(&mut s);
        assert!(s.is_initialized());
        assert_eq!(s.status(), "Connected as A");
        claim_endpoint(&effects);
        assert_eq!(s.role(), Role::Claiming);
    }

    #[test]
    fn winning_claim_makes_coordinator() {
        let s = coordinator("A", 3);
        let snap = s.snapshot();
        assert_eq!(snap.current, 1);
        assert_eq!(snap.total, 3);
        assert!(!snap.complete);
        assert!(snap.members.is_empty());
        assert_eq!(s.status(), "Waiting for 3 players... (1/3)");
    }

    #[test]
    fn lost_claim_schedules_discovery() {
        let mut s = state("B", 3);
        let claim = claim_endpoint(&initialized(&mut s));
        let effects = s.handle_transport_event(TransportEvent::EndpointFailed {
            endpoint: claim,
            error: TransportError::IdentityTaken(peer("base")),
        });
        assert!(effects.contains(&RuntimeEffect::DestroyEndpoint(claim)));
        assert!(effects.contains(&RuntimeEffect::ScheduleTimer {
            kind: TimerKind::Discovery,
            after: s.config.discovery_delay,
        }));
        assert_eq!(s.role(), Role::Seeker);
    }

    #[test]
    fn discovery_probe_sends_join_discovery_on_open() {
        let mut s = state("B", 3);
        initialized(&mut s);
        let effects = s.handle_timer(TimerKind::Discovery);
        let probe = effects
            .iter()
            .find_map(|e| match e {
                RuntimeEffect::Connect { conn, to, .. } if to.as_str() == "base" => Some(*conn),
                _ => None,
            })
            .expect("probe connect");

        let effects = s.handle_transport_event(TransportEvent::ConnectionOpened { conn: probe });
        assert_eq!(
            sends(&effects),
            vec![(probe, Payload::JoinDiscovery { peer_id: peer("B") })]
        );
    }

    #[test]
    fn redirect_leads_to_direct_join() {
        let mut s = state("B", 3);
        initialized(&mut s);
        let effects = s.handle_timer(TimerKind::Discovery);
        let Some(RuntimeEffect::Connect { conn: probe, .. }) =
            effects.iter().find(|e| matches!(e, RuntimeEffect::Connect { .. }))
        else {
            panic!("no probe");
        };
        let probe = *probe;
        s.handle_transport_event(TransportEvent::ConnectionOpened { conn: probe });

        let effects = s.handle_transport_event(TransportEvent::Data {
            conn: probe,
            data: data(
                "A",
                Payload::Redirect {
                    host_id: peer("A"),
                    current_players: 1,
                    total_players: 3,
                },
            ),
        });
        assert!(effects.contains(&RuntimeEffect::Close(probe)));
        let link = effects
            .iter()
            .find_map(|e| match e {
                RuntimeEffect::Connect { conn, to, .. } if to.as_str() == "A" => Some(*conn),
                _ => None,
            })
            .expect("direct connect");
        assert_eq!(s.role(), Role::Joining);

        let effects = s.handle_transport_event(TransportEvent::ConnectionOpened { conn: link });
        assert_eq!(
            sends(&effects),
            vec![(link, Payload::JoinHost { peer_id: peer("B") })]
        );

        s.handle_transport_event(TransportEvent::Data {
            conn: link,
            data: data(
                "A",
                Payload::Waiting {
                    current: 2,
                    total: 3,
                    message: "Waiting for 1 more player".into(),
                },
            ),
        });
        assert_eq!(s.role(), Role::Waiting);
        assert_eq!(s.snapshot().current, 2);

        s.handle_transport_event(TransportEvent::Data {
            conn: link,
            data: data(
                "A",
                Payload::HostReady {
                    host_id: peer("A"),
                    all_players: vec![peer("A"), peer("B"), peer("C")],
                },
            ),
        });
        assert_eq!(s.role(), Role::Member);
        assert!(s.is_group_complete());
        assert_eq!(s.group_member_ids(), vec![peer("A"), peer("C")]);
    }

    #[test]
    fn coordinator_redirects_discovery_probe() {
        let (mut s, claim) = coordinator_with_claim("A", 3);

        let conn = ConnectionId::new();
        s.handle_transport_event(TransportEvent::Incoming {
            endpoint: claim,
            conn,
            remote: peer("B"),
        });
        let effects = s.handle_transport_event(TransportEvent::Data {
            conn,
            data: data("B", Payload::JoinDiscovery { peer_id: peer("B") }),
        });
        assert_eq!(
            sends(&effects),
            vec![(
                conn,
                Payload::Redirect {
                    host_id: peer("A"),
                    current_players: 1,
                    total_players: 3,
                }
            )]
        );
        assert!(effects.contains(&RuntimeEffect::Close(conn)));
    }

    #[test]
    fn filling_lobby_broadcasts_host_ready_and_releases_claim() {
        let mut s = coordinator("A", 3);
        let (b, effects) = admit(&mut s, "B");
        assert!(matches!(sends(&effects)[..], [(c, Payload::Waiting { current: 2, total: 3, .. })] if c == b));

        let (c, effects) = admit(&mut s, "C");
        let ready = Payload::HostReady {
            host_id: peer("A"),
            all_players: vec![peer("A"), peer("B"), peer("C")],
        };
        assert_eq!(sends(&effects), vec![(b, ready.clone()), (c, ready)]);
        assert!(effects
            .iter()
            .any(|e| matches!(e, RuntimeEffect::DestroyEndpoint(_))));
        assert!(s.is_group_complete());
        assert!(!s.election.holds_claim());
        assert_eq!(s.status(), "Hosting 3-player lobby! (1 host + 2 clients)");
    }

    #[test]
    fn full_lobby_rejects_late_joiner() {
        let mut s = coordinator("A", 2);
        admit(&mut s, "B");
        let (d, effects) = admit(&mut s, "D");
        assert!(matches!(sends(&effects)[..], [(c, Payload::LobbyFull { .. })] if c == d));
        assert!(effects.contains(&RuntimeEffect::Close(d)));
        assert_eq!(s.group_member_ids(), vec![peer("B")]);
    }

    #[test]
    fn join_host_without_lobby_is_refused() {
        let mut s = state("B", 3);
        initialized(&mut s);
        let (conn, effects) = admit(&mut s, "C");
        assert!(matches!(sends(&effects)[..], [(c, Payload::LobbyFull { .. })] if c == conn));
        assert!(effects.contains(&RuntimeEffect::Close(conn)));
    }

    #[test]
    fn member_departure_reopens_lobby() {
        let mut s = coordinator("A", 2);
        let (b, _) = admit(&mut s, "B");
        assert!(s.is_group_complete());

        let effects = s.handle_transport_event(TransportEvent::ConnectionClosed { conn: b });
        assert!(!s.is_group_complete());
        assert_eq!(s.snapshot().current, 1);
        assert!(logs(&effects)
            .iter()
            .any(|l| l.contains("Lobby no longer full")));
    }

    #[test]
    fn coordinator_relays_chat_to_everyone_but_sender() {
        let mut s = coordinator("A", 3);
        let (b, _) = admit(&mut s, "B");
        let (c, _) = admit(&mut s, "C");

        let chat = Payload::ChatMessage {
            messages: vec![ChatMessage::new(peer("B"), "hi", 5)],
            from: peer("B"),
        };
        let effects = s.handle_transport_event(TransportEvent::Data {
            conn: b,
            data: data("B", chat.clone()),
        });

        assert_eq!(sends(&effects), vec![(c, chat)]);
        assert!(effects
            .iter()
            .any(|e| matches!(e, RuntimeEffect::Emit(ProtocolEvent::Message(env)) if env.sender == peer("B"))));
    }

    #[test]
    fn self_echo_is_dropped() {
        let mut s = coordinator("A", 3);
        let (b, _) = admit(&mut s, "B");
        let effects = s.handle_transport_event(TransportEvent::Data {
            conn: b,
            data: data(
                "A",
                Payload::ChatMessage {
                    messages: vec![ChatMessage::new(peer("A"), "echo", 5)],
                    from: peer("A"),
                },
            ),
        });
        assert!(effects.is_empty());
    }

    #[test]
    fn application_from_non_member_is_dropped() {
        let mut s = coordinator("A", 3);
        let stranger = ConnectionId::new();
        s.handle_transport_event(TransportEvent::Incoming {
            endpoint: s.own_endpoint,
            conn: stranger,
            remote: peer("X"),
        });
        let effects = s.handle_transport_event(TransportEvent::Data {
            conn: stranger,
            data: data(
                "X",
                Payload::ChatMessage {
                    messages: vec![ChatMessage::new(peer("X"), "spam", 5)],
                    from: peer("X"),
                },
            ),
        });
        assert!(sends(&effects).is_empty());
        assert!(logs(&effects)[0].contains("non-member X"));
    }

    #[test]
    fn malformed_envelope_is_logged_and_ignored() {
        let mut s = coordinator("A", 3);
        let (b, _) = admit(&mut s, "B");
        let effects = s.handle_transport_event(TransportEvent::Data {
            conn: b,
            data: vec![0xc1, 0x00],
        });
        assert!(sends(&effects).is_empty());
        assert!(logs(&effects)[0].contains("malformed"));
        assert_eq!(s.group_member_ids(), vec![peer("B")]);
    }

    #[test]
    fn send_chat_validates_input() {
        let mut s = state("A", 3);
        let (result, _) = s.send_chat("hello");
        assert!(matches!(result, Err(LobbyError::NotInitialized)));

        initialized(&mut s);
        let (result, _) = s.send_chat("   ");
        assert!(matches!(result, Err(LobbyError::EmptyMessage)));
        assert_eq!(s.status(), "Error: Message cannot be empty.");

        let (result, _) = s.send_chat("hello");
        assert!(matches!(result, Err(LobbyError::NoActiveConnections)));
        assert_eq!(s.status(), "Error: No active connections.");
    }

    #[test]
    fn send_chat_as_coordinator_reaches_all_members() {
        let mut s = coordinator("A", 3);
        let (b, _) = admit(&mut s, "B");
        let (c, _) = admit(&mut s, "C");
        let (result, effects) = s.send_chat("  gg  ");
        let message = result.unwrap();
        assert_eq!(message.text, "gg");
        let targets: Vec<_> = sends(&effects).into_iter().map(|(c, _)| c).collect();
        assert_eq!(targets, vec![b, c]);

        let (result, _) = s.chat_delivered(message, 2);
        assert!(result.is_ok());
        assert_eq!(s.status(), "Message sent to 2 peer(s).");
    }

    #[test]
    fn chat_counts_only_sends_the_transport_accepted() {
        let mut s = coordinator("A", 3);
        let (b, _) = admit(&mut s, "B");
        let (c, _) = admit(&mut s, "C");

        // B's link died at the transport; its close event is still queued.
        let mut transport = MockTransport::new();
        transport.mark_closed(b);
        let mut timers = ManualTimers::new(ManualClock::new(1_000));

        let (planned, effects) = s.send_chat("hi");
        let message = planned.unwrap();
        let delivered = execute_effects(effects, &mut transport, &mut timers, &NoopObserver);
        assert_eq!(delivered, 1);
        assert_eq!(transport.sent()[0].0, c);

        let (result, _) = s.chat_delivered(message, delivered);
        assert!(result.is_ok());
        assert_eq!(s.status(), "Message sent to 1 peer(s).");

        transport.mark_closed(c);
        let (planned, effects) = s.send_chat("anyone?");
        let delivered = execute_effects(effects, &mut transport, &mut timers, &NoopObserver);
        assert_eq!(delivered, 0);
        let (result, _) = s.chat_delivered(planned.unwrap(), delivered);
        assert!(matches!(result, Err(LobbyError::NoActiveConnections)));
        assert_eq!(s.status(), "Error: No active connections.");
    }

    #[test]
    fn chat_relay_reports_after_delivery() {
        let mut s = coordinator("A", 3);
        let (b, _) = admit(&mut s, "B");
        admit(&mut s, "C");

        let effects = s.handle_transport_event(TransportEvent::Data {
            conn: b,
            data: data(
                "B",
                Payload::ChatMessage {
                    messages: vec![ChatMessage::new(peer("B"), "hi", 5)],
                    from: peer("B"),
                },
            ),
        });
        assert_eq!(
            effects.last(),
            Some(&RuntimeEffect::ReportRelay { from: peer("B") })
        );
    }

    #[test]
    fn player_state_is_throttled() {
        let mut s = coordinator("A", 2);
        admit(&mut s, "B");
        let state = PlayerState::default();
        assert_eq!(sends(&s.broadcast_player_state(state.clone())).len(), 1);
        assert!(s.broadcast_player_state(state).is_empty());
    }

    #[test]
    fn state_sync_needs_a_group() {
        let mut s = state("A", 3);
        initialized(&mut s);
        assert!(s.broadcast_player_state(PlayerState::default()).is_empty());
        assert!(s.broadcast_terrain_changes(TerrainChanges::default()).is_empty());
    }

    #[test]
    fn reset_tears_down_lobby_and_schedules_election() {
        let mut s = coordinator("A", 3);
        let (b, _) = admit(&mut s, "B");
        let effects = s.reset();
        assert!(effects.contains(&RuntimeEffect::Close(b)));
        assert!(effects
            .iter()
            .any(|e| matches!(e, RuntimeEffect::DestroyEndpoint(_))));
        assert!(effects.contains(&RuntimeEffect::ScheduleTimer {
            kind: TimerKind::Election,
            after: s.config.reset_delay,
        }));
        assert_eq!(s.role(), Role::Idle);
        assert_eq!(s.status(), "Lobby disconnected, looking for new lobby...");
    }

    #[test]
    fn sweep_resets_member_with_lost_link() {
        let mut s = state("B", 3);
        initialized(&mut s);
        let link = ConnectionId::new();
        s.view = Some(ClientView::from_host_ready(
            &peer("B"),
            peer("A"),
            &[peer("A"), peer("B"), peer("C")],
            link,
        ));
        let effects = s.handle_timer(TimerKind::Sweep);
        assert!(logs(&effects)[0].starts_with("[Auto] Lost connection to host A"));
        assert!(s.view.is_none());
    }

    #[test]
    fn sweep_elects_when_idle() {
        let mut s = state("B", 3);
        initialized(&mut s);
        s.election.release();
        let effects = s.handle_timer(TimerKind::Sweep);
        claim_endpoint(&effects);
        assert!(effects.contains(&RuntimeEffect::ScheduleTimer {
            kind: TimerKind::Sweep,
            after: s.config.sweep_interval,
        }));
    }

    #[test]
    fn sweep_leaves_claiming_process_alone() {
        let mut s = state("B", 3);
        initialized(&mut s);
        let effects = s.handle_timer(TimerKind::Sweep);
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut s = coordinator("A", 3);
        let (b, _) = admit(&mut s, "B");
        let effects = s.shutdown();
        assert!(effects.contains(&RuntimeEffect::Close(b)));
        assert!(effects.contains(&RuntimeEffect::DestroyEndpoint(s.own_endpoint)));
        assert!(!s.is_initialized());
    }

    #[tokio::test]
    async fn queries_answer_over_oneshot() {
        let mut s = coordinator("A", 2);
        admit(&mut s, "B");

        let (tx, rx) = tokio::sync::oneshot::channel();
        let effects = s.handle_command(RuntimeCommand::IsGroupComplete { reply: tx });
        assert!(effects.is_empty());
        assert!(rx.await.unwrap());

        let (tx, rx) = tokio::sync::oneshot::channel();
        s.handle_command(RuntimeCommand::GetGroupMembers { reply: tx });
        assert_eq!(rx.await.unwrap(), vec![peer("B")]);
    }
}
