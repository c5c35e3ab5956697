/// Protocol runtime: wires the lobby state machines to a live event loop.
///
/// `RuntimeState` is pure: every `handle_*` method returns
/// `Vec<RuntimeEffect>`. The executor is the only code that touches the
/// transport, the timers or the observer, and the loop is the only code
/// that awaits. Tests drive `RuntimeState` + `execute_effects` directly
/// with virtual time; applications spawn a [`ProtocolRuntime`].
pub mod effect;
pub mod executor;
mod r#loop;
pub mod observer;
pub mod state;
pub mod timer;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::envelope::{ChatMessage, Envelope};
use crate::error::LobbyError;
use crate::lobby::BackoffPolicy;
use crate::types::{PeerId, PlayerState, TerrainChanges, DEFAULT_RENDEZVOUS_ID};

pub use effect::RuntimeEffect;
pub use executor::execute_effects;
pub use observer::{ChannelObserver, LobbyObserver, LogEntry, NoopObserver, Severity};
pub use state::RuntimeState;
pub use timer::{Clock, ManualClock, ManualTimers, SystemClock, TimerKind, TimerScheduler, TokioTimers};
pub use transport::Transport;

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for the protocol runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Reserved identity every process races for.
    pub rendezvous_id: PeerId,
    /// Players per lobby, host included. Fixed for the process lifetime.
    pub lobby_size: usize,
    /// Lobby-full rejections before the long cooldown.
    pub max_retries: u32,
    /// Delay between a failed claim and probing the rendezvous identity.
    pub discovery_delay: Duration,
    pub retry_base_delay: Duration,
    pub retry_step: Duration,
    pub retry_cooldown: Duration,
    /// Delay before re-election after the probe itself fails.
    pub discovery_failure_delay: Duration,
    /// Delay before re-election after lobby-full on the direct link.
    pub host_rejected_delay: Duration,
    /// Delay before re-election after a reset.
    pub reset_delay: Duration,
    pub sweep_interval: Duration,
    /// Minimum interval between player-state broadcasts.
    pub state_sync_interval: Duration,
    /// Minimum interval between terrain-delta broadcasts.
    pub terrain_sync_interval: Duration,
    /// Give up on a join that has not seen host-ready in this long.
    /// `None` waits indefinitely.
    pub join_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rendezvous_id: PeerId::from(DEFAULT_RENDEZVOUS_ID),
            lobby_size: 2,
            max_retries: 5,
            discovery_delay: Duration::from_secs(1),
            retry_base_delay: Duration::from_secs(2),
            retry_step: Duration::from_secs(3),
            retry_cooldown: Duration::from_secs(30),
            discovery_failure_delay: Duration::from_secs(3),
            host_rejected_delay: Duration::from_secs(1),
            reset_delay: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(5),
            state_sync_interval: Duration::from_millis(100),
            terrain_sync_interval: Duration::from_millis(100),
            join_timeout: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults, overridden by `RDV_RENDEZVOUS_ID` and `RDV_LOBBY_SIZE`
    /// when they are set. Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(id) = std::env::var("RDV_RENDEZVOUS_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
        {
            config.rendezvous_id = PeerId::from(id);
        }
        match std::env::var("RDV_LOBBY_SIZE").map(|s| s.parse::<usize>()) {
            Ok(Ok(size)) => config.lobby_size = size,
            Ok(Err(e)) => tracing::warn!("ignoring RDV_LOBBY_SIZE: {e}"),
            Err(_) => {}
        }
        config
    }

    /// Set the rendezvous identity.
    pub fn rendezvous_id(mut self, id: impl Into<PeerId>) -> Self {
        self.rendezvous_id = id.into();
        self
    }

    /// Set the lobby size (host included).
    pub fn lobby_size(mut self, size: usize) -> Self {
        self.lobby_size = size;
        self
    }

    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn join_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), LobbyError> {
        if self.lobby_size < 2 {
            return Err(LobbyError::Config(format!(
                "lobby_size must be at least 2, got {}",
                self.lobby_size
            )));
        }
        if self.rendezvous_id.is_empty() {
            return Err(LobbyError::Config("rendezvous_id must not be empty".into()));
        }
        if self.max_retries == 0 {
            return Err(LobbyError::Config("max_retries must be positive".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(LobbyError::Config("sweep_interval must be positive".into()));
        }
        Ok(())
    }

    pub(crate) fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            retry_base: self.retry_base_delay,
            retry_step: self.retry_step,
            cooldown: self.retry_cooldown,
            failure_delay: self.discovery_failure_delay,
            rejected_delay: self.host_rejected_delay,
        }
    }
}

// ── Role & membership ─────────────────────────────────────────────────

/// Where this process stands in lobby formation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Not initialized, or between attempts with nothing in flight.
    Idle,
    /// Claim on the rendezvous identity requested, outcome pending.
    Claiming,
    /// Lost the claim; probing or about to probe the rendezvous identity.
    Seeker,
    /// Direct link to a coordinator, join not yet answered.
    Joining,
    /// Admitted to a lobby that is not full yet.
    Waiting,
    /// Paired member of a full lobby.
    Member,
    Coordinator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Idle => "idle",
            Role::Claiming => "claiming",
            Role::Seeker => "seeker",
            Role::Joining => "joining",
            Role::Waiting => "waiting",
            Role::Member => "member",
            Role::Coordinator => "coordinator",
        }
    }
}

/// Membership as seen by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipSnapshot {
    pub role: Role,
    /// Group members other than this process.
    pub members: Vec<PeerId>,
    pub complete: bool,
    /// Players in the lobby, this process included (0 when not in one).
    pub current: usize,
    pub total: usize,
}

// ── Commands (app → runtime) ──────────────────────────────────────────

/// Commands the application sends to the runtime event loop.
#[derive(Debug)]
pub enum RuntimeCommand {
    SendChat {
        text: String,
        reply: oneshot::Sender<Result<ChatMessage, LobbyError>>,
    },
    BroadcastPlayerState { state: PlayerState },
    BroadcastTerrainChanges { changes: TerrainChanges },
    GetGroupMembers { reply: oneshot::Sender<Vec<PeerId>> },
    IsGroupComplete { reply: oneshot::Sender<bool> },
    GetSnapshot {
        reply: oneshot::Sender<MembershipSnapshot>,
    },
    /// Leave the current lobby and look for a new one.
    Reset,
    /// Graceful shutdown.
    Shutdown,
}

// ── Events (runtime → app) ───────────────────────────────────────────

/// Everything the runtime reports to the application observer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    StatusChanged(String),
    EventLogged(LogEntry),
    MembershipChanged(MembershipSnapshot),
    /// A chat envelope from another member.
    Message(Envelope),
    PlayerState {
        peer_id: PeerId,
        state: PlayerState,
    },
    TerrainChanges {
        peer_id: PeerId,
        changes: TerrainChanges,
    },
}

// ── RuntimeHandle (app-facing API) ───────────────────────────────────

/// Handle to communicate with a running ProtocolRuntime.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    local_id: PeerId,
}

impl RuntimeHandle {
    /// This process's identity.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Send a chat line to the group.
    ///
    /// Returns the message as sent when at least one link carried it.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<ChatMessage, LobbyError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(RuntimeCommand::SendChat {
                text: text.into(),
                reply: tx,
            })
            .await
            .map_err(|_| LobbyError::ShutDown)?;
        rx.await.map_err(|_| LobbyError::ShutDown)?
    }

    /// Broadcast our avatar state. Throttled; paired or hosting only.
    pub async fn broadcast_player_state(&self, state: PlayerState) -> Result<(), LobbyError> {
        self.cmd_tx
            .send(RuntimeCommand::BroadcastPlayerState { state })
            .await
            .map_err(|_| LobbyError::ShutDown)
    }

    /// Broadcast terrain changes. Throttled; paired or hosting only.
    pub async fn broadcast_terrain_changes(&self, changes: TerrainChanges) -> Result<(), LobbyError> {
        self.cmd_tx
            .send(RuntimeCommand::BroadcastTerrainChanges { changes })
            .await
            .map_err(|_| LobbyError::ShutDown)
    }

    /// Group members other than this process.
    pub async fn group_member_ids(&self) -> Result<Vec<PeerId>, LobbyError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(RuntimeCommand::GetGroupMembers { reply: tx })
            .await
            .map_err(|_| LobbyError::ShutDown)?;
        rx.await.map_err(|_| LobbyError::ShutDown)
    }

    pub async fn is_group_complete(&self) -> Result<bool, LobbyError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(RuntimeCommand::IsGroupComplete { reply: tx })
            .await
            .map_err(|_| LobbyError::ShutDown)?;
        rx.await.map_err(|_| LobbyError::ShutDown)
    }

    pub async fn snapshot(&self) -> Result<MembershipSnapshot, LobbyError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(RuntimeCommand::GetSnapshot { reply: tx })
            .await
            .map_err(|_| LobbyError::ShutDown)?;
        rx.await.map_err(|_| LobbyError::ShutDown)
    }

    /// Leave the current lobby and look for a new one.
    pub async fn reset(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::Reset).await;
    }

    /// Graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::Shutdown).await;
    }
}

// ── ProtocolRuntime ──────────────────────────────────────────────────

/// The protocol runtime: spawn it and talk to it through the handle.
pub struct ProtocolRuntime;

impl ProtocolRuntime {
    /// Validate `config` and spawn the event loop as a tokio task.
    ///
    /// Takes ownership of the transport. Events go to `observer`.
    pub fn spawn<T, O>(
        transport: T,
        local_id: PeerId,
        config: RuntimeConfig,
        observer: O,
    ) -> Result<RuntimeHandle, LobbyError>
    where
        T: Transport + 'static,
        O: LobbyObserver + 'static,
    {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<RuntimeCommand>(64);
        let state = RuntimeState::new(local_id.clone(), config, Arc::new(SystemClock));

        tokio::spawn(r#loop::runtime_loop(
            transport,
            state,
            cmd_rx,
            Box::new(observer),
        ));

        Ok(RuntimeHandle { cmd_tx, local_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rendezvous_id.as_str(), "NeonGameBootstrap-2025-001");
        assert_eq!(config.lobby_size, 2);
        assert_eq!(config.join_timeout, None);
    }

    #[test]
    fn test_lobby_size_below_two_rejected() {
        let err = RuntimeConfig::default().lobby_size(1).validate().unwrap_err();
        assert!(matches!(err, LobbyError::Config(_)));
    }

    #[test]
    fn test_blank_rendezvous_rejected() {
        let config = RuntimeConfig::default().rendezvous_id("   ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retries_rejected() {
        assert!(RuntimeConfig::default().max_retries(0).validate().is_err());
    }

    #[test]
    fn test_backoff_policy_mirrors_config() {
        let config = RuntimeConfig::default();
        let policy = config.backoff_policy();
        assert_eq!(policy.backoff(1), Duration::from_secs(5));
        assert_eq!(policy.cooldown, Duration::from_secs(30));
        assert_eq!(policy.rejected_delay, Duration::from_secs(1));
    }
}
