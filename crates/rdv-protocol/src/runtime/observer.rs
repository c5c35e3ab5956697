/// Application-facing observer.
///
/// Registered once when the runtime is built. Every method has a no-op
/// default so an application implements only what it renders.
use std::fmt;

use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::types::{PeerId, PlayerState, TerrainChanges};

use super::{MembershipSnapshot, ProtocolEvent};

/// Severity of a human-readable event-feed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        })
    }
}

/// One line of the event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
}

impl LogEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

pub trait LobbyObserver: Send {
    fn on_status_changed(&self, _status: &str) {}

    fn on_event_logged(&self, _entry: &LogEntry) {}

    fn on_membership_changed(&self, _snapshot: &MembershipSnapshot) {}

    /// A chat envelope addressed to the group (never our own).
    fn on_message(&self, _envelope: &Envelope) {}

    fn on_player_state(&self, _peer: &PeerId, _state: &PlayerState) {}

    fn on_terrain_changes(&self, _peer: &PeerId, _changes: &TerrainChanges) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl LobbyObserver for NoopObserver {}

/// Observer that forwards every event on an mpsc channel.
///
/// Uses `try_send`: a slow consumer loses events rather than stalling the
/// runtime.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::Sender<ProtocolEvent>,
}

impl ChannelObserver {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ProtocolEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    fn forward(&self, event: ProtocolEvent) {
        if self.tx.try_send(event).is_err() {
            tracing::trace!("observer channel full or closed, event dropped");
        }
    }
}

impl LobbyObserver for ChannelObserver {
    fn on_status_changed(&self, status: &str) {
        self.forward(ProtocolEvent::StatusChanged(status.to_string()));
    }

    fn on_event_logged(&self, entry: &LogEntry) {
        self.forward(ProtocolEvent::EventLogged(entry.clone()));
    }

    fn on_membership_changed(&self, snapshot: &MembershipSnapshot) {
        self.forward(ProtocolEvent::MembershipChanged(snapshot.clone()));
    }

    fn on_message(&self, envelope: &Envelope) {
        self.forward(ProtocolEvent::Message(envelope.clone()));
    }

    fn on_player_state(&self, peer: &PeerId, state: &PlayerState) {
        self.forward(ProtocolEvent::PlayerState {
            peer_id: peer.clone(),
            state: state.clone(),
        });
    }

    fn on_terrain_changes(&self, peer: &PeerId, changes: &TerrainChanges) {
        self.forward(ProtocolEvent::TerrainChanges {
            peer_id: peer.clone(),
            changes: changes.clone(),
        });
    }
}

/// Route one event to the matching observer method.
pub fn notify(observer: &dyn LobbyObserver, event: &ProtocolEvent) {
    match event {
        ProtocolEvent::StatusChanged(status) => observer.on_status_changed(status),
        ProtocolEvent::EventLogged(entry) => observer.on_event_logged(entry),
        ProtocolEvent::MembershipChanged(snapshot) => observer.on_membership_changed(snapshot),
        ProtocolEvent::Message(envelope) => observer.on_message(envelope),
        ProtocolEvent::PlayerState { peer_id, state } => observer.on_player_state(peer_id, state),
        ProtocolEvent::TerrainChanges { peer_id, changes } => {
            observer.on_terrain_changes(peer_id, changes)
        }
    }
}
