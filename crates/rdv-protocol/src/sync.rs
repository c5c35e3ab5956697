/// Sender-side throttling for player-state and terrain-delta broadcasts.
///
/// The relay and the authority never see throttling; a suppressed update
/// simply produces no envelope.
use std::collections::HashMap;
use std::time::Duration;

/// Throttled broadcast streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncKind {
    PlayerState,
    Terrain,
}

/// Minimum interval between broadcasts, tracked per kind.
#[derive(Debug, Clone)]
pub struct Throttle {
    state_interval_ms: u64,
    terrain_interval_ms: u64,
    last_sent: HashMap<SyncKind, u64>,
}

impl Throttle {
    pub fn new(state_interval: Duration, terrain_interval: Duration) -> Self {
        Self {
            state_interval_ms: state_interval.as_millis() as u64,
            terrain_interval_ms: terrain_interval.as_millis() as u64,
            last_sent: HashMap::new(),
        }
    }

    fn interval_ms(&self, kind: SyncKind) -> u64 {
        match kind {
            SyncKind::PlayerState => self.state_interval_ms,
            SyncKind::Terrain => self.terrain_interval_ms,
        }
    }

    /// Whether a `kind` broadcast may go out at `now_ms`. Records it if so.
    pub fn permit(&mut self, kind: SyncKind, now_ms: u64) -> bool {
        if let Some(&last) = self.last_sent.get(&kind) {
            if now_ms.saturating_sub(last) < self.interval_ms(kind) {
                return false;
            }
        }
        self.last_sent.insert(kind, now_ms);
        true
    }
}
