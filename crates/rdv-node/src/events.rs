use std::io::Write;

use serde::Serialize;

/// Emit a JSONL event to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

// ── Process lifecycle ───────────────────────────────────────────

#[derive(Serialize)]
pub struct EventSpawned {
    pub event: &'static str,
    pub peer: String,
    pub elapsed_s: f64,
}

impl EventSpawned {
    pub fn new(peer: &str, elapsed_s: f64) -> Self {
        Self {
            event: "spawned",
            peer: peer.to_string(),
            elapsed_s,
        }
    }
}

#[derive(Serialize)]
pub struct EventKilled {
    pub event: &'static str,
    pub peer: String,
    pub role: String,
    pub elapsed_s: f64,
}

// ── Protocol events ─────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStatus {
    pub event: &'static str,
    pub peer: String,
    pub status: String,
    pub elapsed_s: f64,
}

#[derive(Serialize)]
pub struct EventLog {
    pub event: &'static str,
    pub peer: String,
    pub severity: String,
    pub message: String,
    pub elapsed_s: f64,
}

#[derive(Serialize)]
pub struct EventMembership {
    pub event: &'static str,
    pub peer: String,
    pub role: String,
    pub members: Vec<String>,
    pub current: usize,
    pub total: usize,
    pub complete: bool,
    pub elapsed_s: f64,
}

#[derive(Serialize)]
pub struct EventChat {
    pub event: &'static str,
    pub peer: String,
    pub from: String,
    pub text: String,
    pub elapsed_s: f64,
}

#[derive(Serialize)]
pub struct EventPlayerState {
    pub event: &'static str,
    pub peer: String,
    pub from: String,
    pub x: f32,
    pub z: f32,
    pub elapsed_s: f64,
}

// ── Application actions ─────────────────────────────────────────

#[derive(Serialize)]
pub struct EventChatSent {
    pub event: &'static str,
    pub peer: String,
    pub ok: bool,
    pub id: Option<String>,
    pub error: Option<String>,
    pub elapsed_s: f64,
}

// ── Summary ─────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventSummary {
    pub event: &'static str,
    pub processes: usize,
    pub coordinators: usize,
    pub complete: usize,
    pub unpaired: Vec<String>,
    pub chats_sent: u64,
    pub chats_failed: u64,
    pub chats_received: u64,
    pub killed: u64,
    pub elapsed_s: f64,
}
