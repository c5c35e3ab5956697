//! Effect executor: the only place that touches I/O.
//!
//! Takes a list of RuntimeEffect and executes them in order:
//! - OpenEndpoint / DestroyEndpoint / Connect / Close -> transport
//! - Send -> encode, then transport.send() (failures are logged, never fatal)
//! - ScheduleTimer / CancelTimer -> timers
//! - Emit / ReportRelay -> observer
//!
//! Returns how many sends the transport accepted, so callers can report
//! real deliveries rather than planned ones.

use super::effect::RuntimeEffect;
use super::observer::{notify, LobbyObserver, LogEntry, Severity};
use super::timer::TimerScheduler;
use super::transport::Transport;

/// Execute a list of effects against the given transport, timers and observer.
pub fn execute_effects<T, S>(
    effects: Vec<RuntimeEffect>,
    transport: &mut T,
    timers: &mut S,
    observer: &dyn LobbyObserver,
) -> usize
where
    T: Transport + ?Sized,
    S: TimerScheduler + ?Sized,
{
    let mut delivered = 0;
    let mut since_report = 0;
    for effect in effects {
        match effect {
            RuntimeEffect::OpenEndpoint { endpoint, identity } => {
                transport.open(endpoint, &identity);
            }
            RuntimeEffect::DestroyEndpoint(endpoint) => {
                transport.destroy(endpoint);
            }
            RuntimeEffect::Connect { conn, from, to } => {
                transport.connect(conn, from, &to);
            }
            RuntimeEffect::Send { conn, envelope } => {
                let kind = envelope.kind();
                if !transport.is_open(conn) {
                    tracing::debug!(%conn, %kind, "send skipped, connection not open");
                    observer.on_event_logged(&LogEntry::new(
                        Severity::Warn,
                        format!("[Send] Connection {conn} is not open, {kind} dropped"),
                    ));
                    continue;
                }
                match envelope.to_bytes() {
                    Ok(bytes) => match transport.send(conn, &bytes) {
                        Ok(()) => {
                            delivered += 1;
                            since_report += 1;
                        }
                        Err(e) => {
                            tracing::warn!(%conn, %kind, "send failed: {e}");
                            observer.on_event_logged(&LogEntry::new(
                                Severity::Error,
                                format!("[Send] Failed to send {kind} on {conn}: {e}"),
                            ));
                        }
                    },
                    Err(e) => {
                        tracing::warn!(%kind, "serialize envelope failed: {e}");
                        observer.on_event_logged(&LogEntry::new(
                            Severity::Error,
                            format!("[Send] Could not encode {kind}: {e}"),
                        ));
                    }
                }
            }
            RuntimeEffect::Close(conn) => {
                transport.close(conn);
            }
            RuntimeEffect::ScheduleTimer { kind, after } => {
                timers.schedule(kind, after);
            }
            RuntimeEffect::CancelTimer(kind) => {
                timers.cancel(kind);
            }
            RuntimeEffect::Emit(event) => {
                notify(observer, &event);
            }
            RuntimeEffect::ReportRelay { from } => {
                let message = format!("[Host-Relay] Message from {from} relayed to {since_report} clients");
                tracing::info!("{message}");
                observer.on_event_logged(&LogEntry::new(Severity::Info, message));
                since_report = 0;
            }
        }
    }
    delivered
}
