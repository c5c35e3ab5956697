/// The protocol runtime event loop.
///
/// A single async task that owns the [`RuntimeState`] and multiplexes over
/// transport events, timer expirations and application commands. Every
/// input becomes a list of effects, executed before the next input is read.
use tokio::sync::mpsc;

use super::executor::execute_effects;
use super::observer::LobbyObserver;
use super::state::RuntimeState;
use super::timer::TokioTimers;
use super::transport::Transport;
use super::RuntimeCommand;

pub(super) async fn runtime_loop<T: Transport>(
    mut transport: T,
    mut state: RuntimeState,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    observer: Box<dyn LobbyObserver>,
) {
    let mut timers = TokioTimers::new();

    let effects = state.start();
    execute_effects(effects, &mut transport, &mut timers, observer.as_ref());

    loop {
        tokio::select! {
            // ── 1. Transport ─────────────────────────────────────
            event = transport.next_event() => {
                let Some(event) = event else {
                    tracing::warn!(local_id = %state.local_id(), "transport closed, stopping runtime");
                    break;
                };
                let effects = state.handle_transport_event(event);
                execute_effects(effects, &mut transport, &mut timers, observer.as_ref());
            }

            // ── 2. Timers ────────────────────────────────────────
            Some(kind) = timers.next_expired(), if !timers.is_empty() => {
                tracing::trace!(?kind, "timer fired");
                let effects = state.handle_timer(kind);
                execute_effects(effects, &mut transport, &mut timers, observer.as_ref());
            }

            // ── 3. Application commands ──────────────────────────
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(RuntimeCommand::Shutdown) | None => {
                        tracing::info!(local_id = %state.local_id(), "runtime shutting down");
                        let effects = state.shutdown();
                        execute_effects(effects, &mut transport, &mut timers, observer.as_ref());
                        break;
                    }
                    Some(RuntimeCommand::SendChat { text, reply }) => {
                        let (planned, effects) = state.send_chat(&text);
                        let delivered = execute_effects(effects, &mut transport, &mut timers, observer.as_ref());
                        let result = match planned {
                            Ok(message) => {
                                let (result, effects) = state.chat_delivered(message, delivered);
                                execute_effects(effects, &mut transport, &mut timers, observer.as_ref());
                                result
                            }
                            Err(e) => Err(e),
                        };
                        let _ = reply.send(result);
                    }
                    Some(cmd) => {
                        let effects = state.handle_command(cmd);
                        execute_effects(effects, &mut transport, &mut timers, observer.as_ref());
                    }
                }
            }
        }
    }
}
