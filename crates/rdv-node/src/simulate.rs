/// Swarm simulation: N protocol runtimes on one `MemoryNetwork`.
///
/// Every runtime gets a `ChannelObserver`; a forwarder task per process
/// tags its events with the process identity and funnels them into one
/// channel, which the main loop renders as JSONL alongside the chat,
/// state-sync and churn drivers.
use std::time::{Duration, Instant};

use rand::Rng;
use rdv_protocol::{
    ChannelObserver, Payload, PeerId, PlayerState, ProtocolEvent, ProtocolRuntime, Role,
    RuntimeConfig, RuntimeHandle, Vec3,
};
use rdv_transport::MemoryNetwork;
use tokio::sync::mpsc;

use crate::events::{
    emit, EventChat, EventChatSent, EventKilled, EventLog, EventMembership, EventPlayerState,
    EventSpawned, EventStatus, EventSummary,
};

pub struct SimulateConfig {
    pub processes: usize,
    pub duration: Duration,
    pub prefix: String,
    pub chat_interval: Option<Duration>,
    pub state_interval: Option<Duration>,
    pub churn_interval: Option<Duration>,
    pub quiet: bool,
    pub runtime: RuntimeConfig,
}

#[derive(Default)]
struct Stats {
    chats_sent: u64,
    chats_failed: u64,
    chats_received: u64,
    killed: u64,
}

struct Swarm {
    network: MemoryNetwork,
    runtime: RuntimeConfig,
    prefix: String,
    handles: Vec<RuntimeHandle>,
    events_tx: mpsc::Sender<(PeerId, ProtocolEvent)>,
}

impl Swarm {
    fn spawn(&mut self, start: Instant) -> anyhow::Result<()> {
        let id = PeerId::random(&self.prefix);
        let (observer, mut rx) = ChannelObserver::new(1024);
        let handle = ProtocolRuntime::spawn(
            self.network.node(),
            id.clone(),
            self.runtime.clone(),
            observer,
        )?;

        let tx = self.events_tx.clone();
        let peer = id.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if tx.send((peer.clone(), event)).await.is_err() {
                    break;
                }
            }
        });

        emit(&EventSpawned::new(id.as_str(), elapsed(start)));
        self.handles.push(handle);
        Ok(())
    }

    fn pick(&self) -> Option<usize> {
        if self.handles.is_empty() {
            return None;
        }
        Some(rand::rng().random_range(0..self.handles.len()))
    }
}

pub async fn run(config: SimulateConfig, start: Instant) -> anyhow::Result<()> {
    let (events_tx, mut events_rx) = mpsc::channel::<(PeerId, ProtocolEvent)>(4096);
    let mut swarm = Swarm {
        network: MemoryNetwork::new(),
        runtime: config.runtime.clone(),
        prefix: config.prefix.clone(),
        handles: Vec::with_capacity(config.processes),
        events_tx,
    };
    let mut stats = Stats::default();

    for _ in 0..config.processes {
        swarm.spawn(start)?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Disabled drivers still need an interval to poll; their branch is guarded off.
    let idle = Duration::from_secs(3600);
    let mut chat_tick = tokio::time::interval(config.chat_interval.unwrap_or(idle));
    let mut state_tick = tokio::time::interval(config.state_interval.unwrap_or(idle));
    let mut churn_tick = tokio::time::interval(config.churn_interval.unwrap_or(idle));
    chat_tick.tick().await;
    state_tick.tick().await;
    churn_tick.tick().await;

    let deadline = tokio::time::sleep(config.duration);
    tokio::pin!(deadline);
    let mut chat_seq = 0u64;

    loop {
        tokio::select! {
            _ = &mut deadline => break,

            Some((peer, event)) = events_rx.recv() => {
                render(&peer, event, config.quiet, start, &mut stats);
            }

            _ = chat_tick.tick(), if config.chat_interval.is_some() => {
                let Some(idx) = swarm.pick() else { continue };
                let handle = &swarm.handles[idx];
                chat_seq += 1;
                let text = format!("hello #{chat_seq} from {}", handle.local_id());
                let (ok, id, error) = match handle.send_chat(text).await {
                    Ok(message) => {
                        stats.chats_sent += 1;
                        (true, Some(message.id), None)
                    }
                    Err(e) => {
                        stats.chats_failed += 1;
                        (false, None, Some(e.to_string()))
                    }
                };
                emit(&EventChatSent {
                    event: "chat_sent",
                    peer: handle.local_id().to_string(),
                    ok,
                    id,
                    error,
                    elapsed_s: elapsed(start),
                });
            }

            _ = state_tick.tick(), if config.state_interval.is_some() => {
                for handle in &swarm.handles {
                    let state = {
                        let mut rng = rand::rng();
                        PlayerState {
                            position: Vec3::new(
                                rng.random_range(-50.0..50.0),
                                0.0,
                                rng.random_range(-50.0..50.0),
                            ),
                            rotation: Vec3::default(),
                            surge_active: rng.random_bool(0.1),
                        }
                    };
                    if let Err(e) = handle.broadcast_player_state(state).await {
                        tracing::debug!(peer = %handle.local_id(), "player state not sent: {e}");
                    }
                }
            }

            _ = churn_tick.tick(), if config.churn_interval.is_some() => {
                let Some(idx) = swarm.pick() else { continue };
                let victim = swarm.handles.swap_remove(idx);
                let role = victim
                    .snapshot()
                    .await
                    .map(|s| s.role.as_str().to_string())
                    .unwrap_or_else(|_| "unknown".into());
                victim.shutdown().await;
                stats.killed += 1;
                emit(&EventKilled {
                    event: "killed",
                    peer: victim.local_id().to_string(),
                    role,
                    elapsed_s: elapsed(start),
                });
                swarm.spawn(start)?;
            }
        }
    }

    let mut coordinators = 0;
    let mut complete = 0;
    let mut unpaired = Vec::new();
    for handle in &swarm.handles {
        match handle.snapshot().await {
            Ok(snapshot) => {
                if snapshot.role == Role::Coordinator {
                    coordinators += 1;
                }
                if snapshot.complete {
                    complete += 1;
                } else {
                    unpaired.push(handle.local_id().to_string());
                }
            }
            Err(e) => {
                tracing::warn!(peer = %handle.local_id(), "no snapshot: {e}");
                unpaired.push(handle.local_id().to_string());
            }
        }
    }

    emit(&EventSummary {
        event: "summary",
        processes: swarm.handles.len(),
        coordinators,
        complete,
        unpaired,
        chats_sent: stats.chats_sent,
        chats_failed: stats.chats_failed,
        chats_received: stats.chats_received,
        killed: stats.killed,
        elapsed_s: elapsed(start),
    });

    for handle in &swarm.handles {
        handle.shutdown().await;
    }
    Ok(())
}

fn render(peer: &PeerId, event: ProtocolEvent, quiet: bool, start: Instant, stats: &mut Stats) {
    let peer_s = peer.to_string();
    match event {
        ProtocolEvent::StatusChanged(status) => emit(&EventStatus {
            event: "status",
            peer: peer_s,
            status,
            elapsed_s: elapsed(start),
        }),
        ProtocolEvent::EventLogged(entry) => {
            if !quiet {
                emit(&EventLog {
                    event: "log",
                    peer: peer_s,
                    severity: entry.severity.to_string(),
                    message: entry.message,
                    elapsed_s: elapsed(start),
                });
            }
        }
        ProtocolEvent::MembershipChanged(snapshot) => emit(&EventMembership {
            event: "membership",
            peer: peer_s,
            role: snapshot.role.as_str().to_string(),
            members: snapshot.members.iter().map(ToString::to_string).collect(),
            current: snapshot.current,
            total: snapshot.total,
            complete: snapshot.complete,
            elapsed_s: elapsed(start),
        }),
        ProtocolEvent::Message(envelope) => {
            stats.chats_received += 1;
            if let Payload::ChatMessage { messages, .. } = envelope.payload {
                for message in messages {
                    emit(&EventChat {
                        event: "chat",
                        peer: peer_s.clone(),
                        from: message.peer_id.to_string(),
                        text: message.text,
                        elapsed_s: elapsed(start),
                    });
                }
            }
        }
        ProtocolEvent::PlayerState { peer_id, state } => {
            if !quiet {
                emit(&EventPlayerState {
                    event: "player_state",
                    peer: peer_s,
                    from: peer_id.to_string(),
                    x: state.position.x,
                    z: state.position.z,
                    elapsed_s: elapsed(start),
                });
            }
        }
        ProtocolEvent::TerrainChanges { peer_id, changes } => {
            tracing::debug!(
                %peer,
                from = %peer_id,
                new = changes.new_planes.len(),
                removed = changes.removed_planes.len(),
                "terrain changes"
            );
        }
    }
}

fn elapsed(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}
