/// Coordinator election by identity exclusivity.
///
/// There is no voting: every process tries to open an endpoint under the
/// rendezvous identity, and the transport lets exactly one of them hold it.
/// This unit only tracks which claim attempt is current so that late
/// open/fail events from abandoned attempts can be told apart.
use rdv_transport::EndpointId;

use crate::types::PeerId;

#[derive(Debug, Clone, Copy)]
struct Claim {
    endpoint: EndpointId,
    held: bool,
}

/// Result of starting a new claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionStart {
    /// Endpoint to open under `identity`.
    pub endpoint: EndpointId,
    /// The rendezvous identity being claimed.
    pub identity: PeerId,
    /// Previous attempt, to be destroyed before opening the new one.
    pub abandoned: Option<EndpointId>,
}

/// What an `EndpointOpened` on a claim endpoint means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The current attempt now holds the rendezvous identity.
    Won,
    /// Not the current attempt (abandoned or already held); release it.
    Stale,
}

/// Tracks the process's claim on the rendezvous identity.
#[derive(Debug, Clone)]
pub struct ElectionUnit {
    rendezvous: PeerId,
    claim: Option<Claim>,
}

impl ElectionUnit {
    pub fn new(rendezvous: PeerId) -> Self {
        Self {
            rendezvous,
            claim: None,
        }
    }

    /// Start a fresh claim attempt, abandoning any previous one.
    pub fn begin(&mut self) -> ElectionStart {
        let abandoned = self.claim.take().map(|c| c.endpoint);
        let endpoint = EndpointId::new();
        self.claim = Some(Claim {
            endpoint,
            held: false,
        });
        ElectionStart {
            endpoint,
            identity: self.rendezvous.clone(),
            abandoned,
        }
    }

    pub fn on_opened(&mut self, endpoint: EndpointId) -> ClaimOutcome {
        match self.claim.as_mut() {
            Some(claim) if claim.endpoint == endpoint && !claim.held => {
                claim.held = true;
                ClaimOutcome::Won
            }
            _ => ClaimOutcome::Stale,
        }
    }

    /// The claim attempt on `endpoint` failed. Returns whether it was current.
    pub fn on_failed(&mut self, endpoint: EndpointId) -> bool {
        if self.owns(endpoint) {
            self.claim = None;
            true
        } else {
            false
        }
    }

    /// Drop the current claim (held or pending), returning its endpoint.
    pub fn release(&mut self) -> Option<EndpointId> {
        self.claim.take().map(|c| c.endpoint)
    }

    /// Whether `endpoint` is the current claim attempt.
    pub fn owns(&self, endpoint: EndpointId) -> bool {
        self.claim.is_some_and(|c| c.endpoint == endpoint)
    }

    pub fn holds_claim(&self) -> bool {
        self.claim.is_some_and(|c| c.held)
    }

    /// A claim has been requested and its outcome is not yet known.
    pub fn is_pending(&self) -> bool {
        self.claim.is_some_and(|c| !c.held)
    }
}

// ── RetryState ───────────────────────────────────────────────────────────

/// What to do after a lobby-full rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry with backoff; `attempt` is the post-increment count.
    Backoff { attempt: u32 },
    /// Retry budget exhausted; the count was reset and a long cooldown applies.
    Cooldown,
}

/// Consecutive lobby-full rejections seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    count: u32,
    max: u32,
}

impl RetryState {
    pub fn new(max: u32) -> Self {
        Self { count: 0, max }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn record_rejection(&mut self) -> RetryDecision {
        self.count += 1;
        if self.count < self.max {
            RetryDecision::Backoff {
                attempt: self.count,
            }
        } else {
            self.count = 0;
            RetryDecision::Cooldown
        }
    }

    /// Called on any successful join or election.
    pub fn reset(&mut self) {
        self.count = 0;
    }
}
