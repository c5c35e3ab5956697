use std::time::Duration;

use rdv_transport::{ConnectionId, EndpointId, PeerId};

use crate::envelope::Envelope;

use super::timer::TimerKind;
use super::ProtocolEvent;

/// Intent produced by the pure logic in `RuntimeState`.
///
/// Every `handle_*` method returns `Vec<RuntimeEffect>`; the loop then
/// executes them against the transport, the timers and the observer, in
/// order.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEffect {
    /// Open an endpoint under an identity (own identity or a claim).
    OpenEndpoint {
        endpoint: EndpointId,
        identity: PeerId,
    },

    /// Tear down an endpoint, releasing its identity.
    DestroyEndpoint(EndpointId),

    /// Open an outbound connection from `from` to `to`.
    Connect {
        conn: ConnectionId,
        from: EndpointId,
        to: PeerId,
    },

    /// Send an envelope on one connection.
    Send {
        conn: ConnectionId,
        envelope: Envelope,
    },

    Close(ConnectionId),

    /// Arm a timer, replacing any pending timer of the same kind.
    ScheduleTimer { kind: TimerKind, after: Duration },

    CancelTimer(TimerKind),

    /// Notify the application observer.
    Emit(ProtocolEvent),

    /// Log how many sends since the previous report the transport accepted,
    /// as a relay of an envelope from `from`.
    ReportRelay { from: PeerId },
}
