/// Star relay for application envelopes.
///
/// The coordinator fans an envelope out to every member link except the
/// one it came from; a member never relays and only ever sends to its
/// coordinator. Planning is pure: the caller supplies link liveness and
/// executes the resulting deliveries. Delivery is best-effort, at most once.
use rdv_transport::ConnectionId;

use crate::types::PeerId;

/// One send to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub peer: PeerId,
    pub conn: ConnectionId,
}

/// Outcome of planning a relay or broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayPlan {
    pub deliveries: Vec<Delivery>,
    /// Members whose link was not open; logged, never fatal.
    pub skipped: Vec<PeerId>,
}

impl RelayPlan {
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    pub fn sent_count(&self) -> usize {
        self.deliveries.len()
    }
}

/// Coordinator fan-out to `members`, skipping `exclude`.
pub fn relay<I>(members: I, exclude: Option<&PeerId>, is_open: impl Fn(ConnectionId) -> bool) -> RelayPlan
where
    I: IntoIterator<Item = (PeerId, ConnectionId)>,
{
    let mut plan = RelayPlan::default();
    for (peer, conn) in members {
        if Some(&peer) == exclude {
            continue;
        }
        if is_open(conn) {
            plan.deliveries.push(Delivery { peer, conn });
        } else {
            plan.skipped.push(peer);
        }
    }
    plan
}

/// Relay with no exclusion.
pub fn broadcast<I>(members: I, is_open: impl Fn(ConnectionId) -> bool) -> RelayPlan
where
    I: IntoIterator<Item = (PeerId, ConnectionId)>,
{
    relay(members, None, is_open)
}

/// Member-side send: the coordinator link only.
pub fn to_coordinator(
    coordinator: &PeerId,
    link: Option<ConnectionId>,
    is_open: impl Fn(ConnectionId) -> bool,
) -> RelayPlan {
    relay(
        link.map(|conn| (coordinator.clone(), conn)),
        None,
        is_open,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn peer(s: &str) -> PeerId {
        PeerId::from(s)
    }

    fn members(n: usize) -> Vec<(PeerId, ConnectionId)> {
        (0..n)
            .map(|i| (peer(&format!("m{i}")), ConnectionId::new()))
            .collect()
    }

    #[test]
    fn relay_excludes_sender() {
        let m = members(3);
        let plan = relay(m.clone(), Some(&peer("m1")), |_| true);
        let peers: Vec<_> = plan.deliveries.iter().map(|d| d.peer.clone()).collect();
        assert_eq!(peers, vec![peer("m0"), peer("m2")]);
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn closed_links_are_skipped_not_fatal() {
        let m = members(3);
        let closed: HashSet<ConnectionId> = [m[0].1].into_iter().collect();
        let plan = broadcast(m.clone(), |c| !closed.contains(&c));
        assert_eq!(plan.sent_count(), 2);
        assert_eq!(plan.skipped, vec![peer("m0")]);
    }

    #[test]
    fn member_sends_only_to_coordinator() {
        let link = ConnectionId::new();
        let plan = to_coordinator(&peer("A"), Some(link), |_| true);
        assert_eq!(
            plan.deliveries,
            vec![Delivery {
                peer: peer("A"),
                conn: link
            }]
        );

        let plan = to_coordinator(&peer("A"), None, |_| true);
        assert!(plan.is_empty());
    }

    #[test]
    fn broadcast_with_no_members_is_empty() {
        let plan = broadcast(Vec::new(), |_| true);
        assert!(plan.is_empty());
        assert_eq!(plan.sent_count(), 0);
    }
}
