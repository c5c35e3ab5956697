use rdv_transport::ConnectionId;

use crate::types::PeerId;

/// Member-side mirror of the lobby, pushed by the coordinator's host-ready.
///
/// Read-only once built. A reset drops it entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientView {
    partner: PeerId,
    other_members: Vec<PeerId>,
    link: ConnectionId,
    paired: bool,
}

impl ClientView {
    /// Build the view from a host-ready notice received on `link`.
    ///
    /// `other_members` keeps the coordinator's ordering and drops both the
    /// local process and the coordinator itself.
    pub fn from_host_ready(
        local_id: &PeerId,
        host_id: PeerId,
        all_players: &[PeerId],
        link: ConnectionId,
    ) -> Self {
        let mut other_members: Vec<PeerId> = Vec::with_capacity(all_players.len());
        for p in all_players {
            if p != local_id && *p != host_id && !other_members.contains(p) {
                other_members.push(p.clone());
            }
        }
        Self {
            partner: host_id,
            other_members,
            link,
            paired: true,
        }
    }

    /// The coordinator.
    pub fn partner(&self) -> &PeerId {
        &self.partner
    }

    pub fn other_members(&self) -> &[PeerId] {
        &self.other_members
    }

    pub fn link(&self) -> ConnectionId {
        self.link
    }

    pub fn is_paired(&self) -> bool {
        self.paired
    }

    /// Every group member except the local process, coordinator first.
    pub fn group_member_ids(&self) -> Vec<PeerId> {
        std::iter::once(self.partner.clone())
            .chain(self.other_members.iter().cloned())
            .collect()
    }
}
