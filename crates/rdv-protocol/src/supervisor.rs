/// Reconnection supervisor: the periodic liveness sweep.
///
/// Pure decision function. The runtime gathers a [`SweepInput`] snapshot
/// every sweep interval and executes the returned [`SweepAction`]. This is
/// the only driver that re-enters election unconditionally, so a process
/// that falls out of every flow is always picked up again here.
use crate::runtime::Role;

/// Health of the link from a member (or joiner) to its coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    Open,
    /// Connect requested, not yet opened.
    Pending,
    /// Closed, failed, or never recorded.
    Lost,
}

/// Snapshot the sweep decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepInput {
    pub initialized: bool,
    pub role: Role,
    /// Member, waiting and joining roles only.
    pub coordinator_link: LinkHealth,
    /// Coordinator only.
    pub open_member_links: usize,
    /// Coordinator only: members other than the host.
    pub recorded_members: usize,
    /// A claim, probe or scheduled election/discovery is already in flight.
    pub in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    Nothing,
    /// Drop everything and start over.
    Reset,
    /// Coordinator has members whose link is gone; removal is left to the
    /// close handler.
    Degraded { open: usize, total: usize },
    Elect,
}

pub fn sweep(input: &SweepInput) -> SweepAction {
    if !input.initialized {
        return SweepAction::Nothing;
    }

    match input.role {
        Role::Member | Role::Waiting | Role::Joining => match input.coordinator_link {
            LinkHealth::Lost => SweepAction::Reset,
            LinkHealth::Open | LinkHealth::Pending => SweepAction::Nothing,
        },
        Role::Coordinator => {
            if input.open_member_links < input.recorded_members {
                SweepAction::Degraded {
                    open: input.open_member_links,
                    total: input.recorded_members,
                }
            } else {
                SweepAction::Nothing
            }
        }
        Role::Idle | Role::Seeker if !input.in_flight => SweepAction::Elect,
        Role::Idle | Role::Seeker | Role::Claiming => SweepAction::Nothing,
    }
}
