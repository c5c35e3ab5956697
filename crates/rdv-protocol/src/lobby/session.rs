use crate::types::PeerId;

/// Why an admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitError {
    Full,
    Duplicate,
}

/// Coordinator-owned lobby membership.
///
/// `members[0]` is always the host. The session never holds more than
/// `capacity` members, never holds a duplicate, and `is_full` always equals
/// `len == capacity`; every mutator re-establishes that before returning.
#[derive(Debug, Clone)]
pub struct LobbySession {
    members: Vec<PeerId>,
    capacity: usize,
    is_full: bool,
}

// Never empty: the host is always a member.
#[allow(clippy::len_without_is_empty)]
impl LobbySession {
    /// Seed a session with its host. A capacity of 1 is full immediately.
    pub fn new(host: PeerId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            members: vec![host],
            capacity,
            is_full: capacity == 1,
        }
    }

    pub fn host(&self) -> &PeerId {
        &self.members[0]
    }

    /// All members in join order, host first.
    pub fn members(&self) -> &[PeerId] {
        &self.members
    }

    /// Members other than the host.
    pub fn guests(&self) -> &[PeerId] {
        &self.members[1..]
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_full(&self) -> bool {
        self.is_full
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.members.len()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.members.contains(peer)
    }

    /// Append `peer`. Returns whether this admission filled the lobby.
    pub fn admit(&mut self, peer: PeerId) -> Result<bool, AdmitError> {
        if self.contains(&peer) {
            return Err(AdmitError::Duplicate);
        }
        if self.is_full {
            return Err(AdmitError::Full);
        }
        self.members.push(peer);
        self.is_full = self.members.len() == self.capacity;
        Ok(self.is_full)
    }

    /// Remove a non-host member. Returns whether it was present.
    pub fn remove(&mut self, peer: &PeerId) -> bool {
        let Some(pos) = self.members.iter().skip(1).position(|m| m == peer) else {
            return false;
        };
        self.members.remove(pos + 1);
        self.is_full = self.members.len() == self.capacity;
        true
    }
}
