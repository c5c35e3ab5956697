use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use rdv_transport::PeerId;

/// Rendezvous identity used when nothing else is configured.
pub const DEFAULT_RENDEZVOUS_ID: &str = "NeonGameBootstrap-2025-001";

/// Prefix for randomly generated process identities.
pub const DEFAULT_PEER_PREFIX: &str = "ChainNode";

/// Outbound terrain deltas carry at most this many cells per list.
pub const MAX_TERRAIN_CHANGES: usize = 50;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Snapshot of one player's avatar, broadcast at a throttled rate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub position: Vec3,
    pub rotation: Vec3,
    pub surge_active: bool,
}

/// One terrain plane, addressed by its grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCell {
    pub grid_x: i32,
    pub grid_z: i32,
}

impl GridCell {
    pub const fn new(grid_x: i32, grid_z: i32) -> Self {
        Self { grid_x, grid_z }
    }
}

/// Terrain planes generated and removed since the last delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerrainChanges {
    pub new_planes: Vec<GridCell>,
    pub removed_planes: Vec<GridCell>,
}

impl TerrainChanges {
    pub fn is_empty(&self) -> bool {
        self.new_planes.is_empty() && self.removed_planes.is_empty()
    }

    /// Keep at most `max` entries in each list.
    pub fn truncated(mut self, max: usize) -> Self {
        self.new_planes.truncate(max);
        self.removed_planes.truncate(max);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_after_2024() {
        assert!(now_ms() > 1_704_067_200_000);
    }

    #[test]
    fn test_terrain_truncation_caps_each_list() {
        let cells: Vec<GridCell> = (0..80).map(|i| GridCell::new(i, -i)).collect();
        let changes = TerrainChanges {
            new_planes: cells.clone(),
            removed_planes: cells[..10].to_vec(),
        }
        .truncated(MAX_TERRAIN_CHANGES);

        assert_eq!(changes.new_planes.len(), 50);
        assert_eq!(changes.removed_planes.len(), 10);
        assert_eq!(changes.new_planes[49], GridCell::new(49, -49));
    }

    #[test]
    fn test_player_state_roundtrip_msgpack() {
        let state = PlayerState {
            position: Vec3::new(1.5, 0.0, -3.25),
            rotation: Vec3::new(0.0, 1.0, 0.0),
            surge_active: true,
        };
        let bytes = rmp_serde::to_vec(&state).expect("serialize");
        let decoded: PlayerState = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(decoded, state);
    }
}
