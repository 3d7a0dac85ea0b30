use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an entity in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.8}", &self.0.to_string()[..8])
    }
}

/// Identifier for an actor (a player or other user) that can own or notify
/// a position. Actors are only ever referenced by id, never held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub Uuid);

impl ActorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actor:{:.8}", &self.0.to_string()[..8])
    }
}

/// Integer grid position of a block.
///
/// Ordered (x, y, z) so it can key BTreeMaps with deterministic iteration.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Offset this position by a delta.
    pub fn offset(self, delta: IVec3) -> Self {
        Self::from(IVec3::from(self) + delta)
    }

    pub fn up(self) -> Self {
        self.offset(IVec3::Y)
    }

    pub fn down(self) -> Self {
        self.offset(IVec3::NEG_Y)
    }

    /// The six face-adjacent neighbours, in a fixed order (W, E, down, up, N, S).
    pub fn neighbors(self) -> [BlockPos; 6] {
        [
            self.offset(IVec3::NEG_X),
            self.offset(IVec3::X),
            self.offset(IVec3::NEG_Y),
            self.offset(IVec3::Y),
            self.offset(IVec3::NEG_Z),
            self.offset(IVec3::Z),
        ]
    }

    /// World-space centre of the block, used to place dropped items.
    pub fn center(self) -> Vec3 {
        IVec3::from(self).as_vec3() + Vec3::splat(0.5)
    }
}

impl From<IVec3> for BlockPos {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<BlockPos> for IVec3 {
    fn from(p: BlockPos) -> Self {
        IVec3::new(p.x, p.y, p.z)
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Flags describing how a block change should be propagated once applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeFlag {
    /// Notify neighbouring positions so they can react.
    pub notify_neighbors: bool,
    /// Run the block's own "added"/"removed" callbacks.
    pub perform_block_physics: bool,
    /// Send the change to observers.
    pub update_clients: bool,
}

impl ChangeFlag {
    pub const ALL: Self = Self {
        notify_neighbors: true,
        perform_block_physics: true,
        update_clients: true,
    };

    pub const NONE: Self = Self {
        notify_neighbors: false,
        perform_block_physics: false,
        update_clients: false,
    };

    /// Used when restoring an original value: observers see it, nothing reacts.
    pub const RESTORE: Self = Self {
        notify_neighbors: false,
        perform_block_physics: false,
        update_clients: true,
    };

    /// Whether applying a change with these flags lets the world react to it.
    pub fn triggers_reactions(self) -> bool {
        self.notify_neighbors || self.perform_block_physics
    }
}

impl Default for ChangeFlag {
    fn default() -> Self {
        Self::ALL
    }
}
