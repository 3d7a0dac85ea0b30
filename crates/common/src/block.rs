use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::BlockPos;

/// The value stored at a block position. `0` is air.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BlockState(pub u16);

impl BlockState {
    pub const AIR: Self = Self(0);

    pub fn is_air(self) -> bool {
        self == Self::AIR
    }
}

impl std::fmt::Display for BlockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_air() {
            f.write_str("air")
        } else {
            write!(f, "block#{}", self.0)
        }
    }
}

/// Secondary object attached to a position (chests, signs, spawners...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntity {
    pub kind: String,
    pub data: BTreeMap<String, String>,
}

impl BlockEntity {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Immutable copy of everything stored at a position at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub pos: BlockPos,
    pub state: BlockState,
    pub block_entity: Option<BlockEntity>,
}

impl BlockSnapshot {
    pub fn new(pos: BlockPos, state: BlockState) -> Self {
        Self {
            pos,
            state,
            block_entity: None,
        }
    }

    pub fn with_block_entity(mut self, block_entity: Option<BlockEntity>) -> Self {
        self.block_entity = block_entity;
        self
    }
}

impl std::fmt::Display for BlockSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.state, self.pos)?;
        if let Some(be) = &self.block_entity {
            write!(f, "[{}]", be.kind)?;
        }
        Ok(())
    }
}

/// Classification of a block change by its before/after values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockChange {
    Place,
    Break,
    Modify,
}

impl BlockChange {
    pub fn classify(original: BlockState, new: BlockState) -> Self {
        match (original.is_air(), new.is_air()) {
            (true, false) => Self::Place,
            (false, true) => Self::Break,
            _ => Self::Modify,
        }
    }
}
