use indexmap::IndexMap;

use phasetrack_common::{BlockChange, BlockEntity, BlockPos, BlockSnapshot, BlockState, ChangeFlag};

use crate::capture::CaptureBuffer;

/// A captured change: what a position held before, and what is proposed.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockTransaction {
    pub original: BlockSnapshot,
    /// Proposed value, carrying the linked secondary object if one was set.
    pub new: BlockSnapshot,
    pub flags: ChangeFlag,
    pub change: BlockChange,
    /// Whether a secondary-object write was linked to this change.
    pub block_entity_changed: bool,
    /// Cleared when a listener rejects this change.
    pub valid: bool,
}

impl BlockTransaction {
    pub fn new(original: BlockSnapshot, state: BlockState, flags: ChangeFlag) -> Self {
        let change = BlockChange::classify(original.state, state);
        let new = BlockSnapshot::new(original.pos, state)
            .with_block_entity(original.block_entity.clone());
        Self {
            original,
            new,
            flags,
            change,
            block_entity_changed: false,
            valid: true,
        }
    }

    pub fn pos(&self) -> BlockPos {
        self.original.pos
    }
}

/// Ordered log of captured block changes, one transaction per position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockLog {
    transactions: IndexMap<BlockPos, BlockTransaction>,
}

impl BlockLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change. A position captured twice keeps its first original
    /// snapshot and its place in the log; only the proposed value moves.
    pub fn capture(
        &mut self,
        original: BlockSnapshot,
        state: BlockState,
        flags: ChangeFlag,
    ) -> &mut BlockTransaction {
        let tx = self
            .transactions
            .entry(original.pos)
            .or_insert_with(|| BlockTransaction::new(original, state, flags));
        tx.new.state = state;
        tx.flags = flags;
        tx.change = BlockChange::classify(tx.original.state, state);
        tx
    }

    /// Attach a secondary-object write to the pending change at `pos`.
    /// Returns false if nothing is pending there.
    pub fn link_block_entity(&mut self, pos: BlockPos, block_entity: Option<BlockEntity>) -> bool {
        match self.transactions.get_mut(&pos) {
            Some(tx) => {
                tx.new.block_entity = block_entity;
                tx.block_entity_changed = true;
                true
            }
            None => false,
        }
    }

    pub fn pending(&self, pos: BlockPos) -> Option<&BlockTransaction> {
        self.transactions.get(&pos)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockTransaction> {
        self.transactions.values()
    }

    pub fn originals(&self) -> impl Iterator<Item = &BlockSnapshot> {
        self.transactions.values().map(|tx| &tx.original)
    }

    pub fn into_transactions(self) -> Vec<BlockTransaction> {
        self.transactions.into_values().collect()
    }
}

impl CaptureBuffer for BlockLog {
    fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    fn len(&self) -> usize {
        self.transactions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STONE: BlockState = BlockState(1);
    const DIRT: BlockState = BlockState(2);

    #[test]
    fn recapture_keeps_original_and_order() {
        let a = BlockPos::new(0, 0, 0);
        let b = BlockPos::new(1, 0, 0);
        let mut log = BlockLog::new();
        log.capture(BlockSnapshot::new(a, BlockState::AIR), STONE, ChangeFlag::ALL);
        log.capture(BlockSnapshot::new(b, BlockState::AIR), STONE, ChangeFlag::ALL);
        log.capture(BlockSnapshot::new(a, STONE), DIRT, ChangeFlag::NONE);

        let txs = log.into_transactions();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].pos(), a);
        assert_eq!(txs[0].original.state, BlockState::AIR);
        assert_eq!(txs[0].new.state, DIRT);
        assert_eq!(txs[0].change, BlockChange::Place);
        assert_eq!(txs[0].flags, ChangeFlag::NONE);
    }

    #[test]
    fn block_entity_links_only_to_pending_change() {
        let pos = BlockPos::new(0, 1, 0);
        let mut log = BlockLog::new();
        assert!(!log.link_block_entity(pos, Some(BlockEntity::new("chest"))));

        log.capture(BlockSnapshot::new(pos, BlockState::AIR), STONE, ChangeFlag::ALL);
        assert!(log.link_block_entity(pos, Some(BlockEntity::new("chest"))));
        let tx = log.pending(pos).unwrap();
        assert!(tx.block_entity_changed);
        assert_eq!(tx.new.block_entity.as_ref().map(|b| b.kind.as_str()), Some("chest"));
        assert!(tx.original.block_entity.is_none());
    }
}
