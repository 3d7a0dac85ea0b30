//! Depth-first replay of captured block changes.
//!
//! A batch is published as one change event. Rejected changes are restored
//! to their originals; accepted ones are applied in capture order. Whatever
//! applying a change captures is replayed before the next change in the
//! batch, so a cascade A -> (B -> B1, B2), C lands as A, B, B1, B2, C.

use std::collections::HashMap;

use phasetrack_common::BlockPos;

use crate::error::PhaseError;
use crate::event::Event;
use crate::transaction::{BlockLog, BlockTransaction};
use crate::unwind::Unwinder;

impl Unwinder<'_, '_> {
    /// Replay the frame's captured block changes. Returns false if any change
    /// in the top-level batch was rejected.
    pub fn process_block_captures(&mut self) -> Result<bool, PhaseError> {
        self.process_block_pass(0)
    }

    fn process_block_pass(&mut self, depth: usize) -> Result<bool, PhaseError> {
        match self.context_mut().take_blocks() {
            Some(log) => self.replay(log, depth),
            None => Ok(true),
        }
    }

    pub(crate) fn replay(&mut self, log: BlockLog, depth: usize) -> Result<bool, PhaseError> {
        if depth > self.tracker.config().max_block_processing_depth {
            self.apply_untracked(log)?;
            return Ok(true);
        }

        let state = self.state();
        let mut transactions = log.into_transactions();
        let per_change = state.has_specific_block_process(self.context());
        let mut event = Event::change_block(self.host.causes.current_cause(), &transactions, per_change);
        self.host.events.post(&mut event)?;

        let cancelled = event.is_cancelled();
        if let Event::ChangeBlock(change) = &event {
            // Listeners may drop or reorder entries; anything missing is rejected.
            let verdicts: HashMap<BlockPos, bool> = change
                .transactions
                .iter()
                .map(|seen| (seen.original.pos, seen.valid))
                .collect();
            for tx in &mut transactions {
                tx.valid = verdicts.get(&tx.pos()).copied().unwrap_or(false);
            }
        }
        if cancelled {
            for tx in &mut transactions {
                tx.valid = false;
            }
        }
        let all_accepted = transactions.iter().all(|tx| tx.valid);
        tracing::trace!(
            phase = self.kind().name(),
            depth,
            changes = transactions.len(),
            cancelled,
            "replaying block batch"
        );

        for tx in transactions.iter().rev().filter(|tx| !tx.valid) {
            self.host.world.restore(&tx.original)?;
            state.process_cancelled_transaction(self.context(), tx);
        }

        for tx in transactions.iter().filter(|tx| tx.valid) {
            self.apply_transaction(tx, per_change)?;
            if self.nested_passes {
                self.process_block_pass(depth + 1)?;
            }
        }
        Ok(all_accepted)
    }

    fn apply_transaction(&mut self, tx: &BlockTransaction, per_change: bool) -> Result<(), PhaseError> {
        let pos = tx.pos();
        self.host.world.set_block(pos, tx.new.state, tx.flags)?;
        if tx.block_entity_changed {
            self.host.world.set_block_entity(pos, tx.new.block_entity.clone())?;
        }
        self.processed.push(tx.original.clone());

        let state = self.state();
        let ctx = &self.tracker.frames[self.frame].context;
        state.post_block_transaction_application(ctx, tx, &mut *self.host.world, &*self.host.causes)?;
        if per_change {
            state.post_process_specific_change(ctx, tx, &mut *self.host.world)?;
        }

        if tx.flags.triggers_reactions() {
            let follow_ups = self.host.world.react_to_change(&tx.original, &tx.new, tx.flags)?;
            for mutation in follow_ups {
                self.tracker.apply_mutation(self.host, mutation)?;
            }
        }
        Ok(())
    }

    /// Past the depth limit: write what is left with no events and no reactions.
    fn apply_untracked(&mut self, log: BlockLog) -> Result<(), PhaseError> {
        if !self.overflowed {
            self.overflowed = true;
            let kind = self.kind();
            self.tracker.report_depth_overflow(Some(kind));
        }
        for tx in log.into_transactions() {
            self.host.world.set_block(tx.pos(), tx.new.state, tx.flags)?;
            if tx.block_entity_changed {
                self.host.world.set_block_entity(tx.pos(), tx.new.block_entity)?;
            }
        }
        Ok(())
    }
}
