//! Causation stack: who and what is responsible for the mutations happening
//! right now.
//!
//! Causes are pushed inside frames. Popping a frame restores both the cause
//! list and the context map to what they were when the frame was pushed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use phasetrack_common::{ActorId, BlockSnapshot, EntityId, ItemStack};

/// Why an entity appeared in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpawnType {
    Placement,
    Passive,
    Experience,
    Breeding,
    Projectile,
    DroppedItem,
    BlockSpawning,
    WorldGeneration,
    Plugin,
    Custom,
}

/// Well-known keys of the cause context map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContextKey {
    SpawnType,
    Owner,
    Notifier,
    Player,
    UsedItem,
    BlockHit,
    DamageSource,
    Populator,
}

/// A single cause or context value.
#[derive(Debug, Clone, PartialEq)]
pub enum CauseValue {
    Actor(ActorId),
    Entity(EntityId),
    Block(BlockSnapshot),
    Command(String),
    Plugin(String),
    Item(ItemStack),
    DamageSource(String),
    SpawnType(SpawnType),
    Text(String),
}

impl CauseValue {
    pub fn as_actor(&self) -> Option<ActorId> {
        match self {
            Self::Actor(id) => Some(*id),
            _ => None,
        }
    }
}

impl std::fmt::Display for CauseValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Actor(id) => write!(f, "{id}"),
            Self::Entity(id) => write!(f, "entity:{id}"),
            Self::Block(snapshot) => write!(f, "block:{snapshot}"),
            Self::Command(name) => write!(f, "command:{name}"),
            Self::Plugin(name) => write!(f, "plugin:{name}"),
            Self::Item(stack) => write!(f, "item:{stack}"),
            Self::DamageSource(name) => write!(f, "damage:{name}"),
            Self::SpawnType(t) => write!(f, "spawn:{t:?}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CauseError {
    #[error("cause frame {expected} popped, but the innermost frame is {actual}")]
    Unbalanced { expected: usize, actual: usize },
    #[error("cause frame {0} is not on the stack")]
    UnknownFrame(usize),
}

/// Handle returned by [`CauseStack::push_frame`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pushed cause frame must be popped"]
pub struct CauseFrame(usize);

impl CauseFrame {
    pub fn depth(&self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct FrameRecord {
    cause_len: usize,
    context: BTreeMap<ContextKey, CauseValue>,
}

/// Immutable snapshot of the current causes, attached to every event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cause {
    /// Most recently pushed first.
    pub causes: Vec<CauseValue>,
    pub context: BTreeMap<ContextKey, CauseValue>,
}

impl Cause {
    pub fn root(&self) -> Option<&CauseValue> {
        self.causes.first()
    }

    pub fn first_actor(&self) -> Option<ActorId> {
        self.causes.iter().find_map(CauseValue::as_actor)
    }

    pub fn context(&self, key: ContextKey) -> Option<&CauseValue> {
        self.context.get(&key)
    }

    pub fn spawn_type(&self) -> Option<SpawnType> {
        match self.context.get(&ContextKey::SpawnType) {
            Some(CauseValue::SpawnType(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn contains(&self, value: &CauseValue) -> bool {
        self.causes.contains(value)
    }
}

/// The causation-stack collaborator.
#[derive(Debug, Default)]
pub struct CauseStack {
    causes: Vec<CauseValue>,
    context: BTreeMap<ContextKey, CauseValue>,
    frames: Vec<FrameRecord>,
}

impl CauseStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a frame. Everything pushed after this is undone by the matching pop.
    pub fn push_frame(&mut self) -> CauseFrame {
        self.frames.push(FrameRecord {
            cause_len: self.causes.len(),
            context: self.context.clone(),
        });
        CauseFrame(self.frames.len() - 1)
    }

    /// Close a frame. Frames pushed after it and never popped are closed too,
    /// and reported as an imbalance after the stack has been restored.
    pub fn pop_frame(&mut self, frame: CauseFrame) -> Result<(), CauseError> {
        let index = frame.0;
        if index >= self.frames.len() {
            return Err(CauseError::UnknownFrame(index));
        }
        let innermost = self.frames.len() - 1;
        let record = self.frames.swap_remove(index);
        self.frames.truncate(index);
        self.causes.truncate(record.cause_len);
        self.context = record.context;
        if innermost != index {
            tracing::warn!(
                expected = index,
                actual = innermost,
                "cause frames leaked by an inner scope were closed"
            );
            return Err(CauseError::Unbalanced {
                expected: index,
                actual: innermost,
            });
        }
        Ok(())
    }

    pub fn push_cause(&mut self, value: CauseValue) {
        self.causes.push(value);
    }

    pub fn pop_cause(&mut self) -> Option<CauseValue> {
        self.causes.pop()
    }

    /// Returns the previous value for the key, if any.
    pub fn add_context(&mut self, key: ContextKey, value: CauseValue) -> Option<CauseValue> {
        self.context.insert(key, value)
    }

    pub fn remove_context(&mut self, key: ContextKey) -> Option<CauseValue> {
        self.context.remove(&key)
    }

    pub fn context(&self, key: ContextKey) -> Option<&CauseValue> {
        self.context.get(&key)
    }

    /// Most recently pushed actor, if any.
    pub fn first_actor(&self) -> Option<ActorId> {
        self.causes.iter().rev().find_map(CauseValue::as_actor)
    }

    pub fn current_cause(&self) -> Cause {
        Cause {
            causes: self.causes.iter().rev().cloned().collect(),
            context: self.context.clone(),
        }
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn cause_count(&self) -> usize {
        self.causes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_restores_causes_and_context() {
        let mut stack = CauseStack::new();
        stack.push_cause(CauseValue::Text("root".into()));
        let frame = stack.push_frame();
        stack.push_cause(CauseValue::Plugin("test".into()));
        stack.add_context(ContextKey::SpawnType, CauseValue::SpawnType(SpawnType::Passive));
        assert_eq!(stack.cause_count(), 2);

        stack.pop_frame(frame).unwrap();
        assert_eq!(stack.cause_count(), 1);
        assert!(stack.context(ContextKey::SpawnType).is_none());
        assert_eq!(stack.frame_depth(), 0);
    }

    #[test]
    fn current_cause_is_most_recent_first() {
        let mut stack = CauseStack::new();
        let actor = ActorId::new();
        stack.push_cause(CauseValue::Text("root".into()));
        stack.push_cause(CauseValue::Actor(actor));
        let cause = stack.current_cause();
        assert_eq!(cause.root(), Some(&CauseValue::Actor(actor)));
        assert_eq!(cause.first_actor(), Some(actor));
    }

    #[test]
    fn leaked_inner_frames_are_closed() {
        let mut stack = CauseStack::new();
        let outer = stack.push_frame();
        stack.push_cause(CauseValue::Text("outer".into()));
        let _leaked = stack.push_frame();
        stack.push_cause(CauseValue::Text("inner".into()));

        let result = stack.pop_frame(outer);
        assert!(matches!(
            result,
            Err(CauseError::Unbalanced { expected: 0, actual: 1 })
        ));
        assert_eq!(stack.frame_depth(), 0);
        assert_eq!(stack.cause_count(), 0);
    }

    #[test]
    fn unknown_frame_is_rejected() {
        let mut stack = CauseStack::new();
        let frame = stack.push_frame();
        stack.pop_frame(frame).unwrap();
        assert!(matches!(
            stack.pop_frame(CauseFrame(0)),
            Err(CauseError::UnknownFrame(0))
        ));
    }
}
