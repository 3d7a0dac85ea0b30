//! Cancellable batched events and the bus they are posted on.

use phasetrack_common::{BlockChange, BlockSnapshot, Entity};

use crate::cause::{Cause, SpawnType};
use crate::transaction::BlockTransaction;

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("listener '{listener}' failed: {reason}")]
    Listener { listener: String, reason: String },
}

/// Why items are being dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropKind {
    /// Items released because something was destroyed.
    Destruct,
    Custom,
    /// Items dropped from a closed container.
    Close,
    Dispense,
}

/// One proposed change as listeners see it.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTransaction {
    pub original: BlockSnapshot,
    pub proposed: BlockSnapshot,
    pub change: BlockChange,
    pub valid: bool,
}

impl From<&BlockTransaction> for EventTransaction {
    fn from(tx: &BlockTransaction) -> Self {
        Self {
            original: tx.original.clone(),
            proposed: tx.new.clone(),
            change: tx.change,
            valid: tx.valid,
        }
    }
}

/// Batch of block changes captured in one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBlockEvent {
    pub cause: Cause,
    pub transactions: Vec<EventTransaction>,
    /// Set when the phase processes each change on its own after this batch.
    pub per_change: bool,
    cancelled: bool,
}

impl ChangeBlockEvent {
    /// Reject a single transaction. Out-of-range indices are ignored.
    pub fn invalidate(&mut self, index: usize) {
        if let Some(tx) = self.transactions.get_mut(index) {
            tx.valid = false;
        }
    }

    pub fn invalidate_where(&mut self, mut predicate: impl FnMut(&EventTransaction) -> bool) {
        for tx in &mut self.transactions {
            if predicate(tx) {
                tx.valid = false;
            }
        }
    }

    pub fn valid_count(&self) -> usize {
        self.transactions.iter().filter(|tx| tx.valid).count()
    }
}

/// Entities about to be added to the world.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnEntityEvent {
    pub cause: Cause,
    pub spawn_type: SpawnType,
    /// Listeners may remove entries to filter individual spawns.
    pub entities: Vec<Entity>,
    cancelled: bool,
}

/// Item entities about to be dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct DropItemEvent {
    pub cause: Cause,
    pub kind: DropKind,
    pub entities: Vec<Entity>,
    cancelled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ChangeBlock(ChangeBlockEvent),
    SpawnEntity(SpawnEntityEvent),
    DropItem(DropItemEvent),
}

impl Event {
    /// Mutation-batch event factory.
    pub fn change_block(cause: Cause, transactions: &[BlockTransaction], per_change: bool) -> Self {
        Self::ChangeBlock(ChangeBlockEvent {
            cause,
            transactions: transactions.iter().map(EventTransaction::from).collect(),
            per_change,
            cancelled: false,
        })
    }

    /// Spawn event factory.
    pub fn spawn_entity(cause: Cause, spawn_type: SpawnType, entities: Vec<Entity>) -> Self {
        Self::SpawnEntity(SpawnEntityEvent {
            cause,
            spawn_type,
            entities,
            cancelled: false,
        })
    }

    /// Drop event factory.
    pub fn drop_item(cause: Cause, kind: DropKind, entities: Vec<Entity>) -> Self {
        Self::DropItem(DropItemEvent {
            cause,
            kind,
            entities,
            cancelled: false,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ChangeBlock(_) => "change-block",
            Self::SpawnEntity(_) => "spawn-entity",
            Self::DropItem(_) => "drop-item",
        }
    }

    pub fn cause(&self) -> &Cause {
        match self {
            Self::ChangeBlock(e) => &e.cause,
            Self::SpawnEntity(e) => &e.cause,
            Self::DropItem(e) => &e.cause,
        }
    }

    pub fn cancel(&mut self) {
        match self {
            Self::ChangeBlock(e) => e.cancelled = true,
            Self::SpawnEntity(e) => e.cancelled = true,
            Self::DropItem(e) => e.cancelled = true,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::ChangeBlock(e) => e.cancelled,
            Self::SpawnEntity(e) => e.cancelled,
            Self::DropItem(e) => e.cancelled,
        }
    }

    /// Surviving entities of a spawn or drop event; `None` once cancelled.
    pub fn into_survivors(self) -> Option<Vec<Entity>> {
        if self.is_cancelled() {
            return None;
        }
        match self {
            Self::SpawnEntity(e) => Some(e.entities),
            Self::DropItem(e) => Some(e.entities),
            Self::ChangeBlock(_) => None,
        }
    }
}

/// The event-bus collaborator.
pub trait EventBus {
    /// Deliver an event to every listener. Listeners mutate it in place.
    fn post(&mut self, event: &mut Event) -> Result<(), EventError>;
}

type Listener = Box<dyn FnMut(&mut Event) -> Result<(), EventError>>;

/// In-process bus: listeners run in registration order and every posted event
/// is recorded after delivery.
#[derive(Default)]
pub struct ListenerBus {
    listeners: Vec<(String, Listener)>,
    history: Vec<Event>,
}

impl ListenerBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(
        &mut self,
        name: impl Into<String>,
        listener: impl FnMut(&mut Event) -> Result<(), EventError> + 'static,
    ) {
        self.listeners.push((name.into(), Box::new(listener)));
    }

    /// Events as they looked after every listener ran.
    pub fn history(&self) -> &[Event] {
        &self.history
    }

    pub fn count(&self, name: &str) -> usize {
        self.history.iter().filter(|e| e.name() == name).count()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl EventBus for ListenerBus {
    fn post(&mut self, event: &mut Event) -> Result<(), EventError> {
        for (name, listener) in &mut self.listeners {
            if let Err(e) = listener(event) {
                tracing::warn!(listener = %name, event = event.name(), "listener failed");
                self.history.push(event.clone());
                return Err(e);
            }
        }
        tracing::trace!(event = event.name(), cancelled = event.is_cancelled(), "posted");
        self.history.push(event.clone());
        Ok(())
    }
}

impl std::fmt::Debug for ListenerBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerBus")
            .field(
                "listeners",
                &self.listeners.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .field("history", &self.history.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use phasetrack_common::EntityKind;

    fn sheep() -> Entity {
        Entity::new("sheep", EntityKind::Living { ageable: true }, Vec3::ZERO)
    }

    #[test]
    fn listeners_run_in_order_and_can_filter() {
        let mut bus = ListenerBus::new();
        bus.listen("first", |event| {
            if let Event::SpawnEntity(e) = event {
                e.entities.truncate(1);
            }
            Ok(())
        });
        bus.listen("second", |event| {
            if let Event::SpawnEntity(e) = event {
                assert_eq!(e.entities.len(), 1);
            }
            Ok(())
        });
        let mut event = Event::spawn_entity(Cause::default(), SpawnType::Passive, vec![sheep(), sheep()]);
        bus.post(&mut event).unwrap();
        assert_eq!(event.into_survivors().map(|v| v.len()), Some(1));
        assert_eq!(bus.count("spawn-entity"), 1);
    }

    #[test]
    fn cancelled_event_has_no_survivors() {
        let mut bus = ListenerBus::new();
        bus.listen("veto", |event| {
            event.cancel();
            Ok(())
        });
        let mut event = Event::drop_item(Cause::default(), DropKind::Destruct, vec![sheep()]);
        bus.post(&mut event).unwrap();
        assert!(event.is_cancelled());
        assert!(event.into_survivors().is_none());
    }

    #[test]
    fn failing_listener_stops_delivery() {
        let mut bus = ListenerBus::new();
        bus.listen("broken", |_| {
            Err(EventError::Listener {
                listener: "broken".into(),
                reason: "boom".into(),
            })
        });
        bus.listen("never", |_| panic!("must not run"));
        let mut event = Event::spawn_entity(Cause::default(), SpawnType::Passive, vec![]);
        assert!(bus.post(&mut event).is_err());
        assert_eq!(bus.history().len(), 1);
    }
}
