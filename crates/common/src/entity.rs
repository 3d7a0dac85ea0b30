use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::types::EntityId;

/// A stack of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item: String,
    pub count: u32,
}

impl ItemStack {
    pub fn new(item: impl Into<String>, count: u32) -> Self {
        Self {
            item: item.into(),
            count,
        }
    }
}

impl std::fmt::Display for ItemStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.count, self.item)
    }
}

/// Broad category of an entity, used to classify why it appeared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    /// Passive resource orb.
    ExperienceOrb { value: u32 },
    Projectile,
    /// A dropped item lying in the world.
    Item(ItemStack),
    Living { ageable: bool },
    Other,
}

/// An object living in the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Concrete type name, e.g. "sheep". Breeding is detected by equal type names.
    pub type_name: String,
    pub kind: EntityKind,
    pub position: Vec3,
    pub dead: bool,
}

impl Entity {
    pub fn new(type_name: impl Into<String>, kind: EntityKind, position: Vec3) -> Self {
        Self {
            id: EntityId::new(),
            type_name: type_name.into(),
            kind,
            position,
            dead: false,
        }
    }

    /// Create an item entity for a stack at a position.
    pub fn item(stack: ItemStack, position: Vec3) -> Self {
        Self::new("item", EntityKind::Item(stack), position)
    }

    pub fn is_item(&self) -> bool {
        matches!(self.kind, EntityKind::Item(_))
    }

    pub fn is_experience(&self) -> bool {
        matches!(self.kind, EntityKind::ExperienceOrb { .. })
    }

    pub fn is_projectile(&self) -> bool {
        matches!(self.kind, EntityKind::Projectile)
    }

    pub fn is_ageable(&self) -> bool {
        matches!(self.kind, EntityKind::Living { ageable: true })
    }
}

/// A pending item drop that has not been turned into an entity yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDrop {
    pub stack: ItemStack,
    pub position: Vec3,
}

impl ItemDrop {
    pub fn new(stack: ItemStack, position: Vec3) -> Self {
        Self { stack, position }
    }

    /// Materialise the drop as an item entity.
    pub fn create(&self) -> Entity {
        Entity::item(self.stack.clone(), self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_drop_creates_item_entity() {
        let drop = ItemDrop::new(ItemStack::new("apple", 3), Vec3::new(1.0, 2.0, 3.0));
        let entity = drop.create();
        assert!(entity.is_item());
        assert_eq!(entity.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(entity.kind, EntityKind::Item(ItemStack::new("apple", 3)));
    }

    #[test]
    fn kind_predicates() {
        let orb = Entity::new("xp_orb", EntityKind::ExperienceOrb { value: 3 }, Vec3::ZERO);
        let arrow = Entity::new("arrow", EntityKind::Projectile, Vec3::ZERO);
        let lamb = Entity::new("sheep", EntityKind::Living { ageable: true }, Vec3::ZERO);
        assert!(orb.is_experience());
        assert!(arrow.is_projectile());
        assert!(lamb.is_ageable());
        assert!(!lamb.is_item());
    }
}
