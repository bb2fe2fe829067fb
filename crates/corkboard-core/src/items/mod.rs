//! Board items: positioned, nestable document nodes.

mod overlap;
mod transform;
mod tree;

pub use overlap::{clip_polygon, fraction_covered, polygon_area, rotated_corners};
pub use transform::Transform;
pub use tree::ItemTree;

use crate::codec::tagged_set;
use crate::events::NamedEvent;
use kurbo::{Point, Size, Vec2};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

/// Unique item identifier within a session. Never reused.
pub type ItemKey = u64;

/// Reasons a hierarchy or lookup operation was rejected. A rejected
/// operation leaves the tree untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("Unknown item: {0}")]
    UnknownItem(ItemKey),
    #[error("Item {0} already exists")]
    DuplicateKey(ItemKey),
    #[error("Item {0} cannot be its own parent")]
    SelfParent(ItemKey),
    #[error("Item {parent} is a descendant of {child}")]
    WouldCycle { child: ItemKey, parent: ItemKey },
    #[error("Item {child} is already a child of {parent}")]
    AlreadyChild { child: ItemKey, parent: ItemKey },
    #[error("Item {0} has no parent")]
    NoParent(ItemKey),
    #[error("Item {child} is not a child of {parent}")]
    NotAChild { child: ItemKey, parent: ItemKey },
    #[error("Item {0} has a zero scale and cannot adopt children")]
    DegenerateParent(ItemKey),
}

/// A vector update where each component is optional. Missing or non-finite
/// components leave the stored value unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Option<f64>>", into = "Vec<Option<f64>>")]
pub struct Partial<const N: usize>(pub [Option<f64>; N]);

pub type PartialPosition = Partial<3>;
pub type PartialScale = Partial<2>;

impl<const N: usize> Partial<N> {
    pub fn new(components: [Option<f64>; N]) -> Self {
        Self(components)
    }

    /// Component `i` if it is present and finite.
    pub fn get(&self, i: usize) -> Option<f64> {
        self.0.get(i).copied().flatten().filter(|v| v.is_finite())
    }
}

impl<const N: usize> From<Vec<Option<f64>>> for Partial<N> {
    fn from(values: Vec<Option<f64>>) -> Self {
        let mut components = [None; N];
        for (slot, value) in components.iter_mut().zip(values) {
            *slot = value;
        }
        Self(components)
    }
}

impl<const N: usize> From<Partial<N>> for Vec<Option<f64>> {
    fn from(partial: Partial<N>) -> Self {
        partial.0.to_vec()
    }
}

impl From<Point> for PartialPosition {
    fn from(p: Point) -> Self {
        Partial([Some(p.x), Some(p.y), None])
    }
}

impl From<Vec2> for PartialScale {
    fn from(v: Vec2) -> Self {
        Partial([Some(v.x), Some(v.y)])
    }
}

/// A board item. The tree owns items; parent and children are keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub key: ItemKey,
    /// Name of the player who created the item.
    pub owner: String,
    /// Placement relative to the parent (absolute when top-level).
    pub transform: Transform,
    pub size: Size,
    /// Item type tag, opaque to the engine.
    pub kind: String,
    /// Type-specific payload, opaque to the engine.
    pub data: Value,
    pub parent: Option<ItemKey>,
    pub children: HashSet<ItemKey>,
    pub selected: bool,
}

impl Item {
    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    /// Wire form with parent and children as keys.
    pub fn snapshot(&self) -> ItemSnapshot {
        let t = &self.transform;
        ItemSnapshot {
            key: self.key,
            owner: self.owner.clone(),
            position: [t.position.x, t.position.y, t.z],
            size: [self.size.width, self.size.height],
            scale: [t.scale.x, t.scale.y],
            rotation: t.rotation,
            kind: self.kind.clone(),
            data: self.data.clone(),
            parent: self.parent,
            children: self.children.clone(),
        }
    }
}

/// Serializable item description, as sent in `addItem` and join snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSnapshot {
    pub key: ItemKey,
    #[serde(alias = "playerName")]
    pub owner: String,
    pub position: [f64; 3],
    pub size: [f64; 2],
    #[serde(default = "unit_scale")]
    pub scale: [f64; 2],
    #[serde(default)]
    pub rotation: f64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub parent: Option<ItemKey>,
    #[serde(default, with = "tagged_set")]
    pub children: HashSet<ItemKey>,
}

fn unit_scale() -> [f64; 2] {
    [1.0, 1.0]
}

impl ItemSnapshot {
    /// Build an unlinked item. Parent and children are left for the tree to
    /// relink.
    pub fn to_item(&self) -> Item {
        Item {
            key: self.key,
            owner: self.owner.clone(),
            transform: Transform {
                position: Point::new(self.position[0], self.position[1]),
                z: self.position[2],
                scale: Vec2::new(self.scale[0], self.scale[1]),
                rotation: self.rotation,
            },
            size: Size::new(self.size[0], self.size[1]),
            kind: self.kind.clone(),
            data: self.data.clone(),
            parent: None,
            children: HashSet::new(),
            selected: false,
        }
    }
}

/// What a local participant wants to put on the board. The board assigns
/// the key and owner.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub kind: String,
    pub data: Value,
    pub transform: Transform,
    pub size: Size,
}

impl NewItem {
    pub fn new(kind: impl Into<String>, position: Point, size: Size) -> Self {
        Self {
            kind: kind.into(),
            data: Value::Null,
            transform: Transform::new(position, 0.0),
            size,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_z(mut self, z: f64) -> Self {
        self.transform.z = z;
        self
    }

    pub fn with_scale(mut self, scale: Vec2) -> Self {
        self.transform.scale = scale;
        self
    }

    pub fn with_rotation(mut self, rotation: f64) -> Self {
        self.transform.rotation = rotation;
        self
    }
}

/// Emitted by the tree after an item mutation has been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEvent {
    Moved { key: ItemKey, position: Point, z: f64 },
    Resized { key: ItemKey, scale: Vec2 },
    Rotated { key: ItemKey, rotation: f64 },
    ParentSet { key: ItemKey, parent: ItemKey },
    ParentRemoved { key: ItemKey, former: ItemKey },
    Selected { key: ItemKey },
    Deselected { key: ItemKey },
}

impl ItemEvent {
    pub fn key(&self) -> ItemKey {
        match self {
            ItemEvent::Moved { key, .. }
            | ItemEvent::Resized { key, .. }
            | ItemEvent::Rotated { key, .. }
            | ItemEvent::ParentSet { key, .. }
            | ItemEvent::ParentRemoved { key, .. }
            | ItemEvent::Selected { key }
            | ItemEvent::Deselected { key } => *key,
        }
    }
}

impl NamedEvent for ItemEvent {
    fn name(&self) -> &'static str {
        match self {
            ItemEvent::Moved { .. } => "move",
            ItemEvent::Resized { .. } => "resize",
            ItemEvent::Rotated { .. } => "rotate",
            ItemEvent::ParentSet { .. } => "setParent",
            ItemEvent::ParentRemoved { .. } => "removeParent",
            ItemEvent::Selected { .. } => "select",
            ItemEvent::Deselected { .. } => "deselect",
        }
    }
}
