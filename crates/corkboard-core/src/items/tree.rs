//! Keyed item arena with hierarchy and geometry queries.

use super::overlap::{fraction_covered, rotated_corners};
use super::{
    Item, ItemEvent, ItemKey, ItemSnapshot, PartialPosition, PartialScale, StructuralError, Transform,
};
use crate::events::Emitter;
use kurbo::{Point, Size, Vec2};
use std::collections::HashMap;

/// All items of a board session, keyed by [`ItemKey`].
///
/// Parent/child links are stored as keys on both sides and are kept
/// consistent by every hierarchy operation. Top-level items (no parent) are
/// also tracked in insertion order.
#[derive(Debug, Default)]
pub struct ItemTree {
    items: HashMap<ItemKey, Item>,
    roots: Vec<ItemKey>,
    listeners: HashMap<ItemKey, Emitter<ItemEvent>>,
}

impl ItemTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: ItemKey) -> bool {
        self.items.contains_key(&key)
    }

    pub fn get(&self, key: ItemKey) -> Option<&Item> {
        self.items.get(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Items with no parent, in insertion order.
    pub fn roots(&self) -> &[ItemKey] {
        &self.roots
    }

    fn item(&self, key: ItemKey) -> Result<&Item, StructuralError> {
        self.items.get(&key).ok_or(StructuralError::UnknownItem(key))
    }

    fn item_mut(&mut self, key: ItemKey) -> Result<&mut Item, StructuralError> {
        self.items.get_mut(&key).ok_or(StructuralError::UnknownItem(key))
    }

    // --- Listeners ---

    /// Listen for one event name on one item.
    pub fn on(&mut self, key: ItemKey, name: &'static str, listener: impl FnMut(&ItemEvent) + 'static) {
        self.listeners.entry(key).or_default().on(name, listener);
    }

    /// Listen for every event on one item.
    pub fn on_any(&mut self, key: ItemKey, listener: impl FnMut(&ItemEvent) + 'static) {
        self.listeners.entry(key).or_default().on_any(listener);
    }

    fn emit(&mut self, event: ItemEvent) {
        if let Some(emitter) = self.listeners.get_mut(&event.key()) {
            emitter.emit(&event);
        }
    }

    // --- Insertion ---

    /// Insert an item. If it names an existing parent it is attached as is:
    /// its transform is taken to be relative to that parent already.
    pub fn insert(&mut self, mut item: Item) -> Result<(), StructuralError> {
        if self.items.contains_key(&item.key) {
            return Err(StructuralError::DuplicateKey(item.key));
        }
        let key = item.key;
        item.children.clear();
        let parent = item.parent.take();
        self.items.insert(key, item);

        match parent {
            Some(parent) if self.items.contains_key(&parent) => self.link(key, parent),
            Some(parent) => {
                log::warn!("Item {} names unknown parent {}, keeping it top-level", key, parent);
                self.roots.push(key);
            }
            None => self.roots.push(key),
        }
        Ok(())
    }

    /// Insert an item described by a snapshot.
    pub fn insert_snapshot(&mut self, snapshot: &ItemSnapshot) -> Result<(), StructuralError> {
        let mut item = snapshot.to_item();
        item.parent = snapshot.parent;
        self.insert(item)
    }

    /// Replace the whole tree with a snapshot list, relinking parents and
    /// children. Links to unknown parents, or links that would form a cycle,
    /// are dropped and the item stays top-level. Listeners registered on the
    /// previous items are dropped too.
    pub fn load(&mut self, snapshots: &[ItemSnapshot]) {
        self.clear();

        for snapshot in snapshots {
            if self.items.contains_key(&snapshot.key) {
                log::warn!("Duplicate item {} in snapshot, ignoring", snapshot.key);
                continue;
            }
            self.items.insert(snapshot.key, snapshot.to_item());
            self.roots.push(snapshot.key);
        }

        for snapshot in snapshots {
            let Some(parent) = snapshot.parent else {
                continue;
            };
            let child = snapshot.key;
            if !self.items.contains_key(&parent) {
                log::warn!("Item {} names unknown parent {}, keeping it top-level", child, parent);
            } else if parent == child || self.is_descendant_of(parent, child) {
                log::warn!("Snapshot link {} -> {} would form a cycle, dropping it", child, parent);
            } else if self.items.get(&child).is_some_and(|i| i.parent.is_none()) {
                self.roots.retain(|&k| k != child);
                self.link(child, parent);
            }
        }
    }

    /// Snapshot every item, parents before their children.
    pub fn snapshot(&self) -> Vec<ItemSnapshot> {
        let mut out = Vec::with_capacity(self.items.len());
        let mut stack: Vec<ItemKey> = self.roots.iter().rev().copied().collect();
        while let Some(key) = stack.pop() {
            if let Some(item) = self.items.get(&key) {
                out.push(item.snapshot());
                let mut children: Vec<ItemKey> = item.children.iter().copied().collect();
                children.sort_unstable_by(|a, b| b.cmp(a));
                stack.extend(children);
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.roots.clear();
        self.listeners.clear();
    }

    // --- Transform updates ---

    /// Replace each finite component of `position` (x, y, z).
    pub fn move_to(&mut self, key: ItemKey, position: &PartialPosition) -> Result<(), StructuralError> {
        let item = self.item_mut(key)?;
        let t = &mut item.transform;
        if let Some(x) = position.get(0) {
            t.position.x = x;
        }
        if let Some(y) = position.get(1) {
            t.position.y = y;
        }
        if let Some(z) = position.get(2) {
            t.z = z;
        }
        let (position, z) = (t.position, t.z);
        self.emit(ItemEvent::Moved { key, position, z });
        Ok(())
    }

    /// Replace each finite component of `scale`.
    pub fn scale_to(&mut self, key: ItemKey, scale: &PartialScale) -> Result<(), StructuralError> {
        let item = self.item_mut(key)?;
        let t = &mut item.transform;
        if let Some(x) = scale.get(0) {
            t.scale.x = x;
        }
        if let Some(y) = scale.get(1) {
            t.scale.y = y;
        }
        let scale = t.scale;
        self.emit(ItemEvent::Resized { key, scale });
        Ok(())
    }

    /// Set the rotation if `rotation` is finite.
    pub fn rotate_to(&mut self, key: ItemKey, rotation: Option<f64>) -> Result<(), StructuralError> {
        let item = self.item_mut(key)?;
        if let Some(angle) = rotation.filter(|a| a.is_finite()) {
            item.transform.rotation = angle;
        }
        let rotation = item.transform.rotation;
        self.emit(ItemEvent::Rotated { key, rotation });
        Ok(())
    }

    pub fn select(&mut self, key: ItemKey) -> Result<(), StructuralError> {
        self.item_mut(key)?.selected = true;
        self.emit(ItemEvent::Selected { key });
        Ok(())
    }

    pub fn deselect(&mut self, key: ItemKey) -> Result<(), StructuralError> {
        self.item_mut(key)?.selected = false;
        self.emit(ItemEvent::Deselected { key });
        Ok(())
    }

    // --- Hierarchy ---

    /// Whether `key` sits somewhere below `ancestor`.
    pub fn is_descendant_of(&self, key: ItemKey, ancestor: ItemKey) -> bool {
        let mut current = self.items.get(&key).and_then(|i| i.parent);
        let mut steps = 0;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.items.len() {
                break;
            }
            current = self.items.get(&parent).and_then(|i| i.parent);
        }
        false
    }

    pub fn is_ancestor_of(&self, key: ItemKey, descendant: ItemKey) -> bool {
        self.is_descendant_of(descendant, key)
    }

    /// Attach `child` under `parent`, converting its stored transform into
    /// the parent's frame so it does not move on screen.
    pub fn set_parent(&mut self, child: ItemKey, parent: ItemKey) -> Result<(), StructuralError> {
        if child == parent {
            return Err(StructuralError::SelfParent(child));
        }
        let current = self.item(child)?.parent;
        self.item(parent)?;
        if self.is_descendant_of(parent, child) {
            return Err(StructuralError::WouldCycle { child, parent });
        }
        if current == Some(parent) {
            return Err(StructuralError::AlreadyChild { child, parent });
        }

        let absolute = self.absolute_transform(child)?;
        let parent_frame = self.absolute_transform(parent)?;
        let local = parent_frame
            .relative(&absolute)
            .ok_or(StructuralError::DegenerateParent(parent))?;

        self.detach(child);
        self.item_mut(child)?.transform = local;
        self.link(child, parent);

        self.emit(ItemEvent::ParentSet { key: child, parent });
        Ok(())
    }

    /// Detach `child` from its parent, storing its absolute transform.
    pub fn remove_parent(&mut self, child: ItemKey) -> Result<(), StructuralError> {
        let former = self.item(child)?.parent.ok_or(StructuralError::NoParent(child))?;
        let absolute = self.absolute_transform(child)?;

        self.detach(child);
        self.item_mut(child)?.transform = absolute;
        self.roots.push(child);

        self.emit(ItemEvent::ParentRemoved { key: child, former });
        Ok(())
    }

    /// Parent-side counterpart of [`ItemTree::set_parent`].
    pub fn add_child(&mut self, parent: ItemKey, child: ItemKey) -> Result<(), StructuralError> {
        self.set_parent(child, parent)
    }

    /// Parent-side counterpart of [`ItemTree::remove_parent`].
    pub fn remove_child(&mut self, parent: ItemKey, child: ItemKey) -> Result<(), StructuralError> {
        if !self.item(parent)?.children.contains(&child) {
            return Err(StructuralError::NotAChild { child, parent });
        }
        self.remove_parent(child)
    }

    /// Record the link on both sides. The child must currently be unlinked.
    fn link(&mut self, child: ItemKey, parent: ItemKey) {
        if let Some(p) = self.items.get_mut(&parent) {
            p.children.insert(child);
        }
        if let Some(c) = self.items.get_mut(&child) {
            c.parent = Some(parent);
        }
    }

    /// Remove the link on both sides, or drop the item from the root list.
    fn detach(&mut self, child: ItemKey) {
        let former = self.items.get_mut(&child).and_then(|c| c.parent.take());
        match former {
            Some(parent) => {
                if let Some(p) = self.items.get_mut(&parent) {
                    p.children.remove(&child);
                }
            }
            None => self.roots.retain(|&k| k != child),
        }
    }

    // --- Geometry ---

    /// Transform of `key` in board coordinates.
    pub fn absolute_transform(&self, key: ItemKey) -> Result<Transform, StructuralError> {
        let mut chain = vec![self.item(key)?];
        while let Some(parent) = chain.last().and_then(|i| i.parent) {
            if chain.len() > self.items.len() {
                break;
            }
            chain.push(self.item(parent)?);
        }
        let mut frame = chain.pop().map(|root| root.transform).unwrap_or_default();
        while let Some(item) = chain.pop() {
            frame = frame.then(&item.transform);
        }
        Ok(frame)
    }

    pub fn absolute_position(&self, key: ItemKey) -> Result<Point, StructuralError> {
        Ok(self.absolute_transform(key)?.position)
    }

    pub fn absolute_rotation(&self, key: ItemKey) -> Result<f64, StructuralError> {
        Ok(self.absolute_transform(key)?.rotation)
    }

    pub fn absolute_scale(&self, key: ItemKey) -> Result<Vec2, StructuralError> {
        Ok(self.absolute_transform(key)?.scale)
    }

    /// On-screen size: stored size times the magnitude of the absolute scale.
    pub fn absolute_size(&self, key: ItemKey) -> Result<Size, StructuralError> {
        let size = self.item(key)?.size;
        let scale = self.absolute_scale(key)?;
        Ok(Size::new(size.width * scale.x.abs(), size.height * scale.y.abs()))
    }

    /// Corners of the item's rotated rectangle in board coordinates.
    pub fn corners(&self, key: ItemKey) -> Result<[Point; 4], StructuralError> {
        let t = self.absolute_transform(key)?;
        let size = self.absolute_size(key)?;
        Ok(rotated_corners(t.position, size, t.rotation))
    }

    /// Fraction of `key`'s area covered by `other`, in `[0, 1]`.
    pub fn percent_area_covered_by(&self, key: ItemKey, other: ItemKey) -> Result<f64, StructuralError> {
        let this = self.corners(key)?;
        let other = self.corners(other)?;
        Ok(fraction_covered(&this, &other))
    }
}
