//! Copy-on-write radix tree operations
//!
//! Readers traverse from a published root and never see a node change:
//! every mutation writes fresh nodes for the whole root-to-target path and
//! hands the replaced regions back as retired. Retired regions stay
//! allocated until the collector proves no reader can reach them.

use std::sync::Arc;

use super::iter::IndexIter;
use super::node::{Node, NodePtr, Slot};
use crate::arena::{Arena, ArenaFile, Region};
use crate::error::{ArborError, Result};
use crate::vlog::ValueRef;

/// Read-only view of the tree
#[derive(Debug, Clone)]
pub struct Index {
    file: Arc<ArenaFile>,
}

impl Index {
    pub fn new(file: Arc<ArenaFile>) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &Arc<ArenaFile> {
        &self.file
    }

    /// Live value reference for `key`
    pub fn lookup(&self, root: NodePtr, key: &[u8]) -> Result<Option<ValueRef>> {
        Ok(self
            .lookup_slot(root, key)?
            .filter(|slot| slot.live)
            .map(|slot| slot.vref))
    }

    /// Slot stored for `key`, including deleted ones
    pub fn lookup_slot(&self, root: NodePtr, key: &[u8]) -> Result<Option<Slot>> {
        let mut ptr = root;
        let mut rest = key;
        loop {
            let node = Node::read(&self.file, ptr)?;
            if !rest.starts_with(&node.label) {
                return Ok(None);
            }
            rest = &rest[node.label.len()..];
            if rest.is_empty() {
                return Ok(node.slot);
            }
            match node.child(rest[0]) {
                Some(child) => ptr = child,
                None => return Ok(None),
            }
        }
    }

    /// Live entry whose key is the longest prefix of `key`, as
    /// `(prefix length, value reference)`
    pub fn find_longest_prefix(&self, root: NodePtr, key: &[u8]) -> Result<Option<(usize, ValueRef)>> {
        let mut best = None;
        let mut ptr = root;
        let mut consumed = 0usize;
        loop {
            let node = Node::read(&self.file, ptr)?;
            let rest = &key[consumed..];
            if !rest.starts_with(&node.label) {
                return Ok(best);
            }
            consumed += node.label.len();
            if let Some(slot) = node.slot.filter(|slot| slot.live) {
                best = Some((consumed, slot.vref));
            }
            if consumed == key.len() {
                return Ok(best);
            }
            match node.child(key[consumed]) {
                Some(child) => ptr = child,
                None => return Ok(best),
            }
        }
    }

    /// Live entries in byte order
    pub fn iter(&self, root: NodePtr) -> IndexIter {
        IndexIter::new(Arc::clone(&self.file), root, Vec::new())
    }

    /// Live entries whose key starts with `prefix`, in byte order
    pub fn iter_prefix(&self, root: NodePtr, prefix: &[u8]) -> IndexIter {
        IndexIter::new(Arc::clone(&self.file), root, prefix.to_vec())
    }

    /// Visit every node reachable from `root` with its full key
    pub fn walk<F>(&self, root: NodePtr, mut visit: F) -> Result<()>
    where
        F: FnMut(NodePtr, &Node, &[u8]) -> Result<()>,
    {
        let mut stack = vec![(root, Vec::new())];
        while let Some((ptr, mut key)) = stack.pop() {
            let node = Node::read(&self.file, ptr)?;
            key.extend_from_slice(&node.label);
            visit(ptr, &node, &key)?;
            for (_, child) in node.children.iter().rev() {
                stack.push((*child, key.clone()));
            }
        }
        Ok(())
    }
}

/// What to do with the slot of the key being updated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotChange {
    Keep,
    Set(Slot),
    Clear,
}

/// Result of [`IndexWriter::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    /// New root, `None` when nothing changed
    pub root: Option<NodePtr>,
    /// Slot the key held before
    pub previous: Option<Slot>,
}

enum Outcome {
    Unchanged,
    /// Subtree rewritten; `None` when it became empty
    Replaced(Option<NodePtr>),
}

/// Writer-side tree mutations over the index arena
pub struct IndexWriter<'a> {
    file: Arc<ArenaFile>,
    arena: &'a mut Arena,
    retired: Vec<Region>,
}

impl<'a> IndexWriter<'a> {
    pub fn new(arena: &'a mut Arena) -> Self {
        Self {
            file: Arc::clone(arena.file()),
            arena,
            retired: Vec::new(),
        }
    }

    /// Write an empty root node
    pub fn create_root(&mut self) -> Result<NodePtr> {
        self.write(&Node::new(Vec::new()))
    }

    /// Regions replaced by the mutations so far
    pub fn into_retired(self) -> Vec<Region> {
        self.retired
    }

    /// Point `key` at `vref`, creating the path if needed
    pub fn insert(&mut self, root: NodePtr, key: &[u8], vref: ValueRef) -> Result<Inserted> {
        let mut previous = None;
        let outcome = self.update_node(root, key, true, |slot| {
            previous = slot;
            Ok(match slot {
                Some(slot) if slot.live && slot.vref == vref => SlotChange::Keep,
                _ => SlotChange::Set(Slot::live(vref)),
            })
        })?;
        Ok(Inserted {
            root: Self::new_root(outcome)?,
            previous,
        })
    }

    /// Clear the liveness flag of `key`; the slot stays for the collector
    pub fn mark_deleted(&mut self, root: NodePtr, key: &[u8]) -> Result<(NodePtr, ValueRef)> {
        let mut deleted = None;
        let outcome = self.update_node(root, key, true, |slot| match slot {
            Some(slot) if slot.live => {
                deleted = Some(slot.vref);
                Ok(SlotChange::Set(Slot {
                    vref: slot.vref,
                    live: false,
                }))
            }
            _ => Err(ArborError::NotFound),
        })?;
        let root = Self::new_root(outcome)?.ok_or(ArborError::NotFound)?;
        let vref = deleted.ok_or(ArborError::NotFound)?;
        Ok((root, vref))
    }

    /// Move a live slot from `from` to `to`, keeping its liveness.
    /// Unchanged if the key no longer points at `from`.
    pub fn relocate(&mut self, root: NodePtr, key: &[u8], from: ValueRef, to: ValueRef) -> Result<Option<NodePtr>> {
        let outcome = self.update_node(root, key, true, |slot| {
            Ok(match slot {
                Some(slot) if slot.vref == from => SlotChange::Set(Slot { vref: to, live: slot.live }),
                _ => SlotChange::Keep,
            })
        })?;
        Self::new_root(outcome)
    }

    /// Drop the deleted slot of `key` if it still points at `vref`
    pub fn purge(&mut self, root: NodePtr, key: &[u8], vref: ValueRef) -> Result<Option<NodePtr>> {
        let outcome = self.update_node(root, key, true, |slot| {
            Ok(match slot {
                Some(slot) if !slot.live && slot.vref == vref => SlotChange::Clear,
                _ => SlotChange::Keep,
            })
        })?;
        Self::new_root(outcome)
    }

    /// Remove every deleted slot and merge the chains left behind.
    /// Returns the new root (if anything changed) and the number of slots removed.
    pub fn prune_dead(&mut self, root: NodePtr) -> Result<(Option<NodePtr>, u64)> {
        let (outcome, removed) = self.prune_node(root, true)?;
        Ok((Self::new_root(outcome)?, removed))
    }

    /// Retire the whole tree and start over from an empty root.
    /// Returns the new root and every live entry the old tree held.
    pub fn remove_all(&mut self, root: NodePtr) -> Result<(NodePtr, Vec<(Vec<u8>, ValueRef)>)> {
        let mut live = Vec::new();
        let mut regions = Vec::new();
        Index::new(Arc::clone(&self.file)).walk(root, |ptr, node, key| {
            regions.push(ptr.region());
            if let Some(slot) = node.slot.filter(|slot| slot.live) {
                live.push((key.to_vec(), slot.vref));
            }
            Ok(())
        })?;

        let new_root = self.create_root()?;
        self.retired.extend(regions);
        Ok((new_root, live))
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn new_root(outcome: Outcome) -> Result<Option<NodePtr>> {
        match outcome {
            Outcome::Unchanged => Ok(None),
            Outcome::Replaced(Some(root)) => Ok(Some(root)),
            Outcome::Replaced(None) => Err(ArborError::CorruptStore("index root removed".to_string())),
        }
    }

    fn write(&mut self, node: &Node) -> Result<NodePtr> {
        let bytes = node.encode();
        let region = self.arena.allocate(bytes.len() as u64)?;
        self.file.write_at(region.offset, &bytes)?;
        NodePtr::from_region(region)
    }

    fn retire(&mut self, ptr: NodePtr) {
        self.retired.push(ptr.region());
    }

    /// Rewrite the path to `key` (whose remaining bytes start at this
    /// node's label) after letting `op` decide the slot.
    fn update_node<F>(&mut self, ptr: NodePtr, key: &[u8], is_root: bool, op: F) -> Result<Outcome>
    where
        F: FnOnce(Option<Slot>) -> Result<SlotChange>,
    {
        let mut node = Node::read(&self.file, ptr)?;
        let common = common_prefix(&node.label, key);

        if common < node.label.len() {
            // The key ends or diverges inside this label: it is absent
            let slot = match op(None)? {
                SlotChange::Keep | SlotChange::Clear => return Ok(Outcome::Unchanged),
                SlotChange::Set(slot) => slot,
            };

            let mut lower = node;
            let upper_label = lower.label[..common].to_vec();
            lower.label = lower.label[common..].to_vec();
            let lower_byte = lower.label[0];
            let lower_ptr = self.write(&lower)?;

            let mut upper = Node::new(upper_label);
            upper.set_child(lower_byte, lower_ptr);
            if common == key.len() {
                upper.slot = Some(slot);
            } else {
                let leaf = self.write(&Node::leaf(key[common..].to_vec(), slot))?;
                upper.set_child(key[common], leaf);
            }

            self.retire(ptr);
            return Ok(Outcome::Replaced(Some(self.write(&upper)?)));
        }

        let rest = &key[common..];
        if rest.is_empty() {
            match op(node.slot)? {
                SlotChange::Keep => return Ok(Outcome::Unchanged),
                SlotChange::Set(slot) => node.slot = Some(slot),
                SlotChange::Clear => {
                    if node.slot.is_none() {
                        return Ok(Outcome::Unchanged);
                    }
                    node.slot = None;
                }
            }
        } else {
            let byte = rest[0];
            match node.child(byte) {
                Some(child) => match self.update_node(child, rest, false, op)? {
                    Outcome::Unchanged => return Ok(Outcome::Unchanged),
                    Outcome::Replaced(Some(new_child)) => node.set_child(byte, new_child),
                    Outcome::Replaced(None) => node.remove_child(byte),
                },
                None => match op(None)? {
                    SlotChange::Keep | SlotChange::Clear => return Ok(Outcome::Unchanged),
                    SlotChange::Set(slot) => {
                        let leaf = self.write(&Node::leaf(rest.to_vec(), slot))?;
                        node.set_child(byte, leaf);
                    }
                },
            }
        }

        self.retire(ptr);
        Ok(Outcome::Replaced(self.finish(node, is_root)?))
    }

    fn prune_node(&mut self, ptr: NodePtr, is_root: bool) -> Result<(Outcome, u64)> {
        let mut node = Node::read(&self.file, ptr)?;
        let mut changed = false;
        let mut removed = 0u64;

        if matches!(node.slot, Some(slot) if !slot.live) {
            node.slot = None;
            changed = true;
            removed += 1;
        }

        let children = node.children.clone();
        for (byte, child) in children {
            let (outcome, count) = self.prune_node(child, false)?;
            removed += count;
            match outcome {
                Outcome::Unchanged => {}
                Outcome::Replaced(Some(new_child)) => {
                    node.set_child(byte, new_child);
                    changed = true;
                }
                Outcome::Replaced(None) => {
                    node.remove_child(byte);
                    changed = true;
                }
            }
        }

        if !changed {
            return Ok((Outcome::Unchanged, 0));
        }
        self.retire(ptr);
        Ok((Outcome::Replaced(self.finish(node, is_root)?), removed))
    }

    /// Write a rewritten node, dropping it when empty and folding a
    /// single remaining child into it. The root is always kept.
    fn finish(&mut self, mut node: Node, is_root: bool) -> Result<Option<NodePtr>> {
        if !is_root && node.slot.is_none() {
            match node.children.len() {
                0 => return Ok(None),
                1 => {
                    let (_, child_ptr) = node.children[0];
                    let child = Node::read(&self.file, child_ptr)?;
                    self.retire(child_ptr);
                    node.label.extend_from_slice(&child.label);
                    node.slot = child.slot;
                    node.children = child.children;
                }
                _ => {}
            }
        }
        self.write(&node).map(Some)
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
