//! Ordered traversal of live index entries

use std::sync::Arc;

use super::node::{Node, NodePtr};
use crate::arena::ArenaFile;
use crate::error::Result;
use crate::vlog::ValueRef;

/// Depth-first, byte-ordered iterator over live entries.
///
/// A node's key is a prefix of all its descendants' keys and children are
/// sorted by byte, so pre-order yields keys in lexicographic order.
pub struct IndexIter {
    file: Arc<ArenaFile>,
    stack: Vec<(NodePtr, Vec<u8>)>,
    prefix: Vec<u8>,
}

impl IndexIter {
    pub(crate) fn new(file: Arc<ArenaFile>, root: NodePtr, prefix: Vec<u8>) -> Self {
        Self {
            file,
            stack: vec![(root, Vec::new())],
            prefix,
        }
    }
}

impl Iterator for IndexIter {
    type Item = Result<(Vec<u8>, ValueRef)>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((ptr, mut key)) = self.stack.pop() {
            let node = match Node::read(&self.file, ptr) {
                Ok(node) => node,
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            };
            key.extend_from_slice(&node.label);

            // Skip subtrees that cannot contain the prefix
            let common = key.len().min(self.prefix.len());
            if key[..common] != self.prefix[..common] {
                continue;
            }

            for (_, child) in node.children.iter().rev() {
                self.stack.push((*child, key.clone()));
            }
            if let Some(slot) = node.slot {
                if slot.live && key.len() >= self.prefix.len() {
                    return Some(Ok((key, slot.vref)));
                }
            }
        }
        None
    }
}
