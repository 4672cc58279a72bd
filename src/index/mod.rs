//! Index Module
//!
//! Disk-resident compressed radix tree mapping keys to value log references.
//!
//! ## Responsibilities
//! - Exact lookup, longest-prefix lookup and ordered iteration
//! - Insert / overwrite and delete-marking through copy-on-write path rewrites
//! - Report the regions each mutation replaced so they can be retired
//!
//! ## Traversal
//! ```text
//! root ("")
//!  ├── 'T' → "TEST_" ─┬── 'K' → "KEY_1" [slot]
//!  │                  └── 'V' → "VAL"   [slot]
//!  └── 'a' → "apple"  [slot]
//! ```
//! The child is picked by the next key byte and labels are compared byte by
//! byte, so the path visited is a pure function of the key.

mod iter;
mod node;
mod tree;

pub use iter::IndexIter;
pub use node::{Node, NodePtr, Slot, INDEX_GRANULE, NODE_HEADER_SIZE, SLOT_SIZE};
pub use tree::{Index, IndexWriter, Inserted, SlotChange};
