//! # Foster B-Tree
//!
//! The node stack, bottom to top:
//!
//! - [`slots`] — one page as a sorted slot directory (PMNK + payload
//!   offset per slot) over a heap of length-prefixed payload blocks, with
//!   deferred compaction;
//! - [`kv`] — typed keys and values encoded into slot payloads, with
//!   PMNK-accelerated search and full-key tie-breaking;
//! - [`node`] — fence keys, level and foster linkage; split, merge and
//!   rebalance primitives that touch at most two pages;
//! - [`tree`] — root-to-leaf descent, the put/get/remove/scan surface and
//!   opportunistic foster-child adoption.
//!
//! A split parks the new right sibling as the *foster child* of the node
//! that split, reachable through a sideways pointer, and defers the parent
//! update to a later adoption step. Every intermediate state is a fully
//! searchable tree, which is what lets a surrounding engine latch at most
//! one or two pages per structural change.

pub mod kv;
pub mod node;
pub mod scan;
pub mod slots;
pub mod tree;

pub use kv::KvArray;
pub use node::Node;
pub use scan::RangeScan;
pub use slots::{FenceSlot, SlotArray};
pub use tree::BTree;
