//! # Foster B-Tree
//!
//! An ordered key-value index over fixed-size byte pages, built as a Foster
//! B-tree: a node split parks the new right sibling as a *foster child* of
//! the node that split, so structural changes touch at most two pages and
//! parent updates happen lazily through adoption.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------+
//! |  BTree      descent, put/get/remove,    |
//! |             range scans, adoption       |
//! +-----------------------------------------+
//! |  Node       fence keys, level, foster   |
//! |             linkage, split/merge        |
//! +-----------------------------------------+
//! |  KvArray    typed keys and values,      |
//! |             PMNK search + tie-breaking  |
//! +-----------------------------------------+
//! |  SlotArray  slot directory + payload    |
//! |             heap on one page            |
//! +-----------------------------------------+
//! |  PageAllocator (external)               |
//! +-----------------------------------------+
//! ```
//!
//! Each slot carries a poor-man's normalized key: a small big-endian prefix
//! of the full key compared as a native integer, so binary search rarely
//! touches the payload heap. Pages come from an external [`PageAllocator`];
//! the built-in [`MemAllocator`] backs them with plain heap memory.
//!
//! ## Example
//!
//! ```
//! use foster_btree::{BTree, MemAllocator};
//!
//! let mut alloc = MemAllocator::new(4096);
//! let mut tree: BTree<u64, Vec<u8>, u64, _> = BTree::create(&mut alloc)?;
//!
//! tree.put(&1, &b"one".to_vec())?;
//! tree.put(&2, &b"two".to_vec())?;
//! assert_eq!(tree.get(&1)?, b"one");
//!
//! let pairs: Vec<_> = tree.scan(None, None).collect();
//! assert_eq!(pairs.len(), 2);
//! # Ok::<(), foster_btree::TreeError>(())
//! ```
//!
//! The tree configuration is the triple (key type, value type, PMNK width):
//! `BTree<u64, V, u64, _>` keeps whole keys in the slots, while
//! `BTree<Vec<u8>, V, u32, _>` stores byte-string keys with 4-byte slot
//! prefixes. See [`encoding::pmnk::Key`] for the supported bundles.
//!
//! Transactions, logging, buffer management and durability are out of
//! scope; a surrounding engine supplies pages and latches them around core
//! calls. No core operation blocks, suspends or shares state.

mod config;
mod error;
mod macros;

pub mod btree;
pub mod encoding;
pub mod storage;

pub use btree::{BTree, KvArray, Node, RangeScan, SlotArray};
pub use config::{TreeConfig, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
pub use encoding::pmnk::{Key, Pmnk};
pub use encoding::Codec;
pub use error::{TreeError, TreeResult};
pub use storage::{MemAllocator, PageAllocator, PageId, NULL_PID};
