//! # Range Scans
//!
//! Lazy in-order iteration over `[low, high)`. The iterator keeps only a
//! page id and a slot cursor; page bytes are re-viewed on every step, so no
//! payload is copied until an entry is actually yielded.
//!
//! Leaf hand-over follows the same rules as descent: at the end of a leaf
//! the scan crosses into the foster child when one is linked, otherwise it
//! re-descends from the root on the leaf's high fence, which is exactly the
//! low fence of the next leaf. An unbounded high fence means the scan ran
//! off the right edge of the tree.
//!
//! The iterator holds a shared borrow of the tree, so the borrow checker
//! rejects any mutation while a scan is alive; restart by building a new
//! scan from the last yielded key.

use crate::encoding::pmnk::{Key, Pmnk};
use crate::encoding::Codec;
use crate::storage::{PageAllocator, PageId};

use super::node::Node;
use super::tree::BTree;

pub struct RangeScan<'t, 'a, K, V, P, A> {
    tree: &'t BTree<'a, K, V, P, A>,
    leaf: PageId,
    index: u16,
    high: Option<K>,
    exhausted: bool,
}

impl<'t, 'a, K, V, P, A> RangeScan<'t, 'a, K, V, P, A>
where
    K: Key<P>,
    V: Codec,
    P: Pmnk,
    A: PageAllocator,
{
    pub(crate) fn new(
        tree: &'t BTree<'a, K, V, P, A>,
        low: Option<&K>,
        high: Option<&K>,
    ) -> Self {
        let start = low.cloned().unwrap_or_else(K::min_value);
        let leaf = tree.descend(&start, None);
        let index = {
            let node: Node<&[u8], K, V, P> = Node::new(tree.page(leaf));
            node.find(&start).1
        };
        Self {
            tree,
            leaf,
            index,
            high: high.cloned(),
            exhausted: false,
        }
    }
}

impl<K, V, P, A> Iterator for RangeScan<'_, '_, K, V, P, A>
where
    K: Key<P>,
    V: Codec,
    P: Pmnk,
    A: PageAllocator,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        if self.exhausted {
            return None;
        }
        let tree = self.tree;
        loop {
            let node: Node<&[u8], K, V, P> = Node::new(tree.page(self.leaf));
            if self.index < node.slot_count() {
                let (key, value) = node.entry_at(self.index);
                if let Some(high) = &self.high {
                    if key >= *high {
                        self.exhausted = true;
                        return None;
                    }
                }
                self.index += 1;
                return Some((key, value));
            }
            if let Some((ptr, _)) = node.foster_child() {
                self.leaf = ptr;
                self.index = 0;
                continue;
            }
            match node.high_fence() {
                None => {
                    self.exhausted = true;
                    return None;
                }
                Some(bound) => {
                    let next_leaf = tree.descend(&bound, None);
                    let next_node: Node<&[u8], K, V, P> = Node::new(tree.page(next_leaf));
                    self.index = next_node.find(&bound).1;
                    self.leaf = next_leaf;
                }
            }
        }
    }
}
