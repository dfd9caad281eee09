//! # Tree Node
//!
//! Gives a key-value array an identity in the tree: fence keys, a level and
//! foster linkage. A node at level 0 is a leaf holding user values; a node
//! at level N > 0 holds separator keys whose values are child page ids. The
//! first separator of an internal node equals its low fence (the least key
//! for an unbounded root), so descent always finds a covering child.
//!
//! ## Foster states
//!
//! ```text
//!            split                adopt
//!   Plain ----------> Foster-parent ----> Plain
//!   range:                 range:
//!   [low, high)            [low, foster_key)
//! ```
//!
//! A split never touches the parent: the upper half moves to a freshly
//! allocated sibling that becomes this node's *foster child*, reachable
//! through the foster pointer until a later adoption installs the separator
//! in the parent. A foster parent that splits again hands its foster linkage
//! to the new sibling, forming a chain; descent walks chains transparently.
//!
//! Adoption tightens the former foster parent's high fence down to the
//! foster key (the heap block is reused verbatim), so a plain node's fences
//! always describe exactly the keys it may hold and a scan can re-descend on
//! the high fence to find the next leaf.
//!
//! Split points are chosen by payload bytes, not slot count: the split slot
//! is the leftmost one whose cumulative encoded size exceeds half of the
//! live payload bytes, which keeps the two halves size-balanced for skewed
//! entry widths and is reproducible from the page alone.

use crate::encoding::pmnk::{Key, Pmnk};
use crate::encoding::Codec;
use crate::error::{TreeError, TreeResult};
use crate::storage::{PageId, PAGE_HEADER_SIZE};

use super::kv::KvArray;
use super::slots::{FenceSlot, SlotArray, BLOCK_PREFIX};

pub struct Node<B, K, V, P> {
    kv: KvArray<B, K, V, P>,
}

impl<B, K, V, P> Node<B, K, V, P>
where
    B: AsRef<[u8]>,
    K: Key<P>,
    V: Codec,
    P: Pmnk,
{
    pub fn new(data: B) -> Self {
        Self {
            kv: KvArray::new(data),
        }
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.kv.slots().header().level()
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.level() == 0
    }

    #[inline]
    pub fn slot_count(&self) -> u16 {
        self.kv.slot_count()
    }

    #[inline]
    pub fn has_foster(&self) -> bool {
        self.kv.slots().header().has_foster()
    }

    fn fence_key(&self, which: FenceSlot) -> Option<K> {
        self.kv
            .slots()
            .fence(which)
            .map(|bytes| K::decode_from(bytes).0)
    }

    /// Inclusive lower bound; `None` is unbounded.
    pub fn low_fence(&self) -> Option<K> {
        self.fence_key(FenceSlot::Low)
    }

    /// Exclusive upper bound; `None` is unbounded.
    pub fn high_fence(&self) -> Option<K> {
        self.fence_key(FenceSlot::High)
    }

    pub fn foster_key(&self) -> Option<K> {
        if self.has_foster() {
            self.fence_key(FenceSlot::Foster)
        } else {
            None
        }
    }

    pub fn foster_child(&self) -> Option<(PageId, K)> {
        if !self.has_foster() {
            return None;
        }
        let ptr = self.kv.slots().header().foster_ptr();
        // INVARIANT: the foster flag implies a stored separator
        let key = self.fence_key(FenceSlot::Foster).unwrap();
        Some((ptr, key))
    }

    /// The exclusive upper bound of keys this node may hold: the foster
    /// separator when a foster child exists, the high fence otherwise.
    pub fn effective_high(&self) -> Option<K> {
        if self.has_foster() {
            self.foster_key()
        } else {
            self.high_fence()
        }
    }

    /// Whether `key` lies in `[low_fence, effective_high)`.
    pub fn contains(&self, key: &K) -> bool {
        if let Some(low) = self.low_fence() {
            if *key < low {
                return false;
            }
        }
        if let Some(high) = self.effective_high() {
            if *key >= high {
                return false;
            }
        }
        true
    }

    pub fn find(&self, key: &K) -> (bool, u16) {
        self.kv.find(key)
    }

    pub fn key_at(&self, index: u16) -> K {
        self.kv.key_at(index)
    }

    pub fn value_at(&self, index: u16) -> V {
        self.kv.value_at(index)
    }

    pub fn entry_at(&self, index: u16) -> (K, V) {
        self.kv.entry_at(index)
    }

    pub fn free_space(&self) -> usize {
        self.kv.slots().free_space()
    }

    pub fn used_space(&self) -> usize {
        self.kv.slots().used_space()
    }

    /// Heap bytes held by live entries, excluding fences.
    pub fn live_entry_bytes(&self) -> usize {
        self.kv.slots().live_entry_bytes()
    }

    /// Bytes available to slots and payloads on an empty page.
    pub fn usable_space(&self) -> usize {
        self.kv.slots().page_len() - PAGE_HEADER_SIZE
    }

    #[cfg(any(test, debug_assertions))]
    pub fn check_consistency(&self) {
        let count = self.slot_count();
        let low = self.low_fence();
        let high = self.effective_high();
        for i in 0..count {
            let key = self.key_at(i);
            assert_eq!(
                key.pmnk(),
                self.kv.slots().pmnk_at(i),
                "slot PMNK disagrees with its key"
            );
            if i > 0 {
                assert!(self.key_at(i - 1) < key, "directory not strictly sorted");
            }
            if let Some(low) = &low {
                assert!(*low <= key, "key below low fence");
            }
            if let Some(high) = &high {
                assert!(key < *high, "key at or above effective high");
            }
        }
        let heap_end = self.kv.slots().header().heap_end() as usize;
        assert!(
            heap_end >= PAGE_HEADER_SIZE + count as usize * SlotArray::<B, P>::SLOT_SIZE,
            "heap overlaps slot directory"
        );
        if let Some(fkey) = self.foster_key() {
            if let Some(low) = &self.low_fence() {
                assert!(*low < fkey, "foster key at or below low fence");
            }
            if let Some(high) = &self.high_fence() {
                assert!(fkey < *high, "foster key at or above high fence");
            }
        }
    }
}

impl<B, K, V, P> Node<B, K, V, P>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
    K: Key<P>,
    V: Codec,
    P: Pmnk,
{
    /// Puts the page into the empty state with the given fences and level.
    pub fn init(&mut self, low: Option<&K>, high: Option<&K>, level: u8) -> TreeResult<()> {
        self.kv.slots_mut().init(level);
        self.set_fence(FenceSlot::Low, low)?;
        self.set_fence(FenceSlot::High, high)
    }

    fn set_fence(&mut self, which: FenceSlot, key: Option<&K>) -> TreeResult<()> {
        match key {
            None => self.kv.slots_mut().set_fence(which, None),
            Some(key) => {
                let mut buf = vec![0u8; key.encoded_len()];
                key.encode_into(&mut buf);
                self.kv.slots_mut().set_fence(which, Some(&buf))
            }
        }
    }

    pub(crate) fn set_high_fence(&mut self, key: Option<&K>) -> TreeResult<()> {
        self.set_fence(FenceSlot::High, key)
    }

    pub(crate) fn set_foster(&mut self, ptr: PageId, key: &K) -> TreeResult<()> {
        self.set_fence(FenceSlot::Foster, Some(key))?;
        let header = self.kv.slots_mut().header_mut();
        header.set_foster_ptr(ptr);
        header.set_has_foster(true);
        Ok(())
    }

    pub(crate) fn clear_foster(&mut self) {
        let header = self.kv.slots_mut().header_mut();
        header.set_foster_key_off(0);
        header.set_foster_ptr(0);
        header.set_has_foster(false);
    }

    /// Dissolves the foster linkage by making the foster separator the new
    /// high fence. The separator's heap block is reused in place.
    pub(crate) fn promote_foster_key(&mut self) {
        let header = self.kv.slots_mut().header_mut();
        debug_assert!(header.has_foster());
        header.set_high_fence_off(header.foster_key_off());
        header.set_foster_key_off(0);
        header.set_foster_ptr(0);
        header.set_has_foster(false);
    }

    /// Fence-checked insert.
    pub fn insert(&mut self, key: &K, value: &V) -> TreeResult<()> {
        if !self.contains(key) {
            return Err(TreeError::KeyOutOfRange);
        }
        self.kv.insert(key, value).map(|_| ())
    }

    /// Fence-checked remove.
    pub fn remove(&mut self, key: &K) -> TreeResult<()> {
        if !self.contains(key) {
            return Err(TreeError::KeyOutOfRange);
        }
        self.kv.remove(key).map(|_| ())
    }

    pub fn compact(&mut self) {
        self.kv.compact();
    }

    /// The slot where a byte-balanced split divides this node: the leftmost
    /// slot whose cumulative payload bytes exceed half the live total,
    /// clamped so neither half is empty.
    fn split_point(&self) -> u16 {
        let count = self.slot_count();
        let half = self.live_entry_bytes() / 2;
        let mut acc = 0;
        let mut split = count - 1;
        for i in 0..count {
            acc += self.kv.entry_bytes_at(i);
            if acc > half {
                split = i;
                break;
            }
        }
        split.clamp(1, count - 1)
    }

    /// Moves the upper half of this node into the freshly initialized
    /// sibling page and links it as this node's foster child. The sibling
    /// takes over this node's high fence and any existing foster linkage;
    /// this node's effective range truncates at the returned separator.
    pub fn split_into<B2>(
        &mut self,
        sibling_id: PageId,
        sibling: &mut Node<B2, K, V, P>,
    ) -> TreeResult<K>
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let count = self.slot_count();
        if count < 2 {
            // nothing to divide; the entry simply does not fit
            return Err(TreeError::NoSpace);
        }

        let split = self.split_point();
        let separator = self.key_at(split);

        sibling.init(
            Some(&separator),
            self.high_fence().as_ref(),
            self.level(),
        )?;
        if let Some((ptr, fkey)) = self.foster_child() {
            sibling.set_foster(ptr, &fkey)?;
        }
        for i in split..count {
            let (key, value) = self.entry_at(i);
            sibling.kv.insert(&key, &value)?;
        }

        self.kv.slots_mut().truncate(split);
        self.clear_foster();
        self.compact();
        self.set_foster(sibling_id, &separator)?;
        Ok(separator)
    }

    /// Absorbs the foster child's entries and inherits its foster linkage.
    /// Fails with `NoSpace` when the combined content does not fit; the
    /// caller releases the child's page on success.
    pub fn merge_foster<B2>(&mut self, child: &mut Node<B2, K, V, P>) -> TreeResult<()>
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        debug_assert!(self.has_foster(), "merge_foster requires a foster child");
        let mut need = child.slot_count() as usize * SlotArray::<B, P>::SLOT_SIZE
            + child.live_entry_bytes();
        if let Some((_, fkey)) = child.foster_child() {
            need += BLOCK_PREFIX + fkey.encoded_len();
        }
        if self.kv.slots().page_len() - self.used_space() < need {
            return Err(TreeError::NoSpace);
        }

        let inherited = child.foster_child();
        self.clear_foster();
        self.compact();
        for i in 0..child.slot_count() {
            let (key, value) = child.entry_at(i);
            self.kv.insert(&key, &value)?;
        }
        if let Some((ptr, fkey)) = inherited {
            self.set_foster(ptr, &fkey)?;
        }
        Ok(())
    }

    /// Redistributes entries between this node and its foster child so both
    /// hold about the same payload bytes. Outer fences are preserved; the
    /// foster separator and the child's low fence move to the new boundary.
    pub fn rebalance_foster<B2>(&mut self, child: &mut Node<B2, K, V, P>) -> TreeResult<K>
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        // INVARIANT: callers verify the foster linkage first
        let (ptr, _) = self.foster_child().unwrap();

        let mut entries: Vec<(K, V, usize)> = Vec::with_capacity(
            self.slot_count() as usize + child.slot_count() as usize,
        );
        for i in 0..self.slot_count() {
            let (k, v) = self.entry_at(i);
            entries.push((k, v, self.kv.entry_bytes_at(i)));
        }
        for i in 0..child.slot_count() {
            let (k, v) = child.entry_at(i);
            entries.push((k, v, child.kv.entry_bytes_at(i)));
        }
        if entries.len() < 2 {
            return Err(TreeError::NoSpace);
        }

        let half: usize = entries.iter().map(|(_, _, bytes)| bytes).sum::<usize>() / 2;
        let mut acc = 0;
        let mut split = entries.len() - 1;
        for (i, (_, _, bytes)) in entries.iter().enumerate() {
            acc += bytes;
            if acc > half {
                split = i;
                break;
            }
        }
        let split = split.clamp(1, entries.len() - 1);
        let separator = entries[split].0.clone();

        let low = self.low_fence();
        let high = self.high_fence();
        let level = self.level();
        let child_high = child.high_fence();
        let child_foster = child.foster_child();

        self.init(low.as_ref(), high.as_ref(), level)?;
        for (key, value, _) in &entries[..split] {
            self.kv.insert(key, value)?;
        }
        self.set_foster(ptr, &separator)?;

        child.init(Some(&separator), child_high.as_ref(), level)?;
        for (key, value, _) in &entries[split..] {
            child.kv.insert(key, value)?;
        }
        if let Some((fptr, fkey)) = child_foster {
            child.set_foster(fptr, &fkey)?;
        }
        Ok(separator)
    }
}

impl<B, K, P> Node<B, K, PageId, P>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
    K: Key<P>,
    P: Pmnk,
{
    /// Parent-side adoption: installs the child's foster child as a regular
    /// separator entry and dissolves the child's foster linkage. A no-op
    /// when the child has no foster child, which makes retries safe.
    pub fn adopt<B2, V2>(&mut self, child: &mut Node<B2, K, V2, P>) -> TreeResult<()>
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
        V2: Codec,
    {
        let Some((ptr, fkey)) = child.foster_child() else {
            return Ok(());
        };
        self.insert(&fkey, &ptr)?;
        child.promote_foster_key();
        Ok(())
    }
}
