//! # Key-Value Array
//!
//! Gives the slot array types. `KvArray` is parameterized over a key type,
//! a value type and a PMNK width; together they form the policy bundle of a
//! tree configuration. The payload of each slot is the encoded full key
//! (omitted when the key round-trips through the PMNK) followed by the
//! encoded value.
//!
//! Lookups binary-search the inline PMNKs, then resolve PMNK ties with a
//! linear walk comparing decoded full keys. PMNK ordering is consistent with
//! full-key ordering by construction, so ties are the only case that needs
//! the heap.

use std::cmp::Ordering;
use std::marker::PhantomData;

use crate::encoding::pmnk::{Key, Pmnk};
use crate::encoding::Codec;
use crate::error::{TreeError, TreeResult};

use super::slots::SlotArray;

pub struct KvArray<B, K, V, P> {
    slots: SlotArray<B, P>,
    _marker: PhantomData<(K, V)>,
}

impl<B, K, V, P> KvArray<B, K, V, P>
where
    B: AsRef<[u8]>,
    K: Key<P>,
    V: Codec,
    P: Pmnk,
{
    pub fn new(data: B) -> Self {
        Self {
            slots: SlotArray::new(data),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn slots(&self) -> &SlotArray<B, P> {
        &self.slots
    }

    #[inline]
    pub fn slot_count(&self) -> u16 {
        self.slots.slot_count()
    }

    pub fn key_at(&self, index: u16) -> K {
        if K::STORED {
            K::decode_from(self.slots.payload_at(index)).0
        } else {
            K::from_pmnk(self.slots.pmnk_at(index))
        }
    }

    pub fn value_at(&self, index: u16) -> V {
        let payload = self.slots.payload_at(index);
        let skip = if K::STORED {
            K::encoded_len_at(payload)
        } else {
            0
        };
        V::decode_from(&payload[skip..]).0
    }

    pub fn entry_at(&self, index: u16) -> (K, V) {
        (self.key_at(index), self.value_at(index))
    }

    /// Heap bytes the entry at `index` occupies, block prefix included.
    pub(crate) fn entry_bytes_at(&self, index: u16) -> usize {
        super::slots::BLOCK_PREFIX + self.slots.payload_at(index).len()
    }

    /// Locates `key`. Returns whether it is present and either its slot
    /// index or the position where it would be inserted.
    pub fn find(&self, key: &K) -> (bool, u16) {
        let pmnk = key.pmnk();
        let (hit, mut pos) = self.slots.find(pmnk);
        if !hit {
            return (false, pos);
        }
        if !K::STORED {
            // the PMNK is the whole key
            return (true, pos);
        }
        let count = self.slot_count();
        while pos < count && self.slots.pmnk_at(pos) == pmnk {
            let stored = K::decode_from(self.slots.payload_at(pos)).0;
            match stored.cmp(key) {
                Ordering::Less => pos += 1,
                Ordering::Equal => return (true, pos),
                Ordering::Greater => return (false, pos),
            }
        }
        (false, pos)
    }

    /// Entries in `[low, high)` on this page, in key order. Borrows the
    /// array, so any mutation of the page invalidates the iterator at
    /// compile time.
    pub fn range(
        &self,
        low: Option<&K>,
        high: Option<&K>,
    ) -> impl Iterator<Item = (K, V)> + '_ {
        let start = match low {
            Some(low) => self.find(low).1,
            None => 0,
        };
        let high = high.cloned();
        (start..self.slot_count())
            .map(move |i| self.entry_at(i))
            .take_while(move |(key, _)| match &high {
                Some(high) => key < high,
                None => true,
            })
    }
}

impl<B, K, V, P> KvArray<B, K, V, P>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
    K: Key<P>,
    V: Codec,
    P: Pmnk,
{
    pub(crate) fn slots_mut(&mut self) -> &mut SlotArray<B, P> {
        &mut self.slots
    }

    /// Encodes and stores `(key, value)`, keeping the directory sorted.
    pub fn insert(&mut self, key: &K, value: &V) -> TreeResult<u16> {
        let (found, pos) = self.find(key);
        if found {
            return Err(TreeError::Duplicate);
        }
        let key_len = if K::STORED { key.encoded_len() } else { 0 };
        let payload = self.slots.insert_at(pos, key.pmnk(), key_len + value.encoded_len())?;

        let mut off = 0;
        if K::STORED {
            off = key.encode_into(payload);
        }
        value.encode_into(&mut payload[off..]);
        Ok(pos)
    }

    pub fn remove(&mut self, key: &K) -> TreeResult<u16> {
        let (found, pos) = self.find(key);
        if !found {
            return Err(TreeError::NotFound);
        }
        self.slots.remove_at(pos);
        Ok(pos)
    }

    pub fn remove_at(&mut self, index: u16) {
        self.slots.remove_at(index);
    }

    pub fn compact(&mut self) {
        self.slots.compact();
    }
}
