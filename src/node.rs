//! Trie nodes.

use crate::tag::AtomicNodePtr;
use core::sync::atomic::Ordering;

/// Immutable leaf holding one `(hash, key, value)` tuple.
///
/// Published by a single CAS and never mutated afterwards; an update
/// replaces the whole node. The explicit alignment keeps the two low
/// pointer bits free for tagging.
#[repr(align(8))]
pub(crate) struct DataNode<K, V> {
    pub(crate) hash: u64,
    pub(crate) key: K,
    pub(crate) value: V,
}

impl<K, V> DataNode<K, V> {
    pub(crate) fn alloc(hash: u64, key: K, value: V) -> *mut Self {
        Box::into_raw(Box::new(Self { hash, key, value }))
    }
}

/// One interior level of the trie: a fixed-fanout run of atomic tagged
/// slots, all null at birth. Array nodes are never shrunk; a slot that has
/// turned into an array stays an array until the container dies.
#[repr(align(8))]
pub(crate) struct ArrayNode<K, V> {
    slots: Box<[AtomicNodePtr<K, V>]>,
}

impl<K, V> ArrayNode<K, V> {
    pub(crate) fn new(fanout: usize) -> Self {
        let mut slots = Vec::with_capacity(fanout);
        for _ in 0..fanout {
            slots.push(AtomicNodePtr::null());
        }
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    pub(crate) fn boxed(fanout: usize) -> *mut Self {
        Box::into_raw(Box::new(Self::new(fanout)))
    }

    #[inline]
    pub(crate) fn slot(&self, i: usize) -> &AtomicNodePtr<K, V> {
        &self.slots[i]
    }

    #[inline]
    pub(crate) fn fanout(&self) -> usize {
        self.slots.len()
    }
}

impl<K, V> Drop for ArrayNode<K, V> {
    fn drop(&mut self) {
        // Post-order teardown: an array node exclusively owns its non-null
        // children. Recursion depth is bounded by the trie depth,
        // ceil(64 / log2(fanout)) levels.
        for slot in self.slots.iter() {
            let child = slot.load(Ordering::Relaxed);
            if child.is_null() {
                continue;
            }
            unsafe {
                if child.is_array() {
                    drop(Box::from_raw(child.as_array()));
                } else {
                    drop(Box::from_raw(child.unmarked().as_data()));
                }
            }
        }
    }
}
