//! Tagged node pointers.
//!
//! Every slot in the trie is a single machine word. The two least
//! significant bits discriminate what the word refers to:
//!
//! - bit 0 (`MARK_DATA`): the resident data node is marked for expansion;
//! - bit 1 (`KIND_ARRAY`): the word, with tag bits cleared, is the address
//!   of an array node rather than a data node.
//!
//! A null slot has both bits zero. Keeping the whole state in one word is
//! what lets every trie transition be a single compare-exchange. Node
//! allocations are 8-byte aligned, so the low bits are always free.

use crate::node::{ArrayNode, DataNode};
use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};

pub(crate) const MARK_DATA: usize = 0b01;
pub(crate) const KIND_ARRAY: usize = 0b10;
const TAG_MASK: usize = MARK_DATA | KIND_ARRAY;

/// One tagged word: null, a data node, a marked data node, or an array node.
pub(crate) struct NodePtr<K, V> {
    raw: usize,
    _marker: PhantomData<*mut DataNode<K, V>>,
}

impl<K, V> NodePtr<K, V> {
    #[inline]
    pub(crate) const fn null() -> Self {
        Self {
            raw: 0,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn from_data(ptr: *mut DataNode<K, V>) -> Self {
        debug_assert_eq!(ptr as usize & TAG_MASK, 0);
        Self {
            raw: ptr as usize,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn from_array(ptr: *mut ArrayNode<K, V>) -> Self {
        debug_assert_eq!(ptr as usize & TAG_MASK, 0);
        Self {
            raw: ptr as usize | KIND_ARRAY,
            _marker: PhantomData,
        }
    }

    #[inline]
    const fn from_raw(raw: usize) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn is_null(self) -> bool {
        self.raw == 0
    }

    #[inline]
    pub(crate) fn is_array(self) -> bool {
        self.raw & KIND_ARRAY != 0
    }

    #[inline]
    pub(crate) fn is_marked(self) -> bool {
        self.raw & MARK_DATA != 0
    }

    /// The same word with the expansion mark set.
    #[inline]
    pub(crate) fn marked(self) -> Self {
        Self::from_raw(self.raw | MARK_DATA)
    }

    /// The same word with the expansion mark cleared.
    #[inline]
    pub(crate) fn unmarked(self) -> Self {
        Self::from_raw(self.raw & !MARK_DATA)
    }

    /// Address bits with both discriminators cleared.
    #[inline]
    pub(crate) fn address(self) -> usize {
        self.raw & !TAG_MASK
    }

    #[inline]
    pub(crate) fn as_data(self) -> *mut DataNode<K, V> {
        debug_assert!(!self.is_array());
        self.address() as *mut DataNode<K, V>
    }

    #[inline]
    pub(crate) fn as_array(self) -> *mut ArrayNode<K, V> {
        debug_assert!(self.is_array());
        self.address() as *mut ArrayNode<K, V>
    }
}

impl<K, V> Clone for NodePtr<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for NodePtr<K, V> {}

impl<K, V> PartialEq for NodePtr<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<K, V> Eq for NodePtr<K, V> {}

impl<K, V> core::fmt::Debug for NodePtr<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NodePtr({:#x})", self.raw)
    }
}

/// An atomic trie slot holding one tagged word.
pub(crate) struct AtomicNodePtr<K, V> {
    data: AtomicUsize,
    _marker: PhantomData<*mut DataNode<K, V>>,
}

unsafe impl<K: Send, V: Send> Send for AtomicNodePtr<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for AtomicNodePtr<K, V> {}

impl<K, V> AtomicNodePtr<K, V> {
    #[inline]
    pub(crate) const fn null() -> Self {
        Self {
            data: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn load(&self, order: Ordering) -> NodePtr<K, V> {
        NodePtr::from_raw(self.data.load(order))
    }

    #[inline]
    pub(crate) fn store(&self, ptr: NodePtr<K, V>, order: Ordering) {
        self.data.store(ptr.raw, order);
    }

    #[inline]
    pub(crate) fn compare_exchange(
        &self,
        current: NodePtr<K, V>,
        new: NodePtr<K, V>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<NodePtr<K, V>, NodePtr<K, V>> {
        match self
            .data
            .compare_exchange(current.raw, new.raw, success, failure)
        {
            Ok(prev) => Ok(NodePtr::from_raw(prev)),
            Err(prev) => Err(NodePtr::from_raw(prev)),
        }
    }
}
