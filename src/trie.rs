//! The concurrent trie and its wait-free operation protocols.
//!
//! The container is a hash-indexed array-mapped trie. Interior levels are
//! fixed-fanout arrays of atomic tagged slots; leaves are immutable data
//! nodes. An operation walks the levels using successive `log_fanout`-bit
//! slices of the key's hash and resolves each slot with single-word CAS.
//!
//! Progress is wait-free: a thread that keeps losing races on one slot
//! counts its failures and, past `max_fail_count`, marks the slot. A marked
//! slot can only advance to an array node, so the loser descends one level
//! and the per-operation step count stays bounded by the configuration.

use crate::hash::{IdentityHash, KeyHash};
use crate::node::{ArrayNode, DataNode};
use crate::result::{ConfigError, OperationResult};
use crate::tag::{AtomicNodePtr, NodePtr};
use crate::watch::{WatchList, WatchSession};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Width of the hash in bits.
const HASH_BITS: u32 = u64::BITS;

/// Default cap on concurrently operating threads, and the default retry
/// budget derived from it.
pub const DEFAULT_MAX_THREADS: usize = 128;

/// A wait-free concurrent map from hashed keys to values.
///
/// Every operation completes in a bounded number of its own steps
/// regardless of what other threads do. There is no resize step: the trie
/// grows one collision at a time by replacing a leaf with a fresh
/// single-child interior node.
///
/// The hash function must be injective over the stored keys (see
/// [`KeyHash`]); hash equality is treated as key equality.
///
/// # Examples
///
/// ```
/// use petek::{HashTrie, OperationResult};
///
/// let map: HashTrie<u64, u64> = HashTrie::new(4).unwrap();
/// assert_eq!(map.insert(7, 42), OperationResult::Success);
/// assert_eq!(map.insert(7, 42), OperationResult::AlreadyPresent);
/// assert_eq!(map.get(&7), Some(42));
/// ```
pub struct HashTrie<K, V, H = IdentityHash> {
    head: ArrayNode<K, V>,
    hasher: H,
    log_fanout: u32,
    mask: u64,
    max_fail_count: usize,
    watch: WatchList,
    len: AtomicUsize,
}

unsafe impl<K: Send, V: Send, H: Send> Send for HashTrie<K, V, H> {}
unsafe impl<K: Send + Sync, V: Send + Sync, H: Sync> Sync for HashTrie<K, V, H> {}

impl<K, V> HashTrie<K, V, IdentityHash> {
    /// Creates a map with `2^log_fanout` slots per level and default
    /// thread and retry budgets.
    ///
    /// `log_fanout` must be a nonzero power of two below 64, which also
    /// guarantees it divides the hash width evenly.
    pub fn new(log_fanout: usize) -> Result<Self, ConfigError> {
        Self::with_config(log_fanout, DEFAULT_MAX_THREADS, DEFAULT_MAX_THREADS)
    }

    /// Creates a map with explicit retry and thread budgets.
    ///
    /// `max_threads` bounds the dense thread ids that may operate on this
    /// container; `max_fail_count` is the per-slot retry budget before an
    /// operation forces expansion, and must cover `max_threads`.
    pub fn with_config(
        log_fanout: usize,
        max_fail_count: usize,
        max_threads: usize,
    ) -> Result<Self, ConfigError> {
        Self::with_hasher(IdentityHash, log_fanout, max_fail_count, max_threads)
    }
}

impl<K, V, H> HashTrie<K, V, H> {
    /// Creates a map that hashes keys through `hasher`.
    ///
    /// The hasher must be injective over the keys actually stored.
    pub fn with_hasher(
        hasher: H,
        log_fanout: usize,
        max_fail_count: usize,
        max_threads: usize,
    ) -> Result<Self, ConfigError> {
        if log_fanout == 0
            || !log_fanout.is_power_of_two()
            || log_fanout >= HASH_BITS as usize
        {
            return Err(ConfigError::InvalidFanout { log_fanout });
        }
        if max_threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        if max_fail_count < max_threads {
            return Err(ConfigError::FailBoundTooSmall {
                max_fail_count,
                max_threads,
            });
        }

        let log_fanout = log_fanout as u32;
        let fanout = 1usize << log_fanout;
        Ok(Self {
            head: ArrayNode::new(fanout),
            hasher,
            log_fanout,
            mask: (fanout - 1) as u64,
            max_fail_count,
            watch: WatchList::new(max_threads),
            len: AtomicUsize::new(0),
        })
    }

    /// Number of elements in the map. Exact once all mutators have
    /// quiesced.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// `true` when the map holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every `(key, value)` pair currently in the map.
    ///
    /// The exclusive borrow guarantees no operation runs concurrently, so
    /// the walk needs no hazard bookkeeping.
    pub fn visit<F: FnMut(&K, &V)>(&mut self, mut f: F) {
        Self::visit_array(&self.head, &mut f);
    }

    fn visit_array<F: FnMut(&K, &V)>(arr: &ArrayNode<K, V>, f: &mut F) {
        for i in 0..arr.fanout() {
            let child = arr.slot(i).load(Ordering::Acquire);
            if child.is_null() {
                continue;
            }
            if child.is_array() {
                Self::visit_array(unsafe { &*child.as_array() }, f);
            } else {
                let data = unsafe { &*child.as_data() };
                f(&data.key, &data.value);
            }
        }
    }

    #[inline]
    fn head_ptr(&self) -> NodePtr<K, V> {
        NodePtr::from_array(&self.head as *const ArrayNode<K, V> as *mut ArrayNode<K, V>)
    }

    #[inline]
    fn fanout(&self) -> usize {
        1 << self.log_fanout
    }

    /// CAS a freshly allocated leaf into a null slot. On a lost race the
    /// leaf is freed right away (it was never visible to anyone) and the
    /// pair is handed back for the next attempt.
    fn publish(
        slot: &AtomicNodePtr<K, V>,
        hash: u64,
        pair: (K, V),
    ) -> Result<(), (K, V)> {
        let node = DataNode::alloc(hash, pair.0, pair.1);
        match slot.compare_exchange(
            NodePtr::null(),
            NodePtr::from_data(node),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(_) => {
                let boxed = unsafe { Box::from_raw(node) };
                let DataNode { key, value, .. } = *boxed;
                Err((key, value))
            }
        }
    }

    /// Demand expansion of a slot holding a data node. Success is not
    /// required; whatever the slot holds afterwards is returned. Only an
    /// unmarked data node is ever marked, so a marked slot can advance to
    /// nothing but an array node.
    fn try_mark(slot: &AtomicNodePtr<K, V>) -> NodePtr<K, V> {
        let old = slot.load(Ordering::Acquire);
        if !old.is_null() && !old.is_array() && !old.is_marked() {
            let _ = slot.compare_exchange(
                old,
                old.marked(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        slot.load(Ordering::Acquire)
    }

    /// Replace the data node at `local[pos]` by a one-child array node,
    /// relocating the resident at the next-deeper level. Idempotent under
    /// races: the loser unlinks its sole child and frees its fresh array.
    /// Returns the slot's current contents either way.
    fn expand(
        &self,
        session: &WatchSession<'_>,
        local: NodePtr<K, V>,
        pos: usize,
        shift: u32,
    ) -> NodePtr<K, V> {
        let slot = unsafe { &*local.as_array() }.slot(pos);
        let old = slot.load(Ordering::Acquire);
        if old.is_array() {
            return old;
        }
        session.watch(old.address());
        let value = slot.load(Ordering::Acquire);
        if value != old {
            return value;
        }
        if value.is_null() {
            return slot.load(Ordering::Acquire);
        }

        let data = unsafe { &*value.as_data() };
        let fresh = ArrayNode::boxed(self.fanout());
        let new_pos = ((data.hash >> (shift + self.log_fanout)) & self.mask) as usize;
        unsafe {
            (*fresh)
                .slot(new_pos)
                .store(value.unmarked(), Ordering::Relaxed);
        }

        match slot.compare_exchange(
            old,
            NodePtr::from_array(fresh),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => NodePtr::from_array(fresh),
            Err(_) => {
                unsafe {
                    (*fresh).slot(new_pos).store(NodePtr::null(), Ordering::Relaxed);
                    drop(Box::from_raw(fresh));
                }
                slot.load(Ordering::Acquire)
            }
        }
    }

    /// Re-read `local[pos]` until two consecutive reads agree, watching the
    /// candidate in between, so the caller holds a dereferenceable view.
    /// Disagreements count against the caller's retry budget; past the
    /// bound the slot is marked and expanded to force progress.
    fn ensure_not_replaced(
        &self,
        session: &WatchSession<'_>,
        local: NodePtr<K, V>,
        pos: usize,
        shift: u32,
        node: &mut NodePtr<K, V>,
        fail_count: &mut usize,
    ) {
        let slot = unsafe { &*local.as_array() }.slot(pos);
        loop {
            if node.is_null() || node.is_array() {
                return;
            }
            session.watch(node.address());
            let reread = slot.load(Ordering::Acquire);
            if reread == *node {
                return;
            }
            *node = reread;
            *fail_count += 1;
            if *fail_count > self.max_fail_count {
                *node = Self::try_mark(slot);
                if !node.is_array() {
                    *node = self.expand(session, local, pos, shift);
                }
                return;
            }
        }
    }
}

impl<K, V, H> HashTrie<K, V, H>
where
    K: Clone,
    H: KeyHash<K>,
{
    /// Inserts `key` with `value`.
    ///
    /// Returns [`OperationResult::AlreadyPresent`] when an element with the
    /// key's hash is already stored, and
    /// [`OperationResult::ThreadLimitExceeded`] when the calling thread is
    /// outside the container's `max_threads` budget.
    pub fn insert(&self, key: K, value: V) -> OperationResult {
        let session = match self.watch.session() {
            Some(session) => session,
            None => return OperationResult::ThreadLimitExceeded,
        };
        let fullhash = self.hasher.hash_of(&key);
        let mut pair = (key, value);
        let mut hash = fullhash;
        let mut local = self.head_ptr();
        let step = self.log_fanout;

        for r in (0..HASH_BITS - step).step_by(step as usize) {
            let pos = (hash & self.mask) as usize;
            hash >>= step;
            let slot = unsafe { &*local.as_array() }.slot(pos);
            let mut node = slot.load(Ordering::Acquire);
            let mut fail_count = 0usize;

            loop {
                if fail_count > self.max_fail_count {
                    node = Self::try_mark(slot);
                }
                if node.is_null() {
                    match Self::publish(slot, fullhash, pair) {
                        Ok(()) => {
                            self.len.fetch_add(1, Ordering::Relaxed);
                            return OperationResult::Success;
                        }
                        Err(p) => {
                            pair = p;
                            fail_count += 1;
                            node = slot.load(Ordering::Acquire);
                            continue;
                        }
                    }
                }
                if node.is_marked() {
                    node = self.expand(&session, local, pos, r);
                }
                if node.is_array() {
                    local = node;
                    break;
                }
                session.watch(node.address());
                let reread = slot.load(Ordering::Acquire);
                if reread != node {
                    fail_count += 1;
                    node = reread;
                    continue;
                }
                let data = unsafe { &*node.as_data() };
                if data.hash == fullhash {
                    return OperationResult::AlreadyPresent;
                }
                node = self.expand(&session, local, pos, r);
                if node.is_array() {
                    local = node;
                    break;
                }
                fail_count += 1;
            }
        }

        // Deepest level: the path consumed every other hash bit, so a
        // resident here carries the full hash. One last attempt.
        let pos = (hash & self.mask) as usize;
        let slot = unsafe { &*local.as_array() }.slot(pos);
        let node = slot.load(Ordering::Acquire);
        if node.is_null() {
            return match Self::publish(slot, fullhash, pair) {
                Ok(()) => {
                    self.len.fetch_add(1, Ordering::Relaxed);
                    OperationResult::Success
                }
                Err(_) => OperationResult::AlreadyPresent,
            };
        }
        OperationResult::AlreadyPresent
    }

    /// Looks up the value stored under `key`.
    ///
    /// Never allocates and never mutates the trie beyond helping a pending
    /// expansion along. Returns `None` without inspecting the trie when the
    /// calling thread is outside the container's `max_threads` budget, since
    /// it holds no hazard slot to read through.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let session = self.watch.session()?;
        let fullhash = self.hasher.hash_of(key);
        let mut hash = fullhash;
        let mut local = self.head_ptr();
        let step = self.log_fanout;

        for r in (0..HASH_BITS - step).step_by(step as usize) {
            let pos = (hash & self.mask) as usize;
            hash >>= step;
            let slot = unsafe { &*local.as_array() }.slot(pos);
            let mut node = slot.load(Ordering::Acquire);
            let mut fail_count = 0usize;

            loop {
                if node.is_null() {
                    return None;
                }
                if node.is_marked() {
                    node = self.expand(&session, local, pos, r);
                }
                if node.is_array() {
                    local = node;
                    break;
                }
                session.watch(node.address());
                let reread = slot.load(Ordering::Acquire);
                if reread != node {
                    node = reread;
                    self.ensure_not_replaced(
                        &session,
                        local,
                        pos,
                        r,
                        &mut node,
                        &mut fail_count,
                    );
                    continue;
                }
                let data = unsafe { &*node.as_data() };
                return if data.hash == fullhash {
                    Some(data.value.clone())
                } else {
                    // The trie cannot hold this hash anywhere else.
                    None
                };
            }
        }

        // Deepest level: no further bits to expand into, so the retry
        // budget is the only bound. A reader that exhausts it against
        // sustained replacement churn reports absence.
        let pos = (hash & self.mask) as usize;
        let slot = unsafe { &*local.as_array() }.slot(pos);
        let mut node = slot.load(Ordering::Acquire);
        let mut fail_count = 0usize;
        loop {
            if node.is_null() {
                return None;
            }
            debug_assert!(!node.is_array());
            session.watch(node.address());
            let reread = slot.load(Ordering::Acquire);
            if reread != node {
                node = reread;
                fail_count += 1;
                if fail_count > self.max_fail_count {
                    return None;
                }
                continue;
            }
            let data = unsafe { &*node.as_data() };
            return if data.hash == fullhash {
                Some(data.value.clone())
            } else {
                None
            };
        }
    }

    /// `true` when an element with the key's hash is stored.
    pub fn contains_key(&self, key: &K) -> bool
    where
        V: Clone,
    {
        self.get(key).is_some()
    }

    /// Replaces the value stored under `key`.
    ///
    /// Returns [`OperationResult::ElementNotFound`] when the key is absent.
    pub fn update(&self, key: &K, new: V) -> OperationResult {
        self.replace_node(key, |_| true, Some(new))
    }

    /// Replaces the value stored under `key` only if the current value
    /// equals `expected`.
    pub fn update_if_eq(&self, key: &K, new: V, expected: &V) -> OperationResult
    where
        V: PartialEq,
    {
        self.replace_node(key, |current| current == expected, Some(new))
    }

    /// Removes the element stored under `key`.
    ///
    /// Returns [`OperationResult::ElementNotFound`] when the key is absent.
    pub fn remove(&self, key: &K) -> OperationResult {
        self.replace_node(key, |_| true, None)
    }

    /// Removes the element stored under `key` only if the current value
    /// equals `expected`.
    pub fn remove_if_eq(&self, key: &K, expected: &V) -> OperationResult
    where
        V: PartialEq,
    {
        self.replace_node(key, |current| current == expected, None)
    }

    /// Shared protocol behind update and remove: find a stable data node
    /// with the key's hash, check it against `matches`, and CAS in either a
    /// fresh leaf (`new` is `Some`) or null (`new` is `None`). The replaced
    /// node is freed once no other thread watches it.
    fn replace_node(
        &self,
        key: &K,
        matches: impl Fn(&V) -> bool,
        mut new: Option<V>,
    ) -> OperationResult {
        let session = match self.watch.session() {
            Some(session) => session,
            None => return OperationResult::ThreadLimitExceeded,
        };
        let fullhash = self.hasher.hash_of(key);
        let mut hash = fullhash;
        let mut local = self.head_ptr();
        let step = self.log_fanout;

        for r in (0..HASH_BITS - step).step_by(step as usize) {
            let pos = (hash & self.mask) as usize;
            hash >>= step;
            let slot = unsafe { &*local.as_array() }.slot(pos);
            let mut node = slot.load(Ordering::Acquire);
            let mut fail_count = 0usize;

            'slot: loop {
                if node.is_null() {
                    return OperationResult::ElementNotFound;
                }
                if node.is_marked() {
                    node = self.expand(&session, local, pos, r);
                    if node.is_array() {
                        local = node;
                        break 'slot;
                    }
                    fail_count += 1;
                    continue 'slot;
                }
                if node.is_array() {
                    local = node;
                    break 'slot;
                }
                session.watch(node.address());
                let reread = slot.load(Ordering::Acquire);
                if reread != node {
                    node = reread;
                    self.ensure_not_replaced(
                        &session,
                        local,
                        pos,
                        r,
                        &mut node,
                        &mut fail_count,
                    );
                    continue 'slot;
                }

                let data = unsafe { &*node.as_data() };
                if data.hash != fullhash {
                    return OperationResult::ElementNotFound;
                }
                if !matches(&data.value) {
                    return OperationResult::ExpectedValueMismatch;
                }

                let replacement = match new.take() {
                    Some(v) => {
                        NodePtr::from_data(DataNode::alloc(fullhash, key.clone(), v))
                    }
                    None => NodePtr::null(),
                };
                match slot.compare_exchange(
                    node,
                    replacement,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        if replacement.is_null() {
                            self.len.fetch_sub(1, Ordering::Relaxed);
                        }
                        self.retire_data(&session, node);
                        return OperationResult::Success;
                    }
                    Err(current) => {
                        if !replacement.is_null() {
                            // Never published; take the value back in case
                            // a deeper level gets another attempt.
                            let boxed =
                                unsafe { Box::from_raw(replacement.as_data()) };
                            new = Some(boxed.value);
                        }
                        if current.is_array() {
                            local = current;
                            break 'slot;
                        }
                        if current.is_marked() {
                            let expanded = self.expand(&session, local, pos, r);
                            if expanded.is_array() {
                                local = expanded;
                                break 'slot;
                            }
                            node = expanded;
                            fail_count += 1;
                            continue 'slot;
                        }
                        return OperationResult::ElementNotFound;
                    }
                }
            }
        }

        // Deepest level: no further bits to expand into, so the retry
        // budget is the only bound. Exhaustion classifies like any other
        // lost replacement race.
        let pos = (hash & self.mask) as usize;
        let slot = unsafe { &*local.as_array() }.slot(pos);
        let mut node = slot.load(Ordering::Acquire);
        let mut fail_count = 0usize;
        loop {
            if node.is_null() {
                return OperationResult::ElementNotFound;
            }
            debug_assert!(!node.is_array());
            session.watch(node.address());
            let reread = slot.load(Ordering::Acquire);
            if reread != node {
                node = reread;
                fail_count += 1;
                if fail_count > self.max_fail_count {
                    return OperationResult::ElementNotFound;
                }
                continue;
            }
            let data = unsafe { &*node.as_data() };
            if data.hash != fullhash {
                return OperationResult::ElementNotFound;
            }
            if !matches(&data.value) {
                return OperationResult::ExpectedValueMismatch;
            }
            let replacement = match new.take() {
                Some(v) => NodePtr::from_data(DataNode::alloc(fullhash, key.clone(), v)),
                None => NodePtr::null(),
            };
            match slot.compare_exchange(
                node,
                replacement,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if replacement.is_null() {
                        self.len.fetch_sub(1, Ordering::Relaxed);
                    }
                    self.retire_data(&session, node);
                    return OperationResult::Success;
                }
                Err(_) => {
                    if !replacement.is_null() {
                        unsafe { drop(Box::from_raw(replacement.as_data())) };
                    }
                    return OperationResult::ElementNotFound;
                }
            }
        }
    }

    /// Free a data node that a successful CAS just unlinked, deferred until
    /// no other thread holds a hazard on it.
    fn retire_data(&self, session: &WatchSession<'_>, node: NodePtr<K, V>) {
        session.retire(node.address());
        unsafe { drop(Box::from_raw(node.as_data())) }
    }
}
