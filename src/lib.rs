//! Petek: a wait-free hash array-mapped trie.
//!
//! Petek maps keys to values from arbitrarily many threads without any
//! thread ever blocking on another. Every operation completes in a bounded
//! number of its own steps, independent of contention and scheduling.
//!
//! # Key Features
//!
//! - **Wait-Free Progress**: bounded per-slot retries escalate to a forced
//!   expansion, so no operation can be starved
//! - **No Resizing**: the trie grows one collision at a time; there is no
//!   stop-the-world rehash
//! - **Single-Word CAS**: every structural transition is one tagged-pointer
//!   compare-exchange
//! - **Hazard-Based Reclamation**: replaced leaves are freed only once no
//!   other thread can still dereference them
//!
//! # Example
//!
//! ```rust
//! use petek::{HashTrie, OperationResult};
//!
//! let map: HashTrie<u64, u64> = HashTrie::new(4).unwrap();
//!
//! assert_eq!(map.insert(1, 10), OperationResult::Success);
//! assert_eq!(map.get(&1), Some(10));
//!
//! assert_eq!(map.update_if_eq(&1, 20, &10), OperationResult::Success);
//! assert_eq!(map.remove(&1), OperationResult::Success);
//! assert_eq!(map.get(&1), None);
//! ```
//!
//! The hash function must be injective over the keys actually stored: hash
//! equality is treated as key equality. The default [`IdentityHash`] covers
//! unsigned integer keys; `foldhash` and the std `RandomState` plug in
//! through [`KeyHash`] for other key types.

#![warn(missing_docs)]

mod hash;
mod node;
mod result;
mod tag;
mod tid;
mod trie;
mod watch;

pub use hash::{IdentityHash, KeyHash};
pub use result::{ConfigError, OperationResult};
pub use trie::{HashTrie, DEFAULT_MAX_THREADS};

/// Trie keyed by arbitrary `Hash` types through foldhash's fast hasher.
pub type FoldedHashTrie<K, V> = HashTrie<K, V, foldhash::fast::FixedState>;
