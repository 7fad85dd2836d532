//! Eight threads share one map: half insert their own key ranges while the
//! other half update and remove behind them.

use petek::HashTrie;
use std::sync::Arc;
use std::thread;

const KEYS_PER_THREAD: u64 = 10_000;

fn main() {
    let map: Arc<HashTrie<u64, u64>> = Arc::new(HashTrie::new(4).unwrap());
    let mut inserters = vec![];
    let mut mutators = vec![];

    for t in 0..4u64 {
        let m = map.clone();
        inserters.push(thread::spawn(move || {
            for i in 0..KEYS_PER_THREAD {
                let key = t * KEYS_PER_THREAD + i;
                m.insert(key, key);
            }
        }));
    }

    for t in 0..4u64 {
        let m = map.clone();
        mutators.push(thread::spawn(move || {
            let mut updated = 0u64;
            let mut removed = 0u64;
            for i in 0..KEYS_PER_THREAD {
                let key = t * KEYS_PER_THREAD + i;
                if i % 3 == 0 {
                    if m.remove(&key).succeeded() {
                        removed += 1;
                    }
                } else if m.update(&key, key * 2).succeeded() {
                    updated += 1;
                }
            }
            (updated, removed)
        }));
    }

    for h in inserters {
        h.join().unwrap();
    }
    let mut updated = 0u64;
    let mut removed = 0u64;
    for h in mutators {
        let (u, r) = h.join().unwrap();
        updated += u;
        removed += r;
    }

    println!("{} updates and {} removals landed", updated, removed);

    let mut map = Arc::try_unwrap(map).unwrap_or_else(|_| unreachable!());
    println!("{} keys survived the churn", map.len());

    let mut doubled = 0u64;
    map.visit(|k, v| {
        if *v == *k * 2 {
            doubled += 1;
        }
    });
    println!("{} of them hold twice their key", doubled);
}
