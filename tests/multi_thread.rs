use petek::{HashTrie, KeyHash, OperationResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

/// Routes every key into the top hash bits, so all traffic shares one path
/// down to a deepest-level slot.
#[derive(Clone, Copy, Default)]
struct TopBits;

impl KeyHash<u64> for TopBits {
    fn hash_of(&self, key: &u64) -> u64 {
        key << 60
    }
}

const MAP_SIZE: usize = 256;

fn block_low(idx: usize, nbr_threads: usize, data_size: usize) -> usize {
    idx * data_size / nbr_threads
}

fn block_high(idx: usize, nbr_threads: usize, data_size: usize) -> usize {
    block_low(idx + 1, nbr_threads, data_size) - 1
}

fn block_size(idx: usize, nbr_threads: usize, data_size: usize) -> usize {
    block_high(idx, nbr_threads, data_size) - block_low(idx, nbr_threads, data_size) + 1
}

fn preloaded() -> Arc<HashTrie<u8, usize>> {
    let map = HashTrie::new(4).unwrap();
    for i in 0..MAP_SIZE {
        assert_eq!(map.insert(i as u8, i + 1), OperationResult::Success);
    }
    Arc::new(map)
}

#[test]
#[cfg_attr(miri, ignore)]
fn update_no_conflict() {
    const NBR_THREADS: usize = 8;
    let map = preloaded();
    let barrier = Arc::new(Barrier::new(NBR_THREADS));
    let mut handles = vec![];

    for i in 0..NBR_THREADS {
        let map = map.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            for j in block_low(i, NBR_THREADS, MAP_SIZE)..=block_high(i, NBR_THREADS, MAP_SIZE)
            {
                assert_eq!(
                    map.update_if_eq(&(j as u8), 2 * (j + 1), &(j + 1)),
                    OperationResult::Success
                );
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    for i in 0..MAP_SIZE {
        assert_eq!(map.get(&(i as u8)), Some(2 * (i + 1)));
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn update_conflict() {
    const NBR_THREADS: usize = 16;
    let map = preloaded();
    let barrier = Arc::new(Barrier::new(NBR_THREADS));
    let fails: Arc<Vec<AtomicUsize>> =
        Arc::new((0..NBR_THREADS / 2).map(|_| AtomicUsize::new(0)).collect());
    let mut handles = vec![];

    for i in 0..NBR_THREADS {
        let map = map.clone();
        let barrier = barrier.clone();
        let fails = fails.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            let idx = i % 8;
            for j in
                block_low(idx, NBR_THREADS / 2, MAP_SIZE)..=block_high(idx, NBR_THREADS / 2, MAP_SIZE)
            {
                if map
                    .update_if_eq(&(j as u8), 2 * (j + 1), &(j + 1))
                    .failed()
                {
                    fails[idx].fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    for idx in 0..NBR_THREADS / 2 {
        assert_eq!(
            fails[idx].load(Ordering::Relaxed),
            block_size(idx, NBR_THREADS / 2, MAP_SIZE)
        );
    }
    for i in 0..MAP_SIZE {
        assert_eq!(map.get(&(i as u8)), Some(2 * (i + 1)));
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn remove_no_conflict() {
    const NBR_THREADS: usize = 8;
    let map = preloaded();
    let barrier = Arc::new(Barrier::new(NBR_THREADS));
    let mut handles = vec![];

    for i in 0..NBR_THREADS {
        let map = map.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            for j in block_low(i, NBR_THREADS, MAP_SIZE)..=block_high(i, NBR_THREADS, MAP_SIZE)
            {
                assert_eq!(
                    map.remove_if_eq(&(j as u8), &(j + 1)),
                    OperationResult::Success
                );
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    for i in 0..MAP_SIZE {
        assert_eq!(map.get(&(i as u8)), None);
    }
    assert!(map.is_empty());
}

#[test]
#[cfg_attr(miri, ignore)]
fn remove_conflict() {
    const NBR_THREADS: usize = 16;
    let map = preloaded();
    let barrier = Arc::new(Barrier::new(NBR_THREADS));
    let fails: Arc<Vec<AtomicUsize>> =
        Arc::new((0..NBR_THREADS / 2).map(|_| AtomicUsize::new(0)).collect());
    let mut handles = vec![];

    for i in 0..NBR_THREADS {
        let map = map.clone();
        let barrier = barrier.clone();
        let fails = fails.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            let idx = i % 8;
            for j in
                block_low(idx, NBR_THREADS / 2, MAP_SIZE)..=block_high(idx, NBR_THREADS / 2, MAP_SIZE)
            {
                if map.remove_if_eq(&(j as u8), &(j + 1)).failed() {
                    fails[idx].fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    for idx in 0..NBR_THREADS / 2 {
        assert_eq!(
            fails[idx].load(Ordering::Relaxed),
            block_size(idx, NBR_THREADS / 2, MAP_SIZE)
        );
    }
    for i in 0..MAP_SIZE {
        assert_eq!(map.get(&(i as u8)), None);
    }
    assert_eq!(map.len(), 0);
}

#[test]
#[cfg_attr(miri, ignore)]
fn mixed_operation() {
    const NBR_THREADS: usize = 3;
    const RANGE: usize = MAP_SIZE - 1;

    let map: Arc<HashTrie<u8, usize>> = Arc::new(HashTrie::new(4).unwrap());
    let barrier = Arc::new(Barrier::new(NBR_THREADS * 3));
    let updated: Arc<Vec<AtomicBool>> =
        Arc::new((0..RANGE).map(|_| AtomicBool::new(false)).collect());
    let removed: Arc<Vec<AtomicBool>> =
        Arc::new((0..RANGE).map(|_| AtomicBool::new(false)).collect());
    let mut handles = vec![];

    for i in 0..NBR_THREADS {
        let low = block_low(i, NBR_THREADS, RANGE);
        let high = block_high(i, NBR_THREADS, RANGE);

        let m = map.clone();
        let b = barrier.clone();
        handles.push(thread::spawn(move || {
            b.wait();
            for j in low..=high {
                assert_eq!(m.insert(j as u8, 2 * j), OperationResult::Success);
            }
        }));

        let m = map.clone();
        let b = barrier.clone();
        let updated = updated.clone();
        handles.push(thread::spawn(move || {
            b.wait();
            for j in low..=high {
                if m.update(&(j as u8), 4 * j).succeeded() {
                    updated[j].store(true, Ordering::Relaxed);
                }
            }
        }));

        let m = map.clone();
        let b = barrier.clone();
        let removed = removed.clone();
        handles.push(thread::spawn(move || {
            b.wait();
            for j in low..=high {
                if m.remove(&(j as u8)).succeeded() {
                    removed[j].store(true, Ordering::Relaxed);
                }
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    for i in 0..RANGE {
        let got = map.get(&(i as u8));
        if removed[i].load(Ordering::Relaxed) {
            assert_eq!(got, None);
        } else if updated[i].load(Ordering::Relaxed) {
            assert_eq!(got, Some(4 * i));
        } else {
            assert_eq!(got, Some(2 * i));
        }
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_insert_distinct_ranges() {
    let map: Arc<HashTrie<u64, u64>> = Arc::new(HashTrie::new(4).unwrap());
    let mut handles = vec![];

    for t in 0..4u64 {
        let m = map.clone();
        handles.push(thread::spawn(move || {
            for i in 0..1000 {
                let key = t * 1000 + i;
                assert_eq!(m.insert(key, key * 2), OperationResult::Success);
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    for t in 0..4u64 {
        for i in 0..1000 {
            let key = t * 1000 + i;
            assert_eq!(map.get(&key), Some(key * 2));
        }
    }
    assert_eq!(map.len(), 4000);
}

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_readers_during_inserts() {
    let map: Arc<HashTrie<u64, u64>> = Arc::new(HashTrie::new(4).unwrap());
    let mut handles = vec![];

    for t in 0..4u64 {
        let m = map.clone();
        handles.push(thread::spawn(move || {
            for i in 0..1000 {
                let key = t * 1000 + i;
                m.insert(key, key * 2);
            }
        }));
    }

    for _ in 0..4 {
        let m = map.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..1000 {
                if let Some(v) = m.get(&500) {
                    assert_eq!(v, 1000);
                }
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    for t in 0..4u64 {
        for i in 0..1000 {
            let key = t * 1000 + i;
            assert_eq!(map.get(&key), Some(key * 2));
        }
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn insert_remove_churn_keeps_len_consistent() {
    const NBR_THREADS: usize = 8;
    const KEYS: u64 = 32;
    const ROUNDS: usize = 2000;

    let map: Arc<HashTrie<u64, u64>> = Arc::new(HashTrie::new(4).unwrap());
    let barrier = Arc::new(Barrier::new(NBR_THREADS));
    let mut handles = vec![];

    for t in 0..NBR_THREADS {
        let m = map.clone();
        let b = barrier.clone();
        handles.push(thread::spawn(move || {
            b.wait();
            for round in 0..ROUNDS {
                let key = ((t + round) as u64) % KEYS;
                if round % 2 == 0 {
                    m.insert(key, key);
                } else {
                    m.remove(&key);
                }
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let mut present = 0;
    for key in 0..KEYS {
        match map.get(&key) {
            Some(v) => {
                assert_eq!(v, key);
                present += 1;
            }
            None => {}
        }
    }
    assert_eq!(map.len(), present);
}

#[test]
#[cfg_attr(miri, ignore)]
fn contended_updates_on_one_key() {
    const NBR_THREADS: usize = 8;
    const ROUNDS: u64 = 1000;

    let map: Arc<HashTrie<u64, u64>> = Arc::new(HashTrie::new(4).unwrap());
    map.insert(0, 0);
    let barrier = Arc::new(Barrier::new(NBR_THREADS));
    let mut handles = vec![];

    for t in 0..NBR_THREADS as u64 {
        let m = map.clone();
        let b = barrier.clone();
        handles.push(thread::spawn(move || {
            b.wait();
            let mut ok = 0usize;
            for _ in 0..ROUNDS {
                // A lost replacement race reports ElementNotFound, so only
                // count the updates that actually landed.
                if m.update(&0, t).succeeded() {
                    ok += 1;
                }
            }
            ok
        }));
    }

    let mut total_ok = 0usize;
    for h in handles {
        total_ok += h.join().unwrap();
    }

    assert!(total_ok > 0);
    let v = map.get(&0).unwrap();
    assert!(v < NBR_THREADS as u64);
    assert_eq!(map.len(), 1);
}

#[test]
#[cfg_attr(miri, ignore)]
fn single_key_reader_writer_churn() {
    const WRITERS: usize = 4;
    const READERS: usize = 4;
    const ROUNDS: u64 = 10_000;

    let map: Arc<HashTrie<u64, u64>> = Arc::new(HashTrie::new(4).unwrap());
    let barrier = Arc::new(Barrier::new(WRITERS + READERS));
    let mut handles = vec![];

    for _ in 0..WRITERS {
        let m = map.clone();
        let b = barrier.clone();
        handles.push(thread::spawn(move || {
            b.wait();
            for round in 0..ROUNDS {
                if round % 8 == 0 {
                    m.remove(&0);
                    m.insert(0, round);
                } else {
                    m.update(&0, round);
                }
            }
        }));
    }

    for _ in 0..READERS {
        let m = map.clone();
        let b = barrier.clone();
        handles.push(thread::spawn(move || {
            b.wait();
            for _ in 0..ROUNDS {
                // Every read must come back, with a value some writer put
                // there or nothing at all.
                if let Some(v) = m.get(&0) {
                    assert!(v < ROUNDS);
                }
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    match map.get(&0) {
        Some(v) => {
            assert!(v < ROUNDS);
            assert_eq!(map.len(), 1);
        }
        None => assert_eq!(map.len(), 0),
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn deepest_level_single_key_contention() {
    const WRITERS: usize = 4;
    const READERS: usize = 4;
    const ROUNDS: u64 = 5_000;

    // Key 7 lives in a deepest-level slot, where contention cannot be
    // resolved by expanding further down.
    let map: Arc<HashTrie<u64, u64, TopBits>> =
        Arc::new(HashTrie::with_hasher(TopBits, 4, 128, 128).unwrap());
    assert_eq!(map.insert(7, 0), OperationResult::Success);

    let barrier = Arc::new(Barrier::new(WRITERS + READERS));
    let mut handles = vec![];

    for _ in 0..WRITERS {
        let m = map.clone();
        let b = barrier.clone();
        handles.push(thread::spawn(move || {
            b.wait();
            for round in 0..ROUNDS {
                if round % 8 == 0 {
                    m.remove(&7);
                    m.insert(7, round);
                } else {
                    m.update(&7, round);
                }
            }
        }));
    }

    for _ in 0..READERS {
        let m = map.clone();
        let b = barrier.clone();
        handles.push(thread::spawn(move || {
            b.wait();
            for _ in 0..ROUNDS {
                if let Some(v) = m.get(&7) {
                    assert!(v < ROUNDS);
                }
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    match map.get(&7) {
        Some(v) => {
            assert!(v < ROUNDS);
            assert_eq!(map.len(), 1);
        }
        None => assert_eq!(map.len(), 0),
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn thread_limit_exceeded_is_reported() {
    const NBR_THREADS: usize = 32;

    let map: Arc<HashTrie<u64, u64>> = Arc::new(HashTrie::with_config(4, 2, 2).unwrap());
    let barrier = Arc::new(Barrier::new(NBR_THREADS));
    let mut handles = vec![];

    for t in 0..NBR_THREADS as u64 {
        let m = map.clone();
        let b = barrier.clone();
        handles.push(thread::spawn(move || {
            // The barriers keep all threads alive at once, so their dense
            // ids are distinct and at most two fit the budget of 2.
            b.wait();
            let inserted = m.insert(t, t);
            let updated = m.update(&t, t + 1);
            let removed = m.remove(&t);
            let got = m.get(&t);
            b.wait();
            (inserted, updated, removed, got)
        }));
    }

    let mut turned_away = 0;
    for h in handles {
        let (inserted, updated, removed, got) = h.join().unwrap();
        if inserted == OperationResult::ThreadLimitExceeded {
            assert_eq!(updated, OperationResult::ThreadLimitExceeded);
            assert_eq!(removed, OperationResult::ThreadLimitExceeded);
            assert_eq!(got, None);
            turned_away += 1;
        }
    }
    assert!(turned_away >= NBR_THREADS - 2);
    assert!(map.is_empty());
}
