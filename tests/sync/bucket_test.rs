/*!
 * Concurrent Fixed Bucket Tests
 * Capacity bound under concurrent rent and the recycle handoff
 */

use pretty_assertions::assert_eq;
use slabkit::{ConcurrentFixedBucket, PoolError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const CAPACITY: usize = 8;

fn rent_concurrently(bucket: &Arc<ConcurrentFixedBucket>, threads: usize) -> Vec<Option<usize>> {
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let bucket = Arc::clone(bucket);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                bucket.try_rent()
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_capacity_bound_under_concurrency() {
    let bucket = Arc::new(ConcurrentFixedBucket::new(CAPACITY).unwrap());

    let rented = rent_concurrently(&bucket, CAPACITY);
    let indices: HashSet<_> = rented.iter().map(|r| r.expect("within capacity")).collect();
    assert_eq!(indices.len(), CAPACITY);
    assert!(indices.iter().all(|&i| i < CAPACITY));

    // capacity + 1th rent fails
    assert_eq!(bucket.try_rent(), None);
    assert_eq!(bucket.count(), CAPACITY);

    // one return admits exactly one more rent, even when several race for it
    bucket.release(3).unwrap();
    let raced = rent_concurrently(&bucket, 4);
    let winners: Vec<_> = raced.into_iter().flatten().collect();
    assert_eq!(winners, vec![3]);
    assert_eq!(bucket.count(), CAPACITY);
}

#[test]
fn test_churn_keeps_count_in_range() {
    let bucket = Arc::new(ConcurrentFixedBucket::new(CAPACITY).unwrap());
    let failures = Arc::new(AtomicUsize::new(0));

    // twice as many threads as indices: rents may fail, counts stay bounded
    let handles: Vec<_> = (0..CAPACITY * 2)
        .map(|_| {
            let bucket = Arc::clone(&bucket);
            let failures = Arc::clone(&failures);
            thread::spawn(move || {
                for _ in 0..2_000 {
                    match bucket.try_rent() {
                        Some(index) => {
                            assert!(bucket.count() <= CAPACITY);
                            bucket.release(index).unwrap();
                        }
                        None => {
                            failures.fetch_add(1, Ordering::Relaxed);
                            thread::yield_now();
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(bucket.count(), 0);
    assert_eq!(bucket.issued(), bucket.returned());
    assert_eq!(
        bucket.issued() + failures.load(Ordering::Relaxed) as u64,
        (CAPACITY * 2 * 2_000) as u64
    );
}

#[test]
fn test_foreign_and_duplicate_indices_rejected() {
    let bucket = ConcurrentFixedBucket::new(CAPACITY).unwrap();
    let index = bucket.try_rent().unwrap();

    let err = bucket.release(CAPACITY).unwrap_err();
    assert!(err.is_protocol_violation());

    bucket.release(index).unwrap();
    assert_eq!(bucket.release(index), Err(PoolError::DuplicateReturn { index }));
}
