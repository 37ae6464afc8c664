/*!
 * No-Aliasing Tests
 * Concurrent renters never hold the same slot at the same time
 */

use dashmap::DashSet;
use slabkit::{ConcurrentFixedBucket, FixedSlot64Pool, FixedSlotPool, PoolInfo, TicketSpinLock};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;
const ROUNDS: usize = 2_000;

#[test]
fn test_locked_slot_pool_never_aliases() {
    let pool = Arc::new(TicketSpinLock::new(FixedSlotPool::new(32, THREADS * 4).unwrap()));
    let held = Arc::new(DashSet::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let held = Arc::clone(&held);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let slot = pool.lock().try_rent().expect("capacity covers every thread");
                    let address = slot.as_ptr() as usize;
                    assert!(held.insert(address), "slot {:#x} handed out twice", address);

                    // touch the slot while holding it
                    unsafe { slot.as_ptr().write(address as u8) };
                    thread::yield_now();

                    assert!(held.remove(&address).is_some());
                    pool.lock().release(slot).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(pool.lock().live(), 0);
}

#[test]
fn test_locked_slot64_pool_never_aliases() {
    let pool = Arc::new(TicketSpinLock::new(FixedSlot64Pool::new(16, 2).unwrap()));
    let held = Arc::new(DashSet::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let held = Arc::clone(&held);
            thread::spawn(move || {
                for round in 0..ROUNDS / 10 {
                    // hold a batch so several slabs are live at once
                    let batch: Vec<_> = (0..1 + round % 40)
                        .map(|_| pool.lock().try_rent().unwrap())
                        .collect();
                    for slot in &batch {
                        assert!(held.insert(slot.as_ptr() as usize));
                    }
                    for slot in batch {
                        assert!(held.remove(&(slot.as_ptr() as usize)).is_some());
                        pool.lock().release(slot).unwrap();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(pool.lock().live(), 0);
}

#[test]
fn test_bucket_never_aliases() {
    let bucket = Arc::new(ConcurrentFixedBucket::new(THREADS).unwrap());
    let held = Arc::new(DashSet::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let bucket = Arc::clone(&bucket);
            let held = Arc::clone(&held);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    // one index per thread is always available
                    let index = bucket.try_rent().expect("capacity equals thread count");
                    assert!(held.insert(index), "index {} handed out twice", index);
                    assert!(held.remove(&index).is_some());
                    bucket.release(index).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(bucket.count(), 0);
    assert_eq!(bucket.issued(), (THREADS * ROUNDS) as u64);
}
