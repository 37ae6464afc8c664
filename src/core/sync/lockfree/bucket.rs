/*!
 * Concurrent Fixed Bucket
 *
 * Hands out indices in `0..capacity` to concurrent callers without a lock.
 *
 * Fresh indices come from a monotonic counter that stops at `capacity`.
 * Returned indices go through a stack of mailbox cells: a returner reserves
 * cell `r` by CAS-incrementing the recycle cursor, then publishes `index + 1`
 * into it; a renter claims cell `r - 1` by CAS-decrementing the cursor, then
 * waits for the publish (it can lag the cursor) and swaps the cell empty.
 *
 * An occupancy bitmap catches duplicate returns, and monotonic issued and
 * returned counters give `count = issued - returned`.
 */

use crate::core::config::{PoolConfig, SpinConfig};
use crate::core::errors::{PoolError, PoolResult};
use crate::core::limits::MIN_SLOT_CAPACITY;
use crate::core::sync::wait::AdaptiveSpinWait;
use crate::memory::bitmap::{words_for, WORD_BITS};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, error};

const EMPTY: usize = 0;

/// Lock-free bounded index allocator
pub struct ConcurrentFixedBucket {
    fresh: AtomicUsize,
    recycle: AtomicUsize,
    cells: Box<[AtomicUsize]>,
    occupied: Box<[AtomicU64]>,
    issued: AtomicU64,
    returned: AtomicU64,
    capacity: usize,
    spin: SpinConfig,
}

impl ConcurrentFixedBucket {
    /// Bucket of `capacity` indices (clamped to at least one)
    pub fn new(capacity: usize) -> PoolResult<Self> {
        Self::with_config(capacity, SpinConfig::default())
    }

    pub fn with_config(capacity: usize, spin: SpinConfig) -> PoolResult<Self> {
        spin.validate()?;
        let capacity = PoolConfig::new(capacity, 0).clamped_size(MIN_SLOT_CAPACITY);
        if capacity == usize::MAX {
            return Err(PoolError::invalid("capacity", i64::MAX, "index + 1 must fit in usize"));
        }

        debug!(capacity, "concurrent bucket created");
        Ok(Self {
            fresh: AtomicUsize::new(0),
            recycle: AtomicUsize::new(0),
            cells: (0..capacity).map(|_| AtomicUsize::new(EMPTY)).collect(),
            occupied: (0..words_for(capacity)).map(|_| AtomicU64::new(0)).collect(),
            issued: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            capacity,
            spin,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Indices currently rented
    pub fn count(&self) -> usize {
        let returned = self.returned.load(Ordering::Acquire);
        let issued = self.issued.load(Ordering::Acquire);
        (issued.saturating_sub(returned) as usize).min(self.capacity)
    }

    /// Successful rents since creation
    #[inline]
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    /// Successful returns since creation
    #[inline]
    pub fn returned(&self) -> u64 {
        self.returned.load(Ordering::Relaxed)
    }

    /// Rent an index, or `None` when `capacity` indices are out
    pub fn try_rent(&self) -> Option<usize> {
        let index = match self.claim_recycled() {
            Some(index) => index,
            None => self.claim_fresh()?,
        };

        let (word, mask) = locate(index);
        let previous = self.occupied[word].fetch_or(mask, Ordering::AcqRel);
        debug_assert_eq!(previous & mask, 0, "index {} handed out twice", index);

        self.issued.fetch_add(1, Ordering::Release);
        Some(index)
    }

    /// Give an index back
    pub fn release(&self, index: usize) -> PoolResult<()> {
        if index >= self.capacity {
            return Err(report(PoolError::IndexOutOfRange {
                index,
                capacity: self.capacity,
            }));
        }

        let (word, mask) = locate(index);
        let previous = self.occupied[word].fetch_and(!mask, Ordering::AcqRel);
        if previous & mask == 0 {
            return Err(report(PoolError::DuplicateReturn { index }));
        }
        self.returned.fetch_add(1, Ordering::Release);

        let mut spin = AdaptiveSpinWait::with_config(self.spin);
        let cell = loop {
            let r = self.recycle.load(Ordering::Acquire);
            // at most `capacity` indices can be out, so r < capacity here
            if self
                .recycle
                .compare_exchange_weak(r, r + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break r;
            }
            spin.spin_once();
        };

        // A renter may not have emptied this cell yet
        spin.reset();
        while self.cells[cell]
            .compare_exchange_weak(EMPTY, index + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            spin.spin_once();
        }
        Ok(())
    }

    /// True while `index` is rented
    pub fn is_rented(&self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        let (word, mask) = locate(index);
        self.occupied[word].load(Ordering::Acquire) & mask != 0
    }

    fn claim_recycled(&self) -> Option<usize> {
        let mut spin = AdaptiveSpinWait::with_config(self.spin);
        let cell = loop {
            let r = self.recycle.load(Ordering::Acquire);
            if r == 0 {
                return None;
            }
            if self
                .recycle
                .compare_exchange_weak(r, r - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break r - 1;
            }
            spin.spin_once();
        };

        // The returner reserved this cell before publishing into it
        spin.reset();
        loop {
            let value = self.cells[cell].swap(EMPTY, Ordering::AcqRel);
            if value != EMPTY {
                return Some(value - 1);
            }
            spin.spin_once();
        }
    }

    fn claim_fresh(&self) -> Option<usize> {
        if self.fresh.load(Ordering::Relaxed) >= self.capacity {
            return None;
        }
        let index = self.fresh.fetch_add(1, Ordering::AcqRel);
        if index >= self.capacity {
            self.fresh.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(index)
    }
}

#[inline]
fn locate(index: usize) -> (usize, u64) {
    (index / WORD_BITS, 1u64 << (index % WORD_BITS))
}

fn report(err: PoolError) -> PoolError {
    error!(error = %err, "bucket protocol violation");
    err
}

impl fmt::Debug for ConcurrentFixedBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentFixedBucket")
            .field("capacity", &self.capacity)
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}
