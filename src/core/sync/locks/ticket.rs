/*!
 * Ticket Spin Lock
 *
 * Two counters: `sequence` hands out tickets, `next_sequence` names the
 * ticket allowed in. Acquire takes a ticket and spins (adaptively) until it
 * is served; release serves the next ticket. Tickets are served in issue
 * order, so the lock is strictly FIFO and starvation-free.
 *
 * There is no try-lock, no timeout and no reentrancy: acquiring twice on one
 * thread deadlocks.
 */

use crate::core::config::SpinConfig;
use crate::core::sync::wait::AdaptiveSpinWait;
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

/// Counter on its own cache line
#[repr(C, align(64))]
struct PaddedCounter(AtomicU32);

impl PaddedCounter {
    const fn new() -> Self {
        Self(AtomicU32::new(0))
    }
}

/// FIFO spin lock protecting a `T`
///
/// `TicketSpinLock<()>` is a bare lock with `enter`/`exit`.
pub struct TicketSpinLock<T = ()> {
    sequence: PaddedCounter,
    next_sequence: PaddedCounter,
    spin: SpinConfig,
    data: UnsafeCell<T>,
}

// Safety: access to `data` is serialized by the ticket protocol
unsafe impl<T: Send> Send for TicketSpinLock<T> {}
unsafe impl<T: Send> Sync for TicketSpinLock<T> {}

impl<T> TicketSpinLock<T> {
    pub fn new(data: T) -> Self {
        Self::with_config(data, SpinConfig::default())
    }

    /// Waiters sleep 1ms per step once they have spun `sleep_threshold` times
    pub fn with_sleep_threshold(data: T, sleep_threshold: Option<u32>) -> Self {
        Self::with_config(
            data,
            SpinConfig {
                sleep_threshold,
                ..SpinConfig::default()
            },
        )
    }

    pub fn with_config(data: T, spin: SpinConfig) -> Self {
        Self {
            sequence: PaddedCounter::new(),
            next_sequence: PaddedCounter::new(),
            spin,
            data: UnsafeCell::new(data),
        }
    }

    /// Block until the lock is held
    pub fn lock(&self) -> TicketGuard<'_, T> {
        self.acquire();
        TicketGuard {
            lock: self,
            _marker: PhantomData,
        }
    }

    /// True while some thread holds the lock
    pub fn is_locked(&self) -> bool {
        self.sequence.0.load(Ordering::Relaxed) != self.next_sequence.0.load(Ordering::Relaxed)
    }

    /// Threads queued behind the current holder (a racy snapshot)
    pub fn waiters(&self) -> u32 {
        let issued = self.sequence.0.load(Ordering::Relaxed);
        let served = self.next_sequence.0.load(Ordering::Relaxed);
        issued.wrapping_sub(served).saturating_sub(1)
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    #[inline]
    fn acquire(&self) {
        let ticket = self.sequence.0.fetch_add(1, Ordering::Relaxed);
        if self.next_sequence.0.load(Ordering::Acquire) == ticket {
            return;
        }

        let mut spin = AdaptiveSpinWait::with_config(self.spin);
        while self.next_sequence.0.load(Ordering::Acquire) != ticket {
            spin.spin_once();
        }
    }

    #[inline]
    fn release(&self) {
        self.next_sequence.0.fetch_add(1, Ordering::Release);
    }
}

impl TicketSpinLock<()> {
    /// Take a ticket and wait for it to be served
    #[inline]
    pub fn enter(&self) {
        self.acquire();
    }

    /// Serve the next ticket
    ///
    /// Must pair with a preceding `enter` by the holder; an unpaired call lets
    /// the next waiter in while the lock is still held.
    #[inline]
    pub fn exit(&self) {
        self.release();
    }
}

impl<T: Default> Default for TicketSpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for TicketSpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketSpinLock")
            .field("sequence", &self.sequence.0.load(Ordering::Relaxed))
            .field("next_sequence", &self.next_sequence.0.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Holds the lock until dropped
pub struct TicketGuard<'a, T> {
    lock: &'a TicketSpinLock<T>,
    _marker: PhantomData<&'a mut T>,
}

impl<T> Deref for TicketGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard proves we hold the lock
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for TicketGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard proves we hold the lock
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for TicketGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
