/*!
 * Lock-Free Stack
 *
 * Treiber stack: push and pop link nodes with a CAS on `head`. Linking is
 * lock-free, but node storage comes from a `FixedSlot64Pool` whose
 * bookkeeping is not atomic, so every rent and return of a node happens
 * under a `TicketSpinLock`.
 *
 * # Reclamation
 *
 * A popped node goes back to the pool through `crossbeam_epoch`: the return
 * is deferred until every thread that could still hold the node's address
 * has unpinned. A node therefore cannot be reused by a concurrent push while
 * a racing pop is still reading it, which rules out ABA on `head`. The node
 * pool never releases slabs on its own, so a stale read never touches
 * unmapped memory.
 */

use crate::core::config::SpinConfig;
use crate::core::limits::{POP_BACKOFF_MAX_YIELDS, STACK_NODE_FREE_SLABS};
use crate::core::sync::locks::TicketSpinLock;
use crate::core::sync::wait::AdaptiveSpinWait;
use crate::memory::{FixedSlot64Pool, PoolInfo, SlabPool};
use crossbeam_epoch as epoch;
use rand::Rng;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::error;

struct Node<T> {
    value: MaybeUninit<T>,
    next: AtomicPtr<Node<T>>,
}

type NodePool = Arc<TicketSpinLock<FixedSlot64Pool>>;

/// Concurrent LIFO stack over pooled nodes
pub struct LockFreeStack<T> {
    head: AtomicPtr<Node<T>>,
    len: AtomicUsize,
    nodes: NodePool,
    spin: SpinConfig,
    _owns: PhantomData<T>,
}

// Safety: values move between threads through push/pop; nodes are only
// reachable through `head`
unsafe impl<T: Send> Send for LockFreeStack<T> {}
unsafe impl<T: Send> Sync for LockFreeStack<T> {}

impl<T> Default for LockFreeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockFreeStack<T> {
    pub fn new() -> Self {
        Self::with_config(SpinConfig::default())
    }

    /// Pop contention and node-lock waits back off with `spin`
    pub fn with_config(spin: SpinConfig) -> Self {
        let pool = FixedSlot64Pool::with_align(size_of::<Node<T>>(), align_of::<Node<T>>(), STACK_NODE_FREE_SLABS);
        // Only fails for a Node<T> whose 64-slot slab would exceed isize::MAX
        let pool = match pool {
            Ok(pool) => pool,
            Err(err) => panic!("stack node layout rejected: {}", err),
        };

        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            len: AtomicUsize::new(0),
            nodes: Arc::new(TicketSpinLock::with_config(pool, spin)),
            spin,
            _owns: PhantomData,
        }
    }

    /// Values currently linked (a racy snapshot under contention)
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    pub fn push(&self, value: T) {
        let node = self.alloc_node(value);
        self.len.fetch_add(1, Ordering::Relaxed);
        self.link(node, node);
    }

    /// Push every item with a single CAS; the last item ends up on top
    pub fn push_range<I: IntoIterator<Item = T>>(&self, items: I) {
        let mut first: *mut Node<T> = ptr::null_mut();
        let mut last: *mut Node<T> = ptr::null_mut();
        let mut count = 0;

        for value in items {
            let node = self.alloc_node(value);
            if last.is_null() {
                last = node;
            } else {
                // Safety: node is ours until linked
                unsafe { (*node).next.store(first, Ordering::Relaxed) };
            }
            first = node;
            count += 1;
        }

        if count == 0 {
            return;
        }
        self.len.fetch_add(count, Ordering::Relaxed);
        self.link(first, last);
    }

    pub fn try_pop(&self) -> Option<T> {
        let guard = epoch::pin();
        let mut spin = AdaptiveSpinWait::with_config(self.spin);
        let mut backoff = 1u32;

        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }

            // Safety: the pin keeps `head` from returning to the pool
            let next = unsafe { (*head).next.load(Ordering::Relaxed) };
            if self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.len.fetch_sub(1, Ordering::Relaxed);
                // Safety: the CAS unlinked `head`; its value is now ours alone
                let value = unsafe { ptr::read((*head).value.as_ptr()) };

                let nodes = Arc::clone(&self.nodes);
                let address = head as usize;
                guard.defer(move || return_node(&nodes, address));
                return Some(value);
            }

            for _ in 0..backoff {
                spin.spin_once();
            }
            backoff = if spin.next_spin_will_yield() {
                rand::thread_rng().gen_range(1..POP_BACKOFF_MAX_YIELDS)
            } else {
                backoff.saturating_mul(2)
            };
        }
    }

    /// Pop until empty
    ///
    /// Not a snapshot: values pushed while draining are drained too.
    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.try_pop())
    }

    /// Drop every value and return every node to the pool
    ///
    /// Exclusive access means no pop can be racing, so nodes go straight
    /// back without deferral.
    pub fn clear(&mut self) {
        let mut node = std::mem::replace(self.head.get_mut(), ptr::null_mut());
        let mut pool = self.nodes.lock();

        while !node.is_null() {
            // Safety: the chain is exclusively ours
            let next = unsafe {
                let next = (*node).next.load(Ordering::Relaxed);
                ptr::drop_in_place((*node).value.as_mut_ptr());
                next
            };
            // Safety: every linked node came from this pool
            if let Err(err) = pool.release(unsafe { NonNull::new_unchecked(node as *mut u8) }) {
                error!(error = %err, "stack node return failed");
            }
            node = next;
        }
        *self.len.get_mut() = 0;
    }

    /// Release node slabs no longer in use; returns how many went back
    pub fn trim_excess(&mut self) -> usize {
        self.nodes.lock().trim_excess()
    }

    /// Node slots currently rented from the pool
    ///
    /// Includes popped nodes whose return is still deferred.
    pub fn nodes_in_use(&self) -> usize {
        self.nodes.lock().live()
    }

    fn alloc_node(&self, value: T) -> *mut Node<T> {
        let slot = self.nodes.lock().try_rent();
        let node = match slot {
            Some(slot) => slot.as_ptr() as *mut Node<T>,
            None => std::alloc::handle_alloc_error(std::alloc::Layout::new::<Node<T>>()),
        };

        // Safety: the slot is sized and aligned for Node<T> and unused
        unsafe {
            node.write(Node {
                value: MaybeUninit::new(value),
                next: AtomicPtr::new(ptr::null_mut()),
            });
        }
        node
    }

    /// Splice the chain `first..=last` on top of `head`
    fn link(&self, first: *mut Node<T>, last: *mut Node<T>) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // Safety: `last` is unpublished until the CAS succeeds
            unsafe { (*last).next.store(head, Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(head, first, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }
}

fn return_node(nodes: &TicketSpinLock<FixedSlot64Pool>, address: usize) {
    // address came from a live node pointer
    let Some(ptr) = NonNull::new(address as *mut u8) else {
        return;
    };
    if let Err(err) = nodes.lock().release(ptr) {
        error!(error = %err, "stack node return failed");
    }
}

impl<T> Drop for LockFreeStack<T> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T> fmt::Debug for LockFreeStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeStack").field("len", &self.len()).finish_non_exhaustive()
    }
}
