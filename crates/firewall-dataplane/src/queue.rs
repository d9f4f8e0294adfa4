//! Bounded SPSC Ring
//!
//! Fixed-capacity circular buffer connecting exactly one producer thread to
//! exactly one consumer thread.
//!
//! # Design
//!
//! - Pre-allocated slots (no allocation after construction)
//! - `head` and `tail` grow monotonically; slot = index % capacity
//! - Each index has a single writer, so no CAS loop is needed: the writer
//!   publishes with `Release`, the other side observes with `Acquire`
//! - Producer and consumer halves are not `Clone` and take `&mut self`,
//!   so the single-producer/single-consumer contract is checked at compile time

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Returned by [`Producer::enqueue`] when the ring is at capacity.
///
/// Carries the rejected item back so the caller can retry or redirect it.
#[derive(Error)]
#[error("queue is full")]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Take back the item that could not be enqueued
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

/// Returned by [`Consumer::dequeue`] when the ring holds no items.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("queue is empty")]
pub struct Empty;

struct Ring<T> {
    /// Next slot to read; written by the consumer only
    head: CachePadded<AtomicUsize>,
    /// Next slot to write; written by the producer only
    tail: CachePadded<AtomicUsize>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// Slots in [head, tail) are owned by the consumer side, the rest by the
// producer side; the index protocol keeps the two sets disjoint.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    #[inline(always)]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let cap = self.slots.len();
        let mut idx = head;
        while idx != tail {
            // Occupied slots hold initialized items
            unsafe { self.slots[idx % cap].get_mut().assume_init_drop() };
            idx = idx.wrapping_add(1);
        }
    }
}

/// Create a bounded ring with `capacity` slots, split into its two halves.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn bounded<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(capacity > 0, "queue capacity must be non-zero");

    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let ring = Arc::new(Ring {
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
        slots,
    });

    (
        Producer { ring: ring.clone() },
        Consumer { ring },
    )
}

/// Writing half of a bounded ring
pub struct Producer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Producer<T> {
    /// Append an item, or hand it back if the ring is full.
    ///
    /// A failed call leaves the ring untouched.
    #[inline]
    pub fn enqueue(&mut self, item: T) -> Result<(), Full<T>> {
        let ring = &*self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let head = ring.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) == ring.capacity() {
            return Err(Full(item));
        }

        // Slot at `tail` is outside [head, tail), so the consumer is not reading it
        unsafe { (*ring.slots[tail % ring.capacity()].get()).write(item) };
        ring.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Number of queued items as seen by the producer
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a further enqueue would fail
    pub fn is_full(&self) -> bool {
        self.len() == self.ring.capacity()
    }

    /// Slot count
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

/// Reading half of a bounded ring
pub struct Consumer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Consumer<T> {
    /// Remove the oldest item.
    ///
    /// A failed call leaves the ring untouched.
    #[inline]
    pub fn dequeue(&mut self) -> Result<T, Empty> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);

        if tail == head {
            return Err(Empty);
        }

        // The Acquire load of `tail` makes the producer's write to this slot visible
        let item = unsafe { (*ring.slots[head % ring.capacity()].get()).assume_init_read() };
        ring.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(item)
    }

    /// Dequeue everything currently visible
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len());
        while let Ok(item) = self.dequeue() {
            items.push(item);
        }
        items
    }

    /// Number of queued items as seen by the consumer
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}
