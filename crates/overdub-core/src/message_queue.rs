//! Lock-free single-producer/single-consumer queue of fixed-size messages.
//!
//! Same index discipline as [`crate::ring_buffer`], but over whole messages.
//! Messages must be `Copy` so that push and pop are plain slot copies with no
//! drop glue and no heap traffic. A full queue rejects the push and leaves
//! existing entries untouched; the caller owns the policy for dropped messages.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    write_index: AtomicUsize,
    read_index: AtomicUsize,
}

// SAFETY: a slot is written only by the sender before the write index is
// published, and read only by the receiver after acquiring that index.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn len(&self) -> usize {
        let w = self.write_index.load(Ordering::Acquire);
        let r = self.read_index.load(Ordering::Acquire);
        w.wrapping_sub(r) & self.mask
    }
}

/// Constructor namespace for the message queue.
pub struct MessageQueue;

impl MessageQueue {
    /// Create a queue holding at least `capacity - 1` messages.
    ///
    /// Capacity is rounded up to the next power of two (minimum 2).
    pub fn with_capacity<T: Copy + Send>(capacity: usize) -> (MessageSender<T>, MessageReceiver<T>) {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();

        let shared = Arc::new(Shared {
            slots,
            mask: capacity - 1,
            write_index: AtomicUsize::new(0),
            read_index: AtomicUsize::new(0),
        });

        (
            MessageSender {
                shared: Arc::clone(&shared),
            },
            MessageReceiver { shared },
        )
    }
}

/// Sending half. Never blocks.
pub struct MessageSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> MessageSender<T> {
    /// Enqueue a message. Returns `false` if the queue is full.
    pub fn push(&mut self, message: T) -> bool {
        let shared = &*self.shared;
        let w = shared.write_index.load(Ordering::Relaxed);
        let r = shared.read_index.load(Ordering::Acquire);
        let next = (w + 1) & shared.mask;
        if next == r {
            return false;
        }

        // SAFETY: slot `w` is outside the published region.
        unsafe {
            (*shared.slots[w].get()).write(message);
        }
        shared.write_index.store(next, Ordering::Release);
        true
    }

    /// Maximum number of queued messages.
    pub fn capacity(&self) -> usize {
        self.shared.mask
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }
}

/// Receiving half.
pub struct MessageReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> MessageReceiver<T> {
    /// Dequeue the oldest message, if any.
    pub fn pop(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let r = shared.read_index.load(Ordering::Relaxed);
        let w = shared.write_index.load(Ordering::Acquire);
        if r == w {
            return None;
        }

        // SAFETY: slot `r` was initialized before the sender published `w`.
        let message = unsafe { (*shared.slots[r].get()).assume_init_read() };
        shared
            .read_index
            .store((r + 1) & shared.mask, Ordering::Release);
        Some(message)
    }

    /// Maximum number of queued messages.
    pub fn capacity(&self) -> usize {
        self.shared.mask
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
