//! Lock-free single-producer/single-consumer sample ring.
//!
//! Capacity is rounded up to a power of two so indices wrap with a mask. One
//! slot is always left empty to tell "full" from "empty", so a ring of
//! capacity `N` holds at most `N - 1` samples and
//! `read_space() + write_space() == N - 1` whenever both indices are observed
//! from one side.
//!
//! Each side copies in at most two contiguous segments and only then publishes
//! its index with `Release`. The other side loads that index with `Acquire`
//! before touching the slots, so a reader never observes a half-written slot.
//!
//! ```ignore
//! let (mut producer, mut consumer) = RingBuffer::with_capacity::<f32>(8);
//! assert_eq!(producer.capacity(), 8);
//! assert_eq!(producer.write(&[1.0; 10]), 7);
//! ```

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    mask: usize,
    write_index: AtomicUsize,
    read_index: AtomicUsize,
}

// SAFETY: the producer only writes slots in the free region, which the
// consumer cannot observe until the write index is published. The consumer
// only reads slots in the published region, which the producer will not
// reuse until the read index is published.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline]
    fn write_space(&self) -> usize {
        let w = self.write_index.load(Ordering::Acquire);
        let r = self.read_index.load(Ordering::Acquire);
        r.wrapping_sub(w).wrapping_sub(1) & self.mask
    }

    #[inline]
    fn read_space(&self) -> usize {
        let w = self.write_index.load(Ordering::Acquire);
        let r = self.read_index.load(Ordering::Acquire);
        w.wrapping_sub(r) & self.mask
    }

    #[inline]
    fn base(&self) -> *mut T {
        UnsafeCell::raw_get(self.slots.as_ptr())
    }
}

/// Constructor namespace for the sample ring.
pub struct RingBuffer;

impl RingBuffer {
    /// Create a ring holding at least `capacity - 1` samples.
    ///
    /// The actual capacity is `capacity` rounded up to the next power of two
    /// (minimum 2). Allocates once; nothing is allocated afterwards.
    pub fn with_capacity<T: Copy + Default>(capacity: usize) -> (RingProducer<T>, RingConsumer<T>) {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity).map(|_| UnsafeCell::new(T::default())).collect();

        let shared = Arc::new(Shared {
            slots,
            mask: capacity - 1,
            write_index: AtomicUsize::new(0),
            read_index: AtomicUsize::new(0),
        });

        (
            RingProducer {
                shared: Arc::clone(&shared),
            },
            RingConsumer { shared },
        )
    }
}

/// Writing half of the ring. Owned by the audio callback.
pub struct RingProducer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> RingProducer<T> {
    /// Ring capacity (a power of two).
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Samples that can be written without overrunning the reader.
    pub fn write_space(&self) -> usize {
        self.shared.write_space()
    }

    /// Samples published but not yet consumed.
    pub fn read_space(&self) -> usize {
        self.shared.read_space()
    }

    /// Copy as many samples as fit and return how many were written.
    ///
    /// A short write is not an error; the caller decides whether it counts as
    /// an overrun.
    pub fn write(&mut self, samples: &[T]) -> usize {
        let shared = &*self.shared;
        let w = shared.write_index.load(Ordering::Relaxed);
        let r = shared.read_index.load(Ordering::Acquire);
        let free = r.wrapping_sub(w).wrapping_sub(1) & shared.mask;

        let count = samples.len().min(free);
        if count == 0 {
            return 0;
        }

        let first = count.min(shared.capacity() - w);
        // SAFETY: `[w, w + count)` (mod capacity) lies inside the free region,
        // and `first` never runs past the end of the slot array.
        unsafe {
            let base = shared.base();
            ptr::copy_nonoverlapping(samples.as_ptr(), base.add(w), first);
            ptr::copy_nonoverlapping(samples.as_ptr().add(first), base, count - first);
        }

        shared
            .write_index
            .store((w + count) & shared.mask, Ordering::Release);
        count
    }
}

/// Reading half of the ring. Owned by the worker thread.
pub struct RingConsumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> RingConsumer<T> {
    /// Ring capacity (a power of two).
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Samples that can be written without overrunning the reader.
    pub fn write_space(&self) -> usize {
        self.shared.write_space()
    }

    /// Samples available to read.
    pub fn read_space(&self) -> usize {
        self.shared.read_space()
    }

    pub fn is_empty(&self) -> bool {
        self.read_space() == 0
    }

    /// Copy up to `out.len()` samples out and return how many were read.
    pub fn read(&mut self, out: &mut [T]) -> usize {
        let shared = &*self.shared;
        let r = shared.read_index.load(Ordering::Relaxed);
        let w = shared.write_index.load(Ordering::Acquire);
        let available = w.wrapping_sub(r) & shared.mask;

        let count = out.len().min(available);
        if count == 0 {
            return 0;
        }

        let first = count.min(shared.capacity() - r);
        // SAFETY: `[r, r + count)` (mod capacity) was published by the
        // producer's release store, which we acquired above.
        unsafe {
            let base = shared.base();
            ptr::copy_nonoverlapping(base.add(r), out.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), count - first);
        }

        shared
            .read_index
            .store((r + count) & shared.mask, Ordering::Release);
        count
    }
}
