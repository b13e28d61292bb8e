//! Lock-Free SPSC Sample Ring
//!
//! Moves f32 samples from exactly one producer thread (a device capture
//! callback, or the engine tick) to exactly one consumer thread (the
//! engine tick, or a device playback callback) without locking or
//! allocating.
//!
//! Layout: a power-of-two slot array plus two monotonically increasing
//! positions. The producer owns the write position, the consumer owns
//! the read position; each is padded to its own cache line so the two
//! sides never false-share. Indexing is position AND (capacity - 1).
//!
//! Memory ordering: samples are stored with Relaxed atomics (f32 carried
//! as bits - AtomicF32 does not exist), then published by a Release
//! store of the write position. The consumer Acquires the write position
//! before loading samples, which makes every published sample visible.
//! The read position is published/consumed symmetrically so the producer
//! never overwrites unread slots.
//!
//! Failure semantics: `write` on a full ring copies what fits and
//! returns the short count (overrun - the caller counts it and moves
//! on); `read` on an empty ring returns the short count (underrun - the
//! caller zero-fills the remainder). Neither side ever blocks.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

struct RingInner {
    /// Sample slots; f32 bits in relaxed atomics
    slots: Box<[AtomicU32]>,
    /// Total samples ever written; owned by the producer
    write_pos: CachePadded<AtomicUsize>,
    /// Total samples ever read; owned by the consumer
    read_pos: CachePadded<AtomicUsize>,
    /// Slot-index mask, capacity - 1
    mask: usize,
}

impl RingInner {
    fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn occupancy(&self) -> usize {
        // Positions increase monotonically (wrapping); the difference is
        // the number of samples written but not yet read.
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

/// Producer half of a sample ring. Not `Clone`; exactly one exists.
pub struct RingProducer {
    inner: Arc<RingInner>,
}

/// Consumer half of a sample ring. Not `Clone`; exactly one exists.
pub struct RingConsumer {
    inner: Arc<RingInner>,
}

/// Create a ring with the given capacity in samples, rounded up to the
/// next power of two (minimum 2).
pub fn sample_ring(capacity: usize) -> (RingProducer, RingConsumer) {
    let capacity = capacity.max(2).next_power_of_two();
    let slots = (0..capacity)
        .map(|_| AtomicU32::new(0.0f32.to_bits()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let inner = Arc::new(RingInner {
        slots,
        write_pos: CachePadded::new(AtomicUsize::new(0)),
        read_pos: CachePadded::new(AtomicUsize::new(0)),
        mask: capacity - 1,
    });

    (
        RingProducer {
            inner: Arc::clone(&inner),
        },
        RingConsumer { inner },
    )
}

impl RingProducer {
    /// Copy up to `min(block.len(), available)` samples in; returns the
    /// count written. Never blocks, never allocates.
    pub fn write(&mut self, block: &[f32]) -> usize {
        let inner = &*self.inner;
        let write = inner.write_pos.load(Ordering::Relaxed);
        let read = inner.read_pos.load(Ordering::Acquire);
        let free = inner.capacity() - write.wrapping_sub(read);
        let count = block.len().min(free);

        for (i, &sample) in block[..count].iter().enumerate() {
            let slot = write.wrapping_add(i) & inner.mask;
            inner.slots[slot].store(sample.to_bits(), Ordering::Relaxed);
        }

        // Publish: samples stored above become visible to the consumer
        inner
            .write_pos
            .store(write.wrapping_add(count), Ordering::Release);
        count
    }

    /// Samples currently buffered.
    pub fn occupancy(&self) -> usize {
        self.inner.occupancy()
    }

    /// Free space in samples.
    pub fn available(&self) -> usize {
        self.inner.capacity() - self.inner.occupancy()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl RingConsumer {
    /// Drain up to `min(out.len(), occupancy)` samples; returns the count
    /// read. The caller zero-fills the remainder on a short read.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let inner = &*self.inner;
        let read = inner.read_pos.load(Ordering::Relaxed);
        // Acquire pairs with the producer's Release publish
        let write = inner.write_pos.load(Ordering::Acquire);
        let occupied = write.wrapping_sub(read);
        let count = out.len().min(occupied);

        for (i, sample) in out[..count].iter_mut().enumerate() {
            let slot = read.wrapping_add(i) & inner.mask;
            *sample = f32::from_bits(inner.slots[slot].load(Ordering::Relaxed));
        }

        // Release the drained slots back to the producer
        inner
            .read_pos
            .store(read.wrapping_add(count), Ordering::Release);
        count
    }

    /// Drain into `out`, zero-filling any shortfall. Returns the number
    /// of real samples read (the rest is silence).
    pub fn read_or_silence(&mut self, out: &mut [f32]) -> usize {
        let read = self.read(out);
        out[read..].fill(0.0);
        read
    }

    pub fn occupancy(&self) -> usize {
        self.inner.occupancy()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}
