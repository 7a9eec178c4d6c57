use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// The number of values staged before they are folded into the running aggregate.
pub const DEFAULT_CAPACITY: usize = 500;

/// Bit pattern of an unwritten slot. Staged values are never `NaN`, so a `NaN` payload is free.
const EMPTY: u64 = u64::MAX;

/// The number of busy iterations before yielding to the scheduler while waiting for a slot.
const SPINS_BEFORE_YIELD: u32 = 64;

/// Outcome of [`ValueBuffer::write`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteResult {
    /// The value was staged.
    Written,
    /// The value was staged into the last slot. The writer must flush the buffer.
    Filled,
    /// The buffer is full and waiting for a flush. The writer must retry.
    Full,
}

/// A fixed array of slots that concurrent writers fill without taking a lock.
///
/// Writers reserve a slot by incrementing `next_write` and store their value into it. The writer
/// reserving the last slot is responsible for draining the buffer and calling
/// [`reset`](Self::reset). Drains run under the lock of the owning aggregator and wait for
/// reserved slots that are not yet written.
#[derive(Debug)]
pub struct ValueBuffer {
    slots: Box<[AtomicU64]>,
    next_write: AtomicUsize,
}

impl ValueBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity.max(1)).map(|_| AtomicU64::new(EMPTY)).collect(),
            next_write: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Stages a value that must not be `NaN`.
    pub fn write(&self, value: f64) -> WriteResult {
        debug_assert!(!value.is_nan());

        let index = self.next_write.fetch_add(1, Ordering::AcqRel);
        let Some(slot) = self.slots.get(index) else {
            return WriteResult::Full;
        };

        slot.store(value.to_bits(), Ordering::Release);

        match index + 1 == self.slots.len() {
            true => WriteResult::Filled,
            false => WriteResult::Written,
        }
    }

    /// Returns the number of reserved slots.
    pub fn reserved(&self) -> usize {
        self.next_write.load(Ordering::Acquire).min(self.slots.len())
    }

    /// Takes the values of the slots in `from..to`, waiting for reserved slots to be written.
    pub fn drain(&self, from: usize, to: usize, mut f: impl FnMut(f64)) {
        for slot in &self.slots[from..to] {
            let mut spins = 0;
            let bits = loop {
                match slot.swap(EMPTY, Ordering::AcqRel) {
                    EMPTY => backoff(&mut spins),
                    bits => break bits,
                }
            };

            f(f64::from_bits(bits));
        }
    }

    /// Releases all slots for writing. Must only be called once every slot has been drained.
    pub fn reset(&self) {
        self.next_write.store(0, Ordering::Release);
    }
}

/// Waits a little before retrying an operation on the buffer.
pub fn backoff(spins: &mut u32) {
    if *spins < SPINS_BEFORE_YIELD {
        *spins += 1;
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
}
