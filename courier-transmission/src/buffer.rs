use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::transmission::Transmission;

#[derive(Debug, Default)]
struct BufferState {
    queue: VecDeque<Transmission>,
    size: usize,
}

/// A FIFO queue of transmissions bounded by their total size in bytes.
#[derive(Debug)]
pub struct TransmissionBuffer {
    capacity: AtomicUsize,
    state: Mutex<BufferState>,
}

impl TransmissionBuffer {
    /// Creates an empty buffer that holds up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: AtomicUsize::new(capacity),
            state: Mutex::default(),
        }
    }

    /// The maximum total size in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Changes the maximum total size.
    ///
    /// Transmissions already in the buffer are kept even if they exceed the new capacity.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    /// Appends a transmission, or hands it back if it does not fit.
    pub fn try_push(&self, transmission: Transmission) -> Result<(), Transmission> {
        let mut state = self.state.lock();
        if state.size + transmission.size() > self.capacity() {
            return Err(transmission);
        }

        state.size += transmission.size();
        state.queue.push_back(transmission);
        Ok(())
    }

    /// Removes the oldest transmission.
    pub fn pop(&self) -> Option<Transmission> {
        let mut state = self.state.lock();
        let transmission = state.queue.pop_front()?;
        state.size -= transmission.size();
        Some(transmission)
    }

    /// The number of transmissions in the buffer.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns `true` if the buffer holds no transmissions.
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// The total size of all buffered transmissions in bytes.
    pub fn size(&self) -> usize {
        self.state.lock().size
    }
}
