use std::fmt;

use crate::buffer::TransmissionBuffer;
use crate::transmission::Transmission;

/// The last stage of a transmitter, holding transmissions that neither the sender nor the
/// buffer can take.
///
/// Implementations may persist transmissions to survive process restarts.
pub trait TransmissionStorage: fmt::Debug + Send + Sync {
    /// Changes the maximum total size of stored transmissions in bytes.
    fn set_capacity(&self, capacity: usize);

    /// Stores a transmission, or hands it back if the storage is full.
    fn enqueue(&self, transmission: Transmission) -> Result<(), Transmission>;

    /// Removes the oldest stored transmission.
    fn dequeue(&self) -> Option<Transmission>;

    /// The number of stored transmissions.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`TransmissionStorage`] that keeps transmissions in memory.
#[derive(Debug)]
pub struct MemoryStorage {
    inner: TransmissionBuffer,
}

impl MemoryStorage {
    /// Creates an empty storage that holds up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: TransmissionBuffer::new(capacity),
        }
    }
}

impl TransmissionStorage for MemoryStorage {
    fn set_capacity(&self, capacity: usize) {
        self.inner.set_capacity(capacity);
    }

    fn enqueue(&self, transmission: Transmission) -> Result<(), Transmission> {
        self.inner.try_push(transmission)
    }

    fn dequeue(&self) -> Option<Transmission> {
        self.inner.pop()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
