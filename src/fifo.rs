//! # Bounded FIFO
//!
//! Fixed-capacity circular queue used as the ready queue. The storage is a
//! `heapless::Deque`; this wrapper adds the queue contract the scheduler
//! relies on: a queue must be initialized before use, and every operation
//! reports `Null`, `Full` or `Empty` instead of silently doing nothing.

use core::fmt;

use heapless::Deque;

/// Status of a rejected queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FifoError {
    /// The queue has not been initialized.
    Null,
    /// No room for another element.
    Full,
    /// Nothing to dequeue.
    Empty,
}

impl fmt::Display for FifoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Null => "queue not initialized",
            Self::Full => "queue full",
            Self::Empty => "queue empty",
        })
    }
}

/// Bounded FIFO of `N` elements.
pub struct Fifo<T, const N: usize> {
    buf: Deque<T, N>,
    initialized: bool,
}

impl<T, const N: usize> Fifo<T, N> {
    /// An uninitialized queue. Every operation fails with `Null` until
    /// [`init`](Self::init) is called.
    pub const fn new() -> Self {
        Self {
            buf: Deque::new(),
            initialized: false,
        }
    }

    /// Initialize (or reset) the queue, dropping any queued elements.
    pub fn init(&mut self) -> Result<(), FifoError> {
        if N == 0 {
            return Err(FifoError::Null);
        }
        self.buf.clear();
        self.initialized = true;
        Ok(())
    }

    pub fn enqueue(&mut self, item: T) -> Result<(), FifoError> {
        if !self.initialized {
            return Err(FifoError::Null);
        }
        self.buf.push_back(item).map_err(|_| FifoError::Full)
    }

    pub fn dequeue(&mut self) -> Result<T, FifoError> {
        if !self.initialized {
            return Err(FifoError::Null);
        }
        self.buf.pop_front().ok_or(FifoError::Empty)
    }

    /// `Ok(())` while there is room, `Err(Full)` otherwise.
    pub fn check_full(&self) -> Result<(), FifoError> {
        if !self.initialized {
            Err(FifoError::Null)
        } else if self.buf.is_full() {
            Err(FifoError::Full)
        } else {
            Ok(())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Elements from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

impl<T: PartialEq, const N: usize> Fifo<T, N> {
    pub fn contains(&self, item: &T) -> bool {
        self.buf.iter().any(|x| x == item)
    }
}

impl<T, const N: usize> Default for Fifo<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
