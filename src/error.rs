//! # Kernel Errors
//!
//! Every failure the kernel can report is an explicit value. Nothing in the
//! kernel panics or unwinds; callers decide what to do with a rejection.
//!
//! Errors cross the privileged-call trap as a signed status word (see
//! [`KernelError::code`]) and are decoded back on the task side.

use core::fmt;

use heapless::Vec;

use crate::fifo::FifoError;

/// Result type used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

/// Everything that can go wrong inside the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelError {
    /// Carving the requested stack would cross the reserved heap boundary.
    StackOverflow,
    /// A task holding a mutex tried to block on another one.
    DeadlockPrevented,
    /// The mutex already has a pending waiter, or a bounded table is full.
    CapacityExceeded,
    /// The task registry is full.
    RegistryFull,
    /// The ready queue rejected an operation.
    ReadyQueue(FifoError),
    /// No task is registered under this id.
    UnknownTask,
    /// No mutex is registered under this id.
    UnknownMutex,
    /// The mutex is not held by the caller.
    NotOwner,
    /// A timed wait needs at least one tick.
    InvalidTicks,
    /// A task needs a non-empty stack.
    InvalidStackSize,
    /// The idle priority is reserved for the idle task.
    ReservedPriority,
    /// The privileged-call selector does not name a service.
    UnknownService,
    /// The scheduler is already running.
    AlreadyStarted,
    /// `init()` has not completed.
    NotInitialized,
}

impl KernelError {
    /// Status word carried back through the trap frame. Always negative;
    /// zero means success.
    pub const fn code(self) -> i32 {
        match self {
            Self::StackOverflow => -1,
            Self::DeadlockPrevented => -2,
            Self::CapacityExceeded => -3,
            Self::RegistryFull => -4,
            Self::ReadyQueue(FifoError::Null) => -5,
            Self::ReadyQueue(FifoError::Full) => -6,
            Self::ReadyQueue(FifoError::Empty) => -7,
            Self::UnknownTask => -8,
            Self::UnknownMutex => -9,
            Self::NotOwner => -10,
            Self::InvalidTicks => -11,
            Self::InvalidStackSize => -12,
            Self::ReservedPriority => -13,
            Self::UnknownService => -14,
            Self::AlreadyStarted => -15,
            Self::NotInitialized => -16,
        }
    }

    /// Inverse of [`code`](Self::code). Returns `None` for unknown codes.
    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => Self::StackOverflow,
            -2 => Self::DeadlockPrevented,
            -3 => Self::CapacityExceeded,
            -4 => Self::RegistryFull,
            -5 => Self::ReadyQueue(FifoError::Null),
            -6 => Self::ReadyQueue(FifoError::Full),
            -7 => Self::ReadyQueue(FifoError::Empty),
            -8 => Self::UnknownTask,
            -9 => Self::UnknownMutex,
            -10 => Self::NotOwner,
            -11 => Self::InvalidTicks,
            -12 => Self::InvalidStackSize,
            -13 => Self::ReservedPriority,
            -14 => Self::UnknownService,
            -15 => Self::AlreadyStarted,
            -16 => Self::NotInitialized,
            _ => return None,
        })
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackOverflow => f.write_str("task stack would overrun the reserved heap boundary"),
            Self::DeadlockPrevented => f.write_str("task already holds a mutex"),
            Self::CapacityExceeded => f.write_str("capacity exceeded"),
            Self::RegistryFull => f.write_str("task registry is full"),
            Self::ReadyQueue(e) => write!(f, "ready queue: {}", e),
            Self::UnknownTask => f.write_str("unknown task"),
            Self::UnknownMutex => f.write_str("unknown mutex"),
            Self::NotOwner => f.write_str("mutex not held by caller"),
            Self::InvalidTicks => f.write_str("wait needs at least one tick"),
            Self::InvalidStackSize => f.write_str("stack size must be non-zero"),
            Self::ReservedPriority => f.write_str("idle priority is reserved"),
            Self::UnknownService => f.write_str("unknown privileged service"),
            Self::AlreadyStarted => f.write_str("scheduler already started"),
            Self::NotInitialized => f.write_str("kernel not initialized"),
        }
    }
}

impl From<FifoError> for KernelError {
    fn from(e: FifoError) -> Self {
        Self::ReadyQueue(e)
    }
}

/// Number of independent steps in `init()` that can fail.
pub const INIT_STEPS: usize = 2;

/// Every failure collected while initializing the kernel.
///
/// `init()` keeps going after a failed step and reports all of them
/// together instead of folding them into one code.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InitErrors {
    errors: Vec<KernelError, INIT_STEPS>,
}

impl InitErrors {
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Record a failed step. Room is sized by `INIT_STEPS`; raise it when
    /// `init()` gains a step.
    pub fn push(&mut self, error: KernelError) {
        let pushed = self.errors.push(error);
        debug_assert!(pushed.is_ok(), "more init failures than INIT_STEPS");
    }

    /// Record the error of `result`, if any.
    pub fn collect<T>(&mut self, result: KernelResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn contains(&self, error: KernelError) -> bool {
        self.errors.contains(&error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KernelError> {
        self.errors.iter()
    }

    /// `Ok(())` when nothing failed.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for InitErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}
