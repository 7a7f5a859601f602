//! # Task Control Block
//!
//! Defines the task model for PiOS. A task is a unit of schedulable
//! execution with its own stack, a fixed priority and a state in the
//! scheduler's state machine.
//!
//! Tasks are owned by the registry once created and are never freed.
//! Everything outside the scheduler refers to them through a [`TaskId`].

use core::fmt;

use heapless::String;

use crate::config::TASK_NAME_LEN;

/// Task entry point. Tasks never return.
pub type TaskEntry = extern "C" fn() -> !;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Handle to a registered task: its slot in the task arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(pub u8);

impl TaskId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduling priority. Lower levels are more urgent; `Level(0)` is the
/// highest.
///
/// The idle task's priority is a separate marker rather than a magic level,
/// and orders after every ordinary level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Priority {
    /// Ordinary priority level.
    Level(u8),
    /// Reserved for the idle task.
    Idle,
}

impl Priority {
    pub const HIGHEST: Priority = Priority::Level(0);

    #[inline]
    pub const fn is_idle(self) -> bool {
        matches!(self, Priority::Idle)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Level(l) => write!(f, "{}", l),
            Priority::Idle => f.write_str("idle"),
        }
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///                  activate / wake           rebuild
///   ┌───────────┐ ────────────────► ┌─────────┐ ─────► ┌───────┐
///   │ Suspended │                   │ Waiting │        │ Ready │
///   └───────────┘ ◄──────────────── └─────────┘ ◄───── └───────┘
///        ▲          terminate          ▲   preempted /     │
///        │          wait / block       │   drained         │ decide
///        │                             │                   ▼
///        │                          ┌─────────┐            │
///        └───────────────────────── │ Running │ ◄──────────┘
///                                   └─────────┘
/// ```
///
/// `Waiting` means eligible but not yet placed in the ready queue; the next
/// rebuild picks it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    /// Not schedulable: never activated, terminated, or blocked.
    Suspended,
    /// Eligible, waiting for the next ready-queue rebuild.
    Waiting,
    /// In the ready queue.
    Ready,
    /// Selected to execute.
    Running,
}

impl TaskState {
    /// Anything but `Suspended` can be picked up by a rebuild.
    #[inline]
    pub const fn is_eligible(self) -> bool {
        !matches!(self, TaskState::Suspended)
    }
}

// ---------------------------------------------------------------------------
// Configuration (immutable after creation)
// ---------------------------------------------------------------------------

/// Parameters supplied when creating a task.
#[derive(Clone, Copy)]
pub struct TaskConfig {
    /// Task name. Truncated to `TASK_NAME_LEN` bytes.
    pub name: &'static str,
    /// Base priority. `Priority::Idle` is rejected.
    pub priority: Priority,
    /// Function the task starts executing.
    pub entry: TaskEntry,
    /// Stack size in bytes. At least `MIN_STACK_SIZE`, room for the saved
    /// context.
    pub stack_size: usize,
}

// ---------------------------------------------------------------------------
// Timed blocking
// ---------------------------------------------------------------------------

/// Countdown armed by a timed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimedBlock {
    /// Whether the task is blocked on time.
    pub enabled: bool,
    /// Ticks left before it becomes eligible again.
    pub remaining: u32,
}

impl TimedBlock {
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            remaining: 0,
        }
    }

    pub fn arm(&mut self, ticks: u32) {
        self.enabled = true;
        self.remaining = ticks;
    }

    pub fn disarm(&mut self) {
        *self = Self::disabled();
    }

    /// Count one tick down. Returns `true` when the countdown expires,
    /// which happens once the counter is at or below 1.
    pub fn tick(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining <= 1 {
            self.disarm();
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Stack bounds
// ---------------------------------------------------------------------------

/// Address range of a task's private stack. `high` is exclusive and is
/// where the stack starts growing down from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBounds {
    pub high: usize,
    pub low: usize,
}

impl StackBounds {
    pub const fn size(&self) -> usize {
        self.high - self.low
    }

    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.low && addr < self.high
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB).
///
/// `priority` is the effective priority: it equals `base_priority` except
/// while the task holds a mutex a more urgent task is waiting on.
pub struct Task {
    pub id: TaskId,
    pub name: String<TASK_NAME_LEN>,
    pub priority: Priority,
    /// Priority the task was created with. Never changed by inheritance.
    pub base_priority: Priority,
    pub state: TaskState,
    pub entry: TaskEntry,
    pub stack: StackBounds,
    /// Saved process stack pointer. Points at the software-saved part of
    /// the task's context while the task is switched out.
    pub saved_sp: *mut u32,
    pub timed_block: TimedBlock,
}

// Safety: `saved_sp` always points into the task's own stack region and is
// only touched by the scheduler from privileged context.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl Task {
    /// A freshly registered task: suspended, no countdown armed.
    pub fn new(
        id: TaskId,
        config: &TaskConfig,
        stack: StackBounds,
        saved_sp: *mut u32,
    ) -> Self {
        Self {
            id,
            name: bounded_name(config.name),
            priority: config.priority,
            base_priority: config.priority,
            state: TaskState::Suspended,
            entry: config.entry,
            stack,
            saved_sp,
            timed_block: TimedBlock::disabled(),
        }
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.priority.is_idle()
    }
}

/// Copy `name` into a bounded string, dropping whatever does not fit.
fn bounded_name(name: &str) -> String<TASK_NAME_LEN> {
    let mut out = String::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
