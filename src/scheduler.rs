//! # Scheduler
//!
//! Core scheduling logic for PiOS: the task registry, its priority
//! ordering, the ready queue and the run/next decision.
//!
//! ## Scheduling Algorithm
//!
//! Whenever a task's eligibility changes (activation, termination, wait
//! expiry, mutex hand-over) the ready queue is **rebuilt**:
//! 1. Sort the registry by priority (stable bubble sort)
//! 2. Drain the ready queue
//! 3. Walk the registry and enqueue the first eligible priority group:
//!    every eligible task of the most urgent priority, in registry order
//!
//! After every rebuild and on every tick the scheduler **decides** which
//! task runs next:
//! - Empty queue and the current task still eligible: keep running it
//! - Otherwise the head of the queue runs next. A current task of the same
//!   priority goes to the back of the queue (round robin); a less urgent
//!   one is parked as `Waiting` until the next rebuild
//!
//! The decision only records the `next` task. The switch itself happens
//! later, in the context switch engine.

use heapless::Vec;

use crate::config::{IDLE_TASK_NAME, MAX_TASKS, READY_QUEUE_CAPACITY};
use crate::context;
use crate::error::{KernelError, KernelResult};
use crate::fifo::{Fifo, FifoError};
use crate::stack::{StackArena, StackRegion};
use crate::task::{Priority, Task, TaskConfig, TaskEntry, TaskId, TaskState};

/// Whether the scheduler has been started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunMode {
    /// Boot phase: tasks can be created and activated, nothing runs yet.
    Suspended,
    /// Tasks are being scheduled.
    Running,
}

/// Registry, ready queue and run/next bookkeeping.
pub struct Scheduler {
    /// Task arena. A task's slot never changes; `TaskId` indexes it.
    tasks: Vec<Task, MAX_TASKS>,
    /// Registry ordering, sorted by priority on every rebuild.
    order: Vec<TaskId, MAX_TASKS>,
    ready: Fifo<TaskId, READY_QUEUE_CAPACITY>,
    pub(crate) current: Option<TaskId>,
    pub(crate) next: Option<TaskId>,
    mode: RunMode,
    stacks: StackArena,
    idle: Option<TaskId>,
    ticks: u64,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: Vec::new(),
            order: Vec::new(),
            ready: Fifo::new(),
            current: None,
            next: None,
            mode: RunMode::Suspended,
            stacks: StackArena::empty(),
            idle: None,
            ticks: 0,
        }
    }

    /// Prepare the ready queue.
    pub fn init_ready_queue(&mut self) -> Result<(), FifoError> {
        self.ready.init()
    }

    /// Hand the stack region to the bump allocator.
    pub fn init_stacks(&mut self, region: StackRegion) {
        self.stacks.reset(region);
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Register a new task.
    ///
    /// Carves its stack, writes the synthetic start frame and appends it to
    /// the registry in state `Suspended`.
    ///
    /// # Errors
    /// - `ReservedPriority` for `Priority::Idle`
    /// - `RegistryFull` when `MAX_TASKS` tasks exist
    /// - `StackOverflow` when the stack would cross the heap boundary
    pub fn register(&mut self, config: &TaskConfig) -> KernelResult<TaskId> {
        if config.priority.is_idle() {
            return Err(KernelError::ReservedPriority);
        }
        self.register_unchecked(config)
    }

    /// Register the idle task at the reserved priority.
    pub fn register_idle(&mut self, entry: TaskEntry, stack_size: usize) -> KernelResult<TaskId> {
        let config = TaskConfig {
            name: IDLE_TASK_NAME,
            priority: Priority::Idle,
            entry,
            stack_size,
        };
        let id = self.register_unchecked(&config)?;
        self.idle = Some(id);
        Ok(id)
    }

    fn register_unchecked(&mut self, config: &TaskConfig) -> KernelResult<TaskId> {
        if self.tasks.is_full() {
            return Err(KernelError::RegistryFull);
        }
        let stack = match self.stacks.carve(config.stack_size) {
            Ok(stack) => stack,
            Err(e) => {
                log_warn!(
                    "task '{}' rejected: {} bytes of stack, {} left",
                    config.name,
                    config.stack_size,
                    self.stacks.remaining()
                );
                return Err(e);
            }
        };

        // Safety: `stack` was just carved from the region handed to
        // `init_stacks`, which the caller guarantees is writable RAM owned
        // by the kernel.
        let saved_sp = unsafe { context::init_stack(stack.high, config.entry) };

        let id = TaskId(self.tasks.len() as u8);
        let task = Task::new(id, config, stack, saved_sp);
        self.tasks
            .push(task)
            .map_err(|_| KernelError::RegistryFull)?;
        self.order.push(id).map_err(|_| KernelError::RegistryFull)?;

        log_info!(
            "task {} '{}' created: prio {}, stack {:#x}..{:#x}",
            id,
            config.name,
            config.priority,
            stack.low,
            stack.high
        );
        Ok(id)
    }

    /// Sort the registry by priority, most urgent first.
    ///
    /// Bubble sort swapping only on strict inequality, so tasks of equal
    /// priority keep their registration order.
    pub fn reorder(&mut self) {
        let n = self.order.len();
        if n < 2 {
            return;
        }
        for i in 0..n - 1 {
            for j in 0..n - i - 1 {
                let a = self.tasks[self.order[j].index()].priority;
                let b = self.tasks[self.order[j + 1].index()].priority;
                if a > b {
                    self.order.swap(j, j + 1);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Ready queue
    // -----------------------------------------------------------------------

    /// Rebuild the ready queue from the registry.
    ///
    /// Enqueues the most urgent eligible task and every eligible task
    /// directly following it at equal priority, marking them `Ready`. The
    /// scan stops at the first task that is less urgent or suspended; the
    /// slot past the last registered task counts as suspended.
    ///
    /// Tasks drained from the queue that are not enqueued again go back to
    /// `Waiting`.
    pub fn rebuild_ready_queue(&mut self) -> Result<(), FifoError> {
        self.reorder();

        while let Ok(id) = self.ready.dequeue() {
            let task = &mut self.tasks[id.index()];
            if task.state == TaskState::Ready {
                task.state = TaskState::Waiting;
            }
        }

        for i in 0..self.order.len() {
            let id = self.order[i];
            let task = &self.tasks[id.index()];
            if !task.state.is_eligible() {
                continue;
            }
            let priority = task.priority;
            let successor = self
                .order
                .get(i + 1)
                .map(|n| &self.tasks[n.index()])
                .map(|n| (n.priority, n.state.is_eligible()));

            match successor {
                // Round-robin peer: keep collecting the group.
                Some((p, true)) if p == priority => {
                    self.make_ready(id)?;
                }
                // Cannot happen on a sorted registry.
                Some((p, _)) if p < priority => break,
                // Less urgent, suspended, or end of the registry.
                _ => {
                    self.make_ready(id)?;
                    break;
                }
            }
        }
        Ok(())
    }

    fn make_ready(&mut self, id: TaskId) -> Result<(), FifoError> {
        self.ready.enqueue(id)?;
        self.tasks[id.index()].state = TaskState::Ready;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Decision
    // -----------------------------------------------------------------------

    /// Pick the task to run next and record it in `next`.
    pub fn decide_next(&mut self) -> Result<(), FifoError> {
        let current = self.current;

        if self.ready.is_empty() {
            let next = match current {
                Some(c) if self.tasks[c.index()].state.is_eligible() => Some(c),
                // Nothing eligible at all.
                _ => self.idle,
            };
            if let Some(n) = next {
                self.tasks[n.index()].state = TaskState::Running;
                self.next = Some(n);
            }
            return Ok(());
        }

        let next = self.ready.dequeue()?;
        self.tasks[next.index()].state = TaskState::Running;

        if let Some(c) = current.filter(|&c| c != next) {
            let outgoing = &self.tasks[c.index()];
            let same_priority = outgoing.priority == self.tasks[next.index()].priority;
            let state = outgoing.state;
            match state {
                TaskState::Running | TaskState::Waiting if same_priority => {
                    self.make_ready(c)?;
                }
                TaskState::Running => {
                    self.tasks[c.index()].state = TaskState::Waiting;
                }
                // Already queued, or blocked.
                _ => {}
            }
        }

        self.next = Some(next);
        Ok(())
    }

    /// Make `next` the current task. Returns the new current task.
    pub(crate) fn commit_next(&mut self) -> Option<TaskId> {
        if let Some(next) = self.next.take() {
            self.current = Some(next);
        }
        self.current
    }

    // -----------------------------------------------------------------------
    // State transitions requested through the gateway
    // -----------------------------------------------------------------------

    /// Make a suspended task eligible. Clears any armed countdown.
    pub fn make_eligible(&mut self, id: TaskId) -> KernelResult<()> {
        let task = self.task_mut(id)?;
        task.timed_block.disarm();
        if task.state == TaskState::Suspended {
            task.state = TaskState::Waiting;
        }
        Ok(())
    }

    /// Suspend a task. Clears any armed countdown.
    ///
    /// The idle task cannot be suspended (`ReservedPriority`).
    pub fn suspend(&mut self, id: TaskId) -> KernelResult<()> {
        self.check_not_idle(id)?;
        let task = self.task_mut(id)?;
        task.timed_block.disarm();
        task.state = TaskState::Suspended;
        Ok(())
    }

    /// Suspend a task for `ticks` ticks.
    pub fn block_for(&mut self, id: TaskId, ticks: u32) -> KernelResult<()> {
        if ticks == 0 {
            return Err(KernelError::InvalidTicks);
        }
        self.check_not_idle(id)?;
        let task = self.task_mut(id)?;
        task.timed_block.arm(ticks);
        task.state = TaskState::Suspended;
        Ok(())
    }

    fn check_not_idle(&self, id: TaskId) -> KernelResult<()> {
        if self.idle == Some(id) {
            return Err(KernelError::ReservedPriority);
        }
        Ok(())
    }

    /// Count down every time-blocked task. Expired tasks become `Waiting`.
    /// Returns `true` if any task woke up.
    pub fn expire_timeouts(&mut self) -> bool {
        let mut woke = false;
        for task in self.tasks.iter_mut() {
            if task.state == TaskState::Suspended && task.timed_block.tick() {
                task.state = TaskState::Waiting;
                woke = true;
            }
        }
        woke
    }

    pub(crate) fn set_priority(&mut self, id: TaskId, priority: Priority) -> KernelResult<()> {
        self.task_mut(id)?.priority = priority;
        Ok(())
    }

    pub(crate) fn set_state(&mut self, id: TaskId, state: TaskState) -> KernelResult<()> {
        self.task_mut(id)?.state = state;
        Ok(())
    }

    pub(crate) fn start(&mut self) -> KernelResult<TaskId> {
        if self.mode == RunMode::Running {
            return Err(KernelError::AlreadyStarted);
        }
        let idle = self.idle.ok_or(KernelError::NotInitialized)?;
        self.mode = RunMode::Running;
        self.current = Some(idle);
        Ok(idle)
    }

    pub(crate) fn advance_tick(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn task(&self, id: TaskId) -> KernelResult<&Task> {
        self.tasks.get(id.index()).ok_or(KernelError::UnknownTask)
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> KernelResult<&mut Task> {
        self.tasks.get_mut(id.index()).ok_or(KernelError::UnknownTask)
    }

    pub fn task_state(&self, id: TaskId) -> KernelResult<TaskState> {
        self.task(id).map(|t| t.state)
    }

    pub fn priority(&self, id: TaskId) -> KernelResult<Priority> {
        self.task(id).map(|t| t.priority)
    }

    pub fn base_priority(&self, id: TaskId) -> KernelResult<Priority> {
        self.task(id).map(|t| t.base_priority)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Registry in its current priority order.
    pub fn registry(&self) -> &[TaskId] {
        &self.order
    }

    /// Ready queue from head to tail.
    pub fn ready_queue(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ready.iter().copied()
    }

    pub fn is_queued(&self, id: TaskId) -> bool {
        self.ready.contains(&id)
    }

    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    pub fn next(&self) -> Option<TaskId> {
        self.next
    }

    pub fn idle(&self) -> Option<TaskId> {
        self.idle
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn stacks(&self) -> &StackArena {
        &self.stacks
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
