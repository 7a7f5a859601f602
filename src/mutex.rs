//! # Mutex Manager
//!
//! Binary mutexes with priority inheritance and a single pending waiter.
//!
//! ```text
//!   Free ──acquire──► Owned(owner) ──acquire──► Owned(owner) + Waiting(waiter)
//!    ▲                    │                              │
//!    └──────release───────┘         release: waiter becomes owner
//! ```
//!
//! While a more urgent task waits, the owner runs at the waiter's priority.
//! Releasing drops the owner back to its base priority, or to the most
//! urgent waiter on a mutex it still holds.
//!
//! A task that holds any mutex may not block on another one.

use core::fmt;

use heapless::Vec;

use crate::config::{MAX_MUTEXES, MAX_MUTEX_OWNERS};
use crate::error::{KernelError, KernelResult};
use crate::scheduler::Scheduler;
use crate::task::{Priority, TaskId, TaskState};

/// Handle to a mutex: its slot in the mutex table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MutexId(pub u8);

impl MutexId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for MutexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Mutex descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Mutex {
    pub name: &'static str,
    pub owner: Option<TaskId>,
    pub waiter: Option<TaskId>,
    /// Owner's base priority at acquisition, restored on release.
    pub restore_priority: Option<Priority>,
}

impl Mutex {
    const fn new(name: &'static str) -> Self {
        Self {
            name,
            owner: None,
            waiter: None,
            restore_priority: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }
}

/// What an acquisition did to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The caller owns the mutex.
    Acquired,
    /// The caller is suspended as the waiter.
    Blocked,
}

/// What a release did to the mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// No waiter, the mutex is free.
    Freed,
    /// The waiter owns the mutex now and is eligible again.
    HandedOver(TaskId),
}

/// Tasks currently holding at least one mutex, with how many they hold.
#[derive(Debug, Default)]
pub struct OwnerSet {
    entries: Vec<(TaskId, u8), MAX_MUTEX_OWNERS>,
}

impl OwnerSet {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.entries.iter().any(|&(t, _)| t == task)
    }

    /// Number of mutexes `task` holds.
    pub fn held_by(&self, task: TaskId) -> u8 {
        self.entries
            .iter()
            .find(|&&(t, _)| t == task)
            .map_or(0, |&(_, n)| n)
    }

    fn insert(&mut self, task: TaskId) -> KernelResult<()> {
        if let Some(entry) = self.entries.iter_mut().find(|(t, _)| *t == task) {
            entry.1 = entry.1.saturating_add(1);
            return Ok(());
        }
        self.entries
            .push((task, 1))
            .map_err(|_| KernelError::CapacityExceeded)
    }

    fn remove(&mut self, task: TaskId) {
        if let Some(pos) = self.entries.iter().position(|&(t, _)| t == task) {
            if self.entries[pos].1 > 1 {
                self.entries[pos].1 -= 1;
            } else {
                self.entries.swap_remove(pos);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All mutexes plus the owned-mutex tracking set.
#[derive(Debug, Default)]
pub struct MutexTable {
    mutexes: Vec<Mutex, MAX_MUTEXES>,
    owners: OwnerSet,
}

impl MutexTable {
    pub const fn new() -> Self {
        Self {
            mutexes: Vec::new(),
            owners: OwnerSet::new(),
        }
    }

    pub fn create(&mut self, name: &'static str) -> KernelResult<MutexId> {
        let id = MutexId(self.mutexes.len() as u8);
        self.mutexes
            .push(Mutex::new(name))
            .map_err(|_| KernelError::CapacityExceeded)?;
        log_debug!("mutex {} '{}' created", id, name);
        Ok(id)
    }

    pub fn get(&self, id: MutexId) -> KernelResult<&Mutex> {
        self.mutexes.get(id.index()).ok_or(KernelError::UnknownMutex)
    }

    fn get_mut(&mut self, id: MutexId) -> KernelResult<&mut Mutex> {
        self.mutexes
            .get_mut(id.index())
            .ok_or(KernelError::UnknownMutex)
    }

    pub fn owners(&self) -> &OwnerSet {
        &self.owners
    }

    pub fn len(&self) -> usize {
        self.mutexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutexes.is_empty()
    }

    /// Acquire `id` for `task`.
    ///
    /// On `Blocked` the task is suspended and the owner may have inherited
    /// its priority; the caller is expected to reschedule.
    ///
    /// # Errors
    /// - `DeadlockPrevented` if the mutex is owned and `task` holds a mutex
    /// - `CapacityExceeded` if a waiter is already pending, or the tracking
    ///   set has no room for a new owner
    pub fn acquire(
        &mut self,
        sched: &mut Scheduler,
        id: MutexId,
        task: TaskId,
    ) -> KernelResult<AcquireOutcome> {
        let priority = sched.priority(task)?;
        let mutex = *self.get(id)?;

        let owner = match mutex.owner {
            None => {
                let base = sched.base_priority(task)?;
                self.owners.insert(task)?;
                let m = self.get_mut(id)?;
                m.owner = Some(task);
                m.restore_priority = Some(base);
                return Ok(AcquireOutcome::Acquired);
            }
            Some(owner) => owner,
        };

        if mutex.waiter.is_some() {
            return Err(KernelError::CapacityExceeded);
        }
        if self.owners.contains(task) {
            log_warn!(
                "mutex '{}': task {} holds a mutex, refusing to block",
                mutex.name,
                task
            );
            return Err(KernelError::DeadlockPrevented);
        }

        sched.suspend(task)?;
        self.get_mut(id)?.waiter = Some(task);

        let owner_priority = sched.priority(owner)?;
        if owner_priority > priority {
            sched.set_priority(owner, priority)?;
            log_info!(
                "mutex '{}': owner {} inherits prio {} from {}",
                mutex.name,
                owner,
                priority,
                task
            );
        }
        Ok(AcquireOutcome::Blocked)
    }

    /// `base`, raised to the most urgent waiter on any mutex `task` still
    /// holds.
    fn inherited_priority(
        &self,
        sched: &Scheduler,
        task: TaskId,
        base: Priority,
    ) -> KernelResult<Priority> {
        let mut priority = base;
        for m in self.mutexes.iter().filter(|m| m.owner == Some(task)) {
            if let Some(waiter) = m.waiter {
                priority = priority.min(sched.priority(waiter)?);
            }
        }
        Ok(priority)
    }

    /// Release `id`.
    ///
    /// `caller` is the task asking; `None` skips the ownership check (boot
    /// time, before any task runs).
    ///
    /// The releasing owner drops back to its base priority unless a mutex
    /// it still holds has a more urgent waiter.
    ///
    /// On `HandedOver` the new owner is eligible again; the caller is
    /// expected to reschedule.
    pub fn release(
        &mut self,
        sched: &mut Scheduler,
        id: MutexId,
        caller: Option<TaskId>,
    ) -> KernelResult<ReleaseOutcome> {
        let mutex = *self.get(id)?;
        let owner = mutex.owner.ok_or(KernelError::NotOwner)?;
        if caller.is_some_and(|c| c != owner) {
            return Err(KernelError::NotOwner);
        }

        let base = match mutex.restore_priority {
            Some(p) => p,
            None => sched.base_priority(owner)?,
        };
        self.owners.remove(owner);

        let Some(waiter) = mutex.waiter else {
            let m = self.get_mut(id)?;
            m.owner = None;
            m.restore_priority = None;
            let effective = self.inherited_priority(sched, owner, base)?;
            sched.set_priority(owner, effective)?;
            return Ok(ReleaseOutcome::Freed);
        };

        let waiter_base = sched.base_priority(waiter)?;
        self.owners.insert(waiter)?;
        let m = self.get_mut(id)?;
        m.owner = Some(waiter);
        m.waiter = None;
        m.restore_priority = Some(waiter_base);
        sched.set_state(waiter, TaskState::Waiting)?;

        let effective = self.inherited_priority(sched, owner, base)?;
        sched.set_priority(owner, effective)?;

        log_info!("mutex '{}': handed from {} to {}", mutex.name, owner, waiter);
        Ok(ReleaseOutcome::HandedOver(waiter))
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
