//! # Privileged Call Gateway
//!
//! The only way task code mutates scheduler state. A task executes
//! `svc #n` with up to three argument words in r0-r2; the trap handler
//! decodes the service number from the `svc` instruction, runs
//! [`Kernel::dispatch`] and writes the status word back into the caller's
//! stacked r0.
//!
//! | # | Service         | r0      | r1    |
//! |---|-----------------|---------|-------|
//! | 0 | `ActivateTask`  | task    |       |
//! | 1 | `TerminateTask` | task    |       |
//! | 2 | `WaitForTicks`  | task    | ticks |
//! | 3 | `AcquireMutex`  | mutex   | task  |
//! | 4 | `ReleaseMutex`  | mutex   |       |
//!
//! Status: `0` on success, a negative [`KernelError::code`] otherwise.

use crate::arch::Port;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::mutex::{AcquireOutcome, MutexId, ReleaseOutcome};
use crate::scheduler::RunMode;
use crate::task::TaskId;

/// Service numbers, as encoded in the `svc` immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Service {
    ActivateTask = 0,
    TerminateTask = 1,
    WaitForTicks = 2,
    AcquireMutex = 3,
    ReleaseMutex = 4,
}

impl TryFrom<u8> for Service {
    type Error = KernelError;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        match number {
            0 => Ok(Self::ActivateTask),
            1 => Ok(Self::TerminateTask),
            2 => Ok(Self::WaitForTicks),
            3 => Ok(Self::AcquireMutex),
            4 => Ok(Self::ReleaseMutex),
            _ => Err(KernelError::UnknownService),
        }
    }
}

/// A decoded privileged call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    ActivateTask(TaskId),
    TerminateTask(TaskId),
    WaitForTicks { task: TaskId, ticks: u32 },
    AcquireMutex { mutex: MutexId, task: TaskId },
    ReleaseMutex(MutexId),
}

fn task_arg(word: u32) -> KernelResult<TaskId> {
    u8::try_from(word)
        .map(TaskId)
        .map_err(|_| KernelError::UnknownTask)
}

fn mutex_arg(word: u32) -> KernelResult<MutexId> {
    u8::try_from(word)
        .map(MutexId)
        .map_err(|_| KernelError::UnknownMutex)
}

impl Request {
    pub fn service(&self) -> Service {
        match self {
            Self::ActivateTask(_) => Service::ActivateTask,
            Self::TerminateTask(_) => Service::TerminateTask,
            Self::WaitForTicks { .. } => Service::WaitForTicks,
            Self::AcquireMutex { .. } => Service::AcquireMutex,
            Self::ReleaseMutex(_) => Service::ReleaseMutex,
        }
    }

    /// Decode a trap: service number plus the caller's r0-r2.
    pub fn decode(number: u8, args: [u32; 3]) -> KernelResult<Self> {
        Ok(match Service::try_from(number)? {
            Service::ActivateTask => Self::ActivateTask(task_arg(args[0])?),
            Service::TerminateTask => Self::TerminateTask(task_arg(args[0])?),
            Service::WaitForTicks => Self::WaitForTicks {
                task: task_arg(args[0])?,
                ticks: args[1],
            },
            Service::AcquireMutex => Self::AcquireMutex {
                mutex: mutex_arg(args[0])?,
                task: task_arg(args[1])?,
            },
            Service::ReleaseMutex => Self::ReleaseMutex(mutex_arg(args[0])?),
        })
    }

    /// Service number and argument words for the `svc` instruction.
    pub fn encode(&self) -> (u8, [u32; 3]) {
        let args = match *self {
            Self::ActivateTask(t) | Self::TerminateTask(t) => [t.0 as u32, 0, 0],
            Self::WaitForTicks { task, ticks } => [task.0 as u32, ticks, 0],
            Self::AcquireMutex { mutex, task } => [mutex.0 as u32, task.0 as u32, 0],
            Self::ReleaseMutex(m) => [m.0 as u32, 0, 0],
        };
        (self.service() as u8, args)
    }
}

/// Status word for `result`.
pub fn status(result: KernelResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

/// Inverse of [`status`]. Unknown negative codes read as `UnknownService`.
pub fn from_status(word: i32) -> KernelResult<()> {
    match word {
        0 => Ok(()),
        code => Err(KernelError::from_code(code).unwrap_or(KernelError::UnknownService)),
    }
}

impl<P: Port> Kernel<P> {
    /// Raw trap entry: decode, run, encode.
    pub fn dispatch(&mut self, number: u8, args: [u32; 3]) -> i32 {
        log_trace!("svc {}: {:x} {:x} {:x}", number, args[0], args[1], args[2]);
        let result = Request::decode(number, args).and_then(|req| self.service(req));
        if let Err(e) = result {
            log_debug!("svc {} rejected: {}", number, e);
        }
        status(result)
    }

    /// Run one privileged request.
    pub fn service(&mut self, request: Request) -> KernelResult<()> {
        match request {
            Request::ActivateTask(task) => {
                self.sched.make_eligible(task)?;
                self.reschedule()
            }
            Request::TerminateTask(task) => {
                self.sched.suspend(task)?;
                self.reschedule()
            }
            Request::WaitForTicks { task, ticks } => {
                self.sched.block_for(task, ticks)?;
                // The switch happens on the next tick.
                self.sched.rebuild_ready_queue()?;
                Ok(())
            }
            Request::AcquireMutex { mutex, task } => {
                match self.mutexes.acquire(&mut self.sched, mutex, task)? {
                    AcquireOutcome::Acquired => Ok(()),
                    AcquireOutcome::Blocked => self.reschedule(),
                }
            }
            Request::ReleaseMutex(mutex) => {
                let caller = match self.sched.mode() {
                    RunMode::Running => self.sched.current(),
                    RunMode::Suspended => None,
                };
                match self.mutexes.release(&mut self.sched, mutex, caller)? {
                    ReleaseOutcome::Freed => Ok(()),
                    ReleaseOutcome::HandedOver(_) => self.reschedule(),
                }
            }
        }
    }

    /// Rebuild the ready queue, then decide and pend a switch unless the
    /// scheduler is stopped or the idle task is the caller.
    pub(crate) fn reschedule(&mut self) -> KernelResult<()> {
        self.sched.rebuild_ready_queue()?;

        let caller_is_idle = self
            .sched
            .current()
            .and_then(|c| self.sched.task(c).ok())
            .map_or(true, |t| t.is_idle());
        if self.sched.mode() == RunMode::Running && !caller_is_idle {
            self.sched.decide_next()?;
            self.port.request_context_switch();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_numbers() {
        for n in 0..5u8 {
            assert_eq!(Service::try_from(n).map(|s| s as u8), Ok(n));
        }
        assert_eq!(Service::try_from(5), Err(KernelError::UnknownService));
    }

    #[test]
    fn test_decode_requests() {
        assert_eq!(
            Request::decode(2, [3, 40, 0]),
            Ok(Request::WaitForTicks { task: TaskId(3), ticks: 40 })
        );
        assert_eq!(
            Request::decode(3, [1, 2, 0]),
            Ok(Request::AcquireMutex { mutex: MutexId(1), task: TaskId(2) })
        );
        assert_eq!(Request::decode(0, [300, 0, 0]), Err(KernelError::UnknownTask));
        assert_eq!(Request::decode(4, [300, 0, 0]), Err(KernelError::UnknownMutex));
        assert_eq!(Request::decode(9, [0; 3]), Err(KernelError::UnknownService));
    }

    #[test]
    fn test_encode_matches_decode() {
        let req = Request::AcquireMutex { mutex: MutexId(2), task: TaskId(5) };
        let (n, args) = req.encode();
        assert_eq!(n, 3);
        assert_eq!(args, [2, 5, 0]);
        assert_eq!(Request::decode(n, args), Ok(req));
    }

    #[test]
    fn test_status_words() {
        assert_eq!(status(Ok(())), 0);
        assert_eq!(status(Err(KernelError::DeadlockPrevented)), KernelError::DeadlockPrevented.code());
        assert_eq!(from_status(0), Ok(()));
        assert_eq!(from_status(KernelError::NotOwner.code()), Err(KernelError::NotOwner));
        assert_eq!(from_status(-1000), Err(KernelError::UnknownService));
    }
}
