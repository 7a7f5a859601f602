//! # Context Switch
//!
//! Layout of a switched-out task's stack and the hand-over performed from
//! the pended switch exception.
//!
//! A task that is not running keeps its whole register file on its own
//! stack. The hardware part is pushed by exception entry, the software part
//! by the switch routine right below it:
//!
//! ```text
//!   high ─►  xPSR   (0x0100_0000, Thumb bit)
//!            PC     (task entry)
//!            LR     (EXC_RETURN: thread mode, PSP)
//!            R12
//!            R3
//!            R2
//!            R1
//!            R0
//!            R11 ─┐
//!            ...  │ software-saved
//!   sp ───►  R4  ─┘
//! ```
//!
//! A new task gets a synthetic frame of that shape, so the first switch to
//! it looks exactly like a resume.

use crate::scheduler::Scheduler;
use crate::task::TaskEntry;

/// Exception-return value: return to thread mode, use the process stack.
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Initial xPSR: only the Thumb bit set.
pub const XPSR_THUMB: u32 = 0x0100_0000;

/// Registers stacked by exception entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// Registers stacked by the switch routine.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareFrame {
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
}

/// Complete saved context, lowest address first.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFrame {
    pub software: SoftwareFrame,
    pub hardware: ExceptionFrame,
}

/// Saved context size in words.
pub const FRAME_WORDS: usize = core::mem::size_of::<TaskFrame>() / 4;

impl TaskFrame {
    /// Frame of a task that has never run.
    pub fn initial(entry: TaskEntry) -> Self {
        Self {
            software: SoftwareFrame::default(),
            hardware: ExceptionFrame {
                lr: EXC_RETURN_THREAD_PSP,
                // Exception return ignores the Thumb bit of the PC.
                pc: (entry as usize as u32) & !1,
                xpsr: XPSR_THUMB,
                ..ExceptionFrame::default()
            },
        }
    }
}

/// Write the synthetic start frame below `stack_high` and return the
/// stack pointer to save for the task (pointing at R4).
///
/// `stack_high` is rounded down to 8 bytes first.
///
/// # Safety
/// `stack_high - size_of::<TaskFrame>()..stack_high` must be writable memory
/// owned by the task being created.
pub unsafe fn init_stack(stack_high: usize, entry: TaskEntry) -> *mut u32 {
    let top = stack_high & !7;
    let frame = (top - core::mem::size_of::<TaskFrame>()) as *mut TaskFrame;
    frame.write(TaskFrame::initial(entry));
    frame as *mut u32
}

impl Scheduler {
    /// Hand-over run from the pended switch exception.
    ///
    /// `saved_sp` is the outgoing task's stack pointer after the software
    /// registers were pushed. The pending decision, if any, is committed and
    /// the incoming task's stack pointer is returned. Without a decision the
    /// outgoing task simply resumes.
    ///
    /// Never logs: this runs with interrupts disabled.
    pub fn switch_context(&mut self, saved_sp: *mut u32) -> *mut u32 {
        if let Some(outgoing) = self.current {
            if let Ok(task) = self.task_mut(outgoing) {
                task.saved_sp = saved_sp;
            }
        }
        let incoming = self.commit_next();
        match incoming.and_then(|id| self.task(id).ok()) {
            Some(task) => task.saved_sp,
            None => saved_sp,
        }
    }
}
