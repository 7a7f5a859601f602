//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! SysTick configuration, exception priorities, the `SVCall` trap, the
//! `PendSV` context switch and the first-task launch.
//!
//! ## Stacks and privilege
//!
//! - **MSP**: boot code, the kernel and every exception handler
//! - **PSP**: tasks, which run unprivileged in thread mode
//!
//! On exception entry the hardware stacks R0–R3, R12, LR, PC and xPSR on the
//! process stack. `PendSV` saves and restores R4–R11 around the hand-over,
//! which completes the context described in [`crate::context`].
//!
//! ## Interrupt Priorities
//!
//! - SVCall: 0 (reset default). A privileged call is never interrupted by
//!   the tick.
//! - SysTick: `SYSTICK_PRIORITY`
//! - PendSV: `PENDSV_PRIORITY` (lowest). A requested switch always waits
//!   for a pending tick, and tail-chains right after the trap or tick that
//!   requested it.

use core::arch::{asm, global_asm};
use core::sync::atomic::{AtomicBool, Ordering};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use crate::arch::Port;
use crate::config::{PENDSV_PRIORITY, SYSTEM_CLOCK_HZ, SYSTICK_PRIORITY, TICK_HZ};
use crate::context::{ExceptionFrame, FRAME_WORDS};
use crate::kernel;
use crate::svc::Service;

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Mirrors the tick liveness indicator; watch it from a debugger.
pub static TICK_INDICATOR: AtomicBool = AtomicBool::new(false);

/// Cortex-M4 implementation of [`Port`].
pub struct CortexM4 {
    indicator: bool,
}

impl CortexM4 {
    pub const fn new() -> Self {
        Self { indicator: false }
    }
}

impl Default for CortexM4 {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for CortexM4 {
    #[inline]
    fn request_context_switch(&mut self) {
        SCB::set_pendsv();
    }

    fn toggle_tick_indicator(&mut self) {
        self.indicator = !self.indicator;
        TICK_INDICATOR.store(self.indicator, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the processor clock.
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// PendSV at the lowest priority, SysTick just above it.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // Safety: changing these priorities cannot break a priority-based
    // critical section; nothing in the kernel relies on masking via BASEPRI.
    unsafe {
        scb.set_priority(SystemHandler::PendSV, PENDSV_PRIORITY);
        scb.set_priority(SystemHandler::SysTick, SYSTICK_PRIORITY);
    }
}

// ---------------------------------------------------------------------------
// SVCall (privileged call gateway)
// ---------------------------------------------------------------------------

// Picks the stack the caller used (EXC_RETURN bit 2) and hands its frame
// to `pios_svc_dispatch`.
global_asm!(
    ".syntax unified",
    ".thumb",
    ".section .text.SVCall",
    ".global SVCall",
    ".type SVCall, %function",
    ".thumb_func",
    "SVCall:",
    "    tst lr, #4",
    "    ite eq",
    "    mrseq r0, msp",
    "    mrsne r0, psp",
    "    push {{r4, lr}}",
    "    bl pios_svc_dispatch",
    "    pop {{r4, pc}}",
    ".size SVCall, . - SVCall",
);

/// Decode the trap and write the status word into the stacked R0.
///
/// # Safety
/// Only called by the `SVCall` trampoline with the caller's stacked frame.
#[no_mangle]
unsafe extern "C" fn pios_svc_dispatch(frame: *mut ExceptionFrame) {
    let frame = &mut *frame;
    // `svc #imm` is a 16-bit instruction; the immediate is its low byte.
    let number = *((frame.pc - 2) as usize as *const u8);
    let args = [frame.r0, frame.r1, frame.r2];
    frame.r0 = kernel::kernel().dispatch(number, args) as u32;
}

/// Issue `svc #service` with `args` in R0–R2 and return the status word.
pub fn supervisor_call(service: Service, args: [u32; 3]) -> i32 {
    let mut r0 = args[0];
    // Safety: the trap only reads the argument registers and writes R0.
    unsafe {
        match service {
            Service::ActivateTask => asm!("svc 0", inout("r0") r0, in("r1") args[1], in("r2") args[2]),
            Service::TerminateTask => asm!("svc 1", inout("r0") r0, in("r1") args[1], in("r2") args[2]),
            Service::WaitForTicks => asm!("svc 2", inout("r0") r0, in("r1") args[1], in("r2") args[2]),
            Service::AcquireMutex => asm!("svc 3", inout("r0") r0, in("r1") args[1], in("r2") args[2]),
            Service::ReleaseMutex => asm!("svc 4", inout("r0") r0, in("r1") args[1], in("r2") args[2]),
        }
    }
    r0 as i32
}

// ---------------------------------------------------------------------------
// PendSV (context switch)
// ---------------------------------------------------------------------------

// 1. Push R4-R11 on the outgoing task's process stack
// 2. `pios_switch_context` records that SP and returns the incoming one
// 3. Pop R4-R11 from the incoming stack and return through PSP
//
// Runs with interrupts masked so the tick never sees a half-done switch.
global_asm!(
    ".syntax unified",
    ".thumb",
    ".section .text.PendSV",
    ".global PendSV",
    ".type PendSV, %function",
    ".thumb_func",
    "PendSV:",
    "    cpsid i",
    "    mrs r0, psp",
    "    stmdb r0!, {{r4-r11}}",
    "    push {{r3, lr}}",
    "    bl pios_switch_context",
    "    pop {{r3, lr}}",
    "    ldmia r0!, {{r4-r11}}",
    "    msr psp, r0",
    "    isb",
    "    cpsie i",
    "    bx lr",
    ".size PendSV, . - PendSV",
);

/// # Safety
/// Only called by the `PendSV` handler, with interrupts disabled.
#[no_mangle]
unsafe extern "C" fn pios_switch_context(saved_sp: *mut u32) -> *mut u32 {
    kernel::kernel().sched.switch_context(saved_sp)
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Enter the first task through its synthetic frame. Never returns.
///
/// Points PSP past the whole frame, switches thread mode to PSP and
/// unprivileged, unmasks interrupts and jumps to the frame's PC. The frame's
/// general registers are all zero, so nothing needs restoring.
///
/// # Safety
/// `sp` must be the saved stack pointer of a freshly created task, and
/// interrupts must be disabled.
pub unsafe fn start_first_task(sp: *mut u32) -> ! {
    let frame = &*(sp.add(8) as *const ExceptionFrame);
    let entry = frame.pc | 1;
    let psp = sp.add(FRAME_WORDS);
    asm!(
        "msr psp, {psp}",
        "msr control, {control}",
        "isb",
        "cpsie i",
        "bx {entry}",
        psp = in(reg) psp,
        control = in(reg) 0b11u32,
        entry = in(reg) entry,
        options(noreturn),
    );
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler: the tick manager entry point.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    kernel::kernel().on_tick();
}
