//! # Hardware Adaptation
//!
//! The kernel core never touches registers. Everything it needs from the
//! hardware goes through [`Port`]; the trap, switch and tick entry points
//! live in the per-architecture module.

use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

/// Hardware services the scheduler core relies on.
pub trait Port {
    /// Pend the lowest-priority context switch exception.
    fn request_context_switch(&mut self);

    /// Flip the tick liveness indicator (diagnostic only).
    fn toggle_tick_indicator(&mut self);
}

/// Flipped by the idle task on every wake-up.
pub static IDLE_HEARTBEAT: AtomicBool = AtomicBool::new(false);

/// Idle task body: runs when nothing else is eligible.
pub extern "C" fn idle_task() -> ! {
    loop {
        IDLE_HEARTBEAT.fetch_xor(true, Ordering::Relaxed);
        #[cfg(target_arch = "arm")]
        cortex_m::asm::wfe();
        #[cfg(not(target_arch = "arm"))]
        core::hint::spin_loop();
    }
}
