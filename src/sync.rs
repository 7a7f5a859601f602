//! # Synchronization Primitives
//!
//! Boot-time code shares the kernel instance with the SysTick, SVCall and
//! PendSV handlers. Until the scheduler starts it touches that state inside
//! a critical section; after that, only the handlers do.

use cortex_m::interrupt;

/// Execute a closure with interrupts disabled.
///
/// ```ignore
/// sync::critical_section(|_cs| unsafe { kernel().create_task(config) });
/// ```
///
/// Never issue a privileged call from inside one: `svc` with interrupts
/// masked escalates to HardFault.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&interrupt::CriticalSection) -> R,
{
    interrupt::free(f)
}
