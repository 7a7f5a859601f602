//! # Tick Manager
//!
//! Runs once per SysTick period:
//! 1. Toggle the liveness indicator
//! 2. Count down timed waits; expired tasks become `Waiting` and the ready
//!    queue is rebuilt
//! 3. Decide the next task
//! 4. Pend a context switch
//!
//! Steps 3 and 4 only happen once the scheduler runs. Nothing here logs.

use crate::arch::Port;
use crate::kernel::Kernel;
use crate::scheduler::RunMode;

impl<P: Port> Kernel<P> {
    pub fn on_tick(&mut self) {
        self.port.toggle_tick_indicator();
        self.sched.advance_tick();

        // The queue is initialized before the tick source starts, so a
        // queue failure here is a broken invariant.
        if self.sched.expire_timeouts() {
            let rebuilt = self.sched.rebuild_ready_queue();
            debug_assert!(rebuilt.is_ok(), "tick: ready queue rebuild failed: {:?}", rebuilt);
        }

        if self.sched.mode() == RunMode::Running {
            let decided = self.sched.decide_next();
            debug_assert!(decided.is_ok(), "tick: scheduling decision failed: {:?}", decided);
            self.port.request_context_switch();
        }
    }
}
