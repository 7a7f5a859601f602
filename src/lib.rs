//! # PiOS
//!
//! A fixed-priority preemptive Real-Time Operating System (RTOS) kernel
//! for ARM Cortex-M4 microcontrollers, with priority-inheriting mutexes.
//!
//! ## Overview
//!
//! - Up to `MAX_TASKS` tasks, each with a private stack and a fixed priority
//!   (`Level(0)` most urgent). An idle task is always present.
//! - The most urgent eligible priority group runs; equal-priority peers
//!   share the CPU round robin, one tick each.
//! - Tasks block for a number of ticks, or on a mutex. A mutex owner
//!   inherits the priority of a more urgent waiter until it releases.
//! - Task code reaches the kernel only through a privileged call (`svc`);
//!   the switch itself runs in PendSV at the lowest exception priority.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │   init · create_task · create_mutex · start · wait_ticks│
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Gateway     │   Scheduler        │  Mutex Manager    │
//! │  svc.rs      │   scheduler.rs     │  mutex.rs         │
//! │  ─ dispatch  │   ─ rebuild        │  ─ acquire        │
//! │  ─ service   │   ─ decide_next    │  ─ release        │
//! │              │   tick.rs          │  (inheritance)    │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │   Task Model (task.rs) · Ready FIFO (fifo.rs)           │
//! │   Stack Arena (stack.rs) · Context Frame (context.rs)   │
//! ├────────────────────────────────────────────────────────┤
//! │            Arch Port (arch/cortex_m4.rs)                │
//! │    SVCall · PendSV · SysTick · First Task Launch        │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M4 Hardware (Thumb-2)                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically allocated
//! - **No `alloc`**: `core` plus `heapless` containers
//! - **Task stacks**: carved once from RAM by a descending bump pointer,
//!   never reclaimed
//! - **No locks**: kernel state is only mutated by the SVCall, SysTick and
//!   PendSV handlers, which never interleave mid-update

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;

pub mod config;
pub mod error;
pub mod fifo;
pub mod task;
pub mod stack;
pub mod context;
pub mod scheduler;
pub mod mutex;
pub mod svc;
mod tick;
pub mod arch;
pub mod kernel;
pub mod sync;

pub use arch::Port;
pub use error::{InitErrors, KernelError, KernelResult};
pub use kernel::Kernel;
pub use mutex::MutexId;
pub use task::{Priority, TaskConfig, TaskId, TaskState};
