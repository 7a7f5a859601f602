//! # PiOS Configuration
//!
//! Compile-time constants governing the kernel and its port.
//! All limits are fixed at compile time; there is no dynamic allocation.

/// Maximum number of tasks the registry can hold, idle task included.
/// Bounds the task arena, the priority ordering and the ready queue.
pub const MAX_TASKS: usize = 8;

/// Capacity of the ready queue. Every registered task fits at once.
pub const READY_QUEUE_CAPACITY: usize = MAX_TASKS;

/// Maximum number of mutexes that can be created.
pub const MAX_MUTEXES: usize = 8;

/// Capacity of the owned-mutex tracking set.
///
/// Entries are per task (with a hold count), so one slot per possible
/// task is always enough.
pub const MAX_MUTEX_OWNERS: usize = MAX_TASKS;

/// Maximum task name length in bytes. Longer names are truncated.
pub const TASK_NAME_LEN: usize = 16;

/// SysTick frequency in Hz. One tick every millisecond.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Bytes reserved at the top of RAM for the main (privileged) stack used
/// by exception handlers. Task stacks are carved below it.
pub const MAIN_STACK_SIZE: usize = 3072;

/// Gap left between the main stack and the first task stack, and between
/// consecutive task stacks. Keeps every stack top 8-byte aligned.
pub const STACK_GUARD: usize = 8;

/// Stack size of the idle task in bytes.
pub const IDLE_STACK_SIZE: usize = 300;

/// Name the idle task is registered under.
pub const IDLE_TASK_NAME: &str = "idle";

/// NVIC priority of SysTick (upper nibble used on Cortex-M4).
pub const SYSTICK_PRIORITY: u8 = 14 << 4;

/// NVIC priority of PendSV. Strictly lowest so a pending tick always runs
/// before the context switch.
pub const PENDSV_PRIORITY: u8 = 15 << 4;
