//! # Stack Region
//!
//! Task stacks are carved out of one static RAM region by a descending
//! bump pointer:
//!
//! ```text
//!   top ──────────►┌──────────────────────┐
//!                  │  main stack (MSP)    │ MAIN_STACK_SIZE
//!                  ├──────────────────────┤
//!                  │  guard               │ STACK_GUARD
//!                  ├──────────────────────┤ ◄── first task `high`
//!                  │  task 0 stack        │
//!                  ├──────────────────────┤
//!                  │  guard               │
//!                  ├──────────────────────┤ ◄── cursor
//!                  │  ...free...          │
//!   floor ────────►└──────────────────────┘ reserved heap boundary
//! ```
//!
//! Stacks are never reclaimed.

use crate::config::{MAIN_STACK_SIZE, STACK_GUARD};
use crate::context::TaskFrame;
use crate::error::{KernelError, KernelResult};
use crate::task::StackBounds;

/// Smallest stack that holds a task's saved context.
pub const MIN_STACK_SIZE: usize = core::mem::size_of::<TaskFrame>();

/// Bounds of the RAM available to the kernel for stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    /// Initial main stack pointer (top of RAM, exclusive).
    pub top: usize,
    /// Lowest address a task stack may reach (end of the reserved heap).
    pub floor: usize,
}

impl StackRegion {
    pub const fn new(top: usize, floor: usize) -> Self {
        Self { top, floor }
    }

    /// Region delimited by the cortex-m-rt linker symbols: the initial MSP
    /// and the start of the heap (end of `.bss`/`.uninit`).
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    pub fn from_linker() -> Self {
        extern "C" {
            static _stack_start: u32;
            static __sheap: u32;
        }
        // Only the addresses of the linker symbols are taken.
        unsafe {
            Self::new(
                core::ptr::addr_of!(_stack_start) as usize,
                core::ptr::addr_of!(__sheap) as usize,
            )
        }
    }
}

/// Descending bump allocator over a [`StackRegion`].
#[derive(Debug, Clone, Copy)]
pub struct StackArena {
    main_stack_end: usize,
    cursor: usize,
    floor: usize,
}

impl StackArena {
    /// An empty arena: every allocation fails until [`reset`](Self::reset).
    pub const fn empty() -> Self {
        Self {
            main_stack_end: 0,
            cursor: 0,
            floor: 0,
        }
    }

    /// Reserve the main stack at the top of `region` and place the cursor
    /// one guard below it.
    pub fn reset(&mut self, region: StackRegion) {
        self.main_stack_end = region.top.saturating_sub(MAIN_STACK_SIZE);
        self.cursor = self.main_stack_end.saturating_sub(STACK_GUARD) & !(STACK_GUARD - 1);
        self.floor = region.floor;
    }

    /// Carve `size` bytes. The cursor only moves on success.
    ///
    /// `size` must fit the start frame written at the top of the stack,
    /// otherwise that frame would land below `low`.
    pub fn carve(&mut self, size: usize) -> KernelResult<StackBounds> {
        if size < MIN_STACK_SIZE {
            return Err(KernelError::InvalidStackSize);
        }
        let high = self.cursor;
        let low = match high.checked_sub(size) {
            Some(low) if low >= self.floor => low,
            _ => return Err(KernelError::StackOverflow),
        };
        // Keep the next stack top 8-byte aligned as AAPCS requires.
        self.cursor = low.saturating_sub(STACK_GUARD) & !(STACK_GUARD - 1);
        Ok(StackBounds { high, low })
    }

    /// Start of the main stack's lowest byte.
    pub const fn main_stack_end(&self) -> usize {
        self.main_stack_end
    }

    /// Top of the next stack to be carved.
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Bytes still available above the floor.
    pub const fn remaining(&self) -> usize {
        self.cursor.saturating_sub(self.floor)
    }
}
