//! # PiOS Example Firmware
//!
//! Four tasks sharing one "UART" mutex:
//!
//! | Task     | Priority | Behavior |
//! |----------|----------|----------|
//! | `blink_a`| 1        | Short bursts, round robin with `blink_b`, sleeps 10 ticks |
//! | `blink_b`| 1        | Same as `blink_a`, sleeps 15 ticks |
//! | `sensor` | 2        | Takes the UART briefly every 20 ticks |
//! | `logger` | 4        | Holds the UART for a long burst every 50 ticks |
//!
//! ## Expected Behavior
//!
//! 1. While both blinkers are awake they alternate every tick; nothing else
//!    runs.
//! 2. When `sensor` wakes up while `logger` holds the UART, `sensor` blocks
//!    and `logger` runs at priority 2 until it releases.
//! 3. With everyone asleep, the idle task runs and sleeps in `wfe`.
//!
//! Counters are plain atomics; watch them from a debugger, or build with
//! `--features defmt` for kernel logs over RTT.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use cortex_m_rt::entry;
#[cfg(feature = "defmt")]
use defmt_rtt as _;
use panic_halt as _;

use pios::kernel;
use pios::{MutexId, Priority, TaskConfig};

static A_RUNS: AtomicU32 = AtomicU32::new(0);
static B_RUNS: AtomicU32 = AtomicU32::new(0);
static SENSOR_SAMPLES: AtomicU32 = AtomicU32::new(0);
static LOGGER_WRITES: AtomicU32 = AtomicU32::new(0);

/// Handle of the UART mutex, set before the scheduler starts.
static UART: AtomicU8 = AtomicU8::new(u8::MAX);

fn uart() -> MutexId {
    MutexId(UART.load(Ordering::Relaxed))
}

fn busy(iterations: u32) {
    for _ in 0..iterations {
        cortex_m::asm::nop();
    }
}

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

extern "C" fn blink_a() -> ! {
    loop {
        A_RUNS.fetch_add(1, Ordering::Relaxed);
        busy(20_000);
        let _ = kernel::wait_ticks(10);
    }
}

extern "C" fn blink_b() -> ! {
    loop {
        B_RUNS.fetch_add(1, Ordering::Relaxed);
        busy(20_000);
        let _ = kernel::wait_ticks(15);
    }
}

extern "C" fn sensor() -> ! {
    loop {
        if kernel::acquire_mutex(uart()).is_ok() {
            SENSOR_SAMPLES.fetch_add(1, Ordering::Relaxed);
            busy(1_000);
            let _ = kernel::release_mutex(uart());
        }
        let _ = kernel::wait_ticks(20);
    }
}

extern "C" fn logger() -> ! {
    loop {
        if kernel::acquire_mutex(uart()).is_ok() {
            LOGGER_WRITES.fetch_add(1, Ordering::Relaxed);
            // Long enough to span several ticks.
            busy(100_000);
            let _ = kernel::release_mutex(uart());
        }
        let _ = kernel::wait_ticks(50);
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();

    kernel::init().expect("kernel init failed");

    let tasks = [
        TaskConfig {
            name: "blink_a",
            priority: Priority::Level(1),
            entry: blink_a,
            stack_size: 512,
        },
        TaskConfig {
            name: "blink_b",
            priority: Priority::Level(1),
            entry: blink_b,
            stack_size: 512,
        },
        TaskConfig {
            name: "sensor",
            priority: Priority::Level(2),
            entry: sensor,
            stack_size: 768,
        },
        TaskConfig {
            name: "logger",
            priority: Priority::Level(4),
            entry: logger,
            stack_size: 1024,
        },
    ];

    let uart = kernel::create_mutex("uart").expect("failed to create uart mutex");
    UART.store(uart.0, Ordering::Relaxed);

    for config in tasks {
        let id = kernel::create_task(config).expect("failed to create task");
        kernel::activate_task(id).expect("failed to activate task");
    }

    // Start the scheduler: only returns on error
    match kernel::start(cp) {
        Ok(never) => match never {},
        Err(e) => panic!("scheduler failed to start: {}", e),
    }
}
