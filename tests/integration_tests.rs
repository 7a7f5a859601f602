//! Integration tests for pios
//!
//! These drive the public `Kernel` API on the host. A recording port stands
//! in for the Cortex-M4: a requested context switch is carried out by
//! calling `switch_context` the way PendSV would, and a heap buffer stands
//! in for the RAM task stacks are carved from.

use pios::config::STACK_GUARD;
use pios::scheduler::RunMode;
use pios::stack::{StackRegion, MIN_STACK_SIZE};
use pios::{Kernel, KernelError, MutexId, Port, Priority, TaskConfig, TaskId, TaskState};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockPort {
    switch_pending: bool,
    switch_requests: u32,
    indicator_toggles: u32,
}

impl Port for MockPort {
    fn request_context_switch(&mut self) {
        self.switch_pending = true;
        self.switch_requests += 1;
    }

    fn toggle_tick_indicator(&mut self) {
        self.indicator_toggles += 1;
    }
}

extern "C" fn task_body() -> ! {
    loop {}
}

struct Board {
    kernel: Kernel<MockPort>,
    _ram: Vec<u64>,
}

impl Board {
    fn with_ram(bytes: usize) -> Self {
        let mut ram = vec![0u64; bytes / 8];
        let floor = ram.as_mut_ptr() as usize;
        let top = floor + ram.len() * 8;

        let mut kernel = Kernel::new(MockPort::default());
        kernel.init(StackRegion::new(top, floor)).expect("init");
        Self { kernel, _ram: ram }
    }

    fn new() -> Self {
        Self::with_ram(16 * 1024)
    }

    fn spawn(&mut self, name: &'static str, level: u8) -> TaskId {
        self.kernel
            .create_task(TaskConfig {
                name,
                priority: Priority::Level(level),
                entry: task_body,
                stack_size: 512,
            })
            .expect("create task")
    }

    fn start(&mut self) -> TaskId {
        let sp = self.kernel.start_scheduler().expect("start");
        let current = self.kernel.current_task().expect("current task");
        let task = self.kernel.scheduler().task(current).expect("task");
        assert_eq!(task.saved_sp, sp);
        current
    }

    /// What PendSV does once the CPU gets to it.
    fn pendsv(&mut self) {
        if !std::mem::take(&mut self.kernel.port_mut().switch_pending) {
            return;
        }
        let sp = self
            .kernel
            .current_task()
            .and_then(|c| self.kernel.scheduler().task(c).ok())
            .map(|t| t.saved_sp)
            .expect("running task");
        self.kernel.switch_context(sp);
    }

    /// One SysTick period followed by the switch it pends.
    fn tick(&mut self) -> TaskId {
        self.kernel.on_tick();
        self.pendsv();
        self.check_invariants();
        self.kernel.current_task().expect("current task")
    }

    fn state(&self, task: TaskId) -> TaskState {
        self.kernel.task_state(task).expect("state")
    }

    fn check_invariants(&self) {
        let sched = self.kernel.scheduler();

        let running = sched
            .tasks()
            .filter(|t| t.state == TaskState::Running)
            .count();
        assert!(running <= 1, "{} tasks running", running);

        for task in sched.tasks() {
            assert_eq!(
                sched.is_queued(task.id),
                task.state == TaskState::Ready,
                "task {} queued/ready mismatch ({:?})",
                task.id,
                task.state
            );
        }

        let priorities: Vec<Priority> = sched
            .registry()
            .iter()
            .map(|&id| sched.priority(id).unwrap())
            .collect();
        assert!(priorities.windows(2).all(|w| w[0] <= w[1]));
    }
}

// ---------------------------------------------------------------------------
// Boot
// ---------------------------------------------------------------------------

mod boot_tests {
    use super::*;

    #[test]
    fn test_init_registers_idle() {
        let board = Board::new();
        let idle = board.kernel.idle_task().expect("idle registered");
        let task = board.kernel.scheduler().task(idle).unwrap();

        assert_eq!(task.name.as_str(), "idle");
        assert_eq!(task.priority, Priority::Idle);
        assert_eq!(task.stack.size(), 300);
        assert_eq!(board.kernel.active_tasks(), 1);
        assert_eq!(board.kernel.mode(), RunMode::Suspended);
    }

    #[test]
    fn test_init_without_room_reports_every_failure() {
        let mut ram = vec![0u64; 64];
        let floor = ram.as_mut_ptr() as usize;
        let top = floor + ram.len() * 8;

        let mut kernel = Kernel::new(MockPort::default());
        let errors = kernel.init(StackRegion::new(top, floor)).unwrap_err();
        assert!(errors.contains(KernelError::StackOverflow));
        assert!(!kernel.is_initialized());
        assert_eq!(
            kernel.create_task(TaskConfig {
                name: "late",
                priority: Priority::Level(1),
                entry: task_body,
                stack_size: 64,
            }),
            Err(KernelError::NotInitialized)
        );
    }

    #[test]
    fn test_stack_overflow_leaves_registry_unchanged() {
        let mut board = Board::with_ram(4096);
        let before = board.kernel.active_tasks();
        let cursor = board.kernel.scheduler().stacks().cursor();

        let result = board.kernel.create_task(TaskConfig {
            name: "huge",
            priority: Priority::Level(1),
            entry: task_body,
            stack_size: 2048,
        });
        assert_eq!(result, Err(KernelError::StackOverflow));
        assert_eq!(board.kernel.active_tasks(), before);
        assert_eq!(board.kernel.scheduler().stacks().cursor(), cursor);
    }

    const SENTINEL_WORDS: usize = 8;
    const SENTINEL: u64 = 0xA5A5_A5A5_A5A5_A5A5;

    /// Kernel over `ram` with the stack floor `SENTINEL_WORDS` words above
    /// its start; those words hold a pattern nothing may overwrite.
    fn kernel_above_sentinel(ram: &mut [u64]) -> Kernel<MockPort> {
        ram[..SENTINEL_WORDS].fill(SENTINEL);
        let base = ram.as_mut_ptr() as usize;
        let floor = base + SENTINEL_WORDS * 8;
        let top = base + ram.len() * 8;

        let mut kernel = Kernel::new(MockPort::default());
        kernel.init(StackRegion::new(top, floor)).expect("init");
        kernel
    }

    fn sized(name: &'static str, stack_size: usize) -> TaskConfig {
        TaskConfig {
            name,
            priority: Priority::Level(1),
            entry: task_body,
            stack_size,
        }
    }

    #[test]
    fn test_stack_below_frame_size_is_rejected_at_floor() {
        let mut ram = vec![0u64; 1024];
        let mut kernel = kernel_above_sentinel(&mut ram);
        let filler = kernel.scheduler().stacks().remaining() - 16 - STACK_GUARD;
        kernel.create_task(sized("filler", filler)).expect("filler");
        let before = kernel.active_tasks();
        assert_eq!(kernel.scheduler().stacks().remaining(), 16);

        assert_eq!(
            kernel.create_task(sized("tiny", 16)),
            Err(KernelError::InvalidStackSize)
        );
        assert_eq!(kernel.active_tasks(), before);
        assert_eq!(kernel.scheduler().stacks().remaining(), 16);
        drop(kernel);
        assert!(ram[..SENTINEL_WORDS].iter().all(|&w| w == SENTINEL));
    }

    #[test]
    fn test_frame_sized_stack_fits_exactly_on_floor() {
        let mut ram = vec![0u64; 1024];
        let floor = ram.as_ptr() as usize + SENTINEL_WORDS * 8;
        let mut kernel = kernel_above_sentinel(&mut ram);
        let filler = kernel.scheduler().stacks().remaining() - MIN_STACK_SIZE - STACK_GUARD;
        kernel.create_task(sized("filler", filler)).expect("filler");

        let last = kernel
            .create_task(sized("last", MIN_STACK_SIZE))
            .expect("frame-sized stack");
        let task = kernel.scheduler().task(last).unwrap();
        assert_eq!(task.stack.low, floor);
        assert_eq!(task.saved_sp as usize, floor);
        drop(kernel);
        assert!(ram[..SENTINEL_WORDS].iter().all(|&w| w == SENTINEL));
    }

    #[test]
    fn test_start_twice_and_create_after_start() {
        let mut board = Board::new();
        let a = board.spawn("a", 1);
        board.kernel.activate_task(a).unwrap();
        assert_eq!(board.start(), a);

        assert_eq!(board.kernel.start_scheduler(), Err(KernelError::AlreadyStarted));
        assert_eq!(
            board.kernel.create_task(TaskConfig {
                name: "late",
                priority: Priority::Level(1),
                entry: task_body,
                stack_size: 64,
            }),
            Err(KernelError::AlreadyStarted)
        );
    }

    #[test]
    fn test_start_without_tasks_enters_idle() {
        let mut board = Board::new();
        let idle = board.kernel.idle_task().unwrap();
        assert_eq!(board.start(), idle);
        assert_eq!(board.state(idle), TaskState::Running);
        assert_eq!(board.tick(), idle);
    }
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

mod scheduling_tests {
    use super::*;

    #[test]
    fn test_equal_priority_round_robin() {
        let mut board = Board::new();
        let a = board.spawn("a", 1);
        let b = board.spawn("b", 1);
        let c = board.spawn("c", 2);
        for t in [a, b, c] {
            board.kernel.activate_task(t).unwrap();
        }

        let mut order = vec![board.start()];
        board.check_invariants();
        for _ in 0..7 {
            order.push(board.tick());
        }
        assert_eq!(order, [a, b, a, b, a, b, a, b]);
        assert_ne!(board.state(c), TaskState::Running);
    }

    #[test]
    fn test_lower_priority_runs_once_group_terminates() {
        let mut board = Board::new();
        let a = board.spawn("a", 1);
        let c = board.spawn("c", 2);
        board.kernel.activate_task(a).unwrap();
        board.kernel.activate_task(c).unwrap();
        assert_eq!(board.start(), a);

        board.kernel.terminate_task(a).unwrap();
        assert!(board.kernel.port().switch_pending);
        board.pendsv();
        board.check_invariants();
        assert_eq!(board.kernel.current_task(), Some(c));
        assert_eq!(board.state(a), TaskState::Suspended);
    }

    #[test]
    fn test_activation_preempts_less_urgent_task() {
        let mut board = Board::new();
        let low = board.spawn("low", 5);
        let high = board.spawn("high", 1);
        board.kernel.activate_task(low).unwrap();
        assert_eq!(board.start(), low);

        board.kernel.activate_task(high).unwrap();
        board.pendsv();
        board.check_invariants();
        assert_eq!(board.kernel.current_task(), Some(high));
        assert_eq!(board.state(low), TaskState::Waiting);

        board.kernel.terminate_task(high).unwrap();
        board.pendsv();
        assert_eq!(board.kernel.current_task(), Some(low));
        assert_eq!(board.state(low), TaskState::Running);
    }

    #[test]
    fn test_idle_fallback() {
        let mut board = Board::new();
        let a = board.spawn("a", 1);
        board.kernel.activate_task(a).unwrap();
        assert_eq!(board.start(), a);

        board.kernel.terminate_task(a).unwrap();
        board.pendsv();
        board.check_invariants();

        let idle = board.kernel.idle_task().unwrap();
        assert_eq!(board.kernel.current_task(), Some(idle));
        assert_eq!(board.state(idle), TaskState::Running);
        assert_eq!(board.tick(), idle);
    }

    #[test]
    fn test_idle_cannot_be_terminated_or_blocked() {
        let mut board = Board::new();
        let idle = board.kernel.idle_task().unwrap();
        assert_eq!(board.start(), idle);

        assert_eq!(
            board.kernel.dispatch(1, [idle.0 as u32, 0, 0]),
            KernelError::ReservedPriority.code()
        );
        assert_eq!(
            board.kernel.dispatch(2, [idle.0 as u32, 5, 0]),
            KernelError::ReservedPriority.code()
        );
        assert_eq!(board.state(idle), TaskState::Running);
        for _ in 0..3 {
            assert_eq!(board.tick(), idle);
        }
    }

    #[test]
    fn test_activation_from_idle_waits_for_tick() {
        let mut board = Board::new();
        let a = board.spawn("a", 1);
        let idle = board.kernel.idle_task().unwrap();
        assert_eq!(board.start(), idle);

        board.kernel.activate_task(a).unwrap();
        assert!(!board.kernel.port().switch_pending);
        assert_eq!(board.kernel.current_task(), Some(idle));
        assert_eq!(board.state(a), TaskState::Ready);
        board.check_invariants();

        assert_eq!(board.tick(), a);
        assert_eq!(board.state(idle), TaskState::Waiting);
    }

    #[test]
    fn test_tick_counts_and_toggles() {
        let mut board = Board::new();
        board.kernel.on_tick();
        board.kernel.on_tick();
        assert_eq!(board.kernel.ticks(), 2);
        assert_eq!(board.kernel.port().indicator_toggles, 2);
        // Not started: no decision, no switch.
        assert_eq!(board.kernel.port().switch_requests, 0);

        board.start();
        board.tick();
        assert_eq!(board.kernel.port().switch_requests, 1);
    }
}

// ---------------------------------------------------------------------------
// Timed waits
// ---------------------------------------------------------------------------

mod wait_tests {
    use super::*;

    #[test]
    fn test_wait_five_ticks_wakes_on_fourth() {
        let mut board = Board::new();
        let a = board.spawn("a", 1);
        board.kernel.activate_task(a).unwrap();
        assert_eq!(board.start(), a);

        board.kernel.wait_ticks(a, 5).unwrap();
        // Rebuild only: the switch waits for the tick.
        assert!(!board.kernel.port().switch_pending);
        assert_eq!(board.kernel.current_task(), Some(a));

        let idle = board.kernel.idle_task().unwrap();
        for _ in 0..3 {
            assert_eq!(board.tick(), idle);
            assert_eq!(board.state(a), TaskState::Suspended);
        }
        assert_eq!(board.tick(), a);
        assert_eq!(board.state(a), TaskState::Running);
    }

    #[test]
    fn test_wait_one_tick() {
        let mut board = Board::new();
        let a = board.spawn("a", 1);
        board.kernel.activate_task(a).unwrap();
        board.start();

        board.kernel.wait_ticks(a, 1).unwrap();
        assert_eq!(board.tick(), a);
    }

    #[test]
    fn test_wait_zero_ticks_is_rejected() {
        let mut board = Board::new();
        let a = board.spawn("a", 1);
        board.kernel.activate_task(a).unwrap();
        board.start();

        assert_eq!(board.kernel.wait_ticks(a, 0), Err(KernelError::InvalidTicks));
        assert_eq!(board.state(a), TaskState::Running);
    }

    #[test]
    fn test_peer_keeps_running_while_other_waits() {
        let mut board = Board::new();
        let a = board.spawn("a", 1);
        let b = board.spawn("b", 1);
        board.kernel.activate_task(a).unwrap();
        board.kernel.activate_task(b).unwrap();
        assert_eq!(board.start(), a);

        board.kernel.wait_ticks(a, 3).unwrap();
        assert_eq!(board.tick(), b);
        assert_eq!(board.state(a), TaskState::Suspended);
        // Woken on the second tick, at the head of the rotation.
        assert_eq!(board.tick(), a);
        assert_eq!(board.state(b), TaskState::Ready);
        assert_eq!(board.tick(), b);
        assert_eq!(board.tick(), a);
    }

    #[test]
    fn test_activation_cancels_pending_wait() {
        let mut board = Board::new();
        let a = board.spawn("a", 1);
        board.kernel.activate_task(a).unwrap();
        board.start();

        board.kernel.wait_ticks(a, 100).unwrap();
        board.tick();
        board.kernel.activate_task(a).unwrap();
        assert!(!board.kernel.scheduler().task(a).unwrap().timed_block.enabled);
    }
}

// ---------------------------------------------------------------------------
// Mutexes
// ---------------------------------------------------------------------------

mod mutex_tests {
    use super::*;

    fn owner(board: &Board, m: MutexId) -> Option<TaskId> {
        board.kernel.mutex_owner(m).unwrap()
    }

    #[test]
    fn test_priority_inheritance_scenario() {
        let mut board = Board::new();
        let x = board.spawn("x", 3);
        let y = board.spawn("y", 1);
        let m = board.kernel.create_mutex("m").unwrap();
        board.kernel.activate_task(x).unwrap();
        assert_eq!(board.start(), x);

        // X takes the free mutex.
        board.kernel.acquire_mutex(m, x).unwrap();
        assert_eq!(owner(&board, m), Some(x));

        // Y wakes up and preempts X.
        board.kernel.activate_task(y).unwrap();
        board.pendsv();
        assert_eq!(board.kernel.current_task(), Some(y));

        // Y blocks on M: X inherits Y's priority and runs.
        board.kernel.acquire_mutex(m, y).unwrap();
        assert_eq!(board.state(y), TaskState::Suspended);
        assert_eq!(board.kernel.priority(x), Ok(Priority::Level(1)));
        assert_eq!(board.kernel.mutex_waiter(m), Ok(Some(y)));
        board.pendsv();
        board.check_invariants();
        assert_eq!(board.kernel.current_task(), Some(x));

        // Boosted X still runs across ticks.
        assert_eq!(board.tick(), x);

        // X releases: priority restored, Y owns M and runs.
        board.kernel.release_mutex(m).unwrap();
        assert_eq!(board.kernel.priority(x), Ok(Priority::Level(3)));
        assert_eq!(owner(&board, m), Some(y));
        assert_eq!(board.kernel.mutex_waiter(m), Ok(None));
        board.pendsv();
        board.check_invariants();
        assert_eq!(board.kernel.current_task(), Some(y));
        assert_eq!(board.state(x), TaskState::Waiting);
    }

    #[test]
    fn test_deadlock_is_prevented_every_time() {
        let mut board = Board::new();
        let x = board.spawn("x", 2);
        let y = board.spawn("y", 2);
        let a = board.kernel.create_mutex("a").unwrap();
        let b = board.kernel.create_mutex("b").unwrap();

        board.kernel.acquire_mutex(a, x).unwrap();
        board.kernel.acquire_mutex(b, y).unwrap();
        for _ in 0..5 {
            assert_eq!(
                board.kernel.acquire_mutex(b, x),
                Err(KernelError::DeadlockPrevented)
            );
        }
        assert_eq!(board.kernel.mutex_waiter(b), Ok(None));
    }

    #[test]
    fn test_single_waiter() {
        let mut board = Board::new();
        let x = board.spawn("x", 3);
        let y = board.spawn("y", 2);
        let z = board.spawn("z", 1);
        let m = board.kernel.create_mutex("m").unwrap();

        board.kernel.acquire_mutex(m, x).unwrap();
        board.kernel.acquire_mutex(m, y).unwrap();
        assert_eq!(
            board.kernel.acquire_mutex(m, z),
            Err(KernelError::CapacityExceeded)
        );
        assert_eq!(owner(&board, m), Some(x));
        assert_eq!(board.kernel.mutex_waiter(m), Ok(Some(y)));
    }

    #[test]
    fn test_inherited_priority_dropped_after_nested_holds() {
        let mut board = Board::new();
        let x = board.spawn("x", 3);
        let y = board.spawn("y", 1);
        let a = board.kernel.create_mutex("a").unwrap();
        let b = board.kernel.create_mutex("b").unwrap();

        board.kernel.acquire_mutex(a, x).unwrap();
        board.kernel.acquire_mutex(a, y).unwrap();
        assert_eq!(board.kernel.priority(x), Ok(Priority::Level(1)));
        board.kernel.acquire_mutex(b, x).unwrap();

        board.kernel.release_mutex(a).unwrap();
        assert_eq!(owner(&board, a), Some(y));
        board.kernel.release_mutex(b).unwrap();
        assert_eq!(board.kernel.priority(x), Ok(Priority::Level(3)));
        assert_eq!(owner(&board, b), None);
    }

    #[test]
    fn test_release_by_non_owner() {
        let mut board = Board::new();
        let x = board.spawn("x", 1);
        let y = board.spawn("y", 2);
        let m = board.kernel.create_mutex("m").unwrap();
        board.kernel.activate_task(x).unwrap();
        board.kernel.acquire_mutex(m, y).unwrap();
        assert_eq!(board.start(), x);

        assert_eq!(board.kernel.release_mutex(m), Err(KernelError::NotOwner));
        assert_eq!(owner(&board, m), Some(y));
    }

    #[test]
    fn test_gateway_status_words() {
        let mut board = Board::new();
        let x = board.spawn("x", 3);
        let y = board.spawn("y", 2);
        let a = board.kernel.create_mutex("a").unwrap();
        let b = board.kernel.create_mutex("b").unwrap();

        assert_eq!(board.kernel.dispatch(3, [a.0 as u32, x.0 as u32, 0]), 0);
        assert_eq!(board.kernel.dispatch(3, [b.0 as u32, y.0 as u32, 0]), 0);
        assert_eq!(
            board.kernel.dispatch(3, [b.0 as u32, x.0 as u32, 0]),
            KernelError::DeadlockPrevented.code()
        );
        assert_eq!(
            board.kernel.dispatch(7, [0; 3]),
            KernelError::UnknownService.code()
        );
        assert_eq!(
            board.kernel.dispatch(1, [200, 0, 0]),
            KernelError::UnknownTask.code()
        );
    }
}
