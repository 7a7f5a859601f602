//! # Kernel
//!
//! Top-level kernel object and public API for PiOS.
//!
//! [`Kernel`] owns the whole scheduler context: the task registry and ready
//! queue, the mutex table and the hardware port. It is generic over the
//! [`Port`] so the scheduling core runs unchanged on the host under test.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()           ← Ready queue, stack region, idle task
//!         ├─► kernel::create_task()    ← Register tasks (×N)
//!         ├─► kernel::create_mutex()   ← Register mutexes (×N)
//!         ├─► kernel::activate_task()  ← Make tasks eligible
//!         └─► kernel::start()          ← Launch scheduler (no return)
//!               ├─► Activate idle, first scheduling decision
//!               ├─► Set interrupt priorities, configure SysTick
//!               └─► Enter the first task via arch::start_first_task()
//! ```
//!
//! Once started, everything a task asks of the kernel goes through the
//! privileged call gateway ([`crate::svc`]).

use crate::arch::{idle_task, Port};
use crate::config::IDLE_STACK_SIZE;
use crate::error::{InitErrors, KernelError, KernelResult};
use crate::mutex::{Mutex, MutexId, MutexTable};
use crate::scheduler::{RunMode, Scheduler};
use crate::stack::StackRegion;
use crate::svc::Request;
use crate::task::{Priority, TaskConfig, TaskId, TaskState};

/// The scheduler context.
pub struct Kernel<P: Port> {
    pub(crate) sched: Scheduler,
    pub(crate) mutexes: MutexTable,
    pub(crate) port: P,
    initialized: bool,
}

impl<P: Port> Kernel<P> {
    pub const fn new(port: P) -> Self {
        Self {
            sched: Scheduler::new(),
            mutexes: MutexTable::new(),
            port,
            initialized: false,
        }
    }

    /// Initialize the ready queue, the stack region and the idle task.
    ///
    /// Every step runs even if an earlier one failed; all failures are
    /// reported together. Call once, before anything else.
    pub fn init(&mut self, region: StackRegion) -> Result<(), InitErrors> {
        let mut errors = InitErrors::new();

        errors.collect(self.sched.init_ready_queue().map_err(KernelError::from));
        self.sched.init_stacks(region);
        errors.collect(self.sched.register_idle(idle_task, IDLE_STACK_SIZE));

        match errors.into_result() {
            Ok(()) => {
                self.initialized = true;
                log_info!(
                    "kernel initialized: main stack {:#x}..{:#x}, heap boundary {:#x}",
                    self.sched.stacks().main_stack_end(),
                    region.top,
                    region.floor
                );
                Ok(())
            }
            Err(errors) => {
                log_error!("kernel init failed: {}", errors);
                Err(errors)
            }
        }
    }

    /// Register a task. It starts `Suspended`; activate it to make it run.
    ///
    /// # Errors
    /// `StackOverflow`, `RegistryFull`, `ReservedPriority`,
    /// `InvalidStackSize`, or `NotInitialized` / `AlreadyStarted` outside
    /// the boot phase.
    pub fn create_task(&mut self, config: TaskConfig) -> KernelResult<TaskId> {
        self.check_boot_phase()?;
        self.sched.register(&config)
    }

    /// Register a mutex.
    pub fn create_mutex(&mut self, name: &'static str) -> KernelResult<MutexId> {
        self.check_boot_phase()?;
        self.mutexes.create(name)
    }

    fn check_boot_phase(&self) -> KernelResult<()> {
        if !self.initialized {
            return Err(KernelError::NotInitialized);
        }
        if self.sched.mode() == RunMode::Running {
            return Err(KernelError::AlreadyStarted);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Privileged operations (what the gateway runs)
    // -----------------------------------------------------------------------

    pub fn activate_task(&mut self, task: TaskId) -> KernelResult<()> {
        self.service(Request::ActivateTask(task))
    }

    pub fn terminate_task(&mut self, task: TaskId) -> KernelResult<()> {
        self.service(Request::TerminateTask(task))
    }

    /// Suspend `task` for `ticks` ticks. Does not switch by itself.
    pub fn wait_ticks(&mut self, task: TaskId, ticks: u32) -> KernelResult<()> {
        self.service(Request::WaitForTicks { task, ticks })
    }

    pub fn acquire_mutex(&mut self, mutex: MutexId, task: TaskId) -> KernelResult<()> {
        self.service(Request::AcquireMutex { mutex, task })
    }

    /// Release `mutex` on behalf of the current task.
    pub fn release_mutex(&mut self, mutex: MutexId) -> KernelResult<()> {
        self.service(Request::ReleaseMutex(mutex))
    }

    /// Start scheduling.
    ///
    /// Makes idle the current task, activates it, takes the first decision
    /// and commits it. Returns the saved stack pointer of the task to enter
    /// (idle when nothing else is eligible); the port launches it.
    pub fn start_scheduler(&mut self) -> KernelResult<*mut u32> {
        if !self.initialized {
            return Err(KernelError::NotInitialized);
        }
        let idle = self.sched.start()?;
        self.activate_task(idle)?;
        self.sched.decide_next()?;

        let first = self.sched.commit_next().ok_or(KernelError::NotInitialized)?;
        let task = self.sched.task(first)?;
        log_info!("scheduler started: entering {} '{}'", first, task.name.as_str());
        Ok(task.saved_sp)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    /// Pended-switch hand-over, as run by the switch exception.
    pub fn switch_context(&mut self, saved_sp: *mut u32) -> *mut u32 {
        self.sched.switch_context(saved_sp)
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mode(&self) -> RunMode {
        self.sched.mode()
    }

    pub fn task_state(&self, task: TaskId) -> KernelResult<TaskState> {
        self.sched.task_state(task)
    }

    /// Effective priority, including any inherited boost.
    pub fn priority(&self, task: TaskId) -> KernelResult<Priority> {
        self.sched.priority(task)
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.sched.current()
    }

    pub fn next_task(&self) -> Option<TaskId> {
        self.sched.next()
    }

    pub fn idle_task(&self) -> Option<TaskId> {
        self.sched.idle()
    }

    pub fn ready_queue(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.sched.ready_queue()
    }

    pub fn active_tasks(&self) -> usize {
        self.sched.active_tasks()
    }

    pub fn ticks(&self) -> u64 {
        self.sched.ticks()
    }

    pub fn mutex(&self, mutex: MutexId) -> KernelResult<&Mutex> {
        self.mutexes.get(mutex)
    }

    pub fn mutex_owner(&self, mutex: MutexId) -> KernelResult<Option<TaskId>> {
        self.mutexes.get(mutex).map(|m| m.owner)
    }

    pub fn mutex_waiter(&self, mutex: MutexId) -> KernelResult<Option<TaskId>> {
        self.mutexes.get(mutex).map(|m| m.waiter)
    }
}

// ---------------------------------------------------------------------------
// Global kernel instance (target only)
// ---------------------------------------------------------------------------

#[cfg(target_arch = "arm")]
pub use self::global::*;

#[cfg(target_arch = "arm")]
mod global {
    use core::convert::Infallible;

    use super::Kernel;
    use crate::arch::cortex_m4::{self, CortexM4};
    use crate::error::{InitErrors, KernelError, KernelResult};
    use crate::mutex::MutexId;
    use crate::stack::StackRegion;
    use crate::svc::{self, Request};
    use crate::sync;
    use crate::task::{TaskConfig, TaskId, TaskState};

    /// Global kernel instance.
    ///
    /// # Safety
    /// Boot code touches it inside critical sections before the scheduler
    /// starts. Afterwards only the SVCall, SysTick and PendSV handlers
    /// mutate it; they never preempt each other mid-update (SVCall outranks
    /// SysTick, PendSV masks interrupts).
    static mut KERNEL: Kernel<CortexM4> = Kernel::new(CortexM4::new());

    /// # Safety
    /// Caller must be privileged kernel code as described on `KERNEL`.
    #[inline]
    pub(crate) unsafe fn kernel() -> &'static mut Kernel<CortexM4> {
        &mut *core::ptr::addr_of_mut!(KERNEL)
    }

    /// Initialize the kernel over the RAM between the end of static data and
    /// the main stack.
    pub fn init() -> Result<(), InitErrors> {
        sync::critical_section(|_cs| unsafe { kernel().init(StackRegion::from_linker()) })
    }

    pub fn create_task(config: TaskConfig) -> KernelResult<TaskId> {
        sync::critical_section(|_cs| unsafe { kernel().create_task(config) })
    }

    pub fn create_mutex(name: &'static str) -> KernelResult<MutexId> {
        sync::critical_section(|_cs| unsafe { kernel().create_mutex(name) })
    }

    /// Start the scheduler. Only returns if it could not start.
    pub fn start(mut core_peripherals: cortex_m::Peripherals) -> Result<Infallible, KernelError> {
        cortex_m::interrupt::disable();

        let first_sp = match unsafe { kernel().start_scheduler() } {
            Ok(sp) => sp,
            Err(e) => {
                // Safety: restores the state `start` was entered with.
                unsafe { cortex_m::interrupt::enable() };
                return Err(e);
            }
        };

        cortex_m4::set_interrupt_priorities(&mut core_peripherals.SCB);
        cortex_m4::configure_systick(&mut core_peripherals.SYST);

        unsafe { cortex_m4::start_first_task(first_sp) }
    }

    // -----------------------------------------------------------------------
    // Task-side API: every call traps into the gateway
    // -----------------------------------------------------------------------

    fn call(request: Request) -> KernelResult<()> {
        let (_, args) = request.encode();
        svc::from_status(cortex_m4::supervisor_call(request.service(), args))
    }

    /// The task this code runs in.
    pub fn current_task() -> Option<TaskId> {
        unsafe { kernel().current_task() }
    }

    pub fn activate_task(task: TaskId) -> KernelResult<()> {
        call(Request::ActivateTask(task))
    }

    pub fn terminate_task(task: TaskId) -> KernelResult<()> {
        call(Request::TerminateTask(task))
    }

    /// Block the calling task for `ticks` ticks.
    pub fn wait_ticks(ticks: u32) -> KernelResult<()> {
        let task = current_task().ok_or(KernelError::NotInitialized)?;
        call(Request::WaitForTicks { task, ticks })?;
        // The gateway only rebuilt the queue; the tick switches us out.
        while unsafe { kernel().task_state(task) }? != TaskState::Running
            || current_task() != Some(task)
        {
            cortex_m::asm::wfi();
        }
        Ok(())
    }

    /// Acquire `mutex`, blocking while another task holds it.
    pub fn acquire_mutex(mutex: MutexId) -> KernelResult<()> {
        let task = current_task().ok_or(KernelError::NotInitialized)?;
        call(Request::AcquireMutex { mutex, task })
    }

    pub fn release_mutex(mutex: MutexId) -> KernelResult<()> {
        call(Request::ReleaseMutex(mutex))
    }
}
