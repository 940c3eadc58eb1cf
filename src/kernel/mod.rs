//! The kernel - objects, processes, subsystems and the message pump
//!
//! One `Kernel` value holds every piece of kernel and window-server state.
//! There is no global instance: whoever drives the system owns the kernel
//! and passes it by reference to handlers and window procedures.

pub mod error;
pub mod executor;
pub mod ipc;
pub mod ntapi;
pub mod object;
pub mod process;
pub mod subsystem;
pub mod syscall;
pub mod system;
pub mod task;
pub mod trace;


pub use error::{KernelError, KernelResult, StopCode, SystemStop};
pub use executor::{Executor, Priority};
pub use ipc::{ChannelId, Message, ERROR_FLAG};
pub use object::{Handle, KernelObject, ObjectManager, ObjectType};
pub use process::{Pid, Process, ProcessOptions, ProcessState};
pub use subsystem::{Request, Response, SharedRegion, SharedView, Subsystem};
pub use syscall::Port;
pub use system::{ProcessContext, System};
pub use task::TaskId;
pub use trace::{TraceCategory, Tracer};

use crate::config::KernelConfig;
use crate::user::UserState;
use ipc::ReplyChannels;
use std::collections::BTreeMap;
use subsystem::SubsystemRegistry;

/// All kernel state
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) objects: ObjectManager,
    pub(crate) processes: BTreeMap<Pid, Process>,
    next_pid: u32,
    pub(crate) subsystems: SubsystemRegistry,
    pub(crate) user: UserState,
    pub(crate) tracer: Tracer,
    /// Channels for requests the kernel itself sends (window callbacks)
    pub(crate) reply_channels: ReplyChannels,
    stop: Option<SystemStop>,
    shutting_down: bool,
    cancelled_tasks: Vec<TaskId>,
    tick: u64,
}

impl Kernel {
    /// Boot a kernel: the System process, the built-in subsystems and the
    /// default desktop
    pub fn new(config: KernelConfig) -> Self {
        let mut tracer = Tracer::with_capacity(config.trace_buffer);
        if config.trace_enabled {
            tracer.enable();
        }

        let mut kernel = Self {
            user: UserState::new(&config),
            config,
            objects: ObjectManager::new(),
            processes: BTreeMap::new(),
            next_pid: 1,
            subsystems: SubsystemRegistry::new(),
            tracer,
            reply_channels: ReplyChannels::new(),
            stop: None,
            shutting_down: false,
            cancelled_tasks: Vec::new(),
            tick: 0,
        };

        kernel.boot_system_process();
        kernel.subsystems.install(ntapi::subsystem());
        kernel.subsystems.install(crate::user::api::subsystem(&kernel.user));
        kernel.create_default_desktop();
        log::info!("kernel booted");
        kernel
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn objects(&self) -> &ObjectManager {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectManager {
        &mut self.objects
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    /// Logical time, advanced once per handled request and posted message
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub(crate) fn advance_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub(crate) fn allocate_pid(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        pid
    }

    /// Why the system stopped, if it did
    pub fn stop_reason(&self) -> Option<&SystemStop> {
        self.stop.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_some()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// From here on critical processes may exit without stopping the system
    pub fn begin_shutdown(&mut self) {
        self.shutting_down = true;
    }

    /// Stop the system; the first stop wins
    pub(crate) fn bugcheck(&mut self, code: StopCode, detail: impl Into<String>) {
        if self.stop.is_some() {
            return;
        }
        let stop = SystemStop {
            code,
            detail: detail.into(),
        };
        log::error!("{}", stop);
        self.stop = Some(stop);
    }

    pub(crate) fn trace(
        &mut self,
        category: TraceCategory,
        name: &str,
        pid: Option<Pid>,
        detail: impl FnOnce() -> String,
    ) {
        if self.tracer.is_enabled() {
            let tick = self.tick;
            self.tracer
                .record(tick, category, name, pid.map(|p| p.0), Some(detail()));
        }
    }

    /// Tasks whose processes were torn down since the last call
    pub fn take_cancelled_tasks(&mut self) -> Vec<TaskId> {
        std::mem::take(&mut self.cancelled_tasks)
    }

    pub(crate) fn cancel_task_later(&mut self, task: TaskId) {
        self.cancelled_tasks.push(task);
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}
