//! Process records and lifecycle
//!
//! A process is an isolated execution context (a task on the executor) plus
//! the kernel's bookkeeping for it: a root object that owns everything the
//! process creates, per-subsystem state, deferred replies, the window
//! message queue and input state.
//!
//! Lifecycle: Running -> Terminating -> Terminated, never backwards.

use super::error::{KernelError, KernelResult, StopCode};
use super::executor::Priority;
use super::ipc::{self, ChannelId, Message};
use super::object::{Handle, KernelObject};
use super::task::TaskId;
use super::trace::TraceCategory;
use super::Kernel;
use crate::user::callback::CallbackHost;
use crate::user::queue::MessageQueue;
use crate::user::{DesktopId, Hwnd};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl Pid {
    /// The System process, owner of desktops
    pub const SYSTEM: Pid = Pid(0);
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Terminating,
    Terminated,
}

/// How to create a process
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Exiting stops the whole system
    pub critical: bool,
    pub priority: Priority,
    /// Desktop to attach to; the default desktop if None
    pub desktop: Option<DesktopId>,
}

impl ProcessOptions {
    pub fn critical() -> Self {
        Self {
            critical: true,
            priority: Priority::Critical,
            desktop: None,
        }
    }
}

/// Per-process activation state
#[derive(Debug, Clone, Default)]
pub struct InputState {
    pub active: Hwnd,
    pub focus: Hwnd,
    pub capture: Hwnd,
    pub prev_active: Hwnd,
    /// One-shot grant to take the foreground
    pub allow_set_foreground: bool,
}

/// The kernel's side of a process's execution context
#[derive(Default)]
pub(crate) struct ExecutionContext {
    pub(crate) task: Option<TaskId>,
    /// Requests from the process
    pub(crate) inbox: Option<ipc::Receiver<Message>>,
    /// Replies to the process
    pub(crate) outbox: Option<ipc::Sender<Message>>,
    /// Where remote window procedures run
    pub(crate) callbacks: Option<Rc<dyn CallbackHost>>,
}

/// Per-process instance of a subsystem
pub(crate) struct SubsystemInstance {
    pub(crate) name: String,
    pub(crate) state: Box<dyn Any>,
}

/// A reply the kernel owes but has not sent yet
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeferredReply {
    pub(crate) opcode: u32,
}

/// Process-side ends of the transport, handed to the spawner
pub struct ProcessEndpoints {
    pub to_kernel: ipc::Sender<Message>,
    pub from_kernel: ipc::Receiver<Message>,
}

/// A process record
pub struct Process {
    pub pid: Pid,
    pub name: String,
    /// Owns every object the process creates
    pub root: Handle,
    pub state: ProcessState,
    pub exit_code: Option<i32>,
    pub critical: bool,
    pub desktop: DesktopId,
    /// Set while a graceful quit runs; window procedures still dispatch
    pub(crate) graceful: bool,
    pub(crate) context: ExecutionContext,
    pub(crate) subsystems: Vec<SubsystemInstance>,
    pub(crate) deferred: BTreeMap<ChannelId, DeferredReply>,
    pub(crate) queue: MessageQueue,
    pub(crate) input: InputState,
    pub(crate) last_error: u32,
}

impl Process {
    pub fn new(pid: Pid, name: String, root: Handle, desktop: DesktopId) -> Self {
        Self {
            pid,
            name,
            root,
            state: ProcessState::Running,
            exit_code: None,
            critical: false,
            desktop,
            graceful: false,
            context: ExecutionContext::default(),
            subsystems: Vec::new(),
            deferred: BTreeMap::new(),
            queue: MessageQueue::new(),
            input: InputState::default(),
            last_error: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    pub fn input(&self) -> &InputState {
        &self.input
    }

    pub fn last_error(&self) -> u32 {
        self.last_error
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn pending_replies(&self) -> usize {
        self.deferred.len()
    }
}

impl Kernel {
    pub(crate) fn boot_system_process(&mut self) {
        let root = self
            .objects
            .allocate(KernelObject::Process(Pid::SYSTEM), Handle::NULL);
        let mut system = Process::new(Pid::SYSTEM, "System".into(), root, DesktopId::DEFAULT);
        system.critical = true;
        self.processes.insert(Pid::SYSTEM, system);
    }

    /// Create a process record and run every subsystem's init hook
    ///
    /// Returns the process-side transport endpoints. The caller attaches the
    /// execution context (task and callback host) afterwards.
    pub fn create_process(
        &mut self,
        name: &str,
        options: &ProcessOptions,
    ) -> KernelResult<(Pid, ProcessEndpoints)> {
        let desktop = options.desktop.unwrap_or(DesktopId::DEFAULT);
        if !self.user.desktops.contains_key(&desktop) {
            return Err(KernelError::InvalidParameter(format!(
                "no such desktop {}",
                desktop.0
            )));
        }

        let pid = self.allocate_pid();
        let root = self
            .objects
            .allocate(KernelObject::Process(pid), Handle::NULL);

        let (to_kernel, inbox) = ipc::channel();
        let (outbox, from_kernel) = ipc::channel();

        let mut process = Process::new(pid, name.to_string(), root, desktop);
        process.critical = options.critical;
        process.context.inbox = Some(inbox);
        process.context.outbox = Some(outbox);
        // A new process may bring its first window to the foreground
        process.input.allow_set_foreground = true;
        process.queue.set_limit(self.config.max_queue_len);
        self.processes.insert(pid, process);

        for (subsystem, init) in self.subsystems.init_hooks() {
            let state: Box<dyn Any> = match init {
                Some(hook) => match hook(self, pid) {
                    Ok(state) => state,
                    Err(e) => {
                        log::warn!("{} init failed for process {}: {}", subsystem, pid, e);
                        self.terminate_process(pid, -1)?;
                        return Err(e);
                    }
                },
                None => Box::new(()),
            };
            if let Some(process) = self.processes.get_mut(&pid) {
                process.subsystems.push(SubsystemInstance {
                    name: subsystem,
                    state,
                });
            }
        }

        self.tracer.stats.processes_spawned += 1;
        self.trace(TraceCategory::Process, "create", Some(pid), || name.to_string());
        log::info!("created process {} ({})", pid, name);
        Ok((pid, ProcessEndpoints {
            to_kernel,
            from_kernel,
        }))
    }

    pub fn attach_task(&mut self, pid: Pid, task: TaskId) {
        if let Some(process) = self.processes.get_mut(&pid) {
            process.context.task = Some(task);
        }
    }

    pub fn attach_callbacks(&mut self, pid: Pid, host: Rc<dyn CallbackHost>) {
        if let Some(process) = self.processes.get_mut(&pid) {
            process.context.callbacks = Some(host);
        }
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub(crate) fn process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    pub fn process_state(&self, pid: Pid) -> Option<ProcessState> {
        self.processes.get(&pid).map(|p| p.state)
    }

    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    /// Whether window procedures of this process may still run
    pub(crate) fn accepts_dispatch(&self, pid: Pid) -> bool {
        match self.processes.get(&pid) {
            Some(p) => match p.state {
                ProcessState::Running => true,
                ProcessState::Terminating => p.graceful,
                ProcessState::Terminated => false,
            },
            None => false,
        }
    }

    pub fn last_error(&self, pid: Pid) -> u32 {
        self.processes.get(&pid).map(|p| p.last_error).unwrap_or(0)
    }

    pub fn set_last_error(&mut self, pid: Pid, code: u32) {
        if let Some(process) = self.processes.get_mut(&pid) {
            process.last_error = code;
        }
    }

    /// This process's state for one subsystem
    pub fn subsystem_state<T: 'static>(&self, pid: Pid, subsystem: &str) -> Option<&T> {
        self.processes
            .get(&pid)?
            .subsystems
            .iter()
            .find(|s| s.name == subsystem)?
            .state
            .downcast_ref()
    }

    pub fn subsystem_state_mut<T: 'static>(&mut self, pid: Pid, subsystem: &str) -> Option<&mut T> {
        self.processes
            .get_mut(&pid)?
            .subsystems
            .iter_mut()
            .find(|s| s.name == subsystem)?
            .state
            .downcast_mut()
    }

    /// Graceful exit: exit hooks run before teardown
    pub fn quit_process(&mut self, pid: Pid, exit_code: i32) -> KernelResult<()> {
        self.end_process(pid, exit_code, true)
    }

    /// Forced exit: no hooks, no window procedures
    pub fn terminate_process(&mut self, pid: Pid, exit_code: i32) -> KernelResult<()> {
        self.end_process(pid, exit_code, false)
    }

    fn end_process(&mut self, pid: Pid, exit_code: i32, graceful: bool) -> KernelResult<()> {
        let Some(process) = self.processes.get_mut(&pid) else {
            return Err(KernelError::NotFound);
        };
        if process.state != ProcessState::Running {
            return Ok(());
        }
        process.state = ProcessState::Terminating;
        process.graceful = graceful;
        process.exit_code = Some(exit_code);
        log::info!(
            "process {} ({}) {} with code {}",
            pid,
            process.name,
            if graceful { "quitting" } else { "terminated" },
            exit_code
        );

        if graceful {
            for hook in self.subsystems.exit_hooks() {
                hook(self, pid, exit_code);
            }
        }

        // Whatever the hooks left behind, and everything on forced exit
        if let Some(process) = self.processes.get_mut(&pid) {
            process.graceful = false;
        }
        self.user_process_teardown(pid);

        let Some(process) = self.processes.get_mut(&pid) else {
            return Ok(());
        };
        let context = std::mem::take(&mut process.context);
        if let Some(task) = context.task {
            self.cancel_task_later(task);
        }
        if let Some(outbox) = &context.outbox {
            outbox.close();
        }
        if let Some(inbox) = &context.inbox {
            inbox.close();
        }

        let Some(process) = self.processes.get_mut(&pid) else {
            return Ok(());
        };
        let dropped = process.deferred.len();
        process.deferred.clear();
        process.queue.clear();
        process.subsystems.clear();
        let root = process.root;
        let critical = process.critical;
        let name = process.name.clone();
        if dropped > 0 {
            log::debug!("process {}: dropped {} deferred replies", pid, dropped);
        }

        let destroyed = self.objects.destroy_recursive(root);
        if let Some(process) = self.processes.get_mut(&pid) {
            process.state = ProcessState::Terminated;
        }
        self.tracer.stats.processes_exited += 1;
        self.trace(TraceCategory::Process, "exit", Some(pid), || {
            format!("code={} objects={}", exit_code, destroyed)
        });

        if critical && !self.is_shutting_down() {
            self.bugcheck(
                StopCode::CriticalProcessDied,
                format!("critical process {} ({}) exited with {}", pid, name, exit_code),
            );
        }
        Ok(())
    }

    /// Terminate every process, newest first, without raising a stop
    pub fn shutdown(&mut self) {
        self.begin_shutdown();
        let pids: Vec<Pid> = self.processes.keys().rev().copied().collect();
        for pid in pids {
            let _ = self.terminate_process(pid, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::kernel::ObjectType;
    use crate::kernel::subsystem::Subsystem;
    use std::cell::RefCell;

    fn kernel() -> Kernel {
        Kernel::new(KernelConfig::with_screen(800, 600))
    }

    #[test]
    fn test_create_process_has_root() {
        let mut k = kernel();
        let (pid, _ends) = k.create_process("app", &ProcessOptions::default()).unwrap();
        let process = k.process(pid).unwrap();
        assert!(process.is_running());
        assert_eq!(k.objects().object_type(process.root), Some(ObjectType::Process));
    }

    #[test]
    fn test_terminate_destroys_owned_objects() {
        let mut k = kernel();
        let (pid, _ends) = k.create_process("app", &ProcessOptions::default()).unwrap();
        let root = k.process(pid).unwrap().root;
        let obj = k
            .objects_mut()
            .allocate(KernelObject::Generic(serde_json::json!(1)), root);

        k.terminate_process(pid, 3).unwrap();

        assert!(!k.objects().contains(obj));
        assert!(!k.objects().contains(root));
        let process = k.process(pid).unwrap();
        assert_eq!(process.state, ProcessState::Terminated);
        assert_eq!(process.exit_code, Some(3));
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let mut k = kernel();
        let (pid, _ends) = k.create_process("app", &ProcessOptions::default()).unwrap();
        k.terminate_process(pid, 1).unwrap();
        k.terminate_process(pid, 2).unwrap();
        k.quit_process(pid, 3).unwrap();
        assert_eq!(k.process(pid).unwrap().exit_code, Some(1));
        assert_eq!(k.tracer().stats.processes_exited, 1);
    }

    #[test]
    fn test_quit_runs_exit_hooks_terminate_skips_them() {
        let mut k = kernel();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let calls_hook = calls.clone();
        k.register_subsystem(Subsystem::new("audit").on_exit(move |_, pid, code| {
            calls_hook.borrow_mut().push((pid, code));
        }))
        .unwrap();

        let (a, _ea) = k.create_process("a", &ProcessOptions::default()).unwrap();
        let (b, _eb) = k.create_process("b", &ProcessOptions::default()).unwrap();
        k.quit_process(a, 7).unwrap();
        k.terminate_process(b, 9).unwrap();

        assert_eq!(calls.borrow().as_slice(), &[(a, 7)]);
    }

    #[test]
    fn test_init_hook_state_is_per_process() {
        let mut k = kernel();
        k.register_subsystem(
            Subsystem::new("counter").on_init(|_, pid| Ok(Box::new(pid.0 * 10))),
        )
        .unwrap();
        let (a, _ea) = k.create_process("a", &ProcessOptions::default()).unwrap();
        let (b, _eb) = k.create_process("b", &ProcessOptions::default()).unwrap();

        assert_eq!(k.subsystem_state::<u32>(a, "counter"), Some(&(a.0 * 10)));
        assert_eq!(k.subsystem_state::<u32>(b, "counter"), Some(&(b.0 * 10)));
    }

    #[test]
    fn test_critical_exit_stops_system() {
        let mut k = kernel();
        let (pid, _ends) = k.create_process("csrss", &ProcessOptions::critical()).unwrap();
        k.quit_process(pid, 0).unwrap();
        let stop = k.stop_reason().unwrap();
        assert_eq!(stop.code, StopCode::CriticalProcessDied);
    }

    #[test]
    fn test_critical_exit_during_shutdown_is_fine() {
        let mut k = kernel();
        k.create_process("csrss", &ProcessOptions::critical()).unwrap();
        k.shutdown();
        assert!(!k.is_stopped());
    }

    #[test]
    fn test_termination_closes_transport() {
        let mut k = kernel();
        let (pid, ends) = k.create_process("app", &ProcessOptions::default()).unwrap();
        k.terminate_process(pid, 0).unwrap();
        assert!(ends.to_kernel.send(Message::post(1, 1, serde_json::Value::Null)).is_err());
        assert_eq!(
            ends.from_kernel.try_recv(),
            Err(ipc::TryRecvError::Closed)
        );
    }
}
