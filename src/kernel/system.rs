//! System driver
//!
//! `System` owns the kernel and the executor. Each step polls every woken
//! process task once, then pumps the kernel until no request is left, then
//! drops the tasks of processes that ended. Processes are async mains that
//! receive a `ProcessContext`: their port, API stubs and callback table.

use super::error::{KernelResult, SystemStop};
use super::executor::Executor;
use super::ntapi::NtApi;
use super::process::{Pid, ProcessOptions};
use super::subsystem::SharedView;
use super::syscall::Port;
use super::Kernel;
use crate::config::KernelConfig;
use crate::user::api::{self, User32};
use crate::user::CallbackTable;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

/// What a process main gets to work with
#[derive(Clone)]
pub struct ProcessContext {
    pub pid: Pid,
    pub port: Port,
    pub user32: User32,
    pub ntdll: NtApi,
    pub callbacks: Rc<CallbackTable>,
    shared: HashMap<String, SharedView>,
}

impl ProcessContext {
    /// Read-only view of a subsystem's shared region
    pub fn shared_view(&self, subsystem: &str) -> Option<&SharedView> {
        self.shared.get(subsystem)
    }
}

/// A kernel plus the executor that runs its processes
pub struct System {
    kernel: Kernel,
    executor: Executor,
}

impl System {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            kernel: Kernel::new(config),
            executor: Executor::new(),
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Create a process and start its main
    ///
    /// When main returns, its value becomes the exit code of a graceful
    /// ExitProcess.
    pub fn spawn<F, Fut>(&mut self, name: &str, options: ProcessOptions, main: F) -> KernelResult<Pid>
    where
        F: FnOnce(ProcessContext) -> Fut,
        Fut: Future<Output = i32> + 'static,
    {
        let (pid, endpoints) = self.kernel.create_process(name, &options)?;
        let port = Port::new(pid, endpoints, self.kernel.subsystems.channels());
        let callbacks = Rc::new(CallbackTable::new(pid));
        self.kernel.attach_callbacks(pid, callbacks.clone());

        let shared = self.kernel.subsystems.shared_views();
        let metrics = shared.get(api::NAME).cloned();
        let ntdll = NtApi::new(port.clone());
        let context = ProcessContext {
            pid,
            user32: User32::new(port.clone(), callbacks.clone(), metrics),
            ntdll: ntdll.clone(),
            port,
            callbacks,
            shared,
        };

        let future = main(context);
        let task = self.executor.spawn_with_priority(
            async move {
                let code = future.await;
                if let Err(e) = ntdll.exit_process(code) {
                    log::debug!("process {}: exit after main failed: {}", pid, e);
                }
            },
            options.priority,
        );
        self.kernel.attach_task(pid, task);
        log::debug!("process {} ({}) runs as {}", pid, name, task);
        Ok(pid)
    }

    /// One round: poll woken tasks, serve requests, reap cancelled tasks
    ///
    /// Returns how much work was done; zero means idle.
    pub fn step(&mut self) -> usize {
        let polled = self.executor.tick();
        let handled = self.kernel.pump();
        for task in self.kernel.take_cancelled_tasks() {
            self.executor.cancel_task(task);
        }
        polled + handled
    }

    /// Step until nothing is left to do or the system stops
    pub fn run_until_idle(&mut self) -> Result<usize, SystemStop> {
        let mut total = 0;
        loop {
            if let Some(stop) = self.kernel.stop_reason() {
                return Err(stop.clone());
            }
            let work = self.step();
            total += work;
            if work == 0 && !self.executor.has_ready() {
                break;
            }
        }
        match self.kernel.stop_reason() {
            Some(stop) => Err(stop.clone()),
            None => Ok(total),
        }
    }

    /// Terminate every process and drop every task
    pub fn shutdown(&mut self) {
        self.kernel.shutdown();
        for task in self.kernel.take_cancelled_tasks() {
            self.executor.cancel_task(task);
        }
        log::info!("system shut down, {} tasks left", self.executor.task_count());
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::error::StopCode;
    use crate::kernel::process::ProcessState;
    use crate::user::api::SM_CXSCREEN;
    use std::cell::Cell;

    #[test]
    fn test_main_return_exits_process() {
        let mut system = System::new(KernelConfig::with_screen(800, 600));
        let pid = system
            .spawn("app", ProcessOptions::default(), |_ctx| async { 7 })
            .unwrap();
        system.run_until_idle().unwrap();
        let process = system.kernel().process(pid).unwrap();
        assert_eq!(process.state, ProcessState::Terminated);
        assert_eq!(process.exit_code, Some(7));
        assert_eq!(system.executor().task_count(), 0);
    }

    #[test]
    fn test_metrics_without_round_trip() {
        let mut system = System::new(KernelConfig::with_screen(800, 600));
        let seen = Rc::new(Cell::new(0));
        let out = seen.clone();
        system
            .spawn("app", ProcessOptions::default(), move |ctx| async move {
                out.set(ctx.user32.get_system_metrics(SM_CXSCREEN));
                0
            })
            .unwrap();
        // One poll is enough; the kernel never sees a request for it
        system.executor.tick();
        assert_eq!(seen.get(), 800);
    }

    #[test]
    fn test_critical_exit_stops_run() {
        let mut system = System::new(KernelConfig::with_screen(800, 600));
        system
            .spawn("csrss", ProcessOptions::critical(), |_ctx| async { 1 })
            .unwrap();
        let stop = system.run_until_idle().unwrap_err();
        assert_eq!(stop.code, StopCode::CriticalProcessDied);
    }

    #[test]
    fn test_shutdown_cancels_tasks() {
        let mut system = System::new(KernelConfig::with_screen(800, 600));
        system
            .spawn("app", ProcessOptions::default(), |ctx| async move {
                let _ = ctx.user32.get_message(crate::user::MsgFilter::all()).await;
                0
            })
            .unwrap();
        system.run_until_idle().unwrap();
        assert_eq!(system.executor().task_count(), 1);
        system.shutdown();
        assert_eq!(system.executor().task_count(), 0);
        assert!(!system.kernel().is_stopped());
    }
}
