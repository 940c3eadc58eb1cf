//! Remote window procedures
//!
//! A process registers closures in its `CallbackTable`; the window server
//! names them with a `CallbackToken`. Invoking one is a request/reply round
//! trip through the process's `CallbackHost`: the kernel sends a request
//! carrying a fresh reply channel and expects exactly one reply tagged with
//! that channel back.

use super::message::{LParam, LResult, WParam};
use super::window::{CallbackToken, WindowProc};
use super::Hwnd;
use crate::kernel::ipc::Message;
use crate::kernel::trace::TraceCategory;
use crate::kernel::{Kernel, KernelError, KernelResult, Pid};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

/// Channel window-procedure requests are addressed to
pub const CALLBACK_CHANNEL: i64 = 0;
/// Opcode of a window-procedure request
pub const WINDOW_PROC_OPCODE: u32 = 1;

/// One window-procedure call as the process sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackArgs {
    pub id: u64,
    pub hwnd: Hwnd,
    pub msg: u32,
    pub wparam: WParam,
    pub lparam: LParam,
}

/// What a remote procedure answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcReply {
    Handled(LResult),
    /// Run DefWindowProc
    Default,
    /// Pass the message on to the procedure behind a GWL_WNDPROC token
    Forward(isize),
}

/// Why a callback produced no reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackError {
    TimedOut,
    Disconnected,
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackError::TimedOut => write!(f, "callback timed out"),
            CallbackError::Disconnected => write!(f, "callback host disconnected"),
        }
    }
}

impl std::error::Error for CallbackError {}

/// The process end of window-procedure calls
pub trait CallbackHost {
    /// Run the request to completion; `timeout_ms` bounds hung hosts
    fn invoke(&self, request: Message, timeout_ms: Option<u64>) -> Result<Message, CallbackError>;
}

pub type CallbackFn = Rc<dyn Fn(&CallbackArgs) -> ProcReply>;

/// A process's registered window procedures
pub struct CallbackTable {
    pid: Pid,
    procs: RefCell<HashMap<u64, CallbackFn>>,
    next_id: Cell<u64>,
    responsive: Cell<bool>,
    /// Extra time every answer takes, on top of running the closure
    latency_ms: Cell<u64>,
}

impl CallbackTable {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            procs: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
            responsive: Cell::new(true),
            latency_ms: Cell::new(0),
        }
    }

    pub fn register<F>(&self, f: F) -> CallbackToken
    where
        F: Fn(&CallbackArgs) -> ProcReply + 'static,
    {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.procs.borrow_mut().insert(id, Rc::new(f));
        CallbackToken { pid: self.pid, id }
    }

    pub fn unregister(&self, id: u64) -> bool {
        self.procs.borrow_mut().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.procs.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.borrow().is_empty()
    }

    /// A hung process stops answering callbacks
    pub fn set_responsive(&self, responsive: bool) {
        self.responsive.set(responsive);
    }

    /// A slow process answers, but only after `ms`
    pub fn set_latency(&self, ms: u64) {
        self.latency_ms.set(ms);
    }
}

impl CallbackHost for CallbackTable {
    fn invoke(&self, request: Message, timeout_ms: Option<u64>) -> Result<Message, CallbackError> {
        // Synchronous closures cannot block, so a hung host always times out
        if !self.responsive.get() {
            return Err(CallbackError::TimedOut);
        }
        let started = Instant::now();
        let rc = request.reply_channel.ok_or(CallbackError::Disconnected)?;
        let args: CallbackArgs = match serde_json::from_value(request.payload) {
            Ok(args) => args,
            Err(e) => {
                let err = KernelError::BadPayload(e.to_string());
                let payload = serde_json::to_value(&err).unwrap_or_default();
                return Ok(Message::error_reply(request.opcode, rc, payload));
            }
        };
        let proc = self.procs.borrow().get(&args.id).cloned();
        let reply = match proc {
            Some(proc) => proc(&args),
            None => {
                log::warn!("process {}: no callback {}", self.pid, args.id);
                ProcReply::Default
            }
        };
        if let Some(budget) = timeout_ms {
            let took = started.elapsed().as_millis() as u64 + self.latency_ms.get();
            if took > budget {
                log::debug!("process {}: callback {} answered after {}ms, budget {}ms", self.pid, args.id, took, budget);
                return Err(CallbackError::TimedOut);
            }
        }
        let payload = serde_json::to_value(reply).unwrap_or_default();
        Ok(Message::reply(request.opcode, rc, payload))
    }
}

// ========== KERNEL SIDE ==========

/// A GWL_WNDPROC token and the process it was handed to
struct ProcEntry {
    token: isize,
    pid: Pid,
    proc: WindowProc,
}

/// Tokens handed out for GWL_WNDPROC
pub(crate) struct ProcRegistry {
    tokens: Vec<ProcEntry>,
    next: isize,
}

/// Token of DefWindowProc
pub const DEFAULT_PROC_TOKEN: isize = 1;

impl ProcRegistry {
    pub(crate) fn new() -> Self {
        Self {
            tokens: Vec::new(),
            next: 0x100,
        }
    }

    /// Token naming `proc` for windows of `pid`
    pub(crate) fn token_for(&mut self, pid: Pid, proc: &WindowProc) -> isize {
        if let WindowProc::Default = proc {
            return DEFAULT_PROC_TOKEN;
        }
        if let Some(entry) = self.tokens.iter().find(|e| e.pid == pid && e.proc.same_as(proc)) {
            return entry.token;
        }
        let token = self.next;
        self.next += 1;
        self.tokens.push(ProcEntry {
            token,
            pid,
            proc: proc.clone(),
        });
        token
    }

    pub(crate) fn lookup(&self, token: isize) -> Option<WindowProc> {
        if token == DEFAULT_PROC_TOKEN {
            return Some(WindowProc::Default);
        }
        self.tokens
            .iter()
            .find(|e| e.token == token)
            .map(|e| e.proc.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Forget every token handed to a process and every remote procedure
    /// living in it
    pub(crate) fn remove_process(&mut self, pid: Pid) {
        self.tokens.retain(|e| {
            e.pid != pid && !matches!(&e.proc, WindowProc::Remote(t) if t.pid == pid)
        });
    }
}

impl Kernel {
    /// Run a remote procedure in its process
    pub(crate) fn invoke_remote(
        &mut self,
        token: CallbackToken,
        hwnd: Hwnd,
        msg: u32,
        wparam: WParam,
        lparam: LParam,
        timeout_ms: Option<u64>,
    ) -> KernelResult<LResult> {
        let host = self
            .process(token.pid)
            .and_then(|p| p.context.callbacks.clone())
            .ok_or(KernelError::ProcessTerminated(token.pid.0))?;

        let rc = self.reply_channels.allocate();
        let args = CallbackArgs {
            id: token.id,
            hwnd,
            msg,
            wparam,
            lparam,
        };
        let request = Message::request(
            CALLBACK_CHANNEL,
            WINDOW_PROC_OPCODE,
            rc,
            serde_json::to_value(&args)?,
        );

        let reply = match host.invoke(request, timeout_ms) {
            Ok(reply) => reply,
            Err(CallbackError::TimedOut) => {
                log::debug!("process {}: window procedure timed out on {:#x}", token.pid, msg);
                return Err(KernelError::Timeout);
            }
            Err(CallbackError::Disconnected) => {
                return Err(KernelError::ProcessTerminated(token.pid.0));
            }
        };

        if reply.channel != rc {
            log::warn!(
                "process {}: protocol fault, callback reply on {} expected {}",
                token.pid,
                reply.channel,
                rc
            );
            self.tracer.stats.protocol_faults += 1;
            self.trace(TraceCategory::Ipc, "protocol-fault", Some(token.pid), || {
                format!("reply {} for {}", reply.channel, rc)
            });
            return Err(KernelError::Protocol(format!(
                "reply on channel {} for request {}",
                reply.channel, rc
            )));
        }
        if reply.is_error() {
            let err = serde_json::from_value::<KernelError>(reply.payload)
                .unwrap_or_else(|e| KernelError::Procedure(e.to_string()));
            return Err(err);
        }

        match serde_json::from_value::<ProcReply>(reply.payload)? {
            ProcReply::Handled(result) => Ok(result),
            ProcReply::Default => self.def_window_proc(hwnd, msg, wparam, lparam),
            ProcReply::Forward(token) => self.call_window_proc(token, hwnd, msg, wparam, lparam),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(id: u64, msg: u32, rc: i64) -> Message {
        let args = CallbackArgs {
            id,
            hwnd: Hwnd::NULL,
            msg,
            wparam: 0,
            lparam: 0,
        };
        Message::request(CALLBACK_CHANNEL, WINDOW_PROC_OPCODE, rc, json!(args))
    }

    #[test]
    fn test_table_runs_registered_closure() {
        let table = CallbackTable::new(Pid(3));
        let token = table.register(|args| ProcReply::Handled(args.msg as isize * 2));
        assert_eq!(token.pid, Pid(3));

        let reply = table.invoke(request(token.id, 21, -7), None).unwrap();
        assert_eq!(reply.channel, -7);
        assert_eq!(
            serde_json::from_value::<ProcReply>(reply.payload).unwrap(),
            ProcReply::Handled(42)
        );
    }

    #[test]
    fn test_unresponsive_table_times_out() {
        let table = CallbackTable::new(Pid(3));
        let token = table.register(|_| ProcReply::Default);
        table.set_responsive(false);
        assert_eq!(
            table.invoke(request(token.id, 1, -1), Some(10)),
            Err(CallbackError::TimedOut)
        );
    }

    #[test]
    fn test_slow_table_misses_budget() {
        let table = CallbackTable::new(Pid(3));
        let token = table.register(|_| ProcReply::Handled(5));
        table.set_latency(500);
        assert_eq!(
            table.invoke(request(token.id, 1, -1), Some(200)),
            Err(CallbackError::TimedOut)
        );
        // No budget, no timeout
        assert!(table.invoke(request(token.id, 1, -2), None).is_ok());
        assert!(table.invoke(request(token.id, 1, -3), Some(1000)).is_ok());
    }

    #[test]
    fn test_proc_tokens_are_stable() {
        let mut registry = ProcRegistry::new();
        let remote = WindowProc::Remote(CallbackToken { pid: Pid(1), id: 9 });
        let a = registry.token_for(Pid(1), &remote);
        let b = registry.token_for(Pid(1), &remote.clone());
        assert_eq!(a, b);
        assert_eq!(registry.token_for(Pid(1), &WindowProc::Default), DEFAULT_PROC_TOKEN);
        registry.remove_process(Pid(1));
        assert!(registry.lookup(a).is_none());
    }

    #[test]
    fn test_local_tokens_go_with_their_process() {
        let mut registry = ProcRegistry::new();
        let local = WindowProc::local(|k, hwnd, msg, wp, lp| k.def_window_proc(hwnd, msg, wp, lp));
        let mine = registry.token_for(Pid(2), &local);
        let theirs = registry.token_for(Pid(3), &local);
        assert_ne!(mine, theirs);
        assert_eq!(registry.len(), 2);

        registry.remove_process(Pid(2));
        assert!(registry.lookup(mine).is_none());
        assert!(registry.lookup(theirs).is_some());
        assert_eq!(registry.len(), 1);
    }
}
