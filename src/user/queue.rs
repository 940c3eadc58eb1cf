//! Per-process message queues and synchronous dispatch
//!
//! Posted messages wait in the owning process's FIFO until `GetMessage` or
//! `PeekMessage` takes them. Sent messages skip the queue: the window
//! procedure runs right away, possibly recursively, and its result comes
//! back to the sender. Errors from a procedure reach the sender unchanged.

use super::geometry::Point;
use super::message::*;
use super::window::WindowProc;
use super::Hwnd;
use crate::kernel::ipc::ChannelId;
use crate::kernel::trace::TraceCategory;
use crate::kernel::{Kernel, KernelError, KernelResult, Pid, ProcessState};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A queued window message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Msg {
    /// Null for thread messages
    pub hwnd: Hwnd,
    pub message: u32,
    pub wparam: WParam,
    pub lparam: LParam,
    /// Kernel tick at post time
    pub time: u64,
    /// Cursor position at post time
    pub pt: Point,
}

/// Which messages a retrieval accepts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgFilter {
    /// Null accepts every window and thread messages
    pub hwnd: Hwnd,
    /// `min == max == 0` accepts every message number
    pub min: u32,
    pub max: u32,
}

impl MsgFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn window(hwnd: Hwnd) -> Self {
        Self {
            hwnd,
            ..Self::default()
        }
    }

    pub fn range(min: u32, max: u32) -> Self {
        Self {
            hwnd: Hwnd::NULL,
            min,
            max,
        }
    }

    fn accepts_number(&self, message: u32) -> bool {
        (self.min == 0 && self.max == 0) || (self.min <= message && message <= self.max)
    }

    pub fn matches(&self, msg: &Msg) -> bool {
        (self.hwnd.is_null() || self.hwnd == msg.hwnd) && self.accepts_number(msg.message)
    }
}

/// What GetMessage / PeekMessage hand back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retrieved {
    Message(Msg),
    /// PostQuitMessage was called with this exit code
    Quit(i32),
}

#[derive(Debug, Clone, Copy)]
struct Waiter {
    reply_channel: ChannelId,
    filter: MsgFilter,
}

/// A process's posted-message FIFO
#[derive(Debug)]
pub struct MessageQueue {
    messages: VecDeque<Msg>,
    limit: usize,
    quit: Option<i32>,
    /// Suspended GetMessage calls, oldest first
    waiters: Vec<Waiter>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            limit: usize::MAX,
            quit: None,
            waiters: Vec::new(),
        }
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn post(&mut self, msg: Msg) -> KernelResult<()> {
        if self.messages.len() >= self.limit {
            return Err(KernelError::QueueFull);
        }
        self.messages.push_back(msg);
        Ok(())
    }

    pub fn post_quit(&mut self, code: i32) {
        self.quit = Some(code);
    }

    pub fn quit_pending(&self) -> Option<i32> {
        self.quit
    }

    /// First matching message; the quit marker only once nothing else matches
    pub fn take(&mut self, filter: &MsgFilter, remove: bool) -> Option<Retrieved> {
        if let Some(index) = self.messages.iter().position(|m| filter.matches(m)) {
            let msg = if remove {
                self.messages.remove(index)?
            } else {
                self.messages[index].clone()
            };
            return Some(Retrieved::Message(msg));
        }
        let code = self.quit?;
        if !filter.accepts_number(WM_QUIT) {
            return None;
        }
        if remove {
            self.quit = None;
        }
        Some(Retrieved::Quit(code))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Msg> {
        self.messages.iter()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.waiters.clear();
        self.quit = None;
    }

    pub(crate) fn add_waiter(&mut self, reply_channel: ChannelId, filter: MsgFilter) {
        self.waiters.push(Waiter {
            reply_channel,
            filter,
        });
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Hand a waiting GetMessage its message, if one arrived
    fn satisfy_one(&mut self) -> Option<(ChannelId, Retrieved)> {
        for i in 0..self.waiters.len() {
            let waiter = self.waiters[i];
            if let Some(item) = self.take(&waiter.filter, true) {
                self.waiters.remove(i);
                return Some((waiter.reply_channel, item));
            }
        }
        None
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ========== POSTING ==========

impl Kernel {
    fn queue_for(&mut self, pid: Pid) -> KernelResult<&mut MessageQueue> {
        match self.processes.get_mut(&pid) {
            Some(p) if p.state == ProcessState::Running => Ok(&mut p.queue),
            _ => Err(KernelError::ProcessTerminated(pid.0)),
        }
    }

    fn enqueue(&mut self, pid: Pid, msg: Msg) -> KernelResult<()> {
        self.advance_tick();
        let message = msg.message;
        let hwnd = msg.hwnd;
        let result = self.queue_for(pid).and_then(|q| q.post(msg));
        match &result {
            Ok(()) => {
                self.trace(TraceCategory::Message, "post", Some(pid), || {
                    format!("{} {:#x}", hwnd, message)
                });
                self.wake_message_waiters(pid);
            }
            Err(KernelError::ProcessTerminated(_)) => {
                log::warn!("dropping message {:#x} for process {}: not running", message, pid);
                self.tracer.stats.messages_dropped += 1;
            }
            Err(e) => log::debug!("post to process {} failed: {}", pid, e),
        }
        result
    }

    fn make_msg(&self, hwnd: Hwnd, message: u32, wparam: WParam, lparam: LParam) -> Msg {
        Msg {
            hwnd,
            message,
            wparam,
            lparam,
            time: self.tick(),
            pt: self.user.cursor,
        }
    }

    /// Queue a message for the window's process
    pub fn post_message(&mut self, hwnd: Hwnd, message: u32, wparam: WParam, lparam: LParam) -> KernelResult<()> {
        let pid = self
            .window(hwnd)
            .map(|w| w.pid)
            .ok_or(KernelError::InvalidWindowHandle)?;
        let msg = self.make_msg(hwnd, message, wparam, lparam);
        self.enqueue(pid, msg)
    }

    /// Queue a message with no window
    pub fn post_thread_message(&mut self, pid: Pid, message: u32, wparam: WParam, lparam: LParam) -> KernelResult<()> {
        let msg = self.make_msg(Hwnd::NULL, message, wparam, lparam);
        self.enqueue(pid, msg)
    }

    pub fn post_quit_message(&mut self, pid: Pid, code: i32) -> KernelResult<()> {
        self.queue_for(pid)?.post_quit(code);
        self.wake_message_waiters(pid);
        Ok(())
    }

    /// Non-suspending retrieval
    pub fn peek_message(&mut self, pid: Pid, filter: &MsgFilter, remove: bool) -> KernelResult<Option<Retrieved>> {
        Ok(self.queue_for(pid)?.take(filter, remove))
    }

    /// Complete suspended GetMessage calls that can now be served
    pub(crate) fn wake_message_waiters(&mut self, pid: Pid) {
        loop {
            let next = match self.processes.get_mut(&pid) {
                Some(p) => p.queue.satisfy_one(),
                None => None,
            };
            let Some((rc, item)) = next else {
                return;
            };
            let value = serde_json::to_value(&item).map_err(KernelError::from);
            if !self.complete_deferred(pid, rc, value) {
                log::debug!("process {}: GetMessage on {} no longer pending", pid, rc);
            }
        }
    }

    /// Turn a printable key-down into a queued CHAR
    pub fn translate_message(&mut self, msg: &Msg) -> KernelResult<bool> {
        if msg.message != WM_KEYDOWN {
            return Ok(false);
        }
        let Some(c) = vk_to_char(msg.wparam as u32, self.user.shift_down) else {
            return Ok(false);
        };
        self.post_message(msg.hwnd, WM_CHAR, c as WParam, msg.lparam)?;
        Ok(true)
    }

    /// Run a retrieved message through its window's procedure
    pub fn dispatch_message(&mut self, caller: Pid, msg: &Msg) -> KernelResult<LResult> {
        if msg.hwnd.is_null() {
            return Ok(0);
        }
        let owner = self
            .window(msg.hwnd)
            .map(|w| w.pid)
            .ok_or(KernelError::InvalidWindowHandle)?;
        if owner != caller {
            return Err(KernelError::AccessDenied);
        }
        self.send_message(msg.hwnd, msg.message, msg.wparam, msg.lparam)
    }
}

// ========== SENDING ==========

impl Kernel {
    /// Call the window procedure now and return its result
    pub fn send_message(&mut self, hwnd: Hwnd, message: u32, wparam: WParam, lparam: LParam) -> KernelResult<LResult> {
        self.send_message_inner(hwnd, message, wparam, lparam, None)
    }

    /// Like `send_message`, but a remote procedure gets `timeout_ms` to answer
    pub fn send_message_timeout(
        &mut self,
        hwnd: Hwnd,
        message: u32,
        wparam: WParam,
        lparam: LParam,
        timeout_ms: u64,
    ) -> KernelResult<LResult> {
        self.send_message_inner(hwnd, message, wparam, lparam, Some(timeout_ms))
    }

    fn send_message_inner(
        &mut self,
        hwnd: Hwnd,
        message: u32,
        wparam: WParam,
        lparam: LParam,
        timeout_ms: Option<u64>,
    ) -> KernelResult<LResult> {
        let (pid, proc) = self
            .window(hwnd)
            .map(|w| (w.pid, w.proc.clone()))
            .ok_or(KernelError::InvalidWindowHandle)?;
        // The System process has no procedures of its own to suppress
        if pid != Pid::SYSTEM && !self.accepts_dispatch(pid) {
            log::trace!("suppressed {:#x} to {}: process {} not dispatching", message, hwnd, pid);
            return Ok(0);
        }
        self.trace(TraceCategory::Message, "send", Some(pid), || {
            format!("{} {:#x}", hwnd, message)
        });
        self.invoke_proc(&proc, hwnd, message, wparam, lparam, timeout_ms)
    }

    /// Invoke a procedure under the dispatch depth limit
    pub(crate) fn invoke_proc(
        &mut self,
        proc: &WindowProc,
        hwnd: Hwnd,
        message: u32,
        wparam: WParam,
        lparam: LParam,
        timeout_ms: Option<u64>,
    ) -> KernelResult<LResult> {
        if self.user.dispatch_depth >= self.config.max_dispatch_depth {
            log::warn!("dispatch depth exceeded sending {:#x} to {}", message, hwnd);
            return Err(KernelError::DispatchDepthExceeded);
        }
        self.user.dispatch_depth += 1;
        self.tracer.stats.messages_dispatched += 1;
        let result = match proc {
            WindowProc::Default => self.def_window_proc(hwnd, message, wparam, lparam),
            WindowProc::Local(f) => f(self, hwnd, message, wparam, lparam),
            WindowProc::Remote(token) => {
                self.invoke_remote(*token, hwnd, message, wparam, lparam, timeout_ms)
            }
        };
        self.user.dispatch_depth -= 1;
        result
    }

    /// Call the procedure behind a GWL_WNDPROC token
    pub fn call_window_proc(
        &mut self,
        token: isize,
        hwnd: Hwnd,
        message: u32,
        wparam: WParam,
        lparam: LParam,
    ) -> KernelResult<LResult> {
        let proc = self
            .user
            .procs
            .lookup(token)
            .ok_or_else(|| KernelError::InvalidParameter(format!("unknown procedure token {:#x}", token)))?;
        if !self.is_window(hwnd) {
            return Err(KernelError::InvalidWindowHandle);
        }
        self.invoke_proc(&proc, hwnd, message, wparam, lparam, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Handle;

    fn msg(hwnd: u64, message: u32) -> Msg {
        Msg {
            hwnd: Handle(hwnd),
            message,
            wparam: 0,
            lparam: 0,
            time: 0,
            pt: Point::origin(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut q = MessageQueue::new();
        q.post(msg(1, WM_USER)).unwrap();
        q.post(msg(1, WM_USER + 1)).unwrap();
        assert_eq!(q.take(&MsgFilter::all(), true), Some(Retrieved::Message(msg(1, WM_USER))));
        assert_eq!(q.take(&MsgFilter::all(), true), Some(Retrieved::Message(msg(1, WM_USER + 1))));
        assert_eq!(q.take(&MsgFilter::all(), true), None);
    }

    #[test]
    fn test_filter_by_window_and_range() {
        let mut q = MessageQueue::new();
        q.post(msg(1, WM_USER)).unwrap();
        q.post(msg(2, WM_KEYDOWN)).unwrap();
        assert_eq!(
            q.take(&MsgFilter::window(Handle(2)), false),
            Some(Retrieved::Message(msg(2, WM_KEYDOWN)))
        );
        assert_eq!(
            q.take(&MsgFilter::range(WM_KEYDOWN, WM_CHAR), true),
            Some(Retrieved::Message(msg(2, WM_KEYDOWN)))
        );
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_quit_after_other_messages() {
        let mut q = MessageQueue::new();
        q.post_quit(4);
        q.post(msg(1, WM_USER)).unwrap();
        assert!(matches!(q.take(&MsgFilter::all(), true), Some(Retrieved::Message(_))));
        assert_eq!(q.take(&MsgFilter::all(), true), Some(Retrieved::Quit(4)));
        assert_eq!(q.take(&MsgFilter::all(), true), None);
    }

    #[test]
    fn test_limit() {
        let mut q = MessageQueue::new();
        q.set_limit(1);
        q.post(msg(1, WM_USER)).unwrap();
        assert_eq!(q.post(msg(1, WM_USER)), Err(KernelError::QueueFull));
    }

    #[test]
    fn test_waiter_served_in_order() {
        let mut q = MessageQueue::new();
        q.add_waiter(-1, MsgFilter::range(WM_KEYDOWN, WM_KEYDOWN));
        q.add_waiter(-2, MsgFilter::all());
        q.post(msg(1, WM_USER)).unwrap();
        let (rc, item) = q.satisfy_one().unwrap();
        assert_eq!(rc, -2);
        assert_eq!(item, Retrieved::Message(msg(1, WM_USER)));
        assert_eq!(q.waiter_count(), 1);
        assert!(q.satisfy_one().is_none());
    }
}
