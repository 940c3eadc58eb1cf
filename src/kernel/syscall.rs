//! System call transport
//!
//! This is the boundary between processes and the kernel. A process never
//! touches kernel state: it sends a request message to a subsystem channel
//! and awaits the reply tagged with the request's reply channel.
//!
//! Kernel side: `Kernel::pump` drains process inboxes round-robin, resolves
//! (channel, opcode) to a handler and posts the reply. Process side: `Port`
//! allocates reply channels, keeps the pending-request map and matches
//! replies back to their awaiters.

use super::error::{KernelError, KernelResult};
use super::ipc::{self, ChannelId, Message, ReplyChannels, TryRecvError};
use super::process::{DeferredReply, Pid, ProcessEndpoints, ProcessState};
use super::subsystem::{Request, Response};
use super::trace::TraceCategory;
use super::Kernel;
use futures::channel::oneshot;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

// ========== KERNEL SIDE ==========

impl Kernel {
    /// Handle queued requests until every inbox is empty
    ///
    /// Processes are served round-robin, one request each per round.
    /// Returns the number of requests handled. Stops early once the system
    /// has stopped.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let mut progressed = false;
            let pids: Vec<Pid> = self.processes.keys().copied().collect();
            for pid in pids {
                if self.is_stopped() {
                    return handled;
                }
                let next = self
                    .processes
                    .get(&pid)
                    .and_then(|p| p.context.inbox.as_ref())
                    .and_then(|inbox| inbox.try_recv().ok());
                if let Some(message) = next {
                    self.handle_request(pid, message);
                    handled += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return handled;
            }
        }
    }

    /// Resolve and run one request from `pid`
    pub(crate) fn handle_request(&mut self, pid: Pid, message: Message) {
        self.advance_tick();
        self.tracer.stats.requests_handled += 1;

        let (subsystem, handler) = match self.subsystems.resolve(message.channel, message.opcode) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("process {}: {}", pid, e);
                self.tracer.stats.request_errors += 1;
                if let Some(rc) = message.reply_channel {
                    self.reply(pid, rc, message.opcode, Err(e));
                }
                return;
            }
        };

        log::trace!("process {}: {} opcode {}", pid, subsystem, message.opcode);
        self.trace(TraceCategory::Ipc, "request", Some(pid), || {
            format!("{}:{}", subsystem, message.opcode)
        });

        let request = Request {
            pid,
            opcode: message.opcode,
            reply_channel: message.reply_channel,
            payload: message.payload,
        };
        let result = handler(self, &request);

        match (result, request.reply_channel) {
            (Ok(Response::Value(value)), Some(rc)) => {
                self.reply(pid, rc, request.opcode, Ok(value));
            }
            (Ok(Response::Deferred), Some(rc)) => {
                if let Some(process) = self.processes.get_mut(&pid) {
                    process.deferred.insert(
                        rc,
                        DeferredReply {
                            opcode: request.opcode,
                        },
                    );
                }
            }
            (Ok(_), None) => {}
            (Err(e), rc) => {
                log::debug!("process {}: {} opcode {} failed: {}", pid, subsystem, request.opcode, e);
                self.tracer.stats.request_errors += 1;
                self.set_last_error(pid, e.last_error_code());
                if let Some(rc) = rc {
                    self.reply(pid, rc, request.opcode, Err(e));
                }
            }
        }
    }

    /// Post the reply for reply channel `rc`
    pub(crate) fn reply(
        &mut self,
        pid: Pid,
        rc: ChannelId,
        opcode: u32,
        result: KernelResult<Value>,
    ) -> bool {
        let message = match result {
            Ok(value) => Message::reply(opcode, rc, value),
            Err(e) => {
                let payload = serde_json::to_value(&e).unwrap_or(Value::Null);
                Message::error_reply(opcode, rc, payload)
            }
        };
        self.deliver(pid, message)
    }

    /// Send a message to a process; dropped unless the process is running
    pub(crate) fn deliver(&mut self, pid: Pid, message: Message) -> bool {
        let outbox = match self.processes.get(&pid) {
            Some(p) if p.state == ProcessState::Running => p.context.outbox.as_ref(),
            _ => None,
        };
        let sent = match outbox {
            Some(outbox) => outbox.send(message).is_ok(),
            None => false,
        };
        if !sent {
            log::warn!("dropping message for process {}: not running", pid);
            self.tracer.stats.messages_dropped += 1;
        }
        sent
    }

    /// Complete a deferred reply; false if it was already completed or dropped
    pub fn complete_deferred(&mut self, pid: Pid, rc: ChannelId, result: KernelResult<Value>) -> bool {
        let pending = self
            .processes
            .get_mut(&pid)
            .and_then(|p| p.deferred.remove(&rc));
        match pending {
            Some(DeferredReply { opcode }) => self.reply(pid, rc, opcode, result),
            None => false,
        }
    }

    /// Reply channels of deferred requests, oldest first
    pub(crate) fn deferred_channels(&self, pid: Pid) -> Vec<ChannelId> {
        self.processes
            .get(&pid)
            .map(|p| p.deferred.keys().rev().copied().collect())
            .unwrap_or_default()
    }
}

// ========== PROCESS SIDE ==========

type ReplySender = oneshot::Sender<KernelResult<Value>>;

struct PortInner {
    pid: Pid,
    to_kernel: ipc::Sender<Message>,
    from_kernel: ipc::Receiver<Message>,
    reply_channels: RefCell<ReplyChannels>,
    pending: RefCell<HashMap<ChannelId, ReplySender>>,
    /// Requests whose awaiter went away before the reply came
    abandoned: RefCell<HashSet<ChannelId>>,
    subsystems: HashMap<String, ChannelId>,
}

impl PortInner {
    /// Route every queued reply to its awaiter
    fn drain(&self) {
        loop {
            match self.from_kernel.try_recv() {
                Ok(message) => self.route(message),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Closed) => {
                    // Dropping the senders resolves every awaiter to Cancelled
                    self.pending.borrow_mut().clear();
                    return;
                }
            }
        }
    }

    fn route(&self, message: Message) {
        let rc = message.channel;
        let Some(tx) = self.pending.borrow_mut().remove(&rc) else {
            if self.abandoned.borrow_mut().remove(&rc) {
                log::debug!("process {}: reply on abandoned channel {}", self.pid, rc);
            } else {
                log::warn!("process {}: protocol fault, unmatched reply on channel {}", self.pid, rc);
            }
            return;
        };
        let result = if message.is_error() {
            Err(serde_json::from_value::<KernelError>(message.payload)
                .unwrap_or_else(|e| KernelError::Protocol(format!("undecodable error reply: {}", e))))
        } else {
            Ok(message.payload)
        };
        let _ = tx.send(result);
    }
}

/// A process's connection to the kernel
#[derive(Clone)]
pub struct Port {
    inner: Rc<PortInner>,
}

impl Port {
    pub fn new(pid: Pid, endpoints: ProcessEndpoints, subsystems: HashMap<String, ChannelId>) -> Self {
        Self {
            inner: Rc::new(PortInner {
                pid,
                to_kernel: endpoints.to_kernel,
                from_kernel: endpoints.from_kernel,
                reply_channels: RefCell::new(ReplyChannels::new()),
                pending: RefCell::new(HashMap::new()),
                abandoned: RefCell::new(HashSet::new()),
                subsystems,
            }),
        }
    }

    pub fn pid(&self) -> Pid {
        self.inner.pid
    }

    pub fn channel_of(&self, subsystem: &str) -> Option<ChannelId> {
        self.inner.subsystems.get(subsystem).copied()
    }

    /// Requests still waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// Send a request; the future resolves with its reply
    pub fn call(&self, channel: ChannelId, opcode: u32, payload: Value) -> ReplyFuture {
        let rc = self.inner.reply_channels.borrow_mut().allocate();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.borrow_mut().insert(rc, tx);
        if self
            .inner
            .to_kernel
            .send(Message::request(channel, opcode, rc, payload))
            .is_err()
        {
            self.inner.pending.borrow_mut().remove(&rc);
        }
        ReplyFuture {
            port: self.inner.clone(),
            channel: rc,
            rx,
            done: false,
        }
    }

    /// Typed request to a subsystem by name
    pub async fn request<A, R>(&self, subsystem: &str, opcode: u32, args: &A) -> KernelResult<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let channel = self
            .channel_of(subsystem)
            .ok_or_else(|| KernelError::InvalidParameter(format!("no subsystem {}", subsystem)))?;
        let payload = serde_json::to_value(args)?;
        let value = self.call(channel, opcode, payload).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fire-and-forget message; nobody will reply
    pub fn send_oneway(&self, channel: ChannelId, opcode: u32, payload: Value) -> KernelResult<()> {
        self.inner
            .to_kernel
            .send(Message::post(channel, opcode, payload))
            .map_err(|_| KernelError::Cancelled)
    }
}

/// Resolves with the reply to one request
pub struct ReplyFuture {
    port: Rc<PortInner>,
    channel: ChannelId,
    rx: oneshot::Receiver<KernelResult<Value>>,
    done: bool,
}

impl ReplyFuture {
    pub fn reply_channel(&self) -> ChannelId {
        self.channel
    }
}

impl Future for ReplyFuture {
    type Output = KernelResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.port.drain();
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.done = true;
                Poll::Ready(result.unwrap_or(Err(KernelError::Cancelled)))
            }
            Poll::Pending => {
                self.port.from_kernel.register_waker(cx.waker());
                Poll::Pending
            }
        }
    }
}

impl Drop for ReplyFuture {
    fn drop(&mut self) {
        if !self.done && self.port.pending.borrow_mut().remove(&self.channel).is_some() {
            self.port.abandoned.borrow_mut().insert(self.channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::kernel::process::ProcessOptions;
    use crate::kernel::subsystem::Subsystem;
    use futures::task::noop_waker;
    use serde_json::json;

    fn poll<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        Pin::new(fut).poll(&mut cx)
    }

    fn setup() -> (Kernel, Pid, Port, ChannelId) {
        let mut k = Kernel::new(KernelConfig::with_screen(800, 600));
        let channel = k
            .register_subsystem(
                Subsystem::new("echo")
                    .handler(1, |_, req| Ok(Response::Value(req.payload.clone())))
                    .handler(2, |_, _| Err(KernelError::AccessDenied))
                    .handler(3, |_, _| Ok(Response::Deferred)),
            )
            .unwrap();
        let (pid, ends) = k.create_process("app", &ProcessOptions::default()).unwrap();
        let port = Port::new(pid, ends, k.subsystems.channels());
        (k, pid, port, channel)
    }

    #[test]
    fn test_request_reply_round_trip() {
        let (mut k, _pid, port, channel) = setup();
        let mut fut = port.call(channel, 1, json!({"x": 1}));
        assert!(poll(&mut fut).is_pending());
        assert_eq!(k.pump(), 1);
        assert_eq!(poll(&mut fut), Poll::Ready(Ok(json!({"x": 1}))));
        assert_eq!(port.pending_count(), 0);
    }

    #[test]
    fn test_reply_resolves_only_its_channel() {
        let (mut k, pid, port, channel) = setup();
        let mut deferred = port.call(channel, 3, Value::Null);
        let mut echo = port.call(channel, 1, json!(5));
        k.pump();
        assert_eq!(poll(&mut echo), Poll::Ready(Ok(json!(5))));
        assert!(poll(&mut deferred).is_pending());

        let rc = deferred.reply_channel();
        assert!(k.complete_deferred(pid, rc, Ok(json!("late"))));
        assert!(!k.complete_deferred(pid, rc, Ok(json!("again"))));
        assert_eq!(poll(&mut deferred), Poll::Ready(Ok(json!("late"))));
    }

    #[test]
    fn test_handler_error_sets_last_error() {
        let (mut k, pid, port, channel) = setup();
        let mut fut = port.call(channel, 2, Value::Null);
        k.pump();
        assert_eq!(poll(&mut fut), Poll::Ready(Err(KernelError::AccessDenied)));
        assert_eq!(k.last_error(pid), KernelError::AccessDenied.last_error_code());
    }

    #[test]
    fn test_unknown_opcode_is_error_reply() {
        let (mut k, _pid, port, channel) = setup();
        let mut fut = port.call(channel, 99, Value::Null);
        k.pump();
        match poll(&mut fut) {
            Poll::Ready(Err(KernelError::UnknownOpcode { opcode, .. })) => assert_eq!(opcode, 99),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!k.is_stopped());
    }

    #[test]
    fn test_termination_cancels_pending() {
        let (mut k, pid, port, channel) = setup();
        let mut fut = port.call(channel, 3, Value::Null);
        k.pump();
        assert_eq!(k.process(pid).unwrap().pending_replies(), 1);
        k.terminate_process(pid, 0).unwrap();
        assert_eq!(poll(&mut fut), Poll::Ready(Err(KernelError::Cancelled)));
    }

    #[test]
    fn test_reply_to_terminated_process_is_dropped() {
        let (mut k, pid, _port, _channel) = setup();
        k.terminate_process(pid, 0).unwrap();
        assert!(!k.reply(pid, -1, 1, Ok(Value::Null)));
        assert_eq!(k.tracer().stats.messages_dropped, 1);
    }

    #[test]
    fn test_reply_channels_are_fresh_per_request() {
        let (_k, _pid, port, channel) = setup();
        let a = port.call(channel, 1, Value::Null);
        let b = port.call(channel, 1, Value::Null);
        assert!(b.reply_channel() < a.reply_channel());
        assert!(a.reply_channel() < 0);
    }

    #[test]
    fn test_dropped_future_forgets_pending() {
        let (mut k, _pid, port, channel) = setup();
        let fut = port.call(channel, 1, Value::Null);
        drop(fut);
        assert_eq!(port.pending_count(), 0);
        k.pump();
        port.inner.drain();
        assert_eq!(port.pending_count(), 0);
    }
}
