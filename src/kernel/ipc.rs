//! Message transport between processes and the kernel
//!
//! Simple single-threaded channels: a RefCell-wrapped VecDeque plus the
//! waker of whoever is waiting on the receiving end. Every syscall request,
//! reply and window-procedure callback crosses one of these as a `Message`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Identifies a subsystem (positive) or an outstanding request (negative)
pub type ChannelId = i64;

/// Set on a reply's opcode when the payload carries an error
pub const ERROR_FLAG: u32 = 0x8000_0000;

/// The unit of kernel communication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub opcode: u32,
    pub channel: ChannelId,
    pub reply_channel: Option<ChannelId>,
    pub payload: Value,
}

impl Message {
    pub fn request(channel: ChannelId, opcode: u32, reply_channel: ChannelId, payload: Value) -> Self {
        Self {
            opcode,
            channel,
            reply_channel: Some(reply_channel),
            payload,
        }
    }

    /// A one-way message; nobody waits for an answer
    pub fn post(channel: ChannelId, opcode: u32, payload: Value) -> Self {
        Self {
            opcode,
            channel,
            reply_channel: None,
            payload,
        }
    }

    /// Successful answer to a request on `reply_channel`
    pub fn reply(opcode: u32, reply_channel: ChannelId, payload: Value) -> Self {
        Self {
            opcode: opcode & !ERROR_FLAG,
            channel: reply_channel,
            reply_channel: None,
            payload,
        }
    }

    /// Failed answer to a request on `reply_channel`
    pub fn error_reply(opcode: u32, reply_channel: ChannelId, payload: Value) -> Self {
        Self {
            opcode: opcode | ERROR_FLAG,
            channel: reply_channel,
            reply_channel: None,
            payload,
        }
    }

    pub fn is_error(&self) -> bool {
        self.opcode & ERROR_FLAG != 0
    }

    /// Opcode with the error flag stripped
    pub fn base_opcode(&self) -> u32 {
        self.opcode & !ERROR_FLAG
    }
}

/// Hands out reply-channel ids: -1, -2, -3, ...
#[derive(Debug, Clone)]
pub struct ReplyChannels {
    next: ChannelId,
}

impl ReplyChannels {
    pub fn new() -> Self {
        Self { next: -1 }
    }

    pub fn allocate(&mut self) -> ChannelId {
        let id = self.next;
        self.next -= 1;
        id
    }
}

impl Default for ReplyChannels {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a new channel pair
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let inner = Rc::new(RefCell::new(ChannelInner {
        queue: VecDeque::new(),
        closed: false,
        waker: None,
    }));

    (
        Sender {
            inner: inner.clone(),
        },
        Receiver { inner },
    )
}

struct ChannelInner<T> {
    queue: VecDeque<T>,
    closed: bool,
    waker: Option<Waker>,
}

/// Sending half of a channel
pub struct Sender<T> {
    inner: Rc<RefCell<ChannelInner<T>>>,
}

impl<T> Sender<T> {
    /// Send a value into the channel, waking the receiver
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let waker = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return Err(SendError(value));
            }
            inner.queue.push_back(value);
            inner.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    /// Close the channel; queued values stay readable
    pub fn close(&self) {
        let waker = {
            let mut inner = self.inner.borrow_mut();
            inner.closed = true;
            inner.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Receiving half of a channel
pub struct Receiver<T> {
    inner: Rc<RefCell<ChannelInner<T>>>,
}

impl<T> Receiver<T> {
    /// Try to receive a value without blocking
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut inner = self.inner.borrow_mut();
        match inner.queue.pop_front() {
            Some(value) => Ok(value),
            None if inner.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Receive a value, yielding if none available
    pub fn recv(&self) -> RecvFuture<'_, T> {
        RecvFuture { receiver: self }
    }

    /// Ask to be woken on the next send or close
    pub fn register_waker(&self, waker: &Waker) {
        let mut inner = self.inner.borrow_mut();
        match &inner.waker {
            Some(existing) if existing.will_wake(waker) => {}
            _ => inner.waker = Some(waker.clone()),
        }
    }

    /// Close from the receiving side; later sends fail
    pub fn close(&self) {
        self.inner.borrow_mut().closed = true;
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().queue.is_empty()
    }
}

/// Future for async receive
pub struct RecvFuture<'a, T> {
    receiver: &'a Receiver<T>,
}

impl<T> Future for RecvFuture<'_, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.try_recv() {
            Ok(value) => Poll::Ready(Some(value)),
            Err(TryRecvError::Closed) => Poll::Ready(None),
            Err(TryRecvError::Empty) => {
                self.receiver.register_waker(cx.waker());
                Poll::Pending
            }
        }
    }
}

/// Error when sending fails
#[derive(Debug)]
pub struct SendError<T>(pub T);

/// Error when try_recv fails
#[derive(Debug, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::{ArcWake, waker};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingWaker(AtomicUsize);

    impl ArcWake for CountingWaker {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_send_receive() {
        let (tx, rx) = channel::<i32>();

        tx.send(42).unwrap();
        tx.send(43).unwrap();

        assert_eq!(rx.try_recv(), Ok(42));
        assert_eq!(rx.try_recv(), Ok(43));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_closed_channel() {
        let (tx, rx) = channel::<i32>();

        tx.send(1).unwrap();
        tx.close();

        // Can still receive what was sent before close
        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn test_send_after_close_fails() {
        let (tx, rx) = channel::<i32>();

        rx.close();
        let result = tx.send(42);

        assert!(result.is_err());
        assert_eq!(result.unwrap_err().0, 42);
    }

    #[test]
    fn test_send_wakes_pending_receiver() {
        let (tx, rx) = channel::<i32>();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let w = waker(counter.clone());
        let mut cx = Context::from_waker(&w);

        let mut fut = Box::pin(rx.recv());
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Pending);

        tx.send(7).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(Some(7)));
    }

    #[test]
    fn test_close_wakes_receiver() {
        let (tx, rx) = channel::<i32>();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        rx.register_waker(&waker(counter.clone()));

        tx.close();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = channel::<i32>();

        for i in 0..100 {
            tx.send(i).unwrap();
        }

        for i in 0..100 {
            assert_eq!(rx.try_recv(), Ok(i));
        }
    }

    #[test]
    fn test_reply_channels_decrease() {
        let mut channels = ReplyChannels::new();
        assert_eq!(channels.allocate(), -1);
        assert_eq!(channels.allocate(), -2);
        assert_eq!(channels.allocate(), -3);
    }

    #[test]
    fn test_error_flag() {
        let ok = Message::reply(5, -1, Value::Null);
        let err = Message::error_reply(5, -1, Value::Null);
        assert!(!ok.is_error());
        assert!(err.is_error());
        assert_eq!(err.base_opcode(), 5);
        assert_eq!(err.opcode, 0x8000_0005);
    }
}
