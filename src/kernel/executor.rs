//! Process executor
//!
//! Every process main is one task. `tick` polls the tasks woken since the
//! previous tick, most urgent priority first, each exactly once; a task that
//! wakes itself while being polled waits for the next tick. Nothing is
//! polled without a wake.
//!
//! The kernel never runs on the executor; `System` alternates ticks with
//! kernel pumps.

use super::task::{BoxFuture, TaskId};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, RawWaker, RawWakerVTable, Waker};

/// Scheduling class of a process task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Critical system processes
    Critical = 0,
    #[default]
    Normal = 1,
    /// Polled after everything else woken in the same tick
    Background = 2,
}

/// Tasks woken since they were last polled
type WakeList = Rc<RefCell<BTreeSet<TaskId>>>;

struct Slot {
    priority: Priority,
    future: BoxFuture,
}

/// Runs process tasks one tick at a time
pub struct Executor {
    slots: BTreeMap<TaskId, Slot>,
    woken: WakeList,
    next_id: u64,
}

impl Executor {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            woken: Rc::default(),
            next_id: 0,
        }
    }

    /// Add a task; it is first polled on the next tick
    pub fn spawn_with_priority<F>(&mut self, future: F, priority: Priority) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.slots.insert(
            id,
            Slot {
                priority,
                future: Box::pin(future),
            },
        );
        self.woken.borrow_mut().insert(id);
        id
    }

    /// Poll every woken task once; returns how many were polled
    pub fn tick(&mut self) -> usize {
        let woken = std::mem::take(&mut *self.woken.borrow_mut());
        let mut batch: Vec<(Priority, TaskId)> = woken
            .into_iter()
            .filter_map(|id| self.slots.get(&id).map(|slot| (slot.priority, id)))
            .collect();
        batch.sort();

        for &(_, id) in &batch {
            let Some(slot) = self.slots.get_mut(&id) else {
                continue;
            };
            let waker = task_waker(id, &self.woken);
            let mut cx = Context::from_waker(&waker);
            if slot.future.as_mut().poll(&mut cx).is_ready() {
                self.slots.remove(&id);
            }
        }
        batch.len()
    }

    pub fn has_ready(&self) -> bool {
        !self.woken.borrow().is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.slots.len()
    }

    /// Drop a task's future now; false if there was no such task
    pub fn cancel_task(&mut self, id: TaskId) -> bool {
        self.woken.borrow_mut().remove(&id);
        self.slots.remove(&id).is_some()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

/// What a waker carries: its task and the list to put it on
struct WakeTarget {
    task: TaskId,
    woken: WakeList,
}

impl WakeTarget {
    fn wake(&self) {
        self.woken.borrow_mut().insert(self.task);
    }
}

// Wakers hold an `Rc<WakeTarget>` behind the raw pointer. They never leave
// the thread the executor runs on.
const WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(clone_waker, wake_waker, wake_waker_by_ref, drop_waker);

fn task_waker(task: TaskId, woken: &WakeList) -> Waker {
    let target = Rc::new(WakeTarget {
        task,
        woken: woken.clone(),
    });
    let raw = RawWaker::new(Rc::into_raw(target) as *const (), &WAKER_VTABLE);
    unsafe { Waker::from_raw(raw) }
}

unsafe fn clone_waker(ptr: *const ()) -> RawWaker {
    unsafe { Rc::increment_strong_count(ptr as *const WakeTarget) };
    RawWaker::new(ptr, &WAKER_VTABLE)
}

unsafe fn wake_waker(ptr: *const ()) {
    let target = unsafe { Rc::from_raw(ptr as *const WakeTarget) };
    target.wake();
}

unsafe fn wake_waker_by_ref(ptr: *const ()) {
    let target = unsafe { &*(ptr as *const WakeTarget) };
    target.wake();
}

unsafe fn drop_waker(ptr: *const ()) {
    drop(unsafe { Rc::from_raw(ptr as *const WakeTarget) });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::ipc;
    use std::cell::Cell;

    fn spawn<F: Future<Output = ()> + 'static>(exec: &mut Executor, future: F) -> TaskId {
        exec.spawn_with_priority(future, Priority::Normal)
    }

    #[test]
    fn test_spawned_tasks_run_once_and_finish() {
        let mut exec = Executor::new();
        let a = spawn(&mut exec, async {});
        let b = spawn(&mut exec, async {});
        assert_ne!(a, b);
        assert_eq!(exec.task_count(), 2);

        assert_eq!(exec.tick(), 2);
        assert_eq!(exec.task_count(), 0);
        assert_eq!(exec.tick(), 0);
    }

    #[test]
    fn test_priority_order_within_tick() {
        let mut exec = Executor::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (name, priority) in [
            ("background", Priority::Background),
            ("normal", Priority::Normal),
            ("critical", Priority::Critical),
        ] {
            let order = order.clone();
            exec.spawn_with_priority(async move { order.borrow_mut().push(name) }, priority);
        }
        exec.tick();
        assert_eq!(*order.borrow(), ["critical", "normal", "background"]);
    }

    #[test]
    fn test_unwoken_task_is_not_polled() {
        let mut exec = Executor::new();
        let polls = Rc::new(Cell::new(0));
        let seen = polls.clone();
        spawn(&mut exec, async move {
            seen.set(seen.get() + 1);
            futures::pending!();
        });

        assert_eq!(exec.tick(), 1);
        assert_eq!(exec.tick(), 0);
        assert_eq!(polls.get(), 1);
        assert!(!exec.has_ready());
        assert_eq!(exec.task_count(), 1);
    }

    #[test]
    fn test_self_wake_waits_for_next_tick() {
        let mut exec = Executor::new();
        let polls = Rc::new(Cell::new(0));
        let seen = polls.clone();
        spawn(&mut exec, async move {
            loop {
                seen.set(seen.get() + 1);
                futures::future::poll_fn(|cx| {
                    cx.waker().wake_by_ref();
                    std::task::Poll::Ready(())
                })
                .await;
                futures::pending!();
            }
        });

        assert_eq!(exec.tick(), 1);
        assert!(exec.has_ready());
        assert_eq!(exec.tick(), 1);
        assert_eq!(polls.get(), 2);
    }

    #[test]
    fn test_channel_send_wakes_receiver() {
        let mut exec = Executor::new();
        let (tx, rx) = ipc::channel::<u32>();
        let got = Rc::new(Cell::new(0));
        let out = got.clone();
        spawn(&mut exec, async move {
            if let Some(v) = rx.recv().await {
                out.set(v);
            }
        });

        exec.tick();
        assert!(!exec.has_ready());
        tx.send(9).unwrap();
        assert!(exec.has_ready());
        exec.tick();
        assert_eq!(got.get(), 9);
        assert_eq!(exec.task_count(), 0);
    }

    #[test]
    fn test_cancel_drops_future() {
        struct DropFlag(Rc<Cell<bool>>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let mut exec = Executor::new();
        let dropped = Rc::new(Cell::new(false));
        let flag = DropFlag(dropped.clone());
        let id = spawn(&mut exec, async move {
            let _flag = flag;
            futures::pending!();
        });
        exec.tick();

        assert!(exec.cancel_task(id));
        assert!(dropped.get());
        assert!(!exec.cancel_task(id));
    }

    #[test]
    fn test_cancel_before_first_poll() {
        let mut exec = Executor::new();
        let id = spawn(&mut exec, async {});
        assert!(exec.cancel_task(id));
        assert!(!exec.has_ready());
        assert_eq!(exec.tick(), 0);
    }

    #[test]
    fn test_late_wake_of_cancelled_task_is_harmless() {
        let mut exec = Executor::new();
        let (tx, rx) = ipc::channel::<u32>();
        let id = spawn(&mut exec, async move {
            let _ = rx.recv().await;
        });
        exec.tick();
        assert!(exec.cancel_task(id));
        // The channel still holds the cancelled task's waker
        tx.send(1).unwrap();
        assert!(exec.has_ready());
        assert_eq!(exec.tick(), 0);
        assert!(!exec.has_ready());
    }
}
