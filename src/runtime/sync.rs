//! # Async Mutex and Guarded Ref-Cell
//!
//! [`AsyncMutex`] is a cooperative mutex: acquire suspends when held and
//! enqueues a waiter; release hands ownership to the head of the waiter
//! queue, or flips the held bit when none are waiting. [`with_lock`] is the
//! scoped form — release happens on both normal and error exit (errors are
//! values, so every exit path is a return).
//!
//! [`AsyncRefCell`] is a mutex-guarded single slot with atomic
//! read/write/modify, plus unsynchronized direct accessors for callers that
//! manage their own ordering.
//!
//! A mutex can carry a [`DeadlockDetector`] observer; `acquire_for` then
//! reports acquisition/acquired/release transitions for the given task.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::detectors::deadlock::DeadlockDetector;
use crate::value::Value;

struct LockPark {
    granted: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

struct MutexState {
    held: bool,
    waiters: VecDeque<Rc<LockPark>>,
}

/// Cooperative async mutex identified by a stable lock id.
#[derive(Clone)]
pub struct AsyncMutex {
    id: String,
    state: Rc<RefCell<MutexState>>,
    detector: Option<Rc<DeadlockDetector>>,
}

impl AsyncMutex {
    pub fn new(id: impl Into<String>) -> Self {
        AsyncMutex {
            id: id.into(),
            state: Rc::new(RefCell::new(MutexState {
                held: false,
                waiters: VecDeque::new(),
            })),
            detector: None,
        }
    }

    /// Attach a deadlock-detector observer.
    pub fn with_detector(mut self, detector: Rc<DeadlockDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_held(&self) -> bool {
        self.state.borrow().held
    }

    /// Acquire without detector attribution.
    pub fn acquire(&self) -> AcquireFuture {
        self.acquire_for("main")
    }

    /// Acquire on behalf of `task`, reporting to the attached detector.
    pub fn acquire_for(&self, task: &str) -> AcquireFuture {
        if let Some(det) = &self.detector {
            det.track_lock_acquisition(task, &self.id);
        }
        AcquireFuture {
            mutex: self.clone(),
            task: task.to_string(),
            park: None,
        }
    }

    /// Release: wake the head waiter (ownership transfers directly) or flip
    /// the held bit.
    pub fn release(&self) {
        self.release_for("main");
    }

    pub fn release_for(&self, task: &str) {
        if let Some(det) = &self.detector {
            det.track_lock_release(task, &self.id);
        }
        let head = {
            let mut state = self.state.borrow_mut();
            match state.waiters.pop_front() {
                Some(park) => Some(park),
                None => {
                    state.held = false;
                    None
                }
            }
        };
        if let Some(park) = head {
            park.granted.set(true);
            if let Some(w) = park.waker.borrow_mut().take() {
                w.wake();
            }
        }
    }

    /// Scoped form: acquire, run `body`, release on every exit path.
    pub async fn with_lock<F, Fut>(&self, body: F) -> Value
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Value>,
    {
        self.acquire().await;
        let out = body().await;
        self.release();
        out
    }

    fn record_acquired(&self, task: &str) {
        if let Some(det) = &self.detector {
            det.track_lock_acquired(task, &self.id);
        }
    }
}

impl std::fmt::Debug for AsyncMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncMutex")
            .field("id", &self.id)
            .field("held", &self.is_held())
            .field("waiters", &self.state.borrow().waiters.len())
            .finish()
    }
}

/// Resolves once the mutex is owned by the acquiring task.
pub struct AcquireFuture {
    mutex: AsyncMutex,
    task: String,
    park: Option<Rc<LockPark>>,
}

impl Future for AcquireFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Some(park) = &this.park {
            if park.granted.get() {
                this.mutex.record_acquired(&this.task);
                return Poll::Ready(());
            }
            *park.waker.borrow_mut() = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let mut state = this.mutex.state.borrow_mut();
        if !state.held {
            state.held = true;
            drop(state);
            this.mutex.record_acquired(&this.task);
            return Poll::Ready(());
        }
        let park = Rc::new(LockPark {
            granted: Cell::new(false),
            waker: RefCell::new(Some(cx.waker().clone())),
        });
        state.waiters.push_back(Rc::clone(&park));
        drop(state);
        this.park = Some(park);
        Poll::Pending
    }
}

/// Mutex-guarded single-slot cell with atomic read/write/modify.
#[derive(Clone)]
pub struct AsyncRefCell {
    mutex: AsyncMutex,
    slot: Rc<RefCell<Value>>,
}

impl AsyncRefCell {
    pub fn new(id: impl Into<String>, initial: Value) -> Self {
        let id = id.into();
        AsyncRefCell {
            mutex: AsyncMutex::new(format!("{id}.lock")),
            slot: Rc::new(RefCell::new(initial)),
        }
    }

    /// Atomic read.
    pub async fn read(&self) -> Value {
        self.mutex.acquire().await;
        let value = self.slot.borrow().clone();
        self.mutex.release();
        value
    }

    /// Atomic write.
    pub async fn write(&self, value: Value) {
        self.mutex.acquire().await;
        *self.slot.borrow_mut() = value;
        self.mutex.release();
    }

    /// Atomic read-modify-write; returns the new value.
    pub async fn modify(&self, f: impl FnOnce(Value) -> Value) -> Value {
        self.mutex.acquire().await;
        let current = self.slot.borrow().clone();
        let next = f(current);
        *self.slot.borrow_mut() = next.clone();
        self.mutex.release();
        next
    }

    /// Direct read for callers that manage their own synchronization.
    pub fn read_unsync(&self) -> Value {
        self.slot.borrow().clone()
    }

    /// Direct write for callers that manage their own synchronization.
    pub fn write_unsync(&self, value: Value) {
        *self.slot.borrow_mut() = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::runtime::scheduler::{Discipline, StepBudget, TaskFuture, TaskScheduler};

    fn sched() -> Rc<TaskScheduler> {
        TaskScheduler::new(Discipline::Eager, StepBudget::new(10_000, 16))
    }

    #[test]
    fn test_uncontended_acquire() {
        let s = sched();
        let m = AsyncMutex::new("L1");
        let m2 = m.clone();
        let out = s.run_until(Box::pin(async move {
            m2.acquire().await;
            let held = m2.is_held();
            m2.release();
            Value::Bool(held)
        }));
        assert_eq!(out, Value::Bool(true));
        assert!(!m.is_held());
    }

    #[test]
    fn test_contended_fifo_handoff() {
        let s = sched();
        let m = AsyncMutex::new("L1");
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let holder = m.clone();
        let held = s.run_until(Box::pin(async move {
            holder.acquire().await;
            Value::Void
        }));
        assert_eq!(held, Value::Void);
        for (name, label) in [("a", "first"), ("b", "second")] {
            let m = m.clone();
            let log = Rc::clone(&log);
            s.spawn(
                Some(name.to_string()),
                Box::pin(async move {
                    m.acquire().await;
                    log.borrow_mut().push(label);
                    m.release();
                    Value::Void
                }) as TaskFuture,
            );
        }
        assert!(log.borrow().is_empty());
        m.release();
        let out = s.run_until(Box::pin(s.await_task("b")));
        assert_eq!(out, Value::Void);
        // Head-of-queue handoff preserves arrival order
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_with_lock_releases_on_error() {
        let s = sched();
        let m = AsyncMutex::new("L1");
        let m2 = m.clone();
        let out = s.run_until(Box::pin(async move {
            m2.with_lock(|| async { Value::error(ErrorCode::DomainError, "inner failure") })
                .await
        }));
        assert!(out.is_error());
        assert!(!m.is_held());
    }

    #[test]
    fn test_refcell_modify() {
        let s = sched();
        let cell = AsyncRefCell::new("cell-0", Value::Int(1));
        let c2 = cell.clone();
        let out = s.run_until(Box::pin(async move {
            c2.modify(|v| match v {
                Value::Int(i) => Value::Int(i + 10),
                other => other,
            })
            .await
        }));
        assert_eq!(out, Value::Int(11));
        assert_eq!(cell.read_unsync(), Value::Int(11));
    }

    #[test]
    fn test_refcell_unsync_accessors() {
        let cell = AsyncRefCell::new("cell-1", Value::Void);
        cell.write_unsync(Value::str("x"));
        assert_eq!(cell.read_unsync(), Value::str("x"));
    }
}
