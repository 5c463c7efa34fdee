//! # Cooperative Task Scheduler
//!
//! A single-threaded cooperative executor over a task table. Concurrency is
//! expressed through tasks; all suspension points are explicit (futures,
//! channels, mutexes, timers) — between suspension points a task observes
//! its own state atomically.
//!
//! ## Disciplines
//!
//! - **Eager** (default): a spawned task begins executing immediately, up to
//!   its first suspension point; thereafter tasks round-robin.
//! - **Sequential**: spawns enqueue; one task runs to completion in FIFO
//!   order before the next begins.
//! - **Parallel**: spawns enqueue lazily; `await_task` drives the requested
//!   task inline, enabling on-demand execution for testing.
//! - **BreadthFirst**: tasks interleave in FIFO wave order; newly spawned
//!   tasks join the back of the queue.
//! - **DepthFirst**: the last spawned task runs first, each to completion.
//!
//! Every task poll consumes one step from the scheduler's budget; exceeding
//! the ceiling surfaces as a `NonTermination` error value.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use futures_util::task::{noop_waker, waker, ArcWake};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{ErrorCode, SpiralError};
use crate::value::Value;

/// Boxed non-Send future used for task bodies.
pub type TaskFuture = Pin<Box<dyn Future<Output = Value> + 'static>>;

/// The pseudo task id attributed to work outside any spawned task.
pub const MAIN_TASK: &str = "main";

// ============================================================================
// Step budget
// ============================================================================

/// Shared step counter with a ceiling and a cooperative yield interval.
#[derive(Debug, Clone)]
pub struct StepBudget {
    steps: Rc<Cell<u64>>,
    max_steps: u64,
    yield_interval: u64,
}

impl StepBudget {
    pub fn new(max_steps: u64, yield_interval: u64) -> Self {
        StepBudget {
            steps: Rc::new(Cell::new(0)),
            max_steps,
            yield_interval: yield_interval.max(1),
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps.get()
    }

    /// Count `n` steps; exceeding the ceiling raises `NonTermination`.
    pub fn consume(&self, n: u64) -> Result<(), SpiralError> {
        let next = self.steps.get().saturating_add(n);
        self.steps.set(next);
        if next > self.max_steps {
            return Err(SpiralError::NonTermination {
                limit: self.max_steps,
            });
        }
        Ok(())
    }

    /// True every `yield_interval` steps.
    pub fn should_yield(&self) -> bool {
        let s = self.steps.get();
        s > 0 && s % self.yield_interval == 0
    }
}

impl Default for StepBudget {
    fn default() -> Self {
        StepBudget::new(100_000, 64)
    }
}

// ============================================================================
// Disciplines and task table
// ============================================================================

/// Scheduling discipline; see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Discipline {
    Eager,
    Sequential,
    Parallel,
    BreadthFirst,
    DepthFirst,
}

impl Discipline {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eager" => Some(Discipline::Eager),
            "sequential" => Some(Discipline::Sequential),
            "parallel" => Some(Discipline::Parallel),
            "breadth-first" | "bfs" => Some(Discipline::BreadthFirst),
            "depth-first" | "dfs" => Some(Discipline::DepthFirst),
            _ => None,
        }
    }

    /// Whether a still-runnable task is requeued at the front (run to
    /// completion) or the back (round-robin).
    fn requeues_front(&self) -> bool {
        matches!(self, Discipline::Sequential | Discipline::DepthFirst)
    }
}

impl Default for Discipline {
    fn default() -> Self {
        Discipline::Eager
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

struct TaskEntry {
    future: Option<TaskFuture>,
    status: TaskStatus,
    result: Option<Value>,
    waiters: Vec<Waker>,
}

type WakeQueue = Arc<Mutex<VecDeque<String>>>;

struct TaskWaker {
    id: String,
    queue: WakeQueue,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.queue.lock().push_back(arc_self.id.clone());
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// The cooperative task scheduler: task table, run order, wake queue,
/// timers and step accounting. Shared via `Rc`.
pub struct TaskScheduler {
    discipline: Discipline,
    tasks: RefCell<HashMap<String, TaskEntry>>,
    order: RefCell<VecDeque<String>>,
    wake_queue: WakeQueue,
    timers: RefCell<Vec<(Instant, Waker)>>,
    current: RefCell<Vec<String>>,
    budget: StepBudget,
    next_id: Cell<u64>,
}

impl TaskScheduler {
    pub fn new(discipline: Discipline, budget: StepBudget) -> Rc<Self> {
        Rc::new(TaskScheduler {
            discipline,
            tasks: RefCell::new(HashMap::new()),
            order: RefCell::new(VecDeque::new()),
            wake_queue: Arc::new(Mutex::new(VecDeque::new())),
            timers: RefCell::new(Vec::new()),
            current: RefCell::new(Vec::new()),
            budget,
            next_id: Cell::new(0),
        })
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    pub fn budget(&self) -> &StepBudget {
        &self.budget
    }

    /// The id of the task currently being polled, `main` outside any task.
    pub fn current_task(&self) -> String {
        self.current
            .borrow()
            .last()
            .cloned()
            .unwrap_or_else(|| MAIN_TASK.to_string())
    }

    /// Allocate a fresh sequential task id.
    pub fn fresh_task_id(&self) -> String {
        let n = self.next_id.get();
        self.next_id.set(n + 1);
        format!("task-{n}")
    }

    /// Register a task body. With the eager discipline the body starts
    /// executing before `spawn` returns; other disciplines enqueue.
    pub fn spawn(self: &Rc<Self>, id: Option<String>, body: TaskFuture) -> String {
        let id = id.unwrap_or_else(|| self.fresh_task_id());
        debug!(task = %id, discipline = ?self.discipline, "spawn");
        self.tasks.borrow_mut().insert(
            id.clone(),
            TaskEntry {
                future: Some(body),
                status: TaskStatus::Pending,
                result: None,
                waiters: Vec::new(),
            },
        );
        match self.discipline {
            Discipline::Eager => {
                self.poll_task(&id);
            }
            Discipline::Parallel => {
                // Lazy: driven by await_task
            }
            Discipline::DepthFirst => self.order.borrow_mut().push_front(id.clone()),
            Discipline::Sequential | Discipline::BreadthFirst => {
                self.order.borrow_mut().push_back(id.clone());
            }
        }
        id
    }

    /// `true` iff the task has a cached result (completed or failed).
    pub fn is_complete(&self, id: &str) -> bool {
        self.tasks
            .borrow()
            .get(id)
            .is_some_and(|t| t.result.is_some())
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.borrow().get(id).map(|t| t.status)
    }

    /// Cached result, if the task has completed or failed.
    pub fn result(&self, id: &str) -> Option<Value> {
        self.tasks.borrow().get(id).and_then(|t| t.result.clone())
    }

    /// Mark the task failed and release any awaiters with a cancellation
    /// error. Cancelling a finished or unknown task is a no-op.
    pub fn cancel(&self, id: &str) {
        let waiters = {
            let mut tasks = self.tasks.borrow_mut();
            let Some(entry) = tasks.get_mut(id) else {
                return;
            };
            if entry.result.is_some() {
                return;
            }
            entry.future = None;
            entry.status = TaskStatus::Failed;
            entry.result = Some(Value::error(
                ErrorCode::DomainError,
                format!("task {id} cancelled"),
            ));
            std::mem::take(&mut entry.waiters)
        };
        debug!(task = %id, "cancel");
        for w in waiters {
            w.wake();
        }
    }

    /// Future resolving to the task's cached result. Repeated awaits are
    /// idempotent.
    pub fn await_task(self: &Rc<Self>, id: impl Into<String>) -> TaskDone {
        TaskDone {
            sched: Rc::clone(self),
            id: id.into(),
        }
    }

    /// Cooperative yield point.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow { yielded: false }
    }

    // ------------------------------------------------------------------
    // Executor internals
    // ------------------------------------------------------------------

    /// Poll one task once. Returns true when the task completed.
    fn poll_task(self: &Rc<Self>, id: &str) -> bool {
        let Some(mut fut) = self
            .tasks
            .borrow_mut()
            .get_mut(id)
            .and_then(|t| t.future.take())
        else {
            return self.is_complete(id);
        };

        if let Err(err) = self.budget.consume(1) {
            self.complete_task(id, Value::from_host_error(&err));
            return true;
        }

        let task_waker = waker(Arc::new(TaskWaker {
            id: id.to_string(),
            queue: Arc::clone(&self.wake_queue),
        }));
        let mut cx = Context::from_waker(&task_waker);

        self.current.borrow_mut().push(id.to_string());
        let polled = fut.as_mut().poll(&mut cx);
        self.current.borrow_mut().pop();

        match polled {
            Poll::Ready(value) => {
                self.complete_task(id, value);
                true
            }
            Poll::Pending => {
                if let Some(entry) = self.tasks.borrow_mut().get_mut(id) {
                    // A cancel during the poll wins; drop the body then
                    if entry.result.is_none() {
                        entry.future = Some(fut);
                    }
                }
                false
            }
        }
    }

    fn complete_task(&self, id: &str, value: Value) {
        let waiters = {
            let mut tasks = self.tasks.borrow_mut();
            let Some(entry) = tasks.get_mut(id) else {
                return;
            };
            entry.status = if value.is_error() {
                TaskStatus::Failed
            } else {
                TaskStatus::Completed
            };
            entry.result = Some(value);
            entry.future = None;
            std::mem::take(&mut entry.waiters)
        };
        trace!(task = %id, "complete");
        for w in waiters {
            w.wake();
        }
    }

    fn drain_wake_queue(&self) {
        let mut woken = self.wake_queue.lock();
        let mut order = self.order.borrow_mut();
        while let Some(id) = woken.pop_front() {
            if self.discipline.requeues_front() {
                order.push_front(id);
            } else {
                order.push_back(id);
            }
        }
    }

    /// Run at most one task poll. Returns false when nothing was runnable.
    fn run_one(self: &Rc<Self>) -> bool {
        self.drain_wake_queue();
        let id = loop {
            let Some(id) = self.order.borrow_mut().pop_front() else {
                return false;
            };
            if !self.is_complete(&id) {
                break id;
            }
        };
        self.poll_task(&id);
        true
    }

    /// Wake every timer whose deadline has passed. Returns true if any fired.
    fn fire_due_timers(&self) -> bool {
        let now = Instant::now();
        let due: Vec<Waker> = {
            let mut timers = self.timers.borrow_mut();
            let mut fired = Vec::new();
            timers.retain(|(deadline, waker)| {
                if *deadline <= now {
                    fired.push(waker.clone());
                    false
                } else {
                    true
                }
            });
            fired
        };
        let any = !due.is_empty();
        for w in due {
            w.wake();
        }
        any
    }

    fn earliest_timer(&self) -> Option<Instant> {
        self.timers.borrow().iter().map(|(d, _)| *d).min()
    }

    fn register_timer(&self, deadline: Instant, waker: Waker) {
        self.timers.borrow_mut().push((deadline, waker));
    }

    /// Drive a specific task to completion (the parallel discipline's
    /// awaiting path). Other runnable tasks are executed when the target
    /// parks; no progress anywhere is a deadlock.
    fn drive_to_completion(self: &Rc<Self>, id: &str) -> Value {
        loop {
            if let Some(v) = self.result(id) {
                return v;
            }
            if self.tasks.borrow().get(id).is_none() {
                return Value::error(ErrorCode::DomainError, format!("unknown task {id}"));
            }
            self.poll_task(id);
            if self.result(id).is_some() {
                continue;
            }
            // Target parked; let other tasks make progress
            if self.run_one() {
                continue;
            }
            if self.fire_due_timers() {
                continue;
            }
            if let Some(deadline) = self.earliest_timer() {
                std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                continue;
            }
            return Value::error(
                ErrorCode::DomainError,
                format!("deadlock: task {id} cannot make progress"),
            );
        }
    }

    /// Drive a root future to completion, interleaving the task table
    /// according to the discipline. Returns a deadlock error value when the
    /// root is pending and nothing can run.
    pub fn run_until(self: &Rc<Self>, mut root: TaskFuture) -> Value {
        let root_waker = noop_waker();
        loop {
            let mut cx = Context::from_waker(&root_waker);
            self.fire_due_timers();
            match root.as_mut().poll(&mut cx) {
                Poll::Ready(value) => return value,
                Poll::Pending => {}
            }
            if let Err(err) = self.budget.consume(1) {
                return Value::from_host_error(&err);
            }
            if self.run_one() {
                continue;
            }
            if self.fire_due_timers() {
                continue;
            }
            if let Some(deadline) = self.earliest_timer() {
                std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                continue;
            }
            return Value::error(
                ErrorCode::DomainError,
                "deadlock: no runnable tasks while the session awaits",
            );
        }
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("discipline", &self.discipline)
            .field("tasks", &self.tasks.borrow().len())
            .field("steps", &self.budget.steps())
            .finish()
    }
}

/// Poll a future that must complete without suspending (the synchronous
/// AIR/CIR/EIR evaluation path).
pub fn block_on_sync<F: Future<Output = Value>>(fut: F) -> Result<Value, SpiralError> {
    let mut fut = Box::pin(fut);
    let w = noop_waker();
    let mut cx = Context::from_waker(&w);
    match fut.as_mut().poll(&mut cx) {
        Poll::Ready(v) => Ok(v),
        Poll::Pending => Err(SpiralError::NoAsyncContext("await".to_string())),
    }
}

// ============================================================================
// Futures
// ============================================================================

/// Resolves to a task's cached result.
pub struct TaskDone {
    sched: Rc<TaskScheduler>,
    id: String,
}

impl Future for TaskDone {
    type Output = Value;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(v) = self.sched.result(&self.id) {
            return Poll::Ready(v);
        }
        if self.sched.tasks.borrow().get(&self.id).is_none() {
            return Poll::Ready(Value::error(
                ErrorCode::DomainError,
                format!("unknown task {}", self.id),
            ));
        }
        if self.sched.discipline() == Discipline::Parallel {
            let sched = Rc::clone(&self.sched);
            let id = self.id.clone();
            return Poll::Ready(sched.drive_to_completion(&id));
        }
        if let Some(entry) = self.sched.tasks.borrow_mut().get_mut(&self.id) {
            entry.waiters.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Wakes itself once, handing control back to the executor.
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Completes once its deadline has passed; the executor sleeps toward the
/// earliest registered deadline when nothing is runnable.
pub struct TimerFuture {
    deadline: Instant,
}

impl TimerFuture {
    pub fn poll_with(
        &self,
        sched: &TaskScheduler,
        cx: &mut Context<'_>,
    ) -> Poll<()> {
        if Instant::now() >= self.deadline {
            Poll::Ready(())
        } else {
            sched.register_timer(self.deadline, cx.waker().clone());
            Poll::Pending
        }
    }
}

/// `TimerFuture` bound to its scheduler so it can self-register.
pub struct Sleep {
    timer: TimerFuture,
    sched: Rc<TaskScheduler>,
}

impl Sleep {
    pub fn new(sched: Rc<TaskScheduler>, duration: Duration) -> Self {
        Sleep {
            timer: TimerFuture {
                deadline: Instant::now() + duration,
            },
            sched,
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.timer.poll_with(&self.sched, cx)
    }
}

/// Races a set of child futures against an optional deadline. Resolves to
/// `(index, value)` of the first child to finish, or `(-1, void)` on
/// timeout.
pub struct SelectFuture {
    children: Vec<TaskFuture>,
    deadline: Option<Instant>,
    sched: Rc<TaskScheduler>,
}

impl SelectFuture {
    pub fn new(
        sched: Rc<TaskScheduler>,
        children: Vec<TaskFuture>,
        timeout: Option<Duration>,
    ) -> Self {
        SelectFuture {
            children,
            deadline: timeout.map(|t| Instant::now() + t),
            sched,
        }
    }
}

impl Future for SelectFuture {
    type Output = (i64, Value);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        for (i, child) in this.children.iter_mut().enumerate() {
            if let Poll::Ready(v) = child.as_mut().poll(cx) {
                return Poll::Ready((i as i64, v));
            }
        }
        if let Some(deadline) = this.deadline {
            if Instant::now() >= deadline {
                return Poll::Ready((-1, Value::Void));
            }
            this.sched.register_timer(deadline, cx.waker().clone());
        }
        Poll::Pending
    }
}
