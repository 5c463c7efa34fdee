//! # Fork-Join Barrier
//!
//! A dynamic fork/join barrier over the task scheduler. `fork` registers a
//! task id and spawns the body; `join` waits until every forked task has
//! completed and returns their id→result map, or an error value when any
//! task failed or the optional timeout elapsed.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::ErrorCode;
use crate::runtime::scheduler::{SelectFuture, TaskFuture, TaskScheduler};
use crate::value::Value;

/// Fork-join barrier with a dynamic task table.
pub struct AsyncBarrier {
    sched: Rc<TaskScheduler>,
    forked: RefCell<Vec<String>>,
}

impl AsyncBarrier {
    pub fn new(sched: Rc<TaskScheduler>) -> Self {
        AsyncBarrier {
            sched,
            forked: RefCell::new(Vec::new()),
        }
    }

    /// Enqueue and spawn one body under the given task id.
    pub fn fork(&self, id: impl Into<String>, body: TaskFuture) -> String {
        let id = self.sched.spawn(Some(id.into()), body);
        self.forked.borrow_mut().push(id.clone());
        id
    }

    /// Ids forked so far, in fork order.
    pub fn task_ids(&self) -> Vec<String> {
        self.forked.borrow().clone()
    }

    /// Number of forked tasks that have not completed yet.
    pub fn pending_count(&self) -> usize {
        self.forked
            .borrow()
            .iter()
            .filter(|id| !self.sched.is_complete(id))
            .count()
    }

    /// Wait for every forked task. Returns the id→result map; an error value
    /// when any task failed, or `TimeoutError` when the deadline passes
    /// first.
    pub async fn join(&self, timeout: Option<Duration>) -> Value {
        let deadline = timeout.map(|t| Instant::now() + t);
        let ids = self.task_ids();
        let mut pairs: Vec<(Value, Value)> = Vec::with_capacity(ids.len());

        for id in ids {
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d && !self.sched.is_complete(&id) {
                        return Value::error(
                            ErrorCode::TimeoutError,
                            format!("barrier join timed out waiting for {id}"),
                        );
                    }
                    Some(d.saturating_duration_since(now))
                }
                None => None,
            };

            let result = if let Some(remaining) = remaining {
                let select = SelectFuture::new(
                    Rc::clone(&self.sched),
                    vec![Box::pin(self.sched.await_task(&id)) as TaskFuture],
                    Some(remaining),
                );
                let (index, value) = select.await;
                if index < 0 {
                    return Value::error(
                        ErrorCode::TimeoutError,
                        format!("barrier join timed out waiting for {id}"),
                    );
                }
                value
            } else {
                self.sched.await_task(&id).await
            };

            if result.is_error() {
                return result;
            }
            pairs.push((Value::str(id), result));
        }

        Value::map_from(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::scheduler::{Discipline, Sleep, StepBudget};

    fn sched(discipline: Discipline) -> Rc<TaskScheduler> {
        TaskScheduler::new(discipline, StepBudget::new(10_000, 16))
    }

    fn join_map(value: &Value) -> &crate::value::MapData {
        match value {
            Value::Map(m) => m,
            other => panic!("expected map, got {other}"),
        }
    }

    #[test]
    fn test_join_returns_all_results() {
        let s = sched(Discipline::Sequential);
        let barrier = AsyncBarrier::new(Rc::clone(&s));
        for i in 0..3 {
            barrier.fork(format!("t{i}"), Box::pin(async move { Value::Int(i) }));
        }
        let out = s.run_until(Box::pin(async move { barrier.join(None).await }));
        let map = join_map(&out);
        assert_eq!(map.entries.len(), 3);
        for i in 0..3 {
            let key = Value::str(format!("t{i}")).hash_key();
            assert_eq!(map.entries.get(&key).map(|(_, v)| v), Some(&Value::Int(i)));
        }
    }

    #[test]
    fn test_join_waits_for_last_task() {
        let s = sched(Discipline::Eager);
        let barrier = AsyncBarrier::new(Rc::clone(&s));
        let slow = Rc::clone(&s);
        barrier.fork(
            "slow",
            Box::pin(async move {
                Sleep::new(slow, Duration::from_millis(5)).await;
                Value::Int(9)
            }),
        );
        assert_eq!(barrier.pending_count(), 1);
        let out = s.run_until(Box::pin(async move { barrier.join(None).await }));
        let map = join_map(&out);
        assert_eq!(map.entries.len(), 1);
    }

    #[test]
    fn test_join_propagates_failure() {
        let s = sched(Discipline::Sequential);
        let barrier = AsyncBarrier::new(Rc::clone(&s));
        barrier.fork("ok", Box::pin(async { Value::Int(1) }));
        barrier.fork("bad", Box::pin(async {
            Value::error(ErrorCode::DomainError, "worker failed")
        }));
        let out = s.run_until(Box::pin(async move { barrier.join(None).await }));
        assert_eq!(out.error_code(), Some(ErrorCode::DomainError));
    }

    #[test]
    fn test_join_timeout() {
        let s = sched(Discipline::Eager);
        let barrier = AsyncBarrier::new(Rc::clone(&s));
        let slow = Rc::clone(&s);
        barrier.fork(
            "never",
            Box::pin(async move {
                Sleep::new(slow, Duration::from_secs(60)).await;
                Value::Int(0)
            }),
        );
        let out = s.run_until(Box::pin(async move {
            barrier.join(Some(Duration::from_millis(2))).await
        }));
        assert_eq!(out.error_code(), Some(ErrorCode::TimeoutError));
    }
}
