//! # Deadlock Detector
//!
//! Wait-for-graph deadlock detection. Lock managers report three
//! transitions: a task starts waiting for a lock (`track_lock_acquisition`),
//! a task acquires a lock (`track_lock_acquired`), a task releases a lock
//! (`track_lock_release`). `detect_deadlock` builds the task-waits-for-task
//! graph (edges point from waiter to the holder of the awaited lock, labeled
//! with that lock) and reports every simple directed cycle found by
//! iterative depth-first search with a recursion stack.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::runtime::scheduler::{Sleep, TaskScheduler};

/// One detected cycle: the participating tasks in order, and the locks that
/// close each edge of the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockReport {
    pub tasks: Vec<String>,
    pub locks: Vec<String>,
}

/// Lock → owning task and task → awaited locks tables.
#[derive(Debug, Default)]
pub struct DeadlockDetector {
    owners: RefCell<HashMap<String, String>>,
    waiting: RefCell<HashMap<String, HashSet<String>>>,
}

impl DeadlockDetector {
    pub fn new() -> Rc<Self> {
        Rc::new(DeadlockDetector::default())
    }

    /// `task` has started waiting for `lock`.
    pub fn track_lock_acquisition(&self, task: &str, lock: &str) {
        self.waiting
            .borrow_mut()
            .entry(task.to_string())
            .or_default()
            .insert(lock.to_string());
    }

    /// `task` now holds `lock`; its wait on the lock is cleared.
    pub fn track_lock_acquired(&self, task: &str, lock: &str) {
        self.owners
            .borrow_mut()
            .insert(lock.to_string(), task.to_string());
        if let Some(waits) = self.waiting.borrow_mut().get_mut(task) {
            waits.remove(lock);
        }
    }

    /// `task` released `lock`. Releases by a non-owner are ignored.
    pub fn track_lock_release(&self, task: &str, lock: &str) {
        let mut owners = self.owners.borrow_mut();
        if owners.get(lock).is_some_and(|owner| owner == task) {
            owners.remove(lock);
        }
    }

    /// The current holder of a lock, if any.
    pub fn owner_of(&self, lock: &str) -> Option<String> {
        self.owners.borrow().get(lock).cloned()
    }

    /// Every simple cycle in the waits-for graph at this moment.
    pub fn detect_deadlock(&self) -> Vec<DeadlockReport> {
        // waiter → [(holder, lock)]
        let mut edges: HashMap<String, Vec<(String, String)>> = HashMap::new();
        {
            let owners = self.owners.borrow();
            for (task, locks) in self.waiting.borrow().iter() {
                for lock in locks {
                    if let Some(holder) = owners.get(lock) {
                        if holder != task {
                            edges
                                .entry(task.clone())
                                .or_default()
                                .push((holder.clone(), lock.clone()));
                        }
                    }
                }
            }
        }

        let mut reports = Vec::new();
        let mut seen_cycles: HashSet<Vec<String>> = HashSet::new();
        let mut visited: HashSet<String> = HashSet::new();

        let mut roots: Vec<&String> = edges.keys().collect();
        roots.sort();

        for root in roots {
            if visited.contains(root.as_str()) {
                continue;
            }
            // Iterative DFS: stack of (node, next edge index); `path` is the
            // recursion stack with the lock that led to each node.
            let mut stack: Vec<(String, usize)> = vec![(root.clone(), 0)];
            let mut path: Vec<(String, Option<String>)> = vec![(root.clone(), None)];
            let mut on_stack: HashSet<String> = HashSet::new();
            on_stack.insert(root.clone());

            while let Some((node, edge_idx)) = stack.last().cloned() {
                let next = edges
                    .get(&node)
                    .and_then(|out| out.get(edge_idx))
                    .cloned();
                match next {
                    Some((holder, lock)) => {
                        if let Some(top) = stack.last_mut() {
                            top.1 += 1;
                        }
                        if on_stack.contains(&holder) {
                            // Close the cycle at the holder's position
                            let start = path
                                .iter()
                                .position(|(t, _)| *t == holder)
                                .unwrap_or(0);
                            let mut tasks: Vec<String> =
                                path[start..].iter().map(|(t, _)| t.clone()).collect();
                            let mut locks: Vec<String> = path[start + 1..]
                                .iter()
                                .filter_map(|(_, l)| l.clone())
                                .collect();
                            // locks[i] is the lock tasks[i] is waiting for
                            locks.push(lock.clone());
                            if let Some(min_idx) =
                                tasks.iter().enumerate().min_by_key(|(_, t)| *t).map(|(i, _)| i)
                            {
                                tasks.rotate_left(min_idx);
                                locks.rotate_left(min_idx);
                            }
                            if seen_cycles.insert(tasks.clone()) {
                                reports.push(DeadlockReport { tasks, locks });
                            }
                        } else if !visited.contains(&holder) {
                            on_stack.insert(holder.clone());
                            path.push((holder.clone(), Some(lock.clone())));
                            stack.push((holder.clone(), 0));
                        }
                    }
                    None => {
                        visited.insert(node.clone());
                        on_stack.remove(&node);
                        stack.pop();
                        path.pop();
                    }
                }
            }
        }
        reports
    }

    /// Poll at a fixed interval until a cycle appears or the timeout
    /// elapses.
    pub async fn detect_deadlock_timed(
        &self,
        sched: Rc<TaskScheduler>,
        interval: Duration,
        timeout: Duration,
    ) -> Vec<DeadlockReport> {
        let deadline = Instant::now() + timeout;
        loop {
            let reports = self.detect_deadlock();
            if !reports.is_empty() || Instant::now() >= deadline {
                return reports;
            }
            Sleep::new(Rc::clone(&sched), interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_cycle_without_contention() {
        let det = DeadlockDetector::new();
        det.track_lock_acquired("t1", "L1");
        det.track_lock_acquisition("t2", "L1");
        assert!(det.detect_deadlock().is_empty());
    }

    #[test]
    fn test_two_task_cycle() {
        let det = DeadlockDetector::new();
        det.track_lock_acquired("t1", "L1");
        det.track_lock_acquired("t2", "L2");
        det.track_lock_acquisition("t1", "L2");
        det.track_lock_acquisition("t2", "L1");

        let reports = det.detect_deadlock();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.tasks, vec!["t1".to_string(), "t2".to_string()]);
        // locks[i] is the lock tasks[i] is waiting for
        assert_eq!(report.locks, vec!["L2".to_string(), "L1".to_string()]);
    }

    #[test]
    fn test_three_task_cycle() {
        let det = DeadlockDetector::new();
        det.track_lock_acquired("a", "L1");
        det.track_lock_acquired("b", "L2");
        det.track_lock_acquired("c", "L3");
        det.track_lock_acquisition("a", "L2");
        det.track_lock_acquisition("b", "L3");
        det.track_lock_acquisition("c", "L1");

        let reports = det.detect_deadlock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].tasks.len(), 3);
        assert_eq!(reports[0].locks.len(), 3);
    }

    #[test]
    fn test_cycle_clears_after_release() {
        let det = DeadlockDetector::new();
        det.track_lock_acquired("t1", "L1");
        det.track_lock_acquired("t2", "L2");
        det.track_lock_acquisition("t1", "L2");
        det.track_lock_acquisition("t2", "L1");
        assert_eq!(det.detect_deadlock().len(), 1);

        // t2 backs off: releases L2, which t1 then acquires
        det.track_lock_release("t2", "L2");
        det.track_lock_acquired("t1", "L2");
        assert!(det.detect_deadlock().is_empty());
    }

    #[test]
    fn test_release_by_non_owner_ignored() {
        let det = DeadlockDetector::new();
        det.track_lock_acquired("t1", "L1");
        det.track_lock_release("t2", "L1");
        assert_eq!(det.owner_of("L1").as_deref(), Some("t1"));
    }

    #[test]
    fn test_timed_variant_returns_cycle() {
        let det = DeadlockDetector::new();
        det.track_lock_acquired("t1", "L1");
        det.track_lock_acquired("t2", "L2");
        det.track_lock_acquisition("t1", "L2");
        det.track_lock_acquisition("t2", "L1");

        let sched = crate::runtime::scheduler::TaskScheduler::new(
            crate::runtime::scheduler::Discipline::Eager,
            crate::runtime::scheduler::StepBudget::new(1_000, 16),
        );
        let det2 = Rc::clone(&det);
        let s2 = Rc::clone(&sched);
        let out = sched.run_until(Box::pin(async move {
            let reports = det2
                .detect_deadlock_timed(s2, Duration::from_millis(1), Duration::from_millis(50))
                .await;
            crate::value::Value::Int(reports.len() as i64)
        }));
        assert_eq!(out, crate::value::Value::Int(1));
    }
}
