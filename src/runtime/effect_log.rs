//! # Concurrent Effect Log
//!
//! Ordered log of effect invocations across all tasks in a session. Each
//! record carries the invoking task id, a monotone sequence number, and a
//! wall-clock timestamp. Readers get sequence-ordered views globally and
//! per task; `discard_task` drops a cancelled task's entries.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::value::Value;

/// One logged effect invocation.
#[derive(Debug, Clone)]
pub struct EffectRecord {
    pub task: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub effect: String,
    pub args: Vec<Value>,
    pub result: Value,
}

/// Session-owned ordered effect log.
#[derive(Debug, Default)]
pub struct EffectLog {
    entries: RefCell<Vec<EffectRecord>>,
    next_seq: Cell<u64>,
}

impl EffectLog {
    pub fn new() -> Rc<Self> {
        Rc::new(EffectLog::default())
    }

    /// Append one record; returns its sequence number.
    pub fn append(
        &self,
        task: impl Into<String>,
        effect: impl Into<String>,
        args: Vec<Value>,
        result: Value,
    ) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.entries.borrow_mut().push(EffectRecord {
            task: task.into(),
            seq,
            timestamp: Utc::now(),
            effect: effect.into(),
            args,
            result,
        });
        seq
    }

    /// Every record, ordered by sequence number.
    pub fn all(&self) -> Vec<EffectRecord> {
        let mut out = self.entries.borrow().clone();
        out.sort_by_key(|r| r.seq);
        out
    }

    /// Records for one task, ordered by sequence number.
    pub fn for_task(&self, task: &str) -> Vec<EffectRecord> {
        let mut out: Vec<EffectRecord> = self
            .entries
            .borrow()
            .iter()
            .filter(|r| r.task == task)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.seq);
        out
    }

    /// Drop every record of `task` (used on cancellation).
    pub fn discard_task(&self, task: &str) {
        self.entries.borrow_mut().retain(|r| r.task != task);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_ordering() {
        let log = EffectLog::new();
        log.append("main", "print", vec![Value::str("a")], Value::Void);
        log.append("task-0", "print", vec![Value::str("b")], Value::Void);
        log.append("main", "print", vec![Value::str("c")], Value::Void);

        let all = log.all();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].seq, 0);
        assert_eq!(all[2].seq, 2);

        let main_only = log.for_task("main");
        assert_eq!(main_only.len(), 2);
        assert_eq!(main_only[1].args[0], Value::str("c"));
    }

    #[test]
    fn test_discard_task() {
        let log = EffectLog::new();
        log.append("main", "print", vec![], Value::Void);
        log.append("task-1", "write", vec![], Value::Void);
        log.discard_task("task-1");
        assert_eq!(log.len(), 1);
        assert!(log.for_task("task-1").is_empty());
    }
}
