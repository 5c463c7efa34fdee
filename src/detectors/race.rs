//! # Race Detector
//!
//! Happens-before memory-access race detection. The detector is a passive
//! observer: executors record reads, writes and sync points on the data
//! path; `detect_races` computes a report on demand and takes no locks on
//! the paths it observes.
//!
//! Two accesses to the same location race when their tasks differ, at least
//! one is a write, and neither task's happens-before set contains the other
//! task or a shared ancestor.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::value::Value;

/// Access kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// One recorded access: task, kind, the value involved, a wall-clock
/// timestamp, and a snapshot of the task's happens-before set.
#[derive(Debug, Clone)]
pub struct Access {
    pub task: String,
    pub kind: AccessKind,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    pub happens_before: HashSet<String>,
}

/// Conflict classification for a racing pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    WriteWrite,
    WriteRead,
    ReadWrite,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::WriteWrite => write!(f, "W-W"),
            ConflictKind::WriteRead => write!(f, "W-R"),
            ConflictKind::ReadWrite => write!(f, "R-W"),
        }
    }
}

/// One reported race.
#[derive(Debug, Clone)]
pub struct RaceReport {
    pub location: String,
    pub first: Access,
    pub second: Access,
    pub conflict: ConflictKind,
}

/// Location → access history, plus per-task happens-before sets.
#[derive(Debug, Default)]
pub struct RaceDetector {
    accesses: RefCell<HashMap<String, Vec<Access>>>,
    happens_before: RefCell<HashMap<String, HashSet<String>>>,
}

impl RaceDetector {
    pub fn new() -> Rc<Self> {
        Rc::new(RaceDetector::default())
    }

    fn record(&self, location: &str, task: &str, kind: AccessKind, value: Value) {
        let hb = self
            .happens_before
            .borrow()
            .get(task)
            .cloned()
            .unwrap_or_default();
        self.accesses
            .borrow_mut()
            .entry(location.to_string())
            .or_default()
            .push(Access {
                task: task.to_string(),
                kind,
                value,
                timestamp: Utc::now(),
                happens_before: hb,
            });
    }

    /// Record a read of `location` by `task`.
    pub fn record_read(&self, location: &str, task: &str, value: Value) {
        self.record(location, task, AccessKind::Read, value);
    }

    /// Record a write of `location` by `task`.
    pub fn record_write(&self, location: &str, task: &str, value: Value) {
        self.record(location, task, AccessKind::Write, value);
    }

    /// Union `predecessors` (and, transitively, their happens-before sets)
    /// into `task`'s happens-before set. Later accesses of `task` reflect
    /// the enlarged set.
    pub fn record_sync_point<S: AsRef<str>>(&self, task: &str, predecessors: &[S]) {
        let mut hb_table = self.happens_before.borrow_mut();
        let mut merged: HashSet<String> = hb_table.get(task).cloned().unwrap_or_default();
        for pred in predecessors {
            let pred = pred.as_ref();
            if pred == task {
                continue;
            }
            merged.insert(pred.to_string());
            if let Some(pred_hb) = hb_table.get(pred) {
                merged.extend(pred_hb.iter().cloned());
            }
        }
        hb_table.insert(task.to_string(), merged);
    }

    /// The current happens-before set for a task (empty if unknown).
    pub fn happens_before_of(&self, task: &str) -> HashSet<String> {
        self.happens_before
            .borrow()
            .get(task)
            .cloned()
            .unwrap_or_default()
    }

    fn ordered(a: &Access, b: &Access) -> bool {
        a.happens_before.contains(&b.task)
            || b.happens_before.contains(&a.task)
            || !a.happens_before.is_disjoint(&b.happens_before)
    }

    fn conflict(a: &Access, b: &Access) -> Option<ConflictKind> {
        match (a.kind, b.kind) {
            (AccessKind::Write, AccessKind::Write) => Some(ConflictKind::WriteWrite),
            (AccessKind::Write, AccessKind::Read) => Some(ConflictKind::WriteRead),
            (AccessKind::Read, AccessKind::Write) => Some(ConflictKind::ReadWrite),
            (AccessKind::Read, AccessKind::Read) => None,
        }
    }

    /// Every unordered conflicting pair of accesses to the same location.
    pub fn detect_races(&self) -> Vec<RaceReport> {
        let mut reports = Vec::new();
        for (location, history) in self.accesses.borrow().iter() {
            for i in 0..history.len() {
                for j in (i + 1)..history.len() {
                    let a = &history[i];
                    let b = &history[j];
                    if a.task == b.task {
                        continue;
                    }
                    let Some(conflict) = Self::conflict(a, b) else {
                        continue;
                    };
                    if Self::ordered(a, b) {
                        continue;
                    }
                    reports.push(RaceReport {
                        location: location.clone(),
                        first: a.clone(),
                        second: b.clone(),
                        conflict,
                    });
                }
            }
        }
        reports
    }
}
