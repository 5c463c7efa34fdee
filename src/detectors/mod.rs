//! # Concurrency Detectors
//!
//! Opt-in observers for PIR execution: the happens-before race detector and
//! the wait-for-graph deadlock detector. Both record events passively and
//! compute reports on demand.

pub mod deadlock;
pub mod race;

pub use deadlock::{DeadlockDetector, DeadlockReport};
pub use race::{Access, AccessKind, ConflictKind, RaceDetector, RaceReport};
