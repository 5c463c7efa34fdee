//! # Async Runtime
//!
//! The cooperative runtime backing PIR execution: the task scheduler with
//! its five disciplines, typed channels, the async mutex and guarded
//! ref-cell, the fork-join barrier, and the concurrent effect log.
//!
//! The engine is single-threaded cooperative; there is one logical executor
//! per session. Ordering across tasks is defined only by explicit
//! synchronization (channel communication, barrier completion,
//! await/suspend).

pub mod barrier;
pub mod channel;
pub mod effect_log;
pub mod scheduler;
pub mod sync;

pub use barrier::AsyncBarrier;
pub use channel::{ChannelStore, RecvOutcome};
pub use effect_log::{EffectLog, EffectRecord};
pub use scheduler::{
    block_on_sync, Discipline, SelectFuture, Sleep, StepBudget, TaskDone, TaskFuture,
    TaskScheduler, TaskStatus, MAIN_TASK,
};
pub use sync::{AsyncMutex, AsyncRefCell};
