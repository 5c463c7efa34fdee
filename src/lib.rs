//! # SPIRAL — Layered IR Engine
//!
//! A layered intermediate-representation toolchain: five successive IR
//! dialects (AIR, CIR, EIR, LIR, PIR) share a common type and value
//! universe, a common operator/effect registry, and a common document
//! container, while each layer adds expressive power — first-class
//! functions (CIR), effects and mutable cells (EIR), control-flow graphs
//! with phi nodes (LIR), and async/parallel primitives (PIR).
//!
//! ## Pipeline Architecture
//!
//! ```text
//! JSON Document
//!     ↓
//! [Validator]            → typed Document (or diagnostics)
//!     ↓
//! [Node map resolution]  → memoised id → value evaluation
//!     ↓
//! [Expression evaluator] → AIR/CIR/EIR forms, closures, fixpoint
//! [CFG executor]         → LIR basic blocks, SSA phi resolution
//! [Async CFG executor]   → PIR spawn/channelOp/await, fork/join/suspend
//!     ↓                     ├── cooperative scheduler (5 disciplines)
//!     ↓                     ├── channels, mutexes, barriers, effect log
//!     ↓                     └── race / deadlock detectors
//! Result value
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use serde_json::json;
//! use spiral::registry::create_standard_registry;
//! use spiral::effects::create_queued_effect_registry;
//! use spiral::session::{evaluate_document, SessionOptions};
//! use spiral::validator::validate_air;
//! use spiral::Value;
//!
//! let tree = json!({
//!     "version": "1.0.0",
//!     "nodes": [
//!         {"id": "a", "expr": {"kind": "lit", "type": {"kind": "int"}, "value": 2}},
//!         {"id": "b", "expr": {"kind": "lit", "type": {"kind": "int"}, "value": 3}},
//!         {"id": "r", "expr": {"kind": "call", "op": "core:add", "args": [
//!             {"kind": "var", "name": "a"},
//!             {"kind": "var", "name": "b"}
//!         ]}}
//!     ],
//!     "result": "r"
//! });
//! let doc = validate_air(&tree).expect("valid document");
//! let outcome = evaluate_document(
//!     doc,
//!     create_standard_registry(),
//!     create_queued_effect_registry(vec![]),
//!     &SessionOptions::default(),
//! );
//! assert_eq!(outcome.value, Value::Int(5));
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `types` | Closed type sum with structural equality |
//! | `value` | Runtime values, closures, identity/structural hashing |
//! | `env` | Persistent linked-frame environments |
//! | `ast` | Expressions, instructions, terminators, documents |
//! | `registry` | Namespaced operators (core/bool/list/set domains) |
//! | `effects` | Effect registry, queued-input variant, async I/O fixtures |
//! | `validator` | Per-layer structural validation with JSON-pointer paths |
//! | `eval` | Big-step expression evaluator with closures and fixpoint |
//! | `cfg` | LIR block walker and the async PIR extension |
//! | `runtime` | Cooperative scheduler, channels, mutexes, barrier, log |
//! | `detectors` | Happens-before races; wait-for-graph deadlocks |
//! | `session` | Per-layer evaluation entry points |
//! | `config` | Layered figment configuration |

// Shared universes
pub mod types;
pub mod value;

// Environments and documents
pub mod ast;
pub mod env;

// Error model
pub mod error;

// Registries
pub mod effects;
pub mod registry;

// Validation
pub mod validator;

// Evaluation engines
pub mod cfg;
pub mod eval;

// Async runtime and observers
pub mod detectors;
pub mod runtime;

// Session entry points and configuration
pub mod config;
pub mod session;

// Re-export the types the public surface is built from
pub use ast::{Document, Expr, Layer};
pub use config::Config;
pub use env::{TypeEnv, ValueEnv};
pub use error::{Diagnostic, ErrorCode, SpiralError};
pub use eval::{EvalOptions, Evaluator};
pub use session::{evaluate_document, EvalOutcome, SessionOptions};
pub use types::{ChannelKind, Type};
pub use validator::{
    validate_air, validate_cir, validate_document, validate_eir, validate_lir, validate_pir,
    ValidationResult,
};
pub use value::Value;
