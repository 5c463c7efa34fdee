//! # Evaluation Sessions
//!
//! Per-layer entry points over a validated document. A session owns the
//! mutable stores of one evaluation — reference cells, the channel store,
//! the task table, the detectors' tables — and releases them when it ends.
//! The document, operator registry and effect registry are constructed by
//! the caller and treated as immutable for the session's duration.
//!
//! AIR/CIR/EIR and LIR documents evaluate synchronously; PIR documents run
//! under the cooperative scheduler with the async I/O effect extension and
//! optional detectors attached.

use std::rc::Rc;

use tracing::debug;

use crate::ast::{Document, Layer};
use crate::detectors::{RaceDetector, RaceReport};
use crate::effects::async_io::{register_async_io_effects, MemFs, MockHttp};
use crate::effects::EffectRegistry;
use crate::eval::{AsyncContext, EvalOptions, Evaluator};
use crate::registry::OperatorRegistry;
use crate::runtime::{ChannelStore, Discipline, EffectRecord, StepBudget, TaskScheduler};
use crate::value::Value;

/// Options for one evaluation session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Expression-evaluator options (step ceiling, tracing)
    pub eval: EvalOptions,
    /// Scheduling discipline for PIR sessions
    pub discipline: Discipline,
    /// Scheduler step ceiling (independent of the evaluator's)
    pub max_scheduler_steps: u64,
    /// Cooperative yield interval in steps
    pub yield_interval: u64,
    /// Attach the race detector and report races in the outcome
    pub detect_races: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            eval: EvalOptions::default(),
            discipline: Discipline::default(),
            max_scheduler_steps: 100_000,
            yield_interval: 64,
            detect_races: false,
        }
    }
}

/// The result of a session: the value at the result node, the ordered
/// effect log, and any races observed.
#[derive(Debug)]
pub struct EvalOutcome {
    pub value: Value,
    pub effects: Vec<EffectRecord>,
    pub races: Vec<RaceReport>,
}

/// Evaluate a validated document, dispatching on its layer.
pub fn evaluate_document(
    doc: Document,
    ops: OperatorRegistry,
    effects: EffectRegistry,
    opts: &SessionOptions,
) -> EvalOutcome {
    match doc.layer {
        Layer::Air | Layer::Cir | Layer::Eir | Layer::Lir => {
            evaluate_sync(doc, ops, effects, &opts.eval)
        }
        Layer::Pir => evaluate_pir(doc, ops, effects, opts),
    }
}

/// Synchronous session for AIR/CIR/EIR/LIR documents.
pub fn evaluate_sync(
    doc: Document,
    ops: OperatorRegistry,
    effects: EffectRegistry,
    opts: &EvalOptions,
) -> EvalOutcome {
    debug!(layer = %doc.layer, result = %doc.result, "synchronous session");
    let ev = Evaluator::new(Rc::new(doc), Rc::new(ops), Rc::new(effects), opts.clone());
    let value = ev.eval_result_sync();
    EvalOutcome {
        value,
        effects: ev.effect_log().all(),
        races: Vec::new(),
    }
}

/// Asynchronous session for PIR documents: cooperative scheduler, channel
/// store, async I/O effects, optional race detector.
pub fn evaluate_pir(
    doc: Document,
    ops: OperatorRegistry,
    mut effects: EffectRegistry,
    opts: &SessionOptions,
) -> EvalOutcome {
    debug!(
        layer = %doc.layer,
        discipline = ?opts.discipline,
        "asynchronous session"
    );
    let sched = TaskScheduler::new(
        opts.discipline,
        StepBudget::new(opts.max_scheduler_steps, opts.yield_interval),
    );
    let channels = ChannelStore::new();
    let race = opts.detect_races.then(RaceDetector::new);

    register_async_io_effects(
        &mut effects,
        Rc::clone(&sched),
        MemFs::new(),
        MockHttp::new(),
    );

    let ev = Evaluator::new(
        Rc::new(doc),
        Rc::new(ops),
        Rc::new(effects),
        opts.eval.clone(),
    )
    .with_async(AsyncContext {
        sched: Rc::clone(&sched),
        channels,
        race: race.clone(),
    });

    let root = ev.clone();
    let value = sched.run_until(Box::pin(async move { root.eval_result().await }));

    EvalOutcome {
        value,
        effects: ev.effect_log().all(),
        races: race.map(|r| r.detect_races()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{DocumentBuilder, ExprBuilder as E};
    use crate::effects::create_capture_effect_registry;
    use crate::registry::create_standard_registry;

    #[test]
    fn test_sync_session_outcome() {
        let doc = DocumentBuilder::new(Layer::Air, "1.0.0")
            .expr_node("a", E::int(2))
            .expr_node("b", E::int(3))
            .expr_node("r", E::call("core:add", vec![E::var("a"), E::var("b")]))
            .result("r")
            .build();
        let out = evaluate_document(
            doc,
            create_standard_registry(),
            create_capture_effect_registry(vec![], 7),
            &SessionOptions::default(),
        );
        assert_eq!(out.value, Value::Int(5));
        assert!(out.effects.is_empty());
        assert!(out.races.is_empty());
    }

    #[test]
    fn test_pir_session_with_expression_result() {
        // spawn + await through the expression forms
        let doc = DocumentBuilder::new(Layer::Pir, "2.0.0")
            .capability("async")
            .expr_node("r", E::await_(E::spawn(E::int(9))))
            .result("r")
            .build();
        let out = evaluate_document(
            doc,
            create_standard_registry(),
            create_capture_effect_registry(vec![], 7),
            &SessionOptions::default(),
        );
        assert_eq!(out.value, Value::Int(9));
    }

    #[test]
    fn test_pir_session_has_async_effects() {
        // asyncWrite then asyncRead through futures
        let expr = E::let_(
            "w",
            E::effect("asyncWrite", vec![E::str("/f"), E::str("data")]),
            E::seq(
                E::await_(E::var("w")),
                E::await_(E::effect("asyncRead", vec![E::str("/f")])),
            ),
        );
        let doc = DocumentBuilder::new(Layer::Pir, "2.0.0")
            .expr_node("r", expr)
            .result("r")
            .build();
        let out = evaluate_document(
            doc,
            create_standard_registry(),
            create_capture_effect_registry(vec![], 7),
            &SessionOptions::default(),
        );
        assert_eq!(out.value, Value::str("data"));
        // Both effect invocations were logged
        assert_eq!(out.effects.len(), 2);
    }
}
