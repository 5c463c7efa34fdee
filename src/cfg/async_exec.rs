//! # Async CFG Executor (PIR)
//!
//! Extends the LIR block walker with the PIR instruction set —
//! `spawn` (future-producing task creation), `channelOp`
//! (send/recv/trySend/tryRecv), `await` — and the PIR terminators:
//! `fork` (one task per branch, awaited in parallel, then the
//! continuation), `join` (await a fixed task list, optionally binding
//! results), `suspend` (await a future, then resume at an explicit block).
//!
//! Spawned task bodies execute the referenced node under a freshly seeded
//! runtime state; fork branches run their block over a snapshot of the
//! forking block's variables. Channel receives and task awaits feed the
//! race detector's happens-before relation when one is attached.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use async_recursion::async_recursion;
use tracing::trace;

use crate::ast::{ChannelOpKind, Instruction, NodeBody, Operand, Terminator};
use crate::env::ValueEnv;
use crate::error::ErrorCode;
use crate::eval::{AsyncContext, Evaluator};
use crate::value::Value;

use super::{resolve_operand, resolve_phi};

/// Asynchronous executor over PIR block nodes. Cheap to clone; spawned task
/// bodies carry their own copy.
#[derive(Clone)]
pub struct PirEvaluator {
    ev: Evaluator,
}

struct Frame {
    vars: HashMap<String, Value>,
    env: ValueEnv,
    current: String,
    previous: Option<String>,
    visited: HashSet<String>,
}

impl Frame {
    fn seeded(entry: String, seed: HashMap<String, Value>) -> Self {
        let env = ValueEnv::empty()
            .extend_many(seed.iter().map(|(k, v)| (k.clone(), v.clone())));
        Frame {
            vars: seed,
            env,
            current: entry,
            previous: None,
            visited: HashSet::new(),
        }
    }

    fn bind(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value.clone());
        self.env = self.env.extend(name.to_string(), value);
    }
}

impl PirEvaluator {
    pub fn new(ev: Evaluator) -> Self {
        PirEvaluator { ev }
    }

    fn ctx(&self) -> Result<AsyncContext, Value> {
        self.ev.async_ctx().cloned().ok_or_else(|| {
            Value::error(
                ErrorCode::DomainError,
                "PIR execution requires an async session",
            )
        })
    }

    fn record_sync(&self, ctx: &AsyncContext, producer: &str) {
        if let Some(race) = &ctx.race {
            race.record_sync_point(&self.ev.current_task(), &[producer]);
        }
    }

    /// Execute a node under a freshly seeded runtime state: expression nodes
    /// evaluate, block nodes run from their entry.
    #[async_recursion(?Send)]
    pub async fn run_node(&self, node_id: String) -> Value {
        let doc = self.ev.document().clone();
        let Some(node) = doc.node(&node_id) else {
            return Value::error(
                ErrorCode::UnboundIdentifier,
                format!("unknown node '{node_id}'"),
            );
        };
        match &node.body {
            NodeBody::Expr(expr) => self.ev.eval(expr, &ValueEnv::empty()).await,
            NodeBody::Blocks { entry, .. } => {
                self.run_blocks(&node_id, entry.clone(), HashMap::new()).await
            }
        }
    }

    /// Entry point for fork branches: owned receiver so the future is
    /// `'static`.
    async fn run_branch(
        self,
        node_id: String,
        entry: String,
        seed: HashMap<String, Value>,
    ) -> Value {
        self.run_blocks(&node_id, entry, seed).await
    }

    /// The block walker, extended with the PIR instruction set.
    #[async_recursion(?Send)]
    pub async fn run_blocks(
        &self,
        node_id: &str,
        entry: String,
        seed: HashMap<String, Value>,
    ) -> Value {
        let ctx = match self.ctx() {
            Ok(ctx) => ctx,
            Err(e) => return e,
        };
        let doc = self.ev.document().clone();
        let Some(node) = doc.node(node_id) else {
            return Value::error(
                ErrorCode::UnboundIdentifier,
                format!("unknown node '{node_id}'"),
            );
        };

        let mut frame = Frame::seeded(entry, seed);
        loop {
            let Some(block) = node.block(&frame.current) else {
                return Value::error(
                    ErrorCode::DomainError,
                    format!("unknown block '{}' in node '{node_id}'", frame.current),
                );
            };
            if !frame.visited.insert(frame.current.clone()) {
                trace!(block = %frame.current, "block revisit");
            }

            for ins in &block.instructions {
                if let Err(err) = self.ev.budget().consume(1) {
                    return Value::from_host_error(&err);
                }
                if self.ev.budget().should_yield() {
                    ctx.sched.yield_now().await;
                }
                if let Err(stop) = self.exec_ins(&ctx, ins, &mut frame).await {
                    return stop;
                }
            }

            if let Err(err) = self.ev.budget().consume(1) {
                return Value::from_host_error(&err);
            }
            match &block.terminator {
                Terminator::Jump { to } => {
                    frame.previous = Some(std::mem::replace(&mut frame.current, to.clone()));
                }
                Terminator::Branch { cond, then, els } => {
                    let c = resolve_operand(&frame.vars, cond);
                    if c.is_error() {
                        return c;
                    }
                    let taken = match c.expect_bool() {
                        Ok(b) => b,
                        Err(err) => return Value::from_host_error(&err),
                    };
                    let next = if taken { then.clone() } else { els.clone() };
                    frame.previous = Some(std::mem::replace(&mut frame.current, next));
                }
                Terminator::Return { value } => {
                    return match value {
                        Some(op) => resolve_operand(&frame.vars, op),
                        None => Value::Void,
                    };
                }
                Terminator::Exit { code } => {
                    return match code {
                        Some(op) => resolve_operand(&frame.vars, op),
                        None => Value::Void,
                    };
                }
                Terminator::Fork {
                    branches,
                    continuation,
                } => {
                    // One task per branch over a snapshot of the frame
                    let mut ids = Vec::with_capacity(branches.len());
                    for branch in branches {
                        let this = self.clone();
                        let nid = node_id.to_string();
                        let entry = branch.block.clone();
                        let snapshot = frame.vars.clone();
                        let id = ctx.sched.spawn(
                            Some(branch.task.clone()),
                            Box::pin(this.run_branch(nid, entry, snapshot)),
                        );
                        ids.push(id);
                    }
                    // Await all; any failure fails the fork
                    for id in &ids {
                        let v = ctx.sched.await_task(id).await;
                        self.record_sync(&ctx, id);
                        if v.is_error() {
                            return v;
                        }
                    }
                    frame.previous =
                        Some(std::mem::replace(&mut frame.current, continuation.clone()));
                }
                Terminator::Join {
                    tasks,
                    continuation,
                    results,
                } => {
                    for (i, id) in tasks.iter().enumerate() {
                        let v = ctx.sched.await_task(id).await;
                        self.record_sync(&ctx, id);
                        if v.is_error() {
                            return v;
                        }
                        if let Some(vars) = results {
                            if let Some(var) = vars.get(i) {
                                frame.bind(var, v);
                            }
                        }
                    }
                    frame.previous =
                        Some(std::mem::replace(&mut frame.current, continuation.clone()));
                }
                Terminator::Suspend { future, resume } => {
                    let f = resolve_operand(&frame.vars, future);
                    if f.is_error() {
                        return f;
                    }
                    let Ok(handle) = f.expect_future() else {
                        return Value::error(
                            ErrorCode::TypeError,
                            format!("suspend requires a future, got {}", f.type_name()),
                        );
                    };
                    let v = ctx.sched.await_task(&handle.task_id).await;
                    self.record_sync(&ctx, &handle.task_id);
                    if v.is_error() {
                        return v;
                    }
                    frame.previous = Some(std::mem::replace(&mut frame.current, resume.clone()));
                }
            }
        }
    }

    async fn exec_ins(
        &self,
        ctx: &AsyncContext,
        ins: &Instruction,
        frame: &mut Frame,
    ) -> Result<(), Value> {
        match ins {
            Instruction::Assign { target, expr } => {
                let v = self.ev.eval(expr, &frame.env).await;
                if v.is_error() {
                    return Err(v);
                }
                frame.bind(target, v);
            }
            Instruction::Op {
                target,
                operator,
                operands,
            } => {
                let mut args = Vec::with_capacity(operands.len());
                for op in operands {
                    let v = resolve_operand(&frame.vars, op);
                    if v.is_error() {
                        return Err(v);
                    }
                    args.push(v);
                }
                if let Err(err) = self.ev.operators().check_values(operator, &args) {
                    return Err(Value::from_host_error(&err));
                }
                let out = self.ev.operators().call(operator, &args);
                if out.is_error() {
                    return Err(out);
                }
                frame.bind(target, out);
            }
            Instruction::Call {
                target,
                callee,
                operands,
            } => {
                let f = resolve_operand(&frame.vars, callee);
                if f.is_error() {
                    return Err(f);
                }
                let mut args = Vec::with_capacity(operands.len());
                for op in operands {
                    let v = resolve_operand(&frame.vars, op);
                    if v.is_error() {
                        return Err(v);
                    }
                    args.push(v);
                }
                let out = self.ev.apply_closure(&f, args).await;
                if out.is_error() {
                    return Err(out);
                }
                frame.bind(target, out);
            }
            Instruction::Phi { target, sources } => {
                let v = resolve_phi(&frame.vars, sources, frame.previous.as_deref());
                if v.is_error() {
                    return Err(v);
                }
                frame.bind(target, v);
            }
            Instruction::Effect {
                target,
                effect,
                operands,
            } => {
                let mut args = Vec::with_capacity(operands.len());
                for op in operands {
                    let v = resolve_operand(&frame.vars, op);
                    if v.is_error() {
                        return Err(v);
                    }
                    args.push(v);
                }
                let out = self.ev.effects().call(effect, &args);
                self.ev.effect_log().append(
                    self.ev.current_task(),
                    effect.clone(),
                    args,
                    out.clone(),
                );
                if out.is_error() {
                    return Err(out);
                }
                frame.bind(target, out);
            }
            Instruction::AssignRef { target, value } => {
                let Some(cell) = frame.vars.get(target).cloned() else {
                    return Err(Value::error(
                        ErrorCode::UnboundIdentifier,
                        format!("unbound variable '{target}'"),
                    ));
                };
                let Value::RefCell(id) = &cell else {
                    return Err(Value::error(
                        ErrorCode::TypeError,
                        format!(
                            "assignRef target must hold a ref cell, got {}",
                            cell.type_name()
                        ),
                    ));
                };
                let v = resolve_operand(&frame.vars, value);
                if v.is_error() {
                    return Err(v);
                }
                let out = self.ev.write_cell(id, v);
                if out.is_error() {
                    return Err(out);
                }
            }
            Instruction::Spawn { target, node, task } => {
                let task_id = task.clone().unwrap_or_else(|| ctx.sched.fresh_task_id());
                let this = self.clone();
                let nid = node.clone();
                let id = ctx
                    .sched
                    .spawn(Some(task_id), Box::pin(async move { this.run_node(nid).await }));
                frame.bind(target, Value::future(id));
            }
            Instruction::ChannelOp {
                op,
                channel,
                value,
                target,
            } => {
                let ch = resolve_operand(&frame.vars, channel);
                if ch.is_error() {
                    return Err(ch);
                }
                let Ok(handle) = ch.expect_channel() else {
                    return Err(Value::error(
                        ErrorCode::TypeError,
                        format!("channelOp requires a channel, got {}", ch.type_name()),
                    ));
                };
                let chan_id = handle.id.clone();
                match op {
                    ChannelOpKind::Send => {
                        let Some(operand) = value.as_ref() else {
                            return Err(Value::error(
                                ErrorCode::DomainError,
                                "channel send requires a value operand",
                            ));
                        };
                        let v = resolve_operand(&frame.vars, operand);
                        if v.is_error() {
                            return Err(v);
                        }
                        let out = ctx
                            .channels
                            .send(&chan_id, v, &self.ev.current_task())
                            .await;
                        if out.is_error() {
                            return Err(out);
                        }
                        if let Some(t) = target {
                            frame.bind(t, Value::Void);
                        }
                    }
                    ChannelOpKind::Recv => {
                        let outcome = ctx.channels.recv(&chan_id).await;
                        if let Some(sender) = &outcome.sender {
                            self.record_sync(ctx, sender);
                        }
                        if outcome.value.is_error() {
                            return Err(outcome.value);
                        }
                        if let Some(t) = target {
                            frame.bind(t, outcome.value);
                        }
                    }
                    ChannelOpKind::TrySend => {
                        let Some(operand) = value.as_ref() else {
                            return Err(Value::error(
                                ErrorCode::DomainError,
                                "channel trySend requires a value operand",
                            ));
                        };
                        let v = resolve_operand(&frame.vars, operand);
                        if v.is_error() {
                            return Err(v);
                        }
                        match ctx.channels.try_send(&chan_id, v, &self.ev.current_task()) {
                            Ok(sent) => {
                                if let Some(t) = target {
                                    frame.bind(t, Value::Bool(sent));
                                }
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    ChannelOpKind::TryRecv => match ctx.channels.try_recv(&chan_id) {
                        Ok(Some(outcome)) => {
                            if let Some(sender) = &outcome.sender {
                                self.record_sync(ctx, sender);
                            }
                            if let Some(t) = target {
                                frame.bind(t, Value::some(outcome.value));
                            }
                        }
                        Ok(None) => {
                            if let Some(t) = target {
                                frame.bind(t, Value::none());
                            }
                        }
                        Err(e) => return Err(e),
                    },
                }
            }
            Instruction::Await { target, future } => {
                let f = resolve_operand(&frame.vars, future);
                if f.is_error() {
                    return Err(f);
                }
                let Ok(handle) = f.expect_future() else {
                    return Err(Value::error(
                        ErrorCode::TypeError,
                        format!("await requires a future, got {}", f.type_name()),
                    ));
                };
                let v = ctx.sched.await_task(&handle.task_id).await;
                self.record_sync(ctx, &handle.task_id);
                if v.is_error() {
                    return Err(v);
                }
                frame.bind(target, v);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{block, DocumentBuilder, ExprBuilder as E};
    use crate::ast::{Expr, ForkBranch, Layer};
    use crate::effects::create_capture_effect_registry;
    use crate::eval::EvalOptions;
    use crate::registry::create_standard_registry;
    use crate::runtime::{ChannelStore, Discipline, StepBudget, TaskScheduler};

    fn run_pir(doc: crate::ast::Document, discipline: Discipline) -> Value {
        let sched = TaskScheduler::new(discipline, StepBudget::new(100_000, 64));
        let ctx = AsyncContext {
            sched: Rc::clone(&sched),
            channels: ChannelStore::new(),
            race: None,
        };
        let ev = Evaluator::new(
            Rc::new(doc),
            Rc::new(create_standard_registry()),
            Rc::new(create_capture_effect_registry(vec![], 7)),
            EvalOptions::default(),
        )
        .with_async(ctx);
        let root = ev.clone();
        sched.run_until(Box::pin(async move { root.eval_result().await }))
    }

    #[test]
    fn test_spawn_await_instruction() {
        // worker: expression node producing 41 + 1
        // main: f = spawn worker; r = await f; return r
        let doc = DocumentBuilder::new(Layer::Pir, "2.0.0")
            .capability("async")
            .expr_node("worker", E::call("core:add", vec![E::int(41), E::int(1)]))
            .block_node(
                "main",
                "b0",
                vec![block("b0")
                    .spawn("f", "worker", Some("t0"))
                    .await_ins("r", Operand::Var("f".into()))
                    .ret_var("r")
                    .build()],
            )
            .result("main")
            .build();
        assert_eq!(run_pir(doc, Discipline::Eager), Value::Int(42));
    }

    #[test]
    fn test_fork_join_continuation() {
        // Three branches each bind their index to a cell-free variable and
        // return; the continuation runs strictly after all branches
        let doc = DocumentBuilder::new(Layer::Pir, "2.0.0")
            .capability("parallel")
            .block_node(
                "main",
                "b0",
                vec![
                    block("b0").terminator(Terminator::Fork {
                        branches: vec![
                            ForkBranch {
                                block: "w0".into(),
                                task: "t0".into(),
                            },
                            ForkBranch {
                                block: "w1".into(),
                                task: "t1".into(),
                            },
                            ForkBranch {
                                block: "w2".into(),
                                task: "t2".into(),
                            },
                        ],
                        continuation: "done".into(),
                    })
                    .build(),
                    block("w0").assign("r", E::int(0)).ret_var("r").build(),
                    block("w1").assign("r", E::int(1)).ret_var("r").build(),
                    block("w2").assign("r", E::int(2)).ret_var("r").build(),
                    block("done")
                        .terminator(Terminator::Join {
                            tasks: vec!["t0".into(), "t1".into(), "t2".into()],
                            continuation: "out".into(),
                            results: Some(vec!["r0".into(), "r1".into(), "r2".into()]),
                        })
                        .build(),
                    block("out")
                        .op(
                            "sum",
                            "core:add",
                            vec![Operand::Var("r0".into()), Operand::Var("r1".into())],
                        )
                        .op(
                            "sum2",
                            "core:add",
                            vec![Operand::Var("sum".into()), Operand::Var("r2".into())],
                        )
                        .ret_var("sum2")
                        .build(),
                ],
            )
            .result("main")
            .build();
        for discipline in [Discipline::Eager, Discipline::Sequential, Discipline::Parallel] {
            assert_eq!(run_pir(doc.clone(), discipline), Value::Int(3));
        }
    }

    #[test]
    fn test_channel_ops_through_instructions() {
        // producer block node sends 9; main receives it
        let doc = DocumentBuilder::new(Layer::Pir, "2.0.0")
            .capability("channels")
            .expr_node(
                "shared",
                Expr::Chan {
                    kind: crate::types::ChannelKind::Mpsc,
                    capacity: 1,
                    elem: None,
                },
            )
            .block_node(
                "producer",
                "p0",
                vec![block("p0")
                    .assign("c", E::var("shared"))
                    .instruction(Instruction::ChannelOp {
                        op: ChannelOpKind::Send,
                        channel: Operand::Var("c".into()),
                        value: Some(E::int_operand(9)),
                        target: None,
                    })
                    .ret()
                    .build()],
            )
            .block_node(
                "main",
                "b0",
                vec![block("b0")
                    .assign("c", E::var("shared"))
                    .spawn("f", "producer", Some("prod"))
                    .instruction(Instruction::ChannelOp {
                        op: ChannelOpKind::Recv,
                        channel: Operand::Var("c".into()),
                        value: None,
                        target: Some("v".into()),
                    })
                    .ret_var("v")
                    .build()],
            )
            .result("main")
            .build();
        assert_eq!(run_pir(doc, Discipline::Eager), Value::Int(9));
    }

    #[test]
    fn test_suspend_resumes_after_future() {
        let doc = DocumentBuilder::new(Layer::Pir, "2.0.0")
            .expr_node("worker", E::int(5))
            .block_node(
                "main",
                "b0",
                vec![
                    block("b0")
                        .spawn("f", "worker", Some("t0"))
                        .terminator(Terminator::Suspend {
                            future: Operand::Var("f".into()),
                            resume: "after".into(),
                        })
                        .build(),
                    block("after")
                        .await_ins("v", Operand::Var("f".into()))
                        .ret_var("v")
                        .build(),
                ],
            )
            .result("main")
            .build();
        assert_eq!(run_pir(doc, Discipline::Eager), Value::Int(5));
    }

    #[test]
    fn test_fork_failure_fails_fork() {
        let doc = DocumentBuilder::new(Layer::Pir, "2.0.0")
            .block_node(
                "main",
                "b0",
                vec![
                    block("b0")
                        .terminator(Terminator::Fork {
                            branches: vec![
                                ForkBranch {
                                    block: "ok".into(),
                                    task: "t0".into(),
                                },
                                ForkBranch {
                                    block: "bad".into(),
                                    task: "t1".into(),
                                },
                            ],
                            continuation: "done".into(),
                        })
                        .build(),
                    block("ok").assign("r", E::int(1)).ret_var("r").build(),
                    block("bad")
                        .op("r", "core:div", vec![E::int_operand(1), E::int_operand(0)])
                        .ret_var("r")
                        .build(),
                    block("done").ret().build(),
                ],
            )
            .result("main")
            .build();
        assert_eq!(
            run_pir(doc, Discipline::Eager).error_code(),
            Some(ErrorCode::DivideByZero)
        );
    }

    #[test]
    fn test_try_recv_empty_binds_none() {
        let doc = DocumentBuilder::new(Layer::Pir, "2.0.0")
            .expr_node(
                "shared",
                Expr::Chan {
                    kind: crate::types::ChannelKind::Spsc,
                    capacity: 1,
                    elem: None,
                },
            )
            .block_node(
                "main",
                "b0",
                vec![block("b0")
                    .assign("c", E::var("shared"))
                    .instruction(Instruction::ChannelOp {
                        op: ChannelOpKind::TryRecv,
                        channel: Operand::Var("c".into()),
                        value: None,
                        target: Some("v".into()),
                    })
                    .ret_var("v")
                    .build()],
            )
            .result("main")
            .build();
        assert_eq!(run_pir(doc, Discipline::Eager), Value::none());
    }
}
