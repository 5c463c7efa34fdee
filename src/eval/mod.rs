//! # Expression Evaluator
//!
//! Big-step operational semantics for AIR/CIR/EIR expression forms, with the
//! PIR async forms available when the evaluator carries an async context.
//! The judgement `ρ ⊢ e ⇓ v` is realised as a dispatch on expression kind
//! with a step counter; exceeding `max_steps` yields `NonTermination`.
//!
//! Errors are values: every sub-evaluation that produces an error value
//! short-circuits the enclosing form, and `try` is the only construct that
//! observes the value and routes control.
//!
//! Program-level evaluation is a direct memoising evaluator over the node
//! map: a `var` that is not locally bound resolves to the node of that id,
//! which is evaluated at most once per session.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use async_recursion::async_recursion;
use tracing::trace;

use crate::ast::{Catch, Document, Expr, Literal, NodeBody, Param};
use crate::detectors::RaceDetector;
use crate::env::ValueEnv;
use crate::error::{ErrorCode, SpiralError};
use crate::effects::EffectRegistry;
use crate::registry::OperatorRegistry;
use crate::runtime::{
    block_on_sync, ChannelStore, EffectLog, SelectFuture, StepBudget, TaskFuture, TaskScheduler,
    MAIN_TASK,
};
use crate::types::Type;
use crate::value::{Closure, Value};

/// Evaluation options for the expression evaluator.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Step ceiling; exceeding it raises `NonTermination`
    pub max_steps: u64,
    /// Emit a trace event per evaluation step
    pub trace: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        EvalOptions {
            max_steps: 100_000,
            trace: false,
        }
    }
}

/// The async stores a PIR session provides.
#[derive(Clone)]
pub struct AsyncContext {
    pub sched: Rc<TaskScheduler>,
    pub channels: Rc<ChannelStore>,
    pub race: Option<Rc<RaceDetector>>,
}

/// Big-step expression evaluator over a validated document.
///
/// Cheap to clone: all owned state is shared behind `Rc`, which is what lets
/// spawned task bodies carry their own evaluator handle.
#[derive(Clone)]
pub struct Evaluator {
    doc: Rc<Document>,
    ops: Rc<OperatorRegistry>,
    effects: Rc<EffectRegistry>,
    options: EvalOptions,
    budget: StepBudget,
    cells: Rc<RefCell<HashMap<String, Value>>>,
    next_cell: Rc<Cell<u64>>,
    node_cache: Rc<RefCell<HashMap<String, Value>>>,
    effect_log: Rc<EffectLog>,
    async_ctx: Option<AsyncContext>,
}

impl Evaluator {
    pub fn new(
        doc: Rc<Document>,
        ops: Rc<OperatorRegistry>,
        effects: Rc<EffectRegistry>,
        options: EvalOptions,
    ) -> Self {
        let budget = StepBudget::new(options.max_steps, 64);
        Evaluator {
            doc,
            ops,
            effects,
            options,
            budget,
            cells: Rc::new(RefCell::new(HashMap::new())),
            next_cell: Rc::new(Cell::new(0)),
            node_cache: Rc::new(RefCell::new(HashMap::new())),
            effect_log: EffectLog::new(),
            async_ctx: None,
        }
    }

    /// Attach the async stores; PIR forms error without them.
    pub fn with_async(mut self, ctx: AsyncContext) -> Self {
        self.async_ctx = Some(ctx);
        self
    }

    pub fn document(&self) -> &Rc<Document> {
        &self.doc
    }

    pub fn operators(&self) -> &Rc<OperatorRegistry> {
        &self.ops
    }

    pub fn effects(&self) -> &Rc<EffectRegistry> {
        &self.effects
    }

    pub fn effect_log(&self) -> &Rc<EffectLog> {
        &self.effect_log
    }

    pub fn async_ctx(&self) -> Option<&AsyncContext> {
        self.async_ctx.as_ref()
    }

    pub fn budget(&self) -> &StepBudget {
        &self.budget
    }

    /// The task currently executing, `main` outside any task.
    pub fn current_task(&self) -> String {
        match &self.async_ctx {
            Some(ctx) => ctx.sched.current_task(),
            None => MAIN_TASK.to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Reference cells
    // ------------------------------------------------------------------

    /// Allocate a fresh cell holding `initial`.
    pub fn new_cell(&self, initial: Value) -> Value {
        let n = self.next_cell.get();
        self.next_cell.set(n + 1);
        let id = format!("cell-{n}");
        self.cells.borrow_mut().insert(id.clone(), initial);
        Value::RefCell(Rc::from(id.into_boxed_str()))
    }

    /// Read a cell; unknown ids produce a `DomainError` value.
    pub fn read_cell(&self, id: &str) -> Value {
        match self.cells.borrow().get(id) {
            Some(v) => {
                if let Some(race) = self.async_ctx.as_ref().and_then(|c| c.race.as_ref()) {
                    race.record_read(id, &self.current_task(), v.clone());
                }
                v.clone()
            }
            None => Value::error(ErrorCode::DomainError, format!("unknown cell {id}")),
        }
    }

    /// Write a cell; unknown ids produce a `DomainError` value.
    pub fn write_cell(&self, id: &str, value: Value) -> Value {
        let mut cells = self.cells.borrow_mut();
        match cells.get_mut(id) {
            Some(slot) => {
                *slot = value.clone();
                drop(cells);
                if let Some(race) = self.async_ctx.as_ref().and_then(|c| c.race.as_ref()) {
                    race.record_write(id, &self.current_task(), value);
                }
                Value::Void
            }
            None => Value::error(ErrorCode::DomainError, format!("unknown cell {id}")),
        }
    }

    // ------------------------------------------------------------------
    // Node-map evaluation
    // ------------------------------------------------------------------

    /// Evaluate a node by id with memoisation; each node is computed at
    /// most once per session.
    #[async_recursion(?Send)]
    pub async fn eval_node(&self, id: &str) -> Value {
        if let Some(v) = self.node_cache.borrow().get(id) {
            return v.clone();
        }
        let Some(node) = self.doc.node(id) else {
            return Value::error(
                ErrorCode::UnboundIdentifier,
                format!("unknown node '{id}'"),
            );
        };
        let value = match &node.body {
            NodeBody::Expr(expr) => self.eval(expr, &ValueEnv::empty()).await,
            NodeBody::Blocks { .. } => {
                if self.async_ctx.is_some() {
                    crate::cfg::async_exec::PirEvaluator::new(self.clone())
                        .run_node(id.to_string())
                        .await
                } else {
                    crate::cfg::LirEvaluator::new(self).run_node(id)
                }
            }
        };
        self.node_cache
            .borrow_mut()
            .insert(id.to_string(), value.clone());
        value
    }

    /// Evaluate the document's designated result node.
    pub async fn eval_result(&self) -> Value {
        let id = self.doc.result.clone();
        self.eval_node(&id).await
    }

    /// Synchronous entry point for AIR/CIR/EIR documents; a PIR form that
    /// suspends surfaces as a `DomainError` value.
    pub fn eval_result_sync(&self) -> Value {
        match block_on_sync(self.eval_result()) {
            Ok(v) => v,
            Err(err) => Value::from_host_error(&err),
        }
    }

    /// Synchronous expression evaluation (no suspension allowed).
    pub fn eval_sync(&self, expr: &Expr, env: &ValueEnv) -> Value {
        match block_on_sync(self.eval(expr, env)) {
            Ok(v) => v,
            Err(err) => Value::from_host_error(&err),
        }
    }

    // ------------------------------------------------------------------
    // Big-step evaluation
    // ------------------------------------------------------------------

    /// `ρ ⊢ e ⇓ v`.
    #[async_recursion(?Send)]
    pub async fn eval(&self, expr: &Expr, env: &ValueEnv) -> Value {
        if let Err(err) = self.budget.consume(1) {
            return Value::from_host_error(&err);
        }
        if self.options.trace {
            trace!(kind = expr.kind_name(), step = self.budget.steps(), "eval");
        }
        if let Some(ctx) = &self.async_ctx {
            if self.budget.should_yield() {
                ctx.sched.yield_now().await;
            }
        }

        match expr {
            Expr::Lit { ty, value } => convert_literal(ty, value),
            Expr::Var { name } => match env.lookup(name) {
                Some(v) => v.clone(),
                None => {
                    if self.doc.node(name).is_some() {
                        self.eval_node(name).await
                    } else {
                        Value::error(
                            ErrorCode::UnboundIdentifier,
                            format!("unbound identifier '{name}'"),
                        )
                    }
                }
            },
            Expr::Ref { namespace, name } => {
                let ns = namespace.as_deref().unwrap_or("user");
                let qualified = format!("{ns}:{name}");
                match self.doc.def(&qualified) {
                    Some(def) if def.params.is_empty() => {
                        self.eval(&def.body.clone(), &ValueEnv::empty()).await
                    }
                    Some(def) => {
                        // A parameterised definition referenced as a value
                        // closes over the empty environment
                        let params: Vec<Param> = def
                            .params
                            .iter()
                            .map(|p| Param {
                                name: p.name.clone(),
                                optional: false,
                                default: None,
                                ty: Some(p.ty.clone()),
                            })
                            .collect();
                        Value::Closure(Rc::new(Closure {
                            params: Rc::new(params),
                            body: Rc::new(def.body.clone()),
                            env: ValueEnv::empty(),
                        }))
                    }
                    None => Value::error(
                        ErrorCode::UnknownDefinition,
                        format!("unknown definition '{qualified}'"),
                    ),
                }
            }
            Expr::If { cond, then, els } => {
                let c = self.eval(cond, env).await;
                if c.is_error() {
                    return c;
                }
                match c.expect_bool() {
                    Ok(true) => self.eval(then, env).await,
                    Ok(false) => self.eval(els, env).await,
                    Err(err) => Value::from_host_error(&err),
                }
            }
            Expr::Let { name, value, body } => {
                let v = self.eval(value, env).await;
                if v.is_error() {
                    return v;
                }
                let inner = env.extend(name.clone(), v);
                self.eval(body, &inner).await
            }
            Expr::Call { op, args } => self.eval_call(op, args, env).await,
            Expr::Lambda { params, body } => Value::Closure(Rc::new(Closure {
                params: Rc::clone(params),
                body: Rc::clone(body),
                env: env.clone(),
            })),
            Expr::Apply { func, args } => {
                let f = self.eval(func, env).await;
                if f.is_error() {
                    return f;
                }
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    let v = self.eval(arg, env).await;
                    if v.is_error() {
                        return v;
                    }
                    evaluated.push(v);
                }
                self.apply_closure(&f, evaluated).await
            }
            Expr::Fix { func } => {
                let f = self.eval(func, env).await;
                if f.is_error() {
                    return f;
                }
                let Ok(closure) = f.expect_closure() else {
                    return Value::error(ErrorCode::TypeError, "fix requires a closure");
                };
                if closure.params.len() != 1 {
                    return Value::error(
                        ErrorCode::TypeError,
                        "fix requires a one-parameter closure",
                    );
                }
                let hook = closure.params[0].name.clone();
                let bound = match closure.body.as_ref() {
                    // The common shape λx.λp….e: bind x to a closure that
                    // re-enters the fixpoint on application, so recursive
                    // calls see the fixed function's value
                    Expr::Lambda { params, .. } => {
                        let rebuilt = Expr::Fix {
                            func: Box::new(Expr::Lambda {
                                params: Rc::clone(&closure.params),
                                body: Rc::clone(&closure.body),
                            }),
                        };
                        let args = params
                            .iter()
                            .map(|p| Expr::Var {
                                name: p.name.clone(),
                            })
                            .collect();
                        Value::Closure(Rc::new(Closure {
                            params: Rc::clone(params),
                            body: Rc::new(Expr::Apply {
                                func: Box::new(rebuilt),
                                args,
                            }),
                            env: closure.env.clone(),
                        }))
                    }
                    // Degenerate shape: bind the parameter to the closure
                    // itself
                    _ => f.clone(),
                };
                let inner = closure.env.extend(hook, bound);
                self.eval(&closure.body.clone(), &inner).await
            }
            Expr::Seq { first, second } => {
                let v = self.eval(first, env).await;
                if v.is_error() {
                    return v;
                }
                self.eval(second, env).await
            }
            Expr::Assign { cell, value } => {
                let target = self.eval(cell, env).await;
                if target.is_error() {
                    return target;
                }
                let Value::RefCell(id) = &target else {
                    return Value::error(
                        ErrorCode::TypeError,
                        format!("assign target must be a ref cell, got {}", target.type_name()),
                    );
                };
                let v = self.eval(value, env).await;
                if v.is_error() {
                    return v;
                }
                self.write_cell(id, v)
            }
            Expr::While { cond, body } => {
                loop {
                    if let Err(err) = self.budget.consume(1) {
                        return Value::from_host_error(&err);
                    }
                    let c = self.eval(cond, env).await;
                    if c.is_error() {
                        return c;
                    }
                    match c.expect_bool() {
                        Ok(true) => {
                            let v = self.eval(body, env).await;
                            if v.is_error() {
                                return v;
                            }
                        }
                        Ok(false) => return Value::Void,
                        Err(err) => return Value::from_host_error(&err),
                    }
                }
            }
            Expr::For {
                var,
                from,
                to,
                body,
            } => {
                let start = self.eval(from, env).await;
                if start.is_error() {
                    return start;
                }
                let end = self.eval(to, env).await;
                if end.is_error() {
                    return end;
                }
                let (Ok(start), Ok(end)) = (start.expect_int(), end.expect_int()) else {
                    return Value::error(ErrorCode::TypeError, "for bounds must be ints");
                };
                // Half-open range [from, to)
                for i in start..end {
                    if let Err(err) = self.budget.consume(1) {
                        return Value::from_host_error(&err);
                    }
                    let inner = env.extend(var.clone(), Value::Int(i));
                    let v = self.eval(body, &inner).await;
                    if v.is_error() {
                        return v;
                    }
                }
                Value::Void
            }
            Expr::Iter {
                var,
                collection,
                body,
            } => {
                let coll = self.eval(collection, env).await;
                if coll.is_error() {
                    return coll;
                }
                let items: Vec<Value> = match &coll {
                    Value::List(items) => items.iter().cloned().collect(),
                    Value::Set(data) => {
                        let mut keys: Vec<&String> = data.entries.keys().collect();
                        keys.sort();
                        keys.iter().map(|k| data.entries[*k].clone()).collect()
                    }
                    other => {
                        return Value::error(
                            ErrorCode::TypeError,
                            format!("iter requires a list or set, got {}", other.type_name()),
                        )
                    }
                };
                for item in items {
                    if let Err(err) = self.budget.consume(1) {
                        return Value::from_host_error(&err);
                    }
                    let inner = env.extend(var.clone(), item);
                    let v = self.eval(body, &inner).await;
                    if v.is_error() {
                        return v;
                    }
                }
                Value::Void
            }
            Expr::Effect { effect, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    let v = self.eval(arg, env).await;
                    if v.is_error() {
                        return v;
                    }
                    evaluated.push(v);
                }
                let result = self.effects.call(effect, &evaluated);
                self.effect_log
                    .append(self.current_task(), effect.clone(), evaluated, result.clone());
                result
            }
            Expr::RefNew { init } => {
                let v = self.eval(init, env).await;
                if v.is_error() {
                    return v;
                }
                self.new_cell(v)
            }
            Expr::Deref { cell } => {
                let target = self.eval(cell, env).await;
                if target.is_error() {
                    return target;
                }
                let Value::RefCell(id) = &target else {
                    return Value::error(
                        ErrorCode::TypeError,
                        format!("deref requires a ref cell, got {}", target.type_name()),
                    );
                };
                self.read_cell(id)
            }
            Expr::Try {
                body,
                catch,
                fallback,
            } => {
                let v = self.eval(body, env).await;
                if v.is_error() {
                    match catch {
                        Some(Catch { param, body }) => {
                            let inner = env.extend(param.clone(), v);
                            self.eval(body, &inner).await
                        }
                        None => v,
                    }
                } else {
                    match fallback {
                        Some(fb) => self.eval(fb, env).await,
                        None => v,
                    }
                }
            }
            // --- PIR forms ---
            Expr::Par { exprs } => self.eval_par(exprs, env).await,
            Expr::Spawn { body } => match self.require_async("spawn") {
                Ok(ctx) => Value::future(self.spawn_expr(ctx, body, env)),
                Err(e) => e,
            },
            Expr::Await {
                future,
                timeout_ms,
                fallback,
            } => {
                let f = self.eval(future, env).await;
                if f.is_error() {
                    return f;
                }
                self.await_future(&f, *timeout_ms, fallback.as_deref(), env)
                    .await
            }
            Expr::Chan {
                kind, capacity, ..
            } => match self.require_async("chan") {
                Ok(ctx) => ctx.channels.create(*kind, *capacity),
                Err(e) => e,
            },
            Expr::Send { channel, value } => {
                let ctx = match self.require_async("send") {
                    Ok(ctx) => ctx,
                    Err(e) => return e,
                };
                let ch = self.eval(channel, env).await;
                if ch.is_error() {
                    return ch;
                }
                let Ok(handle) = ch.expect_channel() else {
                    return Value::error(
                        ErrorCode::TypeError,
                        format!("send requires a channel, got {}", ch.type_name()),
                    );
                };
                let v = self.eval(value, env).await;
                if v.is_error() {
                    return v;
                }
                ctx.channels
                    .send(&handle.id, v, &self.current_task())
                    .await
            }
            Expr::Recv { channel } => {
                let ctx = match self.require_async("recv") {
                    Ok(ctx) => ctx,
                    Err(e) => return e,
                };
                let ch = self.eval(channel, env).await;
                if ch.is_error() {
                    return ch;
                }
                let Ok(handle) = ch.expect_channel() else {
                    return Value::error(
                        ErrorCode::TypeError,
                        format!("recv requires a channel, got {}", ch.type_name()),
                    );
                };
                let outcome = ctx.channels.recv(&handle.id).await;
                if let (Some(race), Some(sender)) = (&ctx.race, &outcome.sender) {
                    // Completed send happens-before the matching receive
                    race.record_sync_point(&self.current_task(), &[sender.as_str()]);
                }
                outcome.value
            }
            Expr::Select {
                futures,
                timeout_ms,
                return_index,
            } => self.eval_select(futures, *timeout_ms, *return_index, env).await,
            Expr::Race { tasks } => {
                match self.eval_select(tasks, None, true, env).await {
                    Value::Select(outcome) => outcome.value.clone(),
                    other => other,
                }
            }
        }
    }

    fn require_async(&self, form: &str) -> Result<&AsyncContext, Value> {
        self.async_ctx
            .as_ref()
            .ok_or_else(|| Value::from_host_error(&SpiralError::NoAsyncContext(form.to_string())))
    }

    /// Spawn an expression body as a scheduler task; the body is evaluated
    /// under the spawning environment snapshot.
    fn spawn_expr(&self, ctx: &AsyncContext, body: &Expr, env: &ValueEnv) -> String {
        let ev = self.clone();
        let body = body.clone();
        let env = env.clone();
        ctx.sched.spawn(
            None,
            Box::pin(async move { ev.eval(&body, &env).await }) as TaskFuture,
        )
    }

    async fn eval_par(&self, exprs: &[Expr], env: &ValueEnv) -> Value {
        let ctx = match self.require_async("par") {
            Ok(ctx) => ctx.clone(),
            Err(e) => return e,
        };
        let ids: Vec<String> = exprs
            .iter()
            .map(|e| self.spawn_expr(&ctx, e, env))
            .collect();
        let mut results = Vec::with_capacity(ids.len());
        for id in &ids {
            let v = ctx.sched.await_task(id).await;
            if let Some(race) = &ctx.race {
                race.record_sync_point(&self.current_task(), &[id.as_str()]);
            }
            if v.is_error() {
                return v;
            }
            results.push(v);
        }
        Value::list(results)
    }

    /// Await a future value with an optional timeout and fallback.
    pub async fn await_future(
        &self,
        future: &Value,
        timeout_ms: Option<u64>,
        fallback: Option<&Expr>,
        env: &ValueEnv,
    ) -> Value {
        let ctx = match self.require_async("await") {
            Ok(ctx) => ctx.clone(),
            Err(e) => return e,
        };
        let Ok(handle) = future.expect_future() else {
            return Value::error(
                ErrorCode::TypeError,
                format!("await requires a future, got {}", future.type_name()),
            );
        };
        let task_id = handle.task_id.clone();
        let value = match timeout_ms {
            Some(ms) => {
                let select = SelectFuture::new(
                    Rc::clone(&ctx.sched),
                    vec![Box::pin(ctx.sched.await_task(&task_id)) as TaskFuture],
                    Some(Duration::from_millis(ms)),
                );
                let (index, value) = select.await;
                if index < 0 {
                    return match fallback {
                        Some(fb) => self.eval(fb, env).await,
                        None => Value::error(
                            ErrorCode::TimeoutError,
                            format!("await of {task_id} timed out after {ms} ms"),
                        ),
                    };
                }
                value
            }
            None => ctx.sched.await_task(&task_id).await,
        };
        if let Some(race) = &ctx.race {
            // The producer happens-before the resuming awaiter
            race.record_sync_point(&self.current_task(), &[task_id.as_str()]);
        }
        value
    }

    async fn eval_select(
        &self,
        futures: &[Expr],
        timeout_ms: Option<u64>,
        return_index: bool,
        env: &ValueEnv,
    ) -> Value {
        let ctx = match self.require_async("select") {
            Ok(ctx) => ctx.clone(),
            Err(e) => return e,
        };
        let mut task_ids = Vec::with_capacity(futures.len());
        for f in futures {
            let v = self.eval(f, env).await;
            if v.is_error() {
                return v;
            }
            let Ok(handle) = v.expect_future() else {
                return Value::error(
                    ErrorCode::TypeError,
                    format!("select requires futures, got {}", v.type_name()),
                );
            };
            task_ids.push(handle.task_id.clone());
        }
        let children: Vec<TaskFuture> = task_ids
            .iter()
            .map(|id| Box::pin(ctx.sched.await_task(id)) as TaskFuture)
            .collect();
        let select = SelectFuture::new(
            Rc::clone(&ctx.sched),
            children,
            timeout_ms.map(Duration::from_millis),
        );
        let (index, value) = select.await;
        if index >= 0 {
            if let Some(race) = &ctx.race {
                race.record_sync_point(&self.current_task(), &[task_ids[index as usize].as_str()]);
            }
        }
        if return_index {
            Value::select_outcome(index, value)
        } else if index >= 0 {
            value
        } else {
            Value::error(
                ErrorCode::SelectTimeout,
                format!(
                    "select timed out after {} ms",
                    timeout_ms.unwrap_or_default()
                ),
            )
        }
    }

    async fn eval_call(&self, op: &str, args: &[Expr], env: &ValueEnv) -> Value {
        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            let v = self.eval(arg, env).await;
            // An error operand propagates without invoking the operator
            if v.is_error() {
                return v;
            }
            evaluated.push(v);
        }
        if self.ops.lookup_qualified(op).is_some() {
            if let Err(err) = self.ops.check_values(op, &evaluated) {
                return Value::from_host_error(&err);
            }
            return self.ops.call(op, &evaluated);
        }
        // Fall back to the document's definition table
        if let Some(def) = self.doc.def(op) {
            if evaluated.len() != def.params.len() {
                return Value::from_host_error(&SpiralError::Arity {
                    name: op.to_string(),
                    expected: def.params.len(),
                    actual: evaluated.len(),
                });
            }
            let bindings = def
                .params
                .iter()
                .zip(evaluated)
                .map(|(p, v)| (p.name.clone(), v));
            let inner = ValueEnv::empty().extend_many(bindings);
            return self.eval(&def.body.clone(), &inner).await;
        }
        Value::from_host_error(&SpiralError::UnknownOperator(op.to_string()))
    }

    /// Apply a closure to evaluated arguments: arity is checked against
    /// (min = required, max = all); omitted optional parameters take their
    /// declared default, evaluated in the closure's captured environment,
    /// else the undefined sentinel.
    pub async fn apply_closure(&self, func: &Value, args: Vec<Value>) -> Value {
        let Ok(closure) = func.expect_closure() else {
            return Value::error(
                ErrorCode::TypeError,
                format!("application requires a closure, got {}", func.type_name()),
            );
        };
        let required = closure.required_arity();
        if args.len() < required || args.len() > closure.params.len() {
            return Value::from_host_error(&SpiralError::Arity {
                name: "<closure>".to_string(),
                expected: required,
                actual: args.len(),
            });
        }
        let mut env = closure.env.clone();
        for (i, param) in closure.params.iter().enumerate() {
            let bound = if i < args.len() {
                args[i].clone()
            } else if let Some(default) = &param.default {
                let v = self.eval(default, &closure.env).await;
                if v.is_error() {
                    return v;
                }
                v
            } else {
                Value::none()
            };
            env = env.extend(param.name.clone(), bound);
        }
        self.eval(&closure.body.clone(), &env).await
    }
}

/// Convert a literal payload to the value its type tag names; collection
/// literals convert element literals recursively.
pub fn convert_literal(ty: &Type, lit: &Literal) -> Value {
    fn mismatch(ty: &Type, lit: &Literal) -> Value {
        Value::error(
            ErrorCode::TypeError,
            format!("literal {} does not fit type {ty}", lit.kind_name()),
        )
    }
    match (ty, lit) {
        (Type::Bool, Literal::Bool(b)) => Value::Bool(*b),
        (Type::Int, Literal::Int(i)) => Value::Int(*i),
        (Type::Float, Literal::Float(x)) => Value::Float(*x),
        (Type::Float, Literal::Int(i)) => Value::Float(*i as f64),
        (Type::String, Literal::Str(s)) => Value::str(s.clone()),
        (Type::Void, Literal::Null) => Value::Void,
        (Type::List(elem), Literal::Seq(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let v = convert_literal(elem, item);
                if v.is_error() {
                    return v;
                }
                out.push(v);
            }
            Value::list(out)
        }
        (Type::Set(elem), Literal::Seq(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let v = convert_literal(elem, item);
                if v.is_error() {
                    return v;
                }
                out.push(v);
            }
            Value::set_from(out)
        }
        (Type::Map(key, value), Literal::Seq(pairs)) => {
            let mut out = Vec::with_capacity(pairs.len());
            for pair in pairs {
                let Literal::Seq(kv) = pair else {
                    return mismatch(ty, pair);
                };
                if kv.len() != 2 {
                    return mismatch(ty, pair);
                }
                let k = convert_literal(key, &kv[0]);
                if k.is_error() {
                    return k;
                }
                let v = convert_literal(value, &kv[1]);
                if v.is_error() {
                    return v;
                }
                out.push((k, v));
            }
            Value::map_from(out)
        }
        (Type::Option(_), Literal::Null) => Value::none(),
        (Type::Option(elem), some) => {
            let v = convert_literal(elem, some);
            if v.is_error() {
                v
            } else {
                Value::some(v)
            }
        }
        (Type::Opaque(name), Literal::Str(repr)) => {
            Value::Opaque(Rc::new(crate::value::OpaqueValue {
                type_name: name.clone(),
                repr: repr.clone(),
            }))
        }
        _ => mismatch(ty, lit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::ExprBuilder as E;
    use crate::ast::{HybridNode, Layer, NodeBody};
    use crate::effects::create_capture_effect_registry;
    use crate::registry::create_standard_registry;

    fn doc_with(nodes: Vec<HybridNode>, result: &str) -> Rc<Document> {
        Rc::new(Document::new(
            "1.0.0".to_string(),
            Layer::Eir,
            vec![],
            vec![],
            vec![],
            nodes,
            result.to_string(),
        ))
    }

    fn expr_node(id: &str, expr: Expr) -> HybridNode {
        HybridNode {
            id: id.to_string(),
            ty: None,
            body: NodeBody::Expr(expr),
        }
    }

    fn evaluator(nodes: Vec<HybridNode>, result: &str) -> Evaluator {
        Evaluator::new(
            doc_with(nodes, result),
            Rc::new(create_standard_registry()),
            Rc::new(create_capture_effect_registry(vec![], 7)),
            EvalOptions::default(),
        )
    }

    fn eval_result(nodes: Vec<HybridNode>, result: &str) -> Value {
        evaluator(nodes, result).eval_result_sync()
    }

    #[test]
    fn test_arithmetic_over_node_refs() {
        let out = eval_result(
            vec![
                expr_node("a", E::int(2)),
                expr_node("b", E::int(3)),
                expr_node("r", E::call("core:add", vec![E::var("a"), E::var("b")])),
            ],
            "r",
        );
        assert_eq!(out, Value::Int(5));
    }

    #[test]
    fn test_let_and_if() {
        let expr = E::let_("x", E::int(10), E::if_(
            E::call("core:gt", vec![E::var("x"), E::int(5)]),
            E::str("big"),
            E::str("small"),
        ));
        let out = eval_result(vec![expr_node("r", expr)], "r");
        assert_eq!(out, Value::str("big"));
    }

    #[test]
    fn test_unbound_identifier() {
        let out = eval_result(vec![expr_node("r", E::var("nope"))], "r");
        assert_eq!(out.error_code(), Some(ErrorCode::UnboundIdentifier));
    }

    #[test]
    fn test_closure_application() {
        let double = E::lambda(
            vec!["x"],
            E::call("core:mul", vec![E::var("x"), E::int(2)]),
        );
        let out = eval_result(
            vec![expr_node("r", E::apply(double, vec![E::int(21)]))],
            "r",
        );
        assert_eq!(out, Value::Int(42));
    }

    #[test]
    fn test_closure_captures_environment() {
        // let k = 5 in (λx. x + k) 1
        let lam = E::lambda(vec!["x"], E::call("core:add", vec![E::var("x"), E::var("k")]));
        let expr = E::let_("k", E::int(5), E::apply(lam, vec![E::int(1)]));
        assert_eq!(eval_result(vec![expr_node("r", expr)], "r"), Value::Int(6));
    }

    #[test]
    fn test_fix_factorial() {
        // fix(λfact. λn. if n ≤ 1 then 1 else n · fact(n − 1)) 5
        let fact_body = E::lambda(
            vec!["n"],
            E::if_(
                E::call("core:le", vec![E::var("n"), E::int(1)]),
                E::int(1),
                E::call(
                    "core:mul",
                    vec![
                        E::var("n"),
                        E::apply(
                            E::var("fact"),
                            vec![E::call("core:sub", vec![E::var("n"), E::int(1)])],
                        ),
                    ],
                ),
            ),
        );
        let fixed = E::fix(E::lambda(vec!["fact"], fact_body));
        let out = eval_result(
            vec![expr_node("r", E::apply(fixed, vec![E::int(5)]))],
            "r",
        );
        assert_eq!(out, Value::Int(120));
    }

    #[test]
    fn test_optional_default_uses_captured_env() {
        // let base = 100 in (λ(x, y = base + 1). x + y)(1)
        let lam = Expr::Lambda {
            params: Rc::new(vec![
                Param::required("x"),
                Param {
                    name: "y".to_string(),
                    optional: true,
                    default: Some(Rc::new(E::call(
                        "core:add",
                        vec![E::var("base"), E::int(1)],
                    ))),
                    ty: None,
                },
            ]),
            body: Rc::new(E::call("core:add", vec![E::var("x"), E::var("y")])),
        };
        let expr = E::let_("base", E::int(100), E::apply(lam, vec![E::int(1)]));
        assert_eq!(eval_result(vec![expr_node("r", expr)], "r"), Value::Int(102));
    }

    #[test]
    fn test_omitted_optional_without_default_is_none() {
        let lam = Expr::Lambda {
            params: Rc::new(vec![
                Param::required("x"),
                Param {
                    name: "y".to_string(),
                    optional: true,
                    default: None,
                    ty: None,
                },
            ]),
            body: Rc::new(E::var("y")),
        };
        let out = eval_result(
            vec![expr_node("r", E::apply(lam, vec![E::int(1)]))],
            "r",
        );
        assert_eq!(out, Value::none());
    }

    #[test]
    fn test_arity_errors() {
        let lam = E::lambda(vec!["x"], E::var("x"));
        let out = eval_result(vec![expr_node("r", E::apply(lam, vec![]))], "r");
        assert_eq!(out.error_code(), Some(ErrorCode::ArityError));
    }

    #[test]
    fn test_ref_cells() {
        // let c = ref(1) in (c := 2; !c)
        let expr = E::let_(
            "c",
            E::ref_new(E::int(1)),
            E::seq(
                E::assign(E::var("c"), E::int(2)),
                E::deref(E::var("c")),
            ),
        );
        assert_eq!(eval_result(vec![expr_node("r", expr)], "r"), Value::Int(2));
    }

    #[test]
    fn test_while_loop_counts_down() {
        // let c = ref(5) in (while !c > 0 { c := !c − 1 }; !c)
        let body = E::assign(
            E::var("c"),
            E::call("core:sub", vec![E::deref(E::var("c")), E::int(1)]),
        );
        let expr = E::let_(
            "c",
            E::ref_new(E::int(5)),
            E::seq(
                E::while_(
                    E::call("core:gt", vec![E::deref(E::var("c")), E::int(0)]),
                    body,
                ),
                E::deref(E::var("c")),
            ),
        );
        assert_eq!(eval_result(vec![expr_node("r", expr)], "r"), Value::Int(0));
    }

    #[test]
    fn test_for_loop_half_open() {
        // let c = ref(0) in (for i in [0, 4) { c := !c + i }; !c)
        let body = E::assign(
            E::var("c"),
            E::call("core:add", vec![E::deref(E::var("c")), E::var("i")]),
        );
        let expr = E::let_(
            "c",
            E::ref_new(E::int(0)),
            E::seq(
                E::for_("i", E::int(0), E::int(4), body),
                E::deref(E::var("c")),
            ),
        );
        assert_eq!(eval_result(vec![expr_node("r", expr)], "r"), Value::Int(6));
    }

    #[test]
    fn test_nontermination() {
        let mut ev = evaluator(
            vec![expr_node("r", E::while_(E::bool(true), E::int(1)))],
            "r",
        );
        ev.options.max_steps = 50;
        ev.budget = StepBudget::new(50, 16);
        let out = ev.eval_result_sync();
        assert_eq!(out.error_code(), Some(ErrorCode::NonTermination));
    }

    #[test]
    fn test_try_catches_error_value() {
        // try { 1 / 0 } catch e { 99 }
        let expr = Expr::Try {
            body: Box::new(E::call("core:div", vec![E::int(1), E::int(0)])),
            catch: Some(Catch {
                param: "e".to_string(),
                body: Box::new(E::int(99)),
            }),
            fallback: None,
        };
        assert_eq!(eval_result(vec![expr_node("r", expr)], "r"), Value::Int(99));
    }

    #[test]
    fn test_try_fallback_replaces_success() {
        let expr = Expr::Try {
            body: Box::new(E::int(1)),
            catch: None,
            fallback: Some(Box::new(E::int(7))),
        };
        assert_eq!(eval_result(vec![expr_node("r", expr)], "r"), Value::Int(7));
    }

    #[test]
    fn test_effects_are_logged() {
        let ev = evaluator(
            vec![expr_node(
                "r",
                E::seq(
                    E::effect("print", vec![E::str("hello")]),
                    E::effect("print", vec![E::str("world")]),
                ),
            )],
            "r",
        );
        assert_eq!(ev.eval_result_sync(), Value::Void);
        let log = ev.effect_log().all();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].effect, "print");
        assert_eq!(log[0].task, "main");
        assert!(log[0].seq < log[1].seq);
    }

    #[test]
    fn test_node_memoisation() {
        // Both b and c reference a; the effect in a must run once
        let ev = evaluator(
            vec![
                expr_node("a", E::seq(E::effect("print", vec![E::str("once")]), E::int(1))),
                expr_node(
                    "r",
                    E::call("core:add", vec![E::var("a"), E::var("a")]),
                ),
            ],
            "r",
        );
        assert_eq!(ev.eval_result_sync(), Value::Int(2));
        assert_eq!(ev.effect_log().len(), 1);
    }

    #[test]
    fn test_pir_form_without_async_context() {
        let out = eval_result(vec![expr_node("r", Expr::Spawn { body: Box::new(E::int(1)) })], "r");
        assert_eq!(out.error_code(), Some(ErrorCode::DomainError));
    }

    #[test]
    fn test_literal_conversion() {
        assert_eq!(
            convert_literal(&Type::list(Type::Int), &Literal::Seq(vec![
                Literal::Int(1),
                Literal::Int(2)
            ])),
            Value::list(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            convert_literal(&Type::option(Type::Int), &Literal::Null),
            Value::none()
        );
        assert_eq!(
            convert_literal(&Type::option(Type::Int), &Literal::Int(3)),
            Value::some(Value::Int(3))
        );
        assert_eq!(
            convert_literal(&Type::Float, &Literal::Int(2)),
            Value::Float(2.0)
        );
        assert!(convert_literal(&Type::Int, &Literal::Bool(true)).is_error());
    }
}
