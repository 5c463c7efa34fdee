//! # CFG Executor (LIR)
//!
//! Block walker for LIR block nodes: execute each instruction of the
//! current block in declared order, execute the terminator to obtain the
//! next block or a terminating value, remember the previous block for phi
//! resolution, and stop on `return`/`exit`.
//!
//! **Phi resolution**: the source whose predecessor-block equals the
//! previous block wins; with no such source (first visit to the entry block
//! or a permissive non-SSA program) the first source whose variable is
//! bound in the variable table is taken — this keeps loop-entry phis
//! correct on the initial iteration.
//!
//! Every instruction and terminator counts one step against the evaluator's
//! budget; revisits of a block are permitted (loops require them), each one
//! testing the budget. The asynchronous PIR extension lives in
//! [`async_exec`].

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::ast::{Instruction, NodeBody, Operand, PhiSource, Terminator};
use crate::env::ValueEnv;
use crate::error::ErrorCode;
use crate::eval::{convert_literal, Evaluator};
use crate::runtime::block_on_sync;
use crate::value::Value;

pub mod async_exec;

/// Resolve a value operand against the variable table.
pub(crate) fn resolve_operand(vars: &HashMap<String, Value>, operand: &Operand) -> Value {
    match operand {
        Operand::Var(name) => match vars.get(name) {
            Some(v) => v.clone(),
            None => Value::error(
                ErrorCode::UnboundIdentifier,
                format!("unbound variable '{name}'"),
            ),
        },
        Operand::Lit { ty, value } => convert_literal(ty, value),
    }
}

/// Resolve a phi against the previous block, falling back to the first
/// source whose variable is bound.
pub(crate) fn resolve_phi(
    vars: &HashMap<String, Value>,
    sources: &[PhiSource],
    previous: Option<&str>,
) -> Value {
    if let Some(prev) = previous {
        if let Some(source) = sources.iter().find(|s| s.block == prev) {
            return match vars.get(&source.var) {
                Some(v) => v.clone(),
                None => Value::error(
                    ErrorCode::UnboundIdentifier,
                    format!("phi source variable '{}' is unbound", source.var),
                ),
            };
        }
    }
    for source in sources {
        if let Some(v) = vars.get(&source.var) {
            return v.clone();
        }
    }
    Value::error(ErrorCode::UnboundIdentifier, "no phi source is bound")
}

/// Synchronous executor for one LIR block node.
pub struct LirEvaluator<'a> {
    ev: &'a Evaluator,
    vars: HashMap<String, Value>,
    env: ValueEnv,
    visited: HashSet<String>,
}

impl<'a> LirEvaluator<'a> {
    pub fn new(ev: &'a Evaluator) -> Self {
        LirEvaluator {
            ev,
            vars: HashMap::new(),
            env: ValueEnv::empty(),
            visited: HashSet::new(),
        }
    }

    fn bind(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value.clone());
        self.env = self.env.extend(name.to_string(), value);
    }

    fn budget_step(&self) -> Result<(), Value> {
        self.ev
            .budget()
            .consume(1)
            .map_err(|err| Value::from_host_error(&err))
    }

    /// Walk the block node `node_id` from its entry block.
    pub fn run_node(mut self, node_id: &str) -> Value {
        let doc = self.ev.document().clone();
        let Some(node) = doc.node(node_id) else {
            return Value::error(
                ErrorCode::UnboundIdentifier,
                format!("unknown node '{node_id}'"),
            );
        };
        let NodeBody::Blocks { entry, .. } = &node.body else {
            return Value::error(
                ErrorCode::DomainError,
                format!("node '{node_id}' is not a block node"),
            );
        };

        let mut current = entry.clone();
        let mut previous: Option<String> = None;
        loop {
            let Some(block) = node.block(&current) else {
                return Value::error(
                    ErrorCode::DomainError,
                    format!("unknown block '{current}' in node '{node_id}'"),
                );
            };
            if !self.visited.insert(current.clone()) {
                trace!(block = %current, "block revisit");
            }

            for ins in &block.instructions {
                if let Err(stop) = self.budget_step() {
                    return stop;
                }
                if let Err(stop) = self.execute(ins, previous.as_deref()) {
                    return stop;
                }
            }

            if let Err(stop) = self.budget_step() {
                return stop;
            }
            match &block.terminator {
                Terminator::Jump { to } => {
                    previous = Some(current);
                    current = to.clone();
                }
                Terminator::Branch { cond, then, els } => {
                    let c = resolve_operand(&self.vars, cond);
                    if c.is_error() {
                        return c;
                    }
                    let taken = match c.expect_bool() {
                        Ok(b) => b,
                        Err(err) => return Value::from_host_error(&err),
                    };
                    previous = Some(current);
                    current = if taken { then.clone() } else { els.clone() };
                }
                Terminator::Return { value } => {
                    return match value {
                        Some(op) => resolve_operand(&self.vars, op),
                        None => Value::Void,
                    };
                }
                Terminator::Exit { code } => {
                    return match code {
                        Some(op) => resolve_operand(&self.vars, op),
                        None => Value::Void,
                    };
                }
                other => {
                    return Value::error(
                        ErrorCode::DomainError,
                        format!(
                            "terminator '{}' requires asynchronous execution",
                            other.kind_name()
                        ),
                    );
                }
            }
        }
    }

    fn execute(&mut self, ins: &Instruction, previous: Option<&str>) -> Result<(), Value> {
        match ins {
            Instruction::Assign { target, expr } => {
                let v = self.ev.eval_sync(expr, &self.env);
                if v.is_error() {
                    return Err(v);
                }
                self.bind(target, v);
            }
            Instruction::Op {
                target,
                operator,
                operands,
            } => {
                let mut args = Vec::with_capacity(operands.len());
                for op in operands {
                    let v = resolve_operand(&self.vars, op);
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
                self.bind(target, out);
            }
            Instruction::Call {
                target,
                callee,
                operands,
            } => {
                let f = resolve_operand(&self.vars, callee);
                if f.is_error() {
                    return Err(f);
                }
                let mut args = Vec::with_capacity(operands.len());
                for op in operands {
                    let v = resolve_operand(&self.vars, op);
                    if v.is_error() {
                        return Err(v);
                    }
                    args.push(v);
                }
                let out = match block_on_sync(self.ev.apply_closure(&f, args)) {
                    Ok(v) => v,
                    Err(err) => Value::from_host_error(&err),
                };
                if out.is_error() {
                    return Err(out);
                }
                self.bind(target, out);
            }
            Instruction::Phi { target, sources } => {
                let v = resolve_phi(&self.vars, sources, previous);
                if v.is_error() {
                    return Err(v);
                }
                self.bind(target, v);
            }
            Instruction::Effect {
                target,
                effect,
                operands,
            } => {
                let mut args = Vec::with_capacity(operands.len());
                for op in operands {
                    let v = resolve_operand(&self.vars, op);
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
                self.bind(target, out);
            }
            Instruction::AssignRef { target, value } => {
                let Some(cell) = self.vars.get(target).cloned() else {
                    return Err(Value::error(
                        ErrorCode::UnboundIdentifier,
                        format!("unbound variable '{target}'"),
                    ));
                };
                let Value::RefCell(id) = &cell else {
                    return Err(Value::error(
                        ErrorCode::TypeError,
                        format!("assignRef target must hold a ref cell, got {}", cell.type_name()),
                    ));
                };
                let v = resolve_operand(&self.vars, value);
                if v.is_error() {
                    return Err(v);
                }
                let out = self.ev.write_cell(id, v);
                if out.is_error() {
                    return Err(out);
                }
            }
            other => {
                return Err(Value::error(
                    ErrorCode::DomainError,
                    format!(
                        "instruction '{}' requires asynchronous execution",
                        other.kind_name()
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{block, DocumentBuilder, ExprBuilder as E};
    use crate::ast::{Layer, Terminator};
    use crate::effects::create_capture_effect_registry;
    use crate::eval::EvalOptions;
    use crate::registry::create_standard_registry;
    use std::rc::Rc;

    fn run(doc: crate::ast::Document) -> Value {
        let ev = Evaluator::new(
            Rc::new(doc),
            Rc::new(create_standard_registry()),
            Rc::new(create_capture_effect_registry(vec![], 7)),
            EvalOptions::default(),
        );
        ev.eval_result_sync()
    }

    #[test]
    fn test_straight_line_block() {
        // b0: x = 2; y = x * 3; return y
        let doc = DocumentBuilder::new(Layer::Lir, "1.0.0")
            .block_node(
                "main",
                "b0",
                vec![block("b0")
                    .assign("x", E::int(2))
                    .op("y", "core:mul", vec![Operand::Var("x".into()), E::int_operand(3)])
                    .ret_var("y")
                    .build()],
            )
            .result("main")
            .build();
        assert_eq!(run(doc), Value::Int(6));
    }

    #[test]
    fn test_branch_dispatch() {
        let doc = DocumentBuilder::new(Layer::Lir, "1.0.0")
            .block_node(
                "main",
                "b0",
                vec![
                    block("b0")
                        .assign("c", E::bool(false))
                        .terminator(Terminator::Branch {
                            cond: Operand::Var("c".into()),
                            then: "bt".into(),
                            els: "bf".into(),
                        })
                        .build(),
                    block("bt").assign("r", E::int(1)).ret_var("r").build(),
                    block("bf").assign("r", E::int(2)).ret_var("r").build(),
                ],
            )
            .result("main")
            .build();
        assert_eq!(run(doc), Value::Int(2));
    }

    #[test]
    fn test_branch_requires_bool() {
        let doc = DocumentBuilder::new(Layer::Lir, "1.0.0")
            .block_node(
                "main",
                "b0",
                vec![
                    block("b0")
                        .assign("c", E::int(1))
                        .terminator(Terminator::Branch {
                            cond: Operand::Var("c".into()),
                            then: "bt".into(),
                            els: "bt".into(),
                        })
                        .build(),
                    block("bt").ret().build(),
                ],
            )
            .result("main")
            .build();
        assert_eq!(run(doc).error_code(), Some(ErrorCode::TypeError));
    }

    #[test]
    fn test_while_countdown_with_phi() {
        // b0: i = 5 → b1
        // b1: n = φ((b0, i), (b2, m)); t = n > 0; branch t → b2 / bexit
        // b2: m = n − 1 → b1
        // bexit: return n
        let doc = DocumentBuilder::new(Layer::Lir, "1.0.0")
            .block_node(
                "main",
                "b0",
                vec![
                    block("b0").assign("i", E::int(5)).jump("b1").build(),
                    block("b1")
                        .phi("n", vec![("b0", "i"), ("b2", "m")])
                        .op("t", "core:gt", vec![Operand::Var("n".into()), E::int_operand(0)])
                        .terminator(Terminator::Branch {
                            cond: Operand::Var("t".into()),
                            then: "b2".into(),
                            els: "bexit".into(),
                        })
                        .build(),
                    block("b2")
                        .op("m", "core:sub", vec![Operand::Var("n".into()), E::int_operand(1)])
                        .jump("b1")
                        .build(),
                    block("bexit").ret_var("n").build(),
                ],
            )
            .result("main")
            .build();
        assert_eq!(run(doc), Value::Int(0));
    }

    #[test]
    fn test_phi_fallback_first_bound_source() {
        // Entering b1 straight from the entry, the (bX, i) source matches no
        // predecessor; the bound fallback keeps the phi live
        let doc = DocumentBuilder::new(Layer::Lir, "1.0.0")
            .block_node(
                "main",
                "b0",
                vec![
                    block("b0").assign("i", E::int(7)).jump("b1").build(),
                    block("b1")
                        .phi("n", vec![("b2", "ghost"), ("b2", "i")])
                        .ret_var("n")
                        .build(),
                    block("b2").ret().build(),
                ],
            )
            .result("main")
            .build();
        assert_eq!(run(doc), Value::Int(7));
    }

    #[test]
    fn test_effect_instruction_logs() {
        let doc = DocumentBuilder::new(Layer::Lir, "1.0.0")
            .block_node(
                "main",
                "b0",
                vec![block("b0")
                    .effect("e", "print", vec![E::str_operand("hi")])
                    .ret()
                    .build()],
            )
            .result("main")
            .build();
        let ev = Evaluator::new(
            Rc::new(doc),
            Rc::new(create_standard_registry()),
            Rc::new(create_capture_effect_registry(vec![], 7)),
            EvalOptions::default(),
        );
        assert_eq!(ev.eval_result_sync(), Value::Void);
        assert_eq!(ev.effect_log().len(), 1);
        assert_eq!(ev.effect_log().all()[0].effect, "print");
    }

    #[test]
    fn test_exit_publishes_code() {
        let doc = DocumentBuilder::new(Layer::Lir, "1.0.0")
            .block_node(
                "main",
                "b0",
                vec![block("b0")
                    .assign("code", E::int(3))
                    .terminator(Terminator::Exit {
                        code: Some(Operand::Var("code".into())),
                    })
                    .build()],
            )
            .result("main")
            .build();
        assert_eq!(run(doc), Value::Int(3));
    }

    #[test]
    fn test_infinite_loop_hits_step_budget() {
        let doc = DocumentBuilder::new(Layer::Lir, "1.0.0")
            .block_node(
                "main",
                "b0",
                vec![block("b0").jump("b0").build()],
            )
            .result("main")
            .build();
        let ev = Evaluator::new(
            Rc::new(doc),
            Rc::new(create_standard_registry()),
            Rc::new(create_capture_effect_registry(vec![], 7)),
            EvalOptions {
                max_steps: 64,
                trace: false,
            },
        );
        assert_eq!(
            ev.eval_result_sync().error_code(),
            Some(ErrorCode::NonTermination)
        );
    }

    #[test]
    fn test_assign_ref_instruction() {
        // c = refNew(1); assignRef c ← 9; d = deref(c); return d
        let doc = DocumentBuilder::new(Layer::Lir, "1.0.0")
            .block_node(
                "main",
                "b0",
                vec![block("b0")
                    .assign("c", E::ref_new(E::int(1)))
                    .instruction(Instruction::AssignRef {
                        target: "c".into(),
                        value: E::int_operand(9),
                    })
                    .assign("d", E::deref(E::var("c")))
                    .ret_var("d")
                    .build()],
            )
            .result("main")
            .build();
        assert_eq!(run(doc), Value::Int(9));
    }
}
