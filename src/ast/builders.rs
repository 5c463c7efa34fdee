//! Builder Patterns for AST Construction
//!
//! Fluent APIs for constructing expressions, blocks and documents,
//! particularly useful for tests.
//!
//! ## Example
//!
//! ```rust
//! use spiral::ast::builders::{DocumentBuilder, ExprBuilder as E};
//! use spiral::ast::Layer;
//!
//! // 2 + 3 over two expression nodes
//! let doc = DocumentBuilder::new(Layer::Air, "1.0.0")
//!     .expr_node("a", E::int(2))
//!     .expr_node("b", E::int(3))
//!     .expr_node("r", E::call("core:add", vec![E::var("a"), E::var("b")]))
//!     .result("r")
//!     .build();
//! assert_eq!(doc.nodes.len(), 3);
//! ```

use std::rc::Rc;

use super::{
    Block, Document, Expr, HybridNode, Instruction, Layer, Literal, NodeBody, Operand, Param,
    PhiSource, Terminator,
};
use crate::types::Type;

/// Expression constructors.
pub struct ExprBuilder;

impl ExprBuilder {
    pub fn int(n: i64) -> Expr {
        Expr::Lit {
            ty: Type::Int,
            value: Literal::Int(n),
        }
    }

    pub fn float(x: f64) -> Expr {
        Expr::Lit {
            ty: Type::Float,
            value: Literal::Float(x),
        }
    }

    pub fn bool(b: bool) -> Expr {
        Expr::Lit {
            ty: Type::Bool,
            value: Literal::Bool(b),
        }
    }

    pub fn str(s: &str) -> Expr {
        Expr::Lit {
            ty: Type::String,
            value: Literal::Str(s.to_string()),
        }
    }

    pub fn var(name: &str) -> Expr {
        Expr::Var {
            name: name.to_string(),
        }
    }

    pub fn call(op: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            op: op.to_string(),
            args,
        }
    }

    pub fn if_(cond: Expr, then: Expr, els: Expr) -> Expr {
        Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            els: Box::new(els),
        }
    }

    pub fn let_(name: &str, value: Expr, body: Expr) -> Expr {
        Expr::Let {
            name: name.to_string(),
            value: Box::new(value),
            body: Box::new(body),
        }
    }

    /// Lambda over required parameters only.
    pub fn lambda(params: Vec<&str>, body: Expr) -> Expr {
        Expr::Lambda {
            params: Rc::new(params.into_iter().map(Param::required).collect()),
            body: Rc::new(body),
        }
    }

    pub fn apply(func: Expr, args: Vec<Expr>) -> Expr {
        Expr::Apply {
            func: Box::new(func),
            args,
        }
    }

    pub fn fix(func: Expr) -> Expr {
        Expr::Fix {
            func: Box::new(func),
        }
    }

    pub fn seq(first: Expr, second: Expr) -> Expr {
        Expr::Seq {
            first: Box::new(first),
            second: Box::new(second),
        }
    }

    pub fn assign(cell: Expr, value: Expr) -> Expr {
        Expr::Assign {
            cell: Box::new(cell),
            value: Box::new(value),
        }
    }

    pub fn while_(cond: Expr, body: Expr) -> Expr {
        Expr::While {
            cond: Box::new(cond),
            body: Box::new(body),
        }
    }

    pub fn for_(var: &str, from: Expr, to: Expr, body: Expr) -> Expr {
        Expr::For {
            var: var.to_string(),
            from: Box::new(from),
            to: Box::new(to),
            body: Box::new(body),
        }
    }

    pub fn iter(var: &str, collection: Expr, body: Expr) -> Expr {
        Expr::Iter {
            var: var.to_string(),
            collection: Box::new(collection),
            body: Box::new(body),
        }
    }

    pub fn effect(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Effect {
            effect: name.to_string(),
            args,
        }
    }

    pub fn ref_new(init: Expr) -> Expr {
        Expr::RefNew {
            init: Box::new(init),
        }
    }

    pub fn deref(cell: Expr) -> Expr {
        Expr::Deref {
            cell: Box::new(cell),
        }
    }

    pub fn spawn(body: Expr) -> Expr {
        Expr::Spawn {
            body: Box::new(body),
        }
    }

    pub fn await_(future: Expr) -> Expr {
        Expr::Await {
            future: Box::new(future),
            timeout_ms: None,
            fallback: None,
        }
    }

    pub fn send(channel: Expr, value: Expr) -> Expr {
        Expr::Send {
            channel: Box::new(channel),
            value: Box::new(value),
        }
    }

    pub fn recv(channel: Expr) -> Expr {
        Expr::Recv {
            channel: Box::new(channel),
        }
    }

    /// Integer literal operand.
    pub fn int_operand(n: i64) -> Operand {
        Operand::Lit {
            ty: Type::Int,
            value: Literal::Int(n),
        }
    }

    /// String literal operand.
    pub fn str_operand(s: &str) -> Operand {
        Operand::Lit {
            ty: Type::String,
            value: Literal::Str(s.to_string()),
        }
    }
}

/// Start a block builder.
pub fn block(id: &str) -> BlockBuilder {
    BlockBuilder {
        id: id.to_string(),
        instructions: Vec::new(),
        terminator: None,
    }
}

/// Builder for one basic block.
pub struct BlockBuilder {
    id: String,
    instructions: Vec<Instruction>,
    terminator: Option<Terminator>,
}

impl BlockBuilder {
    pub fn assign(mut self, target: &str, expr: Expr) -> Self {
        self.instructions.push(Instruction::Assign {
            target: target.to_string(),
            expr,
        });
        self
    }

    pub fn op(mut self, target: &str, operator: &str, operands: Vec<Operand>) -> Self {
        self.instructions.push(Instruction::Op {
            target: target.to_string(),
            operator: operator.to_string(),
            operands,
        });
        self
    }

    pub fn phi(mut self, target: &str, sources: Vec<(&str, &str)>) -> Self {
        self.instructions.push(Instruction::Phi {
            target: target.to_string(),
            sources: sources
                .into_iter()
                .map(|(block, var)| PhiSource {
                    block: block.to_string(),
                    var: var.to_string(),
                })
                .collect(),
        });
        self
    }

    pub fn effect(mut self, target: &str, effect: &str, operands: Vec<Operand>) -> Self {
        self.instructions.push(Instruction::Effect {
            target: target.to_string(),
            effect: effect.to_string(),
            operands,
        });
        self
    }

    pub fn spawn(mut self, target: &str, node: &str, task: Option<&str>) -> Self {
        self.instructions.push(Instruction::Spawn {
            target: target.to_string(),
            node: node.to_string(),
            task: task.map(str::to_string),
        });
        self
    }

    pub fn await_ins(mut self, target: &str, future: Operand) -> Self {
        self.instructions.push(Instruction::Await {
            target: target.to_string(),
            future,
        });
        self
    }

    pub fn instruction(mut self, ins: Instruction) -> Self {
        self.instructions.push(ins);
        self
    }

    pub fn jump(mut self, to: &str) -> Self {
        self.terminator = Some(Terminator::Jump { to: to.to_string() });
        self
    }

    /// `return` with no operand.
    pub fn ret(mut self) -> Self {
        self.terminator = Some(Terminator::Return { value: None });
        self
    }

    /// `return <var>`.
    pub fn ret_var(mut self, var: &str) -> Self {
        self.terminator = Some(Terminator::Return {
            value: Some(Operand::Var(var.to_string())),
        });
        self
    }

    pub fn terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = Some(terminator);
        self
    }

    pub fn build(self) -> Block {
        Block {
            id: self.id,
            instructions: self.instructions,
            terminator: self.terminator.unwrap_or(Terminator::Return { value: None }),
        }
    }
}

/// Builder for whole documents.
pub struct DocumentBuilder {
    version: String,
    layer: Layer,
    capabilities: Vec<String>,
    nodes: Vec<HybridNode>,
    result: String,
}

impl DocumentBuilder {
    pub fn new(layer: Layer, version: &str) -> Self {
        DocumentBuilder {
            version: version.to_string(),
            layer,
            capabilities: Vec::new(),
            nodes: Vec::new(),
            result: String::new(),
        }
    }

    pub fn capability(mut self, cap: &str) -> Self {
        self.capabilities.push(cap.to_string());
        self
    }

    pub fn expr_node(mut self, id: &str, expr: Expr) -> Self {
        self.nodes.push(HybridNode {
            id: id.to_string(),
            ty: None,
            body: NodeBody::Expr(expr),
        });
        self
    }

    pub fn block_node(mut self, id: &str, entry: &str, blocks: Vec<Block>) -> Self {
        self.nodes.push(HybridNode {
            id: id.to_string(),
            ty: None,
            body: NodeBody::Blocks {
                blocks,
                entry: entry.to_string(),
            },
        });
        self
    }

    pub fn result(mut self, id: &str) -> Self {
        self.result = id.to_string();
        self
    }

    pub fn build(self) -> Document {
        Document::new(
            self.version,
            self.layer,
            self.capabilities,
            Vec::new(),
            Vec::new(),
            self.nodes,
            self.result,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExprBuilder as E;

    #[test]
    fn test_expr_builders() {
        let e = E::let_("x", E::int(1), E::call("core:add", vec![E::var("x"), E::int(2)]));
        assert_eq!(e.kind_name(), "let");
    }

    #[test]
    fn test_block_builder_defaults_to_return() {
        let b = block("b0").assign("x", E::int(1)).build();
        assert_eq!(b.id, "b0");
        assert_eq!(b.instructions.len(), 1);
        assert_eq!(b.terminator, Terminator::Return { value: None });
    }

    #[test]
    fn test_document_builder() {
        let doc = DocumentBuilder::new(Layer::Lir, "1.0.0")
            .expr_node("a", E::int(1))
            .block_node("m", "b0", vec![block("b0").ret().build()])
            .result("m")
            .build();
        assert!(doc.node("a").is_some());
        assert!(doc.node("m").is_some_and(HybridNode::is_block_node));
    }
}
