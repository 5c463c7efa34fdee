//! # Document AST
//!
//! Typed representations for SPIRAL documents across all five layers:
//! expressions (AIR/CIR/EIR plus the PIR async forms), CFG instructions and
//! terminators (LIR/PIR), hybrid nodes, and the document container.
//!
//! Documents are produced by the [`validator`](crate::validator) from an
//! untyped JSON tree and treated as immutable afterwards.
//!
//! ## Builders
//!
//! For programmatic construction of documents and expressions, see the
//! [`builders`] module which provides fluent APIs like `ExprBuilder` and
//! `DocumentBuilder`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::types::{ChannelKind, Type};

pub mod builders;

// ============================================================================
// Layers
// ============================================================================

/// The five IR dialects, ordered by expressive power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Arithmetic/algebraic IR: pure first-order expressions over operators
    Air,
    /// Closure IR: adds lambda, function application, fix
    Cir,
    /// Effectful IR: adds sequencing, reference cells, effects, loops, try
    Eir,
    /// Low-level IR: basic-block CFGs with SSA phi nodes
    Lir,
    /// Parallel IR: async tasks, channels, fork/join/suspend
    Pir,
}

impl Layer {
    /// Required major component of the document version string.
    pub fn required_major(&self) -> u64 {
        match self {
            Layer::Air | Layer::Cir | Layer::Eir | Layer::Lir => 1,
            Layer::Pir => 2,
        }
    }

    /// File-extension spelling (`air`, `cir`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Air => "air",
            Layer::Cir => "cir",
            Layer::Eir => "eir",
            Layer::Lir => "lir",
            Layer::Pir => "pir",
        }
    }

    /// Infer the layer from a document path: extension first
    /// (`.lir.json` / `.lir`), then path segments (`/lir/`), defaulting to
    /// AIR.
    pub fn infer_from_path(path: &str) -> Layer {
        let lower = path.to_lowercase();
        for layer in [Layer::Pir, Layer::Lir, Layer::Eir, Layer::Cir, Layer::Air] {
            let ext = layer.as_str();
            if lower.ends_with(&format!(".{ext}.json")) || lower.ends_with(&format!(".{ext}")) {
                return layer;
            }
        }
        for layer in [Layer::Pir, Layer::Lir, Layer::Eir, Layer::Cir, Layer::Air] {
            if lower.contains(&format!("/{}/", layer.as_str())) {
                return layer;
            }
        }
        Layer::Air
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Literals
// ============================================================================

/// Raw literal payload as it appears on the wire. Conversion to a runtime
/// value is driven by the literal's declared type tag at evaluation time;
/// collection literals convert element literals recursively.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// `null` — void, or the empty option payload
    Null,
    /// Array payload for list/set/map literals (maps are arrays of pairs)
    Seq(Vec<Literal>),
}

impl Literal {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Literal::Bool(_) => "bool",
            Literal::Int(_) => "int",
            Literal::Float(_) => "float",
            Literal::Str(_) => "string",
            Literal::Null => "null",
            Literal::Seq(_) => "array",
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// A lambda parameter: name, optional flag, optional default expression and
/// optional type annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub optional: bool,
    pub default: Option<Rc<Expr>>,
    pub ty: Option<Type>,
}

impl Param {
    pub fn required(name: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            optional: false,
            default: None,
            ty: None,
        }
    }
}

/// The closed expression sum across AIR, CIR, EIR and the PIR async forms.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal with a declared type tag
    Lit { ty: Type, value: Literal },
    /// Variable reference; unbound names fall back to the document node map
    Var { name: String },
    /// Definition reference (`namespace:name`, namespace defaults to `user`)
    Ref {
        namespace: Option<String>,
        name: String,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },
    Let {
        name: String,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    /// Namespaced operator call, e.g. `core:add`; falls back to the
    /// definition table when the registry has no such operator
    Call { op: String, args: Vec<Expr> },
    // --- CIR ---
    Lambda {
        params: Rc<Vec<Param>>,
        body: Rc<Expr>,
    },
    Apply { func: Box<Expr>, args: Vec<Expr> },
    Fix { func: Box<Expr> },
    // --- EIR ---
    Seq { first: Box<Expr>, second: Box<Expr> },
    Assign { cell: Box<Expr>, value: Box<Expr> },
    While { cond: Box<Expr>, body: Box<Expr> },
    For {
        var: String,
        from: Box<Expr>,
        to: Box<Expr>,
        body: Box<Expr>,
    },
    Iter {
        var: String,
        collection: Box<Expr>,
        body: Box<Expr>,
    },
    Effect { effect: String, args: Vec<Expr> },
    RefNew { init: Box<Expr> },
    Deref { cell: Box<Expr> },
    Try {
        body: Box<Expr>,
        catch: Option<Catch>,
        fallback: Option<Box<Expr>>,
    },
    // --- PIR ---
    Par { exprs: Vec<Expr> },
    Spawn { body: Box<Expr> },
    Await {
        future: Box<Expr>,
        timeout_ms: Option<u64>,
        fallback: Option<Box<Expr>>,
    },
    Chan {
        kind: ChannelKind,
        capacity: usize,
        elem: Option<Type>,
    },
    Send { channel: Box<Expr>, value: Box<Expr> },
    Recv { channel: Box<Expr> },
    Select {
        futures: Vec<Expr>,
        timeout_ms: Option<u64>,
        return_index: bool,
    },
    Race { tasks: Vec<Expr> },
}

/// The catch arm of a `try` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Catch {
    pub param: String,
    pub body: Box<Expr>,
}

impl Expr {
    /// Wire spelling of this expression's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Lit { .. } => "lit",
            Expr::Var { .. } => "var",
            Expr::Ref { .. } => "ref",
            Expr::If { .. } => "if",
            Expr::Let { .. } => "let",
            Expr::Call { .. } => "call",
            Expr::Lambda { .. } => "lambda",
            Expr::Apply { .. } => "apply",
            Expr::Fix { .. } => "fix",
            Expr::Seq { .. } => "seq",
            Expr::Assign { .. } => "assign",
            Expr::While { .. } => "while",
            Expr::For { .. } => "for",
            Expr::Iter { .. } => "iter",
            Expr::Effect { .. } => "effect",
            Expr::RefNew { .. } => "refNew",
            Expr::Deref { .. } => "deref",
            Expr::Try { .. } => "try",
            Expr::Par { .. } => "par",
            Expr::Spawn { .. } => "spawn",
            Expr::Await { .. } => "await",
            Expr::Chan { .. } => "chan",
            Expr::Send { .. } => "send",
            Expr::Recv { .. } => "recv",
            Expr::Select { .. } => "select",
            Expr::Race { .. } => "race",
        }
    }

    /// True for the forms CIR introduces (rejected in AIR).
    pub fn is_cir_form(&self) -> bool {
        matches!(self, Expr::Lambda { .. } | Expr::Apply { .. } | Expr::Fix { .. })
    }

    /// True for the forms EIR introduces.
    pub fn is_eir_form(&self) -> bool {
        matches!(
            self,
            Expr::Seq { .. }
                | Expr::Assign { .. }
                | Expr::While { .. }
                | Expr::For { .. }
                | Expr::Iter { .. }
                | Expr::Effect { .. }
                | Expr::RefNew { .. }
                | Expr::Deref { .. }
                | Expr::Try { .. }
        )
    }

    /// True for the async/parallel forms PIR introduces.
    pub fn is_pir_form(&self) -> bool {
        matches!(
            self,
            Expr::Par { .. }
                | Expr::Spawn { .. }
                | Expr::Await { .. }
                | Expr::Chan { .. }
                | Expr::Send { .. }
                | Expr::Recv { .. }
                | Expr::Select { .. }
                | Expr::Race { .. }
        )
    }
}

// ============================================================================
// CFG instructions and terminators (LIR / PIR)
// ============================================================================

/// A value operand: a variable reference or an immediate literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Var(String),
    Lit { ty: Type, value: Literal },
}

/// One phi source: the value of `var` when control arrived from `block`.
#[derive(Debug, Clone, PartialEq)]
pub struct PhiSource {
    pub block: String,
    pub var: String,
}

/// Channel operation selector for the `channelOp` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOpKind {
    Send,
    Recv,
    TrySend,
    TryRecv,
}

impl ChannelOpKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "send" => Some(ChannelOpKind::Send),
            "recv" => Some(ChannelOpKind::Recv),
            "trySend" => Some(ChannelOpKind::TrySend),
            "tryRecv" => Some(ChannelOpKind::TryRecv),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelOpKind::Send => "send",
            ChannelOpKind::Recv => "recv",
            ChannelOpKind::TrySend => "trySend",
            ChannelOpKind::TryRecv => "tryRecv",
        }
    }
}

/// Block instructions. The first six are LIR; `Spawn`, `ChannelOp` and
/// `Await` are the PIR additions.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// target ← expression
    Assign { target: String, expr: Expr },
    /// target ← namespaced operator applied to value operands
    Op {
        target: String,
        operator: String,
        operands: Vec<Operand>,
    },
    /// target ← callee applied to value operands
    Call {
        target: String,
        callee: Operand,
        operands: Vec<Operand>,
    },
    /// target selected from (predecessor-block, source-variable) pairs
    Phi {
        target: String,
        sources: Vec<PhiSource>,
    },
    /// target ← named effect applied to value operands
    Effect {
        target: String,
        effect: String,
        operands: Vec<Operand>,
    },
    /// target ref-cell ← value
    AssignRef { target: String, value: Operand },
    /// target ← future for a freshly spawned task running `node`
    Spawn {
        target: String,
        node: String,
        task: Option<String>,
    },
    /// send/recv/trySend/tryRecv on the channel handle in the value table
    ChannelOp {
        op: ChannelOpKind,
        channel: Operand,
        value: Option<Operand>,
        target: Option<String>,
    },
    /// target ← value of the future at the operand
    Await { target: String, future: Operand },
}

impl Instruction {
    /// Wire spelling of this instruction's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Instruction::Assign { .. } => "assign",
            Instruction::Op { .. } => "op",
            Instruction::Call { .. } => "call",
            Instruction::Phi { .. } => "phi",
            Instruction::Effect { .. } => "effect",
            Instruction::AssignRef { .. } => "assignRef",
            Instruction::Spawn { .. } => "spawn",
            Instruction::ChannelOp { .. } => "channelOp",
            Instruction::Await { .. } => "await",
        }
    }

    /// The SSA target this instruction binds, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Instruction::Assign { target, .. }
            | Instruction::Op { target, .. }
            | Instruction::Call { target, .. }
            | Instruction::Phi { target, .. }
            | Instruction::Effect { target, .. }
            | Instruction::Spawn { target, .. }
            | Instruction::Await { target, .. } => Some(target),
            Instruction::AssignRef { .. } => None,
            Instruction::ChannelOp { target, .. } => target.as_deref(),
        }
    }

    /// True for the instructions PIR introduces.
    pub fn is_pir_form(&self) -> bool {
        matches!(
            self,
            Instruction::Spawn { .. } | Instruction::ChannelOp { .. } | Instruction::Await { .. }
        )
    }
}

/// One fork branch: the block to run and the task id to run it under.
#[derive(Debug, Clone, PartialEq)]
pub struct ForkBranch {
    pub block: String,
    pub task: String,
}

/// Block terminators. `Fork`, `Join` and `Suspend` are the PIR additions.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Jump { to: String },
    Branch {
        cond: Operand,
        then: String,
        els: String,
    },
    Return { value: Option<Operand> },
    Exit { code: Option<Operand> },
    /// Spawn one task per branch, await all, resume at `continuation`
    Fork {
        branches: Vec<ForkBranch>,
        continuation: String,
    },
    /// Await a fixed task list, optionally bind results, resume
    Join {
        tasks: Vec<String>,
        continuation: String,
        results: Option<Vec<String>>,
    },
    /// Await a future, then resume at `resume`
    Suspend { future: Operand, resume: String },
}

impl Terminator {
    /// Wire spelling of this terminator's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Terminator::Jump { .. } => "jump",
            Terminator::Branch { .. } => "branch",
            Terminator::Return { .. } => "return",
            Terminator::Exit { .. } => "exit",
            Terminator::Fork { .. } => "fork",
            Terminator::Join { .. } => "join",
            Terminator::Suspend { .. } => "suspend",
        }
    }

    /// Every block id this terminator may transfer control to.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Terminator::Jump { to } => vec![to],
            Terminator::Branch { then, els, .. } => vec![then, els],
            Terminator::Return { .. } | Terminator::Exit { .. } => vec![],
            Terminator::Fork {
                branches,
                continuation,
            } => {
                let mut out: Vec<&str> = branches.iter().map(|b| b.block.as_str()).collect();
                out.push(continuation);
                out
            }
            Terminator::Join { continuation, .. } => vec![continuation],
            Terminator::Suspend { resume, .. } => vec![resume],
        }
    }

    /// True for the terminators PIR introduces.
    pub fn is_pir_form(&self) -> bool {
        matches!(
            self,
            Terminator::Fork { .. } | Terminator::Join { .. } | Terminator::Suspend { .. }
        )
    }
}

/// A basic block: an ordered instruction list and exactly one terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

// ============================================================================
// Hybrid nodes and documents
// ============================================================================

/// The body of a hybrid node: an expression or a block list with an entry.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeBody {
    Expr(Expr),
    Blocks { blocks: Vec<Block>, entry: String },
}

/// A hybrid node: either an expression node or a block node, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridNode {
    pub id: String,
    pub ty: Option<Type>,
    pub body: NodeBody,
}

impl HybridNode {
    pub fn is_block_node(&self) -> bool {
        matches!(self.body, NodeBody::Blocks { .. })
    }

    pub fn is_expr_node(&self) -> bool {
        matches!(self.body, NodeBody::Expr(_))
    }

    /// Look up a block by id within a block node.
    pub fn block(&self, id: &str) -> Option<&Block> {
        match &self.body {
            NodeBody::Blocks { blocks, .. } => blocks.iter().find(|b| b.id == id),
            NodeBody::Expr(_) => None,
        }
    }
}

/// One AIR-level definition: `namespace:name(params) -> result = body`.
#[derive(Debug, Clone, PartialEq)]
pub struct AirDef {
    pub namespace: String,
    pub name: String,
    pub params: Vec<DefParam>,
    pub result: Type,
    pub body: Expr,
}

/// A definition parameter: name plus declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct DefParam {
    pub name: String,
    pub ty: Type,
}

impl AirDef {
    /// Qualified `namespace:name` key.
    pub fn qualified(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }
}

/// A declared function signature (metadata only; not checked at runtime).
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    pub name: String,
    pub params: Vec<Type>,
    pub result: Type,
}

/// A validated, immutable SPIRAL document.
#[derive(Debug, Clone)]
pub struct Document {
    pub version: String,
    pub layer: Layer,
    pub capabilities: Vec<String>,
    pub function_sigs: Vec<FunctionSig>,
    pub defs: Vec<AirDef>,
    pub nodes: Vec<HybridNode>,
    pub result: String,
    node_index: HashMap<String, usize>,
    def_index: HashMap<String, usize>,
}

impl Document {
    /// Assemble a document and build its lookup indexes. The validator is
    /// responsible for id uniqueness; on duplicates the first entry wins.
    pub fn new(
        version: String,
        layer: Layer,
        capabilities: Vec<String>,
        function_sigs: Vec<FunctionSig>,
        defs: Vec<AirDef>,
        nodes: Vec<HybridNode>,
        result: String,
    ) -> Self {
        let mut node_index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            node_index.entry(node.id.clone()).or_insert(i);
        }
        let mut def_index = HashMap::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            def_index.entry(def.qualified()).or_insert(i);
        }
        Document {
            version,
            layer,
            capabilities,
            function_sigs,
            defs,
            nodes,
            result,
            node_index,
            def_index,
        }
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&HybridNode> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    /// Look up a definition by qualified `namespace:name`.
    pub fn def(&self, qualified: &str) -> Option<&AirDef> {
        self.def_index.get(qualified).map(|&i| &self.defs[i])
    }

    /// The designated result node.
    pub fn result_node(&self) -> Option<&HybridNode> {
        self.node(&self.result)
    }

    /// Whether the document declares a capability tag.
    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| c == cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_inference() {
        assert_eq!(Layer::infer_from_path("demo/arith.air.json"), Layer::Air);
        assert_eq!(Layer::infer_from_path("x/factorial.cir"), Layer::Cir);
        assert_eq!(Layer::infer_from_path("suite/pir/rendezvous.json"), Layer::Pir);
        assert_eq!(Layer::infer_from_path("unknown.json"), Layer::Air);
    }

    #[test]
    fn test_layer_major() {
        assert_eq!(Layer::Air.required_major(), 1);
        assert_eq!(Layer::Lir.required_major(), 1);
        assert_eq!(Layer::Pir.required_major(), 2);
    }

    #[test]
    fn test_expr_classification() {
        let lam = Expr::Lambda {
            params: Rc::new(vec![Param::required("x")]),
            body: Rc::new(Expr::Var {
                name: "x".to_string(),
            }),
        };
        assert!(lam.is_cir_form());
        assert!(!lam.is_eir_form());
        let spawn = Expr::Spawn {
            body: Box::new(Expr::Var {
                name: "x".to_string(),
            }),
        };
        assert!(spawn.is_pir_form());
    }

    #[test]
    fn test_terminator_targets() {
        let t = Terminator::Branch {
            cond: Operand::Var("c".to_string()),
            then: "b1".to_string(),
            els: "b2".to_string(),
        };
        assert_eq!(t.targets(), vec!["b1", "b2"]);
        let f = Terminator::Fork {
            branches: vec![
                ForkBranch {
                    block: "w0".to_string(),
                    task: "t0".to_string(),
                },
                ForkBranch {
                    block: "w1".to_string(),
                    task: "t1".to_string(),
                },
            ],
            continuation: "done".to_string(),
        };
        assert_eq!(f.targets(), vec!["w0", "w1", "done"]);
    }

    #[test]
    fn test_document_lookups() {
        let doc = Document::new(
            "1.0.0".to_string(),
            Layer::Air,
            vec![],
            vec![],
            vec![],
            vec![HybridNode {
                id: "a".to_string(),
                ty: Some(Type::Int),
                body: NodeBody::Expr(Expr::Lit {
                    ty: Type::Int,
                    value: Literal::Int(2),
                }),
            }],
            "a".to_string(),
        );
        assert!(doc.node("a").is_some());
        assert!(doc.node("missing").is_none());
        assert_eq!(doc.result_node().map(|n| n.id.as_str()), Some("a"));
    }
}
