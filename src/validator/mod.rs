//! # Document Validator
//!
//! Structural validation per layer. Each `validate_*` function accepts an
//! untyped JSON tree and produces either the typed [`Document`] (valid) or a
//! non-empty diagnostic list, each entry carrying a JSON-pointer-style path
//! and a message.
//!
//! Checks performed:
//!
//! - Top level: version matches the layer's required major; capabilities and
//!   function signatures are well-formed lists; definitions are well-formed.
//! - Nodes: unique ids; every node is an expression node or a block node,
//!   never both; internal references resolve.
//! - Types: the tag is in the closed set; parameterised types carry their
//!   required children.
//! - Expressions: per-kind required fields, with layer gating (CIR forms
//!   rejected in AIR, PIR forms rejected below PIR, block nodes rejected
//!   below LIR).
//! - Block nodes: entry exists; every terminator target exists; every phi
//!   source's predecessor block exists.
//! - Acyclicity: the reference graph of expression nodes is cycle-free,
//!   except where the cycle passes through a lambda body (recursion).
//! - Result: references an existing node.
//!
//! Validation is idempotent and deterministic: the same tree always yields
//! the same document or the same diagnostics.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value as Json;
use tracing::debug;

use crate::ast::{
    AirDef, Block, Catch, ChannelOpKind, DefParam, Document, Expr, ForkBranch, FunctionSig,
    HybridNode, Instruction, Layer, Literal, NodeBody, Operand, Param, PhiSource, Terminator,
};
use crate::error::{Diagnostic, ErrorCode};
use crate::types::{ChannelKind, Type};

/// Either the validated document or a non-empty diagnostic list.
pub type ValidationResult = Result<Document, Vec<Diagnostic>>;

fn id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"))
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)$").expect("version regex"))
}

/// Validate an AIR document (version major 1, first-order expressions).
pub fn validate_air(tree: &Json) -> ValidationResult {
    validate_document(Layer::Air, tree)
}

/// Validate a CIR document (adds lambda, application, fix).
pub fn validate_cir(tree: &Json) -> ValidationResult {
    validate_document(Layer::Cir, tree)
}

/// Validate an EIR document (adds effects, cells, loops, try).
pub fn validate_eir(tree: &Json) -> ValidationResult {
    validate_document(Layer::Eir, tree)
}

/// Validate an LIR document (adds block nodes with SSA phis).
pub fn validate_lir(tree: &Json) -> ValidationResult {
    validate_document(Layer::Lir, tree)
}

/// Validate a PIR document (version major 2, async/parallel forms).
pub fn validate_pir(tree: &Json) -> ValidationResult {
    validate_document(Layer::Pir, tree)
}

/// Validate against an explicit layer.
pub fn validate_document(layer: Layer, tree: &Json) -> ValidationResult {
    let mut v = Validator::new(layer);
    let doc = v.document(tree);
    if v.diags.is_empty() {
        debug!(%layer, "document valid");
        Ok(doc.expect("no diagnostics implies a document"))
    } else {
        Err(v.diags)
    }
}

struct Validator {
    layer: Layer,
    diags: Vec<Diagnostic>,
}

impl Validator {
    fn new(layer: Layer) -> Self {
        Validator {
            layer,
            diags: Vec::new(),
        }
    }

    fn report(&mut self, path: &str, code: ErrorCode, message: impl Into<String>) {
        self.diags.push(Diagnostic::new(path, code, message));
    }

    fn require<'a>(&mut self, obj: &'a Json, key: &str, path: &str) -> Option<&'a Json> {
        let found = obj.get(key);
        if found.is_none() {
            self.report(
                &format!("{path}/{key}"),
                ErrorCode::MissingRequiredField,
                format!("missing required field '{key}'"),
            );
        }
        found
    }

    fn string_field(&mut self, obj: &Json, key: &str, path: &str) -> Option<String> {
        let v = self.require(obj, key, path)?;
        match v.as_str() {
            Some(s) => Some(s.to_string()),
            None => {
                self.report(
                    &format!("{path}/{key}"),
                    ErrorCode::ValidationError,
                    format!("'{key}' must be a string"),
                );
                None
            }
        }
    }

    fn identifier(&mut self, obj: &Json, key: &str, path: &str) -> Option<String> {
        let s = self.string_field(obj, key, path)?;
        if id_regex().is_match(&s) {
            Some(s)
        } else {
            self.report(
                &format!("{path}/{key}"),
                ErrorCode::InvalidIdFormat,
                format!("'{s}' does not match [A-Za-z_][A-Za-z0-9_]*"),
            );
            None
        }
    }

    // ------------------------------------------------------------------
    // Top level
    // ------------------------------------------------------------------

    fn document(&mut self, tree: &Json) -> Option<Document> {
        if !tree.is_object() {
            self.report("", ErrorCode::ValidationError, "document must be an object");
            return None;
        }

        let version = self.version(tree);
        let capabilities = self.capabilities(tree);
        let function_sigs = self.function_sigs(tree);
        let defs = self.air_defs(tree);
        let nodes = self.nodes(tree);
        let result = self.string_field(tree, "result", "");

        // Result must reference an existing node
        if let (Some(result), Some(nodes)) = (&result, &nodes) {
            if !nodes.iter().any(|n| n.id == *result) {
                self.report(
                    "/result",
                    ErrorCode::InvalidResultReference,
                    format!("result references unknown node '{result}'"),
                );
            }
        }

        if let Some(nodes) = &nodes {
            self.check_acyclic(nodes);
        }

        if self.diags.is_empty() {
            Some(Document::new(
                version.unwrap_or_default(),
                self.layer,
                capabilities,
                function_sigs,
                defs,
                nodes.unwrap_or_default(),
                result.unwrap_or_default(),
            ))
        } else {
            None
        }
    }

    fn version(&mut self, tree: &Json) -> Option<String> {
        let version = self.string_field(tree, "version", "")?;
        let Some(caps) = version_regex().captures(&version) else {
            self.report(
                "/version",
                ErrorCode::ValidationError,
                format!("'{version}' is not a <major>.<minor>.<patch> version"),
            );
            return None;
        };
        let major: u64 = caps[1].parse().unwrap_or(0);
        if major != self.layer.required_major() {
            self.report(
                "/version",
                ErrorCode::ValidationError,
                format!(
                    "layer {} requires version major {}, got {major}",
                    self.layer,
                    self.layer.required_major()
                ),
            );
        }
        Some(version)
    }

    fn capabilities(&mut self, tree: &Json) -> Vec<String> {
        let Some(v) = tree.get("capabilities") else {
            return Vec::new();
        };
        let Some(items) = v.as_array() else {
            self.report(
                "/capabilities",
                ErrorCode::ValidationError,
                "capabilities must be a list",
            );
            return Vec::new();
        };
        let mut out = Vec::new();
        for (i, item) in items.iter().enumerate() {
            match item.as_str() {
                Some(s) => out.push(s.to_string()),
                None => self.report(
                    &format!("/capabilities/{i}"),
                    ErrorCode::ValidationError,
                    "capability must be a string",
                ),
            }
        }
        out
    }

    fn function_sigs(&mut self, tree: &Json) -> Vec<FunctionSig> {
        let Some(v) = tree.get("functionSigs") else {
            return Vec::new();
        };
        let Some(items) = v.as_array() else {
            self.report(
                "/functionSigs",
                ErrorCode::ValidationError,
                "functionSigs must be a list",
            );
            return Vec::new();
        };
        let mut out = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let path = format!("/functionSigs/{i}");
            let name = self.identifier(item, "name", &path);
            let params = match self.require(item, "params", &path).and_then(Json::as_array) {
                Some(list) => list
                    .iter()
                    .enumerate()
                    .filter_map(|(j, t)| self.parse_type(t, &format!("{path}/params/{j}")))
                    .collect(),
                None => Vec::new(),
            };
            let result = self
                .require(item, "result", &path)
                .cloned()
                .and_then(|t| self.parse_type(&t, &format!("{path}/result")));
            if let (Some(name), Some(result)) = (name, result) {
                out.push(FunctionSig {
                    name,
                    params,
                    result,
                });
            }
        }
        out
    }

    fn air_defs(&mut self, tree: &Json) -> Vec<AirDef> {
        let Some(v) = tree.get("airDefs") else {
            return Vec::new();
        };
        let Some(items) = v.as_array() else {
            self.report(
                "/airDefs",
                ErrorCode::ValidationError,
                "airDefs must be a list",
            );
            return Vec::new();
        };
        let mut out = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let path = format!("/airDefs/{i}");
            let namespace = self.identifier(item, "namespace", &path);
            let name = self.identifier(item, "name", &path);
            let params = match item.get("params").and_then(Json::as_array) {
                Some(list) => list
                    .iter()
                    .enumerate()
                    .filter_map(|(j, p)| {
                        let ppath = format!("{path}/params/{j}");
                        let pname = self.identifier(p, "name", &ppath)?;
                        let ty = self
                            .require(p, "type", &ppath)
                            .cloned()
                            .and_then(|t| self.parse_type(&t, &format!("{ppath}/type")))?;
                        Some(DefParam { name: pname, ty })
                    })
                    .collect(),
                None => Vec::new(),
            };
            let result = self
                .require(item, "result", &path)
                .cloned()
                .and_then(|t| self.parse_type(&t, &format!("{path}/result")));
            let body = self
                .require(item, "body", &path)
                .cloned()
                .and_then(|b| self.parse_expr(&b, &format!("{path}/body")));
            if let (Some(namespace), Some(name), Some(result), Some(body)) =
                (namespace, name, result, body)
            {
                out.push(AirDef {
                    namespace,
                    name,
                    params,
                    result,
                    body,
                });
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    fn nodes(&mut self, tree: &Json) -> Option<Vec<HybridNode>> {
        let items = self.require(tree, "nodes", "")?.as_array().cloned();
        let Some(items) = items else {
            self.report("/nodes", ErrorCode::ValidationError, "nodes must be a list");
            return None;
        };
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let path = format!("/nodes/{i}");
            if let Some(node) = self.node(item, &path) {
                if !seen.insert(node.id.clone()) {
                    self.report(
                        &format!("{path}/id"),
                        ErrorCode::DuplicateNodeId,
                        format!("duplicate node id '{}'", node.id),
                    );
                }
                out.push(node);
            }
        }
        Some(out)
    }

    fn node(&mut self, item: &Json, path: &str) -> Option<HybridNode> {
        let id = self.identifier(item, "id", path)?;
        let ty = match item.get("type") {
            Some(t) => self.parse_type(t, &format!("{path}/type")),
            None => None,
        };

        let has_expr = item.get("expr").is_some();
        let has_blocks = item.get("blocks").is_some() || item.get("entry").is_some();
        if has_expr && has_blocks {
            self.report(
                path,
                ErrorCode::ValidationError,
                "a hybrid node is an expression node or a block node, not both",
            );
            return None;
        }

        if has_blocks {
            if self.layer < Layer::Lir {
                self.report(
                    path,
                    ErrorCode::ValidationError,
                    format!("block nodes are not part of {}", self.layer),
                );
                return None;
            }
            let blocks = self.blocks(item, path)?;
            let entry = self.identifier(item, "entry", path)?;
            if !blocks.iter().any(|b| b.id == entry) {
                self.report(
                    &format!("{path}/entry"),
                    ErrorCode::ValidationError,
                    format!("entry block '{entry}' does not exist"),
                );
            }
            self.check_block_targets(&blocks, path);
            return Some(HybridNode {
                id,
                ty,
                body: NodeBody::Blocks { blocks, entry },
            });
        }

        let expr = self.require(item, "expr", path).cloned()?;
        let expr = self.parse_expr(&expr, &format!("{path}/expr"))?;
        Some(HybridNode {
            id,
            ty,
            body: NodeBody::Expr(expr),
        })
    }

    fn blocks(&mut self, item: &Json, path: &str) -> Option<Vec<Block>> {
        let list = self.require(item, "blocks", path)?.as_array().cloned();
        let Some(list) = list else {
            self.report(
                &format!("{path}/blocks"),
                ErrorCode::ValidationError,
                "blocks must be a list",
            );
            return None;
        };
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for (i, b) in list.iter().enumerate() {
            let bpath = format!("{path}/blocks/{i}");
            let Some(id) = self.identifier(b, "id", &bpath) else {
                continue;
            };
            if !seen.insert(id.clone()) {
                self.report(
                    &format!("{bpath}/id"),
                    ErrorCode::DuplicateNodeId,
                    format!("duplicate block id '{id}'"),
                );
            }
            let instructions = match b.get("instructions") {
                Some(Json::Array(list)) => list
                    .iter()
                    .enumerate()
                    .filter_map(|(j, ins)| {
                        self.parse_instruction(ins, &format!("{bpath}/instructions/{j}"))
                    })
                    .collect(),
                Some(_) => {
                    self.report(
                        &format!("{bpath}/instructions"),
                        ErrorCode::ValidationError,
                        "instructions must be a list",
                    );
                    Vec::new()
                }
                None => Vec::new(),
            };
            let terminator = self
                .require(b, "terminator", &bpath)
                .cloned()
                .and_then(|t| self.parse_terminator(&t, &format!("{bpath}/terminator")));
            if let Some(terminator) = terminator {
                out.push(Block {
                    id,
                    instructions,
                    terminator,
                });
            }
        }
        Some(out)
    }

    /// Every terminator target and phi predecessor must name a block in the
    /// same block node.
    fn check_block_targets(&mut self, blocks: &[Block], path: &str) {
        let ids: HashSet<&str> = blocks.iter().map(|b| b.id.as_str()).collect();
        for (i, block) in blocks.iter().enumerate() {
            for target in block.terminator.targets() {
                if !ids.contains(target) {
                    self.report(
                        &format!("{path}/blocks/{i}/terminator"),
                        ErrorCode::ValidationError,
                        format!("terminator target '{target}' does not exist"),
                    );
                }
            }
            for (j, ins) in block.instructions.iter().enumerate() {
                if let Instruction::Phi { sources, .. } = ins {
                    for source in sources {
                        if !ids.contains(source.block.as_str()) {
                            self.report(
                                &format!("{path}/blocks/{i}/instructions/{j}"),
                                ErrorCode::ValidationError,
                                format!(
                                    "phi source predecessor '{}' does not exist",
                                    source.block
                                ),
                            );
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn parse_type(&mut self, v: &Json, path: &str) -> Option<Type> {
        let Some(kind) = v.get("kind").and_then(Json::as_str) else {
            self.report(
                path,
                ErrorCode::InvalidTypeFormat,
                "type must be an object with a 'kind' tag",
            );
            return None;
        };
        let child = |this: &mut Self, key: &str| -> Option<Type> {
            let t = this.require(v, key, path)?.clone();
            this.parse_type(&t, &format!("{path}/{key}"))
        };
        match kind {
            "bool" => Some(Type::Bool),
            "int" => Some(Type::Int),
            "float" => Some(Type::Float),
            "string" => Some(Type::String),
            "void" => Some(Type::Void),
            "list" => Some(Type::List(Box::new(child(self, "elem")?))),
            "set" => Some(Type::Set(Box::new(child(self, "elem")?))),
            "option" => Some(Type::Option(Box::new(child(self, "elem")?))),
            "ref" => Some(Type::Ref(Box::new(child(self, "elem")?))),
            "future" => Some(Type::Future(Box::new(child(self, "elem")?))),
            "task" => Some(Type::Task(Box::new(child(self, "elem")?))),
            "map" => {
                let key = child(self, "key")?;
                let value = child(self, "value")?;
                Some(Type::map(key, value))
            }
            "opaque" => {
                let name = self.string_field(v, "name", path)?;
                Some(Type::Opaque(name))
            }
            "fn" => {
                let params = self.type_list(v, "params", path)?;
                let optional = match v.get("optional") {
                    Some(Json::Array(flags)) => {
                        flags.iter().map(|f| f.as_bool().unwrap_or(false)).collect()
                    }
                    _ => vec![false; params.len()],
                };
                let ret = child(self, "ret")?;
                Some(Type::Fn {
                    params,
                    optional,
                    ret: Box::new(ret),
                })
            }
            "async" => {
                let params = self.type_list(v, "params", path)?;
                let ret = child(self, "ret")?;
                Some(Type::Async {
                    params,
                    ret: Box::new(ret),
                })
            }
            "channel" => {
                let kind_str = self.string_field(v, "channelKind", path)?;
                let Some(ck) = ChannelKind::parse(&kind_str) else {
                    self.report(
                        &format!("{path}/channelKind"),
                        ErrorCode::InvalidTypeFormat,
                        format!("unknown channel kind '{kind_str}'"),
                    );
                    return None;
                };
                Some(Type::Channel {
                    kind: ck,
                    elem: Box::new(child(self, "elem")?),
                })
            }
            other => {
                self.report(
                    path,
                    ErrorCode::InvalidTypeFormat,
                    format!("unknown type kind '{other}'"),
                );
                None
            }
        }
    }

    fn type_list(&mut self, v: &Json, key: &str, path: &str) -> Option<Vec<Type>> {
        let list = self.require(v, key, path)?.as_array().cloned();
        let Some(list) = list else {
            self.report(
                &format!("{path}/{key}"),
                ErrorCode::InvalidTypeFormat,
                format!("'{key}' must be a list of types"),
            );
            return None;
        };
        Some(
            list.iter()
                .enumerate()
                .filter_map(|(i, t)| self.parse_type(t, &format!("{path}/{key}/{i}")))
                .collect(),
        )
    }

    // ------------------------------------------------------------------
    // Literals and operands
    // ------------------------------------------------------------------

    fn parse_literal(&mut self, v: &Json, path: &str) -> Option<Literal> {
        match v {
            Json::Bool(b) => Some(Literal::Bool(*b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Literal::Int(i))
                } else {
                    n.as_f64().map(Literal::Float)
                }
            }
            Json::String(s) => Some(Literal::Str(s.clone())),
            Json::Null => Some(Literal::Null),
            Json::Array(items) => {
                let elems: Vec<Literal> = items
                    .iter()
                    .enumerate()
                    .filter_map(|(i, e)| self.parse_literal(e, &format!("{path}/{i}")))
                    .collect();
                if elems.len() == items.len() {
                    Some(Literal::Seq(elems))
                } else {
                    None
                }
            }
            Json::Object(_) => {
                self.report(
                    path,
                    ErrorCode::InvalidExprFormat,
                    "literal payloads are scalars or arrays",
                );
                None
            }
        }
    }

    fn parse_operand(&mut self, v: &Json, path: &str) -> Option<Operand> {
        match v.get("kind").and_then(Json::as_str) {
            Some("var") => {
                let name = self.identifier(v, "name", path)?;
                Some(Operand::Var(name))
            }
            Some("lit") => {
                let ty = self
                    .require(v, "type", path)
                    .cloned()
                    .and_then(|t| self.parse_type(&t, &format!("{path}/type")))?;
                let value = self
                    .require(v, "value", path)
                    .cloned()
                    .and_then(|l| self.parse_literal(&l, &format!("{path}/value")))?;
                Some(Operand::Lit { ty, value })
            }
            _ => {
                self.report(
                    path,
                    ErrorCode::InvalidExprFormat,
                    "operands are 'var' or 'lit' expressions",
                );
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expr_allowed(&self, kind: &str) -> bool {
        let minimum = match kind {
            "lit" | "var" | "ref" | "if" | "let" | "call" => Layer::Air,
            "lambda" | "apply" | "fix" => Layer::Cir,
            "seq" | "assign" | "while" | "for" | "iter" | "effect" | "refNew" | "deref"
            | "try" => Layer::Eir,
            "par" | "spawn" | "await" | "chan" | "send" | "recv" | "select" | "race" => Layer::Pir,
            // Unknown kinds fall through to the parse match, which reports
            // them as unknown rather than layer-gated
            _ => return true,
        };
        self.layer >= minimum
    }

    fn sub_expr(&mut self, v: &Json, key: &str, path: &str) -> Option<Box<Expr>> {
        let e = self.require(v, key, path)?.clone();
        self.parse_expr(&e, &format!("{path}/{key}")).map(Box::new)
    }

    fn expr_list(&mut self, v: &Json, key: &str, path: &str) -> Option<Vec<Expr>> {
        let list = self.require(v, key, path)?.as_array().cloned();
        let Some(list) = list else {
            self.report(
                &format!("{path}/{key}"),
                ErrorCode::InvalidExprFormat,
                format!("'{key}' must be a list of expressions"),
            );
            return None;
        };
        let parsed: Vec<Expr> = list
            .iter()
            .enumerate()
            .filter_map(|(i, e)| self.parse_expr(e, &format!("{path}/{key}/{i}")))
            .collect();
        if parsed.len() == list.len() {
            Some(parsed)
        } else {
            None
        }
    }

    fn parse_expr(&mut self, v: &Json, path: &str) -> Option<Expr> {
        let Some(kind) = v.get("kind").and_then(Json::as_str) else {
            self.report(
                path,
                ErrorCode::InvalidExprFormat,
                "expression must be an object with a 'kind' tag",
            );
            return None;
        };
        if !self.expr_allowed(kind) {
            self.report(
                path,
                ErrorCode::InvalidExprFormat,
                format!("expression kind '{kind}' is not part of {}", self.layer),
            );
            return None;
        }
        match kind {
            "lit" => {
                let ty = self
                    .require(v, "type", path)
                    .cloned()
                    .and_then(|t| self.parse_type(&t, &format!("{path}/type")))?;
                let value = self
                    .require(v, "value", path)
                    .cloned()
                    .and_then(|l| self.parse_literal(&l, &format!("{path}/value")))?;
                Some(Expr::Lit { ty, value })
            }
            "var" => {
                let name = self.identifier(v, "name", path)?;
                Some(Expr::Var { name })
            }
            "ref" => {
                let name = self.identifier(v, "name", path)?;
                let namespace = match v.get("namespace") {
                    Some(Json::String(s)) => Some(s.clone()),
                    Some(_) => {
                        self.report(
                            &format!("{path}/namespace"),
                            ErrorCode::ValidationError,
                            "'namespace' must be a string",
                        );
                        None
                    }
                    None => None,
                };
                Some(Expr::Ref { namespace, name })
            }
            "if" => {
                let cond = self.sub_expr(v, "cond", path)?;
                let then = self.sub_expr(v, "then", path)?;
                let els = self.sub_expr(v, "else", path)?;
                Some(Expr::If { cond, then, els })
            }
            "let" => {
                let name = self.identifier(v, "name", path)?;
                let value = self.sub_expr(v, "value", path)?;
                let body = self.sub_expr(v, "body", path)?;
                Some(Expr::Let { name, value, body })
            }
            "call" => {
                let op = self.string_field(v, "op", path)?;
                if op.split(':').count() != 2 || op.split(':').any(|p| !id_regex().is_match(p)) {
                    self.report(
                        &format!("{path}/op"),
                        ErrorCode::InvalidIdFormat,
                        format!("'{op}' is not a namespaced operator name"),
                    );
                    return None;
                }
                let args = self.expr_list(v, "args", path)?;
                Some(Expr::Call { op, args })
            }
            "lambda" => {
                let params = self.lambda_params(v, path)?;
                let body = self.sub_expr(v, "body", path)?;
                Some(Expr::Lambda {
                    params: Rc::new(params),
                    body: Rc::new(*body),
                })
            }
            "apply" => {
                let func = self.sub_expr(v, "fn", path)?;
                let args = self.expr_list(v, "args", path)?;
                Some(Expr::Apply { func, args })
            }
            "fix" => {
                let func = self.sub_expr(v, "fn", path)?;
                Some(Expr::Fix { func })
            }
            "seq" => {
                let first = self.sub_expr(v, "first", path)?;
                let second = self.sub_expr(v, "second", path)?;
                Some(Expr::Seq { first, second })
            }
            "assign" => {
                let cell = self.sub_expr(v, "cell", path)?;
                let value = self.sub_expr(v, "value", path)?;
                Some(Expr::Assign { cell, value })
            }
            "while" => {
                let cond = self.sub_expr(v, "cond", path)?;
                let body = self.sub_expr(v, "body", path)?;
                Some(Expr::While { cond, body })
            }
            "for" => {
                let var = self.identifier(v, "var", path)?;
                let from = self.sub_expr(v, "from", path)?;
                let to = self.sub_expr(v, "to", path)?;
                let body = self.sub_expr(v, "body", path)?;
                Some(Expr::For {
                    var,
                    from,
                    to,
                    body,
                })
            }
            "iter" => {
                let var = self.identifier(v, "var", path)?;
                let collection = self.sub_expr(v, "collection", path)?;
                let body = self.sub_expr(v, "body", path)?;
                Some(Expr::Iter {
                    var,
                    collection,
                    body,
                })
            }
            "effect" => {
                let effect = self.identifier(v, "effect", path)?;
                let args = self.expr_list(v, "args", path)?;
                Some(Expr::Effect { effect, args })
            }
            "refNew" => {
                let init = self.sub_expr(v, "init", path)?;
                Some(Expr::RefNew { init })
            }
            "deref" => {
                let cell = self.sub_expr(v, "cell", path)?;
                Some(Expr::Deref { cell })
            }
            "try" => {
                let body = self.sub_expr(v, "body", path)?;
                let catch = match v.get("catch") {
                    Some(c) => {
                        let cpath = format!("{path}/catch");
                        let param = self.identifier(c, "param", &cpath)?;
                        let cbody = self.sub_expr(c, "body", &cpath)?;
                        Some(Catch {
                            param,
                            body: cbody,
                        })
                    }
                    None => None,
                };
                let fallback = match v.get("fallback") {
                    Some(f) => Some(Box::new(
                        self.parse_expr(&f.clone(), &format!("{path}/fallback"))?,
                    )),
                    None => None,
                };
                Some(Expr::Try {
                    body,
                    catch,
                    fallback,
                })
            }
            "par" => {
                let exprs = self.expr_list(v, "exprs", path)?;
                Some(Expr::Par { exprs })
            }
            "spawn" => {
                let body = self.sub_expr(v, "body", path)?;
                Some(Expr::Spawn { body })
            }
            "await" => {
                let future = self.sub_expr(v, "future", path)?;
                let timeout_ms = self.timeout_field(v, path);
                let fallback = match v.get("fallback") {
                    Some(f) => Some(Box::new(
                        self.parse_expr(&f.clone(), &format!("{path}/fallback"))?,
                    )),
                    None => None,
                };
                Some(Expr::Await {
                    future,
                    timeout_ms,
                    fallback,
                })
            }
            "chan" => {
                let kind_str = self.string_field(v, "channelKind", path)?;
                let Some(ck) = ChannelKind::parse(&kind_str) else {
                    self.report(
                        &format!("{path}/channelKind"),
                        ErrorCode::InvalidExprFormat,
                        format!("unknown channel kind '{kind_str}'"),
                    );
                    return None;
                };
                let capacity = match self.require(v, "capacity", path).and_then(Json::as_u64) {
                    Some(c) => c as usize,
                    None => {
                        self.report(
                            &format!("{path}/capacity"),
                            ErrorCode::InvalidExprFormat,
                            "'capacity' must be a non-negative integer",
                        );
                        return None;
                    }
                };
                let elem = match v.get("elem") {
                    Some(t) => self.parse_type(t, &format!("{path}/elem")),
                    None => None,
                };
                Some(Expr::Chan {
                    kind: ck,
                    capacity,
                    elem,
                })
            }
            "send" => {
                let channel = self.sub_expr(v, "channel", path)?;
                let value = self.sub_expr(v, "value", path)?;
                Some(Expr::Send { channel, value })
            }
            "recv" => {
                let channel = self.sub_expr(v, "channel", path)?;
                Some(Expr::Recv { channel })
            }
            "select" => {
                let futures = self.expr_list(v, "futures", path)?;
                let timeout_ms = self.timeout_field(v, path);
                let return_index = v
                    .get("returnIndex")
                    .and_then(Json::as_bool)
                    .unwrap_or(false);
                Some(Expr::Select {
                    futures,
                    timeout_ms,
                    return_index,
                })
            }
            "race" => {
                let tasks = self.expr_list(v, "tasks", path)?;
                Some(Expr::Race { tasks })
            }
            other => {
                self.report(
                    path,
                    ErrorCode::InvalidExprFormat,
                    format!("unknown expression kind '{other}'"),
                );
                None
            }
        }
    }

    fn timeout_field(&mut self, v: &Json, path: &str) -> Option<u64> {
        match v.get("timeoutMs") {
            Some(t) => match t.as_u64() {
                Some(ms) => Some(ms),
                None => {
                    self.report(
                        &format!("{path}/timeoutMs"),
                        ErrorCode::InvalidExprFormat,
                        "'timeoutMs' must be a non-negative integer",
                    );
                    None
                }
            },
            None => None,
        }
    }

    fn lambda_params(&mut self, v: &Json, path: &str) -> Option<Vec<Param>> {
        let list = self.require(v, "params", path)?.as_array().cloned();
        let Some(list) = list else {
            self.report(
                &format!("{path}/params"),
                ErrorCode::InvalidExprFormat,
                "'params' must be a list",
            );
            return None;
        };
        let mut out = Vec::new();
        for (i, p) in list.iter().enumerate() {
            let ppath = format!("{path}/params/{i}");
            let name = self.identifier(p, "name", &ppath)?;
            let optional = p.get("optional").and_then(Json::as_bool).unwrap_or(false);
            let default = match p.get("default") {
                Some(d) => Some(Rc::new(
                    self.parse_expr(&d.clone(), &format!("{ppath}/default"))?,
                )),
                None => None,
            };
            let ty = match p.get("type") {
                Some(t) => self.parse_type(t, &format!("{ppath}/type")),
                None => None,
            };
            out.push(Param {
                name,
                optional,
                default,
                ty,
            });
        }
        Some(out)
    }

    // ------------------------------------------------------------------
    // Instructions and terminators
    // ------------------------------------------------------------------

    fn ins_allowed(&self, kind: &str) -> bool {
        match kind {
            "assign" | "op" | "call" | "phi" | "effect" | "assignRef" => true,
            "spawn" | "channelOp" | "await" => self.layer >= Layer::Pir,
            _ => true,
        }
    }

    fn operand_list(&mut self, v: &Json, key: &str, path: &str) -> Option<Vec<Operand>> {
        let list = self.require(v, key, path)?.as_array().cloned();
        let Some(list) = list else {
            self.report(
                &format!("{path}/{key}"),
                ErrorCode::InvalidExprFormat,
                format!("'{key}' must be a list of operands"),
            );
            return None;
        };
        let parsed: Vec<Operand> = list
            .iter()
            .enumerate()
            .filter_map(|(i, o)| self.parse_operand(o, &format!("{path}/{key}/{i}")))
            .collect();
        if parsed.len() == list.len() {
            Some(parsed)
        } else {
            None
        }
    }

    fn parse_instruction(&mut self, v: &Json, path: &str) -> Option<Instruction> {
        let Some(kind) = v.get("op").and_then(Json::as_str) else {
            self.report(
                path,
                ErrorCode::ValidationError,
                "instruction must be an object with an 'op' tag",
            );
            return None;
        };
        if !self.ins_allowed(kind) {
            self.report(
                path,
                ErrorCode::ValidationError,
                format!("instruction '{kind}' is not part of {}", self.layer),
            );
            return None;
        }
        match kind {
            "assign" => {
                let target = self.identifier(v, "target", path)?;
                let expr = self
                    .require(v, "expr", path)
                    .cloned()
                    .and_then(|e| self.parse_expr(&e, &format!("{path}/expr")))?;
                Some(Instruction::Assign { target, expr })
            }
            "op" => {
                let target = self.identifier(v, "target", path)?;
                let operator = self.string_field(v, "operator", path)?;
                let operands = self.operand_list(v, "operands", path)?;
                Some(Instruction::Op {
                    target,
                    operator,
                    operands,
                })
            }
            "call" => {
                let target = self.identifier(v, "target", path)?;
                let callee = self
                    .require(v, "callee", path)
                    .cloned()
                    .and_then(|c| self.parse_operand(&c, &format!("{path}/callee")))?;
                let operands = self.operand_list(v, "operands", path)?;
                Some(Instruction::Call {
                    target,
                    callee,
                    operands,
                })
            }
            "phi" => {
                let target = self.identifier(v, "target", path)?;
                let list = self.require(v, "sources", path)?.as_array().cloned();
                let Some(list) = list else {
                    self.report(
                        &format!("{path}/sources"),
                        ErrorCode::ValidationError,
                        "'sources' must be a list",
                    );
                    return None;
                };
                let mut sources = Vec::new();
                for (i, s) in list.iter().enumerate() {
                    let spath = format!("{path}/sources/{i}");
                    let block = self.identifier(s, "block", &spath)?;
                    let var = self.identifier(s, "var", &spath)?;
                    sources.push(PhiSource { block, var });
                }
                Some(Instruction::Phi { target, sources })
            }
            "effect" => {
                let target = self.identifier(v, "target", path)?;
                let effect = self.identifier(v, "effect", path)?;
                let operands = self.operand_list(v, "operands", path)?;
                Some(Instruction::Effect {
                    target,
                    effect,
                    operands,
                })
            }
            "assignRef" => {
                let target = self.identifier(v, "target", path)?;
                let value = self
                    .require(v, "value", path)
                    .cloned()
                    .and_then(|o| self.parse_operand(&o, &format!("{path}/value")))?;
                Some(Instruction::AssignRef { target, value })
            }
            "spawn" => {
                let target = self.identifier(v, "target", path)?;
                let node = self.identifier(v, "node", path)?;
                let task = match v.get("task") {
                    Some(Json::String(s)) => Some(s.clone()),
                    Some(_) => {
                        self.report(
                            &format!("{path}/task"),
                            ErrorCode::ValidationError,
                            "'task' must be a string",
                        );
                        None
                    }
                    None => None,
                };
                Some(Instruction::Spawn { target, node, task })
            }
            "channelOp" => {
                let op_str = self.string_field(v, "channelOp", path)?;
                let Some(op) = ChannelOpKind::parse(&op_str) else {
                    self.report(
                        &format!("{path}/channelOp"),
                        ErrorCode::ValidationError,
                        format!("unknown channel operation '{op_str}'"),
                    );
                    return None;
                };
                let channel = self
                    .require(v, "channel", path)
                    .cloned()
                    .and_then(|c| self.parse_operand(&c, &format!("{path}/channel")))?;
                let value = match v.get("value") {
                    Some(o) => Some(self.parse_operand(&o.clone(), &format!("{path}/value"))?),
                    None => None,
                };
                let target = match v.get("target") {
                    Some(Json::String(s)) => Some(s.clone()),
                    Some(_) => {
                        self.report(
                            &format!("{path}/target"),
                            ErrorCode::ValidationError,
                            "'target' must be a string",
                        );
                        None
                    }
                    None => None,
                };
                if matches!(op, ChannelOpKind::Send | ChannelOpKind::TrySend) && value.is_none() {
                    self.report(
                        path,
                        ErrorCode::MissingRequiredField,
                        format!("channel {} requires a 'value' operand", op.as_str()),
                    );
                    return None;
                }
                Some(Instruction::ChannelOp {
                    op,
                    channel,
                    value,
                    target,
                })
            }
            "await" => {
                let target = self.identifier(v, "target", path)?;
                let future = self
                    .require(v, "future", path)
                    .cloned()
                    .and_then(|f| self.parse_operand(&f, &format!("{path}/future")))?;
                Some(Instruction::Await { target, future })
            }
            other => {
                self.report(
                    path,
                    ErrorCode::ValidationError,
                    format!("unknown instruction '{other}'"),
                );
                None
            }
        }
    }

    fn term_allowed(&self, kind: &str) -> bool {
        match kind {
            "jump" | "branch" | "return" | "exit" => true,
            "fork" | "join" | "suspend" => self.layer >= Layer::Pir,
            _ => true,
        }
    }

    fn parse_terminator(&mut self, v: &Json, path: &str) -> Option<Terminator> {
        let Some(kind) = v.get("kind").and_then(Json::as_str) else {
            self.report(
                path,
                ErrorCode::ValidationError,
                "terminator must be an object with a 'kind' tag",
            );
            return None;
        };
        if !self.term_allowed(kind) {
            self.report(
                path,
                ErrorCode::ValidationError,
                format!("terminator '{kind}' is not part of {}", self.layer),
            );
            return None;
        }
        match kind {
            "jump" => {
                let to = self.identifier(v, "to", path)?;
                Some(Terminator::Jump { to })
            }
            "branch" => {
                let cond = self
                    .require(v, "cond", path)
                    .cloned()
                    .and_then(|c| self.parse_operand(&c, &format!("{path}/cond")))?;
                let then = self.identifier(v, "then", path)?;
                let els = self.identifier(v, "else", path)?;
                Some(Terminator::Branch { cond, then, els })
            }
            "return" => {
                let value = match v.get("value") {
                    Some(o) => Some(self.parse_operand(&o.clone(), &format!("{path}/value"))?),
                    None => None,
                };
                Some(Terminator::Return { value })
            }
            "exit" => {
                let code = match v.get("code") {
                    Some(o) => Some(self.parse_operand(&o.clone(), &format!("{path}/code"))?),
                    None => None,
                };
                Some(Terminator::Exit { code })
            }
            "fork" => {
                let list = self.require(v, "branches", path)?.as_array().cloned();
                let Some(list) = list else {
                    self.report(
                        &format!("{path}/branches"),
                        ErrorCode::ValidationError,
                        "'branches' must be a list",
                    );
                    return None;
                };
                let mut branches = Vec::new();
                for (i, b) in list.iter().enumerate() {
                    let bpath = format!("{path}/branches/{i}");
                    let block = self.identifier(b, "block", &bpath)?;
                    let task = self.identifier(b, "task", &bpath)?;
                    branches.push(ForkBranch { block, task });
                }
                let continuation = self.identifier(v, "continuation", path)?;
                Some(Terminator::Fork {
                    branches,
                    continuation,
                })
            }
            "join" => {
                let list = self.require(v, "tasks", path)?.as_array().cloned();
                let Some(list) = list else {
                    self.report(
                        &format!("{path}/tasks"),
                        ErrorCode::ValidationError,
                        "'tasks' must be a list",
                    );
                    return None;
                };
                let mut tasks = Vec::new();
                for (i, t) in list.iter().enumerate() {
                    match t.as_str() {
                        Some(s) => tasks.push(s.to_string()),
                        None => self.report(
                            &format!("{path}/tasks/{i}"),
                            ErrorCode::ValidationError,
                            "task id must be a string",
                        ),
                    }
                }
                let continuation = self.identifier(v, "continuation", path)?;
                let results = match v.get("results") {
                    Some(Json::Array(vars)) => {
                        let mut out = Vec::new();
                        for (i, r) in vars.iter().enumerate() {
                            match r.as_str() {
                                Some(s) => out.push(s.to_string()),
                                None => self.report(
                                    &format!("{path}/results/{i}"),
                                    ErrorCode::ValidationError,
                                    "result variable must be a string",
                                ),
                            }
                        }
                        Some(out)
                    }
                    Some(_) => {
                        self.report(
                            &format!("{path}/results"),
                            ErrorCode::ValidationError,
                            "'results' must be a list",
                        );
                        None
                    }
                    None => None,
                };
                Some(Terminator::Join {
                    tasks,
                    continuation,
                    results,
                })
            }
            "suspend" => {
                let future = self
                    .require(v, "future", path)
                    .cloned()
                    .and_then(|f| self.parse_operand(&f, &format!("{path}/future")))?;
                let resume = self.identifier(v, "resume", path)?;
                Some(Terminator::Suspend { future, resume })
            }
            other => {
                self.report(
                    path,
                    ErrorCode::ValidationError,
                    format!("unknown terminator '{other}'"),
                );
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Acyclicity
    // ------------------------------------------------------------------

    /// DFS over the expression-node reference graph. Lambda parameters and
    /// let-bound names are excluded; a revisit is permitted only when the
    /// cycle passes through a lambda body (recursion).
    fn check_acyclic(&mut self, nodes: &[HybridNode]) {
        let node_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut refs: HashMap<&str, Vec<(String, bool)>> = HashMap::new();
        for node in nodes {
            let mut out = Vec::new();
            if let NodeBody::Expr(expr) = &node.body {
                let mut bound = Vec::new();
                collect_node_refs(expr, &node_ids, &mut bound, false, &mut out);
            }
            refs.insert(node.id.as_str(), out);
        }

        let mut reported: HashSet<String> = HashSet::new();
        for node in nodes {
            let mut path: Vec<(String, bool)> = vec![(node.id.clone(), false)];
            self.dfs_cycles(node.id.as_str(), &refs, &mut path, &mut reported);
        }
    }

    fn dfs_cycles(
        &mut self,
        node: &str,
        refs: &HashMap<&str, Vec<(String, bool)>>,
        path: &mut Vec<(String, bool)>,
        reported: &mut HashSet<String>,
    ) {
        let Some(out) = refs.get(node) else {
            return;
        };
        for (target, via_lambda) in out.clone() {
            if let Some(pos) = path.iter().position(|(id, _)| *id == target) {
                // Closing edge found: the cycle is permitted only when some
                // edge on it passes through a lambda body
                let through_lambda =
                    via_lambda || path[pos + 1..].iter().any(|(_, lam)| *lam);
                if !through_lambda {
                    let mut cycle: Vec<String> =
                        path[pos..].iter().map(|(id, _)| id.clone()).collect();
                    cycle.sort();
                    let key = cycle.join("->");
                    if reported.insert(key) {
                        self.report(
                            &format!("/nodes/{target}"),
                            ErrorCode::CyclicReference,
                            format!(
                                "cyclic node reference through '{}'",
                                path[pos..]
                                    .iter()
                                    .map(|(id, _)| id.as_str())
                                    .collect::<Vec<_>>()
                                    .join(" -> ")
                            ),
                        );
                    }
                }
                continue;
            }
            path.push((target.clone(), via_lambda));
            self.dfs_cycles(&target, refs, path, reported);
            path.pop();
        }
    }
}

/// Collect references from `expr` to other nodes: free `var` names that
/// match node ids, flagged with whether the reference sits under a lambda.
fn collect_node_refs(
    expr: &Expr,
    node_ids: &HashSet<&str>,
    bound: &mut Vec<String>,
    under_lambda: bool,
    out: &mut Vec<(String, bool)>,
) {
    match expr {
        Expr::Lit { .. } | Expr::Ref { .. } | Expr::Chan { .. } => {}
        Expr::Var { name } => {
            if !bound.iter().any(|b| b == name) && node_ids.contains(name.as_str()) {
                out.push((name.clone(), under_lambda));
            }
        }
        Expr::If { cond, then, els } => {
            collect_node_refs(cond, node_ids, bound, under_lambda, out);
            collect_node_refs(then, node_ids, bound, under_lambda, out);
            collect_node_refs(els, node_ids, bound, under_lambda, out);
        }
        Expr::Let { name, value, body } => {
            collect_node_refs(value, node_ids, bound, under_lambda, out);
            bound.push(name.clone());
            collect_node_refs(body, node_ids, bound, under_lambda, out);
            bound.pop();
        }
        Expr::Call { args, .. } => {
            for a in args {
                collect_node_refs(a, node_ids, bound, under_lambda, out);
            }
        }
        Expr::Lambda { params, body } => {
            let depth = bound.len();
            for p in params.iter() {
                if let Some(default) = &p.default {
                    collect_node_refs(default, node_ids, bound, under_lambda, out);
                }
                bound.push(p.name.clone());
            }
            collect_node_refs(body, node_ids, bound, true, out);
            bound.truncate(depth);
        }
        Expr::Apply { func, args } => {
            collect_node_refs(func, node_ids, bound, under_lambda, out);
            for a in args {
                collect_node_refs(a, node_ids, bound, under_lambda, out);
            }
        }
        Expr::Fix { func } => collect_node_refs(func, node_ids, bound, under_lambda, out),
        Expr::Seq { first, second } => {
            collect_node_refs(first, node_ids, bound, under_lambda, out);
            collect_node_refs(second, node_ids, bound, under_lambda, out);
        }
        Expr::Assign { cell, value } => {
            collect_node_refs(cell, node_ids, bound, under_lambda, out);
            collect_node_refs(value, node_ids, bound, under_lambda, out);
        }
        Expr::While { cond, body } => {
            collect_node_refs(cond, node_ids, bound, under_lambda, out);
            collect_node_refs(body, node_ids, bound, under_lambda, out);
        }
        Expr::For {
            var,
            from,
            to,
            body,
        } => {
            collect_node_refs(from, node_ids, bound, under_lambda, out);
            collect_node_refs(to, node_ids, bound, under_lambda, out);
            bound.push(var.clone());
            collect_node_refs(body, node_ids, bound, under_lambda, out);
            bound.pop();
        }
        Expr::Iter {
            var,
            collection,
            body,
        } => {
            collect_node_refs(collection, node_ids, bound, under_lambda, out);
            bound.push(var.clone());
            collect_node_refs(body, node_ids, bound, under_lambda, out);
            bound.pop();
        }
        Expr::Effect { args, .. } => {
            for a in args {
                collect_node_refs(a, node_ids, bound, under_lambda, out);
            }
        }
        Expr::RefNew { init } => collect_node_refs(init, node_ids, bound, under_lambda, out),
        Expr::Deref { cell } => collect_node_refs(cell, node_ids, bound, under_lambda, out),
        Expr::Try {
            body,
            catch,
            fallback,
        } => {
            collect_node_refs(body, node_ids, bound, under_lambda, out);
            if let Some(catch) = catch {
                bound.push(catch.param.clone());
                collect_node_refs(&catch.body, node_ids, bound, under_lambda, out);
                bound.pop();
            }
            if let Some(fallback) = fallback {
                collect_node_refs(fallback, node_ids, bound, under_lambda, out);
            }
        }
        Expr::Par { exprs } => {
            for e in exprs {
                collect_node_refs(e, node_ids, bound, under_lambda, out);
            }
        }
        Expr::Spawn { body } => collect_node_refs(body, node_ids, bound, under_lambda, out),
        Expr::Await {
            future, fallback, ..
        } => {
            collect_node_refs(future, node_ids, bound, under_lambda, out);
            if let Some(fallback) = fallback {
                collect_node_refs(fallback, node_ids, bound, under_lambda, out);
            }
        }
        Expr::Send { channel, value } => {
            collect_node_refs(channel, node_ids, bound, under_lambda, out);
            collect_node_refs(value, node_ids, bound, under_lambda, out);
        }
        Expr::Recv { channel } => collect_node_refs(channel, node_ids, bound, under_lambda, out),
        Expr::Select { futures, .. } => {
            for e in futures {
                collect_node_refs(e, node_ids, bound, under_lambda, out);
            }
        }
        Expr::Race { tasks } => {
            for e in tasks {
                collect_node_refs(e, node_ids, bound, under_lambda, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn int_lit(n: i64) -> Json {
        json!({"kind": "lit", "type": {"kind": "int"}, "value": n})
    }

    #[test]
    fn test_minimal_air_document() {
        let doc = json!({
            "version": "1.0.0",
            "nodes": [{"id": "a", "expr": int_lit(2)}],
            "result": "a"
        });
        let validated = validate_air(&doc).expect("valid");
        assert_eq!(validated.layer, Layer::Air);
        assert_eq!(validated.result, "a");
    }

    #[test]
    fn test_version_major_gating() {
        let doc = json!({
            "version": "2.0.0",
            "nodes": [{"id": "a", "expr": int_lit(1)}],
            "result": "a"
        });
        let errs = validate_air(&doc).expect_err("wrong major");
        assert!(errs.iter().any(|d| d.path == "/version"));

        let errs = validate_pir(&json!({
            "version": "1.0.0",
            "nodes": [{"id": "a", "expr": int_lit(1)}],
            "result": "a"
        }))
        .expect_err("wrong major");
        assert!(errs.iter().any(|d| d.path == "/version"));
    }

    #[test]
    fn test_duplicate_node_ids() {
        let doc = json!({
            "version": "1.0.0",
            "nodes": [
                {"id": "a", "expr": int_lit(1)},
                {"id": "a", "expr": int_lit(2)}
            ],
            "result": "a"
        });
        let errs = validate_air(&doc).expect_err("dup");
        assert!(errs.iter().any(|d| d.code == ErrorCode::DuplicateNodeId));
    }

    #[test]
    fn test_bad_identifier() {
        let doc = json!({
            "version": "1.0.0",
            "nodes": [{"id": "1bad", "expr": int_lit(1)}],
            "result": "1bad"
        });
        let errs = validate_air(&doc).expect_err("bad id");
        assert!(errs.iter().any(|d| d.code == ErrorCode::InvalidIdFormat));
    }

    #[test]
    fn test_result_reference() {
        let doc = json!({
            "version": "1.0.0",
            "nodes": [{"id": "a", "expr": int_lit(1)}],
            "result": "missing"
        });
        let errs = validate_air(&doc).expect_err("missing result");
        assert!(errs
            .iter()
            .any(|d| d.code == ErrorCode::InvalidResultReference));
    }

    #[test]
    fn test_cir_forms_rejected_in_air() {
        let doc = json!({
            "version": "1.0.0",
            "nodes": [{"id": "f", "expr": {
                "kind": "lambda",
                "params": [{"name": "x"}],
                "body": {"kind": "var", "name": "x"}
            }}],
            "result": "f"
        });
        let errs = validate_air(&doc).expect_err("lambda in AIR");
        assert!(errs.iter().any(|d| d.code == ErrorCode::InvalidExprFormat));
        // The same document is fine at CIR
        validate_cir(&doc).expect("valid CIR");
    }

    #[test]
    fn test_node_not_both_expr_and_blocks() {
        let doc = json!({
            "version": "1.0.0",
            "nodes": [{
                "id": "n",
                "expr": int_lit(1),
                "blocks": [],
                "entry": "b0"
            }],
            "result": "n"
        });
        let errs = validate_lir(&doc).expect_err("hybrid both");
        assert!(!errs.is_empty());
    }

    #[test]
    fn test_block_targets_checked() {
        let doc = json!({
            "version": "1.0.0",
            "nodes": [{
                "id": "main",
                "blocks": [{
                    "id": "b0",
                    "instructions": [],
                    "terminator": {"kind": "jump", "to": "nowhere"}
                }],
                "entry": "b0"
            }],
            "result": "main"
        });
        let errs = validate_lir(&doc).expect_err("bad target");
        assert!(errs.iter().any(|d| d.message.contains("nowhere")));
    }

    #[test]
    fn test_phi_predecessor_checked() {
        let doc = json!({
            "version": "1.0.0",
            "nodes": [{
                "id": "main",
                "blocks": [{
                    "id": "b0",
                    "instructions": [{
                        "op": "phi",
                        "target": "x",
                        "sources": [{"block": "ghost", "var": "y"}]
                    }],
                    "terminator": {"kind": "return"}
                }],
                "entry": "b0"
            }],
            "result": "main"
        });
        let errs = validate_lir(&doc).expect_err("bad phi");
        assert!(errs.iter().any(|d| d.message.contains("ghost")));
    }

    #[test]
    fn test_cycle_detected() {
        let doc = json!({
            "version": "1.0.0",
            "nodes": [
                {"id": "a", "expr": {"kind": "var", "name": "b"}},
                {"id": "b", "expr": {"kind": "var", "name": "a"}}
            ],
            "result": "a"
        });
        let errs = validate_air(&doc).expect_err("cycle");
        assert!(errs.iter().any(|d| d.code == ErrorCode::CyclicReference));
    }

    #[test]
    fn test_cycle_through_lambda_permitted() {
        let doc = json!({
            "version": "1.0.0",
            "nodes": [
                {"id": "f", "expr": {
                    "kind": "lambda",
                    "params": [{"name": "n"}],
                    "body": {"kind": "var", "name": "g"}
                }},
                {"id": "g", "expr": {"kind": "var", "name": "f"}}
            ],
            "result": "g"
        });
        validate_cir(&doc).expect("recursion through a lambda is legal");
    }

    #[test]
    fn test_let_bound_names_excluded_from_cycles() {
        let doc = json!({
            "version": "1.0.0",
            "nodes": [
                {"id": "a", "expr": {
                    "kind": "let",
                    "name": "a",
                    "value": int_lit(1),
                    "body": {"kind": "var", "name": "a"}
                }}
            ],
            "result": "a"
        });
        validate_air(&doc).expect("let binding shadows the node id");
    }

    #[test]
    fn test_pir_instructions_rejected_in_lir() {
        let doc = json!({
            "version": "1.0.0",
            "nodes": [{
                "id": "main",
                "blocks": [{
                    "id": "b0",
                    "instructions": [{"op": "spawn", "target": "f", "node": "w"}],
                    "terminator": {"kind": "return"}
                }],
                "entry": "b0"
            }],
            "result": "main"
        });
        let errs = validate_lir(&doc).expect_err("spawn below PIR");
        assert!(!errs.is_empty());
    }

    #[test]
    fn test_validation_is_deterministic() {
        let doc = json!({
            "version": "1.0.0",
            "nodes": [
                {"id": "a", "expr": {"kind": "var", "name": "b"}},
                {"id": "b", "expr": {"kind": "var", "name": "a"}},
                {"id": "1bad", "expr": int_lit(0)}
            ],
            "result": "ghost"
        });
        let first = validate_air(&doc).expect_err("invalid");
        let second = validate_air(&doc).expect_err("invalid");
        assert_eq!(first, second);
    }
}
