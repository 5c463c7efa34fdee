//! # Value Universe
//!
//! Runtime values mirroring the type universe, with the payloads evaluation
//! needs: closures carry a parameter list, a body and a captured environment
//! snapshot; futures and channels are non-owning handles into the session's
//! task table and channel store; errors carry a code, an optional message and
//! optional metadata.
//!
//! ## Hashing
//!
//! [`Value::hash_key`] renders the hash used for set membership and map keys:
//! primitives hash to `<tag>:<literal>`, options hash as `o:none` /
//! `o:some:<inner>`, and every other value hashes by a per-instance identity
//! token — set and map entries therefore compare by identity for complex
//! values.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::{Expr, Param};
use crate::env::ValueEnv;
use crate::error::{ErrorCode, SpiralError};
use crate::types::{ChannelKind, Type};

/// A closure: parameters, body, and the captured environment snapshot.
///
/// The capture is a live reference to a persistent environment, not a deep
/// clone; default-value expressions are evaluated in that environment rather
/// than at the call site.
#[derive(Debug, Clone)]
pub struct Closure {
    pub params: Rc<Vec<Param>>,
    pub body: Rc<Expr>,
    pub env: ValueEnv,
}

impl Closure {
    /// Number of non-optional parameters.
    pub fn required_arity(&self) -> usize {
        self.params.iter().filter(|p| !p.optional).count()
    }
}

/// An error value: code, optional message, optional metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub code: ErrorCode,
    pub message: Option<String>,
    pub meta: Vec<(String, String)>,
}

/// Set payload: entries keyed by [`Value::hash_key`].
#[derive(Debug, Clone, Default)]
pub struct SetData {
    pub entries: HashMap<String, Value>,
}

/// Map payload: entries keyed by the key value's [`Value::hash_key`].
#[derive(Debug, Clone, Default)]
pub struct MapData {
    pub entries: HashMap<String, (Value, Value)>,
}

/// Non-owning handle to a channel in the session's channel store.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelHandle {
    pub id: String,
    pub kind: ChannelKind,
    pub capacity: usize,
}

/// Non-owning handle to a future in the scheduler's task table.
#[derive(Debug, Clone, PartialEq)]
pub struct FutureHandle {
    pub task_id: String,
}

/// The index/value pair produced by `select`; index −1 denotes timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectOutcome {
    pub index: i64,
    pub value: Value,
}

/// A named opaque value.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueValue {
    pub type_name: String,
    pub repr: String,
}

/// The closed runtime value sum.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Void,
    List(Rc<Vec<Value>>),
    Set(Rc<SetData>),
    Map(Rc<MapData>),
    /// `none` doubles as the undefined sentinel for omitted optionals
    Option(Rc<Option<Value>>),
    Closure(Rc<Closure>),
    /// Handle into the session's reference-cell table
    RefCell(Rc<str>),
    Error(Rc<ErrorValue>),
    Future(Rc<FutureHandle>),
    Channel(Rc<ChannelHandle>),
    Select(Rc<SelectOutcome>),
    Opaque(Rc<OpaqueValue>),
}

impl Value {
    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(Rc::from(s.into().into_boxed_str()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(items))
    }

    /// Build a set, deduplicating by hash key (last write wins).
    pub fn set_from(items: impl IntoIterator<Item = Value>) -> Value {
        let mut data = SetData::default();
        for item in items {
            data.entries.insert(item.hash_key(), item);
        }
        Value::Set(Rc::new(data))
    }

    /// Build a map from key/value pairs, deduplicating by key hash.
    pub fn map_from(pairs: impl IntoIterator<Item = (Value, Value)>) -> Value {
        let mut data = MapData::default();
        for (k, v) in pairs {
            data.entries.insert(k.hash_key(), (k, v));
        }
        Value::Map(Rc::new(data))
    }

    pub fn some(v: Value) -> Value {
        Value::Option(Rc::new(Some(v)))
    }

    /// The empty option; also the undefined sentinel.
    pub fn none() -> Value {
        Value::Option(Rc::new(None))
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Value {
        Value::Error(Rc::new(ErrorValue {
            code,
            message: Some(message.into()),
            meta: Vec::new(),
        }))
    }

    pub fn error_bare(code: ErrorCode) -> Value {
        Value::Error(Rc::new(ErrorValue {
            code,
            message: None,
            meta: Vec::new(),
        }))
    }

    /// Convert a host-raised error into the error-value shape.
    pub fn from_host_error(err: &SpiralError) -> Value {
        Value::error(err.code(), err.to_string())
    }

    pub fn future(task_id: impl Into<String>) -> Value {
        Value::Future(Rc::new(FutureHandle {
            task_id: task_id.into(),
        }))
    }

    pub fn channel(id: impl Into<String>, kind: ChannelKind, capacity: usize) -> Value {
        Value::Channel(Rc::new(ChannelHandle {
            id: id.into(),
            kind,
            capacity,
        }))
    }

    pub fn select_outcome(index: i64, value: Value) -> Value {
        Value::Select(Rc::new(SelectOutcome { index, value }))
    }

    // ------------------------------------------------------------------
    // Predicates and extraction
    // ------------------------------------------------------------------

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    pub fn is_closure(&self) -> bool {
        matches!(self, Value::Closure(_))
    }

    /// Error code if this is an error value.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Value::Error(e) => Some(e.code),
            _ => None,
        }
    }

    pub fn expect_bool(&self) -> Result<bool, SpiralError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(SpiralError::Type(format!(
                "expected bool, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn expect_int(&self) -> Result<i64, SpiralError> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(SpiralError::Type(format!(
                "expected int, got {}",
                other.type_name()
            ))),
        }
    }

    /// Numeric extraction: ints widen to float.
    pub fn expect_num(&self) -> Result<f64, SpiralError> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(x) => Ok(*x),
            other => Err(SpiralError::Type(format!(
                "expected int or float, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn expect_str(&self) -> Result<&str, SpiralError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(SpiralError::Type(format!(
                "expected string, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn expect_list(&self) -> Result<&Rc<Vec<Value>>, SpiralError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(SpiralError::Type(format!(
                "expected list, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn expect_set(&self) -> Result<&Rc<SetData>, SpiralError> {
        match self {
            Value::Set(data) => Ok(data),
            other => Err(SpiralError::Type(format!(
                "expected set, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn expect_closure(&self) -> Result<&Rc<Closure>, SpiralError> {
        match self {
            Value::Closure(c) => Ok(c),
            other => Err(SpiralError::Type(format!(
                "expected closure, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn expect_channel(&self) -> Result<&Rc<ChannelHandle>, SpiralError> {
        match self {
            Value::Channel(c) => Ok(c),
            other => Err(SpiralError::Type(format!(
                "expected channel, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn expect_future(&self) -> Result<&Rc<FutureHandle>, SpiralError> {
        match self {
            Value::Future(fh) => Ok(fh),
            other => Err(SpiralError::Type(format!(
                "expected future, got {}",
                other.type_name()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Typing, hashing, display
    // ------------------------------------------------------------------

    /// Short tag for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Void => "void",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Option(_) => "option",
            Value::Closure(_) => "fn",
            Value::RefCell(_) => "ref",
            Value::Error(_) => "error",
            Value::Future(_) => "future",
            Value::Channel(_) => "channel",
            Value::Select(_) => "select",
            Value::Opaque(_) => "opaque",
        }
    }

    /// Best-effort runtime type, used for call-site parameter checks.
    /// Container element types come from the first element, `any` when
    /// empty or mixed knowledge is unavailable.
    pub fn runtime_type(&self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Str(_) => Type::String,
            Value::Void => Type::Void,
            Value::List(items) => Type::list(
                items
                    .first()
                    .map(Value::runtime_type)
                    .unwrap_or_else(Type::any),
            ),
            Value::Set(data) => Type::set(
                data.entries
                    .values()
                    .next()
                    .map(Value::runtime_type)
                    .unwrap_or_else(Type::any),
            ),
            Value::Map(data) => {
                let (k, v) = data
                    .entries
                    .values()
                    .next()
                    .map(|(k, v)| (k.runtime_type(), v.runtime_type()))
                    .unwrap_or_else(|| (Type::any(), Type::any()));
                Type::map(k, v)
            }
            Value::Option(inner) => Type::option(
                inner
                    .as_ref()
                    .as_ref()
                    .map(Value::runtime_type)
                    .unwrap_or_else(Type::any),
            ),
            Value::Closure(c) => Type::Fn {
                params: c
                    .params
                    .iter()
                    .map(|p| p.ty.clone().unwrap_or_else(Type::any))
                    .collect(),
                optional: c.params.iter().map(|p| p.optional).collect(),
                ret: Box::new(Type::any()),
            },
            Value::RefCell(_) => Type::Ref(Box::new(Type::any())),
            Value::Error(_) => Type::any(),
            Value::Future(_) => Type::Future(Box::new(Type::any())),
            Value::Channel(c) => Type::Channel {
                kind: c.kind,
                elem: Box::new(Type::any()),
            },
            Value::Select(_) => Type::any(),
            Value::Opaque(o) => Type::Opaque(o.type_name.clone()),
        }
    }

    /// Render the hash key used for set membership and map keys.
    pub fn hash_key(&self) -> String {
        match self {
            Value::Bool(b) => format!("b:{b}"),
            Value::Int(i) => format!("i:{i}"),
            Value::Float(x) => format!("f:{x}"),
            Value::Str(s) => format!("s:{s}"),
            Value::Void => "v:void".to_string(),
            Value::Option(inner) => match inner.as_ref() {
                None => "o:none".to_string(),
                Some(v) => format!("o:some:{}", v.hash_key()),
            },
            // Complex values hash by per-instance identity
            Value::List(rc) => format!("l:{:p}", Rc::as_ptr(rc)),
            Value::Set(rc) => format!("t:{:p}", Rc::as_ptr(rc)),
            Value::Map(rc) => format!("m:{:p}", Rc::as_ptr(rc)),
            Value::Closure(rc) => format!("c:{:p}", Rc::as_ptr(rc)),
            Value::RefCell(id) => format!("r:{id}"),
            Value::Error(rc) => format!("e:{:p}", Rc::as_ptr(rc)),
            Value::Future(fh) => format!("u:{}", fh.task_id),
            Value::Channel(ch) => format!("h:{}", ch.id),
            Value::Select(rc) => format!("x:{:p}", Rc::as_ptr(rc)),
            Value::Opaque(rc) => format!("q:{:p}", Rc::as_ptr(rc)),
        }
    }
}

/// Structural equality for primitives, options, lists, maps, sets and
/// errors; identity equality for closures, cells, futures and channels.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Void, Value::Void) => true,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => {
                a.entries.len() == b.entries.len()
                    && a.entries.keys().all(|k| b.entries.contains_key(k))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.entries.len() == b.entries.len()
                    && a.entries
                        .iter()
                        .all(|(k, (_, v))| b.entries.get(k).is_some_and(|(_, w)| v == w))
            }
            (Value::Option(a), Value::Option(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::RefCell(a), Value::RefCell(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a.code == b.code && a.message == b.message,
            (Value::Future(a), Value::Future(b)) => a.task_id == b.task_id,
            (Value::Channel(a), Value::Channel(b)) => a.id == b.id,
            (Value::Select(a), Value::Select(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "\"{s}\""),
            Value::Void => write!(f, "void"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Set(data) => {
                let mut keys: Vec<&String> = data.entries.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, k) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", data.entries[*k])?;
                }
                write!(f, "}}")
            }
            Value::Map(data) => {
                let mut keys: Vec<&String> = data.entries.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, k) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    let (key, value) = &data.entries[*k];
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Value::Option(inner) => match inner.as_ref() {
                None => write!(f, "none"),
                Some(v) => write!(f, "some({v})"),
            },
            Value::Closure(c) => write!(f, "<closure/{}>", c.params.len()),
            Value::RefCell(id) => write!(f, "ref({id})"),
            Value::Error(e) => match &e.message {
                Some(msg) => write!(f, "error({}: {})", e.code, msg),
                None => write!(f, "error({})", e.code),
            },
            Value::Future(fh) => write!(f, "future({})", fh.task_id),
            Value::Channel(ch) => write!(f, "channel<{}>({})", ch.kind, ch.id),
            Value::Select(s) => write!(f, "select({}, {})", s.index, s.value),
            Value::Opaque(o) => write!(f, "opaque({}: {})", o.type_name, o.repr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_hash_keys() {
        assert_eq!(Value::Bool(true).hash_key(), "b:true");
        assert_eq!(Value::Int(42).hash_key(), "i:42");
        assert_eq!(Value::str("hi").hash_key(), "s:hi");
        assert_eq!(Value::Void.hash_key(), "v:void");
        assert_eq!(Value::none().hash_key(), "o:none");
        assert_eq!(Value::some(Value::Int(1)).hash_key(), "o:some:i:1");
    }

    #[test]
    fn test_complex_values_hash_by_identity() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = Value::list(vec![Value::Int(1)]);
        assert_ne!(a.hash_key(), b.hash_key());
        // The same instance hashes stably
        assert_eq!(a.hash_key(), a.clone().hash_key());
    }

    #[test]
    fn test_set_dedup() {
        let s = Value::set_from(vec![Value::Int(1), Value::Int(2), Value::Int(1)]);
        let data = s.expect_set().expect("set");
        assert_eq!(data.entries.len(), 2);
        assert!(data.entries.contains_key("i:1"));
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::Int(2)]),
            Value::list(vec![Value::Int(1), Value::Int(2)]),
        );
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_eq!(
            Value::error(ErrorCode::TypeError, "x"),
            Value::error(ErrorCode::TypeError, "x"),
        );
    }

    #[test]
    fn test_extraction_errors() {
        assert!(Value::Int(1).expect_bool().is_err());
        assert!(Value::Bool(true).expect_int().is_err());
        assert_eq!(Value::Int(3).expect_num().expect("num"), 3.0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(5).to_string(), "5");
        assert_eq!(Value::str("x").to_string(), "\"x\"");
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::Int(2)]).to_string(),
            "[1, 2]"
        );
        assert_eq!(Value::some(Value::Int(1)).to_string(), "some(1)");
        assert_eq!(
            Value::select_outcome(-1, Value::Void).to_string(),
            "select(-1, void)"
        );
    }

    #[test]
    fn test_runtime_type() {
        assert_eq!(Value::Int(1).runtime_type(), Type::Int);
        assert_eq!(
            Value::list(vec![Value::Bool(true)]).runtime_type(),
            Type::list(Type::Bool)
        );
        assert_eq!(Value::list(vec![]).runtime_type(), Type::list(Type::any()));
    }
}
