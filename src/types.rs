//! # Type Universe
//!
//! The closed type sum shared by all five IR layers: primitives,
//! single-parameter containers, two-parameter maps, named opaque types, and
//! arrow types (plain, async, channel).
//!
//! Type equality is structural and recursive; named opaque types compare by
//! name only (the derived `PartialEq` gives exactly this). Two opaque names
//! are reserved as signature wildcards for polymorphic operators: `any`
//! accepts every type, `num` accepts `int` and `float`.

use std::fmt;

/// Channel flavour tag. Stored and reported, but not enforced: every kind
/// gets bounded-FIFO semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Single producer, single consumer
    Spsc,
    /// Multi producer, single consumer
    Mpsc,
    /// Multi producer, multi consumer
    Mpmc,
    /// Broadcast
    Broadcast,
}

impl ChannelKind {
    /// Parse the wire spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "spsc" => Some(ChannelKind::Spsc),
            "mpsc" => Some(ChannelKind::Mpsc),
            "mpmc" => Some(ChannelKind::Mpmc),
            "broadcast" => Some(ChannelKind::Broadcast),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Spsc => "spsc",
            ChannelKind::Mpsc => "mpsc",
            ChannelKind::Mpmc => "mpmc",
            ChannelKind::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed type sum for SPIRAL values and annotations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Int,
    Float,
    String,
    Void,
    /// `list<T>`
    List(Box<Type>),
    /// `set<T>`
    Set(Box<Type>),
    /// `option<T>`
    Option(Box<Type>),
    /// `ref<T>` — a mutable reference cell
    Ref(Box<Type>),
    /// `future<T>` — a handle to a value produced by a task
    Future(Box<Type>),
    /// `task<T>`
    Task(Box<Type>),
    /// `map<K, V>`
    Map(Box<Type>, Box<Type>),
    /// Named opaque type; compares by name only
    Opaque(String),
    /// `fn(params) -> ret` with a parallel per-parameter optional flag
    Fn {
        params: Vec<Type>,
        optional: Vec<bool>,
        ret: Box<Type>,
    },
    /// `async(params) -> future<ret>`
    Async { params: Vec<Type>, ret: Box<Type> },
    /// `channel<kind, T>`
    Channel { kind: ChannelKind, elem: Box<Type> },
}

impl Type {
    /// Convenience constructor for `list<T>`.
    pub fn list(elem: Type) -> Type {
        Type::List(Box::new(elem))
    }

    /// Convenience constructor for `set<T>`.
    pub fn set(elem: Type) -> Type {
        Type::Set(Box::new(elem))
    }

    /// Convenience constructor for `option<T>`.
    pub fn option(elem: Type) -> Type {
        Type::Option(Box::new(elem))
    }

    /// Convenience constructor for `map<K, V>`.
    pub fn map(key: Type, value: Type) -> Type {
        Type::Map(Box::new(key), Box::new(value))
    }

    /// Convenience constructor for the `any` signature wildcard.
    pub fn any() -> Type {
        Type::Opaque("any".to_string())
    }

    /// Convenience constructor for the `num` signature wildcard.
    pub fn num() -> Type {
        Type::Opaque("num".to_string())
    }

    /// Whether this is one of the two signature wildcards.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Type::Opaque(name) if name == "any" || name == "num")
    }

    /// Structural acceptance for operator signatures.
    ///
    /// Exact structural equality, except the wildcards: `any` accepts every
    /// type and `num` accepts `int`/`float`. Wildcards recurse through
    /// parameterised positions, so `list<any>` accepts every list.
    pub fn accepts(&self, actual: &Type) -> bool {
        match (self, actual) {
            (Type::Opaque(name), _) if name == "any" => true,
            (Type::Opaque(name), Type::Int | Type::Float) if name == "num" => true,
            (Type::List(a), Type::List(b))
            | (Type::Set(a), Type::Set(b))
            | (Type::Option(a), Type::Option(b))
            | (Type::Ref(a), Type::Ref(b))
            | (Type::Future(a), Type::Future(b))
            | (Type::Task(a), Type::Task(b)) => a.accepts(b),
            (Type::Map(ka, va), Type::Map(kb, vb)) => ka.accepts(kb) && va.accepts(vb),
            (
                Type::Channel { kind: ka, elem: ea },
                Type::Channel { kind: kb, elem: eb },
            ) => ka == kb && ea.accepts(eb),
            (
                Type::Fn {
                    params: pa,
                    ret: ra,
                    ..
                },
                Type::Fn {
                    params: pb,
                    ret: rb,
                    ..
                },
            ) => {
                pa.len() == pb.len()
                    && pa.iter().zip(pb.iter()).all(|(a, b)| a.accepts(b))
                    && ra.accepts(rb)
            }
            (
                Type::Async {
                    params: pa,
                    ret: ra,
                },
                Type::Async {
                    params: pb,
                    ret: rb,
                },
            ) => {
                pa.len() == pb.len()
                    && pa.iter().zip(pb.iter()).all(|(a, b)| a.accepts(b))
                    && ra.accepts(rb)
            }
            _ => self == actual,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::Void => write!(f, "void"),
            Type::List(t) => write!(f, "list<{t}>"),
            Type::Set(t) => write!(f, "set<{t}>"),
            Type::Option(t) => write!(f, "option<{t}>"),
            Type::Ref(t) => write!(f, "ref<{t}>"),
            Type::Future(t) => write!(f, "future<{t}>"),
            Type::Task(t) => write!(f, "task<{t}>"),
            Type::Map(k, v) => write!(f, "map<{k}, {v}>"),
            Type::Opaque(name) => write!(f, "opaque({name})"),
            Type::Fn {
                params,
                optional,
                ret,
            } => {
                write!(f, "fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                    if optional.get(i).copied().unwrap_or(false) {
                        write!(f, "?")?;
                    }
                }
                write!(f, ") -> {ret}")
            }
            Type::Async { params, ret } => {
                write!(f, "async(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> future<{ret}>")
            }
            Type::Channel { kind, elem } => write!(f, "channel<{kind}, {elem}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        assert_eq!(Type::list(Type::Int), Type::list(Type::Int));
        assert_ne!(Type::list(Type::Int), Type::list(Type::Float));
        assert_eq!(
            Type::map(Type::String, Type::list(Type::Int)),
            Type::map(Type::String, Type::list(Type::Int)),
        );
    }

    #[test]
    fn test_opaque_compares_by_name() {
        assert_eq!(
            Type::Opaque("handle".to_string()),
            Type::Opaque("handle".to_string())
        );
        assert_ne!(
            Type::Opaque("handle".to_string()),
            Type::Opaque("token".to_string())
        );
    }

    #[test]
    fn test_wildcard_acceptance() {
        assert!(Type::any().accepts(&Type::list(Type::Int)));
        assert!(Type::num().accepts(&Type::Int));
        assert!(Type::num().accepts(&Type::Float));
        assert!(!Type::num().accepts(&Type::String));
        assert!(Type::list(Type::any()).accepts(&Type::list(Type::Bool)));
        assert!(!Type::list(Type::num()).accepts(&Type::Set(Box::new(Type::Int))));
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::list(Type::Int).to_string(), "list<int>");
        let arrow = Type::Fn {
            params: vec![Type::Int, Type::String],
            optional: vec![false, true],
            ret: Box::new(Type::Bool),
        };
        assert_eq!(arrow.to_string(), "fn(int, string?) -> bool");
        let chan = Type::Channel {
            kind: ChannelKind::Mpsc,
            elem: Box::new(Type::Int),
        };
        assert_eq!(chan.to_string(), "channel<mpsc, int>");
    }

    #[test]
    fn test_channel_kind_parse() {
        assert_eq!(ChannelKind::parse("spsc"), Some(ChannelKind::Spsc));
        assert_eq!(ChannelKind::parse("broadcast"), Some(ChannelKind::Broadcast));
        assert_eq!(ChannelKind::parse("simplex"), None);
    }
}
