//! # Operator Registry
//!
//! Central registry for all domain operators. Operators are keyed by the
//! qualified `namespace:name` string (e.g. `core:add`) and carry arity/type
//! metadata plus a native implementation.
//!
//! Implementations receive already-evaluated operands and either return a
//! value (possibly an error value) or raise a [`SpiralError`] the caller
//! converts to an error value. Pure operators may be reordered or memoised
//! by callers; non-pure operators may not.
//!
//! The registry is constructed once per evaluation and immutable thereafter.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::SpiralError;
use crate::types::Type;
use crate::value::Value;

pub mod boolean;
pub mod core;
pub mod list;
pub mod set;

pub use self::boolean::create_bool_registry;
pub use self::core::create_core_registry;
pub use self::list::create_list_registry;
pub use self::set::create_set_registry;

/// Native operator implementation over evaluated operands.
pub type OperatorImpl = Rc<dyn Fn(&[Value]) -> Result<Value, SpiralError>>;

/// One registered operator.
#[derive(Clone)]
pub struct Operator {
    pub namespace: String,
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub pure: bool,
    imp: OperatorImpl,
}

impl Operator {
    pub fn qualified(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("qualified", &self.qualified())
            .field("params", &self.params)
            .field("ret", &self.ret)
            .field("pure", &self.pure)
            .finish_non_exhaustive()
    }
}

/// Define an operator from its parts.
pub fn define_operator(
    namespace: &str,
    name: &str,
    params: Vec<Type>,
    ret: Type,
    pure: bool,
    imp: impl Fn(&[Value]) -> Result<Value, SpiralError> + 'static,
) -> Operator {
    Operator {
        namespace: namespace.to_string(),
        name: name.to_string(),
        params,
        ret,
        pure,
        imp: Rc::new(imp),
    }
}

/// Namespaced operator table.
#[derive(Debug, Default, Clone)]
pub struct OperatorRegistry {
    ops: HashMap<String, Operator>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        OperatorRegistry {
            ops: HashMap::new(),
        }
    }

    /// Register an operator; duplicates are rejected.
    pub fn register(&mut self, op: Operator) -> Result<(), SpiralError> {
        let key = op.qualified();
        if self.ops.contains_key(&key) {
            return Err(SpiralError::DuplicateRegistration(key));
        }
        self.ops.insert(key, op);
        Ok(())
    }

    /// Absorb every operator from `other`; duplicates are rejected.
    pub fn merge(&mut self, other: OperatorRegistry) -> Result<(), SpiralError> {
        for (_, op) in other.ops {
            self.register(op)?;
        }
        Ok(())
    }

    pub fn lookup(&self, namespace: &str, name: &str) -> Option<&Operator> {
        self.ops.get(&format!("{namespace}:{name}"))
    }

    pub fn lookup_qualified(&self, key: &str) -> Option<&Operator> {
        self.ops.get(key)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Static call check: arity plus structural parameter types. Returns
    /// the declared return type.
    pub fn check_call(&self, key: &str, arg_types: &[Type]) -> Result<Type, SpiralError> {
        let op = self
            .ops
            .get(key)
            .ok_or_else(|| SpiralError::UnknownOperator(key.to_string()))?;
        if arg_types.len() != op.params.len() {
            return Err(SpiralError::Arity {
                name: key.to_string(),
                expected: op.params.len(),
                actual: arg_types.len(),
            });
        }
        for (i, (declared, actual)) in op.params.iter().zip(arg_types.iter()).enumerate() {
            if !declared.accepts(actual) {
                return Err(SpiralError::ParamType {
                    name: key.to_string(),
                    index: i,
                    expected: declared.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        Ok(op.ret.clone())
    }

    /// Call-site check against evaluated operand values.
    pub fn check_values(&self, key: &str, args: &[Value]) -> Result<(), SpiralError> {
        let arg_types: Vec<Type> = args.iter().map(Value::runtime_type).collect();
        self.check_call(key, &arg_types).map(|_| ())
    }

    /// Dispatch a call: arity check, then apply the implementation. Raised
    /// error kinds are converted to error values.
    pub fn call(&self, key: &str, args: &[Value]) -> Value {
        let Some(op) = self.ops.get(key) else {
            return Value::from_host_error(&SpiralError::UnknownOperator(key.to_string()));
        };
        if args.len() != op.params.len() {
            return Value::from_host_error(&SpiralError::Arity {
                name: key.to_string(),
                expected: op.params.len(),
                actual: args.len(),
            });
        }
        match (op.imp)(args) {
            Ok(value) => value,
            Err(err) => Value::from_host_error(&err),
        }
    }
}

/// The full standard registry: core, bool, list and set domains merged.
pub fn create_standard_registry() -> OperatorRegistry {
    let mut registry = create_core_registry();
    for domain in [
        create_bool_registry(),
        create_list_registry(),
        create_set_registry(),
    ] {
        registry
            .merge(domain)
            .expect("standard domains have disjoint namespaces");
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_op() -> Operator {
        define_operator(
            "test",
            "id",
            vec![Type::any()],
            Type::any(),
            true,
            |args| Ok(args[0].clone()),
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = OperatorRegistry::new();
        reg.register(sample_op()).expect("register");
        assert!(reg.lookup("test", "id").is_some());
        assert!(reg.lookup_qualified("test:id").is_some());
        assert!(reg.lookup("test", "missing").is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut reg = OperatorRegistry::new();
        reg.register(sample_op()).expect("first");
        assert!(matches!(
            reg.register(sample_op()),
            Err(SpiralError::DuplicateRegistration(_))
        ));
    }

    #[test]
    fn test_check_call() {
        let mut reg = OperatorRegistry::new();
        reg.register(define_operator(
            "test",
            "not",
            vec![Type::Bool],
            Type::Bool,
            true,
            |args| Ok(Value::Bool(!args[0].expect_bool()?)),
        ))
        .expect("register");

        assert_eq!(
            reg.check_call("test:not", &[Type::Bool]).expect("ok"),
            Type::Bool
        );
        assert!(matches!(
            reg.check_call("test:not", &[Type::Int]),
            Err(SpiralError::ParamType { .. })
        ));
        assert!(matches!(
            reg.check_call("test:not", &[]),
            Err(SpiralError::Arity { .. })
        ));
        assert!(matches!(
            reg.check_call("test:missing", &[]),
            Err(SpiralError::UnknownOperator(_))
        ));
    }

    #[test]
    fn test_call_converts_raised_errors() {
        let mut reg = OperatorRegistry::new();
        reg.register(define_operator(
            "test",
            "boom",
            vec![],
            Type::Void,
            true,
            |_| Err(SpiralError::Domain("boom".to_string())),
        ))
        .expect("register");

        let out = reg.call("test:boom", &[]);
        assert!(out.is_error());
        let missing = reg.call("test:nope", &[]);
        assert_eq!(
            missing.error_code(),
            Some(crate::error::ErrorCode::UnknownOperator)
        );
    }

    #[test]
    fn test_standard_registry_contents() {
        let reg = create_standard_registry();
        assert!(reg.lookup("core", "add").is_some());
        assert!(reg.lookup("bool", "and").is_some());
        assert!(reg.lookup("list", "length").is_some());
        assert!(reg.lookup("set", "union").is_some());
    }
}
