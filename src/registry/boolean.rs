//! Bool domain: logical operators.
//!
//! Operands arrive pre-evaluated; error short-circuiting happens at the call
//! site, not here.

use crate::types::Type;
use crate::value::Value;

use super::{define_operator, OperatorRegistry};

/// Operators in the `bool` namespace: `and`, `or`, `not`, `xor`.
pub fn create_bool_registry() -> OperatorRegistry {
    let mut reg = OperatorRegistry::new();
    let bool2 = || vec![Type::Bool, Type::Bool];

    let entries = vec![
        define_operator("bool", "and", bool2(), Type::Bool, true, |args| {
            Ok(Value::Bool(args[0].expect_bool()? && args[1].expect_bool()?))
        }),
        define_operator("bool", "or", bool2(), Type::Bool, true, |args| {
            Ok(Value::Bool(args[0].expect_bool()? || args[1].expect_bool()?))
        }),
        define_operator("bool", "xor", bool2(), Type::Bool, true, |args| {
            Ok(Value::Bool(args[0].expect_bool()? ^ args[1].expect_bool()?))
        }),
        define_operator("bool", "not", vec![Type::Bool], Type::Bool, true, |args| {
            Ok(Value::Bool(!args[0].expect_bool()?))
        }),
    ];

    for op in entries {
        reg.register(op).expect("bool operators are distinct");
    }
    reg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_truth_tables() {
        let reg = create_bool_registry();
        let t = Value::Bool(true);
        let f = Value::Bool(false);
        assert_eq!(reg.call("bool:and", &[t.clone(), f.clone()]), f);
        assert_eq!(reg.call("bool:or", &[t.clone(), f.clone()]), t);
        assert_eq!(reg.call("bool:xor", &[t.clone(), t.clone()]), f);
        assert_eq!(reg.call("bool:not", &[f.clone()]), t);
    }

    #[test]
    fn test_non_bool_operand() {
        let reg = create_bool_registry();
        let out = reg.call("bool:and", &[Value::Int(1), Value::Bool(true)]);
        assert_eq!(out.error_code(), Some(ErrorCode::TypeError));
    }
}
