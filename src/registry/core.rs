//! Core domain: arithmetic, comparison, and string operators.
//!
//! Numeric operators are polymorphic at runtime: all-int operands produce
//! `int`, anything involving a float produces `float`. Division and modulo
//! by integer zero produce `DivideByZero`.

use crate::error::SpiralError;
use crate::types::Type;
use crate::value::Value;

use super::{define_operator, OperatorRegistry};

/// Apply a polymorphic binary numeric operator.
fn numeric_binop(
    args: &[Value],
    int_op: impl Fn(i64, i64) -> Result<i64, SpiralError>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value, SpiralError> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b)?)),
        _ => {
            let a = args[0].expect_num()?;
            let b = args[1].expect_num()?;
            Ok(Value::Float(float_op(a, b)))
        }
    }
}

/// Numeric comparison over int/float with int widening.
fn numeric_cmp(args: &[Value], cmp: impl Fn(f64, f64) -> bool) -> Result<Value, SpiralError> {
    let a = args[0].expect_num()?;
    let b = args[1].expect_num()?;
    Ok(Value::Bool(cmp(a, b)))
}

/// Operators in the `core` namespace.
pub fn create_core_registry() -> OperatorRegistry {
    let mut reg = OperatorRegistry::new();
    let num2 = || vec![Type::num(), Type::num()];

    let entries = vec![
        define_operator("core", "add", num2(), Type::num(), true, |args| {
            numeric_binop(args, |a, b| Ok(a.wrapping_add(b)), |a, b| a + b)
        }),
        define_operator("core", "sub", num2(), Type::num(), true, |args| {
            numeric_binop(args, |a, b| Ok(a.wrapping_sub(b)), |a, b| a - b)
        }),
        define_operator("core", "mul", num2(), Type::num(), true, |args| {
            numeric_binop(args, |a, b| Ok(a.wrapping_mul(b)), |a, b| a * b)
        }),
        define_operator("core", "div", num2(), Type::num(), true, |args| {
            numeric_binop(
                args,
                |a, b| {
                    if b == 0 {
                        Err(SpiralError::DivideByZero)
                    } else {
                        Ok(a.wrapping_div(b))
                    }
                },
                |a, b| a / b,
            )
        }),
        define_operator("core", "mod", num2(), Type::num(), true, |args| {
            numeric_binop(
                args,
                |a, b| {
                    if b == 0 {
                        Err(SpiralError::DivideByZero)
                    } else {
                        Ok(a.wrapping_rem(b))
                    }
                },
                |a, b| a % b,
            )
        }),
        define_operator("core", "neg", vec![Type::num()], Type::num(), true, |args| {
            match &args[0] {
                Value::Int(a) => Ok(Value::Int(a.wrapping_neg())),
                other => Ok(Value::Float(-other.expect_num()?)),
            }
        }),
        define_operator("core", "abs", vec![Type::num()], Type::num(), true, |args| {
            match &args[0] {
                Value::Int(a) => Ok(Value::Int(a.wrapping_abs())),
                other => Ok(Value::Float(other.expect_num()?.abs())),
            }
        }),
        define_operator("core", "min", num2(), Type::num(), true, |args| {
            numeric_binop(args, |a, b| Ok(a.min(b)), f64::min)
        }),
        define_operator("core", "max", num2(), Type::num(), true, |args| {
            numeric_binop(args, |a, b| Ok(a.max(b)), f64::max)
        }),
        // Equality is structural over the whole value universe
        define_operator(
            "core",
            "eq",
            vec![Type::any(), Type::any()],
            Type::Bool,
            true,
            |args| Ok(Value::Bool(args[0] == args[1])),
        ),
        define_operator(
            "core",
            "ne",
            vec![Type::any(), Type::any()],
            Type::Bool,
            true,
            |args| Ok(Value::Bool(args[0] != args[1])),
        ),
        define_operator("core", "lt", num2(), Type::Bool, true, |args| {
            numeric_cmp(args, |a, b| a < b)
        }),
        define_operator("core", "le", num2(), Type::Bool, true, |args| {
            numeric_cmp(args, |a, b| a <= b)
        }),
        define_operator("core", "gt", num2(), Type::Bool, true, |args| {
            numeric_cmp(args, |a, b| a > b)
        }),
        define_operator("core", "ge", num2(), Type::Bool, true, |args| {
            numeric_cmp(args, |a, b| a >= b)
        }),
        define_operator(
            "core",
            "concat",
            vec![Type::String, Type::String],
            Type::String,
            true,
            |args| {
                let a = args[0].expect_str()?;
                let b = args[1].expect_str()?;
                Ok(Value::str(format!("{a}{b}")))
            },
        ),
        define_operator(
            "core",
            "strlen",
            vec![Type::String],
            Type::Int,
            true,
            |args| Ok(Value::Int(args[0].expect_str()?.chars().count() as i64)),
        ),
        define_operator(
            "core",
            "upper",
            vec![Type::String],
            Type::String,
            true,
            |args| Ok(Value::str(args[0].expect_str()?.to_uppercase())),
        ),
        define_operator(
            "core",
            "lower",
            vec![Type::String],
            Type::String,
            true,
            |args| Ok(Value::str(args[0].expect_str()?.to_lowercase())),
        ),
        define_operator(
            "core",
            "toString",
            vec![Type::any()],
            Type::String,
            true,
            |args| {
                Ok(match &args[0] {
                    // Strings render without quotes
                    Value::Str(s) => Value::str(s.to_string()),
                    other => Value::str(other.to_string()),
                })
            },
        ),
        define_operator(
            "core",
            "parseInt",
            vec![Type::String],
            Type::Int,
            true,
            |args| {
                let s = args[0].expect_str()?;
                s.trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| SpiralError::Domain(format!("cannot parse '{s}' as int")))
            },
        ),
    ];

    for op in entries {
        reg.register(op).expect("core operators are distinct");
    }
    reg
}
