//! List domain: length, concat, nth, reverse, take, drop, slice.

use crate::error::SpiralError;
use crate::types::Type;
use crate::value::Value;

use super::{define_operator, OperatorRegistry};

fn index_arg(args: &[Value], i: usize) -> Result<i64, SpiralError> {
    args[i].expect_int()
}

/// Operators in the `list` namespace.
pub fn create_list_registry() -> OperatorRegistry {
    let mut reg = OperatorRegistry::new();
    let any_list = || Type::list(Type::any());

    let entries = vec![
        define_operator(
            "list",
            "length",
            vec![any_list()],
            Type::Int,
            true,
            |args| Ok(Value::Int(args[0].expect_list()?.len() as i64)),
        ),
        define_operator(
            "list",
            "concat",
            vec![any_list(), any_list()],
            Type::list(Type::any()),
            true,
            |args| {
                let mut out = args[0].expect_list()?.as_ref().clone();
                out.extend(args[1].expect_list()?.iter().cloned());
                Ok(Value::list(out))
            },
        ),
        define_operator(
            "list",
            "nth",
            vec![any_list(), Type::Int],
            Type::any(),
            true,
            |args| {
                let items = args[0].expect_list()?;
                let idx = index_arg(args, 1)?;
                if idx < 0 || idx as usize >= items.len() {
                    return Err(SpiralError::Domain(format!(
                        "index {idx} out of range for list of length {}",
                        items.len()
                    )));
                }
                Ok(items[idx as usize].clone())
            },
        ),
        define_operator(
            "list",
            "reverse",
            vec![any_list()],
            Type::list(Type::any()),
            true,
            |args| {
                let mut out = args[0].expect_list()?.as_ref().clone();
                out.reverse();
                Ok(Value::list(out))
            },
        ),
        define_operator(
            "list",
            "take",
            vec![any_list(), Type::Int],
            Type::list(Type::any()),
            true,
            |args| {
                let items = args[0].expect_list()?;
                let n = index_arg(args, 1)?.max(0) as usize;
                Ok(Value::list(items.iter().take(n).cloned().collect()))
            },
        ),
        define_operator(
            "list",
            "drop",
            vec![any_list(), Type::Int],
            Type::list(Type::any()),
            true,
            |args| {
                let items = args[0].expect_list()?;
                let n = index_arg(args, 1)?.max(0) as usize;
                Ok(Value::list(items.iter().skip(n).cloned().collect()))
            },
        ),
        define_operator(
            "list",
            "slice",
            vec![any_list(), Type::Int, Type::Int],
            Type::list(Type::any()),
            true,
            |args| {
                let items = args[0].expect_list()?;
                let start = index_arg(args, 1)?.max(0) as usize;
                let end = (index_arg(args, 2)?.max(0) as usize).min(items.len());
                if start >= end {
                    return Ok(Value::list(Vec::new()));
                }
                Ok(Value::list(items[start..end].to_vec()))
            },
        ),
        define_operator(
            "list",
            "append",
            vec![any_list(), Type::any()],
            Type::list(Type::any()),
            true,
            |args| {
                let mut out = args[0].expect_list()?.as_ref().clone();
                out.push(args[1].clone());
                Ok(Value::list(out))
            },
        ),
        define_operator(
            "list",
            "contains",
            vec![any_list(), Type::any()],
            Type::Bool,
            true,
            |args| {
                let items = args[0].expect_list()?;
                Ok(Value::Bool(items.iter().any(|v| *v == args[1])))
            },
        ),
    ];

    for op in entries {
        reg.register(op).expect("list operators are distinct");
    }
    reg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn nums(values: &[i64]) -> Value {
        Value::list(values.iter().copied().map(Value::Int).collect())
    }

    #[test]
    fn test_length_and_concat() {
        let reg = create_list_registry();
        assert_eq!(reg.call("list:length", &[nums(&[1, 2, 3])]), Value::Int(3));
        assert_eq!(
            reg.call("list:concat", &[nums(&[1]), nums(&[2, 3])]),
            nums(&[1, 2, 3])
        );
    }

    #[test]
    fn test_nth_bounds() {
        let reg = create_list_registry();
        assert_eq!(
            reg.call("list:nth", &[nums(&[1, 2]), Value::Int(1)]),
            Value::Int(2)
        );
        let out = reg.call("list:nth", &[nums(&[1, 2]), Value::Int(5)]);
        assert_eq!(out.error_code(), Some(ErrorCode::DomainError));
    }

    #[test]
    fn test_take_drop_slice() {
        let reg = create_list_registry();
        assert_eq!(
            reg.call("list:take", &[nums(&[1, 2, 3]), Value::Int(2)]),
            nums(&[1, 2])
        );
        assert_eq!(
            reg.call("list:drop", &[nums(&[1, 2, 3]), Value::Int(2)]),
            nums(&[3])
        );
        assert_eq!(
            reg.call(
                "list:slice",
                &[nums(&[1, 2, 3, 4]), Value::Int(1), Value::Int(3)]
            ),
            nums(&[2, 3])
        );
        // Degenerate ranges collapse to the empty list
        assert_eq!(
            reg.call(
                "list:slice",
                &[nums(&[1, 2]), Value::Int(2), Value::Int(1)]
            ),
            nums(&[])
        );
    }

    #[test]
    fn test_reverse_append_contains() {
        let reg = create_list_registry();
        assert_eq!(reg.call("list:reverse", &[nums(&[1, 2])]), nums(&[2, 1]));
        assert_eq!(
            reg.call("list:append", &[nums(&[1]), Value::Int(2)]),
            nums(&[1, 2])
        );
        assert_eq!(
            reg.call("list:contains", &[nums(&[1, 2]), Value::Int(2)]),
            Value::Bool(true)
        );
    }
}
