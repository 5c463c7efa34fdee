//! Set domain: union, intersect, difference, contains, size, isSubset,
//! isDisjoint.
//!
//! Sets are keyed by value hash: primitives and options compare
//! structurally, complex values by identity.

use crate::types::Type;
use crate::value::{SetData, Value};

use super::{define_operator, OperatorRegistry};

/// Operators in the `set` namespace.
pub fn create_set_registry() -> OperatorRegistry {
    let mut reg = OperatorRegistry::new();
    let any_set = || Type::set(Type::any());

    let entries = vec![
        define_operator(
            "set",
            "union",
            vec![any_set(), any_set()],
            Type::set(Type::any()),
            true,
            |args| {
                let mut out = args[0].expect_set()?.as_ref().clone();
                for (k, v) in &args[1].expect_set()?.entries {
                    out.entries.entry(k.clone()).or_insert_with(|| v.clone());
                }
                Ok(Value::Set(std::rc::Rc::new(out)))
            },
        ),
        define_operator(
            "set",
            "intersect",
            vec![any_set(), any_set()],
            Type::set(Type::any()),
            true,
            |args| {
                let a = args[0].expect_set()?;
                let b = args[1].expect_set()?;
                let mut out = SetData::default();
                for (k, v) in &a.entries {
                    if b.entries.contains_key(k) {
                        out.entries.insert(k.clone(), v.clone());
                    }
                }
                Ok(Value::Set(std::rc::Rc::new(out)))
            },
        ),
        define_operator(
            "set",
            "difference",
            vec![any_set(), any_set()],
            Type::set(Type::any()),
            true,
            |args| {
                let a = args[0].expect_set()?;
                let b = args[1].expect_set()?;
                let mut out = SetData::default();
                for (k, v) in &a.entries {
                    if !b.entries.contains_key(k) {
                        out.entries.insert(k.clone(), v.clone());
                    }
                }
                Ok(Value::Set(std::rc::Rc::new(out)))
            },
        ),
        define_operator(
            "set",
            "contains",
            vec![any_set(), Type::any()],
            Type::Bool,
            true,
            |args| {
                let a = args[0].expect_set()?;
                Ok(Value::Bool(a.entries.contains_key(&args[1].hash_key())))
            },
        ),
        define_operator("set", "size", vec![any_set()], Type::Int, true, |args| {
            Ok(Value::Int(args[0].expect_set()?.entries.len() as i64))
        }),
        define_operator(
            "set",
            "isSubset",
            vec![any_set(), any_set()],
            Type::Bool,
            true,
            |args| {
                let a = args[0].expect_set()?;
                let b = args[1].expect_set()?;
                Ok(Value::Bool(
                    a.entries.keys().all(|k| b.entries.contains_key(k)),
                ))
            },
        ),
        define_operator(
            "set",
            "isDisjoint",
            vec![any_set(), any_set()],
            Type::Bool,
            true,
            |args| {
                let a = args[0].expect_set()?;
                let b = args[1].expect_set()?;
                Ok(Value::Bool(
                    a.entries.keys().all(|k| !b.entries.contains_key(k)),
                ))
            },
        ),
        define_operator(
            "set",
            "add",
            vec![any_set(), Type::any()],
            Type::set(Type::any()),
            true,
            |args| {
                let mut out = args[0].expect_set()?.as_ref().clone();
                out.entries.insert(args[1].hash_key(), args[1].clone());
                Ok(Value::Set(std::rc::Rc::new(out)))
            },
        ),
        define_operator(
            "set",
            "remove",
            vec![any_set(), Type::any()],
            Type::set(Type::any()),
            true,
            |args| {
                let mut out = args[0].expect_set()?.as_ref().clone();
                out.entries.remove(&args[1].hash_key());
                Ok(Value::Set(std::rc::Rc::new(out)))
            },
        ),
    ];

    for op in entries {
        reg.register(op).expect("set operators are distinct");
    }
    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[i64]) -> Value {
        Value::set_from(values.iter().copied().map(Value::Int))
    }

    fn size(reg: &OperatorRegistry, v: &Value) -> i64 {
        reg.call("set:size", &[v.clone()])
            .expect_int()
            .expect("int")
    }

    #[test]
    fn test_union_intersect_difference() {
        let reg = create_set_registry();
        let u = reg.call("set:union", &[set(&[1, 2]), set(&[2, 3])]);
        assert_eq!(size(&reg, &u), 3);
        let i = reg.call("set:intersect", &[set(&[1, 2]), set(&[2, 3])]);
        assert_eq!(size(&reg, &i), 1);
        let d = reg.call("set:difference", &[set(&[1, 2]), set(&[2, 3])]);
        assert_eq!(size(&reg, &d), 1);
        assert_eq!(
            reg.call("set:contains", &[d, Value::Int(1)]),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_subset_disjoint() {
        let reg = create_set_registry();
        assert_eq!(
            reg.call("set:isSubset", &[set(&[1]), set(&[1, 2])]),
            Value::Bool(true)
        );
        assert_eq!(
            reg.call("set:isDisjoint", &[set(&[1]), set(&[2, 3])]),
            Value::Bool(true)
        );
        assert_eq!(
            reg.call("set:isDisjoint", &[set(&[1]), set(&[1])]),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_add_remove() {
        let reg = create_set_registry();
        let s = reg.call("set:add", &[set(&[1]), Value::Int(2)]);
        assert_eq!(size(&reg, &s), 2);
        let s = reg.call("set:remove", &[s, Value::Int(1)]);
        assert_eq!(size(&reg, &s), 1);
        // Removing an absent element is a no-op
        let s = reg.call("set:remove", &[s, Value::Int(9)]);
        assert_eq!(size(&reg, &s), 1);
    }
}
