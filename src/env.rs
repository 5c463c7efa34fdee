//! # Environments
//!
//! Persistent name→value and name→type maps. `extend` returns a new
//! environment sharing prior bindings; nothing is mutated in place, so a
//! closure's captured snapshot stays valid for its whole lifetime.
//!
//! The representation is a linked frame stack: lookup walks frames newest
//! first, extend pushes a single-entry frame. Shadowing therefore falls out
//! of lookup order.

use std::fmt;
use std::rc::Rc;

use crate::types::Type;
use crate::value::Value;

/// A persistent single-linked environment over any binding payload.
pub struct Env<T> {
    head: Option<Rc<Frame<T>>>,
}

struct Frame<T> {
    name: String,
    binding: T,
    parent: Option<Rc<Frame<T>>>,
}

impl<T> Env<T> {
    /// The empty environment.
    pub fn empty() -> Self {
        Env { head: None }
    }

    /// Number of frames (bindings including shadowed ones).
    pub fn depth(&self) -> usize {
        let mut n = 0;
        let mut cur = self.head.as_deref();
        while let Some(frame) = cur {
            n += 1;
            cur = frame.parent.as_deref();
        }
        n
    }

    /// Look up the newest binding for `name`.
    pub fn lookup(&self, name: &str) -> Option<&T> {
        let mut cur = self.head.as_deref();
        while let Some(frame) = cur {
            if frame.name == name {
                return Some(&frame.binding);
            }
            cur = frame.parent.as_deref();
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Push one binding, sharing all prior frames.
    pub fn extend(&self, name: impl Into<String>, binding: T) -> Self {
        Env {
            head: Some(Rc::new(Frame {
                name: name.into(),
                binding,
                parent: self.head.clone(),
            })),
        }
    }

    /// Push a batch of bindings left to right (the last shadows).
    pub fn extend_many(&self, pairs: impl IntoIterator<Item = (String, T)>) -> Self {
        let mut env = self.clone();
        for (name, binding) in pairs {
            env = env.extend(name, binding);
        }
        env
    }
}

impl<T> Clone for Env<T> {
    fn clone(&self) -> Self {
        Env {
            head: self.head.clone(),
        }
    }
}

impl<T> Default for Env<T> {
    fn default() -> Self {
        Env::empty()
    }
}

impl<T> fmt::Debug for Env<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        let mut cur = self.head.as_deref();
        while let Some(frame) = cur {
            names.push(frame.name.as_str());
            cur = frame.parent.as_deref();
        }
        write!(f, "Env[{}]", names.join(", "))
    }
}

/// Name → runtime value.
pub type ValueEnv = Env<Value>;

/// Name → declared type.
pub type TypeEnv = Env<Type>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_lookup() {
        let env: ValueEnv = Env::empty();
        assert!(env.lookup("x").is_none());
        assert_eq!(env.depth(), 0);
    }

    #[test]
    fn test_extend_shares_parent() {
        let base: ValueEnv = Env::empty().extend("x", Value::Int(1));
        let a = base.extend("y", Value::Int(2));
        let b = base.extend("y", Value::Int(3));
        assert_eq!(a.lookup("y"), Some(&Value::Int(2)));
        assert_eq!(b.lookup("y"), Some(&Value::Int(3)));
        // The shared parent is untouched
        assert_eq!(base.lookup("y"), None);
        assert_eq!(base.lookup("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_shadowing() {
        let env: ValueEnv = Env::empty()
            .extend("x", Value::Int(1))
            .extend("x", Value::Int(2));
        assert_eq!(env.lookup("x"), Some(&Value::Int(2)));
        assert_eq!(env.depth(), 2);
    }

    #[test]
    fn test_extend_many_order() {
        let env: TypeEnv = Env::empty().extend_many(vec![
            ("a".to_string(), Type::Int),
            ("a".to_string(), Type::Bool),
        ]);
        assert_eq!(env.lookup("a"), Some(&Type::Bool));
    }
}
