// loxlang-core - Environment for lexical scoping
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Environment for variable bindings with lexical scoping.
//!
//! Environments form a chain through parent references; the chain is a
//! strict tree, so `Rc` sharing cannot create cycles. The resolver
//! precomputes how many hops up the chain each reference needs, and the
//! evaluator uses [`Env::get_at`] / [`Env::assign_at`] to go straight to
//! the right node, bypassing name search.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

/// A lexical environment for variable bindings.
#[derive(Clone)]
pub struct Env {
    inner: Rc<RefCell<EnvInner>>,
}

struct EnvInner {
    bindings: HashMap<String, Value>,
    parent: Option<Env>,
}

impl Env {
    /// Create a new root environment with no parent.
    pub fn new() -> Self {
        Env {
            inner: Rc::new(RefCell::new(EnvInner {
                bindings: HashMap::new(),
                parent: None,
            })),
        }
    }

    /// Create a child environment with this environment as parent.
    #[must_use]
    pub fn child(&self) -> Self {
        Env {
            inner: Rc::new(RefCell::new(EnvInner {
                bindings: HashMap::new(),
                parent: Some(self.clone()),
            })),
        }
    }

    /// Define a binding in this environment (not a parent).
    pub fn define(&self, name: String, value: Value) {
        self.inner.borrow_mut().bindings.insert(name, value);
    }

    /// Look up a name in this environment or the parent chain.
    /// Uses iterative traversal to avoid stack overflow on deep chains.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut current = self.clone();
        loop {
            let inner = current.inner.borrow();
            if let Some(value) = inner.bindings.get(name) {
                return Some(value.clone());
            }
            let parent = inner.parent.clone();
            drop(inner);
            match parent {
                Some(parent) => current = parent,
                None => return None,
            }
        }
    }

    /// Assign to an existing binding somewhere up the chain.
    /// Returns false when the name is not defined anywhere.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        let mut current = self.clone();
        loop {
            {
                let mut inner = current.inner.borrow_mut();
                if let Some(slot) = inner.bindings.get_mut(name) {
                    *slot = value;
                    return true;
                }
            }
            let parent = current.inner.borrow().parent.clone();
            match parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// The environment `distance` hops up the parent chain.
    fn ancestor(&self, distance: usize) -> Env {
        let mut current = self.clone();
        for _ in 0..distance {
            let parent = current
                .inner
                .borrow()
                .parent
                .clone()
                .expect("resolver distance exceeds environment depth");
            current = parent;
        }
        current
    }

    /// Read a binding at a resolved distance. The resolver guarantees the
    /// binding exists there.
    pub fn get_at(&self, distance: usize, name: &str) -> Option<Value> {
        self.ancestor(distance).inner.borrow().bindings.get(name).cloned()
    }

    /// Write a binding at a resolved distance.
    pub fn assign_at(&self, distance: usize, name: &str, value: Value) -> bool {
        self.ancestor(distance)
            .inner
            .borrow_mut()
            .bindings
            .insert(name.to_string(), value)
            .is_some()
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_get() {
        let env = Env::new();
        env.define("x".to_string(), Value::Number(42.0));
        assert_eq!(env.get("x"), Some(Value::Number(42.0)));
    }

    #[test]
    fn test_undefined() {
        let env = Env::new();
        assert_eq!(env.get("x"), None);
    }

    #[test]
    fn test_child_inherits_parent() {
        let parent = Env::new();
        parent.define("x".to_string(), Value::Number(42.0));
        let child = parent.child();
        assert_eq!(child.get("x"), Some(Value::Number(42.0)));
    }

    #[test]
    fn test_child_shadows_parent() {
        let parent = Env::new();
        parent.define("x".to_string(), Value::Number(1.0));
        let child = parent.child();
        child.define("x".to_string(), Value::Number(2.0));
        assert_eq!(child.get("x"), Some(Value::Number(2.0)));
        assert_eq!(parent.get("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_assign_walks_chain() {
        let parent = Env::new();
        parent.define("x".to_string(), Value::Number(1.0));
        let child = parent.child();
        assert!(child.assign("x", Value::Number(2.0)));
        assert_eq!(parent.get("x"), Some(Value::Number(2.0)));
    }

    #[test]
    fn test_assign_undefined_fails() {
        let env = Env::new();
        assert!(!env.assign("missing", Value::Nil));
    }

    #[test]
    fn test_get_at_skips_shadow() {
        let grandparent = Env::new();
        grandparent.define("x".to_string(), Value::Number(1.0));
        let parent = grandparent.child();
        parent.define("x".to_string(), Value::Number(2.0));
        let child = parent.child();

        assert_eq!(child.get_at(1, "x"), Some(Value::Number(2.0)));
        assert_eq!(child.get_at(2, "x"), Some(Value::Number(1.0)));
    }
}
