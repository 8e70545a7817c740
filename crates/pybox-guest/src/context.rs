//! Per-context namespace manager.
//!
//! Each context owns its own `locals` and a set of names protected against
//! reassignment. A context may declare a parent, in which case reads fall
//! through the parent chain (root first, so a child's own binding always
//! wins) but writes only ever land in the child's own `locals` -
//! copy-on-write inheritance without ever mutating a parent.

use std::collections::{HashMap, HashSet};

use pybox_primitives::ContextId;
use rustpython_vm::PyObjectRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    AlreadyExists,
    Unknown,
    Cycle,
}

struct Context {
    parent: Option<ContextId>,
    locals: HashMap<String, PyObjectRef>,
    protected: HashSet<String>,
}

#[derive(Default)]
pub struct ContextRegistry {
    contexts: HashMap<ContextId, Context>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.contexts.contains_key(id)
    }

    pub fn init_local(&mut self, id: &str) -> Result<(), ContextError> {
        if self.contexts.contains_key(id) {
            return Err(ContextError::AlreadyExists);
        }
        self.contexts.insert(
            id.to_owned(),
            Context {
                parent: None,
                locals: HashMap::new(),
                protected: HashSet::new(),
            },
        );
        Ok(())
    }

    pub fn init_local_from(&mut self, child_id: &str, parent_id: &str) -> Result<(), ContextError> {
        if self.contexts.contains_key(child_id) {
            return Err(ContextError::AlreadyExists);
        }
        if !self.contexts.contains_key(parent_id) {
            return Err(ContextError::Unknown);
        }
        // The new id can't yet appear anywhere in the graph, so it can't
        // introduce a cycle by being an ancestor of parent_id; but guard
        // against a self-referential id defensively.
        if child_id == parent_id {
            return Err(ContextError::Cycle);
        }
        self.contexts.insert(
            child_id.to_owned(),
            Context {
                parent: Some(parent_id.to_owned()),
                locals: HashMap::new(),
                protected: HashSet::new(),
            },
        );
        Ok(())
    }

    pub fn protect(&mut self, id: &str, name: &str) -> Result<(), ContextError> {
        let ctx = self.contexts.get_mut(id).ok_or(ContextError::Unknown)?;
        ctx.protected.insert(name.to_owned());
        Ok(())
    }

    pub fn is_protected(&self, id: &str, name: &str) -> bool {
        self.chain(id)
            .any(|ctx| ctx.protected.contains(name))
    }

    pub fn assign(&mut self, id: &str, name: &str, value: PyObjectRef) -> Result<(), ContextError> {
        let ctx = self.contexts.get_mut(id).ok_or(ContextError::Unknown)?;
        ctx.locals.insert(name.to_owned(), value);
        Ok(())
    }

    /// The resolved read-set for `id`: every ancestor's locals merged root
    /// first, so `id`'s own bindings (and its nearer ancestors') take
    /// precedence over farther ones.
    pub fn flatten(&self, id: &str) -> Result<HashMap<ContextId, PyObjectRef>, ContextError> {
        if !self.contexts.contains_key(id) {
            return Err(ContextError::Unknown);
        }
        let chain: Vec<&Context> = self.chain(id).collect();
        let mut flattened = HashMap::new();
        for ctx in chain.into_iter().rev() {
            for (key, value) in &ctx.locals {
                flattened.insert(key.clone(), value.clone());
            }
        }
        Ok(flattened)
    }

    /// Walk from `id` up through its ancestors, nearest first.
    fn chain(&self, id: &str) -> ContextChain<'_> {
        ContextChain {
            registry: self,
            next: self.contexts.contains_key(id).then(|| id.to_owned()),
        }
    }
}

struct ContextChain<'a> {
    registry: &'a ContextRegistry,
    next: Option<ContextId>,
}

impl<'a> Iterator for ContextChain<'a> {
    type Item = &'a Context;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        let ctx = self.registry.contexts.get(&id)?;
        self.next = ctx.parent.clone();
        Some(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustpython_vm::Interpreter;

    #[test]
    fn duplicate_init_local_is_rejected() {
        let mut registry = ContextRegistry::new();
        registry.init_local("root").unwrap();
        assert_eq!(registry.init_local("root"), Err(ContextError::AlreadyExists));
    }

    #[test]
    fn init_local_from_rejects_unknown_parent() {
        let mut registry = ContextRegistry::new();
        assert_eq!(
            registry.init_local_from("child", "missing-parent"),
            Err(ContextError::Unknown)
        );
    }

    #[test]
    fn init_local_from_rejects_self_parent() {
        let mut registry = ContextRegistry::new();
        registry.init_local("root").unwrap();
        assert_eq!(
            registry.init_local_from("root", "root"),
            Err(ContextError::Cycle)
        );
    }

    #[test]
    fn protect_requires_existing_context() {
        let mut registry = ContextRegistry::new();
        assert_eq!(registry.protect("missing", "x"), Err(ContextError::Unknown));
    }

    #[test]
    fn flatten_prefers_child_bindings_over_parent() {
        let interp = Interpreter::without_stdlib(Default::default());
        interp.enter(|vm| {
            let mut registry = ContextRegistry::new();
            registry.init_local("root").unwrap();
            registry.init_local_from("child", "root").unwrap();

            registry.assign("root", "x", vm.ctx.new_int(1).into()).unwrap();
            registry.assign("root", "y", vm.ctx.new_int(2).into()).unwrap();
            registry.assign("child", "x", vm.ctx.new_int(99).into()).unwrap();

            let flattened = registry.flatten("child").unwrap();
            let x: i64 = flattened["x"].clone().try_into_value(vm).unwrap();
            let y: i64 = flattened["y"].clone().try_into_value(vm).unwrap();
            assert_eq!(x, 99);
            assert_eq!(y, 2);
        });
    }

    #[test]
    fn protected_names_resolve_through_parent_chain() {
        let mut registry = ContextRegistry::new();
        registry.init_local("root").unwrap();
        registry.init_local_from("child", "root").unwrap();
        registry.protect("root", "secret").unwrap();
        assert!(registry.is_protected("child", "secret"));
        assert!(!registry.is_protected("child", "other"));
    }
}
