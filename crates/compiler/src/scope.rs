//! Lexical scope management.
//!
//! A stack of scopes, pushed on function entry and on each `{` block.
//! Each scope holds two namespaces: ordinary entries (variables) and
//! tags (struct/union names). Lookup walks inner to outer; declaring
//! shadows any outer binding of the same name.

use std::collections::HashMap;

use crate::ast::VarRef;
use crate::error::CompileError;
use crate::types::Type;

#[derive(Debug, Default)]
struct Scope {
    entries: HashMap<String, VarRef>,
    tags: HashMap<String, Type>,
}

/// The scope stack for one compilation. Created with the file scope
/// already in place.
#[derive(Debug)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            scopes: vec![Scope::default()],
        }
    }

    /// Push an empty scope.
    pub fn enter(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pop the innermost scope.
    pub fn leave(&mut self) -> Result<(), CompileError> {
        if self.scopes.pop().is_none() {
            return Err(CompileError::scope("no scope to leave"));
        }
        Ok(())
    }

    /// Bind a variable in the innermost scope.
    pub fn declare_entry(&mut self, name: &str, entry: VarRef) -> Result<(), CompileError> {
        let scope = self
            .scopes
            .last_mut()
            .ok_or_else(|| CompileError::scope("no scope to declare into"))?;
        scope.entries.insert(name.to_string(), entry);
        Ok(())
    }

    /// Bind a struct/union tag in the innermost scope.
    pub fn declare_tag(&mut self, name: &str, ty: Type) -> Result<(), CompileError> {
        let scope = self
            .scopes
            .last_mut()
            .ok_or_else(|| CompileError::scope("no scope to declare into"))?;
        scope.tags.insert(name.to_string(), ty);
        Ok(())
    }

    /// Resolve a variable name, inner scopes first.
    pub fn find_entry(&self, name: &str) -> Option<&VarRef> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.entries.get(name))
    }

    /// Resolve a tag name, inner scopes first.
    pub fn find_tag(&self, name: &str) -> Option<&Type> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.tags.get(name))
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        ScopeStack::new()
    }
}
