//! Expression language used by guards, mappings and behavior settings.
//!
//! Text is parsed once into an [`Expr`] tree and cached by source text; evaluation walks the
//! tree against a [`Scope`] through a [`Resolver`] and dispatches calls to a
//! [`FunctionRegistry`].

pub mod ast;
pub mod eval;
pub mod function;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use eval::{evaluate, truthy, Resolver, ScopeResolver};
pub use function::{FunctionDef, FunctionRegistry, FunctionRegistryBuilder};
pub use parser::parse;

use crate::core::data::Scope;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Parses, caches and evaluates expressions with a fixed function table.
#[derive(Debug)]
pub struct ExpressionEngine {
    functions: FunctionRegistry,
    cache: DashMap<String, Arc<Expr>>,
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new(function::global().clone())
    }
}

impl ExpressionEngine {
    pub fn new(functions: FunctionRegistry) -> Self {
        Self {
            functions,
            cache: DashMap::new(),
        }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Parse `text`, reusing the cached tree when the same text was parsed before.
    ///
    /// Calls to functions missing from the registry are rejected here, so definitions fail
    /// when they are loaded rather than on first evaluation.
    pub fn parse(&self, text: &str) -> Result<Arc<Expr>, AppError> {
        if let Some(cached) = self.cache.get(text) {
            return Ok(Arc::clone(cached.value()));
        }
        let expr = parser::parse(text)?;
        if let Some(missing) = expr
            .function_names()
            .into_iter()
            .find(|name| !self.functions.contains(name))
        {
            let mut error = AppError::new(
                ErrorCategory::UnknownFunction,
                format!("unknown function '{}' in expression '{}'", missing, text),
            );
            error.add_context("expression", text);
            return Err(error);
        }
        let expr = Arc::new(expr);
        self.cache.insert(text.to_string(), Arc::clone(&expr));
        Ok(expr)
    }

    pub fn evaluate(
        &self,
        expr: &Expr,
        resolver: &dyn Resolver,
        scope: &Scope,
    ) -> Result<Value, AppError> {
        eval::evaluate(expr, resolver, scope, &self.functions)
    }

    pub fn evaluate_bool(
        &self,
        expr: &Expr,
        resolver: &dyn Resolver,
        scope: &Scope,
    ) -> Result<bool, AppError> {
        truthy(&self.evaluate(expr, resolver, scope)?)
    }

    /// Parse (through the cache) and evaluate in one step.
    pub fn evaluate_str(
        &self,
        text: &str,
        resolver: &dyn Resolver,
        scope: &Scope,
    ) -> Result<Value, AppError> {
        let expr = self.parse(text)?;
        self.evaluate(&expr, resolver, scope)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
