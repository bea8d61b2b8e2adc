//! Namespaced field resolution inside a running action.
//!
//! | prefix | source |
//! |---|---|
//! | `trigger`, `trigger.content` | coerced trigger inputs |
//! | `flow` | working scope |
//! | `activity.<task>` | outputs of an already evaluated task |
//! | `global` | engine-wide global scope |
//! | `iteration.index`, `.key`, `.value` | current iterator element |
//! | `env.<NAME>` | process environment |
//!
//! Any other leading name is looked up in the scope passed to the resolver.

use crate::core::data::path::get_path;
use crate::core::data::{FieldPath, PathSegment, Scope};
use crate::core::error::AppError;
use crate::core::expression::Resolver;
use indexmap::IndexMap;
use serde_json::Value;

/// Element currently fed to an iterator task's activity.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationFrame {
    pub index: usize,
    pub key: Value,
    pub value: Value,
}

#[derive(Debug, Clone, Copy)]
pub struct RunResolver<'a> {
    trigger: &'a Scope,
    flow: &'a Scope,
    activities: &'a IndexMap<String, Scope>,
    iteration: Option<&'a IterationFrame>,
}

impl<'a> RunResolver<'a> {
    pub fn new(
        trigger: &'a Scope,
        flow: &'a Scope,
        activities: &'a IndexMap<String, Scope>,
    ) -> Self {
        Self {
            trigger,
            flow,
            activities,
            iteration: None,
        }
    }

    pub fn with_iteration(mut self, frame: Option<&'a IterationFrame>) -> Self {
        self.iteration = frame;
        self
    }

    fn resolve_trigger(&self, rest: &[PathSegment]) -> Result<Option<Value>, AppError> {
        match rest.split_first() {
            Some((PathSegment::Key(key), tail))
                if key == "content" && !self.trigger.contains("content") =>
            {
                lookup(self.trigger, tail)
            }
            _ => lookup(self.trigger, rest),
        }
    }

    fn resolve_iteration(&self, rest: &[PathSegment]) -> Option<Value> {
        let frame = self.iteration?;
        let (PathSegment::Key(field), tail) = rest.split_first()? else {
            return None;
        };
        match field.as_str() {
            "index" => Some(Value::from(frame.index)),
            "key" => Some(frame.key.clone()),
            "value" => get_path(&frame.value, tail).cloned(),
            _ => None,
        }
    }
}

impl Resolver for RunResolver<'_> {
    fn resolve(&self, path: &FieldPath, scope: &Scope) -> Result<Option<Value>, AppError> {
        let segments = path.segments();
        let Some((PathSegment::Key(head), rest)) = segments.split_first() else {
            return Ok(None);
        };
        let value = match head.as_str() {
            "trigger" => self.resolve_trigger(rest)?,
            "flow" => lookup(self.flow, rest)?,
            "activity" => match rest.split_first() {
                Some((PathSegment::Key(task_id), tail)) => match self.activities.get(task_id) {
                    Some(output) => lookup(output, tail)?,
                    None => None,
                },
                _ => None,
            },
            "global" => match (self.flow.parent(), rest.split_first()) {
                (Some(global), Some((PathSegment::Key(name), tail))) => global
                    .get_value(name)?
                    .and_then(|root| get_path(&root, tail).cloned()),
                _ => None,
            },
            "iteration" => self.resolve_iteration(rest),
            "env" => match rest {
                [PathSegment::Key(name)] => std::env::var(name).ok().map(Value::String),
                _ => None,
            },
            _ => scope.resolve_path(segments)?,
        };
        Ok(value)
    }
}

/// Whole scope as an object for an empty path, otherwise the attribute path inside it.
fn lookup(scope: &Scope, rest: &[PathSegment]) -> Result<Option<Value>, AppError> {
    if rest.is_empty() {
        return Ok(Some(Value::Object(scope.to_payload())));
    }
    scope.resolve_path(rest)
}
