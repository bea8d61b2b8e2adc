#![allow(clippy::result_large_err)] // Activity trait and registry return AppError directly for structured diagnostics without boxing.

use crate::core::data::{AttrDecl, Scope};
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Static description of an activity: its name and declared inputs and outputs.
#[derive(Debug, Clone, Default)]
pub struct ActivityMetadata {
    pub name: String,
    pub inputs: Vec<AttrDecl>,
    pub outputs: Vec<AttrDecl>,
}

impl ActivityMetadata {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, decl: AttrDecl) -> Self {
        self.inputs.push(decl);
        self
    }

    pub fn with_output(mut self, decl: AttrDecl) -> Self {
        self.outputs.push(decl);
        self
    }
}

/// Everything an activity sees during one evaluation.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    pub action_id: String,
    pub run_id: Uuid,
    pub task_id: String,
    /// Zero-based element index when invoked by an iterator task.
    pub iteration: Option<usize>,
    pub settings: Map<String, Value>,
    input: Scope,
    output: Scope,
}

impl ActivityContext {
    pub fn new(
        action_id: impl Into<String>,
        run_id: Uuid,
        task_id: impl Into<String>,
        input: Scope,
        output: Scope,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            run_id,
            task_id: task_id.into(),
            iteration: None,
            settings: Map::new(),
            input,
            output,
        }
    }

    pub fn input(&self) -> &Scope {
        &self.input
    }

    pub fn input_value(&self, name: &str) -> Option<Value> {
        self.input.get_value(name)
    }

    /// Input rendered as a string, empty when absent.
    pub fn input_string(&self, name: &str) -> String {
        self.input_value(name)
            .map(|value| crate::core::data::coerce::to_display_string(&value))
            .unwrap_or_default()
    }

    pub fn output(&self) -> &Scope {
        &self.output
    }

    /// Set an output attribute, coercing to its declared type when it has one.
    pub fn set_output(&mut self, name: &str, value: Value) -> Result<(), AppError> {
        self.output.set_value(name, value).map_err(AppError::from)
    }

    pub fn into_output(self) -> Scope {
        self.output
    }
}

/// A unit of work bound to tasks by name.
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    fn metadata(&self) -> &ActivityMetadata;

    /// Run once. `Ok(false)` asks the engine to evaluate the task again later.
    async fn eval(&self, ctx: &mut ActivityContext) -> Result<bool, AppError>;
}

/// Builder used to register activities before an engine is built.
#[derive(Default)]
pub struct ActivityRegistryBuilder {
    activities: HashMap<String, Arc<dyn Activity>>,
}

impl std::fmt::Debug for ActivityRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRegistryBuilder")
            .field("activities", &self.activities.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ActivityRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the builtin `noop`, `log` and `error` activities.
    pub fn with_builtins() -> Self {
        let mut builder = Self::new();
        for activity in crate::core::flow::activities::builtins() {
            builder
                .activities
                .insert(activity.metadata().name.clone(), activity);
        }
        builder
    }

    pub fn register<T: Activity>(&mut self, activity: T) -> Result<&mut Self, AppError> {
        self.register_arc(Arc::new(activity))
    }

    pub fn register_arc(&mut self, activity: Arc<dyn Activity>) -> Result<&mut Self, AppError> {
        let name = activity.metadata().name.clone();
        if self.activities.contains_key(&name) {
            return Err(AppError::new(
                ErrorCategory::DuplicateRegistration,
                format!("activity '{}' is already registered", name),
            )
            .with_code("REG-DUP-004"));
        }
        self.activities.insert(name, activity);
        Ok(self)
    }

    pub fn build(self) -> ActivityRegistry {
        ActivityRegistry {
            inner: Arc::new(self.activities),
        }
    }
}

/// Immutable registry available during action execution.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    inner: Arc<HashMap<String, Arc<dyn Activity>>>,
}

impl ActivityRegistry {
    pub fn builder() -> ActivityRegistryBuilder {
        ActivityRegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.inner.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("activities", &self.names())
            .finish()
    }
}
