#![allow(clippy::result_large_err)] // Engine APIs return AppError directly for structured diagnostics without boxing.

//! The engine owns every registry and the compiled actions; runners only schedule calls into it.

use crate::core::config::RunnerConfig;
use crate::core::data::coerce::coerce;
use crate::core::data::{Attribute, GlobalScope, Payload, Scope};
use crate::core::error::AppError;
use crate::core::expression::{ExpressionEngine, FunctionRegistry};
use crate::core::flow::activity::{Activity, ActivityRegistryBuilder};
use crate::core::flow::behavior::{BehaviorRegistryBuilder, TaskBehavior};
use crate::core::flow::definition::ActionDefinition;
use crate::core::flow::executor::{execute_action, ExecutionOptions, RunSummary};
use crate::core::flow::{ActivityRegistry, BehaviorRegistry, CompiledAction};
use crate::core::types::ErrorCategory;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Collects registries and run limits, then freezes them into an [`Engine`].
pub struct EngineBuilder {
    functions: Option<FunctionRegistry>,
    activities: ActivityRegistryBuilder,
    behaviors: BehaviorRegistryBuilder,
    global: Option<Arc<GlobalScope>>,
    parallel_limit: usize,
    max_task_iterations: usize,
    run_timeout: Option<Duration>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        let defaults = ExecutionOptions::default();
        Self {
            functions: None,
            activities: ActivityRegistryBuilder::with_builtins(),
            behaviors: BehaviorRegistryBuilder::with_builtins(),
            global: None,
            parallel_limit: defaults.parallel_limit,
            max_task_iterations: defaults.max_task_iterations,
            run_timeout: None,
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `functions` instead of the process-wide registry.
    pub fn functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn global(mut self, global: Arc<GlobalScope>) -> Self {
        self.global = Some(global);
        self
    }

    /// Take run limits from the runner configuration.
    pub fn runner_config(mut self, config: &RunnerConfig) -> Result<Self, AppError> {
        self.parallel_limit = config.parallel_limit;
        self.max_task_iterations = config.max_task_iterations;
        self.run_timeout = config.run_timeout()?;
        Ok(self)
    }

    pub fn parallel_limit(mut self, limit: usize) -> Self {
        self.parallel_limit = limit;
        self
    }

    pub fn max_task_iterations(mut self, limit: usize) -> Self {
        self.max_task_iterations = limit;
        self
    }

    pub fn run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn register_activity<T: Activity>(mut self, activity: T) -> Result<Self, AppError> {
        self.activities.register(activity)?;
        Ok(self)
    }

    pub fn register_behavior<T: TaskBehavior>(mut self, behavior: T) -> Result<Self, AppError> {
        self.behaviors.register(behavior)?;
        Ok(self)
    }

    pub fn build(self) -> Engine {
        let functions = self
            .functions
            .unwrap_or_else(|| crate::core::expression::function::global().clone());
        Engine {
            expressions: ExpressionEngine::new(functions),
            activities: self.activities.build(),
            behaviors: self.behaviors.build(),
            actions: DashMap::new(),
            global: self.global.unwrap_or_default(),
            parallel_limit: self.parallel_limit,
            max_task_iterations: self.max_task_iterations,
            run_timeout: self.run_timeout,
        }
    }
}

pub struct Engine {
    expressions: ExpressionEngine,
    activities: ActivityRegistry,
    behaviors: BehaviorRegistry,
    actions: DashMap<String, Arc<CompiledAction>>,
    global: Arc<GlobalScope>,
    parallel_limit: usize,
    max_task_iterations: usize,
    run_timeout: Option<Duration>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn expressions(&self) -> &ExpressionEngine {
        &self.expressions
    }

    pub fn activities(&self) -> &ActivityRegistry {
        &self.activities
    }

    /// Scope shared by every run of every action on this engine.
    pub fn global(&self) -> &Arc<GlobalScope> {
        &self.global
    }

    /// Compile and register an action. Ids are unique per engine.
    pub fn register_definition(
        &self,
        definition: ActionDefinition,
    ) -> Result<Arc<CompiledAction>, AppError> {
        let compiled = Arc::new(CompiledAction::compile(
            definition,
            &self.expressions,
            &self.activities,
            &self.behaviors,
        )?);
        match self.actions.entry(compiled.id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::new(
                ErrorCategory::DuplicateRegistration,
                format!("action '{}' is already registered", compiled.id()),
            )
            .with_code("REG-DUP-006")),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::info!(
                    action_id = compiled.id(),
                    fingerprint = compiled.fingerprint(),
                    tasks = compiled.definition().tasks.len(),
                    "action registered"
                );
                slot.insert(Arc::clone(&compiled));
                Ok(compiled)
            }
        }
    }

    /// Load a JSON or YAML action document and register it.
    pub fn load_action_file(&self, path: &Path) -> Result<Arc<CompiledAction>, AppError> {
        self.register_definition(ActionDefinition::load_from_file(path)?)
    }

    pub fn action(&self, action_id: &str) -> Option<Arc<CompiledAction>> {
        self.actions
            .get(action_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn action_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.actions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Resolve the action and coerce trigger inputs to its declared input types.
    ///
    /// Undeclared inputs are kept untyped.
    pub fn prepare(
        &self,
        action_id: &str,
        inputs: Payload,
    ) -> Result<(Arc<CompiledAction>, Scope), AppError> {
        let action = self.action(action_id).ok_or_else(|| {
            let mut err = AppError::new(
                ErrorCategory::UnknownAction,
                format!("no action registered with id '{}'", action_id),
            );
            err.add_context("action_id", action_id);
            err
        })?;
        let declared = &action.definition().inputs;
        let mut trigger = Scope::new();
        for (name, value) in inputs {
            let attr = match declared.iter().find(|decl| decl.name == name) {
                Some(decl) => {
                    let value = coerce(&value, decl.attr_type).map_err(|err| {
                        let mut error = AppError::new(
                            ErrorCategory::InvalidInput,
                            format!("input '{}': {}", name, err),
                        );
                        error.add_context("action_id", action_id);
                        error.add_context("input", &name);
                        error
                    })?;
                    Attribute::new(name, decl.attr_type, value)?
                }
                None => Attribute::untyped(name, value),
            };
            trigger.add_attr(attr);
        }
        Ok((action, trigger))
    }

    pub async fn execute(&self, action_id: &str, inputs: Payload) -> Result<RunSummary, AppError> {
        self.execute_with_cancel(action_id, inputs, CancellationToken::new())
            .await
    }

    /// Run an action to completion. `cancel` is observed between task evaluations.
    pub async fn execute_with_cancel(
        &self,
        action_id: &str,
        inputs: Payload,
        cancel: CancellationToken,
    ) -> Result<RunSummary, AppError> {
        let (action, trigger) = self.prepare(action_id, inputs)?;
        let options = ExecutionOptions {
            parallel_limit: self.parallel_limit,
            max_task_iterations: self.max_task_iterations,
            deadline: self.run_timeout.map(|timeout| Instant::now() + timeout),
            cancel,
        };
        execute_action(
            &action,
            &self.expressions,
            Arc::clone(&self.global),
            trigger,
            options,
        )
        .await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("actions", &self.action_ids())
            .field("activities", &self.activities)
            .field("behaviors", &self.behaviors)
            .field("parallel_limit", &self.parallel_limit)
            .field("max_task_iterations", &self.max_task_iterations)
            .field("run_timeout", &self.run_timeout)
            .finish()
    }
}
