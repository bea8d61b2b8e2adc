#![allow(clippy::result_large_err)] // Behavior trait and registry return AppError directly for structured diagnostics without boxing.

//! Task behaviors decide what evaluating a task means: run the activity once (`basic`),
//! run it per collection element (`iterator`) or finish the run with a reply (`return`).

use crate::core::data::coerce::to_bool;
use crate::core::data::Scope;
use crate::core::error::AppError;
use crate::core::expression::{Expr, ExpressionEngine};
use crate::core::flow::activity::ActivityContext;
use crate::core::flow::compiled::{CompiledAction, CompiledTask};
use crate::core::flow::definition::TaskDef;
use crate::core::flow::resolver::{IterationFrame, RunResolver};
use crate::core::flow::state::IteratorState;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Behavior-specific settings, validated and compiled when the action is loaded.
#[derive(Debug, Clone, Default)]
pub enum TaskSettings {
    #[default]
    None,
    Iterator(IteratorSettings),
}

#[derive(Debug, Clone)]
pub struct IteratorSettings {
    pub iterate: Arc<Expr>,
    pub accumulate: bool,
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterResult {
    /// Evaluate the task in this tick.
    Eval,
    /// Nothing to do; the task is done without evaluation.
    Done,
}

#[derive(Debug)]
pub enum EvalResult {
    Done,
    /// Evaluate the same task again in a later tick.
    NotDone,
    /// One iterator element finished; more remain.
    Iterate,
    /// Stop the run and return this scope as its outputs.
    Reply(Scope),
}

/// Run-wide data shared by every task evaluated in a tick.
pub struct RunEnv<'a> {
    pub action: &'a CompiledAction,
    pub engine: &'a ExpressionEngine,
    pub run_id: Uuid,
    pub trigger: &'a Scope,
}

/// What a behavior sees while evaluating one task.
pub struct TaskContext<'a> {
    pub task: &'a CompiledTask,
    pub env: &'a RunEnv<'a>,
    /// Working scope as it stood at the start of the tick.
    pub flow: &'a Scope,
    pub activities: &'a IndexMap<String, Scope>,
    pub iterator: IteratorState,
    /// Activity output produced by this evaluation, fed to the output mapper.
    pub output: Option<Scope>,
}

impl<'a> TaskContext<'a> {
    pub fn resolver<'r>(&'r self, frame: Option<&'r IterationFrame>) -> RunResolver<'r> {
        RunResolver::new(self.env.trigger, self.flow, self.activities).with_iteration(frame)
    }
}

#[async_trait]
pub trait TaskBehavior: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Validate the task and compile its settings at load time.
    fn prepare(&self, _task: &TaskDef, _engine: &ExpressionEngine) -> Result<TaskSettings, AppError> {
        Ok(TaskSettings::None)
    }

    fn enter(&self, _ctx: &TaskContext<'_>) -> Result<EnterResult, AppError> {
        Ok(EnterResult::Eval)
    }

    async fn eval(&self, ctx: &mut TaskContext<'_>) -> Result<EvalResult, AppError>;
}

/// Map inputs, run the task's activity once and return `(done, output)`.
///
/// A task without an activity passes its mapped input through as output.
pub async fn invoke_activity(
    ctx: &TaskContext<'_>,
    frame: Option<&IterationFrame>,
) -> Result<(bool, Scope), AppError> {
    let resolver = ctx.resolver(frame);
    let engine = ctx.env.engine;
    let Some(activity) = &ctx.task.activity else {
        let mut passthrough = Scope::new();
        ctx.task
            .input
            .apply(ctx.flow, &resolver, engine, &mut passthrough)?;
        return Ok((true, passthrough));
    };
    let metadata = activity.metadata();
    let mut input = Scope::from_decls(&metadata.inputs)?;
    ctx.task.input.apply(ctx.flow, &resolver, engine, &mut input)?;
    let output = Scope::from_decls(&metadata.outputs)?;
    let mut activity_ctx = ActivityContext::new(
        ctx.env.action.id(),
        ctx.env.run_id,
        ctx.task.id.as_str(),
        input,
        output,
    );
    activity_ctx.iteration = frame.map(|frame| frame.index);
    activity_ctx.settings = ctx.task.raw_settings.clone();
    let done = activity.eval(&mut activity_ctx).await?;
    Ok((done, activity_ctx.into_output()))
}

pub struct BasicBehavior;

#[async_trait]
impl TaskBehavior for BasicBehavior {
    fn name(&self) -> &str {
        "basic"
    }

    fn enter(&self, ctx: &TaskContext<'_>) -> Result<EnterResult, AppError> {
        let task = ctx.task;
        if task.activity.is_none() && task.input.is_empty() && task.output.is_empty() {
            return Ok(EnterResult::Done);
        }
        Ok(EnterResult::Eval)
    }

    async fn eval(&self, ctx: &mut TaskContext<'_>) -> Result<EvalResult, AppError> {
        let (done, output) = invoke_activity(ctx, None).await?;
        ctx.output = Some(output);
        Ok(if done {
            EvalResult::Done
        } else {
            EvalResult::NotDone
        })
    }
}

/// Runs the activity once per element of `settings.iterate`, one element per evaluation.
pub struct IteratorBehavior;

impl IteratorBehavior {
    fn settings<'t>(task: &'t CompiledTask) -> Result<&'t IteratorSettings, AppError> {
        match &task.settings {
            TaskSettings::Iterator(settings) => Ok(settings),
            TaskSettings::None => Err(AppError::new(
                ErrorCategory::InternalError,
                format!("iterator task {} has no compiled settings", task.id),
            )),
        }
    }

    fn finish(ctx: &mut TaskContext<'_>, accumulate: bool, accumulated: Vec<Value>) -> EvalResult {
        ctx.iterator = IteratorState::Complete;
        if accumulate {
            let mut output = Scope::new();
            output.add_attr(crate::core::data::Attribute::untyped(
                "iterations",
                Value::Array(accumulated),
            ));
            ctx.output = Some(output);
        }
        EvalResult::Done
    }
}

#[async_trait]
impl TaskBehavior for IteratorBehavior {
    fn name(&self) -> &str {
        "iterator"
    }

    fn prepare(&self, task: &TaskDef, engine: &ExpressionEngine) -> Result<TaskSettings, AppError> {
        let iterate = match task.settings.get("iterate") {
            Some(Value::String(text)) => engine.parse(text)?,
            Some(Value::Null) | None => {
                return Err(AppError::new(
                    ErrorCategory::ValidationError,
                    format!("iterator task {} requires settings.iterate", task.id),
                ))
            }
            Some(literal) => Arc::new(Expr::Literal(literal.clone())),
        };
        let flag = |name: &str| -> Result<bool, AppError> {
            match task.settings.get(name) {
                None | Some(Value::Null) => Ok(false),
                Some(value) => to_bool(value).map_err(|err| {
                    AppError::new(
                        ErrorCategory::ValidationError,
                        format!("task {} settings.{}: {}", task.id, name, err),
                    )
                }),
            }
        };
        Ok(TaskSettings::Iterator(IteratorSettings {
            iterate,
            accumulate: flag("accumulate")?,
            continue_on_error: flag("continueOnError")?,
        }))
    }

    async fn eval(&self, ctx: &mut TaskContext<'_>) -> Result<EvalResult, AppError> {
        let settings = Self::settings(ctx.task)?;
        let (index, items, mut accumulated) = match std::mem::take(&mut ctx.iterator) {
            IteratorState::Init => {
                let collection =
                    ctx.env
                        .engine
                        .evaluate(&settings.iterate, &ctx.resolver(None), ctx.flow)?;
                (0, collection_items(&collection)?, Vec::new())
            }
            IteratorState::Iterating {
                index,
                items,
                accumulated,
            } => (index, items, accumulated),
            IteratorState::Complete => return Ok(EvalResult::Done),
        };
        let Some((key, value)) = items.get(index).cloned() else {
            return Ok(Self::finish(ctx, settings.accumulate, accumulated));
        };
        let frame = IterationFrame { index, key, value };
        match invoke_activity(ctx, Some(&frame)).await {
            Ok((true, output)) => {
                if settings.accumulate {
                    accumulated.push(Value::Object(output.to_payload()));
                } else {
                    ctx.output = Some(output);
                }
            }
            Ok((false, _)) => {
                ctx.iterator = IteratorState::Iterating {
                    index,
                    items,
                    accumulated,
                };
                return Ok(EvalResult::NotDone);
            }
            Err(err) if settings.continue_on_error => {
                tracing::warn!(
                    run_id = %ctx.env.run_id,
                    task_id = %ctx.task.id,
                    index,
                    error = %err,
                    "iteration failed, continuing"
                );
                if settings.accumulate {
                    accumulated.push(Value::Null);
                }
            }
            Err(err) => return Err(err),
        }
        let next = index + 1;
        if next >= items.len() {
            return Ok(Self::finish(ctx, settings.accumulate, accumulated));
        }
        ctx.iterator = IteratorState::Iterating {
            index: next,
            items,
            accumulated,
        };
        Ok(EvalResult::Iterate)
    }
}

/// Elements of an iterator collection as `(key, value)` pairs.
fn collection_items(collection: &Value) -> Result<Vec<(Value, Value)>, AppError> {
    match collection {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, item)| (Value::from(i), item.clone()))
            .collect()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(key, item)| (Value::String(key.clone()), item.clone()))
            .collect()),
        Value::Number(n) if n.as_u64().is_some() => {
            let count = n.as_u64().unwrap_or(0);
            Ok((0..count)
                .map(|i| (Value::from(i), Value::from(i)))
                .collect())
        }
        other => Err(AppError::new(
            ErrorCategory::EvalError,
            format!(
                "iterate must yield an array, an object or a non-negative integer, got {}",
                crate::core::data::coerce::kind_name(other)
            ),
        )
        .with_code("FLOW-ITER-002")),
    }
}

/// Maps its input into a reply seeded with the action outputs and ends the run.
pub struct ReturnBehavior;

#[async_trait]
impl TaskBehavior for ReturnBehavior {
    fn name(&self) -> &str {
        "return"
    }

    fn prepare(&self, task: &TaskDef, _engine: &ExpressionEngine) -> Result<TaskSettings, AppError> {
        if let Some(activity) = &task.activity {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "return task {} cannot bind activity '{}'",
                    task.id, activity
                ),
            ));
        }
        Ok(TaskSettings::None)
    }

    async fn eval(&self, ctx: &mut TaskContext<'_>) -> Result<EvalResult, AppError> {
        let mut reply = Scope::from_decls(&ctx.env.action.definition().outputs)?;
        let resolver = ctx.resolver(None);
        ctx.task
            .input
            .apply(ctx.flow, &resolver, ctx.env.engine, &mut reply)?;
        Ok(EvalResult::Reply(reply))
    }
}

/// Builder used to register behaviors before an engine is built.
#[derive(Default)]
pub struct BehaviorRegistryBuilder {
    behaviors: HashMap<String, Arc<dyn TaskBehavior>>,
}

impl std::fmt::Debug for BehaviorRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorRegistryBuilder")
            .field("behaviors", &self.behaviors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BehaviorRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut builder = Self::new();
        let builtins: [Arc<dyn TaskBehavior>; 3] = [
            Arc::new(BasicBehavior),
            Arc::new(IteratorBehavior),
            Arc::new(ReturnBehavior),
        ];
        for behavior in builtins {
            builder
                .behaviors
                .insert(behavior.name().to_string(), behavior);
        }
        builder
    }

    pub fn register<T: TaskBehavior>(&mut self, behavior: T) -> Result<&mut Self, AppError> {
        let name = behavior.name().to_string();
        if self.behaviors.contains_key(&name) {
            return Err(AppError::new(
                ErrorCategory::DuplicateRegistration,
                format!("behavior '{}' is already registered", name),
            )
            .with_code("REG-DUP-005"));
        }
        self.behaviors.insert(name, Arc::new(behavior));
        Ok(self)
    }

    pub fn build(self) -> BehaviorRegistry {
        BehaviorRegistry {
            inner: Arc::new(self.behaviors),
        }
    }
}

#[derive(Clone, Default)]
pub struct BehaviorRegistry {
    inner: Arc<HashMap<String, Arc<dyn TaskBehavior>>>,
}

impl BehaviorRegistry {
    pub fn builder() -> BehaviorRegistryBuilder {
        BehaviorRegistryBuilder::new()
    }

    pub fn with_builtins() -> Self {
        BehaviorRegistryBuilder::with_builtins().build()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskBehavior>> {
        self.inner.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("behaviors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expression::FunctionRegistry;
    use serde_json::json;

    #[test]
    fn collections_expand_to_pairs() {
        assert_eq!(
            collection_items(&json!(["a", "b"])).unwrap(),
            vec![(json!(0), json!("a")), (json!(1), json!("b"))]
        );
        assert_eq!(
            collection_items(&json!({"x": 1, "y": 2})).unwrap(),
            vec![(json!("x"), json!(1)), (json!("y"), json!(2))]
        );
        assert_eq!(collection_items(&json!(3)).unwrap().len(), 3);
        assert!(collection_items(&json!(null)).unwrap().is_empty());
        assert!(collection_items(&json!(-1)).is_err());
        assert!(collection_items(&json!("abc")).is_err());
    }

    #[test]
    fn iterator_prepare_requires_collection() {
        let engine = ExpressionEngine::new(FunctionRegistry::with_builtins());
        let mut task = TaskDef::new("loop");
        task.behavior = "iterator".into();
        assert!(IteratorBehavior.prepare(&task, &engine).is_err());

        task.settings.insert("iterate".into(), json!("$items"));
        task.settings.insert("accumulate".into(), json!("true"));
        match IteratorBehavior.prepare(&task, &engine).unwrap() {
            TaskSettings::Iterator(settings) => {
                assert!(settings.accumulate);
                assert!(!settings.continue_on_error);
            }
            other => panic!("unexpected settings {:?}", other),
        }
    }

    #[test]
    fn return_task_rejects_activity() {
        let engine = ExpressionEngine::new(FunctionRegistry::with_builtins());
        let mut task = TaskDef::new("done");
        task.activity = Some("noop".into());
        let err = ReturnBehavior.prepare(&task, &engine).unwrap_err();
        assert_eq!(err.category, ErrorCategory::ValidationError);
    }

    #[test]
    fn duplicate_behavior_is_rejected() {
        let mut builder = BehaviorRegistryBuilder::with_builtins();
        let err = builder.register(BasicBehavior).unwrap_err();
        assert_eq!(err.category, ErrorCategory::DuplicateRegistration);
        assert_eq!(builder.build().names(), vec!["basic", "iterator", "return"]);
    }
}
