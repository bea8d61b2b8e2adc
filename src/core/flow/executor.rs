//! Drives one run of a compiled action: ready queue, task transitions and link resolution.

use crate::core::data::{GlobalScope, Payload, Scope};
use crate::core::error::AppError;
use crate::core::expression::ExpressionEngine;
use crate::core::flow::behavior::{EnterResult, EvalResult, RunEnv, TaskContext};
use crate::core::flow::compiled::{CompiledAction, CompiledTask};
use crate::core::flow::definition::{ErrorPolicy, LinkType};
use crate::core::flow::resolver::RunResolver;
use crate::core::flow::state::{IteratorState, LinkState, RunInstance, TaskStatus};
use crate::core::types::ErrorCategory;
use futures::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Ready tasks evaluated together in one tick.
    pub parallel_limit: usize,
    /// Entries allowed per task: its activation, each `done=false` re-entry and each
    /// reopening by a back-link. Iterator elements are bounded by their collection instead.
    pub max_task_iterations: usize,
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            parallel_limit: 4,
            max_task_iterations: 1000,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub action_id: String,
    pub outputs: Payload,
    pub statuses: IndexMap<String, TaskStatus>,
    pub evaluations: usize,
}

pub async fn execute_action(
    action: &CompiledAction,
    engine: &ExpressionEngine,
    global: Arc<GlobalScope>,
    trigger: Scope,
    options: ExecutionOptions,
) -> Result<RunSummary, AppError> {
    let mut run = RunInstance::new(action, trigger, global)?;
    tracing::info!(
        run_id = %run.run_id,
        action_id = %run.action_id,
        "run started"
    );
    match drive(action, engine, &mut run, &options).await {
        Ok(()) => {
            let outputs = match run.reply.take() {
                Some(reply) => reply.to_payload(),
                None => run.declared_outputs(action),
            };
            let evaluations = run.total_evaluations();
            tracing::info!(
                run_id = %run.run_id,
                action_id = %run.action_id,
                evaluations,
                "run finished"
            );
            Ok(RunSummary {
                run_id: run.run_id,
                action_id: run.action_id,
                outputs,
                statuses: run.statuses,
                evaluations,
            })
        }
        Err(mut err) => {
            err.add_context("run_id", &run.run_id.to_string());
            err.add_context("action_id", &run.action_id);
            tracing::error!(
                run_id = %run.run_id,
                action_id = %run.action_id,
                code = %err.code,
                error = %err.message,
                "run failed"
            );
            Err(err)
        }
    }
}

async fn drive(
    action: &CompiledAction,
    engine: &ExpressionEngine,
    run: &mut RunInstance,
    options: &ExecutionOptions,
) -> Result<(), AppError> {
    run.activate(action.entry())?;
    let parallel_limit = options.parallel_limit.max(1);

    while !run.ready.is_empty() {
        check_boundary(options)?;

        let mut batch = Vec::new();
        while batch.len() < parallel_limit {
            let Some(task_id) = run.ready.pop_front() else {
                break;
            };
            run.record_evaluation(&task_id);
            if !run.continuing.remove(&task_id)
                && run.record_entry(&task_id) > options.max_task_iterations
            {
                let mut err = AppError::new(
                    ErrorCategory::IterationLimit,
                    format!(
                        "task {} exceeded {} entries",
                        task_id, options.max_task_iterations
                    ),
                );
                err.add_context("task_id", &task_id);
                return Err(err);
            }
            let iterator = run.iterators.remove(&task_id).unwrap_or_default();
            batch.push((action.task(&task_id)?, iterator));
        }

        let outcomes = evaluate_batch(action, engine, run, batch).await;
        for (task, result, iterator, output) in outcomes {
            if run.status(&task.id) != TaskStatus::Active {
                tracing::debug!(
                    run_id = %run.run_id,
                    task_id = %task.id,
                    "outcome of reopened task dropped"
                );
                continue;
            }
            match result {
                Ok(EvalResult::Done) => {
                    let applied = match output {
                        Some(output) => apply_output(action, engine, run, task, output),
                        None => Ok(()),
                    };
                    match applied {
                        Ok(()) => {
                            run.transition(&task.id, TaskStatus::Done)?;
                            settle_links(action, engine, run, task, TaskStatus::Done)?;
                        }
                        Err(err) => absorb_failure(action, engine, run, task, err)?,
                    }
                }
                Ok(EvalResult::NotDone) => {
                    run.iterators.insert(task.id.clone(), iterator);
                    run.ready.push_back(task.id.clone());
                }
                Ok(EvalResult::Iterate) => {
                    let applied = match output {
                        Some(output) => apply_output(action, engine, run, task, output),
                        None => Ok(()),
                    };
                    match applied {
                        Ok(()) => {
                            run.iterators.insert(task.id.clone(), iterator);
                            run.continuing.insert(task.id.clone());
                            run.ready.push_back(task.id.clone());
                        }
                        Err(err) => absorb_failure(action, engine, run, task, err)?,
                    }
                }
                Ok(EvalResult::Reply(reply)) => {
                    run.transition(&task.id, TaskStatus::Done)?;
                    tracing::debug!(run_id = %run.run_id, task_id = %task.id, "reply produced");
                    run.reply = Some(reply);
                    run.ready.clear();
                    return Ok(());
                }
                Err(err) => absorb_failure(action, engine, run, task, err)?,
            }
        }
    }
    Ok(())
}

fn check_boundary(options: &ExecutionOptions) -> Result<(), AppError> {
    if options.cancel.is_cancelled() {
        return Err(AppError::new(ErrorCategory::Cancelled, "run was cancelled"));
    }
    if options
        .deadline
        .is_some_and(|deadline| Instant::now() >= deadline)
    {
        return Err(
            AppError::new(ErrorCategory::Cancelled, "run exceeded its timeout")
                .with_code("RUN-CANCEL-002"),
        );
    }
    Ok(())
}

type Outcome<'t> = (
    &'t CompiledTask,
    Result<EvalResult, AppError>,
    IteratorState,
    Option<Scope>,
);

/// Evaluate one tick's tasks concurrently against the working scope as it stands.
async fn evaluate_batch<'t>(
    action: &'t CompiledAction,
    engine: &ExpressionEngine,
    run: &RunInstance,
    batch: Vec<(&'t CompiledTask, IteratorState)>,
) -> Vec<Outcome<'t>> {
    let env = RunEnv {
        action,
        engine,
        run_id: run.run_id,
        trigger: &run.trigger,
    };
    let tasks: Vec<&'t CompiledTask> = batch.iter().map(|(task, _)| *task).collect();
    let mut contexts: Vec<TaskContext<'_>> = batch
        .into_iter()
        .map(|(task, iterator)| TaskContext {
            task,
            env: &env,
            flow: &run.flow,
            activities: &run.activity_outputs,
            iterator,
            output: None,
        })
        .collect();

    let futures = contexts.iter_mut().map(|ctx| async move {
        let task = ctx.task;
        match task.behavior.enter(ctx) {
            Ok(EnterResult::Done) => Ok(EvalResult::Done),
            Ok(EnterResult::Eval) => task.behavior.eval(ctx).await,
            Err(err) => Err(err),
        }
    });
    let results = join_all(futures).await;

    tasks
        .into_iter()
        .zip(results)
        .zip(contexts)
        .map(|((task, result), ctx)| (task, result, ctx.iterator, ctx.output))
        .collect()
}

/// Record a task's activity output and run its output mappings into the working scope.
fn apply_output(
    action: &CompiledAction,
    engine: &ExpressionEngine,
    run: &mut RunInstance,
    task: &CompiledTask,
    output: Scope,
) -> Result<(), AppError> {
    run.activity_outputs.insert(task.id.clone(), output);
    if task.output.is_empty() {
        return Ok(());
    }
    let Some(input) = run.activity_outputs.get(&task.id) else {
        return Ok(());
    };
    // Each entry resolves `flow.` against the writes of the entries before it.
    for index in 0..task.output.len() {
        let value = {
            let resolver = RunResolver::new(&run.trigger, &run.flow, &run.activity_outputs);
            task.output.render_entry(index, input, &resolver, engine)?
        };
        task.output.write_entry(index, value, &mut run.flow)?;
    }
    tracing::debug!(
        run_id = %run.run_id,
        action_id = action.id(),
        task_id = %task.id,
        "output mappings applied"
    );
    Ok(())
}

/// Fail the task locally when its policy allows it, otherwise fail the run.
fn absorb_failure(
    action: &CompiledAction,
    engine: &ExpressionEngine,
    run: &mut RunInstance,
    task: &CompiledTask,
    err: AppError,
) -> Result<(), AppError> {
    let absorbed = task.on_error == ErrorPolicy::Continue || task.has_error_links(action.links());
    if !absorbed {
        return Err(AppError::task_failed(&task.id, err));
    }
    tracing::warn!(
        run_id = %run.run_id,
        task_id = %task.id,
        code = %err.code,
        error = %err.message,
        "task failed, continuing"
    );
    run.iterators.remove(&task.id);
    run.transition(&task.id, TaskStatus::Failed)?;
    settle_links(action, engine, run, task, TaskStatus::Failed)
}

/// Resolve the outgoing links of a task that reached `status`, then decide every target whose
/// inbound links are all resolved. Skips propagate. Taken back-links reopen their loop once
/// the forward links have settled.
fn settle_links<'t>(
    action: &'t CompiledAction,
    engine: &ExpressionEngine,
    run: &mut RunInstance,
    task: &'t CompiledTask,
    status: TaskStatus,
) -> Result<(), AppError> {
    let mut pending: VecDeque<(&'t CompiledTask, TaskStatus)> = VecDeque::from([(task, status)]);
    let mut reopened = Vec::new();
    while let Some((source, status)) = pending.pop_front() {
        for &index in &source.outgoing {
            let link = &action.links()[index];
            let taken = match (status, link.link_type) {
                (TaskStatus::Done, LinkType::Error) => false,
                (TaskStatus::Done, _) => match &link.guard {
                    Some(guard) => {
                        let resolver =
                            RunResolver::new(&run.trigger, &run.flow, &run.activity_outputs);
                        engine
                            .evaluate_bool(guard, &resolver, &run.flow)
                            .map_err(|mut err| {
                                err.add_context("link", &format!("{} -> {}", link.from, link.to));
                                err
                            })?
                    }
                    None => true,
                },
                (TaskStatus::Failed, LinkType::Error) => true,
                _ => false,
            };
            run.links[index] = if taken {
                LinkState::True
            } else {
                LinkState::False
            };
            tracing::debug!(
                run_id = %run.run_id,
                from = %link.from,
                to = %link.to,
                taken,
                "link resolved"
            );
            if link.back {
                if taken {
                    reopened.push(link);
                }
                continue;
            }

            let target = action.task(&link.to)?;
            if run.status(&target.id) != TaskStatus::NotStarted {
                continue;
            }
            let states: Vec<LinkState> = target.incoming.iter().map(|&i| run.links[i]).collect();
            if states.contains(&LinkState::Unresolved) {
                continue;
            }
            if states.contains(&LinkState::True) {
                run.activate(&target.id)?;
            } else {
                run.transition(&target.id, TaskStatus::Skipped)?;
                pending.push_back((target, TaskStatus::Skipped));
            }
        }
    }
    for link in reopened {
        run.reopen(action, &link.body)?;
        if run.status(&link.to) == TaskStatus::NotStarted {
            run.activate(&link.to)?;
        }
    }
    Ok(())
}
