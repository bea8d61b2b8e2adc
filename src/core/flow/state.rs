//! Mutable per-run state owned by the executor.

use crate::core::data::{GlobalScope, Payload, Scope};
use crate::core::error::AppError;
use crate::core::flow::compiled::CompiledAction;
use crate::core::types::ErrorCategory;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    Active,
    Done,
    Skipped,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::Active => "active",
            TaskStatus::Done => "done",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Skipped | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unresolved,
    True,
    False,
}

/// Progress of an iterator task, kept between re-entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum IteratorState {
    #[default]
    Init,
    Iterating {
        index: usize,
        /// `(key, value)` pairs: indices for arrays and counts, keys for objects.
        items: Vec<(Value, Value)>,
        accumulated: Vec<Value>,
    },
    Complete,
}

/// One trigger's worth of execution state.
#[derive(Debug)]
pub struct RunInstance {
    pub run_id: Uuid,
    pub action_id: String,
    /// Coerced trigger inputs, read through the `trigger` namespace.
    pub trigger: Scope,
    /// Working scope: declared inputs and outputs plus everything mapped into it.
    pub flow: Scope,
    pub statuses: IndexMap<String, TaskStatus>,
    pub links: Vec<LinkState>,
    pub iterators: HashMap<String, IteratorState>,
    pub activity_outputs: IndexMap<String, Scope>,
    pub evaluations: HashMap<String, usize>,
    /// Activations plus `done=false` re-entries, bounded by `max_task_iterations`.
    pub entries: HashMap<String, usize>,
    /// Iterator tasks queued for their next element rather than a new entry.
    pub continuing: HashSet<String>,
    pub ready: VecDeque<String>,
    pub reply: Option<Scope>,
}

impl RunInstance {
    pub fn new(
        action: &CompiledAction,
        trigger: Scope,
        global: Arc<GlobalScope>,
    ) -> Result<Self, AppError> {
        let definition = action.definition();
        let mut flow = Scope::from_decls(&definition.inputs)?;
        for decl in &definition.outputs {
            if !flow.contains(&decl.name) {
                flow.add_attr(decl.to_attribute()?);
            }
        }
        flow.set_parent(global);
        for attr in trigger.iter() {
            flow.set_value(attr.name(), attr.value().clone())?;
        }
        Ok(Self {
            run_id: Uuid::new_v4(),
            action_id: definition.id.clone(),
            trigger,
            flow,
            statuses: action
                .task_ids()
                .map(|id| (id.to_string(), TaskStatus::NotStarted))
                .collect(),
            links: vec![LinkState::Unresolved; action.links().len()],
            iterators: HashMap::new(),
            activity_outputs: IndexMap::new(),
            evaluations: HashMap::new(),
            entries: HashMap::new(),
            continuing: HashSet::new(),
            ready: VecDeque::new(),
            reply: None,
        })
    }

    pub fn status(&self, task_id: &str) -> TaskStatus {
        self.statuses
            .get(task_id)
            .copied()
            .unwrap_or(TaskStatus::NotStarted)
    }

    /// Move a task to `next`. Terminal states are final.
    pub fn transition(&mut self, task_id: &str, next: TaskStatus) -> Result<(), AppError> {
        let current = self.status(task_id);
        if current.is_terminal() {
            return Err(AppError::new(
                ErrorCategory::InternalError,
                format!(
                    "task {} cannot move from {} to {}",
                    task_id, current, next
                ),
            )
            .with_code("FLOW-STATE-001"));
        }
        tracing::debug!(
            run_id = %self.run_id,
            task_id,
            from = %current,
            to = %next,
            "task transition"
        );
        self.statuses.insert(task_id.to_string(), next);
        Ok(())
    }

    /// Mark a task active and queue it for evaluation.
    pub fn activate(&mut self, task_id: &str) -> Result<(), AppError> {
        self.transition(task_id, TaskStatus::Active)?;
        self.ready.push_back(task_id.to_string());
        Ok(())
    }

    /// Count one more evaluation of `task_id` and return the new total.
    pub fn record_evaluation(&mut self, task_id: &str) -> usize {
        let count = self.evaluations.entry(task_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Count one more entry of `task_id` and return the new total.
    pub fn record_entry(&mut self, task_id: &str) -> usize {
        let count = self.entries.entry(task_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Return the tasks of a loop body to `NotStarted` and clear the links leaving them,
    /// so a taken back-link can run the body again. Queued work inside the body is dropped.
    pub fn reopen(&mut self, action: &CompiledAction, body: &[String]) -> Result<(), AppError> {
        for task_id in body {
            self.statuses
                .insert(task_id.clone(), TaskStatus::NotStarted);
            self.iterators.remove(task_id);
            self.continuing.remove(task_id);
            for &index in &action.task(task_id)?.outgoing {
                self.links[index] = LinkState::Unresolved;
            }
        }
        self.ready.retain(|task_id| !body.contains(task_id));
        tracing::debug!(
            run_id = %self.run_id,
            head = body.first().map(String::as_str).unwrap_or_default(),
            tasks = body.len(),
            "loop reopened"
        );
        Ok(())
    }

    pub fn total_evaluations(&self) -> usize {
        self.evaluations.values().sum()
    }

    /// Values of the declared outputs as they stand in the working scope.
    pub fn declared_outputs(&self, action: &CompiledAction) -> Payload {
        action
            .definition()
            .outputs
            .iter()
            .map(|decl| {
                let value = self.flow.get_value(&decl.name).unwrap_or(Value::Null);
                (decl.name.clone(), value)
            })
            .collect()
    }
}
