//! Load-time compilation of an [`ActionDefinition`] against the engine's registries.
//!
//! Everything that can be checked without running is checked here: graph structure, guard
//! and mapping syntax, function names, activity and behavior references.

use crate::core::error::AppError;
use crate::core::expression::{Expr, ExpressionEngine};
use crate::core::flow::activity::{Activity, ActivityRegistry};
use crate::core::flow::behavior::{BehaviorRegistry, TaskBehavior, TaskSettings};
use crate::core::flow::definition::{ActionDefinition, ErrorPolicy, LinkType};
use crate::core::mapper::Mapper;
use crate::core::types::ErrorCategory;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

pub struct CompiledTask {
    pub id: String,
    pub behavior: Arc<dyn TaskBehavior>,
    pub activity: Option<Arc<dyn Activity>>,
    pub settings: TaskSettings,
    pub raw_settings: Map<String, Value>,
    pub input: Mapper,
    pub output: Mapper,
    pub on_error: ErrorPolicy,
    /// Indices into [`CompiledAction::links`].
    pub outgoing: Vec<usize>,
    /// Inbound links that gate activation. Back-links are not among them.
    pub incoming: Vec<usize>,
}

impl CompiledTask {
    pub fn has_error_links(&self, links: &[CompiledLink]) -> bool {
        self.outgoing
            .iter()
            .any(|&index| links[index].link_type == LinkType::Error)
    }
}

impl fmt::Debug for CompiledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTask")
            .field("id", &self.id)
            .field("behavior", &self.behavior.name())
            .field(
                "activity",
                &self.activity.as_ref().map(|a| a.metadata().name.clone()),
            )
            .field("outgoing", &self.outgoing)
            .field("incoming", &self.incoming)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CompiledLink {
    pub from: String,
    pub to: String,
    pub link_type: LinkType,
    pub guard: Option<Arc<Expr>>,
    /// Closes a loop: when taken it reopens `body` instead of joining into its target.
    pub back: bool,
    /// Tasks reachable from the target over forward links, the target included.
    pub body: Vec<String>,
}

/// An action ready to run: validated, with every expression parsed.
#[derive(Debug)]
pub struct CompiledAction {
    definition: ActionDefinition,
    fingerprint: String,
    entry: String,
    tasks: IndexMap<String, CompiledTask>,
    links: Vec<CompiledLink>,
}

impl CompiledAction {
    pub fn compile(
        definition: ActionDefinition,
        engine: &ExpressionEngine,
        activities: &ActivityRegistry,
        behaviors: &BehaviorRegistry,
    ) -> Result<Self, AppError> {
        definition.validate()?;
        let entry = definition.entry_task()?.id.clone();
        let back_links = definition.back_links()?;
        let fingerprint = definition.fingerprint()?;

        let mut tasks = IndexMap::with_capacity(definition.tasks.len());
        for task in &definition.tasks {
            let behavior = behaviors.get(&task.behavior).ok_or_else(|| {
                AppError::new(
                    ErrorCategory::ValidationError,
                    format!(
                        "task {} uses unknown behavior '{}'",
                        task.id, task.behavior
                    ),
                )
                .with_code("DEF-BEHAVIOR-001")
            })?;
            let activity = match &task.activity {
                Some(name) => Some(activities.get(name).ok_or_else(|| {
                    AppError::new(
                        ErrorCategory::ValidationError,
                        format!("task {} uses unknown activity '{}'", task.id, name),
                    )
                    .with_code("DEF-ACTIVITY-001")
                })?),
                None => None,
            };
            let in_task = |mut err: AppError| {
                err.add_context("task_id", &task.id);
                err
            };
            let settings = behavior.prepare(task, engine).map_err(in_task)?;
            let input = Mapper::compile(&task.input, engine).map_err(in_task)?;
            let output = Mapper::compile(&task.output, engine).map_err(in_task)?;
            tasks.insert(
                task.id.clone(),
                CompiledTask {
                    id: task.id.clone(),
                    behavior,
                    activity,
                    settings,
                    raw_settings: task.settings.clone(),
                    input,
                    output,
                    on_error: task.on_error,
                    outgoing: Vec::new(),
                    incoming: Vec::new(),
                },
            );
        }

        let mut links = Vec::with_capacity(definition.links.len());
        for (index, link) in definition.links.iter().enumerate() {
            let guard = match (&link.guard, link.link_type) {
                (Some(text), LinkType::Default | LinkType::Expression) => {
                    Some(engine.parse(text).map_err(|mut err| {
                        err.add_context("link", &format!("{} -> {}", link.from, link.to));
                        err
                    })?)
                }
                _ => None,
            };
            let back = back_links.get(index).copied().unwrap_or(false);
            if let Some(task) = tasks.get_mut(&link.from) {
                task.outgoing.push(index);
            }
            if !back {
                if let Some(task) = tasks.get_mut(&link.to) {
                    task.incoming.push(index);
                }
            }
            links.push(CompiledLink {
                from: link.from.clone(),
                to: link.to.clone(),
                link_type: link.link_type,
                guard,
                back,
                body: Vec::new(),
            });
        }
        for index in 0..links.len() {
            if links[index].back {
                let body = loop_body(&links[index].to, &tasks, &links);
                links[index].body = body;
            }
        }

        Ok(Self {
            definition,
            fingerprint,
            entry,
            tasks,
            links,
        })
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn definition(&self) -> &ActionDefinition {
        &self.definition
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn task(&self, task_id: &str) -> Result<&CompiledTask, AppError> {
        self.tasks.get(task_id).ok_or_else(|| {
            AppError::new(
                ErrorCategory::InternalError,
                format!("action {} has no task {}", self.id(), task_id),
            )
        })
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn links(&self) -> &[CompiledLink] {
        &self.links
    }
}

/// Breadth-first over forward links from `head`.
fn loop_body(
    head: &str,
    tasks: &IndexMap<String, CompiledTask>,
    links: &[CompiledLink],
) -> Vec<String> {
    let mut body = vec![head.to_string()];
    let mut next = 0;
    while next < body.len() {
        if let Some(task) = tasks.get(&body[next]) {
            for &index in &task.outgoing {
                let link = &links[index];
                if !link.back && !body.contains(&link.to) {
                    body.push(link.to.clone());
                }
            }
        }
        next += 1;
    }
    body
}
