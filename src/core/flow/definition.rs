//! Action documents as written by users, plus structural validation of the task graph.

use crate::core::data::AttrDecl;
use crate::core::error::AppError;
use crate::core::mapper::MapperDef;
use crate::core::types::ErrorCategory;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{depth_first_search, Bfs, DfsEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

fn default_behavior() -> String {
    "basic".to_string()
}

/// Root document for an action definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: Vec<AttrDecl>,
    #[serde(default)]
    pub outputs: Vec<AttrDecl>,
    pub tasks: Vec<TaskDef>,
    #[serde(default)]
    pub links: Vec<LinkDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    #[default]
    Propagate,
    Continue,
}

/// A node of the action graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", alias = "behaviorType", default = "default_behavior")]
    pub behavior: String,
    #[serde(
        rename = "activity",
        alias = "activityRef",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub activity: Option<String>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(rename = "input", alias = "inputMappings", default)]
    pub input: MapperDef,
    #[serde(rename = "output", alias = "outputMappings", default)]
    pub output: MapperDef,
    #[serde(rename = "onError", alias = "on_error", default)]
    pub on_error: ErrorPolicy,
}

impl TaskDef {
    pub fn new<I: Into<String>>(id: I) -> Self {
        Self {
            id: id.into(),
            name: None,
            behavior: default_behavior(),
            activity: None,
            settings: Map::new(),
            input: Vec::new(),
            output: Vec::new(),
            on_error: ErrorPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    #[default]
    Default,
    Expression,
    Error,
}

/// Directed edge between two tasks, optionally guarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDef {
    pub from: String,
    pub to: String,
    #[serde(default, alias = "value", skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(rename = "type", default)]
    pub link_type: LinkType,
}

impl LinkDef {
    pub fn new<F: Into<String>, T: Into<String>>(from: F, to: T) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            guard: None,
            link_type: LinkType::Default,
        }
    }

    pub fn guarded<F: Into<String>, T: Into<String>, G: Into<String>>(
        from: F,
        to: T,
        guard: G,
    ) -> Self {
        Self {
            guard: Some(guard.into()),
            link_type: LinkType::Expression,
            ..Self::new(from, to)
        }
    }

    pub fn on_error<F: Into<String>, T: Into<String>>(from: F, to: T) -> Self {
        Self {
            link_type: LinkType::Error,
            ..Self::new(from, to)
        }
    }
}

impl ActionDefinition {
    pub fn from_json_str(text: &str) -> Result<Self, AppError> {
        serde_json::from_str(text).map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("failed to parse action definition: {}", err),
            )
            .with_code("DEF-PARSE-001")
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, AppError> {
        serde_yaml::from_str(text).map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("failed to parse action definition: {}", err),
            )
            .with_code("DEF-PARSE-001")
        })
    }

    /// Load a definition from a `.json`, `.yaml` or `.yml` file and check its structure.
    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", path.display(), err),
            )
        })?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let definition = if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        }
        .map_err(|mut err| {
            err.add_context("path", &path.display().to_string());
            err
        })?;
        definition.validate()?;
        Ok(definition)
    }

    /// SHA-256 of the canonical JSON form, lowercase hex.
    pub fn fingerprint(&self) -> Result<String, AppError> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// The single task without inbound links.
    pub fn entry_task(&self) -> Result<&TaskDef, AppError> {
        let targets: HashSet<&str> = self.links.iter().map(|link| link.to.as_str()).collect();
        let mut entries = self
            .tasks
            .iter()
            .filter(|task| !targets.contains(task.id.as_str()));
        match (entries.next(), entries.next()) {
            (Some(entry), None) => Ok(entry),
            (None, _) => Err(invalid(format!(
                "action '{}' has no entry task (every task has an inbound link)",
                self.id
            ))),
            (Some(first), Some(second)) => Err(invalid(format!(
                "action '{}' has more than one entry task ('{}', '{}')",
                self.id, first.id, second.id
            ))),
        }
    }

    /// Structural checks that need no registries: ids, links, entry, reachability, loops.
    ///
    /// Links may form cycles. A link that closes one (a back-link) must be a guarded
    /// `expression` link, so every loop has an explicit exit condition.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(invalid("action id must not be empty"));
        }
        if self.tasks.is_empty() {
            return Err(invalid(format!(
                "action '{}' must define at least one task",
                self.id
            )));
        }

        let graph = self.link_graph()?;
        let entry = self.entry_task()?;
        let start = graph.node(&entry.id)?;
        let mut reachable = HashSet::new();
        let mut bfs = Bfs::new(&graph.graph, start);
        while let Some(node) = bfs.next(&graph.graph) {
            reachable.insert(graph.graph[node]);
        }
        if let Some(orphan) = self
            .tasks
            .iter()
            .find(|task| !reachable.contains(task.id.as_str()))
        {
            return Err(invalid(format!(
                "task '{}' is unreachable from entry task '{}'",
                orphan.id, entry.id
            )));
        }

        for (link, back) in self.links.iter().zip(graph.back_links(start)) {
            if back && (link.link_type != LinkType::Expression || link.guard.is_none()) {
                return Err(invalid(format!(
                    "link {} -> {} closes a loop and needs a guard",
                    link.from, link.to
                )));
            }
        }
        Ok(())
    }

    /// One flag per link, true when the link closes a loop back to an earlier task.
    pub fn back_links(&self) -> Result<Vec<bool>, AppError> {
        let graph = self.link_graph()?;
        let start = graph.node(&self.entry_task()?.id)?;
        Ok(graph.back_links(start))
    }

    fn link_graph(&self) -> Result<LinkGraph<'_>, AppError> {
        let mut graph: DiGraph<&str, usize> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
        for task in &self.tasks {
            if task.id.trim().is_empty() {
                return Err(invalid("task id must not be empty"));
            }
            if nodes.contains_key(task.id.as_str()) {
                return Err(invalid(format!("duplicate task id: {}", task.id)));
            }
            nodes.insert(task.id.as_str(), graph.add_node(task.id.as_str()));
        }

        let mut seen_links = HashSet::new();
        for (index, link) in self.links.iter().enumerate() {
            let (Some(&from), Some(&to)) =
                (nodes.get(link.from.as_str()), nodes.get(link.to.as_str()))
            else {
                return Err(invalid(format!(
                    "link {} -> {} references an unknown task",
                    link.from, link.to
                )));
            };
            if !seen_links.insert((link.from.as_str(), link.to.as_str())) {
                return Err(invalid(format!(
                    "duplicate link {} -> {}",
                    link.from, link.to
                )));
            }
            match (link.link_type, &link.guard) {
                (LinkType::Expression, None) => {
                    return Err(invalid(format!(
                        "expression link {} -> {} has no guard",
                        link.from, link.to
                    )))
                }
                (LinkType::Error, Some(_)) => {
                    return Err(invalid(format!(
                        "error link {} -> {} cannot carry a guard",
                        link.from, link.to
                    )))
                }
                _ => {}
            }
            graph.add_edge(from, to, index);
        }
        Ok(LinkGraph {
            graph,
            nodes,
            link_count: self.links.len(),
        })
    }
}

struct LinkGraph<'a> {
    /// Edge weights are indices into [`ActionDefinition::links`].
    graph: DiGraph<&'a str, usize>,
    nodes: HashMap<&'a str, NodeIndex>,
    link_count: usize,
}

impl LinkGraph<'_> {
    fn node(&self, task_id: &str) -> Result<NodeIndex, AppError> {
        self.nodes
            .get(task_id)
            .copied()
            .ok_or_else(|| invalid(format!("task '{}' is not indexed", task_id)))
    }

    /// Depth-first from the entry; an edge into a task still on the stack is a back-link.
    fn back_links(&self, start: NodeIndex) -> Vec<bool> {
        let mut back_edges = HashSet::new();
        depth_first_search(&self.graph, Some(start), |event| {
            if let DfsEvent::BackEdge(from, to) = event {
                back_edges.insert((from, to));
            }
        });
        let mut flags = vec![false; self.link_count];
        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                if back_edges.contains(&(from, to)) {
                    flags[self.graph[edge]] = true;
                }
            }
        }
        flags
    }
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::new(ErrorCategory::ValidationError, message)
}
