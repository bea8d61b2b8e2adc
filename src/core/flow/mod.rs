//! Action graphs: definitions, compilation, task behaviors and the run executor.

pub mod activities;
pub mod activity;
pub mod behavior;
pub mod compiled;
pub mod definition;
pub mod executor;
pub mod resolver;
pub mod state;

pub use activity::{
    Activity, ActivityContext, ActivityMetadata, ActivityRegistry, ActivityRegistryBuilder,
};
pub use behavior::{
    BehaviorRegistry, BehaviorRegistryBuilder, EnterResult, EvalResult, TaskBehavior,
    TaskContext, TaskSettings,
};
pub use compiled::{CompiledAction, CompiledLink, CompiledTask};
pub use definition::{ActionDefinition, ErrorPolicy, LinkDef, LinkType, TaskDef};
pub use executor::{execute_action, ExecutionOptions, RunSummary};
pub use resolver::{IterationFrame, RunResolver};
pub use state::{IteratorState, LinkState, RunInstance, TaskStatus};
