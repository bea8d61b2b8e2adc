pub mod config;
pub mod data;
pub mod error;
pub mod expression;
pub mod flow;
pub mod mapper;
pub mod runner;
pub mod types;

pub use config::{ConfigLoader, MicroflowConfig, RunnerConfig, RunnerType};
pub use data::{AttrDecl, AttrType, Attribute, GlobalScope, Payload, Scope};
pub use error::AppError;
pub use expression::{ExpressionEngine, FunctionRegistry, FunctionRegistryBuilder};
pub use flow::{ActionDefinition, Activity, ActivityContext, ActivityMetadata, RunSummary};
pub use mapper::{Mapper, MapperDef, MappingDef, MappingType};
pub use runner::{build_runner, ActionRunner, DirectRunner, Engine, EngineBuilder, PooledRunner};
pub use types::*;
