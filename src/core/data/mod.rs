//! Typed attribute storage shared by the expression engine, the mapper and the flow runtime.

pub mod attribute;
pub mod coerce;
pub mod path;
pub mod scope;
pub mod types;

pub use attribute::{AttrDecl, Attribute};
pub use coerce::{coerce, CoercionError};
pub use path::{FieldPath, PathSegment};
pub use scope::{GlobalScope, Payload, Scope};
pub use types::AttrType;
