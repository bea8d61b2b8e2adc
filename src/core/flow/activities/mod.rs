pub mod error;
pub mod log;
pub mod noop;

pub use error::ErrorActivity;
pub use log::LogActivity;
pub use noop::NoopActivity;

use crate::core::flow::activity::Activity;
use std::sync::Arc;

pub fn builtins() -> Vec<Arc<dyn Activity>> {
    vec![
        Arc::new(NoopActivity::new()),
        Arc::new(LogActivity::new()),
        Arc::new(ErrorActivity::new()),
    ]
}
