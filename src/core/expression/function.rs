//! Named function registry consulted by the evaluator for every call node.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

pub type FunctionImpl = Arc<dyn Fn(&[Value]) -> Result<Value, AppError> + Send + Sync>;

/// A callable registered under `category.name`.
#[derive(Clone)]
pub struct FunctionDef {
    pub name: String,
    pub category: String,
    call: FunctionImpl,
}

impl FunctionDef {
    pub fn qualified_name(&self) -> String {
        qualify(&self.category, &self.name)
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, AppError> {
        (self.call)(args)
    }
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish()
    }
}

fn qualify(category: &str, name: &str) -> String {
    if category.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", category, name)
    }
}

#[derive(Default, Debug)]
pub struct FunctionRegistryBuilder {
    functions: HashMap<String, FunctionDef>,
}

impl FunctionRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the builtin `string`, `number` and `array` categories.
    pub fn with_builtins() -> Self {
        let mut builder = Self::new();
        crate::core::expression::functions::register_builtins(&mut builder);
        builder
    }

    /// Register `f` as `category.name`. Registering the same qualified name twice is an error.
    pub fn register<F>(&mut self, name: &str, category: &str, f: F) -> Result<&mut Self, AppError>
    where
        F: Fn(&[Value]) -> Result<Value, AppError> + Send + Sync + 'static,
    {
        let qualified = qualify(category, name);
        if self.functions.contains_key(&qualified) {
            return Err(AppError::new(
                ErrorCategory::DuplicateRegistration,
                format!("function '{}' is already registered", qualified),
            )
            .with_code("REG-DUP-002"));
        }
        Ok(self.define(name, category, f))
    }

    /// Insert without the duplicate check; used for the builtin tables.
    pub(crate) fn define<F>(&mut self, name: &str, category: &str, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, AppError> + Send + Sync + 'static,
    {
        self.functions.insert(
            qualify(category, name),
            FunctionDef {
                name: name.to_string(),
                category: category.to_string(),
                call: Arc::new(f),
            },
        );
        self
    }

    pub fn build(self) -> FunctionRegistry {
        FunctionRegistry {
            functions: Arc::new(self.functions),
        }
    }
}

/// Immutable, cheaply cloneable function table.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: Arc<HashMap<String, FunctionDef>>,
}

impl FunctionRegistry {
    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder::new()
    }

    pub fn with_builtins() -> Self {
        FunctionRegistryBuilder::with_builtins().build()
    }

    pub fn get(&self, qualified_name: &str) -> Option<&FunctionDef> {
        self.functions.get(qualified_name)
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.functions.contains_key(qualified_name)
    }

    /// Invoke a function by qualified name.
    pub fn call(&self, qualified_name: &str, args: &[Value]) -> Result<Value, AppError> {
        let function = self.get(qualified_name).ok_or_else(|| {
            AppError::new(
                ErrorCategory::UnknownFunction,
                format!("unknown function '{}'", qualified_name),
            )
        })?;
        function.call(args)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

static GLOBAL_FUNCTIONS: OnceLock<FunctionRegistry> = OnceLock::new();

/// Process-wide registry; defaults to the builtins unless [`install_global`] ran first.
pub fn global() -> &'static FunctionRegistry {
    GLOBAL_FUNCTIONS.get_or_init(FunctionRegistry::with_builtins)
}

/// Install a custom process-wide registry. Fails once the global table has been read or set.
pub fn install_global(registry: FunctionRegistry) -> Result<(), AppError> {
    GLOBAL_FUNCTIONS.set(registry).map_err(|_| {
        AppError::new(
            ErrorCategory::DuplicateRegistration,
            "global function registry is already initialized",
        )
        .with_code("REG-DUP-003")
    })
}
