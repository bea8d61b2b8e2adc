//! Attribute scopes: per-run local scopes and the process-wide global scope.

use crate::core::data::attribute::{AttrDecl, Attribute};
use crate::core::data::coerce::CoercionError;
use crate::core::data::path::{get_path, set_path, FieldPath, PathSegment};
use crate::core::data::types::AttrType;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Plain name -> value mapping exchanged at the trigger boundary.
pub type Payload = Map<String, Value>;

/// Namespace that routes mapper writes to the parent global scope.
pub const GLOBAL_NAMESPACE: &str = "global";

/// Ordered attribute store with an optional global parent used as lookup fallback.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    attrs: IndexMap<String, Attribute>,
    parent: Option<Arc<GlobalScope>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Arc<GlobalScope>) -> Self {
        Self {
            attrs: IndexMap::new(),
            parent: Some(parent),
        }
    }

    /// Build a scope holding the declared attributes at their default values.
    pub fn from_decls(decls: &[AttrDecl]) -> Result<Self, CoercionError> {
        let mut scope = Scope::new();
        for decl in decls {
            scope.add_attr(decl.to_attribute()?);
        }
        Ok(scope)
    }

    /// Build a scope of untyped attributes from a payload.
    pub fn from_payload(payload: &Payload) -> Self {
        let mut scope = Scope::new();
        for (name, value) in payload {
            scope.add_attr(Attribute::untyped(name.clone(), value.clone()));
        }
        scope
    }

    pub fn parent(&self) -> Option<&Arc<GlobalScope>> {
        self.parent.as_ref()
    }

    pub fn set_parent(&mut self, parent: Arc<GlobalScope>) {
        self.parent = Some(parent);
    }

    pub fn get_local(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    /// Look up a value locally, then in the parent scope.
    pub fn try_get_value(&self, name: &str) -> Result<Option<Value>, AppError> {
        if let Some(attr) = self.attrs.get(name) {
            return Ok(Some(attr.value().clone()));
        }
        match &self.parent {
            Some(parent) => parent.get_value(name),
            None => Ok(None),
        }
    }

    /// [`Scope::try_get_value`] for callers that read outputs, where an unreadable parent
    /// counts as absent.
    pub fn get_value(&self, name: &str) -> Option<Value> {
        self.try_get_value(name).unwrap_or_else(|err| {
            tracing::warn!(
                name,
                code = %err.code,
                error = %err.message,
                "global scope unreadable"
            );
            None
        })
    }

    /// Resolve a full path whose first segment names an attribute.
    pub fn resolve_path(&self, segments: &[PathSegment]) -> Result<Option<Value>, AppError> {
        let Some((PathSegment::Key(name), rest)) = segments.split_first() else {
            return Ok(None);
        };
        Ok(self
            .try_get_value(name)?
            .and_then(|root| get_path(&root, rest).cloned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Insert or replace an attribute, keeping its position if it already existed.
    pub fn add_attr(&mut self, attr: Attribute) {
        self.attrs.insert(attr.name().to_string(), attr);
    }

    /// Update an existing attribute (coercing to its type) or add an untyped one.
    pub fn set_value(&mut self, name: &str, value: Value) -> Result<(), CoercionError> {
        match self.attrs.get_mut(name) {
            Some(attr) => attr.set_value(value),
            None => {
                self.attrs
                    .insert(name.to_string(), Attribute::untyped(name, value));
                Ok(())
            }
        }
    }

    /// Write `value` at `path`. Paths under `global.` go to the parent global scope.
    pub fn write_path(&mut self, path: &FieldPath, value: Value) -> Result<(), AppError> {
        let segments = path.segments();
        let Some((PathSegment::Key(name), rest)) = segments.split_first() else {
            return Err(AppError::new(
                ErrorCategory::EvalError,
                format!("mapping target '{}' must start with an attribute name", path),
            )
            .with_code("DATA-PATH-003"));
        };
        if name == GLOBAL_NAMESPACE && !rest.is_empty() {
            if let Some(parent) = &self.parent {
                return parent.write_path(rest, value);
            }
        }
        if rest.is_empty() {
            return self.set_value(name, value).map_err(AppError::from);
        }
        let mut root = self
            .attrs
            .get(name)
            .map(|attr| attr.value().clone())
            .unwrap_or(Value::Null);
        set_path(&mut root, rest, value)?;
        self.set_value(name, root).map_err(AppError::from)
    }

    pub fn attr_type(&self, name: &str) -> Option<AttrType> {
        self.attrs.get(name).map(Attribute::attr_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attrs.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Local attributes as a plain payload.
    pub fn to_payload(&self) -> Payload {
        self.attrs
            .iter()
            .map(|(name, attr)| (name.clone(), attr.value().clone()))
            .collect()
    }
}

/// Process-wide scope shared by every run of an engine.
///
/// Created once when the engine is built and dropped with it. Every read and write takes the
/// internal lock; callers never hold it across an await point.
#[derive(Debug, Default)]
pub struct GlobalScope {
    attrs: RwLock<IndexMap<String, Attribute>>,
}

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexMap<String, Attribute>>, AppError> {
        self.attrs.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexMap<String, Attribute>>, AppError> {
        self.attrs.write().map_err(|_| poisoned())
    }

    pub fn get(&self, name: &str) -> Result<Option<Attribute>, AppError> {
        Ok(self.read()?.get(name).cloned())
    }

    pub fn get_value(&self, name: &str) -> Result<Option<Value>, AppError> {
        Ok(self.read()?.get(name).map(|attr| attr.value().clone()))
    }

    /// Add a new attribute; fails if the name is taken.
    pub fn add(&self, attr: Attribute) -> Result<(), AppError> {
        let mut guard = self.write()?;
        if guard.contains_key(attr.name()) {
            return Err(AppError::new(
                ErrorCategory::DuplicateRegistration,
                format!("global attribute '{}' already exists", attr.name()),
            ));
        }
        guard.insert(attr.name().to_string(), attr);
        Ok(())
    }

    /// Replace the value of an existing attribute, coercing to its declared type.
    pub fn update(&self, name: &str, value: Value) -> Result<(), AppError> {
        let mut guard = self.write()?;
        let attr = guard.get_mut(name).ok_or_else(|| {
            AppError::new(
                ErrorCategory::EvalError,
                format!("global attribute '{}' does not exist", name),
            )
            .with_code("DATA-GLOBAL-001")
        })?;
        attr.set_value(value).map_err(AppError::from)
    }

    /// Update if present, otherwise add as `any`.
    pub fn set(&self, name: &str, value: Value) -> Result<(), AppError> {
        let mut guard = self.write()?;
        match guard.get_mut(name) {
            Some(attr) => attr.set_value(value).map_err(AppError::from),
            None => {
                guard.insert(name.to_string(), Attribute::untyped(name, value));
                Ok(())
            }
        }
    }

    /// Read-modify-write of a nested path under one lock acquisition.
    pub fn write_path(&self, segments: &[PathSegment], value: Value) -> Result<(), AppError> {
        let Some((PathSegment::Key(name), rest)) = segments.split_first() else {
            return Err(AppError::new(
                ErrorCategory::EvalError,
                "global mapping target must name an attribute",
            )
            .with_code("DATA-PATH-003"));
        };
        let mut guard = self.write()?;
        let mut root = guard
            .get(name)
            .map(|attr| attr.value().clone())
            .unwrap_or(Value::Null);
        set_path(&mut root, rest, value)?;
        match guard.get_mut(name) {
            Some(attr) => attr.set_value(root).map_err(AppError::from),
            None => {
                guard.insert(name.clone(), Attribute::untyped(name.clone(), root));
                Ok(())
            }
        }
    }

    pub fn snapshot(&self) -> Result<Scope, AppError> {
        let guard = self.read()?;
        let mut scope = Scope::new();
        for attr in guard.values() {
            scope.add_attr(attr.clone());
        }
        Ok(scope)
    }

    pub fn len(&self) -> usize {
        self.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> AppError {
    AppError::new(ErrorCategory::InternalError, "global scope lock poisoned")
        .with_code("DATA-GLOBAL-002")
}
