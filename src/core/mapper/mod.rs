//! Ordered data mappings between scopes.
//!
//! A [`MapperDef`] is compiled once when its action is loaded: every expression is parsed
//! and every target path validated, so a mapping that cannot parse never reaches a run.
//! [`Mapper::apply`] then evaluates entries strictly in declaration order and writes each
//! result into the output scope before evaluating the next one.

use crate::core::data::path::MAX_WRITE_INDEX;
use crate::core::data::{FieldPath, Scope};
use crate::core::error::AppError;
use crate::core::expression::{Expr, ExpressionEngine, Resolver};
use crate::core::types::ErrorCategory;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub type MapperDef = Vec<MappingDef>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingType {
    Literal,
    Assign,
    #[default]
    Expression,
    Object,
}

/// One `target <- value` entry as written in an action document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingDef {
    #[serde(alias = "mapTo")]
    pub target: String,
    #[serde(rename = "type", default)]
    pub mapping_type: MappingType,
    #[serde(default)]
    pub value: Value,
}

impl MappingDef {
    pub fn new<T: Into<String>>(target: T, mapping_type: MappingType, value: Value) -> Self {
        Self {
            target: target.into(),
            mapping_type,
            value,
        }
    }

    pub fn expression<T: Into<String>, E: Into<String>>(target: T, expr: E) -> Self {
        Self::new(target, MappingType::Expression, Value::String(expr.into()))
    }

    pub fn literal<T: Into<String>>(target: T, value: Value) -> Self {
        Self::new(target, MappingType::Literal, value)
    }
}

#[derive(Debug, Clone)]
enum Template {
    Value(Value),
    Expr(Arc<Expr>),
    Array(Vec<Template>),
    Object(Vec<(String, Template)>),
}

#[derive(Debug, Clone)]
struct CompiledMapping {
    target: FieldPath,
    source: Template,
}

/// A compiled, immutable mapper.
#[derive(Debug, Clone, Default)]
pub struct Mapper {
    mappings: Vec<CompiledMapping>,
}

impl Mapper {
    pub fn compile(defs: &[MappingDef], engine: &ExpressionEngine) -> Result<Self, AppError> {
        let mut mappings = Vec::with_capacity(defs.len());
        for def in defs {
            let target = FieldPath::parse(&def.target).map_err(|err| {
                mapping_error(
                    &def.target,
                    ErrorCategory::ParseError,
                    format!("invalid mapping target: {}", err.message),
                )
            })?;
            if let Some(index) = target.oversized_index() {
                return Err(mapping_error(
                    &def.target,
                    ErrorCategory::ValidationError,
                    format!(
                        "mapping target index {} exceeds the limit of {}",
                        index, MAX_WRITE_INDEX
                    ),
                ));
            }
            let source = compile_source(def, engine).map_err(|mut err| {
                err.add_context("target", &def.target);
                err
            })?;
            mappings.push(CompiledMapping { target, source });
        }
        Ok(Self { mappings })
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn targets(&self) -> impl Iterator<Item = &FieldPath> {
        self.mappings.iter().map(|mapping| &mapping.target)
    }

    /// Evaluate every mapping against `input` and write it into `output`, in order.
    ///
    /// Stops at the first failure; writes made by earlier entries are kept.
    pub fn apply(
        &self,
        input: &Scope,
        resolver: &dyn Resolver,
        engine: &ExpressionEngine,
        output: &mut Scope,
    ) -> Result<(), AppError> {
        for index in 0..self.mappings.len() {
            let value = self.render_entry(index, input, resolver, engine)?;
            self.write_entry(index, value, output)?;
        }
        Ok(())
    }

    /// Evaluate the source of entry `index` without writing it.
    ///
    /// Together with [`Mapper::write_entry`] this lets a caller whose resolver reads the
    /// output scope rebuild that resolver between writes.
    pub fn render_entry(
        &self,
        index: usize,
        input: &Scope,
        resolver: &dyn Resolver,
        engine: &ExpressionEngine,
    ) -> Result<Value, AppError> {
        let mapping = self.entry(index)?;
        render(&mapping.source, input, resolver, engine).map_err(|mut err| {
            err.add_context("target", &mapping.target.to_string());
            err
        })
    }

    pub fn write_entry(&self, index: usize, value: Value, output: &mut Scope) -> Result<(), AppError> {
        let mapping = self.entry(index)?;
        output.write_path(&mapping.target, value).map_err(|mut err| {
            err.add_context("target", &mapping.target.to_string());
            err
        })
    }

    fn entry(&self, index: usize) -> Result<&CompiledMapping, AppError> {
        self.mappings.get(index).ok_or_else(|| {
            AppError::new(
                ErrorCategory::InternalError,
                format!("mapping {} out of range", index),
            )
        })
    }
}

fn compile_source(def: &MappingDef, engine: &ExpressionEngine) -> Result<Template, AppError> {
    match def.mapping_type {
        MappingType::Literal => Ok(Template::Value(def.value.clone())),
        MappingType::Assign => {
            let Value::String(text) = &def.value else {
                return Err(mapping_error(
                    &def.target,
                    ErrorCategory::ValidationError,
                    "assign mapping value must be a field reference string",
                ));
            };
            let text = text.trim();
            if text.starts_with('$') {
                return Ok(Template::Expr(engine.parse(text)?));
            }
            Ok(Template::Expr(Arc::new(Expr::Field(FieldPath::parse(text)?))))
        }
        MappingType::Expression => match &def.value {
            Value::String(text) => Ok(Template::Expr(engine.parse(text)?)),
            other => Ok(Template::Value(other.clone())),
        },
        MappingType::Object => compile_template(&def.value, engine),
    }
}

fn compile_template(value: &Value, engine: &ExpressionEngine) -> Result<Template, AppError> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            if let Some(expr) = trimmed.strip_prefix('=') {
                return Ok(Template::Expr(engine.parse(expr)?));
            }
            if trimmed.starts_with("${") && trimmed.ends_with('}') {
                return Ok(Template::Expr(engine.parse(trimmed)?));
            }
            Ok(Template::Value(value.clone()))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| compile_template(item, engine))
            .collect::<Result<Vec<_>, _>>()
            .map(Template::Array),
        Value::Object(map) => {
            let mut fields = Vec::with_capacity(map.len());
            for (key, item) in map {
                fields.push((key.clone(), compile_template(item, engine)?));
            }
            Ok(Template::Object(fields))
        }
        other => Ok(Template::Value(other.clone())),
    }
}

fn render(
    template: &Template,
    input: &Scope,
    resolver: &dyn Resolver,
    engine: &ExpressionEngine,
) -> Result<Value, AppError> {
    match template {
        Template::Value(value) => Ok(value.clone()),
        Template::Expr(expr) => engine.evaluate(expr, resolver, input),
        Template::Array(items) => items
            .iter()
            .map(|item| render(item, input, resolver, engine))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Template::Object(fields) => {
            let mut map = Map::new();
            for (key, item) in fields {
                map.insert(key.clone(), render(item, input, resolver, engine)?);
            }
            Ok(Value::Object(map))
        }
    }
}

fn mapping_error(target: &str, category: ErrorCategory, message: impl Into<String>) -> AppError {
    let mut error = AppError::new(category, message);
    error.add_context("target", target);
    error
}
