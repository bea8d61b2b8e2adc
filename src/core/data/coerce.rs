//! Total coercion functions between JSON values and declared attribute types.

use crate::core::data::types::AttrType;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use serde_json::{Number, Value};

/// Failure converting a value into a declared attribute type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoercionError {
    #[error("unsupported coercion from {found} to {target}")]
    UnsupportedCoercion { found: &'static str, target: AttrType },
    #[error("value '{value}' is not a valid {target}")]
    InvalidValue { value: String, target: AttrType },
}

impl From<CoercionError> for AppError {
    fn from(err: CoercionError) -> Self {
        let code = match err {
            CoercionError::UnsupportedCoercion { .. } => "DATA-COERCE-001",
            CoercionError::InvalidValue { .. } => "DATA-COERCE-002",
        };
        AppError::new(ErrorCategory::CoercionError, err.to_string()).with_code(code)
    }
}

/// Name of the JSON kind of `value`, used in diagnostics.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce `value` into `target`. `null` passes through for every type.
pub fn coerce(value: &Value, target: AttrType) -> Result<Value, CoercionError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match target {
        AttrType::Any => Ok(value.clone()),
        AttrType::String => Ok(Value::String(to_display_string(value))),
        AttrType::Int => to_i64(value).map(Value::from),
        AttrType::Float => {
            let f = to_f64(value)?;
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| invalid(value, AttrType::Float))
        }
        AttrType::Bool => to_bool(value).map(Value::Bool),
        AttrType::Array => match value {
            Value::Array(_) => Ok(value.clone()),
            other => Err(unsupported(other, AttrType::Array)),
        },
        AttrType::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            other => Err(unsupported(other, AttrType::Object)),
        },
    }
}

/// String-normalized rendering: strings verbatim, null as empty, containers as compact JSON.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

pub fn to_bool(value: &Value) -> Result<bool, CoercionError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(invalid(value, AttrType::Bool)),
        },
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Ok(true),
            Some(f) if f == 0.0 => Ok(false),
            _ => Err(invalid(value, AttrType::Bool)),
        },
        other => Err(unsupported(other, AttrType::Bool)),
    }
}

pub fn to_i64(value: &Value) -> Result<i64, CoercionError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    Ok(f as i64)
                }
                _ => Err(invalid(value, AttrType::Int)),
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(i);
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
                _ => Err(invalid(value, AttrType::Int)),
            }
        }
        other => Err(unsupported(other, AttrType::Int)),
    }
}

pub fn to_f64(value: &Value) -> Result<f64, CoercionError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid(value, AttrType::Float)),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(f),
            _ => Err(invalid(value, AttrType::Float)),
        },
        other => Err(unsupported(other, AttrType::Float)),
    }
}

fn invalid(value: &Value, target: AttrType) -> CoercionError {
    CoercionError::InvalidValue {
        value: to_display_string(value),
        target,
    }
}

fn unsupported(value: &Value, target: AttrType) -> CoercionError {
    CoercionError::UnsupportedCoercion {
        found: kind_name(value),
        target,
    }
}
