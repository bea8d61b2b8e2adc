use crate::core::data::coerce::{coerce, CoercionError};
use crate::core::data::types::AttrType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named, typed value. Name and type are fixed at creation; the value always satisfies the type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    name: String,
    #[serde(rename = "type")]
    attr_type: AttrType,
    value: Value,
}

impl Attribute {
    pub fn new<N: Into<String>>(
        name: N,
        attr_type: AttrType,
        value: Value,
    ) -> Result<Self, CoercionError> {
        let value = coerce(&value, attr_type)?;
        Ok(Self {
            name: name.into(),
            attr_type,
            value,
        })
    }

    /// Attribute of type `any`; never fails.
    pub fn untyped<N: Into<String>>(name: N, value: Value) -> Self {
        Self {
            name: name.into(),
            attr_type: AttrType::Any,
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr_type(&self) -> AttrType {
        self.attr_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Replace the value, coercing it to the declared type.
    pub fn set_value(&mut self, value: Value) -> Result<(), CoercionError> {
        self.value = coerce(&value, self.attr_type)?;
        Ok(())
    }
}

/// Attribute declaration as it appears in action and activity metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrDecl {
    pub name: String,
    #[serde(rename = "type", default)]
    pub attr_type: AttrType,
    #[serde(default)]
    pub value: Value,
}

impl AttrDecl {
    pub fn new<N: Into<String>>(name: N, attr_type: AttrType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            value: Value::Null,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    /// Materialize the declaration with its default value.
    pub fn to_attribute(&self) -> Result<Attribute, CoercionError> {
        Attribute::new(self.name.clone(), self.attr_type, self.value.clone())
    }
}
