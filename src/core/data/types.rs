use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrType {
    String,
    #[serde(alias = "integer")]
    Int,
    #[serde(alias = "number", alias = "double")]
    Float,
    #[serde(alias = "boolean")]
    Bool,
    #[serde(alias = "params", alias = "map")]
    Object,
    Array,
    #[default]
    Any,
}

impl AttrType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttrType::String => "string",
            AttrType::Int => "int",
            AttrType::Float => "float",
            AttrType::Bool => "bool",
            AttrType::Object => "object",
            AttrType::Array => "array",
            AttrType::Any => "any",
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttrType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "string" => Ok(AttrType::String),
            "int" | "integer" => Ok(AttrType::Int),
            "float" | "number" | "double" => Ok(AttrType::Float),
            "bool" | "boolean" => Ok(AttrType::Bool),
            "object" | "params" | "map" => Ok(AttrType::Object),
            "array" => Ok(AttrType::Array),
            "any" => Ok(AttrType::Any),
            other => Err(format!("unknown attribute type '{}'", other)),
        }
    }
}
