use super::{arity, int_arg, invalid_argument, string_arg};
use crate::core::expression::function::FunctionRegistryBuilder;
use regex::Regex;
use serde_json::Value;

const CATEGORY: &str = "string";

pub fn register(builder: &mut FunctionRegistryBuilder) {
    builder
        .define("concat", CATEGORY, |args| {
            Ok(Value::String(
                (0..args.len()).map(|i| string_arg(args, i)).collect(),
            ))
        })
        .define("length", CATEGORY, |args| {
            arity("string.length", args, 1, 1)?;
            Ok(Value::from(string_arg(args, 0).chars().count()))
        })
        .define("substring", CATEGORY, substring)
        .define("contains", CATEGORY, |args| {
            arity("string.contains", args, 2, 2)?;
            Ok(Value::Bool(string_arg(args, 0).contains(&string_arg(args, 1))))
        })
        .define("startsWith", CATEGORY, |args| {
            arity("string.startsWith", args, 2, 2)?;
            Ok(Value::Bool(string_arg(args, 0).starts_with(&string_arg(args, 1))))
        })
        .define("endsWith", CATEGORY, |args| {
            arity("string.endsWith", args, 2, 2)?;
            Ok(Value::Bool(string_arg(args, 0).ends_with(&string_arg(args, 1))))
        })
        .define("lower", CATEGORY, |args| {
            arity("string.lower", args, 1, 1)?;
            Ok(Value::String(string_arg(args, 0).to_lowercase()))
        })
        .define("upper", CATEGORY, |args| {
            arity("string.upper", args, 1, 1)?;
            Ok(Value::String(string_arg(args, 0).to_uppercase()))
        })
        .define("trim", CATEGORY, |args| {
            arity("string.trim", args, 1, 1)?;
            Ok(Value::String(string_arg(args, 0).trim().to_string()))
        })
        .define("split", CATEGORY, |args| {
            arity("string.split", args, 2, 2)?;
            let text = string_arg(args, 0);
            let separator = string_arg(args, 1);
            if separator.is_empty() {
                return Ok(Value::Array(
                    text.chars().map(|c| Value::String(c.to_string())).collect(),
                ));
            }
            Ok(Value::Array(
                text.split(separator.as_str())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            ))
        })
        .define("replace", CATEGORY, |args| {
            arity("string.replace", args, 3, 3)?;
            let from = string_arg(args, 1);
            if from.is_empty() {
                return Err(invalid_argument("string.replace", "pattern must not be empty"));
            }
            Ok(Value::String(
                string_arg(args, 0).replace(from.as_str(), &string_arg(args, 2)),
            ))
        })
        .define("indexOf", CATEGORY, |args| {
            arity("string.indexOf", args, 2, 2)?;
            let text = string_arg(args, 0);
            let index = text
                .find(string_arg(args, 1).as_str())
                .map(|byte| text[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Ok(Value::from(index))
        })
        .define("matches", CATEGORY, |args| {
            arity("string.matches", args, 2, 2)?;
            let pattern = Regex::new(&string_arg(args, 1)).map_err(|err| {
                invalid_argument("string.matches", format!("invalid pattern: {}", err))
            })?;
            Ok(Value::Bool(pattern.is_match(&string_arg(args, 0))))
        });
}

/// `substring(text, start[, length])` over characters; out-of-range bounds are clamped.
fn substring(args: &[Value]) -> Result<Value, crate::core::error::AppError> {
    arity("string.substring", args, 2, 3)?;
    let text: Vec<char> = string_arg(args, 0).chars().collect();
    let start = int_arg("string.substring", args, 1)?;
    if start < 0 {
        return Err(invalid_argument(
            "string.substring",
            "start must not be negative",
        ));
    }
    let start = (start as usize).min(text.len());
    let end = if args.len() == 3 {
        let length = int_arg("string.substring", args, 2)?;
        if length < 0 {
            return Err(invalid_argument(
                "string.substring",
                "length must not be negative",
            ));
        }
        start.saturating_add(length as usize).min(text.len())
    } else {
        text.len()
    };
    Ok(Value::String(text[start..end].iter().collect()))
}
