use super::{array_arg, arity, int_arg, invalid_argument, number_value, string_arg};
use crate::core::data::coerce::{to_display_string, to_f64};
use crate::core::expression::function::FunctionRegistryBuilder;
use serde_json::Value;

const CATEGORY: &str = "array";

pub fn register(builder: &mut FunctionRegistryBuilder) {
    builder
        .define("count", CATEGORY, |args| {
            arity("array.count", args, 1, 1)?;
            match &args[0] {
                Value::Null => Ok(Value::from(0)),
                Value::Object(map) => Ok(Value::from(map.len())),
                _ => Ok(Value::from(array_arg("array.count", args, 0)?.len())),
            }
        })
        .define("get", CATEGORY, |args| {
            arity("array.get", args, 2, 2)?;
            let items = array_arg("array.get", args, 0)?;
            let index = int_arg("array.get", args, 1)?;
            Ok(usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(Value::Null))
        })
        .define("contains", CATEGORY, |args| {
            arity("array.contains", args, 2, 2)?;
            let items = array_arg("array.contains", args, 0)?;
            let needle = to_display_string(&args[1]);
            Ok(Value::Bool(
                items.iter().any(|item| to_display_string(item) == needle),
            ))
        })
        .define("append", CATEGORY, |args| {
            arity("array.append", args, 2, 2)?;
            let mut items = match &args[0] {
                Value::Null => Vec::new(),
                _ => array_arg("array.append", args, 0)?.clone(),
            };
            items.push(args[1].clone());
            Ok(Value::Array(items))
        })
        .define("slice", CATEGORY, |args| {
            arity("array.slice", args, 2, 3)?;
            let items = array_arg("array.slice", args, 0)?;
            let start = int_arg("array.slice", args, 1)?.max(0) as usize;
            let end = if args.len() == 3 {
                int_arg("array.slice", args, 2)?.max(0) as usize
            } else {
                items.len()
            };
            let end = end.min(items.len());
            let start = start.min(end);
            Ok(Value::Array(items[start..end].to_vec()))
        })
        .define("join", CATEGORY, |args| {
            arity("array.join", args, 1, 2)?;
            let items = array_arg("array.join", args, 0)?;
            let separator = if args.len() == 2 {
                string_arg(args, 1)
            } else {
                ",".to_string()
            };
            Ok(Value::String(
                items
                    .iter()
                    .map(to_display_string)
                    .collect::<Vec<_>>()
                    .join(&separator),
            ))
        })
        .define("sum", CATEGORY, |args| {
            arity("array.sum", args, 1, 1)?;
            let items = array_arg("array.sum", args, 0)?;
            if items.iter().all(|item| item.as_i64().is_some()) {
                let total = items
                    .iter()
                    .filter_map(Value::as_i64)
                    .try_fold(0i64, |acc, i| acc.checked_add(i))
                    .ok_or_else(|| invalid_argument("array.sum", "integer overflow"))?;
                return Ok(Value::from(total));
            }
            let mut total = 0.0;
            for item in items {
                total += to_f64(item)
                    .map_err(|err| invalid_argument("array.sum", err.to_string()))?;
            }
            number_value("array.sum", total)
        })
        .define("create", CATEGORY, |args| Ok(Value::Array(args.to_vec())));
}
