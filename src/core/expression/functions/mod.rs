//! Builtin function categories and the argument helpers they share.

pub mod array;
pub mod number;
pub mod string;

use crate::core::data::coerce::{kind_name, to_display_string, to_f64, to_i64};
use crate::core::error::AppError;
use crate::core::expression::function::FunctionRegistryBuilder;
use crate::core::types::ErrorCategory;
use serde_json::{Number, Value};

pub fn register_builtins(builder: &mut FunctionRegistryBuilder) {
    string::register(builder);
    number::register(builder);
    array::register(builder);
}

pub(crate) fn invalid_argument(function: &str, message: impl AsRef<str>) -> AppError {
    let mut error = AppError::new(
        ErrorCategory::InvalidArgument,
        format!("{}: {}", function, message.as_ref()),
    );
    error.add_context("function", function);
    error
}

pub(crate) fn arity(function: &str, args: &[Value], min: usize, max: usize) -> Result<(), AppError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{}..={}", min, max)
        };
        return Err(invalid_argument(
            function,
            format!("expected {} arguments, got {}", expected, args.len()),
        ));
    }
    Ok(())
}

pub(crate) fn string_arg(args: &[Value], index: usize) -> String {
    args.get(index).map(to_display_string).unwrap_or_default()
}

pub(crate) fn int_arg(function: &str, args: &[Value], index: usize) -> Result<i64, AppError> {
    let value = args.get(index).unwrap_or(&Value::Null);
    to_i64(value).map_err(|err| invalid_argument(function, format!("argument {}: {}", index + 1, err)))
}

pub(crate) fn float_arg(function: &str, args: &[Value], index: usize) -> Result<f64, AppError> {
    let value = args.get(index).unwrap_or(&Value::Null);
    to_f64(value).map_err(|err| invalid_argument(function, format!("argument {}: {}", index + 1, err)))
}

pub(crate) fn array_arg<'a>(
    function: &str,
    args: &'a [Value],
    index: usize,
) -> Result<&'a Vec<Value>, AppError> {
    match args.get(index) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(invalid_argument(
            function,
            format!("argument {} must be an array, got {}", index + 1, kind_name(other)),
        )),
        None => Err(invalid_argument(
            function,
            format!("missing argument {}", index + 1),
        )),
    }
}

/// Turn an f64 result back into a JSON number, preferring integers when exact.
pub(crate) fn number_value(function: &str, f: f64) -> Result<Value, AppError> {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        return Ok(Value::from(f as i64));
    }
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| invalid_argument(function, "result is not a finite number"))
}
