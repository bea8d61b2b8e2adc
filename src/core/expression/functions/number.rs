use super::{arity, float_arg, int_arg, invalid_argument, number_value};
use crate::core::data::coerce::to_f64;
use crate::core::error::AppError;
use crate::core::expression::function::FunctionRegistryBuilder;
use serde_json::{Number, Value};

const CATEGORY: &str = "number";

pub fn register(builder: &mut FunctionRegistryBuilder) {
    builder
        .define("int", CATEGORY, |args| {
            arity("number.int", args, 1, 1)?;
            // Truncates floats instead of rejecting them like attribute coercion does.
            match int_arg("number.int", args, 0) {
                Ok(i) => Ok(Value::from(i)),
                Err(_) => {
                    let f = float_arg("number.int", args, 0)?;
                    Ok(Value::from(f.trunc() as i64))
                }
            }
        })
        .define("float", CATEGORY, |args| {
            arity("number.float", args, 1, 1)?;
            let f = float_arg("number.float", args, 0)?;
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| invalid_argument("number.float", "not a finite number"))
        })
        .define("abs", CATEGORY, |args| {
            arity("number.abs", args, 1, 1)?;
            if let Some(i) = args[0].as_i64() {
                return i
                    .checked_abs()
                    .map(Value::from)
                    .ok_or_else(|| invalid_argument("number.abs", "integer overflow"));
            }
            number_value("number.abs", float_arg("number.abs", args, 0)?.abs())
        })
        .define("round", CATEGORY, |args| {
            arity("number.round", args, 1, 2)?;
            let value = float_arg("number.round", args, 0)?;
            if args.len() == 1 {
                return number_value("number.round", value.round());
            }
            let places = int_arg("number.round", args, 1)?.clamp(0, 15) as i32;
            let factor = 10f64.powi(places);
            number_value("number.round", (value * factor).round() / factor)
        })
        .define("floor", CATEGORY, |args| {
            arity("number.floor", args, 1, 1)?;
            number_value("number.floor", float_arg("number.floor", args, 0)?.floor())
        })
        .define("ceil", CATEGORY, |args| {
            arity("number.ceil", args, 1, 1)?;
            number_value("number.ceil", float_arg("number.ceil", args, 0)?.ceil())
        })
        .define("max", CATEGORY, |args| extreme("number.max", args, |a, b| a > b))
        .define("min", CATEGORY, |args| extreme("number.min", args, |a, b| a < b));
}

fn extreme(function: &str, args: &[Value], better: fn(f64, f64) -> bool) -> Result<Value, AppError> {
    if args.is_empty() {
        return Err(invalid_argument(function, "expected at least one argument"));
    }
    let mut best = &args[0];
    let mut best_value = to_f64(best).map_err(|err| invalid_argument(function, err.to_string()))?;
    for candidate in &args[1..] {
        let value = to_f64(candidate).map_err(|err| invalid_argument(function, err.to_string()))?;
        if better(value, best_value) {
            best = candidate;
            best_value = value;
        }
    }
    match best {
        Value::Number(_) => Ok(best.clone()),
        _ => number_value(function, best_value),
    }
}
