//! Tree-walking evaluator over JSON values.

use crate::core::data::coerce::{kind_name, to_bool, to_display_string};
use crate::core::data::{FieldPath, Scope};
use crate::core::error::AppError;
use crate::core::expression::ast::{BinaryOp, Expr, UnaryOp};
use crate::core::expression::function::FunctionRegistry;
use crate::core::types::ErrorCategory;
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// Maps a field reference to a value. `Ok(None)` means the field is absent and evaluates to
/// `null`; errors abort the evaluation.
pub trait Resolver: Send + Sync {
    fn resolve(&self, path: &FieldPath, scope: &Scope) -> Result<Option<Value>, AppError>;
}

/// Resolves every field against the passed scope, ignoring `trigger.content`, `trigger` and
/// `flow` prefixes so expressions written for a flow also work against a bare scope.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScopeResolver;

impl Resolver for ScopeResolver {
    fn resolve(&self, path: &FieldPath, scope: &Scope) -> Result<Option<Value>, AppError> {
        let segments = path
            .strip_keys(&["trigger", "content"])
            .or_else(|| path.strip_keys(&["trigger"]))
            .or_else(|| path.strip_keys(&["flow"]))
            .unwrap_or(path.segments());
        if segments.is_empty() {
            return Ok(Some(Value::Object(scope.to_payload())));
        }
        scope.resolve_path(segments)
    }
}

pub fn evaluate(
    expr: &Expr,
    resolver: &dyn Resolver,
    scope: &Scope,
    functions: &FunctionRegistry,
) -> Result<Value, AppError> {
    Evaluator {
        resolver,
        scope,
        functions,
    }
    .eval(expr)
}

/// Truthiness used by `!`, `&&`, `||`, ternaries and guards. `null` is false.
pub fn truthy(value: &Value) -> Result<bool, AppError> {
    if value.is_null() {
        return Ok(false);
    }
    to_bool(value).map_err(|_| {
        eval_error(format!(
            "cannot use {} value '{}' as a boolean",
            kind_name(value),
            to_display_string(value)
        ))
    })
}

struct Evaluator<'a> {
    resolver: &'a dyn Resolver,
    scope: &'a Scope,
    functions: &'a FunctionRegistry,
}

impl<'a> Evaluator<'a> {
    fn eval(&self, expr: &Expr) -> Result<Value, AppError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Field(path) => Ok(self
                .resolver
                .resolve(path, self.scope)?
                .unwrap_or(Value::Null)),
            Expr::Call { name, args } => {
                let function = self.functions.get(name).ok_or_else(|| {
                    AppError::new(
                        ErrorCategory::UnknownFunction,
                        format!("unknown function '{}'", name),
                    )
                })?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                function.call(&values)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value)?)),
                    UnaryOp::Neg => negate(&value),
                }
            }
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs),
            Expr::Ternary {
                cond,
                if_true,
                if_false,
            } => {
                if truthy(&self.eval(cond)?)? {
                    self.eval(if_true)
                } else {
                    self.eval(if_false)
                }
            }
        }
    }

    fn binary(&self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value, AppError> {
        match op {
            BinaryOp::And => {
                if !truthy(&self.eval(lhs)?)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&self.eval(rhs)?)?))
            }
            BinaryOp::Or => {
                if truthy(&self.eval(lhs)?)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&self.eval(rhs)?)?))
            }
            _ => {
                let left = self.eval(lhs)?;
                let right = self.eval(rhs)?;
                apply_binary(op, &left, &right)
            }
        }
    }
}

fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, AppError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(equals(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!equals(left, right))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let Some(ordering) = compare(left, right) else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::LtEq => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::Add if left.is_string() || right.is_string() => Ok(Value::String(format!(
            "{}{}",
            to_display_string(left),
            to_display_string(right)
        ))),
        _ => arithmetic(op, left, right),
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Num::Int)
            .or_else(|| n.as_f64().map(Num::Float)),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Some(Num::Int(i));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Num::Float)
        }
        _ => None,
    }
}

/// Numeric when both sides read as numbers, otherwise by display string, where `null`
/// reads as `""`.
fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => left == right,
        _ => match (as_num(left), as_num(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
            (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
            _ => to_display_string(left) == to_display_string(right),
        },
    }
}

/// `None` when either side is null, which makes every ordering comparison false.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if left.is_null() || right.is_null() {
        return None;
    }
    match (as_num(left), as_num(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => Some(a.cmp(&b)),
        (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        _ => Some(to_display_string(left).cmp(&to_display_string(right))),
    }
}

fn negate(value: &Value) -> Result<Value, AppError> {
    match as_num(value) {
        Some(Num::Int(i)) => i
            .checked_neg()
            .map(Value::from)
            .ok_or_else(|| eval_error("integer overflow in negation")),
        Some(Num::Float(f)) => float_value(-f),
        None => Err(eval_error(format!(
            "cannot negate {} value",
            kind_name(value)
        ))),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, AppError> {
    let (Some(a), Some(b)) = (as_num(left), as_num(right)) else {
        return Err(eval_error(format!(
            "operator '{}' requires numeric operands, got {} and {}",
            op,
            kind_name(left),
            kind_name(right)
        )));
    };
    if let (Num::Int(a), Num::Int(b)) = (a, b) {
        return int_arithmetic(op, a, b);
    }
    let (a, b) = (a.as_f64(), b.as_f64());
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(division_by_zero()),
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => return Err(eval_error(format!("operator '{}' is not arithmetic", op))),
    };
    float_value(result)
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Result<Value, AppError> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err(division_by_zero()),
        BinaryOp::Div if a.checked_rem(b).is_some_and(|r| r != 0) => return float_value(a as f64 / b as f64),
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Rem => a.checked_rem(b),
        _ => return Err(eval_error(format!("operator '{}' is not arithmetic", op))),
    };
    result
        .map(Value::from)
        .ok_or_else(|| eval_error(format!("integer overflow in '{}'", op)))
}

fn float_value(f: f64) -> Result<Value, AppError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| eval_error("arithmetic produced a non-finite number"))
}

fn division_by_zero() -> AppError {
    eval_error("division by zero").with_code("EXPR-EVAL-002")
}

fn eval_error(message: impl Into<String>) -> AppError {
    AppError::new(ErrorCategory::EvalError, message)
}
