//! Tree-walking interpreter for parsed expressions

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::ExpressionError;
use super::functions::{QuantityParser, add_time, cpu_to_number, memory_to_number, parse_time};
use super::parser::{BinaryOp, Expr, UnaryOp};

/// Runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Time(DateTime<Utc>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Time(_) => "time",
        }
    }

    fn as_bool(&self) -> Result<bool, ExpressionError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(ExpressionError::Evaluation(format!(
                "expected bool, found {}",
                other.type_name()
            ))),
        }
    }

    fn as_str(&self) -> Result<&str, ExpressionError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(ExpressionError::Evaluation(format!(
                "expected string, found {}",
                other.type_name()
            ))),
        }
    }

    fn as_time(&self) -> Result<DateTime<Utc>, ExpressionError> {
        match self {
            Value::Time(t) => Ok(*t),
            other => Err(ExpressionError::Evaluation(format!(
                "expected time, found {}",
                other.type_name()
            ))),
        }
    }

    fn as_array(&self) -> Result<&[Value], ExpressionError> {
        match self {
            Value::Array(items) => Ok(items),
            // A missing collection behaves as an empty one
            Value::Nil => Ok(&[]),
            other => Err(ExpressionError::Evaluation(format!(
                "expected array, found {}",
                other.type_name()
            ))),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Value::Nil, Value::Number),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

/// Evaluation context: bound variables, helpers and the clock
pub struct Interpreter<'a> {
    variables: &'a BTreeMap<String, Value>,
    quantities: &'a QuantityParser,
    now: DateTime<Utc>,
}

impl std::fmt::Debug for Interpreter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("variables", &self.variables)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

impl<'a> Interpreter<'a> {
    pub fn new(
        variables: &'a BTreeMap<String, Value>,
        quantities: &'a QuantityParser,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            variables,
            quantities,
            now,
        }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, ExpressionError> {
        self.eval_in(expr, None)
    }

    fn eval_in(&self, expr: &Expr, current: Option<&Value>) -> Result<Value, ExpressionError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable(name) => self
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| ExpressionError::Evaluation(format!("unknown name {name:?}"))),
            Expr::Current => current
                .cloned()
                .ok_or_else(|| ExpressionError::Evaluation("'#' used outside of a closure".to_string())),
            Expr::Member(target, field) => match self.eval_in(target, current)? {
                Value::Map(map) => Ok(map.get(field).cloned().unwrap_or(Value::Nil)),
                Value::Nil => Ok(Value::Nil),
                other => Err(ExpressionError::Evaluation(format!(
                    "cannot read field {field:?} of {}",
                    other.type_name()
                ))),
            },
            Expr::Index(target, index) => {
                let target = self.eval_in(target, current)?;
                let index = self.eval_in(index, current)?;
                index_value(&target, &index)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval_in(operand, current)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.as_bool()?)),
                    UnaryOp::Negate => match value {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        other => Err(ExpressionError::Evaluation(format!("cannot negate {}", other.type_name()))),
                    },
                }
            }
            Expr::Binary(BinaryOp::And, left, right) => {
                if !self.eval_in(left, current)?.as_bool()? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval_in(right, current)?.as_bool()?))
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                if self.eval_in(left, current)?.as_bool()? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval_in(right, current)?.as_bool()?))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval_in(left, current)?;
                let right = self.eval_in(right, current)?;
                binary(*op, &left, &right)
            }
            Expr::Call(name, arguments) => self.call(name, arguments, current),
            Expr::Closure(_) => Err(ExpressionError::Evaluation(
                "closures are only valid as arguments".to_string(),
            )),
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval_in(item, current))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }

    fn call(&self, name: &str, arguments: &[Expr], current: Option<&Value>) -> Result<Value, ExpressionError> {
        if let Some(result) = self.call_predicate(name, arguments, current)? {
            return Ok(result);
        }

        let values = arguments
            .iter()
            .map(|argument| self.eval_in(argument, current))
            .collect::<Result<Vec<_>, _>>()?;
        let arity = |expected: usize| {
            if values.len() == expected {
                Ok(())
            } else {
                Err(ExpressionError::Evaluation(format!(
                    "{name} expects {expected} argument(s), got {}",
                    values.len()
                )))
            }
        };

        match name {
            "Now" => {
                arity(0)?;
                Ok(Value::Time(self.now))
            }
            "CpuToNumber" | "MemoryToNumber" => {
                arity(1)?;
                if let Value::Number(n) = values[0] {
                    return Ok(Value::Number(n));
                }
                let quantity = values[0].as_str()?;
                let number = if name == "CpuToNumber" {
                    cpu_to_number(self.quantities, quantity)?
                } else {
                    memory_to_number(self.quantities, quantity)?
                };
                Ok(Value::Number(number))
            }
            "ParseTime" => {
                arity(2)?;
                Ok(Value::Time(parse_time(values[0].as_str()?, values[1].as_str()?)?))
            }
            "AddTime" => {
                arity(2)?;
                Ok(Value::Time(add_time(values[0].as_time()?, values[1].as_str()?)?))
            }
            "AfterTime" => {
                arity(2)?;
                Ok(Value::Bool(values[0].as_time()? > values[1].as_time()?))
            }
            "len" => {
                arity(1)?;
                let length = match &values[0] {
                    Value::Array(items) => items.len(),
                    Value::Map(map) => map.len(),
                    Value::String(s) => s.chars().count(),
                    other => {
                        return Err(ExpressionError::Evaluation(format!(
                            "len of {} is undefined",
                            other.type_name()
                        )));
                    }
                };
                #[allow(clippy::cast_precision_loss, reason = "collection lengths are far below 2^52")]
                let length = length as f64;
                Ok(Value::Number(length))
            }
            _ => Err(ExpressionError::UnknownFunction(name.to_string())),
        }
    }

    /// Builtins taking a collection and a closure; `None` for other names
    fn call_predicate(
        &self,
        name: &str,
        arguments: &[Expr],
        current: Option<&Value>,
    ) -> Result<Option<Value>, ExpressionError> {
        if !matches!(name, "any" | "all" | "none" | "one" | "filter" | "map" | "count") {
            return Ok(None);
        }
        let [collection, Expr::Closure(body)] = arguments else {
            return Err(ExpressionError::Evaluation(format!(
                "{name} expects a collection and a {{ closure }}"
            )));
        };

        let collection = self.eval_in(collection, current)?;
        let items = collection.as_array()?;
        let test = |item: &Value| self.eval_in(body, Some(item))?.as_bool();

        let result = match name {
            "any" => Value::Bool(items.iter().map(test).collect::<Result<Vec<_>, _>>()?.contains(&true)),
            "all" => Value::Bool(!items.iter().map(test).collect::<Result<Vec<_>, _>>()?.contains(&false)),
            "none" => Value::Bool(!items.iter().map(test).collect::<Result<Vec<_>, _>>()?.contains(&true)),
            "one" => Value::Bool(count_matches(items, test)? == 1),
            #[allow(clippy::cast_precision_loss, reason = "collection lengths are far below 2^52")]
            "count" => Value::Number(count_matches(items, test)? as f64),
            "filter" => {
                let mut kept = Vec::new();
                for item in items {
                    if test(item)? {
                        kept.push(item.clone());
                    }
                }
                Value::Array(kept)
            }
            _ => Value::Array(
                items
                    .iter()
                    .map(|item| self.eval_in(body, Some(item)))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        Ok(Some(result))
    }
}

fn count_matches(
    items: &[Value],
    test: impl Fn(&Value) -> Result<bool, ExpressionError>,
) -> Result<usize, ExpressionError> {
    let mut count = 0;
    for item in items {
        if test(item)? {
            count += 1;
        }
    }
    Ok(count)
}

fn index_value(target: &Value, index: &Value) -> Result<Value, ExpressionError> {
    match (target, index) {
        (Value::Array(items), Value::Number(n)) => {
            #[allow(clippy::cast_possible_truncation, reason = "indexes are small integers")]
            let position = *n as i64;
            let length = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let position = if position < 0 { length + position } else { position };
            Ok(usize::try_from(position)
                .ok()
                .and_then(|p| items.get(p))
                .cloned()
                .unwrap_or(Value::Nil))
        }
        (Value::Map(map), Value::String(key)) => Ok(map.get(key).cloned().unwrap_or(Value::Nil)),
        (Value::Nil, _) => Ok(Value::Nil),
        (target, index) => Err(ExpressionError::Evaluation(format!(
            "cannot index {} with {}",
            target.type_name(),
            index.type_name()
        ))),
    }
}

fn compare(left: &Value, right: &Value) -> Result<Ordering, ExpressionError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ordering.ok_or_else(|| {
        ExpressionError::Evaluation(format!(
            "cannot compare {} with {}",
            left.type_name(),
            right.type_name()
        ))
    })
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    let result = match op {
        BinaryOp::Equal => Value::Bool(left == right),
        BinaryOp::NotEqual => Value::Bool(left != right),
        BinaryOp::Less => Value::Bool(compare(left, right)?.is_lt()),
        BinaryOp::LessOrEqual => Value::Bool(compare(left, right)?.is_le()),
        BinaryOp::Greater => Value::Bool(compare(left, right)?.is_gt()),
        BinaryOp::GreaterOrEqual => Value::Bool(compare(left, right)?.is_ge()),
        BinaryOp::In => match right {
            Value::Array(items) => Value::Bool(items.contains(left)),
            Value::Map(map) => Value::Bool(map.contains_key(left.as_str()?)),
            other => {
                return Err(ExpressionError::Evaluation(format!(
                    "'in' needs an array or map, found {}",
                    other.type_name()
                )));
            }
        },
        BinaryOp::Contains => Value::Bool(left.as_str()?.contains(right.as_str()?)),
        BinaryOp::StartsWith => Value::Bool(left.as_str()?.starts_with(right.as_str()?)),
        BinaryOp::EndsWith => Value::Bool(left.as_str()?.ends_with(right.as_str()?)),
        BinaryOp::Matches => {
            let pattern = Regex::new(right.as_str()?).map_err(|e| ExpressionError::Evaluation(e.to_string()))?;
            Value::Bool(pattern.is_match(left.as_str()?))
        }
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::String(a), Value::String(b)) => Value::String(format!("{a}{b}")),
            _ => return Err(arithmetic_error("+", left, right)),
        },
        BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => {
            let (Value::Number(a), Value::Number(b)) = (left, right) else {
                return Err(arithmetic_error(&format!("{op:?}"), left, right));
            };
            match op {
                BinaryOp::Subtract => Value::Number(a - b),
                BinaryOp::Multiply => Value::Number(a * b),
                _ if *b == 0.0 => return Err(ExpressionError::Evaluation("division by zero".to_string())),
                BinaryOp::Divide => Value::Number(a / b),
                _ => Value::Number(a % b),
            }
        }
        BinaryOp::And => Value::Bool(left.as_bool()? && right.as_bool()?),
        BinaryOp::Or => Value::Bool(left.as_bool()? || right.as_bool()?),
    };
    Ok(result)
}

fn arithmetic_error(op: &str, left: &Value, right: &Value) -> ExpressionError {
    ExpressionError::Evaluation(format!(
        "cannot apply {op} to {} and {}",
        left.type_name(),
        right.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parser::parse;
    use chrono::TimeZone;
    use serde_json::json;

    fn run(source: &str, variables: &[(&str, serde_json::Value)]) -> Result<Value, ExpressionError> {
        let variables: BTreeMap<String, Value> = variables
            .iter()
            .map(|(name, value)| ((*name).to_string(), Value::from(value.clone())))
            .collect();
        let quantities = QuantityParser::new().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        Interpreter::new(&variables, &quantities, now).eval(&parse(source)?)
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        assert_eq!(run("1 + 2 * 3 == 7", &[]).unwrap(), Value::Bool(true));
        assert_eq!(run("var0 + var1 == 80", &[("var0", json!(3)), ("var1", json!(80))]).unwrap(), Value::Bool(false));
        assert_eq!(run("'a' + 'b'", &[]).unwrap(), Value::String("ab".to_string()));
        assert_eq!(run("-var0 < 0", &[("var0", json!(2))]).unwrap(), Value::Bool(true));
        assert!(run("var0 + 1", &[("var0", json!(null))]).is_err());
        assert!(run("1 / 0", &[]).is_err());
    }

    #[test]
    fn test_short_circuit() {
        // The right side would fail to evaluate
        assert_eq!(run("false && (1 < 'a')", &[]).unwrap(), Value::Bool(false));
        assert_eq!(run("true || (1 < 'a')", &[]).unwrap(), Value::Bool(true));
        assert!(run("1 && true", &[]).is_err());
    }

    #[test]
    fn test_predicates() {
        let requests = json!([{"memory": "64Mi"}, {"memory": "68Mi"}]);
        let vars = [("var0", requests)];
        assert_eq!(
            run("any(var0, { MemoryToNumber(.memory) > MemoryToNumber('68M') })", &vars).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            run("all(var0, { MemoryToNumber(#.memory) >= MemoryToNumber('64Mi') })", &vars).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(run("none(var0, { .memory == '1Gi' })", &vars).unwrap(), Value::Bool(true));
        assert_eq!(run("count(var0, { .memory endsWith 'Mi' })", &vars).unwrap(), Value::Number(2.0));
        assert_eq!(run("len(filter(var0, { .memory == '64Mi' }))", &vars).unwrap(), Value::Number(1.0));
        assert_eq!(
            run("map(var0, { .memory })", &vars).unwrap(),
            Value::Array(vec![Value::String("64Mi".to_string()), Value::String("68Mi".to_string())])
        );
        assert!(run("any(var0, .memory)", &vars).is_err());
    }

    #[test]
    fn test_strings_and_membership() {
        let vars = [("var0", json!("nginx:1.14.2"))];
        assert_eq!(run("var0 startsWith 'nginx'", &vars).unwrap(), Value::Bool(true));
        assert_eq!(run("var0 contains ':1.14'", &vars).unwrap(), Value::Bool(true));
        assert_eq!(run("var0 matches '^nginx:[0-9.]+$'", &vars).unwrap(), Value::Bool(true));
        assert_eq!(run("'b' in ['a', 'b']", &[]).unwrap(), Value::Bool(true));
        assert_eq!(run("not ('c' in ['a', 'b'])", &[]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_time_helpers() {
        let vars = [("var0", json!("2021-09-09T07:56:32Z"))];
        let layout = "'2006-01-02T15:04:05Z'";
        let later = format!("AfterTime(AddTime(ParseTime(var0, {layout}), '20d'), AddTime(ParseTime(var0, {layout}), '19d'))");
        assert_eq!(run(&later, &vars).unwrap(), Value::Bool(true));
        let earlier = format!("AfterTime(AddTime(ParseTime(var0, {layout}), '-1d'), ParseTime(var0, {layout}))");
        assert_eq!(run(&earlier, &vars).unwrap(), Value::Bool(false));
        assert_eq!(run("AfterTime(AddTime(Now(), '-1d'), Now())", &[]).unwrap(), Value::Bool(false));
        assert_eq!(run("Now() > ParseTime(var0, '2006-01-02T15:04:05Z')", &vars).unwrap(), Value::Bool(true));
        assert!(run("AfterTime(var0, Now())", &vars).is_err());
    }

    #[test]
    fn test_unknown_names() {
        assert!(matches!(run("Sleep(1)", &[]), Err(ExpressionError::UnknownFunction(_))));
        assert!(run("var9 == 1", &[]).is_err());
    }
}
