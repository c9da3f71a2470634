//! Built-in functions callable from predicates.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::ast::Ast;
use super::eval::{evaluate, json_eq, number};
use super::PredicateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Avg,
    Ceil,
    Contains,
    EndsWith,
    Floor,
    Join,
    Keys,
    Length,
    Map,
    Max,
    MaxBy,
    Merge,
    Min,
    MinBy,
    NotNull,
    Reverse,
    Sort,
    SortBy,
    StartsWith,
    Sum,
    ToArray,
    ToNumber,
    ToString,
    Type,
    Values,
}

const TABLE: &[(&str, Function, usize)] = &[
    ("abs", Function::Abs, 1),
    ("avg", Function::Avg, 1),
    ("ceil", Function::Ceil, 1),
    ("contains", Function::Contains, 2),
    ("ends_with", Function::EndsWith, 2),
    ("floor", Function::Floor, 1),
    ("join", Function::Join, 2),
    ("keys", Function::Keys, 1),
    ("length", Function::Length, 1),
    ("map", Function::Map, 2),
    ("max", Function::Max, 1),
    ("max_by", Function::MaxBy, 2),
    ("merge", Function::Merge, 1),
    ("min", Function::Min, 1),
    ("min_by", Function::MinBy, 2),
    ("not_null", Function::NotNull, 1),
    ("reverse", Function::Reverse, 1),
    ("sort", Function::Sort, 1),
    ("sort_by", Function::SortBy, 2),
    ("starts_with", Function::StartsWith, 2),
    ("sum", Function::Sum, 1),
    ("to_array", Function::ToArray, 1),
    ("to_number", Function::ToNumber, 1),
    ("to_string", Function::ToString, 1),
    ("type", Function::Type, 1),
    ("values", Function::Values, 1),
];

type CallResult = Result<Value, PredicateError>;

impl Function {
    pub fn lookup(name: &str) -> Option<Function> {
        TABLE.iter().find(|(n, _, _)| *n == name).map(|(_, f, _)| *f)
    }

    pub fn name(self) -> &'static str {
        TABLE
            .iter()
            .find(|(_, f, _)| *f == self)
            .map(|(n, _, _)| *n)
            .unwrap_or("?")
    }

    pub fn check_arity(self, got: usize) -> Result<(), String> {
        let want = TABLE.iter().find(|(_, f, _)| *f == self).map(|(_, _, a)| *a).unwrap_or(0);
        let ok = match self {
            Function::NotNull | Function::Merge => got >= want,
            _ => got == want,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("{}() takes {} argument(s), got {}", self.name(), want, got))
        }
    }

    /// Argument slot that must hold an `&expr`, for the higher-order functions.
    pub fn expref_position(self) -> Option<usize> {
        match self {
            Function::Map => Some(0),
            Function::SortBy | Function::MaxBy | Function::MinBy => Some(1),
            _ => None,
        }
    }

    /// Apply a higher-order function: `key` is evaluated against every element of `subject`.
    pub fn call_by(self, key: &Ast, subject: &Value) -> CallResult {
        let items = self.expect_array(subject)?;
        let keys = items
            .iter()
            .map(|item| evaluate(key, item))
            .collect::<Result<Vec<_>, _>>()?;
        match self {
            Function::Map => Ok(Value::Array(keys)),
            Function::SortBy => {
                self.comparable(&keys)?;
                let mut pairs: Vec<(&Value, &Value)> = keys.iter().zip(items).collect();
                pairs.sort_by(|a, b| order(a.0, b.0));
                Ok(Value::Array(pairs.into_iter().map(|(_, v)| v.clone()).collect()))
            }
            Function::MaxBy | Function::MinBy => {
                self.comparable(&keys)?;
                let want = if self == Function::MaxBy { Ordering::Greater } else { Ordering::Less };
                let best = keys
                    .iter()
                    .zip(items)
                    .reduce(|best, next| if order(next.0, best.0) == want { next } else { best });
                Ok(best.map(|(_, v)| v.clone()).unwrap_or(Value::Null))
            }
            _ => Err(PredicateError::Evaluation(format!(
                "{}() does not take an expression reference",
                self.name()
            ))),
        }
    }

    pub fn call(self, args: Vec<Value>) -> CallResult {
        let mut args = args.into_iter();
        match self {
            Function::Abs => {
                let n = self.expect_number(&take(&mut args))?;
                Ok(number(n.abs()))
            }
            Function::Avg => {
                let nums = self.numbers(&take(&mut args))?;
                if nums.is_empty() {
                    return Ok(Value::Null);
                }
                Ok(number(nums.iter().sum::<f64>() / nums.len() as f64))
            }
            Function::Contains => {
                let (subject, needle) = (take(&mut args), take(&mut args));
                match subject {
                    Value::Array(items) => Ok(Value::Bool(items.iter().any(|v| json_eq(v, &needle)))),
                    Value::String(s) => match needle {
                        Value::String(n) => Ok(Value::Bool(s.contains(n.as_str()))),
                        _ => Ok(Value::Bool(false)),
                    },
                    other => Err(self.type_error("array or string", &other)),
                }
            }
            Function::EndsWith => {
                let (s, suffix) = (take(&mut args), take(&mut args));
                Ok(Value::Bool(self.expect_str(&s)?.ends_with(self.expect_str(&suffix)?)))
            }
            Function::StartsWith => {
                let (s, prefix) = (take(&mut args), take(&mut args));
                Ok(Value::Bool(self.expect_str(&s)?.starts_with(self.expect_str(&prefix)?)))
            }
            Function::Join => {
                let (glue, items) = (take(&mut args), take(&mut args));
                let glue = self.expect_str(&glue)?;
                let parts = self
                    .expect_array(&items)?
                    .iter()
                    .map(|v| self.expect_str(v))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::String(parts.join(glue)))
            }
            Function::Keys => {
                let arg = take(&mut args);
                let obj = self.expect_object(&arg)?;
                Ok(Value::Array(obj.keys().cloned().map(Value::String).collect()))
            }
            Function::Values => {
                let arg = take(&mut args);
                let obj = self.expect_object(&arg)?;
                Ok(Value::Array(obj.values().cloned().collect()))
            }
            Function::Ceil => {
                let n = self.expect_number(&take(&mut args))?;
                Ok(number(n.ceil()))
            }
            Function::Floor => {
                let n = self.expect_number(&take(&mut args))?;
                Ok(number(n.floor()))
            }
            Function::Merge => {
                let mut merged = Map::new();
                for arg in args {
                    match arg {
                        Value::Object(obj) => merged.extend(obj),
                        other => return Err(self.type_error("object", &other)),
                    }
                }
                Ok(Value::Object(merged))
            }
            Function::Sort => {
                let arg = take(&mut args);
                let mut items = self.expect_array(&arg)?.clone();
                self.comparable(&items)?;
                items.sort_by(order);
                Ok(Value::Array(items))
            }
            Function::Map | Function::SortBy | Function::MaxBy | Function::MinBy => Err(PredicateError::Evaluation(
                format!("{}() needs an expression reference", self.name()),
            )),
            Function::Length => match take(&mut args) {
                Value::String(s) => Ok(Value::from(s.chars().count())),
                Value::Array(a) => Ok(Value::from(a.len())),
                Value::Object(o) => Ok(Value::from(o.len())),
                other => Err(self.type_error("string, array or object", &other)),
            },
            Function::Max | Function::Min => self.extremum(&take(&mut args)),
            Function::NotNull => Ok(args.find(|v| !v.is_null()).unwrap_or(Value::Null)),
            Function::Reverse => match take(&mut args) {
                Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
                Value::Array(mut a) => {
                    a.reverse();
                    Ok(Value::Array(a))
                }
                other => Err(self.type_error("string or array", &other)),
            },
            Function::Sum => {
                let nums = self.numbers(&take(&mut args))?;
                Ok(number(nums.iter().sum()))
            }
            Function::ToArray => match take(&mut args) {
                Value::Array(a) => Ok(Value::Array(a)),
                other => Ok(Value::Array(vec![other])),
            },
            Function::ToNumber => match take(&mut args) {
                v @ Value::Number(_) => Ok(v),
                Value::String(s) => Ok(s.trim().parse::<f64>().ok().filter(|n| n.is_finite()).map(number).unwrap_or(Value::Null)),
                _ => Ok(Value::Null),
            },
            Function::ToString => match take(&mut args) {
                v @ Value::String(_) => Ok(v),
                other => Ok(Value::String(other.to_string())),
            },
            Function::Type => Ok(Value::String(
                match take(&mut args) {
                    Value::Null => "null",
                    Value::Bool(_) => "boolean",
                    Value::Number(_) => "number",
                    Value::String(_) => "string",
                    Value::Array(_) => "array",
                    Value::Object(_) => "object",
                }
                .to_string(),
            )),
        }
    }

    fn extremum(self, v: &Value) -> CallResult {
        let items = self.expect_array(v)?;
        if items.is_empty() {
            return Ok(Value::Null);
        }
        let want_max = self == Function::Max;
        if items.iter().all(Value::is_number) {
            let best = items
                .iter()
                .filter_map(Value::as_f64)
                .reduce(|a, b| if (b > a) == want_max { b } else { a });
            return Ok(best.map(number).unwrap_or(Value::Null));
        }
        if items.iter().all(Value::is_string) {
            let best = items
                .iter()
                .filter_map(Value::as_str)
                .reduce(|a, b| if (b > a) == want_max { b } else { a });
            return Ok(best.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null));
        }
        Err(self.type_error("array of numbers or array of strings", v))
    }

    /// All numbers or all strings; the empty slice qualifies.
    fn comparable(self, values: &[Value]) -> Result<(), PredicateError> {
        let numbers = values.first().is_some_and(Value::is_number);
        let stray = values
            .iter()
            .find(|v| if numbers { !v.is_number() } else { !v.is_string() });
        match stray {
            Some(v) => Err(self.type_error(if numbers { "number" } else { "string" }, v)),
            None => Ok(()),
        }
    }

    fn numbers(self, v: &Value) -> Result<Vec<f64>, PredicateError> {
        self.expect_array(v)?.iter().map(|n| self.expect_number(n)).collect()
    }

    fn expect_number(self, v: &Value) -> Result<f64, PredicateError> {
        v.as_f64().ok_or_else(|| self.type_error("number", v))
    }

    fn expect_str<'v>(self, v: &'v Value) -> Result<&'v str, PredicateError> {
        v.as_str().ok_or_else(|| self.type_error("string", v))
    }

    fn expect_array<'v>(self, v: &'v Value) -> Result<&'v Vec<Value>, PredicateError> {
        v.as_array().ok_or_else(|| self.type_error("array", v))
    }

    fn expect_object<'v>(self, v: &'v Value) -> Result<&'v Map<String, Value>, PredicateError> {
        v.as_object().ok_or_else(|| self.type_error("object", v))
    }

    fn type_error(self, want: &str, got: &Value) -> PredicateError {
        PredicateError::Evaluation(format!("{}() expected {}, got {}", self.name(), want, got))
    }
}

fn take(args: &mut std::vec::IntoIter<Value>) -> Value {
    args.next().unwrap_or(Value::Null)
}

fn order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
