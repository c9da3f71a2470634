//! Tree-walking evaluator over `serde_json::Value`.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::ast::{Ast, Comparator};
use super::PredicateError;

type EvalResult = Result<Value, PredicateError>;

pub fn evaluate(ast: &Ast, data: &Value) -> EvalResult {
    match ast {
        Ast::Identity => Ok(data.clone()),
        Ast::Field(name) => Ok(data.get(name.as_str()).cloned().unwrap_or(Value::Null)),
        Ast::Index(i) => Ok(match data {
            Value::Array(items) => resolve_index(*i, items.len())
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }),
        Ast::Slice { start, stop, step } => Ok(match data {
            Value::Array(items) => Value::Array(slice(items, *start, *stop, step.unwrap_or(1))),
            _ => Value::Null,
        }),
        Ast::Literal(v) => Ok(v.clone()),
        Ast::Subexpr(lhs, rhs) => {
            let left = evaluate(lhs, data)?;
            evaluate(rhs, &left)
        }
        Ast::Projection(lhs, rhs) => {
            let left = evaluate(lhs, data)?;
            let Value::Array(items) = left else {
                return Ok(Value::Null);
            };
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                let v = evaluate(rhs, item)?;
                if !v.is_null() {
                    out.push(v);
                }
            }
            Ok(Value::Array(out))
        }
        Ast::ObjectValues(inner) => Ok(match evaluate(inner, data)? {
            Value::Object(map) => Value::Array(map.into_iter().map(|(_, v)| v).collect()),
            _ => Value::Null,
        }),
        Ast::Flatten(inner) => Ok(match evaluate(inner, data)? {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Array(nested) => out.extend(nested),
                        other => out.push(other),
                    }
                }
                Value::Array(out)
            }
            _ => Value::Null,
        }),
        Ast::Condition(cond, rhs) => {
            if is_truthy(&evaluate(cond, data)?) {
                evaluate(rhs, data)
            } else {
                Ok(Value::Null)
            }
        }
        Ast::Compare(cmp, lhs, rhs) => {
            let left = evaluate(lhs, data)?;
            let right = evaluate(rhs, data)?;
            Ok(compare(*cmp, &left, &right))
        }
        Ast::And(lhs, rhs) => {
            let left = evaluate(lhs, data)?;
            if is_truthy(&left) {
                evaluate(rhs, data)
            } else {
                Ok(left)
            }
        }
        Ast::Or(lhs, rhs) => {
            let left = evaluate(lhs, data)?;
            if is_truthy(&left) {
                Ok(left)
            } else {
                evaluate(rhs, data)
            }
        }
        Ast::Not(inner) => Ok(Value::Bool(!is_truthy(&evaluate(inner, data)?))),
        Ast::MultiList(items) => {
            if data.is_null() {
                return Ok(Value::Null);
            }
            items
                .iter()
                .map(|item| evaluate(item, data))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        Ast::MultiHash(pairs) => {
            if data.is_null() {
                return Ok(Value::Null);
            }
            let mut map = Map::with_capacity(pairs.len());
            for (key, expr) in pairs {
                map.insert(key.clone(), evaluate(expr, data)?);
            }
            Ok(Value::Object(map))
        }
        Ast::Call(function, args) => match function.expref_position() {
            Some(at) => match (args.get(at), args.get(1 - at)) {
                (Some(Ast::ExprRef(key)), Some(subject)) => function.call_by(key, &evaluate(subject, data)?),
                _ => Err(PredicateError::Evaluation(format!(
                    "{}() expects an expression reference",
                    function.name()
                ))),
            },
            None => {
                let values = args
                    .iter()
                    .map(|arg| evaluate(arg, data))
                    .collect::<Result<Vec<_>, _>>()?;
                function.call(values)
            }
        },
        Ast::ExprRef(_) => Err(PredicateError::Evaluation(
            "expression reference used outside a function argument".to_string(),
        )),
    }
}

/// Falsy values are `null`, `false`, empty strings, empty arrays and empty objects.
pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => true,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Structural equality with numbers compared by value (`1 == 1.0`).
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => x.len() == y.len() && x.iter().zip(y).all(|(l, r)| json_eq(l, r)),
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, l)| y.get(k).is_some_and(|r| json_eq(l, r)))
        }
        _ => a == b,
    }
}

/// JSON number for `n`, integral when there is no fractional part.
pub fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn compare(cmp: Comparator, left: &Value, right: &Value) -> Value {
    match cmp {
        Comparator::Eq => Value::Bool(json_eq(left, right)),
        Comparator::Ne => Value::Bool(!json_eq(left, right)),
        _ => {
            let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
                return Value::Null;
            };
            let Some(ord) = l.partial_cmp(&r) else {
                return Value::Null;
            };
            Value::Bool(match cmp {
                Comparator::Lt => ord == Ordering::Less,
                Comparator::Le => ord != Ordering::Greater,
                Comparator::Gt => ord == Ordering::Greater,
                Comparator::Ge => ord != Ordering::Less,
                Comparator::Eq | Comparator::Ne => false,
            })
        }
    }
}

fn resolve_index(i: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if i < 0 { len + i } else { i };
    (0..len).contains(&idx).then_some(idx as usize)
}

fn slice(items: &[Value], start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<Value> {
    let len = items.len() as i64;
    let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
    let bound = |v: Option<i64>, default: i64| match v {
        None => default,
        Some(v) if v < 0 => {
            if step > 0 {
                clamp(len + v, 0, len)
            } else {
                clamp(len + v, -1, len - 1)
            }
        }
        Some(v) => {
            if step > 0 {
                clamp(v, 0, len)
            } else {
                clamp(v, -1, len - 1)
            }
        }
    };
    let mut out = Vec::new();
    if step > 0 {
        let (mut i, end) = (bound(start, 0), bound(stop, len));
        while i < end {
            out.push(items[i as usize].clone());
            i += step;
        }
    } else {
        let (mut i, end) = (bound(start, len - 1), bound(stop, -1));
        while i > end {
            out.push(items[i as usize].clone());
            i += step;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::parser::parse;
    use serde_json::json;

    fn search(expr: &str, data: &Value) -> Value {
        evaluate(&parse(expr).expect("compiles"), data).expect("evaluates")
    }

    #[test]
    fn missing_paths_are_null() {
        let doc = json!({"metadata": {"name": "x"}});
        assert_eq!(search("metadata.labels.app", &doc), Value::Null);
        assert_eq!(search("spec[0]", &doc), Value::Null);
    }

    #[test]
    fn projections_and_filters() {
        let doc = json!({
            "spec": {"containers": [
                {"name": "app", "image": "nginx:latest", "ports": [80]},
                {"name": "sidecar", "image": "envoy:1.29", "ports": [9901, 15000]}
            ]}
        });
        assert_eq!(search("spec.containers[*].name", &doc), json!(["app", "sidecar"]));
        assert_eq!(
            search("spec.containers[?ends_with(image, ':latest')].name", &doc),
            json!(["app"])
        );
        assert_eq!(search("spec.containers[].ports[]", &doc), json!([80, 9901, 15000]));
        assert_eq!(search("length(spec.containers[?name == 'none'])", &doc), json!(0));
        assert_eq!(search("spec.containers[0].{n: name, i: image}", &doc), json!({"n": "app", "i": "nginx:latest"}));
    }

    #[test]
    fn slices_follow_python_semantics() {
        let doc = json!([0, 1, 2, 3, 4]);
        assert_eq!(search("[1:3]", &doc), json!([1, 2]));
        assert_eq!(search("[::-1]", &doc), json!([4, 3, 2, 1, 0]));
        assert_eq!(search("[-2:]", &doc), json!([3, 4]));
        assert_eq!(search("[::2]", &doc), json!([0, 2, 4]));
        assert_eq!(search("[-1]", &doc), json!(4));
    }

    #[test]
    fn comparisons() {
        let doc = json!({"n": 5, "s": "abc"});
        assert_eq!(search("n > `3`", &doc), json!(true));
        assert_eq!(search("n == `5.0`", &doc), json!(true));
        assert_eq!(search("s < `3`", &doc), Value::Null);
        assert_eq!(search("s == 'abc' && n", &doc), json!(5));
        assert_eq!(search("missing || 'fallback'", &doc), json!("fallback"));
        assert_eq!(search("!missing", &doc), json!(true));
    }

    #[test]
    fn truthiness() {
        for falsy in [json!(null), json!(false), json!(""), json!([]), json!({})] {
            assert!(!is_truthy(&falsy), "{falsy} should be falsy");
        }
        for truthy in [json!(0), json!(true), json!("x"), json!([0]), json!({"a": null})] {
            assert!(is_truthy(&truthy), "{truthy} should be truthy");
        }
    }

    #[test]
    fn expression_references() {
        let doc = json!({"pods": [
            {"name": "b", "age": 30, "labels": {"team": "x"}},
            {"name": "a", "age": 5, "labels": {"team": "y"}},
            {"name": "c", "age": 12, "labels": {}}
        ]});
        assert_eq!(search("sort_by(pods, &age)[*].name", &doc), json!(["a", "c", "b"]));
        assert_eq!(search("sort_by(pods, &name)[0].age", &doc), json!(5));
        assert_eq!(search("max_by(pods, &age).name", &doc), json!("b"));
        assert_eq!(search("min_by(pods, &age).name", &doc), json!("a"));
        assert_eq!(search("map(&labels.team, pods)", &doc), json!(["x", "y", null]));
        assert_eq!(search("max_by(pods[?age > `100`], &age)", &doc), Value::Null);
        assert_eq!(search("length(merge(pods[0].labels, `{\"env\": \"dev\"}`))", &doc), json!(2));
        assert_eq!(search("floor(avg(pods[*].age))", &doc), json!(15));

        let err = evaluate(&parse("sort_by(pods, &labels.team)").unwrap(), &doc).unwrap_err();
        assert!(matches!(err, PredicateError::Evaluation(_)));
        let err = evaluate(&parse("[&name]").unwrap(), &doc).unwrap_err();
        assert!(matches!(err, PredicateError::Evaluation(_)));
    }

    #[test]
    fn function_type_errors_surface() {
        let err = evaluate(&parse("length(n)").unwrap(), &json!({"n": 1})).unwrap_err();
        assert!(matches!(err, PredicateError::Evaluation(_)));
    }
}
