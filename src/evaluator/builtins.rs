// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Built-in functions

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use indexmap::IndexSet;
use std::sync::Arc;

use super::functions::{CallContext, Definition, FnFunction, NativeFunction, native};
use crate::core::error::*;
use crate::core::value::FunctionValue;
use crate::core::Value;

pub(crate) fn definitions() -> Vec<Definition> {
    vec![
        pure("string", "<x-b?:s>", string),
        pure("number", "<(nsb)-:n>", number),
        pure("boolean", "<x-:b>", boolean),
        pure("not", "<x-:b>", not),
        pure("exists", "<x:b>", exists),
        pure("count", "<a:n>", count),
        pure("sum", "<a<n>:n>", sum),
        pure("max", "<a<n>:n>", max),
        pure("min", "<a<n>:n>", min),
        pure("average", "<a<n>:n>", average),
        pure("length", "<s-:n>", length),
        pure("uppercase", "<s-:s>", uppercase),
        pure("lowercase", "<s-:s>", lowercase),
        pure("trim", "<s-:s>", trim),
        pure("substring", "<s-nn?:s>", substring),
        pure("contains", "<s-s:b>", contains),
        pure("join", "<a<s>s?:s>", join),
        pure("split", "<s-sn?:a<s>>", split),
        pure("keys", "<x-:a<s>>", keys),
        pure("lookup", "<x-s:x>", lookup),
        pure("append", "<xx:a>", append),
        pure("now", "<:s>", now),
        pure("millis", "<:n>", millis),
        pure("uuid", "<:s>", uuid),
        native("map", "<af>", MapFunction),
        native("filter", "<af>", FilterFunction),
        native("error", "<s?>", ErrorFunction),
        native("assert", "<bs?>", AssertFunction),
        native("warning", "<s>", ConditionFunction { code: W0001 }),
        native("info", "<s>", ConditionFunction { code: I0001 }),
    ]
}

fn pure(
    name: &'static str,
    signature: &'static str,
    function: fn(Vec<Value>) -> Result<Value>,
) -> Definition {
    (name, signature, Arc::new(FnFunction::new(function)))
}

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Undefined)
}

fn numbers(value: &Value) -> Vec<f64> {
    match value {
        Value::Array(items) => items.iter().filter_map(Value::as_f64).collect(),
        Value::Number(n) => vec![*n],
        _ => Vec::new(),
    }
}

fn string(args: Vec<Value>) -> Result<Value> {
    let value = arg(&args, 0);
    let pretty = arg(&args, 1).is_truthy();
    Ok(match value {
        Value::Undefined => Value::Undefined,
        Value::String(_) => value.clone(),
        other if pretty => match other.to_json() {
            Some(json) => Value::String(serde_json::to_string_pretty(&json).unwrap_or_default()),
            None => Value::String(String::new()),
        },
        other => Value::String(other.stringify()),
    })
}

fn number(args: Vec<Value>) -> Result<Value> {
    Ok(match arg(&args, 0) {
        Value::Number(n) => Value::Number(*n),
        Value::Bool(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => Value::Number(n),
            _ => {
                return Err(FlashError::type_error(
                    T0410,
                    format!("Unable to cast value to a number: \"{}\"", s),
                ));
            }
        },
        _ => Value::Undefined,
    })
}

fn boolean(args: Vec<Value>) -> Result<Value> {
    Ok(match arg(&args, 0) {
        Value::Undefined => Value::Undefined,
        value => Value::Bool(value.is_truthy()),
    })
}

fn not(args: Vec<Value>) -> Result<Value> {
    Ok(match arg(&args, 0) {
        Value::Undefined => Value::Undefined,
        value => Value::Bool(!value.is_truthy()),
    })
}

fn exists(args: Vec<Value>) -> Result<Value> {
    Ok(Value::Bool(!arg(&args, 0).is_undefined()))
}

fn count(args: Vec<Value>) -> Result<Value> {
    Ok(Value::from(arg(&args, 0).clone().into_items().len() as f64))
}

fn sum(args: Vec<Value>) -> Result<Value> {
    Ok(match arg(&args, 0) {
        Value::Undefined => Value::Undefined,
        value => Value::Number(numbers(value).iter().sum()),
    })
}

fn max(args: Vec<Value>) -> Result<Value> {
    Ok(numbers(arg(&args, 0))
        .into_iter()
        .reduce(f64::max)
        .map(Value::Number)
        .unwrap_or_default())
}

fn min(args: Vec<Value>) -> Result<Value> {
    Ok(numbers(arg(&args, 0))
        .into_iter()
        .reduce(f64::min)
        .map(Value::Number)
        .unwrap_or_default())
}

fn average(args: Vec<Value>) -> Result<Value> {
    let values = numbers(arg(&args, 0));
    if values.is_empty() {
        return Ok(Value::Undefined);
    }
    Ok(Value::Number(values.iter().sum::<f64>() / values.len() as f64))
}

fn with_string(args: &[Value], f: impl FnOnce(&str) -> Value) -> Result<Value> {
    Ok(match arg(args, 0) {
        Value::String(s) => f(s),
        _ => Value::Undefined,
    })
}

fn length(args: Vec<Value>) -> Result<Value> {
    with_string(&args, |s| Value::Number(s.chars().count() as f64))
}

fn uppercase(args: Vec<Value>) -> Result<Value> {
    with_string(&args, |s| Value::String(s.to_uppercase()))
}

fn lowercase(args: Vec<Value>) -> Result<Value> {
    with_string(&args, |s| Value::String(s.to_lowercase()))
}

/// Collapse whitespace runs to one space and strip both ends
fn trim(args: Vec<Value>) -> Result<Value> {
    with_string(&args, |s| {
        Value::String(s.split_whitespace().collect::<Vec<_>>().join(" "))
    })
}

/// Character based; a negative start counts from the end
fn substring(args: Vec<Value>) -> Result<Value> {
    let start = arg(&args, 1).as_f64().unwrap_or(0.0);
    let length = arg(&args, 2).as_f64();
    with_string(&args, |s| {
        let chars: Vec<char> = s.chars().collect();
        let len = chars.len() as i64;
        let mut from = start.trunc() as i64;
        if from < 0 {
            from = (len + from).max(0);
        }
        let from = from.min(len) as usize;
        let to = match length {
            Some(length) if length <= 0.0 => from,
            Some(length) => from.saturating_add(length.trunc() as usize).min(chars.len()),
            None => chars.len(),
        };
        Value::String(chars[from..to].iter().collect())
    })
}

fn contains(args: Vec<Value>) -> Result<Value> {
    let pattern = arg(&args, 1).as_str().unwrap_or_default().to_string();
    with_string(&args, |s| Value::Bool(s.contains(pattern.as_str())))
}

fn join(args: Vec<Value>) -> Result<Value> {
    let separator = arg(&args, 1).as_str().unwrap_or("");
    Ok(match arg(&args, 0) {
        Value::Undefined => Value::Undefined,
        value => Value::String(
            value
                .clone()
                .into_items()
                .iter()
                .map(Value::stringify)
                .collect::<Vec<_>>()
                .join(separator),
        ),
    })
}

fn split(args: Vec<Value>) -> Result<Value> {
    let separator = arg(&args, 1).as_str().unwrap_or_default().to_string();
    let limit = arg(&args, 2).as_f64().map(|n| n.max(0.0) as usize);
    with_string(&args, |s| {
        let parts: Vec<&str> = if separator.is_empty() {
            s.char_indices().map(|(i, c)| &s[i..i + c.len_utf8()]).collect()
        } else {
            s.split(separator.as_str()).collect()
        };
        Value::Array(
            parts
                .into_iter()
                .take(limit.unwrap_or(usize::MAX))
                .map(Value::from)
                .collect(),
        )
    })
}

/// Keys of an object, or the union of keys over an array of objects
fn keys(args: Vec<Value>) -> Result<Value> {
    let mut keys = IndexSet::new();
    for item in arg(&args, 0).clone().into_items() {
        if let Value::Object(map) = item {
            keys.extend(map.into_keys());
        }
    }
    if keys.is_empty() {
        return Ok(Value::Undefined);
    }
    Ok(Value::Array(keys.into_iter().map(Value::String).collect()))
}

fn lookup(args: Vec<Value>) -> Result<Value> {
    let key = arg(&args, 1).as_str().unwrap_or_default();
    let found = arg(&args, 0)
        .clone()
        .into_items()
        .into_iter()
        .filter_map(|item| item.as_object().and_then(|map| map.get(key).cloned()))
        .collect();
    Ok(Value::from_sequence(found))
}

fn append(args: Vec<Value>) -> Result<Value> {
    let first = arg(&args, 0).clone();
    let second = arg(&args, 1).clone();
    if second.is_undefined() {
        return Ok(first);
    }
    if first.is_undefined() {
        return Ok(second);
    }
    let mut items = first.into_items();
    items.extend(second.into_items());
    Ok(Value::Array(items))
}

fn now(_args: Vec<Value>) -> Result<Value> {
    Ok(Value::String(
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    ))
}

fn millis(_args: Vec<Value>) -> Result<Value> {
    Ok(Value::Number(Utc::now().timestamp_millis() as f64))
}

fn uuid(_args: Vec<Value>) -> Result<Value> {
    Ok(Value::String(uuid::Uuid::new_v4().to_string()))
}

/// Arguments passed to a callback: item, index, whole array, cut to the
/// number of parameters a lambda declares
fn callback_args(function: &Value, item: &Value, index: usize, items: &[Value]) -> Vec<Value> {
    let arity = match function {
        Value::Function(FunctionValue::Lambda(lambda)) => lambda.params.len(),
        _ => 1,
    };
    [
        item.clone(),
        Value::Number(index as f64),
        Value::Array(items.to_vec()),
    ]
    .into_iter()
    .take(arity.clamp(1, 3))
    .collect()
}

struct MapFunction;

#[async_trait]
impl NativeFunction for MapFunction {
    async fn call(&self, args: Vec<Value>, ctx: &CallContext<'_>) -> Result<Value> {
        let function = arg(&args, 1);
        let items = arg(&args, 0).clone().into_items();
        let mut results = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            results.push(ctx.apply(function, callback_args(function, item, index, &items)).await?);
        }
        Ok(Value::from_sequence(results))
    }
}

struct FilterFunction;

#[async_trait]
impl NativeFunction for FilterFunction {
    async fn call(&self, args: Vec<Value>, ctx: &CallContext<'_>) -> Result<Value> {
        let function = arg(&args, 1);
        let items = arg(&args, 0).clone().into_items();
        let mut kept = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let verdict = ctx
                .apply(function, callback_args(function, item, index, &items))
                .await?;
            if verdict.is_truthy() {
                kept.push(item.clone());
            }
        }
        Ok(Value::from_sequence(kept))
    }
}

struct ErrorFunction;

#[async_trait]
impl NativeFunction for ErrorFunction {
    async fn call(&self, args: Vec<Value>, ctx: &CallContext<'_>) -> Result<Value> {
        let message = arg(&args, 0)
            .as_str()
            .unwrap_or("$error() function evaluated")
            .to_string();
        ctx.raise(FlashError::evaluation(D3137, message))
    }
}

struct AssertFunction;

#[async_trait]
impl NativeFunction for AssertFunction {
    async fn call(&self, args: Vec<Value>, ctx: &CallContext<'_>) -> Result<Value> {
        if arg(&args, 0).is_truthy() {
            return Ok(Value::Undefined);
        }
        let message = arg(&args, 1)
            .as_str()
            .unwrap_or("$assert() statement failed")
            .to_string();
        ctx.raise(FlashError::evaluation(D3141, message))
    }
}

/// `$warning()` / `$info()`: raise a low-severity condition and continue
struct ConditionFunction {
    code: ErrorCode,
}

#[async_trait]
impl NativeFunction for ConditionFunction {
    async fn call(&self, args: Vec<Value>, ctx: &CallContext<'_>) -> Result<Value> {
        let message = arg(&args, 0).stringify();
        ctx.raise(FlashError::evaluation(self.code, message))?;
        Ok(Value::Undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn call(function: fn(Vec<Value>) -> Result<Value>, args: serde_json::Value) -> Value {
        let args = match Value::from(args) {
            Value::Array(items) => items,
            other => vec![other],
        };
        function(args).unwrap()
    }

    #[rstest]
    #[case(json!(["hello", 1]), "ello")]
    #[case(json!(["hello", -3]), "llo")]
    #[case(json!(["hello", 1, 3]), "ell")]
    #[case(json!(["hello", 10]), "")]
    #[case(json!(["héllo", 0, 2]), "hé")]
    #[case(json!(["abc", 1, 1e20]), "bc")]
    #[case(json!(["abc", -2, 1e300]), "bc")]
    fn test_substring(#[case] args: serde_json::Value, #[case] expected: &str) {
        assert_eq!(call(substring, args), Value::from(expected));
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(call(sum, json!([[1, 2, 3]])), Value::from(6i64));
        assert_eq!(call(max, json!([[1, 7, 3]])), Value::from(7i64));
        assert_eq!(call(min, json!([[4, 2]])), Value::from(2i64));
        assert_eq!(call(average, json!([[1, 2]])), Value::from(1.5));
        assert_eq!(call(count, json!([[]])), Value::from(0i64));
        assert!(call(max, json!([[]])).is_undefined());
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(call(trim, json!(["  a \n b  "])), Value::from("a b"));
        assert_eq!(call(join, json!([["a", "b"], "-"])), Value::from("a-b"));
        assert_eq!(call(split, json!(["a,b,c", ",", 2])), Value::from(json!(["a", "b"])));
        assert_eq!(call(split, json!(["ab", ""])), Value::from(json!(["a", "b"])));
        assert_eq!(call(contains, json!(["flash", "las"])), Value::from(true));
        assert_eq!(call(string, json!([{"a": 1}])), Value::from(r#"{"a":1}"#));
        assert_eq!(call(length, json!(["héllo"])), Value::from(5i64));
    }

    #[test]
    fn test_number_cast() {
        assert_eq!(call(number, json!(["42"])), Value::from(42i64));
        assert_eq!(call(number, json!([true])), Value::from(1i64));
        let err = number(vec![Value::from("forty")]).unwrap_err();
        assert_eq!(err.code(), T0410);
    }

    #[test]
    fn test_object_functions() {
        let objects = json!([[{"a": 1, "b": 2}, {"b": 3, "c": 4}]]);
        assert_eq!(call(keys, objects), Value::from(json!(["a", "b", "c"])));
        assert_eq!(
            call(lookup, json!([[{"b": 2}, {"b": 3}], "b"])),
            Value::from(json!([2, 3]))
        );
        assert_eq!(call(append, json!([[1], 2])), Value::from(json!([1, 2])));
    }
}
