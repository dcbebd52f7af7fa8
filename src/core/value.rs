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

//! Runtime value model
//!
//! Values follow the JSON data model extended with `Undefined` (no result)
//! and first-class functions. Sequences produced by path navigation are
//! represented as arrays and collapse to a single value when they hold
//! exactly one item.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

use crate::ast::ExpressionNode;
use crate::evaluator::{Frame, RegisteredFunction};

/// Runtime value produced by evaluation
#[derive(Clone, Default)]
pub enum Value {
    /// No value (distinct from JSON `null`)
    #[default]
    Undefined,
    /// JSON null
    Null,
    /// Boolean
    Bool(bool),
    /// Number (JSON numbers are doubles)
    Number(f64),
    /// String
    String(String),
    /// Array or multi-item sequence
    Array(Vec<Value>),
    /// Object with insertion-ordered keys
    Object(IndexMap<String, Value>),
    /// Function value
    Function(FunctionValue),
}

/// Callable value
#[derive(Clone)]
pub enum FunctionValue {
    /// `function($a, ...) { body }` closed over its defining frame
    Lambda(Arc<Lambda>),
    /// Built-in or registered native function
    Native(Arc<RegisteredFunction>),
}

/// A lambda closed over the frame and input it was defined in
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Arc<ExpressionNode>,
    pub frame: Arc<Frame>,
    pub input: Value,
}

impl FunctionValue {
    /// Declared arity, when known
    pub fn arity(&self) -> Option<usize> {
        match self {
            FunctionValue::Lambda(lambda) => Some(lambda.params.len()),
            FunctionValue::Native(native) => native.signature.as_ref().map(|s| s.params.len()),
        }
    }

    fn ptr_eq(&self, other: &FunctionValue) -> bool {
        match (self, other) {
            (FunctionValue::Lambda(a), FunctionValue::Lambda(b)) => Arc::ptr_eq(a, b),
            (FunctionValue::Native(a), FunctionValue::Native(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    /// Build a string value
    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    /// Collapse a sequence: empty → `Undefined`, single item → the item
    pub fn from_sequence(mut items: Vec<Value>) -> Self {
        items.retain(|v| !v.is_undefined());
        match items.len() {
            0 => Value::Undefined,
            1 => items.pop().unwrap_or_default(),
            _ => Value::Array(items),
        }
    }

    /// View this value as a sequence of items
    pub fn into_items(self) -> Vec<Value> {
        match self {
            Value::Undefined => Vec::new(),
            Value::Array(items) => items,
            other => vec![other],
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Name of the value's type as used in error messages and `$type()`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    /// Boolean interpretation of a value
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => items.iter().any(Value::is_truthy),
            Value::Object(map) => !map.is_empty(),
            Value::Function(_) => false,
        }
    }

    /// String form used by `&` and `$string()`
    pub fn stringify(&self) -> String {
        match self {
            Value::Undefined => String::new(),
            Value::String(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Function(_) => String::new(),
            other => other
                .to_json()
                .map(|json| json.to_string())
                .unwrap_or_default(),
        }
    }

    /// Convert to JSON; `Undefined` and functions have no JSON form
    pub fn to_json(&self) -> Option<JsonValue> {
        match self {
            Value::Undefined | Value::Function(_) => None,
            Value::Null => Some(JsonValue::Null),
            Value::Bool(b) => Some(JsonValue::Bool(*b)),
            Value::Number(n) => Some(number_to_json(*n)),
            Value::String(s) => Some(JsonValue::String(s.clone())),
            Value::Array(items) => Some(JsonValue::Array(
                items.iter().filter_map(Value::to_json).collect(),
            )),
            Value::Object(map) => Some(JsonValue::Object(
                map.iter()
                    .filter_map(|(k, v)| v.to_json().map(|json| (k.clone(), json)))
                    .collect(),
            )),
        }
    }
}

fn number_to_json(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

/// Format a number the way the language prints it
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Function(FunctionValue::Lambda(l)) => write!(f, "<lambda/{}>", l.params.len()),
            Value::Function(FunctionValue::Native(n)) => write!(f, "<native {}>", n.name),
            other => write!(f, "{}", other.to_json().unwrap_or(JsonValue::Null)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.to_json() {
            Some(json) => json.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Option<JsonValue>> for Value {
    fn from(json: Option<JsonValue>) -> Self {
        json.map(Value::from).unwrap_or_default()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}
