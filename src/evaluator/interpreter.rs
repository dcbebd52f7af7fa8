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

//! Tree-walking async evaluator
//!
//! Every condition detected here goes through [`EvalRuntime::raise`], which
//! either fails the evaluation or substitutes an undefined result. An `Err`
//! travelling up the tree therefore always carries a condition the policy
//! decided to throw, and raising it again on the way up has no effect.

use futures::future::BoxFuture;
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::sync::Arc;

use super::context::{EvalRuntime, Frame, FrameKind};
use super::functions::{CallContext, RegisteredFunction};
use crate::ast::{BinaryOperator, ExpressionNode, FlashBlock, LiteralValue};
use crate::compiler::{CompiledExpression, ResolvedStructures, SharedCompiled};
use crate::core::error::*;
use crate::core::{FunctionValue, Lambda, Value};
use crate::mapping::{MappingResolver, Resolution};

/// Lexical state of one point of the evaluation
#[derive(Clone)]
pub struct Env {
    pub frame: Arc<Frame>,
    /// `$$`
    pub root: Arc<Value>,
    /// Nested calls and mapping invocations
    pub depth: usize,
    /// Mappings being evaluated, outermost first
    pub mapping_stack: Arc<[String]>,
    pub structures: Option<Arc<ResolvedStructures>>,
}

impl Env {
    /// Environment of a top-level evaluation
    pub fn new(frame: Arc<Frame>, root: Value, structures: Option<Arc<ResolvedStructures>>) -> Self {
        Self {
            frame,
            root: Arc::new(root),
            depth: 0,
            mapping_stack: Arc::from(Vec::new()),
            structures,
        }
    }

    fn with_frame(&self, frame: Arc<Frame>) -> Self {
        Self {
            frame,
            ..self.clone()
        }
    }

    fn deeper(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.clone()
        }
    }
}

/// Evaluates expression trees against one runtime
pub struct Evaluator {
    runtime: Arc<EvalRuntime>,
}

impl Evaluator {
    pub fn new(runtime: Arc<EvalRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &EvalRuntime {
        &self.runtime
    }

    /// Evaluate a compiled expression with `input` as both `$` and `$$`
    pub async fn evaluate_root(
        &self,
        compiled: &CompiledExpression,
        input: Value,
        frame: Arc<Frame>,
    ) -> Result<Value> {
        let env = Env::new(frame, input, compiled.resolved_structures().cloned());
        let input = Arc::clone(&env.root);
        self.eval(compiled.ast(), &input, &env).await
    }

    fn raise(&self, error: FlashError, env: &Env) -> Result<Value> {
        self.runtime.raise(error, &env.mapping_stack)
    }

    /// Evaluate `node` with `input` as the context value
    pub fn eval<'a>(
        &'a self,
        node: &'a ExpressionNode,
        input: &'a Value,
        env: &'a Env,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match node {
                ExpressionNode::Literal { value } => Ok(literal(value)),
                ExpressionNode::Context => Ok(input.clone()),
                ExpressionNode::Root => Ok(env.root.as_ref().clone()),
                ExpressionNode::Variable { name, .. } => Ok(self.variable(name, env)),
                ExpressionNode::Field { name } => Ok(field(input, name)),
                ExpressionNode::Path { lhs, rhs } => {
                    let base = self.eval(lhs, input, env).await?;
                    let mut results = Vec::new();
                    for item in base.into_items() {
                        match self.eval(rhs, &item, env).await? {
                            Value::Array(items) => results.extend(items),
                            value => results.push(value),
                        }
                    }
                    Ok(Value::from_sequence(results))
                }
                ExpressionNode::Predicate { base, predicate } => {
                    let base = self.eval(base, input, env).await?;
                    self.filter(base, predicate, env).await
                }
                ExpressionNode::Binary {
                    op,
                    lhs,
                    rhs,
                    position,
                } => self.binary(*op, lhs, rhs, *position, input, env).await,
                ExpressionNode::Negate { operand, position } => {
                    match self.eval(operand, input, env).await? {
                        Value::Undefined => Ok(Value::Undefined),
                        Value::Number(n) => Ok(Value::Number(-n)),
                        other => self.raise(
                            FlashError::type_error(
                                T2001,
                                format!("Cannot negate a value of type {}", other.type_name()),
                            )
                            .with_position(*position),
                            env,
                        ),
                    }
                }
                ExpressionNode::Condition {
                    condition,
                    then,
                    otherwise,
                } => {
                    if self.eval(condition, input, env).await?.is_truthy() {
                        self.eval(then, input, env).await
                    } else if let Some(otherwise) = otherwise {
                        self.eval(otherwise, input, env).await
                    } else {
                        Ok(Value::Undefined)
                    }
                }
                ExpressionNode::Block { expressions } => {
                    let env = env.with_frame(Frame::child(&env.frame));
                    let mut last = Value::Undefined;
                    for expression in expressions {
                        last = self.eval(expression, input, &env).await?;
                    }
                    Ok(last)
                }
                ExpressionNode::Assign { name, value } => {
                    let value = self.eval(value, input, env).await?;
                    env.frame.set(name.clone(), value.clone());
                    Ok(value)
                }
                ExpressionNode::Lambda(lambda) => Ok(Value::Function(FunctionValue::Lambda(Arc::new(
                    Lambda {
                        params: lambda.params.clone(),
                        body: Arc::clone(&lambda.body),
                        frame: Arc::clone(&env.frame),
                        input: input.clone(),
                    },
                )))),
                ExpressionNode::Call {
                    callee,
                    args,
                    position,
                } => {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg, input, env).await?);
                    }
                    self.call(callee, values, *position, input, env).await
                }
                ExpressionNode::Array { items } => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        let value = self.eval(item, input, env).await?;
                        if !value.is_undefined() {
                            values.push(value);
                        }
                    }
                    Ok(Value::Array(values))
                }
                ExpressionNode::Object { entries } => {
                    let mut object = IndexMap::with_capacity(entries.len());
                    for (key, value) in entries {
                        let key = match self.eval(key, input, env).await? {
                            Value::String(key) => key,
                            other => {
                                self.raise(
                                    FlashError::type_error(
                                        T1003,
                                        format!(
                                            "Object key must evaluate to a string, got {}",
                                            other.type_name()
                                        ),
                                    ),
                                    env,
                                )?;
                                continue;
                            }
                        };
                        let value = self.eval(value, input, env).await?;
                        if !value.is_undefined() {
                            object.insert(key, value);
                        }
                    }
                    Ok(Value::Object(object))
                }
                ExpressionNode::Flash(block) => self.flash(block, input, env).await,
                ExpressionNode::Error { error } => {
                    if self.runtime.suppress_compile_errors {
                        Ok(Value::Undefined)
                    } else {
                        self.raise(error.as_ref().clone(), env)
                    }
                }
            }
        })
    }

    /// `$name`: a variable, else a function value, else undefined
    fn variable(&self, name: &str, env: &Env) -> Value {
        env.frame
            .lookup(name)
            .or_else(|| {
                self.runtime
                    .function(name)
                    .map(|f| Value::Function(FunctionValue::Native(f)))
            })
            .unwrap_or_default()
    }

    async fn filter(&self, base: Value, predicate: &ExpressionNode, env: &Env) -> Result<Value> {
        let items = base.into_items();
        let len = items.len() as i64;
        let mut kept = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let keep = match self.eval(predicate, item, env).await? {
                Value::Number(n) => {
                    let mut wanted = n.floor() as i64;
                    if wanted < 0 {
                        wanted += len;
                    }
                    wanted == index as i64
                }
                verdict => verdict.is_truthy(),
            };
            if keep {
                kept.push(item.clone());
            }
        }
        Ok(Value::from_sequence(kept))
    }

    async fn binary(
        &self,
        op: BinaryOperator,
        lhs: &ExpressionNode,
        rhs: &ExpressionNode,
        position: usize,
        input: &Value,
        env: &Env,
    ) -> Result<Value> {
        match op {
            BinaryOperator::And => {
                if !self.eval(lhs, input, env).await?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(self.eval(rhs, input, env).await?.is_truthy()));
            }
            BinaryOperator::Or => {
                if self.eval(lhs, input, env).await?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(self.eval(rhs, input, env).await?.is_truthy()));
            }
            _ => {}
        }
        let left = self.eval(lhs, input, env).await?;
        let right = self.eval(rhs, input, env).await?;
        match apply_operator(op, &left, &right) {
            Ok(value) => Ok(value),
            Err(error) => self.raise(error.with_position(position), env),
        }
    }

    async fn call(
        &self,
        callee: &ExpressionNode,
        args: Vec<Value>,
        position: usize,
        input: &Value,
        env: &Env,
    ) -> Result<Value> {
        let ExpressionNode::Variable { name, .. } = callee else {
            let function = self.eval(callee, input, env).await?;
            return self.apply(&function, args, input, env, position).await;
        };
        let resolved = MappingResolver::new(&self.runtime, &env.mapping_stack)
            .resolve(name, &env.frame)
            .await;
        match resolved {
            Ok(Resolution::Local(value)) | Ok(Resolution::Binding(value)) => {
                self.apply(&value, args, input, env, position).await
            }
            Ok(Resolution::Mapping { name, compiled }) => {
                self.call_mapping(&name, &compiled, args, input, env, position)
                    .await
            }
            Ok(Resolution::Function(function)) => {
                self.invoke(&function, args, input, env, position).await
            }
            Err(error) => self.raise(error.with_position(position), env),
        }
    }

    /// Whether one more nested call would exceed the depth limit. The
    /// condition is raised; when the policy does not throw it the caller
    /// substitutes an undefined result instead of descending.
    fn depth_exceeded(&self, env: &Env, position: usize) -> Result<bool> {
        if env.depth < self.runtime.max_depth {
            return Ok(false);
        }
        self.raise(
            FlashError::evaluation(
                U1001,
                format!(
                    "Stack overflow error: maximum depth of {} exceeded",
                    self.runtime.max_depth
                ),
            )
            .with_position(position),
            env,
        )?;
        Ok(true)
    }

    /// Call a function value
    pub fn apply<'a>(
        &'a self,
        function: &'a Value,
        args: Vec<Value>,
        input: &'a Value,
        env: &'a Env,
        position: usize,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match function {
                Value::Function(FunctionValue::Lambda(lambda)) => {
                    if self.depth_exceeded(env, position)? {
                        return Ok(Value::Undefined);
                    }
                    let frame = Frame::child(&lambda.frame);
                    let mut args = args.into_iter();
                    for param in &lambda.params {
                        frame.set(param.clone(), args.next().unwrap_or_default());
                    }
                    let env = Env {
                        frame,
                        ..env.deeper()
                    };
                    self.eval(&lambda.body, &lambda.input, &env).await
                }
                Value::Function(FunctionValue::Native(function)) => {
                    self.invoke(function, args, input, env, position).await
                }
                other => self.raise(
                    FlashError::type_error(
                        T1006,
                        format!("Attempted to invoke a non-function ({})", other.type_name()),
                    )
                    .with_position(position),
                    env,
                ),
            }
        })
    }

    async fn invoke(
        &self,
        function: &RegisteredFunction,
        args: Vec<Value>,
        input: &Value,
        env: &Env,
        position: usize,
    ) -> Result<Value> {
        if self.depth_exceeded(env, position)? {
            return Ok(Value::Undefined);
        }
        let env = env.deeper();
        let ctx = CallContext {
            evaluator: self,
            env: &env,
            input,
            position,
        };
        match function.invoke(args, &ctx).await {
            Ok(value) => Ok(value),
            Err(error) => self.raise(error.with_position(position), &env),
        }
    }

    /// Evaluate a repository mapping in a fresh scope.
    ///
    /// The first argument is the mapping input (the caller's context when
    /// omitted); the second, an object, supplies the bindings visible inside
    /// the mapping.
    async fn call_mapping(
        &self,
        name: &str,
        compiled: &SharedCompiled,
        args: Vec<Value>,
        input: &Value,
        env: &Env,
        position: usize,
    ) -> Result<Value> {
        if self.depth_exceeded(env, position)? {
            return Ok(Value::Undefined);
        }
        let mut args = args.into_iter();
        let mapping_input = args.next().unwrap_or_else(|| input.clone());
        let bindings = match args.next() {
            Some(Value::Object(bindings)) => bindings,
            None | Some(Value::Undefined) => IndexMap::new(),
            Some(other) => {
                self.raise(
                    FlashError::type_error(
                        T0410,
                        format!(
                            "Bindings passed to mapping '{}' must be an object, got {}",
                            name,
                            other.type_name()
                        ),
                    )
                    .with_position(position),
                    env,
                )?;
                IndexMap::new()
            }
        };

        let mut stack = env.mapping_stack.to_vec();
        stack.push(name.to_string());
        let scope = Frame::root(FrameKind::Bindings, bindings);
        let env = Env {
            frame: Frame::child(&scope),
            root: Arc::new(mapping_input),
            depth: env.depth + 1,
            mapping_stack: Arc::from(stack),
            structures: compiled.resolved_structures().cloned(),
        };
        log::debug!("evaluating mapping '{}' at depth {}", name, env.depth);

        let input = Arc::clone(&env.root);
        let mark = self.runtime.diagnostics_mark();
        match self.eval(compiled.ast(), &input, &env).await {
            // a suppressed condition the caller's policy would have thrown
            // still fails the mapping in the report
            Ok(value) => match self.runtime.collected_failure(mark, &env.mapping_stack) {
                Some(cause) => {
                    self.raise(mapping_failure(name, cause), &env)?;
                    Ok(value)
                }
                None => Ok(value),
            },
            // already attributed to the innermost failing mapping
            Err(error) if error.code() == F3004 => Err(error),
            Err(error) => self.raise(mapping_failure(name, error), &env),
        }
    }

    /// Build the instance described by a FLASH block
    async fn flash(&self, block: &FlashBlock, input: &Value, env: &Env) -> Result<Value> {
        let Some(structures) = env.structures.clone() else {
            if self.runtime.suppress_compile_errors {
                return Ok(Value::Undefined);
            }
            let error = if self.runtime.navigator.is_none() {
                FlashError::collaborator_missing(F1000, "Navigator")
            } else {
                FlashError::structure(
                    F1001,
                    format!("Structures of '{}' were not resolved", block.instance_of),
                    Some(block.instance_of.clone()),
                    None,
                )
            };
            return self.raise(error, env);
        };

        let mut instance = IndexMap::new();
        if structures
            .type_meta(&block.instance_of)
            .is_some_and(|meta| meta.is_resource())
        {
            instance.insert(
                "resourceType".to_string(),
                Value::String(block.instance_of.clone()),
            );
        }
        if let Some(id) = &block.instance_id {
            let id = self.eval(id, input, env).await?;
            if !id.is_undefined() {
                instance.insert("id".to_string(), id);
            }
        }
        for rule in &block.rules {
            let value = self.eval(&rule.value, input, env).await?;
            if value.is_undefined() {
                continue;
            }
            let segments: Vec<&str> = rule.path.split('.').collect();
            let target = ElementTarget {
                structures: &structures,
                type_name: &block.instance_of,
            };
            target.assign(&mut instance, &segments, "", value);
        }
        Ok(Value::Object(instance))
    }
}

fn mapping_failure(name: &str, cause: FlashError) -> FlashError {
    let message = format!("Mapping '{}' failed: {}", name, cause.message());
    FlashError::mapping_with_cause(F3004, name, message, cause)
}

struct ElementTarget<'a> {
    structures: &'a ResolvedStructures,
    type_name: &'a str,
}

impl ElementTarget<'_> {
    fn is_array(&self, path: &str) -> bool {
        self.structures
            .element(self.type_name, path)
            .is_some_and(|element| element.is_array)
    }

    /// Assign `value` at `segments` below `target`, creating intermediate
    /// objects. Array elements collect values; intermediate array elements
    /// descend into their last item.
    fn assign(
        &self,
        target: &mut IndexMap<String, Value>,
        segments: &[&str],
        prefix: &str,
        value: Value,
    ) {
        let Some((head, rest)) = segments.split_first() else {
            return;
        };
        let path = if prefix.is_empty() {
            head.to_string()
        } else {
            format!("{}.{}", prefix, head)
        };
        let is_array = self.is_array(&path);

        if rest.is_empty() {
            if !is_array {
                target.insert(head.to_string(), value);
                return;
            }
            match target.entry(head.to_string()).or_insert_with(|| Value::Array(Vec::new())) {
                Value::Array(items) => items.extend(value.into_items()),
                slot => *slot = Value::Array(value.into_items()),
            }
            return;
        }

        let slot = target.entry(head.to_string()).or_insert_with(|| {
            if is_array {
                Value::Array(Vec::new())
            } else {
                Value::Object(IndexMap::new())
            }
        });
        if let Value::Array(items) = &mut *slot {
            if !matches!(items.last(), Some(Value::Object(_))) {
                items.push(Value::Object(IndexMap::new()));
            }
        } else if !matches!(&*slot, Value::Object(_)) {
            *slot = Value::Object(IndexMap::new());
        }
        let child = match slot {
            Value::Array(items) => items.last_mut(),
            other => Some(other),
        };
        if let Some(Value::Object(child)) = child {
            self.assign(child, rest, &path, value);
        }
    }
}

fn literal(value: &LiteralValue) -> Value {
    match value {
        LiteralValue::Number(n) => Value::Number(*n),
        LiteralValue::String(s) => Value::String(s.clone()),
        LiteralValue::Boolean(b) => Value::Bool(*b),
        LiteralValue::Null => Value::Null,
    }
}

/// Field step: object member, mapped over arrays
fn field(input: &Value, name: &str) -> Value {
    match input {
        Value::Object(map) => map.get(name).cloned().unwrap_or_default(),
        Value::Array(items) => {
            let mut results = Vec::new();
            for item in items {
                match field(item, name) {
                    Value::Array(nested) => results.extend(nested),
                    value => results.push(value),
                }
            }
            Value::from_sequence(results)
        }
        _ => Value::Undefined,
    }
}

fn apply_operator(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value> {
    if op.is_arithmetic() {
        return arithmetic(op, left, right);
    }
    match op {
        BinaryOperator::Concatenate => Ok(Value::String(format!(
            "{}{}",
            left.stringify(),
            right.stringify()
        ))),
        BinaryOperator::Equal | BinaryOperator::NotEqual => {
            if left.is_undefined() || right.is_undefined() {
                return Ok(Value::Bool(false));
            }
            let equal = left == right;
            Ok(Value::Bool(if op == BinaryOperator::Equal { equal } else { !equal }))
        }
        BinaryOperator::In => {
            if left.is_undefined() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(right.clone().into_items().contains(left)))
        }
        _ => compare(op, left, right),
    }
}

fn arithmetic(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value> {
    if left.is_undefined() || right.is_undefined() {
        return Ok(Value::Undefined);
    }
    let Some(l) = left.as_f64() else {
        return Err(FlashError::type_error(
            T2001,
            format!(
                "The left side of the {} operator must evaluate to a number",
                op.as_str()
            ),
        ));
    };
    let Some(r) = right.as_f64() else {
        return Err(FlashError::type_error(
            T2002,
            format!(
                "The right side of the {} operator must evaluate to a number",
                op.as_str()
            ),
        ));
    };
    let result = match op {
        BinaryOperator::Add => l + r,
        BinaryOperator::Subtract => l - r,
        BinaryOperator::Multiply => l * r,
        BinaryOperator::Divide => l / r,
        _ => l % r,
    };
    if !result.is_finite() {
        return Err(FlashError::evaluation(
            D1001,
            format!("Number out of range: {} {} {}", l, op.as_str(), r),
        ));
    }
    Ok(Value::Number(result))
}

fn compare(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value> {
    if left.is_undefined() || right.is_undefined() {
        return Ok(Value::Bool(false));
    }
    let ordering = match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.partial_cmp(r),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Number(_) | Value::String(_), Value::Number(_) | Value::String(_)) => {
            return Err(FlashError::type_error(
                T2009,
                format!(
                    "The values {} and {} either side of operator {} must be of the same data type",
                    left.stringify(),
                    right.stringify(),
                    op.as_str()
                ),
            ));
        }
        _ => {
            return Err(FlashError::type_error(
                T2010,
                format!(
                    "The expressions either side of operator {} must evaluate to numeric or string values",
                    op.as_str()
                ),
            ));
        }
    };
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };
    let result = match op {
        BinaryOperator::LessThan => ordering == Ordering::Less,
        BinaryOperator::LessThanOrEqual => ordering != Ordering::Greater,
        BinaryOperator::GreaterThan => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    };
    Ok(Value::Bool(result))
}
