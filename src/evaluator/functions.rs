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

//! Function registry
//!
//! Built-in functions live in a process-wide table built on first use.
//! Functions registered on a compiled expression are kept in a per-handle
//! table layered over the built-ins and shadow them by name.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

use super::context::EvalRuntime;
use super::interpreter::{Env, Evaluator};
use super::signature::Signature;
use super::{builtins, collaborators};
use crate::core::error::*;
use crate::core::Value;

/// Implementation of a callable function
#[async_trait]
pub trait NativeFunction: Send + Sync {
    /// Invoke with arguments already checked against the signature
    async fn call(&self, args: Vec<Value>, ctx: &CallContext<'_>) -> Result<Value>;
}

/// Adapter turning a plain closure into a [`NativeFunction`]
pub struct FnFunction<F>(F);

impl<F> FnFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Value> + Send + Sync,
{
    pub fn new(function: F) -> Self {
        Self(function)
    }
}

#[async_trait]
impl<F> NativeFunction for FnFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Value> + Send + Sync,
{
    async fn call(&self, args: Vec<Value>, _ctx: &CallContext<'_>) -> Result<Value> {
        (self.0)(args)
    }
}

/// What a native function sees of the evaluation it is called from
pub struct CallContext<'a> {
    pub(crate) evaluator: &'a Evaluator,
    pub(crate) env: &'a Env,
    pub(crate) input: &'a Value,
    pub(crate) position: usize,
}

impl CallContext<'_> {
    /// Context value at the call site
    pub fn input(&self) -> &Value {
        self.input
    }

    /// Source offset of the call
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn runtime(&self) -> &EvalRuntime {
        self.evaluator.runtime()
    }

    /// Names of the mappings being evaluated, outermost first
    pub fn mapping_stack(&self) -> &[String] {
        &self.env.mapping_stack
    }

    /// Call a function value (lambda or native) with `args`
    pub async fn apply(&self, function: &Value, args: Vec<Value>) -> Result<Value> {
        self.evaluator
            .apply(function, args, self.input, self.env, self.position)
            .await
    }

    /// Raise a condition through the evaluation policy
    pub fn raise(&self, error: FlashError) -> Result<Value> {
        self.runtime()
            .raise(error.with_position(self.position), &self.env.mapping_stack)
    }
}

/// A named function with an optional signature
pub struct RegisteredFunction {
    pub name: String,
    pub signature: Option<Signature>,
    implementation: Arc<dyn NativeFunction>,
}

impl RegisteredFunction {
    /// Create a function, parsing its signature when one is given
    pub fn new(
        name: impl Into<String>,
        implementation: Arc<dyn NativeFunction>,
        signature: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            signature: signature.map(Signature::parse).transpose()?,
            implementation,
        })
    }

    /// Validate `args` against the signature and call the implementation
    pub async fn invoke(&self, args: Vec<Value>, ctx: &CallContext<'_>) -> Result<Value> {
        let args = match &self.signature {
            Some(signature) => signature.validate(&self.name, args, ctx.input())?,
            None => args,
        };
        self.implementation.call(args, ctx).await
    }
}

impl fmt::Debug for RegisteredFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredFunction")
            .field("name", &self.name)
            .field("signature", &self.signature.as_ref().map(Signature::as_str))
            .finish()
    }
}

type FunctionMap = FxHashMap<String, Arc<RegisteredFunction>>;

static BUILTINS: Lazy<FunctionMap> = Lazy::new(|| {
    let mut table = FunctionMap::default();
    for (name, signature, implementation) in builtins::definitions()
        .into_iter()
        .chain(collaborators::definitions())
    {
        match RegisteredFunction::new(name, implementation, Some(signature)) {
            Ok(function) => {
                table.insert(name.to_string(), Arc::new(function));
            }
            Err(error) => log::error!("skipping built-in ${}: {}", name, error),
        }
    }
    table
});

/// Built-in definition: name, signature, implementation
pub(crate) type Definition = (&'static str, &'static str, Arc<dyn NativeFunction>);

pub(crate) fn native(
    name: &'static str,
    signature: &'static str,
    function: impl NativeFunction + 'static,
) -> Definition {
    (name, signature, Arc::new(function))
}

/// Registered functions layered over the built-ins
#[derive(Clone, Default)]
pub struct FunctionTable {
    registered: Arc<FunctionMap>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a function; shadows a built-in of the same name
    pub fn register(&mut self, function: RegisteredFunction) {
        Arc::make_mut(&mut self.registered).insert(function.name.clone(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredFunction>> {
        self.registered
            .get(name)
            .or_else(|| BUILTINS.get(name))
            .cloned()
    }

    pub fn is_builtin(name: &str) -> bool {
        BUILTINS.contains_key(name)
    }

    /// Built-in names, sorted
    pub fn builtin_names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = builtins::definitions()
            .into_iter()
            .chain(collaborators::definitions())
            .map(|(name, _, _)| name)
            .collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.registered.keys().collect();
        names.sort();
        f.debug_struct("FunctionTable")
            .field("registered", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_signature_parses() {
        let names = FunctionTable::builtin_names();
        assert_eq!(BUILTINS.len(), names.len());
        for name in names {
            assert!(FunctionTable::is_builtin(name), "{name}");
        }
    }

    #[test]
    fn test_registration_shadows_builtin() {
        let mut table = FunctionTable::new();
        let builtin = table.get("uppercase").unwrap();
        assert!(builtin.signature.is_some());
        let snapshot = table.clone();

        let shout = FnFunction::new(|_args: Vec<Value>| Ok(Value::from("SHOUT")));
        table.register(RegisteredFunction::new("uppercase", Arc::new(shout), None).unwrap());
        let shadowed = table.get("uppercase").unwrap();
        assert!(shadowed.signature.is_none());

        // clones taken before registration keep their view
        assert!(snapshot.get("uppercase").unwrap().signature.is_some());
    }

    #[test]
    fn test_invalid_signature_is_rejected() {
        let noop = FnFunction::new(|_args: Vec<Value>| Ok(Value::Undefined));
        let err = RegisteredFunction::new("f", Arc::new(noop), Some("<z>")).unwrap_err();
        assert_eq!(err.code(), S0201);
    }
}
