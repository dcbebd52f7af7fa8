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

//! Resolution of dynamically invoked names
//!
//! `$name(...)` resolves through an ordered chain of lookups, first hit
//! wins:
//!
//! 1. local variables (`:=` assignments, lambda parameters)
//! 2. bindings supplied at the call site of the current evaluation
//! 3. mappings fetched from the repository and compiled through the cache
//! 4. registered and built-in functions

use std::sync::Arc;

use crate::compiler::SharedCompiled;
use crate::core::error::*;
use crate::core::Value;
use crate::evaluator::{EvalRuntime, Frame, FrameKind, RegisteredFunction};

/// Where a name resolved to
#[derive(Clone)]
pub enum Resolution {
    /// Local variable
    Local(Value),
    /// Call-site binding
    Binding(Value),
    /// Compiled repository mapping
    Mapping {
        name: String,
        compiled: SharedCompiled,
    },
    /// Registered or built-in function
    Function(Arc<RegisteredFunction>),
}

impl Resolution {
    pub fn layer(&self) -> &'static str {
        match self {
            Resolution::Local(_) => "local",
            Resolution::Binding(_) => "binding",
            Resolution::Mapping { .. } => "mapping",
            Resolution::Function(_) => "function",
        }
    }
}

/// Resolves names against one evaluation runtime
pub struct MappingResolver<'a> {
    runtime: &'a EvalRuntime,
    mapping_stack: &'a [String],
}

impl<'a> MappingResolver<'a> {
    pub fn new(runtime: &'a EvalRuntime, mapping_stack: &'a [String]) -> Self {
        Self {
            runtime,
            mapping_stack,
        }
    }

    /// Resolve `name` as seen from `frame`
    pub async fn resolve(&self, name: &str, frame: &Frame) -> Result<Resolution> {
        if let Some(value) = frame.lookup_kind(name, FrameKind::Local) {
            return Ok(Resolution::Local(value));
        }
        if let Some(value) = frame.lookup_kind(name, FrameKind::Bindings) {
            return Ok(Resolution::Binding(value));
        }
        if let Some(resolution) = self.repository(name).await? {
            return Ok(resolution);
        }
        if let Some(function) = self.runtime.function(name) {
            return Ok(Resolution::Function(function));
        }
        Err(self.not_found(name))
    }

    async fn repository(&self, name: &str) -> Result<Option<Resolution>> {
        let Some(repository) = &self.runtime.repository else {
            return Ok(None);
        };
        let listed = match self.runtime.repository_keys(self.mapping_stack).await? {
            Some(keys) if !keys.contains(name) => return Ok(None),
            Some(_) => true,
            None => false,
        };

        let source = match repository.get(name).await {
            Ok(Some(source)) => source,
            Ok(None) => return Ok(None),
            // without a key listing the name may never have been a mapping;
            // a function of that name still serves the call
            Err(error) if !listed && self.runtime.function(name).is_some() => {
                self.runtime.raise(
                    FlashError::evaluation(
                        F3000,
                        format!(
                            "Failed to fetch '{}' from the mapping repository, using the function instead: {}",
                            name, error
                        ),
                    ),
                    self.mapping_stack,
                )?;
                return Ok(None);
            }
            Err(error) => {
                return Err(FlashError::mapping(
                    F3002,
                    name,
                    format!("Failed to fetch mapping '{}': {}", name, error),
                ));
            }
        };

        let compiled = self
            .runtime
            .compiler
            .compile(&self.runtime.cache, &source, &self.runtime.compile_request())
            .await
            .map_err(|error| syntax_error(name, &error))?;
        if let Some(error) = compiled.errors().first() {
            return Err(syntax_error(name, error));
        }
        log::debug!("resolved ${} to repository mapping", name);
        Ok(Some(Resolution::Mapping {
            name: name.to_string(),
            compiled,
        }))
    }

    fn not_found(&self, name: &str) -> FlashError {
        if self.runtime.repository.is_some() {
            FlashError::mapping(F3001, name, format!("Mapping '{}' not found", name))
        } else {
            FlashError::type_error(T1006, format!("Attempted to invoke a non-function: ${}", name))
        }
    }
}

fn syntax_error(name: &str, error: &FlashError) -> FlashError {
    FlashError::mapping(
        F3003,
        name,
        format!("Failed to compile mapping '{}': {}", name, error),
    )
}
