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

//! Terminology runtime contract

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Terminology operation failure
#[derive(Debug, Clone, Error)]
pub enum TerminologyError {
    #[error("unknown terminology resource: {0}")]
    UnknownResource(String),
    #[error("terminology operation failed: {0}")]
    Failed(String),
}

/// ValueSet and ConceptMap operations
#[async_trait]
pub trait TerminologyRuntime: Send + Sync {
    /// Translate a code using a ConceptMap; `None` when the map has no target
    async fn translate(
        &self,
        code: &str,
        concept_map: &str,
    ) -> Result<Option<JsonValue>, TerminologyError>;

    /// Whether a code is a member of a ValueSet
    async fn in_value_set(&self, code: &str, value_set: &str) -> Result<bool, TerminologyError>;
}
