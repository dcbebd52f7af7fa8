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

//! FHIR server client contract

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Client failure
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("request failed: {0}")]
    Failed(String),
}

/// Search and read access to a FHIR server
#[async_trait]
pub trait FhirClient: Send + Sync {
    /// Search resources of a type; returns the matching resources
    async fn search(
        &self,
        resource_type: &str,
        params: &Map<String, JsonValue>,
    ) -> Result<Vec<JsonValue>, ClientError>;

    /// Read a resource by literal reference (`Patient/123` or absolute URL)
    async fn read(&self, reference: &str) -> Result<Option<JsonValue>, ClientError>;
}

/// Extract the reference string from a `Reference` value or a plain string
pub fn reference_of(value: &JsonValue) -> Option<&str> {
    match value {
        JsonValue::String(reference) => Some(reference),
        JsonValue::Object(map) => map.get("reference").and_then(JsonValue::as_str),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reference_extraction() {
        assert_eq!(reference_of(&json!("Patient/1")), Some("Patient/1"));
        assert_eq!(
            reference_of(&json!({"reference": "Practitioner/7", "display": "Dr"})),
            Some("Practitioner/7")
        );
        assert_eq!(reference_of(&json!({"display": "no ref"})), None);
        assert_eq!(reference_of(&json!(42)), None);
    }
}
