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

//! Integration tests for built-ins backed by the FHIR client and the
//! terminology runtime

use async_trait::async_trait;
use octofhir_flash::core::error_code::*;
use octofhir_flash::*;
use pretty_assertions::assert_eq;
use rstest::rstest;
#[allow(unused_imports)]
use ::core; // keep `core` resolving to the std core crate for rstest-generated code (the glob import above shadows it)
use serde_json::{Map, Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;

struct MockClient {
    patients: Vec<JsonValue>,
}

impl MockClient {
    fn new() -> Self {
        Self {
            patients: vec![
                json!({"resourceType": "Patient", "id": "1", "family": "Doe"}),
                json!({"resourceType": "Patient", "id": "2", "family": "Doe"}),
                json!({"resourceType": "Patient", "id": "3", "family": "Roe"}),
            ],
        }
    }
}

#[async_trait]
impl FhirClient for MockClient {
    async fn search(
        &self,
        resource_type: &str,
        params: &Map<String, JsonValue>,
    ) -> Result<Vec<JsonValue>, ClientError> {
        match resource_type {
            "Patient" => Ok(self
                .patients
                .iter()
                .filter(|p| params.get("family").is_none_or(|family| &p["family"] == family))
                .cloned()
                .collect()),
            "Broken" => Err(ClientError::Failed("connection reset".to_string())),
            _ => Ok(Vec::new()),
        }
    }

    async fn read(&self, reference: &str) -> Result<Option<JsonValue>, ClientError> {
        Ok(self
            .patients
            .iter()
            .find(|p| format!("Patient/{}", p["id"].as_str().unwrap_or_default()) == reference)
            .cloned())
    }
}

struct SlowClient;

#[async_trait]
impl FhirClient for SlowClient {
    async fn search(&self, _: &str, _: &Map<String, JsonValue>) -> Result<Vec<JsonValue>, ClientError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vec::new())
    }

    async fn read(&self, _: &str) -> Result<Option<JsonValue>, ClientError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(None)
    }
}

struct MockTerminology;

#[async_trait]
impl TerminologyRuntime for MockTerminology {
    async fn translate(&self, code: &str, concept_map: &str) -> Result<Option<JsonValue>, TerminologyError> {
        match (code, concept_map) {
            (_, "http://unknown") => Err(TerminologyError::UnknownResource(concept_map.to_string())),
            ("female", _) => Ok(Some(json!({"system": "http://hl7.org/fhir/gender", "code": "F"}))),
            _ => Ok(None),
        }
    }

    async fn in_value_set(&self, code: &str, _value_set: &str) -> Result<bool, TerminologyError> {
        Ok(matches!(code, "male" | "female"))
    }
}

async fn compile(source: &str) -> Expression {
    FlashEngine::new(EngineConfig::default())
        .compile(
            source,
            CompileOptions::new()
                .with_client(Arc::new(MockClient::new()))
                .with_terminology(Arc::new(MockTerminology)),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_search() {
    let expression = compile("$search('Patient', {'family': 'Doe'}).id").await;
    let result = expression.evaluate(json!({}), None).await.unwrap();
    assert_eq!(result, Value::from(json!(["1", "2"])));
}

#[rstest]
#[case("$searchSingle('Patient', {'family': 'Roe'}).id", None)]
#[case("$searchSingle('Patient', {'family': 'Poe'})", Some(F5102))]
#[case("$searchSingle('Patient', {'family': 'Doe'})", Some(F5103))]
#[case("$search('Broken')", Some(F5104))]
#[tokio::test]
async fn test_search_single(#[case] source: &str, #[case] expected: Option<ErrorCode>) {
    let expression = compile(source).await;
    let result = expression.evaluate(json!({}), None).await;
    match expected {
        None => assert_eq!(result.unwrap(), Value::from("3")),
        Some(code) => assert_eq!(result.unwrap_err().code(), code),
    }
}

#[tokio::test]
async fn test_resolve_reference() {
    let expression = compile("subject.$resolve().family").await;

    let found = expression
        .evaluate(json!({"subject": {"reference": "Patient/3"}}), None)
        .await
        .unwrap();
    assert_eq!(found, Value::from("Roe"));

    let err = expression
        .evaluate(json!({"subject": {"reference": "Patient/404"}}), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), F5102);
}

#[tokio::test]
async fn test_terminology() {
    let expression = compile("{\"coding\": $translateCode(gender, 'http://map'), \"known\": gender.$inValueSet('http://vs')}").await;

    let result = expression.evaluate(json!({"gender": "female"}), None).await.unwrap();
    assert_eq!(
        result,
        Value::from(json!({
            "coding": {"system": "http://hl7.org/fhir/gender", "code": "F"},
            "known": true
        }))
    );

    let result = expression.evaluate(json!({"gender": "other"}), None).await.unwrap();
    assert_eq!(result, Value::from(json!({"known": false})));
}

#[tokio::test]
async fn test_terminology_failure() {
    let expression = compile("$translateCode('female', 'http://unknown')").await;
    let err = expression.evaluate(json!({}), None).await.unwrap_err();
    assert_eq!(err.code(), F5201);
}

#[tokio::test]
async fn test_missing_collaborators() {
    let engine = FlashEngine::new(EngineConfig::default());

    let search = engine.compile("$search('Patient')", CompileOptions::new()).await.unwrap();
    assert_eq!(search.evaluate(json!({}), None).await.unwrap_err().code(), F5100);

    let terminology = engine
        .compile("$inValueSet('male', 'http://vs')", CompileOptions::new())
        .await
        .unwrap();
    assert_eq!(terminology.evaluate(json!({}), None).await.unwrap_err().code(), F5200);
}

#[tokio::test(start_paused = true)]
async fn test_slow_client_times_out() {
    let config = EngineConfig::builder()
        .with_collaborator_timeout(Duration::from_millis(250))
        .build();
    let expression = FlashEngine::new(config)
        .compile(
            "$resolve('Patient/1')",
            CompileOptions::new().with_client(Arc::new(SlowClient)),
        )
        .await
        .unwrap();

    let err = expression.evaluate(json!({}), None).await.unwrap_err();
    assert_eq!(err.code(), F5101);

    let report = expression.evaluate_verbose(json!({}), None).await;
    assert_eq!(report.status, 504);
}
