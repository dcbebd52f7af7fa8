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

//! Integration tests for FLASH instance blocks

use octofhir_flash::core::error_code::*;
use octofhir_flash::providers::{StructureKind, TypeMeta};
use octofhir_flash::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

const PATIENT: &str = "Instance: 'pat-' & id
InstanceOf: Patient
* active = true
* name.family = last
* name.given = first
* gender = sex
";

fn navigator() -> Arc<InMemoryNavigator> {
    Arc::new(
        InMemoryNavigator::new()
            .with_packages(["hl7.fhir.r4.core@4.0.1"])
            .with_type(TypeMeta::new("Patient", StructureKind::Resource))
            .with_type(TypeMeta::new("HumanName", StructureKind::ComplexType))
            .with_element("Patient", "active", "boolean", false)
            .with_element("Patient", "gender", "code", false)
            .with_element("Patient", "name", "HumanName", true)
            .with_element("Patient", "name.family", "string", false)
            .with_element("Patient", "name.given", "string", true)
            .with_element("HumanName", "family", "string", false),
    )
}

#[tokio::test]
async fn test_patient_instance() {
    let engine = FlashEngine::new(EngineConfig::default());
    let expression = engine
        .compile(PATIENT, CompileOptions::new().with_navigator(navigator()))
        .await
        .unwrap();

    let structures = expression.resolved_structures().unwrap();
    assert!(structures.element("Patient", "name").unwrap().is_array);

    let result = expression
        .evaluate(json!({"id": "1", "last": "Doe", "first": "Jane"}), None)
        .await
        .unwrap();

    let instance = result.to_json().unwrap();
    assert_eq!(
        instance,
        json!({
            "resourceType": "Patient",
            "id": "pat-1",
            "active": true,
            "name": [{"family": "Doe", "given": ["Jane"]}]
        })
    );
    let keys: Vec<_> = instance.as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys, vec!["resourceType", "id", "active", "name"]);
}

#[tokio::test]
async fn test_complex_type_has_no_resource_type() {
    let engine = FlashEngine::new(EngineConfig::default());
    let expression = engine
        .compile(
            "InstanceOf: HumanName\n* family = $uppercase(surname)",
            CompileOptions::new().with_navigator(navigator()),
        )
        .await
        .unwrap();

    let result = expression.evaluate(json!({"surname": "doe"}), None).await.unwrap();
    assert_eq!(result, Value::from(json!({"family": "DOE"})));
}

#[tokio::test]
async fn test_unknown_element_fails_compilation() {
    let engine = FlashEngine::new(EngineConfig::default());
    let err = engine
        .compile(
            "InstanceOf: Patient\n* wings = 2",
            CompileOptions::new().with_navigator(navigator()),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), F1002);
}

#[tokio::test]
async fn test_missing_navigator() {
    let engine = FlashEngine::new(EngineConfig::default());

    let err = engine.compile(PATIENT, CompileOptions::new()).await.unwrap_err();
    assert_eq!(err.code(), F1000);

    let expression = engine
        .compile(PATIENT, CompileOptions::new().with_recover(true))
        .await
        .unwrap();
    let codes: Vec<_> = expression.errors().iter().map(FlashError::code).collect();
    assert_eq!(codes, vec![F1000]);

    let err = expression.evaluate(json!({}), None).await.unwrap_err();
    assert_eq!(err.code(), F1000);

    let report = expression.evaluate_verbose(json!({}), None).await;
    assert!(!report.ok);
    assert_eq!(report.status, 500);
    assert_eq!(report.diagnostics.len(), 1);
    assert!(report.result.is_undefined());
}

#[tokio::test]
async fn test_package_context_is_part_of_identity() {
    let engine = FlashEngine::new(EngineConfig::default());
    let other = Arc::new(
        InMemoryNavigator::clone(&navigator()).with_packages(["hl7.fhir.r5.core@5.0.0"]),
    );

    let r4 = engine
        .compile(PATIENT, CompileOptions::new().with_navigator(navigator()))
        .await
        .unwrap();
    let r5 = engine
        .compile(PATIENT, CompileOptions::new().with_navigator(other))
        .await
        .unwrap();

    assert_ne!(r4.identity(), r5.identity());
    assert_eq!(engine.compile_count(), 2);
}

#[tokio::test]
async fn test_mapping_builds_instances() {
    let engine = FlashEngine::new(EngineConfig::default());
    let repository = InMemoryMappingRepository::new();
    repository.insert("toName", "InstanceOf: HumanName\n* family = $");

    let expression = engine
        .compile(
            "people.$toName(last)",
            CompileOptions::new()
                .with_navigator(navigator())
                .with_mapping_repository(Arc::new(repository)),
        )
        .await
        .unwrap();

    let input = json!({"people": [{"last": "Doe"}, {"last": "Roe"}]});
    let result = expression.evaluate(input, None).await.unwrap();
    assert_eq!(
        result,
        Value::from(json!([{"family": "Doe"}, {"family": "Roe"}]))
    );
}
