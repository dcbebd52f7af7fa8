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

//! Integration tests for verbose evaluation and severity policies

use octofhir_flash::core::error_code::*;
use octofhir_flash::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

async fn compile(source: &str, options: CompileOptions) -> Expression {
    FlashEngine::new(EngineConfig::default())
        .compile(source, options)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_warnings_keep_report_ok() {
    let expression = compile("($warning('careful'); 42)", CompileOptions::new()).await;

    let report = expression.evaluate_verbose(json!({}), None).await;

    assert!(report.ok);
    assert_eq!(report.status, 200);
    assert_eq!(report.result, Value::from(42i64));
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].code, W0001);
    assert_eq!(report.diagnostics[0].severity, Severity::Warning);
    assert_eq!(report.worst_severity(), Some(Severity::Warning));
}

#[tokio::test]
async fn test_failing_condition_is_reported_not_thrown() {
    let expression = compile("$error('boom')", CompileOptions::new()).await;

    let err = expression.evaluate(json!({}), None).await.unwrap_err();
    assert_eq!(err.code(), D3137);

    let report = expression.evaluate_verbose(json!({}), None).await;
    assert!(!report.ok);
    assert_eq!(report.status, 422);
    assert!(report.result.is_undefined());
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].message, "boom");
}

#[tokio::test]
async fn test_evaluation_continues_past_suppressed_failures() {
    let expression = compile(
        "{\"first\": $error('one'), \"second\": $warning('two'), \"third\": 3}",
        CompileOptions::new(),
    )
    .await;

    let report = expression.evaluate_verbose(json!({}), None).await;

    assert!(!report.ok);
    let codes: Vec<_> = report.diagnostics.iter().map(|d| d.code).collect();
    assert_eq!(codes, vec![D3137, W0001]);
    assert_eq!(report.result, Value::from(json!({"third": 3})));
}

#[tokio::test]
async fn test_recovered_compile_errors_come_first() {
    let expression = compile(
        "($warning('later'); 1 + * 2; 'tail')",
        CompileOptions::new().with_recover(true),
    )
    .await;
    assert_eq!(expression.errors().len(), 1);

    let report = expression.evaluate_verbose(json!({}), None).await;

    assert!(!report.ok);
    assert_eq!(report.status, 400);
    assert_eq!(report.result, Value::from("tail"));
    assert!(report.diagnostics[0].code.as_str().starts_with('S'));
    assert_eq!(report.diagnostics[1].code, W0001);
    assert!(
        report
            .diagnostics
            .iter()
            .all(|d| d.execution_id == report.execution_id)
    );
}

#[tokio::test]
async fn test_mapping_stack_is_recorded() {
    let repository = InMemoryMappingRepository::new();
    repository.insert("careful", "($warning('inside'); $)");
    let expression = compile(
        "$careful(5)",
        CompileOptions::new().with_mapping_repository(Arc::new(repository)),
    )
    .await;

    let report = expression.evaluate_verbose(json!({}), None).await;

    assert!(report.ok);
    assert_eq!(report.result, Value::from(5i64));
    assert_eq!(report.diagnostics[0].mapping_stack, vec!["careful".to_string()]);
}

#[tokio::test]
async fn test_failure_inside_mapping_is_reported_as_mapping_failure() {
    let repository = InMemoryMappingRepository::new();
    repository.insert("outer", "$inner($)");
    repository.insert("inner", "$error('boom')");
    let expression = compile(
        "$outer(1)",
        CompileOptions::new().with_mapping_repository(Arc::new(repository)),
    )
    .await;

    let report = expression.evaluate_verbose(json!({}), None).await;

    assert!(!report.ok);
    assert_eq!(report.status, 422);
    let codes: Vec<_> = report.diagnostics.iter().map(|d| d.code).collect();
    assert_eq!(codes, vec![D3137, F3004]);

    let failure = &report.diagnostics[1];
    assert_eq!(failure.error.mapping_name(), Some("inner"));
    assert_eq!(failure.error.cause().map(FlashError::code), Some(D3137));
    assert_eq!(failure.mapping_stack, vec!["outer".to_string(), "inner".to_string()]);
}

#[tokio::test]
async fn test_suppressed_condition_inside_mapping_is_not_a_failure() {
    let repository = InMemoryMappingRepository::new();
    repository.insert("lenient", "$error('ignored')");
    let policy = Policy::default().with_throw_level(Some(Severity::Fatal));
    let expression = compile(
        "$lenient()",
        CompileOptions::new()
            .with_mapping_repository(Arc::new(repository))
            .with_policy(policy),
    )
    .await;

    let report = expression.evaluate_verbose(json!({}), None).await;

    assert!(report.ok);
    let codes: Vec<_> = report.diagnostics.iter().map(|d| d.code).collect();
    assert_eq!(codes, vec![D3137]);
}

#[tokio::test]
async fn test_passing_report_without_warnings() {
    let policy = Policy::default().with_passing_diagnostics(false);
    let expression = compile("($warning('careful'); 42)", CompileOptions::new().with_policy(policy)).await;

    let report = expression.evaluate_verbose(json!({}), None).await;

    assert!(report.ok);
    assert_eq!(report.result, Value::from(42i64));
    assert!(report.diagnostics.is_empty());
}

#[tokio::test]
async fn test_missing_mapping_status() {
    let expression = compile(
        "$nowhere()",
        CompileOptions::new().with_mapping_repository(Arc::new(InMemoryMappingRepository::new())),
    )
    .await;

    let report = expression.evaluate_verbose(json!({}), None).await;

    assert!(!report.ok);
    assert_eq!(report.status, 404);
    assert_eq!(report.diagnostics[0].code, F3001);
}

#[tokio::test]
async fn test_policy_without_throw_level_never_fails() {
    let policy = Policy::default().with_throw_level(None);
    let expression = compile("$error('ignored')", CompileOptions::new().with_policy(policy)).await;

    assert!(expression.evaluate(json!({}), None).await.unwrap().is_undefined());

    let report = expression.evaluate_verbose(json!({}), None).await;
    assert!(report.ok);
    assert_eq!(report.diagnostics.len(), 1);
}

#[tokio::test]
async fn test_report_serializes_camel_case() {
    let expression = compile("$error('boom')", CompileOptions::new()).await;
    let report = expression.evaluate_verbose(json!({}), None).await;

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["ok"], json!(false));
    assert_eq!(json["status"], json!(422));
    assert!(json.get("executionId").is_some());
    assert_eq!(json["diagnostics"][0]["code"], json!("D3137"));
}
