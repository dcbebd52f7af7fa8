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

//! Verbose evaluation reports

use serde::Serialize;
use uuid::Uuid;

use super::{Diagnostic, Policy, Severity};
use crate::core::error_code::*;
use crate::core::{ErrorCode, Value};

/// Structured outcome of a verbose evaluation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerboseReport {
    pub ok: bool,
    /// HTTP-like status derived from the worst failing condition
    pub status: u16,
    /// Result of the evaluation; partial when conditions were suppressed
    pub result: Value,
    pub diagnostics: Vec<Diagnostic>,
    pub execution_id: Uuid,
}

/// HTTP-like status for a failing condition code
pub fn status_for(code: ErrorCode) -> u16 {
    match code {
        F3001 | F5102 => 404,
        F3002 | F5104 | F5201 => 502,
        F5101 => 504,
        F5103 => 409,
        F1000 | F5100 | F5200 | U1001 => 500,
        code if code.as_str().starts_with('S') => 400,
        code if code.as_str().starts_with('X') => 500,
        _ => 422,
    }
}

impl VerboseReport {
    /// Build the report from the result and the ordered diagnostics.
    ///
    /// `policy` is the policy the caller would have evaluated under; a
    /// diagnostic fails the report when that policy would have thrown it.
    /// Lower severity diagnostics leave `ok` untouched and are dropped from
    /// a passing report unless the policy keeps them.
    pub fn build(
        result: Value,
        diagnostics: Vec<Diagnostic>,
        policy: &Policy,
        execution_id: Uuid,
    ) -> Self {
        let failing_level = policy.throw_level;
        let worst = diagnostics
            .iter()
            .filter(|d| failing_level.is_some_and(|level| d.severity >= level))
            .fold(None::<&Diagnostic>, |worst, d| match worst {
                Some(w) if w.severity >= d.severity => Some(w),
                _ => Some(d),
            });

        match worst {
            Some(worst) => Self {
                ok: false,
                status: status_for(worst.code),
                result,
                diagnostics,
                execution_id,
            },
            None => Self {
                ok: true,
                status: 200,
                result,
                diagnostics: if policy.keep_passing_diagnostics {
                    diagnostics
                } else {
                    Vec::new()
                },
                execution_id,
            },
        }
    }

    /// Worst severity among the diagnostics
    pub fn worst_severity(&self) -> Option<Severity> {
        self.diagnostics.iter().map(|d| d.severity).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FlashError;
    use rstest::rstest;

    fn diagnostic(error: FlashError) -> Diagnostic {
        Diagnostic::new(error, vec![], Uuid::nil())
    }

    #[rstest]
    #[case(S0201, 400)]
    #[case(F1000, 500)]
    #[case(F3001, 404)]
    #[case(F3002, 502)]
    #[case(F3003, 422)]
    #[case(F5101, 504)]
    #[case(F5103, 409)]
    #[case(T2001, 422)]
    #[case(X0001, 500)]
    fn test_status_mapping(#[case] code: ErrorCode, #[case] status: u16) {
        assert_eq!(status_for(code), status);
    }

    #[test]
    fn test_clean_report() {
        let report = VerboseReport::build(Value::from(7.0), vec![], &Policy::default(), Uuid::nil());
        assert!(report.ok);
        assert_eq!(report.status, 200);
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let diagnostics = vec![diagnostic(FlashError::evaluation(W0001, "note"))];
        let report = VerboseReport::build(Value::Undefined, diagnostics, &Policy::default(), Uuid::nil());
        assert!(report.ok);
        assert_eq!(report.diagnostics.len(), 1);
    }

    #[test]
    fn test_passing_report_can_drop_warnings() {
        let policy = Policy::default().with_passing_diagnostics(false);
        let diagnostics = vec![diagnostic(FlashError::evaluation(W0001, "note"))];
        let report = VerboseReport::build(Value::Undefined, diagnostics, &policy, Uuid::nil());
        assert!(report.ok);
        assert!(report.diagnostics.is_empty());

        // a failing report always lists everything
        let diagnostics = vec![
            diagnostic(FlashError::evaluation(W0001, "note")),
            diagnostic(FlashError::evaluation(D3137, "boom")),
        ];
        let report = VerboseReport::build(Value::Undefined, diagnostics, &policy, Uuid::nil());
        assert!(!report.ok);
        assert_eq!(report.diagnostics.len(), 2);
    }

    #[test]
    fn test_worst_condition_sets_status() {
        let diagnostics = vec![
            diagnostic(FlashError::mapping(F3001, "a", "not found")),
            diagnostic(FlashError::evaluation(U1001, "too deep")),
            diagnostic(FlashError::mapping(F3002, "b", "fetch failed")),
        ];
        let report = VerboseReport::build(Value::Undefined, diagnostics, &Policy::default(), Uuid::nil());
        assert!(!report.ok);
        assert_eq!(report.status, 500);
    }

    #[test]
    fn test_serialized_shape() {
        let report = VerboseReport::build(Value::from("x"), vec![], &Policy::default(), Uuid::nil());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["result"], "x");
        assert!(json.get("executionId").is_some());
    }
}
