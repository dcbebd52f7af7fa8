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

//! Severity policy
//!
//! Every condition raised during evaluation is classified by its severity
//! against the configured thresholds. A condition at or above the throw
//! level fails the evaluation; anything below is replaced by an undefined
//! result and, when a collector is active, recorded as a [`Diagnostic`].

mod report;
mod severity;

pub use report::{VerboseReport, status_for};
pub use severity::Severity;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{ErrorCode, FlashError};

/// Thresholds deciding what happens to a raised condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Policy {
    /// Conditions at or above this level fail the evaluation; `None` never throws
    pub throw_level: Option<Severity>,
    /// Conditions at or above this level are recorded when a collector is active
    pub collect_level: Severity,
    /// Conditions at or above this level are written to the logger
    pub log_level: Severity,
    /// Keep below-threshold diagnostics in a passing verbose report
    pub keep_passing_diagnostics: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            throw_level: Some(Severity::Error),
            collect_level: Severity::Warning,
            log_level: Severity::Warning,
            keep_passing_diagnostics: true,
        }
    }
}

/// What to do with one condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposition {
    pub throw: bool,
    pub collect: bool,
    pub log: bool,
}

impl Policy {
    pub fn with_throw_level(mut self, level: Option<Severity>) -> Self {
        self.throw_level = level;
        self
    }

    pub fn with_collect_level(mut self, level: Severity) -> Self {
        self.collect_level = level;
        self
    }

    pub fn with_log_level(mut self, level: Severity) -> Self {
        self.log_level = level;
        self
    }

    /// Whether a passing verbose report lists its warnings
    pub fn with_passing_diagnostics(mut self, keep: bool) -> Self {
        self.keep_passing_diagnostics = keep;
        self
    }

    /// Decide the fate of a condition of the given severity
    pub fn decide(&self, severity: Severity) -> Disposition {
        Disposition {
            throw: self.throws(severity),
            collect: severity >= self.collect_level,
            log: severity >= self.log_level,
        }
    }

    /// Whether a condition of this severity fails the evaluation
    pub fn throws(&self, severity: Severity) -> bool {
        self.throw_level.is_some_and(|level| severity >= level)
    }

    /// Policy used while producing a verbose report: nothing throws and
    /// everything is collected
    pub fn verbose(&self) -> Self {
        Self {
            throw_level: None,
            collect_level: Severity::Debug,
            ..*self
        }
    }
}

/// One recorded condition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// Names of the mappings being evaluated, outermost first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mapping_stack: Vec<String>,
    pub execution_id: Uuid,
    /// The full condition
    pub error: FlashError,
}

impl Diagnostic {
    pub fn new(error: FlashError, mapping_stack: Vec<String>, execution_id: Uuid) -> Self {
        Self {
            code: error.code(),
            severity: error.severity(),
            message: error.message().to_string(),
            position: error.position(),
            mapping_stack,
            execution_id,
            error,
        }
    }
}

/// Ordered diagnostics of one evaluation attempt
#[derive(Debug)]
pub struct DiagnosticsCollector {
    execution_id: Uuid,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticsCollector {
    /// New collector with a fresh execution id
    pub fn new() -> Self {
        Self::with_execution_id(Uuid::new_v4())
    }

    pub fn with_execution_id(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            diagnostics: Mutex::new(Vec::new()),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Record a condition; order of calls is preserved
    pub fn record(&self, error: FlashError, mapping_stack: Vec<String>) {
        let diagnostic = Diagnostic::new(error, mapping_stack, self.execution_id);
        self.diagnostics.lock().push(diagnostic);
    }

    pub fn len(&self) -> usize {
        self.diagnostics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.lock().is_empty()
    }

    /// Diagnostics recorded after the first `mark` ones
    pub fn recorded_since(&self, mark: usize) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .get(mark..)
            .map(<[Diagnostic]>::to_vec)
            .unwrap_or_default()
    }

    /// Copy of the diagnostics recorded so far
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics.into_inner()
    }
}

impl Default for DiagnosticsCollector {
    fn default() -> Self {
        Self::new()
    }
}
