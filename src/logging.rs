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

//! Pluggable condition logger

use crate::policy::Severity;

/// Log target used by [`LogFacadeLogger`]
pub const LOG_TARGET: &str = "octofhir_flash";

/// Sink for conditions raised during evaluation
pub trait Logger: Send + Sync {
    fn log(&self, severity: Severity, message: &str);

    fn debug(&self, message: &str) {
        self.log(Severity::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(Severity::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(Severity::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(Severity::Error, message);
    }
}

/// Forwards to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacadeLogger;

impl Logger for LogFacadeLogger {
    fn log(&self, severity: Severity, message: &str) {
        log::log!(target: LOG_TARGET, severity.log_level(), "[{}] {}", severity, message);
    }
}
