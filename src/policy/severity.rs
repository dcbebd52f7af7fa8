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

//! Condition severity levels

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error_code::*;

/// Severity of a raised condition, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    /// Input that cannot produce a valid result
    Invalid,
    /// Unrecoverable; the construct cannot be processed at all
    Fatal,
}

impl Severity {
    /// Severity of a condition code. Pure function of the code.
    pub fn of(code: ErrorCode) -> Severity {
        match code {
            U1001 | F1000 | F1001 | X0001 => Severity::Fatal,
            F1002 => Severity::Invalid,
            W0001 | F3000 | C0001 | C0002 => Severity::Warning,
            I0001 => Severity::Info,
            code if code.as_str().starts_with('S') => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Invalid => "invalid",
            Severity::Fatal => "fatal",
        }
    }

    /// Matching level of the `log` facade
    pub fn log_level(&self) -> log::Level {
        match self {
            Severity::Debug => log::Level::Debug,
            Severity::Info | Severity::Notice => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error | Severity::Invalid | Severity::Fatal => log::Level::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(S0201, Severity::Fatal)]
    #[case(S0300, Severity::Fatal)]
    #[case(U1001, Severity::Fatal)]
    #[case(F1000, Severity::Fatal)]
    #[case(F1002, Severity::Invalid)]
    #[case(T2001, Severity::Error)]
    #[case(F3001, Severity::Error)]
    #[case(F3004, Severity::Error)]
    #[case(F5101, Severity::Error)]
    #[case(F3000, Severity::Warning)]
    #[case(W0001, Severity::Warning)]
    #[case(C0002, Severity::Warning)]
    #[case(I0001, Severity::Info)]
    fn test_severity_of_code(#[case] code: ErrorCode, #[case] expected: Severity) {
        assert_eq!(Severity::of(code), expected);
    }

    #[test]
    fn test_ordering() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Invalid);
        assert!(Severity::Invalid < Severity::Fatal);
    }
}
