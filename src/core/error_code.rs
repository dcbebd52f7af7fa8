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

//! Namespaced error code system
//!
//! Every condition raised by the engine carries one of these codes. The code
//! string is the external compatibility surface: `S0xxx` for syntax errors,
//! `T`/`D`/`U` for base-language type and runtime failures, `F1xxx` for FLASH
//! structure resolution, `F3xxx` for mapping resolution and `F5xxx` for
//! external collaborators.

use serde::{Serialize, Serializer};
use std::fmt;

/// Error categories derived from the code prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Base-language syntax errors (S0xxx)
    Syntax,
    /// Base-language type errors (T0xxx - T2xxx)
    Type,
    /// Base-language runtime errors (D, U)
    Runtime,
    /// User raised conditions (W, I)
    User,
    /// FLASH structure resolution (F1xxx)
    Structure,
    /// Mapping repository resolution (F3xxx)
    MappingResolution,
    /// External collaborators (F5xxx)
    Collaborator,
    /// Cache and inflight bookkeeping (C0xxx)
    Cache,
    /// Internal failures (X0xxx)
    Internal,
}

/// Stable error code such as `S0201` or `F3001`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(&'static str);

impl ErrorCode {
    /// Create a new error code from its static string form
    pub const fn new(code: &'static str) -> Self {
        Self(code)
    }

    /// The code string, e.g. `"F3001"`
    pub const fn as_str(&self) -> &'static str {
        self.0
    }

    /// Get error information from the registry
    pub fn info(&self) -> &'static ErrorInfo {
        ERROR_REGISTRY
            .iter()
            .find(|info| info.code == self.0)
            .unwrap_or(&UNKNOWN_ERROR_INFO)
    }

    /// Get the category of this code
    pub fn category(&self) -> ErrorCategory {
        let bytes = self.0.as_bytes();
        match bytes.first() {
            Some(b'S') => ErrorCategory::Syntax,
            Some(b'T') => ErrorCategory::Type,
            Some(b'D') | Some(b'U') => ErrorCategory::Runtime,
            Some(b'W') | Some(b'I') => ErrorCategory::User,
            Some(b'C') => ErrorCategory::Cache,
            Some(b'F') => match bytes.get(1) {
                Some(b'1') => ErrorCategory::Structure,
                Some(b'3') => ErrorCategory::MappingResolution,
                Some(b'5') => ErrorCategory::Collaborator,
                _ => ErrorCategory::Internal,
            },
            _ => ErrorCategory::Internal,
        }
    }

    /// Human-readable title of this code
    pub fn description(&self) -> &'static str {
        self.info().title
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

/// Static documentation attached to an error code
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Code string
    pub code: &'static str,
    /// Short title
    pub title: &'static str,
    /// Help text with a suggested fix
    pub help: &'static str,
}

impl ErrorInfo {
    const fn new(code: &'static str, title: &'static str, help: &'static str) -> Self {
        Self { code, title, help }
    }
}

// Syntax
pub const S0101: ErrorCode = ErrorCode::new("S0101");
pub const S0102: ErrorCode = ErrorCode::new("S0102");
pub const S0103: ErrorCode = ErrorCode::new("S0103");
pub const S0104: ErrorCode = ErrorCode::new("S0104");
pub const S0105: ErrorCode = ErrorCode::new("S0105");
pub const S0106: ErrorCode = ErrorCode::new("S0106");
pub const S0201: ErrorCode = ErrorCode::new("S0201");
pub const S0202: ErrorCode = ErrorCode::new("S0202");
pub const S0203: ErrorCode = ErrorCode::new("S0203");
pub const S0204: ErrorCode = ErrorCode::new("S0204");
pub const S0211: ErrorCode = ErrorCode::new("S0211");
pub const S0212: ErrorCode = ErrorCode::new("S0212");
pub const S0300: ErrorCode = ErrorCode::new("S0300");

// Types
pub const T0410: ErrorCode = ErrorCode::new("T0410");
pub const T0411: ErrorCode = ErrorCode::new("T0411");
pub const T0412: ErrorCode = ErrorCode::new("T0412");
pub const T1003: ErrorCode = ErrorCode::new("T1003");
pub const T1006: ErrorCode = ErrorCode::new("T1006");
pub const T2001: ErrorCode = ErrorCode::new("T2001");
pub const T2002: ErrorCode = ErrorCode::new("T2002");
pub const T2009: ErrorCode = ErrorCode::new("T2009");
pub const T2010: ErrorCode = ErrorCode::new("T2010");

// Runtime
pub const D1001: ErrorCode = ErrorCode::new("D1001");
pub const D3137: ErrorCode = ErrorCode::new("D3137");
pub const D3141: ErrorCode = ErrorCode::new("D3141");
pub const U1001: ErrorCode = ErrorCode::new("U1001");

// User raised
pub const W0001: ErrorCode = ErrorCode::new("W0001");
pub const I0001: ErrorCode = ErrorCode::new("I0001");

// FLASH structure resolution
pub const F1000: ErrorCode = ErrorCode::new("F1000");
pub const F1001: ErrorCode = ErrorCode::new("F1001");
pub const F1002: ErrorCode = ErrorCode::new("F1002");
pub const F1003: ErrorCode = ErrorCode::new("F1003");

// Mapping resolution
pub const F3000: ErrorCode = ErrorCode::new("F3000");
pub const F3001: ErrorCode = ErrorCode::new("F3001");
pub const F3002: ErrorCode = ErrorCode::new("F3002");
pub const F3003: ErrorCode = ErrorCode::new("F3003");
pub const F3004: ErrorCode = ErrorCode::new("F3004");

// External collaborators
pub const F5100: ErrorCode = ErrorCode::new("F5100");
pub const F5101: ErrorCode = ErrorCode::new("F5101");
pub const F5102: ErrorCode = ErrorCode::new("F5102");
pub const F5103: ErrorCode = ErrorCode::new("F5103");
pub const F5104: ErrorCode = ErrorCode::new("F5104");
pub const F5200: ErrorCode = ErrorCode::new("F5200");
pub const F5201: ErrorCode = ErrorCode::new("F5201");

// Cache
pub const C0001: ErrorCode = ErrorCode::new("C0001");
pub const C0002: ErrorCode = ErrorCode::new("C0002");

// Internal
pub const X0001: ErrorCode = ErrorCode::new("X0001");

static UNKNOWN_ERROR_INFO: ErrorInfo =
    ErrorInfo::new("X0000", "Unknown error", "No documentation exists for this code");

static ERROR_REGISTRY: &[ErrorInfo] = &[
    ErrorInfo::new("S0101", "String literal must be terminated by a matching quote", "Close the string literal"),
    ErrorInfo::new("S0102", "Number out of range", "Use a smaller numeric literal"),
    ErrorInfo::new("S0103", "Unsupported escape sequence", "Valid escapes are \\\" \\\\ \\/ \\b \\f \\n \\r \\t \\u"),
    ErrorInfo::new("S0104", "The escape sequence \\u must be followed by 4 hex digits", "Write unicode escapes as \\uXXXX"),
    ErrorInfo::new("S0105", "Quoted property name must be terminated with a backquote", "Close the quoted name with `"),
    ErrorInfo::new("S0106", "Comment has no closing tag", "Close the comment with */"),
    ErrorInfo::new("S0201", "Syntax error", "Check the expression near the reported position"),
    ErrorInfo::new("S0202", "Expected a different token", "Insert the expected token"),
    ErrorInfo::new("S0203", "Expected token before end of expression", "The expression ended too early"),
    ErrorInfo::new("S0204", "Unknown operator", "Check the operator spelling"),
    ErrorInfo::new("S0211", "The symbol cannot be used as a unary operator", "Only - is a unary operator"),
    ErrorInfo::new("S0212", "The left side of := must be a variable name", "Assign to a $variable"),
    ErrorInfo::new("S0300", "Malformed FLASH block", "Rules must have the form `* path = expression`"),
    ErrorInfo::new("T0410", "Argument does not match function signature", "Check the argument types"),
    ErrorInfo::new("T0411", "Missing required argument", "Supply every non-optional argument"),
    ErrorInfo::new("T0412", "Too many arguments", "Remove the extra arguments"),
    ErrorInfo::new("T1003", "Key in object structure must evaluate to a string", "Use string keys"),
    ErrorInfo::new("T1006", "Attempted to invoke a non-function", "Check the function name"),
    ErrorInfo::new("T2001", "The left side of the arithmetic operator must evaluate to a number", "Convert the operand with $number()"),
    ErrorInfo::new("T2002", "The right side of the arithmetic operator must evaluate to a number", "Convert the operand with $number()"),
    ErrorInfo::new("T2009", "The values either side of the operator must be of the same data type", "Compare numbers with numbers and strings with strings"),
    ErrorInfo::new("T2010", "The expressions either side of the operator must evaluate to numbers or strings", "Only numbers and strings are ordered"),
    ErrorInfo::new("D1001", "Number out of range", "The result is not a finite number"),
    ErrorInfo::new("D3137", "Error raised by $error()", "See the message supplied to $error()"),
    ErrorInfo::new("D3141", "Assertion failed", "See the message supplied to $assert()"),
    ErrorInfo::new("U1001", "Stack overflow", "Check for unbounded recursion between mappings"),
    ErrorInfo::new("W0001", "Warning raised by $warning()", "See the supplied message"),
    ErrorInfo::new("I0001", "Information raised by $info()", "See the supplied message"),
    ErrorInfo::new("F1000", "FLASH content requires a structure navigator", "Pass a navigator in the compile options"),
    ErrorInfo::new("F1001", "FLASH type could not be resolved", "Check the InstanceOf: declaration and package context"),
    ErrorInfo::new("F1002", "Element not found on FLASH type", "Check the rule path against the type definition"),
    ErrorInfo::new("F1003", "Structure navigator failed", "Inspect the navigator error"),
    ErrorInfo::new("F3000", "Could not list mapping repository keys", "Repository lookups fall back to direct fetches"),
    ErrorInfo::new("F3001", "Mapping not found", "Check the mapping name or the repository contents"),
    ErrorInfo::new("F3002", "Failed to fetch mapping", "Check the mapping repository availability"),
    ErrorInfo::new("F3003", "Syntax error in mapping", "Fix the stored mapping source"),
    ErrorInfo::new("F3004", "Error evaluating mapping", "Inspect the cause attached to this error"),
    ErrorInfo::new("F5100", "FHIR client not configured", "Pass a client in the compile options"),
    ErrorInfo::new("F5101", "FHIR client call timed out", "Raise the collaborator timeout or check the server"),
    ErrorInfo::new("F5102", "Resource not found", "Check the reference or search parameters"),
    ErrorInfo::new("F5103", "Multiple resources found where one was expected", "Narrow the search parameters"),
    ErrorInfo::new("F5104", "FHIR client call failed", "Inspect the cause attached to this error"),
    ErrorInfo::new("F5200", "Terminology runtime not configured", "Pass a terminology runtime in the compile options"),
    ErrorInfo::new("F5201", "Terminology operation failed", "Inspect the cause attached to this error"),
    ErrorInfo::new("C0001", "Cache read failed", "Compilation falls back to direct parsing"),
    ErrorInfo::new("C0002", "Cache write failed", "The compiled expression was not cached"),
    ErrorInfo::new("X0001", "Internal failure", "Please report this as a bug"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(S0201.category(), ErrorCategory::Syntax);
        assert_eq!(T2001.category(), ErrorCategory::Type);
        assert_eq!(U1001.category(), ErrorCategory::Runtime);
        assert_eq!(F1000.category(), ErrorCategory::Structure);
        assert_eq!(F3003.category(), ErrorCategory::MappingResolution);
        assert_eq!(F5101.category(), ErrorCategory::Collaborator);
        assert_eq!(C0002.category(), ErrorCategory::Cache);
    }

    #[test]
    fn test_every_code_is_documented() {
        for code in [S0101, S0300, T0410, T2010, D3141, W0001, F1003, F3004, F5201, C0001, X0001] {
            assert_eq!(code.info().code, code.as_str());
        }
        assert_eq!(ErrorCode::new("Z9999").description(), "Unknown error");
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&F3001).unwrap();
        assert_eq!(json, "\"F3001\"");
    }
}
