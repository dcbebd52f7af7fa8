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

//! Core error type with rich error codes and context

use serde::Serialize;
use thiserror::Error;

pub use super::error_code::*;
use crate::policy::Severity;

/// Main error type. Every variant carries a stable [`ErrorCode`] plus the
/// contextual fields relevant to where the condition originated.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FlashError {
    /// Syntax error reported by the parser
    #[error("{code}: {message}")]
    Syntax {
        code: ErrorCode,
        message: String,
        position: Option<usize>,
        token: Option<String>,
    },

    /// Type error raised while evaluating
    #[error("{code}: {message}")]
    Type {
        code: ErrorCode,
        message: String,
        position: Option<usize>,
        value: Option<String>,
    },

    /// Other evaluation failure (including user raised conditions)
    #[error("{code}: {message}")]
    Evaluation {
        code: ErrorCode,
        message: String,
        position: Option<usize>,
    },

    /// Failure resolving, fetching, compiling or running a named mapping
    #[error("{code}: {message}")]
    MappingResolution {
        code: ErrorCode,
        message: String,
        mapping: String,
        cause: Option<Box<FlashError>>,
    },

    /// A required external collaborator was not configured
    #[error("{code}: {message}")]
    CollaboratorMissing {
        code: ErrorCode,
        message: String,
        collaborator: String,
    },

    /// An external collaborator call failed
    #[error("{code}: {message}")]
    Collaborator {
        code: ErrorCode,
        message: String,
        operation: String,
        cause: Option<String>,
    },

    /// FLASH structure resolution failure
    #[error("{code}: {message}")]
    Structure {
        code: ErrorCode,
        message: String,
        type_name: Option<String>,
        path: Option<String>,
    },

    /// Cache operation failure, never fatal
    #[error("{code}: {message}")]
    Cache { code: ErrorCode, message: String },

    /// Internal failure
    #[error("{code}: {message}")]
    Internal { code: ErrorCode, message: String },
}

impl FlashError {
    /// Create a syntax error
    pub fn syntax(code: ErrorCode, message: impl Into<String>, position: usize) -> Self {
        Self::Syntax {
            code,
            message: message.into(),
            position: Some(position),
            token: None,
        }
    }

    /// Create a syntax error pointing at a token
    pub fn syntax_at_token(
        code: ErrorCode,
        message: impl Into<String>,
        position: usize,
        token: impl Into<String>,
    ) -> Self {
        Self::Syntax {
            code,
            message: message.into(),
            position: Some(position),
            token: Some(token.into()),
        }
    }

    /// Create a type error
    pub fn type_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Type {
            code,
            message: message.into(),
            position: None,
            value: None,
        }
    }

    /// Create an evaluation error
    pub fn evaluation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Evaluation {
            code,
            message: message.into(),
            position: None,
        }
    }

    /// Create a mapping resolution error naming the offending mapping
    pub fn mapping(code: ErrorCode, mapping: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MappingResolution {
            code,
            message: message.into(),
            mapping: mapping.into(),
            cause: None,
        }
    }

    /// Create a mapping resolution error wrapping an underlying cause
    pub fn mapping_with_cause(
        code: ErrorCode,
        mapping: impl Into<String>,
        message: impl Into<String>,
        cause: FlashError,
    ) -> Self {
        Self::MappingResolution {
            code,
            message: message.into(),
            mapping: mapping.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Create a missing-collaborator error
    pub fn collaborator_missing(code: ErrorCode, collaborator: impl Into<String>) -> Self {
        let collaborator = collaborator.into();
        Self::CollaboratorMissing {
            code,
            message: format!("{} is not configured", collaborator),
            collaborator,
        }
    }

    /// Create a collaborator operational error
    pub fn collaborator(
        code: ErrorCode,
        operation: impl Into<String>,
        message: impl Into<String>,
        cause: Option<String>,
    ) -> Self {
        Self::Collaborator {
            code,
            message: message.into(),
            operation: operation.into(),
            cause,
        }
    }

    /// Create a structure resolution error
    pub fn structure(
        code: ErrorCode,
        message: impl Into<String>,
        type_name: Option<String>,
        path: Option<String>,
    ) -> Self {
        Self::Structure {
            code,
            message: message.into(),
            type_name,
            path,
        }
    }

    /// Create a cache error
    pub fn cache(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Cache {
            code,
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: X0001,
            message: message.into(),
        }
    }

    /// Attach a source position to errors that track one
    pub fn with_position(mut self, at: usize) -> Self {
        match &mut self {
            Self::Syntax { position, .. }
            | Self::Type { position, .. }
            | Self::Evaluation { position, .. } => {
                if position.is_none() {
                    *position = Some(at);
                }
            }
            _ => {}
        }
        self
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Syntax { code, .. }
            | Self::Type { code, .. }
            | Self::Evaluation { code, .. }
            | Self::MappingResolution { code, .. }
            | Self::CollaboratorMissing { code, .. }
            | Self::Collaborator { code, .. }
            | Self::Structure { code, .. }
            | Self::Cache { code, .. }
            | Self::Internal { code, .. } => *code,
        }
    }

    /// Get the error message without the code prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Syntax { message, .. }
            | Self::Type { message, .. }
            | Self::Evaluation { message, .. }
            | Self::MappingResolution { message, .. }
            | Self::CollaboratorMissing { message, .. }
            | Self::Collaborator { message, .. }
            | Self::Structure { message, .. }
            | Self::Cache { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    /// Source position, when known
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Syntax { position, .. }
            | Self::Type { position, .. }
            | Self::Evaluation { position, .. } => *position,
            _ => None,
        }
    }

    /// Mapping named by a mapping resolution error
    pub fn mapping_name(&self) -> Option<&str> {
        match self {
            Self::MappingResolution { mapping, .. } => Some(mapping),
            _ => None,
        }
    }

    /// Wrapped failure of a mapping resolution error
    pub fn cause(&self) -> Option<&FlashError> {
        match self {
            Self::MappingResolution { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }

    /// Innermost wrapped failure, `self` when nothing is wrapped
    pub fn root_cause(&self) -> &FlashError {
        std::iter::successors(Some(self), |e| e.cause())
            .last()
            .unwrap_or(self)
    }

    /// Severity of this condition.
    ///
    /// Derived from the code alone, except that a mapping failure is never
    /// reported as less severe than the failure it wraps.
    pub fn severity(&self) -> Severity {
        let own = Severity::of(self.code());
        match self {
            Self::MappingResolution {
                cause: Some(cause), ..
            } => own.max(cause.severity()),
            _ => own,
        }
    }
}

/// Result type for engine operations
pub type Result<T, E = FlashError> = std::result::Result<T, E>;
