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

//! Structural cache keys for compiled expressions

use serde::Serialize;
use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use crate::core::MemoryFootprint;

/// Version of the expression language, part of every identity
pub const LANGUAGE_VERSION: &str = concat!("flash/", env!("CARGO_PKG_VERSION"));

/// Cache key of a compiled expression.
///
/// Equality and hashing are structural over every field, so two identities
/// built from the same inputs are interchangeable. The recover flag is
/// always part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionIdentity {
    language_version: &'static str,
    source: Arc<str>,
    recover: bool,
    schema_context: Option<Vec<String>>,
}

impl ExpressionIdentity {
    pub fn language_version(&self) -> &'static str {
        self.language_version
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn recover(&self) -> bool {
        self.recover
    }

    /// Package identifiers of the schema context, in order
    pub fn schema_context(&self) -> Option<&[String]> {
        self.schema_context.as_deref()
    }
}

/// Build the identity for a source and its compilation-affecting options.
///
/// Never fails: a malformed source yields an identity whose compilation
/// fails later.
pub fn build_identity(
    source: &str,
    recover: bool,
    schema_context: Option<&[String]>,
) -> ExpressionIdentity {
    ExpressionIdentity {
        language_version: LANGUAGE_VERSION,
        source: Arc::from(source),
        recover,
        schema_context: schema_context.map(<[String]>::to_vec),
    }
}

impl fmt::Display for ExpressionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 40;
        let preview: String = self.source.chars().take(PREVIEW).collect();
        let ellipsis = if self.source.chars().count() > PREVIEW { "..." } else { "" };
        write!(f, "{:?}{}", preview, ellipsis)?;
        if self.recover {
            f.write_str(" [recover]")?;
        }
        if let Some(context) = &self.schema_context {
            write!(f, " [{}]", context.join(", "))?;
        }
        Ok(())
    }
}

impl MemoryFootprint for ExpressionIdentity {
    fn heap_size(&self) -> usize {
        2 * size_of::<usize>() + self.source.len() + self.schema_context.heap_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(identity: &ExpressionIdentity) -> u64 {
        let mut hasher = DefaultHasher::new();
        identity.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_same_inputs_are_equal() {
        let context = vec!["hl7.fhir.r4.core@4.0.1".to_string()];
        let a = build_identity("1 + 2", true, Some(&context));
        let b = build_identity(&String::from("1 + 2"), true, Some(&context.clone()));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_recover_flag_differentiates() {
        assert_ne!(build_identity("x", true, None), build_identity("x", false, None));
    }

    #[test]
    fn test_schema_context_differentiates() {
        let r4 = vec!["hl7.fhir.r4.core@4.0.1".to_string()];
        let r5 = vec!["hl7.fhir.r5.core@5.0.0".to_string()];
        assert_ne!(build_identity("x", false, Some(&r4)), build_identity("x", false, Some(&r5)));
        assert_ne!(build_identity("x", false, Some(&r4)), build_identity("x", false, None));
        assert_ne!(build_identity("x", false, Some(&[])), build_identity("x", false, None));
    }

    #[test]
    fn test_context_order_matters() {
        let ab = vec!["a".to_string(), "b".to_string()];
        let ba = vec!["b".to_string(), "a".to_string()];
        assert_ne!(build_identity("x", false, Some(&ab)), build_identity("x", false, Some(&ba)));
    }
}
