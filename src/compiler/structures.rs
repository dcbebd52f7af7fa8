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

//! Compile-time resolution of FLASH structures

use indexmap::IndexMap;
use serde::Serialize;
use std::mem::size_of;

use crate::ast::ExpressionNode;
use crate::core::error::*;
use crate::core::MemoryFootprint;
use crate::providers::{ElementMeta, Navigator, NavigatorError, TypeMeta};

/// Types and elements referenced by the FLASH blocks of one expression
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedStructures {
    types: IndexMap<String, TypeMeta>,
    /// Keyed by `Type.dotted.path`, one entry per path prefix
    elements: IndexMap<String, ElementMeta>,
}

impl ResolvedStructures {
    pub fn type_meta(&self, name: &str) -> Option<&TypeMeta> {
        self.types.get(name)
    }

    pub fn element(&self, type_name: &str, path: &str) -> Option<&ElementMeta> {
        self.elements.get(&element_key(type_name, path))
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

fn element_key(type_name: &str, path: &str) -> String {
    format!("{}.{}", type_name, path)
}

fn navigator_failure(error: NavigatorError, type_name: &str, path: Option<&str>) -> FlashError {
    FlashError::structure(
        F1003,
        error.to_string(),
        Some(type_name.to_string()),
        path.map(str::to_string),
    )
}

/// Resolve the `InstanceOf:` type of every FLASH block and every prefix of
/// every rule path
pub async fn resolve_structures(
    ast: &ExpressionNode,
    navigator: &dyn Navigator,
) -> Result<ResolvedStructures> {
    let mut resolved = ResolvedStructures::default();
    for block in ast.flash_blocks() {
        let type_name = block.instance_of.as_str();
        let type_meta = match resolved.types.get(type_name) {
            Some(type_meta) => type_meta.clone(),
            None => {
                let type_meta = navigator
                    .resolve_type(type_name)
                    .await
                    .map_err(|e| navigator_failure(e, type_name, None))?
                    .ok_or_else(|| {
                        FlashError::structure(
                            F1001,
                            format!("Could not resolve type '{}'", type_name),
                            Some(type_name.to_string()),
                            None,
                        )
                    })?;
                resolved.types.insert(type_name.to_string(), type_meta.clone());
                type_meta
            }
        };

        for rule in &block.rules {
            let mut prefix = String::new();
            for segment in rule.path.split('.') {
                if !prefix.is_empty() {
                    prefix.push('.');
                }
                prefix.push_str(segment);
                let key = element_key(type_name, &prefix);
                if resolved.elements.contains_key(&key) {
                    continue;
                }
                let element = navigator
                    .resolve_element(&type_meta, &prefix)
                    .await
                    .map_err(|e| navigator_failure(e, type_name, Some(&prefix)))?
                    .ok_or_else(|| {
                        FlashError::structure(
                            F1002,
                            format!("Element '{}' not found on type '{}'", prefix, type_name),
                            Some(type_name.to_string()),
                            Some(prefix.clone()),
                        )
                    })?;
                resolved.elements.insert(key, element);
            }
        }
    }
    log::debug!(
        "resolved {} types and {} elements",
        resolved.type_count(),
        resolved.element_count()
    );
    Ok(resolved)
}

impl MemoryFootprint for ResolvedStructures {
    fn heap_size(&self) -> usize {
        let types: usize = self
            .types
            .iter()
            .map(|(k, t)| k.heap_size() + size_of::<TypeMeta>() + t.name.heap_size() + t.url.heap_size())
            .sum();
        let elements: usize = self
            .elements
            .iter()
            .map(|(k, e)| {
                k.heap_size() + size_of::<ElementMeta>() + e.path.heap_size() + e.type_code.heap_size()
            })
            .sum();
        types + elements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::providers::{InMemoryNavigator, StructureKind};

    fn navigator() -> InMemoryNavigator {
        InMemoryNavigator::new()
            .with_type(TypeMeta::new("Patient", StructureKind::Resource))
            .with_element("Patient", "name", "HumanName", true)
            .with_element("Patient", "name.family", "string", false)
            .with_element("Patient", "active", "boolean", false)
    }

    #[tokio::test]
    async fn test_resolves_every_prefix() {
        let ast = parse("InstanceOf: Patient\n* name.family = 'Doe'\n* active = true").unwrap();
        let resolved = resolve_structures(&ast, &navigator()).await.unwrap();
        assert!(resolved.type_meta("Patient").unwrap().is_resource());
        assert!(resolved.element("Patient", "name").unwrap().is_array);
        assert!(!resolved.element("Patient", "name.family").unwrap().is_array);
        assert_eq!(resolved.element_count(), 3);
    }

    #[tokio::test]
    async fn test_unknown_type_and_element() {
        let ast = parse("InstanceOf: Unicorn\n* horn = 1").unwrap();
        let err = resolve_structures(&ast, &navigator()).await.unwrap_err();
        assert_eq!(err.code(), F1001);

        let ast = parse("InstanceOf: Patient\n* wings = 2").unwrap();
        let err = resolve_structures(&ast, &navigator()).await.unwrap_err();
        assert_eq!(err.code(), F1002);
    }
}
