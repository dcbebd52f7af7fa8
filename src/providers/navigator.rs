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

//! Structure navigation used to compile FLASH blocks

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::Serialize;
use thiserror::Error;

/// Navigator failure
#[derive(Debug, Clone, Error)]
pub enum NavigatorError {
    #[error("navigator unavailable: {0}")]
    Unavailable(String),
    #[error("navigator lookup failed: {0}")]
    Failed(String),
}

/// Kind of a structure definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureKind {
    Resource,
    ComplexType,
    PrimitiveType,
    Logical,
}

/// Resolved type of a FLASH `InstanceOf:` declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    pub name: String,
    pub kind: StructureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl TypeMeta {
    pub fn new(name: impl Into<String>, kind: StructureKind) -> Self {
        Self {
            name: name.into(),
            kind,
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn is_resource(&self) -> bool {
        self.kind == StructureKind::Resource
    }
}

/// Resolved element of a type, addressed by dotted path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementMeta {
    pub path: String,
    /// Type code of the element, e.g. `HumanName` or `string`
    pub type_code: String,
    /// Whether the element repeats (max cardinality above one)
    pub is_array: bool,
}

impl ElementMeta {
    pub fn new(path: impl Into<String>, type_code: impl Into<String>, is_array: bool) -> Self {
        Self {
            path: path.into(),
            type_code: type_code.into(),
            is_array,
        }
    }
}

/// Schema navigator consulted when compiling FLASH content
#[async_trait]
pub trait Navigator: Send + Sync {
    /// Ordered package identifiers this navigator resolves against. Part of
    /// the cache identity of every expression compiled with it.
    fn package_context(&self) -> Option<Vec<String>> {
        None
    }

    async fn resolve_type(&self, name: &str) -> Result<Option<TypeMeta>, NavigatorError>;

    /// Resolve a dotted element path relative to `type_meta`
    async fn resolve_element(
        &self,
        type_meta: &TypeMeta,
        path: &str,
    ) -> Result<Option<ElementMeta>, NavigatorError>;
}

/// Navigator over a fixed set of definitions
#[derive(Debug, Default, Clone)]
pub struct InMemoryNavigator {
    packages: Option<Vec<String>>,
    types: FxHashMap<String, TypeMeta>,
    elements: FxHashMap<(String, String), ElementMeta>,
}

impl InMemoryNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages = Some(packages.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_type(mut self, type_meta: TypeMeta) -> Self {
        self.types.insert(type_meta.name.clone(), type_meta);
        self
    }

    pub fn with_element(
        mut self,
        type_name: &str,
        path: &str,
        type_code: &str,
        is_array: bool,
    ) -> Self {
        self.elements.insert(
            (type_name.to_string(), path.to_string()),
            ElementMeta::new(path, type_code, is_array),
        );
        self
    }
}

#[async_trait]
impl Navigator for InMemoryNavigator {
    fn package_context(&self) -> Option<Vec<String>> {
        self.packages.clone()
    }

    async fn resolve_type(&self, name: &str) -> Result<Option<TypeMeta>, NavigatorError> {
        Ok(self.types.get(name).cloned())
    }

    async fn resolve_element(
        &self,
        type_meta: &TypeMeta,
        path: &str,
    ) -> Result<Option<ElementMeta>, NavigatorError> {
        Ok(self
            .elements
            .get(&(type_meta.name.clone(), path.to_string()))
            .cloned())
    }
}
