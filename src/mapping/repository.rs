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

//! Mapping repository contract

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Repository access failure
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("mapping repository unavailable: {0}")]
    Unavailable(String),
    #[error("mapping repository request failed: {0}")]
    Failed(String),
}

/// Store of named expression sources
#[async_trait]
pub trait MappingRepository: Send + Sync {
    /// Names of every stored mapping. Best effort: a failure is reported as
    /// a warning and lookups fall back to [`MappingRepository::get`].
    async fn keys(&self) -> Result<Vec<String>, RepositoryError>;

    /// Source text of a mapping, `None` when the name is unknown
    async fn get(&self, name: &str) -> Result<Option<String>, RepositoryError>;
}

/// Repository held in memory
#[derive(Debug, Default)]
pub struct InMemoryMappingRepository {
    mappings: RwLock<FxHashMap<String, String>>,
}

impl InMemoryMappingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, source: impl Into<String>) {
        self.mappings.write().insert(name.into(), source.into());
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        self.mappings.write().remove(name)
    }

    pub fn len(&self) -> usize {
        self.mappings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<N: Into<String>, S: Into<String>> FromIterator<(N, S)> for InMemoryMappingRepository {
    fn from_iter<I: IntoIterator<Item = (N, S)>>(iter: I) -> Self {
        Self {
            mappings: RwLock::new(
                iter.into_iter()
                    .map(|(name, source)| (name.into(), source.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl MappingRepository for InMemoryMappingRepository {
    async fn keys(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self.mappings.read().keys().cloned().collect())
    }

    async fn get(&self, name: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.mappings.read().get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_repository() {
        let repository: InMemoryMappingRepository =
            [("greeting", "\"Hello, \" & $")].into_iter().collect();
        assert_eq!(repository.keys().await.unwrap(), vec!["greeting".to_string()]);
        assert_eq!(
            repository.get("greeting").await.unwrap().as_deref(),
            Some("\"Hello, \" & $")
        );
        assert_eq!(repository.get("missing").await.unwrap(), None);

        repository.insert("other", "1");
        assert_eq!(repository.len(), 2);
        assert!(repository.remove("other").is_some());
    }
}
