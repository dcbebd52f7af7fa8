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

//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::policy::{Policy, Severity};

/// Bounds of the default compilation cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Maximum number of cached expressions; `None` for no count bound
    pub max_entries: Option<usize>,
    /// Maximum estimated bytes of cached expressions; `None` for no size bound
    pub max_size_bytes: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: Some(1000),
            max_size_bytes: Some(64 * 1024 * 1024),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub cache: CacheConfig,
    /// Default policy of compiled expressions
    pub policy: Policy,
    /// Maximum nesting of function and mapping invocations
    pub max_depth: usize,
    /// Deadline of each FHIR client or terminology call
    pub collaborator_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            policy: Policy::default(),
            max_depth: 100,
            collaborator_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

/// Builder for [`EngineConfig`] with fluent API
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached expressions
    pub fn with_max_entries(mut self, max_entries: Option<usize>) -> Self {
        self.config.cache.max_entries = max_entries;
        self
    }

    /// Set the maximum estimated size of the cache in bytes
    pub fn with_max_size_bytes(mut self, max_size_bytes: Option<usize>) -> Self {
        self.config.cache.max_size_bytes = max_size_bytes;
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Set the severity at or above which conditions fail an evaluation
    pub fn with_throw_level(mut self, level: Option<Severity>) -> Self {
        self.config.policy.throw_level = level;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.config.max_depth = max_depth;
        self
    }

    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.config.collaborator_timeout = timeout;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
