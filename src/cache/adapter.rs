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

//! Cache contract and fault-tolerant adapter
//!
//! Any cache, default or supplied by the caller, is reached through
//! [`CacheAdapter`]. Failures and panics of the underlying cache are logged
//! and turned into misses (get) or no-ops (set), so a broken cache only
//! costs performance.

use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

use super::bounded::BoundedCache;
use super::identity::ExpressionIdentity;
use crate::compiler::SharedCompiled;
use crate::core::error_code::{C0001, C0002};
use crate::core::FlashError;

/// Failure reported by a cache implementation
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache backend failure: {0}")]
    Backend(String),
    #[error("cache unavailable")]
    Unavailable,
}

/// Contract of a compilation cache.
///
/// Both operations may be left unimplemented, in which case every lookup
/// misses and every write is dropped.
#[async_trait]
pub trait ExpressionCache: Send + Sync {
    async fn get(
        &self,
        _identity: &ExpressionIdentity,
    ) -> Result<Option<SharedCompiled>, CacheError> {
        Ok(None)
    }

    async fn set(
        &self,
        _identity: &ExpressionIdentity,
        _value: SharedCompiled,
    ) -> Result<(), CacheError> {
        Ok(())
    }

    /// Re-check for an entry without counting it as a lookup. Defaults to
    /// [`get`](Self::get).
    async fn peek(
        &self,
        identity: &ExpressionIdentity,
    ) -> Result<Option<SharedCompiled>, CacheError> {
        self.get(identity).await
    }
}

#[async_trait]
impl ExpressionCache for BoundedCache<SharedCompiled> {
    async fn get(
        &self,
        identity: &ExpressionIdentity,
    ) -> Result<Option<SharedCompiled>, CacheError> {
        Ok(BoundedCache::get(self, identity))
    }

    async fn set(
        &self,
        identity: &ExpressionIdentity,
        value: SharedCompiled,
    ) -> Result<(), CacheError> {
        BoundedCache::set(self, identity.clone(), value);
        Ok(())
    }

    async fn peek(
        &self,
        identity: &ExpressionIdentity,
    ) -> Result<Option<SharedCompiled>, CacheError> {
        Ok(BoundedCache::peek(self, identity))
    }
}

/// Normalises default, external or absent caches behind one contract
#[derive(Clone, Default)]
pub struct CacheAdapter {
    backend: Option<Arc<dyn ExpressionCache>>,
}

impl CacheAdapter {
    pub fn new(backend: Arc<dyn ExpressionCache>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Adapter without a cache: every lookup misses
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Cached value, or `None` on a miss or any cache failure
    pub async fn get(&self, identity: &ExpressionIdentity) -> Option<SharedCompiled> {
        let backend = self.backend.as_ref()?;
        Self::settle(backend.get(identity), identity).await
    }

    /// Like [`get`](Self::get) but not counted in the cache statistics
    pub async fn peek(&self, identity: &ExpressionIdentity) -> Option<SharedCompiled> {
        let backend = self.backend.as_ref()?;
        Self::settle(backend.peek(identity), identity).await
    }

    async fn settle(
        lookup: impl Future<Output = Result<Option<SharedCompiled>, CacheError>>,
        identity: &ExpressionIdentity,
    ) -> Option<SharedCompiled> {
        match AssertUnwindSafe(lookup).catch_unwind().await {
            Ok(Ok(value)) => value,
            Ok(Err(error)) => {
                let error = FlashError::cache(C0001, error.to_string());
                log::warn!("{}; compiling {} without cache", error, identity);
                None
            }
            Err(_) => {
                log::warn!("{}: cache get panicked for {}", C0001, identity);
                None
            }
        }
    }

    /// Store a value; failures are logged and otherwise ignored
    pub async fn set(&self, identity: &ExpressionIdentity, value: SharedCompiled) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        match AssertUnwindSafe(backend.set(identity, value)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                let error = FlashError::cache(C0002, error.to_string());
                log::warn!("{}; {} not cached", error, identity);
            }
            Err(_) => log::warn!("{}: cache set panicked for {}", C0002, identity),
        }
    }
}

impl std::fmt::Debug for CacheAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAdapter")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
