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

//! Single-flight compilation
//!
//! Concurrent requests for the same identity share one compilation. The
//! first requester registers a record holding a shared future; later
//! requesters await the same future and observe the same `Arc`, or the same
//! error. The record lives exactly as long as the compilation.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::adapter::CacheAdapter;
use super::identity::ExpressionIdentity;
use crate::compiler::{CompiledExpression, SharedCompiled};
use crate::core::{FlashError, Result};

type SharedCompile = Shared<BoxFuture<'static, Result<SharedCompiled>>>;

struct InflightRecord {
    future: SharedCompile,
    /// Requesters attached after the leader; observability only
    waiters: Arc<AtomicUsize>,
}

/// Inflight statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InflightStats {
    /// Identities currently being compiled
    pub active_inflight_requests: usize,
    /// Requesters currently attached to another requester's compilation
    pub waiting_requests: usize,
}

/// Removes the record when the compilation settles, however it ends
struct RecordGuard {
    records: Arc<DashMap<ExpressionIdentity, InflightRecord>>,
    identity: ExpressionIdentity,
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        self.records.remove(&self.identity);
    }
}

/// Registry of compilations in progress
#[derive(Default)]
pub struct InflightCoordinator {
    records: Arc<DashMap<ExpressionIdentity, InflightRecord>>,
}

impl InflightCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `identity`, join a compilation already in
    /// progress, or run `compile` and share its result.
    ///
    /// A successful result is stored through `cache` before the record is
    /// removed. When a tokio runtime is available the compilation runs as a
    /// task, so it completes for the remaining waiters even if the caller
    /// that started it goes away.
    pub async fn get_or_compile<F, Fut>(
        &self,
        cache: &CacheAdapter,
        identity: ExpressionIdentity,
        compile: F,
    ) -> Result<SharedCompiled>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CompiledExpression>> + Send + 'static,
    {
        if let Some(hit) = cache.get(&identity).await {
            log::trace!("cache hit for {}", identity);
            return Ok(hit);
        }

        let (future, waiters) = match self.records.entry(identity.clone()) {
            Entry::Occupied(record) => {
                log::debug!("joining inflight compilation of {}", identity);
                let record = record.get();
                record.waiters.fetch_add(1, Ordering::SeqCst);
                (record.future.clone(), Some(record.waiters.clone()))
            }
            Entry::Vacant(slot) => {
                let future = self.lead(cache.clone(), identity.clone(), compile);
                slot.insert(InflightRecord {
                    future: future.clone(),
                    waiters: Arc::new(AtomicUsize::new(0)),
                });
                (future, None)
            }
        };

        let result = future.await;
        if let Some(waiters) = waiters {
            waiters.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }

    fn lead<F, Fut>(&self, cache: CacheAdapter, identity: ExpressionIdentity, compile: F) -> SharedCompile
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CompiledExpression>> + Send + 'static,
    {
        let guard = RecordGuard {
            records: self.records.clone(),
            identity: identity.clone(),
        };
        let task = async move {
            let _guard = guard;
            // a compilation that finished just before this record was
            // created has already populated the cache; the caller's own
            // lookup already counted the miss
            if let Some(hit) = cache.peek(&identity).await {
                return Ok(hit);
            }
            log::debug!("compiling {}", identity);
            let compiled = Arc::new(compile().await?);
            cache.set(&identity, compiled.clone()).await;
            Ok(compiled)
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(task);
                async move {
                    task.await.unwrap_or_else(|error| {
                        Err(FlashError::internal(format!("compilation task failed: {}", error)))
                    })
                }
                .boxed()
                .shared()
            }
            Err(_) => task.boxed().shared(),
        }
    }

    pub fn stats(&self) -> InflightStats {
        InflightStats {
            active_inflight_requests: self.records.len(),
            waiting_requests: self
                .records
                .iter()
                .map(|record| record.waiters.load(Ordering::SeqCst))
                .sum(),
        }
    }

    pub fn is_inflight(&self, identity: &ExpressionIdentity) -> bool {
        self.records.contains_key(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExpressionNode;
    use crate::cache::{BoundedCache, build_identity};
    use crate::core::error_code::S0201;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn default_cache() -> CacheAdapter {
        CacheAdapter::new(Arc::new(BoundedCache::<SharedCompiled>::with_limits(Some(16), None)))
    }

    fn slow_compile(
        counter: Arc<AtomicU32>,
        result: Result<CompiledExpression>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<CompiledExpression>> + Send + 'static {
        move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                result
            }
            .boxed()
        }
    }

    fn ok_value() -> Result<CompiledExpression> {
        Ok(CompiledExpression::new(ExpressionNode::number(7.0), Vec::new(), None))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_compile() {
        let coordinator = Arc::new(InflightCoordinator::new());
        let cache = default_cache();
        let counter = Arc::new(AtomicU32::new(0));
        let identity = build_identity("1 + 2 * 3", false, None);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let cache = cache.clone();
            let identity = identity.clone();
            let compile = slow_compile(counter.clone(), ok_value());
            handles.push(tokio::spawn(async move {
                coordinator.get_or_compile(&cache, identity, compile).await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
        assert_eq!(coordinator.stats().active_inflight_requests, 0);
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_record_removed() {
        let coordinator = InflightCoordinator::new();
        let cache = default_cache();
        let counter = Arc::new(AtomicU32::new(0));
        let identity = build_identity("$ + + $", false, None);
        let error = FlashError::syntax(S0201, "bad", 2);

        let first = coordinator.get_or_compile(
            &cache,
            identity.clone(),
            slow_compile(counter.clone(), Err(error.clone())),
        );
        let second = coordinator.get_or_compile(
            &cache,
            identity.clone(),
            slow_compile(counter.clone(), Err(error.clone())),
        );
        let (a, b) = futures::join!(first, second);
        assert_eq!(a.unwrap_err(), error);
        assert_eq!(b.unwrap_err(), error);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_inflight(&identity));

        // a later request retries
        let retry = coordinator
            .get_or_compile(&cache, identity, slow_compile(counter.clone(), ok_value()))
            .await;
        assert!(retry.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_registry() {
        let coordinator = InflightCoordinator::new();
        let cache = default_cache();
        let counter = Arc::new(AtomicU32::new(0));
        let identity = build_identity("1", false, None);

        coordinator
            .get_or_compile(&cache, identity.clone(), slow_compile(counter.clone(), ok_value()))
            .await
            .unwrap();
        coordinator
            .get_or_compile(&cache, identity, slow_compile(counter.clone(), ok_value()))
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.stats(), InflightStats::default());
    }

    #[tokio::test]
    async fn test_disabled_cache_compiles_every_time() {
        let coordinator = InflightCoordinator::new();
        let cache = CacheAdapter::disabled();
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let identity = build_identity("1", false, None);
            coordinator
                .get_or_compile(&cache, identity, slow_compile(counter.clone(), ok_value()))
                .await
                .unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
