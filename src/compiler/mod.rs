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

//! Compilation pipeline
//!
//! identity → inflight coordinator (cache check) → parse → FLASH structure
//! resolution. The result is shared read-only by every caller.

mod structures;

pub use structures::{ResolvedStructures, resolve_structures};

use std::mem::size_of;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ast::ExpressionNode;
use crate::cache::{CacheAdapter, ExpressionIdentity, InflightCoordinator, InflightStats, build_identity};
use crate::core::error::*;
use crate::core::MemoryFootprint;
use crate::parser;
use crate::providers::Navigator;

/// Compiled expression: the AST plus the errors found while compiling it
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    ast: Arc<ExpressionNode>,
    errors: Vec<FlashError>,
    resolved: Option<Arc<ResolvedStructures>>,
}

/// Compiled expression as stored in caches
pub type SharedCompiled = Arc<CompiledExpression>;

impl CompiledExpression {
    pub fn new(
        ast: ExpressionNode,
        errors: Vec<FlashError>,
        resolved: Option<ResolvedStructures>,
    ) -> Self {
        Self {
            ast: Arc::new(ast),
            errors,
            resolved: resolved.map(Arc::new),
        }
    }

    pub fn ast(&self) -> &Arc<ExpressionNode> {
        &self.ast
    }

    /// Errors collected in recover mode; empty on a clean compile
    pub fn errors(&self) -> &[FlashError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn resolved_structures(&self) -> Option<&Arc<ResolvedStructures>> {
        self.resolved.as_ref()
    }
}

impl MemoryFootprint for CompiledExpression {
    fn heap_size(&self) -> usize {
        self.ast.heap_size()
            + self.errors.capacity() * size_of::<FlashError>()
            + self.errors.iter().map(|e| e.message().len()).sum::<usize>()
            + self.resolved.heap_size()
    }
}

/// What to compile and how
#[derive(Clone)]
pub struct CompileRequest {
    pub recover: bool,
    pub navigator: Option<Arc<dyn Navigator>>,
}

impl CompileRequest {
    pub fn new(recover: bool, navigator: Option<Arc<dyn Navigator>>) -> Self {
        Self { recover, navigator }
    }

    /// Cache identity of `source` under this request
    pub fn identity(&self, source: &str) -> ExpressionIdentity {
        let context = self.navigator.as_ref().and_then(|n| n.package_context());
        build_identity(source, self.recover, context.as_deref())
    }

    /// Cache identity of a pre-parsed tree: its serialized form stands in
    /// for the source text
    pub fn ast_identity(&self, ast: &ExpressionNode) -> Result<ExpressionIdentity> {
        let serialized = serde_json::to_string(ast)
            .map_err(|e| FlashError::internal(format!("cannot serialize AST: {}", e)))?;
        Ok(self.identity(&serialized))
    }
}

/// Compiles through the inflight coordinator and counts real compilations
#[derive(Default)]
pub struct CompileService {
    coordinator: InflightCoordinator,
    compile_count: AtomicU64,
}

impl CompileService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `source`, sharing concurrent compilations and cached results
    pub async fn compile(
        self: &Arc<Self>,
        cache: &CacheAdapter,
        source: &str,
        request: &CompileRequest,
    ) -> Result<SharedCompiled> {
        let identity = request.identity(source);
        let service = Arc::clone(self);
        let source = source.to_string();
        let request = request.clone();
        self.coordinator
            .get_or_compile(cache, identity, move || async move {
                service.compile_count.fetch_add(1, Ordering::SeqCst);
                let outcome = parser::parse_source(&source, request.recover)?;
                finish(outcome.ast, outcome.errors, &request).await
            })
            .await
    }

    /// Compile an already parsed tree
    pub async fn compile_ast(
        self: &Arc<Self>,
        cache: &CacheAdapter,
        ast: ExpressionNode,
        request: &CompileRequest,
    ) -> Result<SharedCompiled> {
        let identity = request.ast_identity(&ast)?;
        let service = Arc::clone(self);
        let request = request.clone();
        self.coordinator
            .get_or_compile(cache, identity, move || async move {
                service.compile_count.fetch_add(1, Ordering::SeqCst);
                finish(ast, Vec::new(), &request).await
            })
            .await
    }

    /// Number of compilations actually performed
    pub fn compile_count(&self) -> u64 {
        self.compile_count.load(Ordering::SeqCst)
    }

    pub fn inflight_stats(&self) -> InflightStats {
        self.coordinator.stats()
    }
}

/// Resolve FLASH structures when the tree has FLASH blocks.
///
/// Without a navigator, or when resolution fails, a strict compile fails and
/// a recovering compile records the error next to the tree.
async fn finish(
    ast: ExpressionNode,
    mut errors: Vec<FlashError>,
    request: &CompileRequest,
) -> Result<CompiledExpression> {
    if !ast.contains_flash() {
        return Ok(CompiledExpression::new(ast, errors, None));
    }
    let resolved = match &request.navigator {
        Some(navigator) => resolve_structures(&ast, navigator.as_ref()).await,
        None => Err(FlashError::collaborator_missing(F1000, "Navigator")),
    };
    match resolved {
        Ok(resolved) => Ok(CompiledExpression::new(ast, errors, Some(resolved))),
        Err(error) if request.recover => {
            errors.push(error);
            Ok(CompiledExpression::new(ast, errors, None))
        }
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BoundedCache;
    use crate::providers::{InMemoryNavigator, StructureKind, TypeMeta};

    fn cache() -> CacheAdapter {
        CacheAdapter::new(Arc::new(BoundedCache::<SharedCompiled>::with_limits(Some(8), None)))
    }

    #[tokio::test]
    async fn test_compiles_once_per_identity() {
        let service = Arc::new(CompileService::new());
        let cache = cache();
        let request = CompileRequest::new(false, None);
        let a = service.compile(&cache, "1 + 2 * 3", &request).await.unwrap();
        let b = service.compile(&cache, "1 + 2 * 3", &request).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(service.compile_count(), 1);

        // the recover flag is part of the identity
        service
            .compile(&cache, "1 + 2 * 3", &CompileRequest::new(true, None))
            .await
            .unwrap();
        assert_eq!(service.compile_count(), 2);
    }

    #[tokio::test]
    async fn test_strict_and_recover_syntax_errors() {
        let service = Arc::new(CompileService::new());
        let cache = cache();
        let err = service
            .compile(&cache, "$ + + $", &CompileRequest::new(false, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), S0211);

        let compiled = service
            .compile(&cache, "$ + + $", &CompileRequest::new(true, None))
            .await
            .unwrap();
        assert_eq!(compiled.errors()[0].code(), S0211);
    }

    #[tokio::test]
    async fn test_flash_needs_navigator() {
        let service = Arc::new(CompileService::new());
        let source = "InstanceOf: Patient\n* active = true";
        let err = service
            .compile(&CacheAdapter::disabled(), source, &CompileRequest::new(false, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), F1000);

        let compiled = service
            .compile(&CacheAdapter::disabled(), source, &CompileRequest::new(true, None))
            .await
            .unwrap();
        assert_eq!(compiled.errors()[0].code(), F1000);
        assert!(compiled.resolved_structures().is_none());

        let navigator: Arc<dyn Navigator> = Arc::new(
            InMemoryNavigator::new()
                .with_type(TypeMeta::new("Patient", StructureKind::Resource))
                .with_element("Patient", "active", "boolean", false),
        );
        let compiled = service
            .compile(
                &CacheAdapter::disabled(),
                source,
                &CompileRequest::new(false, Some(navigator)),
            )
            .await
            .unwrap();
        assert!(compiled.resolved_structures().is_some());
    }

    #[tokio::test]
    async fn test_compile_ast_is_cached() {
        let service = Arc::new(CompileService::new());
        let cache = cache();
        let request = CompileRequest::new(false, None);
        let ast = parser::parse("1 + 2").unwrap();
        let a = service.compile_ast(&cache, ast.clone(), &request).await.unwrap();
        let b = service.compile_ast(&cache, ast, &request).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(service.compile_count(), 1);
    }
}
