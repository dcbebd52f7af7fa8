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

//! FLASH engine - the main entry point for compiling and evaluating expressions

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::ast::ExpressionNode;
use crate::cache::{
    BoundedCache, CacheAdapter, CacheStats, ExpressionCache, ExpressionIdentity, InflightStats,
};
use crate::compiler::{CompileRequest, CompileService, CompiledExpression, ResolvedStructures, SharedCompiled};
use crate::config::EngineConfig;
use crate::core::{FlashError, Result, Value};
use crate::evaluator::{
    Bindings, EvalRuntime, Evaluator, Frame, FrameKind, FunctionTable, NativeFunction,
    RegisteredFunction,
};
use crate::logging::{LogFacadeLogger, Logger};
use crate::mapping::MappingRepository;
use crate::policy::{DiagnosticsCollector, Policy, VerboseReport};
use crate::providers::{FhirClient, Navigator, TerminologyRuntime};

/// Which cache a compilation goes through
#[derive(Clone, Default)]
pub enum CacheSetting {
    /// The engine's bounded in-process cache
    #[default]
    Default,
    /// A caller-supplied cache
    External(Arc<dyn ExpressionCache>),
    /// No caching; concurrent identical compilations are still shared
    Disabled,
}

impl fmt::Debug for CacheSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheSetting::Default => write!(f, "Default"),
            CacheSetting::External(_) => write!(f, "External"),
            CacheSetting::Disabled => write!(f, "Disabled"),
        }
    }
}

/// Options of one compilation
///
/// Only `recover` and the navigator's package context take part in the
/// cache identity; the remaining collaborators are used at evaluation time.
#[derive(Clone, Default)]
pub struct CompileOptions {
    pub recover: bool,
    pub navigator: Option<Arc<dyn Navigator>>,
    pub cache: CacheSetting,
    pub mapping_repository: Option<Arc<dyn MappingRepository>>,
    pub client: Option<Arc<dyn FhirClient>>,
    pub terminology: Option<Arc<dyn TerminologyRuntime>>,
    /// Overrides the engine's default policy
    pub policy: Option<Policy>,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recover(mut self, recover: bool) -> Self {
        self.recover = recover;
        self
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn with_cache(mut self, cache: CacheSetting) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_mapping_repository(mut self, repository: Arc<dyn MappingRepository>) -> Self {
        self.mapping_repository = Some(repository);
        self
    }

    pub fn with_client(mut self, client: Arc<dyn FhirClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_terminology(mut self, terminology: Arc<dyn TerminologyRuntime>) -> Self {
        self.terminology = Some(terminology);
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }
}

struct EngineInner {
    compiler: Arc<CompileService>,
    default_cache: Arc<BoundedCache<SharedCompiled>>,
    config: EngineConfig,
}

/// Compiles expressions through a shared cache and inflight registry.
///
/// Cheap to clone; clones share all state. [`FlashEngine::global`] gives a
/// process-wide instance, but engines can be created and injected freely.
#[derive(Clone)]
pub struct FlashEngine {
    inner: Arc<EngineInner>,
}

static GLOBAL_ENGINE: Lazy<FlashEngine> = Lazy::new(|| FlashEngine::new(EngineConfig::default()));

impl Default for FlashEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl FlashEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                compiler: Arc::new(CompileService::new()),
                default_cache: Arc::new(BoundedCache::new(&config.cache)),
                config,
            }),
        }
    }

    /// Process-wide engine with the default configuration, created on first use
    pub fn global() -> &'static FlashEngine {
        &GLOBAL_ENGINE
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn adapter(&self, setting: &CacheSetting) -> CacheAdapter {
        match setting {
            CacheSetting::Default => CacheAdapter::new(self.inner.default_cache.clone()),
            CacheSetting::External(cache) => CacheAdapter::new(Arc::clone(cache)),
            CacheSetting::Disabled => CacheAdapter::disabled(),
        }
    }

    /// Compile source text.
    ///
    /// Outside recover mode the first syntax or structure error fails the
    /// call. In recover mode compilation always yields a handle and the
    /// errors are listed by [`Expression::errors`].
    pub async fn compile(&self, source: &str, options: CompileOptions) -> Result<Expression> {
        let request = CompileRequest::new(options.recover, options.navigator.clone());
        let cache = self.adapter(&options.cache);
        let identity = request.identity(source);
        let compiled = self.inner.compiler.compile(&cache, source, &request).await;
        let compiled = self.recover_failure(compiled, options.recover)?;
        Ok(self.handle(compiled, identity, cache, request, options))
    }

    /// Compile a pre-parsed tree
    pub async fn compile_ast(&self, ast: ExpressionNode, options: CompileOptions) -> Result<Expression> {
        let request = CompileRequest::new(options.recover, options.navigator.clone());
        let cache = self.adapter(&options.cache);
        let identity = request.ast_identity(&ast)?;
        let compiled = self.inner.compiler.compile_ast(&cache, ast, &request).await;
        let compiled = self.recover_failure(compiled, options.recover)?;
        Ok(self.handle(compiled, identity, cache, request, options))
    }

    fn recover_failure(&self, compiled: Result<SharedCompiled>, recover: bool) -> Result<SharedCompiled> {
        match compiled {
            Ok(compiled) => Ok(compiled),
            Err(error) if recover => {
                log::debug!("recovering from failed compilation: {}", error);
                let placeholder = ExpressionNode::Error {
                    error: Box::new(error.clone()),
                };
                Ok(Arc::new(CompiledExpression::new(placeholder, vec![error], None)))
            }
            Err(error) => Err(error),
        }
    }

    fn handle(
        &self,
        compiled: SharedCompiled,
        identity: ExpressionIdentity,
        cache: CacheAdapter,
        request: CompileRequest,
        options: CompileOptions,
    ) -> Expression {
        Expression {
            compiled,
            identity,
            engine: self.clone(),
            cache,
            request,
            repository: options.mapping_repository,
            client: options.client,
            terminology: options.terminology,
            policy: options.policy.unwrap_or(self.inner.config.policy),
            assigned: RwLock::new(IndexMap::new()),
            functions: RwLock::new(FunctionTable::new()),
            logger: RwLock::new(Arc::new(LogFacadeLogger)),
        }
    }

    /// Statistics of the default cache
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.default_cache.stats()
    }

    pub fn inflight_stats(&self) -> InflightStats {
        self.inner.compiler.inflight_stats()
    }

    /// Empty the default cache
    pub fn clear_cache(&self) {
        self.inner.default_cache.clear();
    }

    /// Number of compilations actually performed (cache and inflight hits
    /// excluded)
    pub fn compile_count(&self) -> u64 {
        self.inner.compiler.compile_count()
    }
}

impl fmt::Debug for FlashEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashEngine")
            .field("config", &self.inner.config)
            .field("cache", &self.inner.default_cache.stats())
            .finish()
    }
}

/// Compiled expression handle
pub struct Expression {
    compiled: SharedCompiled,
    identity: ExpressionIdentity,
    engine: FlashEngine,
    cache: CacheAdapter,
    request: CompileRequest,
    repository: Option<Arc<dyn MappingRepository>>,
    client: Option<Arc<dyn FhirClient>>,
    terminology: Option<Arc<dyn TerminologyRuntime>>,
    policy: Policy,
    assigned: RwLock<IndexMap<String, Value>>,
    functions: RwLock<FunctionTable>,
    logger: RwLock<Arc<dyn Logger>>,
}

impl Expression {
    /// Evaluate against `input` (`$` and `$$`).
    ///
    /// `bindings` are visible as `$name` and take precedence over values
    /// set with [`Expression::assign`]. Fails with the first condition the
    /// policy throws.
    pub async fn evaluate(&self, input: impl Into<Value>, bindings: Option<Bindings>) -> Result<Value> {
        let runtime = Arc::new(self.runtime(self.policy));
        let result = Evaluator::new(Arc::clone(&runtime))
            .evaluate_root(&self.compiled, input.into(), self.root_frame(bindings))
            .await;
        if let Err(error) = &result {
            let severity = error.severity();
            if severity >= self.policy.log_level {
                runtime.logger.log(severity, &error.to_string());
            }
        }
        result
    }

    /// Evaluate and report every condition instead of failing.
    ///
    /// Compile errors of a recovering compilation are reported first. The
    /// report is `ok` unless a condition reaches the throw level of the
    /// handle's policy.
    pub async fn evaluate_verbose(
        &self,
        input: impl Into<Value>,
        bindings: Option<Bindings>,
    ) -> VerboseReport {
        let collector = Arc::new(DiagnosticsCollector::new());
        for error in self.compiled.errors() {
            collector.record(error.clone(), Vec::new());
        }
        let runtime = self
            .runtime(self.policy.verbose())
            .with_failing_policy(self.policy)
            .with_collector(Arc::clone(&collector))
            .suppressing_compile_errors();
        let execution_id = runtime.execution_id;
        let result = Evaluator::new(Arc::new(runtime))
            .evaluate_root(&self.compiled, input.into(), self.root_frame(bindings))
            .await;
        let result = match result {
            Ok(value) => value,
            Err(error) => {
                collector.record(error, Vec::new());
                Value::Undefined
            }
        };
        VerboseReport::build(result, collector.snapshot(), &self.policy, execution_id)
    }

    pub fn ast(&self) -> &ExpressionNode {
        self.compiled.ast()
    }

    /// Errors collected by a recovering compilation
    pub fn errors(&self) -> &[FlashError] {
        self.compiled.errors()
    }

    pub fn resolved_structures(&self) -> Option<&ResolvedStructures> {
        self.compiled.resolved_structures().map(Arc::as_ref)
    }

    /// Bind a value visible as `$name` in every later evaluation
    pub fn assign(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.assigned.write().insert(name.into(), value.into());
    }

    /// Register a function callable as `$name(...)` from this expression and
    /// from the mappings it invokes. Shadows a built-in of the same name.
    pub fn register_function(
        &self,
        name: impl Into<String>,
        implementation: Arc<dyn NativeFunction>,
        signature: Option<&str>,
    ) -> Result<()> {
        let function = RegisteredFunction::new(name, implementation, signature)?;
        self.functions.write().register(function);
        Ok(())
    }

    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        *self.logger.write() = logger;
    }

    pub fn identity(&self) -> &ExpressionIdentity {
        &self.identity
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    fn runtime(&self, policy: Policy) -> EvalRuntime {
        let config = self.engine.config();
        EvalRuntime::new(
            Arc::clone(&self.engine.inner.compiler),
            self.cache.clone(),
            self.request.clone(),
            self.repository.clone(),
            self.client.clone(),
            self.terminology.clone(),
            self.functions.read().clone(),
            policy,
            self.logger.read().clone(),
        )
        .with_limits(config.max_depth, config.collaborator_timeout)
    }

    /// Assigned values overlaid by the call's bindings, below a local scope
    fn root_frame(&self, bindings: Option<Bindings>) -> Arc<Frame> {
        let mut values = self.assigned.read().clone();
        if let Some(bindings) = bindings {
            values.extend(bindings);
        }
        Frame::child(&Frame::root(FrameKind::Bindings, values))
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("identity", &self.identity)
            .field("errors", &self.compiled.errors())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_compile_and_evaluate() {
        let engine = FlashEngine::new(EngineConfig::default());
        let expression = engine.compile("a + b * 2", CompileOptions::new()).await.unwrap();
        let result = expression.evaluate(json!({"a": 1, "b": 3}), None).await.unwrap();
        assert_eq!(result, Value::from(7i64));
    }

    #[tokio::test]
    async fn test_recover_mode_never_fails() {
        let engine = FlashEngine::new(EngineConfig::default());
        let expression = engine
            .compile("\"unterminated", CompileOptions::new().with_recover(true))
            .await
            .unwrap();
        assert!(!expression.errors().is_empty());
        assert!(engine.compile("\"unterminated", CompileOptions::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_assign_and_bindings() {
        let engine = FlashEngine::new(EngineConfig::default());
        let expression = engine.compile("$greeting & \", \" & $name", CompileOptions::new()).await.unwrap();
        expression.assign("greeting", "Hello");
        expression.assign("name", "nobody");
        let bindings = Bindings::new().with("name", "World");
        let result = expression.evaluate(Value::Undefined, Some(bindings)).await.unwrap();
        assert_eq!(result, Value::from("Hello, World"));
    }

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(FlashEngine::global(), FlashEngine::global()));
    }
}
