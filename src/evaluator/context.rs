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

//! Evaluation context: lexical frames and the per-evaluation runtime

use indexmap::IndexMap;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::functions::{FunctionTable, RegisteredFunction};
use crate::cache::CacheAdapter;
use crate::compiler::{CompileRequest, CompileService};
use crate::core::error::*;
use crate::core::Value;
use crate::logging::Logger;
use crate::mapping::MappingRepository;
use crate::policy::{DiagnosticsCollector, Policy};
use crate::providers::{FhirClient, Navigator, TerminologyRuntime};

/// Kind of a variable frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Variables assigned with `:=` and lambda parameters
    Local,
    /// Bindings supplied by the caller of an evaluation or mapping
    Bindings,
}

/// Variable scope with parent-chain lookup
pub struct Frame {
    parent: Option<Arc<Frame>>,
    kind: FrameKind,
    vars: RwLock<FxHashMap<String, Value>>,
}

impl Frame {
    /// Frame without a parent
    pub fn root<I>(kind: FrameKind, vars: I) -> Arc<Frame>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Arc::new(Frame {
            parent: None,
            kind,
            vars: RwLock::new(vars.into_iter().collect()),
        })
    }

    /// Local frame nested in `parent`
    pub fn child(parent: &Arc<Frame>) -> Arc<Frame> {
        Arc::new(Frame {
            parent: Some(Arc::clone(parent)),
            kind: FrameKind::Local,
            vars: RwLock::new(FxHashMap::default()),
        })
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.vars.write().insert(name.into(), value);
    }

    /// Look a name up along the parent chain
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.frames().find_map(|frame| frame.vars.read().get(name).cloned())
    }

    /// Look a name up in the frames of one kind only
    pub fn lookup_kind(&self, name: &str, kind: FrameKind) -> Option<Value> {
        self.frames()
            .filter(|frame| frame.kind == kind)
            .find_map(|frame| frame.vars.read().get(name).cloned())
    }

    fn frames(&self) -> impl Iterator<Item = &Frame> {
        std::iter::successors(Some(self), |frame| frame.parent.as_deref())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.vars.read().keys().cloned().collect();
        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("vars", &names)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Named values supplied by the caller of an evaluation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings(IndexMap<String, Value>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl IntoIterator for Bindings {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(n, v)| (n.into(), v.into())).collect())
    }
}

/// Entries of a JSON object; anything else yields no bindings
impl From<JsonValue> for Bindings {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Object(map) => map.into_iter().collect(),
            _ => Self::default(),
        }
    }
}

impl From<IndexMap<String, Value>> for Bindings {
    fn from(map: IndexMap<String, Value>) -> Self {
        Self(map)
    }
}

/// State shared by one top-level evaluation and every mapping it invokes
pub struct EvalRuntime {
    pub compiler: Arc<CompileService>,
    pub cache: CacheAdapter,
    pub recover: bool,
    pub navigator: Option<Arc<dyn Navigator>>,
    pub repository: Option<Arc<dyn MappingRepository>>,
    pub client: Option<Arc<dyn FhirClient>>,
    pub terminology: Option<Arc<dyn TerminologyRuntime>>,
    pub functions: FunctionTable,
    pub policy: Policy,
    /// Policy whose throw level marks a collected condition as a failure;
    /// the caller's policy while a verbose report is produced
    pub failing_policy: Policy,
    pub collector: Option<Arc<DiagnosticsCollector>>,
    pub logger: Arc<dyn Logger>,
    pub max_depth: usize,
    pub collaborator_timeout: Duration,
    /// Compile errors of the top-level expression were already recorded
    pub suppress_compile_errors: bool,
    pub execution_id: Uuid,
    repository_keys: tokio::sync::OnceCell<Option<FxHashSet<String>>>,
}

impl EvalRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        compiler: Arc<CompileService>,
        cache: CacheAdapter,
        request: CompileRequest,
        repository: Option<Arc<dyn MappingRepository>>,
        client: Option<Arc<dyn FhirClient>>,
        terminology: Option<Arc<dyn TerminologyRuntime>>,
        functions: FunctionTable,
        policy: Policy,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            compiler,
            cache,
            recover: request.recover,
            navigator: request.navigator,
            repository,
            client,
            terminology,
            functions,
            policy,
            failing_policy: policy,
            collector: None,
            logger,
            max_depth: 100,
            collaborator_timeout: Duration::from_secs(30),
            suppress_compile_errors: false,
            execution_id: Uuid::new_v4(),
            repository_keys: tokio::sync::OnceCell::new(),
        }
    }

    pub fn with_limits(mut self, max_depth: usize, collaborator_timeout: Duration) -> Self {
        self.max_depth = max_depth;
        self.collaborator_timeout = collaborator_timeout;
        self
    }

    /// Collect conditions into `collector` and take its execution id
    pub fn with_collector(mut self, collector: Arc<DiagnosticsCollector>) -> Self {
        self.execution_id = collector.execution_id();
        self.collector = Some(collector);
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_failing_policy(mut self, policy: Policy) -> Self {
        self.failing_policy = policy;
        self
    }

    pub fn suppressing_compile_errors(mut self) -> Self {
        self.suppress_compile_errors = true;
        self
    }

    /// Compile options for mappings invoked during this evaluation
    pub fn compile_request(&self) -> CompileRequest {
        CompileRequest::new(self.recover, self.navigator.clone())
    }

    /// Apply the policy to a condition.
    ///
    /// Returns the condition as an error when it must fail the evaluation.
    /// Otherwise it is logged and collected as configured and an undefined
    /// result is substituted. Raising a condition that already failed is
    /// free of side effects, so errors may pass through here more than once
    /// on their way up.
    pub fn raise(&self, error: FlashError, mapping_stack: &[String]) -> Result<Value> {
        let severity = error.severity();
        let disposition = self.policy.decide(severity);
        if disposition.throw {
            return Err(error);
        }
        if disposition.log {
            self.logger.log(severity, &error.to_string());
        }
        if disposition.collect {
            if let Some(collector) = &self.collector {
                collector.record(error, mapping_stack.to_vec());
            }
        }
        Ok(Value::Undefined)
    }

    /// Number of conditions collected so far
    pub fn diagnostics_mark(&self) -> usize {
        self.collector.as_ref().map_or(0, |collector| collector.len())
    }

    /// First condition collected after `mark` directly under `mapping_stack`
    /// that the failing policy would have thrown. Mapping failures are
    /// skipped; they already name their mapping.
    pub fn collected_failure(&self, mark: usize, mapping_stack: &[String]) -> Option<FlashError> {
        let collector = self.collector.as_ref()?;
        collector
            .recorded_since(mark)
            .into_iter()
            .find(|diagnostic| {
                diagnostic.code != F3004
                    && diagnostic.mapping_stack.as_slice() == mapping_stack
                    && self.failing_policy.throws(diagnostic.severity)
            })
            .map(|diagnostic| diagnostic.error)
    }

    /// Mapping names known to the repository, listed once per evaluation.
    /// `None` when there is no repository or listing failed.
    pub async fn repository_keys(&self, mapping_stack: &[String]) -> Result<Option<&FxHashSet<String>>> {
        let Some(repository) = &self.repository else {
            return Ok(None);
        };
        let mut failure = None;
        let failure_slot = &mut failure;
        let keys = self
            .repository_keys
            .get_or_init(|| async move {
                match repository.keys().await {
                    Ok(keys) => Some(keys.into_iter().collect()),
                    Err(error) => {
                        *failure_slot = Some(error);
                        None
                    }
                }
            })
            .await;
        if let Some(error) = failure {
            self.raise(
                FlashError::evaluation(F3000, format!("Could not list mapping repository keys: {}", error)),
                mapping_stack,
            )?;
        }
        Ok(keys.as_ref())
    }

    /// Registered or built-in function by name
    pub fn function(&self, name: &str) -> Option<Arc<RegisteredFunction>> {
        self.functions.get(name)
    }
}
