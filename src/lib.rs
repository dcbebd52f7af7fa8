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

//! FLASH/JSONata expression engine
//!
//! Expressions are compiled once and reused. Compilation goes through a
//! structural cache identity, a pluggable cache and an inflight coordinator
//! that runs at most one compilation per identity at a time. During
//! evaluation `$name(...)` calls resolve through local variables, call-site
//! bindings, a mapping repository and the function registry, and every
//! condition raised is routed through a severity policy.
//!
//! ```no_run
//! use octofhir_flash::{CompileOptions, FlashEngine};
//! use serde_json::json;
//!
//! # async fn run() -> octofhir_flash::Result<()> {
//! let engine = FlashEngine::global();
//! let expression = engine.compile("name & \"!\"", CompileOptions::new()).await?;
//! let result = expression.evaluate(json!({"name": "FLASH"}), None).await?;
//! assert_eq!(result.as_str(), Some("FLASH!"));
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod core;
pub mod engine;
pub mod evaluator;
pub mod logging;
pub mod mapping;
pub mod parser;
pub mod policy;
pub mod providers;

pub use cache::{CacheError, CacheStats, ExpressionCache, ExpressionIdentity, InflightStats, build_identity};
pub use config::{CacheConfig, EngineConfig, EngineConfigBuilder};
pub use core::{ErrorCode, FlashError, Result, Value};
pub use engine::{CacheSetting, CompileOptions, Expression, FlashEngine};
pub use evaluator::{Bindings, CallContext, FnFunction, NativeFunction};
pub use logging::{LogFacadeLogger, Logger};
pub use mapping::{InMemoryMappingRepository, MappingRepository, RepositoryError};
pub use policy::{Diagnostic, Policy, Severity, VerboseReport};
pub use providers::{
    ClientError, FhirClient, InMemoryNavigator, Navigator, NavigatorError, TerminologyError,
    TerminologyRuntime,
};
