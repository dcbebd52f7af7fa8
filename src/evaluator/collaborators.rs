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

//! Built-ins backed by external collaborators
//!
//! `$search`, `$searchSingle` and `$resolve` call the FHIR client;
//! `$translateCode` and `$inValueSet` call the terminology runtime. Every
//! call is bounded by the configured collaborator timeout.

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::functions::{CallContext, Definition, NativeFunction, native};
use crate::core::error::*;
use crate::core::Value;
use crate::providers::{ClientError, FhirClient, TerminologyError, TerminologyRuntime, reference_of};

pub(crate) fn definitions() -> Vec<Definition> {
    vec![
        native("search", "<so?:a>", SearchFunction { single: false }),
        native("searchSingle", "<so?:o>", SearchFunction { single: true }),
        native("resolve", "<(so)-:o>", ResolveFunction),
        native("translateCode", "<s-s:x>", TranslateCodeFunction),
        native("inValueSet", "<s-s:b>", InValueSetFunction),
    ]
}

fn client<'a>(ctx: &'a CallContext<'_>) -> Result<&'a Arc<dyn FhirClient>> {
    ctx.runtime()
        .client
        .as_ref()
        .ok_or_else(|| FlashError::collaborator_missing(F5100, "FHIR client"))
}

fn terminology<'a>(ctx: &'a CallContext<'_>) -> Result<&'a Arc<dyn TerminologyRuntime>> {
    ctx.runtime()
        .terminology
        .as_ref()
        .ok_or_else(|| FlashError::collaborator_missing(F5200, "Terminology runtime"))
}

async fn client_call<T>(
    ctx: &CallContext<'_>,
    operation: &str,
    call: impl Future<Output = std::result::Result<T, ClientError>>,
) -> Result<T> {
    let limit = ctx.runtime().collaborator_timeout;
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(ClientError::NotFound(what))) => Err(FlashError::collaborator(
            F5102,
            operation,
            format!("Resource not found: {}", what),
            None,
        )),
        Ok(Err(error)) => Err(FlashError::collaborator(
            F5104,
            operation,
            format!("FHIR client {} failed", operation),
            Some(error.to_string()),
        )),
        Err(_) => Err(timed_out(F5101, operation, limit)),
    }
}

async fn terminology_call<T>(
    ctx: &CallContext<'_>,
    operation: &str,
    call: impl Future<Output = std::result::Result<T, TerminologyError>>,
) -> Result<T> {
    let limit = ctx.runtime().collaborator_timeout;
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(FlashError::collaborator(
            F5201,
            operation,
            format!("Terminology {} failed", operation),
            Some(error.to_string()),
        )),
        Err(_) => Err(timed_out(F5201, operation, limit)),
    }
}

fn timed_out(code: ErrorCode, operation: &str, limit: Duration) -> FlashError {
    FlashError::collaborator(
        code,
        operation,
        format!("{} timed out after {:?}", operation, limit),
        None,
    )
}

fn search_params(value: Option<&Value>) -> Map<String, JsonValue> {
    match value.and_then(Value::to_json) {
        Some(JsonValue::Object(params)) => params,
        _ => Map::new(),
    }
}

struct SearchFunction {
    single: bool,
}

#[async_trait]
impl NativeFunction for SearchFunction {
    async fn call(&self, args: Vec<Value>, ctx: &CallContext<'_>) -> Result<Value> {
        let client = client(ctx)?;
        let Some(resource_type) = args.first().and_then(Value::as_str) else {
            return Ok(Value::Undefined);
        };
        let params = search_params(args.get(1));
        let found = client_call(ctx, "search", client.search(resource_type, &params)).await?;
        if !self.single {
            return Ok(Value::from_sequence(found.into_iter().map(Value::from).collect()));
        }
        match found.len() {
            0 => Err(FlashError::collaborator(
                F5102,
                "searchSingle",
                format!("No {} matched the search", resource_type),
                None,
            )),
            1 => Ok(Value::from(found.into_iter().next())),
            n => Err(FlashError::collaborator(
                F5103,
                "searchSingle",
                format!("Expected one {}, the search matched {}", resource_type, n),
                None,
            )),
        }
    }
}

struct ResolveFunction;

#[async_trait]
impl NativeFunction for ResolveFunction {
    async fn call(&self, args: Vec<Value>, ctx: &CallContext<'_>) -> Result<Value> {
        let client = client(ctx)?;
        let Some(target) = args.first().and_then(Value::to_json) else {
            return Ok(Value::Undefined);
        };
        let Some(reference) = reference_of(&target) else {
            return Err(FlashError::type_error(
                T0410,
                "Argument 1 of function $resolve must be a reference string or a Reference object",
            ));
        };
        match client_call(ctx, "read", client.read(reference)).await? {
            Some(resource) => Ok(Value::from(resource)),
            None => Err(FlashError::collaborator(
                F5102,
                "read",
                format!("Resource not found: {}", reference),
                None,
            )),
        }
    }
}

struct TranslateCodeFunction;

#[async_trait]
impl NativeFunction for TranslateCodeFunction {
    async fn call(&self, args: Vec<Value>, ctx: &CallContext<'_>) -> Result<Value> {
        let terminology = terminology(ctx)?;
        let (Some(code), Some(map)) = (args.first().and_then(Value::as_str), args.get(1).and_then(Value::as_str))
        else {
            return Ok(Value::Undefined);
        };
        let translated = terminology_call(ctx, "translate", terminology.translate(code, map)).await?;
        Ok(Value::from(translated))
    }
}

struct InValueSetFunction;

#[async_trait]
impl NativeFunction for InValueSetFunction {
    async fn call(&self, args: Vec<Value>, ctx: &CallContext<'_>) -> Result<Value> {
        let terminology = terminology(ctx)?;
        let (Some(code), Some(value_set)) = (args.first().and_then(Value::as_str), args.get(1).and_then(Value::as_str))
        else {
            return Ok(Value::Undefined);
        };
        let member = terminology_call(ctx, "inValueSet", terminology.in_value_set(code, value_set)).await?;
        Ok(Value::Bool(member))
    }
}
