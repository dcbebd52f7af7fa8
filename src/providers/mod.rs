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

//! External collaborator contracts
//!
//! The engine never talks to a schema registry, FHIR server or terminology
//! service directly. Callers plug implementations of these traits into
//! [`CompileOptions`](crate::engine::CompileOptions).

pub mod client;
pub mod navigator;
pub mod terminology;

pub use client::{ClientError, FhirClient, reference_of};
pub use navigator::{
    ElementMeta, InMemoryNavigator, Navigator, NavigatorError, StructureKind, TypeMeta,
};
pub use terminology::{TerminologyError, TerminologyRuntime};
