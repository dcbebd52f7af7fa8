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

//! Expression evaluation
//!
//! The evaluator walks the compiled tree asynchronously. Named calls are
//! resolved through the mapping resolver, so a `$name(...)` may end up in a
//! local lambda, a call-site binding, a repository mapping or a function.

mod builtins;
mod collaborators;
mod context;
mod functions;
mod interpreter;
mod signature;

pub use context::{Bindings, EvalRuntime, Frame, FrameKind};
pub use functions::{CallContext, FnFunction, FunctionTable, NativeFunction, RegisteredFunction};
pub use interpreter::{Env, Evaluator};
pub use signature::{Param, ParamType, Signature};
