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

//! Compilation caching: identities, the default LRU cache, the cache
//! adapter and the inflight coordinator

pub mod adapter;
pub mod bounded;
pub mod identity;
pub mod inflight;

pub use adapter::{CacheAdapter, CacheError, ExpressionCache};
pub use bounded::{BoundedCache, CacheStats};
pub use identity::{ExpressionIdentity, LANGUAGE_VERSION, build_identity};
pub use inflight::{InflightCoordinator, InflightStats};
