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

//! Approximate in-memory footprint of compiled values
//!
//! The numbers are estimates used for size-bounded cache eviction: stack
//! size of the value plus the heap it owns. Shared (`Arc`) data is counted
//! at every owner.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::mem::size_of;
use std::sync::Arc;

use super::value::Value;

/// Types that can estimate their memory usage in bytes
pub trait MemoryFootprint {
    /// Heap bytes owned by this value, excluding its own stack size
    fn heap_size(&self) -> usize;

    /// Total estimated size in bytes
    fn estimated_size(&self) -> usize
    where
        Self: Sized,
    {
        size_of::<Self>() + self.heap_size()
    }
}

impl MemoryFootprint for str {
    fn heap_size(&self) -> usize {
        self.len()
    }
}

impl MemoryFootprint for String {
    fn heap_size(&self) -> usize {
        self.capacity()
    }
}

impl<T: MemoryFootprint> MemoryFootprint for Vec<T> {
    fn heap_size(&self) -> usize {
        self.capacity() * size_of::<T>() + self.iter().map(T::heap_size).sum::<usize>()
    }
}

impl<T: MemoryFootprint> MemoryFootprint for Option<T> {
    fn heap_size(&self) -> usize {
        self.as_ref().map_or(0, T::heap_size)
    }
}

impl<T: MemoryFootprint> MemoryFootprint for Box<T> {
    fn heap_size(&self) -> usize {
        size_of::<T>() + (**self).heap_size()
    }
}

impl<T: MemoryFootprint> MemoryFootprint for Arc<T> {
    fn heap_size(&self) -> usize {
        // two reference counters live next to the value
        2 * size_of::<usize>() + size_of::<T>() + (**self).heap_size()
    }
}

impl<V: MemoryFootprint> MemoryFootprint for IndexMap<String, V> {
    fn heap_size(&self) -> usize {
        self.capacity() * (size_of::<String>() + size_of::<V>() + size_of::<u64>())
            + self
                .iter()
                .map(|(k, v)| k.heap_size() + v.heap_size())
                .sum::<usize>()
    }
}

impl MemoryFootprint for JsonValue {
    fn heap_size(&self) -> usize {
        match self {
            JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) => 0,
            JsonValue::String(s) => s.heap_size(),
            JsonValue::Array(items) => items.heap_size(),
            JsonValue::Object(map) => map
                .iter()
                .map(|(k, v)| size_of::<String>() + k.heap_size() + v.estimated_size())
                .sum(),
        }
    }
}

impl MemoryFootprint for Value {
    fn heap_size(&self) -> usize {
        match self {
            Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) => 0,
            Value::String(s) => s.heap_size(),
            Value::Array(items) => items.heap_size(),
            Value::Object(map) => map.heap_size(),
            // closures are counted by their parameter list only
            Value::Function(crate::core::FunctionValue::Lambda(lambda)) => lambda.params.heap_size(),
            Value::Function(_) => 0,
        }
    }
}

/// Estimate the size of any value implementing [`MemoryFootprint`]
pub fn estimate<T: MemoryFootprint>(value: &T) -> usize {
    value.estimated_size()
}
