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

//! Source location tracking for parser

use std::fmt;

/// A value with source location information (byte offsets)
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    /// The value
    pub value: T,
    /// Start position in the input
    pub start: usize,
    /// End position in the input
    pub end: usize,
}

impl<T> Spanned<T> {
    /// Create a new spanned value
    pub fn new(value: T, start: usize, end: usize) -> Self {
        Self { value, start, end }
    }

    /// Shift both ends by `offset`, used for fragments parsed out of a FLASH line
    pub fn shifted(mut self, offset: usize) -> Self {
        self.start += offset;
        self.end += offset;
        self
    }
}

impl<T: fmt::Display> fmt::Display for Spanned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}..{}", self.value, self.start, self.end)
    }
}
