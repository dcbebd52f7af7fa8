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

//! Expression parser
//!
//! Converts source text into an [`ExpressionNode`] tree. Sources whose first
//! line is a FLASH header are parsed as FLASH blocks, everything else with
//! the Pratt parser.

pub mod flash;
pub mod pratt;
pub mod span;
pub mod tokenizer;

pub use flash::is_flash_source;
pub use span::Spanned;
pub use tokenizer::{Token, Tokenizer};

use crate::ast::ExpressionNode;
use crate::core::{FlashError, Result};

/// Result of a recover-mode parse
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub ast: ExpressionNode,
    /// Errors in source order; empty on a clean parse
    pub errors: Vec<FlashError>,
}

impl ParseOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parse a source, failing on the first syntax error
pub fn parse(source: &str) -> Result<ExpressionNode> {
    parse_source(source, false).map(|outcome| outcome.ast)
}

/// Parse a source collecting every syntax error. Never fails.
pub fn parse_with_recovery(source: &str) -> ParseOutcome {
    match parse_source(source, true) {
        Ok(outcome) => outcome,
        // recover mode reports through the outcome; kept total regardless
        Err(error) => ParseOutcome {
            ast: ExpressionNode::Error {
                error: Box::new(error.clone()),
            },
            errors: vec![error],
        },
    }
}

/// Parse in strict or recover mode
pub fn parse_source(source: &str, recover: bool) -> Result<ParseOutcome> {
    let (ast, errors) = if is_flash_source(source) {
        flash::parse_flash(source, recover)?
    } else {
        pratt::Parser::new(source, recover).parse()?
    };
    log::trace!("parsed {} nodes with {} errors", ast.node_count(), errors.len());
    Ok(ParseOutcome { ast, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_code::*;

    #[test]
    fn test_strict_and_recover_agree_on_clean_input() {
        let strict = parse("$greeting(\"World\")").unwrap();
        let outcome = parse_with_recovery("$greeting(\"World\")");
        assert!(outcome.is_clean());
        assert_eq!(outcome.ast, strict);
    }

    #[test]
    fn test_recover_never_fails() {
        let outcome = parse_with_recovery("$ + + $");
        assert_eq!(outcome.errors[0].code(), S0211);
        assert!(matches!(outcome.ast, ExpressionNode::Error { .. }));
    }

    #[test]
    fn test_flash_sources_are_routed() {
        let ast = parse("InstanceOf: Patient\n* active = true").unwrap();
        assert!(ast.contains_flash());
    }
}
