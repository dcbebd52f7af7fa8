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

//! Line oriented parser for FLASH blocks
//!
//! ```text
//! Instance: $patientId
//! InstanceOf: Patient
//! * name.family = surname
//! * active = true
//! ```
//!
//! Header values and rule right-hand sides are ordinary expressions parsed
//! with the Pratt parser at their offset in the block.

use super::pratt::Parser;
use crate::ast::{ExpressionNode, FlashBlock, FlashRule};
use crate::core::error::*;

const INSTANCE: &str = "Instance:";
const INSTANCE_OF: &str = "InstanceOf:";

/// Whether the source is a FLASH block (first non-blank line is a header)
pub fn is_flash_source(source: &str) -> bool {
    source
        .lines()
        .map(str::trim_start)
        .find(|line| !line.is_empty())
        .is_some_and(|line| line.starts_with(INSTANCE) || line.starts_with(INSTANCE_OF))
}

/// Lines of `source` paired with their byte offset, leading whitespace removed
fn lines_with_offsets(source: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    source.split_inclusive('\n').map(move |raw| {
        let start = offset;
        offset += raw.len();
        let trimmed = raw.trim_start();
        (start + raw.len() - trimmed.len(), trimmed.trim_end())
    })
}

struct FlashParser {
    recover: bool,
    errors: Vec<FlashError>,
}

impl FlashParser {
    /// Record or return an error; in recover mode the placeholder node is returned
    fn fail(&mut self, error: FlashError) -> Result<ExpressionNode> {
        if self.recover {
            self.errors.push(error.clone());
            Ok(ExpressionNode::Error {
                error: Box::new(error),
            })
        } else {
            Err(error)
        }
    }

    fn fragment(&mut self, text: &str, offset: usize) -> Result<ExpressionNode> {
        let (ast, errors) = Parser::with_offset(text, offset, self.recover).parse()?;
        self.errors.extend(errors);
        Ok(ast)
    }

    fn parse(&mut self, source: &str) -> Result<ExpressionNode> {
        let mut instance_id = None;
        let mut instance_of: Option<String> = None;
        let mut rules = Vec::new();

        for (offset, line) in lines_with_offsets(source) {
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix(INSTANCE_OF) {
                let name = rest.trim();
                if instance_of.is_some() || !is_type_name(name) {
                    return self.fail(malformed("Invalid InstanceOf: declaration", offset));
                }
                instance_of = Some(name.to_string());
            } else if let Some(rest) = line.strip_prefix(INSTANCE) {
                if instance_id.is_some() || instance_of.is_some() {
                    return self.fail(malformed("Instance: must precede InstanceOf:", offset));
                }
                let value_offset = offset + INSTANCE.len() + leading_ws(rest);
                instance_id = Some(Box::new(self.fragment(rest.trim(), value_offset)?));
            } else if let Some(rest) = line.strip_prefix('*') {
                if instance_of.is_none() {
                    return self.fail(malformed("Rules must follow an InstanceOf: declaration", offset));
                }
                let rule_offset = offset + 1;
                let Some((path, value)) = rest.split_once('=') else {
                    return self.fail(malformed("Expected \"* path = expression\"", offset));
                };
                let path = path.trim();
                if !is_element_path(path) {
                    return self.fail(malformed(format!("Invalid element path \"{}\"", path), offset));
                }
                let value_offset = rule_offset + path_len(rest) + 1 + leading_ws(value);
                let value = self.fragment(value.trim(), value_offset)?;
                rules.push(FlashRule {
                    path: path.to_string(),
                    value,
                    position: offset,
                });
            } else {
                return self.fail(malformed(format!("Unexpected line in FLASH block: {}", line), offset));
            }
        }

        let Some(instance_of) = instance_of else {
            return self.fail(malformed("Missing InstanceOf: declaration", 0));
        };
        Ok(ExpressionNode::Flash(FlashBlock {
            instance_id,
            instance_of,
            rules,
        }))
    }
}

fn malformed(message: impl Into<String>, position: usize) -> FlashError {
    FlashError::syntax(S0300, message, position)
}

fn leading_ws(text: &str) -> usize {
    text.len() - text.trim_start().len()
}

fn path_len(rest: &str) -> usize {
    rest.find('=').unwrap_or(rest.len())
}

fn is_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_element_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|segment| {
            let mut chars = segment.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Parse a FLASH block. Returns the AST plus the errors collected in
/// recover mode.
pub fn parse_flash(source: &str, recover: bool) -> Result<(ExpressionNode, Vec<FlashError>)> {
    let mut parser = FlashParser {
        recover,
        errors: Vec::new(),
    };
    let ast = parser.parse(source)?;
    Ok((ast, parser.errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PATIENT: &str = "Instance: $id\nInstanceOf: Patient\n* name.family = \"Doe\"\n* active = true\n";

    #[test]
    fn test_detection() {
        assert!(is_flash_source(PATIENT));
        assert!(is_flash_source("\n  InstanceOf: Observation"));
        assert!(!is_flash_source("1 + 2"));
        assert!(!is_flash_source(""));
    }

    #[test]
    fn test_parse_block() {
        let (ast, errors) = parse_flash(PATIENT, false).unwrap();
        assert!(errors.is_empty());
        let ExpressionNode::Flash(block) = ast else {
            panic!("expected FLASH block");
        };
        assert_eq!(block.instance_of, "Patient");
        assert_eq!(
            block.instance_id.as_deref(),
            Some(&ExpressionNode::variable("id", 10))
        );
        let paths: Vec<_> = block.rules.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["name.family", "active"]);
        assert_eq!(block.rules[0].value, ExpressionNode::string("Doe"));
    }

    #[test]
    fn test_rule_positions_point_into_block() {
        let source = "InstanceOf: Patient\n* gender = 1 +";
        let err = parse_flash(source, false).unwrap_err();
        assert_eq!(err.code(), S0203);
        assert_eq!(err.position(), Some(source.len()));
    }

    #[test]
    fn test_malformed_blocks() {
        assert_eq!(parse_flash("Instance: 'a'\n", false).unwrap_err().code(), S0300);
        assert_eq!(
            parse_flash("InstanceOf: Patient\n* = 1", false).unwrap_err().code(),
            S0300
        );
        assert_eq!(
            parse_flash("InstanceOf: Patient\nrandom text", false).unwrap_err().code(),
            S0300
        );
    }

    #[test]
    fn test_recover_mode_keeps_good_rules() {
        let source = "InstanceOf: Patient\n* active = true\n* gender = 1 +";
        let (ast, errors) = parse_flash(source, true).unwrap();
        assert_eq!(errors.len(), 1);
        let ExpressionNode::Flash(block) = ast else {
            panic!("expected FLASH block");
        };
        assert_eq!(block.rules.len(), 2);
        assert!(matches!(block.rules[1].value, ExpressionNode::Error { .. }));
    }
}
