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

//! Expression AST node definitions

use serde::Serialize;
use std::mem::size_of;
use std::sync::Arc;

use crate::core::{FlashError, MemoryFootprint};

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum LiteralValue {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concatenate,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    In,
    And,
    Or,
}

impl BinaryOperator {
    /// Source symbol of the operator
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Concatenate => "&",
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::In => "in",
            Self::And => "and",
            Self::Or => "or",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide | Self::Modulo
        )
    }
}

/// Lambda definition `function($a, $b) { body }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LambdaNode {
    pub params: Vec<String>,
    pub body: Arc<ExpressionNode>,
}

/// One `* path = expression` rule of a FLASH block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlashRule {
    /// Dotted element path relative to the instance root
    pub path: String,
    pub value: ExpressionNode,
    /// Offset of the rule in the source
    pub position: usize,
}

/// A FLASH block
///
/// ```text
/// Instance: $id
/// InstanceOf: Patient
/// * name.family = "Doe"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashBlock {
    pub instance_id: Option<Box<ExpressionNode>>,
    pub instance_of: String,
    pub rules: Vec<FlashRule>,
}

/// AST node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "camelCase")]
pub enum ExpressionNode {
    Literal { value: LiteralValue },
    /// `$`
    Context,
    /// `$$`
    Root,
    /// `$name`
    Variable { name: String, position: usize },
    /// Field name step
    Field { name: String },
    /// `lhs.rhs`
    Path {
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    /// `base[predicate]`
    Predicate {
        base: Box<ExpressionNode>,
        predicate: Box<ExpressionNode>,
    },
    Binary {
        op: BinaryOperator,
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
        position: usize,
    },
    Negate {
        operand: Box<ExpressionNode>,
        position: usize,
    },
    Condition {
        condition: Box<ExpressionNode>,
        then: Box<ExpressionNode>,
        otherwise: Option<Box<ExpressionNode>>,
    },
    /// `( e1; e2; ... )`
    Block { expressions: Vec<ExpressionNode> },
    /// `$name := value`
    Assign {
        name: String,
        value: Box<ExpressionNode>,
    },
    Lambda(LambdaNode),
    /// `callee(args...)`
    Call {
        callee: Box<ExpressionNode>,
        args: Vec<ExpressionNode>,
        position: usize,
    },
    Array { items: Vec<ExpressionNode> },
    Object {
        entries: Vec<(ExpressionNode, ExpressionNode)>,
    },
    Flash(FlashBlock),
    /// Placeholder substituted by recover-mode parsing
    Error { error: Box<FlashError> },
}

impl ExpressionNode {
    pub fn number(n: f64) -> Self {
        Self::Literal {
            value: LiteralValue::Number(n),
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::Literal {
            value: LiteralValue::String(s.into()),
        }
    }

    pub fn variable(name: impl Into<String>, position: usize) -> Self {
        Self::Variable {
            name: name.into(),
            position,
        }
    }

    pub fn binary(op: BinaryOperator, lhs: ExpressionNode, rhs: ExpressionNode, position: usize) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            position,
        }
    }

    /// Visit this node and every descendant, depth first
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a ExpressionNode)) {
        visit(self);
        match self {
            Self::Path { lhs, rhs } | Self::Binary { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Self::Predicate { base, predicate } => {
                base.walk(visit);
                predicate.walk(visit);
            }
            Self::Negate { operand, .. } => operand.walk(visit),
            Self::Condition {
                condition,
                then,
                otherwise,
            } => {
                condition.walk(visit);
                then.walk(visit);
                if let Some(otherwise) = otherwise {
                    otherwise.walk(visit);
                }
            }
            Self::Block { expressions } => expressions.iter().for_each(|e| e.walk(visit)),
            Self::Assign { value, .. } => value.walk(visit),
            Self::Lambda(lambda) => lambda.body.walk(visit),
            Self::Call { callee, args, .. } => {
                callee.walk(visit);
                args.iter().for_each(|a| a.walk(visit));
            }
            Self::Array { items } => items.iter().for_each(|i| i.walk(visit)),
            Self::Object { entries } => entries.iter().for_each(|(k, v)| {
                k.walk(visit);
                v.walk(visit);
            }),
            Self::Flash(block) => {
                if let Some(id) = &block.instance_id {
                    id.walk(visit);
                }
                block.rules.iter().for_each(|r| r.value.walk(visit));
            }
            Self::Literal { .. }
            | Self::Context
            | Self::Root
            | Self::Variable { .. }
            | Self::Field { .. }
            | Self::Error { .. } => {}
        }
    }

    /// All FLASH blocks in this tree
    pub fn flash_blocks(&self) -> Vec<&FlashBlock> {
        let mut blocks = Vec::new();
        self.walk(&mut |node| {
            if let Self::Flash(block) = node {
                blocks.push(block);
            }
        });
        blocks
    }

    pub fn contains_flash(&self) -> bool {
        !self.flash_blocks().is_empty()
    }

    /// Number of nodes in the tree
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }
}

impl MemoryFootprint for ExpressionNode {
    fn heap_size(&self) -> usize {
        let mut total = 0;
        self.walk(&mut |node| {
            total += match node {
                Self::Literal {
                    value: LiteralValue::String(s),
                } => s.heap_size(),
                Self::Variable { name, .. } | Self::Field { name } | Self::Assign { name, .. } => {
                    name.heap_size()
                }
                Self::Lambda(lambda) => lambda.params.heap_size(),
                Self::Block { expressions } => expressions.capacity() * size_of::<Self>(),
                Self::Call { args, .. } => args.capacity() * size_of::<Self>(),
                Self::Array { items } => items.capacity() * size_of::<Self>(),
                Self::Object { entries } => entries.capacity() * 2 * size_of::<Self>(),
                Self::Flash(block) => {
                    block.instance_of.heap_size()
                        + block
                            .rules
                            .iter()
                            .map(|r| size_of::<FlashRule>() + r.path.heap_size())
                            .sum::<usize>()
                }
                Self::Error { error } => size_of::<FlashError>() + error.message().len(),
                _ => 0,
            };
            // boxed children are counted where they are owned
            total += match node {
                Self::Path { .. } | Self::Predicate { .. } | Self::Binary { .. } => 2 * size_of::<Self>(),
                Self::Negate { .. } | Self::Assign { .. } => size_of::<Self>(),
                Self::Condition { otherwise, .. } => {
                    (2 + usize::from(otherwise.is_some())) * size_of::<Self>()
                }
                _ => 0,
            };
        });
        total
    }
}
