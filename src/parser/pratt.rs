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

//! Pratt parser for the expression language
//!
//! Top-down operator precedence: every token has a left binding power, a
//! null denotation (prefix position) and, for infix tokens, a left
//! denotation. In recover mode errors are collected and replaced by
//! [`ExpressionNode::Error`] placeholders instead of aborting the parse.

use std::sync::Arc;

use super::span::Spanned;
use super::tokenizer::{Token, Tokenizer};
use crate::ast::{BinaryOperator, ExpressionNode, LambdaNode, LiteralValue};
use crate::core::error::*;

/// Operator binding powers (higher = tighter binding)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    /// Separators and closing brackets
    None = 0,
    /// `:=` (right associative)
    Assign = 10,
    /// `? :`
    Condition = 20,
    Or = 25,
    And = 30,
    /// Comparisons and `in`
    Comparison = 40,
    /// `+ - &`
    Additive = 50,
    /// `* / %`
    Multiplicative = 60,
    /// Unary minus
    Unary = 70,
    /// `.`
    Path = 75,
    /// `[` and `(`
    Postfix = 80,
}

impl Precedence {
    #[inline(always)]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Left binding power of a token
pub fn left_binding_power(token: &Token) -> Precedence {
    match token {
        Token::Operator(op) => match *op {
            "." => Precedence::Path,
            "[" | "(" => Precedence::Postfix,
            "?" => Precedence::Condition,
            ":=" => Precedence::Assign,
            "+" | "-" | "&" => Precedence::Additive,
            "*" | "/" | "%" => Precedence::Multiplicative,
            "=" | "!=" | "<" | "<=" | ">" | ">=" => Precedence::Comparison,
            _ => Precedence::None,
        },
        Token::Name {
            name,
            quoted: false,
        } => match name.as_str() {
            "and" => Precedence::And,
            "or" => Precedence::Or,
            "in" => Precedence::Comparison,
            _ => Precedence::None,
        },
        _ => Precedence::None,
    }
}

fn binary_operator(token: &Token) -> Option<BinaryOperator> {
    let op = match token {
        Token::Operator(op) => match *op {
            "+" => BinaryOperator::Add,
            "-" => BinaryOperator::Subtract,
            "*" => BinaryOperator::Multiply,
            "/" => BinaryOperator::Divide,
            "%" => BinaryOperator::Modulo,
            "&" => BinaryOperator::Concatenate,
            "=" => BinaryOperator::Equal,
            "!=" => BinaryOperator::NotEqual,
            "<" => BinaryOperator::LessThan,
            "<=" => BinaryOperator::LessThanOrEqual,
            ">" => BinaryOperator::GreaterThan,
            ">=" => BinaryOperator::GreaterThanOrEqual,
            _ => return None,
        },
        Token::Name {
            name,
            quoted: false,
        } => match name.as_str() {
            "and" => BinaryOperator::And,
            "or" => BinaryOperator::Or,
            "in" => BinaryOperator::In,
            _ => return None,
        },
        _ => return None,
    };
    Some(op)
}

/// Pratt parser over one source fragment
pub struct Parser<'input> {
    tokenizer: Tokenizer<'input>,
    current: Spanned<Token>,
    recover: bool,
    errors: Vec<FlashError>,
}

impl<'input> Parser<'input> {
    pub fn new(source: &'input str, recover: bool) -> Self {
        Self::with_offset(source, 0, recover)
    }

    /// Parser for a fragment located `offset` bytes into a larger source
    pub fn with_offset(source: &'input str, offset: usize, recover: bool) -> Self {
        Self {
            tokenizer: Tokenizer::with_offset(source, offset),
            current: Spanned::new(Token::End, offset, offset),
            recover,
            errors: Vec::new(),
        }
    }

    /// Parse the whole fragment.
    ///
    /// Strict mode returns the first error. Recover mode always returns an
    /// AST together with every error encountered.
    pub fn parse(mut self) -> Result<(ExpressionNode, Vec<FlashError>)> {
        let ast = match self.parse_root() {
            Ok(ast) => ast,
            Err(error) if self.recover => {
                self.errors.push(error.clone());
                ExpressionNode::Error {
                    error: Box::new(error),
                }
            }
            Err(error) => return Err(error),
        };
        Ok((ast, self.errors))
    }

    fn parse_root(&mut self) -> Result<ExpressionNode> {
        self.advance()?;
        let ast = self.expression(Precedence::None.as_u8())?;
        if self.current.value != Token::End {
            let error = self.unexpected();
            if self.recover {
                self.errors.push(error);
            } else {
                return Err(error);
            }
        }
        Ok(ast)
    }

    /// Move to the next token, skipping (and in recover mode recording)
    /// lexical errors
    fn advance(&mut self) -> Result<()> {
        loop {
            match self.tokenizer.next_token() {
                Ok(token) => {
                    self.current = token;
                    return Ok(());
                }
                Err(error) if self.recover => self.errors.push(error),
                Err(error) => return Err(error),
            }
        }
    }

    fn unexpected(&self) -> FlashError {
        let token = self.current.value.to_string();
        FlashError::syntax_at_token(
            S0201,
            format!("Syntax error: \"{}\"", token),
            self.current.start,
            token,
        )
    }

    fn expect(&mut self, symbol: &'static str) -> Result<()> {
        if self.current.value.is_operator(symbol) {
            return self.advance();
        }
        if self.current.value == Token::End {
            return Err(FlashError::syntax(
                S0203,
                format!("Expected \"{}\" before end of expression", symbol),
                self.current.start,
            ));
        }
        let token = self.current.value.to_string();
        Err(FlashError::syntax_at_token(
            S0202,
            format!("Expected \"{}\", got \"{}\"", symbol, token),
            self.current.start,
            token,
        ))
    }

    fn expression(&mut self, rbp: u8) -> Result<ExpressionNode> {
        // separators are left in place for the enclosing construct
        if let Token::Operator(op @ (";" | ")" | "]" | "}" | "," | ":")) = self.current.value {
            return Err(FlashError::syntax_at_token(
                S0211,
                format!("The symbol \"{}\" cannot be used as a unary operator", op),
                self.current.start,
                op,
            ));
        }
        let token = self.current.clone();
        self.advance()?;
        let mut left = self.nud(token)?;
        while rbp < left_binding_power(&self.current.value).as_u8() {
            let token = self.current.clone();
            self.advance()?;
            left = self.led(token, left)?;
        }
        Ok(left)
    }

    /// Null denotation: token in prefix position
    fn nud(&mut self, token: Spanned<Token>) -> Result<ExpressionNode> {
        let position = token.start;
        match token.value {
            Token::Number(n) => Ok(ExpressionNode::number(n)),
            Token::String(s) => Ok(ExpressionNode::string(s)),
            Token::Name { name, quoted: true } => Ok(ExpressionNode::Field { name }),
            Token::Name { name, .. } => match name.as_str() {
                "true" => Ok(literal(LiteralValue::Boolean(true))),
                "false" => Ok(literal(LiteralValue::Boolean(false))),
                "null" => Ok(literal(LiteralValue::Null)),
                "function" if self.current.value.is_operator("(") => self.lambda(),
                _ => Ok(ExpressionNode::Field { name }),
            },
            Token::Variable(name) => Ok(match name.as_str() {
                "" => ExpressionNode::Context,
                "$" => ExpressionNode::Root,
                _ => ExpressionNode::variable(name, position),
            }),
            Token::Operator("-") => {
                let operand = self.expression(Precedence::Unary.as_u8())?;
                Ok(ExpressionNode::Negate {
                    operand: Box::new(operand),
                    position,
                })
            }
            Token::Operator("(") => self.block(),
            Token::Operator("[") => {
                let items = self.list("]")?;
                Ok(ExpressionNode::Array { items })
            }
            Token::Operator("{") => self.object(),
            Token::Operator(op) => Err(FlashError::syntax_at_token(
                S0211,
                format!("The symbol \"{}\" cannot be used as a unary operator", op),
                position,
                op,
            )),
            Token::End => Err(FlashError::syntax(
                S0203,
                "Expected an expression before end of expression",
                position,
            )),
        }
    }

    /// Left denotation: token in infix position
    fn led(&mut self, token: Spanned<Token>, left: ExpressionNode) -> Result<ExpressionNode> {
        let position = token.start;
        match &token.value {
            Token::Operator(".") => {
                let rhs = self.expression(Precedence::Path.as_u8())?;
                Ok(ExpressionNode::Path {
                    lhs: Box::new(left),
                    rhs: Box::new(rhs),
                })
            }
            Token::Operator("[") => {
                // `[]` only forces array output, which sequences already do
                if self.current.value.is_operator("]") {
                    self.advance()?;
                    return Ok(left);
                }
                let predicate = self.expression(Precedence::None.as_u8())?;
                self.expect("]")?;
                Ok(ExpressionNode::Predicate {
                    base: Box::new(left),
                    predicate: Box::new(predicate),
                })
            }
            Token::Operator("(") => {
                let args = self.list(")")?;
                Ok(ExpressionNode::Call {
                    callee: Box::new(left),
                    args,
                    position,
                })
            }
            Token::Operator("?") => {
                let then = self.expression(Precedence::None.as_u8())?;
                let otherwise = if self.current.value.is_operator(":") {
                    self.advance()?;
                    Some(Box::new(self.expression(Precedence::None.as_u8())?))
                } else {
                    None
                };
                Ok(ExpressionNode::Condition {
                    condition: Box::new(left),
                    then: Box::new(then),
                    otherwise,
                })
            }
            Token::Operator(":=") => {
                let ExpressionNode::Variable { name, .. } = left else {
                    return Err(FlashError::syntax(
                        S0212,
                        "The left side of := must be a variable name (start with $)",
                        position,
                    ));
                };
                let value = self.expression(Precedence::Assign.as_u8() - 1)?;
                Ok(ExpressionNode::Assign {
                    name,
                    value: Box::new(value),
                })
            }
            other => match binary_operator(other) {
                Some(op) => {
                    let rhs = self.expression(left_binding_power(other).as_u8())?;
                    Ok(ExpressionNode::binary(op, left, rhs, position))
                }
                None => Err(FlashError::syntax_at_token(
                    S0201,
                    format!("Syntax error: \"{}\"", other),
                    position,
                    other.to_string(),
                )),
            },
        }
    }

    /// Comma separated expressions up to `close`
    fn list(&mut self, close: &'static str) -> Result<Vec<ExpressionNode>> {
        let mut items = Vec::new();
        if !self.current.value.is_operator(close) {
            loop {
                items.push(self.expression(Precedence::None.as_u8())?);
                if !self.current.value.is_operator(",") {
                    break;
                }
                self.advance()?;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn object(&mut self) -> Result<ExpressionNode> {
        let mut entries = Vec::new();
        if !self.current.value.is_operator("}") {
            loop {
                let key = self.expression(Precedence::None.as_u8())?;
                self.expect(":")?;
                let value = self.expression(Precedence::None.as_u8())?;
                entries.push((key, value));
                if !self.current.value.is_operator(",") {
                    break;
                }
                self.advance()?;
            }
        }
        self.expect("}")?;
        Ok(ExpressionNode::Object { entries })
    }

    fn lambda(&mut self) -> Result<ExpressionNode> {
        self.expect("(")?;
        let mut params = Vec::new();
        if !self.current.value.is_operator(")") {
            loop {
                match &self.current.value {
                    Token::Variable(name) if !name.is_empty() && name != "$" => {
                        params.push(name.clone());
                        self.advance()?;
                    }
                    _ => return Err(self.unexpected()),
                }
                if !self.current.value.is_operator(",") {
                    break;
                }
                self.advance()?;
            }
        }
        self.expect(")")?;
        self.expect("{")?;
        let body = self.expression(Precedence::None.as_u8())?;
        self.expect("}")?;
        Ok(ExpressionNode::Lambda(LambdaNode {
            params,
            body: Arc::new(body),
        }))
    }

    /// `( e1; e2; ... )`. Recover mode resynchronises at `;` or the closing
    /// parenthesis after a failed item.
    fn block(&mut self) -> Result<ExpressionNode> {
        let mut expressions = Vec::new();
        while !self.current.value.is_operator(")") {
            match self.expression(Precedence::None.as_u8()) {
                Ok(expression) => expressions.push(expression),
                Err(error) if self.recover => {
                    self.errors.push(error.clone());
                    expressions.push(ExpressionNode::Error {
                        error: Box::new(error),
                    });
                    self.synchronize()?;
                }
                Err(error) => return Err(error),
            }
            if self.current.value.is_operator(";") {
                self.advance()?;
            } else {
                break;
            }
        }
        self.expect(")")?;
        Ok(ExpressionNode::Block { expressions })
    }

    /// Skip tokens until a `;` or `)` that belongs to the enclosing block
    fn synchronize(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            match &self.current.value {
                Token::End => return Ok(()),
                Token::Operator(";") | Token::Operator(")") if depth == 0 => return Ok(()),
                Token::Operator("(") | Token::Operator("[") | Token::Operator("{") => depth += 1,
                Token::Operator(")") | Token::Operator("]") | Token::Operator("}") => {
                    depth = depth.saturating_sub(1)
                }
                _ => {}
            }
            self.advance()?;
        }
    }
}

fn literal(value: LiteralValue) -> ExpressionNode {
    ExpressionNode::Literal { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> ExpressionNode {
        Parser::new(source, false).parse().unwrap().0
    }

    fn parse_err(source: &str) -> FlashError {
        Parser::new(source, false).parse().unwrap_err()
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(
            parse("1 + 2 * 3"),
            ExpressionNode::binary(
                BinaryOperator::Add,
                ExpressionNode::number(1.0),
                ExpressionNode::binary(
                    BinaryOperator::Multiply,
                    ExpressionNode::number(2.0),
                    ExpressionNode::number(3.0),
                    6,
                ),
                2,
            )
        );
    }

    #[test]
    fn test_left_associativity() {
        let ExpressionNode::Binary { lhs, .. } = parse("10 - 4 - 3") else {
            panic!("expected binary");
        };
        assert!(matches!(*lhs, ExpressionNode::Binary { op: BinaryOperator::Subtract, .. }));
    }

    #[test]
    fn test_paths_and_predicates() {
        let ast = parse("name[0].given");
        let ExpressionNode::Path { lhs, rhs } = ast else {
            panic!("expected path");
        };
        assert!(matches!(*lhs, ExpressionNode::Predicate { .. }));
        assert_eq!(*rhs, ExpressionNode::Field { name: "given".into() });
    }

    #[test]
    fn test_call_with_context_and_variables() {
        let ast = parse("$greeting($, $$)");
        let ExpressionNode::Call { callee, args, .. } = ast else {
            panic!("expected call");
        };
        assert_eq!(*callee, ExpressionNode::variable("greeting", 0));
        assert_eq!(args, vec![ExpressionNode::Context, ExpressionNode::Root]);
    }

    #[test]
    fn test_block_with_assignment_and_lambda() {
        let ast = parse("($f := function($x) { $x * 2 }; $f(4))");
        let ExpressionNode::Block { expressions } = ast else {
            panic!("expected block");
        };
        assert_eq!(expressions.len(), 2);
        assert!(matches!(&expressions[0], ExpressionNode::Assign { name, .. } if name == "f"));
    }

    #[test]
    fn test_condition_and_constructors() {
        assert!(matches!(parse("a ? 1 : 2"), ExpressionNode::Condition { otherwise: Some(_), .. }));
        assert!(matches!(parse("[1, 2]"), ExpressionNode::Array { items } if items.len() == 2));
        assert!(matches!(parse("{\"a\": 1}"), ExpressionNode::Object { entries } if entries.len() == 1));
        assert!(matches!(parse("{}"), ExpressionNode::Object { entries } if entries.is_empty()));
    }

    #[test]
    fn test_keyword_operators() {
        assert!(matches!(
            parse("a and b or c"),
            ExpressionNode::Binary { op: BinaryOperator::Or, .. }
        ));
        assert!(matches!(
            parse("x in [1, 2]"),
            ExpressionNode::Binary { op: BinaryOperator::In, .. }
        ));
    }

    #[test]
    fn test_strict_errors() {
        assert_eq!(parse_err("$ + + $").code(), S0211);
        assert_eq!(parse_err("(1; 2").code(), S0203);
        assert_eq!(parse_err("[1 2]").code(), S0202);
        assert_eq!(parse_err("1 2").code(), S0201);
        assert_eq!(parse_err("a := 1").code(), S0212);
        assert_eq!(parse_err("").code(), S0203);
    }

    #[test]
    fn test_recover_mode_collects_errors() {
        let (ast, errors) = Parser::new("(1 + ; 2)", true).parse().unwrap();
        assert_eq!(errors.len(), 1);
        let ExpressionNode::Block { expressions } = ast else {
            panic!("expected block");
        };
        assert!(matches!(expressions[0], ExpressionNode::Error { .. }));
        assert_eq!(expressions[1], ExpressionNode::number(2.0));
    }

    #[test]
    fn test_recover_mode_top_level_error() {
        let (ast, errors) = Parser::new("$ + + $", true).parse().unwrap();
        assert!(matches!(ast, ExpressionNode::Error { .. }));
        assert_eq!(errors[0].code(), S0211);
    }

    #[test]
    fn test_recover_mode_skips_lexical_errors() {
        let (ast, errors) = Parser::new("1 # + 2", true).parse().unwrap();
        assert_eq!(errors[0].code(), S0204);
        assert!(matches!(ast, ExpressionNode::Binary { op: BinaryOperator::Add, .. }));
    }
}
