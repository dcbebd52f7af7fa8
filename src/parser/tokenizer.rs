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

//! Tokenizer for the expression language
//!
//! Produces tokens on demand. On a lexical error the tokenizer has already
//! moved past the offending input, so a recovering parser can keep pulling
//! tokens after reporting it.

use std::fmt;

use super::span::Spanned;
use crate::core::error::*;

/// Lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Numeric literal
    Number(f64),
    /// String literal with escapes resolved
    String(String),
    /// Name; `quoted` is true for backtick names, which are never keywords
    Name { name: String, quoted: bool },
    /// `$name`; `$` is the empty name and `$$` is `"$"`
    Variable(String),
    /// Punctuation or symbolic operator
    Operator(&'static str),
    /// End of input
    End,
}

impl Token {
    pub fn is_operator(&self, symbol: &str) -> bool {
        matches!(self, Token::Operator(op) if *op == symbol)
    }

    /// True for an unquoted name equal to `keyword`
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Name { name, quoted: false } if name == keyword)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", crate::core::format_number(*n)),
            Token::String(s) => write!(f, "\"{}\"", s),
            Token::Name { name, .. } => write!(f, "{}", name),
            Token::Variable(name) => write!(f, "${}", name),
            Token::Operator(op) => write!(f, "{}", op),
            Token::End => write!(f, "(end)"),
        }
    }
}

const OPERATORS: &[&str] = &[
    ":=", "!=", "<=", ">=", ".", "[", "]", "{", "}", "(", ")", ",", ";", ":", "?", "+", "-", "*",
    "/", "%", "&", "=", "<", ">",
];

fn is_operator_char(c: char) -> bool {
    matches!(
        c,
        '.' | '[' | ']' | '{' | '}' | '(' | ')' | ',' | ';' | ':' | '?' | '+' | '-' | '*' | '/'
            | '%' | '&' | '=' | '<' | '>' | '!' | '|' | '^' | '~' | '@' | '#' | '"' | '\''
            | '`' | '$'
    )
}

/// On-demand tokenizer over a source fragment
pub struct Tokenizer<'input> {
    source: &'input str,
    pos: usize,
    /// Added to every reported position
    offset: usize,
}

impl<'input> Tokenizer<'input> {
    pub fn new(source: &'input str) -> Self {
        Self::with_offset(source, 0)
    }

    /// Tokenize a fragment that starts `offset` bytes into a larger source
    pub fn with_offset(source: &'input str, offset: usize) -> Self {
        Self {
            source,
            pos: 0,
            offset,
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.source[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, code: ErrorCode, message: impl Into<String>, at: usize) -> FlashError {
        FlashError::syntax(code, message, at + self.offset)
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_second() == Some('*') => {
                    let start = self.pos;
                    match self.source[self.pos + 2..].find("*/") {
                        Some(end) => self.pos += 2 + end + 2,
                        None => {
                            self.pos = self.source.len();
                            return Err(self.error(S0106, "Comment has no closing tag", start));
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Produce the next token
    pub fn next_token(&mut self) -> Result<Spanned<Token>> {
        self.skip_trivia()?;
        let start = self.pos;
        let Some(c) = self.peek_char() else {
            return Ok(self.spanned(Token::End, start));
        };

        let token = match c {
            '"' | '\'' => self.string_literal(c)?,
            '`' => self.quoted_name()?,
            '$' => {
                self.bump();
                if self.peek_char() == Some('$') {
                    self.bump();
                    Token::Variable("$".to_string())
                } else {
                    Token::Variable(self.take_name())
                }
            }
            c if c.is_ascii_digit() => self.number()?,
            c if is_operator_char(c) => self.operator()?,
            _ => Token::Name {
                name: self.take_name(),
                quoted: false,
            },
        };
        Ok(self.spanned(token, start))
    }

    fn spanned(&self, token: Token, start: usize) -> Spanned<Token> {
        Spanned::new(token, start, self.pos).shifted(self.offset)
    }

    fn take_name(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() || is_operator_char(c) {
                break;
            }
            self.bump();
        }
        self.source[start..self.pos].to_string()
    }

    fn operator(&mut self) -> Result<Token> {
        let start = self.pos;
        let rest = &self.source[self.pos..];
        if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            self.pos += op.len();
            return Ok(Token::Operator(op));
        }
        let c = self.bump().unwrap_or_default();
        Err(self.error(S0204, format!("Unknown operator: \"{}\"", c), start))
    }

    fn number(&mut self) -> Result<Token> {
        let start = self.pos;
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek_char() == Some('.') && matches!(self.peek_second(), Some(c) if c.is_ascii_digit()) {
            self.bump();
            while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek_char(), Some('e') | Some('E')) {
            let save = self.pos;
            self.bump();
            if matches!(self.peek_char(), Some('+') | Some('-')) {
                self.bump();
            }
            if matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                self.pos = save;
            }
        }
        let text = &self.source[start..self.pos];
        match text.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(Token::Number(n)),
            _ => Err(self.error(S0102, format!("Number out of range: {}", text), start)),
        }
    }

    fn quoted_name(&mut self) -> Result<Token> {
        let start = self.pos;
        self.bump();
        match self.source[self.pos..].find('`') {
            Some(end) => {
                let name = self.source[self.pos..self.pos + end].to_string();
                self.pos += end + 1;
                Ok(Token::Name { name, quoted: true })
            }
            None => {
                self.pos = self.source.len();
                Err(self.error(S0105, "Quoted property name must be terminated with a backquote (`)", start))
            }
        }
    }

    fn string_literal(&mut self, quote: char) -> Result<Token> {
        let start = self.pos;
        self.bump();
        let mut value = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.error(S0101, "String literal must be terminated by a matching quote", start));
            };
            match c {
                c if c == quote => return Ok(Token::String(value)),
                '\\' => {
                    let escape_at = self.pos - 1;
                    match self.bump() {
                        Some('"') => value.push('"'),
                        Some('\'') => value.push('\''),
                        Some('\\') => value.push('\\'),
                        Some('/') => value.push('/'),
                        Some('b') => value.push('\u{0008}'),
                        Some('f') => value.push('\u{000C}'),
                        Some('n') => value.push('\n'),
                        Some('r') => value.push('\r'),
                        Some('t') => value.push('\t'),
                        Some('u') => {
                            let hex: String = self.source[self.pos..].chars().take(4).collect();
                            let code = (hex.len() == 4)
                                .then(|| u32::from_str_radix(&hex, 16).ok())
                                .flatten()
                                .and_then(char::from_u32);
                            match code {
                                Some(ch) => {
                                    self.pos += 4;
                                    value.push(ch);
                                }
                                None => {
                                    self.skip_past(quote);
                                    return Err(self.error(
                                        S0104,
                                        "The escape sequence \\u must be followed by 4 hex digits",
                                        escape_at,
                                    ));
                                }
                            }
                        }
                        other => {
                            self.skip_past(quote);
                            return Err(self.error(
                                S0103,
                                format!(
                                    "Unsupported escape sequence: \\{}",
                                    other.map(String::from).unwrap_or_default()
                                ),
                                escape_at,
                            ));
                        }
                    }
                }
                c => value.push(c),
            }
        }
    }

    fn skip_past(&mut self, quote: char) {
        while let Some(c) = self.bump() {
            if c == quote {
                break;
            }
        }
    }
}

/// Tokenize a whole source, stopping at the first error
pub fn tokenize(source: &str) -> Result<Vec<Spanned<Token>>> {
    let mut tokenizer = Tokenizer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = tokenizer.next_token()?;
        let done = token.value == Token::End;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|t| t.value).collect()
    }

    #[test]
    fn test_operators_and_literals() {
        assert_eq!(
            kinds("1 + 2.5 * $x"),
            vec![
                Token::Number(1.0),
                Token::Operator("+"),
                Token::Number(2.5),
                Token::Operator("*"),
                Token::Variable("x".into()),
                Token::End,
            ]
        );
    }

    #[test]
    fn test_context_and_root_variables() {
        assert_eq!(
            kinds("$ & $$"),
            vec![
                Token::Variable(String::new()),
                Token::Operator("&"),
                Token::Variable("$".into()),
                Token::End,
            ]
        );
    }

    #[test]
    fn test_multi_char_operators() {
        assert_eq!(kinds("$a := 1")[1], Token::Operator(":="));
        assert_eq!(kinds("a != b")[1], Token::Operator("!="));
        assert_eq!(kinds("a <= b")[1], Token::Operator("<="));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(kinds(r#""a\"bA""#)[0], Token::String("a\"bA".into()));
        assert_eq!(kinds("'single'")[0], Token::String("single".into()));
    }

    #[test]
    fn test_quoted_names_are_not_keywords() {
        let token = &kinds("`and`")[0];
        assert!(!token.is_keyword("and"));
        assert!(kinds("and")[0].is_keyword("and"));
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(kinds("/* note */ 1"), vec![Token::Number(1.0), Token::End]);
    }

    #[test]
    fn test_lexical_errors() {
        assert_eq!(tokenize("\"open").unwrap_err().code(), S0101);
        assert_eq!(tokenize(r#""\q""#).unwrap_err().code(), S0103);
        assert_eq!(tokenize(r#""\u12""#).unwrap_err().code(), S0104);
        assert_eq!(tokenize("`open").unwrap_err().code(), S0105);
        assert_eq!(tokenize("/* open").unwrap_err().code(), S0106);
        assert_eq!(tokenize("1 # 2").unwrap_err().code(), S0204);
    }

    #[test]
    fn test_positions_respect_offset() {
        let mut tokenizer = Tokenizer::with_offset("  x", 10);
        let token = tokenizer.next_token().unwrap();
        assert_eq!((token.start, token.end), (12, 13));
    }
}
