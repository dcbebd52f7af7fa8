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

//! Function signatures
//!
//! Signatures use the compact notation `<params:result>`, one symbol per
//! parameter:
//!
//! | Symbol | Accepts |
//! |---|---|
//! | `s` `n` `b` `l` | string, number, boolean, null |
//! | `a` / `a<n>` | array (of the given item type); a single value is wrapped |
//! | `o` `f` | object, function |
//! | `j` | any JSON value |
//! | `x` | anything |
//! | `u` | `(bnsl)` |
//! | `(sn)` | union of the enclosed types |
//!
//! Modifiers follow the symbol: `?` optional, `+` one or more, `-` use the
//! context value when the argument is omitted.

use smallvec::SmallVec;
use std::fmt;

use crate::core::error::*;
use crate::core::Value;

/// Accepted type of one parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Null,
    Array(Option<Box<ParamType>>),
    Object,
    Function,
    Json,
    Any,
    Union(Vec<ParamType>),
}

impl ParamType {
    fn from_symbol(symbol: char) -> Option<Self> {
        Some(match symbol {
            's' => ParamType::String,
            'n' => ParamType::Number,
            'b' => ParamType::Boolean,
            'l' => ParamType::Null,
            'a' => ParamType::Array(None),
            'o' => ParamType::Object,
            'f' => ParamType::Function,
            'j' => ParamType::Json,
            'x' => ParamType::Any,
            'u' => ParamType::Union(vec![
                ParamType::Boolean,
                ParamType::Number,
                ParamType::String,
                ParamType::Null,
            ]),
            _ => return None,
        })
    }

    /// Whether `value` is accepted as is
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (ParamType::Any, _) => true,
            (ParamType::Json, value) => !value.is_function(),
            (ParamType::String, Value::String(_))
            | (ParamType::Number, Value::Number(_))
            | (ParamType::Boolean, Value::Bool(_))
            | (ParamType::Null, Value::Null)
            | (ParamType::Object, Value::Object(_))
            | (ParamType::Function, Value::Function(_)) => true,
            (ParamType::Array(None), Value::Array(_)) => true,
            (ParamType::Array(Some(item)), Value::Array(items)) => items.iter().all(|v| item.matches(v)),
            (ParamType::Union(kinds), value) => kinds.iter().any(|kind| kind.matches(value)),
            _ => false,
        }
    }

    /// Accept `value`, wrapping a single item where an array is expected
    fn coerce(&self, value: Value) -> Option<Value> {
        if self.matches(&value) {
            return Some(value);
        }
        match self {
            ParamType::Array(item) if !matches!(value, Value::Array(_)) => {
                let accepted = item.as_ref().is_none_or(|item| item.matches(&value));
                accepted.then(|| Value::Array(vec![value]))
            }
            ParamType::Union(kinds) => kinds.iter().find_map(|kind| kind.coerce(value.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::String => write!(f, "s"),
            ParamType::Number => write!(f, "n"),
            ParamType::Boolean => write!(f, "b"),
            ParamType::Null => write!(f, "l"),
            ParamType::Array(None) => write!(f, "a"),
            ParamType::Array(Some(item)) => write!(f, "a<{}>", item),
            ParamType::Object => write!(f, "o"),
            ParamType::Function => write!(f, "f"),
            ParamType::Json => write!(f, "j"),
            ParamType::Any => write!(f, "x"),
            ParamType::Union(kinds) => {
                write!(f, "(")?;
                for kind in kinds {
                    write!(f, "{}", kind)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub kind: ParamType,
    pub optional: bool,
    pub variadic: bool,
    /// Filled from the context value when omitted
    pub context: bool,
}

/// Parsed signature
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    source: String,
    pub params: SmallVec<[Param; 4]>,
    pub result: Option<ParamType>,
}

impl Signature {
    /// Parse a signature such as `<s-n?:s>`
    pub fn parse(source: &str) -> Result<Self> {
        let mut parser = SignatureParser {
            chars: source.char_indices().collect(),
            index: 0,
            source,
        };
        parser.expect('<')?;
        let mut params = SmallVec::new();
        while let Some(symbol) = parser.peek() {
            if symbol == ':' || symbol == '>' {
                break;
            }
            let kind = parser.param_type()?;
            let mut param = Param {
                kind,
                optional: false,
                variadic: false,
                context: false,
            };
            while let Some(modifier) = parser.peek() {
                match modifier {
                    '?' => param.optional = true,
                    '+' => param.variadic = true,
                    '-' => param.context = true,
                    _ => break,
                }
                parser.index += 1;
            }
            params.push(param);
        }
        let result = if parser.peek() == Some(':') {
            parser.index += 1;
            Some(parser.param_type()?)
        } else {
            None
        };
        parser.expect('>')?;
        if let Some(c) = parser.peek() {
            return Err(parser.error(format!("unexpected '{}' after signature", c)));
        }
        Ok(Self {
            source: source.to_string(),
            params,
            result,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Number of arguments that must be supplied
    pub fn min_arity(&self) -> usize {
        self.params.iter().filter(|p| !p.optional).count()
    }

    /// Largest number of arguments, `None` when the last parameter repeats
    pub fn max_arity(&self) -> Option<usize> {
        if self.params.iter().any(|p| p.variadic) {
            None
        } else {
            Some(self.params.len())
        }
    }

    /// Check `args` against the signature and normalise them.
    ///
    /// Substitutes `context` for an omitted `-` parameter and wraps single
    /// values passed to array parameters. Undefined arguments are accepted
    /// for any parameter.
    pub fn validate(&self, function: &str, mut args: Vec<Value>, context: &Value) -> Result<Vec<Value>> {
        if args.len() < self.min_arity() {
            if let Some(index) = self.params.iter().position(|p| p.context) {
                if index <= args.len() {
                    args.insert(index, context.clone());
                }
            }
        }
        if args.len() < self.min_arity() {
            return Err(FlashError::type_error(
                T0411,
                format!(
                    "Function ${} expects at least {} argument(s), got {}",
                    function,
                    self.min_arity(),
                    args.len()
                ),
            ));
        }
        if let Some(max) = self.max_arity() {
            if args.len() > max {
                return Err(FlashError::type_error(
                    T0412,
                    format!(
                        "Function ${} expects at most {} argument(s), got {}",
                        function,
                        max,
                        args.len()
                    ),
                ));
            }
        }

        let last = self.params.len().saturating_sub(1);
        args.into_iter()
            .enumerate()
            .map(|(index, arg)| {
                let param = &self.params[index.min(last)];
                if arg.is_undefined() {
                    return Ok(arg);
                }
                let type_name = arg.type_name();
                param.kind.coerce(arg).ok_or_else(|| {
                    FlashError::type_error(
                        T0410,
                        format!(
                            "Argument {} of function ${} does not match signature {}: got {}",
                            index + 1,
                            function,
                            self.source,
                            type_name
                        ),
                    )
                })
            })
            .collect()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

struct SignatureParser<'s> {
    chars: Vec<(usize, char)>,
    index: usize,
    source: &'s str,
}

impl SignatureParser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.index)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.source.len())
    }

    fn error(&self, message: String) -> FlashError {
        FlashError::syntax(
            S0201,
            format!("Invalid function signature '{}': {}", self.source, message),
            self.offset(),
        )
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.peek() {
            Some(c) if c == expected => {
                self.index += 1;
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", expected, c))),
            None => Err(self.error(format!("expected '{}'", expected))),
        }
    }

    fn param_type(&mut self) -> Result<ParamType> {
        let Some(symbol) = self.peek() else {
            return Err(self.error("expected a type symbol".to_string()));
        };
        self.index += 1;
        if symbol == '(' {
            let mut kinds = Vec::new();
            while self.peek() != Some(')') {
                kinds.push(self.param_type()?);
            }
            self.index += 1;
            return Ok(ParamType::Union(kinds));
        }
        let kind = ParamType::from_symbol(symbol)
            .ok_or_else(|| self.error(format!("unknown type symbol '{}'", symbol)))?;
        if matches!(kind, ParamType::Array(None)) && self.peek() == Some('<') {
            self.index += 1;
            let item = self.param_type()?;
            self.expect('>')?;
            return Ok(ParamType::Array(Some(Box::new(item))));
        }
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_substring_signature() {
        let signature = Signature::parse("<s-nn?:s>").unwrap();
        assert_eq!(signature.params.len(), 3);
        assert!(signature.params[0].context);
        assert!(signature.params[2].optional);
        assert_eq!(signature.result, Some(ParamType::String));
        assert_eq!(signature.min_arity(), 2);
        assert_eq!(signature.max_arity(), Some(3));
    }

    #[test]
    fn test_parse_unions_and_subtypes() {
        let signature = Signature::parse("<a<n>(sn)+>").unwrap();
        assert_eq!(
            signature.params[0].kind,
            ParamType::Array(Some(Box::new(ParamType::Number)))
        );
        assert_eq!(signature.params[1].kind.to_string(), "(sn)");
        assert!(signature.params[1].variadic);
        assert_eq!(signature.max_arity(), None);
    }

    #[test]
    fn test_parse_rejects_unknown_symbols() {
        assert_eq!(Signature::parse("<q>").unwrap_err().code(), S0201);
        assert_eq!(Signature::parse("s:s").unwrap_err().code(), S0201);
        assert_eq!(Signature::parse("<s:s").unwrap_err().code(), S0201);
    }

    #[test]
    fn test_context_substitution() {
        let signature = Signature::parse("<s-:s>").unwrap();
        let args = signature
            .validate("uppercase", vec![], &Value::from("abc"))
            .unwrap();
        assert_eq!(args, vec![Value::from("abc")]);
    }

    #[test]
    fn test_arity_and_type_errors() {
        let signature = Signature::parse("<sn:s>").unwrap();
        let context = Value::Undefined;
        assert_eq!(
            signature.validate("f", vec![Value::from("a")], &context).unwrap_err().code(),
            T0411
        );
        let too_many = vec![Value::from("a"), Value::from(1i64), Value::from(2i64)];
        assert_eq!(signature.validate("f", too_many, &context).unwrap_err().code(), T0412);
        let wrong = vec![Value::from(1i64), Value::from(1i64)];
        assert_eq!(signature.validate("f", wrong, &context).unwrap_err().code(), T0410);
    }

    #[test]
    fn test_array_parameter_wraps_single_values() {
        let signature = Signature::parse("<a<n>:n>").unwrap();
        let args = signature
            .validate("sum", vec![Value::from(3i64)], &Value::Undefined)
            .unwrap();
        assert_eq!(args, vec![Value::from(json!([3]))]);
        let err = signature
            .validate("sum", vec![Value::from(json!(["x"]))], &Value::Undefined)
            .unwrap_err();
        assert_eq!(err.code(), T0410);
    }
}
