//! Recursive-descent parser for the `${{ expr }}` expression grammar. Hand-written over a small token stream rather than pulling in a
//! parser-combinator crate for a grammar this regular.

use crate::ast::{Arg, Expr, FilterCall, Path, Root};
use crate::error::TemplateError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    Dot,
    Pipe,
    At,
    LParen,
    RParen,
    Comma,
    Question,
}

fn tokenize(src: &str, expr: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '?' => {
                tokens.push(Token::Question);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == quote {
                        closed = true;
                        i += 1;
                        break;
                    }
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        i += 1;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err(parse_err(expr, "unterminated string literal"));
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| parse_err(expr, format!("invalid number literal '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            }
            other => {
                return Err(parse_err(expr, format!("unexpected character '{other}'")));
            }
        }
    }
    Ok(tokens)
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    expr: &'a str,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn expect_ident(&mut self) -> Result<String, TemplateError> {
        match self.bump() {
            Some(Token::Ident(s)) => Ok(s.clone()),
            other => Err(parse_err(self.expr, format!("expected identifier, found {other:?}"))),
        }
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

fn parse_path(cur: &mut Cursor<'_>) -> Result<Path, TemplateError> {
    let mut path = vec![cur.expect_ident()?];
    while cur.eat(&Token::Dot) {
        path.push(cur.expect_ident()?);
    }
    Ok(path)
}

/// Parse the expression root: a bare literal (`true`, `false`, a quoted
/// string, or a number) when the next token can't start a variable path, or
/// a dotted path otherwise.
fn parse_root(cur: &mut Cursor<'_>) -> Result<Root, TemplateError> {
    match cur.peek() {
        Some(Token::Str(_)) => {
            if let Some(Token::Str(s)) = cur.bump() {
                Ok(Root::Literal(Value::String(s.clone())))
            } else {
                unreachable!()
            }
        }
        Some(Token::Number(_)) => {
            if let Some(Token::Number(n)) = cur.bump() {
                Ok(Root::Literal(
                    serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
                ))
            } else {
                unreachable!()
            }
        }
        Some(Token::Ident(name)) if name == "true" => {
            cur.bump();
            Ok(Root::Literal(Value::Bool(true)))
        }
        Some(Token::Ident(name)) if name == "false" => {
            cur.bump();
            Ok(Root::Literal(Value::Bool(false)))
        }
        Some(Token::Ident(name)) if name == "null" => {
            cur.bump();
            Ok(Root::Literal(Value::Null))
        }
        _ => Ok(Root::Path(parse_path(cur)?)),
    }
}

fn parse_arg(cur: &mut Cursor<'_>) -> Result<Arg, TemplateError> {
    match cur.peek() {
        Some(Token::Str(_)) => {
            if let Some(Token::Str(s)) = cur.bump() {
                Ok(Arg::Literal(Value::String(s.clone())))
            } else {
                unreachable!()
            }
        }
        Some(Token::Number(_)) => {
            if let Some(Token::Number(n)) = cur.bump() {
                Ok(Arg::Literal(
                    serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
                ))
            } else {
                unreachable!()
            }
        }
        Some(Token::Ident(name)) if name == "true" => {
            cur.bump();
            Ok(Arg::Literal(Value::Bool(true)))
        }
        Some(Token::Ident(name)) if name == "false" => {
            cur.bump();
            Ok(Arg::Literal(Value::Bool(false)))
        }
        Some(Token::Ident(_)) => Ok(Arg::Path(parse_path(cur)?)),
        other => Err(parse_err(cur.expr, format!("expected argument, found {other:?}"))),
    }
}

fn parse_filter(cur: &mut Cursor<'_>) -> Result<FilterCall, TemplateError> {
    let name = cur.expect_ident()?;
    let mut args = Vec::new();
    if cur.eat(&Token::LParen) {
        if !cur.eat(&Token::RParen) {
            args.push(parse_arg(cur)?);
            while cur.eat(&Token::Comma) {
                args.push(parse_arg(cur)?);
            }
            if !cur.eat(&Token::RParen) {
                return Err(parse_err(cur.expr, "unterminated filter argument list"));
            }
        }
    }
    Ok(FilterCall { name, args })
}

/// Parse the inner text of a `${{ ... }}` template (already extracted by the
/// scanner, with the `?` optional suffix detection handled here too).
pub fn parse_expr(inner: &str) -> Result<Expr, TemplateError> {
    let trimmed = inner.trim();
    let tokens = tokenize(trimmed, trimmed)?;
    let mut cur = Cursor {
        tokens: &tokens,
        pos: 0,
        expr: trimmed,
    };

    let root = parse_root(&mut cur)?;
    let mut filters = Vec::new();
    while cur.eat(&Token::Pipe) {
        filters.push(parse_filter(&mut cur)?);
    }

    let caller = if cur.eat(&Token::At) {
        Some(cur.expect_ident()?)
    } else {
        None
    };

    let optional = cur.eat(&Token::Question);

    if cur.pos != tokens.len() {
        return Err(parse_err(trimmed, "trailing tokens after expression"));
    }

    Ok(Expr {
        root,
        filters,
        caller,
        optional,
    })
}

fn parse_err(expr: &str, reason: impl Into<String>) -> TemplateError {
    TemplateError::Parse {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_path() {
        let e = parse_expr("params.run_date").unwrap();
        assert_eq!(e.root, Root::Path(vec!["params".to_string(), "run_date".to_string()]));
        assert!(e.filters.is_empty());
        assert!(!e.optional);
    }

    #[test]
    fn parses_bare_boolean_and_string_literals_as_root() {
        assert_eq!(parse_expr("false").unwrap().root, Root::Literal(Value::Bool(false)));
        assert_eq!(parse_expr("true").unwrap().root, Root::Literal(Value::Bool(true)));
        assert_eq!(parse_expr("'z'").unwrap().root, Root::Literal(Value::String("z".to_string())));
    }

    #[test]
    fn parses_filter_pipeline_with_args() {
        let e = parse_expr("params.run_date | fmt('%Y/%m')").unwrap();
        assert_eq!(e.filters.len(), 1);
        assert_eq!(e.filters[0].name, "fmt");
        assert_eq!(e.filters[0].args, vec![Arg::Literal(Value::String("%Y/%m".into()))]);
    }

    #[test]
    fn parses_optional_suffix() {
        let e = parse_expr("params.missing?").unwrap();
        assert!(e.optional);
    }

    #[test]
    fn parses_caller_post_filter() {
        let e = parse_expr("stages.s1.outputs | tojson @notify").unwrap();
        assert_eq!(e.caller, Some("notify".to_string()));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_expr("params.x extra").is_err());
    }
}
