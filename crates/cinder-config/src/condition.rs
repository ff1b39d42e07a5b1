//! Condition-string compilation.
//!
//! Rule conditions are written as small boolean expressions over the run
//! context:
//!
//! ```text
//! ref == "main"
//! ref =~ /^release\// && source == "push"
//! is_tag || message =~ /\[deploy\]/
//! ```
//!
//! They compile once, at configuration load, into the typed
//! [`Predicate`] tree; evaluation never touches strings again. `&&`
//! binds tighter than `||`, `!` tighter than both, and parentheses
//! group.

use cinder_core::context::PipelineSource;
use cinder_core::error::ConfigError;
use cinder_core::rules::Predicate;
use regex::Regex;

/// Compile a condition string into a predicate.
pub fn compile(condition: &str) -> Result<Predicate, ConfigError> {
    let tokens = lex(condition)?;
    let mut parser = Parser {
        condition,
        tokens,
        pos: 0,
    };
    let predicate = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing input after expression"));
    }
    Ok(predicate)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Regex(String),
    Eq,
    Ne,
    Match,
    NotMatch,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>, ConfigError> {
    let bad = |reason: &str| ConfigError::BadCondition {
        condition: input.to_string(),
        reason: reason.to_string(),
    };

    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '&' => {
                chars.next();
                if chars.next() != Some('&') {
                    return Err(bad("expected `&&`"));
                }
                tokens.push(Token::AndAnd);
            }
            '|' => {
                chars.next();
                if chars.next() != Some('|') {
                    return Err(bad("expected `||`"));
                }
                tokens.push(Token::OrOr);
            }
            '=' => {
                chars.next();
                match chars.next() {
                    Some('=') => tokens.push(Token::Eq),
                    Some('~') => tokens.push(Token::Match),
                    _ => return Err(bad("expected `==` or `=~`")),
                }
            }
            '!' => {
                chars.next();
                match chars.peek() {
                    Some('=') => {
                        chars.next();
                        tokens.push(Token::Ne);
                    }
                    Some('~') => {
                        chars.next();
                        tokens.push(Token::NotMatch);
                    }
                    _ => tokens.push(Token::Bang),
                }
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => value.push(ch),
                        None => return Err(bad("unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(value));
            }
            '/' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => {
                            // Keep the escape; only `\/` collapses.
                            match chars.next() {
                                Some('/') => value.push('/'),
                                Some(ch) => {
                                    value.push('\\');
                                    value.push(ch);
                                }
                                None => {
                                    return Err(bad("unterminated regex literal"));
                                }
                            }
                        }
                        Some('/') => break,
                        Some(ch) => value.push(ch),
                        None => return Err(bad("unterminated regex literal")),
                    }
                }
                tokens.push(Token::Regex(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            _ => return Err(bad(&format!("unexpected character `{}`", c))),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    condition: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> ConfigError {
        ConfigError::BadCondition {
            condition: self.condition.to_string(),
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn or_expr(&mut self) -> Result<Predicate, ConfigError> {
        let mut terms = vec![self.and_expr()?];
        while self.peek() == Some(&Token::OrOr) {
            self.next();
            terms.push(self.and_expr()?);
        }
        Ok(if terms.len() == 1 {
            terms.pop().unwrap()
        } else {
            Predicate::Or(terms)
        })
    }

    fn and_expr(&mut self) -> Result<Predicate, ConfigError> {
        let mut terms = vec![self.unary()?];
        while self.peek() == Some(&Token::AndAnd) {
            self.next();
            terms.push(self.unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.pop().unwrap()
        } else {
            Predicate::And(terms)
        })
    }

    fn unary(&mut self) -> Result<Predicate, ConfigError> {
        if self.peek() == Some(&Token::Bang) {
            self.next();
            return Ok(Predicate::Not(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Predicate, ConfigError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                if self.next() != Some(Token::RParen) {
                    return Err(self.error("expected `)`"));
                }
                Ok(inner)
            }
            Some(Token::Ident(ident)) => match ident.as_str() {
                "is_tag" => Ok(Predicate::IsTag),
                "always" => Ok(Predicate::Always),
                "ref" => self.comparison(Subject::Ref),
                "source" => self.comparison(Subject::Source),
                "message" => self.comparison(Subject::Message),
                other => Err(self.error(&format!("unknown subject `{}`", other))),
            },
            _ => Err(self.error("expected a condition")),
        }
    }

    fn comparison(&mut self, subject: Subject) -> Result<Predicate, ConfigError> {
        let op = self
            .next()
            .ok_or_else(|| self.error("expected a comparison operator"))?;
        match (subject, op) {
            (Subject::Ref, Token::Eq) => {
                Ok(Predicate::RefEquals(self.string_operand()?))
            }
            (Subject::Ref, Token::Ne) => Ok(Predicate::Not(Box::new(
                Predicate::RefEquals(self.string_operand()?),
            ))),
            (Subject::Ref, Token::Match) => {
                Ok(Predicate::RefMatches(self.regex_operand()?))
            }
            (Subject::Ref, Token::NotMatch) => Ok(Predicate::Not(Box::new(
                Predicate::RefMatches(self.regex_operand()?),
            ))),
            (Subject::Source, Token::Eq) => {
                Ok(Predicate::SourceEquals(self.source_operand()?))
            }
            (Subject::Source, Token::Ne) => Ok(Predicate::Not(Box::new(
                Predicate::SourceEquals(self.source_operand()?),
            ))),
            (Subject::Message, Token::Match) => {
                Ok(Predicate::MessageMatches(self.regex_operand()?))
            }
            (Subject::Message, Token::NotMatch) => Ok(Predicate::Not(Box::new(
                Predicate::MessageMatches(self.regex_operand()?),
            ))),
            (subject, _) => Err(self.error(&format!(
                "operator not valid for `{}`",
                subject.name()
            ))),
        }
    }

    fn string_operand(&mut self) -> Result<String, ConfigError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            _ => Err(self.error("expected a string literal")),
        }
    }

    fn regex_operand(&mut self) -> Result<Regex, ConfigError> {
        match self.next() {
            Some(Token::Regex(src)) => Regex::new(&src).map_err(|e| {
                self.error(&format!("invalid regex /{}/: {}", src, e))
            }),
            _ => Err(self.error("expected a regex literal")),
        }
    }

    fn source_operand(&mut self) -> Result<PipelineSource, ConfigError> {
        let value = self.string_operand()?;
        value
            .parse()
            .map_err(|e: String| self.error(&e))
    }
}

#[derive(Debug, Clone, Copy)]
enum Subject {
    Ref,
    Source,
    Message,
}

impl Subject {
    fn name(&self) -> &'static str {
        match self {
            Subject::Ref => "ref",
            Subject::Source => "source",
            Subject::Message => "message",
        }
    }
}
