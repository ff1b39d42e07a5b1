//! Compiled path glob patterns.
//!
//! Rule `changes:` filters and artifact `paths:` use a small glob dialect:
//! `*` matches within one path segment, `**` matches across segments, `?`
//! matches a single character. Patterns compile to anchored regexes once,
//! at configuration load; an invalid pattern is a configuration error.

use crate::error::ConfigError;
use regex::Regex;
use std::fmt;

#[derive(Debug, Clone)]
pub struct PathGlob {
    pattern: String,
    re: Regex,
}

impl PathGlob {
    pub fn compile(pattern: &str) -> Result<Self, ConfigError> {
        if pattern.is_empty() {
            return Err(ConfigError::BadGlob {
                pattern: pattern.to_string(),
                reason: "empty pattern".to_string(),
            });
        }
        let source = translate(pattern)?;
        let re = Regex::new(&source).map_err(|e| ConfigError::BadGlob {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            re,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.re.is_match(path)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Display for PathGlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl PartialEq for PathGlob {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for PathGlob {}

/// Translate a glob into an anchored regex.
///
/// `**/` also swallows its trailing separator so `**/*.rs` matches a file
/// at the repository root.
fn translate(pattern: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        out.push_str("(?:.*/)?");
                    } else {
                        out.push_str(".*");
                    }
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '[' | ']' => {
                return Err(ConfigError::BadGlob {
                    pattern: pattern.to_string(),
                    reason: "character classes are not supported".to_string(),
                });
            }
            c => {
                if regex_syntax_char(c) {
                    out.push('\\');
                }
                out.push(c);
            }
        }
    }

    out.push('$');
    Ok(out)
}

fn regex_syntax_char(c: char) -> bool {
    matches!(
        c,
        '.' | '+' | '(' | ')' | '{' | '}' | '^' | '$' | '|' | '\\'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(p: &str) -> PathGlob {
        PathGlob::compile(p).unwrap()
    }

    #[test]
    fn test_exact_match() {
        assert!(glob("Cargo.toml").matches("Cargo.toml"));
        assert!(!glob("Cargo.toml").matches("sub/Cargo.toml"));
    }

    #[test]
    fn test_star_stays_in_segment() {
        let g = glob("src/*.rs");
        assert!(g.matches("src/lib.rs"));
        assert!(!g.matches("src/nested/lib.rs"));
    }

    #[test]
    fn test_double_star_crosses_segments() {
        let g = glob("src/**/*.rs");
        assert!(g.matches("src/lib.rs"));
        assert!(g.matches("src/a/b/c.rs"));
        assert!(!g.matches("docs/a.rs"));
    }

    #[test]
    fn test_double_star_prefix() {
        let g = glob("**/*.md");
        assert!(g.matches("README.md"));
        assert!(g.matches("docs/guide/intro.md"));
    }

    #[test]
    fn test_question_mark() {
        let g = glob("v?.txt");
        assert!(g.matches("v1.txt"));
        assert!(!g.matches("v12.txt"));
        assert!(!g.matches("v/.txt"));
    }

    #[test]
    fn test_dot_is_literal() {
        assert!(!glob("a.b").matches("aXb"));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        assert!(matches!(
            PathGlob::compile(""),
            Err(ConfigError::BadGlob { .. })
        ));
        assert!(matches!(
            PathGlob::compile("src/[ab].rs"),
            Err(ConfigError::BadGlob { .. })
        ));
    }
}
