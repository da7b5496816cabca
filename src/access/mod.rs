//! Path-based access rules
//!
//! Decides which requests need a bearer token. API paths are configured as
//! Ant-style patterns:
//!
//! - `?` matches one character within a segment
//! - `*` matches any characters within a segment
//! - `**` matches across segments; a trailing `/**` also matches the bare prefix
//!
//! Public paths (documentation and the like) are readable without a token.
//!
//! Paths are normalized before matching: percent-decoded, empty and `.`
//! segments dropped, `..` resolved. A path that cannot be normalized, or
//! that climbs above the root, always requires a token.

use crate::config::AccessConfig;
use percent_encoding::percent_decode_str;
use regex_lite::Regex;
use thiserror::Error;

/// Access rule errors
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Invalid path pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// A compiled Ant-style path pattern
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    regex: Regex,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self, AccessError> {
        let regex = Regex::new(&Self::translate(pattern)).map_err(|e| {
            AccessError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    fn translate(pattern: &str) -> String {
        let (body, any_suffix) = match pattern.strip_suffix("/**") {
            Some(prefix) => (prefix, true),
            None => (pattern, false),
        };

        let mut regex = String::from("^");
        let mut literal = String::new();
        let mut chars = body.chars().peekable();

        while let Some(c) = chars.next() {
            let token = match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    ".*"
                }
                '*' => "[^/]*",
                '?' => "[^/]",
                _ => {
                    literal.push(c);
                    continue;
                }
            };
            regex.push_str(&regex_lite::escape(&literal));
            literal.clear();
            regex.push_str(token);
        }
        regex.push_str(&regex_lite::escape(&literal));

        if any_suffix {
            regex.push_str("(/.*)?");
        }
        regex.push('$');
        regex
    }
}

/// What a request needs before it may proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Readable without a token
    Public,
    /// Requires a valid bearer token
    Authenticate,
    /// Neither public nor an API path; left to the application
    Open,
}

/// Path-based access guard
#[derive(Debug, Clone, Default)]
pub struct AccessGuard {
    api: Vec<PathPattern>,
    public: Vec<PathPattern>,
}

impl AccessGuard {
    pub fn new(api_patterns: &[String], public_paths: &[String]) -> Result<Self, AccessError> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| PathPattern::new(p))
                .collect::<Result<Vec<_>, _>>()
        };

        Ok(Self {
            api: compile(api_patterns)?,
            public: compile(public_paths)?,
        })
    }

    pub fn from_config(config: &AccessConfig) -> Result<Self, AccessError> {
        Self::new(&config.api_patterns, &config.public_paths)
    }

    /// Decide how a request must be treated
    ///
    /// `path` may carry a query string; it is ignored.
    pub fn decide(&self, method: &str, path: &str) -> AccessDecision {
        let raw = path.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
        let Some(path) = normalize_path(raw) else {
            return AccessDecision::Authenticate;
        };

        let read = method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD");
        if read && self.public.iter().any(|p| p.matches(&path)) {
            return AccessDecision::Public;
        }

        if self.api.iter().any(|p| p.matches(&path)) {
            AccessDecision::Authenticate
        } else {
            AccessDecision::Open
        }
    }
}

/// Canonical form of a request path, as an upstream router would see it
///
/// Returns `None` when the decoded path is not UTF-8, climbs above the
/// root, or still holds `%`, `\`, `;` or NUL.
pub fn normalize_path(raw: &str) -> Option<String> {
    let decoded = percent_decode_str(raw).decode_utf8().ok()?;
    if decoded.contains(|c: char| matches!(c, '%' | '\\' | ';' | '\0')) {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            _ => segments.push(segment),
        }
    }

    Some(format!("/{}", segments.join("/")))
}

/// Extract the token from an `Authorization` header value
///
/// The `Bearer` scheme is matched case-insensitively.
pub fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    let value = authorization?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
