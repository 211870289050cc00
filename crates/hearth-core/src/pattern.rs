//! Path pattern compilation and matching.
//!
//! A [`PathMatcher`] is compiled once at registration time and then used as a
//! pure predicate over request paths. It holds no mutable state and is safe to
//! share across tasks.
//!
//! # Template syntax
//!
//! | Syntax | Meaning | Example |
//! |--------|---------|---------|
//! | literal | matched verbatim | `/status` |
//! | `:name` | one path segment | `/chat/:room` |
//! | `:name(re)` | segment matching `re` | `/user/:id(\d+)` |
//! | `:name?` | optional segment | `/docs/:page?` |
//! | `:name*` | zero or more segments | `/files/:path*` |
//! | `:name+` | one or more segments | `/files/:path+` |
//! | `(re)` | unnamed parameter | `/v(\d+)/info` |
//! | `*` | anything (unnamed) | `/static/*` |
//! | `\c` | escaped literal character | `/a\:b` |
//!
//! Templates are anchored at both ends. By default matching is
//! case-insensitive and a single trailing slash is tolerated (see
//! [`MatchOptions`]).
//!
//! Raw regular expressions ([`PathPattern::regex`]) are used as-is and are
//! **not** anchored: `^/api` matches every path starting with `/api`.

use std::fmt;

use regex::Regex;

use crate::error::{PatternError, PatternResult};

/// Default expression for a single path segment.
const SEGMENT: &str = "[^/#?]+?";

// =============================================================================
// PathPattern
// =============================================================================

/// A single uncompiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// A path template such as `/chat/:room`.
    Template(String),
    /// A raw regular expression, tested unanchored.
    Regex(String),
}

impl PathPattern {
    /// Creates a template pattern.
    pub fn template(source: impl Into<String>) -> Self {
        Self::Template(source.into())
    }

    /// Creates a raw regular-expression pattern.
    pub fn regex(source: impl Into<String>) -> Self {
        Self::Regex(source.into())
    }

    /// Returns the pattern source text.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Template(s) | Self::Regex(s) => s,
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(s) => f.write_str(s),
            Self::Regex(s) => write!(f, "/{s}/"),
        }
    }
}

impl From<&str> for PathPattern {
    fn from(s: &str) -> Self {
        Self::Template(s.to_string())
    }
}

impl From<String> for PathPattern {
    fn from(s: String) -> Self {
        Self::Template(s)
    }
}

impl From<Regex> for PathPattern {
    fn from(re: Regex) -> Self {
        Self::Regex(re.as_str().to_string())
    }
}

/// Conversion into one or more path patterns.
///
/// Registration APIs accept a single pattern or a list; an entry registered
/// with several patterns matches when any of them matches.
pub trait IntoPatterns {
    /// Converts `self` into a list of patterns.
    fn into_patterns(self) -> Vec<PathPattern>;
}

impl IntoPatterns for PathPattern {
    fn into_patterns(self) -> Vec<PathPattern> {
        vec![self]
    }
}

impl IntoPatterns for &str {
    fn into_patterns(self) -> Vec<PathPattern> {
        vec![self.into()]
    }
}

impl IntoPatterns for String {
    fn into_patterns(self) -> Vec<PathPattern> {
        vec![self.into()]
    }
}

impl IntoPatterns for Regex {
    fn into_patterns(self) -> Vec<PathPattern> {
        vec![self.into()]
    }
}

impl<P: Into<PathPattern>> IntoPatterns for Vec<P> {
    fn into_patterns(self) -> Vec<PathPattern> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<P: Into<PathPattern>, const N: usize> IntoPatterns for [P; N] {
    fn into_patterns(self) -> Vec<PathPattern> {
        self.into_iter().map(Into::into).collect()
    }
}

// =============================================================================
// MatchOptions
// =============================================================================

/// Options applied when compiling templates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Match letter case exactly.
    pub sensitive: bool,
    /// Do not tolerate a trailing slash.
    pub strict: bool,
}

// =============================================================================
// PathParams
// =============================================================================

/// Parameters captured from a matched path.
///
/// Named parameters are keyed by name; unnamed groups are keyed by their
/// position (`"0"`, `"1"`, …). Optional parameters that did not participate
/// in the match are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    /// Returns the value captured for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over `(name, value)` pairs in pattern order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of captured parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// PathMatcher
// =============================================================================

#[derive(Debug, Clone)]
struct Compiled {
    regex: Regex,
    /// Parameter key for capture group `i + 1`.
    keys: Vec<String>,
}

/// A compiled predicate over request paths.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    sources: Vec<PathPattern>,
    compiled: Vec<Compiled>,
}

impl PathMatcher {
    /// Compiles one or more patterns with default [`MatchOptions`].
    pub fn compile(patterns: impl IntoPatterns) -> PatternResult<Self> {
        Self::compile_with(patterns, MatchOptions::default())
    }

    /// Compiles one or more patterns with explicit options.
    pub fn compile_with(patterns: impl IntoPatterns, options: MatchOptions) -> PatternResult<Self> {
        let sources = patterns.into_patterns();
        if sources.is_empty() {
            return Err(PatternError::Empty);
        }
        let compiled = sources
            .iter()
            .map(|p| match p {
                PathPattern::Template(t) => compile_template(t, options),
                PathPattern::Regex(r) => compile_regex(r),
            })
            .collect::<PatternResult<Vec<_>>>()?;
        Ok(Self { sources, compiled })
    }

    /// Returns `true` if any pattern accepts `path`.
    pub fn test(&self, path: &str) -> bool {
        self.compiled.iter().any(|c| c.regex.is_match(path))
    }

    /// Returns the parameters of the first pattern that accepts `path`.
    pub fn captures(&self, path: &str) -> Option<PathParams> {
        self.compiled.iter().find_map(|c| {
            let caps = c.regex.captures(path)?;
            let params = c
                .keys
                .iter()
                .enumerate()
                .filter_map(|(i, key)| {
                    caps.get(i + 1)
                        .map(|m| (key.clone(), m.as_str().to_string()))
                })
                .collect();
            Some(PathParams(params))
        })
    }

    /// Returns the patterns this matcher was compiled from.
    pub fn sources(&self) -> &[PathPattern] {
        &self.sources
    }
}

impl fmt::Display for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.sources.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Compilation
// =============================================================================

fn compile_regex(source: &str) -> PatternResult<Compiled> {
    let regex = Regex::new(source).map_err(|e| PatternError::InvalidRegex {
        pattern: source.to_string(),
        source: e,
    })?;
    let mut unnamed = 0usize;
    let keys = regex
        .capture_names()
        .skip(1)
        .map(|name| match name {
            Some(n) => n.to_string(),
            None => {
                unnamed += 1;
                (unnamed - 1).to_string()
            }
        })
        .collect();
    Ok(Compiled { regex, keys })
}

/// Incremental builder for the expression generated from a template.
struct TemplateBuilder {
    out: String,
    /// Literal text not yet written to `out`.
    pending: String,
    keys: Vec<String>,
    unnamed: usize,
}

impl TemplateBuilder {
    fn flush(&mut self) {
        self.out.push_str(&regex::escape(&self.pending));
        self.pending.clear();
    }

    /// Emits a parameter group, consuming a preceding `/` as its prefix.
    fn param(&mut self, key: String, expr: &str, modifier: Option<char>) {
        let prefix = if self.pending.ends_with('/') {
            self.pending.pop();
            "/"
        } else {
            ""
        };
        self.flush();
        let group = match modifier {
            Some('?') => format!("(?:{prefix}({expr}))?"),
            Some('+') => format!("{prefix}((?:{expr})(?:{prefix}(?:{expr}))*)"),
            Some('*') => format!("(?:{prefix}((?:{expr})(?:{prefix}(?:{expr}))*))?"),
            _ => format!("{prefix}({expr})"),
        };
        self.out.push_str(&group);
        self.keys.push(key);
    }

    fn next_unnamed(&mut self) -> String {
        self.unnamed += 1;
        (self.unnamed - 1).to_string()
    }
}

fn compile_template(template: &str, options: MatchOptions) -> PatternResult<Compiled> {
    let chars: Vec<(usize, char)> = template.char_indices().collect();
    let mut b = TemplateBuilder {
        out: String::new(),
        pending: String::new(),
        keys: Vec::new(),
        unnamed: 0,
    };

    let mut i = 0;
    while i < chars.len() {
        let (offset, c) = chars[i];
        match c {
            '\\' => {
                let Some(&(_, escaped)) = chars.get(i + 1) else {
                    return Err(PatternError::TrailingEscape {
                        pattern: template.to_string(),
                    });
                };
                b.pending.push(escaped);
                i += 2;
            }
            ':' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_name_char(chars[end].1) {
                    end += 1;
                }
                if end == start {
                    return Err(PatternError::MissingParameterName {
                        pattern: template.to_string(),
                        offset,
                    });
                }
                let name: String = chars[start..end].iter().map(|(_, c)| *c).collect();
                i = end;
                let expr = if chars.get(i).is_some_and(|(_, c)| *c == '(') {
                    let (expr, next) = read_group(template, &chars, i)?;
                    i = next;
                    expr
                } else {
                    SEGMENT.to_string()
                };
                let modifier = read_modifier(&chars, &mut i);
                b.param(name, &expr, modifier);
            }
            '(' => {
                let (expr, next) = read_group(template, &chars, i)?;
                i = next;
                let modifier = read_modifier(&chars, &mut i);
                let key = b.next_unnamed();
                b.param(key, &expr, modifier);
            }
            ')' => {
                return Err(PatternError::UnbalancedGroup {
                    pattern: template.to_string(),
                    offset,
                });
            }
            '*' => {
                b.flush();
                b.out.push_str("(.*)");
                let key = b.next_unnamed();
                b.keys.push(key);
                i += 1;
            }
            _ => {
                b.pending.push(c);
                i += 1;
            }
        }
    }

    if !options.strict && b.pending.ends_with('/') {
        b.pending.pop();
    }
    b.flush();

    let mut expr = String::new();
    if !options.sensitive {
        expr.push_str("(?i)");
    }
    expr.push('^');
    expr.push_str(&b.out);
    if !options.strict {
        expr.push_str("/?");
    }
    expr.push('$');

    let regex = Regex::new(&expr).map_err(|e| PatternError::InvalidRegex {
        pattern: template.to_string(),
        source: e,
    })?;
    Ok(Compiled {
        regex,
        keys: b.keys,
    })
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn read_modifier(chars: &[(usize, char)], i: &mut usize) -> Option<char> {
    match chars.get(*i) {
        Some(&(_, m @ ('?' | '*' | '+'))) => {
            *i += 1;
            Some(m)
        }
        _ => None,
    }
}

/// Whether a `(` followed by `rest` opens a capturing group.
///
/// Only `(?:`-style groups and look-arounds are non-capturing; `(?<n>…)`,
/// `(?P<n>…)` and `(?'n'…)` capture under a name.
fn opens_capture(rest: &[(usize, char)]) -> bool {
    let mut next = rest.iter().map(|(_, c)| *c);
    match (next.next(), next.next(), next.next()) {
        (Some('?'), Some('<'), Some('=' | '!')) => false,
        (Some('?'), Some('<' | '\''), _) | (Some('?'), Some('P'), Some('<')) => true,
        (Some('?'), _, _) => false,
        _ => true,
    }
}

/// Reads a `( … )` group starting at `chars[start]`.
///
/// Returns the inner expression and the index after the closing parenthesis.
fn read_group(
    template: &str,
    chars: &[(usize, char)],
    start: usize,
) -> PatternResult<(String, usize)> {
    if chars.get(start + 1).is_some_and(|(_, c)| *c == '?') {
        return Err(PatternError::GroupModifier {
            pattern: template.to_string(),
            offset: chars[start].0,
        });
    }

    let mut depth = 1usize;
    let mut inner = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i].1;
        match c {
            '\\' => {
                inner.push(c);
                if let Some(&(_, escaped)) = chars.get(i + 1) {
                    inner.push(escaped);
                }
                i += 2;
                continue;
            }
            '(' => {
                if opens_capture(&chars[i + 1..]) {
                    return Err(PatternError::CapturingGroup {
                        pattern: template.to_string(),
                    });
                }
                depth += 1;
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((inner, i + 1));
                }
            }
            _ => {}
        }
        inner.push(c);
        i += 1;
    }

    Err(PatternError::UnbalancedGroup {
        pattern: template.to_string(),
        offset: chars[start].0,
    })
}
