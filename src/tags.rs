//! Tags attached to stored entries and glob patterns selecting them.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::ResourceError;

/// A label attached to a store entry.
///
/// Serializes as a bare string (`"http/uri/..."`) or as a `[scope, value]`
/// pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tag {
    Simple(String),
    Scoped(String, String),
}

impl Tag {
    pub fn scoped(scope: impl Into<String>, value: impl Into<String>) -> Self {
        Tag::Scoped(scope.into(), value.into())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Simple(tag) => f.write_str(tag),
            Tag::Scoped(scope, value) => write!(f, "[{scope}, {value}]"),
        }
    }
}

impl From<&str> for Tag {
    fn from(tag: &str) -> Self {
        Tag::Simple(tag.to_string())
    }
}

impl From<String> for Tag {
    fn from(tag: String) -> Self {
        Tag::Simple(tag)
    }
}

impl From<(&str, &str)> for Tag {
    fn from((scope, value): (&str, &str)) -> Self {
        Tag::scoped(scope, value)
    }
}

impl From<(String, String)> for Tag {
    fn from((scope, value): (String, String)) -> Self {
        Tag::Scoped(scope, value)
    }
}

/// A compiled glob pattern over tags.
///
/// A simple pattern matches simple tags; a scoped pattern matches scoped tags
/// with exactly the same scope and a value matching the glob.
///
/// Glob syntax: `*` matches within one `/`-delimited segment, `?` matches one
/// character other than `/`, `{x,y}` matches either alternative and `\`
/// escapes the next character. `**` matches any number of segments when it
/// fills a whole segment (`a/**` also matches `a`); elsewhere it acts like `*`.
/// Wildcards never match a `.` at the start of a segment, so `a/*` does not
/// match `a/.hidden` while `a/.*` does.
#[derive(Debug, Clone)]
pub struct TagPattern {
    source: Tag,
    matcher: Regex,
}

impl TagPattern {
    /// Compile `pattern`. Fails with [`ResourceError::InvalidPattern`] on an
    /// unclosed `{`.
    pub fn new(pattern: impl Into<Tag>) -> Result<Self, ResourceError> {
        let source = pattern.into();
        let glob = match &source {
            Tag::Simple(glob) => glob,
            Tag::Scoped(_, glob) => glob,
        };
        let matcher = compile_glob(glob)?;
        Ok(TagPattern { source, matcher })
    }

    /// The tag this pattern was compiled from.
    pub fn source(&self) -> &Tag {
        &self.source
    }

    /// Whether `tag` matches. Simple patterns only match simple tags, scoped
    /// patterns only scoped tags of the same scope.
    pub fn matches(&self, tag: &Tag) -> bool {
        match (&self.source, tag) {
            (Tag::Simple(_), Tag::Simple(value)) => self.matcher.is_match(value),
            (Tag::Scoped(scope, _), Tag::Scoped(tag_scope, value)) => {
                scope == tag_scope && self.matcher.is_match(value)
            }
            _ => false,
        }
    }
}

/// The tags of one store entry.
#[derive(Debug, Clone, Default)]
pub struct Tags {
    tags: Vec<Tag>,
    scoped: HashMap<String, String>,
}

impl Tags {
    pub fn new<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        let tags: Vec<Tag> = tags.into_iter().map(Into::into).collect();
        let scoped = tags
            .iter()
            .filter_map(|tag| match tag {
                Tag::Scoped(scope, value) => Some((scope.clone(), value.clone())),
                Tag::Simple(_) => None,
            })
            .collect();
        Tags { tags, scoped }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Whether any tag matches `pattern`.
    pub fn matching(&self, pattern: &TagPattern) -> bool {
        self.tags.iter().any(|tag| pattern.matches(tag))
    }

    /// Value of the scoped tag with the given scope. The last one wins when a
    /// scope appears more than once.
    pub fn get_by_scope(&self, scope: &str) -> Option<&str> {
        self.scoped.get(scope).map(String::as_str)
    }
}

impl From<Vec<Tag>> for Tags {
    fn from(tags: Vec<Tag>) -> Self {
        Tags::new(tags)
    }
}

/// One path segment of a tag that does not start with a dot.
const VISIBLE_SEGMENT: &str = "[^./][^/]*";

#[derive(Debug, Clone, Copy, PartialEq)]
enum GlobToken {
    Literal(char),
    /// `*`, or `**` sharing its segment with other characters.
    Star,
    Question,
    /// `**` filling a whole segment.
    Globstar,
}

fn compile_glob(glob: &str) -> Result<Regex, ResourceError> {
    let alternatives: Vec<String> = expand_braces(glob)
        .map_err(|message| ResourceError::invalid_pattern(glob, message))?
        .iter()
        .map(|pattern| pattern_regex(pattern))
        .collect();

    Regex::new(&format!("^(?:{})$", alternatives.join("|")))
        .map_err(|e| ResourceError::invalid_pattern(glob, e.to_string()))
}

/// Expand `{a,b}` alternatives into separate patterns. Braces without a
/// top-level comma are literal.
fn expand_braces(pattern: &str) -> Result<Vec<String>, &'static str> {
    let chars: Vec<char> = pattern.chars().collect();

    let mut open = None;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '{' => {
                open = Some(i);
                break;
            }
            _ => {}
        }
        i += 1;
    }
    let Some(open) = open else {
        return Ok(vec![pattern.to_string()]);
    };

    let mut depth = 0usize;
    let mut bounds = vec![open];
    let mut close = None;
    let mut j = open + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 1,
            '{' => depth += 1,
            '}' if depth == 0 => {
                close = Some(j);
                break;
            }
            '}' => depth -= 1,
            ',' if depth == 0 => bounds.push(j),
            _ => {}
        }
        j += 1;
    }
    let Some(close) = close else {
        return Err("unclosed '{'");
    };

    let prefix: String = chars[..open].iter().collect();
    let suffix: String = chars[close + 1..].iter().collect();

    if bounds.len() == 1 {
        let inner: String = chars[open + 1..close].iter().collect();
        return Ok(expand_braces(&format!("{inner}\\}}{suffix}"))?
            .into_iter()
            .map(|rest| format!("{prefix}\\{{{rest}"))
            .collect());
    }

    bounds.push(close);
    let mut expanded = Vec::new();
    for pair in bounds.windows(2) {
        let alternative: String = chars[pair[0] + 1..pair[1]].iter().collect();
        expanded.extend(expand_braces(&format!("{prefix}{alternative}{suffix}"))?);
    }
    Ok(expanded)
}

/// Split a brace-free pattern into `/`-separated segments of tokens.
fn tokenize(pattern: &str) -> Vec<Vec<GlobToken>> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut segments: Vec<Vec<GlobToken>> = vec![Vec::new()];
    let mut i = 0;

    while i < chars.len() {
        let token = match chars[i] {
            '/' => {
                segments.push(Vec::new());
                i += 1;
                continue;
            }
            '\\' => {
                i += 1;
                GlobToken::Literal(chars.get(i).copied().unwrap_or('\\'))
            }
            '?' => GlobToken::Question,
            '*' => {
                let start = i;
                while chars.get(i + 1) == Some(&'*') {
                    i += 1;
                }
                let whole_segment = (start == 0 || chars[start - 1] == '/')
                    && matches!(chars.get(i + 1), None | Some('/'));
                if i > start && whole_segment {
                    GlobToken::Globstar
                } else {
                    GlobToken::Star
                }
            }
            c => GlobToken::Literal(c),
        };

        if let Some(segment) = segments.last_mut()
            && !(token == GlobToken::Star && segment.last() == Some(&GlobToken::Star))
        {
            segment.push(token);
        }
        i += 1;
    }

    segments.dedup_by(|a, b| is_globstar(a) && is_globstar(b));
    segments
}

fn is_globstar(segment: &[GlobToken]) -> bool {
    segment == [GlobToken::Globstar]
}

fn pattern_regex(pattern: &str) -> String {
    let segments = tokenize(pattern);
    let last = segments.len() - 1;
    let mut out = String::new();
    let mut separate = false;

    for (i, segment) in segments.iter().enumerate() {
        if is_globstar(segment) {
            // zero or more visible segments; "a/**" also matches "a"
            let globstar = if last == 0 {
                format!("(?:{VISIBLE_SEGMENT}(?:/{VISIBLE_SEGMENT})*)?")
            } else if i == last {
                format!("(?:/{VISIBLE_SEGMENT})*")
            } else if i == 0 {
                format!("(?:{VISIBLE_SEGMENT}/)*")
            } else {
                format!("/(?:{VISIBLE_SEGMENT}/)*")
            };
            out.push_str(&globstar);
            separate = false;
            continue;
        }

        if separate {
            out.push('/');
        }
        out.push_str(&segment_regex(segment));
        separate = true;
    }
    out
}

/// Wildcards never match a leading dot; an explicit `.` in the pattern does.
fn segment_regex(tokens: &[GlobToken]) -> String {
    let mut out = String::new();
    let rest = match tokens {
        [GlobToken::Question, rest @ ..] => {
            out.push_str("[^./]");
            rest
        }
        [GlobToken::Star, GlobToken::Literal(c), ..] if *c != '.' => {
            out.push_str("(?:[^./][^/]*)?");
            &tokens[1..]
        }
        [GlobToken::Star, GlobToken::Question, rest @ ..] | [GlobToken::Star, rest @ ..] => {
            out.push_str(VISIBLE_SEGMENT);
            rest
        }
        _ => tokens,
    };

    for token in rest {
        match token {
            GlobToken::Literal(c) => out.push_str(&regex::escape(&c.to_string())),
            GlobToken::Star => out.push_str("[^/]*"),
            GlobToken::Question => out.push_str("[^/]"),
            GlobToken::Globstar => out.push_str(".*"),
        }
    }
    out
}
