//! Path algebra (spec §4.1): parsing, child construction, wildcard/variable
//! matching, and trail/ancestor relations over paths made of string and
//! integer keys.
//!
//! Grounded on the tokenizer shape of `estuary-flow`'s `json::ptr::Pointer`
//! (split-on-separator, per-segment token classification) but with this
//! kernel's own canonical syntax: `a/b[3]/c` rather than RFC-6901 `/a/b/3/c`,
//! and `*`/`$name` wildcard and variable keys instead of JSON Pointer's plain
//! tokens.

use crate::error::{AceError, AceResult};
use std::collections::BTreeMap;
use std::fmt;

const MAX_KEY_LEN: usize = 128;

fn is_forbidden_char(c: char) -> bool {
    matches!(c as u32, 0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F) || matches!(c, '/' | '[' | ']' | '\\')
}

fn validate_key(key: &str) -> AceResult<()> {
    if key.is_empty() {
        return Err(AceError::PathRule { key: key.to_string(), reason: "empty key" });
    }
    if key.chars().count() > MAX_KEY_LEN {
        return Err(AceError::PathRule { key: key.to_string(), reason: "key too long" });
    }
    if key.chars().any(is_forbidden_char) {
        return Err(AceError::PathRule { key: key.to_string(), reason: "key contains a control character or reserved character" });
    }
    Ok(())
}

/// A single path segment: either a string property name or an array index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Str(String),
    Index(usize),
}

impl Key {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Key::Str(s) if s == "*")
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Key::Str(s) if s.starts_with('$'))
    }

    pub fn is_wildcard_or_variable(&self) -> bool {
        self.is_wildcard() || self.is_variable()
    }

    fn matches(&self, other: &Key) -> bool {
        if self.is_wildcard_or_variable() || other.is_wildcard_or_variable() {
            return true;
        }
        self == other
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => write!(f, "{s}"),
            Key::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Renders a key sequence in canonical text form: `posts[0]/title`.
pub fn keys_to_path_string(keys: &[Key]) -> String {
    let mut out = String::new();
    for key in keys {
        match key {
            Key::Str(s) => {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(s);
            }
            Key::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// Parses one `/`-delimited segment, which may itself carry trailing
/// `[index]` groups (e.g. `b[3]` or `b[3][4]`).
fn parse_segment(segment: &str) -> AceResult<Vec<Key>> {
    let mut keys = Vec::new();
    match segment.find('[') {
        None => {
            if !segment.is_empty() {
                validate_key(segment)?;
                keys.push(Key::Str(segment.to_string()));
            }
        }
        Some(idx) => {
            let base = &segment[..idx];
            if !base.is_empty() {
                validate_key(base)?;
                keys.push(Key::Str(base.to_string()));
            }
            let mut tail = &segment[idx..];
            while !tail.is_empty() {
                if !tail.starts_with('[') {
                    return Err(AceError::PathRule { key: segment.to_string(), reason: "malformed index group" });
                }
                let close = tail.find(']').ok_or_else(|| AceError::PathRule {
                    key: segment.to_string(),
                    reason: "unterminated index group",
                })?;
                let num_str = &tail[1..close];
                let n: usize = num_str
                    .parse()
                    .map_err(|_| AceError::PathRule { key: segment.to_string(), reason: "non-numeric index" })?;
                keys.push(Key::Index(n));
                tail = &tail[close + 1..];
            }
        }
    }
    Ok(keys)
}

fn parse_path(path: &str) -> AceResult<Vec<Key>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut keys = Vec::new();
    for segment in trimmed.split('/') {
        keys.extend(parse_segment(segment)?);
    }
    Ok(keys)
}

/// An addressable location in the tree: an ordered sequence of keys. The
/// empty sequence is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathInfo {
    keys: Vec<Key>,
}

/// Accepted shapes for `PathInfo::child`.
pub enum ChildSegment {
    Path(String),
    Index(usize),
    Keys(Vec<Key>),
}

impl From<&str> for ChildSegment {
    fn from(s: &str) -> Self {
        ChildSegment::Path(s.to_string())
    }
}
impl From<String> for ChildSegment {
    fn from(s: String) -> Self {
        ChildSegment::Path(s)
    }
}
impl From<usize> for ChildSegment {
    fn from(i: usize) -> Self {
        ChildSegment::Index(i)
    }
}
impl From<Vec<Key>> for ChildSegment {
    fn from(keys: Vec<Key>) -> Self {
        ChildSegment::Keys(keys)
    }
}
impl From<Key> for ChildSegment {
    fn from(key: Key) -> Self {
        ChildSegment::Keys(vec![key])
    }
}

impl PathInfo {
    pub fn root() -> Self {
        PathInfo { keys: Vec::new() }
    }

    /// Parses a canonical path string. Leading/trailing slashes are ignored.
    pub fn get(path: &str) -> AceResult<Self> {
        Ok(PathInfo { keys: parse_path(path)? })
    }

    pub fn from_keys(keys: Vec<Key>) -> Self {
        PathInfo { keys }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn is_root(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn path(&self) -> String {
        keys_to_path_string(&self.keys)
    }

    /// Last key, rendered `[i]` for an index, or empty string at the root
    /// (the "no key" sentinel).
    pub fn key_string(&self) -> String {
        match self.keys.last() {
            None => String::new(),
            Some(Key::Str(s)) => s.clone(),
            Some(Key::Index(i)) => format!("[{i}]"),
        }
    }

    pub fn key(&self) -> Option<&Key> {
        self.keys.last()
    }

    pub fn parent(&self) -> Option<PathInfo> {
        if self.keys.is_empty() {
            None
        } else {
            Some(PathInfo { keys: self.keys[..self.keys.len() - 1].to_vec() })
        }
    }

    pub fn parent_path(&self) -> Option<String> {
        self.parent().map(|p| p.path())
    }

    /// Builds a child path. Accepts a (sub-)path string, a bare index, or an
    /// already-validated key sequence.
    pub fn child(&self, segment: impl Into<ChildSegment>) -> AceResult<PathInfo> {
        let mut keys = self.keys.clone();
        match segment.into() {
            ChildSegment::Path(s) => keys.extend(parse_path(&s)?),
            ChildSegment::Index(i) => keys.push(Key::Index(i)),
            ChildSegment::Keys(ks) => {
                for k in ks {
                    if let Key::Str(ref s) = k {
                        validate_key(s)?;
                    }
                    keys.push(k);
                }
            }
        }
        Ok(PathInfo { keys })
    }

    /// Equal modulo `*`/`$var` wildcards matching any single key.
    pub fn equals(&self, other: &PathInfo) -> bool {
        self.keys.len() == other.keys.len() && self.keys.iter().zip(&other.keys).all(|(a, b)| a.matches(b))
    }

    /// Strict ancestor: identical paths are neither ancestor nor descendant.
    /// The root is an ancestor of every non-root path.
    pub fn is_ancestor_of(&self, other: &PathInfo) -> bool {
        self.keys.len() < other.keys.len() && self.keys.iter().zip(&other.keys).all(|(a, b)| a.matches(b))
    }

    pub fn is_descendant_of(&self, other: &PathInfo) -> bool {
        other.is_ancestor_of(self)
    }

    /// Shared-prefix relation: either path is a prefix of the other (with
    /// wildcard matching). Reflexive and symmetric; the root is on every
    /// trail.
    pub fn is_on_trail_of(&self, other: &PathInfo) -> bool {
        let n = self.keys.len().min(other.keys.len());
        self.keys[..n].iter().zip(&other.keys[..n]).all(|(a, b)| a.matches(b))
    }

    /// Binds every wildcard/variable slot in `pattern` against the
    /// corresponding key in the matching prefix of `concrete_path` (the
    /// pattern may be shorter than the concrete path; any trailing concrete
    /// keys beyond the pattern's length are ignored). Returns an empty set
    /// of bindings if the pattern has no wildcards or is longer than the
    /// concrete path.
    pub fn extract_variables(pattern: &PathInfo, concrete_path: &PathInfo) -> ExtractedVariables {
        let mut vars = ExtractedVariables::default();
        if pattern.keys.len() > concrete_path.keys.len() {
            return vars;
        }
        for (p, c) in pattern.keys.iter().zip(&concrete_path.keys) {
            if p.is_wildcard() {
                vars.values.push(c.clone());
            } else if p.is_variable() {
                vars.values.push(c.clone());
                if let Key::Str(name) = p {
                    let bare = name.trim_start_matches('$').to_string();
                    vars.named.insert(format!("${bare}"), c.clone());
                    vars.named.insert(bare, c.clone());
                }
            }
        }
        vars
    }

    /// Substitutes wildcard/variable slots in `pattern` with the
    /// corresponding concrete keys from `concrete_path`, preserving the
    /// literal portions of `pattern`.
    pub fn fill_variables(pattern: &PathInfo, concrete_path: &PathInfo) -> AceResult<String> {
        if pattern.keys.len() > concrete_path.keys.len() {
            return Err(AceError::PathRule {
                key: pattern.path(),
                reason: "pattern is longer than the concrete path",
            });
        }
        let filled: Vec<Key> = pattern
            .keys
            .iter()
            .zip(&concrete_path.keys)
            .map(|(p, c)| if p.is_wildcard_or_variable() { c.clone() } else { p.clone() })
            .collect();
        Ok(keys_to_path_string(&filled))
    }
}

impl fmt::Display for PathInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Result of `PathInfo::extract_variables`: positional bindings plus named
/// lookup by both `name` and `$name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedVariables {
    values: Vec<Key>,
    named: BTreeMap<String, Key>,
}

impl ExtractedVariables {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn by_index(&self, i: usize) -> Option<&Key> {
        self.values.get(i)
    }

    pub fn by_name(&self, name: &str) -> Option<&Key> {
        self.named.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_path() {
        let p = PathInfo::get("posts[0]/title").unwrap();
        assert_eq!(p.keys(), &[Key::Str("posts".into()), Key::Index(0), Key::Str("title".into())]);
        assert_eq!(p.path(), "posts[0]/title");
    }

    #[test]
    fn trims_leading_and_trailing_slashes() {
        let p = PathInfo::get("/users/ewout/").unwrap();
        assert_eq!(p.path(), "users/ewout");
    }

    #[test]
    fn child_guard_rejects_bad_key() {
        let base = PathInfo::get("x").unwrap();
        assert_eq!(base.child("a/b[2]/c").unwrap().path(), "x/a/b[2]/c");
        assert!(matches!(base.child("bad\\key"), Err(AceError::PathRule { .. })));
    }

    #[test]
    fn child_parent_round_trips() {
        let p = PathInfo::get("users/ewout/posts").unwrap();
        let child = p.child("title").unwrap();
        assert!(child.parent().unwrap().equals(&p));
    }

    #[test]
    fn wildcard_equals_concrete() {
        let pattern = PathInfo::get("posts/$id").unwrap();
        let concrete = PathInfo::get("posts/123").unwrap();
        assert!(pattern.equals(&concrete));
    }

    #[test]
    fn extract_variables_matches_example() {
        let pattern = PathInfo::get("users/$uid/posts/$postid").unwrap();
        let concrete = PathInfo::get("users/ewout/posts/post1/title").unwrap();
        let vars = PathInfo::extract_variables(&pattern, &concrete);
        assert_eq!(vars.len(), 2);
        assert_eq!(vars.by_index(0), Some(&Key::Str("ewout".into())));
        assert_eq!(vars.by_index(1), Some(&Key::Str("post1".into())));
        assert_eq!(vars.by_name("uid"), Some(&Key::Str("ewout".into())));
        assert_eq!(vars.by_name("$uid"), Some(&Key::Str("ewout".into())));
        assert_eq!(vars.by_name("postid"), Some(&Key::Str("post1".into())));
    }

    #[test]
    fn ancestor_is_irreflexive_and_antisymmetric() {
        let a = PathInfo::get("a").unwrap();
        let b = PathInfo::get("a/b").unwrap();
        assert!(!a.is_ancestor_of(&a));
        assert!(a.is_ancestor_of(&b));
        assert!(!b.is_ancestor_of(&a));
        assert!(PathInfo::root().is_ancestor_of(&a));
    }

    #[test]
    fn trail_is_reflexive_and_symmetric() {
        let a = PathInfo::get("a/b").unwrap();
        let b = PathInfo::get("a/b/c").unwrap();
        assert!(a.is_on_trail_of(&a));
        assert!(a.is_on_trail_of(&b));
        assert!(b.is_on_trail_of(&a));
        assert!(PathInfo::root().is_on_trail_of(&b));
    }
}
