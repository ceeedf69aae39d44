//! Path inclusion and exclusion patterns.

use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use std::fmt;

use notesync_common::{normalize_path, Error, PatternViolation, Result};

/// Longest accepted pattern, in characters (inclusive).
pub const MAX_PATTERN_LENGTH: usize = 256;

/// Outcome of validating one pattern. Never an error value itself.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PatternValidation {
    pub pattern: String,
    pub valid: bool,
    pub error: Option<PatternViolation>,
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '*' | '?' | '[' | ']')
}

fn check(pattern: &str) -> Option<PatternViolation> {
    if pattern.trim().is_empty() {
        return Some(PatternViolation::EmptyPattern);
    }
    if pattern.starts_with('/') {
        return Some(PatternViolation::AbsolutePathNotAllowed);
    }
    if pattern.chars().any(|c| (c as u32) <= 0x1F) {
        return Some(PatternViolation::ControlCharacterNotAllowed);
    }
    if pattern.contains("***") {
        return Some(PatternViolation::ConsecutiveWildcardNotAllowed);
    }
    if pattern.chars().count() > MAX_PATTERN_LENGTH {
        return Some(PatternViolation::PatternTooLong);
    }
    pattern
        .chars()
        .find(|c| !is_allowed(*c))
        .map(PatternViolation::InvalidCharacter)
}

/// Rewrite a validated pattern into `globset` syntax.
///
/// `**` that is not a whole path component becomes `{*,*/**/*}`, so it
/// still spans directories. An unclosed or empty `[` is a literal, and a
/// reversed range such as `[z-a]` is read as `[a-z]`.
fn to_glob(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut glob = String::with_capacity(pattern.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let left_bounded = i == 0 || chars[i - 1] == '/';
                let right_bounded = chars.get(i + 2).map_or(true, |c| *c == '/');
                if left_bounded && right_bounded {
                    glob.push_str("**");
                } else {
                    glob.push_str("{*,*/**/*}");
                }
                i += 2;
            }
            '[' => match chars[i + 1..].iter().position(|c| *c == ']') {
                Some(close) if close > 0 => {
                    glob.push('[');
                    glob.push_str(&class_body(&chars[i + 1..i + 1 + close]));
                    glob.push(']');
                    i += close + 2;
                }
                _ => {
                    glob.push_str("[[]");
                    i += 1;
                }
            },
            c => {
                glob.push(c);
                i += 1;
            }
        }
    }

    glob
}

/// No negation: `!` and `^` never pass validation.
fn class_body(body: &[char]) -> String {
    let mut out = String::new();
    let mut j = 0;
    while j < body.len() {
        if j + 2 < body.len() && body[j + 1] == '-' {
            let (lo, hi) = if body[j] <= body[j + 2] {
                (body[j], body[j + 2])
            } else {
                (body[j + 2], body[j])
            };
            out.push(lo);
            out.push('-');
            out.push(hi);
            j += 3;
        } else {
            out.push(body[j]);
            j += 1;
        }
    }
    out
}

fn build_glob(pattern: &str) -> Result<Glob> {
    GlobBuilder::new(&to_glob(pattern))
        .literal_separator(true)
        .backslash_escape(false)
        .build()
        .map_err(|e| Error::InvalidInput(format!("Cannot compile pattern {:?}: {}", pattern, e)))
}

/// A validated, compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    raw: String,
    glob: Glob,
    matcher: GlobMatcher,
}

impl GlobPattern {
    /// Validate and compile a pattern.
    ///
    /// # Errors
    /// - `Error::Policy` carrying the first violated rule
    pub fn parse(pattern: &str) -> Result<Self> {
        if let Some(reason) = check(pattern) {
            return Err(Error::Policy {
                pattern: pattern.to_string(),
                reason,
            });
        }
        let glob = build_glob(pattern)?;
        Ok(Self {
            raw: pattern.to_string(),
            matcher: glob.compile_matcher(),
            glob,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the normalized `path` matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(normalize_path(path).as_str())
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for GlobPattern {}

impl fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn build_set(patterns: &[GlobPattern]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(pattern.glob.clone());
    }
    builder
        .build()
        .map_err(|e| Error::InvalidInput(format!("Cannot compile pattern set: {}", e)))
}

/// Compiled inclusion and exclusion rules.
///
/// A path is admitted when no exclude pattern matches it and, if any
/// include patterns exist, at least one of them does.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    exclude: Vec<GlobPattern>,
    include: Vec<GlobPattern>,
    exclude_set: GlobSet,
    include_set: GlobSet,
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            include: Vec::new(),
            exclude_set: GlobSet::empty(),
            include_set: GlobSet::empty(),
        }
    }
}

impl PathPolicy {
    /// Validate one pattern. Pure and total.
    pub fn validate(pattern: &str) -> PatternValidation {
        let error = check(pattern);
        PatternValidation {
            pattern: pattern.to_string(),
            valid: error.is_none(),
            error,
        }
    }

    /// Validate every pattern, preserving order.
    pub fn validate_all<S: AsRef<str>>(patterns: &[S]) -> Vec<PatternValidation> {
        patterns.iter().map(|p| Self::validate(p.as_ref())).collect()
    }

    /// Whether `path` matches any of `patterns`.
    pub fn matches(path: &str, patterns: &[GlobPattern]) -> bool {
        patterns.iter().any(|p| p.matches(path))
    }

    /// Compile a policy. Every pattern is validated before any is used.
    ///
    /// # Errors
    /// - `Error::Policy` for the first invalid pattern, excludes first
    pub fn new<S: AsRef<str>, T: AsRef<str>>(exclude: &[S], include: &[T]) -> Result<Self> {
        let exclude = exclude
            .iter()
            .map(|p| GlobPattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let include = include
            .iter()
            .map(|p| GlobPattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            exclude_set: build_set(&exclude)?,
            include_set: build_set(&include)?,
            exclude,
            include,
        })
    }

    /// Policy with exclusion patterns only.
    pub fn excluding<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        Self::new::<S, &str>(patterns, &[])
    }

    /// Whether any exclude pattern matches `path`.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_set.is_match(normalize_path(path).as_str())
    }

    /// Whether `path` may be synced: not excluded, and included when
    /// include patterns exist.
    pub fn admits(&self, path: &str) -> bool {
        let path = normalize_path(path);
        !self.exclude_set.is_match(path.as_str())
            && (self.include.is_empty() || self.include_set.is_match(path.as_str()))
    }

    /// Compiled exclude patterns, in configuration order.
    pub fn exclude_patterns(&self) -> &[GlobPattern] {
        &self.exclude
    }

    /// Compiled include patterns, in configuration order.
    pub fn include_patterns(&self) -> &[GlobPattern] {
        &self.include
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reason(pattern: &str) -> Option<PatternViolation> {
        PathPolicy::validate(pattern).error
    }

    #[test]
    fn test_empty_patterns() {
        assert_eq!(reason(""), Some(PatternViolation::EmptyPattern));
        assert_eq!(reason("   "), Some(PatternViolation::EmptyPattern));
    }

    #[test]
    fn test_absolute_pattern() {
        assert_eq!(reason("/abs"), Some(PatternViolation::AbsolutePathNotAllowed));
    }

    #[test]
    fn test_control_characters() {
        assert_eq!(
            reason("a\x00b"),
            Some(PatternViolation::ControlCharacterNotAllowed)
        );
        assert_eq!(
            reason("notes/\tdraft"),
            Some(PatternViolation::ControlCharacterNotAllowed)
        );
    }

    #[test]
    fn test_wildcard_runs() {
        assert!(PathPolicy::validate("*").valid);
        assert!(PathPolicy::validate("**").valid);
        assert_eq!(
            reason("***"),
            Some(PatternViolation::ConsecutiveWildcardNotAllowed)
        );
        assert_eq!(
            reason("a/****/b"),
            Some(PatternViolation::ConsecutiveWildcardNotAllowed)
        );
    }

    #[test]
    fn test_length_boundary() {
        let max = "a".repeat(MAX_PATTERN_LENGTH);
        assert!(PathPolicy::validate(&max).valid);

        let over = "a".repeat(MAX_PATTERN_LENGTH + 1);
        assert_eq!(reason(&over), Some(PatternViolation::PatternTooLong));
    }

    #[test]
    fn test_invalid_characters() {
        assert_eq!(reason("a#b"), Some(PatternViolation::InvalidCharacter('#')));
        assert_eq!(reason("me@x"), Some(PatternViolation::InvalidCharacter('@')));
        assert_eq!(
            reason("my notes"),
            Some(PatternViolation::InvalidCharacter(' '))
        );
        assert_eq!(reason("é.md"), Some(PatternViolation::InvalidCharacter('é')));
    }

    #[test]
    fn test_rule_order_is_fixed() {
        // Absolute wins over the later wildcard and character rules.
        assert_eq!(reason("/***#"), Some(PatternViolation::AbsolutePathNotAllowed));
        // Control character wins over the wildcard run.
        assert_eq!(
            reason("***\x01"),
            Some(PatternViolation::ControlCharacterNotAllowed)
        );
        // Wildcard run wins over length.
        let long = format!("***{}", "a".repeat(300));
        assert_eq!(
            reason(&long),
            Some(PatternViolation::ConsecutiveWildcardNotAllowed)
        );
    }

    #[test]
    fn test_validate_all_preserves_order() {
        let results = PathPolicy::validate_all(&["ok/*", "", "x@y"]);
        assert_eq!(results.len(), 3);
        assert!(results[0].valid);
        assert_eq!(results[1].error, Some(PatternViolation::EmptyPattern));
        assert_eq!(results[2].pattern, "x@y");
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let pattern = GlobPattern::parse("private/*").unwrap();
        assert!(pattern.matches("private/secret.md"));
        assert!(!pattern.matches("private/deep/secret.md"));
        assert!(!pattern.matches("public/secret.md"));
    }

    #[test]
    fn test_double_star_crosses_segments() {
        let pattern = GlobPattern::parse("drafts/**").unwrap();
        assert!(pattern.matches("drafts/a.md"));
        assert!(pattern.matches("drafts/2024/01/a.md"));

        let suffix = GlobPattern::parse("**.png").unwrap();
        assert!(suffix.matches("attachments/img/cat.png"));
        assert!(!suffix.matches("attachments/img/cat.jpg"));
    }

    #[test]
    fn test_leading_dirs_matches_zero_dirs() {
        let pattern = GlobPattern::parse("**/templates/*.md").unwrap();
        assert!(pattern.matches("templates/daily.md"));
        assert!(pattern.matches("a/b/templates/daily.md"));
        assert!(!pattern.matches("a/templates/sub/daily.md"));
    }

    #[test]
    fn test_question_mark_and_classes() {
        let pattern = GlobPattern::parse("day-?.md").unwrap();
        assert!(pattern.matches("day-1.md"));
        assert!(!pattern.matches("day-10.md"));

        let class = GlobPattern::parse("log-[0-9a].md").unwrap();
        assert!(class.matches("log-7.md"));
        assert!(class.matches("log-a.md"));
        assert!(!class.matches("log-b.md"));
    }

    #[test]
    fn test_unclosed_bracket_is_literal() {
        let pattern = GlobPattern::parse("a[b").unwrap();
        assert!(pattern.matches("a[b"));

        let empty = GlobPattern::parse("x[]").unwrap();
        assert!(empty.matches("x[]"));
    }

    #[test]
    fn test_reversed_range() {
        let pattern = GlobPattern::parse("v[9-0].md").unwrap();
        assert!(pattern.matches("v5.md"));
    }

    #[test]
    fn test_inner_double_star_spans_directories() {
        let pattern = GlobPattern::parse("drafts/**-old.md").unwrap();
        assert!(pattern.matches("drafts/a-old.md"));
        assert!(pattern.matches("drafts/2024/a-old.md"));
        assert!(!pattern.matches("drafts/a-new.md"));

        let prefix = GlobPattern::parse("tmp**").unwrap();
        assert!(prefix.matches("tmp"));
        assert!(prefix.matches("tmpdir/x/y.md"));
        assert!(!prefix.matches("notes/tmp"));
    }

    #[test]
    fn test_to_glob() {
        assert_eq!(to_glob("**/a/**"), "**/a/**");
        assert_eq!(to_glob("**.md"), "{*,*/**/*}.md");
        assert_eq!(to_glob("a[b"), "a[[]b");
        assert_eq!(to_glob("[c-a]x"), "[a-c]x");
    }

    #[test]
    fn test_matching_is_case_sensitive_and_normalized() {
        let pattern = GlobPattern::parse("Private/*").unwrap();
        assert!(!pattern.matches("private/a.md"));
        assert!(pattern.matches("Private\\a.md"));
        assert!(pattern.matches("./Private/a.md"));
    }

    #[test]
    fn test_policy_admits() {
        let policy = PathPolicy::new(&["private/**"], &["**.md"]).unwrap();
        assert!(policy.admits("notes/a.md"));
        assert!(!policy.admits("notes/a.png"));
        assert!(!policy.admits("private/a.md"));
        assert!(policy.is_excluded("private/x/y.md"));
    }

    #[test]
    fn test_policy_rejects_invalid_pattern() {
        let err = PathPolicy::excluding(&["ok", "/bad"]).unwrap_err();
        assert!(matches!(
            err,
            Error::Policy {
                reason: PatternViolation::AbsolutePathNotAllowed,
                ..
            }
        ));
    }

    proptest! {
        #[test]
        fn prop_validate_is_total_and_deterministic(s in "\\PC{0,300}") {
            let first = PathPolicy::validate(&s);
            let second = PathPolicy::validate(&s);
            prop_assert_eq!(first.valid, first.error.is_none());
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_valid_patterns_compile(s in "[a-z0-9._/*?-]{1,64}") {
            let validation = PathPolicy::validate(&s);
            prop_assert_eq!(validation.valid, GlobPattern::parse(&s).is_ok());
        }
    }
}
