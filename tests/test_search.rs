//! Unit tests for the pattern searcher (C8): text/regex/glob matching,
//! complexity scoring, and context-line expansion.

use shellsup::search::{self, ContextMatch, MatchOptions, PatternCache, PatternKind};

fn lines(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Pattern validation / complexity scoring
// ---------------------------------------------------------------------------

#[test]
fn test_validate_pattern_rejects_empty() {
    assert!(search::validate_pattern("", PatternKind::Text).is_err());
}

#[test]
fn test_validate_pattern_rejects_over_length() {
    let pattern = "a".repeat(10_000);
    assert!(search::validate_pattern(&pattern, PatternKind::Text).is_err());
}

#[test]
fn test_complexity_score_penalizes_nested_quantifiers() {
    let simple = search::complexity_score("hello");
    let nested = search::complexity_score("(a+)+");
    assert!(nested > simple);
}

#[test]
fn test_complexity_score_penalizes_unbounded_repetition() {
    let bounded = search::complexity_score("a{1,5}");
    let unbounded = search::complexity_score("a{1,}");
    assert!(unbounded > bounded);
}

#[test]
fn test_validate_pattern_rejects_pathological_regex() {
    // Nested quantifier + unbounded repetition + 3 character classes stacks
    // enough score to exceed the default complexity ceiling.
    let pattern = "(a+)+(b+)+{1,}[0-9][a-z][A-Z]";
    assert!(search::validate_pattern(pattern, PatternKind::Regex).is_err());
}

#[test]
fn test_validate_pattern_rejects_consecutive_wildcard_run() {
    // The literal pathological pattern named by the spec: a run of
    // consecutive `.*` tokens whose complexity must exceed 100.
    assert!(search::validate_pattern(".*.*.*.*", PatternKind::Regex).is_err());
}

// ---------------------------------------------------------------------------
// Glob translation
// ---------------------------------------------------------------------------

#[test]
fn test_glob_to_regex_translates_wildcards() {
    assert_eq!(search::glob_to_regex_source("*.rs"), "^.*\\.rs$");
    assert_eq!(search::glob_to_regex_source("file?.txt"), "^file..txt$");
}

#[test]
fn test_glob_to_regex_negated_class() {
    assert_eq!(search::glob_to_regex_source("[!abc]"), "^[^abc]$");
}

// ---------------------------------------------------------------------------
// Text matching
// ---------------------------------------------------------------------------

#[test]
fn test_text_match_case_sensitive_by_default() {
    let opts = MatchOptions::default();
    assert!(search::text_match("Hello World", "World", &opts).is_some());
    assert!(search::text_match("Hello World", "world", &opts).is_none());
}

#[test]
fn test_text_match_case_insensitive() {
    let opts = MatchOptions { case_sensitive: false, ..MatchOptions::default() };
    assert!(search::text_match("Hello World", "world", &opts).is_some());
}

#[test]
fn test_text_match_case_insensitive_multibyte_does_not_panic() {
    // U+0130 'İ' lowercases to "i̇" (two chars, three bytes), so a naive
    // byte offset found in a lowercased copy can land off a char boundary
    // against the original string.
    let opts = MatchOptions { case_sensitive: false, ..MatchOptions::default() };
    let line = "İstanbul error: disk full";
    let result = search::text_match(line, "ERROR", &opts).unwrap();
    assert_eq!(result.matched_text.to_lowercase(), "error");
    assert_eq!(&line[result.start_index..result.end_index], "error");
}

#[test]
fn test_text_match_invert() {
    let opts = MatchOptions { invert_match: true, ..MatchOptions::default() };
    assert!(search::text_match("Hello World", "World", &opts).is_none());
    assert!(search::text_match("Hello World", "Nope", &opts).is_some());
}

// ---------------------------------------------------------------------------
// Regex matching via the pattern cache
// ---------------------------------------------------------------------------

#[test]
fn test_regex_match_with_capture_groups() {
    let cache = PatternCache::new(16);
    let opts = MatchOptions { kind: PatternKind::Regex, ..MatchOptions::default() };
    let result = search::match_line(&cache, "error: line 42", r"line (\d+)", &opts).unwrap().unwrap();
    assert_eq!(result.capture_groups, vec![Some("42".to_string())]);
}

#[test]
fn test_regex_match_reuses_cached_compiled_pattern() {
    let cache = PatternCache::new(16);
    let opts = MatchOptions { kind: PatternKind::Regex, ..MatchOptions::default() };
    // Two calls with the same pattern; the second should hit the cache
    // rather than recompiling (observable indirectly: both must agree).
    let first = search::match_line(&cache, "abc123", r"\d+", &opts).unwrap();
    let second = search::match_line(&cache, "abc123", r"\d+", &opts).unwrap();
    assert_eq!(first.unwrap().matched_text, second.unwrap().matched_text);
}

#[test]
fn test_glob_match_through_match_line() {
    let cache = PatternCache::new(16);
    let opts = MatchOptions { kind: PatternKind::Glob, ..MatchOptions::default() };
    assert!(search::match_line(&cache, "main.rs", "*.rs", &opts).unwrap().is_some());
    assert!(search::match_line(&cache, "main.py", "*.rs", &opts).unwrap().is_none());
}

// ---------------------------------------------------------------------------
// match_many / match_with_context
// ---------------------------------------------------------------------------

#[test]
fn test_match_many_stops_at_max_matches() {
    let cache = PatternCache::new(16);
    let opts = MatchOptions::default();
    let input = lines(&["error one", "ok", "error two", "error three"]);

    let matches = search::match_many(&cache, &input, "error", &opts, Some(2)).unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].0, 0);
    assert_eq!(matches[1].0, 2);
}

#[test]
fn test_match_with_context_clips_to_buffer_bounds() {
    let cache = PatternCache::new(16);
    let opts = MatchOptions::default();
    let input = lines(&["a", "b", "needle", "d", "e"]);

    let matches = search::match_with_context(&cache, &input, "needle", &opts, 2).unwrap();
    assert_eq!(matches.len(), 1);
    let ContextMatch { before, after, line_index, .. } = &matches[0];
    assert_eq!(*line_index, 2);
    assert_eq!(before, &vec!["a", "b"]);
    assert_eq!(after, &vec!["d", "e"]);
}

#[test]
fn test_match_with_context_clips_at_start_of_buffer() {
    let cache = PatternCache::new(16);
    let opts = MatchOptions::default();
    let input = lines(&["needle", "b", "c"]);

    let matches = search::match_with_context(&cache, &input, "needle", &opts, 3).unwrap();
    assert!(matches[0].before.is_empty());
    assert_eq!(matches[0].after, vec!["b", "c"]);
}
