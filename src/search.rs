//! Pattern searcher (C8): text/regex/glob matching with context-line
//! expansion, a complexity guard against pathological regexes, and a bounded
//! LRU cache of compiled patterns.

use crate::config;
use crate::error::{Error, Result};
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use std::num::NonZeroUsize;

/// Which matching mode to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Text,
    Regex,
    Glob,
}

/// Options controlling a single match call.
#[derive(Debug, Clone)]
pub struct MatchOptions {
    pub kind: PatternKind,
    pub case_sensitive: bool,
    pub invert_match: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            kind: PatternKind::Text,
            case_sensitive: true,
            invert_match: false,
        }
    }
}

/// A single match against one line.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched_text: String,
    pub start_index: usize,
    pub end_index: usize,
    pub capture_groups: Vec<Option<String>>,
}

/// One line plus the context lines immediately surrounding it.
#[derive(Debug, Clone)]
pub struct ContextMatch<'a> {
    pub line: &'a str,
    pub line_index: usize,
    pub matched: MatchResult,
    pub before: Vec<&'a str>,
    pub after: Vec<&'a str>,
}

/// Check a pattern against `MAX_PATTERN_LEN` and, for regex/glob, a
/// complexity score. Returns `Invalid` on rejection.
pub fn validate_pattern(pattern: &str, kind: PatternKind) -> Result<()> {
    if pattern.is_empty() {
        return Err(Error::Invalid("pattern must not be empty".to_string()));
    }
    if pattern.len() > config::max_pattern_len() {
        return Err(Error::Invalid(format!(
            "pattern exceeds max length of {} characters",
            config::max_pattern_len()
        )));
    }
    if matches!(kind, PatternKind::Regex | PatternKind::Glob) {
        let score = complexity_score(pattern);
        if score > config::max_pattern_complexity() {
            return Err(Error::Invalid(format!(
                "pattern complexity {score} exceeds maximum of {}",
                config::max_pattern_complexity()
            )));
        }
    }
    Ok(())
}

/// Heuristic complexity score used to reject ReDoS-shaped patterns before
/// compiling them. See spec §4.8 for the exact scoring rules.
#[must_use]
pub fn complexity_score(pattern: &str) -> u32 {
    let mut score = pattern.len() as u32;
    score += wildcard_run_score(pattern);

    let class_count = pattern.matches('[').count();
    if class_count >= 3 {
        score += 20;
    }

    let capture_group_count = count_capture_groups(pattern);
    if capture_group_count >= 5 {
        score += 20;
    }

    for unbounded in ["\\d*", "\\s*", "\\w*"] {
        if pattern.contains(unbounded) {
            score += 20;
        }
    }

    if has_large_or_unbounded_repetition(pattern) {
        score += 20;
    }

    if has_nested_quantifiers(pattern) {
        score += 50;
    }

    score
}

/// Score runs of consecutive `.*`/`.+` wildcard tokens. A run of `n` tokens
/// contributes 20 points per pair within the run (`n*(n-1)/2`), not just per
/// adjacent pair, so stacking wildcards scales quadratically the way their
/// backtracking blowup does -- `.*.*.*.*` (a 4-token run) scores well past a
/// single adjacent-pair count would.
fn wildcard_run_score(pattern: &str) -> u32 {
    let bytes = pattern.as_bytes();
    let mut score = 0u32;
    let mut run_len: u32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'.' && matches!(bytes.get(i + 1), Some(b'*') | Some(b'+')) {
            run_len += 1;
            i += 2;
        } else {
            score += run_score_for(run_len);
            run_len = 0;
            i += 1;
        }
    }
    score += run_score_for(run_len);
    score
}

fn run_score_for(run_len: u32) -> u32 {
    if run_len >= 2 {
        20 * run_len * (run_len - 1) / 2
    } else {
        0
    }
}

fn count_capture_groups(pattern: &str) -> usize {
    let bytes = pattern.as_bytes();
    let mut count = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == b'(' && bytes.get(i + 1) != Some(&b'?') {
            count += 1;
        }
        i += 1;
    }
    count
}

fn has_large_or_unbounded_repetition(pattern: &str) -> bool {
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = pattern[i..].find('}') {
                let inner = &pattern[i + 1..i + end];
                if let Some((min_s, max_s)) = inner.split_once(',') {
                    if max_s.trim().is_empty() {
                        return true;
                    }
                    if let Ok(max) = max_s.trim().parse::<u32>() {
                        if max > 100 {
                            return true;
                        }
                    }
                    let _ = min_s;
                }
                i += end;
            }
        }
        i += 1;
    }
    false
}

fn has_nested_quantifiers(pattern: &str) -> bool {
    let bytes = pattern.as_bytes();
    let mut depth_with_quantifier = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 1;
            }
            b'(' => depth_with_quantifier.push(false),
            b')' => {
                let had_quantifier_inside = depth_with_quantifier.pop().unwrap_or(false);
                if had_quantifier_inside {
                    if let Some(next) = bytes.get(i + 1) {
                        if matches!(next, b'*' | b'+' | b'?' | b'{') {
                            return true;
                        }
                    }
                }
            }
            b'*' | b'+' => {
                if let Some(last) = depth_with_quantifier.last_mut() {
                    *last = true;
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

/// Translate a glob pattern into an anchored regex source string.
/// `*` -> `.*`, `?` -> `.`, `[!...]` -> `[^...]`, other regex metacharacters
/// escaped.
#[must_use]
pub fn glob_to_regex_source(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                for c2 in chars.by_ref() {
                    if c2 == ']' {
                        out.push(']');
                        break;
                    }
                    out.push(c2);
                }
            }
            c if regex_syntax::is_meta_character(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    out
}

/// Bounded cache of compiled regexes, keyed by `(pattern, case_sensitive)`.
pub struct PatternCache {
    inner: Mutex<LruCache<(String, bool), Regex>>,
}

impl PatternCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(config::pattern_cache_capacity())
    }

    /// Compile `source`, caching under `(key, case_sensitive)`. `key` is
    /// what the caller considers the pattern's identity (the original glob
    /// text, for glob patterns, rather than its translated regex source).
    fn compile(&self, key: &str, source: &str, case_sensitive: bool) -> Result<Regex> {
        let cache_key = (key.to_string(), case_sensitive);
        let mut inner = self.inner.lock();
        if let Some(re) = inner.get(&cache_key) {
            return Ok(re.clone());
        }
        let full_source = if case_sensitive {
            source.to_string()
        } else {
            format!("(?i){source}")
        };
        let re = Regex::new(&full_source).map_err(|e| Error::Invalid(format!("invalid regex: {e}")))?;
        inner.put(cache_key, re.clone());
        Ok(re)
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Substring match, honoring `case_sensitive`.
#[must_use]
pub fn text_match(line: &str, pattern: &str, opts: &MatchOptions) -> Option<MatchResult> {
    let result = if opts.case_sensitive {
        line.find(pattern).map(|start| MatchResult {
            matched_text: line[start..start + pattern.len()].to_string(),
            start_index: start,
            end_index: start + pattern.len(),
            capture_groups: Vec::new(),
        })
    } else {
        case_insensitive_find(line, pattern)
    };
    apply_invert(result, opts.invert_match, line)
}

/// Case-insensitive substring search that only ever slices `line` at its own
/// char boundaries. Full-string `to_lowercase()` can change a character's
/// byte width (and even its char count, e.g. U+0130 'İ' -> "i̇"), so finding
/// an offset in a lowercased copy and reusing it against the original string
/// can land mid-codepoint. Comparing char-by-char against `line`'s own
/// `char_indices` sidesteps that: every byte offset we ever slice at came
/// from `line` itself.
fn case_insensitive_find(line: &str, pattern: &str) -> Option<MatchResult> {
    let folded_pattern: Vec<char> = pattern.chars().flat_map(char::to_lowercase).collect();
    if folded_pattern.is_empty() {
        return None;
    }
    let line_chars: Vec<(usize, char)> = line.char_indices().collect();

    for window_start in 0..line_chars.len() {
        let mut folded_len = 0usize;
        let mut chars_consumed = 0usize;
        for &(_, c) in &line_chars[window_start..] {
            for folded_c in c.to_lowercase() {
                if folded_len >= folded_pattern.len() || folded_c != folded_pattern[folded_len] {
                    folded_len = usize::MAX;
                    break;
                }
                folded_len += 1;
            }
            if folded_len == usize::MAX {
                break;
            }
            chars_consumed += 1;
            if folded_len == folded_pattern.len() {
                break;
            }
        }
        if folded_len == folded_pattern.len() {
            let byte_start = line_chars[window_start].0;
            let end_char_idx = window_start + chars_consumed;
            let byte_end = line_chars.get(end_char_idx).map_or(line.len(), |(b, _)| *b);
            return Some(MatchResult {
                matched_text: line[byte_start..byte_end].to_string(),
                start_index: byte_start,
                end_index: byte_end,
                capture_groups: Vec::new(),
            });
        }
    }
    None
}

fn apply_invert(result: Option<MatchResult>, invert: bool, line: &str) -> Option<MatchResult> {
    if !invert {
        return result;
    }
    match result {
        Some(_) => None,
        None => Some(MatchResult {
            matched_text: line.to_string(),
            start_index: 0,
            end_index: line.len(),
            capture_groups: Vec::new(),
        }),
    }
}

/// Match one line against `pattern` interpreted according to `opts.kind`,
/// using `cache` to avoid recompiling regex/glob patterns.
pub fn match_line(
    cache: &PatternCache,
    line: &str,
    pattern: &str,
    opts: &MatchOptions,
) -> Result<Option<MatchResult>> {
    validate_pattern(pattern, opts.kind)?;
    match opts.kind {
        PatternKind::Text => Ok(text_match(line, pattern, opts)),
        PatternKind::Regex => regex_match(cache, line, pattern, opts),
        PatternKind::Glob => {
            let source = glob_to_regex_source(pattern);
            regex_match_source(cache, line, pattern, &source, opts)
        }
    }
}

fn regex_match(
    cache: &PatternCache,
    line: &str,
    pattern: &str,
    opts: &MatchOptions,
) -> Result<Option<MatchResult>> {
    regex_match_source(cache, line, pattern, pattern, opts)
}

fn regex_match_source(
    cache: &PatternCache,
    line: &str,
    cache_key: &str,
    source: &str,
    opts: &MatchOptions,
) -> Result<Option<MatchResult>> {
    let re = cache.compile(cache_key, source, opts.case_sensitive)?;

    let result = re.captures(line).map(|caps| {
        let whole = caps.get(0).expect("capture 0 always present");
        let groups = caps
            .iter()
            .skip(1)
            .map(|g| g.map(|m| m.as_str().to_string()))
            .collect();
        MatchResult {
            matched_text: whole.as_str().to_string(),
            start_index: whole.start(),
            end_index: whole.end(),
            capture_groups: groups,
        }
    });
    Ok(apply_invert(result, opts.invert_match, line))
}

/// Match every line, stopping early once `max_matches` hits are found.
pub fn match_many<'a>(
    cache: &PatternCache,
    lines: &'a [String],
    pattern: &str,
    opts: &MatchOptions,
    max_matches: Option<usize>,
) -> Result<Vec<(usize, MatchResult)>> {
    validate_pattern(pattern, opts.kind)?;
    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if let Some(m) = match_line(cache, line, pattern, opts)? {
            out.push((idx, m));
            if let Some(max) = max_matches {
                if out.len() >= max {
                    break;
                }
            }
        }
    }
    Ok(out)
}

/// Match with `context_lines` of surrounding context clipped to buffer
/// bounds.
pub fn match_with_context<'a>(
    cache: &PatternCache,
    lines: &'a [String],
    pattern: &str,
    opts: &MatchOptions,
    context_lines: usize,
) -> Result<Vec<ContextMatch<'a>>> {
    validate_pattern(pattern, opts.kind)?;
    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if let Some(m) = match_line(cache, line, pattern, opts)? {
            let before_start = idx.saturating_sub(context_lines);
            let after_end = (idx + 1 + context_lines).min(lines.len());
            out.push(ContextMatch {
                line,
                line_index: idx,
                matched: m,
                before: lines[before_start..idx].iter().map(String::as_str).collect(),
                after: lines[idx + 1..after_end].iter().map(String::as_str).collect(),
            });
        }
    }
    Ok(out)
}

mod regex_syntax {
    pub fn is_meta_character(c: char) -> bool {
        matches!(
            c,
            '.' | '^' | '$' | '+' | '(' | ')' | '|' | '{' | '}' | '\\'
        )
    }
}
