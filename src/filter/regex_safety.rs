//! Compile-time safety checks for `$regex` filter leaves (§4.2).
//!
//! Patterns are rejected before a `regex::Regex` is ever built if they are
//! too long, use disallowed flags, or match one of a small set of
//! structural red flags known to cause catastrophic backtracking in
//! backtracking engines. The `regex` crate itself is linear-time and would
//! not actually backtrack, but the grammar's safety contract is evaluated
//! structurally so that filter wire formats remain portable to engines that
//! do.

use regex::Regex;

use crate::error::{Error, Result};

const MAX_PATTERN_LEN: usize = 1000;
const ALLOWED_FLAGS: &str = "gimsuvy";

/// Compiles a filter's `$regex` pattern after validating it against the
/// structural safety rules. `flags` is a string of single-character flags
/// (a subset of `g i m s u v y`).
///
/// # Errors
///
/// Returns [`Error::BadFilter`] if the pattern is too long, carries a
/// disallowed flag, matches a known-dangerous structural shape, or fails to
/// compile as a regex.
pub fn compile_safe(pattern: &str, flags: &str) -> Result<Regex> {
    if pattern.chars().count() > MAX_PATTERN_LEN {
        return Err(Error::BadFilter(format!(
            "regex pattern exceeds {MAX_PATTERN_LEN} characters"
        )));
    }
    for flag in flags.chars() {
        if !ALLOWED_FLAGS.contains(flag) {
            return Err(Error::BadFilter(format!(
                "regex flag '{flag}' is not permitted (allowed: {ALLOWED_FLAGS})"
            )));
        }
    }
    if let Some(reason) = find_structural_red_flag(pattern) {
        return Err(Error::BadFilter(format!(
            "regex pattern rejected: {reason}"
        )));
    }

    let mut builder_pattern = pattern.to_string();
    if flags.contains('i') {
        builder_pattern = format!("(?i){builder_pattern}");
    }
    if flags.contains('m') {
        builder_pattern = format!("(?m){builder_pattern}");
    }
    if flags.contains('s') {
        builder_pattern = format!("(?s){builder_pattern}");
    }

    Regex::new(&builder_pattern).map_err(|e| Error::BadFilter(format!("invalid regex: {e}")))
}

/// Looks for the structural shapes §4.2 names as unsafe, returning a short
/// human-readable reason when one is found.
fn find_structural_red_flag(pattern: &str) -> Option<&'static str> {
    if has_nested_unbounded_quantifier(pattern) {
        return Some("nested unbounded quantifier, e.g. (.*)+ or (.+)*");
    }
    if has_nested_group_with_quantifier(pattern) {
        return Some("nested group with an outer quantifier");
    }
    if count_top_level_alternations(pattern) >= 3 {
        return Some("three or more top-level alternations");
    }
    if has_negative_lookahead_then_dollar_scan(pattern) {
        return Some("negative lookahead followed by .*$");
    }
    None
}

/// Detects `(.*)+`, `(.+)+`, `(.*)*`, `(.+)*` (and their non-capturing
/// variants) anywhere in the pattern.
fn has_nested_unbounded_quantifier(pattern: &str) -> bool {
    const NEEDLES: &[&str] = &[
        "(.*)+", "(.+)+", "(.*)*", "(.+)*", "(?:.*)+", "(?:.+)+", "(?:.*)*", "(?:.+)*",
    ];
    NEEDLES.iter().any(|n| pattern.contains(n))
}

/// Detects a group containing another quantified group, with the outer
/// group itself quantified, e.g. `((a+)+)` or `(?:(a*)+)`.
fn has_nested_group_with_quantifier(pattern: &str) -> bool {
    let chars: Vec<char> = pattern.chars().collect();
    let mut opens: Vec<usize> = Vec::new();
    let mut groups: Vec<(usize, usize)> = Vec::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '(' && (i == 0 || chars[i - 1] != '\\') {
            opens.push(i);
        } else if c == ')' && (i == 0 || chars[i - 1] != '\\') {
            if let Some(start) = opens.pop() {
                groups.push((start, i));
            }
        }
    }

    for &(outer_start, outer_end) in &groups {
        let outer_quantified = matches!(chars.get(outer_end + 1), Some('+' | '*'));
        if !outer_quantified {
            continue;
        }
        for &(inner_start, inner_end) in &groups {
            if inner_start > outer_start && inner_end < outer_end {
                let inner_quantified = matches!(chars.get(inner_end + 1), Some('+' | '*'));
                if inner_quantified {
                    return true;
                }
            }
        }
    }
    false
}

/// Counts `|` occurring outside of any group, ignoring escaped pipes.
fn count_top_level_alternations(pattern: &str) -> usize {
    let mut depth = 0i32;
    let mut count = 0usize;
    let chars: Vec<char> = pattern.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        let escaped = i > 0 && chars[i - 1] == '\\';
        if escaped {
            continue;
        }
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            '|' if depth == 0 => count += 1,
            _ => {}
        }
    }
    count
}

/// Detects a negative lookahead `(?!...)` followed eventually by `.*$`.
fn has_negative_lookahead_then_dollar_scan(pattern: &str) -> bool {
    if let Some(idx) = pattern.find("(?!") {
        return pattern[idx..].contains(".*$");
    }
    false
}
