//! # Selectors and Paths
//!
//! Minimal path language for addressing nodes in the hierarchical store.
//!
//! ## Path Shape
//! ```text
//! /devices/device[name='dev1']/live-status/interfaces/interface[name='eth0']/mtu
//!  ───┬─── ────────┬────────── ─────┬───── ────┬───── ──────────┬────────── ─┬─
//!   step     step + predicate      step       step     step + predicate    leaf
//! ```
//!
//! - Steps are separated by `/`. A `/` inside a quoted predicate value is part
//!   of the value (selectors are stored as list keys, so this happens a lot).
//! - A selector step without predicates ranges over every list instance:
//!   `interface` matches `interface[name='eth0']` and `interface[name='eth1']`.
//! - A selector step with predicates must match the path step exactly.
//! - `*` matches any single step.

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Step Scanning
// =============================================================================

/// Walks `path` and reports the byte offset of every top-level `/`.
///
/// Separators inside `[...]` or inside quotes are skipped.
fn separator_offsets(path: &str) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (idx, ch) in path.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' if depth > 0 => quote = Some(ch),
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                '/' if depth == 0 => offsets.push(idx),
                _ => {}
            },
        }
    }

    offsets
}

/// Splits a path into its non-empty steps.
///
/// ```rust
/// use mapcache_core::selector::split_steps;
///
/// let steps = split_steps("/map[key-xpath='/a/b/k']/device[name='d1']/name");
/// assert_eq!(steps, vec!["map[key-xpath='/a/b/k']", "device[name='d1']", "name"]);
/// ```
pub fn split_steps(path: &str) -> Vec<&str> {
    let mut steps = Vec::new();
    let mut start = 0;

    for offset in separator_offsets(path) {
        if offset > start {
            steps.push(&path[start..offset]);
        }
        start = offset + 1;
    }
    if start < path.len() {
        steps.push(&path[start..]);
    }

    steps
}

/// Returns everything before the last top-level `/`.
///
/// `None` when the path has no separator at all.
pub fn parent_path(path: &str) -> Option<&str> {
    separator_offsets(path).last().map(|&idx| &path[..idx])
}

/// Returns the last step of a path (the leaf name for leaf paths).
pub fn last_step(path: &str) -> Option<&str> {
    split_steps(path).last().copied()
}

/// Returns the name part of a step (`interface[name='eth0']` → `interface`).
pub fn step_name(step: &str) -> &str {
    match step.find('[') {
        Some(idx) => &step[..idx],
        None => step,
    }
}

/// Quotes a list-key value for use inside a predicate.
///
/// Uses single quotes unless the value contains one, then double quotes.
/// A value containing both is written as `concat(...)` of quoted pieces, so
/// every quoted run stays balanced and the step still splits cleanly:
///
/// ```rust
/// use mapcache_core::selector::quote;
///
/// assert_eq!(quote("a'b\"c"), r#"concat('a',"'",'b"c')"#);
/// ```
pub fn quote(value: &str) -> String {
    match (value.contains('\''), value.contains('"')) {
        (false, _) => format!("'{}'", value),
        (true, false) => format!("\"{}\"", value),
        (true, true) => {
            let mut parts = Vec::new();
            for (idx, piece) in value.split('\'').enumerate() {
                if idx > 0 {
                    parts.push("\"'\"".to_string());
                }
                if !piece.is_empty() {
                    parts.push(format!("'{}'", piece));
                }
            }
            format!("concat({})", parts.join(","))
        }
    }
}

/// Builds a keyed list step: `name[key='value']`.
pub fn keyed_step(name: &str, key: &str, value: &str) -> String {
    format!("{}[{}={}]", name, key, quote(value))
}

// =============================================================================
// Selector
// =============================================================================

/// A parsed selector that can be matched against stored paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    raw: String,
    steps: Vec<String>,
}

impl Selector {
    /// Parses an absolute selector.
    ///
    /// ## Errors
    /// - Selector does not start with `/`
    /// - Selector has no steps
    /// - Unbalanced `[` `]` or an unterminated quote
    pub fn parse(selector: &str) -> CoreResult<Self> {
        let trimmed = selector.trim();

        if !trimmed.starts_with('/') {
            return Err(CoreError::invalid_selector(selector, "must be absolute"));
        }

        check_balanced(trimmed).map_err(|reason| CoreError::invalid_selector(selector, reason))?;

        let steps: Vec<String> = split_steps(trimmed).into_iter().map(str::to_string).collect();
        if steps.is_empty() {
            return Err(CoreError::invalid_selector(selector, "has no steps"));
        }

        Ok(Selector {
            raw: trimmed.to_string(),
            steps,
        })
    }

    /// Returns the selector text as parsed.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the parsed steps.
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Returns true if `path` is addressed by this selector.
    pub fn matches(&self, path: &str) -> bool {
        let actual = split_steps(path);
        actual.len() == self.steps.len()
            && self
                .steps
                .iter()
                .zip(actual)
                .all(|(pattern, step)| step_matches(pattern, step))
    }

    /// Returns the longest literal prefix every matching path starts with.
    ///
    /// Stores use this to narrow a scan before calling [`Selector::matches`].
    pub fn literal_prefix(&self) -> String {
        let mut prefix = String::new();
        for step in &self.steps {
            if step == "*" {
                prefix.push('/');
                break;
            }
            prefix.push('/');
            prefix.push_str(step);
            if !step.contains('[') {
                break;
            }
        }
        prefix
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn step_matches(pattern: &str, actual: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if pattern.contains('[') {
        pattern == actual
    } else {
        step_name(actual) == pattern
    }
}

fn check_balanced(text: &str) -> Result<(), &'static str> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    for ch in text.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' if depth > 0 => quote = Some(ch),
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err("unbalanced ']'");
                    }
                }
                _ => {}
            },
        }
    }

    if quote.is_some() {
        Err("unterminated quote")
    } else if depth != 0 {
        Err("unbalanced '['")
    } else {
        Ok(())
    }
}
