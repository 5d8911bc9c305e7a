//! Resolution of a step id to the step that follows it.
//!
//! Two resolvers are provided: a fixed ordered list, and one derived from the
//! markdown body of a plan. Neither touches the filesystem.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Maps a step id to its successor.
pub trait StepResolver {
    /// Returns the id following `current`, or `None` if `current` is the last
    /// step or unknown.
    fn next_step(&self, current: &str) -> Option<String>;
}

/// Resolves against an explicit ordered list of step ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListStepResolver {
    steps: Vec<String>,
}

impl ListStepResolver {
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }
}

impl StepResolver for ListStepResolver {
    fn next_step(&self, current: &str) -> Option<String> {
        let index = self.steps.iter().position(|step| step == current)?;
        self.steps.get(index + 1).cloned()
    }
}

/// Resolves against the numbered steps found in a plan body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownStepResolver {
    steps: Vec<String>,
}

impl MarkdownStepResolver {
    pub fn from_markdown(body: &str) -> Self {
        Self {
            steps: extract_step_ids(body),
        }
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }
}

impl StepResolver for MarkdownStepResolver {
    fn next_step(&self, current: &str) -> Option<String> {
        let index = self.steps.iter().position(|step| step == current)?;
        self.steps.get(index + 1).cloned()
    }
}

fn step_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // "## Step 3: ...", "- **Step 3:** ...", "Step 3 - ..."
            Regex::new(r"(?mi)^[ \t]*(?:#{1,6}[ \t]*|[-*+][ \t]+)?(?:\*\*|__)?step[ \t]+(\d+)[ \t]*(?:\*\*|__)?[ \t]*[:.)\-]")
                .expect("step header pattern is valid"),
            // "3) ..."
            Regex::new(r"(?m)^[ \t]*(\d+)\)[ \t]+\S").expect("paren list pattern is valid"),
            // "3. ..."
            Regex::new(r"(?m)^[ \t]*(\d+)\.[ \t]+\S").expect("dot list pattern is valid"),
        ]
    })
}

/// Extracts step ids from a plan body.
///
/// Patterns are tried in priority order and the first one with any match wins.
/// Ids are de-duplicated keeping the first occurrence and sorted numerically.
pub fn extract_step_ids(body: &str) -> Vec<String> {
    for pattern in step_patterns() {
        let mut seen = HashSet::new();
        let mut ids: Vec<String> = pattern
            .captures_iter(body)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|id| seen.insert(id.clone()))
            .collect();

        if ids.is_empty() {
            continue;
        }

        ids.sort_by_key(|id| numeric_value(id));
        return ids;
    }
    Vec::new()
}

fn numeric_value(id: &str) -> u128 {
    let digits = id.trim_start_matches('0');
    digits.parse().unwrap_or(if digits.is_empty() { 0 } else { u128::MAX })
}

#[cfg(test)]
#[path = "tests/step_resolver_tests.rs"]
mod tests;
