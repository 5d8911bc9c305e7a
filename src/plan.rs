//! Plan documents: markdown with a YAML frontmatter block.
//!
//! The frontmatter field `active_step` is the durable progress marker. Rewrites
//! touch only that one line so the rest of the document round-trips byte for
//! byte.

use crate::errors::OrchestrationError;
use crate::step_resolver::MarkdownStepResolver;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const FRONTMATTER_DELIMITER: &str = "---";
const ACTIVE_STEP_KEY: &str = "active_step";

#[derive(Debug, Clone, PartialEq)]
pub struct PlanFrontmatter {
    /// Normalized to a string even when the YAML value is a number.
    pub active_step: String,
    /// Every other frontmatter field, untouched.
    pub extra: BTreeMap<String, YamlValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub path: PathBuf,
    pub frontmatter: PlanFrontmatter,
    pub body: String,
}

impl Plan {
    pub fn active_step(&self) -> &str {
        &self.frontmatter.active_step
    }

    /// Step resolver derived from the numbered steps in the plan body.
    pub fn step_resolver(&self) -> MarkdownStepResolver {
        MarkdownStepResolver::from_markdown(&self.body)
    }
}

/// Loads plans and rewrites their step pointer.
pub trait PlanStore {
    fn load_plan(&self, path: &Path) -> Result<Plan, OrchestrationError>;

    /// Rewrites `frontmatter.active_step` to `step`, leaving the rest of the
    /// document unchanged.
    fn update_active_step(&self, path: &Path, step: &str) -> Result<(), OrchestrationError>;
}

/// [`PlanStore`] for markdown files on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownPlanStore;

impl PlanStore for MarkdownPlanStore {
    fn load_plan(&self, path: &Path) -> Result<Plan, OrchestrationError> {
        let content = fs::read_to_string(path).map_err(|e| unreadable(path, e.to_string()))?;
        parse_plan(path, &content)
    }

    fn update_active_step(&self, path: &Path, step: &str) -> Result<(), OrchestrationError> {
        let content = fs::read_to_string(path).map_err(|source| OrchestrationError::PlanWrite {
            path: path.to_path_buf(),
            source,
        })?;
        let updated = rewrite_active_step(&content, step).ok_or_else(|| {
            OrchestrationError::PlanWrite {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "plan has no frontmatter block",
                ),
            }
        })?;
        write_atomic(path, &updated).map_err(|source| OrchestrationError::PlanWrite {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(plan = %path.display(), step, "Plan step pointer updated");
        Ok(())
    }
}

fn unreadable(path: &Path, reason: impl Into<String>) -> OrchestrationError {
    OrchestrationError::PlanUnreadable {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Byte ranges of a frontmatter block.
struct FrontmatterSpan {
    /// Start of the first YAML line (just after the opening delimiter line).
    yaml_start: usize,
    /// Start of the closing delimiter line.
    yaml_end: usize,
    /// First byte after the closing delimiter line.
    body_start: usize,
}

fn is_delimiter(line: &str) -> bool {
    line.trim_end_matches(['\n', '\r']).trim_end() == FRONTMATTER_DELIMITER
}

fn locate_frontmatter(content: &str) -> Option<FrontmatterSpan> {
    let mut lines = content.split_inclusive('\n');
    let first = lines.next()?;
    if !is_delimiter(first.trim_start_matches('\u{feff}')) {
        return None;
    }

    let yaml_start = first.len();
    let mut offset = yaml_start;
    for line in lines {
        if is_delimiter(line) {
            return Some(FrontmatterSpan {
                yaml_start,
                yaml_end: offset,
                body_start: offset + line.len(),
            });
        }
        offset += line.len();
    }
    None
}

/// Parses plan text into frontmatter and body.
pub fn parse_plan(path: &Path, content: &str) -> Result<Plan, OrchestrationError> {
    let span = locate_frontmatter(content)
        .ok_or_else(|| unreadable(path, "missing YAML frontmatter block"))?;
    let yaml = content.get(span.yaml_start..span.yaml_end).unwrap_or_default();
    let body = content.get(span.body_start..).unwrap_or_default();

    let mut fields: BTreeMap<String, YamlValue> = if yaml.trim().is_empty() {
        BTreeMap::new()
    } else {
        serde_yaml::from_str(yaml)
            .map_err(|e| unreadable(path, format!("invalid frontmatter: {}", e)))?
    };

    let active_step = match fields.remove(ACTIVE_STEP_KEY) {
        Some(YamlValue::String(step)) => step,
        Some(YamlValue::Number(step)) => step.to_string(),
        Some(other) => {
            return Err(unreadable(
                path,
                format!("active_step must be a string or number, got {:?}", other),
            ))
        }
        None => return Err(unreadable(path, "frontmatter has no active_step")),
    };
    let active_step = active_step.trim().to_string();
    if active_step.is_empty() {
        return Err(unreadable(path, "active_step is empty"));
    }

    Ok(Plan {
        path: path.to_path_buf(),
        frontmatter: PlanFrontmatter {
            active_step,
            extra: fields,
        },
        body: body.to_string(),
    })
}

fn is_bare_safe(step: &str) -> bool {
    !step.is_empty()
        && step
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn format_value(step: &str, quote: Option<char>) -> String {
    match quote {
        Some('\'') => format!("'{}'", step.replace('\'', "''")),
        Some(_) => format!("\"{}\"", step.replace('\\', "\\\\").replace('"', "\\\"")),
        None if is_bare_safe(step) => step.to_string(),
        None => format!("\"{}\"", step.replace('\\', "\\\\").replace('"', "\\\"")),
    }
}

/// Rewrites the `active_step` line in `content`, preserving everything else.
///
/// Returns `None` when the document has no frontmatter block.
pub fn rewrite_active_step(content: &str, step: &str) -> Option<String> {
    let span = locate_frontmatter(content)?;
    let yaml = content.get(span.yaml_start..span.yaml_end)?;
    let mut rewritten = String::with_capacity(content.len() + step.len());
    rewritten.push_str(content.get(..span.yaml_start)?);

    let mut replaced = false;
    for line in yaml.split_inclusive('\n') {
        // YAML allows blanks between the key and its colon.
        let value = line
            .strip_prefix(ACTIVE_STEP_KEY)
            .and_then(|rest| rest.trim_start_matches([' ', '\t']).strip_prefix(':'));
        match value {
            Some(value) if !replaced => {
                let key = line
                    .get(..line.len() - value.len())
                    .unwrap_or(ACTIVE_STEP_KEY);
                let ending = if line.ends_with("\r\n") {
                    "\r\n"
                } else if line.ends_with('\n') {
                    "\n"
                } else {
                    ""
                };
                let value = value.trim_end_matches(['\n', '\r']);
                let trimmed = value.trim_start();
                let quote = trimmed.chars().next().filter(|c| *c == '"' || *c == '\'');
                let comment = match quote {
                    None => trimmed.find(" #").and_then(|at| trimmed.get(at..)),
                    Some(_) => None,
                };
                rewritten.push_str(key);
                if !key.ends_with(':') {
                    rewritten.push(':');
                }
                rewritten.push(' ');
                rewritten.push_str(&format_value(step, quote));
                if let Some(comment) = comment {
                    rewritten.push_str(comment);
                }
                rewritten.push_str(ending);
                replaced = true;
            }
            _ => rewritten.push_str(line),
        }
    }

    if !replaced {
        if !yaml.is_empty() && !yaml.ends_with('\n') {
            rewritten.push('\n');
        }
        rewritten.push_str(ACTIVE_STEP_KEY);
        rewritten.push_str(": ");
        rewritten.push_str(&format_value(step, Some('"')));
        rewritten.push('\n');
    }

    rewritten.push_str(content.get(span.yaml_end..)?);
    Some(rewritten)
}

/// Writes via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)
}

#[cfg(test)]
#[path = "tests/plan_tests.rs"]
mod tests;
