//! Role-based guard for agent tool invocations.
//!
//! The coder may use every tool. The reviewer is restricted to read-only tools
//! when the reviewer write policy is enforced; otherwise it is allowed
//! everything as well.

use crate::flow_machine::Role;
use crate::tool_executor::ToolAction;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Tool names that mutate files. Compared after normalization, see [`normalize_tool_name`].
const WRITE_TOOLS: &[&str] = &[
    "write",
    "writefile",
    "edit",
    "editfile",
    "multiedit",
    "notebookedit",
    "createfile",
    "deletefile",
    "removefile",
    "movefile",
    "renamefile",
    "applypatch",
    "strreplace",
    "strreplaceeditor",
];

/// Tool names that run shell commands.
const SHELL_TOOLS: &[&str] = &["bash", "shell", "runcommand", "exec", "terminal"];

fn normalize_tool_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Returns true if `name` is a file-mutating tool.
pub fn is_write_tool(name: &str) -> bool {
    let normalized = normalize_tool_name(name);
    WRITE_TOOLS.contains(&normalized.as_str())
}

/// Returns true if `name` is a shell-execution tool.
pub fn is_shell_tool(name: &str) -> bool {
    let normalized = normalize_tool_name(name);
    SHELL_TOOLS.contains(&normalized.as_str())
}

struct BashPatterns {
    harmless_redirect: Regex,
    redirect: Regex,
    mutating_verb: Regex,
    in_place_edit: Regex,
    git_write: Regex,
    package_write: Regex,
}

fn bash_patterns() -> &'static BashPatterns {
    static PATTERNS: OnceLock<BashPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| BashPatterns {
        harmless_redirect: Regex::new(r"\d*>>?[ \t]*/dev/null|\d*>&\d+|&>[ \t]*/dev/null")
            .expect("harmless redirect pattern is valid"),
        redirect: Regex::new(r">").expect("redirect pattern is valid"),
        mutating_verb: Regex::new(
            r"(?:^|[;&|(`]|\$\()[ \t]*(?:sudo[ \t]+)?(?:rm|rmdir|mv|cp|mkdir|touch|chmod|chown|ln|truncate|dd|tee|install|unlink|shred)\b",
        )
        .expect("mutating verb pattern is valid"),
        in_place_edit: Regex::new(r"\b(?:sed|perl)\b[^|;&]*\s-[a-zA-Z]*i")
            .expect("in-place edit pattern is valid"),
        git_write: Regex::new(
            r"\bgit[ \t]+(?:add|commit|push|pull|reset|checkout|switch|merge|rebase|rm|mv|stash|apply|am|cherry-pick|revert|clean|restore|tag|init|clone|fetch)\b",
        )
        .expect("git write pattern is valid"),
        package_write: Regex::new(
            r"\b(?:npm|pnpm|yarn|bun|pip|pip3|cargo|go|gem|brew|apt|apt-get|poetry|uv)[ \t]+(?:install|i|add|remove|rm|uninstall|update|upgrade|publish|get|init|new)\b",
        )
        .expect("package manager pattern is valid"),
    })
}

/// Heuristically classifies a shell command as writing to the workspace.
///
/// Looks for output redirection (other than to `/dev/null` or fd duplication)
/// and for mutating file, git and package-manager verbs.
pub fn is_write_bash_command(command: &str) -> bool {
    let patterns = bash_patterns();
    let stripped = patterns.harmless_redirect.replace_all(command, " ");

    patterns.redirect.is_match(&stripped)
        || patterns.mutating_verb.is_match(&stripped)
        || patterns.in_place_edit.is_match(&stripped)
        || patterns.git_write.is_match(&stripped)
        || patterns.package_write.is_match(&stripped)
}

/// Outcome of a tool permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolDecision {
    Allowed,
    Denied { reason: String },
}

impl ToolDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ToolDecision::Allowed)
    }

    /// Converts a denial into the `blocked` action the executor understands.
    pub fn into_blocked_action(self) -> Option<ToolAction> {
        match self {
            ToolDecision::Allowed => None,
            ToolDecision::Denied { reason } => Some(ToolAction::Blocked { reason }),
        }
    }
}

/// Pure per-role permission predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolFilter {
    role: Role,
    read_only_reviewer: bool,
}

/// Builds the filter for `role` under the given reviewer write policy.
pub fn create_tool_filter(role: Role, read_only_reviewer: bool) -> ToolFilter {
    ToolFilter {
        role,
        read_only_reviewer,
    }
}

impl ToolFilter {
    pub fn role(&self) -> Role {
        self.role
    }

    /// Checks one invocation of `tool_name` with its JSON input.
    pub fn check(&self, tool_name: &str, input: &Value) -> ToolDecision {
        if self.role == Role::Coder || !self.read_only_reviewer {
            return ToolDecision::Allowed;
        }

        if is_write_tool(tool_name) {
            return ToolDecision::Denied {
                reason: format!(
                    "The reviewer is read-only: tool '{}' modifies files. \
                     Describe the change in a request_changes action instead.",
                    tool_name
                ),
            };
        }

        if is_shell_tool(tool_name) {
            if let Some(command) = shell_command(input) {
                if is_write_bash_command(command) {
                    return ToolDecision::Denied {
                        reason: format!(
                            "The reviewer is read-only: shell command '{}' looks like a write. \
                             Only inspection commands are allowed during review.",
                            command
                        ),
                    };
                }
            }
        }

        ToolDecision::Allowed
    }

    /// Checks a tool by name alone, ignoring any shell command input.
    pub fn allows_tool(&self, tool_name: &str) -> bool {
        self.check(tool_name, &Value::Null).is_allowed()
    }
}

fn shell_command(input: &Value) -> Option<&str> {
    match input {
        Value::String(command) => Some(command),
        Value::Object(map) => ["command", "cmd", "script"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str)),
        _ => None,
    }
}

/// Removes every tool the filter rejects by name.
pub fn filter_tools_for_role<T>(tools: BTreeMap<String, T>, filter: &ToolFilter) -> BTreeMap<String, T> {
    tools
        .into_iter()
        .filter(|(name, _)| {
            let allowed = filter.allows_tool(name);
            if !allowed {
                tracing::debug!(tool = %name, role = %filter.role(), "Tool removed for role");
            }
            allowed
        })
        .collect()
}

/// A single tool implementation reachable by an agent.
pub trait ToolHandler {
    fn invoke(&self, input: &Value) -> anyhow::Result<Value>;
}

/// A tool call rejected by the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDenied {
    pub tool: String,
    pub reason: String,
}

impl ToolDenied {
    pub fn into_action(self) -> ToolAction {
        ToolAction::Blocked {
            reason: self.reason,
        }
    }
}

/// Result of an intercepted tool call.
#[derive(Debug)]
pub enum InterceptedCall {
    Completed(anyhow::Result<Value>),
    Denied(ToolDenied),
}

/// Wraps a tool so each invocation is re-checked against the filter, for
/// tools reachable without going through [`filter_tools_for_role`].
pub struct ReadOnlyInterceptor<H> {
    name: String,
    inner: H,
    filter: ToolFilter,
}

/// Wraps `inner` with a per-call permission check.
pub fn create_read_only_interceptor<H: ToolHandler>(
    name: impl Into<String>,
    inner: H,
    filter: ToolFilter,
) -> ReadOnlyInterceptor<H> {
    ReadOnlyInterceptor {
        name: name.into(),
        inner,
        filter,
    }
}

impl<H: ToolHandler> ReadOnlyInterceptor<H> {
    pub fn call(&self, input: &Value) -> InterceptedCall {
        match self.filter.check(&self.name, input) {
            ToolDecision::Allowed => InterceptedCall::Completed(self.inner.invoke(input)),
            ToolDecision::Denied { reason } => {
                tracing::warn!(tool = %self.name, role = %self.filter.role(), "Tool call denied");
                InterceptedCall::Denied(ToolDenied {
                    tool: self.name.clone(),
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/tool_filter_tests.rs"]
mod tests;
