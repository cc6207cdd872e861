use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use turn_engine::{PendingApproval, PermissionGate, PermissionVerdict, PromptDecision};

use crate::config::{PermissionMode, PermissionSettings};
use crate::control::ControlRouter;

/// Tools that never modify the workspace.
pub const READ_ONLY_TOOLS: &[&str] = &["Read", "Glob", "Grep", "LS"];
/// Tools `accept-edits` mode runs without asking.
pub const EDIT_TOOLS: &[&str] = &["Write", "Edit"];

/// `Tool` matches every call to the tool; `Tool(spec)` also matches the
/// call's primary argument, exactly or by prefix when `spec` ends in `*`.
///
/// Bash commands are matched per segment: chaining operators, pipes and
/// command substitutions split a command into separately checked parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRule {
    pub tool: String,
    pub pattern: Option<String>,
}

impl PermissionRule {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let Some(open) = raw.find('(') else {
            if raw.is_empty() || raw.contains(')') {
                return Err(format!("Invalid permission rule '{raw}'"));
            }
            return Ok(Self {
                tool: raw.to_string(),
                pattern: None,
            });
        };

        let tool = raw[..open].trim();
        let Some(pattern) = raw[open + 1..].strip_suffix(')') else {
            return Err(format!("Invalid permission rule '{raw}': missing closing ')'"));
        };
        if tool.is_empty() {
            return Err(format!("Invalid permission rule '{raw}': missing tool name"));
        }

        Ok(Self {
            tool: tool.to_string(),
            pattern: Some(pattern.trim().to_string()).filter(|pattern| !pattern.is_empty()),
        })
    }

    /// True when any part of the call matches. Used for deny and ask rules.
    pub fn matches(&self, tool_name: &str, args: &Value) -> bool {
        self.check_subjects(tool_name, args, |subjects, pattern| {
            subjects.iter().any(|subject| pattern_matches(pattern, subject))
        })
    }

    /// True only when every part of the call matches. Used for allow rules,
    /// so `Bash(git *)` does not cover `git status; rm -rf ~`.
    pub fn covers(&self, tool_name: &str, args: &Value) -> bool {
        self.check_subjects(tool_name, args, |subjects, pattern| {
            !subjects.is_empty() && subjects.iter().all(|subject| pattern_matches(pattern, subject))
        })
    }

    fn check_subjects(
        &self,
        tool_name: &str,
        args: &Value,
        check: impl Fn(&[&str], &str) -> bool,
    ) -> bool {
        if self.tool != tool_name {
            return false;
        }
        let Some(pattern) = &self.pattern else {
            return true;
        };
        let Some(subject) = primary_argument(args) else {
            return false;
        };

        if tool_name == BASH_TOOL {
            check(&command_segments(subject), pattern)
        } else {
            check(&[subject], pattern)
        }
    }
}

const BASH_TOOL: &str = "Bash";

fn pattern_matches(pattern: &str, subject: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => subject.starts_with(prefix),
        None => subject == pattern,
    }
}

fn command_separator_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"&&|\|\||\$\(|[;|&\n`()]").expect("command separator regex must compile")
    })
}

/// Splits a shell command on chaining, piping, backgrounding and
/// substitution boundaries, dropping empty parts.
fn command_segments(command: &str) -> Vec<&str> {
    command_separator_regex()
        .split(command)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

impl fmt::Display for PermissionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pattern {
            Some(pattern) => write!(f, "{}({pattern})", self.tool),
            None => f.write_str(&self.tool),
        }
    }
}

/// The argument rules are matched against: a command or a path.
fn primary_argument(args: &Value) -> Option<&str> {
    ["command", "file_path", "path", "pattern"]
        .iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
}

/// Rule and mode based permission gate. Deny beats allow beats ask; the
/// mode decides calls no rule matched.
pub struct RulePermissions {
    settings: PermissionSettings,
    approver: Option<Arc<ControlRouter>>,
}

impl RulePermissions {
    pub fn new(settings: PermissionSettings) -> Self {
        Self {
            settings,
            approver: None,
        }
    }

    /// Routes "ask" verdicts to the embedding host.
    #[must_use]
    pub fn with_approver(mut self, approver: Arc<ControlRouter>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn mode(&self) -> PermissionMode {
        self.settings.mode
    }

    fn mode_verdict(&self, tool_name: &str) -> PermissionVerdict {
        let read_only = READ_ONLY_TOOLS.contains(&tool_name);
        let edit = EDIT_TOOLS.contains(&tool_name);

        match self.settings.mode {
            PermissionMode::BypassPermissions => PermissionVerdict::Allow { matched_rule: None },
            PermissionMode::Default if read_only => PermissionVerdict::Allow { matched_rule: None },
            PermissionMode::AcceptEdits if read_only || edit => {
                PermissionVerdict::Allow { matched_rule: None }
            }
            PermissionMode::Plan if read_only => PermissionVerdict::Allow { matched_rule: None },
            PermissionMode::Plan => PermissionVerdict::Deny {
                reason: format!("Tool {tool_name} is not available in plan mode"),
            },
            PermissionMode::Default | PermissionMode::AcceptEdits => {
                PermissionVerdict::Ask { reason: None }
            }
        }
    }
}

#[async_trait]
impl PermissionGate for RulePermissions {
    fn check(&self, tool_name: &str, args: &Value) -> PermissionVerdict {
        let first_match = |rules: &[PermissionRule]| {
            rules
                .iter()
                .find(|rule| rule.matches(tool_name, args))
                .map(ToString::to_string)
        };

        if let Some(rule) = first_match(&self.settings.deny) {
            return PermissionVerdict::Deny {
                reason: format!("Denied by rule {rule}"),
            };
        }
        let covering = self
            .settings
            .allow
            .iter()
            .find(|rule| rule.covers(tool_name, args))
            .map(ToString::to_string);
        if let Some(rule) = covering {
            return PermissionVerdict::Allow {
                matched_rule: Some(rule),
            };
        }
        if let Some(rule) = first_match(&self.settings.ask) {
            return PermissionVerdict::Ask {
                reason: Some(format!("matched rule {rule}")),
            };
        }
        self.mode_verdict(tool_name)
    }

    async fn prompt(&self, approval: &PendingApproval, args: &Value) -> Option<PromptDecision> {
        let approver = self.approver.as_ref()?;
        approver.request_permission(approval, args).await
    }
}
