//! Validation reports
//!
//! Every check in the gate records its findings as [`Issue`]s on a
//! [`ValidationReport`] instead of returning errors, so one bad skill never
//! aborts a load pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Error,
    Warning,
    Info,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warning => "WARNING",
            Level::Info => "INFO",
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Level::Error => "✗",
            Level::Warning => "⚠",
            Level::Info => "ℹ",
        }
    }
}

/// A single finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub level: Level,
    /// Short code, e.g. `MISSING_HANDLER`
    pub code: String,
    pub message: String,
    /// Tool the issue is scoped to, if any
    pub tool: Option<String>,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.level.symbol(), self.code)?;
        if let Some(ref tool) = self.tool {
            write!(f, " [{}]", tool)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Per-skill validation outcome.
///
/// `passed` only flips on structural errors ([`ValidationReport::error`]).
/// Dynamic failures go through [`ValidationReport::tool_error`], which rejects
/// the tool without rejecting the skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub skill_name: String,
    pub passed: bool,
    pub issues: Vec<Issue>,
    pub tools_ok: Vec<String>,
    pub tools_bad: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn new(skill_name: impl Into<String>) -> Self {
        Self {
            skill_name: skill_name.into(),
            passed: true,
            issues: Vec::new(),
            tools_ok: Vec::new(),
            tools_bad: Vec::new(),
            checked_at: Utc::now(),
        }
    }

    /// Record a structural error; the skill will contribute no tools
    pub fn error(&mut self, code: &str, message: impl Into<String>, tool: Option<&str>) {
        self.push(Level::Error, code, message, tool);
        self.passed = false;
        if let Some(tool) = tool {
            self.mark_bad(tool);
        }
    }

    /// Record a tool-scoped error; only `tool` is rejected
    pub fn tool_error(&mut self, code: &str, message: impl Into<String>, tool: &str) {
        self.push(Level::Error, code, message, Some(tool));
        self.mark_bad(tool);
    }

    pub fn warn(&mut self, code: &str, message: impl Into<String>, tool: Option<&str>) {
        self.push(Level::Warning, code, message, tool);
    }

    pub fn info(&mut self, code: &str, message: impl Into<String>, tool: Option<&str>) {
        self.push(Level::Info, code, message, tool);
    }

    /// Admit a tool unless it was already rejected
    pub fn mark_ok(&mut self, tool: &str) {
        if !self.tools_bad.iter().any(|t| t == tool) && !self.tools_ok.iter().any(|t| t == tool) {
            self.tools_ok.push(tool.to_string());
        }
    }

    fn mark_bad(&mut self, tool: &str) {
        self.tools_ok.retain(|t| t != tool);
        if !self.tools_bad.iter().any(|t| t == tool) {
            self.tools_bad.push(tool.to_string());
        }
    }

    fn push(&mut self, level: Level, code: &str, message: impl Into<String>, tool: Option<&str>) {
        self.issues.push(Issue {
            level,
            code: code.to_string(),
            message: message.into(),
            tool: tool.map(str::to_string),
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.level == Level::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.level == Level::Warning)
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    pub fn has_issue(&self, code: &str) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    /// Multi-line report
    pub fn summary(&self) -> String {
        let status = if self.passed { "PASSED" } else { "FAILED" };
        let mut lines = vec![
            format!("Skill: {}  [{}]", self.skill_name, status),
            format!("  Tools OK : {}", self.tools_ok.len()),
            format!("  Tools BAD: {}", self.tools_bad.len()),
        ];
        if !self.issues.is_empty() {
            lines.push("  Issues:".to_string());
            for issue in &self.issues {
                lines.push(format!("    {}", issue));
            }
        }
        lines.join("\n")
    }

    /// One-line report
    pub fn short(&self) -> String {
        if self.passed && self.issues.is_empty() {
            return format!("✓ {}: {} tools validated", self.skill_name, self.tools_ok.len());
        }
        let (symbol, status) = if self.passed {
            ("⚠", "LOADED WITH WARNINGS")
        } else {
            ("✗", "REJECTED")
        };
        format!(
            "{} {}: {} ({} errors, {} warnings)",
            symbol,
            self.skill_name,
            status,
            self.errors().count(),
            self.warning_count()
        )
    }

    /// Fix-and-retry hints for the structural errors in this report
    pub fn remediation_hints(&self) -> Vec<&'static str> {
        let mut hints = Vec::new();
        for issue in self.errors() {
            if let Some(hint) = hint_for(&issue.code) {
                if !hints.contains(&hint) {
                    hints.push(hint);
                }
            }
        }
        hints
    }
}

/// Issue codes
pub mod codes {
    pub const READ_ERROR: &str = "READ_ERROR";
    pub const SYNTAX_ERROR: &str = "SYNTAX_ERROR";
    pub const IMPORT_ERROR: &str = "IMPORT_ERROR";
    pub const LOADER_CRASH: &str = "LOADER_CRASH";

    pub const UNSAFE_EVAL: &str = "UNSAFE_EVAL";
    pub const SHELL_TRUE: &str = "SHELL_TRUE";
    pub const OS_SYSTEM: &str = "OS_SYSTEM";

    pub const MISSING_SKILL_TOOLS: &str = "MISSING_SKILL_TOOLS";
    pub const BAD_SKILL_TOOLS: &str = "BAD_SKILL_TOOLS";
    pub const EMPTY_SKILL_TOOLS: &str = "EMPTY_SKILL_TOOLS";
    pub const MISSING_SKILL_HANDLERS: &str = "MISSING_SKILL_HANDLERS";
    pub const BAD_SKILL_HANDLERS: &str = "BAD_SKILL_HANDLERS";
    pub const BAD_TOOL_TYPE: &str = "BAD_TOOL_TYPE";
    pub const MISSING_TOOL_FIELDS: &str = "MISSING_TOOL_FIELDS";
    pub const BAD_FUNCTION_FIELD: &str = "BAD_FUNCTION_FIELD";
    pub const MISSING_FUNC_FIELDS: &str = "MISSING_FUNC_FIELDS";
    pub const BAD_TOOL_NAME: &str = "BAD_TOOL_NAME";
    pub const DUPLICATE_TOOL_NAME: &str = "DUPLICATE_TOOL_NAME";
    pub const MISSING_DESCRIPTION: &str = "MISSING_DESCRIPTION";
    pub const BAD_PARAMETERS: &str = "BAD_PARAMETERS";
    pub const BAD_PARAMS_TYPE: &str = "BAD_PARAMS_TYPE";
    pub const BAD_PROPERTY: &str = "BAD_PROPERTY";
    pub const BAD_REQUIRED: &str = "BAD_REQUIRED";
    pub const UNKNOWN_REQUIRED_PARAM: &str = "UNKNOWN_REQUIRED_PARAM";
    pub const MISSING_HANDLER: &str = "MISSING_HANDLER";
    pub const NOT_CALLABLE: &str = "NOT_CALLABLE";
    pub const ORPHAN_HANDLER: &str = "ORPHAN_HANDLER";

    pub const HANDLER_TIMEOUT: &str = "HANDLER_TIMEOUT";
    pub const HANDLER_EXPECTED_ERROR: &str = "HANDLER_EXPECTED_ERROR";
    pub const HANDLER_CRASH: &str = "HANDLER_CRASH";
    pub const RETURNS_NONE: &str = "RETURNS_NONE";
    pub const MISSING_OK_FIELD: &str = "MISSING_OK_FIELD";
    pub const MISSING_OUT_FIELD: &str = "MISSING_OUT_FIELD";

    pub const EMPTY_FILE: &str = "EMPTY_FILE";
    pub const MISSING_NAME: &str = "MISSING_NAME";
    pub const MISSING_COMMANDS: &str = "MISSING_COMMANDS";
    pub const MISSING_HANDLERS: &str = "MISSING_HANDLERS";
    pub const NOT_REGISTERED: &str = "NOT_REGISTERED";
    pub const MISSING_OK_IN_RETURN: &str = "MISSING_OK_IN_RETURN";
    pub const NO_ASYNC: &str = "NO_ASYNC";
    pub const MISSING_NULL_CHECK: &str = "MISSING_NULL_CHECK";
    pub const JS_VALID: &str = "JS_VALID";
}

/// Remediation hint for a structural error code
pub fn hint_for(code: &str) -> Option<&'static str> {
    use codes::*;

    let hint = match code {
        READ_ERROR => "Check that the skill file is readable and saved as UTF-8.",
        SYNTAX_ERROR => "Fix the syntax error at the reported line and save again.",
        IMPORT_ERROR | LOADER_CRASH => "The skill file could not be loaded; check its structure and save again.",
        MISSING_SKILL_TOOLS | BAD_SKILL_TOOLS => {
            "Declare tools as an array: [[tools]] with type = \"function\" and a [tools.function] table."
        }
        MISSING_SKILL_HANDLERS | BAD_SKILL_HANDLERS => {
            "Declare handlers as a table keyed by tool name: [handlers.<tool_name>]."
        }
        BAD_TOOL_TYPE | MISSING_TOOL_FIELDS | BAD_FUNCTION_FIELD | MISSING_FUNC_FIELDS => {
            "Each tool needs type = \"function\" and a function table with name, description and parameters."
        }
        BAD_TOOL_NAME | DUPLICATE_TOOL_NAME => "Give every tool a non-empty name that is unique within the skill.",
        BAD_PARAMETERS | BAD_PARAMS_TYPE | BAD_PROPERTY | BAD_REQUIRED => {
            "parameters must be { type = \"object\", properties = {...}, required = [...] } using JSON schema types."
        }
        MISSING_HANDLER => "Add a [handlers.<tool_name>] entry for every declared tool.",
        NOT_CALLABLE => "Each handler needs type = \"shell\", \"script\" or \"http\" with its required fields.",
        HANDLER_CRASH => "The handler failed on sample input; make it tolerate arbitrary argument values.",
        _ => return None,
    };
    Some(hint)
}
