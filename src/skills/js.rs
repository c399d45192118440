//! Structural checks for browser-side JavaScript skills
//!
//! These skills run in the browser extension, not in the host, so they are
//! never loaded here. The checks are pattern based and only confirm the
//! skill object has the shape the extension expects.

use super::report::{codes, ValidationReport};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Default registration call a JS skill must make
pub const DEFAULT_REGISTER_CALL: &str = "AgentSkills.register";

static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"//[^\n]*").unwrap());
static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static NAME_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\bname\s*:\s*["'`]"#).unwrap());
static COMMANDS_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bcommands\s*:").unwrap());
static HANDLER_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bhandler\s*:").unwrap());
static RETURN_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"return\s*\{([^}]+)\}").unwrap());
static ASYNC_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\basync\b").unwrap());
static QUERY_SELECTOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"querySelector\s*\(").unwrap());
static NULL_CHECK: Lazy<Regex> = Lazy::new(|| Regex::new(r"if\s*\(\s*!").unwrap());
static COMMAND_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s{4,}(\w+)\s*:\s*\{").unwrap());

/// Keys that look like commands but belong to the skill object itself
const RESERVED_KEYS: [&str; 7] = [
    "commands",
    "handler",
    "name",
    "version",
    "description",
    "domains",
    "onPageLoad",
];

#[derive(Debug, Clone)]
pub struct JsValidator {
    register_call: String,
}

impl Default for JsValidator {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTER_CALL)
    }
}

impl JsValidator {
    pub fn new(register_call: impl Into<String>) -> Self {
        Self {
            register_call: register_call.into(),
        }
    }

    pub fn register_call(&self) -> &str {
        &self.register_call
    }

    /// Validate the JS skill at `path`; the report is named `<stem> [JS]`
    pub fn validate_file(&self, path: &Path) -> ValidationReport {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match std::fs::read_to_string(path) {
            Ok(source) => self.validate_source(&stem, &source),
            Err(e) => {
                let mut report = ValidationReport::new(format!("{} [JS]", stem));
                report.error(codes::READ_ERROR, format!("Cannot read JS file: {}", e), None);
                report
            }
        }
    }

    pub fn validate_source(&self, name: &str, source: &str) -> ValidationReport {
        let mut report = ValidationReport::new(format!("{} [JS]", name));

        if source.trim().is_empty() {
            report.error(codes::EMPTY_FILE, "JS skill file is empty", None);
            return report;
        }

        let without_lines = LINE_COMMENT.replace_all(source, "");
        let code = BLOCK_COMMENT.replace_all(&without_lines, "");

        if !NAME_FIELD.is_match(&code) {
            report.error(
                codes::MISSING_NAME,
                "Skill object has no 'name' field. Add: name: 'My Skill'",
                None,
            );
        }
        if !COMMANDS_FIELD.is_match(&code) {
            report.error(
                codes::MISSING_COMMANDS,
                "No 'commands' object found. Add: commands: { my_command: { handler: async () => {} } }",
                None,
            );
        }
        if !HANDLER_FIELD.is_match(&code) {
            report.error(
                codes::MISSING_HANDLERS,
                "No 'handler' functions found. Each command needs: handler: async (args) => { return { ok: true, text: '...' } }",
                None,
            );
        }
        if !code.contains(self.register_call.as_str()) {
            report.error(
                codes::NOT_REGISTERED,
                format!("Skill is never registered. Add at the end: {}(MySkill);", self.register_call),
                None,
            );
        }

        let bad_returns = RETURN_OBJECT
            .captures_iter(&code)
            .filter(|caps| !caps[1].contains("ok"))
            .count();
        if bad_returns > 0 {
            report.warn(
                codes::MISSING_OK_IN_RETURN,
                format!(
                    "{} return statement(s) missing 'ok' field. Use: return {{ ok: true, text: '...' }}",
                    bad_returns
                ),
                None,
            );
        }

        if !ASYNC_KEYWORD.is_match(&code) {
            report.warn(
                codes::NO_ASYNC,
                "No async handlers, use 'async (args) =>' for browser operations",
                None,
            );
        }

        let selectors = QUERY_SELECTOR.find_iter(&code).count();
        let null_checks = NULL_CHECK.find_iter(&code).count();
        if selectors > 0 && null_checks < selectors {
            report.warn(
                codes::MISSING_NULL_CHECK,
                format!(
                    "{} querySelector call(s) but only {} null checks. Add: if (!el) return {{ ok: false, text: 'Element not found' }}",
                    selectors, null_checks
                ),
                None,
            );
        }

        for caps in COMMAND_KEY.captures_iter(&code) {
            let command = &caps[1];
            if !RESERVED_KEYS.contains(&command) && !command.starts_with('_') {
                report.mark_ok(command);
            }
        }

        if report.errors().next().is_none() {
            let found = report.tools_ok.len();
            report.info(
                codes::JS_VALID,
                format!("JS skill looks valid ({} commands found)", found),
                None,
            );
        }
        report
    }
}
