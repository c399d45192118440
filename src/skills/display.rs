//! Status lines for validated skills

use super::registry::SkillStatus;
use tracing::{info, warn};

const MAX_LISTED_ERRORS: usize = 6;

/// Receives one notification per re-validated skill
pub trait ReportSink: Send + Sync {
    fn skill_loaded(&self, status: &SkillStatus);
    fn skill_rejected(&self, status: &SkillStatus);
}

/// Default sink: status lines through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn skill_loaded(&self, status: &SkillStatus) {
        let lines = loaded_lines(status);
        if status.report.tools_bad.is_empty() {
            info!("{}", lines.join("\n"));
        } else {
            warn!("{}", lines.join("\n"));
        }
    }

    fn skill_rejected(&self, status: &SkillStatus) {
        warn!("{}", rejected_lines(status).join("\n"));
    }
}

/// Lines announcing an admitted skill, with any rejected tools and warnings
pub fn loaded_lines(status: &SkillStatus) -> Vec<String> {
    let report = &status.report;
    let warnings: Vec<_> = report.warnings().collect();
    let mut lines = Vec::new();

    if report.tools_bad.is_empty() {
        let suffix = if warnings.is_empty() {
            String::new()
        } else {
            format!("  ({} warnings)", warnings.len())
        };
        lines.push(format!(
            "✓ Skill {}: {} tools validated{}",
            status.name,
            status.tools.len(),
            suffix
        ));
    } else {
        lines.push(format!(
            "⚠ Skill {}: {} tools OK  {} REJECTED",
            status.name,
            status.tools.len(),
            report.tools_bad.len()
        ));
        for bad in &report.tools_bad {
            for issue in report.errors().filter(|i| i.tool.as_deref() == Some(bad.as_str())) {
                lines.push(format!("    ✗ {}: {}", bad, issue.message));
            }
        }
    }

    for warning in warnings {
        let scope = warning.tool.as_deref().unwrap_or(&status.name);
        lines.push(format!("    ⚠ {}: {}", scope, warning.message));
    }
    lines
}

/// Lines explaining why a skill was rejected
pub fn rejected_lines(status: &SkillStatus) -> Vec<String> {
    let report = &status.report;
    let errors: Vec<_> = report.errors().collect();
    let mut lines = vec![format!("Skill REJECTED: {}", status.name)];

    for issue in errors.iter().take(MAX_LISTED_ERRORS) {
        lines.push(format!("    {}", issue));
    }
    if errors.len() > MAX_LISTED_ERRORS {
        lines.push(format!("    ... and {} more errors", errors.len() - MAX_LISTED_ERRORS));
    }
    for hint in report.remediation_hints() {
        lines.push(format!("    hint: {}", hint));
    }
    lines.push("    Fix and save, the skill is retried automatically.".to_string());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::report::{codes, ValidationReport};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn status(report: ValidationReport) -> SkillStatus {
        let error = report.errors().next().map(|i| i.message.clone());
        SkillStatus {
            name: report.skill_name.clone(),
            path: PathBuf::from("demo.toml"),
            ok: report.passed,
            tools: Vec::new(),
            handlers: HashMap::new(),
            error,
            report,
        }
    }

    #[test]
    fn test_loaded_lines_list_rejected_tools() {
        let mut report = ValidationReport::new("demo");
        report.tool_error(codes::HANDLER_CRASH, "Handler crashed with dummy args: boom", "bad_tool");
        report.warn(codes::HANDLER_TIMEOUT, "slow", Some("slow_tool"));

        let lines = loaded_lines(&status(report));
        assert_eq!(lines[0], "⚠ Skill demo: 0 tools OK  1 REJECTED");
        assert!(lines.iter().any(|l| l.contains("✗ bad_tool: Handler crashed")));
        assert!(lines.iter().any(|l| l.contains("⚠ slow_tool: slow")));
    }

    #[test]
    fn test_rejected_lines_truncate_errors() {
        let mut report = ValidationReport::new("demo");
        for i in 0..8 {
            report.error(codes::MISSING_HANDLER, format!("missing {}", i), Some(&format!("t{}", i)));
        }

        let lines = rejected_lines(&status(report));
        assert_eq!(lines[0], "Skill REJECTED: demo");
        assert!(lines.iter().any(|l| l.contains("... and 2 more errors")));
        assert!(lines.iter().any(|l| l.starts_with("    hint:")));
    }
}
