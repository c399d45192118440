//! Validation pipeline for a single skill file
//!
//! read → scan → load → schema → probe. Each stage records onto the same
//! report; a structural failure stops the pipeline and no tool is admitted.

use super::module::{ModuleLoader, SkillExports};
use super::report::{codes, ValidationReport};
use super::scanner::SafetyScanner;
use super::schema::{validate_exports, ValidatedTool};
use super::types::panic_message;
use super::verifier::{ProbeConfig, Verifier};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use tracing::debug;

/// Result of validating one skill
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub report: ValidationReport,
    /// Tools that passed every stage, in declared order
    pub admitted: Vec<ValidatedTool>,
    /// First structural error, when the skill was rejected
    pub error: Option<String>,
}

impl ValidationOutcome {
    fn rejected(report: ValidationReport) -> Self {
        let error = report.errors().next().map(|issue| issue.message.clone());
        Self {
            report,
            admitted: Vec::new(),
            error,
        }
    }
}

/// Runs the scanner, the loader and the verifier for skill files
#[derive(Debug, Clone, Default)]
pub struct SkillValidator {
    scanner: SafetyScanner,
    verifier: Verifier,
}

impl SkillValidator {
    pub fn new(probe: ProbeConfig) -> Self {
        Self {
            scanner: SafetyScanner::new(),
            verifier: Verifier::new(probe),
        }
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Validate the skill at `path` with `loader`
    pub async fn validate_file(&self, name: &str, path: &Path, loader: &dyn ModuleLoader) -> ValidationOutcome {
        let mut report = ValidationReport::new(name);

        let source = match tokio::fs::read_to_string(path).await {
            Ok(source) => source,
            Err(e) => {
                report.error(codes::READ_ERROR, format!("Cannot read file: {}", e), None);
                return ValidationOutcome::rejected(report);
            }
        };

        match loader.code_units(&source) {
            Ok(units) => {
                if !self.scanner.scan(&units, &mut report) {
                    return ValidationOutcome::rejected(report);
                }
            }
            Err(e) => {
                self.scanner.syntax_error(&e, &mut report);
                return ValidationOutcome::rejected(report);
            }
        }

        let exports = match catch_unwind(AssertUnwindSafe(|| loader.load(path, &source))) {
            Ok(Ok(exports)) => exports,
            Ok(Err(e)) => {
                report.error(codes::IMPORT_ERROR, format!("Skill failed to load: {:#}", e), None);
                return ValidationOutcome::rejected(report);
            }
            Err(payload) => {
                report.error(
                    codes::LOADER_CRASH,
                    format!("Loader panicked: {}", panic_message(payload.as_ref())),
                    None,
                );
                return ValidationOutcome::rejected(report);
            }
        };

        self.validate_exports(report, &exports).await
    }

    /// Schema-check and probe already loaded exports
    pub async fn validate_exports(&self, mut report: ValidationReport, exports: &SkillExports) -> ValidationOutcome {
        let Some(tools) = validate_exports(exports, &mut report) else {
            return ValidationOutcome::rejected(report);
        };

        self.verifier.verify(&tools, &mut report).await;

        let admitted: Vec<ValidatedTool> = tools
            .into_iter()
            .filter(|tool| report.tools_ok.iter().any(|ok| ok == tool.name()))
            .collect();
        debug!(
            "Skill '{}': {} of {} tools admitted",
            report.skill_name,
            admitted.len(),
            report.tools_ok.len() + report.tools_bad.len()
        );

        ValidationOutcome {
            report,
            admitted,
            error: None,
        }
    }
}
