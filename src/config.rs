//! Configuration management

use crate::error::{GateError, Result};
use crate::skills::js::{JsValidator, DEFAULT_REGISTER_CALL};
use crate::skills::sandbox::{SandboxConfig, SkillSandbox};
use crate::skills::verifier::{ExpectedErrorPolicy, ProbeConfig};
use crate::skills::watcher::{SkillWatcher, DEFAULT_POLL_INTERVAL};
use crate::skills::{FileSkillLoader, SkillRegistry, SkillValidator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Gate configuration
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Directory scanned for skill files
    pub skills_dir: PathBuf,

    /// Probe timeout and expected-error policy
    pub probe: ProbeConfig,

    /// Watcher polling interval
    pub poll_interval: Duration,

    /// Process sandbox for shell and script handlers
    pub sandbox: SandboxConfig,

    /// Call a JS skill must make to register itself
    pub js_register_call: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            skills_dir: default_skills_dir(),
            probe: ProbeConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            sandbox: SandboxConfig::default(),
            js_register_call: DEFAULT_REGISTER_CALL.to_string(),
        }
    }
}

impl GateConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let skills_dir = var("SKILLGATE_SKILLS_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(|v| PathBuf::from(shellexpand::tilde(v.trim()).into_owned()))
            .unwrap_or_else(default_skills_dir);

        let probe_timeout = match var("SKILLGATE_PROBE_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(parse_millis("SKILLGATE_PROBE_TIMEOUT_MS", &v)?),
            None => ProbeConfig::default().timeout,
        };

        let poll_interval = match var("SKILLGATE_POLL_INTERVAL_MS") {
            Some(v) => Duration::from_millis(parse_millis("SKILLGATE_POLL_INTERVAL_MS", &v)?),
            None => DEFAULT_POLL_INTERVAL,
        };

        let expected = match var("SKILLGATE_EXPECTED_ERRORS") {
            Some(v) => ExpectedErrorPolicy::parse(&v)
                .map_err(|e| GateError::Config(format!("SKILLGATE_EXPECTED_ERRORS: {}", e)))?,
            None => ExpectedErrorPolicy::default(),
        };

        let sandbox = match var("SKILLGATE_SANDBOX") {
            Some(v) => SandboxConfig::preset(v.trim()).ok_or_else(|| {
                GateError::Config(format!(
                    "SKILLGATE_SANDBOX: unknown preset '{}' (expected default, strict, relaxed or disabled)",
                    v.trim()
                ))
            })?,
            None => SandboxConfig::default(),
        };

        let js_register_call = var("SKILLGATE_JS_REGISTER_CALL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REGISTER_CALL.to_string());

        Ok(Self {
            skills_dir,
            probe: ProbeConfig {
                timeout: probe_timeout,
                expected,
            },
            poll_interval,
            sandbox,
            js_register_call,
        })
    }

    /// Registry over the configured directory with the file loader
    pub fn registry(&self) -> SkillRegistry {
        let loader = FileSkillLoader::new(SkillSandbox::new(self.sandbox.clone()));
        SkillRegistry::new(&self.skills_dir)
            .with_loader(loader)
            .with_validator(SkillValidator::new(self.probe.clone()))
            .with_js_validator(JsValidator::new(self.js_register_call.clone()))
    }

    pub fn watcher(&self, registry: Arc<SkillRegistry>) -> SkillWatcher {
        SkillWatcher::new(registry, self.poll_interval)
    }
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(GateError::Config(format!("{} must be greater than zero", key))),
        Ok(ms) => Ok(ms),
        Err(_) => Err(GateError::Config(format!("{}: '{}' is not a number of milliseconds", key, value))),
    }
}

fn default_skills_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skillgate")
        .join("skills")
}
