//! Process Sandbox for Shell/Script Handlers
//!
//! Runs file-declared handlers out of process:
//! - Command blocklist/allowlist and dangerous-pattern blocking (shell only)
//! - Environment sanitization
//! - Hard timeout per execution
//! - Output size caps
//!
//! This is not OS-level isolation. It bounds what an honest-but-sloppy skill
//! can do, nothing more.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, warn};

use super::scanner::ScriptLanguage;

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Enable command filtering and env sanitization (false = execute directly)
    pub enabled: bool,
    /// Maximum execution time in seconds
    pub timeout_secs: u64,
    /// Maximum output size in bytes
    pub max_output_bytes: usize,
    /// Working directory for execution
    pub working_dir: Option<PathBuf>,
    /// Allowed commands (if empty, use blocklist mode)
    pub allowed_commands: HashSet<String>,
    /// Blocked commands (checked if allowlist is empty)
    pub blocked_commands: HashSet<String>,
    /// Blocked patterns in commands
    pub blocked_patterns: Vec<String>,
    /// Environment variables to pass through
    pub allowed_env_vars: HashSet<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 30,
            max_output_bytes: 1024 * 1024, // 1 MB
            working_dir: None,
            allowed_commands: HashSet::new(),
            blocked_commands: default_blocked_commands(),
            blocked_patterns: default_blocked_patterns(),
            allowed_env_vars: default_allowed_env_vars(),
        }
    }
}

impl SandboxConfig {
    /// Strict sandbox - minimal permissions
    pub fn strict() -> Self {
        Self {
            enabled: true,
            timeout_secs: 10,
            max_output_bytes: 64 * 1024, // 64 KB
            working_dir: None,
            allowed_commands: basic_allowed_commands(),
            blocked_commands: HashSet::new(),
            blocked_patterns: default_blocked_patterns(),
            allowed_env_vars: minimal_allowed_env_vars(),
        }
    }

    /// Relaxed sandbox - for trusted skill directories
    pub fn relaxed() -> Self {
        Self {
            timeout_secs: 120,
            max_output_bytes: 10 * 1024 * 1024, // 10 MB
            ..Default::default()
        }
    }

    /// Disabled sandbox - direct execution
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "strict" => Some(Self::strict()),
            "relaxed" => Some(Self::relaxed()),
            "disabled" => Some(Self::disabled()),
            _ => None,
        }
    }
}

/// Default blocked commands (dangerous operations)
fn default_blocked_commands() -> HashSet<String> {
    [
        // System destruction
        "rm", "rmdir", "dd", "mkfs", "fdisk", "parted",
        // Privilege escalation
        "sudo", "su", "doas", "pkexec",
        // System modification
        "chmod", "chown", "chgrp", "chroot",
        // Network tools
        "nc", "netcat", "ncat", "socat",
        // Process manipulation
        "kill", "killall", "pkill",
        // Nested shells
        "bash", "sh", "zsh", "fish", "csh", "tcsh",
        // Credential access
        "passwd",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Default blocked patterns
fn default_blocked_patterns() -> Vec<String> {
    [
        // Redirect to system files
        ">/etc/", ">>/etc/", ">/dev/",
        // Piping to shells
        "| bash", "| sh", "|bash", "|sh",
        // Command substitution
        "$(", "`",
        // Backgrounding
        "&",
        // Network exfiltration
        "curl", "wget",
        // SSH/remote
        "ssh", "scp", "rsync",
        // Env variable injection
        "export ", "eval ",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Basic allowed commands for strict mode
fn basic_allowed_commands() -> HashSet<String> {
    [
        "echo", "cat", "head", "tail", "grep", "awk", "sed",
        "wc", "sort", "uniq", "tr", "cut", "date", "pwd",
        "ls", "find", "which", "env", "printenv",
        "jq", "yq",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Default allowed environment variables
fn default_allowed_env_vars() -> HashSet<String> {
    ["PATH", "HOME", "USER", "LANG", "LC_ALL", "TERM", "TZ", "PWD"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Minimal allowed environment variables
fn minimal_allowed_env_vars() -> HashSet<String> {
    ["PATH", "HOME", "USER", "LANG"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Sandbox execution result
#[derive(Debug, Clone)]
pub struct SandboxResult {
    /// Exit code (None if killed/timeout/blocked)
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    /// Whether output was truncated
    pub truncated: bool,
    pub timed_out: bool,
    /// Whether the command was refused before running
    pub blocked: bool,
    pub duration_ms: u64,
    /// Validation warnings
    pub warnings: Vec<String>,
}

impl SandboxResult {
    fn refused(reasons: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: reasons.join("; "),
            success: false,
            truncated: false,
            timed_out: false,
            blocked: true,
            duration_ms: 0,
            warnings,
        }
    }
}

/// Command validation result
#[derive(Debug, Clone)]
pub struct CommandCheck {
    /// Whether execution is allowed
    pub allowed: bool,
    /// Reasons why blocked (if any)
    pub blocked_reasons: Vec<String>,
    /// Warnings (execution still allowed)
    pub warnings: Vec<String>,
}

/// Sandbox executor shared by all file-declared handlers
#[derive(Debug, Clone)]
pub struct SkillSandbox {
    config: SandboxConfig,
}

impl SkillSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Validate a shell command before execution
    pub fn check_command(&self, command: &str) -> CommandCheck {
        let mut warnings = Vec::new();
        let mut blocked_reasons = Vec::new();

        if !self.config.enabled {
            return CommandCheck {
                allowed: true,
                blocked_reasons,
                warnings,
            };
        }

        let base_command = command
            .split_whitespace()
            .next()
            .unwrap_or("")
            .rsplit('/')
            .next()
            .unwrap_or("");

        if !self.config.allowed_commands.is_empty() {
            if !self.config.allowed_commands.contains(base_command) {
                blocked_reasons.push(format!("Command '{}' not in allowlist", base_command));
            }
        } else if self.config.blocked_commands.contains(base_command) {
            blocked_reasons.push(format!("Command '{}' is blocked", base_command));
        }

        for pattern in &self.config.blocked_patterns {
            if command.contains(pattern.as_str()) {
                blocked_reasons.push(format!("Command contains blocked pattern: '{}'", pattern));
            }
        }

        for c in [';', '|', '$', '(', ')', '{', '}', '<', '>'] {
            if command.contains(c) {
                warnings.push(format!("Command contains shell metacharacter: '{}'", c));
            }
        }

        if command.contains("../") || command.contains("/..") {
            blocked_reasons.push("Path traversal detected".to_string());
        }

        CommandCheck {
            allowed: blocked_reasons.is_empty(),
            blocked_reasons,
            warnings,
        }
    }

    /// Run a shell command
    pub async fn execute_shell(&self, command: &str, timeout_secs: u64) -> Result<SandboxResult> {
        self.execute_shell_with_args(command, &[], timeout_secs).await
    }

    /// Run a shell command with arguments bound as environment variables.
    ///
    /// Argument values never become part of the command text; the command
    /// refers to them as `"$name"`.
    pub async fn execute_shell_with_args(
        &self,
        command: &str,
        args: &[(String, String)],
        timeout_secs: u64,
    ) -> Result<SandboxResult> {
        let mut check = self.check_command(command);
        if self.config.enabled {
            for (name, value) in args {
                if value.contains("../") || value.contains("/..") {
                    check.blocked_reasons.push(format!("Path traversal detected in argument '{}'", name));
                }
            }
        }
        if !check.blocked_reasons.is_empty() {
            debug!("Refused shell command: {}", check.blocked_reasons.join("; "));
            return Ok(SandboxResult::refused(check.blocked_reasons, check.warnings));
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        self.run(cmd, args, None, timeout_secs, check.warnings).await
    }

    /// Run an embedded script, feeding `stdin` to the interpreter
    pub async fn execute_script(
        &self,
        language: ScriptLanguage,
        script: &str,
        stdin: &str,
        timeout_secs: u64,
    ) -> Result<SandboxResult> {
        let mut cmd = match language {
            ScriptLanguage::Python => {
                let mut cmd = Command::new("python3");
                cmd.arg("-c").arg(script);
                cmd
            }
            ScriptLanguage::JavaScript => {
                let mut cmd = Command::new("node");
                cmd.arg("-e").arg(script);
                cmd
            }
            ScriptLanguage::Shell => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(script);
                cmd
            }
        };
        cmd.kill_on_drop(true);
        self.run(cmd, &[], Some(stdin), timeout_secs, Vec::new()).await
    }

    async fn run(
        &self,
        mut cmd: Command,
        env: &[(String, String)],
        stdin: Option<&str>,
        timeout_secs: u64,
        warnings: Vec<String>,
    ) -> Result<SandboxResult> {
        let start = std::time::Instant::now();
        let timeout_secs = timeout_secs.min(self.config.timeout_secs).max(1);

        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });

        if self.config.enabled {
            cmd.env_clear();
            for var in &self.config.allowed_env_vars {
                if let Ok(value) = std::env::var(var) {
                    cmd.env(var, value);
                }
            }
        }
        cmd.envs(env.iter().map(|(k, v)| (k, v)));
        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().context("Failed to spawn sandboxed process")?;

        let input = child.stdin.take();
        let stdout = child.stdout.take().context("stdout not captured")?;
        let stderr = child.stderr.take().context("stderr not captured")?;
        let max_size = self.config.max_output_bytes;

        let result = tokio::time::timeout(Duration::from_secs(timeout_secs), async {
            let (_, (stdout_buf, truncated), (stderr_buf, _)) = tokio::join!(
                write_input(input, stdin),
                read_capped(stdout, max_size),
                read_capped(stderr, max_size / 4)
            );
            let status = child.wait().await?;
            Ok::<_, anyhow::Error>((stdout_buf, stderr_buf, status, truncated))
        })
        .await;

        match result {
            Ok(Ok((stdout_buf, stderr_buf, status, truncated))) => Ok(SandboxResult {
                exit_code: status.code(),
                stdout: String::from_utf8_lossy(&stdout_buf).to_string(),
                stderr: String::from_utf8_lossy(&stderr_buf).to_string(),
                success: status.success(),
                truncated,
                timed_out: false,
                blocked: false,
                duration_ms: start.elapsed().as_millis() as u64,
                warnings,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let _ = child.kill().await;
                warn!("Sandboxed process timed out after {}s", timeout_secs);

                Ok(SandboxResult {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("Execution timed out after {} seconds", timeout_secs),
                    success: false,
                    truncated: false,
                    timed_out: true,
                    blocked: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                    warnings,
                })
            }
        }
    }
}

impl Default for SkillSandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

/// Feed `input` to the child and close its stdin
async fn write_input(pipe: Option<ChildStdin>, input: Option<&str>) {
    if let (Some(mut pipe), Some(input)) = (pipe, input) {
        // A script that never reads stdin closes the pipe early; that is fine.
        let _ = pipe.write_all(input.as_bytes()).await;
    }
}

/// Read up to `max` bytes, then drain the rest so the child never blocks on a full pipe
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, max: usize) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if buf.len() + n <= max {
                    buf.extend_from_slice(&chunk[..n]);
                } else {
                    let room = max.saturating_sub(buf.len());
                    buf.extend_from_slice(&chunk[..room]);
                    truncated = true;
                }
            }
        }
    }
    (buf, truncated)
}
