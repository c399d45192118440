//! Skill File Loader
//!
//! Loads skills declared in TOML (or JSON) files. A skill file exports a
//! `tools` array and a `handlers` table; each handler is an execution config
//! that becomes a live [`Handler`]:
//!
//! ```toml
//! [[tools]]
//! type = "function"
//! [tools.function]
//! name = "echo_tool"
//! description = "Echo text back"
//! [tools.function.parameters]
//! type = "object"
//! required = ["text"]
//! [tools.function.parameters.properties.text]
//! type = "string"
//! description = "Text to echo"
//!
//! [handlers.echo_tool]
//! type = "shell"  # or "script", "http"
//! command = "echo {{text}}"
//! ```

use super::module::{HandlerEntry, HandlerExport, ModuleLoader, SkillExports};
use super::sandbox::SkillSandbox;
use super::scanner::{CodeUnit, ScriptLanguage, SourceSyntaxError};
use super::schema::json_type_name;
use super::types::*;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").unwrap());

/// Loader for `*.toml` and `*.json` skill files
#[derive(Clone)]
pub struct FileSkillLoader {
    sandbox: Arc<SkillSandbox>,
    client: reqwest::Client,
}

impl FileSkillLoader {
    pub fn new(sandbox: SkillSandbox) -> Self {
        Self {
            sandbox: Arc::new(sandbox),
            client: reqwest::Client::new(),
        }
    }

    fn build_entry(&self, name: &str, value: &Value) -> HandlerEntry {
        if !value.is_object() {
            return HandlerEntry::NotCallable(format!(
                "handler must be a table, got {}",
                json_type_name(value)
            ));
        }

        let config: ExecutionConfig = match serde_json::from_value(value.clone()) {
            Ok(config) => config,
            Err(e) => return HandlerEntry::NotCallable(format!("invalid handler config: {}", e)),
        };
        if let Err(reason) = config.validate() {
            return HandlerEntry::NotCallable(reason);
        }

        debug!("Built {:?} handler for '{}'", config.exec_type, name);
        HandlerEntry::Callable(match config.exec_type {
            ExecutionType::Shell => self.shell_handler(config),
            ExecutionType::Script => self.script_handler(config),
            ExecutionType::Http => self.http_handler(config),
        })
    }

    fn shell_handler(&self, config: ExecutionConfig) -> Handler {
        let sandbox = Arc::clone(&self.sandbox);
        let template = config.command.unwrap_or_default();
        let names = placeholders(&template);
        let command = bind_placeholders(&template);
        let timeout_secs = config.timeout_secs;

        Handler::new(move |args| {
            let sandbox = Arc::clone(&sandbox);
            let command = command.clone();
            let bound: Vec<(String, String)> = names
                .iter()
                .map(|name| (name.clone(), args.get(name).map(value_text).unwrap_or_default()))
                .collect();
            async move { run_shell(&sandbox, &command, &bound, timeout_secs).await }
        })
    }

    fn script_handler(&self, config: ExecutionConfig) -> Handler {
        let sandbox = Arc::clone(&self.sandbox);
        let script = config.script.unwrap_or_default();
        let language = config
            .language
            .as_deref()
            .and_then(ScriptLanguage::from_name)
            .unwrap_or(ScriptLanguage::Shell);
        let timeout_secs = config.timeout_secs;

        Handler::new(move |args| {
            let sandbox = Arc::clone(&sandbox);
            let script = script.clone();
            async move { run_script(&sandbox, language, &script, args, timeout_secs).await }
        })
    }

    fn http_handler(&self, config: ExecutionConfig) -> Handler {
        let client = self.client.clone();
        let endpoint = config.endpoint.unwrap_or_default();
        let method = config.method.unwrap_or_else(|| "GET".to_string()).to_uppercase();
        let headers = config.headers;
        let timeout = Duration::from_secs(config.timeout_secs);

        Handler::new(move |args| {
            let used = placeholders(&endpoint);
            let request = HttpRequest {
                client: client.clone(),
                method: method.clone(),
                url: render(&endpoint, &args),
                headers: headers.clone(),
                rest: args.into_iter().filter(|(k, _)| !used.contains(k)).collect(),
                timeout,
            };
            async move { request.send().await }
        })
    }
}

impl Default for FileSkillLoader {
    fn default() -> Self {
        Self::new(SkillSandbox::default())
    }
}

impl ModuleLoader for FileSkillLoader {
    fn extensions(&self) -> &[&str] {
        &["toml", "json"]
    }

    fn code_units(&self, source: &str) -> Result<Vec<CodeUnit>, SourceSyntaxError> {
        let document = parse_document(source)?;
        let mut units = Vec::new();

        let Some(Value::Object(handlers)) = document.get("handlers") else {
            return Ok(units);
        };

        for (name, handler) in handlers {
            let origin = format!("handler '{}'", name);
            let kind = handler.get("type").and_then(Value::as_str);

            match kind {
                Some("shell") => {
                    if let Some(command) = handler.get("command").and_then(Value::as_str) {
                        units.push(CodeUnit::new(origin, ScriptLanguage::Shell, bind_placeholders(command)));
                    }
                }
                Some("script") => {
                    let language = handler
                        .get("language")
                        .and_then(Value::as_str)
                        .and_then(ScriptLanguage::from_name);
                    let script = handler.get("script").and_then(Value::as_str);
                    if let (Some(language), Some(script)) = (language, script) {
                        units.push(CodeUnit::new(origin, language, script));
                    }
                }
                _ => {}
            }
        }
        Ok(units)
    }

    fn load(&self, path: &Path, source: &str) -> Result<SkillExports> {
        let document = parse_document(source)
            .map_err(|e| anyhow::anyhow!("{}", e.message))
            .with_context(|| format!("Failed to parse skill file {}", path.display()))?;

        let tools = document.get("tools").cloned();
        let handlers = document.get("handlers").map(|value| match value {
            Value::Object(table) => HandlerExport::Table(
                table
                    .iter()
                    .map(|(name, v)| (name.clone(), self.build_entry(name, v)))
                    .collect::<HashMap<_, _>>(),
            ),
            other => HandlerExport::Invalid(json_type_name(other).to_string()),
        });

        Ok(SkillExports { tools, handlers })
    }
}

/// Parse a skill document. JSON is detected by a leading `{`, anything else is TOML.
fn parse_document(source: &str) -> Result<Value, SourceSyntaxError> {
    if source.trim_start().starts_with('{') {
        return serde_json::from_str(source).map_err(|e| SourceSyntaxError {
            line: Some(e.line()),
            message: e.to_string(),
        });
    }

    let table: toml::Table = toml::from_str(source).map_err(|e| SourceSyntaxError {
        line: e.span().map(|span| source[..span.start].matches('\n').count() + 1),
        message: e.message().to_string(),
    })?;
    serde_json::to_value(table).map_err(|e| SourceSyntaxError {
        line: None,
        message: e.to_string(),
    })
}

async fn run_shell(
    sandbox: &SkillSandbox,
    command: &str,
    args: &[(String, String)],
    timeout_secs: u64,
) -> Result<Value, HandlerError> {
    let result = sandbox
        .execute_shell_with_args(command, args, timeout_secs)
        .await
        .map_err(from_anyhow)?;
    let out = if result.stdout.trim().is_empty() {
        result.stderr
    } else {
        result.stdout
    };
    Ok(serde_json::json!({
        "ok": result.success,
        "out": out.trim_end(),
        "exit_code": result.exit_code,
    }))
}

/// Run a script with the arguments as JSON on stdin; stdout is parsed as JSON when possible
async fn run_script(
    sandbox: &SkillSandbox,
    language: ScriptLanguage,
    script: &str,
    args: Args,
    timeout_secs: u64,
) -> Result<Value, HandlerError> {
    let input = Value::Object(args).to_string();
    let result = sandbox
        .execute_script(language, script, &input, timeout_secs)
        .await
        .map_err(from_anyhow)?;

    if result.timed_out {
        return Err(HandlerError::new(HandlerErrorKind::TimedOut, result.stderr));
    }
    if !result.success {
        return Err(HandlerError::from_script_failure(result.exit_code, &result.stderr));
    }

    let stdout = result.stdout.trim();
    if stdout.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(stdout).unwrap_or_else(|_| Value::String(stdout.to_string())))
}

struct HttpRequest {
    client: reqwest::Client,
    method: String,
    url: String,
    headers: HashMap<String, String>,
    /// Arguments not consumed by the endpoint template
    rest: Map<String, Value>,
    timeout: Duration,
}

impl HttpRequest {
    async fn send(self) -> Result<Value, HandlerError> {
        let method = reqwest::Method::from_bytes(self.method.as_bytes())
            .map_err(|e| HandlerError::new(HandlerErrorKind::InvalidInput, e.to_string()))?;
        let is_get = method == reqwest::Method::GET;

        let mut request = self.client.request(method, &self.url).timeout(self.timeout);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        request = if is_get {
            let query: Vec<(String, String)> = self
                .rest
                .iter()
                .map(|(k, v)| (k.clone(), value_text(v)))
                .collect();
            request.query(&query)
        } else {
            request.json(&self.rest)
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(serde_json::json!({
            "ok": status.is_success(),
            "out": body,
            "status": status.as_u16(),
        }))
    }
}

fn from_anyhow(err: anyhow::Error) -> HandlerError {
    match err.downcast_ref::<std::io::Error>() {
        Some(io) => HandlerError::from(std::io::Error::new(io.kind(), format!("{:#}", err))),
        None => HandlerError::new(HandlerErrorKind::Os, format!("{:#}", err)),
    }
}

fn placeholders(template: &str) -> HashSet<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Substitute `{{name}}` placeholders; unknown names render as empty values
fn render(template: &str, args: &Map<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            args.get(&caps[1]).map(value_text).unwrap_or_default()
        })
        .into_owned()
}

/// Rewrite `{{name}}` as a quoted `"$name"` expansion of the bound argument
fn bind_placeholders(command: &str) -> String {
    PLACEHOLDER
        .replace_all(command, |caps: &Captures| format!("\"${}\"", &caps[1]))
        .into_owned()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::sandbox::SandboxConfig;

    const ECHO_SKILL: &str = r#"
[[tools]]
type = "function"
[tools.function]
name = "echo_tool"
description = "Echo text back"
[tools.function.parameters]
type = "object"
required = ["text"]
[tools.function.parameters.properties.text]
type = "string"
description = "Text to echo"

[handlers.echo_tool]
type = "shell"
command = "echo {{text}}"
"#;

    fn handler_table(exports: SkillExports) -> HashMap<String, HandlerEntry> {
        match exports.handlers {
            Some(HandlerExport::Table(table)) => table,
            other => panic!("expected handler table, got {:?}", other),
        }
    }

    #[test]
    fn test_load_toml_skill() {
        let loader = FileSkillLoader::default();
        let exports = loader.load(Path::new("echo.toml"), ECHO_SKILL).unwrap();

        let tools = exports.tools.clone().unwrap();
        assert_eq!(tools[0]["function"]["name"], "echo_tool");
        assert!(matches!(handler_table(exports).get("echo_tool"), Some(HandlerEntry::Callable(_))));
    }

    #[test]
    fn test_load_json_skill() {
        let source = r#"{
            "tools": [{"type": "function", "function": {"name": "t", "description": "d", "parameters": {"type": "object"}}}],
            "handlers": {"t": {"type": "script", "language": "python", "script": "print('{}')"}}
        }"#;
        let exports = FileSkillLoader::default().load(Path::new("t.json"), source).unwrap();
        assert!(matches!(handler_table(exports).get("t"), Some(HandlerEntry::Callable(_))));
    }

    #[test]
    fn test_malformed_handler_is_not_callable() {
        let source = "tools = []\n[handlers.a]\ntype = \"shell\"\n[handlers.b]\ntype = \"teleport\"\n";
        let table = handler_table(FileSkillLoader::default().load(Path::new("x.toml"), source).unwrap());
        assert!(matches!(table.get("a"), Some(HandlerEntry::NotCallable(_))));
        assert!(matches!(table.get("b"), Some(HandlerEntry::NotCallable(_))));
    }

    #[test]
    fn test_handlers_wrong_container() {
        let exports = FileSkillLoader::default()
            .load(Path::new("x.toml"), "tools = []\nhandlers = [1, 2]\n")
            .unwrap();
        assert!(matches!(exports.handlers, Some(HandlerExport::Invalid(ref t)) if t == "array"));
    }

    #[test]
    fn test_toml_syntax_error_has_line() {
        let err = FileSkillLoader::default().code_units("tools = [\n\nbroken = \n").unwrap_err();
        assert!(err.line.is_some());
    }

    #[test]
    fn test_code_units_neutralize_placeholders() {
        let units = FileSkillLoader::default().code_units(ECHO_SKILL).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].language, ScriptLanguage::Shell);
        assert_eq!(units[0].code, "echo \"$text\"");
    }

    #[test]
    fn test_render_and_bind() {
        let mut args = Map::new();
        args.insert("city".to_string(), Value::String("Oslo".to_string()));
        assert_eq!(render("https://wttr.in/{{city}}?{{ missing }}", &args), "https://wttr.in/Oslo?");
        assert_eq!(bind_placeholders("grep {{ pattern }} '{{file}}'"), "grep \"$pattern\" '\"$file\"'");
    }

    #[tokio::test]
    async fn test_shell_arguments_cannot_inject_commands() {
        let source = r#"
tools = []
[handlers.bare]
type = "shell"
command = "echo {{text}}"
[handlers.quoted]
type = "shell"
command = "echo '{{text}}'"
"#;
        let table = handler_table(FileSkillLoader::default().load(Path::new("i.toml"), source).unwrap());

        for name in ["bare", "quoted"] {
            let Some(HandlerEntry::Callable(handler)) = table.get(name) else {
                panic!("{} not callable", name);
            };
            let mut args = Map::new();
            args.insert("text".to_string(), Value::String("hi; echo INJECTED".to_string()));
            let out = handler.call(args).await.unwrap();

            assert_eq!(out["ok"], true, "{}", name);
            let text = out["out"].as_str().unwrap();
            assert!(!text.lines().any(|l| l.trim() == "INJECTED"), "{}: {}", name, text);
        }
    }

    #[tokio::test]
    async fn test_shell_handler_runs() {
        let loader = FileSkillLoader::new(SkillSandbox::new(SandboxConfig::default()));
        let table = handler_table(loader.load(Path::new("echo.toml"), ECHO_SKILL).unwrap());
        let Some(HandlerEntry::Callable(handler)) = table.get("echo_tool") else {
            panic!("echo_tool not callable");
        };

        let mut args = Map::new();
        args.insert("text".to_string(), Value::String("hello world".to_string()));
        let out = handler.call(args).await.unwrap();

        assert_eq!(out["ok"], true);
        assert_eq!(out["out"], "hello world");
    }

    #[tokio::test]
    async fn test_sh_script_handler_parses_json() {
        let source = r#"
tools = []
[handlers.s]
type = "script"
language = "sh"
script = "echo '{\"ok\": true, \"out\": \"done\"}'"
"#;
        let table = handler_table(FileSkillLoader::default().load(Path::new("s.toml"), source).unwrap());
        let Some(HandlerEntry::Callable(handler)) = table.get("s") else {
            panic!("s not callable");
        };
        let out = handler.call(Map::new()).await.unwrap();
        assert_eq!(out["out"], "done");
    }
}
