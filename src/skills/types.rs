//! Skill Type Definitions
//!
//! Core data structures shared by the validator, the loaders and the registry.

use futures_util::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

/// Argument map handed to a handler
pub type Args = Map<String, Value>;

/// Future returned by a handler invocation
pub type HandlerFuture = BoxFuture<'static, Result<Value, HandlerError>>;

/// A validated tool definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, unique within its skill
    pub name: String,
    /// Human-readable description shown to the model
    pub description: String,
    /// Parameter schema
    pub parameters: ParameterSchema,
}

impl ToolDefinition {
    /// Render in the `{type: "function", function: {...}}` wire form
    pub fn to_function_json(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters.to_json_schema(),
            }
        })
    }
}

/// Object-typed JSON schema for tool parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, ParameterSpec>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    /// Convert to JSON Schema
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, spec)| (name.clone(), spec.to_json_schema()))
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

/// Single parameter definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter type
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

impl ParameterSpec {
    pub fn new(param_type: ParameterType, description: &str) -> Self {
        Self {
            param_type,
            description: description.to_string(),
        }
    }

    /// Convert to JSON Schema
    pub fn to_json_schema(&self) -> Value {
        serde_json::json!({
            "type": self.param_type.as_str(),
            "description": self.description,
        })
    }
}

/// Parameter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }
}

/// Executable implementation behind a tool.
///
/// Cloning shares the underlying function; the registry only ever holds clones
/// of the handler owned by the skill that declared it.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<dyn Fn(Args) -> HandlerFuture + Send + Sync>,
}

impl Handler {
    /// Wrap an async function
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |args| Box::pin(f(args))),
        }
    }

    /// Wrap a synchronous function; calls run on the blocking pool
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(Args) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |args| {
            let f = Arc::clone(&f);
            async move {
                tokio::task::spawn_blocking(move || f(args))
                    .await
                    .unwrap_or_else(|e| Err(HandlerError::from_join(e)))
            }
        })
    }

    /// Invoke the handler
    pub fn call(&self, args: Args) -> HandlerFuture {
        (self.inner)(args)
    }

    /// Whether both handles point at the same function
    pub fn ptr_eq(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}

/// Handler table keyed by tool name
pub type HandlerMap = HashMap<String, Handler>;

/// Typed form of the `{ok, out}` handler result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub ok: bool,
    pub out: String,
}

impl ToolOutput {
    pub fn ok(out: impl Into<String>) -> Self {
        Self {
            ok: true,
            out: out.into(),
        }
    }

    pub fn failed(out: impl Into<String>) -> Self {
        Self {
            ok: false,
            out: out.into(),
        }
    }
}

impl From<ToolOutput> for Value {
    fn from(output: ToolOutput) -> Self {
        serde_json::json!({ "ok": output.ok, "out": output.out })
    }
}

/// Failure category of a handler invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerErrorKind {
    NotFound,
    PermissionDenied,
    IsADirectory,
    NotADirectory,
    ConnectionRefused,
    Connection,
    TimedOut,
    Os,
    InvalidInput,
    Panicked,
    /// Anything else, carrying the raising side's error name
    Other(String),
}

impl fmt::Display for HandlerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "NotFound"),
            Self::PermissionDenied => write!(f, "PermissionDenied"),
            Self::IsADirectory => write!(f, "IsADirectory"),
            Self::NotADirectory => write!(f, "NotADirectory"),
            Self::ConnectionRefused => write!(f, "ConnectionRefused"),
            Self::Connection => write!(f, "Connection"),
            Self::TimedOut => write!(f, "TimedOut"),
            Self::Os => write!(f, "Os"),
            Self::InvalidInput => write!(f, "InvalidInput"),
            Self::Panicked => write!(f, "Panicked"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for HandlerErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "notfound" => Ok(Self::NotFound),
            "permissiondenied" => Ok(Self::PermissionDenied),
            "isadirectory" => Ok(Self::IsADirectory),
            "notadirectory" => Ok(Self::NotADirectory),
            "connectionrefused" => Ok(Self::ConnectionRefused),
            "connection" => Ok(Self::Connection),
            "timedout" | "timeout" => Ok(Self::TimedOut),
            "os" => Ok(Self::Os),
            "invalidinput" => Ok(Self::InvalidInput),
            "panicked" => Ok(Self::Panicked),
            "" => Err("empty error kind".to_string()),
            _ => Err(format!("unknown handler error kind '{}'", s.trim())),
        }
    }
}

/// Error raised by a handler invocation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    pub kind: HandlerErrorKind,
    pub message: String,
}

static PY_EXCEPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[\w.]+\.)?(\w+(?:Error|Exception|Interrupt|Exit))\b").unwrap());
static NODE_ERRNO: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(E[A-Z]{3,}(?:_[A-Z]+)?)\b").unwrap());

impl HandlerError {
    pub fn new(kind: HandlerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Generic failure with an explicit error name
    pub fn other(name: &str, message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::Other(name.to_string()), message)
    }

    /// Map a failed `spawn_blocking`/`spawn` join
    pub fn from_join(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            let payload = err.into_panic();
            Self::new(HandlerErrorKind::Panicked, panic_message(payload.as_ref()))
        } else {
            Self::other("Cancelled", err.to_string())
        }
    }

    /// Classify a script's failing exit from its stderr.
    ///
    /// Recognizes Python exception names and Node `E*` error codes, falling back
    /// to common shell messages.
    pub fn from_script_failure(exit_code: Option<i32>, stderr: &str) -> Self {
        let message = stderr.trim().lines().last().unwrap_or("").to_string();
        let message = if message.is_empty() {
            format!("script exited with status {:?}", exit_code)
        } else {
            message
        };

        for line in stderr.lines().rev() {
            if let Some(caps) = PY_EXCEPTION.captures(line.trim()) {
                return Self::new(python_kind(&caps[1]), message);
            }
        }

        if let Some(caps) = NODE_ERRNO.captures(stderr) {
            if let Some(kind) = errno_kind(&caps[1]) {
                return Self::new(kind, message);
            }
        }

        if stderr.contains("No such file or directory") {
            return Self::new(HandlerErrorKind::NotFound, message);
        }
        if stderr.contains("Permission denied") {
            return Self::new(HandlerErrorKind::PermissionDenied, message);
        }

        Self::other("ScriptError", message)
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match err.kind() {
            ErrorKind::NotFound => HandlerErrorKind::NotFound,
            ErrorKind::PermissionDenied => HandlerErrorKind::PermissionDenied,
            ErrorKind::ConnectionRefused => HandlerErrorKind::ConnectionRefused,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrNotAvailable
            | ErrorKind::BrokenPipe => HandlerErrorKind::Connection,
            ErrorKind::TimedOut => HandlerErrorKind::TimedOut,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => HandlerErrorKind::InvalidInput,
            _ => HandlerErrorKind::Os,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<reqwest::Error> for HandlerError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            HandlerErrorKind::TimedOut
        } else if err.is_connect() || err.is_request() {
            HandlerErrorKind::Connection
        } else {
            HandlerErrorKind::Other("HttpError".to_string())
        };
        Self::new(kind, err.to_string())
    }
}

fn python_kind(name: &str) -> HandlerErrorKind {
    match name {
        "FileNotFoundError" => HandlerErrorKind::NotFound,
        "PermissionError" => HandlerErrorKind::PermissionDenied,
        "IsADirectoryError" => HandlerErrorKind::IsADirectory,
        "NotADirectoryError" => HandlerErrorKind::NotADirectory,
        "ConnectionRefusedError" => HandlerErrorKind::ConnectionRefused,
        "ConnectionError" | "ConnectionResetError" | "ConnectionAbortedError"
        | "BrokenPipeError" | "URLError" => HandlerErrorKind::Connection,
        "TimeoutError" => HandlerErrorKind::TimedOut,
        "OSError" | "IOError" => HandlerErrorKind::Os,
        other => HandlerErrorKind::Other(other.to_string()),
    }
}

fn errno_kind(code: &str) -> Option<HandlerErrorKind> {
    let kind = match code {
        "ENOENT" => HandlerErrorKind::NotFound,
        "EACCES" | "EPERM" => HandlerErrorKind::PermissionDenied,
        "EISDIR" => HandlerErrorKind::IsADirectory,
        "ENOTDIR" => HandlerErrorKind::NotADirectory,
        "ECONNREFUSED" => HandlerErrorKind::ConnectionRefused,
        "ECONNRESET" | "EPIPE" | "ENOTFOUND" | "EAI_AGAIN" | "EHOSTUNREACH" => {
            HandlerErrorKind::Connection
        }
        "ETIMEDOUT" => HandlerErrorKind::TimedOut,
        _ => return None,
    };
    Some(kind)
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Execution configuration of a file-declared handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Execution type
    #[serde(rename = "type")]
    pub exec_type: ExecutionType,
    /// HTTP endpoint (for http type)
    pub endpoint: Option<String>,
    /// HTTP method (for http type)
    pub method: Option<String>,
    /// Headers (for http type)
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Shell command template (for shell type)
    pub command: Option<String>,
    /// Script content (for script type)
    pub script: Option<String>,
    /// Script language (for script type)
    pub language: Option<String>,
    /// Timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl ExecutionConfig {
    /// Create shell execution config
    pub fn shell(command: &str) -> Self {
        Self {
            exec_type: ExecutionType::Shell,
            endpoint: None,
            method: None,
            headers: HashMap::new(),
            command: Some(command.to_string()),
            script: None,
            language: None,
            timeout_secs: default_timeout(),
        }
    }

    /// Create script execution config
    pub fn script(language: &str, script: &str) -> Self {
        Self {
            exec_type: ExecutionType::Script,
            language: Some(language.to_string()),
            script: Some(script.to_string()),
            command: None,
            ..Self::shell("")
        }
    }

    /// Check that the fields required by the execution type are present
    pub fn validate(&self) -> Result<(), String> {
        match self.exec_type {
            ExecutionType::Http => {
                if self.endpoint.as_deref().map_or(true, str::is_empty) {
                    return Err("http handler needs an 'endpoint'".to_string());
                }
            }
            ExecutionType::Shell => {
                if self.command.as_deref().map_or(true, str::is_empty) {
                    return Err("shell handler needs a 'command'".to_string());
                }
            }
            ExecutionType::Script => {
                if self.script.as_deref().map_or(true, str::is_empty) {
                    return Err("script handler needs a 'script'".to_string());
                }
                let language = self.language.as_deref().unwrap_or("");
                if super::scanner::ScriptLanguage::from_name(language).is_none() {
                    return Err(format!("unsupported script language '{}'", language));
                }
            }
        }
        Ok(())
    }
}

/// Execution types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    /// HTTP API call
    Http,
    /// Shell command
    Shell,
    /// Embedded script (Python, JS, sh)
    Script,
}
