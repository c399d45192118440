//! Skill Validation Gate
//!
//! Admits operator-dropped skill files into the agent's live tool registry.
//! Nothing reaches the registry without passing validation, and a bad skill
//! is quarantined instead of taking the host down.
//!
//! # Architecture
//!
//! ```text
//! skills dir ──► Registry ──► Scanner ──► Loader ──► Schema ──► Verifier
//!     ▲              │       (syntax,    (exports)  (structure) (dummy-arg
//!     │              │        patterns)                          probes)
//!  Watcher           ▼
//!  (polling)   RegistrySnapshot ──► agent: tool_definitions() / handler()
//! ```
//!
//! # Skill Format
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
//!
//! # Security
//!
//! There is no OS-level isolation. Skills get:
//! - Static scanning for eval/exec, `shell=True` and `os.system`-style calls
//! - Schema and alignment checks before any code runs
//! - One probe per handler under a wall-clock timeout
//! - Shell and script handlers run through the process sandbox (command
//!   blocklist, environment sanitization, output caps)

pub mod display;
pub mod js;
pub mod loader;
pub mod module;
pub mod registry;
pub mod report;
pub mod sandbox;
pub mod scanner;
pub mod schema;
pub mod types;
pub mod validator;
pub mod verifier;
pub mod watcher;

pub use display::{ReportSink, TracingSink};
pub use js::JsValidator;
pub use loader::FileSkillLoader;
pub use module::{HandlerEntry, HandlerExport, ModuleLoader, SkillExports, StaticModuleLoader};
pub use registry::{RegistrySnapshot, ReloadSummary, SkillRegistry, SkillStatus};
pub use report::{codes, Issue, Level, ValidationReport};
pub use sandbox::{SandboxConfig, SandboxResult, SkillSandbox};
pub use scanner::{CodeUnit, SafetyScanner, ScriptLanguage};
pub use schema::{validate_exports, ValidatedTool};
pub use types::{
    Args, ExecutionConfig, ExecutionType, Handler, HandlerError, HandlerErrorKind, ParameterSchema, ParameterSpec,
    ParameterType, ToolDefinition, ToolOutput,
};
pub use validator::{SkillValidator, ValidationOutcome};
pub use verifier::{dummy_args, ExpectedErrorPolicy, ProbeConfig, Verifier};
pub use watcher::SkillWatcher;
