//! Dynamic verification of skill handlers
//!
//! Each handler is called once with synthesized arguments on a dedicated
//! thread under a wall-clock timeout. The outcome decides whether the tool is
//! admitted. A handler still running at the deadline is abandoned, not killed.

use super::report::{codes, ValidationReport};
use super::schema::ValidatedTool;
use super::types::{panic_message, Args, Handler, HandlerError, HandlerErrorKind, ParameterSchema, ParameterType};
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde_json::Value;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Default wall-clock budget for one probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

const PROBE_PATH: &str = "/tmp/skillgate_probe.txt";

fn dummy_string(name: &str) -> String {
    let value = match name {
        "path" => PROBE_PATH,
        "url" => "https://example.com",
        "query" => "test query",
        "name" => "test_name",
        "text" => "hello world",
        "message" => "test message",
        "command" => "echo test",
        "host" => "localhost",
        "domain" => "example.com",
        "code" => "console.log('test')",
        "content" => "test content",
        "title" => "test title",
        _ => return format!("test_{}", name),
    };
    value.to_string()
}

fn dummy_int(name: &str) -> Option<i64> {
    let value = match name {
        "level" => 50,
        "count" => 3,
        "port" => 8080,
        "seconds" => 5,
        "limit" => 5,
        "n" => 3,
        "lines" => 10,
        "timeout" => 5,
        _ => return None,
    };
    Some(value)
}

/// Harmless arguments for every declared parameter
pub fn dummy_args(schema: &ParameterSchema) -> Args {
    schema
        .properties
        .iter()
        .map(|(name, spec)| {
            let value = match spec.param_type {
                ParameterType::String => Value::from(dummy_string(name)),
                ParameterType::Integer => Value::from(dummy_int(name).unwrap_or(1)),
                ParameterType::Number => Value::from(dummy_int(name).map_or(1.0, |n| n as f64)),
                ParameterType::Boolean => Value::Bool(false),
                ParameterType::Array => Value::Array(Vec::new()),
                ParameterType::Object => Value::Object(Args::new()),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Error kinds that count as expected when a handler sees dummy arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedErrorPolicy {
    kinds: HashSet<HandlerErrorKind>,
}

impl ExpectedErrorPolicy {
    pub fn from_kinds(kinds: impl IntoIterator<Item = HandlerErrorKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Parse a comma-separated kind list, e.g. `not_found,timed_out`
    pub fn parse(list: &str) -> Result<Self, String> {
        let kinds = list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<Result<HashSet<HandlerErrorKind>, _>>()?;
        Ok(Self { kinds })
    }

    pub fn contains(&self, kind: &HandlerErrorKind) -> bool {
        self.kinds.contains(kind)
    }
}

impl Default for ExpectedErrorPolicy {
    fn default() -> Self {
        Self::from_kinds([
            HandlerErrorKind::NotFound,
            HandlerErrorKind::PermissionDenied,
            HandlerErrorKind::IsADirectory,
            HandlerErrorKind::NotADirectory,
            HandlerErrorKind::ConnectionRefused,
            HandlerErrorKind::Connection,
            HandlerErrorKind::TimedOut,
            HandlerErrorKind::Os,
        ])
    }
}

/// Probe settings
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub expected: ExpectedErrorPolicy,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
            expected: ExpectedErrorPolicy::default(),
        }
    }
}

/// Result of a single probe
#[derive(Debug)]
pub enum ProbeOutcome {
    TimedOut,
    Failed(HandlerError),
    Returned(Value),
}

/// Calls handlers with dummy arguments and classifies the outcomes
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    config: ProbeConfig,
}

impl Verifier {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Invoke `handler` once on its own OS thread under the probe timeout.
    ///
    /// The thread drives the call through the current runtime handle, so a
    /// handler that blocks its thread cannot starve the timer. A thread still
    /// running at the deadline is detached.
    pub async fn probe(&self, handler: &Handler, args: Args) -> ProbeOutcome {
        let handler = handler.clone();
        let runtime = tokio::runtime::Handle::current();
        let (tx, rx) = oneshot::channel();

        let spawned = std::thread::Builder::new()
            .name("skill-probe".to_string())
            .spawn(move || {
                let call = AssertUnwindSafe(async move { handler.call(args).await }).catch_unwind();
                let result = match runtime.block_on(call) {
                    Ok(result) => result,
                    Err(payload) => Err(HandlerError::new(
                        HandlerErrorKind::Panicked,
                        panic_message(payload.as_ref()),
                    )),
                };
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            return ProbeOutcome::Failed(e.into());
        }

        match tokio::time::timeout(self.config.timeout, rx).await {
            Err(_) => ProbeOutcome::TimedOut,
            Ok(Err(_)) => ProbeOutcome::Failed(HandlerError::other(
                "Cancelled",
                "probe thread exited without a result",
            )),
            Ok(Ok(Err(err))) => ProbeOutcome::Failed(err),
            Ok(Ok(Ok(value))) => ProbeOutcome::Returned(value),
        }
    }

    /// Probe every tool concurrently and record the outcomes in declared order.
    ///
    /// Tools not rejected by a probe end up in `tools_ok`.
    pub async fn verify(&self, tools: &[ValidatedTool], report: &mut ValidationReport) {
        let probes = tools
            .iter()
            .map(|tool| self.probe(&tool.handler, dummy_args(&tool.definition.parameters)));
        let outcomes = join_all(probes).await;

        for (tool, outcome) in tools.iter().zip(outcomes) {
            debug!("Probe of '{}': {:?}", tool.name(), outcome);
            self.classify(tool.name(), outcome, report);
        }

        for tool in tools {
            report.mark_ok(tool.name());
        }
    }

    fn classify(&self, name: &str, outcome: ProbeOutcome, report: &mut ValidationReport) {
        match outcome {
            ProbeOutcome::TimedOut => report.warn(
                codes::HANDLER_TIMEOUT,
                format!(
                    "Handler took more than {}ms with dummy args and may block the agent",
                    self.config.timeout.as_millis()
                ),
                Some(name),
            ),
            ProbeOutcome::Failed(err) if self.config.expected.contains(&err.kind) => report.info(
                codes::HANDLER_EXPECTED_ERROR,
                format!("Handler raised {} with dummy args (expected)", err.kind),
                Some(name),
            ),
            ProbeOutcome::Failed(err) => report.tool_error(
                codes::HANDLER_CRASH,
                format!("Handler crashed with dummy args: {}", err),
                name,
            ),
            ProbeOutcome::Returned(Value::Null) => report.warn(
                codes::RETURNS_NONE,
                "Handler returned null, expected an object with ok and out",
                Some(name),
            ),
            ProbeOutcome::Returned(value) => {
                let object = value.as_object();
                if !object.is_some_and(|o| o.contains_key("ok")) {
                    report.warn(
                        codes::MISSING_OK_FIELD,
                        "Return value has no ok field, the agent can't tell if it succeeded",
                        Some(name),
                    );
                }
                if !object.is_some_and(|o| o.contains_key("out")) {
                    report.warn(
                        codes::MISSING_OUT_FIELD,
                        "Return value has no out field, the agent has nothing to show",
                        Some(name),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::types::{ParameterSpec, ToolDefinition, ToolOutput};
    use serde_json::json;

    fn tool(name: &str, handler: Handler) -> ValidatedTool {
        ValidatedTool {
            definition: ToolDefinition {
                name: name.to_string(),
                description: String::new(),
                parameters: ParameterSchema::default(),
            },
            handler,
        }
    }

    fn fast_verifier() -> Verifier {
        Verifier::new(ProbeConfig {
            timeout: Duration::from_millis(200),
            ..ProbeConfig::default()
        })
    }

    #[test]
    fn test_dummy_args() {
        let mut schema = ParameterSchema::default();
        for (name, t) in [
            ("path", ParameterType::String),
            ("city", ParameterType::String),
            ("port", ParameterType::Integer),
            ("other", ParameterType::Integer),
            ("limit", ParameterType::Number),
            ("ratio", ParameterType::Number),
            ("force", ParameterType::Boolean),
            ("items", ParameterType::Array),
            ("opts", ParameterType::Object),
        ] {
            schema.properties.insert(name.to_string(), ParameterSpec::new(t, ""));
        }

        let args = dummy_args(&schema);
        assert_eq!(args["path"], PROBE_PATH);
        assert_eq!(args["city"], "test_city");
        assert_eq!(args["port"], 8080);
        assert_eq!(args["other"], 1);
        assert_eq!(args["limit"], 5.0);
        assert_eq!(args["ratio"], 1.0);
        assert_eq!(args["force"], false);
        assert_eq!(args["items"], json!([]));
        assert_eq!(args["opts"], json!({}));
    }

    #[test]
    fn test_expected_policy_parse() {
        let policy = ExpectedErrorPolicy::parse("not_found, TimedOut").unwrap();
        assert!(policy.contains(&HandlerErrorKind::NotFound));
        assert!(policy.contains(&HandlerErrorKind::TimedOut));
        assert!(!policy.contains(&HandlerErrorKind::Os));
        assert!(ExpectedErrorPolicy::parse("not_found,bogus").is_err());
        assert!(ExpectedErrorPolicy::default().contains(&HandlerErrorKind::Os));
    }

    #[tokio::test]
    async fn test_partial_admission() {
        let tools = vec![
            tool("good", Handler::new(|_| async { Ok(ToolOutput::ok("fine").into()) })),
            tool(
                "bad_tool",
                Handler::new(|_| async { Err(HandlerError::other("ValueError", "boom")) }),
            ),
            tool("panicky", Handler::blocking(|_| panic!("kaboom"))),
        ];

        let mut report = ValidationReport::new("mixed");
        fast_verifier().verify(&tools, &mut report).await;

        assert!(report.passed);
        assert_eq!(report.tools_ok, vec!["good"]);
        assert_eq!(report.tools_bad, vec!["bad_tool", "panicky"]);
        assert_eq!(report.errors().filter(|i| i.code == codes::HANDLER_CRASH).count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_admitted_with_warning() {
        let tools = vec![tool(
            "slow",
            Handler::new(|_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(ToolOutput::ok("late").into())
            }),
        )];

        let mut report = ValidationReport::new("slow");
        fast_verifier().verify(&tools, &mut report).await;

        assert!(report.passed);
        assert_eq!(report.tools_ok, vec!["slow"]);
        assert!(report.has_issue(codes::HANDLER_TIMEOUT));
    }

    #[tokio::test]
    async fn test_thread_blocking_handler_times_out() {
        let tools = vec![tool(
            "stuck",
            Handler::new(|_| async {
                std::thread::sleep(Duration::from_secs(3));
                Ok(ToolOutput::ok("late").into())
            }),
        )];

        let mut report = ValidationReport::new("stuck");
        let started = std::time::Instant::now();
        fast_verifier().verify(&tools, &mut report).await;

        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
        assert!(report.has_issue(codes::HANDLER_TIMEOUT));
        assert_eq!(report.tools_ok, vec!["stuck"]);
    }

    #[tokio::test]
    async fn test_expected_error_is_info() {
        let tools = vec![tool(
            "reader",
            Handler::new(|_| async {
                Err(std::io::Error::from(std::io::ErrorKind::NotFound).into())
            }),
        )];

        let mut report = ValidationReport::new("reader");
        fast_verifier().verify(&tools, &mut report).await;

        assert_eq!(report.tools_ok, vec!["reader"]);
        assert!(report.has_issue(codes::HANDLER_EXPECTED_ERROR));
        assert_eq!(report.errors().count(), 0);
    }

    #[tokio::test]
    async fn test_return_shape_warnings() {
        let tools = vec![
            tool("nothing", Handler::new(|_| async { Ok(Value::Null) })),
            tool("half", Handler::new(|_| async { Ok(json!({"ok": true})) })),
            tool("text", Handler::new(|_| async { Ok(json!("plain")) })),
        ];

        let mut report = ValidationReport::new("shapes");
        fast_verifier().verify(&tools, &mut report).await;

        assert_eq!(report.tools_ok, vec!["nothing", "half", "text"]);
        assert!(report.has_issue(codes::RETURNS_NONE));
        let out_warnings = report
            .warnings()
            .filter(|i| i.code == codes::MISSING_OUT_FIELD)
            .count();
        assert_eq!(out_warnings, 2);
        assert_eq!(
            report.warnings().filter(|i| i.code == codes::MISSING_OK_FIELD).count(),
            1
        );
    }
}
