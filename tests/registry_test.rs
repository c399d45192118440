//! Skill Registry Integration Tests
//!
//! End-to-end loading from a skills directory: TOML skills through the file
//! loader, compiled-in skills through the static loader.

use serde_json::{json, Value};
use skillgate::skills::{
    codes, FileSkillLoader, Handler, HandlerError, ProbeConfig, RegistrySnapshot, ReportSink, SkillExports,
    SkillRegistry, SkillStatus, SkillValidator, StaticModuleLoader, ToolOutput,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

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

/// Records which skills were re-validated
#[derive(Clone, Default)]
struct RecordingSink {
    seen: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }
}

impl ReportSink for RecordingSink {
    fn skill_loaded(&self, status: &SkillStatus) {
        self.seen.lock().unwrap().push(status.name.clone());
    }

    fn skill_rejected(&self, status: &SkillStatus) {
        self.seen.lock().unwrap().push(status.name.clone());
    }
}

fn tool(name: &str) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": format!("{} tool", name),
            "parameters": {"type": "object", "properties": {}, "required": []}
        }
    })
}

fn ok_handler(out: &'static str) -> Handler {
    Handler::new(move |_| async move { Ok(ToolOutput::ok(out).into()) })
}

fn static_loader() -> StaticModuleLoader {
    StaticModuleLoader::new("mod")
        .with_module("mixed", || {
            SkillExports::new()
                .with_tools(json!([tool("good_tool"), tool("bad_tool"), tool("other_tool")]))
                .with_handler("good_tool", ok_handler("good"))
                .with_handler(
                    "bad_tool",
                    Handler::new(|_| async { Err(HandlerError::other("ValueError", "generic failure")) }),
                )
                .with_handler("other_tool", ok_handler("other"))
        })
        .with_module("halfdone", || {
            SkillExports::new()
                .with_tools(json!([tool("a"), tool("b")]))
                .with_handler("a", ok_handler("a"))
        })
        .with_module("aaa_ping", || {
            SkillExports::new()
                .with_tools(json!([tool("ping")]))
                .with_handler("ping", ok_handler("from aaa"))
        })
        .with_module("zzz_ping", || {
            SkillExports::new()
                .with_tools(json!([tool("ping")]))
                .with_handler("ping", ok_handler("from zzz"))
        })
        .with_module("sleepy", || {
            SkillExports::new().with_tools(json!([tool("sleepy_tool")])).with_handler(
                "sleepy_tool",
                Handler::new(|_| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(ToolOutput::ok("late").into())
                }),
            )
        })
}

fn create_test_registry(dir: &TempDir, sink: RecordingSink) -> SkillRegistry {
    SkillRegistry::new(dir.path())
        .with_loader(FileSkillLoader::default())
        .with_loader(static_loader())
        .with_validator(SkillValidator::new(ProbeConfig {
            timeout: Duration::from_millis(300),
            ..ProbeConfig::default()
        }))
        .with_sink(sink)
}

fn write(dir: &TempDir, name: &str, contents: &str) {
    std::fs::write(dir.path().join(name), contents).expect("Failed to write skill file");
}

fn bump_mtime(path: &Path) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();
}

#[tokio::test]
async fn test_echo_tool_end_to_end() {
    let dir = TempDir::new().unwrap();
    write(&dir, "echo.toml", ECHO_SKILL);

    let registry = create_test_registry(&dir, RecordingSink::default());
    registry.load().await;

    let report = registry.report("echo").unwrap();
    assert!(report.passed, "{}", report.summary());
    assert_eq!(report.tools_ok, vec!["echo_tool"]);

    let handler = registry.handler("echo_tool").expect("echo_tool registered");
    let mut args = serde_json::Map::new();
    args.insert("text".to_string(), json!("hello world"));
    let out = handler.call(args).await.unwrap();
    assert_eq!(out["ok"], true);
    assert_eq!(out["out"], "hello world");

    let wire = registry.snapshot().function_definitions();
    assert_eq!(wire[0]["function"]["name"], "echo_tool");
    assert_eq!(wire[0]["function"]["parameters"]["required"][0], "text");
}

#[tokio::test]
async fn test_crashing_handler_is_excluded() {
    let dir = TempDir::new().unwrap();
    write(&dir, "mixed.mod", "");

    let registry = create_test_registry(&dir, RecordingSink::default());
    registry.load().await;

    let status = registry.status("mixed").unwrap();
    assert!(status.ok);
    assert!(status.report.passed);
    assert_eq!(status.report.tools_bad, vec!["bad_tool"]);
    assert_eq!(status.report.tools_ok, vec!["good_tool", "other_tool"]);
    assert!(status.report.has_issue(codes::HANDLER_CRASH));

    assert!(registry.handler("bad_tool").is_none());
    assert!(registry.handler("good_tool").is_some());
    assert!(registry.handler("other_tool").is_some());
}

#[tokio::test]
async fn test_missing_handler_rejects_skill() {
    let dir = TempDir::new().unwrap();
    write(&dir, "halfdone.mod", "");

    let registry = create_test_registry(&dir, RecordingSink::default());
    registry.load().await;

    let status = registry.status("halfdone").unwrap();
    assert!(!status.ok);
    assert!(!status.report.passed);
    assert!(status.report.has_issue(codes::MISSING_HANDLER));
    assert!(status.tools.is_empty());
    assert!(registry.handler("a").is_none());
    assert_eq!(registry.failed_skills(), vec!["halfdone"]);
}

#[tokio::test]
async fn test_unchanged_reload_reuses_status() {
    let dir = TempDir::new().unwrap();
    write(&dir, "echo.toml", ECHO_SKILL);
    write(&dir, "mixed.mod", "");

    let sink = RecordingSink::default();
    let registry = create_test_registry(&dir, sink.clone());

    registry.load().await;
    assert_eq!(sink.take(), vec!["echo", "mixed"]);
    let echo = registry.status("echo").unwrap();
    let mixed = registry.status("mixed").unwrap();

    registry.load().await;
    assert!(sink.take().is_empty());
    assert!(Arc::ptr_eq(&echo, &registry.status("echo").unwrap()));
    assert!(Arc::ptr_eq(&mixed, &registry.status("mixed").unwrap()));
    assert!(registry
        .handler("echo_tool")
        .unwrap()
        .ptr_eq(&echo.handlers["echo_tool"]));
}

#[tokio::test]
async fn test_touching_one_file_revalidates_only_it() {
    let dir = TempDir::new().unwrap();
    write(&dir, "echo.toml", ECHO_SKILL);
    write(&dir, "mixed.mod", "");

    let sink = RecordingSink::default();
    let registry = create_test_registry(&dir, sink.clone());
    registry.load().await;
    sink.take();

    let echo = registry.status("echo").unwrap();
    let mixed = registry.status("mixed").unwrap();

    bump_mtime(&dir.path().join("mixed.mod"));
    assert_ne!(registry.discover().unwrap(), registry.tracked_files());
    registry.load().await;

    assert_eq!(sink.take(), vec!["mixed"]);
    assert!(Arc::ptr_eq(&echo, &registry.status("echo").unwrap()));
    assert!(!Arc::ptr_eq(&mixed, &registry.status("mixed").unwrap()));
    assert_eq!(registry.discover().unwrap(), registry.tracked_files());
}

#[tokio::test]
async fn test_slow_handler_admitted_with_timeout_warning() {
    let dir = TempDir::new().unwrap();
    write(&dir, "sleepy.mod", "");

    let registry = create_test_registry(&dir, RecordingSink::default());
    registry.load().await;

    let report = registry.report("sleepy").unwrap();
    assert!(report.passed);
    assert_eq!(report.tools_ok, vec!["sleepy_tool"]);
    assert!(report.has_issue(codes::HANDLER_TIMEOUT));
    assert!(registry.handler("sleepy_tool").is_some());
}

#[tokio::test]
async fn test_tool_collision_first_file_wins() {
    let dir = TempDir::new().unwrap();
    write(&dir, "zzz_ping.mod", "");
    write(&dir, "aaa_ping.mod", "");

    let registry = create_test_registry(&dir, RecordingSink::default());
    registry.load().await;

    let names: Vec<String> = registry.tool_definitions().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["ping"]);

    let out = registry.handler("ping").unwrap().call(serde_json::Map::new()).await.unwrap();
    assert_eq!(out["out"], "from aaa");

    for name in ["aaa_ping", "zzz_ping"] {
        let report = registry.report(name).unwrap();
        assert!(report.passed);
        assert_eq!(report.errors().count(), 0);
    }
}

#[tokio::test]
async fn test_rejected_toml_skills() {
    let dir = TempDir::new().unwrap();
    write(&dir, "garbled.toml", "[[tools]\nname = ");
    write(
        &dir,
        "nohandler.toml",
        r#"
[[tools]]
type = "function"
[tools.function]
name = "lonely"
description = "No handler"
parameters = { type = "object" }
"#,
    );
    write(
        &dir,
        "badcfg.toml",
        r#"
[[tools]]
type = "function"
[tools.function]
name = "broken"
description = "Handler without a command"
parameters = { type = "object" }

[handlers.broken]
type = "shell"
"#,
    );

    let registry = create_test_registry(&dir, RecordingSink::default());
    let snapshot = registry.load().await;

    assert!(snapshot.tools().is_empty());
    assert!(registry.report("garbled").unwrap().has_issue(codes::SYNTAX_ERROR));
    assert!(registry
        .report("nohandler")
        .unwrap()
        .has_issue(codes::MISSING_SKILL_HANDLERS));
    assert!(registry.report("badcfg").unwrap().has_issue(codes::NOT_CALLABLE));
    assert_eq!(registry.reload_summary().failed, 3);
}

#[tokio::test]
async fn test_unsafe_shell_pattern_warns() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "evaluator.toml",
        r#"
[[tools]]
type = "function"
[tools.function]
name = "evaluator"
description = "Runs an expression"
[tools.function.parameters]
type = "object"
[tools.function.parameters.properties.code]
type = "string"
description = "Expression"

[handlers.evaluator]
type = "script"
language = "sh"
script = "read input; eval echo ok"
"#,
    );

    let registry = create_test_registry(&dir, RecordingSink::default());
    registry.load().await;

    let report = registry.report("evaluator").unwrap();
    assert!(report.passed, "{}", report.summary());
    assert!(report.has_issue(codes::UNSAFE_EVAL));
}

#[tokio::test]
async fn test_validate_js_file_does_not_install() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "page.js",
        "const S = {\n    name: 'page',\n    commands: {\n        title: {\n            handler: async () => { return { ok: true, text: document.title }; }\n        }\n    }\n};\nAgentSkills.register(S);\n",
    );

    let registry = create_test_registry(&dir, RecordingSink::default());
    registry.load().await;

    let report = registry.validate_js_file(&dir.path().join("page.js"));
    assert_eq!(report.skill_name, "page [JS]");
    assert!(report.passed, "{}", report.summary());
    assert_eq!(report.tools_ok, vec!["title"]);
    assert!(registry.status("page").is_none());
}

/// Every listed tool has a handler, and it is the one owned by the first skill declaring it
fn assert_snapshot_consistent(snapshot: &RegistrySnapshot) {
    for tool in snapshot.tools() {
        let handler = snapshot
            .handler(&tool.name)
            .unwrap_or_else(|| panic!("tool '{}' listed without a handler", tool.name));
        let owner = snapshot
            .statuses()
            .iter()
            .find(|s| s.tools.iter().any(|t| t.name == tool.name))
            .unwrap_or_else(|| panic!("tool '{}' has no owning skill", tool.name));
        assert!(handler.ptr_eq(&owner.handlers[&tool.name]));
    }
    for status in snapshot.statuses().iter().filter(|s| s.ok) {
        for tool in &status.tools {
            assert!(snapshot.handler(&tool.name).is_some(), "tool '{}' missing", tool.name);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reload_and_load_are_serialized() {
    let dir = TempDir::new().unwrap();
    write(&dir, "echo.toml", ECHO_SKILL);
    write(&dir, "mixed.mod", "");
    write(&dir, "aaa_ping.mod", "");

    let sink = RecordingSink::default();
    let registry = Arc::new(create_test_registry(&dir, sink.clone()));
    registry.load().await;
    sink.take();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let registry = Arc::clone(&registry);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut reads = 0u64;
            while !done.load(Ordering::SeqCst) {
                assert_snapshot_consistent(&registry.snapshot());
                reads += 1;
                tokio::task::yield_now().await;
            }
            reads
        })
    };

    let (reloaded, loaded) = tokio::join!(registry.reload(), registry.load());
    done.store(true, Ordering::SeqCst);
    let reads = reader.await.unwrap();

    assert!(reads > 0);
    assert_snapshot_consistent(&reloaded);
    assert_snapshot_consistent(&loaded);

    let mut revalidated = sink.take();
    revalidated.sort();
    assert_eq!(revalidated, vec!["aaa_ping", "echo", "mixed"]);

    let current = registry.snapshot();
    assert!(Arc::ptr_eq(&current, &reloaded) || Arc::ptr_eq(&current, &loaded));
    assert_eq!(current.tools().len(), 4);
}
