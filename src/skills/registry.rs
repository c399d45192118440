//! Skill Registry
//!
//! Discovers skill files, validates changed ones and publishes the live tool
//! registry as an immutable snapshot. Only tools that pass validation reach
//! the snapshot; rejected skills keep their report for diagnosis.

use super::display::{ReportSink, TracingSink};
use super::js::JsValidator;
use super::module::ModuleLoader;
use super::report::{codes, ValidationReport};
use super::types::{Handler, HandlerMap, ToolDefinition};
use super::validator::SkillValidator;
use crate::error::{GateError, Result};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Tracked skill files: file name → modification time
pub type FileTimes = BTreeMap<String, SystemTime>;

/// Validation state of one skill
#[derive(Debug, Clone)]
pub struct SkillStatus {
    /// Skill name (file stem)
    pub name: String,
    pub path: PathBuf,
    /// Whether the skill passed structural validation
    pub ok: bool,
    /// Admitted tool definitions, in declared order
    pub tools: Vec<ToolDefinition>,
    /// Handlers of the admitted tools
    pub handlers: HandlerMap,
    pub report: ValidationReport,
    pub error: Option<String>,
}

/// Immutable view of the registry after one load pass
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    tools: Vec<ToolDefinition>,
    handlers: HandlerMap,
    statuses: Vec<Arc<SkillStatus>>,
    files: FileTimes,
}

impl RegistrySnapshot {
    /// Merge admitted tools in file order; the first skill to declare a name wins
    fn build(statuses: Vec<Arc<SkillStatus>>, files: FileTimes) -> Self {
        let mut tools = Vec::new();
        let mut handlers = HandlerMap::new();

        for status in statuses.iter().filter(|s| s.ok) {
            for tool in &status.tools {
                let Some(handler) = status.handlers.get(&tool.name) else {
                    continue;
                };
                if handlers.contains_key(&tool.name) {
                    debug!("Tool '{}' from skill '{}' shadowed by an earlier skill", tool.name, status.name);
                    continue;
                }
                handlers.insert(tool.name.clone(), handler.clone());
                tools.push(tool.clone());
            }
        }

        Self {
            tools,
            handlers,
            statuses,
            files,
        }
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn handler(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(name)
    }

    /// Tool list in the `{type: "function", function: {...}}` wire form
    pub fn function_definitions(&self) -> Vec<Value> {
        self.tools.iter().map(ToolDefinition::to_function_json).collect()
    }

    /// Skill statuses in file order
    pub fn statuses(&self) -> &[Arc<SkillStatus>] {
        &self.statuses
    }

    pub fn status(&self, name: &str) -> Option<&Arc<SkillStatus>> {
        self.statuses.iter().find(|s| s.name == name)
    }

    pub fn files(&self) -> &FileTimes {
        &self.files
    }
}

/// Counts after a load pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub loaded: usize,
    pub failed: usize,
    pub tools: usize,
}

impl fmt::Display for ReloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} skills loaded, {} failed, {} tools available",
            self.loaded, self.failed, self.tools
        )
    }
}

#[derive(Default)]
struct LoadState {
    mtimes: FileTimes,
}

struct SkillFile {
    file_name: String,
    path: PathBuf,
    mtime: SystemTime,
}

/// Live registry of validated skills
pub struct SkillRegistry {
    dir: PathBuf,
    loaders: Vec<Arc<dyn ModuleLoader>>,
    validator: SkillValidator,
    js: JsValidator,
    sink: Arc<dyn ReportSink>,
    state: Mutex<LoadState>,
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl SkillRegistry {
    /// Empty registry over `dir`. Register at least one loader before loading.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaders: Vec::new(),
            validator: SkillValidator::default(),
            js: JsValidator::default(),
            sink: Arc::new(TracingSink),
            state: Mutex::new(LoadState::default()),
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
        }
    }

    pub fn with_loader(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loaders.push(Arc::new(loader));
        self
    }

    pub fn with_validator(mut self, validator: SkillValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_js_validator(mut self, js: JsValidator) -> Self {
        self.js = js;
        self
    }

    pub fn with_sink(mut self, sink: impl ReportSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn loader_for(&self, path: &Path) -> Option<&Arc<dyn ModuleLoader>> {
        let ext = path.extension()?.to_str()?;
        self.loaders.iter().find(|l| l.extensions().contains(&ext))
    }

    fn scan_dir(&self) -> Result<Vec<SkillFile>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('_') || file_name.starts_with('.') {
                continue;
            }

            let path = entry.path();
            if self.loader_for(&path).is_none() {
                continue;
            }

            // Vanished between listing and stat
            let Ok(metadata) = std::fs::metadata(&path) else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            files.push(SkillFile {
                file_name,
                path,
                mtime: metadata.modified()?,
            });
        }

        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(files)
    }

    /// Skill files currently on disk with their modification times
    pub fn discover(&self) -> Result<FileTimes> {
        Ok(self
            .scan_dir()?
            .into_iter()
            .map(|f| (f.file_name, f.mtime))
            .collect())
    }

    /// Files seen by the last load pass
    pub fn tracked_files(&self) -> FileTimes {
        self.snapshot().files.clone()
    }

    /// Validate new and changed skill files and publish a new snapshot.
    ///
    /// Unchanged files keep their previous status. Never fails: a directory
    /// that cannot be listed keeps the current snapshot.
    pub async fn load(&self) -> Arc<RegistrySnapshot> {
        let mut state = self.state.lock().await;
        self.load_locked(&mut state).await
    }

    /// Forget tracked modification times and re-validate every skill
    pub async fn reload(&self) -> Arc<RegistrySnapshot> {
        let mut state = self.state.lock().await;
        state.mtimes.clear();
        self.load_locked(&mut state).await
    }

    async fn load_locked(&self, state: &mut LoadState) -> Arc<RegistrySnapshot> {
        let files = match self.scan_dir() {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot list skills directory {}: {}", self.dir.display(), e);
                return self.snapshot();
            }
        };
        if files.is_empty() && !self.dir.is_dir() {
            warn!("Skills directory {} does not exist", self.dir.display());
        }

        let previous = self.snapshot();
        let mut statuses: Vec<Arc<SkillStatus>> = Vec::with_capacity(files.len());
        let mut validated = 0;

        for file in &files {
            let name = file
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.file_name.clone());

            if let Some(existing) = statuses.iter().find(|s| s.name == name) {
                warn!(
                    "Skipping {}: skill '{}' is already provided by {}",
                    file.file_name,
                    name,
                    existing.path.display()
                );
                continue;
            }

            let unchanged = state.mtimes.get(&file.file_name) == Some(&file.mtime);
            let reusable = previous
                .status(&name)
                .filter(|prev| unchanged && prev.path == file.path);

            let status = match reusable {
                Some(prev) => {
                    debug!("Skill '{}' unchanged, reusing previous validation", name);
                    Arc::clone(prev)
                }
                None => {
                    validated += 1;
                    let status = Arc::new(self.validate(&name, &file.path).await);
                    if status.ok {
                        self.sink.skill_loaded(&status);
                    } else {
                        self.sink.skill_rejected(&status);
                    }
                    status
                }
            };
            statuses.push(status);
        }

        let times: FileTimes = files.into_iter().map(|f| (f.file_name, f.mtime)).collect();
        state.mtimes = times.clone();

        let snapshot = Arc::new(RegistrySnapshot::build(statuses, times));
        *self.current.write() = Arc::clone(&snapshot);

        if validated > 0 {
            info!("Skills: {} ({} re-validated)", summarize(&snapshot), validated);
        } else {
            debug!("Skills unchanged: {}", summarize(&snapshot));
        }
        snapshot
    }

    async fn validate(&self, name: &str, path: &Path) -> SkillStatus {
        let Some(loader) = self.loader_for(path) else {
            let mut report = ValidationReport::new(name);
            let message = format!("No loader registered for {}", path.display());
            report.error(codes::IMPORT_ERROR, message.clone(), None);
            return SkillStatus {
                name: name.to_string(),
                path: path.to_path_buf(),
                ok: false,
                tools: Vec::new(),
                handlers: HashMap::new(),
                report,
                error: Some(message),
            };
        };

        let outcome = self.validator.validate_file(name, path, loader.as_ref()).await;
        let mut tools = Vec::with_capacity(outcome.admitted.len());
        let mut handlers = HashMap::with_capacity(outcome.admitted.len());
        for tool in outcome.admitted {
            handlers.insert(tool.definition.name.clone(), tool.handler);
            tools.push(tool.definition);
        }

        SkillStatus {
            name: name.to_string(),
            path: path.to_path_buf(),
            ok: outcome.report.passed,
            tools,
            handlers,
            report: outcome.report,
            error: outcome.error,
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&*self.current.read())
    }

    pub fn handler(&self, name: &str) -> Option<Handler> {
        self.snapshot().handler(name).cloned()
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.snapshot().tools.clone()
    }

    pub fn loaded_skills(&self) -> Vec<String> {
        self.snapshot()
            .statuses
            .iter()
            .filter(|s| s.ok)
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn failed_skills(&self) -> Vec<String> {
        self.snapshot()
            .statuses
            .iter()
            .filter(|s| !s.ok)
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn status(&self, name: &str) -> Option<Arc<SkillStatus>> {
        self.snapshot().status(name).cloned()
    }

    pub fn report(&self, name: &str) -> Result<ValidationReport> {
        self.status(name)
            .map(|s| s.report.clone())
            .ok_or_else(|| GateError::SkillNotFound(name.to_string()))
    }

    /// Loaded/failed/tool counts of the current snapshot
    pub fn reload_summary(&self) -> ReloadSummary {
        summarize(&self.snapshot())
    }

    /// Per-skill status table
    pub fn summary(&self) -> String {
        let snapshot = self.snapshot();
        if snapshot.statuses.is_empty() {
            return format!("No skills found in {}", self.dir.display());
        }

        let mut statuses: Vec<&Arc<SkillStatus>> = snapshot.statuses.iter().collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));

        let mut lines = vec![format!("Skill Status ({} total):", statuses.len()), String::new()];
        for status in statuses {
            if status.ok {
                let warnings = status.report.warning_count();
                let suffix = if warnings > 0 {
                    format!("  ({} warnings)", warnings)
                } else {
                    String::new()
                };
                lines.push(format!("  OK   {:<28} {} tools{}", status.name, status.tools.len(), suffix));
            } else {
                let error = status.error.as_deref().unwrap_or("unknown");
                lines.push(format!("  FAIL {:<28} {}", status.name, error));
            }
        }

        let totals = summarize(&snapshot);
        lines.push(String::new());
        lines.push(format!("  {} loaded  /  {} failed", totals.loaded, totals.failed));
        lines.join("\n")
    }

    /// Full report of one skill, with remediation hints when it was rejected
    pub fn diagnose(&self, name: &str) -> Result<String> {
        let report = self.report(name)?;
        let mut text = report.summary();

        let hints = report.remediation_hints();
        if !report.passed && !hints.is_empty() {
            text.push_str("\n  How to fix:");
            for hint in hints {
                text.push_str("\n    - ");
                text.push_str(hint);
            }
        }
        Ok(text)
    }

    /// Check a browser-side JS skill without installing it
    pub fn validate_js_file(&self, path: &Path) -> ValidationReport {
        self.js.validate_file(path)
    }
}

fn summarize(snapshot: &RegistrySnapshot) -> ReloadSummary {
    let loaded = snapshot.statuses.iter().filter(|s| s.ok).count();
    ReloadSummary {
        loaded,
        failed: snapshot.statuses.len() - loaded,
        tools: snapshot.tools.len(),
    }
}

impl fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillRegistry")
            .field("dir", &self.dir)
            .field("loaders", &self.loaders.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::module::{SkillExports, StaticModuleLoader};
    use crate::skills::types::ToolOutput;
    use serde_json::json;
    use tempfile::TempDir;

    fn tool_json(name: &str) -> Value {
        json!({
            "type": "function",
            "function": {"name": name, "description": "test", "parameters": {"type": "object"}}
        })
    }

    fn skill(names: &[&str]) -> SkillExports {
        let tools: Vec<Value> = names.iter().map(|n| tool_json(n)).collect();
        names.iter().fold(SkillExports::new().with_tools(Value::Array(tools)), |e, n| {
            e.with_handler(n, Handler::new(|_| async { Ok(ToolOutput::ok("ok").into()) }))
        })
    }

    fn create_test_registry(dir: &TempDir) -> SkillRegistry {
        let loader = StaticModuleLoader::new("mod")
            .with_module("alpha", || skill(&["ping", "alpha_tool"]))
            .with_module("beta", || skill(&["ping", "beta_tool"]))
            .with_module("broken", || SkillExports::new().with_tools(json!([tool_json("x")])));
        SkillRegistry::new(dir.path()).with_loader(loader)
    }

    fn touch(dir: &TempDir, name: &str) {
        std::fs::write(dir.path().join(name), "").unwrap();
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = SkillRegistry::new(dir.path().join("nope")).with_loader(StaticModuleLoader::new("mod"));
        let snapshot = registry.load().await;
        assert!(snapshot.tools().is_empty());
        assert!(registry.summary().starts_with("No skills found"));
    }

    #[tokio::test]
    async fn test_load_merges_and_quarantines() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "alpha.mod");
        touch(&dir, "beta.mod");
        touch(&dir, "broken.mod");
        touch(&dir, "_private.mod");
        touch(&dir, "notes.txt");

        let registry = create_test_registry(&dir);
        registry.load().await;

        let names: Vec<String> = registry.tool_definitions().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["ping", "alpha_tool", "beta_tool"]);
        assert_eq!(registry.loaded_skills(), vec!["alpha", "beta"]);
        assert_eq!(registry.failed_skills(), vec!["broken"]);
        assert_eq!(registry.tracked_files().len(), 3);

        let alpha_ping = registry.status("alpha").unwrap().handlers["ping"].clone();
        assert!(registry.handler("ping").unwrap().ptr_eq(&alpha_ping));
        assert!(registry.handler("x").is_none());

        assert_eq!(
            registry.reload_summary(),
            ReloadSummary {
                loaded: 2,
                failed: 1,
                tools: 3
            }
        );
    }

    #[tokio::test]
    async fn test_report_and_diagnose() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "broken.mod");
        let registry = create_test_registry(&dir);
        registry.load().await;

        assert!(!registry.report("broken").unwrap().passed);
        let text = registry.diagnose("broken").unwrap();
        assert!(text.contains("MISSING_SKILL_HANDLERS"));
        assert!(text.contains("How to fix"));
        assert!(matches!(registry.report("ghost"), Err(GateError::SkillNotFound(_))));

        let summary = registry.summary();
        assert!(summary.contains("FAIL broken"));
        assert!(summary.contains("0 loaded  /  1 failed"));
    }

    #[tokio::test]
    async fn test_same_stem_first_file_wins() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "alpha.mod");
        touch(&dir, "alpha.toml");

        let registry = create_test_registry(&dir).with_loader(StaticModuleLoader::new("toml"));
        registry.load().await;

        let status = registry.status("alpha").unwrap();
        assert!(status.ok);
        assert!(status.path.ends_with("alpha.mod"));
        assert_eq!(registry.snapshot().statuses().len(), 1);
        assert_eq!(registry.discover().unwrap(), registry.tracked_files());
    }

    #[tokio::test]
    async fn test_reload_revalidates_everything() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "alpha.mod");
        let registry = create_test_registry(&dir);

        registry.load().await;
        let first = registry.status("alpha").unwrap();
        registry.load().await;
        assert!(Arc::ptr_eq(&first, &registry.status("alpha").unwrap()));

        registry.reload().await;
        assert!(!Arc::ptr_eq(&first, &registry.status("alpha").unwrap()));
    }
}
