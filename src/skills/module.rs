//! Module loading abstraction
//!
//! A loader turns one skill file into [`SkillExports`]: the declared tool list
//! and the handler table. Everything downstream only asks "does this unit
//! expose these two artifacts", never how the file was turned into code.

use super::scanner::{CodeUnit, ScriptLanguage, SourceSyntaxError};
use super::types::Handler;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// One entry of a handler table
#[derive(Debug, Clone)]
pub enum HandlerEntry {
    Callable(Handler),
    /// Present but unusable, with the reason
    NotCallable(String),
}

/// The exported handler table, or what was found instead of one
#[derive(Debug, Clone)]
pub enum HandlerExport {
    Table(HashMap<String, HandlerEntry>),
    /// Wrong container type; carries the type name that was found
    Invalid(String),
}

/// What a loaded skill unit exposes
#[derive(Debug, Clone, Default)]
pub struct SkillExports {
    /// Raw tool declarations, validated by the schema stage
    pub tools: Option<Value>,
    pub handlers: Option<HandlerExport>,
}

impl SkillExports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(mut self, tools: Value) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Add a callable handler, creating the table if needed
    pub fn with_handler(mut self, name: &str, handler: Handler) -> Self {
        self.table_mut().insert(name.to_string(), HandlerEntry::Callable(handler));
        self
    }

    pub fn with_entry(mut self, name: &str, entry: HandlerEntry) -> Self {
        self.table_mut().insert(name.to_string(), entry);
        self
    }

    /// An empty handler table, for skills that declare tools only
    pub fn with_empty_handlers(mut self) -> Self {
        self.table_mut();
        self
    }

    fn table_mut(&mut self) -> &mut HashMap<String, HandlerEntry> {
        if !matches!(self.handlers, Some(HandlerExport::Table(_))) {
            self.handlers = Some(HandlerExport::Table(HashMap::new()));
        }
        match self.handlers {
            Some(HandlerExport::Table(ref mut table)) => table,
            _ => unreachable!("handler table initialized above"),
        }
    }
}

/// Turns skill files into exports
pub trait ModuleLoader: Send + Sync {
    /// File extensions (without the dot) this loader handles
    fn extensions(&self) -> &[&str];

    /// Code contained in the file, for the safety scanner.
    ///
    /// Fails when the file itself cannot be parsed.
    fn code_units(&self, source: &str) -> Result<Vec<CodeUnit>, SourceSyntaxError>;

    /// Load the file into exports, or fail with a reason
    fn load(&self, path: &Path, source: &str) -> anyhow::Result<SkillExports>;
}

type ModuleFactory = Arc<dyn Fn() -> SkillExports + Send + Sync>;

/// Loader for skills compiled into the host.
///
/// Files with the loader's extension select a registered module by file stem;
/// the file only drives discovery and change tracking. When a language is set,
/// the file contents are scanned as code of that language.
pub struct StaticModuleLoader {
    extensions: Vec<&'static str>,
    language: Option<ScriptLanguage>,
    modules: HashMap<String, ModuleFactory>,
}

impl StaticModuleLoader {
    pub fn new(extension: &'static str) -> Self {
        Self {
            extensions: vec![extension],
            language: None,
            modules: HashMap::new(),
        }
    }

    /// Scan file contents as `language`
    pub fn with_language(mut self, language: ScriptLanguage) -> Self {
        self.language = Some(language);
        self
    }

    /// Register the module for files named `<name>.<extension>`
    pub fn with_module<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> SkillExports + Send + Sync + 'static,
    {
        self.modules.insert(name.to_string(), Arc::new(factory));
        self
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn extensions(&self) -> &[&str] {
        &self.extensions
    }

    fn code_units(&self, source: &str) -> Result<Vec<CodeUnit>, SourceSyntaxError> {
        Ok(match self.language {
            Some(language) => vec![CodeUnit::new("module", language, source)],
            None => Vec::new(),
        })
    }

    fn load(&self, path: &Path, _source: &str) -> anyhow::Result<SkillExports> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow::anyhow!("invalid skill file name: {}", path.display()))?;

        let factory = self
            .modules
            .get(stem)
            .ok_or_else(|| anyhow::anyhow!("no module registered for '{}'", stem))?;
        Ok(factory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::types::ToolOutput;

    #[test]
    fn test_exports_builder() {
        let exports = SkillExports::new()
            .with_tools(serde_json::json!([]))
            .with_handler("a", Handler::new(|_| async { Ok(ToolOutput::ok("a").into()) }))
            .with_entry("b", HandlerEntry::NotCallable("broken".to_string()));

        match exports.handlers {
            Some(HandlerExport::Table(table)) => assert_eq!(table.len(), 2),
            other => panic!("unexpected handlers: {:?}", other),
        }
    }

    #[test]
    fn test_static_loader_selects_by_stem() {
        let loader = StaticModuleLoader::new("mod")
            .with_module("echo", || SkillExports::new().with_tools(serde_json::json!([])));

        assert!(loader.load(Path::new("/skills/echo.mod"), "").is_ok());
        let err = loader.load(Path::new("/skills/other.mod"), "").unwrap_err();
        assert!(err.to_string().contains("other"));
    }

    #[test]
    fn test_static_loader_code_units() {
        let plain = StaticModuleLoader::new("mod");
        assert!(plain.code_units("anything").unwrap().is_empty());

        let python = StaticModuleLoader::new("py").with_language(ScriptLanguage::Python);
        let units = python.code_units("x = 1").unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].language, ScriptLanguage::Python);
    }
}
