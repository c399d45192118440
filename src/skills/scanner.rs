//! Safety Scanner
//!
//! Parses skill code into tree-sitter syntax trees and flags dangerous call
//! patterns. Findings are advisory (WARNING) since legitimate skills may need
//! them; only an unparseable unit is an error.

use super::report::{codes, ValidationReport};
use tree_sitter::{Language, Node, Parser, Tree};

/// Languages the scanner can parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLanguage {
    Python,
    JavaScript,
    Shell,
}

impl ScriptLanguage {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Self::Python),
            "javascript" | "js" | "node" => Some(Self::JavaScript),
            "sh" | "bash" | "shell" => Some(Self::Shell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Shell => "shell",
        }
    }

    fn grammar(&self) -> Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::Shell => tree_sitter_bash::LANGUAGE.into(),
        }
    }
}

/// A piece of code inside a skill file
#[derive(Debug, Clone)]
pub struct CodeUnit {
    /// Where the code lives, e.g. `handler 'echo_tool'`
    pub origin: String,
    pub language: ScriptLanguage,
    pub code: String,
}

impl CodeUnit {
    pub fn new(origin: impl Into<String>, language: ScriptLanguage, code: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            language,
            code: code.into(),
        }
    }
}

/// Container-level parse failure reported by a module loader
#[derive(Debug, Clone)]
pub struct SourceSyntaxError {
    /// 1-based line, when known
    pub line: Option<usize>,
    pub message: String,
}

/// Stateless scanner; a fresh parser is built per unit
#[derive(Debug, Clone, Default)]
pub struct SafetyScanner;

impl SafetyScanner {
    pub fn new() -> Self {
        Self
    }

    /// Record a container-level syntax error
    pub fn syntax_error(&self, err: &SourceSyntaxError, report: &mut ValidationReport) {
        let message = match err.line {
            Some(line) => format!("Line {}: {}", line, err.message),
            None => err.message.clone(),
        };
        report.error(codes::SYNTAX_ERROR, message, None);
    }

    /// Parse and scan every unit.
    ///
    /// Returns false after recording `SYNTAX_ERROR` if any unit fails to parse;
    /// the caller must stop processing the skill.
    pub fn scan(&self, units: &[CodeUnit], report: &mut ValidationReport) -> bool {
        let mut parsed = Vec::with_capacity(units.len());

        for unit in units {
            match parse(unit) {
                Ok(tree) => parsed.push((unit, tree)),
                Err(message) => {
                    report.error(codes::SYNTAX_ERROR, message, None);
                    return false;
                }
            }
        }

        for (unit, tree) in &parsed {
            for finding in find_dangerous_calls(unit, tree) {
                report.warn(finding.code, finding.message, None);
            }
        }
        true
    }
}

struct Finding {
    code: &'static str,
    message: String,
}

fn parse(unit: &CodeUnit) -> Result<Tree, String> {
    let mut parser = Parser::new();
    parser
        .set_language(&unit.language.grammar())
        .map_err(|e| format!("Failed to load {} grammar: {}", unit.language.as_str(), e))?;

    let tree = parser
        .parse(&unit.code, None)
        .ok_or_else(|| format!("Failed to parse {} in {}", unit.language.as_str(), unit.origin))?;

    if tree.root_node().has_error() {
        let line = first_error_line(tree.root_node()).unwrap_or(1);
        return Err(format!(
            "Invalid {} syntax in {} at line {}",
            unit.language.as_str(),
            unit.origin,
            line
        ));
    }
    Ok(tree)
}

fn first_error_line(root: Node) -> Option<usize> {
    preorder(root)
        .into_iter()
        .find(|n| n.is_error() || n.is_missing())
        .map(|n| n.start_position().row + 1)
}

fn preorder(root: Node) -> Vec<Node> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        out.push(node);
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    out
}

fn find_dangerous_calls(unit: &CodeUnit, tree: &Tree) -> Vec<Finding> {
    let src = unit.code.as_bytes();
    let mut findings = Vec::new();

    for node in preorder(tree.root_node()) {
        let found = match unit.language {
            ScriptLanguage::Python => check_python(node, src),
            ScriptLanguage::JavaScript => check_javascript(node, src),
            ScriptLanguage::Shell => check_shell(node, src),
        };
        for (code, what) in found {
            findings.push(Finding {
                code,
                message: format!(
                    "{} at line {} of {}: {}",
                    what,
                    node.start_position().row + 1,
                    unit.origin,
                    risk(code)
                ),
            });
        }
    }
    findings
}

fn risk(code: &str) -> &'static str {
    match code {
        codes::UNSAFE_EVAL => "potential security risk",
        codes::SHELL_TRUE => "injection risk",
        _ => "runs arbitrary OS commands",
    }
}

fn text<'a>(node: Node, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

fn check_python(node: Node, src: &[u8]) -> Vec<(&'static str, String)> {
    let mut found = Vec::new();
    if node.kind() != "call" {
        return found;
    }

    if let Some(func) = node.child_by_field_name("function") {
        match func.kind() {
            "identifier" if matches!(text(func, src), "eval" | "exec") => {
                found.push((codes::UNSAFE_EVAL, format!("{}()", text(func, src))));
            }
            "attribute" => {
                let object = func.child_by_field_name("object").map(|n| text(n, src));
                let attr = func.child_by_field_name("attribute").map(|n| text(n, src));
                if let (Some("os"), Some(a @ ("system" | "popen"))) = (object, attr) {
                    found.push((codes::OS_SYSTEM, format!("os.{}()", a)));
                }
            }
            _ => {}
        }
    }

    if let Some(args) = node.child_by_field_name("arguments") {
        let mut cursor = args.walk();
        for arg in args.named_children(&mut cursor) {
            if arg.kind() != "keyword_argument" {
                continue;
            }
            let name = arg.child_by_field_name("name").map(|n| text(n, src));
            let value = arg.child_by_field_name("value").map(|n| n.kind());
            if name == Some("shell") && value == Some("true") {
                found.push((codes::SHELL_TRUE, "shell=True".to_string()));
            }
        }
    }
    found
}

fn check_javascript(node: Node, src: &[u8]) -> Vec<(&'static str, String)> {
    let mut found = Vec::new();
    match node.kind() {
        "new_expression" => {
            if let Some(ctor) = node.child_by_field_name("constructor") {
                if text(ctor, src) == "Function" {
                    found.push((codes::UNSAFE_EVAL, "new Function()".to_string()));
                }
            }
        }
        "call_expression" => {
            if let Some(func) = node.child_by_field_name("function") {
                match func.kind() {
                    "identifier" => match text(func, src) {
                        "eval" => found.push((codes::UNSAFE_EVAL, "eval()".to_string())),
                        name @ ("exec" | "execSync") => {
                            found.push((codes::OS_SYSTEM, format!("{}()", name)))
                        }
                        _ => {}
                    },
                    "member_expression" => {
                        let object = func.child_by_field_name("object").map(|n| text(n, src)).unwrap_or("");
                        let property = func.child_by_field_name("property").map(|n| text(n, src)).unwrap_or("");
                        let is_child_process = object.contains("child_process") || object == "cp";
                        if is_child_process && matches!(property, "exec" | "execSync") {
                            found.push((codes::OS_SYSTEM, format!("child_process.{}()", property)));
                        }
                    }
                    _ => {}
                }
            }

            if let Some(args) = node.child_by_field_name("arguments") {
                let mut cursor = args.walk();
                for arg in args.named_children(&mut cursor) {
                    if arg.kind() == "object" && object_sets_shell(arg, src) {
                        found.push((codes::SHELL_TRUE, "{ shell: true }".to_string()));
                    }
                }
            }
        }
        _ => {}
    }
    found
}

fn object_sets_shell(object: Node, src: &[u8]) -> bool {
    let mut cursor = object.walk();
    let shell_true = object.named_children(&mut cursor).any(|pair| {
        pair.kind() == "pair"
            && pair
                .child_by_field_name("key")
                .map(|k| text(k, src).trim_matches(|c| c == '"' || c == '\'') == "shell")
                .unwrap_or(false)
            && pair.child_by_field_name("value").map(|v| v.kind()) == Some("true")
    });
    shell_true
}

const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh"];

fn check_shell(node: Node, src: &[u8]) -> Vec<(&'static str, String)> {
    let mut found = Vec::new();
    if node.kind() != "command" {
        return found;
    }
    let Some(name) = node.child_by_field_name("name") else {
        return found;
    };
    let name = text(name, src);
    let base = name.rsplit('/').next().unwrap_or(name);

    match base {
        "eval" | "source" | "." => found.push((codes::UNSAFE_EVAL, format!("'{}'", base))),
        "exec" => found.push((codes::OS_SYSTEM, "'exec'".to_string())),
        shell if SHELLS.contains(&shell) => {
            let mut cursor = node.walk();
            let has_c = node
                .children_by_field_name("argument", &mut cursor)
                .any(|arg| text(arg, src) == "-c");
            if has_c {
                found.push((codes::SHELL_TRUE, format!("'{} -c'", shell)));
            }
        }
        _ => {}
    }
    found
}
