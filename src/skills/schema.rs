//! Schema validation of a skill's exports
//!
//! Checks the declared tool list and the handler table: container types,
//! per-tool fields, name uniqueness and tool/handler alignment. Every error
//! recorded here is structural.

use super::module::{HandlerEntry, HandlerExport, SkillExports};
use super::report::{codes, ValidationReport};
use super::types::{Handler, ParameterSchema, ParameterSpec, ParameterType, ToolDefinition};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

const TOOL_FIELDS: [&str; 2] = ["type", "function"];
const FUNCTION_FIELDS: [&str; 3] = ["name", "description", "parameters"];

/// A tool whose declaration passed validation, paired with its handler
#[derive(Debug, Clone)]
pub struct ValidatedTool {
    pub definition: ToolDefinition,
    pub handler: Handler,
}

impl ValidatedTool {
    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

/// Type name of a JSON value, as shown in issue messages
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "table",
    }
}

/// Validate exports, recording issues on `report`.
///
/// Returns the validated tools in declared order, or `None` once a structural
/// error has been recorded. An empty tool list yields `Some(vec![])`.
pub fn validate_exports(exports: &SkillExports, report: &mut ValidationReport) -> Option<Vec<ValidatedTool>> {
    let tools = match exports.tools {
        None => {
            report.error(
                codes::MISSING_SKILL_TOOLS,
                "No tools declared. Add a `tools` array to the skill.",
                None,
            );
            None
        }
        Some(Value::Array(ref tools)) => Some(tools),
        Some(ref other) => {
            report.error(
                codes::BAD_SKILL_TOOLS,
                format!("tools must be an array, got {}", json_type_name(other)),
                None,
            );
            None
        }
    };

    let handlers = match exports.handlers {
        None => {
            report.error(
                codes::MISSING_SKILL_HANDLERS,
                "No handlers declared. Add a `handlers` table to the skill.",
                None,
            );
            None
        }
        Some(HandlerExport::Table(ref table)) => Some(table),
        Some(HandlerExport::Invalid(ref found)) => {
            report.error(
                codes::BAD_SKILL_HANDLERS,
                format!("handlers must be a table, got {}", found),
                None,
            );
            None
        }
    };

    let (tools, handlers) = match (tools, handlers) {
        (Some(tools), Some(handlers)) => (tools, handlers),
        _ => return None,
    };

    if tools.is_empty() {
        report.warn(codes::EMPTY_SKILL_TOOLS, "tools is empty, no tools will be added", None);
    }

    let mut definitions = Vec::with_capacity(tools.len());
    let mut seen = HashSet::new();
    for (index, tool) in tools.iter().enumerate() {
        if let Some(definition) = validate_tool(index, tool, report) {
            if !seen.insert(definition.name.clone()) {
                report.error(
                    codes::DUPLICATE_TOOL_NAME,
                    format!("Tool '{}' is declared more than once", definition.name),
                    Some(&definition.name),
                );
                continue;
            }
            definitions.push(definition);
        }
    }

    if !report.passed {
        return None;
    }

    let mut validated = Vec::with_capacity(definitions.len());
    for definition in definitions {
        match handlers.get(&definition.name) {
            None => report.error(
                codes::MISSING_HANDLER,
                format!("Tool '{}' is declared but has no handler", definition.name),
                Some(&definition.name),
            ),
            Some(HandlerEntry::NotCallable(reason)) => report.error(
                codes::NOT_CALLABLE,
                format!("Handler is not callable: {}", reason),
                Some(&definition.name),
            ),
            Some(HandlerEntry::Callable(handler)) => validated.push(ValidatedTool {
                handler: handler.clone(),
                definition,
            }),
        }
    }

    let mut orphans: Vec<&String> = handlers.keys().filter(|name| !seen.contains(*name)).collect();
    orphans.sort();
    for name in orphans {
        report.warn(
            codes::ORPHAN_HANDLER,
            format!("Handler '{}' has no tool definition", name),
            Some(name),
        );
    }

    if report.passed {
        Some(validated)
    } else {
        None
    }
}

fn validate_tool(index: usize, tool: &Value, report: &mut ValidationReport) -> Option<ToolDefinition> {
    let Value::Object(tool) = tool else {
        report.error(
            codes::BAD_TOOL_TYPE,
            format!("Tool #{} must be a table, got {}", index, json_type_name(tool)),
            None,
        );
        return None;
    };

    let missing: Vec<&str> = TOOL_FIELDS.iter().copied().filter(|f| !tool.contains_key(*f)).collect();
    if !missing.is_empty() {
        report.error(
            codes::MISSING_TOOL_FIELDS,
            format!("Tool #{} is missing fields: {}", index, missing.join(", ")),
            None,
        );
        return None;
    }

    if tool.get("type").and_then(Value::as_str) != Some("function") {
        report.error(
            codes::BAD_TOOL_TYPE,
            format!("Tool #{} type must be 'function', got {}", index, tool["type"]),
            None,
        );
        return None;
    }

    let Some(Value::Object(function)) = tool.get("function") else {
        report.error(
            codes::BAD_FUNCTION_FIELD,
            format!("Tool #{} function field must be a table", index),
            None,
        );
        return None;
    };

    let missing: Vec<&str> = FUNCTION_FIELDS
        .iter()
        .copied()
        .filter(|f| !function.contains_key(*f))
        .collect();
    if !missing.is_empty() {
        report.error(
            codes::MISSING_FUNC_FIELDS,
            format!("Tool #{} function is missing fields: {}", index, missing.join(", ")),
            None,
        );
        return None;
    }

    let name = match function.get("name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => {
            report.error(
                codes::BAD_TOOL_NAME,
                format!("Tool #{} name must be a non-empty string", index),
                None,
            );
            return None;
        }
    };

    let description = function
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if description.trim().is_empty() {
        report.warn(
            codes::MISSING_DESCRIPTION,
            "Tool has no description, the agent won't know when to use it",
            Some(&name),
        );
    }

    let Some(Value::Object(params)) = function.get("parameters") else {
        report.error(codes::BAD_PARAMETERS, "parameters must be a table", Some(&name));
        return None;
    };

    let parameters = validate_parameters(&name, params, report)?;
    Some(ToolDefinition {
        name,
        description,
        parameters,
    })
}

fn validate_parameters(tool: &str, params: &Map<String, Value>, report: &mut ValidationReport) -> Option<ParameterSchema> {
    if params.get("type").and_then(Value::as_str) != Some("object") {
        report.error(codes::BAD_PARAMS_TYPE, "parameters.type must be 'object'", Some(tool));
        return None;
    }

    let mut properties = BTreeMap::new();
    match params.get("properties") {
        None => {}
        Some(Value::Object(props)) => {
            for (param, spec) in props {
                properties.insert(param.clone(), validate_property(tool, param, spec, report)?);
            }
        }
        Some(other) => {
            report.error(
                codes::BAD_PROPERTY,
                format!("parameters.properties must be a table, got {}", json_type_name(other)),
                Some(tool),
            );
            return None;
        }
    }

    let required: Vec<String> = match params.get("required") {
        None => Vec::new(),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(_) => {
            report.error(
                codes::BAD_REQUIRED,
                "parameters.required must be an array of parameter names",
                Some(tool),
            );
            return None;
        }
    };

    for param in required.iter().filter(|p| !properties.contains_key(*p)) {
        report.warn(
            codes::UNKNOWN_REQUIRED_PARAM,
            format!("Required parameter '{}' is not in properties", param),
            Some(tool),
        );
    }

    Some(ParameterSchema { properties, required })
}

fn validate_property(tool: &str, param: &str, spec: &Value, report: &mut ValidationReport) -> Option<ParameterSpec> {
    let Value::Object(spec) = spec else {
        report.error(
            codes::BAD_PROPERTY,
            format!("Property '{}' must be a table", param),
            Some(tool),
        );
        return None;
    };

    let parsed = match spec.get("type") {
        None => Some(ParameterType::String),
        Some(Value::String(t)) => ParameterType::parse(t),
        Some(_) => None,
    };
    let param_type = match parsed {
        Some(param_type) => param_type,
        None => {
            let other = spec.get("type").cloned().unwrap_or_default();
            report.error(
                codes::BAD_PROPERTY,
                format!("Property '{}' has unsupported type {}", param, other),
                Some(tool),
            );
            return None;
        }
    };

    let description = spec.get("description").and_then(Value::as_str).unwrap_or_default();
    Some(ParameterSpec::new(param_type, description))
}
