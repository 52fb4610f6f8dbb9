//! Command construction - turns nodes into remote shell command lines

use super::graph::SinkMode;
use crate::catalog::{OptionSpec, OptionType, ToolSchema};
use crate::remote::{file_name, join_path};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Placeholder replaced by the tool command inside an environment wrapper
pub const COMMAND_PLACEHOLDER: &str = "__COMMAND__";

/// Placeholders a sink naming pattern may use
pub const NAMING_PLACEHOLDERS: [&str; 3] = ["{input_name}", "{extension}", "{timestamp}"];

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[^}]+\}").expect("placeholder regex is valid"))
}

/// Null, empty strings, empty arrays and `false` count as "not set"
pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.as_str(), "true" | "1" | "yes" | "on"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

/// Quote an argument for a POSIX shell unless it is made of safe characters only
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Build a tool command line.
///
/// Order: base command, then every non-empty configured option in config
/// order (bare flag for booleans, `flag value` otherwise), then schema
/// defaults for options the config leaves out, then the input paths, then
/// `output_flag <output>` when the schema declares one.
pub fn build_tool_command(
    schema: &ToolSchema,
    config: &Map<String, Value>,
    inputs: &[String],
    outputs: &[String],
) -> String {
    let mut parts = vec![schema.command.clone()];

    for (name, value) in config {
        if is_empty_value(value) {
            continue;
        }
        let Some(spec) = schema.option(name) else {
            log::warn!("Ignoring option '{}' not declared by '{}'", name, schema.command);
            continue;
        };
        push_option(&mut parts, spec, value);
    }

    for spec in schema.options.iter().filter(|o| !config.contains_key(&o.name)) {
        if let Some(value) = spec.default.as_ref().filter(|v| !is_empty_value(v)) {
            push_option(&mut parts, spec, value);
        }
    }

    parts.extend(inputs.iter().map(|p| shell_quote(p)));

    if let (Some(flag), Some(output)) = (&schema.output_flag, outputs.first()) {
        parts.push(flag.clone());
        parts.push(shell_quote(output));
    }

    parts.join(" ")
}

fn push_option(parts: &mut Vec<String>, spec: &OptionSpec, value: &Value) {
    match spec.option_type {
        OptionType::Boolean => {
            if is_truthy(value) {
                parts.push(spec.flag());
            }
        }
        _ => {
            parts.push(spec.flag());
            parts.push(shell_quote(&value_text(value)));
        }
    }
}

/// Substitute a command into an environment wrapper.
///
/// A wrapper without the placeholder is run before the command (`wrapper && command`).
pub fn wrap_in_env(wrapper: Option<&str>, command: &str) -> String {
    match wrapper.map(str::trim) {
        None | Some("") => command.to_string(),
        Some(w) if w.contains(COMMAND_PLACEHOLDER) => w.replace(COMMAND_PLACEHOLDER, command),
        Some(w) => format!("{} && {}", w, command),
    }
}

/// Check that a naming pattern only uses known placeholders.
///
/// Returns the first unknown placeholder on failure.
pub fn validate_naming_pattern(pattern: &str) -> Result<(), String> {
    for found in placeholder_regex().find_iter(pattern) {
        if !NAMING_PLACEHOLDERS.contains(&found.as_str()) {
            return Err(found.as_str().to_string());
        }
    }
    Ok(())
}

/// Render a sink naming pattern for one input file
pub fn render_naming_pattern(pattern: &str, input: &str, now: DateTime<Utc>) -> String {
    let name = file_name(input);
    let stem = name.split('.').next().unwrap_or(name);
    let extension = match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext,
        _ => "txt",
    };
    let timestamp = now.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string();

    pattern
        .replace("{input_name}", stem)
        .replace("{extension}", extension)
        .replace("{timestamp}", &timestamp)
}

/// Command delivering files to a sink, and the paths they end up at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkPlan {
    pub command: String,
    pub delivered: Vec<String>,
}

/// Plan the copy/move of upstream files into a sink destination
pub fn plan_sink(
    mode: SinkMode,
    destination: &str,
    naming_pattern: Option<&str>,
    inputs: &[String],
    now: DateTime<Utc>,
) -> SinkPlan {
    let verb = match mode {
        SinkMode::Copy => "cp -r --",
        SinkMode::Move => "mv --",
    };
    let dest = shell_quote(destination);
    let mut steps = vec![format!("mkdir -p {}", dest)];
    let mut delivered = Vec::with_capacity(inputs.len());

    match naming_pattern.filter(|p| !p.trim().is_empty()) {
        Some(pattern) => {
            for input in inputs {
                let target = join_path(destination, &render_naming_pattern(pattern, input, now));
                steps.push(format!("{} {} {}", verb, shell_quote(input), shell_quote(&target)));
                delivered.push(target);
            }
        }
        None => {
            let sources: Vec<String> = inputs.iter().map(|p| shell_quote(p)).collect();
            steps.push(format!("{} {} {}/", verb, sources.join(" "), dest));
            delivered.extend(inputs.iter().map(|p| join_path(destination, file_name(p))));
        }
    }

    SinkPlan {
        command: steps.join(" && "),
        delivered,
    }
}
