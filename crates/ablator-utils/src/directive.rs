//! Parsing of phase command strings.
//!
//! A command starting with `@tool ` is a directive that calls a tool directly:
//!
//! ```text
//! @tool <toolName> [<json-object args>]
//! ```
//!
//! Anything else is a query sent to the model.

use serde_json::{Map, Value};

use crate::error::DefinitionError;

/// Prefix marking a command as a tool directive
pub const DIRECTIVE_PREFIX: &str = "@tool";

/// A parsed phase command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Free text for the model
    Query(String),
    /// Direct tool invocation
    Directive(Directive),
}

/// A direct tool invocation: tool name plus a JSON object of arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub tool: String,
    pub args: Value,
}

impl Directive {
    /// Short `tool {args}` rendering for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{} {}", self.tool, self.args)
    }
}

/// Whether `raw` looks like a directive (without validating it).
#[must_use]
pub fn is_directive(raw: &str) -> bool {
    let trimmed = raw.trim_start();
    trimmed == DIRECTIVE_PREFIX
        || trimmed
            .strip_prefix(DIRECTIVE_PREFIX)
            .is_some_and(|rest| rest.starts_with(char::is_whitespace))
}

/// Classify and parse a command string.
pub fn parse_command(raw: &str) -> Result<Command, DefinitionError> {
    if is_directive(raw) {
        parse_directive(raw).map(Command::Directive)
    } else {
        Ok(Command::Query(raw.to_string()))
    }
}

/// Parse a `@tool` directive. Missing arguments become `{}`.
pub fn parse_directive(raw: &str) -> Result<Directive, DefinitionError> {
    let invalid = |reason: &str| DefinitionError::InvalidDirective {
        command: raw.to_string(),
        reason: reason.to_string(),
    };

    let rest = raw
        .trim()
        .strip_prefix(DIRECTIVE_PREFIX)
        .ok_or_else(|| invalid("missing @tool prefix"))?
        .trim_start();

    let (tool, args_text) = match rest.find(char::is_whitespace) {
        Some(idx) => (&rest[..idx], rest[idx..].trim()),
        None => (rest, ""),
    };

    if tool.is_empty() {
        return Err(invalid("missing tool name"));
    }
    if tool.starts_with('{') {
        return Err(invalid("tool name must come before the arguments"));
    }

    let args = if args_text.is_empty() {
        Value::Object(Map::new())
    } else {
        let value: Value = serde_json::from_str(args_text)
            .map_err(|e| invalid(&format!("arguments are not valid JSON: {e}")))?;
        if !value.is_object() {
            return Err(invalid("arguments must be a JSON object"));
        }
        value
    };

    Ok(Directive {
        tool: tool.to_string(),
        args,
    })
}
