//! Pre-flight input validation.
//!
//! Runs before any process is spawned. Violations are collected across every
//! declared input and reported together.

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, info};

use crate::error::ValidationError;
use crate::unit::{InputDecl, ValueRule};
use crate::workspace::Workspace;

/// Fill absent (not null) arguments from their declared defaults.
pub fn apply_defaults(
    decls: &[InputDecl],
    args: &JsonMap<String, JsonValue>,
) -> JsonMap<String, JsonValue> {
    let mut filled = args.clone();
    for decl in decls {
        if let Some(default) = &decl.default
            && !filled.contains_key(&decl.name)
        {
            debug!(input = %decl.name, "validate:default applied");
            filled.insert(decl.name.clone(), default.clone());
        }
    }
    filled
}

/// Check every declared input against `args`.
///
/// Undeclared extra arguments are passed through untouched.
pub fn validate_inputs(
    decls: &[InputDecl],
    args: &JsonMap<String, JsonValue>,
    workspace: &Workspace,
) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    for decl in decls {
        let value = match args.get(&decl.name) {
            None | Some(JsonValue::Null) if decl.is_nullable() => continue,
            None | Some(JsonValue::Null) => {
                violations.push(format!("{} value is not set", decl.name));
                continue;
            }
            Some(value) => value,
        };

        match decl.tag.rule() {
            ValueRule::Present => {}
            ValueRule::WorkspacePath => match value.as_str() {
                Some(path) if workspace.file_exists(path) => {}
                Some(path) => violations.push(format!(
                    "File {} for input {} not found in workspace",
                    path, decl.name
                )),
                None => violations.push(format!(
                    "{} must be a workspace-relative file path, got {}",
                    decl.name, value
                )),
            },
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        info!(
            workspace = workspace.id(),
            count = violations.len(),
            "validate:rejected"
        );
        Err(ValidationError::new(violations))
    }
}
