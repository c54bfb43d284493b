//! Schema introspection of typed-function fragments.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{EngineError, Result};
use crate::unit::{InputDecl, OutputDecl, TypeTag};

/// Schema triple derived from an entry function's annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Introspection {
    pub input_schema: JsonValue,
    pub output_schema: JsonValue,
    #[serde(default)]
    pub docstring: Option<String>,
}

impl Introspection {
    /// Parse the decoded payload of an introspection program.
    pub fn from_payload(payload: JsonMap<String, JsonValue>) -> Result<Self> {
        if let Some(error) = payload.get("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(EngineError::Introspection(message));
        }
        serde_json::from_value(JsonValue::Object(payload))
            .map_err(|e| EngineError::Introspection(format!("malformed schema payload: {}", e)))
    }

    /// Input declarations in parameter order.
    pub fn inputs(&self) -> Vec<InputDecl> {
        schema_properties(&self.input_schema)
            .map(|(name, schema)| InputDecl {
                name: name.clone(),
                tag: TypeTag::from_schema(schema),
                description: description(schema),
                default: schema.get("default").cloned(),
            })
            .collect()
    }

    /// Output declarations; typed functions always produce a single `result`.
    pub fn outputs(&self) -> Vec<OutputDecl> {
        schema_properties(&self.output_schema)
            .map(|(name, schema)| OutputDecl {
                name: name.clone(),
                tag: TypeTag::from_schema(schema),
                description: description(schema),
                path: String::new(),
            })
            .collect()
    }
}

fn schema_properties(schema: &JsonValue) -> impl Iterator<Item = (&String, &JsonValue)> {
    schema
        .get("properties")
        .and_then(JsonValue::as_object)
        .into_iter()
        .flat_map(|props| props.iter())
}

fn description(schema: &JsonValue) -> String {
    schema
        .get("description")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}
