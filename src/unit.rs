//! Units, their declared input/output contract, and the type-tag table.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue, json};

use crate::introspect::Introspection;

/// Closed set of value types an input or output can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    String,
    Integer,
    Float,
    Boolean,
    List,
    Dict,
    File,
    Json,
}

/// How the validator treats a concrete value of a given tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRule {
    /// Any non-null value is accepted.
    Present,
    /// The value names a path that must exist under the workspace root.
    WorkspacePath,
}

/// How a value crosses the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Serialized inline in the JSON argument/result blobs.
    Inline,
    /// Only a workspace-relative path is exchanged; content stays on disk.
    PathReference,
}

/// One row of the type-tag table.
#[derive(Debug)]
pub struct TagTraits {
    pub tag: TypeTag,
    pub name: &'static str,
    pub schema_type: Option<&'static str>,
    pub schema_format: Option<&'static str>,
    pub rule: ValueRule,
    pub transport: Transport,
}

const TAG_TABLE: &[TagTraits] = &[
    TagTraits {
        tag: TypeTag::String,
        name: "string",
        schema_type: Some("string"),
        schema_format: None,
        rule: ValueRule::Present,
        transport: Transport::Inline,
    },
    TagTraits {
        tag: TypeTag::Integer,
        name: "integer",
        schema_type: Some("integer"),
        schema_format: None,
        rule: ValueRule::Present,
        transport: Transport::Inline,
    },
    TagTraits {
        tag: TypeTag::Float,
        name: "float",
        schema_type: Some("number"),
        schema_format: None,
        rule: ValueRule::Present,
        transport: Transport::Inline,
    },
    TagTraits {
        tag: TypeTag::Boolean,
        name: "boolean",
        schema_type: Some("boolean"),
        schema_format: None,
        rule: ValueRule::Present,
        transport: Transport::Inline,
    },
    TagTraits {
        tag: TypeTag::List,
        name: "list",
        schema_type: Some("array"),
        schema_format: None,
        rule: ValueRule::Present,
        transport: Transport::Inline,
    },
    TagTraits {
        tag: TypeTag::Dict,
        name: "dict",
        schema_type: Some("object"),
        schema_format: None,
        rule: ValueRule::Present,
        transport: Transport::Inline,
    },
    TagTraits {
        tag: TypeTag::File,
        name: "file",
        schema_type: Some("string"),
        schema_format: Some("path"),
        rule: ValueRule::WorkspacePath,
        transport: Transport::PathReference,
    },
    TagTraits {
        tag: TypeTag::Json,
        name: "json",
        schema_type: None,
        schema_format: None,
        rule: ValueRule::Present,
        transport: Transport::Inline,
    },
];

impl TypeTag {
    pub fn traits(self) -> &'static TagTraits {
        // The table has exactly one row per variant, in declaration order.
        &TAG_TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.traits().name
    }

    pub fn rule(self) -> ValueRule {
        self.traits().rule
    }

    pub fn transport(self) -> Transport {
        self.traits().transport
    }

    pub fn is_file(self) -> bool {
        self.transport() == Transport::PathReference
    }

    /// JSON Schema fragment describing values of this tag.
    pub fn json_schema(self) -> JsonValue {
        let traits = self.traits();
        let mut schema = JsonMap::new();
        if let Some(ty) = traits.schema_type {
            schema.insert("type".to_string(), json!(ty));
        }
        if let Some(format) = traits.schema_format {
            schema.insert("format".to_string(), json!(format));
        }
        JsonValue::Object(schema)
    }

    /// Map a JSON Schema fragment back to a tag.
    ///
    /// `$ref`s point at structured models and become `dict`; an optional `X`
    /// (`anyOf: [X, null]`) maps like `X`; any other union or untyped schema
    /// is `json`.
    pub fn from_schema(schema: &JsonValue) -> TypeTag {
        let Some(obj) = schema.as_object() else {
            return TypeTag::Json;
        };

        if obj.contains_key("$ref") {
            return TypeTag::Dict;
        }

        if let Some(variants) = obj.get("anyOf").and_then(|v| v.as_array()) {
            let non_null: Vec<&JsonValue> = variants
                .iter()
                .filter(|v| v.get("type").and_then(|t| t.as_str()) != Some("null"))
                .collect();
            return match non_null.as_slice() {
                [single] => TypeTag::from_schema(single),
                _ => TypeTag::Json,
            };
        }

        let format = obj.get("format").and_then(|f| f.as_str());
        match obj.get("type").and_then(|t| t.as_str()) {
            Some("string") if format == Some("path") => TypeTag::File,
            Some(ty) => TAG_TABLE
                .iter()
                .find(|row| row.schema_type == Some(ty) && row.schema_format.is_none())
                .map(|row| row.tag)
                .unwrap_or(TypeTag::Json),
            None => TypeTag::Json,
        }
    }
}

/// Which program template wraps a unit's fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// The fragment reads `event` and mutates `output` in place.
    #[default]
    EventOutput,
    /// The fragment defines a typed entry function invoked once.
    TypedFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub tag: TypeTag,
    #[serde(default)]
    pub description: String,
    /// Literal used when a request leaves this input out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub tag: TypeTag,
    #[serde(default)]
    pub description: String,
    /// Workspace-relative path template; only meaningful for file outputs.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl InputDecl {
    /// A declared `null` default (Python `= None`) makes the input optional.
    pub fn is_nullable(&self) -> bool {
        matches!(self.default, Some(JsonValue::Null))
    }
}

/// An authored code fragment plus its declared input/output contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_code: Option<String>,
    #[serde(default)]
    pub inputs: Vec<InputDecl>,
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default)]
    pub mode: SynthesisMode,
}

impl Unit {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            code: code.into(),
            test_code: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            docstring: None,
            mode: SynthesisMode::default(),
        }
    }

    pub fn output(&self, name: &str) -> Option<&OutputDecl> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn file_outputs(&self) -> impl Iterator<Item = &OutputDecl> {
        self.outputs.iter().filter(|o| o.tag.is_file())
    }

    /// Replace the declared contract with an introspected one.
    ///
    /// Called once per code (re)generation. A file output that keeps its name
    /// and type keeps its path template.
    pub fn apply_introspection(&mut self, introspection: &Introspection) {
        let previous = std::mem::take(&mut self.outputs);
        self.inputs = introspection.inputs();
        self.outputs = introspection
            .outputs()
            .into_iter()
            .map(|mut decl| {
                if let Some(old) = previous
                    .iter()
                    .find(|old| old.name == decl.name && old.tag == decl.tag)
                {
                    decl.path = old.path.clone();
                    if decl.description.is_empty() {
                        decl.description = old.description.clone();
                    }
                }
                decl
            })
            .collect();
        self.docstring = introspection.docstring.clone();
        self.mode = SynthesisMode::TypedFunction;
    }
}

/// Outputs of one execution, keyed by declared output name.
///
/// File-typed entries hold the workspace-relative path the program wrote to.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionResult {
    outputs: JsonMap<String, JsonValue>,
}

impl ExecutionResult {
    pub fn new(outputs: JsonMap<String, JsonValue>) -> Self {
        Self { outputs }
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.outputs.get(name)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.outputs.clone())
    }
}
