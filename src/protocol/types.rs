//! Tool advertisement and engine-facing declaration types.
//!
//! These are pure data types shared between client and server. A client
//! advertises what it can run as [`ToolDefinition`]s (a JSON-Schema-like
//! shape); the server projects those into [`FunctionDeclaration`]s, the
//! shape the generation engine's function-calling interface expects.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A tool a client can execute, as advertised in a discovery message.
///
/// `name` is unique within one client's tool set only — two clients may
/// both advertise `read_file` without conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// JSON-Schema-like parameter object for one tool.
///
/// `schema_type` is `"object"` in practice; the protocol does not
/// validate arguments against this schema — that is the tool's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(
        default,
        rename = "additionalProperties",
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<bool>,
}

impl ParameterSchema {
    /// An object schema with the given properties and required list.
    pub fn object(properties: BTreeMap<String, PropertySchema>, required: Vec<String>) -> Self {
        Self {
            schema_type: "object".to_string(),
            properties,
            required,
            additional_properties: None,
        }
    }

    /// An object schema with no declared properties.
    pub fn empty_object() -> Self {
        Self::object(BTreeMap::new(), Vec::new())
    }
}

/// Schema for a single tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// JSON Schema type tag: "string", "number", "boolean", "array", "object".
    #[serde(rename = "type")]
    pub property_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
}

impl PropertySchema {
    pub fn new(property_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            property_type: property_type.into(),
            description: description.into(),
            enum_values: None,
            items: None,
        }
    }
}

// ── Engine projection ───────────────────────────────────────────────────────

/// Parameter type enumeration understood by the generation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeclarationType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl DeclarationType {
    /// Map a protocol type tag onto the engine enumeration.
    /// Unrecognized tags default to `String`.
    pub fn from_schema_tag(tag: &str) -> Self {
        match tag {
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "array" => Self::Array,
            "object" => Self::Object,
            _ => Self::String,
        }
    }
}

/// A tool definition projected into the engine's function-calling shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: DeclarationSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeclarationSchema {
    #[serde(rename = "type")]
    pub schema_type: DeclarationType,
    pub properties: BTreeMap<String, DeclarationProperty>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeclarationProperty {
    #[serde(rename = "type")]
    pub property_type: DeclarationType,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl From<&ToolDefinition> for FunctionDeclaration {
    fn from(definition: &ToolDefinition) -> Self {
        let properties = definition
            .parameters
            .properties
            .iter()
            .map(|(name, prop)| {
                (
                    name.clone(),
                    DeclarationProperty {
                        property_type: DeclarationType::from_schema_tag(&prop.property_type),
                        description: prop.description.clone(),
                    },
                )
            })
            .collect();

        Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            parameters: DeclarationSchema {
                schema_type: DeclarationType::Object,
                properties,
                required: definition.parameters.required.clone(),
            },
        }
    }
}
