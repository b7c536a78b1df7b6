//! Tool module and descriptor types.
//!
//! A tool module is a JSON manifest. Parsing it yields normalized
//! descriptors: a single `Descriptor::Tool` for a leaf module, or a
//! `Descriptor::ToolSet` followed by one `Descriptor::Tool` per child.

use crate::tools::version::ContentHash;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Declared JSON type of an input or output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    /// A JSON string
    String,
    /// A JSON number
    Number,
    /// A JSON boolean
    Boolean,
    /// A JSON object
    Object,
    /// An array of strings
    ArrayString,
    /// An array of numbers
    ArrayNumber,
    /// An array of booleans
    ArrayBoolean,
    /// An array of objects
    ArrayObject,
    /// Any JSON value
    Any,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::ArrayString | Self::ArrayNumber | Self::ArrayBoolean | Self::ArrayObject => {
                "array"
            }
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// One declared input of a tool version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSpec {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    /// Used when an optional input is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

/// One declared output of a tool version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
}

/// One published interface revision of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    /// Version label; the content hash is computed over these values
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
}

impl VersionEntry {
    /// Creates a version entry with no declared fields.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            description: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

/// How a leaf tool is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolEntry {
    /// A Rust handler registered in the worker's `HandlerTable`
    Handler {
        /// Registered handler name
        handler: String,
    },
    /// An external executable: JSON input on stdin, JSON output on stdout
    Command {
        /// Program to run
        command: String,
        /// Arguments
        #[serde(default)]
        args: Vec<String>,
    },
}

/// A manifest exactly as it appears on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawModule {
    #[serde(default)]
    pub tool_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_description: Option<String>,
    #[serde(default)]
    pub version_list: Vec<VersionEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_input_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<ToolEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<RawModule>>,
}

/// Normalized metadata shared by tools and toolsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMeta {
    pub tool_id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_description: Option<String>,
    pub tags: Vec<String>,
    /// Always a concrete URL after parsing
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_input_config: Option<Value>,
    /// Module file the descriptor was parsed from
    pub tool_filename: String,
    pub version: ContentHash,
}

/// A callable leaf tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    #[serde(flatten)]
    pub meta: ToolMeta,
    /// Non-empty; the first entry is the current interface
    pub version_list: Vec<VersionEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<ToolEntry>,
}

impl ToolDescriptor {
    /// The interface invocations are validated against.
    #[must_use]
    pub fn current_version(&self) -> Option<&VersionEntry> {
        self.version_list.first()
    }
}

/// A group of child tools. Not callable itself; its interface is the
/// union of its children's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSetDescriptor {
    #[serde(flatten)]
    pub meta: ToolMeta,
    pub children: Vec<ToolDescriptor>,
}

/// A registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Descriptor {
    /// A leaf tool
    Tool(ToolDescriptor),
    /// A toolset parent
    ToolSet(ToolSetDescriptor),
}

impl Descriptor {
    /// Shared metadata.
    #[must_use]
    pub fn meta(&self) -> &ToolMeta {
        match self {
            Self::Tool(t) => &t.meta,
            Self::ToolSet(s) => &s.meta,
        }
    }

    /// The descriptor's toolId.
    #[must_use]
    pub fn tool_id(&self) -> &str {
        &self.meta().tool_id
    }

    /// The leaf tool, if this descriptor is callable.
    #[must_use]
    pub fn as_tool(&self) -> Option<&ToolDescriptor> {
        match self {
            Self::Tool(t) => Some(t),
            Self::ToolSet(_) => None,
        }
    }

    /// Returns true for toolset parents.
    #[must_use]
    pub fn is_toolset(&self) -> bool {
        matches!(self, Self::ToolSet(_))
    }

    /// The parent toolset id of a child tool.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Self::Tool(t) => t.parent_id.as_deref(),
            Self::ToolSet(_) => None,
        }
    }
}

/// Public listing entry for the merged registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSummary {
    pub tool_id: String,
    pub name: String,
    pub version: ContentHash,
    pub icon: String,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub is_toolset: bool,
    pub is_dev: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_module_reads_camel_case_manifest() {
        let raw: RawModule = serde_json::from_value(json!({
            "toolId": "weather",
            "name": "Weather",
            "description": "Looks up the weather",
            "versionList": [{
                "value": "1.0.0",
                "inputs": [{"key": "city", "valueType": "string", "required": true}],
                "outputs": [{"key": "temp", "valueType": "number"}]
            }],
            "courseUrl": "https://docs.example/weather",
            "entry": {"handler": "weather"}
        }))
        .unwrap();

        assert_eq!(raw.tool_id, "weather");
        assert_eq!(raw.version_list[0].inputs[0].value_type, ValueType::String);
        assert!(raw.version_list[0].inputs[0].required);
        assert!(!raw.version_list[0].outputs[0].required);
        assert_eq!(
            raw.entry,
            Some(ToolEntry::Handler {
                handler: "weather".to_string()
            })
        );
        assert!(raw.children.is_none());
    }

    #[test]
    fn command_entry_is_distinguished_from_handler() {
        let entry: ToolEntry =
            serde_json::from_value(json!({"command": "python3", "args": ["main.py"]})).unwrap();
        assert_eq!(
            entry,
            ToolEntry::Command {
                command: "python3".to_string(),
                args: vec!["main.py".to_string()],
            }
        );
    }

    #[test]
    fn array_types_display_as_array() {
        assert_eq!(ValueType::ArrayObject.to_string(), "array");
        assert_eq!(ValueType::Boolean.to_string(), "boolean");
    }
}
