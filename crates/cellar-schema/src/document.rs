use crate::value::AttributeKind;
use crate::SchemaError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Raw schema document as written in a `.schema.toml` resource.
///
/// Use [`SchemaDocument::into_model`](crate::SchemaDocument::into_model) to
/// validate it into a [`SchemaModel`](crate::SchemaModel).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SchemaDocument {
    pub schema_version: u32,
    #[serde(default)]
    pub entities: BTreeMap<String, EntitySection>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EntitySection {
    #[serde(default)]
    pub unique: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSection>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AttributeSection {
    #[serde(rename = "type")]
    pub kind: AttributeKind,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub default: Option<toml::Value>,
}

pub fn parse_schema_str(input: &str) -> Result<SchemaDocument, SchemaError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_schema_file(path: impl AsRef<Path>) -> Result<SchemaDocument, SchemaError> {
    let content = fs::read_to_string(path)?;
    parse_schema_str(&content)
}
