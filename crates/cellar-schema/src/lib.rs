//! Schema documents, resource bundles, and attribute values for Cellar.
//!
//! This crate defines the schema layer: TOML schema document parsing
//! (`SchemaDocument`), the validated, immutable `SchemaModel` with its blake3
//! fingerprint, resolution of named schema resources through a `SchemaBundle`,
//! typed `AttributeValue`s, and the validated `StackIdentity` that names both a
//! schema resource and its backing store file.

pub mod bundle;
pub mod document;
pub mod model;
pub mod types;
pub mod value;

pub use bundle::{load_schema, SchemaBundle, SCHEMA_EXTENSION};
pub use document::{
    parse_schema_file, parse_schema_str, AttributeSection, EntitySection, SchemaDocument,
};
pub use model::{AttributeDescription, EntityDescription, SchemaModel};
pub use types::{EntityName, Fingerprint, StackIdentity};
pub use value::{AttributeKind, AttributeValue};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema resource: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse schema document: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("schema resource '{identity}' not found (searched: {searched})")]
    NotFound { identity: String, searched: String },
    #[error("unsupported schema_version: {0}, expected 1 or greater")]
    UnsupportedVersion(u32),
    #[error("schema '{0}' declares no entities")]
    NoEntities(String),
    #[error("invalid name '{0}', expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidName(String),
    #[error("invalid stack identity: {0}")]
    InvalidIdentity(String),
    #[error("unique constraint on '{entity}' names undeclared attribute '{attribute}'")]
    UnknownUniqueAttribute { entity: String, attribute: String },
    #[error("default for '{entity}.{attribute}' is not a valid {kind}")]
    InvalidDefault {
        entity: String,
        attribute: String,
        kind: AttributeKind,
    },
    #[error("entity '{entity}' has no attribute '{attribute}'")]
    UnknownAttribute { entity: String, attribute: String },
    #[error("'{entity}.{attribute}' expects {expected}, got {found}")]
    TypeMismatch {
        entity: String,
        attribute: String,
        expected: AttributeKind,
        found: AttributeKind,
    },
    #[error("'{entity}.{attribute}' is required but has no value")]
    MissingAttribute { entity: String, attribute: String },
    #[error("'{entity}.{attribute}' must be a finite number")]
    NonFiniteValue { entity: String, attribute: String },
}
