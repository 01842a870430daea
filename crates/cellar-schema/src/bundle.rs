//! Resolution of named schema resources.
//!
//! A bundle is searched in order: documents embedded in memory first, then each
//! resource directory for `<identity>.schema.toml`. The first hit wins.

use crate::document::{parse_schema_file, parse_schema_str};
use crate::model::SchemaModel;
use crate::types::StackIdentity;
use crate::SchemaError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File extension of schema resources in a bundle directory.
pub const SCHEMA_EXTENSION: &str = "schema.toml";

#[derive(Debug, Clone, Default)]
pub struct SchemaBundle {
    embedded: BTreeMap<String, String>,
    dirs: Vec<PathBuf>,
}

impl SchemaBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema document under `identity`, shadowing any file of the
    /// same name in the resource directories.
    #[must_use]
    pub fn with_embedded(mut self, identity: &str, document: impl Into<String>) -> Self {
        self.embedded.insert(identity.to_owned(), document.into());
        self
    }

    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dirs.push(dir.into());
        self
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn is_embedded(&self, identity: &str) -> bool {
        self.embedded.contains_key(identity)
    }

    /// True when no source has been registered at all.
    pub fn is_empty(&self) -> bool {
        self.embedded.is_empty() && self.dirs.is_empty()
    }

    pub fn resource_path(dir: &Path, identity: &str) -> PathBuf {
        dir.join(format!("{identity}.{SCHEMA_EXTENSION}"))
    }

    /// Locate, parse, and validate the schema named `identity`.
    pub fn load(&self, identity: &StackIdentity) -> Result<SchemaModel, SchemaError> {
        if let Some(document) = self.embedded.get(identity.as_str()) {
            return parse_schema_str(document)?.into_model(identity);
        }

        for dir in &self.dirs {
            let path = Self::resource_path(dir, identity);
            if path.is_file() {
                return parse_schema_file(&path)?.into_model(identity);
            }
        }

        let mut searched = vec!["embedded".to_owned()];
        searched.extend(
            self.dirs
                .iter()
                .map(|d| Self::resource_path(d, identity).display().to_string()),
        );
        Err(SchemaError::NotFound {
            identity: identity.to_string(),
            searched: searched.join(", "),
        })
    }
}

pub fn load_schema(
    bundle: &SchemaBundle,
    identity: &StackIdentity,
) -> Result<SchemaModel, SchemaError> {
    bundle.load(identity)
}
