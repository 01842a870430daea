use crate::CoreError;
use cellar_schema::SchemaBundle;
use cellar_store::StoreLayout;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Subdirectory of the working directory searched for schema resources when
/// no schema source is configured.
pub const DEFAULT_SCHEMA_DIR: &str = "schemas";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    identity: String,
    #[serde(default)]
    data_dir: Option<PathBuf>,
    #[serde(default)]
    schema_dirs: Vec<PathBuf>,
    #[serde(default)]
    debug_logging: bool,
}

/// Everything a [`PersistenceStack`](crate::PersistenceStack) needs to know
/// before it touches the filesystem.
#[derive(Debug, Clone)]
pub struct StackConfig {
    identity: String,
    data_dir: Option<PathBuf>,
    schemas: SchemaBundle,
    debug_logging: bool,
}

impl StackConfig {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            data_dir: None,
            schemas: SchemaBundle::new(),
            debug_logging: false,
        }
    }

    /// Load a configuration file. Relative paths in it are resolved against
    /// the file's own directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let base = path.parent().unwrap_or(Path::new("."));
        Self::parse(&content, base)
            .map_err(|e| CoreError::Configuration(format!("{}: {e}", path.display())))
    }

    /// Parse a configuration document; relative paths stay relative.
    pub fn from_toml_str(content: &str) -> Result<Self, CoreError> {
        Self::parse(content, Path::new("")).map_err(CoreError::Configuration)
    }

    fn parse(content: &str, base: &Path) -> Result<Self, String> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| e.to_string())?;
        let mut schemas = SchemaBundle::new();
        for dir in file.schema_dirs {
            schemas = schemas.with_dir(base.join(dir));
        }
        Ok(Self {
            identity: file.identity,
            data_dir: file.data_dir.map(|d| base.join(d)),
            schemas,
            debug_logging: file.debug_logging,
        })
    }

    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_schema_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.schemas = self.schemas.with_dir(dir);
        self
    }

    /// Register the schema document for this stack's identity in memory.
    #[must_use]
    pub fn with_embedded_schema(mut self, document: impl Into<String>) -> Self {
        self.schemas = self.schemas.with_embedded(self.identity.trim(), document);
        self
    }

    #[must_use]
    pub fn with_schemas(mut self, schemas: SchemaBundle) -> Self {
        self.schemas = schemas;
        self
    }

    #[must_use]
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub fn schemas(&self) -> &SchemaBundle {
        &self.schemas
    }

    pub fn debug_logging(&self) -> bool {
        self.debug_logging
    }

    /// The configured data directory, else `$CELLAR_DATA_DIR`, else the
    /// platform data directory.
    pub fn resolved_data_dir(&self) -> Result<PathBuf, CoreError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        StoreLayout::default_root().ok_or_else(|| {
            CoreError::Configuration(
                "no data directory configured and no platform default available".to_owned(),
            )
        })
    }

    /// The schema sources to search. An unconfigured bundle falls back to
    /// `./schemas` and then the data directory.
    pub(crate) fn into_schemas(self, data_dir: &Path) -> SchemaBundle {
        if self.schemas.is_empty() {
            SchemaBundle::new()
                .with_dir(DEFAULT_SCHEMA_DIR)
                .with_dir(data_dir)
        } else {
            self.schemas
        }
    }
}
