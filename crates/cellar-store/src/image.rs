use crate::changes::{ObjectId, StoredRecord};
use crate::{fsync_dir, StoreError};
use cellar_schema::{Fingerprint, SchemaModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Current data file format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// The schema a data file was written with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaStamp {
    pub name: String,
    pub version: u32,
    pub fingerprint: Fingerprint,
}

impl SchemaStamp {
    pub fn of(schema: &SchemaModel) -> Self {
        Self {
            name: schema.name().to_owned(),
            version: schema.version(),
            fingerprint: schema.fingerprint().clone(),
        }
    }
}

impl fmt::Display for SchemaStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' v{} ({})",
            self.name,
            self.version,
            self.fingerprint.short()
        )
    }
}

/// Complete contents of one data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreImage {
    pub format_version: u32,
    pub schema: SchemaStamp,
    pub generation: u64,
    pub next_id: u64,
    pub records: BTreeMap<ObjectId, StoredRecord>,
    /// blake3 checksum over the document serialized without this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl StoreImage {
    pub fn empty(schema: &SchemaModel) -> Self {
        Self {
            format_version: STORE_FORMAT_VERSION,
            schema: SchemaStamp::of(schema),
            generation: 0,
            next_id: 1,
            records: BTreeMap::new(),
            checksum: None,
        }
    }

    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    /// Read and verify a data file: format version first, then checksum.
    pub fn read(path: &Path) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path)?;
        let raw: serde_json::Value = serde_json::from_str(&content)?;
        let found = raw
            .get("format_version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as u32;
        if found != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found,
            });
        }

        let image: StoreImage = serde_json::from_value(raw)?;
        if let Some(ref expected) = image.checksum {
            let actual = image.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    path: path.display().to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(image)
    }

    /// Replace the file at `path` with this image: temp file in the same
    /// directory, fsync, rename, fsync the directory.
    pub fn write_atomic(&self, path: &Path) -> Result<(), StoreError> {
        let mut with_checksum = self.clone();
        with_checksum.checksum = Some(self.compute_checksum()?);
        let content = serde_json::to_string_pretty(&with_checksum)?;

        let dir = path.parent().unwrap_or(Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;
        Ok(())
    }

    pub fn verify_schema(&self, schema: &SchemaModel) -> Result<(), StoreError> {
        let expected = SchemaStamp::of(schema);
        if self.schema.version != expected.version || self.schema.fingerprint != expected.fingerprint
        {
            return Err(StoreError::SchemaMismatch {
                expected,
                found: self.schema.clone(),
            });
        }
        Ok(())
    }

    pub fn records_of<'a>(
        &'a self,
        entity: &'a str,
    ) -> impl Iterator<Item = (&'a ObjectId, &'a StoredRecord)> + 'a {
        self.records.iter().filter(move |(_, r)| r.entity == entity)
    }
}
