use crate::changes::{ChangeSet, CommitReceipt, ObjectId, StoredRecord};
use crate::image::StoreImage;
use crate::layout::StoreLayout;
use crate::lock::StoreLock;
use crate::StoreError;
use cellar_schema::SchemaModel;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Sole owner of one store's data file.
///
/// Opening takes an exclusive lock and loads the committed image into memory;
/// every successful [`commit`](Self::commit) replaces both the file and the
/// in-memory image. Dropping the coordinator releases the lock.
pub struct StoreCoordinator {
    schema: Arc<SchemaModel>,
    path: PathBuf,
    image: Mutex<StoreImage>,
    next_id: AtomicU64,
    lock: StoreLock,
}

impl StoreCoordinator {
    /// Open or create the store for `identity` under `layout`.
    ///
    /// Fails with `Unavailable` when the directory or files cannot be created or
    /// read, `Locked` when another coordinator holds the store, and
    /// `SchemaMismatch` / `VersionMismatch` when the file was written with a
    /// different schema or format. Nothing is left behind on failure.
    pub fn open(
        schema: Arc<SchemaModel>,
        layout: &StoreLayout,
        identity: &str,
    ) -> Result<Self, StoreError> {
        layout.initialize()?;

        let lock_path = layout.lock_file(identity);
        let Some(lock) = StoreLock::try_acquire(&lock_path)? else {
            return Err(StoreError::Locked(lock_path));
        };

        let path = layout.data_file(identity);
        let image = match load_or_create(&schema, &path) {
            Ok(image) => image,
            Err(e) => {
                lock.discard();
                return Err(e);
            }
        };

        debug!(
            "opened store {} (generation {}, {} records)",
            path.display(),
            image.generation,
            image.records.len()
        );

        Ok(Self {
            schema,
            path,
            next_id: AtomicU64::new(image.next_id),
            image: Mutex::new(image),
            lock,
        })
    }

    pub fn schema(&self) -> &Arc<SchemaModel> {
        &self.schema
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    /// Number of successful commits ever applied to this store.
    pub fn generation(&self) -> u64 {
        self.image().generation
    }

    pub fn len(&self) -> usize {
        self.image().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserve a fresh object id. Ids are never handed out twice, even when
    /// the commit that would have used one fails.
    pub fn allocate_id(&self) -> ObjectId {
        ObjectId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn record(&self, id: ObjectId) -> Option<StoredRecord> {
        self.image().records.get(&id).cloned()
    }

    /// Committed records of `entity`, ordered by id.
    pub fn records(&self, entity: &str) -> Vec<(ObjectId, StoredRecord)> {
        self.image()
            .records_of(entity)
            .map(|(id, record)| (*id, record.clone()))
            .collect()
    }

    /// Apply `changes` all-or-nothing.
    ///
    /// The candidate image is validated against the schema and its uniqueness
    /// constraints, written atomically, and only then made current. On any
    /// error both the file and the in-memory image are unchanged.
    pub fn commit(&self, changes: &ChangeSet) -> Result<CommitReceipt, StoreError> {
        let mut image = self.image();
        let mut next = image.clone();

        for id in changes.deleted() {
            if next.records.remove(id).is_none() {
                return Err(StoreError::ObjectNotFound(*id));
            }
        }
        for (id, record) in changes.updated() {
            if !next.records.contains_key(id) {
                return Err(StoreError::ObjectNotFound(*id));
            }
            self.validate(*id, record)?;
            next.records.insert(*id, record.clone());
        }
        for (id, record) in changes.inserted() {
            if next.records.contains_key(id) {
                return Err(StoreError::DuplicateObject(*id));
            }
            self.validate(*id, record)?;
            next.records.insert(*id, record.clone());
        }
        self.check_unique(&next)?;

        next.generation += 1;
        next.next_id = next.next_id.max(self.next_id.load(Ordering::SeqCst));
        next.checksum = None;
        next.write_atomic(&self.path)?;

        let receipt = CommitReceipt {
            generation: next.generation,
            inserted: changes.inserted().len(),
            updated: changes.updated().len(),
            deleted: changes.deleted().len(),
        };
        *image = next;
        debug!(
            "committed generation {} to {}: +{} ~{} -{}",
            receipt.generation,
            self.path.display(),
            receipt.inserted,
            receipt.updated,
            receipt.deleted
        );
        Ok(receipt)
    }

    fn image(&self) -> MutexGuard<'_, StoreImage> {
        self.image.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate(&self, id: ObjectId, record: &StoredRecord) -> Result<(), StoreError> {
        let entity = self
            .schema
            .entity(&record.entity)
            .ok_or_else(|| StoreError::UnknownEntity(record.entity.to_string()))?;
        entity
            .validate_values(&record.values)
            .map_err(|source| StoreError::Validation {
                object: id,
                entity: record.entity.to_string(),
                source,
            })
    }

    fn check_unique(&self, image: &StoreImage) -> Result<(), StoreError> {
        for entity in self.schema.entities() {
            for attribute in entity.unique() {
                let mut seen: HashMap<String, ObjectId> = HashMap::new();
                for (id, record) in image.records_of(entity.name()) {
                    let Some(value) = record.values.get(attribute) else {
                        continue;
                    };
                    let key = serde_json::to_string(value)?;
                    if let Some(existing) = seen.get(&key) {
                        return Err(StoreError::UniqueConstraint {
                            entity: entity.name().to_string(),
                            attribute: attribute.clone(),
                            object: *id,
                            existing: *existing,
                            value: value.to_string(),
                        });
                    }
                    seen.insert(key, *id);
                }
            }
        }
        Ok(())
    }
}

fn load_or_create(schema: &SchemaModel, path: &Path) -> Result<StoreImage, StoreError> {
    if path.exists() {
        let image = StoreImage::read(path).map_err(|e| e.unavailable_at(path))?;
        image.verify_schema(schema)?;
        return Ok(image);
    }

    let image = StoreImage::empty(schema);
    image
        .write_atomic(path)
        .map_err(|e| e.unavailable_at(path))?;
    info!(
        "created store {} for schema '{}' v{}",
        path.display(),
        schema.name(),
        schema.version()
    );
    Ok(image)
}
