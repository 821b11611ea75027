use crate::error::PipelineError;
use crate::models::{DocumentRecord, NewDocumentRecord, StoredBlob};
use crate::traits::{BlobStore, MetadataStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Metadata store backed by a single JSON file. Records live in memory and
/// are rewritten to disk after every mutation.
pub struct JsonMetadataStore {
    file_path: PathBuf,
    records: RwLock<HashMap<String, DocumentRecord>>,
}

impl JsonMetadataStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let file_path = path.into();
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                PipelineError::Configuration(format!(
                    "metadata store directory is not writable: {error}"
                ))
            })?;
        }

        let records = match tokio::fs::read(&file_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|error| {
                PipelineError::Configuration(format!(
                    "metadata store file {} is not readable: {error}",
                    file_path.display()
                ))
            })?,
            Err(error) if error.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(error) => {
                return Err(PipelineError::Configuration(format!(
                    "metadata store file {} is not readable: {error}",
                    file_path.display()
                )))
            }
        };

        Ok(Self {
            file_path,
            records: RwLock::new(records),
        })
    }

    async fn persist(
        &self,
        records: &HashMap<String, DocumentRecord>,
    ) -> Result<(), PipelineError> {
        let bytes = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&self.file_path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for JsonMetadataStore {
    async fn insert(&self, record: NewDocumentRecord) -> Result<String, PipelineError> {
        let id = Uuid::new_v4().to_string();
        let mut records = self.records.write().await;
        records.insert(
            id.clone(),
            DocumentRecord {
                id: id.clone(),
                original_filename: record.original_filename,
                collection_name: record.collection_name,
                active_version_hash: record.active_version_hash,
                blob_ref: record.blob_ref,
                created_at: record.created_at,
                updated_at: record.updated_at,
                parent_id: record.parent_id,
            },
        );
        self.persist(&records).await?;
        Ok(id)
    }

    async fn fetch(&self, id: &str) -> Result<Option<DocumentRecord>, PipelineError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn update_version(
        &self,
        id: &str,
        new_hash: &str,
        new_filename: &str,
        new_blob_ref: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(format!("document id {id}")))?;
        record.active_version_hash = new_hash.to_string();
        record.original_filename = new_filename.to_string();
        record.blob_ref = new_blob_ref.to_string();
        record.updated_at = updated_at;
        self.persist(&records).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), PipelineError> {
        let mut records = self.records.write().await;
        records.remove(id);
        self.persist(&records).await?;
        Ok(())
    }

    async fn find_by_hashes(
        &self,
        collection: &str,
        hashes: &[String],
    ) -> Result<Vec<DocumentRecord>, PipelineError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|record| {
                record.collection_name == collection
                    && hashes.contains(&record.active_version_hash)
            })
            .cloned()
            .collect())
    }

    async fn find_first_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<DocumentRecord>, PipelineError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|record| record.active_version_hash == hash)
            .cloned())
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<DocumentRecord>, PipelineError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|record| ids.contains(&record.id))
            .cloned()
            .collect())
    }

    async fn find_by_parent_ids(
        &self,
        parent_ids: &[String],
    ) -> Result<Vec<DocumentRecord>, PipelineError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|record| {
                record
                    .parent_id
                    .as_ref()
                    .is_some_and(|parent_id| parent_ids.contains(parent_id))
            })
            .cloned()
            .collect())
    }

    async fn count_by_blob_ref_excluding(
        &self,
        blob_ref: &str,
        excluded_id: &str,
    ) -> Result<usize, PipelineError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.blob_ref == blob_ref && record.id != excluded_id)
            .count())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BlobManifest {
    filename: String,
    content_type: String,
}

/// Content-addressed blob store on the filesystem: bytes land in a file
/// named by their SHA-256 hash, with a JSON sidecar carrying the declared
/// filename and content type. Identical content from different records
/// shares one blob.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|error| {
            PipelineError::Configuration(format!("blob store directory is not writable: {error}"))
        })?;
        Ok(Self { root })
    }

    fn blob_path(&self, blob_ref: &str) -> Result<PathBuf, PipelineError> {
        if blob_ref.is_empty() || !blob_ref.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PipelineError::Validation(format!(
                "malformed blob reference '{blob_ref}'"
            )));
        }
        Ok(self.root.join(blob_ref))
    }

    fn manifest_path(&self, blob_ref: &str) -> Result<PathBuf, PipelineError> {
        Ok(self.blob_path(blob_ref)?.with_extension("json"))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        content: &[u8],
        filename: &str,
        content_type: &str,
    ) -> Result<String, PipelineError> {
        let mut hasher = Sha256::new();
        hasher.update(content);
        let blob_ref = format!("{:x}", hasher.finalize());

        tokio::fs::write(self.blob_path(&blob_ref)?, content).await?;
        let manifest = serde_json::to_vec(&BlobManifest {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
        })?;
        tokio::fs::write(self.manifest_path(&blob_ref)?, manifest).await?;

        Ok(blob_ref)
    }

    async fn get(&self, blob_ref: &str) -> Result<StoredBlob, PipelineError> {
        let content = match tokio::fs::read(self.blob_path(blob_ref)?).await {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(PipelineError::NotFound(format!("blob {blob_ref}")))
            }
            Err(error) => return Err(error.into()),
        };

        let manifest = match tokio::fs::read(self.manifest_path(blob_ref)?).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(error) if error.kind() == ErrorKind::NotFound => BlobManifest {
                filename: blob_ref.to_string(),
                content_type: "application/octet-stream".to_string(),
            },
            Err(error) => return Err(error.into()),
        };

        Ok(StoredBlob {
            content,
            content_type: manifest.content_type,
            filename: manifest.filename,
        })
    }

    async fn exists(&self, blob_ref: &str) -> Result<bool, PipelineError> {
        match tokio::fs::metadata(self.blob_path(blob_ref)?).await {
            Ok(_) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    async fn delete(&self, blob_ref: &str) -> Result<(), PipelineError> {
        for path in [self.blob_path(blob_ref)?, self.manifest_path(blob_ref)?] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }
}
