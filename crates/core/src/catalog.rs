use crate::error::PipelineError;
use crate::models::{DocumentRecord, NewDocumentRecord, StoredBlob};
use crate::traits::{BlobStore, MetadataStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Owns document identity, version history, and parent/child linkage, and
/// keeps the blob store free of orphaned or prematurely deleted content.
/// Blob deletion is reference-counted on both update and delete; a racing
/// update can at worst leak a blob, never double-free one.
pub struct DocumentCatalog {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
}

impl DocumentCatalog {
    pub fn new(metadata: Arc<dyn MetadataStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { metadata, blobs }
    }

    pub async fn create_document(
        &self,
        filename: &str,
        collection: &str,
        document_hash: &str,
        content: &[u8],
        parent_id: Option<String>,
    ) -> Result<String, PipelineError> {
        let blob_ref = self
            .blobs
            .put(content, filename, &content_type_for(filename))
            .await?;

        let now = Utc::now();
        let id = self
            .metadata
            .insert(NewDocumentRecord {
                original_filename: filename.to_string(),
                collection_name: collection.to_string(),
                active_version_hash: document_hash.to_string(),
                blob_ref,
                created_at: now,
                updated_at: now,
                parent_id,
            })
            .await?;
        Ok(id)
    }

    /// Swaps a record onto a new content version. The caller purges the old
    /// version's vectors first; here the metadata moves to the new
    /// hash/filename/blob and the old blob is deleted once nothing else
    /// references it. Returns the record as it was before the update.
    pub async fn update_document(
        &self,
        id: &str,
        new_hash: &str,
        new_filename: &str,
        content: &[u8],
    ) -> Result<DocumentRecord, PipelineError> {
        let previous = self.find_by_id(id).await?;

        let new_blob_ref = self
            .blobs
            .put(content, new_filename, &content_type_for(new_filename))
            .await?;
        self.metadata
            .update_version(id, new_hash, new_filename, &new_blob_ref, Utc::now())
            .await?;

        // content-addressed refs collide when both versions share bytes
        if previous.blob_ref != new_blob_ref {
            self.collect_blob_if_unreferenced(&previous.blob_ref, id)
                .await?;
        }

        Ok(previous)
    }

    /// Removes a record together with its blob when no other record shares
    /// it, using the same reference-counted collection as `update_document`.
    pub async fn delete_document(&self, id: &str) -> Result<DocumentRecord, PipelineError> {
        let record = self.find_by_id(id).await?;
        self.collect_blob_if_unreferenced(&record.blob_ref, id)
            .await?;
        self.metadata.remove(id).await?;
        Ok(record)
    }

    async fn collect_blob_if_unreferenced(
        &self,
        blob_ref: &str,
        owner_id: &str,
    ) -> Result<(), PipelineError> {
        let other_references = self
            .metadata
            .count_by_blob_ref_excluding(blob_ref, owner_id)
            .await?;
        if other_references == 0 {
            self.blobs.delete(blob_ref).await?;
        } else {
            info!(blob_ref, other_references, "blob retained, still referenced");
        }
        Ok(())
    }

    /// Point lookup; a malformed id simply misses and reads as not-found.
    pub async fn find_by_id(&self, id: &str) -> Result<DocumentRecord, PipelineError> {
        self.metadata
            .fetch(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("document id {id}")))
    }

    pub async fn find_first_by_hash(&self, hash: &str) -> Result<DocumentRecord, PipelineError> {
        self.metadata
            .find_first_by_hash(hash)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("document hash {hash}")))
    }

    pub async fn find_by_hashes(
        &self,
        collection: &str,
        hashes: &[String],
    ) -> Result<Vec<DocumentRecord>, PipelineError> {
        self.metadata.find_by_hashes(collection, hashes).await
    }

    /// Expands each id to itself, its parent (when present), and every
    /// record whose `parent_id` falls inside that closure. One hop in each
    /// direction, never transitive.
    pub async fn find_related_documents(
        &self,
        ids: &[String],
    ) -> Result<Vec<DocumentRecord>, PipelineError> {
        let initial = self.metadata.find_by_ids(ids).await?;

        let mut closure: Vec<String> = initial.iter().map(|record| record.id.clone()).collect();
        for record in &initial {
            if let Some(parent_id) = &record.parent_id {
                if !closure.contains(parent_id) {
                    closure.push(parent_id.clone());
                }
            }
        }

        let mut related = self.metadata.find_by_ids(&closure).await?;
        for child in self.metadata.find_by_parent_ids(&closure).await? {
            if !related.iter().any(|record| record.id == child.id) {
                related.push(child);
            }
        }
        Ok(related)
    }

    pub async fn fetch_blob(&self, blob_ref: &str) -> Result<StoredBlob, PipelineError> {
        self.blobs.get(blob_ref).await
    }

    /// Record plus stored bytes for the document currently at `hash`.
    pub async fn download_by_hash(
        &self,
        hash: &str,
    ) -> Result<(DocumentRecord, StoredBlob), PipelineError> {
        let record = self.find_first_by_hash(hash).await?;
        let blob = self.blobs.get(&record.blob_ref).await?;
        Ok((record, blob))
    }
}

fn content_type_for(filename: &str) -> String {
    let extension = filename.rsplit('.').next().unwrap_or("bin");
    format!("application/{extension}")
}
