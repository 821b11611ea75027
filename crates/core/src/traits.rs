use crate::error::PipelineError;
use crate::models::{
    Chunk, ChunksByDocument, CollectionInfo, DocumentRecord, NewDocumentRecord, ScoredChunk,
    StoredBlob,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Domain operations over the vector store. Implementations map these onto
/// the store's primitives: upsert, nearest-neighbor search with a score
/// floor, filtered scan, and filtered delete.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    async fn collection_exists(&self, collection: &str) -> Result<bool, PipelineError>;

    async fn create_collection(
        &self,
        collection: &str,
        vector_size: usize,
    ) -> Result<(), PipelineError>;

    async fn delete_collection(&self, collection: &str) -> Result<(), PipelineError>;

    async fn describe_collection(&self, collection: &str) -> Result<CollectionInfo, PipelineError>;

    async fn list_collections(&self) -> Result<Vec<String>, PipelineError>;

    /// Indexes chunks 1:1 with their precomputed vectors. Best-effort per
    /// batch: a failed write is reported but may leave partial state behind.
    async fn index_chunks(
        &self,
        collection: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<(), PipelineError>;

    /// Deletes every chunk of a document version. `false` signals that no
    /// matching vectors existed.
    async fn delete_by_document_hash(
        &self,
        collection: &str,
        document_hash: &str,
    ) -> Result<bool, PipelineError>;

    async fn exists_for_hash(
        &self,
        collection: &str,
        document_hash: &str,
    ) -> Result<bool, PipelineError>;

    /// Per-collection nearest-neighbor search with a score floor; hits are
    /// grouped by document hash, each group sorted by descending score.
    async fn search_question(
        &self,
        question_vector: &[f32],
        top_k: usize,
        collections: &[String],
        score_threshold: f32,
    ) -> Result<ChunksByDocument, PipelineError>;

    async fn chunks_in_page_window(
        &self,
        collection: &str,
        document_hash: &str,
        min_page: u32,
        max_page: u32,
    ) -> Result<Vec<ScoredChunk>, PipelineError>;

    async fn chunks_for_hashes(
        &self,
        collection: &str,
        document_hashes: &[String],
    ) -> Result<ChunksByDocument, PipelineError>;
}

/// Raw record CRUD with equality and in-set filtering; result order is not
/// significant. The catalog layers versioning and linkage semantics on top.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert(&self, record: NewDocumentRecord) -> Result<String, PipelineError>;

    async fn fetch(&self, id: &str) -> Result<Option<DocumentRecord>, PipelineError>;

    async fn update_version(
        &self,
        id: &str,
        new_hash: &str,
        new_filename: &str,
        new_blob_ref: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), PipelineError>;

    async fn remove(&self, id: &str) -> Result<(), PipelineError>;

    async fn find_by_hashes(
        &self,
        collection: &str,
        hashes: &[String],
    ) -> Result<Vec<DocumentRecord>, PipelineError>;

    async fn find_first_by_hash(&self, hash: &str)
        -> Result<Option<DocumentRecord>, PipelineError>;

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<DocumentRecord>, PipelineError>;

    async fn find_by_parent_ids(
        &self,
        parent_ids: &[String],
    ) -> Result<Vec<DocumentRecord>, PipelineError>;

    /// Records other than `excluded_id` referencing `blob_ref`; drives the
    /// catalog's reference-counted blob collection.
    async fn count_by_blob_ref_excluding(
        &self,
        blob_ref: &str,
        excluded_id: &str,
    ) -> Result<usize, PipelineError>;
}

/// Content-addressed blob storage. `delete` is idempotent; the same bytes
/// may back more than one document record.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        content: &[u8],
        filename: &str,
        content_type: &str,
    ) -> Result<String, PipelineError>;

    async fn get(&self, blob_ref: &str) -> Result<StoredBlob, PipelineError>;

    async fn exists(&self, blob_ref: &str) -> Result<bool, PipelineError>;

    async fn delete(&self, blob_ref: &str) -> Result<(), PipelineError>;
}

/// Final answer generation from an assembled prompt. Returns structured JSON
/// when the model produces it, otherwise `{"answer": <text>}`.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<serde_json::Value, PipelineError>;
}
