use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One indexable unit of extracted text. `page` is the page that was being
/// processed when the chunk was flushed, which for a chunk straddling a page
/// boundary is the later of the pages it draws from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub document_hash: String,
    pub filename: String,
    pub chunk_index: u64,
    pub page: u32,
}

/// A chunk as it comes back from the vector index. Window and whole-document
/// fetches carry a synthetic score of 1.0; similarity hits carry the real one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub text: String,
    pub document_hash: String,
    pub filename: String,
    pub chunk_index: u64,
    pub page: u32,
    pub score: f32,
}

/// Retrieval results grouped by document hash.
pub type ChunksByDocument = HashMap<String, Vec<ScoredChunk>>;

/// Catalog record for one logical document. `id` is store-assigned and stable
/// across version updates; `active_version_hash` is the content hash of the
/// currently indexed version and the join key into the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub original_filename: String,
    pub collection_name: String,
    pub active_version_hash: String,
    pub blob_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub parent_id: Option<String>,
}

/// Insert payload for the metadata store; the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocumentRecord {
    pub original_filename: String,
    pub collection_name: String,
    pub active_version_hash: String,
    pub blob_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub parent_id: Option<String>,
}

/// Raw bytes returned from the blob store together with the metadata declared
/// when they were stored.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub content: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

/// A named collection plus the fixed description strings the router scores
/// questions against. Routing data only, never stored per document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionProfile {
    pub name: String,
    pub descriptions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub status: String,
    pub points_count: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingOptions {
    /// Flush threshold in whitespace tokens.
    pub chunk_size: usize,
    /// Tokens carried from one chunk into the next.
    pub overlap: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            overlap: 30,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    /// Per-collection cap on initial similarity hits.
    pub top_k: usize,
    /// Similarity floor for initial hits.
    pub score_threshold: f32,
    /// Cosine floor for collection routing.
    pub routing_threshold: f32,
    /// Half-width of the page window used by limited-context expansion.
    pub window_margin: u32,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            score_threshold: 0.4,
            routing_threshold: 0.35,
            window_margin: 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RerankOptions {
    /// Cross-encoder score floor.
    pub score_threshold: f32,
    /// Global cap on surviving chunks.
    pub max_chunks: usize,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.25,
            max_chunks: 20,
        }
    }
}

/// Outcome of a document ingest, in the shape an HTTP boundary can map to a
/// status code without inspecting error types.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub success: bool,
    pub message: String,
    pub document_id: Option<String>,
    pub version_hash: Option<String>,
}

impl UploadOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            document_id: None,
            version_hash: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerOutcome {
    pub success: bool,
    pub message: String,
    pub answer: Option<serde_json::Value>,
}

impl AnswerOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            answer: None,
        }
    }
}
