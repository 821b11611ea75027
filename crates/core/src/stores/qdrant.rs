use crate::error::PipelineError;
use crate::models::{Chunk, ChunksByDocument, CollectionInfo, ScoredChunk};
use crate::traits::DocumentIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

/// Filtered scans page through at most this many points per call; chunks of
/// a pathologically large document beyond the cap are silently truncated.
const SCROLL_PAGE_LIMIT: usize = 1000;

/// Vector-index adapter speaking the Qdrant REST API.
pub struct QdrantIndex {
    endpoint: String,
    client: Client,
    vector_size: usize,
}

impl QdrantIndex {
    pub fn new(endpoint: impl Into<String>, vector_size: usize) -> Result<Self, PipelineError> {
        let endpoint = endpoint.into();
        Url::parse(&endpoint)?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: Client::new(),
            vector_size,
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}", self.endpoint, collection)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Value,
        limit: usize,
    ) -> Result<Vec<Value>, PipelineError> {
        let response = self
            .client
            .post(format!("{}/points/scroll", self.collection_url(collection)))
            .json(&json!({
                "filter": filter,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result/points")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl DocumentIndex for QdrantIndex {
    async fn collection_exists(&self, collection: &str) -> Result<bool, PipelineError> {
        let response = self
            .client
            .get(self.collection_url(collection))
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(true);
        }
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Err(backend_error(response.status()))
    }

    async fn create_collection(
        &self,
        collection: &str,
        vector_size: usize,
    ) -> Result<(), PipelineError> {
        if vector_size != self.vector_size {
            return Err(PipelineError::Validation(format!(
                "configured vector size {} does not match requested {}",
                self.vector_size, vector_size
            )));
        }
        if self.collection_exists(collection).await? {
            return Err(PipelineError::Conflict(format!(
                "collection '{collection}' already exists"
            )));
        }

        let response = self
            .client
            .put(self.collection_url(collection))
            .json(&json!({
                "vectors": { "size": vector_size, "distance": "Cosine" },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), PipelineError> {
        let response = self
            .client
            .delete(self.collection_url(collection))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(PipelineError::NotFound(format!(
                "collection '{collection}'"
            )));
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }

    async fn describe_collection(&self, collection: &str) -> Result<CollectionInfo, PipelineError> {
        let response = self
            .client
            .get(self.collection_url(collection))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(PipelineError::NotFound(format!(
                "collection '{collection}'"
            )));
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(CollectionInfo {
            name: collection.to_string(),
            status: parsed
                .pointer("/result/status")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            points_count: parsed
                .pointer("/result/points_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        })
    }

    async fn list_collections(&self) -> Result<Vec<String>, PipelineError> {
        let response = self
            .client
            .get(format!("{}/collections", self.endpoint))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        let names = parsed
            .pointer("/result/collections")
            .and_then(Value::as_array)
            .map(|collections| {
                collections
                    .iter()
                    .filter_map(|entry| entry.pointer("/name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    async fn index_chunks(
        &self,
        collection: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<(), PipelineError> {
        if chunks.len() != vectors.len() {
            return Err(PipelineError::Validation(format!(
                "vector count {} doesn't match chunk count {}",
                vectors.len(),
                chunks.len()
            )));
        }

        let points = chunks
            .iter()
            .zip(vectors.iter())
            .map(|(chunk, vector)| {
                if vector.len() != self.vector_size {
                    return Err(PipelineError::Validation(format!(
                        "embedding dimension {} != {}",
                        vector.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": vector,
                    "payload": {
                        "text": chunk.text,
                        "doc_id": chunk.document_hash,
                        "filename": chunk.filename,
                        "chunk_id": chunk.chunk_index,
                        "page": chunk.page,
                    },
                }))
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!(
                "{}/points?wait=true",
                self.collection_url(collection)
            ))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }

    async fn delete_by_document_hash(
        &self,
        collection: &str,
        document_hash: &str,
    ) -> Result<bool, PipelineError> {
        let probe = self
            .scroll(collection, document_filter(document_hash), 1)
            .await?;
        if probe.is_empty() {
            return Ok(false);
        }

        let response = self
            .client
            .post(format!(
                "{}/points/delete?wait=true",
                self.collection_url(collection)
            ))
            .json(&json!({ "filter": document_filter(document_hash) }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(true)
    }

    async fn exists_for_hash(
        &self,
        collection: &str,
        document_hash: &str,
    ) -> Result<bool, PipelineError> {
        let probe = self
            .scroll(collection, document_filter(document_hash), 1)
            .await?;
        Ok(!probe.is_empty())
    }

    async fn search_question(
        &self,
        question_vector: &[f32],
        top_k: usize,
        collections: &[String],
        score_threshold: f32,
    ) -> Result<ChunksByDocument, PipelineError> {
        if question_vector.len() != self.vector_size {
            return Err(PipelineError::Validation(format!(
                "query vector dim {} is not {}",
                question_vector.len(),
                self.vector_size
            )));
        }

        let mut grouped = ChunksByDocument::new();
        for collection in collections {
            let response = self
                .client
                .post(format!("{}/points/search", self.collection_url(collection)))
                .json(&json!({
                    "vector": question_vector,
                    "limit": top_k,
                    "with_payload": true,
                    "score_threshold": score_threshold,
                }))
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(backend_error(response.status()));
            }

            let parsed: Value = response.json().await?;
            let hits = parsed
                .pointer("/result")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for hit in hits {
                let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
                if score < score_threshold {
                    continue;
                }
                let chunk = chunk_from_payload(hit.pointer("/payload"), score);
                grouped
                    .entry(chunk.document_hash.clone())
                    .or_default()
                    .push(chunk);
            }
        }

        for chunks in grouped.values_mut() {
            chunks.sort_by(|left, right| right.score.total_cmp(&left.score));
        }
        Ok(grouped)
    }

    async fn chunks_in_page_window(
        &self,
        collection: &str,
        document_hash: &str,
        min_page: u32,
        max_page: u32,
    ) -> Result<Vec<ScoredChunk>, PipelineError> {
        let min_page = min_page.max(1);
        let filter = json!({
            "must": [
                { "key": "doc_id", "match": { "value": document_hash } },
                { "key": "page", "range": { "gte": min_page, "lte": max_page } },
            ]
        });

        let points = self.scroll(collection, filter, SCROLL_PAGE_LIMIT).await?;
        Ok(points
            .iter()
            .map(|point| chunk_from_payload(point.pointer("/payload"), 1.0))
            .collect())
    }

    async fn chunks_for_hashes(
        &self,
        collection: &str,
        document_hashes: &[String],
    ) -> Result<ChunksByDocument, PipelineError> {
        if document_hashes.is_empty() {
            return Ok(ChunksByDocument::new());
        }

        let filter = json!({
            "must": [
                { "key": "doc_id", "match": { "any": document_hashes } },
            ]
        });

        let points = self.scroll(collection, filter, SCROLL_PAGE_LIMIT).await?;
        let mut grouped = ChunksByDocument::new();
        for point in points {
            let chunk = chunk_from_payload(point.pointer("/payload"), 1.0);
            grouped
                .entry(chunk.document_hash.clone())
                .or_default()
                .push(chunk);
        }
        Ok(grouped)
    }
}

fn backend_error(status: StatusCode) -> PipelineError {
    PipelineError::Store {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

fn document_filter(document_hash: &str) -> Value {
    json!({
        "must": [
            { "key": "doc_id", "match": { "value": document_hash } },
        ]
    })
}

fn chunk_from_payload(payload: Option<&Value>, score: f32) -> ScoredChunk {
    let payload = payload.cloned().unwrap_or(Value::Null);
    ScoredChunk {
        text: payload
            .pointer("/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        document_hash: payload
            .pointer("/doc_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        filename: payload
            .pointer("/filename")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        chunk_index: payload
            .pointer("/chunk_id")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        page: payload.pointer("/page").and_then(Value::as_u64).unwrap_or(0) as u32,
        score,
    }
}
