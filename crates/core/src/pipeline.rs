use crate::answer::{build_context, render_prompt, DEFAULT_PROMPT_TEMPLATE};
use crate::catalog::DocumentCatalog;
use crate::chunker::Chunker;
use crate::embeddings::Embedder;
use crate::error::{ExtractError, PipelineError};
use crate::expand::{ContextExpander, ExpansionStrategy};
use crate::extract::TextExtractor;
use crate::models::{
    AnswerOutcome, DeleteOutcome, DocumentRecord, RetrievalOptions, StoredBlob, UploadOutcome,
};
use crate::rerank::Reranker;
use crate::router::CollectionRouter;
use crate::traits::{AnswerGenerator, DocumentIndex};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempPath;
use tracing::info;
use uuid::Uuid;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt"];

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Ingestion flow: extract, chunk, embed, index, then create or update the
/// catalog record. Handles are shared, effectively immutable after
/// construction, and safe across concurrent requests.
pub struct DocumentPipeline {
    index: Arc<dyn DocumentIndex>,
    catalog: Arc<DocumentCatalog>,
    embedder: Arc<dyn Embedder>,
    extractor: TextExtractor,
    chunker: Chunker,
}

impl DocumentPipeline {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        catalog: Arc<DocumentCatalog>,
        embedder: Arc<dyn Embedder>,
        extractor: TextExtractor,
        chunker: Chunker,
    ) -> Self {
        Self {
            index,
            catalog,
            embedder,
            extractor,
            chunker,
        }
    }

    /// Outcome-shaped `try_upload`: failures become unsuccessful outcomes so
    /// callers never have to catch.
    pub async fn upload(
        &self,
        filename: &str,
        collection: &str,
        content: &[u8],
        update_id: Option<&str>,
        parent_id: Option<&str>,
    ) -> UploadOutcome {
        match self
            .try_upload(filename, collection, content, update_id, parent_id)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => UploadOutcome::failure(error.to_string()),
        }
    }

    pub async fn try_upload(
        &self,
        filename: &str,
        collection: &str,
        content: &[u8],
        update_id: Option<&str>,
        parent_id: Option<&str>,
    ) -> Result<UploadOutcome, PipelineError> {
        if collection.trim().is_empty() {
            return Err(PipelineError::Validation(
                "collection name must not be empty".to_string(),
            ));
        }
        if !self.index.collection_exists(collection).await? {
            return Err(PipelineError::NotFound(format!(
                "collection '{collection}'"
            )));
        }
        let extension = supported_extension(filename)?;

        let document_hash = content_hash(content);
        if self
            .index
            .exists_for_hash(collection, &document_hash)
            .await?
        {
            return Err(PipelineError::Conflict(format!(
                "document with hash {document_hash} already indexed in '{collection}'"
            )));
        }
        if let Some(id) = update_id {
            self.catalog.find_by_id(id).await?;
        }
        if let Some(id) = parent_id {
            self.catalog.find_by_id(id).await?;
        }

        // the spool exists for the extraction only; the temp path unlinks on
        // every exit, handled failure and panic included
        let pages = {
            let spool = spool_upload(filename, content)?;
            self.extractor.extract_file(&spool, extension)?
        };

        let chunks = match self.chunker.chunk(&pages, &document_hash, filename) {
            Ok(chunks) => chunks,
            Err(ExtractError::NoText(_)) => {
                return Ok(UploadOutcome::failure(format!(
                    "no text could be extracted from '{filename}'"
                )));
            }
            Err(error) => return Err(error.into()),
        };
        info!(filename, chunk_count = chunks.len(), "indexing document");

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts);
        self.index
            .index_chunks(collection, &chunks, &vectors)
            .await?;

        if let Some(id) = update_id {
            let previous = self.catalog.find_by_id(id).await?;
            // the replaced version's vectors go before the catalog moves on
            self.index
                .delete_by_document_hash(collection, &previous.active_version_hash)
                .await?;
            self.catalog
                .update_document(id, &document_hash, filename, content)
                .await?;

            Ok(UploadOutcome {
                success: true,
                message: "document updated".to_string(),
                document_id: Some(id.to_string()),
                version_hash: Some(document_hash),
            })
        } else {
            let document_id = self
                .catalog
                .create_document(
                    filename,
                    collection,
                    &document_hash,
                    content,
                    parent_id.map(str::to_string),
                )
                .await?;

            Ok(UploadOutcome {
                success: true,
                message: "document created and indexed".to_string(),
                document_id: Some(document_id),
                version_hash: Some(document_hash),
            })
        }
    }

    pub async fn delete(&self, id: &str, collection: &str) -> DeleteOutcome {
        match self.try_delete(id, collection).await {
            Ok(outcome) => outcome,
            Err(error) => DeleteOutcome {
                success: false,
                message: error.to_string(),
            },
        }
    }

    pub async fn try_delete(
        &self,
        id: &str,
        collection: &str,
    ) -> Result<DeleteOutcome, PipelineError> {
        if id.trim().is_empty() {
            return Err(PipelineError::Validation(
                "document id must not be empty".to_string(),
            ));
        }
        if collection.trim().is_empty() {
            return Err(PipelineError::Validation(
                "collection name must not be empty".to_string(),
            ));
        }
        if !self.index.collection_exists(collection).await? {
            return Err(PipelineError::NotFound(format!(
                "collection '{collection}'"
            )));
        }

        let record = self.catalog.find_by_id(id).await?;
        self.index
            .delete_by_document_hash(collection, &record.active_version_hash)
            .await?;
        self.catalog.delete_document(id).await?;

        Ok(DeleteOutcome {
            success: true,
            message: format!("document '{id}' deleted"),
        })
    }

    pub async fn download(
        &self,
        document_hash: &str,
    ) -> Result<(DocumentRecord, StoredBlob), PipelineError> {
        self.catalog.download_by_hash(document_hash).await
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub options: RetrievalOptions,
    pub prompt_template: String,
    pub base_url: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            options: RetrievalOptions::default(),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            base_url: "http://localhost:8000".to_string(),
        }
    }
}

/// Query flow: embed the question, route collections, search, expand,
/// re-rank, and hand the assembled prompt to the answer model.
pub struct RetrievalPipeline {
    index: Arc<dyn DocumentIndex>,
    embedder: Arc<dyn Embedder>,
    router: CollectionRouter,
    expander: ContextExpander,
    reranker: Reranker,
    answerer: Arc<dyn AnswerGenerator>,
    config: RetrievalConfig,
}

impl RetrievalPipeline {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        catalog: Arc<DocumentCatalog>,
        embedder: Arc<dyn Embedder>,
        router: CollectionRouter,
        reranker: Reranker,
        answerer: Arc<dyn AnswerGenerator>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            expander: ContextExpander::new(index.clone(), catalog),
            index,
            embedder,
            router,
            reranker,
            answerer,
            config,
        }
    }

    pub async fn answer(
        &self,
        question: &str,
        collections: Option<Vec<String>>,
        limit_context: bool,
    ) -> AnswerOutcome {
        match self.try_answer(question, collections, limit_context).await {
            Ok(outcome) => outcome,
            Err(error) => AnswerOutcome::failure(error.to_string()),
        }
    }

    pub async fn try_answer(
        &self,
        question: &str,
        collections: Option<Vec<String>>,
        limit_context: bool,
    ) -> Result<AnswerOutcome, PipelineError> {
        if question.trim().is_empty() {
            return Err(PipelineError::Validation(
                "question must not be empty".to_string(),
            ));
        }

        let question_vector = self.embedder.embed(question);
        let relevant = match collections {
            Some(explicit) if !explicit.is_empty() => explicit,
            _ => self.router.select_collections(&question_vector),
        };
        info!(collections = ?relevant, "searching collections");

        let initial = self
            .index
            .search_question(
                &question_vector,
                self.config.options.top_k,
                &relevant,
                self.config.options.score_threshold,
            )
            .await?;
        if initial.is_empty() {
            return Ok(AnswerOutcome::failure(
                "no documents matched the question",
            ));
        }

        let strategy = if limit_context {
            ExpansionStrategy::PageWindow {
                margin: self.config.options.window_margin,
            }
        } else {
            ExpansionStrategy::WholeDocument
        };
        let expanded = self.expander.expand(strategy, &initial, &relevant).await?;
        if expanded.is_empty() {
            return Ok(AnswerOutcome::failure(
                "could not assemble an expanded context for the answer",
            ));
        }

        let reranked = self.reranker.rerank(question, &expanded);
        if reranked.values().all(|chunks| chunks.is_empty()) {
            return Ok(AnswerOutcome::failure(
                "no chunk was relevant enough after re-ranking",
            ));
        }

        let context = build_context(&reranked);
        let prompt = render_prompt(
            &self.config.prompt_template,
            &context,
            question,
            &self.config.base_url,
        );
        let answer = self.answerer.generate(&prompt).await?;

        Ok(AnswerOutcome {
            success: true,
            message: "answer generated".to_string(),
            answer: Some(answer),
        })
    }
}

fn supported_extension(filename: &str) -> Result<&str, PipelineError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|extension| extension.to_str())
        .ok_or_else(|| {
            PipelineError::Validation(format!("file '{filename}' has no extension"))
        })?;

    if !SUPPORTED_EXTENSIONS
        .iter()
        .any(|supported| extension.eq_ignore_ascii_case(supported))
    {
        return Err(PipelineError::Validation(format!(
            "unsupported file extension '{extension}'"
        )));
    }
    Ok(extension)
}

/// Writes an upload to a uniquely named temp file for the extraction step.
fn spool_upload(filename: &str, content: &[u8]) -> Result<TempPath, PipelineError> {
    let safe_name: String = filename
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_') {
                character
            } else {
                '_'
            }
        })
        .collect();

    let mut file = tempfile::Builder::new()
        .prefix(&format!("upload-{}-", Uuid::new_v4()))
        .suffix(&format!("-{safe_name}"))
        .tempfile()?;
    file.write_all(content)?;
    file.flush()?;
    Ok(file.into_temp_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::models::{Chunk, ChunksByDocument, CollectionInfo, CollectionProfile, RerankOptions, ScoredChunk};
    use crate::rerank::TermOverlapEncoder;
    use crate::stores::{FsBlobStore, JsonMetadataStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// In-memory vector index tracking chunks per (collection, hash).
    #[derive(Default)]
    struct MemoryIndex {
        chunks: Mutex<HashMap<String, Vec<Chunk>>>,
    }

    impl MemoryIndex {
        fn key(collection: &str, hash: &str) -> String {
            format!("{collection}/{hash}")
        }

        fn scored(chunk: &Chunk, score: f32) -> ScoredChunk {
            ScoredChunk {
                text: chunk.text.clone(),
                document_hash: chunk.document_hash.clone(),
                filename: chunk.filename.clone(),
                chunk_index: chunk.chunk_index,
                page: chunk.page,
                score,
            }
        }
    }

    #[async_trait]
    impl DocumentIndex for MemoryIndex {
        async fn collection_exists(&self, _collection: &str) -> Result<bool, PipelineError> {
            Ok(true)
        }

        async fn create_collection(
            &self,
            _collection: &str,
            _vector_size: usize,
        ) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn delete_collection(&self, _collection: &str) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn describe_collection(
            &self,
            collection: &str,
        ) -> Result<CollectionInfo, PipelineError> {
            Ok(CollectionInfo {
                name: collection.to_string(),
                status: "green".to_string(),
                points_count: 0,
            })
        }

        async fn list_collections(&self) -> Result<Vec<String>, PipelineError> {
            Ok(Vec::new())
        }

        async fn index_chunks(
            &self,
            collection: &str,
            chunks: &[Chunk],
            vectors: &[Vec<f32>],
        ) -> Result<(), PipelineError> {
            assert_eq!(chunks.len(), vectors.len());
            let mut store = self.chunks.lock().expect("lock");
            for chunk in chunks {
                store
                    .entry(Self::key(collection, &chunk.document_hash))
                    .or_default()
                    .push(chunk.clone());
            }
            Ok(())
        }

        async fn delete_by_document_hash(
            &self,
            collection: &str,
            document_hash: &str,
        ) -> Result<bool, PipelineError> {
            let mut store = self.chunks.lock().expect("lock");
            Ok(store.remove(&Self::key(collection, document_hash)).is_some())
        }

        async fn exists_for_hash(
            &self,
            collection: &str,
            document_hash: &str,
        ) -> Result<bool, PipelineError> {
            let store = self.chunks.lock().expect("lock");
            Ok(store.contains_key(&Self::key(collection, document_hash)))
        }

        async fn search_question(
            &self,
            _question_vector: &[f32],
            top_k: usize,
            collections: &[String],
            _score_threshold: f32,
        ) -> Result<ChunksByDocument, PipelineError> {
            let store = self.chunks.lock().expect("lock");
            let mut grouped = ChunksByDocument::new();
            for (key, chunks) in store.iter() {
                let in_scope = collections
                    .iter()
                    .any(|collection| key.starts_with(&format!("{collection}/")));
                if !in_scope {
                    continue;
                }
                for chunk in chunks.iter().take(top_k) {
                    grouped
                        .entry(chunk.document_hash.clone())
                        .or_default()
                        .push(Self::scored(chunk, 0.9));
                }
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
            let store = self.chunks.lock().expect("lock");
            Ok(store
                .get(&Self::key(collection, document_hash))
                .map(|chunks| {
                    chunks
                        .iter()
                        .filter(|chunk| chunk.page >= min_page && chunk.page <= max_page)
                        .map(|chunk| Self::scored(chunk, 1.0))
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn chunks_for_hashes(
            &self,
            collection: &str,
            document_hashes: &[String],
        ) -> Result<ChunksByDocument, PipelineError> {
            let store = self.chunks.lock().expect("lock");
            let mut grouped = ChunksByDocument::new();
            for hash in document_hashes {
                if let Some(chunks) = store.get(&Self::key(collection, hash)) {
                    grouped.insert(
                        hash.clone(),
                        chunks.iter().map(|chunk| Self::scored(chunk, 1.0)).collect(),
                    );
                }
            }
            Ok(grouped)
        }
    }

    struct CannedAnswerer;

    #[async_trait]
    impl AnswerGenerator for CannedAnswerer {
        async fn generate(&self, prompt: &str) -> Result<serde_json::Value, PipelineError> {
            assert!(prompt.contains("### Document:"));
            Ok(json!({ "answer": "grounded answer" }))
        }
    }

    struct Fixture {
        index: Arc<MemoryIndex>,
        catalog: Arc<DocumentCatalog>,
        documents: DocumentPipeline,
    }

    async fn fixture(dir: &std::path::Path) -> Fixture {
        let index = Arc::new(MemoryIndex::default());
        let metadata = JsonMetadataStore::open(dir.join("documents.json"))
            .await
            .expect("metadata store");
        let blobs = FsBlobStore::open(dir.join("blobs")).await.expect("blobs");
        let catalog = Arc::new(DocumentCatalog::new(Arc::new(metadata), Arc::new(blobs)));
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));

        let documents = DocumentPipeline::new(
            index.clone(),
            catalog.clone(),
            embedder,
            TextExtractor::new(None),
            Chunker::new(Default::default()).expect("chunker"),
        );

        Fixture {
            index,
            catalog,
            documents,
        }
    }

    fn retrieval(fixture: &Fixture) -> RetrievalPipeline {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
        let profiles = vec![CollectionProfile {
            name: "notes".to_string(),
            descriptions: vec!["internship rules and deadlines".to_string()],
        }];
        let router = CollectionRouter::new(&profiles, embedder.as_ref(), 0.3).expect("router");
        let reranker = Reranker::new(
            Arc::new(TermOverlapEncoder),
            RerankOptions {
                score_threshold: 0.0,
                max_chunks: 10,
            },
        );

        RetrievalPipeline::new(
            fixture.index.clone(),
            fixture.catalog.clone(),
            embedder,
            router,
            reranker,
            Arc::new(CannedAnswerer),
            RetrievalConfig::default(),
        )
    }

    const NOTE: &[u8] =
        b"The internship report deadline is the last business day of November. \
          Late submissions require a written justification from the supervisor.";

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_indexes_chunks_and_creates_a_record() {
        let dir = tempdir().expect("tempdir");
        let fixture = fixture(dir.path()).await;

        let outcome = fixture
            .documents
            .upload("notes.txt", "notes", NOTE, None, None)
            .await;
        assert!(outcome.success, "{}", outcome.message);

        let hash = outcome.version_hash.expect("hash");
        assert!(fixture
            .index
            .exists_for_hash("notes", &hash)
            .await
            .expect("exists"));

        let id = outcome.document_id.expect("id");
        let record = fixture.catalog.find_by_id(&id).await.expect("record");
        assert_eq!(record.active_version_hash, hash);
        assert_eq!(record.collection_name, "notes");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_content_is_a_conflict() {
        let dir = tempdir().expect("tempdir");
        let fixture = fixture(dir.path()).await;

        let first = fixture
            .documents
            .upload("notes.txt", "notes", NOTE, None, None)
            .await;
        assert!(first.success);

        let second = fixture
            .documents
            .try_upload("again.txt", "notes", NOTE, None, None)
            .await;
        assert!(matches!(second, Err(PipelineError::Conflict(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unsupported_extensions_fail_validation() {
        let dir = tempdir().expect("tempdir");
        let fixture = fixture(dir.path()).await;

        let result = fixture
            .documents
            .try_upload("notes.docx", "notes", NOTE, None, None)
            .await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn whitespace_only_uploads_report_no_text() {
        let dir = tempdir().expect("tempdir");
        let fixture = fixture(dir.path()).await;

        let outcome = fixture
            .documents
            .upload("blank.txt", "notes", b"   \n  \n", None, None)
            .await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("no text"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_purges_the_old_version() {
        let dir = tempdir().expect("tempdir");
        let fixture = fixture(dir.path()).await;

        let first = fixture
            .documents
            .upload("v1.txt", "notes", NOTE, None, None)
            .await;
        let id = first.document_id.expect("id");
        let old_hash = first.version_hash.expect("hash");

        let second = fixture
            .documents
            .upload(
                "v2.txt",
                "notes",
                b"A fully revised second version of the internship notes.",
                Some(&id),
                None,
            )
            .await;
        assert!(second.success, "{}", second.message);
        let new_hash = second.version_hash.expect("hash");

        assert!(!fixture
            .index
            .exists_for_hash("notes", &old_hash)
            .await
            .expect("exists"));
        assert!(fixture
            .index
            .exists_for_hash("notes", &new_hash)
            .await
            .expect("exists"));

        let record = fixture.catalog.find_by_id(&id).await.expect("record");
        assert_eq!(record.active_version_hash, new_hash);
        assert_eq!(record.original_filename, "v2.txt");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_removes_vectors_and_record() {
        let dir = tempdir().expect("tempdir");
        let fixture = fixture(dir.path()).await;

        let outcome = fixture
            .documents
            .upload("notes.txt", "notes", NOTE, None, None)
            .await;
        let id = outcome.document_id.expect("id");
        let hash = outcome.version_hash.expect("hash");

        let deleted = fixture.documents.delete(&id, "notes").await;
        assert!(deleted.success, "{}", deleted.message);

        assert!(!fixture
            .index
            .exists_for_hash("notes", &hash)
            .await
            .expect("exists"));
        assert!(matches!(
            fixture.catalog.find_by_id(&id).await,
            Err(PipelineError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn question_flow_produces_a_grounded_answer() {
        let dir = tempdir().expect("tempdir");
        let fixture = fixture(dir.path()).await;

        let outcome = fixture
            .documents
            .upload("notes.txt", "notes", NOTE, None, None)
            .await;
        assert!(outcome.success);

        let retrieval = retrieval(&fixture);
        let answer = retrieval
            .answer(
                "When is the internship report deadline?",
                Some(vec!["notes".to_string()]),
                false,
            )
            .await;
        assert!(answer.success, "{}", answer.message);
        assert_eq!(
            answer.answer.expect("answer")["answer"],
            "grounded answer"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn question_with_no_hits_fails_softly() {
        let dir = tempdir().expect("tempdir");
        let fixture = fixture(dir.path()).await;
        let retrieval = retrieval(&fixture);

        let answer = retrieval
            .answer("anything at all", Some(vec!["notes".to_string()]), false)
            .await;
        assert!(!answer.success);
        assert!(answer.message.contains("no documents matched"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn limited_context_uses_the_page_window() {
        let dir = tempdir().expect("tempdir");
        let fixture = fixture(dir.path()).await;

        let outcome = fixture
            .documents
            .upload("notes.txt", "notes", NOTE, None, None)
            .await;
        assert!(outcome.success);

        let retrieval = retrieval(&fixture);
        let answer = retrieval
            .answer(
                "When is the internship report deadline?",
                Some(vec!["notes".to_string()]),
                true,
            )
            .await;
        assert!(answer.success, "{}", answer.message);
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(supported_extension("a.PDF").is_ok());
        assert!(supported_extension("a.txt").is_ok());
        assert!(supported_extension("a").is_err());
        assert!(supported_extension("a.docx").is_err());
    }
}
