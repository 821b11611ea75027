pub mod answer;
pub mod catalog;
pub mod chunker;
pub mod embeddings;
pub mod error;
pub mod expand;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod rerank;
pub mod router;
pub mod stores;
pub mod traits;

pub use answer::{build_context, render_prompt, GenerativeAnswerClient, DEFAULT_PROMPT_TEMPLATE};
pub use catalog::DocumentCatalog;
pub use chunker::{split_sentences, ChunkLanguage, Chunker};
pub use embeddings::{Embedder, HashingEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ExtractError, PipelineError};
pub use expand::{ContextExpander, ExpansionStrategy};
pub use extract::{identify_headers_footers, HttpOcr, PageFilter, PageOcr, PageText, TextExtractor};
pub use models::{
    AnswerOutcome, Chunk, ChunkingOptions, ChunksByDocument, CollectionInfo, CollectionProfile,
    DeleteOutcome, DocumentRecord, NewDocumentRecord, RerankOptions, RetrievalOptions,
    ScoredChunk, StoredBlob, UploadOutcome,
};
pub use pipeline::{
    content_hash, DocumentPipeline, RetrievalConfig, RetrievalPipeline, SUPPORTED_EXTENSIONS,
};
pub use rerank::{CrossEncoder, Reranker, TermOverlapEncoder};
pub use router::{cosine_similarity, CollectionRouter};
pub use stores::{FsBlobStore, JsonMetadataStore, QdrantIndex};
pub use traits::{AnswerGenerator, BlobStore, DocumentIndex, MetadataStore};
