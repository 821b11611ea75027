use chrono::Utc;
use clap::{Parser, Subcommand};
use docbase_core::{
    AnswerGenerator, Chunker, ChunkingOptions, CollectionProfile, CollectionRouter,
    DocumentCatalog, DocumentIndex, DocumentPipeline, Embedder, FsBlobStore,
    GenerativeAnswerClient, HashingEmbedder, HttpOcr, JsonMetadataStore, QdrantIndex,
    RerankOptions, RetrievalConfig, RetrievalOptions, RetrievalPipeline, Reranker,
    TermOverlapEncoder, TextExtractor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docbase", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Directory holding the metadata store and blob store
    #[arg(long, env = "DOCBASE_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Embedding vector size
    #[arg(long, default_value = "384")]
    embedding_dimensions: usize,

    /// Flush threshold in tokens
    #[arg(long, env = "CHUNK_SIZE", default_value = "200")]
    chunk_size: usize,

    /// Tokens carried between consecutive chunks
    #[arg(long, env = "CHUNK_OVERLAP", default_value = "30")]
    chunk_overlap: usize,

    /// OCR endpoint for scanned PDFs
    #[arg(long, env = "OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// OCR endpoint bearer token
    #[arg(long, env = "OCR_API_KEY")]
    ocr_api_key: Option<String>,

    /// Answer-generation endpoint (generateContent-style)
    #[arg(long, env = "ANSWER_ENDPOINT")]
    answer_endpoint: Option<String>,

    /// Answer-generation API key
    #[arg(long, env = "ANSWER_API_KEY", default_value = "")]
    answer_api_key: String,

    /// Base URL substituted into answer prompts for download links
    #[arg(long, env = "BACKEND_BASE_URL", default_value = "http://localhost:8000")]
    base_url: String,
}

#[derive(Subcommand)]
enum Command {
    /// Manage vector-store collections.
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Ingest a document: extract, chunk, embed, index, and catalog it.
    Upload {
        /// Path of the .pdf or .txt file to ingest
        #[arg(long)]
        file: PathBuf,
        /// Target collection
        #[arg(long)]
        collection: String,
        /// Existing document id to version-update instead of creating
        #[arg(long)]
        update_id: Option<String>,
        /// Document id this upload belongs to (e.g. a contract amendment)
        #[arg(long)]
        parent_id: Option<String>,
    },
    /// Delete a document, its vectors, and (if unshared) its stored file.
    Delete {
        /// Catalog document id
        #[arg(long)]
        id: String,
        /// Collection the document was indexed in
        #[arg(long)]
        collection: String,
    },
    /// Fetch the stored file of a document version by content hash.
    Download {
        /// Version hash of the document
        #[arg(long)]
        hash: String,
        /// Where to write the file
        #[arg(long)]
        out: PathBuf,
    },
    /// Ask a question against the indexed collections.
    Ask {
        /// The question
        #[arg(long)]
        question: String,
        /// Search only these collections instead of routing automatically
        #[arg(long = "collection")]
        collections: Vec<String>,
        /// Expand context by page windows instead of whole documents
        #[arg(long, default_value_t = false)]
        limit_context: bool,
        /// JSON file with routing profiles: [{"name", "descriptions": [..]}]
        #[arg(long)]
        profiles: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CollectionAction {
    Create {
        #[arg(long)]
        name: String,
    },
    Delete {
        #[arg(long)]
        name: String,
    },
    List,
    Describe {
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    // every client handle is built once here and shared by reference
    let index: Arc<dyn DocumentIndex> = Arc::new(
        QdrantIndex::new(&cli.qdrant_url, cli.embedding_dimensions)
            .map_err(|error| anyhow::anyhow!(error.to_string()))?,
    );
    let metadata = JsonMetadataStore::open(cli.data_dir.join("documents.json"))
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let blobs = FsBlobStore::open(cli.data_dir.join("blobs"))
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let catalog = Arc::new(DocumentCatalog::new(Arc::new(metadata), Arc::new(blobs)));
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(cli.embedding_dimensions));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docbase boot"
    );

    match cli.command {
        Command::Collection { action } => match action {
            CollectionAction::Create { name } => {
                index
                    .create_collection(&name, embedder.dimensions())
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                println!("collection '{name}' created");
            }
            CollectionAction::Delete { name } => {
                index
                    .delete_collection(&name)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                println!("collection '{name}' deleted");
            }
            CollectionAction::List => {
                for name in index
                    .list_collections()
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?
                {
                    println!("{name}");
                }
            }
            CollectionAction::Describe { name } => {
                let info = index
                    .describe_collection(&name)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                println!(
                    "collection={} status={} points={}",
                    info.name, info.status, info.points_count
                );
            }
        },
        Command::Upload {
            file,
            collection,
            update_id,
            parent_id,
        } => {
            let filename = file
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow::anyhow!("path has no file name: {}", file.display()))?
                .to_string();
            let content = tokio::fs::read(&file).await?;

            let ocr: Option<Arc<dyn docbase_core::PageOcr>> = cli
                .ocr_endpoint
                .as_ref()
                .map(|endpoint| {
                    Arc::new(HttpOcr::new(endpoint, cli.ocr_api_key.clone()))
                        as Arc<dyn docbase_core::PageOcr>
                });

            let pipeline = DocumentPipeline::new(
                index,
                catalog,
                embedder,
                TextExtractor::new(ocr),
                Chunker::new(ChunkingOptions {
                    chunk_size: cli.chunk_size,
                    overlap: cli.chunk_overlap,
                })
                .map_err(|error| anyhow::anyhow!(error.to_string()))?,
            );

            let outcome = pipeline
                .upload(
                    &filename,
                    &collection,
                    &content,
                    update_id.as_deref(),
                    parent_id.as_deref(),
                )
                .await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Delete { id, collection } => {
            let pipeline = DocumentPipeline::new(
                index,
                catalog,
                embedder,
                TextExtractor::new(None),
                Chunker::new(ChunkingOptions::default())
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?,
            );
            let outcome = pipeline.delete(&id, &collection).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Download { hash, out } => {
            let (record, blob) = catalog
                .download_by_hash(&hash)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            tokio::fs::write(&out, &blob.content).await?;
            println!(
                "wrote {} ({} bytes, {}) to {}",
                record.original_filename,
                blob.content.len(),
                blob.content_type,
                out.display()
            );
        }
        Command::Ask {
            question,
            collections,
            limit_context,
            profiles,
        } => {
            let answerer: Arc<dyn AnswerGenerator> = match &cli.answer_endpoint {
                Some(endpoint) => Arc::new(
                    GenerativeAnswerClient::new(endpoint, &cli.answer_api_key)
                        .map_err(|error| anyhow::anyhow!(error.to_string()))?,
                ),
                None => anyhow::bail!("--answer-endpoint (or ANSWER_ENDPOINT) is required for ask"),
            };

            let routing_profiles =
                load_profiles(profiles.as_deref(), index.as_ref()).await?;
            let router = CollectionRouter::new(
                &routing_profiles,
                embedder.as_ref(),
                RetrievalOptions::default().routing_threshold,
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let pipeline = RetrievalPipeline::new(
                index,
                catalog,
                embedder,
                router,
                Reranker::new(Arc::new(TermOverlapEncoder), RerankOptions::default()),
                answerer,
                RetrievalConfig {
                    base_url: cli.base_url.clone(),
                    ..RetrievalConfig::default()
                },
            );

            let selected = if collections.is_empty() {
                None
            } else {
                Some(collections)
            };
            let outcome = pipeline.answer(&question, selected, limit_context).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}

/// Routing profiles come from a JSON file when given; otherwise every known
/// collection routes by its own name.
async fn load_profiles(
    path: Option<&Path>,
    index: &dyn DocumentIndex,
) -> anyhow::Result<Vec<CollectionProfile>> {
    if let Some(path) = path {
        let bytes = tokio::fs::read(path).await?;
        let profiles: Vec<CollectionProfile> = serde_json::from_slice(&bytes)?;
        return Ok(profiles);
    }

    let names = index
        .list_collections()
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    Ok(names
        .into_iter()
        .map(|name| CollectionProfile {
            descriptions: vec![name.clone()],
            name,
        })
        .collect())
}
