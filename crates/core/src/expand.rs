use crate::catalog::DocumentCatalog;
use crate::error::PipelineError;
use crate::models::ChunksByDocument;
use crate::traits::DocumentIndex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// How an initial similarity hit-set grows into an answerable context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionStrategy {
    /// Fetch every chunk within `margin` pages of the matched pages,
    /// per document.
    PageWindow { margin: u32 },
    /// Fetch every chunk of the matched documents and their one-hop
    /// relatives.
    WholeDocument,
}

/// Grows an initial hit-set by consulting the vector index and the catalog.
pub struct ContextExpander {
    index: Arc<dyn DocumentIndex>,
    catalog: Arc<DocumentCatalog>,
}

struct MatchedWindow {
    min_page: u32,
    max_page: u32,
    collection: Option<String>,
}

impl ContextExpander {
    pub fn new(index: Arc<dyn DocumentIndex>, catalog: Arc<DocumentCatalog>) -> Self {
        Self { index, catalog }
    }

    pub async fn expand(
        &self,
        strategy: ExpansionStrategy,
        initial: &ChunksByDocument,
        collections: &[String],
    ) -> Result<ChunksByDocument, PipelineError> {
        match strategy {
            ExpansionStrategy::PageWindow { margin } => {
                self.expand_page_window(initial, collections, margin).await
            }
            ExpansionStrategy::WholeDocument => {
                self.expand_whole_document(initial, collections).await
            }
        }
    }

    async fn expand_page_window(
        &self,
        initial: &ChunksByDocument,
        collections: &[String],
        margin: u32,
    ) -> Result<ChunksByDocument, PipelineError> {
        let mut windows: HashMap<String, MatchedWindow> = HashMap::new();
        for (document_hash, chunks) in initial {
            let pages = chunks.iter().map(|chunk| chunk.page);
            let Some(min_page) = pages.clone().min() else {
                continue;
            };
            let max_page = pages.max().unwrap_or(min_page);
            windows.insert(
                document_hash.clone(),
                MatchedWindow {
                    min_page,
                    max_page,
                    collection: None,
                },
            );
        }

        if let [only] = collections {
            for window in windows.values_mut() {
                window.collection = Some(only.clone());
            }
        } else {
            // hits span collections; resolve each hash's owner through the
            // catalog before the window fetch
            let hashes: Vec<String> = windows.keys().cloned().collect();
            for collection in collections {
                for record in self.catalog.find_by_hashes(collection, &hashes).await? {
                    if let Some(window) = windows.get_mut(&record.active_version_hash) {
                        window.collection = Some(collection.clone());
                    }
                }
            }
        }

        let mut expanded = ChunksByDocument::new();
        for (document_hash, window) in &windows {
            let Some(collection) = &window.collection else {
                continue;
            };
            let min_page = window.min_page.saturating_sub(margin).max(1);
            let max_page = window.max_page + margin;
            info!(%document_hash, min_page, max_page, "fetching page window");

            let chunks = self
                .index
                .chunks_in_page_window(collection, document_hash, min_page, max_page)
                .await?;
            for chunk in chunks {
                expanded
                    .entry(chunk.document_hash.clone())
                    .or_default()
                    .push(chunk);
            }
        }
        Ok(expanded)
    }

    async fn expand_whole_document(
        &self,
        initial: &ChunksByDocument,
        collections: &[String],
    ) -> Result<ChunksByDocument, PipelineError> {
        let initial_hashes: Vec<String> = initial.keys().cloned().collect();

        let mut records = Vec::new();
        for collection in collections {
            records.extend(self.catalog.find_by_hashes(collection, &initial_hashes).await?);
        }
        if records.is_empty() {
            return Err(PipelineError::SyncDivergence(
                "vector hits reference documents missing from the catalog".to_string(),
            ));
        }

        let ids: Vec<String> = records.iter().map(|record| record.id.clone()).collect();
        let related = self.catalog.find_related_documents(&ids).await?;
        info!(
            matched = ids.len(),
            related = related.len(),
            "expanding to related documents"
        );

        let mut hashes_by_collection: HashMap<String, Vec<String>> = HashMap::new();
        for record in related {
            hashes_by_collection
                .entry(record.collection_name)
                .or_default()
                .push(record.active_version_hash);
        }

        let mut expanded = ChunksByDocument::new();
        for (collection, hashes) in &hashes_by_collection {
            let grouped = self.index.chunks_for_hashes(collection, hashes).await?;
            expanded.extend(grouped);
        }
        Ok(expanded)
    }
}
