use crate::models::{ChunksByDocument, RerankOptions};
use std::collections::HashSet;
use std::sync::Arc;

/// (question, passage) -> relevance provider, batchable over passages.
pub trait CrossEncoder: Send + Sync {
    fn score(&self, question: &str, text: &str) -> f32;

    fn score_batch(&self, question: &str, texts: &[String]) -> Vec<f32> {
        texts.iter().map(|text| self.score(question, text)).collect()
    }
}

/// Deterministic lexical scorer: the fraction of distinct question terms
/// (longer than two characters) found in the passage. Local/test stand-in
/// for a cross-encoder model.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermOverlapEncoder;

impl CrossEncoder for TermOverlapEncoder {
    fn score(&self, question: &str, text: &str) -> f32 {
        let terms: HashSet<String> = question
            .split_whitespace()
            .map(|token| token.to_lowercase())
            .filter(|token| token.len() > 2)
            .collect();
        if terms.is_empty() {
            return 0.0;
        }

        let lowered = text.to_lowercase();
        let hits = terms.iter().filter(|term| lowered.contains(*term)).count();
        hits as f32 / terms.len() as f32
    }
}

/// Globally re-ranks an expanded context: every candidate chunk is scored
/// against the question, sorted, thresholded, capped, and regrouped under its
/// original document hash.
pub struct Reranker {
    encoder: Arc<dyn CrossEncoder>,
    options: RerankOptions,
}

impl Reranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>, options: RerankOptions) -> Self {
        Self { encoder, options }
    }

    pub fn rerank(&self, question: &str, by_document: &ChunksByDocument) -> ChunksByDocument {
        let mut candidates: Vec<_> = by_document
            .values()
            .flat_map(|chunks| chunks.iter().cloned())
            .collect();
        if candidates.is_empty() {
            return ChunksByDocument::new();
        }

        let texts: Vec<String> = candidates
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect();
        let scores = self.encoder.score_batch(question, &texts);
        for (chunk, score) in candidates.iter_mut().zip(scores) {
            chunk.score = score;
        }

        candidates.sort_by(|left, right| right.score.total_cmp(&left.score));

        let mut regrouped = ChunksByDocument::new();
        for chunk in candidates
            .into_iter()
            .filter(|chunk| chunk.score >= self.options.score_threshold)
            .take(self.options.max_chunks)
        {
            regrouped
                .entry(chunk.document_hash.clone())
                .or_default()
                .push(chunk);
        }

        regrouped
    }
}
