use crate::error::ExtractError;
use crate::extract::{identify_headers_footers, PageFilter, PageText};
use crate::models::{Chunk, ChunkingOptions};
use whatlang::Lang;

const PORTUGUESE_ABBREVIATIONS: &[&str] = &[
    "sr", "sra", "srta", "dr", "dra", "prof", "profa", "av", "pág", "art", "ex", "etc",
];
const ENGLISH_ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "st", "vs", "etc", "fig", "no", "e.g", "i.e",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkLanguage {
    Portuguese,
    English,
}

/// Segments cleaned page text into overlapping, bounded-length chunks
/// anchored to page numbers.
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    filter: PageFilter,
}

impl Chunker {
    pub fn new(options: ChunkingOptions) -> Result<Self, ExtractError> {
        if options.chunk_size == 0 {
            return Err(ExtractError::InvalidChunkConfig(
                "chunk_size must be at least 1 token".to_string(),
            ));
        }
        Ok(Self {
            chunk_size: options.chunk_size,
            overlap: options.overlap,
            filter: PageFilter::new()?,
        })
    }

    /// Portuguese or English; English when detection cannot decide.
    pub fn detect_language(text: &str) -> ChunkLanguage {
        match whatlang::detect_lang(text) {
            Some(Lang::Por) => ChunkLanguage::Portuguese,
            _ => ChunkLanguage::English,
        }
    }

    /// Produces the chunk sequence for one document version. Fails with
    /// `NoText` when nothing survives extraction and cleaning.
    pub fn chunk(
        &self,
        pages: &[PageText],
        document_hash: &str,
        filename: &str,
    ) -> Result<Vec<Chunk>, ExtractError> {
        if pages.is_empty() {
            return Err(ExtractError::NoText(filename.to_string()));
        }

        let (headers, footers) = identify_headers_footers(pages);

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut chunk_index = 0u64;
        let mut buffer: Vec<String> = Vec::new();
        let mut last_page = pages[0].number;

        for page in pages {
            last_page = page.number;
            if self.filter.is_table_of_contents(&page.text) {
                continue;
            }
            let cleaned = self.filter.clean_page(&page.text, &headers, &footers);
            if cleaned.trim().is_empty() {
                continue;
            }

            let language = Self::detect_language(&cleaned);
            for sentence in split_sentences(&cleaned, language) {
                let tokens: Vec<String> =
                    sentence.split_whitespace().map(str::to_string).collect();
                if tokens.is_empty() {
                    continue;
                }

                if buffer.len() + tokens.len() > self.chunk_size && !buffer.is_empty() {
                    // the flush is tagged with the page under processing, so a
                    // chunk straddling a boundary carries the later page
                    chunks.push(Chunk {
                        text: buffer.join(" "),
                        document_hash: document_hash.to_string(),
                        filename: filename.to_string(),
                        chunk_index,
                        page: page.number,
                    });
                    chunk_index += 1;

                    let keep_from = buffer.len().saturating_sub(self.overlap);
                    buffer.drain(..keep_from);
                }

                buffer.extend(tokens);
            }
        }

        if !buffer.is_empty() {
            chunks.push(Chunk {
                text: buffer.join(" "),
                document_hash: document_hash.to_string(),
                filename: filename.to_string(),
                chunk_index,
                page: last_page,
            });
        }

        if chunks.is_empty() {
            return Err(ExtractError::NoText(filename.to_string()));
        }
        Ok(chunks)
    }
}

/// Splits on `.`, `!`, `?` followed by whitespace, holding back boundaries
/// after the detected language's common abbreviations.
pub fn split_sentences(text: &str, language: ChunkLanguage) -> Vec<String> {
    let abbreviations = match language {
        ChunkLanguage::Portuguese => PORTUGUESE_ABBREVIATIONS,
        ChunkLanguage::English => ENGLISH_ABBREVIATIONS,
    };

    let mut sentences = Vec::new();
    let mut start = 0usize;

    for (index, character) in text.char_indices() {
        if !matches!(character, '.' | '!' | '?') {
            continue;
        }
        let next = index + character.len_utf8();
        let followed_by_break = text[next..]
            .chars()
            .next()
            .map_or(true, char::is_whitespace);
        if !followed_by_break {
            continue;
        }
        if character == '.' && ends_with_abbreviation(&text[start..index], abbreviations) {
            continue;
        }

        let sentence = text[start..next].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        start = next;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

fn ends_with_abbreviation(prefix: &str, abbreviations: &[&str]) -> bool {
    let last_word = prefix
        .split_whitespace()
        .last()
        .unwrap_or("")
        .to_lowercase();
    abbreviations
        .iter()
        .any(|abbreviation| last_word == *abbreviation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: u32, text: &str) -> PageText {
        PageText {
            number,
            text: text.to_string(),
        }
    }

    fn chunker(chunk_size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkingOptions {
            chunk_size,
            overlap,
        })
        .expect("valid chunking options")
    }

    fn sentence_page(number: u32, sentences: usize) -> PageText {
        let text = (0..sentences)
            .map(|index| format!("Sentence number {index} talks about engineering work."))
            .collect::<Vec<_>>()
            .join(" ");
        page(number, &text)
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let result = Chunker::new(ChunkingOptions {
            chunk_size: 0,
            overlap: 0,
        });
        assert!(matches!(
            result,
            Err(ExtractError::InvalidChunkConfig(_))
        ));
    }

    #[test]
    fn chunking_is_deterministic() {
        let pages = vec![sentence_page(1, 12), sentence_page(2, 12)];
        let worker = chunker(20, 5);

        let first = worker.chunk(&pages, "hash", "doc.pdf").expect("chunks");
        let second = worker.chunk(&pages, "hash", "doc.pdf").expect("chunks");

        let first_texts: Vec<&str> = first.iter().map(|chunk| chunk.text.as_str()).collect();
        let second_texts: Vec<&str> = second.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(first_texts, second_texts);
    }

    #[test]
    fn chunk_indices_increase_from_zero_and_sizes_stay_bounded() {
        let pages = vec![sentence_page(1, 30), sentence_page(2, 30)];
        let chunk_size = 20;
        let overlap = 5;
        let worker = chunker(chunk_size, overlap);

        let chunks = worker.chunk(&pages, "hash", "doc.pdf").expect("chunks");
        assert!(chunks.len() > 1);
        for (expected_index, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, expected_index as u64);
            assert!(chunk.text.split_whitespace().count() <= chunk_size + overlap);
        }
    }

    #[test]
    fn overlap_carries_tokens_into_the_next_chunk() {
        let pages = vec![sentence_page(1, 10)];
        let worker = chunker(10, 3);

        let chunks = worker.chunk(&pages, "hash", "doc.pdf").expect("chunks");
        assert!(chunks.len() > 1);

        let first_tokens: Vec<&str> = chunks[0].text.split_whitespace().collect();
        let second_tokens: Vec<&str> = chunks[1].text.split_whitespace().collect();
        assert_eq!(&first_tokens[first_tokens.len() - 3..], &second_tokens[..3]);
    }

    #[test]
    fn chunk_straddling_pages_is_tagged_with_the_flush_page() {
        // page 1 underfills the buffer; the flush happens while page 2 is
        // being processed
        let pages = vec![sentence_page(1, 2), sentence_page(2, 8)];
        let worker = chunker(20, 0);

        let chunks = worker.chunk(&pages, "hash", "doc.pdf").expect("chunks");
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].page, 2);
    }

    #[test]
    fn toc_pages_are_skipped_entirely() {
        let toc = (1..=6)
            .map(|index| format!("Chapter {index}.......... {index}"))
            .collect::<Vec<_>>()
            .join("\n");
        let pages = vec![page(1, &toc), sentence_page(2, 4)];
        let worker = chunker(50, 5);

        let chunks = worker.chunk(&pages, "hash", "doc.pdf").expect("chunks");
        assert!(chunks.iter().all(|chunk| !chunk.text.contains("Chapter")));
    }

    #[test]
    fn documents_without_surviving_text_fail_explicitly() {
        let worker = chunker(50, 5);

        assert!(matches!(
            worker.chunk(&[], "hash", "empty.pdf"),
            Err(ExtractError::NoText(_))
        ));
        assert!(matches!(
            worker.chunk(&[page(1, "   \n  ")], "hash", "blank.pdf"),
            Err(ExtractError::NoText(_))
        ));
    }

    #[test]
    fn language_detection_defaults_to_english() {
        assert_eq!(Chunker::detect_language("??!!"), ChunkLanguage::English);
        assert_eq!(
            Chunker::detect_language(
                "O estágio supervisionado deve ser concluído antes da formatura do aluno."
            ),
            ChunkLanguage::Portuguese
        );
    }

    #[test]
    fn abbreviations_do_not_split_sentences() {
        let sentences = split_sentences(
            "Dr. Smith reviewed the draft. The committee approved it.",
            ChunkLanguage::English,
        );
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].starts_with("Dr. Smith"));
    }

    #[test]
    fn terminators_inside_words_do_not_split() {
        let sentences = split_sentences("Version 1.2 shipped today! Tests pass.", ChunkLanguage::English);
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0], "Version 1.2 shipped today!");
    }
}
