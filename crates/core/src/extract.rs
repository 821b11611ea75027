use crate::error::ExtractError;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Pages sampled when deciding whether a PDF carries native text.
const SEARCHABLE_SAMPLE_PAGES: usize = 5;
/// Average native characters per sampled page above which a PDF is treated
/// as searchable.
const SEARCHABLE_MIN_AVG_CHARS: f64 = 100.0;
/// Rendering resolution requested from the OCR endpoint.
const OCR_RENDER_DPI: u32 = 300;
/// Fixed language hint for OCR.
const OCR_LANGUAGE: &str = "por";
/// Lines inspected at the top and bottom of each page for recurring
/// headers/footers.
const HEADER_FOOTER_LINES: usize = 4;
/// Fraction of pages a line must recur in to count as a header/footer.
const HEADER_FOOTER_FREQUENCY: f64 = 0.6;
/// Dotted-leader matches required before a page is treated as a table of
/// contents.
const TOC_MIN_MATCHES: usize = 5;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Page-level OCR over an already-parsed PDF. Implementations render the
/// requested page and return its recognized text.
pub trait PageOcr: Send + Sync {
    fn recognize_page(&self, pdf: &[u8], page_number: u32) -> Result<String, ExtractError>;
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest<'a> {
    pdf_base64: String,
    page: u32,
    dpi: u32,
    language: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    text: Option<String>,
}

/// OCR through an HTTP endpoint that accepts a base64 PDF plus a page number
/// and answers `{"text": ...}`.
pub struct HttpOcr {
    endpoint: String,
    api_key: Option<String>,
}

impl HttpOcr {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

impl PageOcr for HttpOcr {
    fn recognize_page(&self, pdf: &[u8], page_number: u32) -> Result<String, ExtractError> {
        tokio::task::block_in_place(|| {
            let payload = OcrRequest {
                pdf_base64: STANDARD.encode(pdf),
                page: page_number,
                dpi: OCR_RENDER_DPI,
                language: OCR_LANGUAGE,
            };

            let mut request = Client::new().post(&self.endpoint).json(&payload);
            if let Some(api_key) = &self.api_key {
                request = request.bearer_auth(api_key);
            }

            let response = request.send()?;
            if !response.status().is_success() {
                return Err(ExtractError::OcrFailed(format!(
                    "ocr endpoint returned {}",
                    response.status()
                )));
            }

            let body: OcrResponse = response.json()?;
            Ok(body.text.unwrap_or_default())
        })
    }
}

/// Turns raw document bytes into a page-ordered sequence of plain text.
pub struct TextExtractor {
    ocr: Option<Arc<dyn PageOcr>>,
}

impl TextExtractor {
    pub fn new(ocr: Option<Arc<dyn PageOcr>>) -> Self {
        Self { ocr }
    }

    pub fn extract_file(&self, path: &Path, extension: &str) -> Result<Vec<PageText>, ExtractError> {
        let bytes = std::fs::read(path)?;
        self.extract(&bytes, extension)
    }

    pub fn extract(&self, bytes: &[u8], extension: &str) -> Result<Vec<PageText>, ExtractError> {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => self.extract_pdf(bytes),
            "txt" => Ok(vec![PageText {
                number: 1,
                text: decode_text(bytes),
            }]),
            other => Err(ExtractError::UnsupportedFormat(other.to_string())),
        }
    }

    fn extract_pdf(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        let document =
            Document::load_mem(bytes).map_err(|error| ExtractError::Corrupt(error.to_string()))?;

        if is_searchable(&document) {
            extract_native_pages(&document)
        } else {
            self.extract_ocr_pages(&document, bytes)
        }
    }

    fn extract_ocr_pages(
        &self,
        document: &Document,
        bytes: &[u8],
    ) -> Result<Vec<PageText>, ExtractError> {
        let ocr = self.ocr.as_ref().ok_or_else(|| {
            ExtractError::OcrFailed("scanned pdf but no OCR engine is configured".to_string())
        })?;

        let mut pages = Vec::new();
        for page_number in document.get_pages().keys().copied() {
            // a failed page degrades to empty text instead of aborting the document
            let text = match ocr.recognize_page(bytes, page_number) {
                Ok(text) => text,
                Err(error) => {
                    warn!(page = page_number, error = %error, "page OCR failed");
                    String::new()
                }
            };
            pages.push(PageText {
                number: page_number,
                text,
            });
        }

        Ok(pages)
    }
}

/// Samples up to five pages of native text; a PDF whose sampled pages average
/// more than 100 characters is searchable, an empty document never is.
fn is_searchable(document: &Document) -> bool {
    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return false;
    }

    let sample = page_numbers.len().min(SEARCHABLE_SAMPLE_PAGES);
    let total_chars: usize = page_numbers
        .iter()
        .take(sample)
        .map(|number| {
            document
                .extract_text(&[*number])
                .map(|text| text.trim().len())
                .unwrap_or(0)
        })
        .sum();

    (total_chars as f64 / sample as f64) > SEARCHABLE_MIN_AVG_CHARS
}

fn extract_native_pages(document: &Document) -> Result<Vec<PageText>, ExtractError> {
    let mut pages = Vec::new();
    for page_number in document.get_pages().keys().copied() {
        let text = document
            .extract_text(&[page_number])
            .map_err(|error| ExtractError::Corrupt(error.to_string()))?;
        pages.push(PageText {
            number: page_number,
            text,
        });
    }
    Ok(pages)
}

/// Decodes a text file by sniffing its encoding, falling back to the
/// permissive single-byte WINDOWS-1252 when the sniffed decode reports
/// errors.
fn decode_text(bytes: &[u8]) -> String {
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);

    let (decoded, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        let (fallback, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
        return fallback.into_owned();
    }
    decoded.into_owned()
}

/// Collects the first and last four non-blank lines of every page and keeps
/// those recurring in at least 60% of pages. Documents under three pages get
/// no stripping at all; a line that qualifies as both header and footer is
/// excluded from both sets.
pub fn identify_headers_footers(pages: &[PageText]) -> (HashSet<String>, HashSet<String>) {
    identify_headers_footers_with(pages, HEADER_FOOTER_LINES, HEADER_FOOTER_FREQUENCY)
}

pub fn identify_headers_footers_with(
    pages: &[PageText],
    lines_to_check: usize,
    frequency_threshold: f64,
) -> (HashSet<String>, HashSet<String>) {
    let total_pages = pages.len();
    if total_pages < 3 {
        return (HashSet::new(), HashSet::new());
    }

    let mut header_counts: HashMap<String, usize> = HashMap::new();
    let mut footer_counts: HashMap<String, usize> = HashMap::new();

    for page in pages {
        let lines: Vec<&str> = page
            .text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if lines.is_empty() {
            continue;
        }

        for line in lines.iter().take(lines_to_check) {
            *header_counts.entry((*line).to_string()).or_insert(0) += 1;
        }
        let tail_start = lines.len().saturating_sub(lines_to_check);
        for line in &lines[tail_start..] {
            *footer_counts.entry((*line).to_string()).or_insert(0) += 1;
        }
    }

    let min_occurrences = (total_pages as f64 * frequency_threshold) as usize;
    let headers: HashSet<String> = header_counts
        .into_iter()
        .filter(|(_, count)| *count >= min_occurrences)
        .map(|(line, _)| line)
        .collect();
    let footers: HashSet<String> = footer_counts
        .into_iter()
        .filter(|(_, count)| *count >= min_occurrences)
        .map(|(line, _)| line)
        .collect();

    (
        headers.difference(&footers).cloned().collect(),
        footers.difference(&headers).cloned().collect(),
    )
}

/// Line-level cleanup and table-of-contents classification shared by the
/// chunking pass.
pub struct PageFilter {
    page_prefix: Regex,
    bare_number: Regex,
    toc_leader: Regex,
}

impl PageFilter {
    pub fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            page_prefix: Regex::new(r"^\s*\d+([A-ZÀ-Ú])")?,
            bare_number: Regex::new(r"^\s*\d+\s*$")?,
            toc_leader: Regex::new(r"\.{5,}\s*\d+")?,
        })
    }

    /// Strips detected header/footer lines, page numbers glued to the first
    /// word, and standalone page-number lines.
    pub fn clean_page(
        &self,
        page_text: &str,
        headers: &HashSet<String>,
        footers: &HashSet<String>,
    ) -> String {
        let mut cleaned = Vec::new();
        for line in page_text.lines() {
            let stripped = line.trim();
            if headers.contains(stripped) || footers.contains(stripped) {
                continue;
            }
            let without_prefix = self.page_prefix.replace(stripped, "$1");
            if self.bare_number.is_match(&without_prefix) {
                continue;
            }
            cleaned.push(without_prefix.into_owned());
        }
        cleaned.join("\n")
    }

    /// A page with five or more dotted-leader-then-number runs is a table of
    /// contents and is skipped entirely during chunking.
    pub fn is_table_of_contents(&self, page_text: &str) -> bool {
        self.toc_leader.find_iter(page_text).count() >= TOC_MIN_MATCHES
    }
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

    #[test]
    fn recurring_lines_become_headers_and_footers() {
        // pages long enough that the top and bottom inspection zones do not
        // overlap, with unique body lines below the recurrence threshold
        let pages: Vec<PageText> = (1..=5)
            .map(|number| {
                page(
                    number,
                    &format!(
                        "ACME Corp\nintro {number} a\nintro {number} b\nintro {number} c\n\
                         middle {number}\ntail {number} a\ntail {number} b\ntail {number} c\n\
                         Page footer"
                    ),
                )
            })
            .collect();

        let (headers, footers) = identify_headers_footers(&pages);
        assert!(headers.contains("ACME Corp"));
        assert!(footers.contains("Page footer"));
        assert!(!headers.contains("intro 1 a"));
        assert!(!footers.contains("tail 1 c"));
    }

    #[test]
    fn short_documents_are_never_stripped() {
        let pages = vec![page(1, "ACME Corp\nbody"), page(2, "ACME Corp\nbody")];

        let (headers, footers) = identify_headers_footers(&pages);
        assert!(headers.is_empty());
        assert!(footers.is_empty());
    }

    #[test]
    fn line_in_both_sets_is_dropped_from_both() {
        // the same line opens and closes every page
        let pages = vec![
            page(1, "Banner\nBanner"),
            page(2, "Banner\nBanner"),
            page(3, "Banner\nBanner"),
        ];

        let (headers, footers) = identify_headers_footers(&pages);
        assert!(!headers.contains("Banner"));
        assert!(!footers.contains("Banner"));
    }

    #[test]
    fn cleaning_strips_glued_page_numbers_and_bare_numbers() {
        let filter = PageFilter::new().expect("static regexes");
        let headers = HashSet::from(["ACME Corp".to_string()]);
        let footers = HashSet::new();

        let cleaned = filter.clean_page(
            "ACME Corp\n12Chapter one begins\n42\nplain line",
            &headers,
            &footers,
        );

        assert_eq!(cleaned, "Chapter one begins\nplain line");
    }

    #[test]
    fn toc_pages_are_classified_by_dotted_leaders() {
        let filter = PageFilter::new().expect("static regexes");
        let toc = (1..=6)
            .map(|index| format!("Chapter {index}.......... {index}"))
            .collect::<Vec<_>>()
            .join("\n");

        assert!(filter.is_table_of_contents(&toc));
        assert!(!filter.is_table_of_contents("Chapter 1.......... 3"));
    }

    #[test]
    fn utf8_text_decodes_as_is() {
        let text = decode_text("ação e reação".as_bytes());
        assert_eq!(text, "ação e reação");
    }

    #[test]
    fn single_byte_text_decodes_without_replacement_chars() {
        let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode("informação sobre a ação e reação");
        let text = decode_text(&bytes);
        assert_eq!(text, "informação sobre a ação e reação");
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let extractor = TextExtractor::new(None);
        let result = extractor.extract(b"irrelevant", "docx");
        assert!(matches!(result, Err(ExtractError::UnsupportedFormat(_))));
    }

    #[test]
    fn txt_extraction_yields_a_single_page() {
        let extractor = TextExtractor::new(None);
        let pages = extractor
            .extract("one page only".as_bytes(), ".txt")
            .expect("txt decodes");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[0].text, "one page only");
    }

    #[test]
    fn corrupt_pdf_is_reported() {
        let extractor = TextExtractor::new(None);
        let result = extractor.extract(b"%PDF-1.4\n%broken", "pdf");
        assert!(matches!(result, Err(ExtractError::Corrupt(_))));
    }
}
