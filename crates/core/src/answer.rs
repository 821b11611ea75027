use crate::error::PipelineError;
use crate::models::ChunksByDocument;
use crate::traits::AnswerGenerator;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

/// Default prompt when the deployment ships none. Placeholders: `{context}`,
/// `{question}`, `{base_url}`.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
You answer questions strictly from the documents below. Cite the document \
and page each statement comes from, and link documents as \
{base_url}/document/download/<document id>. If the context does not answer \
the question, say so.

{context}

Question: {question}
";

/// Concatenates the re-ranked context into document- and page-labeled
/// blocks, blank-line separated.
pub fn build_context(reranked: &ChunksByDocument) -> String {
    let mut blocks = Vec::new();
    for chunks in reranked.values() {
        let Some(first) = chunks.first() else {
            continue;
        };

        let mut lines = vec![format!(
            "### Document: {}\nDocument id: {}\n",
            first.filename, first.document_hash
        )];
        for chunk in chunks {
            lines.push(format!("#### Page {}\n{}", chunk.page, chunk.text));
        }
        blocks.push(lines.join("\n\n"));
    }
    blocks.join("\n\n")
}

pub fn render_prompt(template: &str, context: &str, question: &str, base_url: &str) -> String {
    template
        .replace("{context}", context)
        .replace("{question}", question)
        .replace("{base_url}", base_url)
}

/// Answer generation over a generateContent-style REST endpoint
/// (candidates/content/parts response shape).
pub struct GenerativeAnswerClient {
    endpoint: String,
    api_key: String,
    client: Client,
}

impl GenerativeAnswerClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let endpoint = endpoint.into();
        Url::parse(&endpoint)?;
        Ok(Self {
            endpoint,
            api_key: api_key.into(),
            client: Client::new(),
        })
    }
}

#[async_trait]
impl AnswerGenerator for GenerativeAnswerClient {
    async fn generate(&self, prompt: &str) -> Result<Value, PipelineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({
                "contents": [
                    { "parts": [ { "text": prompt } ] }
                ]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Store {
                backend: "answer-llm".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let text = parsed
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if text.is_empty() {
            return Err(PipelineError::Store {
                backend: "answer-llm".to_string(),
                details: "response carried no candidate text".to_string(),
            });
        }

        Ok(parse_answer_text(text))
    }
}

/// Models often wrap JSON answers in code fences; unwrap those, then take
/// the payload as JSON when it parses and as plain text otherwise.
pub(crate) fn parse_answer_text(text: &str) -> Value {
    let stripped = strip_code_fence(text);
    serde_json::from_str(stripped).unwrap_or_else(|_| json!({ "answer": stripped }))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    for fence in ["```json", "```"] {
        if let Some(rest) = trimmed.strip_prefix(fence) {
            return rest.strip_suffix("```").unwrap_or(rest).trim();
        }
    }
    trimmed
}
