use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::{Classifier, ClassifierError};
use crate::markdown::{align_rows, parse_table};
use crate::types::{Batch, ClassificationResult, ColumnSpec, TableContext};

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a keyword classification expert. Categorize keywords using a JSON spec that supports two kinds of columns: (A) columns with predefined tags and (B) instruction-only columns where you must propose the tags yourself.

JSON schema:
* `keywords`: array of strings
* `brands`: array of strings
* `columns`: array where each item is one of:
  - Predefined-tags column: `{ "name": string, "tags": string[] }`
  - Instruction-only column: `{ "name": string, "instructions": string }`

Rules:
1) One tag per column: for each keyword pick exactly ONE tag from each column, or leave the cell blank if none applies.
2) Matching: use exact or close semantic matching to choose tags.
3) Column isolation: tags belong only to their own column; never reuse them across columns.
4) Conservative blanks: if no tag fits well, leave the cell blank.
5) Instruction-only columns: first infer a small, coherent set of concise, non-overlapping tags (3 to 10) from the instructions, keywords and brands, then classify using ONLY those tags.
6) Output no explanations, no inferred tag lists and no extra text.

Output format:
Return ONLY a markdown table with:
* Column 1: "Original keyword"
* One further column per entry in `columns`, using its `name` as the header
* Cells: the single selected tag for that column, or blank"#;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

pub struct GeminiClassifier {
    config: GeminiConfig,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct BatchPayload<'a> {
    keywords: &'a [&'a str],
    brands: &'a [String],
    columns: &'a [ColumnSpec],
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Keywords of the batch worth asking about. Blank keywords are never sent;
/// their rows get an empty result.
fn asked_keywords<'b>(batch: &Batch<'b>) -> Vec<&'b str> {
    batch
        .rows
        .iter()
        .map(|row| row.keyword.trim())
        .filter(|keyword| !keyword.is_empty())
        .collect()
}

/// Builds the full prompt for one batch: system prompt, JSON payload and the
/// task line.
pub fn build_prompt(context: &TableContext, keywords: &[&str]) -> Result<String, ClassifierError> {
    let payload = BatchPayload {
        keywords,
        brands: &context.brands,
        columns: &context.columns,
    };
    let payload = serde_json::to_string_pretty(&payload)?;
    let system_prompt = context
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);

    Ok(format!(
        "{system_prompt}\n\n**JSON Data:**\n```json\n{payload}\n```\n\n**Task:** Classify these {} keywords according to the rules above. Return ONLY the markdown table with proper headers.",
        keywords.len()
    ))
}

/// Turns the model's markdown answer into per-row results, in batch order.
/// Rows with a blank keyword get an empty result. The output stops at the
/// first keyword the answer does not cover.
pub fn parse_answer(text: &str, batch: &Batch<'_>) -> Vec<ClassificationResult> {
    let keywords = asked_keywords(batch);
    let rows = parse_table(text, &keywords);
    let mut answers = align_rows(&keywords, rows).into_iter();

    batch
        .rows
        .iter()
        .map_while(|row| {
            if row.keyword.trim().is_empty() {
                Some(ClassificationResult::new(Vec::new()))
            } else {
                answers.next().map(ClassificationResult::new)
            }
        })
        .collect()
}

impl GeminiClassifier {
    pub fn new(config: GeminiConfig) -> Result<Self, ClassifierError> {
        if config.api_key.trim().is_empty() {
            return Err(ClassifierError::NotConfigured(
                "GOOGLE_API_KEY is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            http: reqwest::Client::new(),
        })
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/v1beta/models/{}:generateContent", self.config.model)
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    #[tracing::instrument(skip_all, fields(model = %self.config.model, batch = batch.number, rows = batch.len()))]
    async fn classify(
        &self,
        context: &TableContext,
        batch: &Batch<'_>,
    ) -> Result<Vec<ClassificationResult>, ClassifierError> {
        let keywords = asked_keywords(batch);
        if keywords.is_empty() {
            tracing::debug!("Batch has only blank keywords, skipping request");
            return Ok(parse_answer("", batch));
        }

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(build_prompt(context, &keywords)?),
                }],
            }],
        };

        tracing::debug!("Sending generateContent request");
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "generateContent request rejected");
            return Err(match status.as_u16() {
                401 | 403 => ClassifierError::AuthFailed(body),
                429 => ClassifierError::RateLimited(body),
                code => ClassifierError::RequestFailed {
                    status: Some(code),
                    message: format!("HTTP {status}: {body}"),
                },
            });
        }

        let body: GenerateContentResponse = response.json().await.map_err(|e| {
            ClassifierError::InvalidResponse(format!("failed to parse response: {e}"))
        })?;
        let text = body
            .text()
            .ok_or_else(|| ClassifierError::InvalidResponse("no candidate text".to_string()))?;

        let results = parse_answer(&text, batch);
        tracing::debug!(parsed = results.len(), "generateContent response received");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Row;

    fn rows() -> Vec<Row> {
        vec![
            Row {
                index: 0,
                keyword: "shoes".into(),
                brand: "Nike".into(),
                categories: vec![vec!["sports".into()]],
            },
            Row {
                index: 1,
                keyword: "coffee".into(),
                brand: "Starbucks".into(),
                categories: vec![vec!["beverages".into()]],
            },
        ]
    }

    fn context() -> TableContext {
        TableContext {
            columns: vec![ColumnSpec::Tags {
                name: "Category".into(),
                tags: vec!["sports".into(), "beverages".into()],
            }],
            brands: vec!["Nike".into(), "Starbucks".into()],
            system_prompt: None,
        }
    }

    #[test]
    fn prompt_embeds_batch_keywords_only() {
        let rows = rows();
        let batch = Batch { number: 1, start: 1, rows: &rows[1..] };
        let prompt = build_prompt(&context(), &asked_keywords(&batch)).unwrap();

        assert!(prompt.starts_with("You are a keyword classification expert."));
        assert!(prompt.contains("\"coffee\""));
        assert!(!prompt.contains("\"shoes\""));
        assert!(prompt.contains("\"tags\": ["));
        assert!(prompt.contains("Classify these 1 keywords"));
    }

    #[test]
    fn prompt_override() {
        let rows = rows();
        let batch = Batch { number: 0, start: 0, rows: &rows };
        let mut context = context();
        context.system_prompt = Some("Label each keyword.".into());
        let prompt = build_prompt(&context, &asked_keywords(&batch)).unwrap();
        assert!(prompt.starts_with("Label each keyword.\n\n**JSON Data:**"));
    }

    #[test]
    fn answer_is_aligned_to_batch_rows() {
        let rows = rows();
        let batch = Batch { number: 0, start: 0, rows: &rows };
        let answer = "| Original keyword | Category |\n|---|---|\n| COFFEE | beverages |\n| shoes | sports |";
        let results = parse_answer(answer, &batch);
        assert_eq!(
            results,
            vec![
                ClassificationResult::from("sports"),
                ClassificationResult::from("beverages"),
            ]
        );
    }

    #[test]
    fn partial_answer_is_short() {
        let rows = rows();
        let batch = Batch { number: 0, start: 0, rows: &rows };
        let answer = "| Original keyword | Category |\n|---|---|\n| shoes | sports |";
        assert_eq!(parse_answer(answer, &batch).len(), 1);
    }

    #[test]
    fn blank_keywords_are_not_asked_and_get_empty_results() {
        let mut rows = rows();
        rows.insert(
            1,
            Row {
                index: 1,
                keyword: "  ".into(),
                brand: "Adidas".into(),
                categories: vec![Vec::new()],
            },
        );
        let batch = Batch { number: 0, start: 0, rows: &rows };
        assert_eq!(asked_keywords(&batch), vec!["shoes", "coffee"]);

        let prompt = build_prompt(&context(), &asked_keywords(&batch)).unwrap();
        assert!(prompt.contains("Classify these 2 keywords"));

        let answer = "| Original keyword | Category |\n|---|---|\n| shoes | sports |\n| coffee | beverages |";
        assert_eq!(
            parse_answer(answer, &batch),
            vec![
                ClassificationResult::from("sports"),
                ClassificationResult::new(Vec::new()),
                ClassificationResult::from("beverages"),
            ]
        );
    }

    #[test]
    fn all_blank_batch_needs_no_answer() {
        let rows = vec![Row {
            index: 0,
            keyword: String::new(),
            brand: "Nike".into(),
            categories: Vec::new(),
        }];
        let batch = Batch { number: 0, start: 0, rows: &rows };
        assert_eq!(parse_answer("", &batch), vec![ClassificationResult::new(Vec::new())]);
    }

    #[test]
    fn collapsed_duplicate_reuses_answer() {
        let mut rows = rows();
        rows.push(Row {
            index: 2,
            keyword: "Shoes".into(),
            brand: "Puma".into(),
            categories: vec![vec!["sports".into()]],
        });
        let batch = Batch { number: 0, start: 0, rows: &rows };
        let answer = "| Original keyword | Category |\n|---|---|\n| shoes | sports |\n| coffee | beverages |";
        assert_eq!(
            parse_answer(answer, &batch),
            vec![
                ClassificationResult::from("sports"),
                ClassificationResult::from("beverages"),
                ClassificationResult::from("sports"),
            ]
        );
    }

    #[test]
    fn response_text_joins_parts() {
        let body: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "| a |" }, { "text": " b |" }] }
            }]
        }))
        .unwrap();
        assert_eq!(body.text().as_deref(), Some("| a | b |"));
    }

    #[test]
    fn empty_response_has_no_text() {
        let body: GenerateContentResponse =
            serde_json::from_value(serde_json::json!({ "candidates": [] })).unwrap();
        assert_eq!(body.text(), None);
    }

    #[test]
    fn missing_api_key() {
        let err = GeminiClassifier::new(GeminiConfig {
            api_key: " ".into(),
            model: "gemini-2.5-flash".into(),
            base_url: "https://generativelanguage.googleapis.com".into(),
        })
        .err()
        .unwrap();
        assert!(matches!(err, ClassifierError::NotConfigured(_)));
    }

    #[test]
    fn endpoint_includes_model() {
        let classifier = GeminiClassifier::new(GeminiConfig {
            api_key: "key".into(),
            model: "gemini-2.5-flash".into(),
            base_url: "https://example.test/".into(),
        })
        .unwrap();
        assert_eq!(
            classifier.endpoint(),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }
}
