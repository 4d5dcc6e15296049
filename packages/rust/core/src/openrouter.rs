//! OpenRouter-backed [`ClassificationService`].
//!
//! One chat-completions call per candidate, JSON response format, temperature 0.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use obituary_shared::{Candidate, Category, ClassificationResult, ObituaryError, Result};

use crate::classifier::{ClassificationService, ModelVerdict};

/// User-Agent string for classifier requests.
const USER_AGENT: &str = concat!("ObituaryDiscovery/", env!("CARGO_PKG_VERSION"));

/// Candidate text sent to the model is cut to this many characters.
const MAX_TEXT_CHARS: usize = 4000;

/// HTTP-level timeout; the classifier applies its own per-call deadline too.
const HTTP_TIMEOUT_SECS: u64 = 60;

const SYSTEM_PROMPT: &str = r#"You review social posts and news articles for an archive of public claims that AI is overhyped, failing, or doomed.

Decide whether the text makes a clear, quotable assertion of that kind. Questions, jokes, neutral reporting and claims that AI is succeeding are not claims.

Reply with a single JSON object and nothing else:
{
  "is_claim": true | false,
  "claim": "the assertion as one self-contained sentence, quoted or closely paraphrased",
  "confidence": number between 0 and 1,
  "category": "capability" | "market" | "agi" | "dismissive",
  "notability_reason": "why this claim is worth recording (who said it, reach, specificity)"
}

Categories:
- capability: AI cannot do something, or progress has plateaued
- market: bubble, valuation, spending or revenue claims
- agi: AGI or human-level AI will never arrive
- dismissive: general dismissal of AI as hype or a fad"#;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// The JSON object the system prompt asks for.
#[derive(Debug, Deserialize)]
struct ClaimReply {
    #[serde(default)]
    is_claim: Option<bool>,
    #[serde(default)]
    claim: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    notability_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Chat-completions client for OpenRouter.
pub struct OpenRouterClassifier {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl OpenRouterClassifier {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| ObituaryError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| ObituaryError::config("classifier API key is not a valid header value"))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl ClassificationService for OpenRouterClassifier {
    #[instrument(skip_all, fields(model = %self.model, url = %candidate.url))]
    async fn classify(&self, candidate: &Candidate) -> Result<ModelVerdict> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_message(candidate),
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| ObituaryError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(ObituaryError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            return Err(ObituaryError::Classification(format!(
                "OpenRouter API error ({status}): {detail}"
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ObituaryError::parse(format!("invalid chat response: {e}")))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ObituaryError::Classification("no response from OpenRouter".into()))?;

        debug!(chars = content.len(), "model replied");
        parse_verdict(&content)
    }
}

fn user_message(candidate: &Candidate) -> String {
    let author = candidate
        .author
        .as_ref()
        .and_then(|a| a.handle.as_deref().map(|h| format!("@{h}")).or(a.name.clone()))
        .unwrap_or_else(|| "unknown".into());
    format!(
        "Source: {} ({})\nAuthor: {}\nPublished: {}\nTitle: {}\n\n{}",
        candidate.url,
        candidate.source_type,
        author,
        candidate.published_date(),
        candidate.title,
        truncate_chars(&candidate.text, MAX_TEXT_CHARS),
    )
}

/// Parse the model's JSON reply into a verdict.
///
/// Tolerates fenced code blocks. Only an explicit `"is_claim": false` or an
/// empty claim rejects; a missing flag defers to the claim text. Unknown
/// categories fall back to [`Category::Dismissive`]; a missing confidence
/// counts as zero.
pub fn parse_verdict(content: &str) -> Result<ModelVerdict> {
    let reply: ClaimReply = serde_json::from_str(strip_code_blocks(content))
        .map_err(|e| ObituaryError::parse(format!("model reply is not the expected JSON: {e}")))?;

    let claim = reply.claim.unwrap_or_default();
    if reply.is_claim == Some(false) || claim.trim().is_empty() {
        return Ok(ModelVerdict::NotAClaim {
            reason: reply
                .notability_reason
                .unwrap_or_else(|| "model found no claim".into()),
        });
    }

    let category = reply
        .category
        .as_deref()
        .and_then(Category::from_label)
        .unwrap_or(Category::Dismissive);

    Ok(ModelVerdict::Claim(ClassificationResult {
        claim: claim.trim().to_string(),
        confidence: reply.confidence.unwrap_or(0.0),
        category,
        notability_reason: reply.notability_reason.unwrap_or_default(),
    }))
}

fn strip_code_blocks(response: &str) -> &str {
    let trimmed = response.trim();
    let body = match trimmed.strip_prefix("```") {
        // Drop the opening fence line along with any language tag.
        Some(rest) => {
            let lang_len = rest
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(rest.len());
            if rest[..lang_len].eq_ignore_ascii_case("json") || lang_len == 0 {
                &rest[lang_len..]
            } else {
                rest
            }
        }
        None => trimmed,
    };
    body.trim().trim_end_matches("```").trim()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}\n\n[... truncated ...]", &text[..end]),
        None => text.to_string(),
    }
}
