//! Vertex AI Gemini classifier
//!
//! Sends each image inline to the `generateContent` endpoint together with
//! the moderation prompt and a JSON response schema, then parses the reply
//! text into [`Violation`]s.

use super::{parse_violations, Classifier, ImagePayload};
use crate::error::{ClassifyError, ClassifyResult};
use crate::model::Violation;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Connect timeout for the HTTP client; the per-call deadline is enforced
/// by the executor
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body kept in a [`ClassifyError::Status`]
const MAX_ERROR_BODY: usize = 512;

/// Moderation prompt sent with every image
pub const MODERATION_PROMPT: &str = "\
You are a content moderator for an anime game community forum. Review the \
uploaded image and decide whether it breaks the community rules. Judge it in \
the context of anime game art: moderate character fan service can be \
acceptable, while real photographs and content outside the game setting are \
held to a stricter standard.

Risk scale:
0-0.2 safe, essentially no risk
0.21-0.4 minor risk, worth watching
0.41-0.6 moderate risk, edits advised
0.61-0.8 high risk, likely removal
0.81-1.0 severe violation, must be removed

Score every one of these categories:
Sexuality and Nudity: revealing outfits, suggestive poses, sexual elements
Religious and Political Content: religious symbols, political topics and symbols, ideology
Negative and Exclusive Content: personal attacks, abuse, discrimination, negativity
Illegal Activities and Regulated Goods: illegal items, contraband trading, illegal activity
Graphic and Disturbing Content: violence, gore, disturbing scenes, self-harm

Return a JSON array with one element per category. Each element has \
\"category\" (category name), \"risk_score\" (number from 0 to 1 with two \
decimals) and \"reason\" (short justification).";

/// Connection settings for the Gemini classifier
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Base URL, e.g. `https://us-central1-aiplatform.googleapis.com`
    pub endpoint: String,
    pub project: String,
    pub location: String,
    pub model: String,
    /// OAuth bearer token
    pub access_token: String,
    pub temperature: Option<f32>,
}

impl GeminiConfig {
    /// Regional endpoint for a Vertex AI location
    pub fn default_endpoint(location: &str) -> String {
        if location == "global" {
            "https://aiplatform.googleapis.com".to_string()
        } else {
            format!("https://{location}-aiplatform.googleapis.com")
        }
    }

    /// Full `generateContent` URL
    pub fn request_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.project,
            self.location,
            self.model
        )
    }
}

/// Classifier backed by a Gemini model on Vertex AI
pub struct GeminiClassifier {
    client: reqwest::Client,
    config: GeminiConfig,
    url: String,
}

impl GeminiClassifier {
    pub fn new(config: GeminiConfig) -> ClassifyResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("image-moderator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClassifyError::Setup(e.to_string()))?;
        let url = config.request_url();

        Ok(Self {
            client,
            config,
            url,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn request_body(&self, image: &ImagePayload) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text {
                        text: MODERATION_PROMPT,
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type,
                            data: BASE64.encode(&image.bytes),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: response_schema(),
                temperature: self.config.temperature,
            },
        }
    }
}

#[async_trait::async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, image: &ImagePayload) -> ClassifyResult<Vec<Violation>> {
        let body = self.request_body(image);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_utf8(&mut body, MAX_ERROR_BODY);
            return Err(ClassifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: GenerateResponse = response.json().await?;
        let text = reply.into_text()?;
        debug!(bytes = text.len(), "Model reply received");

        parse_violations(&text)
    }
}

/// Array-of-object schema for the canonical violation shape
fn response_schema() -> serde_json::Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "category": { "type": "STRING", "description": "Violation category name" },
                "risk_score": { "type": "NUMBER", "description": "Risk value (0-1)" },
                "reason": { "type": "STRING", "description": "Reason for the assessment" }
            },
            "required": ["category", "risk_score", "reason"]
        }
    })
}

fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: &'static str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}

#[derive(Deserialize, Debug)]
struct ReplyPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate
    fn into_text(self) -> ClassifyResult<String> {
        let block_reason = self.prompt_feedback.and_then(|f| f.block_reason);
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(ClassifyError::EmptyResponse {
                reason: block_reason,
            });
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ClassifyError::EmptyResponse {
                reason: candidate.finish_reason.or(block_reason),
            });
        }
        Ok(text)
    }
}
