pub mod gemini;
pub mod sse;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn pdf(base64_data: String) -> Self {
        Part::InlineData {
            inline_data: InlineData {
                mime_type: "application/pdf".to_string(),
                data: base64_data,
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text.as_str()),
            Part::InlineData { .. } => None,
        }
    }
}

/// One role-tagged entry of the `contents` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Content {
            role: Role::User,
            parts: vec![Part::text(text)],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Content {
            role: Role::Model,
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenated text of all text parts; inline data is skipped.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

impl GenerateRequest {
    /// Number of inline document payloads carried by this request.
    pub fn inline_document_count(&self) -> usize {
        self.contents
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter(|p| matches!(p, Part::InlineData { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidatePart {
    #[serde(default)]
    pub text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate, if it carries any.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireFrame {
    Error { error: ApiErrorBody },
    Candidates(GenerateResponse),
}

/// A response body or stream frame, validated at the parse boundary.
#[derive(Debug, Clone)]
pub enum ResponseFrame {
    /// The whole answer of a non-streaming call.
    Reply(GenerateResponse),
    /// One incremental `data:` frame of a streaming call.
    Delta(GenerateResponse),
    Error(ApiErrorBody),
}

impl ResponseFrame {
    pub fn parse_reply(body: &str) -> Result<Self, LlmError> {
        Ok(match serde_json::from_str::<WireFrame>(body)? {
            WireFrame::Error { error } => ResponseFrame::Error(error),
            WireFrame::Candidates(resp) => ResponseFrame::Reply(resp),
        })
    }

    pub fn parse_stream(data: &str) -> Result<Self, LlmError> {
        let frame = serde_json::from_str::<WireFrame>(data)
            .map_err(|e| LlmError::FrameParse(format!("{}: {}", e, data)))?;
        Ok(match frame {
            WireFrame::Error { error } => ResponseFrame::Error(error),
            WireFrame::Candidates(resp) => ResponseFrame::Delta(resp),
        })
    }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, LlmError>> + Send>>;

/// HTTP seam to the generative model.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError>;

    /// Starts a streaming call; the status has already been checked when this returns.
    async fn stream_generate(&self, request: &GenerateRequest) -> Result<ByteStream, LlmError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Transport { status: u16, message: String },
    #[error("No response generated")]
    NoResponse,
    #[error("Malformed stream frame: {0}")]
    FrameParse(String),
    #[error("Parse error: {0}")]
    Json(#[from] serde_json::Error),
}
