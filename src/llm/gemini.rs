use super::{ByteStream, GenerateRequest, GenerateResponse, LlmError, ResponseFrame, Transport};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl GeminiConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.base_url.trim_end_matches('/'),
            self.model,
            method
        )
    }
}

/// `generateContent` / `streamGenerateContent` over HTTPS.
pub struct GeminiTransport {
    client: Client,
    config: GeminiConfig,
}

impl GeminiTransport {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn post(
        &self,
        method: &str,
        request: &GenerateRequest,
        sse: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let mut req = self
            .client
            .post(self.config.endpoint(method))
            .header("Content-Type", "application/json")
            .query(&[("key", self.config.api_key.as_str())]);
        if sse {
            req = req.query(&[("alt", "sse")]);
        }

        tracing::debug!(
            model = %self.config.model,
            contents = request.contents.len(),
            documents = request.inline_document_count(),
            "Sending generate request"
        );
        let resp = req.json(request).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Transport {
                status,
                message: text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl Transport for GeminiTransport {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        let resp = self.post("generateContent", request, false).await?;
        let body = resp.text().await?;

        match ResponseFrame::parse_reply(&body)? {
            ResponseFrame::Reply(data) | ResponseFrame::Delta(data) => Ok(data),
            ResponseFrame::Error(err) => Err(LlmError::Transport {
                status: err.code.unwrap_or(500),
                message: err.message,
            }),
        }
    }

    async fn stream_generate(&self, request: &GenerateRequest) -> Result<ByteStream, LlmError> {
        let resp = self.post("streamGenerateContent", request, true).await?;
        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(LlmError::from));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let mut config = GeminiConfig::new("k".into());
        config.base_url = "http://localhost:8080/v1beta/".into();
        config.model = "gemini-pro".into();
        assert_eq!(
            config.endpoint("streamGenerateContent"),
            "http://localhost:8080/v1beta/models/gemini-pro:streamGenerateContent"
        );
    }

    #[test]
    fn test_default_config() {
        let config = GeminiConfig::new("secret".into());
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
    }
}
