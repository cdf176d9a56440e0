//! Conversation-scoped model client: history, request building, streaming
//! decode and per-turn metrics.

use crate::db::models::{Message, Sender};
use crate::documents::Document;
use crate::llm::sse::{classify, FrameDecoder, SseLine};
use crate::llm::{
    ByteStream, Content, GenerateRequest, GenerationConfig, LlmError, Part, ResponseFrame, Role,
    Transport,
};
use crate::metrics::{estimate_tokens, Metrics, TurnMetrics};
use base64::Engine;
use futures::StreamExt;
use std::collections::VecDeque;
use std::time::Instant;

pub const SYSTEM_PROMPT: &str = "You are an assistant that answers questions about the PDF documents the user has provided, and nothing else.

Rules:
1. Base every answer only on the content of the provided PDFs.
2. When the PDFs do not contain the answer, reply \"I cannot find this information in the provided PDFs\".
3. Cite the pages you rely on with the exact format [PDF: filename, page X], placed right after the statement it supports.
4. Keep answers clear and concise.
5. Use markdown: headers to break up long answers, fenced code blocks for code.

Your answers should help the user find and verify information in their documents.";

/// Progress reported with every streamed fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub elapsed_ms: u64,
    /// Output token estimate accumulated so far, including this fragment.
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyEvent {
    Fragment { text: String, progress: Progress },
    /// Always the last event of a successful reply.
    Completed { text: String, metrics: TurnMetrics },
}

pub struct ConversationClient {
    transport: Box<dyn Transport>,
    system_prompt: String,
    generation: GenerationConfig,
    history: Vec<Content>,
    documents_sent: bool,
    metrics: Metrics,
}

/// Request plus the bookkeeping needed to commit the turn afterwards.
struct PreparedTurn {
    request: GenerateRequest,
    prompt: String,
    input_tokens: u64,
}

impl ConversationClient {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_config(transport, GenerationConfig::default())
    }

    pub fn with_config(transport: Box<dyn Transport>, generation: GenerationConfig) -> Self {
        Self {
            transport,
            system_prompt: SYSTEM_PROMPT.to_string(),
            generation,
            history: Vec::new(),
            documents_sent: false,
            metrics: Metrics::default(),
        }
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn documents_sent(&self) -> bool {
        self.documents_sent
    }

    /// Forget history, metrics and the sent-documents cache.
    pub fn reset_history(&mut self) {
        self.history.clear();
        self.metrics.clear();
        self.documents_sent = false;
    }

    /// Rebuild history from persisted messages. Only completed exchanges are
    /// kept: a user message with no model reply after it belongs to a turn
    /// that failed or was never sent. Any completed exchange means the model
    /// has already seen this conversation's documents.
    pub fn seed_history(&mut self, messages: &[Message], metrics: Metrics) {
        self.history = messages
            .windows(2)
            .filter(|pair| pair[0].sender == Sender::User && pair[1].sender == Sender::Model)
            .flat_map(|pair| {
                [
                    Content::user_text(pair[0].text.clone()),
                    Content::model_text(pair[1].text.clone()),
                ]
            })
            .collect();
        self.documents_sent = !self.history.is_empty();
        self.metrics = metrics;
    }

    fn prepare(&self, prompt: &str, documents: &[&Document]) -> PreparedTurn {
        let mut contents = Vec::with_capacity(self.history.len() + documents.len() + 2);
        let mut input_tokens = estimate_tokens(&self.system_prompt);

        contents.push(Content::user_text(self.system_prompt.clone()));
        for content in &self.history {
            input_tokens += estimate_tokens(&content.text());
            contents.push(content.clone());
        }
        if !self.documents_sent {
            let engine = base64::engine::general_purpose::STANDARD;
            for document in documents {
                input_tokens += estimate_tokens(&document.text());
                contents.push(Content {
                    role: Role::User,
                    parts: vec![Part::pdf(engine.encode(&document.bytes))],
                });
            }
        }
        input_tokens += estimate_tokens(prompt);
        contents.push(Content::user_text(prompt));

        PreparedTurn {
            request: GenerateRequest {
                contents,
                generation_config: self.generation.clone(),
            },
            prompt: prompt.to_string(),
            input_tokens,
        }
    }

    fn commit(
        &mut self,
        prompt: String,
        reply: &str,
        input_tokens: u64,
        output_tokens: u64,
        started: Instant,
    ) -> TurnMetrics {
        self.history.push(Content::user_text(prompt));
        self.history.push(Content::model_text(reply));
        self.documents_sent = true;

        let turn = TurnMetrics {
            latency_ms: started.elapsed().as_millis() as u64,
            input_tokens,
            output_tokens,
        };
        self.metrics.record(turn);
        tracing::info!(
            latency_ms = turn.latency_ms,
            input_tokens,
            output_tokens,
            "Model turn completed"
        );
        turn
    }

    /// Start a streamed reply. The returned stream must be driven to its end
    /// for the turn to be recorded.
    pub async fn send_stream(
        &mut self,
        prompt: &str,
        documents: &[&Document],
    ) -> Result<ReplyStream<'_>, LlmError> {
        let started = Instant::now();
        let turn = self.prepare(prompt, documents);
        let bytes = self.transport.stream_generate(&turn.request).await?;

        Ok(ReplyStream {
            client: self,
            bytes,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            text: String::new(),
            prompt: turn.prompt,
            input_tokens: turn.input_tokens,
            output_tokens: 0,
            saw_candidates: false,
            started,
            exhausted: false,
            finished: false,
        })
    }

    /// Callback form of [`send_stream`](Self::send_stream); returns the full reply.
    pub async fn send(
        &mut self,
        prompt: &str,
        documents: &[&Document],
        mut on_chunk: impl FnMut(&str, Progress),
    ) -> Result<String, LlmError> {
        let mut reply = self.send_stream(prompt, documents).await?;
        while let Some(event) = reply.next().await {
            match event? {
                ReplyEvent::Fragment { text, progress } => on_chunk(&text, progress),
                ReplyEvent::Completed { text, .. } => return Ok(text),
            }
        }
        Err(LlmError::NoResponse)
    }

    /// Single-shot variant for transports without incremental delivery.
    pub async fn send_once(
        &mut self,
        prompt: &str,
        documents: &[&Document],
    ) -> Result<String, LlmError> {
        let started = Instant::now();
        let turn = self.prepare(prompt, documents);
        let response = self.transport.generate(&turn.request).await?;
        if response.candidates.is_empty() {
            return Err(LlmError::NoResponse);
        }

        let text = response.text().unwrap_or_default();
        let output_tokens = estimate_tokens(&text);
        self.commit(turn.prompt, &text, turn.input_tokens, output_tokens, started);
        Ok(text)
    }
}

/// A finite, non-restartable sequence of reply events.
pub struct ReplyStream<'a> {
    client: &'a mut ConversationClient,
    bytes: ByteStream,
    decoder: FrameDecoder,
    pending: VecDeque<String>,
    text: String,
    prompt: String,
    input_tokens: u64,
    output_tokens: u64,
    saw_candidates: bool,
    started: Instant,
    exhausted: bool,
    finished: bool,
}

impl ReplyStream<'_> {
    /// Next fragment, then a single `Completed` (or an error), then `None`.
    pub async fn next(&mut self) -> Option<Result<ReplyEvent, LlmError>> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(fragment) = self.pending.pop_front() {
                self.output_tokens += estimate_tokens(&fragment);
                self.text.push_str(&fragment);
                return Some(Ok(ReplyEvent::Fragment {
                    text: fragment,
                    progress: Progress {
                        elapsed_ms: self.started.elapsed().as_millis() as u64,
                        output_tokens: self.output_tokens,
                    },
                }));
            }

            if self.exhausted {
                self.finished = true;
                return Some(self.complete());
            }

            match self.bytes.next().await {
                Some(Ok(chunk)) => {
                    for line in self.decoder.push(&chunk) {
                        self.decode_line(&line);
                    }
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    if let Some(line) = self.decoder.finish() {
                        self.decode_line(&line);
                    }
                    self.exhausted = true;
                }
            }
        }
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    fn decode_line(&mut self, line: &str) {
        if self.exhausted {
            return;
        }
        let data = match classify(line) {
            SseLine::Data(data) => data,
            SseLine::Done => {
                self.exhausted = true;
                return;
            }
            SseLine::Other => return,
        };
        match ResponseFrame::parse_stream(data) {
            Ok(ResponseFrame::Delta(resp)) | Ok(ResponseFrame::Reply(resp)) => {
                if !resp.candidates.is_empty() {
                    self.saw_candidates = true;
                }
                if let Some(text) = resp.text() {
                    self.pending.push_back(text);
                }
            }
            Ok(ResponseFrame::Error(err)) => {
                tracing::warn!(code = ?err.code, message = %err.message, "Error frame in stream");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed stream frame");
            }
        }
    }

    fn complete(&mut self) -> Result<ReplyEvent, LlmError> {
        if !self.saw_candidates {
            return Err(LlmError::NoResponse);
        }
        let text = std::mem::take(&mut self.text);
        let prompt = std::mem::take(&mut self.prompt);
        let metrics = self.client.commit(
            prompt,
            &text,
            self.input_tokens,
            self.output_tokens,
            self.started,
        );
        Ok(ReplyEvent::Completed { text, metrics })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::llm::GenerateResponse;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// One scripted outcome for a transport call.
    pub enum Script {
        Chunks(Vec<Vec<u8>>),
        Status(u16),
        Reply(&'static str),
    }

    /// In-memory transport replaying scripted outcomes and recording requests.
    #[derive(Clone, Default)]
    pub struct FakeTransport {
        pub requests: Arc<Mutex<Vec<GenerateRequest>>>,
        scripts: Arc<Mutex<VecDeque<Script>>>,
    }

    impl FakeTransport {
        pub fn push(&self, script: Script) {
            self.scripts.lock().unwrap().push_back(script);
        }

        pub fn push_text(&self, fragments: &[&str]) {
            let chunks = fragments
                .iter()
                .map(|f| frame(f).into_bytes())
                .collect();
            self.push(Script::Chunks(chunks));
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn last_request(&self) -> GenerateRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }

        fn next_script(&self, request: &GenerateRequest) -> Script {
            self.requests.lock().unwrap().push(request.clone());
            self.scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted response left")
        }
    }

    pub fn frame(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]})
        )
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
            match self.next_script(request) {
                Script::Reply(body) => match ResponseFrame::parse_reply(body)? {
                    ResponseFrame::Reply(resp) | ResponseFrame::Delta(resp) => Ok(resp),
                    ResponseFrame::Error(err) => Err(LlmError::Transport {
                        status: 500,
                        message: err.message,
                    }),
                },
                Script::Status(status) => Err(LlmError::Transport {
                    status,
                    message: "scripted failure".into(),
                }),
                Script::Chunks(_) => panic!("streaming script used for generate"),
            }
        }

        async fn stream_generate(&self, request: &GenerateRequest) -> Result<ByteStream, LlmError> {
            match self.next_script(request) {
                Script::Chunks(chunks) => Ok(Box::pin(futures::stream::iter(
                    chunks.into_iter().map(Ok::<Vec<u8>, LlmError>),
                ))),
                Script::Status(status) => Err(LlmError::Transport {
                    status,
                    message: "scripted failure".into(),
                }),
                Script::Reply(_) => panic!("single-shot script used for stream"),
            }
        }
    }
}
