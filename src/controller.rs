//! Chat controller: owns the conversations, drives the client and the view.

use crate::citation::{cited_passage, parse_citations, Citation};
use crate::client::{ConversationClient, Progress, ReplyEvent};
use crate::db::models::{Conversation, Message, Sender};
use crate::db::{Database, DEFAULT_TITLE};
use crate::documents::{Document, DocumentStore, ExtractionError};
use crate::error::ChatError;
use crate::metrics::{Metrics, TurnMetrics};
use crate::preview::{PageRenderer, PreviewPanel};
use std::path::PathBuf;

pub const GREETING: &str = "Start a new conversation about your PDFs!";
pub const UPLOAD_NOTICE: &str = "Please upload at least one PDF file first.";
pub const ERROR_NOTICE: &str = "Sorry, there was an error generating the response.";

const TITLE_MAX_CHARS: usize = 30;

/// The front-end the controller renders into.
pub trait ChatView {
    fn clear(&mut self);
    fn show_message(&mut self, message: &Message);
    /// Transient text that is not part of the conversation.
    fn show_notice(&mut self, text: &str);
    fn set_sending(&mut self, sending: bool);
    fn begin_reply(&mut self);
    /// Called with the full reply so far after every fragment.
    fn update_reply(&mut self, accumulated: &str, progress: &Progress);
    fn end_reply(&mut self, message: &Message, citations: &[Citation]);
    fn abort_reply(&mut self);
    fn show_metrics(&mut self, metrics: &Metrics);
    fn show_conversations(&mut self, conversations: &[Conversation], current: &str);
    fn show_preview(&mut self, preview: &PreviewPanel);
    fn confirm(&mut self, question: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Sending,
    /// The last send failed; a new submit is accepted.
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Ignored,
    NeedsDocuments,
    Replied(TurnMetrics),
    Failed(String),
}

pub struct ChatController<V: ChatView> {
    db: Database,
    documents: DocumentStore,
    client: ConversationClient,
    renderer: Box<dyn PageRenderer>,
    view: V,
    preview: PreviewPanel,
    current: String,
    messages: Vec<Message>,
    state: SendState,
    streaming: bool,
}

/// First user message, cut to a fixed number of characters.
pub fn derive_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", cut.trim_end())
}

fn new_conversation_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

impl<V: ChatView> ChatController<V> {
    /// Resume the most recent conversation, or start one if none exist.
    pub fn start(
        db: Database,
        documents: DocumentStore,
        client: ConversationClient,
        renderer: Box<dyn PageRenderer>,
        view: V,
        viewport_width: f32,
    ) -> Result<Self, ChatError> {
        let mut controller = Self {
            db,
            documents,
            client,
            renderer,
            view,
            preview: PreviewPanel::new(viewport_width),
            current: String::new(),
            messages: Vec::new(),
            state: SendState::Idle,
            streaming: true,
        };
        let latest = controller.db.list_conversations()?.into_iter().next();
        match latest {
            Some(conversation) => controller.switch_conversation(&conversation.id)?,
            None => {
                controller.create_conversation()?;
            }
        }
        Ok(controller)
    }

    /// Switch to single-shot replies for transports without incremental delivery.
    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    pub fn current_id(&self) -> &str {
        &self.current
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> &SendState {
        &self.state
    }

    pub fn metrics(&self) -> &Metrics {
        self.client.metrics()
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn preview(&self) -> &PreviewPanel {
        &self.preview
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        Ok(self.db.list_conversations()?)
    }

    pub fn list_conversations(&mut self) -> Result<(), ChatError> {
        let conversations = self.db.list_conversations()?;
        self.view.show_conversations(&conversations, &self.current);
        Ok(())
    }

    // ── Conversations ──

    pub fn create_conversation(&mut self) -> Result<String, ChatError> {
        let id = new_conversation_id();
        self.db.create_conversation(&id, DEFAULT_TITLE)?;
        self.current = id.clone();
        self.messages.clear();
        self.client.reset_history();
        self.documents.clear();
        self.preview.close();
        self.state = SendState::Idle;

        self.view.clear();
        self.view.show_notice(GREETING);
        self.view.show_metrics(self.client.metrics());
        tracing::info!(conversation = %id, "Conversation created");
        Ok(id)
    }

    pub fn switch_conversation(&mut self, id: &str) -> Result<(), ChatError> {
        let record = self
            .db
            .load_record(id)?
            .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;

        self.client.seed_history(&record.messages, record.metrics);
        self.current = record.id;
        self.messages = record.messages;
        self.preview.close();
        self.state = SendState::Idle;

        self.view.clear();
        for message in &self.messages {
            self.view.show_message(message);
        }
        self.view.show_metrics(self.client.metrics());
        tracing::debug!(conversation = %id, messages = self.messages.len(), "Switched conversation");
        Ok(())
    }

    /// Returns false when the user declined or the id is unknown.
    pub fn delete_conversation(&mut self, id: &str) -> Result<bool, ChatError> {
        if !self.db.conversation_exists(id)? {
            return Ok(false);
        }
        if !self.view.confirm("Are you sure you want to delete this chat?") {
            return Ok(false);
        }
        self.db.delete_conversation(id)?;
        tracing::info!(conversation = %id, "Conversation deleted");
        if id == self.current {
            self.create_conversation()?;
        }
        Ok(true)
    }

    // ── Documents ──

    pub async fn upload(
        &mut self,
        paths: Vec<PathBuf>,
    ) -> Vec<(PathBuf, Result<String, ExtractionError>)> {
        let results = self.documents.add_many(paths).await;
        for (path, result) in &results {
            if let Err(e) = result {
                self.view
                    .show_notice(&format!("Could not read {}: {}", path.display(), e));
            }
        }
        results
    }

    pub fn add_document(&mut self, document: Document) -> String {
        self.documents.insert(document)
    }

    pub fn remove_document(&mut self, filename: &str) -> bool {
        self.documents.remove(filename)
    }

    // ── Sending ──

    pub async fn submit(&mut self, prompt: &str) -> Result<SubmitOutcome, ChatError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Ok(SubmitOutcome::Ignored);
        }
        if self.state == SendState::Sending {
            return Err(ChatError::Busy);
        }

        let first_exchange = !self.messages.iter().any(|m| m.sender == Sender::Model);
        self.push_message(Message::user(prompt))?;

        if self.documents.is_empty() {
            self.view.show_notice(UPLOAD_NOTICE);
            return Ok(SubmitOutcome::NeedsDocuments);
        }

        self.state = SendState::Sending;
        self.view.set_sending(true);
        let result = self.stream_reply(prompt).await;
        self.view.set_sending(false);

        match result {
            Ok((text, metrics)) => {
                self.state = SendState::Idle;
                let message = Message::model(text);
                self.db.add_message(&self.current, &message)?;
                self.view.end_reply(&message, &parse_citations(&message.text));
                self.messages.push(message);

                if first_exchange {
                    // Earlier prompts may have gone unanswered; the title follows the first one.
                    let first_prompt = self
                        .messages
                        .iter()
                        .find(|m| m.sender == Sender::User)
                        .map_or(prompt, |m| m.text.as_str());
                    let title = derive_title(first_prompt);
                    self.db.update_conversation_title(&self.current, &title)?;
                }
                for filename in self.documents.filenames() {
                    self.db.add_document_reference(&self.current, &filename)?;
                }
                self.db.save_metrics(&self.current, self.client.metrics())?;
                self.view.show_metrics(self.client.metrics());
                Ok(SubmitOutcome::Replied(metrics))
            }
            Err(e) => {
                tracing::error!(conversation = %self.current, error = %e, "Generating a reply failed");
                self.state = SendState::Error(e.to_string());
                self.view.abort_reply();
                self.view.show_notice(ERROR_NOTICE);
                Ok(SubmitOutcome::Failed(e.to_string()))
            }
        }
    }

    async fn stream_reply(&mut self, prompt: &str) -> Result<(String, TurnMetrics), ChatError> {
        let documents: Vec<&Document> = self.documents.list();
        if !self.streaming {
            let text = self.client.send_once(prompt, &documents).await?;
            let metrics = self
                .client
                .metrics()
                .last_turn()
                .copied()
                .unwrap_or_default();
            self.view.begin_reply();
            self.view.update_reply(
                &text,
                &Progress {
                    elapsed_ms: metrics.latency_ms,
                    output_tokens: metrics.output_tokens,
                },
            );
            return Ok((text, metrics));
        }

        let mut reply = self.client.send_stream(prompt, &documents).await?;
        self.view.begin_reply();

        while let Some(event) = reply.next().await {
            match event? {
                ReplyEvent::Fragment { progress, .. } => {
                    self.view.update_reply(reply.text(), &progress);
                }
                ReplyEvent::Completed { text, metrics } => return Ok((text, metrics)),
            }
        }
        Err(ChatError::Llm(crate::llm::LlmError::NoResponse))
    }

    fn push_message(&mut self, message: Message) -> Result<(), ChatError> {
        self.db.add_message(&self.current, &message)?;
        self.view.show_message(&message);
        self.messages.push(message);
        Ok(())
    }

    // ── Citations & preview ──

    /// Citations in the most recent model message.
    pub fn last_reply_citations(&self) -> Vec<Citation> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.sender == Sender::Model)
            .map(|m| parse_citations(&m.text))
            .unwrap_or_default()
    }

    /// Open the cited page; the sentence carrying the citation is highlighted
    /// when it can be found. Returns whether something was highlighted.
    pub fn open_citation(&mut self, citation: &Citation) -> Result<bool, ChatError> {
        let passage = self
            .messages
            .iter()
            .rev()
            .filter(|m| m.sender == Sender::Model)
            .find(|m| m.text.get(citation.span.clone()).is_some_and(|s| s.starts_with("[PDF:")))
            .and_then(|m| cited_passage(&m.text, citation))
            .map(str::to_string);
        self.open_page(&citation.filename, citation.page, passage.as_deref())
    }

    pub fn open_page(
        &mut self,
        filename: &str,
        page: usize,
        passage: Option<&str>,
    ) -> Result<bool, ChatError> {
        let document = self
            .documents
            .get(filename)
            .ok_or_else(|| ChatError::DocumentNotFound(filename.to_string()))?;
        let rendered = self.renderer.render(document, page)?;
        let highlighted = self.preview.open(rendered, passage);
        if !highlighted {
            tracing::debug!(%filename, page, "Cited passage not found on page");
        }
        self.view.show_preview(&self.preview);
        Ok(highlighted)
    }

    pub fn zoom_in(&mut self) {
        self.preview.zoom_in();
        self.view.show_preview(&self.preview);
    }

    pub fn zoom_out(&mut self) {
        self.preview.zoom_out();
        self.view.show_preview(&self.preview);
    }

    pub fn fit_to_width(&mut self) {
        self.preview.fit_to_width();
        self.view.show_preview(&self.preview);
    }
}
