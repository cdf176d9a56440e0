pub mod citation;
pub mod client;
pub mod commands;
pub mod config;
pub mod controller;
pub mod db;
pub mod documents;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod preview;

pub use client::{ConversationClient, ReplyEvent, ReplyStream};
pub use commands::run;
pub use controller::{ChatController, ChatView, SubmitOutcome};
pub use documents::{Document, DocumentStore, ExtractionError};
pub use error::ChatError;
pub use llm::LlmError;
