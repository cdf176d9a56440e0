use crate::documents::ExtractionError;
use crate::llm::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("a reply is already being generated")]
    Busy,
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("document not found: {0}")]
    DocumentNotFound(String),
    #[error("{filename} has no page {page}")]
    PageOutOfRange { filename: String, page: usize },
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ChatError::Busy.to_string(), "a reply is already being generated");
        assert_eq!(
            ChatError::PageOutOfRange {
                filename: "a.pdf".into(),
                page: 9
            }
            .to_string(),
            "a.pdf has no page 9"
        );
        assert_eq!(
            ChatError::from(LlmError::NoResponse).to_string(),
            "No response generated"
        );
        assert_eq!(
            ChatError::ConversationNotFound("x".into()).to_string(),
            "conversation not found: x"
        );
    }
}
