use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Failed to read {filename}: {source}")]
    Io {
        filename: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF parse error in {filename}: {message}")]
    Pdf { filename: String, message: String },
    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// An uploaded PDF with its extracted text.
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Text per page; index 0 is page 1.
    pub pages: Vec<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl Document {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>, pages: Vec<String>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
            pages,
            uploaded_at: Utc::now(),
        }
    }

    /// Parse PDF bytes into a document.
    pub fn from_bytes(filename: &str, bytes: Vec<u8>) -> Result<Self, ExtractionError> {
        let pages = extract_pages(filename, &bytes)?;
        Ok(Self::new(filename, bytes, pages))
    }

    pub fn from_path(path: &Path) -> Result<Self, ExtractionError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let bytes = fs::read(path).map_err(|source| ExtractionError::Io {
            filename: filename.clone(),
            source,
        })?;
        Self::from_bytes(&filename, bytes)
    }

    /// Page text, 1-based.
    pub fn page(&self, number: usize) -> Option<&str> {
        number
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .map(String::as_str)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn text(&self) -> String {
        self.pages.join("\n")
    }
}

/// Extract the text of every page.
pub fn extract_pages(filename: &str, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
    // pdf-extract panics on some malformed inputs instead of returning an error.
    let result = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|payload| ExtractionError::Pdf {
            filename: filename.to_string(),
            message: panic_message(&*payload),
        })?;
    result.map_err(|e| ExtractionError::Pdf {
        filename: filename.to_string(),
        message: e.to_string(),
    })
}

/// Text carried by a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "document could not be parsed".to_string()
    }
}

/// Uploaded documents keyed by filename. Re-uploading a name replaces it.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: HashMap<String, Document>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, document: Document) -> String {
        let filename = document.filename.clone();
        if self.documents.insert(filename.clone(), document).is_some() {
            tracing::debug!(%filename, "Replaced existing document");
        }
        filename
    }

    pub fn add_bytes(&mut self, filename: &str, bytes: Vec<u8>) -> Result<String, ExtractionError> {
        let document = Document::from_bytes(filename, bytes)?;
        Ok(self.insert(document))
    }

    pub fn add(&mut self, path: &Path) -> Result<String, ExtractionError> {
        let document = Document::from_path(path)?;
        tracing::info!(
            filename = %document.filename,
            pages = document.page_count(),
            "Document added"
        );
        Ok(self.insert(document))
    }

    /// Extract several files concurrently. Each path reports its own result.
    pub async fn add_many(
        &mut self,
        paths: Vec<PathBuf>,
    ) -> Vec<(PathBuf, Result<String, ExtractionError>)> {
        let tasks = paths.into_iter().map(|path| async move {
            let task_path = path.clone();
            let result = tokio::task::spawn_blocking(move || Document::from_path(&task_path))
                .await
                .map_err(|e| ExtractionError::Task(e.to_string()))
                .and_then(|r| r);
            (path, result)
        });
        let results = join_all(tasks).await;

        results
            .into_iter()
            .map(|(path, result)| {
                let result = result.map(|document| self.insert(document));
                if let Err(e) = &result {
                    tracing::warn!(path = %path.display(), error = %e, "Document upload failed");
                }
                (path, result)
            })
            .collect()
    }

    pub fn remove(&mut self, filename: &str) -> bool {
        self.documents.remove(filename).is_some()
    }

    pub fn get(&self, filename: &str) -> Option<&Document> {
        self.documents.get(filename)
    }

    /// All documents; the order is unspecified.
    pub fn list(&self) -> Vec<&Document> {
        self.documents.values().collect()
    }

    pub fn filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.documents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
