//! Plain-text extraction from uploaded documents
//!
//! Only PDF and plain text are recognized. Failures come back as
//! [`ExtractionError`], never as text, so an error message cannot end up in a
//! prompt posing as document content.

use std::io::Write;
use std::path::Path;

use pdf_oxide::PdfDocument;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported file format.")]
    UnsupportedFormat { filename: String },
    #[error("Error reading PDF file: {0}")]
    Pdf(String),
    #[error("Error reading TXT file: {0}")]
    Text(String),
}

/// A file handed over by the user, read fully into memory
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub filename: String,
    pub text: String,
}

impl ExtractedDocument {
    /// First `max_chars` characters, for the attachment preview box
    pub fn preview(&self, max_chars: usize) -> &str {
        match self.text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => &self.text[..byte_idx],
            None => &self.text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    /// Everything after the last `.`, case-insensitive. A name without a dot
    /// is treated as its own extension.
    pub fn from_filename(name: &str) -> Option<Self> {
        let ext = name.rsplit('.').next().unwrap_or(name).to_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "txt" => Some(DocumentKind::Text),
            _ => None,
        }
    }

    pub fn accepted_extensions() -> &'static [&'static str] {
        &["pdf", "txt"]
    }
}

pub fn extract(file: &UploadedFile) -> Result<ExtractedDocument, ExtractionError> {
    let kind = DocumentKind::from_filename(&file.name).ok_or_else(|| {
        ExtractionError::UnsupportedFormat {
            filename: file.name.clone(),
        }
    })?;

    let text = match kind {
        DocumentKind::Pdf => extract_pdf(&file.bytes)?,
        DocumentKind::Text => {
            let decoded = std::str::from_utf8(&file.bytes)
                .map_err(|e| ExtractionError::Text(e.to_string()))?;
            flatten_newlines(decoded)
        }
    };

    tracing::info!(
        filename = %file.name,
        kind = ?kind,
        chars = text.chars().count(),
        "extracted document text"
    );
    tracing::debug!(
        filename = %file.name,
        preview = %text.lines().take(5).collect::<Vec<_>>().join("\n"),
        "document preview"
    );

    Ok(ExtractedDocument {
        filename: file.name.clone(),
        text,
    })
}

/// Read a text file from disk and flatten its line breaks
pub fn extract_text_file(path: &Path) -> Result<String, ExtractionError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ExtractionError::Text(e.to_string()))?;
    Ok(flatten_newlines(&content))
}

/// Replace every `\n` with a single space so the text sits inline in a prompt
pub fn flatten_newlines(text: &str) -> String {
    text.replace('\n', " ")
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut temp_file = tempfile::NamedTempFile::new()
        .map_err(|e| ExtractionError::Pdf(format!("failed to create temp file: {e}")))?;
    temp_file
        .write_all(bytes)
        .map_err(|e| ExtractionError::Pdf(format!("failed to write temp file: {e}")))?;

    let doc =
        PdfDocument::open(temp_file.path()).map_err(|e| ExtractionError::Pdf(e.to_string()))?;
    let page_count = doc
        .page_count()
        .map_err(|e| ExtractionError::Pdf(e.to_string()))?;

    // Pages are joined as-is, in order
    let mut text = String::new();
    for page_index in 0..page_count {
        let page_text = doc
            .extract_text(page_index)
            .map_err(|e| ExtractionError::Pdf(e.to_string()))?;
        text.push_str(&page_text);
    }

    Ok(text)
}
