pub mod config;
pub mod conversation;
pub mod extractor;
pub mod logging;
pub mod ollama;
pub mod prompt;
pub mod session;

// Re-export main types for convenience
pub use config::Config;
pub use conversation::{ChatMessage, ChatRole, Conversation};
pub use extractor::{extract, DocumentKind, ExtractedDocument, ExtractionError, UploadedFile};
pub use ollama::{ChatBackend, ChatError, OllamaClient, TokenStream};
pub use prompt::{compose, compose_turn, Grounding};
pub use session::{respond, settle, ModelSession, PendingReply, ReplyEvent, ReplyOutcome};
