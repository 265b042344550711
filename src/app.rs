use std::path::PathBuf;
use std::sync::Arc;

use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ollama_playground::prompt::compose_turn;
use ollama_playground::{
    extract, settle, ChatBackend, Config, Conversation, ExtractedDocument, ModelSession,
    OllamaClient, ReplyEvent, ReplyOutcome, UploadedFile,
};

use crate::tui::AppEvent;

/// Characters of an attachment shown in the preview box
pub const PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Popup {
    None,
    ModelPicker,
    Attach,
}

/// What the transcript shows. User entries hold the question as typed, not
/// the templated prompt that went into the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEntry {
    User(String),
    Assistant(String),
    Error(String),
    Info(String),
}

pub struct App {
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub popup: Popup,

    // Prompt input
    pub input: String,
    pub cursor: usize,

    // Chat state
    pub conversation: Conversation,
    pub transcript: Vec<TranscriptEntry>,
    pub streaming: Option<String>,
    pub streaming_grounded: bool,
    pub reply_cancel: Option<CancellationToken>,
    pub scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub chat_area: Option<Rect>,
    pub animation_frame: u8,

    // Attachment waiting for the next question
    pub attachment: Option<ExtractedDocument>,
    pub attach_input: String,
    pub attach_cursor: usize,

    // Model picker
    pub available_models: Vec<String>,
    pub model_picker_state: ListState,
    pub selected_model: Option<String>,
    pub models_error: Option<String>,

    pub client: Arc<OllamaClient>,
    event_tx: mpsc::UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(
        client: Arc<OllamaClient>,
        selected_model: Option<String>,
        event_tx: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            popup: Popup::None,

            input: String::new(),
            cursor: 0,

            conversation: Conversation::new(),
            transcript: Vec::new(),
            streaming: None,
            streaming_grounded: false,
            reply_cancel: None,
            scroll: 0,
            chat_height: 0,
            chat_width: 0,
            chat_area: None,
            animation_frame: 0,

            attachment: None,
            attach_input: String::new(),
            attach_cursor: 0,

            available_models: Vec::new(),
            model_picker_state: ListState::default(),
            selected_model,
            models_error: None,

            client,
            event_tx,
        }
    }

    pub fn is_replying(&self) -> bool {
        self.reply_cancel.is_some()
    }

    /// Fetch the local model list; keep the current choice if it is installed
    pub async fn refresh_models(&mut self) {
        match self.client.list_models().await {
            Ok(models) => {
                self.models_error = None;
                let keep = self
                    .selected_model
                    .as_ref()
                    .is_some_and(|m| models.contains(m));
                if !keep {
                    self.selected_model = models.first().cloned();
                }
                tracing::debug!(count = models.len(), selected = ?self.selected_model, "model list refreshed");
                self.available_models = models;
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not list models");
                self.models_error = Some(e.to_string());
                self.available_models.clear();
            }
        }
    }

    pub fn open_model_picker(&mut self) {
        let current_idx = self
            .selected_model
            .as_ref()
            .and_then(|m| self.available_models.iter().position(|a| a == m))
            .unwrap_or(0);
        self.model_picker_state.select(Some(current_idx));
        self.popup = Popup::ModelPicker;
    }

    pub fn model_picker_nav_down(&mut self) {
        let len = self.available_models.len();
        if len > 0 {
            let i = self.model_picker_state.selected().unwrap_or(0);
            self.model_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn select_model(&mut self) {
        if let Some(model) = self
            .model_picker_state
            .selected()
            .and_then(|i| self.available_models.get(i))
            .cloned()
        {
            if let Err(e) = Config::save_default_model(&model) {
                tracing::warn!(error = %e, "could not persist default model");
            }
            self.selected_model = Some(model);
        }
        self.popup = Popup::None;
    }

    /// Extract the file at `attach_input` and hold it for the next question
    pub async fn attach_file(&mut self) {
        let raw = self.attach_input.trim().to_string();
        self.attach_input.clear();
        self.attach_cursor = 0;
        self.popup = Popup::None;
        if raw.is_empty() {
            return;
        }

        let path = expand_home(&raw);
        let extracted = tokio::task::spawn_blocking(move || {
            let upload = UploadedFile::from_path(&path)
                .map_err(|e| format!("Could not open {}: {}", path.display(), e))?;
            extract(&upload).map_err(|e| e.to_string())
        })
        .await;

        match extracted {
            Ok(Ok(doc)) => {
                self.transcript.push(TranscriptEntry::Info(format!(
                    "Attached {} ({} characters)",
                    doc.filename,
                    doc.text.chars().count()
                )));
                self.attachment = Some(doc);
            }
            Ok(Err(message)) => {
                tracing::warn!(path = %raw, error = %message, "attachment rejected");
                self.transcript.push(TranscriptEntry::Error(message));
            }
            Err(e) => {
                self.transcript.push(TranscriptEntry::Error(e.to_string()));
            }
        }
        self.scroll_to_bottom();
    }

    pub fn detach_file(&mut self) {
        if let Some(doc) = self.attachment.take() {
            self.transcript
                .push(TranscriptEntry::Info(format!("Removed {}", doc.filename)));
        }
    }

    /// Turn the input into the next user message and start streaming a reply
    pub fn submit_prompt(&mut self) {
        if self.input.trim().is_empty() || self.is_replying() {
            return;
        }
        let Some(model) = self.selected_model.clone() else {
            self.transcript.push(TranscriptEntry::Error(
                "You have not pulled any model from Ollama yet!".to_string(),
            ));
            return;
        };

        let question = std::mem::take(&mut self.input);
        self.cursor = 0;

        let attachment = self.attachment.take();
        let prompt = compose_turn(&mut self.conversation, &question, attachment.as_ref());
        self.transcript.push(TranscriptEntry::User(question));

        let session = ModelSession::new(Arc::clone(&self.client), model);
        let mut pending = session.submit(&mut self.conversation, prompt);

        self.streaming = Some(String::new());
        self.streaming_grounded = attachment.is_some();
        self.reply_cancel = Some(pending.cancel.clone());

        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = pending.next_event().await {
                if tx.send(AppEvent::Reply(event)).is_err() {
                    break;
                }
            }
        });

        self.scroll_to_bottom();
    }

    pub fn on_reply_event(&mut self, event: ReplyEvent) {
        match event {
            ReplyEvent::Token(fragment) => {
                if let Some(text) = self.streaming.as_mut() {
                    text.push_str(&fragment);
                }
            }
            ReplyEvent::Finished(outcome) => {
                settle(&mut self.conversation, &outcome);
                match outcome {
                    ReplyOutcome::Completed(text) => {
                        self.transcript.push(TranscriptEntry::Assistant(text));
                    }
                    ReplyOutcome::Cancelled { partial } => {
                        if !partial.is_empty() {
                            self.transcript.push(TranscriptEntry::Assistant(partial));
                        }
                        self.transcript
                            .push(TranscriptEntry::Info("Response cancelled".to_string()));
                    }
                    ReplyOutcome::Failed(e) => {
                        self.transcript.push(TranscriptEntry::Error(e.to_string()));
                    }
                }
                self.streaming = None;
                self.reply_cancel = None;
            }
        }
        self.scroll_to_bottom();
    }

    pub fn cancel_reply(&mut self) {
        if let Some(cancel) = &self.reply_cancel {
            cancel.cancel();
        }
    }

    pub fn tick_animation(&mut self) {
        if self.is_replying() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max = self.transcript_line_count().saturating_sub(self.visible_height());
        self.scroll = self.scroll.saturating_add(lines).min(max);
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_sub(lines);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = self
            .transcript_line_count()
            .saturating_sub(self.visible_height());
    }

    fn visible_height(&self) -> u16 {
        if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        }
    }

    /// Rough count of rendered transcript lines after wrapping, mirroring the
    /// layout in `ui::transcript_lines`
    pub fn transcript_line_count(&self) -> u16 {
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let wrapped = |text: &str| -> usize {
            text.lines()
                .map(|line| line.chars().count() / wrap_width + 1)
                .sum::<usize>()
                .max(1)
        };

        let mut total: usize = 0;
        for entry in &self.transcript {
            total += match entry {
                TranscriptEntry::User(text) | TranscriptEntry::Assistant(text) => {
                    1 + wrapped(text) + 1
                }
                TranscriptEntry::Error(text) | TranscriptEntry::Info(text) => wrapped(text) + 1,
            };
        }
        if let Some(partial) = &self.streaming {
            total += 1 + wrapped(partial) + 1;
        }

        total.min(u16::MAX as usize) as u16
    }
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}
