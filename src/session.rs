//! One request/response cycle against the selected model
//!
//! [`ModelSession::submit`] records the user message, then a producer task
//! pulls the token stream and feeds a bounded channel that the UI drains at
//! its own pace. The final event is always a single [`ReplyEvent::Finished`].

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::conversation::{ChatMessage, Conversation};
use crate::ollama::{ChatBackend, ChatError};

const REPLY_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum ReplyEvent {
    Token(String),
    Finished(ReplyOutcome),
}

#[derive(Debug)]
pub enum ReplyOutcome {
    Completed(String),
    Cancelled { partial: String },
    Failed(ChatError),
}

pub struct PendingReply {
    pub events: mpsc::Receiver<ReplyEvent>,
    pub cancel: CancellationToken,
}

impl PendingReply {
    pub async fn next_event(&mut self) -> Option<ReplyEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

pub struct ModelSession<B> {
    backend: Arc<B>,
    model: String,
}

impl<B: ChatBackend + 'static> ModelSession<B> {
    pub fn new(backend: Arc<B>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Append `prompt` as the next user message and start streaming a reply
    /// over the whole history. Must be called from within a tokio runtime.
    pub fn submit(&self, conversation: &mut Conversation, prompt: String) -> PendingReply {
        conversation.push_user(prompt);
        let history = conversation.messages().to_vec();

        let (tx, rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let backend = Arc::clone(&self.backend);
        let model = self.model.clone();
        let token = cancel.clone();

        tracing::info!(model = %model, history_len = history.len(), "submitting chat request");

        tokio::spawn(async move {
            let outcome = produce(backend.as_ref(), &model, &history, &tx, &token).await;
            let _ = tx.send(ReplyEvent::Finished(outcome)).await;
        });

        PendingReply { events: rx, cancel }
    }
}

async fn produce<B: ChatBackend + ?Sized>(
    backend: &B,
    model: &str,
    history: &[ChatMessage],
    tx: &mpsc::Sender<ReplyEvent>,
    cancel: &CancellationToken,
) -> ReplyOutcome {
    let mut stream = tokio::select! {
        result = backend.stream_chat(model, history) => match result {
            Ok(stream) => stream,
            Err(e) => return ReplyOutcome::Failed(e),
        },
        _ = cancel.cancelled() => return ReplyOutcome::Cancelled { partial: String::new() },
    };

    let mut text = String::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ReplyOutcome::Cancelled { partial: text },
            next = stream.next() => match next {
                Some(Ok(fragment)) => {
                    text.push_str(&fragment);
                    if tx.send(ReplyEvent::Token(fragment)).await.is_err() {
                        // Nobody is listening any more
                        return ReplyOutcome::Cancelled { partial: text };
                    }
                }
                Some(Err(e)) => return ReplyOutcome::Failed(e),
                None => return ReplyOutcome::Completed(text),
            },
        }
    }
}

/// Record the outcome of a reply. Only a completed reply becomes an assistant
/// message; on failure or cancellation the user message stays as it is.
pub fn settle(conversation: &mut Conversation, outcome: &ReplyOutcome) -> bool {
    match outcome {
        ReplyOutcome::Completed(text) => {
            tracing::info!(chars = text.chars().count(), "reply completed");
            conversation.push_assistant(text.clone());
            true
        }
        ReplyOutcome::Cancelled { partial } => {
            tracing::info!(partial_chars = partial.chars().count(), "reply cancelled");
            false
        }
        ReplyOutcome::Failed(e) => {
            tracing::warn!(error = %e, "reply failed");
            false
        }
    }
}

/// Submit, hand every fragment to `on_token`, then settle
pub async fn respond<B: ChatBackend + 'static>(
    session: &ModelSession<B>,
    conversation: &mut Conversation,
    prompt: String,
    mut on_token: impl FnMut(&str),
) -> ReplyOutcome {
    let mut pending = session.submit(conversation, prompt);

    let mut outcome = None;
    while let Some(event) = pending.next_event().await {
        match event {
            ReplyEvent::Token(fragment) => on_token(&fragment),
            ReplyEvent::Finished(result) => {
                outcome = Some(result);
                break;
            }
        }
    }

    let outcome = outcome.unwrap_or_else(|| {
        ReplyOutcome::Failed(ChatError::MalformedStream(
            "reply task ended without a result".to_string(),
        ))
    });
    settle(conversation, &outcome);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ChatRole;
    use crate::ollama::TokenStream;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::Mutex;

    enum Script {
        Tokens(Vec<&'static str>),
        RefuseRequest,
        FailMidStream,
        Stall,
    }

    struct ScriptedBackend {
        script: Script,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedBackend {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn list_models(&self) -> Result<Vec<String>, ChatError> {
            Ok(vec!["scripted".to_string()])
        }

        async fn stream_chat(
            &self,
            _model: &str,
            messages: &[ChatMessage],
        ) -> Result<TokenStream, ChatError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            match &self.script {
                Script::Tokens(tokens) => {
                    let items: Vec<Result<String, ChatError>> =
                        tokens.iter().map(|t| Ok(t.to_string())).collect();
                    Ok(Box::pin(stream::iter(items)))
                }
                Script::RefuseRequest => Err(ChatError::Api {
                    status: 404,
                    body: "model not found".to_string(),
                }),
                Script::FailMidStream => Ok(Box::pin(stream::iter(vec![
                    Ok("partial".to_string()),
                    Err(ChatError::MalformedStream("bad chunk".to_string())),
                ]))),
                Script::Stall => Ok(Box::pin(
                    stream::iter(vec![Ok::<_, ChatError>("first".to_string())])
                        .chain(stream::pending()),
                )),
            }
        }
    }

    #[tokio::test]
    async fn test_completed_reply_is_appended() {
        let backend = ScriptedBackend::new(Script::Tokens(vec!["Hel", "lo", "!"]));
        let session = ModelSession::new(backend.clone(), "scripted");
        let mut conversation = Conversation::new();

        let mut rendered = Vec::new();
        let outcome = respond(&session, &mut conversation, "hi".to_string(), |t| {
            rendered.push(t.to_string())
        })
        .await;

        assert!(matches!(outcome, ReplyOutcome::Completed(ref text) if text == "Hello!"));
        assert_eq!(rendered, vec!["Hel", "lo", "!"]);
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.messages()[1].role, ChatRole::Assistant);
        assert_eq!(conversation.messages()[1].content, "Hello!");
    }

    #[tokio::test]
    async fn test_full_history_is_sent() {
        let backend = ScriptedBackend::new(Script::Tokens(vec!["ok"]));
        let session = ModelSession::new(backend.clone(), "scripted");
        let mut conversation = Conversation::new();

        respond(&session, &mut conversation, "one".to_string(), |_| {}).await;
        respond(&session, &mut conversation, "two".to_string(), |_| {}).await;

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let second: Vec<&str> = seen[1].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(second, vec!["one", "ok", "two"]);
    }

    #[tokio::test]
    async fn test_refused_request_keeps_user_message_only() {
        let backend = ScriptedBackend::new(Script::RefuseRequest);
        let session = ModelSession::new(backend, "missing");
        let mut conversation = Conversation::new();

        let outcome = respond(&session, &mut conversation, "hi".to_string(), |_| {}).await;

        match outcome {
            ReplyOutcome::Failed(e) => assert!(e.to_string().contains("model not found")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.last_role(), Some(ChatRole::User));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_discards_partial_text() {
        let backend = ScriptedBackend::new(Script::FailMidStream);
        let session = ModelSession::new(backend, "scripted");
        let mut conversation = Conversation::new();

        let outcome = respond(&session, &mut conversation, "hi".to_string(), |_| {}).await;

        assert!(matches!(outcome, ReplyOutcome::Failed(ChatError::MalformedStream(_))));
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_a_stalled_stream() {
        let backend = ScriptedBackend::new(Script::Stall);
        let session = ModelSession::new(backend, "scripted");
        let mut conversation = Conversation::new();

        let mut pending = session.submit(&mut conversation, "hi".to_string());
        match pending.next_event().await {
            Some(ReplyEvent::Token(t)) => assert_eq!(t, "first"),
            other => panic!("expected first token, got {:?}", other),
        }

        pending.cancel();
        let outcome = match pending.next_event().await {
            Some(ReplyEvent::Finished(outcome)) => outcome,
            other => panic!("expected finish, got {:?}", other),
        };

        assert!(matches!(outcome, ReplyOutcome::Cancelled { ref partial } if partial == "first"));
        assert!(!settle(&mut conversation, &outcome));
        assert_eq!(conversation.len(), 1);
    }
}
