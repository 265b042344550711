use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use ollama_playground::{
    compose_turn, extract, logging, settle, ChatBackend, Config, Conversation, ModelSession,
    OllamaClient, PendingReply, ReplyEvent, ReplyOutcome, UploadedFile,
};

mod app;
mod handler;
mod tui;
mod ui;

use app::App;

#[derive(Parser)]
#[command(name = "playground")]
#[command(about = "Chat with local Ollama models, optionally grounded in a PDF or text file")]
struct Cli {
    /// Ollama server URL (defaults to OLLAMA_HOST, then the config file)
    #[arg(long, global = true)]
    host: Option<String>,
    /// Model to use instead of the saved default
    #[arg(short, long, global = true)]
    model: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List models available locally
    Models,
    /// Ask a single question and stream the answer to stdout
    Ask {
        /// Your question
        question: String,
        /// A .pdf or .txt file to answer from
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = Config::get_log_path().and_then(|path| logging::init(&path)) {
        eprintln!("Logging disabled: {}", e);
    }

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not read config, using defaults");
        Config::new()
    });
    let base_url = config.resolve_base_url(cli.host.as_deref());
    let client = Arc::new(OllamaClient::new(&base_url));
    let model = cli.model.or(config.default_model);

    match cli.command {
        None => run_tui(client, model).await,
        Some(Commands::Models) => list_models(&client).await,
        Some(Commands::Ask { question, file }) => ask(client, model, &question, file).await,
    }
}

async fn run_tui(client: Arc<OllamaClient>, model: Option<String>) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();

    let mut app = App::new(client, model, events.sender());
    app.refresh_models().await;

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event).await?,
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    tracing::info!(messages = app.conversation.len(), "session ended");
    result
}

async fn list_models(client: &OllamaClient) -> Result<()> {
    match client.list_models().await {
        Ok(models) if models.is_empty() => {
            println!("You have not pulled any model from Ollama yet!");
            println!("Pull one with: ollama pull llama3.2");
        }
        Ok(models) => {
            println!("Models available at {}:", client.base_url());
            for model in models {
                println!("  • {}", model);
            }
        }
        Err(e) => return Err(anyhow!("⛔️ {}", e)),
    }
    Ok(())
}

async fn ask(
    client: Arc<OllamaClient>,
    model: Option<String>,
    question: &str,
    file: Option<PathBuf>,
) -> Result<()> {
    let model = match model {
        Some(model) => model,
        None => client
            .list_models()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                anyhow!("You have not pulled any model from Ollama yet! Pull one with: ollama pull llama3.2")
            })?,
    };

    let attachment = match file {
        Some(path) => {
            let upload = UploadedFile::from_path(&path)?;
            Some(extract(&upload)?)
        }
        None => None,
    };

    let mut conversation = Conversation::new();
    let prompt = compose_turn(&mut conversation, question, attachment.as_ref());
    let session = ModelSession::new(client, model);
    let mut pending = session.submit(&mut conversation, prompt);

    let mut stdout = std::io::stdout();
    let outcome = print_reply(&mut pending, &mut stdout).await?;
    writeln!(stdout)?;

    settle(&mut conversation, &outcome);
    match outcome {
        ReplyOutcome::Failed(e) => Err(anyhow!("⛔️ {}", e)),
        _ => Ok(()),
    }
}

/// Write fragments to `out` as they arrive. On the first write error the
/// reply is cancelled and the error returned once the producer has stopped.
async fn print_reply(
    pending: &mut PendingReply,
    out: &mut impl Write,
) -> std::io::Result<ReplyOutcome> {
    let mut write_error = None;
    while let Some(event) = pending.next_event().await {
        match event {
            ReplyEvent::Token(fragment) => {
                if write_error.is_some() {
                    continue;
                }
                if let Err(e) = write!(out, "{}", fragment).and_then(|_| out.flush()) {
                    tracing::warn!(error = %e, "output closed, cancelling reply");
                    pending.cancel();
                    write_error = Some(e);
                }
            }
            ReplyEvent::Finished(outcome) => {
                return match write_error {
                    Some(e) => Err(e),
                    None => Ok(outcome),
                };
            }
        }
    }
    Err(write_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "reply ended without a result")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::{stream, StreamExt};
    use ollama_playground::{ChatError, ChatMessage, TokenStream};
    use std::io;

    /// Sends one fragment, then never finishes unless cancelled
    struct EndlessBackend;

    #[async_trait]
    impl ChatBackend for EndlessBackend {
        async fn list_models(&self) -> Result<Vec<String>, ChatError> {
            Ok(Vec::new())
        }

        async fn stream_chat(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
        ) -> Result<TokenStream, ChatError> {
            Ok(Box::pin(
                stream::iter(vec![Ok::<_, ChatError>("first".to_string())])
                    .chain(stream::pending()),
            ))
        }
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_print_reply_writes_fragments() {
        struct TwoTokens;

        #[async_trait]
        impl ChatBackend for TwoTokens {
            async fn list_models(&self) -> Result<Vec<String>, ChatError> {
                Ok(Vec::new())
            }

            async fn stream_chat(
                &self,
                _model: &str,
                _messages: &[ChatMessage],
            ) -> Result<TokenStream, ChatError> {
                Ok(Box::pin(stream::iter(vec![
                    Ok::<_, ChatError>("Hi".to_string()),
                    Ok(" there".to_string()),
                ])))
            }
        }

        let session = ModelSession::new(Arc::new(TwoTokens), "m");
        let mut conversation = Conversation::new();
        let mut pending = session.submit(&mut conversation, "hello".to_string());

        let mut out: Vec<u8> = Vec::new();
        let outcome = print_reply(&mut pending, &mut out).await.unwrap();

        assert_eq!(out, b"Hi there");
        assert!(matches!(outcome, ReplyOutcome::Completed(ref text) if text == "Hi there"));
    }

    #[tokio::test]
    async fn test_closed_output_cancels_reply() {
        let session = ModelSession::new(Arc::new(EndlessBackend), "m");
        let mut conversation = Conversation::new();
        let mut pending = session.submit(&mut conversation, "hello".to_string());

        // Returns only because the endless stream was cancelled
        let err = print_reply(&mut pending, &mut ClosedPipe).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(pending.cancel.is_cancelled());
        assert_eq!(conversation.len(), 1);
    }
}
