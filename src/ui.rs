use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use ollama_playground::DocumentKind;

use crate::app::{App, InputMode, Popup, TranscriptEntry, PREVIEW_CHARS};

const USER_AVATAR: &str = "😎";
const ASSISTANT_AVATAR: &str = "🤖";
const ERROR_ICON: &str = "⛔️";

/// Render `**bold**` spans; an unpaired `**` is left as literal text
fn markdown_line(text: &str) -> Line<'static> {
    let mut parts: Vec<String> = text.split("**").map(str::to_string).collect();
    if parts.len() % 2 == 0 {
        let tail = parts.pop().unwrap_or_default();
        if let Some(last) = parts.last_mut() {
            last.push_str("**");
            last.push_str(&tail);
        }
    }

    let spans: Vec<Span<'static>> = parts
        .into_iter()
        .enumerate()
        .filter(|(_, part)| !part.is_empty())
        .map(|(i, part)| {
            if i % 2 == 1 {
                Span::styled(part, Style::default().add_modifier(Modifier::BOLD))
            } else {
                Span::raw(part)
            }
        })
        .collect();

    Line::from(spans)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_body(app, frame, body_area);
    render_footer(app, frame, footer_area);

    match app.popup {
        Popup::ModelPicker => render_model_picker(app, frame, area),
        Popup::Attach => render_attach_input(app, frame, area),
        Popup::None => {}
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let model = app
        .selected_model
        .clone()
        .unwrap_or_else(|| "no model".to_string());

    let title = Line::from(vec![
        Span::styled(" 💬 Ollama Playground ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(format!("[{}]", model), Style::default().fg(Color::Yellow)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    let pairs: Vec<(&str, &str)> = match (app.popup, app.input_mode) {
        (Popup::ModelPicker, _) => vec![("j/k", "nav"), ("Enter", "select"), ("Esc", "close")],
        (Popup::Attach, _) => vec![("Enter", "attach"), ("Esc", "cancel")],
        (Popup::None, InputMode::Editing) => vec![("Enter", "send"), ("Esc", "normal mode")],
        (Popup::None, InputMode::Normal) => {
            let mut pairs = vec![("i", "type"), ("m", "model"), ("o", "attach")];
            if app.attachment.is_some() {
                pairs.push(("x", "detach"));
            }
            if app.is_replying() {
                pairs.push(("Esc", "stop"));
            }
            pairs.extend([("j/k", "scroll"), ("q", "quit")]);
            pairs
        }
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    for (key, label) in pairs {
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {} ", label), label_style));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_body(app: &mut App, frame: &mut Frame, area: Rect) {
    let preview_height = if app.attachment.is_some() { 7 } else { 0 };

    let [chat_area, preview_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(preview_height),
        Constraint::Length(3),
    ])
    .areas(area);

    // Inner size minus borders, for scroll calculations
    app.chat_area = Some(chat_area);
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    render_transcript(app, frame, chat_area);
    if preview_height > 0 {
        render_attachment(app, frame, preview_area);
    }
    render_input(app, frame, input_area);
}

fn transcript_lines(app: &App) -> Vec<Line<'static>> {
    let label = |text: String, color: Color| {
        Line::from(Span::styled(
            text,
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ))
    };

    let mut lines: Vec<Line<'static>> = Vec::new();
    for entry in &app.transcript {
        match entry {
            TranscriptEntry::User(text) => {
                lines.push(label(format!("{} You:", USER_AVATAR), Color::Cyan));
                lines.extend(text.lines().map(|l| Line::from(l.to_string())));
            }
            TranscriptEntry::Assistant(text) => {
                lines.push(label(format!("{} Assistant:", ASSISTANT_AVATAR), Color::Yellow));
                lines.extend(text.lines().map(markdown_line));
            }
            TranscriptEntry::Error(text) => {
                lines.push(Line::from(Span::styled(
                    format!("{} {}", ERROR_ICON, text),
                    Style::default().fg(Color::Red),
                )));
            }
            TranscriptEntry::Info(text) => {
                lines.push(Line::from(Span::styled(
                    text.clone(),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
            }
        }
        lines.push(Line::default());
    }

    if let Some(partial) = &app.streaming {
        lines.push(label(format!("{} Assistant:", ASSISTANT_AVATAR), Color::Yellow));
        if partial.is_empty() {
            let activity = if app.streaming_grounded {
                "Uploading and analyzing the file with the question"
            } else {
                "model working"
            };
            // Animated ellipsis: ".", "..", "..."
            let dots = ".".repeat(app.animation_frame as usize + 1);
            lines.push(Line::from(Span::styled(
                format!("{}{}", activity, dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        } else {
            lines.extend(partial.lines().map(markdown_line));
        }
        lines.push(Line::default());
    }

    lines
}

fn render_transcript(app: &App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if app.input_mode == InputMode::Normal {
            Color::Cyan
        } else {
            Color::DarkGray
        }))
        .title(" Chat ");

    let text = if app.transcript.is_empty() && app.streaming.is_none() {
        if app.available_models.is_empty() {
            no_models_notice(app)
        } else {
            Text::from(Span::styled(
                "Enter a prompt here... (press o to attach a .pdf or .txt file)",
                Style::default().fg(Color::DarkGray),
            ))
        }
    } else {
        Text::from(transcript_lines(app))
    };

    let chat = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0));

    frame.render_widget(chat, area);
}

fn no_models_notice(app: &App) -> Text<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "⚠️  You have not pulled any model from Ollama yet!",
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    ))];
    if let Some(error) = &app.models_error {
        lines.push(Line::from(Span::styled(
            format!("{} {}", ERROR_ICON, error),
            Style::default().fg(Color::Red),
        )));
    }
    lines.push(Line::default());
    lines.push(Line::from("Download one with: ollama pull llama3.2"));
    lines.push(Line::from("then press m to pick it."));
    Text::from(lines)
}

fn render_attachment(app: &App, frame: &mut Frame, area: Rect) {
    let Some(doc) = &app.attachment else {
        return;
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(format!(" {} (sent with the next question) ", doc.filename));

    let preview = Paragraph::new(doc.preview(PREVIEW_CHARS).to_string())
        .style(Style::default().fg(Color::Gray))
        .block(block)
        .wrap(Wrap { trim: true });

    frame.render_widget(preview, area);
}

/// Visible slice of a single-line input and the cursor column within it
fn visible_input(text: &str, cursor: usize, width: usize) -> (String, usize) {
    let offset = if width > 0 && cursor >= width {
        cursor - width + 1
    } else {
        0
    };
    let visible = text.chars().skip(offset).take(width).collect();
    (visible, cursor - offset)
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing && app.popup == Popup::None;

    let title = if app.is_replying() {
        " Waiting for the reply (Esc in normal mode to stop) "
    } else {
        " Prompt "
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if editing { Color::Yellow } else { Color::DarkGray }))
        .title(title);

    let inner_width = area.width.saturating_sub(2) as usize;
    let (visible, cursor_x) = visible_input(&app.input, app.cursor, inner_width);

    let input = Paragraph::new(visible)
        .style(Style::default().fg(Color::Cyan))
        .block(block);
    frame.render_widget(input, area);

    if editing {
        frame.set_cursor_position((area.x + cursor_x as u16 + 1, area.y + 1));
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(4));
    Rect::new(
        area.x + (area.width.saturating_sub(width)) / 2,
        area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    )
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let popup_area = centered(area, 48, app.available_models.len().max(1) as u16 + 2);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Pick a model available locally ");

    if app.available_models.is_empty() {
        let notice = Paragraph::new("No local models. Run: ollama pull <model>")
            .style(Style::default().fg(Color::Yellow))
            .block(block);
        frame.render_widget(notice, popup_area);
        return;
    }

    let items: Vec<ListItem> = app
        .available_models
        .iter()
        .map(|model| {
            let style = if Some(model) == app.selected_model.as_ref() {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", model)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}

fn render_attach_input(app: &App, frame: &mut Frame, area: Rect) {
    let popup_area = centered(area, 70, 3);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(format!(
            " Attach file ({}) ",
            DocumentKind::accepted_extensions()
                .iter()
                .map(|ext| format!(".{}", ext))
                .collect::<Vec<_>>()
                .join(" or ")
        ));

    let inner_width = popup_area.width.saturating_sub(2) as usize;
    let (visible, cursor_x) = visible_input(&app.attach_input, app.attach_cursor, inner_width);

    frame.render_widget(Paragraph::new(visible).block(block), popup_area);
    frame.set_cursor_position((popup_area.x + cursor_x as u16 + 1, popup_area.y + 1));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_markdown_bold_spans() {
        let line = markdown_line("a **b** c");
        assert_eq!(plain(&line), "a b c");
        assert_eq!(line.spans.len(), 3);
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_markdown_unpaired_marker_is_literal() {
        let line = markdown_line("a **b");
        assert_eq!(plain(&line), "a **b");
        assert_eq!(line.spans.len(), 1);
    }

    #[test]
    fn test_visible_input_scrolls_with_cursor() {
        assert_eq!(visible_input("hello", 2, 10), ("hello".to_string(), 2));
        assert_eq!(visible_input("abcdefgh", 8, 4), ("fgh".to_string(), 3));
    }
}
