use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;

use crate::app::{App, InputMode, Popup};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key).await?,
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => app.scroll_to_bottom(),
        AppEvent::Tick => app.tick_animation(),
        AppEvent::Reply(reply) => app.on_reply_event(reply),
    }
    Ok(())
}

async fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.cancel_reply();
        app.should_quit = true;
        return Ok(());
    }

    match app.popup {
        Popup::ModelPicker => handle_model_picker(app, key),
        Popup::Attach => handle_attach_input(app, key).await,
        Popup::None => match app.input_mode {
            InputMode::Normal => handle_normal_mode(app, key).await,
            InputMode::Editing => handle_editing_mode(app, key),
        },
    }

    Ok(())
}

async fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => {
            app.cancel_reply();
            app.should_quit = true;
        }

        // Esc stops a streaming reply
        KeyCode::Esc => app.cancel_reply(),

        KeyCode::Char('i') | KeyCode::Enter => app.input_mode = InputMode::Editing,

        KeyCode::Char('m') => {
            app.refresh_models().await;
            app.open_model_picker();
        }

        KeyCode::Char('o') => app.popup = Popup::Attach,
        KeyCode::Char('x') => app.detach_file(),

        // Transcript scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(1),
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_down(app.chat_height / 2)
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_up(app.chat_height / 2)
        }
        KeyCode::Char('g') => app.scroll = 0,
        KeyCode::Char('G') => app.scroll_to_bottom(),

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.input_mode = InputMode::Normal,
        KeyCode::Enter => app.submit_prompt(),
        _ => edit_line(&mut app.input, &mut app.cursor, key),
    }
}

async fn handle_attach_input(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.attach_input.clear();
            app.attach_cursor = 0;
            app.popup = Popup::None;
        }
        KeyCode::Enter => app.attach_file().await,
        _ => edit_line(&mut app.attach_input, &mut app.attach_cursor, key),
    }
}

fn handle_model_picker(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => app.popup = Popup::None,
        KeyCode::Char('j') | KeyCode::Down => app.model_picker_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.model_picker_nav_up(),
        KeyCode::Enter => app.select_model(),
        _ => {}
    }
}

/// Single-line editing shared by the prompt and the attach path input
fn edit_line(text: &mut String, cursor: &mut usize, key: KeyEvent) {
    match key.code {
        KeyCode::Backspace => {
            if *cursor > 0 {
                *cursor -= 1;
                let byte_pos = char_to_byte_index(text, *cursor);
                text.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            if *cursor < text.chars().count() {
                let byte_pos = char_to_byte_index(text, *cursor);
                text.remove(byte_pos);
            }
        }
        KeyCode::Left => *cursor = cursor.saturating_sub(1),
        KeyCode::Right => *cursor = (*cursor + 1).min(text.chars().count()),
        KeyCode::Home => *cursor = 0,
        KeyCode::End => *cursor = text.chars().count(),
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(text, *cursor);
            text.insert(byte_pos, c);
            *cursor += 1;
        }
        _ => {}
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let in_chat = app
        .chat_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);
    if !in_chat {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(3),
        MouseEventKind::ScrollUp => app.scroll_up(3),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventKind;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: crossterm::event::KeyEventState::NONE,
        }
    }

    #[test]
    fn test_edit_line_handles_multibyte_characters() {
        let mut text = String::new();
        let mut cursor = 0;
        for c in "h\u{e9}llo".chars() {
            edit_line(&mut text, &mut cursor, key(KeyCode::Char(c)));
        }
        assert_eq!(text, "h\u{e9}llo");

        edit_line(&mut text, &mut cursor, key(KeyCode::Home));
        edit_line(&mut text, &mut cursor, key(KeyCode::Right));
        edit_line(&mut text, &mut cursor, key(KeyCode::Delete));
        assert_eq!(text, "hllo");

        edit_line(&mut text, &mut cursor, key(KeyCode::End));
        edit_line(&mut text, &mut cursor, key(KeyCode::Backspace));
        assert_eq!(text, "hll");
        assert_eq!(cursor, 3);
    }

    #[test]
    fn test_char_to_byte_index_past_end() {
        assert_eq!(char_to_byte_index("\u{e9}a", 1), 2);
        assert_eq!(char_to_byte_index("\u{e9}a", 5), 3);
    }
}
