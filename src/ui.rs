use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use folio_core::{Backend, ChatRole, EngineState};
use crate::app::{App, InputMode};

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            chars.next();

            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;
            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(bold_text, Style::default().add_modifier(Modifier::BOLD)));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, chat, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.show_download_confirm {
        render_download_confirm(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" Portfolio Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("[{}]", app.backend.display_name()),
            Style::default().fg(Color::White),
        ),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store area for mouse hit-testing and its inner size for scroll calculations
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let thinking = app.is_thinking();
    let last = app.messages.len().saturating_sub(1);
    let mut lines: Vec<Line> = Vec::new();

    for (i, msg) in app.messages.iter().enumerate() {
        match msg.role {
            ChatRole::User => {
                lines.push(Line::from(Span::styled(
                    "You:",
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )));
                lines.push(Line::from(msg.content.clone()));
            }
            ChatRole::Assistant => {
                lines.push(Line::from(Span::styled(
                    "AI:",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )));
                if i == last && thinking {
                    // Animated ellipsis: cycles through ".", "..", "..."
                    let dots = ".".repeat((app.animation_frame as usize) + 1);
                    lines.push(Line::from(Span::styled(
                        format!("Thinking{}", dots),
                        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                    )));
                } else {
                    for line in msg.content.lines() {
                        lines.push(parse_markdown_line(line));
                    }
                }
            }
            // Prompts are built per turn and never stored
            ChatRole::System => continue,
        }
        lines.push(Line::default());
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(format!(" {}: {} ", app.backend.display_name(), app.model));

    let chat = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let enabled = app.input_enabled();
    let editing = app.input_mode == InputMode::Editing;

    let (title, border_color) = if !enabled && app.is_busy() {
        (" Waiting for reply... ", Color::DarkGray)
    } else if !enabled {
        (" Local engine not ready (L to load) ", Color::DarkGray)
    } else if editing {
        (" Ask (Enter to send, Esc for commands) ", Color::Yellow)
    } else {
        (" Ask (i to type) ", Color::DarkGray)
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Keep the cursor visible by scrolling the text horizontally
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app.input.chars().skip(scroll_offset).take(inner_width).collect();

    let text_style = if enabled {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let input = Paragraph::new(visible_text).style(text_style).block(input_block);
    frame.render_widget(input, area);

    if editing && enabled && !app.show_download_confirm {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INSERT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let status_style = match (&app.backend, &app.engine_state) {
        (Backend::Local, EngineState::Failed(_)) => Style::default().fg(Color::Red),
        (Backend::Local, EngineState::Loading { .. }) => Style::default().fg(Color::Yellow),
        (Backend::Local, EngineState::Ready(_)) => Style::default().fg(Color::Green),
        _ => Style::default().fg(Color::Gray),
    };

    let mut spans = vec![
        Span::styled(mode_text, mode_style),
        Span::raw(" "),
        Span::styled(app.status_text(), status_style),
        Span::raw("  "),
    ];

    match app.input_mode {
        InputMode::Editing => {
            spans.push(Span::styled(" Esc ", key_style));
            spans.push(Span::styled(" commands ", label_style));
        }
        InputMode::Normal => {
            spans.push(Span::styled(" j/k ", key_style));
            spans.push(Span::styled(" scroll ", label_style));
            if app.backend == Backend::Local {
                spans.push(Span::styled(" L ", key_style));
                spans.push(Span::styled(" load engine ", label_style));
            }
            spans.push(Span::styled(" q ", key_style));
            spans.push(Span::styled(" quit ", label_style));
        }
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_download_confirm(app: &App, frame: &mut Frame, area: Rect) {
    let popup_width = 64.min(area.width.saturating_sub(4));
    let popup_height = 11.min(area.height);

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Load local engine? ");

    let retry = matches!(app.engine_state, EngineState::Failed(_));
    let mut lines = vec![
        Line::from(vec![
            Span::raw("Answers will be generated on this machine with "),
            Span::styled(app.model.clone(), Style::default().fg(Color::Cyan).bold()),
            Span::raw("."),
        ]),
        Line::default(),
        Line::from(format!("If the model is not installed yet it will be downloaded ({}).", download_size_hint(&app.model))),
        Line::from("A GPU makes replies much faster; CPU-only works but is slow."),
        Line::default(),
    ];
    if retry {
        lines.push(Line::from(Span::styled(
            "The previous attempt failed. Make sure Ollama is running.",
            Style::default().fg(Color::Red),
        )));
    }
    lines.push(Line::from(vec![
        Span::styled(" y ", Style::default().bg(Color::DarkGray).fg(Color::White)),
        Span::raw(" download and load   "),
        Span::styled(" n ", Style::default().bg(Color::DarkGray).fg(Color::White)),
        Span::raw(" not now"),
    ]));

    let popup = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: true });
    frame.render_widget(popup, popup_area);
}

/// Rough download size for well-known small models.
fn download_size_hint(model: &str) -> &'static str {
    match model {
        "llama3.2:1b" => "about 1.3 GB",
        "llama3.2" | "llama3.2:3b" => "about 2.0 GB",
        "qwen2.5:0.5b" => "about 400 MB",
        "phi3" | "phi3:mini" => "about 2.2 GB",
        _ => "usually 1-5 GB",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bold_markdown_becomes_styled_span() {
        let line = parse_markdown_line("Knows **Rust** well");
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[1].content, "Rust");
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_unclosed_bold_is_literal() {
        let line = parse_markdown_line("a **b");
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "a **b");
    }

    #[test]
    fn test_download_size_hint() {
        assert_eq!(download_size_hint("llama3.2:1b"), "about 1.3 GB");
        assert_eq!(download_size_hint("mystery"), "usually 1-5 GB");
    }
}
