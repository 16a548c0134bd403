//! Frame drawing

use super::palette::Palette;
use super::App;
use crate::render::markdown::{LineKind, SpanStyle, StyledLine};
use crate::render::{self, Align, Block as RenderBlock, MessageRow, RenderModel, ToolCard};
use crate::session::SessionStatus;
use crate::transcript::Role;
use chrono::Local;
use ratatui::layout::{Alignment, Constraint, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Paragraph, Wrap};
use ratatui::Frame;

const BANNER_TITLE: &str = "OpenAI API Key Not Configured";
const BANNER_HINT: &str = "Set OPENAI_API_KEY and restart to chat with the assistant.";
const KEY_HINTS: &str = "Enter send · Esc stop · Ctrl+L clear · Ctrl+T theme · Ctrl+C quit";

pub fn draw(frame: &mut Frame<'_>, app: &mut App) {
    let palette = Palette::for_theme(app.theme);
    let snapshot = &app.snapshot;
    let model = render::render(
        &snapshot.turns,
        snapshot.status,
        &app.draft,
        &app.policy,
        Local::now().fixed_offset(),
    );

    frame.render_widget(
        Block::default().style(Style::default().bg(palette.bg).fg(palette.fg)),
        frame.area(),
    );

    let banner_height = if app.api_key_missing { 4 } else { 0 };
    let [banner, messages, status, input] = Layout::vertical([
        Constraint::Length(banner_height),
        Constraint::Min(3),
        Constraint::Length(1),
        Constraint::Length(3),
    ])
    .areas(frame.area());

    if app.api_key_missing {
        draw_banner(frame, banner, &palette);
    }
    app.max_scroll = draw_messages(frame, messages, &model, &palette, app.scroll_back);
    app.scroll_back = app.scroll_back.min(app.max_scroll);
    draw_status(frame, status, app, &palette);
    draw_input(frame, input, app, &model, &palette);
}

fn draw_banner(frame: &mut Frame<'_>, area: Rect, palette: &Palette) {
    let text = vec![
        Line::styled(
            BANNER_TITLE,
            Style::default()
                .fg(palette.error)
                .add_modifier(Modifier::BOLD),
        ),
        Line::styled(BANNER_HINT, Style::default().fg(palette.fg)),
    ];
    let banner = Paragraph::new(text)
        .wrap(Wrap { trim: true })
        .block(Block::bordered().border_style(Style::default().fg(palette.error)));
    frame.render_widget(banner, area);
}

/// Draw the transcript pinned to the bottom; returns the maximum scroll-back
fn draw_messages(
    frame: &mut Frame<'_>,
    area: Rect,
    model: &RenderModel,
    palette: &Palette,
    scroll_back: usize,
) -> usize {
    let block = Block::bordered()
        .title(" Recipe Assistant ")
        .border_style(Style::default().fg(palette.border))
        .title_style(
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        );
    let inner = block.inner(area);

    if model.empty_state {
        let welcome = vec![
            Line::default(),
            Line::styled(
                render::WELCOME_TITLE,
                Style::default()
                    .fg(palette.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Line::styled(render::WELCOME_HINT, Style::default().fg(palette.dim)),
        ];
        let paragraph = Paragraph::new(welcome)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(block);
        frame.render_widget(paragraph, area);
        return 0;
    }

    let lines: Vec<Line<'static>> = model
        .rows
        .iter()
        .flat_map(|row| row_lines(row, palette))
        .collect();

    let height = usize::from(inner.height);
    let total_rows = wrapped_row_count(&lines, inner.width);
    let max_scroll = total_rows.saturating_sub(height);
    let scroll_y = max_scroll.saturating_sub(scroll_back.min(max_scroll));

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((u16::try_from(scroll_y).unwrap_or(u16::MAX), 0));
    frame.render_widget(paragraph, area);
    max_scroll
}

fn row_lines(row: &MessageRow, palette: &Palette) -> Vec<Line<'static>> {
    let (who, color) = match row.role {
        Role::User => ("You", palette.user),
        Role::Assistant => ("Assistant", palette.assistant),
        Role::System => ("System", palette.dim),
    };
    let alignment = match row.align {
        Align::Left => Alignment::Left,
        Align::Right => Alignment::Right,
    };

    let mut header = vec![
        Span::styled(who, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        Span::styled(format!("  {}", row.timestamp), Style::default().fg(palette.dim)),
    ];
    if row.streaming {
        header.push(Span::styled(" …", Style::default().fg(palette.dim)));
    }

    let mut lines = vec![Line::from(header).alignment(alignment)];
    for block in &row.blocks {
        match block {
            RenderBlock::Text(text) => lines.extend(
                text.iter()
                    .map(|line| styled_line(line, palette).alignment(alignment)),
            ),
            RenderBlock::Tool(card) => lines.extend(tool_lines(card, palette)),
        }
    }
    lines.push(Line::default());
    lines
}

fn styled_line(line: &StyledLine, palette: &Palette) -> Line<'static> {
    let base = match line.kind {
        LineKind::Body => Style::default().fg(palette.fg),
        LineKind::Heading => Style::default().fg(palette.heading),
        LineKind::Code => Style::default().fg(palette.code),
        LineKind::Quote | LineKind::Rule => Style::default().fg(palette.dim),
    };
    Line::from(
        line.spans
            .iter()
            .map(|span| Span::styled(span.text.clone(), span_style(base, span.style, palette)))
            .collect::<Vec<_>>(),
    )
}

fn span_style(base: Style, style: SpanStyle, palette: &Palette) -> Style {
    let mut out = base;
    if style.bold {
        out = out.add_modifier(Modifier::BOLD);
    }
    if style.italic {
        out = out.add_modifier(Modifier::ITALIC);
    }
    if style.strike {
        out = out.add_modifier(Modifier::CROSSED_OUT);
    }
    if style.code {
        out = out.fg(palette.code);
    }
    out
}

fn tool_lines(card: &ToolCard, palette: &Palette) -> Vec<Line<'static>> {
    let state_color = if card.needs_confirmation {
        palette.pending
    } else if card.error.is_some() {
        palette.error
    } else {
        palette.dim
    };
    let mut lines = vec![
        Line::from(vec![
            Span::styled(
                format!("⚙ {}", card.tool_name),
                Style::default()
                    .fg(palette.tool)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(" [{}]", card.state_label),
                Style::default().fg(state_color),
            ),
        ]),
        Line::styled(
            format!("  input: {}", card.input),
            Style::default().fg(palette.dim),
        ),
    ];
    if let Some(output) = &card.output {
        lines.push(Line::styled(
            format!("  result: {output}"),
            Style::default().fg(palette.fg),
        ));
    }
    if let Some(error) = &card.error {
        lines.push(Line::styled(
            format!("  error: {error}"),
            Style::default().fg(palette.error),
        ));
    }
    if card.needs_confirmation {
        lines.push(Line::styled(
            "  Run this tool?  [y] approve   [n] deny",
            Style::default()
                .fg(palette.pending)
                .add_modifier(Modifier::BOLD),
        ));
    }
    lines
}

fn draw_status(frame: &mut Frame<'_>, area: Rect, app: &App, palette: &Palette) {
    let snapshot = &app.snapshot;
    let (label, color) = match snapshot.status {
        SessionStatus::Idle => ("idle", palette.dim),
        SessionStatus::Streaming => ("streaming", palette.accent),
        SessionStatus::AwaitingConfirmation => ("awaiting confirmation", palette.pending),
        SessionStatus::Error => ("error", palette.error),
    };
    let mut spans = vec![Span::styled(
        format!(" {label} "),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )];
    let message = app.notice.as_deref().or(snapshot.last_error.as_deref());
    if let Some(message) = message {
        spans.push(Span::styled(
            format!(" {message} "),
            Style::default().fg(palette.error),
        ));
    }
    spans.push(Span::styled(
        format!(" {KEY_HINTS}"),
        Style::default().fg(palette.dim),
    ));
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_input(frame: &mut Frame<'_>, area: Rect, app: &App, model: &RenderModel, palette: &Palette) {
    let border = if model.input.enabled {
        palette.accent
    } else {
        palette.border
    };
    let block = Block::bordered()
        .title(if model.input.send_enabled {
            " Message · Enter to send "
        } else {
            " Message "
        })
        .border_style(Style::default().fg(border));
    let inner = block.inner(area);

    let text = if app.draft.is_empty() || !model.input.enabled {
        Line::styled(model.input.placeholder, Style::default().fg(palette.dim))
    } else {
        Line::styled(app.draft.clone(), Style::default().fg(palette.fg))
    };
    frame.render_widget(Paragraph::new(text).block(block), area);

    if model.input.enabled {
        let typed = u16::try_from(Line::raw(app.draft.as_str()).width()).unwrap_or(u16::MAX);
        let x = inner
            .x
            .saturating_add(typed)
            .min(inner.right().saturating_sub(1));
        frame.set_cursor_position((x, inner.y));
    }
}

/// Rows `lines` take in a viewport `width` wide once wrapped
fn wrapped_row_count(lines: &[Line<'_>], width: u16) -> usize {
    if width == 0 {
        return lines.len();
    }
    let width = usize::from(width);
    lines
        .iter()
        .map(|line| line.width().max(1).div_ceil(width))
        .sum()
}
