//! Markdown to terminal lines
//!
//! Flattens a markdown body into lines of styled spans. Styling is semantic
//! only; the front end maps it to colors for the active theme.

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

/// Inline emphasis carried by a span
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanStyle {
    pub bold: bool,
    pub italic: bool,
    pub code: bool,
    pub strike: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledSpan {
    pub text: String,
    pub style: SpanStyle,
}

/// Block role of a line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineKind {
    #[default]
    Body,
    Heading,
    Code,
    Quote,
    Rule,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyledLine {
    pub kind: LineKind,
    pub spans: Vec<StyledSpan>,
}

impl StyledLine {
    fn plain(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            spans: vec![StyledSpan {
                text: text.into(),
                style: SpanStyle::default(),
            }],
        }
    }

    /// Concatenated span text
    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    pub fn is_blank(&self) -> bool {
        self.spans.iter().all(|s| s.text.trim().is_empty())
    }
}

/// Render `input` to lines. Trailing blank lines are dropped.
pub fn to_lines(input: &str) -> Vec<StyledLine> {
    let mut opts = Options::empty();
    opts.insert(Options::ENABLE_STRIKETHROUGH);
    opts.insert(Options::ENABLE_TASKLISTS);

    let mut renderer = Renderer::default();
    for event in Parser::new_ext(input, opts) {
        renderer.event(event);
    }
    renderer.flush();
    while renderer.lines.last().is_some_and(StyledLine::is_blank) {
        renderer.lines.pop();
    }
    renderer.lines
}

#[derive(Default)]
struct Renderer {
    lines: Vec<StyledLine>,
    current: StyledLine,
    style: SpanStyle,
    /// `None` for bullets, `Some(next number)` for ordered lists
    lists: Vec<Option<u64>>,
    in_code_block: bool,
    quote_depth: usize,
}

impl Renderer {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(Tag::Paragraph) => {}
            Event::End(TagEnd::Paragraph) => {
                self.flush();
                if self.lists.is_empty() {
                    self.blank();
                }
            }
            Event::Start(Tag::Heading { .. }) => {
                self.flush();
                self.current.kind = LineKind::Heading;
                self.style.bold = true;
            }
            Event::End(TagEnd::Heading(_)) => {
                self.style.bold = false;
                self.flush();
                self.blank();
            }
            Event::Start(Tag::BlockQuote(_)) => {
                self.flush();
                self.quote_depth += 1;
            }
            Event::End(TagEnd::BlockQuote(_)) => {
                self.flush();
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            Event::Start(Tag::CodeBlock(_)) => {
                self.flush();
                self.in_code_block = true;
            }
            Event::End(TagEnd::CodeBlock) => {
                self.in_code_block = false;
                self.blank();
            }
            Event::Start(Tag::List(start)) => {
                self.flush();
                self.lists.push(start);
            }
            Event::End(TagEnd::List(_)) => {
                self.flush();
                self.lists.pop();
                if self.lists.is_empty() {
                    self.blank();
                }
            }
            Event::Start(Tag::Item) => {
                self.flush();
                let indent = "  ".repeat(self.lists.len().saturating_sub(1));
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{indent}{n}. ");
                        *n += 1;
                        marker
                    }
                    _ => format!("{indent}- "),
                };
                self.push_text(&marker, SpanStyle::default());
            }
            Event::End(TagEnd::Item) => self.flush(),
            Event::Start(Tag::Strong) => self.style.bold = true,
            Event::End(TagEnd::Strong) => self.style.bold = false,
            Event::Start(Tag::Emphasis) => self.style.italic = true,
            Event::End(TagEnd::Emphasis) => self.style.italic = false,
            Event::Start(Tag::Strikethrough) => self.style.strike = true,
            Event::End(TagEnd::Strikethrough) => self.style.strike = false,
            Event::Text(text) => {
                if self.in_code_block {
                    for line in text.lines() {
                        self.lines.push(StyledLine::plain(LineKind::Code, line));
                    }
                } else {
                    self.push_text(&text, self.style);
                }
            }
            Event::Code(code) => {
                let style = SpanStyle {
                    code: true,
                    ..self.style
                };
                self.push_text(&code, style);
            }
            Event::SoftBreak => self.push_text(" ", self.style),
            Event::HardBreak => self.flush(),
            Event::Rule => {
                self.flush();
                self.lines.push(StyledLine::plain(LineKind::Rule, "───"));
            }
            Event::TaskListMarker(done) => {
                self.push_text(if done { "[x] " } else { "[ ] " }, SpanStyle::default());
            }
            Event::Html(html) | Event::InlineHtml(html) => self.push_text(&html, self.style),
            _ => {}
        }
    }

    fn push_text(&mut self, text: &str, style: SpanStyle) {
        if self.current.spans.is_empty() && self.quote_depth > 0 {
            self.current.kind = LineKind::Quote;
            self.current.spans.push(StyledSpan {
                text: "> ".repeat(self.quote_depth),
                style: SpanStyle::default(),
            });
        }
        match self.current.spans.last_mut() {
            Some(last) if last.style == style => last.text.push_str(text),
            _ => self.current.spans.push(StyledSpan {
                text: text.to_string(),
                style,
            }),
        }
    }

    fn flush(&mut self) {
        if !self.current.spans.is_empty() {
            self.lines.push(std::mem::take(&mut self.current));
        }
        self.current.kind = LineKind::Body;
    }

    fn blank(&mut self) {
        if self.lines.last().is_some_and(|l| !l.is_blank()) {
            self.lines.push(StyledLine::default());
        }
    }
}
