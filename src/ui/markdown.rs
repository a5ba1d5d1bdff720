//! Markdown to ratatui styled text converter for the transcript.
//!
//! Parses assistant replies with pulldown-cmark and produces `Vec<Line>`
//! with terminal-friendly styling. Only the constructs that show up in
//! chat replies are handled; anything else falls through as plain text.

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};

pub fn render_markdown(md: &str) -> Vec<Line<'static>> {
    let mut renderer = TranscriptRenderer::default();
    for event in Parser::new(md) {
        renderer.process(event);
    }
    renderer.flush_line();
    renderer.lines
}

#[derive(Default)]
struct TranscriptRenderer {
    lines: Vec<Line<'static>>,
    current_spans: Vec<Span<'static>>,

    bold: bool,
    italic: bool,
    in_code_block: bool,
    heading: bool,

    list_depth: usize,
    ordered_counters: Vec<Option<u64>>,
}

impl TranscriptRenderer {
    fn style(&self) -> Style {
        if self.in_code_block {
            return Style::default().fg(Color::Green);
        }
        if self.heading {
            return Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD);
        }
        let mut style = Style::default();
        if self.bold {
            style = style.add_modifier(Modifier::BOLD);
        }
        if self.italic {
            style = style.add_modifier(Modifier::ITALIC);
        }
        style
    }

    fn flush_line(&mut self) {
        let spans = std::mem::take(&mut self.current_spans);
        self.lines.push(Line::from(spans));
    }

    fn push_text(&mut self, text: &str) {
        let style = self.style();
        let indent = if self.in_code_block { "    " } else { "" };
        for (i, segment) in text.split('\n').enumerate() {
            if i > 0 {
                self.flush_line();
            }
            if !segment.is_empty() {
                self.current_spans
                    .push(Span::styled(format!("{}{}", indent, segment), style));
            }
        }
    }

    fn process(&mut self, event: Event) {
        match event {
            Event::Start(tag) => self.start_tag(tag),
            Event::End(tag) => self.end_tag(tag),
            Event::Text(text) => self.push_text(&text),
            Event::Code(code) => {
                self.current_spans.push(Span::styled(
                    format!("`{}`", code),
                    Style::default().fg(Color::Green),
                ));
            }
            Event::SoftBreak => self.current_spans.push(Span::raw(" ")),
            Event::HardBreak => self.flush_line(),
            Event::Rule => {
                self.flush_line();
                self.lines.push(Line::from(Span::styled(
                    "────────".to_string(),
                    Style::default().fg(Color::DarkGray),
                )));
            }
            _ => {}
        }
    }

    fn start_tag(&mut self, tag: Tag) {
        match tag {
            Tag::Heading { .. } => self.heading = true,
            Tag::Strong => self.bold = true,
            Tag::Emphasis => self.italic = true,
            Tag::CodeBlock(_) => {
                self.flush_line();
                self.in_code_block = true;
            }
            Tag::List(start) => {
                if self.list_depth == 0 && !self.current_spans.is_empty() {
                    self.flush_line();
                }
                self.list_depth += 1;
                self.ordered_counters.push(start);
            }
            Tag::Item => {
                let indent = "  ".repeat(self.list_depth.saturating_sub(1));
                let bullet = match self.ordered_counters.last_mut() {
                    Some(Some(n)) => {
                        let s = format!("{}{}. ", indent, n);
                        *n += 1;
                        s
                    }
                    _ => format!("{}• ", indent),
                };
                self.current_spans
                    .push(Span::styled(bullet, Style::default().fg(Color::DarkGray)));
            }
            Tag::BlockQuote(_) => {
                self.current_spans.push(Span::styled(
                    "┃ ".to_string(),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            _ => {}
        }
    }

    fn end_tag(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                self.flush_line();
                self.lines.push(Line::from(""));
            }
            TagEnd::Heading(_) => {
                self.heading = false;
                self.flush_line();
            }
            TagEnd::Strong => self.bold = false,
            TagEnd::Emphasis => self.italic = false,
            TagEnd::CodeBlock => {
                self.in_code_block = false;
                self.flush_line();
            }
            TagEnd::List(_) => {
                self.list_depth = self.list_depth.saturating_sub(1);
                self.ordered_counters.pop();
            }
            TagEnd::Item => self.flush_line(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(lines: &[Line]) -> String {
        lines
            .iter()
            .map(|l| {
                l.spans
                    .iter()
                    .map(|s| s.content.as_ref())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_paragraph_text_survives() {
        let lines = render_markdown("Hello world");
        assert!(plain(&lines).contains("Hello world"));
    }

    #[test]
    fn test_bold_gets_modifier() {
        let lines = render_markdown("a **bold** word");
        let span = lines
            .iter()
            .flat_map(|l| &l.spans)
            .find(|s| s.content.contains("bold"))
            .unwrap();
        assert!(span.style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_code_block_styled_and_indented() {
        let lines = render_markdown("```\nlet x = 1;\n```");
        let span = lines
            .iter()
            .flat_map(|l| &l.spans)
            .find(|s| s.content.contains("let x = 1;"))
            .unwrap();
        assert_eq!(span.style.fg, Some(Color::Green));
        assert!(span.content.starts_with("    "));
    }

    #[test]
    fn test_lists_render_bullets_and_numbers() {
        let text = plain(&render_markdown("- first\n- second"));
        assert!(text.contains("• first"));

        let text = plain(&render_markdown("1. one\n2. two"));
        assert!(text.contains("1. one"));
        assert!(text.contains("2. two"));
    }
}
