//! Terminal input and output for the interactive session

use std::io::{self, Write};

use async_trait::async_trait;
use crossterm::style::Stylize;
use sidekick_session::{InputSource, RenderSink};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Fallback width when the terminal size is unknown
const DEFAULT_WIDTH: usize = 80;

/// Reads lines from stdin, printing the `You:` prompt first
pub struct StdinInput {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinInput {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

#[async_trait]
impl InputSource for StdinInput {
    async fn next_line(&mut self) -> Option<String> {
        print!("\n{} ", "You:".bold());
        let _ = io::stdout().flush();

        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to read input: {}", e);
                None
            }
        }
    }
}

/// Renders reasoning in gray and the answer in white
pub struct TerminalSink {
    out: io::Stdout,
    width: usize,
}

impl TerminalSink {
    pub fn new() -> Self {
        let width = crossterm::terminal::size()
            .map(|(cols, _)| cols as usize)
            .unwrap_or(DEFAULT_WIDTH);
        Self {
            out: io::stdout(),
            width,
        }
    }

    fn write(&mut self, text: impl std::fmt::Display) {
        let _ = write!(self.out, "{}", text);
        let _ = self.out.flush();
    }
}

impl RenderSink for TerminalSink {
    fn reasoning_start(&mut self) {
        self.write(format!("\n{}\n", "<think>".dark_grey()));
    }

    fn reasoning_delta(&mut self, delta: &str) {
        self.write(delta.dark_grey());
    }

    fn reasoning_end(&mut self, reasoning: &str) {
        self.write(format!("{}\n", "</think>".dark_grey()));
        if !reasoning.is_empty() {
            self.write(format!("{}\n", render_box("Reasoning", reasoning, self.width).dark_grey()));
        }
    }

    fn answer_delta(&mut self, delta: &str) {
        self.write(delta.white());
    }

    fn response_end(&mut self) {
        self.write("\n\n");
    }

    fn notice(&mut self, message: &str) {
        self.write(format!("{}\n", format!("[{}]", message).dark_grey()));
    }

    fn error(&mut self, message: &str) {
        let _ = writeln!(io::stderr(), "{}", message.red());
    }
}

/// Draw `text` inside a titled box at most `width` columns wide
pub fn render_box(title: &str, text: &str, width: usize) -> String {
    let inner = width.saturating_sub(4).max(20);

    let mut lines = Vec::new();
    for paragraph in text.lines() {
        wrap_into(paragraph, inner, &mut lines);
    }

    let title = format!(" {} ", title);
    let fill = (inner + 2).saturating_sub(title.chars().count() + 1);
    let mut out = format!("┌─{}{}┐\n", title, "─".repeat(fill));
    for line in &lines {
        let pad = inner - line.chars().count();
        out.push_str(&format!("│ {}{} │\n", line, " ".repeat(pad)));
    }
    out.push_str(&format!("└{}┘", "─".repeat(inner + 2)));
    out
}

/// Greedy word wrap; words longer than `width` are split
fn wrap_into(paragraph: &str, width: usize, lines: &mut Vec<String>) {
    let mut current = String::new();
    let mut current_len = 0;

    for word in paragraph.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }

        let needed = if current.is_empty() { word.len() } else { current_len + 1 + word.len() };
        if needed > width {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }

    lines.push(current);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_box_shape() {
        let rendered = render_box("Reasoning", "short thought", 40);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("┌─ Reasoning "));
        assert!(lines[1].contains("short thought"));
        assert!(lines[2].starts_with('└'));
        let widths: Vec<usize> = lines.iter().map(|l| l.chars().count()).collect();
        assert!(widths.iter().all(|w| *w == widths[0]), "{:?}", widths);
    }

    #[test]
    fn test_wrap_respects_width() {
        let mut lines = Vec::new();
        wrap_into("the quick brown fox jumps over the lazy dog", 10, &mut lines);
        assert!(lines.iter().all(|l| l.chars().count() <= 10));
        assert_eq!(lines.join(" "), "the quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn test_wrap_splits_long_words() {
        let mut lines = Vec::new();
        wrap_into(&"a".repeat(25), 10, &mut lines);
        assert_eq!(lines, vec!["a".repeat(10), "a".repeat(10), "a".repeat(5)]);
    }

    #[test]
    fn test_blank_paragraph_kept() {
        let rendered = render_box("R", "one\n\ntwo", 30);
        assert_eq!(rendered.lines().count(), 5);
    }
}
