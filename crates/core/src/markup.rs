//! Markup-capable text
//!
//! [`MString`] is the value type passed between every part of the engine.
//! It pairs plain text with character-indexed formatting spans that survive
//! slicing and concatenation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Terminal colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    fn sgr(&self, background: bool) -> String {
        let base = if background { 40 } else { 30 };
        let extended = if background { 48 } else { 38 };
        match self {
            Color::Black => base.to_string(),
            Color::Red => (base + 1).to_string(),
            Color::Green => (base + 2).to_string(),
            Color::Yellow => (base + 3).to_string(),
            Color::Blue => (base + 4).to_string(),
            Color::Magenta => (base + 5).to_string(),
            Color::Cyan => (base + 6).to_string(),
            Color::White => (base + 7).to_string(),
            Color::Indexed(n) => format!("{};5;{}", extended, n),
            Color::Rgb(r, g, b) => format!("{};2;{};{};{}", extended, r, g, b),
        }
    }
}

/// ANSI text style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AnsiStyle {
    pub foreground: Option<Color>,
    pub background: Option<Color>,
    pub bold: bool,
    pub underline: bool,
    pub blink: bool,
    pub inverse: bool,
}

impl AnsiStyle {
    pub fn fg(color: Color) -> Self {
        Self {
            foreground: Some(color),
            ..Default::default()
        }
    }

    fn sgr_codes(&self) -> Vec<String> {
        let mut codes = Vec::new();
        if self.bold {
            codes.push("1".to_string());
        }
        if self.underline {
            codes.push("4".to_string());
        }
        if self.blink {
            codes.push("5".to_string());
        }
        if self.inverse {
            codes.push("7".to_string());
        }
        if let Some(fg) = self.foreground {
            codes.push(fg.sgr(false));
        }
        if let Some(bg) = self.background {
            codes.push(bg.sgr(true));
        }
        codes
    }
}

/// A kind of formatting metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Markup {
    Ansi(AnsiStyle),
    Link { url: String },
}

/// Markup applied to the characters `start..end`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkupSpan {
    pub start: usize,
    pub end: usize,
    pub markup: Markup,
}

/// Immutable-by-convention markup string
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MString {
    text: String,
    char_len: usize,
    spans: Vec<MarkupSpan>,
}

impl MString {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text carrying a single markup over its whole length
    pub fn marked(text: impl Into<String>, markup: Markup) -> Self {
        let mut s = Self::from(text.into());
        if s.char_len > 0 {
            s.spans.push(MarkupSpan {
                start: 0,
                end: s.char_len,
                markup,
            });
        }
        s
    }

    /// Add markup over `start..end`, clamped to the text
    pub fn with_markup(mut self, start: usize, end: usize, markup: Markup) -> Self {
        let end = end.min(self.char_len);
        if start < end {
            self.spans.push(MarkupSpan { start, end, markup });
        }
        self
    }

    pub fn plain(&self) -> &str {
        &self.text
    }

    pub fn into_plain(self) -> String {
        self.text
    }

    /// Length in characters
    pub fn len(&self) -> usize {
        self.char_len
    }

    pub fn is_empty(&self) -> bool {
        self.char_len == 0
    }

    pub fn spans(&self) -> &[MarkupSpan] {
        &self.spans
    }

    /// Byte range of characters `start..end`, found in one pass
    fn byte_range(&self, start: usize, end: usize) -> Range<usize> {
        if self.text.len() == self.char_len {
            return start.min(self.char_len)..end.min(self.char_len);
        }
        let mut bounds = self
            .text
            .char_indices()
            .map(|(b, _)| b)
            .chain(std::iter::once(self.text.len()));
        let from = bounds.nth(start).unwrap_or(self.text.len());
        let to = match end.checked_sub(start + 1) {
            Some(skip) => bounds.nth(skip).unwrap_or(self.text.len()),
            None => from,
        };
        from..to
    }

    /// Characters `start..end`, markup re-sliced to match
    pub fn slice(&self, start: usize, end: usize) -> MString {
        let end = end.min(self.char_len);
        if start >= end {
            return MString::new();
        }
        let bytes = self.byte_range(start, end);
        self.slice_bytes(start, end, bytes)
    }

    /// [`slice`](Self::slice) with the byte range already known
    fn slice_bytes(&self, start: usize, end: usize, bytes: Range<usize>) -> MString {
        if start >= end {
            return MString::new();
        }
        let spans = self
            .spans
            .iter()
            .filter(|span| span.start < end && span.end > start)
            .map(|span| MarkupSpan {
                start: span.start.max(start) - start,
                end: span.end.min(end) - start,
                markup: span.markup.clone(),
            })
            .collect();
        MString {
            text: self.text[bytes].to_string(),
            char_len: end - start,
            spans,
        }
    }

    /// `len` characters starting at `start`
    pub fn substring(&self, start: usize, len: usize) -> MString {
        self.slice(start, start.saturating_add(len))
    }

    /// Append another markup string, shifting its spans
    pub fn push(&mut self, other: &MString) {
        let shift = self.char_len;
        for span in &other.spans {
            let shifted = MarkupSpan {
                start: span.start + shift,
                end: span.end + shift,
                markup: span.markup.clone(),
            };
            match self.spans.last_mut() {
                Some(last) if last.end == shifted.start && last.markup == shifted.markup => {
                    last.end = shifted.end;
                }
                _ => self.spans.push(shifted),
            }
        }
        self.text.push_str(&other.text);
        self.char_len += other.char_len;
    }

    pub fn push_str(&mut self, text: &str) {
        self.text.push_str(text);
        self.char_len += text.chars().count();
    }

    pub fn concat(a: &MString, b: &MString) -> MString {
        let mut out = a.clone();
        out.push(b);
        out
    }

    pub fn join<'a, I>(items: I, separator: &MString) -> MString
    where
        I: IntoIterator<Item = &'a MString>,
    {
        let mut out = MString::new();
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            out.push(item);
        }
        out
    }

    /// Split on a delimiter character, keeping markup of each piece
    pub fn split(&self, delimiter: char) -> Vec<MString> {
        let mut pieces = Vec::new();
        let (mut start, mut start_byte) = (0, 0);
        for (i, (byte, ch)) in self.text.char_indices().enumerate() {
            if ch == delimiter {
                pieces.push(self.slice_bytes(start, i, start_byte..byte));
                start = i + 1;
                start_byte = byte + ch.len_utf8();
            }
        }
        pieces.push(self.slice_bytes(start, self.char_len, start_byte..self.text.len()));
        pieces
    }

    pub fn trim(&self) -> MString {
        let leading = self.text.chars().take_while(|c| c.is_whitespace()).count();
        if leading == self.char_len {
            return MString::new();
        }
        let trailing = self.text.chars().rev().take_while(|c| c.is_whitespace()).count();
        self.slice(leading, self.char_len - trailing)
    }

    pub fn to_ascii_uppercase(&self) -> MString {
        MString {
            text: self.text.to_ascii_uppercase(),
            char_len: self.char_len,
            spans: self.spans.clone(),
        }
    }

    pub fn to_ascii_lowercase(&self) -> MString {
        MString {
            text: self.text.to_ascii_lowercase(),
            char_len: self.char_len,
            spans: self.spans.clone(),
        }
    }

    /// Render for a terminal: SGR sequences for ANSI markup, OSC 8 for links
    pub fn render_ansi(&self) -> String {
        if self.spans.is_empty() {
            return self.text.clone();
        }
        let mut out = String::with_capacity(self.text.len() + 16);
        let mut active: Vec<&MarkupSpan> = Vec::new();
        for (i, ch) in self.text.chars().enumerate() {
            let now: Vec<&MarkupSpan> = self
                .spans
                .iter()
                .filter(|span| span.start <= i && i < span.end)
                .collect();
            if now != active {
                if !active.is_empty() {
                    close_markup(&mut out, &active);
                }
                open_markup(&mut out, &now);
                active = now;
            }
            out.push(ch);
        }
        if !active.is_empty() {
            close_markup(&mut out, &active);
        }
        out
    }
}

fn open_markup(out: &mut String, spans: &[&MarkupSpan]) {
    let mut codes = Vec::new();
    for span in spans {
        match &span.markup {
            Markup::Ansi(style) => codes.extend(style.sgr_codes()),
            Markup::Link { url } => {
                out.push_str("\x1b]8;;");
                out.push_str(url);
                out.push_str("\x1b\\");
            }
        }
    }
    if !codes.is_empty() {
        out.push_str("\x1b[");
        out.push_str(&codes.join(";"));
        out.push('m');
    }
}

fn close_markup(out: &mut String, spans: &[&MarkupSpan]) {
    if spans.iter().any(|s| matches!(s.markup, Markup::Ansi(_))) {
        out.push_str("\x1b[0m");
    }
    if spans.iter().any(|s| matches!(s.markup, Markup::Link { .. })) {
        out.push_str("\x1b]8;;\x1b\\");
    }
}

impl fmt::Display for MString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<String> for MString {
    fn from(text: String) -> Self {
        let char_len = text.chars().count();
        Self {
            text,
            char_len,
            spans: Vec::new(),
        }
    }
}

impl From<&str> for MString {
    fn from(text: &str) -> Self {
        Self::from(text.to_string())
    }
}

impl From<&String> for MString {
    fn from(text: &String) -> Self {
        Self::from(text.clone())
    }
}
