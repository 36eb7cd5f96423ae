// src/label.rs

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

/// Shown for a node that has no label text.
pub const UNTITLED_LABEL: &str = "untitled";

// Alternation order is precedence: at any start position the first
// alternative that matches wins.
static MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\*\*\*(.+?)\*\*\*",
        r"|\*\*(.+?)\*\*",
        r"|__(.+?)__",
        r"|~~(.+?)~~",
        r"|\*(.+?)\*",
        r"|_(.+?)_",
    ))
    .expect("markup pattern")
});

fn is_false(v: &bool) -> bool {
    !*v
}

/// A run of text sharing one style.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub text: String,
    #[serde(skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub strikethrough: bool,
}

impl Segment {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Default::default() }
    }

    pub fn is_plain(&self) -> bool {
        !self.bold && !self.italic && !self.strikethrough
    }

    fn styled(caps: &Captures<'_>) -> Option<Self> {
        // (group, bold, italic, strikethrough)
        const STYLES: [(usize, bool, bool, bool); 6] = [
            (1, true, true, false),
            (2, true, false, false),
            (3, true, false, false),
            (4, false, false, true),
            (5, false, true, false),
            (6, false, true, false),
        ];
        STYLES.iter().find_map(|&(group, bold, italic, strikethrough)| {
            caps.get(group).map(|m| Segment {
                text: m.as_str().to_string(),
                bold,
                italic,
                strikethrough,
            })
        })
    }
}

/// One visual line of a label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Line {
    pub segments: Vec<Segment>,
}

impl Line {
    /// The line's content with all styling dropped.
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }
}

/// Replace every literal `\n` escape (backslash, `n`) with a real line break.
pub fn expand_escapes(raw: &str) -> String {
    raw.replace("\\n", "\n")
}

/// Parse a node label into styled lines.
pub fn parse_label(raw: Option<&str>) -> Vec<Line> {
    let source = match raw {
        Some(s) if !s.is_empty() => expand_escapes(s),
        _ => UNTITLED_LABEL.to_string(),
    };
    source.split('\n').map(tokenize_line).collect()
}

/// Label content without markup, lines joined with `\n`.
pub fn plain_text(lines: &[Line]) -> String {
    lines.iter().map(Line::text).collect::<Vec<_>>().join("\n")
}

fn tokenize_line(line: &str) -> Line {
    let mut segments = Vec::new();
    let mut cursor = 0;

    for caps in MARKUP.captures_iter(line) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > cursor {
            segments.push(Segment::plain(&line[cursor..whole.start()]));
        }
        match Segment::styled(&caps) {
            Some(segment) => segments.push(segment),
            None => segments.push(Segment::plain(whole.as_str())),
        }
        cursor = whole.end();
    }
    if cursor < line.len() {
        segments.push(Segment::plain(&line[cursor..]));
    }

    Line { segments }
}
