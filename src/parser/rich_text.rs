use std::sync::LazyLock;

use regex::Regex;

// Same delimiter must open and close a match, so the two forms are separate alternatives.
static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*|__(.+?)__").unwrap());

/// One inline-styled run of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub content: String,
    pub bold: bool,
}

impl TextSpan {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            bold: false,
        }
    }

    pub fn bold(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            bold: true,
        }
    }
}

/// Split a single line into plain and bold spans.
///
/// Never fails. An empty line yields no spans; a line without bold markers
/// yields exactly one plain span holding the whole line.
pub fn tokenize(line: &str) -> Vec<TextSpan> {
    let mut spans = Vec::new();
    let mut cursor = 0;

    for caps in BOLD_RE.captures_iter(line) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > cursor {
            spans.push(TextSpan::plain(&line[cursor..whole.start()]));
        }
        let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        if !inner.is_empty() {
            spans.push(TextSpan::bold(inner));
        }
        cursor = whole.end();
    }

    if cursor < line.len() {
        spans.push(TextSpan::plain(&line[cursor..]));
    }

    spans
}
