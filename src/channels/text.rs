//! Text shaping shared by the chat transports: size-limited chunking and
//! markdown adaptation for surfaces with partial markdown support.

use regex::Regex;
use std::sync::LazyLock;

static WRAPPER_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\n(.*)\n```\s*$").unwrap()
});
static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[A-Za-z0-9_+\-]*[ \t]*$").unwrap());
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*)$").unwrap());

/// Maximum characters a derived document title keeps.
const TITLE_LIMIT_CHARS: usize = 80;

/// Split `text` into chunks of at most `size` characters, preferring to
/// break at the last newline inside each window so lines stay whole.
///
/// Counts characters, not bytes, so multibyte text never splits mid-char.
/// Joining the chunks reproduces the input exactly.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let window_end = (start + size).min(chars.len());
        let mut end = window_end;
        if window_end < chars.len() {
            // Keep the newline with the chunk it terminates.
            if let Some(pos) = chars[start..window_end].iter().rposition(|&c| c == '\n') {
                if pos > 0 {
                    end = start + pos + 1;
                }
            }
        }
        chunks.push(chars[start..end].iter().collect());
        start = end;
    }
    chunks
}

/// Markdown reshaped for a surface that renders bold but not headings or
/// syntax-highlighted fences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptedMarkdown {
    /// Title lifted from the first top-level heading, if any.
    pub title: Option<String>,
    pub body: String,
}

/// Adapt general markdown for card-style rendering:
/// - unwrap a whole-document ```markdown wrapper fence
/// - strip language tags from code fences
/// - turn headings into bold lines, lifting the first H1 out as a title
pub fn adapt_markdown(text: &str) -> AdaptedMarkdown {
    let text = match WRAPPER_FENCE.captures(text.trim()) {
        Some(caps) => caps[1].to_string(),
        None => text.to_string(),
    };

    let mut title: Option<String> = None;
    let mut body_lines: Vec<String> = Vec::new();
    let mut in_code_block = false;

    for line in text.lines() {
        if CODE_FENCE.is_match(line) {
            in_code_block = !in_code_block;
            body_lines.push("```".to_string());
            continue;
        }
        if in_code_block {
            body_lines.push(line.to_string());
            continue;
        }
        if let Some(caps) = HEADING.captures(line) {
            let level = caps[1].len();
            let heading = caps[2].trim().to_string();
            if level == 1 && title.is_none() && !heading.is_empty() {
                title = Some(truncate_title(&heading));
            }
            // The title heading stays in the body as a bold line too.
            body_lines.push(format!("**{heading}**"));
            continue;
        }
        body_lines.push(line.to_string());
    }

    AdaptedMarkdown {
        title,
        body: body_lines.join("\n").trim().to_string(),
    }
}

fn truncate_title(heading: &str) -> String {
    if heading.chars().count() <= TITLE_LIMIT_CHARS {
        heading.to_string()
    } else {
        heading.chars().take(TITLE_LIMIT_CHARS).collect()
    }
}
