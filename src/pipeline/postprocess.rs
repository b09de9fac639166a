//! Post-processing: deterministic cleanup of model-generated HTML markup.
//!
//! Even when told to output only HTML, multimodal models routinely wrap the
//! document in ` ```html ... ``` ` fences, prefix it with a sentence of
//! commentary, or emit a BOM. The renderer would print those artefacts on the
//! page, so they are removed here before the markup is persisted.
//!
//! ## Rule Order
//!
//! Fences are stripped first so later rules see the bare document; the
//! charset rule runs last because it edits inside `<head>`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all post-processing rules to the raw model output.
///
/// Rules (applied in order):
/// 1. Strip outer code fences (with or without a language tag)
/// 2. Drop commentary around a single fenced HTML block
/// 3. Normalise line endings (CRLF → LF)
/// 4. Strip invisible Unicode (BOM, zero-width spaces, soft hyphens)
/// 5. Trim surrounding whitespace
/// 6. Declare UTF-8 in `<head>` when no charset is declared
///
/// Returns an empty string when nothing is left.
pub fn clean_markup(input: &str) -> String {
    let s = strip_outer_fences(input);
    let s = extract_fenced_block(&s);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = s.trim().to_string();
    ensure_charset(&s)
}

// ── Rule 1: Strip outer code fences ─────────────────────────────────────────
//
// The opening and closing fences are removed independently: a reply cut off
// at the token limit has the opening fence but no closing one.

static RE_LEADING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*(\r?\n|$)").unwrap());

static RE_TRAILING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|\r?\n)```$").unwrap());

fn strip_outer_fences(input: &str) -> String {
    let trimmed = input.trim();
    let s = RE_LEADING_FENCE.replace(trimmed, "");
    let s = s.trim_end();
    RE_TRAILING_FENCE.replace(s, "").into_owned()
}

// ── Rule 2: Drop commentary around a fenced block ───────────────────────────
//
// "Here is the HTML:\n```html\n<!DOCTYPE html>...```\nLet me know..." keeps
// only the fenced document. Applies only when exactly one html fence exists.

static RE_HTML_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?si)```html[ \t]*\r?\n(.*?)\r?\n?```").unwrap());

fn extract_fenced_block(input: &str) -> String {
    let mut blocks = RE_HTML_BLOCK.captures_iter(input);
    match (blocks.next(), blocks.next()) {
        (Some(only), None) => only[1].to_string(),
        _ => input.to_string(),
    }
}

// ── Rule 3: Normalise line endings ──────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 4: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 6: Declare the charset ─────────────────────────────────────────────
//
// wkhtmltopdf falls back to Latin-1 without a declaration, which mangles
// accented text and currency symbols in table cells.

static RE_HEAD_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<head(\s[^>]*)?>").unwrap());

fn ensure_charset(input: &str) -> String {
    if input.to_ascii_lowercase().contains("charset") {
        return input.to_string();
    }
    match RE_HEAD_OPEN.find(input) {
        Some(m) => format!(
            "{}\n<meta charset=\"utf-8\">{}",
            &input[..m.end()],
            &input[m.end()..]
        ),
        None => input.to_string(),
    }
}
