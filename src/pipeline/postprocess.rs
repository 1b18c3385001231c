//! Deterministic cleanup of model output for one page.
//!
//! Vision models add artefacts that are harmless to them and annoying to
//! callers: an outer code fence around the whole answer, CRLF line endings,
//! trailing spaces, long runs of blank lines, placeholder image links for
//! figures they cannot transcribe, and zero-width characters. Each rule here
//! is a pure `&str → String` pass; [`clean_page_text`] runs them in order.
//!
//! Rule order matters: fences are stripped before line endings are
//! normalised (the fence regex expects `\n`, so both forms are accepted), and
//! whitespace rules run before the final trim.
//!
//! Only successful page text is cleaned. Failure markers are produced by the
//! pipeline itself and are passed through untouched.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to raw model output.
///
/// 1. Strip an outer code fence (` ```markdown `, ` ```html `, bare ` ``` `)
/// 2. Normalise line endings (CRLF/CR → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ blank lines down to 2
/// 5. Replace placeholder image links with their alt text
/// 6. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 7. Trim leading and trailing blank lines
pub fn clean_page_text(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_placeholder_images(&s);
    let s = remove_invisible_chars(&s);
    s.trim_matches('\n').to_string()
}

// ── Rule 1: Strip outer code fence ───────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md|html|text)?\r?\n(.*?)\r?\n```\s*$").unwrap()
});

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 5: Placeholder image links ──────────────────────────────────────────
//
// A scanned page has no image URLs to link to, so anything the model emits as
// `![alt](url)` is invented unless it is an absolute http(s) link. Invented
// links become `*alt*` so the figure caption survives.

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

const PLACEHOLDER_DOMAINS: &[&str] = &[
    "example.com",
    "placeholder.com",
    "dummyimage.com",
    "lorempixel.com",
    "picsum.photos",
    "placehold.it",
];

fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    if !u.starts_with("http://") && !u.starts_with("https://") {
        return true;
    }
    PLACEHOLDER_DOMAINS.iter().any(|d| u.contains(d))
}

fn remove_placeholder_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if !is_placeholder_url(&caps[2]) {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("*{}*", alt)
            }
        })
        .to_string()
}

// ── Rule 6: Invisible Unicode ────────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}
