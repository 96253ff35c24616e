//! Best-effort HTML to markdown-ish text extraction.
//!
//! Quality target is "good enough for language-model training", not rendering
//! fidelity: headings become `#` lines, `pre` blocks become code fences, list
//! items become bullets, everything else collapses to paragraph text. Boiler-
//! plate containers (script, style, nav, ...) are dropped entirely.

use scraper::node::Node;
use scraper::{ElementRef, Html};

const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "head", "nav", "iframe", "svg", "template",
];

/// Extracts markdown-ish text from raw HTML. Returns `None` when the input is
/// blank or nothing useful survives extraction, in which case the caller
/// should fall back to the raw content.
pub fn extract_markdown(html: &str) -> Option<String> {
    if html.trim().is_empty() {
        return None;
    }
    let doc = Html::parse_document(html);
    let mut out = String::new();
    walk(doc.root_element(), &mut out);
    let cleaned = tidy(&out);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn walk(el: ElementRef<'_>, out: &mut String) {
    let tag = el.value().name();
    if SKIP_TAGS.contains(&tag) {
        return;
    }
    match tag {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level: usize = tag[1..].parse().unwrap_or(1);
            let text = collapse_ws(&element_text(el));
            if !text.is_empty() {
                out.push_str(&"#".repeat(level));
                out.push(' ');
                out.push_str(&text);
                out.push_str("\n\n");
            }
        }
        "pre" => {
            let code = element_text(el);
            let code = code.trim_matches('\n');
            if !code.trim().is_empty() {
                out.push_str("```\n");
                out.push_str(code);
                out.push_str("\n```\n\n");
            }
        }
        "li" => {
            let text = collapse_ws(&element_text(el));
            if !text.is_empty() {
                out.push_str("- ");
                out.push_str(&text);
                out.push('\n');
            }
        }
        "p" | "blockquote" | "td" | "th" | "caption" | "figcaption" => {
            let text = collapse_ws(&element_text(el));
            if !text.is_empty() {
                out.push_str(&text);
                out.push_str("\n\n");
            }
        }
        "br" | "hr" => out.push('\n'),
        "ul" | "ol" => {
            walk_children(el, out);
            out.push('\n');
        }
        _ => {
            walk_children(el, out);
            // Loose text sitting directly under a container still counts.
            let mut loose = String::new();
            for child in el.children() {
                if let Node::Text(text) = child.value() {
                    loose.push_str(text);
                    loose.push(' ');
                }
            }
            let loose = collapse_ws(&loose);
            if !loose.is_empty() {
                out.push_str(&loose);
                out.push_str("\n\n");
            }
        }
    }
}

fn walk_children(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            walk(child_el, out);
        }
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapses runs of blank lines and trims the edges.
fn tidy(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            lines.push("");
        } else {
            blank_run = 0;
            lines.push(line.trim_end());
        }
    }
    lines.join("\n").trim().to_string()
}
