//! Markup-to-text conversion shared by the adapters.

use std::sync::OnceLock;

use pulldown_cmark::{html, Parser};
use regex::Regex;
use scraper::{Html, Selector};

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn split_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(https?)\s*:\s*//").unwrap())
}

fn split_hashtag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#\s+(\w)").unwrap())
}

/// Strip HTML down to plain text: text nodes joined with spaces, `<img>`
/// alt texts appended, whitespace collapsed, and links/hashtags re-joined
/// where the markup split them ("http ://x", "# tag").
pub fn read_html(content: &str) -> String {
    let doc = Html::parse_fragment(content);
    let mut text = doc
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");

    let img = Selector::parse("img").unwrap();
    for element in doc.select(&img) {
        if let Some(alt) = element.value().attr("alt") {
            text.push(' ');
            text.push_str(alt);
        }
    }

    let text = whitespace_re().replace_all(&text, " ");
    let text = split_url_re().replace_all(&text, "${1}://");
    let text = split_hashtag_re().replace_all(&text, "#${1}");
    text.trim().to_string()
}

/// Markdown sources go through HTML so both paths normalize identically.
pub fn read_markdown(content: &str) -> String {
    let mut rendered = String::new();
    html::push_html(&mut rendered, Parser::new(content));
    read_html(&rendered)
}
