//! Helpers shared by fetching, publishing and rendering.

/// URL utilities for feeds
pub mod url {
    use url::Url;

    /// Only http(s) URLs with a host are pollable.
    pub fn is_valid_feed_url(url_str: &str) -> bool {
        match Url::parse(url_str) {
            Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
            Err(_) => false,
        }
    }
}

/// Feed content utilities
pub mod feed {
    /// Extract clean text content from HTML. Entities are decoded once the
    /// tags are gone, so escaped markup survives as text.
    pub fn extract_text_from_html(html: &str) -> String {
        let text = html
            .chars()
            .fold((String::new(), false), |(mut text, in_tag), c| match c {
                '<' => (text, true),
                '>' => {
                    // keep words on either side of a tag apart
                    text.push(' ');
                    (text, false)
                }
                _ if !in_tag => {
                    text.push(c);
                    (text, in_tag)
                }
                _ => (text, in_tag),
            })
            .0;

        html_escape::decode_html_entities(&text)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Telegram MarkdownV2 helpers
pub mod markdown {
    const RESERVED: &[char] = &[
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
        '\\',
    ];

    /// Escapes every character MarkdownV2 treats as markup.
    pub fn escape_markdown_v2(text: &str) -> String {
        let mut escaped = String::with_capacity(text.len());
        for c in text.chars() {
            if RESERVED.contains(&c) {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }
}
