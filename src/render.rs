use crate::rss_utils::markdown::escape_markdown_v2;
use crate::traits::Renderer;
use crate::types::{ItemEnvelope, RelayError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{\{(.*?)\}\}").expect("placeholder regex should compile")
});

/// Source title and a link to the hosted page (or the item itself).
pub const DEFAULT_TEMPLATE: &str = "*{{source_title}}*\n[{{title}}]({{url}})";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Author,
    Description,
    SourceTitle,
    PageUrl,
    /// Hosted page when there is one, otherwise the item link.
    Url,
}

impl Field {
    /// Accepts `name`, ` name ` and `.name`.
    fn parse(placeholder: &str) -> Option<Self> {
        let name = placeholder.trim();
        match name.strip_prefix('.').unwrap_or(name) {
            "title" => Some(Field::Title),
            "link" => Some(Field::Link),
            "author" => Some(Field::Author),
            "description" => Some(Field::Description),
            "source_title" => Some(Field::SourceTitle),
            "page_url" => Some(Field::PageUrl),
            "url" => Some(Field::Url),
            _ => None,
        }
    }

    fn value<'a>(&self, envelope: &'a ItemEnvelope) -> &'a str {
        let item = &envelope.item;
        match self {
            Field::Title => &item.title,
            Field::Link => item.link.as_deref().unwrap_or_default(),
            Field::Author => item.author.as_deref().unwrap_or_default(),
            Field::Description => item.description.as_deref().unwrap_or_default(),
            Field::SourceTitle => &envelope.source_title,
            Field::PageUrl => envelope.page_url.as_deref().unwrap_or_default(),
            Field::Url => envelope
                .page_url
                .as_deref()
                .or(item.link.as_deref())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Field(Field),
}

/// Renders envelopes into Telegram MarkdownV2 messages from a `{{field}}` template.
///
/// Template text is emitted as written; only substituted values are escaped.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    segments: Vec<Segment>,
}

impl TemplateRenderer {
    pub fn new(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut last = 0;

        for captures in PLACEHOLDER_PATTERN.captures_iter(template) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let field = Field::parse(name.as_str()).ok_or_else(|| {
                RelayError::Render(format!("unknown template field {:?}", name.as_str()))
            })?;

            if whole.start() > last {
                segments.push(Segment::Text(template[last..whole.start()].to_string()));
            }
            segments.push(Segment::Field(field));
            last = whole.end();
        }
        if last < template.len() {
            segments.push(Segment::Text(template[last..].to_string()));
        }

        if segments.is_empty() {
            return Err(RelayError::Render("template is empty".to_string()));
        }
        Ok(Self { segments })
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self {
            segments: vec![
                Segment::Text("*".to_string()),
                Segment::Field(Field::SourceTitle),
                Segment::Text("*\n[".to_string()),
                Segment::Field(Field::Title),
                Segment::Text("](".to_string()),
                Segment::Field(Field::Url),
                Segment::Text(")".to_string()),
            ],
        }
    }
}

impl Renderer for TemplateRenderer {
    fn render(&self, envelope: &ItemEnvelope) -> Result<String> {
        let mut message = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => message.push_str(text),
                Segment::Field(field) => message.push_str(&escape_markdown_v2(field.value(envelope))),
            }
        }

        if message.trim().is_empty() {
            return Err(RelayError::Render(format!(
                "message for item {:?} rendered empty",
                envelope.item.guid
            )));
        }
        Ok(message)
    }
}
