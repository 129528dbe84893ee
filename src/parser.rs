use crate::types::{FeedItem, ParsedFeed, RelayError, Result};
use chrono::Utc;
use feed_rs::parser;
use tracing::debug;

pub struct FeedParser;

impl FeedParser {
    pub fn parse_feed(content: &[u8]) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content)
            .map_err(|e| RelayError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty());
        let description = feed.description.map(|d| d.content);

        let items: Vec<FeedItem> = feed.entries.into_iter().map(Self::parse_entry).collect();
        debug!("Parsed feed with {} entries", items.len());

        Ok(ParsedFeed {
            title,
            description,
            items,
        })
    }

    fn parse_entry(entry: feed_rs::model::Entry) -> FeedItem {
        let title = entry
            .title
            .map(|t| t.content)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        let link = entry.links.first().map(|l| l.href.clone());
        let description = entry.summary.map(|s| s.content);

        // Prefer the full body over the summary
        let content = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| description.clone());

        let author = entry.authors.first().map(|a| a.name.clone());
        let published_at = entry
            .published
            .or(entry.updated)
            .map(|dt| dt.with_timezone(&Utc));

        FeedItem {
            guid: entry.id,
            title,
            content,
            description,
            author,
            link,
            published_at,
        }
    }
}
