use feed_rs::model::Entry;
use feed_rs::parser::{self, ParseFeedError};
use sha2::{Digest, Sha256};

use crate::storage::FetchedEpisode;

/// A parsed podcast feed
#[derive(Debug, Clone, Default)]
pub struct FeedDocument {
    pub title: String,
    pub description: String,
    pub language: String,
    /// Items with a media enclosure, in feed order
    pub items: Vec<FeedItem>,
    /// Number of entries dropped because they carried no enclosure
    pub skipped: usize,
}

/// One podcast episode as advertised by the feed.
///
/// Only `key` and `enclosure_url` drive reconciliation; the rest is carried
/// through as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    /// RFC 3339 rendering of the publish (or update) date
    pub published: Option<String>,
    pub link: Option<String>,
    pub image_url: Option<String>,
    pub enclosure_url: String,
}

impl FeedDocument {
    /// Items in the shape the catalog reconciles
    pub fn episodes(&self) -> Vec<FetchedEpisode> {
        self.items
            .iter()
            .map(|item| FetchedEpisode {
                key: Some(item.key.clone()),
                media_url: item.enclosure_url.clone(),
                title: Some(item.title.clone()),
                published: item.published.clone(),
            })
            .collect()
    }
}

pub fn parse_feed(bytes: &[u8]) -> Result<FeedDocument, ParseFeedError> {
    // Leave missing ids empty so `generate_key` owns the fallback
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)?;

    let mut items = Vec::with_capacity(feed.entries.len());
    let mut skipped = 0;

    for entry in feed.entries {
        match parse_entry(entry) {
            Some(item) => items.push(item),
            None => skipped += 1,
        }
    }

    Ok(FeedDocument {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        description: feed.description.map(|d| d.content).unwrap_or_default(),
        language: feed.language.unwrap_or_default(),
        items,
        skipped,
    })
}

fn parse_entry(entry: Entry) -> Option<FeedItem> {
    let Some(enclosure_url) = enclosure_url(&entry) else {
        tracing::debug!(id = %entry.id, "Feed entry has no enclosure, skipping");
        return None;
    };

    let published = entry.published.or(entry.updated).map(|dt| dt.to_rfc3339());
    let title = entry
        .title
        .map(|t| t.content)
        .unwrap_or_else(|| "Untitled".to_string());
    let description = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body));
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref() != Some("enclosure"))
        .map(|l| l.href.clone());
    let image_url = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .next();

    let existing_id = if entry.id.is_empty() {
        None
    } else {
        Some(entry.id.as_str())
    };
    let key = generate_key(existing_id, &title, published.as_deref());

    Some(FeedItem {
        key,
        title,
        description,
        published,
        link,
        image_url,
        enclosure_url,
    })
}

/// RSS enclosures surface as media content; Atom uses `rel="enclosure"` links.
fn enclosure_url(entry: &Entry) -> Option<String> {
    entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|c| c.url.as_ref())
        .map(|u| u.to_string())
        .next()
        .or_else(|| {
            entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("enclosure"))
                .map(|l| l.href.clone())
        })
        .filter(|url| !url.trim().is_empty())
}

/// Stable identity for an episode slot.
///
/// The fallback hash covers title and publication date only, so a republished
/// enclosure keeps its key.
fn generate_key(existing: Option<&str>, title: &str, published: Option<&str>) -> String {
    if let Some(id) = existing {
        let trimmed = id.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!("{}|{}", title, published.unwrap_or(""));
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
