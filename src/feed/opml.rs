use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::storage::NewSubscription;
use crate::util::validate_url;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack overflow attacks from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// File I/O error.
    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// Parses an OPML file from disk and extracts podcast subscriptions.
///
/// Every `<outline>` carrying an `xmlUrl` attribute becomes one
/// [`NewSubscription`], wherever it sits in the outline tree. Folder outlines
/// without a feed URL are ignored.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not well-formed XML.
///
/// # Security
///
/// - XXE is mitigated because `quick-xml` (0.37) does not parse `<!ENTITY>`
///   declarations; custom entities fail with `EscapeError::UnrecognizedEntity`.
/// - Feed URLs pointing at localhost, private networks or non-HTTP schemes
///   are skipped with a warning.
pub async fn parse(path: &std::path::Path) -> Result<Vec<NewSubscription>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml_content(&content)
}

pub(crate) fn parse_opml_content(content: &str) -> Result<Vec<NewSubscription>, OpmlError> {
    // SEC-002: quick-xml does not expand external entities.
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut subscriptions = Vec::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }

                if let Some(sub) = parse_outline_attributes(&e, &reader)? {
                    subscriptions.push(sub);
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                // Self-closing outline doesn't affect depth
                if let Some(sub) = parse_outline_attributes(&e, &reader)? {
                    subscriptions.push(sub);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(subscriptions)
}

/// Extracts subscription attributes from an outline element.
///
/// The display name comes from `text`, then `title`, then the feed URL.
/// Returns `None` for folder outlines and for feeds with rejected URLs.
fn parse_outline_attributes(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Option<NewSubscription>, OpmlError> {
    let mut xml_url = None;
    let mut html_url = None;
    let mut image_url = None;
    let mut text = None;
    let mut title = None;

    let decoder = reader.decoder();
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = || -> Result<String, OpmlError> {
            attr.decode_and_unescape_value(decoder)
                .map(|v| v.trim().to_string())
                .map_err(|e| OpmlError::XmlParse(e.to_string()))
        };
        match attr.key.as_ref() {
            b"xmlUrl" => xml_url = Some(value()?),
            b"htmlUrl" => html_url = optional_url(value()?, "htmlUrl"),
            b"imageUrl" => image_url = optional_url(value()?, "imageUrl"),
            b"text" => text = Some(value()?),
            b"title" => title = Some(value()?),
            _ => {}
        }
    }

    let Some(url) = xml_url else {
        return Ok(None);
    };

    if let Err(e) = validate_url(&url) {
        tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
        return Ok(None);
    }

    let name = text
        .filter(|t| !t.is_empty())
        .or(title.filter(|t| !t.is_empty()))
        .unwrap_or_else(|| url.clone());

    Ok(Some(NewSubscription {
        name,
        xml_url: url,
        html_url,
        image_url,
    }))
}

fn optional_url(value: String, attribute: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    match validate_url(&value) {
        Ok(_) => Some(value),
        Err(e) => {
            tracing::warn!(url = %value, attribute, error = %e, "Ignoring invalid URL in OPML");
            None
        }
    }
}
