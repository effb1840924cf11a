use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use crate::feed::parser::{parse_feed, FeedDocument};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while retrieving a feed.
///
/// Every fetch is a single attempt; none of these are retried.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Feed XML could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Fetch and parse the feed at `url`.
///
/// The whole exchange, body included, is bounded by `timeout` so a stalled
/// server cannot hold a worker forever.
///
/// # Errors
///
/// - [`FetchError::Timeout`] - `timeout` elapsed
/// - [`FetchError::Network`] - Connection or TLS errors
/// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
/// - [`FetchError::ResponseTooLarge`] - Body exceeded 10MB
/// - [`FetchError::IncompleteResponse`] - Body shorter than Content-Length
/// - [`FetchError::Parse`] - Invalid RSS/Atom XML
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<FeedDocument, FetchError> {
    let bytes = tokio::time::timeout(timeout, fetch_bytes(client, url))
        .await
        .map_err(|_| FetchError::Timeout)??;

    let doc = parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

    if doc.skipped > 0 {
        tracing::debug!(
            feed = %url,
            skipped = doc.skipped,
            "Entries without an enclosure ignored"
        );
    }

    Ok(doc)
}

async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        tracing::warn!(feed = %url, status = %response.status(), "Feed request failed");
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    read_limited_bytes(response, MAX_FEED_SIZE).await
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test Cast</title>
    <language>en</language>
    <item>
        <guid>1</guid>
        <title>Test</title>
        <enclosure url="https://cdn.example.com/1.mp3" type="audio/mpeg"/>
    </item>
</channel></rss>"#;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let doc = fetch_feed(&client, &format!("{}/feed", mock_server.uri()), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(doc.title, "Test Cast");
        assert_eq!(doc.language, "en");
        assert_eq!(doc.items.len(), 1);
        assert_eq!(doc.items[0].enclosure_url, "https://cdn.example.com/1.mp3");
    }

    #[tokio::test]
    async fn test_fetch_404_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let result = fetch_feed(&client, &format!("{}/feed", mock_server.uri()), TIMEOUT).await;

        match result.unwrap_err() {
            FetchError::HttpStatus(404) => {}
            e => panic!("Expected HttpStatus(404), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let result = fetch_feed(&client, &format!("{}/feed", mock_server.uri()), TIMEOUT).await;

        match result.unwrap_err() {
            FetchError::HttpStatus(500) => {}
            e => panic!("Expected HttpStatus(500), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_malformed_feed_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let result = fetch_feed(&client, &format!("{}/feed", mock_server.uri()), TIMEOUT).await;

        match result.unwrap_err() {
            FetchError::Parse(_) => {}
            e => panic!("Expected Parse error, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let result = fetch_feed(
            &client,
            &format!("{}/feed", mock_server.uri()),
            Duration::from_millis(100),
        )
        .await;

        match result.unwrap_err() {
            FetchError::Timeout => {}
            e => panic!("Expected Timeout, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_empty_feed_success() {
        let empty_rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel></channel></rss>"#;

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(empty_rss))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let doc = fetch_feed(&client, &format!("{}/feed", mock_server.uri()), TIMEOUT)
            .await
            .unwrap();
        assert!(doc.items.is_empty());
    }
}
