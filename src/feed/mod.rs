//! Podcast feed retrieval and subscription-list parsing.
//!
//! - [`parser`] - RSS/Atom parsing into a [`FeedDocument`] using `feed-rs`
//! - [`fetcher`] - single-attempt HTTP retrieval with a bounded timeout
//! - [`opml`] - OPML subscription lists for import
//!
//! # Example
//!
//! ```ignore
//! use podsync::feed::{fetch_feed, opml};
//!
//! let subscriptions = opml::parse(Path::new("podcasts.opml")).await?;
//! let doc = fetch_feed(&client, &subscriptions[0].xml_url, Duration::from_secs(30)).await?;
//! ```

mod fetcher;
pub mod opml;
mod parser;

pub use fetcher::{fetch_feed, FetchError};
pub use opml::OpmlError;
pub use parser::{parse_feed, FeedDocument, FeedItem};
