//! Podcast catcher: imports OPML subscription lists, polls feeds into a SQLite
//! catalog and downloads new episodes.
//!
//! - [`import`] - OPML import into the catalog
//! - [`poller`] - concurrent feed polling and episode reconciliation
//! - [`download`] - concurrent episode downloads
//! - [`storage`] - the SQLite catalog
//! - [`feed`] - feed retrieval and parsing

pub mod config;
pub mod download;
pub mod feed;
pub mod import;
pub mod poller;
pub mod storage;
pub mod util;
