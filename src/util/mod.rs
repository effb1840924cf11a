//! Utility functions for common operations.
//!
//! - **URL validation**: Security-focused validation to prevent SSRF attacks
//! - **Path naming**: Safe directory and file names for downloaded media
//!
//! # Examples
//!
//! ```
//! use podsync::util::{episode_file_name, validate_url};
//!
//! let url = validate_url("https://example.com/feed.xml").unwrap();
//! assert_eq!(url.host_str(), Some("example.com"));
//!
//! let name = episode_file_name(7, "https://cdn.example.com/shows/ep1.mp3?x=1");
//! assert_eq!(name, "7_ep1.mp3");
//! ```

mod paths;
mod url_validator;

pub use paths::{episode_file_name, sanitize_path_component};
pub(crate) use url_validator::parse_http_url;
pub use url_validator::{validate_url, UrlValidationError};
