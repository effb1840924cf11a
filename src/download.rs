//! Downloads pending episodes into per-subscription directories.
//!
//! Layout: `<root>/<sanitized subscription name>/<episode id>_<basename>`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::storage::{Database, DatabaseError, OwnerId, PendingEpisode};
use crate::util::{episode_file_name, parse_http_url, sanitize_path_component, UrlValidationError};

/// Errors that abort a download run.
///
/// Failures of individual episodes are logged and counted instead.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Failed to create download directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read pending downloads: {0}")]
    Database(#[from] DatabaseError),
}

/// Why a single episode could not be downloaded
#[derive(Debug, Error)]
pub enum EpisodeError {
    #[error("Invalid media URL: {0}")]
    Url(#[from] UrlValidationError),

    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error: status {0}")]
    HttpStatus(u16),

    #[error("Download timed out")]
    Timeout,

    #[error("Failed to write file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Incomplete download: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: u64 },

    #[error("Failed to record download: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Directory holding one subdirectory per subscription
    pub root: PathBuf,
    /// Episodes downloaded at the same time
    pub max_downloads: usize,
    /// Bound for one episode, body included
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Episodes not attempted, or abandoned, because the run was cancelled
    pub cancelled: usize,
}

enum Outcome {
    Done,
    Failed,
    Cancelled,
}

/// Download every episode of `owner` that is not yet on disk.
///
/// All subscription directories are created before the first request. Each
/// episode is streamed straight to its destination file and marked as
/// downloaded once the body is complete. A failed episode stays pending and is
/// retried on the next run.
///
/// Cancelling `cancel` stops new downloads and aborts in-flight ones; partial
/// files are left where they are and overwritten by the next attempt.
///
/// # Errors
///
/// - [`DownloadError::Database`] - pending episodes could not be listed
/// - [`DownloadError::CreateDir`] - a subscription directory could not be created
pub async fn download_pending(
    db: &Database,
    client: &reqwest::Client,
    owner: OwnerId,
    options: &DownloadOptions,
    cancel: &CancellationToken,
) -> Result<DownloadSummary, DownloadError> {
    let pending = db.list_pending_downloads(owner).await?;

    let dirs: BTreeSet<PathBuf> = pending
        .iter()
        .map(|ep| subscription_dir(&options.root, &ep.subscription_name))
        .collect();
    for dir in &dirs {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| DownloadError::CreateDir {
                path: dir.clone(),
                source,
            })?;
    }

    tracing::info!(
        pending = pending.len(),
        root = %options.root.display(),
        "Starting downloads"
    );

    let outcomes: Vec<Outcome> = stream::iter(pending)
        .map(|ep| async move {
            if cancel.is_cancelled() {
                return Outcome::Cancelled;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(episode_id = ep.id, url = %ep.url, "Download cancelled");
                    return Outcome::Cancelled;
                }
                result = download_one(db, client, &ep, options) => result,
            };

            match result {
                Ok((path, bytes)) => {
                    tracing::info!(
                        episode_id = ep.id,
                        path = %path.display(),
                        bytes,
                        "Episode downloaded"
                    );
                    Outcome::Done
                }
                Err(e) => {
                    tracing::warn!(
                        episode_id = ep.id,
                        subscription = %ep.subscription_name,
                        url = %ep.url,
                        error = %e,
                        "Episode download failed"
                    );
                    Outcome::Failed
                }
            }
        })
        .buffer_unordered(options.max_downloads.max(1))
        .collect()
        .await;

    let mut summary = DownloadSummary::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Done => summary.succeeded += 1,
            Outcome::Failed => summary.failed += 1,
            Outcome::Cancelled => summary.cancelled += 1,
        }
    }

    let files = walk_download_tree(&options.root).await;
    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        files_on_disk = files,
        "Downloads finished"
    );

    Ok(summary)
}

fn subscription_dir(root: &Path, subscription_name: &str) -> PathBuf {
    root.join(sanitize_path_component(subscription_name))
}

async fn download_one(
    db: &Database,
    client: &reqwest::Client,
    ep: &PendingEpisode,
    options: &DownloadOptions,
) -> Result<(PathBuf, u64), EpisodeError> {
    let file_name = episode_file_name(ep.id, &ep.url);
    let path = subscription_dir(&options.root, &ep.subscription_name).join(&file_name);

    let bytes = tokio::time::timeout(options.timeout, fetch_to_file(client, &ep.url, &path))
        .await
        .map_err(|_| EpisodeError::Timeout)??;

    db.mark_downloaded(ep.id, &file_name).await?;
    Ok((path, bytes))
}

async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
) -> Result<u64, EpisodeError> {
    let url = parse_http_url(url)?;
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(EpisodeError::HttpStatus(response.status().as_u16()));
    }

    let expected_length = response.content_length();
    let mut file = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    if let Some(expected) = expected_length {
        if written < expected {
            return Err(EpisodeError::Incomplete {
                expected,
                received: written,
            });
        }
    }

    Ok(written)
}

/// Walk the download tree and count regular files.
///
/// Best effort: unreadable entries are logged and skipped.
async fn walk_download_tree(root: &Path) -> usize {
    let mut files = 0;
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Cannot read download directory");
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "Cannot list download directory");
                    break;
                }
            };

            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => stack.push(entry.path()),
                Ok(ft) if ft.is_file() => files += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Cannot stat download entry");
                }
            }
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FetchedEpisode, NewSubscription};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Catalog with one subscription whose episodes point at `server`
    async fn setup(server: &MockServer, name: &str, media_paths: &[&str]) -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        db.ensure_owner(OwnerId::DEFAULT, "default").await.unwrap();
        db.upsert_subscriptions(
            OwnerId::DEFAULT,
            &[NewSubscription {
                name: name.to_string(),
                xml_url: "https://feeds.example.com/show.xml".to_string(),
                html_url: None,
                image_url: None,
            }],
        )
        .await
        .unwrap();
        let sub_id = db.list_subscriptions(OwnerId::DEFAULT).await.unwrap()[0].id;

        let episodes: Vec<_> = media_paths
            .iter()
            .map(|p| FetchedEpisode::new(*p, format!("{}{}", server.uri(), p)))
            .collect();
        db.reconcile_episodes(sub_id, &episodes).await.unwrap();
        (db, sub_id)
    }

    fn options(root: &Path) -> DownloadOptions {
        DownloadOptions {
            root: root.to_path_buf(),
            max_downloads: 4,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_download_writes_files_and_marks_episodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ep1.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"audio-one".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ep2.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"audio-two".to_vec()))
            .mount(&server)
            .await;
        let (db, sub_id) = setup(&server, "Tech Talk", &["/ep1.mp3", "/ep2.mp3"]).await;
        let root = tempfile::tempdir().unwrap();

        let summary = download_pending(
            &db,
            &reqwest::Client::new(),
            OwnerId::DEFAULT,
            &options(root.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary, DownloadSummary { succeeded: 2, failed: 0, cancelled: 0 });

        for ep in db.list_episodes(sub_id).await.unwrap() {
            assert!(ep.downloaded);
            let file_name = ep.file_name.unwrap();
            assert_eq!(file_name, episode_file_name(ep.id, &ep.url));
            let on_disk = root.path().join("Tech Talk").join(&file_name);
            assert!(on_disk.is_file(), "{} missing", on_disk.display());
        }
        assert!(db.list_pending_downloads(OwnerId::DEFAULT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_episode_stays_pending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.mp3"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let (db, _) = setup(&server, "Show", &["/ok.mp3", "/missing.mp3"]).await;
        let root = tempfile::tempdir().unwrap();

        let summary = download_pending(
            &db,
            &reqwest::Client::new(),
            OwnerId::DEFAULT,
            &options(root.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary, DownloadSummary { succeeded: 1, failed: 1, cancelled: 0 });

        let pending = db.list_pending_downloads(OwnerId::DEFAULT).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].url.ends_with("/missing.mp3"));
    }

    #[tokio::test]
    async fn test_slow_download_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;
        let (db, _) = setup(&server, "Show", &["/slow.mp3"]).await;
        let root = tempfile::tempdir().unwrap();
        let opts = DownloadOptions {
            timeout: Duration::from_millis(200),
            ..options(root.path())
        };

        let summary = download_pending(
            &db,
            &reqwest::Client::new(),
            OwnerId::DEFAULT,
            &opts,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(db.list_pending_downloads(OwnerId::DEFAULT).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_name_is_sanitized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .mount(&server)
            .await;
        let (db, _) = setup(&server, "../AC/DC", &["/ep.mp3"]).await;
        let root = tempfile::tempdir().unwrap();

        download_pending(
            &db,
            &reqwest::Client::new(),
            OwnerId::DEFAULT,
            &options(root.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(root.path().join(".._AC_DC").is_dir());
    }

    #[tokio::test]
    async fn test_uncreatable_directory_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let (db, _) = setup(&server, "Show", &["/ep.mp3"]).await;
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let err = download_pending(
            &db,
            &reqwest::Client::new(),
            OwnerId::DEFAULT,
            &options(&blocker),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DownloadError::CreateDir { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_run_downloads_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let (db, _) = setup(&server, "Show", &["/a.mp3", "/b.mp3"]).await;
        let root = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = download_pending(
            &db,
            &reqwest::Client::new(),
            OwnerId::DEFAULT,
            &options(root.path()),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(summary, DownloadSummary { succeeded: 0, failed: 0, cancelled: 2 });
    }

    #[tokio::test]
    async fn test_nothing_pending() {
        let server = MockServer::start().await;
        let (db, _) = setup(&server, "Show", &[]).await;
        let root = tempfile::tempdir().unwrap();

        let summary = download_pending(
            &db,
            &reqwest::Client::new(),
            OwnerId::DEFAULT,
            &options(root.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary, DownloadSummary::default());
    }

    #[tokio::test]
    async fn test_walk_counts_nested_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("a/b")).unwrap();
        std::fs::write(root.path().join("a/1.mp3"), b"1").unwrap();
        std::fs::write(root.path().join("a/b/2.mp3"), b"2").unwrap();
        std::fs::write(root.path().join("3.mp3"), b"3").unwrap();

        assert_eq!(walk_download_tree(root.path()).await, 3);
        assert_eq!(walk_download_tree(&root.path().join("missing")).await, 0);
    }
}
