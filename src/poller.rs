//! Polls every subscription's feed and reconciles its episodes.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::feed::{fetch_feed, FetchError};
use crate::storage::{Database, DatabaseError, OwnerId, Subscription};

/// Why a single subscription could not be polled
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    /// Feeds fetched at the same time
    pub concurrency: usize,
    /// Bound for one fetch, body included
    pub fetch_timeout: Duration,
}

/// Aggregate outcome of [`poll_all`].
///
/// `new_episodes` only counts subscriptions that reconciled successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Subscriptions never started because the run was cancelled
    pub skipped: usize,
    pub new_episodes: usize,
}

enum Outcome {
    Polled(usize),
    Failed,
    Skipped,
}

/// Fetch every subscription of `owner` and merge the results into the catalog.
///
/// Subscriptions are processed concurrently, at most `options.concurrency` at
/// a time. A subscription that fails to fetch or store is logged and counted;
/// the others are unaffected. Once `cancel` fires no new subscription is
/// started and in-flight fetches are abandoned.
///
/// # Errors
///
/// Only failing to list the subscriptions aborts the poll.
pub async fn poll_all(
    db: &Database,
    client: &reqwest::Client,
    owner: OwnerId,
    options: &PollOptions,
    cancel: &CancellationToken,
) -> Result<PollSummary, DatabaseError> {
    let subscriptions = db.list_subscriptions(owner).await?;
    if subscriptions.is_empty() {
        tracing::info!(owner = %owner, "No subscriptions to poll");
        return Ok(PollSummary::default());
    }

    tracing::info!(count = subscriptions.len(), "Polling subscriptions");

    let outcomes: Vec<Outcome> = stream::iter(subscriptions)
        .map(|sub| async move {
            if cancel.is_cancelled() {
                return Outcome::Skipped;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Outcome::Skipped,
                result = poll_subscription(db, client, &sub, options.fetch_timeout) => result,
            };

            match result {
                Ok(new) => {
                    tracing::info!(subscription = %sub.name, new_episodes = new, "Subscription polled");
                    Outcome::Polled(new)
                }
                Err(e) => {
                    tracing::warn!(
                        subscription = %sub.name,
                        url = %sub.xml_url,
                        error = %e,
                        "Failed to poll subscription"
                    );
                    Outcome::Failed
                }
            }
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    let mut summary = PollSummary::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Polled(new) => {
                summary.succeeded += 1;
                summary.new_episodes += new;
            }
            Outcome::Failed => summary.failed += 1,
            Outcome::Skipped => summary.skipped += 1,
        }
    }

    Ok(summary)
}

async fn poll_subscription(
    db: &Database,
    client: &reqwest::Client,
    sub: &Subscription,
    timeout: Duration,
) -> Result<usize, PollError> {
    let doc = fetch_feed(client, &sub.xml_url, timeout).await?;

    db.update_subscription_metadata(sub.id, &doc.title, &doc.description, &doc.language)
        .await?;
    let new = db.reconcile_episodes(sub.id, &doc.episodes()).await?;

    Ok(new)
}
