//! OPML import into the subscription catalog.

use std::path::Path;

use thiserror::Error;

use crate::feed::{opml, OpmlError};
use crate::storage::{Database, DatabaseError, OwnerId, UpsertSummary};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("OPML import failed: {0}")]
    Opml(#[from] OpmlError),

    #[error("Failed to store subscriptions: {0}")]
    Database(#[from] DatabaseError),
}

/// Read the OPML file at `path` and upsert its subscriptions for `owner`.
///
/// Outlines already known by name keep their id and have their addresses
/// refreshed. Nothing is written when the file cannot be parsed.
pub async fn import_subscriptions(
    db: &Database,
    owner: OwnerId,
    path: &Path,
) -> Result<UpsertSummary, ImportError> {
    let subscriptions = opml::parse(path).await?;

    if subscriptions.is_empty() {
        tracing::warn!(path = %path.display(), "OPML file contains no usable subscriptions");
        return Ok(UpsertSummary::default());
    }

    let summary = db.upsert_subscriptions(owner, &subscriptions).await?;
    tracing::info!(
        path = %path.display(),
        inserted = summary.inserted,
        updated = summary.updated,
        "Imported subscriptions"
    );
    Ok(summary)
}
