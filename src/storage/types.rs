use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Catalog store errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the catalog locked
    #[error("The catalog database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// The database file could not be opened or created
    #[error("Cannot open the catalog database: {0}")]
    CannotOpen(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// No subscription with the given id exists
    #[error("Subscription {0} not found")]
    SubscriptionNotFound(i64),

    /// No episode with the given id exists
    #[error("Episode {0} not found")]
    EpisodeNotFound(i64),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return DatabaseError::InstanceLocked;
        }

        // SQLITE_CANTOPEN (14): missing directory, permissions, bad path
        if error_string.contains("unable to open database file")
            || error_string.contains("sqlite_cantopen")
        {
            return DatabaseError::CannotOpen(err.to_string());
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Owner of a catalog's subscriptions.
///
/// Only a single owner is supported today, but every store call takes the
/// owner explicitly so the foreign key is never implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(pub i64);

impl OwnerId {
    /// The owner used by the command-line front end.
    pub const DEFAULT: OwnerId = OwnerId(1);
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Input Types
// ============================================================================

/// A subscription candidate, as produced by an OPML import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub name: String,
    pub xml_url: String,
    pub html_url: Option<String>,
    pub image_url: Option<String>,
}

/// One feed item as seen by the reconciliation engine.
///
/// `key` identifies the logical episode slot across polls (RSS guid or Atom
/// id). `media_url` is the enclosure address currently advertised for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedEpisode {
    pub key: Option<String>,
    pub media_url: String,
    pub title: Option<String>,
    pub published: Option<String>,
}

impl FetchedEpisode {
    /// Convenience constructor for an item with a key and no metadata
    pub fn new(key: impl Into<String>, media_url: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            media_url: media_url.into(),
            title: None,
            published: None,
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Outcome of `upsert_subscriptions`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

// ============================================================================
// Data Structures
// ============================================================================

/// Subscription row from the catalog
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub xml_url: String,
    pub html_url: Option<String>,
    pub image_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub last_polled_at: Option<i64>,
    pub created_at: i64,
}

/// Current episode row.
///
/// `url` is unique per subscription. `downloaded` only ever moves from
/// false to true.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Episode {
    pub id: i64,
    pub subscription_id: i64,
    pub url: String,
    pub item_key: Option<String>,
    pub title: Option<String>,
    pub published: Option<String>,
    pub downloaded: bool,
    pub file_name: Option<String>,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

/// Snapshot of an episode's address taken when a feed replaced it
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArchivedEpisode {
    pub id: i64,
    pub original_episode_id: i64,
    pub subscription_id: i64,
    pub url: String,
    pub downloaded: bool,
    pub archived_at: i64,
}

/// Episode awaiting download, joined with its subscription name for path
/// construction
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingEpisode {
    pub id: i64,
    pub subscription_id: i64,
    pub subscription_name: String,
    pub url: String,
}
