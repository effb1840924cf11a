use std::collections::HashSet;

use super::schema::Database;
use super::types::{ArchivedEpisode, DatabaseError, Episode, FetchedEpisode, OwnerId, PendingEpisode};

impl Database {
    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Merge the items of a freshly fetched feed into the catalog.
    ///
    /// Items are processed in feed order:
    ///
    /// - an item whose media URL is already stored for the subscription is a
    ///   no-op;
    /// - an item whose key matches a stored episode with a different URL
    ///   supersedes it: the old URL and download state are copied into
    ///   `archived_episodes`, then the episode's URL is replaced. Its id and
    ///   download state are kept;
    /// - anything else is inserted as a new, not yet downloaded episode.
    ///
    /// A key only matches once per call, and a stored episode is touched by at
    /// most one item per call. When a malformed feed repeats a key with a
    /// different URL, or keys an episode another item already matched by URL,
    /// the later item becomes a new episode without a key, so every slot stays
    /// put on the next poll.
    ///
    /// The whole subscription is reconciled in one transaction; any failure
    /// rolls it back.
    ///
    /// # Returns
    ///
    /// The number of newly inserted episodes.
    pub async fn reconcile_episodes(
        &self,
        subscription_id: i64,
        fetched: &[FetchedEpisode],
    ) -> Result<usize, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        // Writing first takes SQLite's RESERVED lock before any read, so two
        // subscriptions reconciling at once queue on busy_timeout instead of
        // deadlocking on lock promotion.
        let touched = sqlx::query("UPDATE subscriptions SET last_polled_at = ? WHERE id = ?")
            .bind(now)
            .bind(subscription_id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(DatabaseError::SubscriptionNotFound(subscription_id));
        }

        let mut claimed_keys: HashSet<&str> = HashSet::new();
        // Episodes already matched by an earlier item of this fetch
        let mut matched_ids: HashSet<i64> = HashSet::new();
        let mut inserted = 0;

        for item in fetched {
            let known: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM episodes WHERE subscription_id = ? AND url = ?")
                    .bind(subscription_id)
                    .bind(&item.media_url)
                    .fetch_optional(&mut *tx)
                    .await?;

            if let Some((episode_id,)) = known {
                matched_ids.insert(episode_id);
                if let Some(key) = item.key.as_deref() {
                    claimed_keys.insert(key);
                }
                continue;
            }

            let mut key = item
                .key
                .as_deref()
                .filter(|k| !claimed_keys.contains(k));

            if let Some(item_key) = key {
                claimed_keys.insert(item_key);

                let slot: Option<(i64, String, bool)> = sqlx::query_as(
                    "SELECT id, url, downloaded FROM episodes WHERE subscription_id = ? AND item_key = ? LIMIT 1",
                )
                .bind(subscription_id)
                .bind(item_key)
                .fetch_optional(&mut *tx)
                .await?;

                match slot {
                    // Its current URL is in this fetch too; keep it
                    Some((episode_id, _, _)) if matched_ids.contains(&episode_id) => key = None,
                    Some((episode_id, old_url, downloaded)) => {
                        matched_ids.insert(episode_id);
                        sqlx::query(
                            r#"
                            INSERT INTO archived_episodes (original_episode_id, subscription_id, url, downloaded, archived_at)
                            VALUES (?, ?, ?, ?, ?)
                        "#,
                        )
                        .bind(episode_id)
                        .bind(subscription_id)
                        .bind(&old_url)
                        .bind(downloaded)
                        .bind(now)
                        .execute(&mut *tx)
                        .await?;

                        sqlx::query("UPDATE episodes SET url = ?, updated_at = ? WHERE id = ?")
                            .bind(&item.media_url)
                            .bind(now)
                            .bind(episode_id)
                            .execute(&mut *tx)
                            .await?;

                        tracing::info!(
                            subscription_id,
                            episode_id,
                            old_url = %old_url,
                            new_url = %item.media_url,
                            "Episode media URL changed, previous address archived"
                        );
                        continue;
                    }
                    None => {}
                }
            }

            sqlx::query(
                r#"
                INSERT INTO episodes (subscription_id, url, item_key, title, published, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
            "#,
            )
            .bind(subscription_id)
            .bind(&item.media_url)
            .bind(key)
            .bind(&item.title)
            .bind(&item.published)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }

        tx.commit().await?;

        Ok(inserted)
    }

    // ========================================================================
    // Download State
    // ========================================================================

    /// Record a completed download.
    ///
    /// Calling it again with the same arguments leaves the row as it was.
    /// There is no way back to "not downloaded".
    pub async fn mark_downloaded(&self, episode_id: i64, file_name: &str) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE episodes SET downloaded = 1, file_name = ?, updated_at = ? WHERE id = ?",
        )
        .bind(file_name)
        .bind(now)
        .bind(episode_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::EpisodeNotFound(episode_id));
        }

        tracing::debug!(episode_id, file_name = %file_name, "Episode marked as downloaded");
        Ok(())
    }

    /// Episodes of `owner` that have not been downloaded yet, across all
    /// subscriptions
    pub async fn list_pending_downloads(&self, owner: OwnerId) -> Result<Vec<PendingEpisode>, DatabaseError> {
        let episodes = sqlx::query_as::<_, PendingEpisode>(
            r#"
            SELECT e.id, e.subscription_id, s.name AS subscription_name, e.url
            FROM episodes e
            JOIN subscriptions s ON e.subscription_id = s.id
            WHERE e.downloaded = 0 AND s.owner_id = ?
            ORDER BY e.id
        "#,
        )
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(episodes)
    }

    // ========================================================================
    // Read Helpers
    // ========================================================================

    /// Current episodes of a subscription, oldest first
    pub async fn list_episodes(&self, subscription_id: i64) -> Result<Vec<Episode>, DatabaseError> {
        let episodes = sqlx::query_as::<_, Episode>(
            r#"
            SELECT id, subscription_id, url, item_key, title, published,
                   downloaded, file_name, created_at, updated_at
            FROM episodes
            WHERE subscription_id = ?
            ORDER BY id
        "#,
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(episodes)
    }

    /// Archived addresses of a subscription, in archival order
    pub async fn list_archived_episodes(
        &self,
        subscription_id: i64,
    ) -> Result<Vec<ArchivedEpisode>, DatabaseError> {
        let archived = sqlx::query_as::<_, ArchivedEpisode>(
            r#"
            SELECT id, original_episode_id, subscription_id, url, downloaded, archived_at
            FROM archived_episodes
            WHERE subscription_id = ?
            ORDER BY id
        "#,
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(archived)
    }
}
