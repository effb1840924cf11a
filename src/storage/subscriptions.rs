use super::schema::Database;
use super::types::{DatabaseError, NewSubscription, OwnerId, Subscription, UpsertSummary};

impl Database {
    // ========================================================================
    // Owner Operations
    // ========================================================================

    /// Create the owner row if it does not exist yet.
    ///
    /// Credentials are placeholders; nothing in the catalog authenticates.
    pub async fn ensure_owner(&self, owner: OwnerId, username: &str) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT OR IGNORE INTO users (id, username, created_at) VALUES (?, ?, ?)")
            .bind(owner.0)
            .bind(username)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Insert new subscriptions and refresh the addresses of known ones.
    ///
    /// Subscriptions are matched on `(owner, name)`. An existing row keeps its
    /// id and name; only `xml_url`, `html_url` and `image_url` are replaced.
    ///
    /// Each subscription is written on its own. If item *k* fails the error is
    /// returned immediately and items before it stay committed.
    pub async fn upsert_subscriptions(
        &self,
        owner: OwnerId,
        subscriptions: &[NewSubscription],
    ) -> Result<UpsertSummary, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut summary = UpsertSummary::default();

        for sub in subscriptions {
            let existing: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM subscriptions WHERE owner_id = ? AND name = ?")
                    .bind(owner.0)
                    .bind(&sub.name)
                    .fetch_optional(&self.pool)
                    .await?;

            match existing {
                Some((id,)) => {
                    sqlx::query(
                        "UPDATE subscriptions SET xml_url = ?, html_url = ?, image_url = ? WHERE id = ?",
                    )
                    .bind(&sub.xml_url)
                    .bind(&sub.html_url)
                    .bind(&sub.image_url)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                    summary.updated += 1;
                }
                None => {
                    let (id,): (i64,) = sqlx::query_as(
                        r#"
                        INSERT INTO subscriptions (owner_id, name, xml_url, html_url, image_url, created_at)
                        VALUES (?, ?, ?, ?, ?, ?)
                        RETURNING id
                    "#,
                    )
                    .bind(owner.0)
                    .bind(&sub.name)
                    .bind(&sub.xml_url)
                    .bind(&sub.html_url)
                    .bind(&sub.image_url)
                    .bind(now)
                    .fetch_one(&self.pool)
                    .await?;
                    tracing::debug!(id, name = %sub.name, "Subscription added");
                    summary.inserted += 1;
                }
            }
        }

        Ok(summary)
    }

    /// All subscriptions belonging to `owner`, in no particular order
    pub async fn list_subscriptions(&self, owner: OwnerId) -> Result<Vec<Subscription>, DatabaseError> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, owner_id, name, xml_url, html_url, image_url,
                   title, description, language, last_polled_at, created_at
            FROM subscriptions
            WHERE owner_id = ?
        "#,
        )
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(subscriptions)
    }

    /// Overwrite the channel metadata reported by a subscription's feed.
    ///
    /// Episodes are untouched.
    pub async fn update_subscription_metadata(
        &self,
        subscription_id: i64,
        title: &str,
        description: &str,
        language: &str,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE subscriptions SET title = ?, description = ?, language = ? WHERE id = ?",
        )
        .bind(title)
        .bind(description)
        .bind(language)
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::SubscriptionNotFound(subscription_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, DatabaseError, NewSubscription, OwnerId};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        let db = Database::open(":memory:").await.unwrap();
        db.ensure_owner(OwnerId::DEFAULT, "default").await.unwrap();
        db
    }

    fn sub(name: &str, xml_url: &str) -> NewSubscription {
        NewSubscription {
            name: name.to_string(),
            xml_url: xml_url.to_string(),
            html_url: None,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_inserts_new_subscriptions() {
        let db = test_db().await;

        let summary = db
            .upsert_subscriptions(
                OwnerId::DEFAULT,
                &[
                    sub("Tech Talk", "https://tech.example.com/rss"),
                    sub("History Hour", "https://history.example.com/rss"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.updated, 0);

        let subs = db.list_subscriptions(OwnerId::DEFAULT).await.unwrap();
        assert_eq!(subs.len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_updates_addresses_in_place() {
        let db = test_db().await;
        db.upsert_subscriptions(OwnerId::DEFAULT, &[sub("Tech Talk", "https://old.example.com/rss")])
            .await
            .unwrap();
        let before = db.list_subscriptions(OwnerId::DEFAULT).await.unwrap();

        let updated = NewSubscription {
            name: "Tech Talk".to_string(),
            xml_url: "https://new.example.com/rss".to_string(),
            html_url: Some("https://new.example.com".to_string()),
            image_url: Some("https://new.example.com/cover.jpg".to_string()),
        };
        let summary = db
            .upsert_subscriptions(OwnerId::DEFAULT, &[updated])
            .await
            .unwrap();
        assert_eq!(summary.updated, 1);

        let after = db.list_subscriptions(OwnerId::DEFAULT).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, before[0].id);
        assert_eq!(after[0].name, "Tech Talk");
        assert_eq!(after[0].xml_url, "https://new.example.com/rss");
        assert_eq!(after[0].html_url.as_deref(), Some("https://new.example.com"));
        assert_eq!(
            after[0].image_url.as_deref(),
            Some("https://new.example.com/cover.jpg")
        );
    }

    #[tokio::test]
    async fn test_same_name_for_different_owners_is_distinct() {
        let db = test_db().await;
        let other = OwnerId(2);
        db.ensure_owner(other, "second").await.unwrap();

        db.upsert_subscriptions(OwnerId::DEFAULT, &[sub("Shared", "https://a.example.com/rss")])
            .await
            .unwrap();
        db.upsert_subscriptions(other, &[sub("Shared", "https://b.example.com/rss")])
            .await
            .unwrap();

        let mine = db.list_subscriptions(OwnerId::DEFAULT).await.unwrap();
        let theirs = db.list_subscriptions(other).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(theirs.len(), 1);
        assert_ne!(mine[0].id, theirs[0].id);
        assert_eq!(mine[0].xml_url, "https://a.example.com/rss");
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete() {
        let db = test_db().await;
        db.upsert_subscriptions(OwnerId::DEFAULT, &[sub("One", "https://one.example.com/rss")])
            .await
            .unwrap();
        let first = db.list_subscriptions(OwnerId::DEFAULT).await.unwrap()[0].id;

        sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(first)
            .execute(&db.pool)
            .await
            .unwrap();

        db.upsert_subscriptions(OwnerId::DEFAULT, &[sub("Two", "https://two.example.com/rss")])
            .await
            .unwrap();
        let second = db.list_subscriptions(OwnerId::DEFAULT).await.unwrap()[0].id;
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_upsert_with_unknown_owner_fails() {
        let db = test_db().await;
        let result = db
            .upsert_subscriptions(OwnerId(99), &[sub("Orphan", "https://x.example.com/rss")])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_update_metadata() {
        let db = test_db().await;
        db.upsert_subscriptions(OwnerId::DEFAULT, &[sub("Tech Talk", "https://tech.example.com/rss")])
            .await
            .unwrap();
        let id = db.list_subscriptions(OwnerId::DEFAULT).await.unwrap()[0].id;

        db.update_subscription_metadata(id, "Tech Talk Weekly", "All about tech", "en-us")
            .await
            .unwrap();

        let subs = db.list_subscriptions(OwnerId::DEFAULT).await.unwrap();
        assert_eq!(subs[0].title.as_deref(), Some("Tech Talk Weekly"));
        assert_eq!(subs[0].description.as_deref(), Some("All about tech"));
        assert_eq!(subs[0].language.as_deref(), Some("en-us"));
        assert_eq!(subs[0].name, "Tech Talk");
    }

    #[tokio::test]
    async fn test_update_metadata_unknown_subscription() {
        let db = test_db().await;
        let result = db.update_subscription_metadata(42, "t", "d", "en").await;
        assert!(matches!(result, Err(DatabaseError::SubscriptionNotFound(42))));
    }
}
