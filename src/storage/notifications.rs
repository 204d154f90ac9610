use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, NotificationRecord, StoredNotification};

impl Database {
    // ========================================================================
    // Dedup Record Operations
    // ========================================================================

    /// Look up the stored value for a notification key.
    ///
    /// # Returns
    ///
    /// `Some(sent)` if a record exists, `None` if the key was never written.
    pub async fn get_notification(&self, key: &str) -> Result<Option<bool>, DatabaseError> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT sent FROM notifications WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(sent,)| sent))
    }

    /// True if this key has been recorded as sent.
    ///
    /// A missing key is `Ok(false)`; any other failure is an error the
    /// caller must not treat as "not sent".
    pub async fn is_notified(&self, key: &str) -> Result<bool, DatabaseError> {
        Ok(self.get_notification(key).await?.unwrap_or(false))
    }

    /// Record a single notification as sent (UPSERT).
    pub async fn mark_notified(&self, record: &NotificationRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (key, email, link, keyword, sent)
            VALUES (?, ?, ?, ?, 1)
            ON CONFLICT(key) DO UPDATE SET sent = 1
        "#,
        )
        .bind(&record.key)
        .bind(&record.email)
        .bind(&record.link)
        .bind(&record.keyword)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record many notifications as sent in one transaction.
    ///
    /// Either every record is written or none is. Returns the number of rows
    /// inserted or updated.
    pub async fn mark_notified_batch(
        &self,
        records: &[NotificationRecord],
    ) -> Result<usize, DatabaseError> {
        if records.is_empty() {
            return Ok(0);
        }

        // Four bound parameters per row keeps each chunk well under SQLite's limit
        const BATCH_SIZE: usize = 100;
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for chunk in records.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("INSERT INTO notifications (key, email, link, keyword, sent) ");

            builder.push_values(chunk, |mut b, record| {
                b.push_bind(&record.key)
                    .push_bind(&record.email)
                    .push_bind(&record.link)
                    .push_bind(&record.keyword)
                    .push_bind(true);
            });

            builder.push(" ON CONFLICT(key) DO UPDATE SET sent = 1");

            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(written as usize)
    }

    /// Total number of stored notification records.
    pub async fn count_notifications(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// All records for one subscriber, most recent first.
    pub async fn notifications_for(
        &self,
        email: &str,
    ) -> Result<Vec<StoredNotification>, DatabaseError> {
        let rows = sqlx::query_as::<_, StoredNotification>(
            r#"
            SELECT key, email, link, keyword, sent, notified_at
            FROM notifications
            WHERE email = ?
            ORDER BY notified_at DESC, key
        "#,
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
