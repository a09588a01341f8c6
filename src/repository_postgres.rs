#[cfg(feature = "postgres")]
use async_trait::async_trait;
#[cfg(feature = "postgres")]
use tokio_postgres::Client;

#[cfg(feature = "postgres")]
use crate::repository::Repository;
#[cfg(feature = "postgres")]
use crate::types::{
    Batch, BatchId, BatchStatus, Category, CategoryName, DeliveryLogEntry, Notification,
    NotificationId, NotificationStatus, Preference, Recipient, UserId,
};

/// Postgres-backed repository.
///
/// Notifications are stored as a JSONB payload plus the columns the
/// scheduler filters on; the conditional `UPDATE ... WHERE status = $from`
/// provides the compare-and-set that makes `begin_attempt` safe across
/// processes. Query failures degrade to empty results, mirroring the
/// soft-failure posture of the in-memory repository.
#[cfg(feature = "postgres")]
pub struct PostgresRepository {
    client: Client,
}

#[cfg(feature = "postgres")]
impl PostgresRepository {
    pub async fn new(client: Client) -> Result<Self, tokio_postgres::Error> {
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS notifications (
                    id TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    category TEXT NOT NULL,
                    batch_id TEXT,
                    scheduled_at BIGINT NOT NULL,
                    sent_at BIGINT,
                    updated_at BIGINT NOT NULL,
                    payload JSONB NOT NULL
                );
                CREATE INDEX IF NOT EXISTS notifications_due
                    ON notifications (status, scheduled_at);
                CREATE INDEX IF NOT EXISTS notifications_category_sent
                    ON notifications (category, status, sent_at);
                CREATE TABLE IF NOT EXISTS notification_logs (
                    id BIGSERIAL PRIMARY KEY,
                    notification_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    message TEXT NOT NULL,
                    ts BIGINT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS recipients (
                    id TEXT PRIMARY KEY,
                    payload JSONB NOT NULL
                );
                CREATE TABLE IF NOT EXISTS categories (
                    name TEXT PRIMARY KEY,
                    payload JSONB NOT NULL
                );
                CREATE TABLE IF NOT EXISTS preferences (
                    user_id TEXT NOT NULL,
                    category TEXT NOT NULL,
                    payload JSONB NOT NULL,
                    PRIMARY KEY (user_id, category)
                );
                CREATE TABLE IF NOT EXISTS batches (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL,
                    status TEXT NOT NULL,
                    total INT NOT NULL,
                    sent INT NOT NULL,
                    failed INT NOT NULL,
                    created_at BIGINT NOT NULL,
                    started_at BIGINT,
                    completed_at BIGINT
                );
                CREATE TABLE IF NOT EXISTS batch_counted (
                    notification_id TEXT PRIMARY KEY
                );",
            )
            .await?;

        Ok(Self { client })
    }

    async fn write_notification(&self, notification: &Notification) {
        let payload = serde_json::to_value(notification).unwrap_or_default();
        let _ = self
            .client
            .execute(
                "INSERT INTO notifications
                     (id, status, category, batch_id, scheduled_at, sent_at, updated_at, payload)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (id) DO UPDATE SET
                     status = EXCLUDED.status,
                     category = EXCLUDED.category,
                     batch_id = EXCLUDED.batch_id,
                     scheduled_at = EXCLUDED.scheduled_at,
                     sent_at = EXCLUDED.sent_at,
                     updated_at = EXCLUDED.updated_at,
                     payload = EXCLUDED.payload",
                &[
                    &notification.id.0,
                    &notification.status.as_str(),
                    &notification.category.0,
                    &notification.batch.as_ref().map(|b| b.0.as_str()),
                    &(notification.scheduled_at as i64),
                    &notification.sent_at.map(|at| at as i64),
                    &(notification.updated_at as i64),
                    &payload,
                ],
            )
            .await;
    }

    fn notifications_from_rows(rows: Vec<tokio_postgres::Row>) -> Vec<Notification> {
        rows.into_iter()
            .filter_map(|row| row.try_get::<_, serde_json::Value>("payload").ok())
            .filter_map(|value| serde_json::from_value::<Notification>(value).ok())
            .collect()
    }

    fn batch_from_row(row: &tokio_postgres::Row) -> Option<Batch> {
        let status = match row.try_get::<_, String>("status").ok()?.as_str() {
            "pending" => BatchStatus::Pending,
            "processing" => BatchStatus::Processing,
            "completed" => BatchStatus::Completed,
            "failed" => BatchStatus::Failed,
            _ => return None,
        };
        Some(Batch {
            id: BatchId(row.try_get("id").ok()?),
            name: row.try_get("name").ok()?,
            description: row.try_get("description").ok()?,
            status,
            total: row.try_get::<_, i32>("total").ok()? as u32,
            sent: row.try_get::<_, i32>("sent").ok()? as u32,
            failed: row.try_get::<_, i32>("failed").ok()? as u32,
            created_at: row.try_get::<_, i64>("created_at").ok()? as u64,
            started_at: row.try_get::<_, Option<i64>>("started_at").ok()?.map(|at| at as u64),
            completed_at: row
                .try_get::<_, Option<i64>>("completed_at")
                .ok()?
                .map(|at| at as u64),
        })
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl Repository for PostgresRepository {
    async fn insert_notification(&self, notification: &Notification) {
        self.write_notification(notification).await;
    }

    async fn notification(&self, id: &NotificationId) -> Option<Notification> {
        let row = self
            .client
            .query_opt("SELECT payload FROM notifications WHERE id = $1", &[&id.0])
            .await
            .ok()??;
        let value = row.try_get::<_, serde_json::Value>("payload").ok()?;
        serde_json::from_value(value).ok()
    }

    async fn update_if_unchanged(
        &self,
        notification: &Notification,
        expected: &Notification,
    ) -> bool {
        let payload = serde_json::to_value(notification).unwrap_or_default();
        let rows = self
            .client
            .execute(
                "UPDATE notifications SET
                     status = $2,
                     batch_id = $3,
                     scheduled_at = $4,
                     sent_at = $5,
                     updated_at = $6,
                     payload = $7
                 WHERE id = $1 AND status = $8 AND updated_at = $9",
                &[
                    &notification.id.0,
                    &notification.status.as_str(),
                    &notification.batch.as_ref().map(|b| b.0.as_str()),
                    &(notification.scheduled_at as i64),
                    &notification.sent_at.map(|at| at as i64),
                    &(notification.updated_at as i64),
                    &payload,
                    &expected.status.as_str(),
                    &(expected.updated_at as i64),
                ],
            )
            .await
            .unwrap_or(0);
        rows == 1
    }

    async fn transition(
        &self,
        id: &NotificationId,
        from: NotificationStatus,
        to: NotificationStatus,
        now: u64,
    ) -> Option<Notification> {
        let row = self
            .client
            .query_opt(
                "UPDATE notifications
                 SET status = $3, updated_at = $4
                 WHERE id = $1 AND status = $2
                 RETURNING payload",
                &[&id.0, &from.as_str(), &to.as_str(), &(now as i64)],
            )
            .await
            .ok()??;

        let value = row.try_get::<_, serde_json::Value>("payload").ok()?;
        let mut notification = serde_json::from_value::<Notification>(value).ok()?;
        // This caller won the compare-and-set; bring the payload in line
        // with the columns before handing it back.
        notification.status = to;
        notification.updated_at = now;
        self.write_notification(&notification).await;
        Some(notification)
    }

    async fn due_notifications(&self, now: u64, limit: usize) -> Vec<Notification> {
        let rows = self
            .client
            .query(
                "SELECT payload FROM notifications
                 WHERE status = 'pending' AND scheduled_at <= $1
                 ORDER BY scheduled_at
                 LIMIT $2",
                &[&(now as i64), &(limit as i64)],
            )
            .await
            .unwrap_or_default();
        Self::notifications_from_rows(rows)
    }

    async fn stale_processing(&self, cutoff: u64) -> Vec<Notification> {
        let rows = self
            .client
            .query(
                "SELECT payload FROM notifications
                 WHERE status = 'processing' AND updated_at <= $1",
                &[&(cutoff as i64)],
            )
            .await
            .unwrap_or_default();
        Self::notifications_from_rows(rows)
    }

    async fn batch_members(
        &self,
        batch: &BatchId,
        status: NotificationStatus,
    ) -> Vec<Notification> {
        let rows = self
            .client
            .query(
                "SELECT payload FROM notifications
                 WHERE batch_id = $1 AND status = $2",
                &[&batch.0, &status.as_str()],
            )
            .await
            .unwrap_or_default();
        Self::notifications_from_rows(rows)
    }

    async fn sent_count_since(&self, category: &CategoryName, since: u64) -> u64 {
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*) FROM notifications
                 WHERE category = $1 AND status = 'sent' AND sent_at >= $2",
                &[&category.0, &(since as i64)],
            )
            .await;
        match row {
            Ok(row) => row.try_get::<_, i64>(0).unwrap_or(0) as u64,
            Err(_) => 0,
        }
    }

    async fn append_log(&self, entry: &DeliveryLogEntry) {
        let _ = self
            .client
            .execute(
                "INSERT INTO notification_logs (notification_id, status, message, ts)
                 VALUES ($1, $2, $3, $4)",
                &[
                    &entry.notification.0,
                    &entry.status,
                    &entry.message,
                    &(entry.timestamp as i64),
                ],
            )
            .await;
    }

    async fn logs(&self, id: &NotificationId) -> Vec<DeliveryLogEntry> {
        let rows = self
            .client
            .query(
                "SELECT status, message, ts FROM notification_logs
                 WHERE notification_id = $1
                 ORDER BY id",
                &[&id.0],
            )
            .await
            .unwrap_or_default();

        rows.into_iter()
            .filter_map(|row| {
                Some(DeliveryLogEntry {
                    notification: id.clone(),
                    status: row.try_get("status").ok()?,
                    message: row.try_get("message").ok()?,
                    timestamp: row.try_get::<_, i64>("ts").ok()? as u64,
                })
            })
            .collect()
    }

    async fn upsert_recipient(&self, recipient: &Recipient) {
        let payload = serde_json::to_value(recipient).unwrap_or_default();
        let _ = self
            .client
            .execute(
                "INSERT INTO recipients (id, payload) VALUES ($1, $2)
                 ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload",
                &[&recipient.id.0, &payload],
            )
            .await;
    }

    async fn recipient(&self, id: &UserId) -> Option<Recipient> {
        let row = self
            .client
            .query_opt("SELECT payload FROM recipients WHERE id = $1", &[&id.0])
            .await
            .ok()??;
        let value = row.try_get::<_, serde_json::Value>("payload").ok()?;
        serde_json::from_value(value).ok()
    }

    async fn upsert_category(&self, category: &Category) {
        let payload = serde_json::to_value(category).unwrap_or_default();
        let _ = self
            .client
            .execute(
                "INSERT INTO categories (name, payload) VALUES ($1, $2)
                 ON CONFLICT (name) DO UPDATE SET payload = EXCLUDED.payload",
                &[&category.name.0, &payload],
            )
            .await;
    }

    async fn category(&self, name: &CategoryName) -> Option<Category> {
        let row = self
            .client
            .query_opt("SELECT payload FROM categories WHERE name = $1", &[&name.0])
            .await
            .ok()??;
        let value = row.try_get::<_, serde_json::Value>("payload").ok()?;
        serde_json::from_value(value).ok()
    }

    async fn upsert_preference(&self, preference: &Preference) {
        let payload = serde_json::to_value(preference).unwrap_or_default();
        let _ = self
            .client
            .execute(
                "INSERT INTO preferences (user_id, category, payload) VALUES ($1, $2, $3)
                 ON CONFLICT (user_id, category) DO UPDATE SET payload = EXCLUDED.payload",
                &[&preference.user.0, &preference.category.0, &payload],
            )
            .await;
    }

    async fn preference(&self, user: &UserId, category: &CategoryName) -> Option<Preference> {
        let row = self
            .client
            .query_opt(
                "SELECT payload FROM preferences WHERE user_id = $1 AND category = $2",
                &[&user.0, &category.0],
            )
            .await
            .ok()??;
        let value = row.try_get::<_, serde_json::Value>("payload").ok()?;
        serde_json::from_value(value).ok()
    }

    async fn insert_batch(&self, batch: &Batch) {
        let _ = self
            .client
            .execute(
                "INSERT INTO batches
                     (id, name, description, status, total, sent, failed,
                      created_at, started_at, completed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &batch.id.0,
                    &batch.name,
                    &batch.description,
                    &batch.status.as_str(),
                    &(batch.total as i32),
                    &(batch.sent as i32),
                    &(batch.failed as i32),
                    &(batch.created_at as i64),
                    &batch.started_at.map(|at| at as i64),
                    &batch.completed_at.map(|at| at as i64),
                ],
            )
            .await;
    }

    async fn batch(&self, id: &BatchId) -> Option<Batch> {
        let row = self
            .client
            .query_opt("SELECT * FROM batches WHERE id = $1", &[&id.0])
            .await
            .ok()??;
        Self::batch_from_row(&row)
    }

    async fn set_batch_total(&self, id: &BatchId, total: u32) {
        let _ = self
            .client
            .execute(
                "UPDATE batches SET total = $2 WHERE id = $1",
                &[&id.0, &(total as i32)],
            )
            .await;
    }

    async fn transition_batch(
        &self,
        id: &BatchId,
        from: BatchStatus,
        to: BatchStatus,
        now: u64,
    ) -> Option<Batch> {
        let stamp_column = match to {
            BatchStatus::Processing => "started_at",
            BatchStatus::Completed | BatchStatus::Failed => "completed_at",
            // Nothing transitions a batch back to pending today; keep the
            // CAS shape anyway and leave the timestamps alone.
            BatchStatus::Pending => "started_at",
        };
        let sql = format!(
            "UPDATE batches SET status = $3, {} = $4
             WHERE id = $1 AND status = $2 RETURNING *",
            stamp_column
        );

        let row = self
            .client
            .query_opt(
                sql.as_str(),
                &[&id.0, &from.as_str(), &to.as_str(), &(now as i64)],
            )
            .await
            .ok()??;
        Self::batch_from_row(&row)
    }

    async fn add_batch_counts(&self, id: &BatchId, sent: u32, failed: u32) {
        let _ = self
            .client
            .execute(
                "UPDATE batches SET sent = sent + $2, failed = failed + $3 WHERE id = $1",
                &[&id.0, &(sent as i32), &(failed as i32)],
            )
            .await;
    }

    async fn mark_counted(&self, id: &NotificationId) -> bool {
        let inserted = self
            .client
            .execute(
                "INSERT INTO batch_counted (notification_id) VALUES ($1)
                 ON CONFLICT (notification_id) DO NOTHING",
                &[&id.0],
            )
            .await
            .unwrap_or(0);
        inserted == 1
    }
}
