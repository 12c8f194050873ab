use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info};
use sqlx::{
    Row, Sqlite,
    migrate::MigrateDatabase,
    sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow},
};
use std::time::Duration;

use crate::error::{PollError, PollResult};
use crate::models::{Nomination, Poll, ResultEntry};

/// Partial-document persistence for polls.
///
/// Every method addresses a single poll and fails with [`PollError::NotFound`] once the
/// poll is missing or past its deadline. Each mutation writes exactly one field-path and
/// returns a fresh snapshot read after the write. Concurrent writes to the same path are
/// last-write-wins; writes to different paths never interfere.
#[async_trait]
pub trait PollStore: Send + Sync {
    /// Writes the initial document with `admin` as its only participant.
    async fn create_poll(
        &self,
        poll_id: &str,
        admin: (&str, &str),
        topic: &str,
        votes_per_voter: u32,
    ) -> PollResult<Poll>;
    async fn get_poll(&self, poll_id: &str) -> PollResult<Poll>;
    async fn set_participant(&self, poll_id: &str, user_id: &str, name: &str) -> PollResult<Poll>;
    async fn remove_participant(&self, poll_id: &str, user_id: &str) -> PollResult<Poll>;
    async fn set_nomination(
        &self,
        poll_id: &str,
        nomination_id: &str,
        nomination: &Nomination,
    ) -> PollResult<Poll>;
    async fn remove_nomination(&self, poll_id: &str, nomination_id: &str) -> PollResult<Poll>;
    async fn mark_started(&self, poll_id: &str) -> PollResult<Poll>;
    async fn set_ranking(
        &self,
        poll_id: &str,
        user_id: &str,
        ranking: &[String],
    ) -> PollResult<Poll>;
    async fn set_results(&self, poll_id: &str, results: &[ResultEntry]) -> PollResult<Poll>;
    async fn delete(&self, poll_id: &str) -> PollResult<()>;
    /// Hard-deletes every document whose deadline has passed. Returns how many went away.
    async fn purge_expired(&self) -> PollResult<u64>;
}

pub struct Database {
    pool: SqlitePool,
    ttl: chrono::Duration,
}

impl Database {
    pub async fn new(db_url: &str, ttl: Duration) -> PollResult<Self> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?;

        Self::with_pool(pool, ttl).await
    }

    /// Private in-memory database. A single connection is kept alive for the pool's
    /// whole life since the data disappears with it.
    pub async fn in_memory(ttl: Duration) -> PollResult<Self> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::with_pool(pool, ttl).await
    }

    async fn with_pool(pool: SqlitePool, ttl: Duration) -> PollResult<Self> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| PollError::StorageFailure(format!("poll ttl out of range: {}", e)))?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool, ttl })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(pool: &SqlitePool) -> PollResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                votes_per_voter INTEGER NOT NULL,
                admin_id TEXT NOT NULL,
                has_started BOOLEAN NOT NULL DEFAULT FALSE,
                results TEXT NOT NULL DEFAULT '[]',
                expires_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS participants (
                poll_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                PRIMARY KEY (poll_id, user_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nominations (
                poll_id TEXT NOT NULL,
                nomination_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                text TEXT NOT NULL,
                PRIMARY KEY (poll_id, nomination_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rankings (
                poll_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                ranking TEXT NOT NULL,
                PRIMARY KEY (poll_id, user_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    // Reads the whole document inside one transaction so the snapshot is consistent
    async fn fetch_snapshot(conn: &mut SqliteConnection, poll_id: &str) -> PollResult<Poll> {
        let poll_row = sqlx::query(
            r#"
            SELECT id, topic, votes_per_voter, admin_id, has_started, results
            FROM polls
            WHERE id = ? AND expires_at > ?
            "#,
        )
        .bind(poll_id)
        .bind(now_millis())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| PollError::NotFound(poll_id.to_string()))?;

        let mut poll = poll_from_row(&poll_row)?;

        let participants = sqlx::query("SELECT user_id, name FROM participants WHERE poll_id = ?")
            .bind(poll_id)
            .fetch_all(&mut *conn)
            .await?;
        for row in participants {
            poll.participants.insert(row.try_get("user_id")?, row.try_get("name")?);
        }

        let nominations =
            sqlx::query("SELECT nomination_id, user_id, text FROM nominations WHERE poll_id = ?")
                .bind(poll_id)
                .fetch_all(&mut *conn)
                .await?;
        for row in nominations {
            poll.nominations.insert(
                row.try_get("nomination_id")?,
                Nomination {
                    user_id: row.try_get("user_id")?,
                    text: row.try_get("text")?,
                },
            );
        }

        let rankings = sqlx::query("SELECT user_id, ranking FROM rankings WHERE poll_id = ?")
            .bind(poll_id)
            .fetch_all(&mut *conn)
            .await?;
        for row in rankings {
            let ranking: Vec<String> = serde_json::from_str(&row.try_get::<String, _>("ranking")?)?;
            poll.rankings.insert(row.try_get("user_id")?, ranking);
        }

        Ok(poll)
    }

    async fn snapshot(&self, poll_id: &str) -> PollResult<Poll> {
        let mut tx = self.pool.begin().await?;
        let poll = Self::fetch_snapshot(&mut *tx, poll_id).await?;
        tx.commit().await?;
        Ok(poll)
    }
}

#[async_trait]
impl PollStore for Database {
    async fn create_poll(
        &self,
        poll_id: &str,
        admin: (&str, &str),
        topic: &str,
        votes_per_voter: u32,
    ) -> PollResult<Poll> {
        let (admin_id, admin_name) = admin;
        let now = now_millis();
        let expires_at = now + self.ttl.num_milliseconds();

        info!(
            "Creating poll {} ({:?}) for admin {} expiring at {}",
            poll_id, topic, admin_id, expires_at
        );

        let mut tx = self.pool.begin().await?;

        // An expired document with the same id is dead already
        sqlx::query("DELETE FROM polls WHERE id = ? AND expires_at <= ?")
            .bind(poll_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO polls
                (id, topic, votes_per_voter, admin_id, has_started, results, expires_at)
            VALUES (?, ?, ?, ?, FALSE, '[]', ?)
            "#,
        )
        .bind(poll_id)
        .bind(topic)
        .bind(i64::from(votes_per_voter))
        .bind(admin_id)
        .bind(expires_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(PollError::Conflict(poll_id.to_string()));
            }
            Err(e) => {
                error!("Failed to create poll {}: {}", poll_id, e);
                return Err(e.into());
            }
        }

        sqlx::query("INSERT INTO participants (poll_id, user_id, name) VALUES (?, ?, ?)")
            .bind(poll_id)
            .bind(admin_id)
            .bind(admin_name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Poll::new(
            poll_id.to_string(),
            topic.to_string(),
            votes_per_voter,
            admin_id.to_string(),
            admin_name.to_string(),
        ))
    }

    async fn get_poll(&self, poll_id: &str) -> PollResult<Poll> {
        debug!("Fetching poll {}", poll_id);
        self.snapshot(poll_id).await
    }

    async fn set_participant(&self, poll_id: &str, user_id: &str, name: &str) -> PollResult<Poll> {
        info!("Setting participant {}/{} on poll {}", user_id, name, poll_id);

        let result = sqlx::query(
            r#"
            INSERT INTO participants (poll_id, user_id, name)
            SELECT id, ?, ? FROM polls WHERE id = ? AND expires_at > ?
            ON CONFLICT(poll_id, user_id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(poll_id)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_fault("set participant", poll_id, e))?;

        ensure_live(result.rows_affected(), poll_id)?;
        self.snapshot(poll_id).await
    }

    async fn remove_participant(&self, poll_id: &str, user_id: &str) -> PollResult<Poll> {
        info!("Removing participant {} from poll {}", user_id, poll_id);

        sqlx::query(
            r#"
            DELETE FROM participants
            WHERE poll_id = ? AND user_id = ?
              AND EXISTS (SELECT 1 FROM polls WHERE id = ? AND expires_at > ?)
            "#,
        )
        .bind(poll_id)
        .bind(user_id)
        .bind(poll_id)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_fault("remove participant", poll_id, e))?;

        self.snapshot(poll_id).await
    }

    async fn set_nomination(
        &self,
        poll_id: &str,
        nomination_id: &str,
        nomination: &Nomination,
    ) -> PollResult<Poll> {
        info!("Setting nomination {} ({:?}) on poll {}", nomination_id, nomination.text, poll_id);

        let result = sqlx::query(
            r#"
            INSERT INTO nominations (poll_id, nomination_id, user_id, text)
            SELECT id, ?, ?, ? FROM polls WHERE id = ? AND expires_at > ?
            ON CONFLICT(poll_id, nomination_id)
            DO UPDATE SET user_id = excluded.user_id, text = excluded.text
            "#,
        )
        .bind(nomination_id)
        .bind(&nomination.user_id)
        .bind(&nomination.text)
        .bind(poll_id)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_fault("set nomination", poll_id, e))?;

        ensure_live(result.rows_affected(), poll_id)?;
        self.snapshot(poll_id).await
    }

    async fn remove_nomination(&self, poll_id: &str, nomination_id: &str) -> PollResult<Poll> {
        info!("Removing nomination {} from poll {}", nomination_id, poll_id);

        sqlx::query(
            r#"
            DELETE FROM nominations
            WHERE poll_id = ? AND nomination_id = ?
              AND EXISTS (SELECT 1 FROM polls WHERE id = ? AND expires_at > ?)
            "#,
        )
        .bind(poll_id)
        .bind(nomination_id)
        .bind(poll_id)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_fault("remove nomination", poll_id, e))?;

        self.snapshot(poll_id).await
    }

    async fn mark_started(&self, poll_id: &str) -> PollResult<Poll> {
        info!("Marking poll {} as started", poll_id);

        let result =
            sqlx::query("UPDATE polls SET has_started = TRUE WHERE id = ? AND expires_at > ?")
                .bind(poll_id)
                .bind(now_millis())
                .execute(&self.pool)
                .await
                .map_err(|e| storage_fault("start", poll_id, e))?;

        ensure_live(result.rows_affected(), poll_id)?;
        self.snapshot(poll_id).await
    }

    async fn set_ranking(
        &self,
        poll_id: &str,
        user_id: &str,
        ranking: &[String],
    ) -> PollResult<Poll> {
        info!("Setting ranking for {} on poll {}: {:?}", user_id, poll_id, ranking);

        let encoded = serde_json::to_string(ranking)?;
        let result = sqlx::query(
            r#"
            INSERT INTO rankings (poll_id, user_id, ranking)
            SELECT id, ?, ? FROM polls WHERE id = ? AND expires_at > ?
            ON CONFLICT(poll_id, user_id) DO UPDATE SET ranking = excluded.ranking
            "#,
        )
        .bind(user_id)
        .bind(encoded)
        .bind(poll_id)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_fault("set ranking", poll_id, e))?;

        ensure_live(result.rows_affected(), poll_id)?;
        self.snapshot(poll_id).await
    }

    async fn set_results(&self, poll_id: &str, results: &[ResultEntry]) -> PollResult<Poll> {
        info!("Setting {} result entries on poll {}", results.len(), poll_id);

        let encoded = serde_json::to_string(results)?;
        let result = sqlx::query("UPDATE polls SET results = ? WHERE id = ? AND expires_at > ?")
            .bind(encoded)
            .bind(poll_id)
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| storage_fault("set results", poll_id, e))?;

        ensure_live(result.rows_affected(), poll_id)?;
        self.snapshot(poll_id).await
    }

    async fn delete(&self, poll_id: &str) -> PollResult<()> {
        info!("Deleting poll {}", poll_id);

        let result = sqlx::query("DELETE FROM polls WHERE id = ? AND expires_at > ?")
            .bind(poll_id)
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| storage_fault("delete", poll_id, e))?;

        ensure_live(result.rows_affected(), poll_id)
    }

    async fn purge_expired(&self) -> PollResult<u64> {
        let result = sqlx::query("DELETE FROM polls WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn ensure_live(rows_affected: u64, poll_id: &str) -> PollResult<()> {
    if rows_affected == 0 {
        return Err(PollError::NotFound(poll_id.to_string()));
    }
    Ok(())
}

fn storage_fault(action: &str, poll_id: &str, err: sqlx::Error) -> PollError {
    error!("Failed to {} on poll {}: {}", action, poll_id, err);
    PollError::from(err)
}

fn poll_from_row(row: &SqliteRow) -> PollResult<Poll> {
    let votes_per_voter = u32::try_from(row.try_get::<i64, _>("votes_per_voter")?)
        .map_err(|e| PollError::StorageFailure(format!("votes_per_voter out of range: {}", e)))?;
    let results: Vec<ResultEntry> = serde_json::from_str(&row.try_get::<String, _>("results")?)?;

    let mut poll = Poll::new(
        row.try_get("id")?,
        row.try_get("topic")?,
        votes_per_voter,
        row.try_get("admin_id")?,
        String::new(),
    );
    // Participants come from their own table, including the admin
    poll.participants.clear();
    poll.has_started = row.try_get("has_started")?;
    poll.results = results;
    Ok(poll)
}
