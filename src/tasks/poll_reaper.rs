use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::db::PollStore;

/// Periodically hard-deletes polls past their deadline. Reads and writes already
/// treat those polls as gone; this only reclaims their rows.
pub async fn reap_expired_polls_task(store: Arc<dyn PollStore>, every: Duration) {
    info!("Starting background task to purge expired polls every {:?}", every);
    let mut interval = interval(every);

    loop {
        interval.tick().await;
        reap_once(store.as_ref()).await;
    }
}

pub async fn reap_once(store: &dyn PollStore) -> u64 {
    match store.purge_expired().await {
        Ok(0) => {
            debug!("No expired polls to purge");
            0
        }
        Ok(purged) => {
            info!("Purged {} expired poll(s)", purged);
            purged
        }
        Err(e) => {
            error!("Failed to purge expired polls: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::PollError;

    #[tokio::test]
    async fn reap_once_removes_expired_polls() {
        let db = Database::in_memory(Duration::ZERO).await.unwrap();
        db.create_poll("OLD001", ("admin", "Ada"), "Stale", 1).await.unwrap();

        assert_eq!(reap_once(&db).await, 1);
        assert_eq!(reap_once(&db).await, 0);
        assert!(matches!(db.get_poll("OLD001").await, Err(PollError::NotFound(_))));
    }

    #[tokio::test]
    async fn reaper_keeps_live_polls() {
        let db = Arc::new(Database::in_memory(Duration::from_secs(60)).await.unwrap());
        db.create_poll("LIVE01", ("admin", "Ada"), "Fresh", 1).await.unwrap();

        let task = tokio::spawn(reap_expired_polls_task(db.clone(), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();

        assert!(db.get_poll("LIVE01").await.is_ok());
    }
}
