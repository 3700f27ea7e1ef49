use attendo_core::{AppearanceRecord, FlushReport, Outbox};
use attendo_store::SqliteStore;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("store thread exited")]
    ChannelClosed,
    #[error("failed to spawn store thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// State owned by the store thread.
pub struct Backend {
    pub store: SqliteStore,
    pub outbox: Outbox,
}

impl Backend {
    /// Queue closed intervals and try to persist everything queued.
    pub fn persist(&mut self, records: Vec<AppearanceRecord>) -> FlushReport {
        self.outbox.enqueue(records);
        if self.outbox.is_empty() {
            return FlushReport::default();
        }
        self.outbox.flush(&mut self.store)
    }
}

type Job = Box<dyn FnOnce(&mut Backend) + Send>;

/// Clone-safe handle to the store thread.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<Job>,
}

impl StoreHandle {
    /// Run `f` on the store thread and wait for its result.
    pub async fn call<T, F>(&self, f: F) -> Result<T, WorkerError>
    where
        F: FnOnce(&mut Backend) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |backend| {
            let _ = reply_tx.send(f(backend));
        });
        self.tx.send(job).await.map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WorkerError::ChannelClosed)
    }

    pub async fn persist(&self, records: Vec<AppearanceRecord>) -> Result<FlushReport, WorkerError> {
        self.call(move |backend| backend.persist(records)).await
    }
}

/// Spawn the store on a dedicated OS thread.
///
/// The SQLite connection and the outbox never leave this thread; every
/// read and write is a job run in arrival order.
pub fn spawn_store(store: SqliteStore) -> Result<StoreHandle, WorkerError> {
    let (tx, mut rx) = mpsc::channel::<Job>(64);
    let mut backend = Backend {
        store,
        outbox: Outbox::new(),
    };

    std::thread::Builder::new()
        .name("attendo-store".into())
        .spawn(move || {
            tracing::info!("store thread started");
            while let Some(job) = rx.blocking_recv() {
                job(&mut backend);
            }
            if !backend.outbox.is_empty() {
                let report = backend.outbox.flush(&mut backend.store);
                if report.pending > 0 {
                    tracing::error!(
                        pending = report.pending,
                        "store thread exiting with unpersisted appearances"
                    );
                }
            }
            tracing::info!("store thread exiting");
        })?;

    Ok(StoreHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendo_core::{EventStore, Timestamp};

    fn record(label: &str) -> AppearanceRecord {
        AppearanceRecord {
            label: label.into(),
            start_time: Timestamp::default(),
            end_time: Timestamp::default() + chrono::Duration::seconds(4),
            duration_seconds: 4.0,
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn test_call_runs_on_store_thread() {
        let handle = spawn_store(SqliteStore::open_in_memory().unwrap()).unwrap();
        let name = handle
            .call(|_| std::thread::current().name().map(str::to_string))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("attendo-store"));
    }

    #[tokio::test]
    async fn test_persist_folds_statistics() {
        let handle = spawn_store(SqliteStore::open_in_memory().unwrap()).unwrap();
        let report = handle.persist(vec![record("alice"), record("alice")]).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.applied.len(), 2);

        let stats = handle
            .call(|b| b.store.statistics_for("alice"))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats.total_appearances, 2);
        assert_eq!(stats.total_duration_seconds, 8.0);
    }

    #[tokio::test]
    async fn test_empty_persist_is_noop() {
        let handle = spawn_store(SqliteStore::open_in_memory().unwrap()).unwrap();
        let report = handle.persist(Vec::new()).await.unwrap();
        assert!(report.is_complete());
        assert!(report.applied.is_empty());
    }
}
