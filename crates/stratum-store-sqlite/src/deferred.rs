//! Background writer for deferred session persistence

use sqlx::sqlite::SqlitePool;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::SqliteStoreConfig;
use crate::sqlite_session_store::{STORE_NAME, delete_row, upsert_batch};
use stratum_core::{Error, Result};

/// A row waiting to be written
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub key: String,
    pub bytes: Vec<u8>,
    pub expiration_time: i64,
}

enum WriteOp {
    Put(PendingWrite),
    Delete {
        key: String,
        ack: oneshot::Sender<Result<()>>,
    },
    Flush {
        ack: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Queue plus worker task that batches writes into transactions
///
/// Every operation travels through one channel, so a delete is never
/// overtaken by a put that was queued before it.
pub(crate) struct DeferredWriter {
    tx: mpsc::Sender<WriteOp>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeferredWriter {
    pub fn spawn(pool: SqlitePool, config: &SqliteStoreConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let batch_size = config.batch_size;
        let batch_timeout = Duration::from_millis(config.batch_timeout_ms);

        let worker_handle = tokio::spawn(async move {
            Self::worker_loop(rx, pool, batch_size, batch_timeout).await;
        });

        Self {
            tx,
            worker_handle: Mutex::new(Some(worker_handle)),
        }
    }

    /// Queue a write without waiting for it
    pub fn enqueue(&self, write: PendingWrite) -> Result<()> {
        match self.tx.try_send(WriteOp::Put(write)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Deferred session write queue full");
                Err(Error::transient(STORE_NAME, "deferred write queue is full"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::Database(
                "Deferred session writer has shut down".to_string(),
            )),
        }
    }

    /// Queue a delete and wait until it has been applied
    pub async fn delete(&self, key: &str) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(WriteOp::Delete {
            key: key.to_string(),
            ack,
        })
        .await?;
        done.await.map_err(|_| worker_gone())?
    }

    /// Wait until everything queued so far is persisted
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(WriteOp::Flush { ack }).await?;
        done.await.map_err(|_| worker_gone())?
    }

    /// Drain the queue and stop the worker
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriteOp::Shutdown { ack }).await.is_ok() {
            let _ = done.await;
        }

        let handle = self
            .worker_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|_| Error::Database("Deferred writer task panicked".to_string()))?;
            tracing::info!("Deferred session writer shutdown complete");
        }
        Ok(())
    }

    async fn send(&self, op: WriteOp) -> Result<()> {
        self.tx.send(op).await.map_err(|_| worker_gone())
    }

    async fn worker_loop(
        mut rx: mpsc::Receiver<WriteOp>,
        pool: SqlitePool,
        batch_size: usize,
        batch_timeout: Duration,
    ) {
        let mut buffer: Vec<PendingWrite> = Vec::with_capacity(batch_size);
        let mut interval = tokio::time::interval(batch_timeout);

        loop {
            tokio::select! {
                op = rx.recv() => match op {
                    Some(WriteOp::Put(write)) => {
                        buffer.push(write);
                        if buffer.len() >= batch_size {
                            let _ = Self::flush_buffer(&pool, &mut buffer).await;
                        }
                    }
                    Some(WriteOp::Delete { key, ack }) => {
                        let _ = Self::flush_buffer(&pool, &mut buffer).await;
                        let _ = ack.send(delete_row(&pool, &key).await);
                    }
                    Some(WriteOp::Flush { ack }) => {
                        let _ = ack.send(Self::flush_buffer(&pool, &mut buffer).await);
                    }
                    Some(WriteOp::Shutdown { ack }) => {
                        let _ = Self::flush_buffer(&pool, &mut buffer).await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        let _ = Self::flush_buffer(&pool, &mut buffer).await;
                        break;
                    }
                },
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        let _ = Self::flush_buffer(&pool, &mut buffer).await;
                    }
                }
            }
        }

        tracing::debug!("Deferred session writer loop exited");
    }

    /// Persist buffered writes; a failed batch is logged and dropped
    async fn flush_buffer(pool: &SqlitePool, buffer: &mut Vec<PendingWrite>) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        let writes = std::mem::take(buffer);
        let result = upsert_batch(pool, &writes).await;
        if let Err(e) = &result {
            tracing::error!(
                error = %e,
                write_count = writes.len(),
                "Failed to persist deferred session writes"
            );
        }
        result
    }
}

impl Drop for DeferredWriter {
    fn drop(&mut self) {
        let running = self
            .worker_handle
            .get_mut()
            .map(|handle| handle.is_some())
            .unwrap_or(false);
        if running {
            tracing::warn!(
                "Deferred session writer dropped without calling shutdown(). \
                 Worker will exit but pending writes may not be fully flushed."
            );
        }
    }
}

fn worker_gone() -> Error {
    Error::Database("Deferred session writer has shut down".to_string())
}
