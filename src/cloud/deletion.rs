//! Delayed cloud-object deletion.
//!
//! When the engine deletes a cloud-owned file, the local copy goes away
//! immediately but the cloud object lingers for a grace period so readers
//! that opened it before the delete can finish. One worker per environment
//! drains a FIFO of due-at jobs; shutdown abandons whatever is still pending.

use crate::cloud::error::CloudResult;
use crate::cloud::storage_client::CloudStorageClient;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Keys whose delayed delete has been posted but not yet executed. The
/// environment consults this to hide such objects from existence probes and
/// read fallbacks.
type PendingSet = Arc<Mutex<HashSet<(String, String)>>>;

/// Messages for the deletion worker
enum DeletionMessage {
    /// Remove `bucket/key` once the delay has passed
    Enqueue { bucket: String, key: String },
    /// Drop any queued job for `bucket/key` (the file was re-created and the
    /// old job must not delete the new object)
    Cancel { bucket: String, key: String },
    /// Graceful shutdown; pending jobs are abandoned
    Shutdown { response_tx: oneshot::Sender<()> },
}

struct DeletionJob {
    due_at: Instant,
    bucket: String,
    key: String,
}

/// Worker that owns the queue and performs the deletes
struct DeletionWorker {
    client: CloudStorageClient,
    delay: Duration,
    rx: mpsc::UnboundedReceiver<DeletionMessage>,
    pending: VecDeque<DeletionJob>,
    pending_keys: PendingSet,
}

impl DeletionWorker {
    async fn run(mut self) {
        loop {
            // Nothing pending: block on the mailbox
            let msg = if self.pending.is_empty() {
                match self.rx.recv().await {
                    Some(msg) => Some(msg),
                    None => break,
                }
            } else {
                // Sleep until the front job is due, interruptible by mail
                let due_at = self.pending.front().expect("non-empty").due_at;
                tokio::select! {
                    _ = tokio::time::sleep_until(due_at) => None,
                    msg = self.rx.recv() => match msg {
                        Some(msg) => Some(msg),
                        None => break,
                    },
                }
            };

            match msg {
                Some(DeletionMessage::Enqueue { bucket, key }) => {
                    self.pending.push_back(DeletionJob {
                        due_at: Instant::now() + self.delay,
                        bucket,
                        key,
                    });
                }
                Some(DeletionMessage::Cancel { bucket, key }) => {
                    self.pending
                        .retain(|job| !(job.bucket == bucket && job.key == key));
                }
                Some(DeletionMessage::Shutdown { response_tx }) => {
                    if !self.pending.is_empty() {
                        info!(
                            abandoned = self.pending.len(),
                            "deletion worker shutting down with pending jobs"
                        );
                    }
                    let _ = response_tx.send(());
                    return;
                }
                None => self.execute_due().await,
            }
        }
    }

    /// Delete every job whose deadline has passed
    async fn execute_due(&mut self) {
        let now = Instant::now();
        while let Some(front) = self.pending.front() {
            if front.due_at > now {
                break;
            }
            let job = self.pending.pop_front().expect("checked front");
            match self.client.delete(&job.bucket, &job.key).await {
                Ok(()) => debug!(bucket = %job.bucket, key = %job.key, "deleted cloud object"),
                // A repeat delete or a purger race is not an error
                Err(e) if e.is_not_found() => {
                    debug!(bucket = %job.bucket, key = %job.key, "cloud object already gone")
                }
                Err(e) => {
                    warn!(bucket = %job.bucket, key = %job.key, "cloud delete failed: {}", e)
                }
            }
            self.pending_keys.lock().remove(&(job.bucket, job.key));
        }
    }
}

/// Handle for posting work to the deletion worker
#[derive(Clone)]
pub struct DeletionQueueHandle {
    tx: mpsc::UnboundedSender<DeletionMessage>,
    pending_keys: PendingSet,
}

impl DeletionQueueHandle {
    /// Post a delayed delete. Fire-and-forget: the engine's delete already
    /// succeeded locally.
    pub fn enqueue(&self, bucket: &str, key: &str) {
        self.pending_keys
            .lock()
            .insert((bucket.to_string(), key.to_string()));
        let _ = self.tx.send(DeletionMessage::Enqueue {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
    }

    /// Forget a queued delete. Called when the engine re-creates a file of
    /// the same name, so the stale job cannot remove the new object.
    pub fn cancel(&self, bucket: &str, key: &str) {
        self.pending_keys
            .lock()
            .remove(&(bucket.to_string(), key.to_string()));
        let _ = self.tx.send(DeletionMessage::Cancel {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
    }

    /// Whether a delayed delete for `bucket/key` is still outstanding
    pub fn is_pending(&self, bucket: &str, key: &str) -> bool {
        self.pending_keys
            .lock()
            .contains(&(bucket.to_string(), key.to_string()))
    }

    /// Graceful shutdown; waits for the worker to acknowledge
    pub async fn shutdown(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .tx
            .send(DeletionMessage::Shutdown { response_tx })
            .is_ok()
        {
            let _ = response_rx.await;
        }
    }
}

/// Spawn the deletion worker
pub fn spawn_deletion_queue(
    client: CloudStorageClient,
    delay: Duration,
) -> CloudResult<(DeletionQueueHandle, tokio::task::JoinHandle<()>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending_keys: PendingSet = Arc::new(Mutex::new(HashSet::new()));
    let worker = DeletionWorker {
        client,
        delay,
        rx,
        pending: VecDeque::new(),
        pending_keys: Arc::clone(&pending_keys),
    };
    let task = tokio::spawn(worker.run());
    Ok((DeletionQueueHandle { tx, pending_keys }, task))
}
