//! Desired task queue.
//!
//! Publishing atomically creates one record per task guid. Watchers subscribe
//! to the desired-task prefix and receive every record created after they
//! subscribed, in creation order, exactly once:
//! 1. The store feeds create/update/delete events to the subscription
//! 2. A forwarding task decodes each create into a [`Task`]
//! 3. Undecodable records go to the error channel and are skipped
//! 4. Cancelling the watch ends the stream at once, discarding anything still
//!    buffered, and stops the forwarding task
//! 5. Dropping the stream also stops the forwarding task

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use stager_models::Task;
use stager_store::{CoordinationStore, StoreError, StoreNode, WatchEventKind};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::keys::{desired_task_key, DESIRED_TASK_PREFIX};
use crate::BbsError;

/// Lazy, infinite sequence of desired tasks; ends only when the watch is cancelled.
#[derive(Debug)]
pub struct DesiredTasks {
    rx: mpsc::UnboundedReceiver<Task>,
    cancelled: Arc<AtomicBool>,
}

impl DesiredTasks {
    /// Wait for the next desired task.
    pub async fn recv(&mut self) -> Option<Task> {
        if self.check_cancelled() {
            return None;
        }
        let task = self.rx.recv().await?;
        if self.check_cancelled() {
            return None;
        }
        Some(task)
    }

    /// Closes the channel once the watch has been cancelled.
    fn check_cancelled(&mut self) -> bool {
        let cancelled = self.cancelled.load(Ordering::SeqCst);
        if cancelled {
            self.rx.close();
        }
        cancelled
    }
}

impl Stream for DesiredTasks {
    type Item = Task;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Task>> {
        if self.check_cancelled() {
            return Poll::Ready(None);
        }
        let poll = self.rx.poll_recv(cx);
        if matches!(poll, Poll::Ready(Some(_))) && self.check_cancelled() {
            return Poll::Ready(None);
        }
        poll
    }
}

/// Stops a desired-task watch. Dropping it has the same effect.
///
/// Keep it alive for as long as the stream should deliver.
#[derive(Debug)]
pub struct WatchCanceller {
    cancel: Option<oneshot::Sender<()>>,
    cancelled: Arc<AtomicBool>,
}

impl WatchCanceller {
    /// Stop delivery. Returns without waiting on the store.
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Drop for WatchCanceller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A desired-task subscription: tasks, decode errors, and its canceller.
pub type DesiredTaskWatch = (
    DesiredTasks,
    mpsc::UnboundedReceiver<BbsError>,
    WatchCanceller,
);

/// Create the task record; fails if the guid was already desired.
#[instrument(skip(store, task), fields(guid = %task.guid))]
pub(crate) async fn publish(store: &dyn CoordinationStore, task: &Task) -> Result<(), BbsError> {
    let value = task.to_json()?;

    match store
        .create(StoreNode::new(desired_task_key(&task.guid), value))
        .await
    {
        Ok(index) => {
            info!(index, actions = task.actions.len(), "Task desired");
            Ok(())
        }
        Err(StoreError::KeyExists(_)) => Err(BbsError::TaskExists(task.guid.clone())),
        Err(e) => Err(e.into()),
    }
}

/// Subscribe to newly desired tasks.
///
/// The subscription is in place when this returns, so any task published
/// afterwards is delivered.
pub(crate) async fn watch_for_desired(
    store: &dyn CoordinationStore,
) -> Result<DesiredTaskWatch, BbsError> {
    let mut watch = store.watch(DESIRED_TASK_PREFIX).await?;
    let watch_id = watch.id();

    let (task_tx, task_rx) = mpsc::unbounded_channel();
    let (error_tx, error_rx) = mpsc::unbounded_channel();
    let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
    let cancelled = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        debug!(watch_id, "Watching for desired tasks");

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => {
                    debug!(watch_id, "Desired task watch cancelled");
                    break;
                }
                _ = task_tx.closed() => {
                    debug!(watch_id, "Desired task receiver dropped");
                    break;
                }
                event = watch.next() => {
                    let Some(event) = event else {
                        warn!(watch_id, "Store closed desired task watch");
                        break;
                    };
                    if event.kind != WatchEventKind::Create {
                        continue;
                    }

                    match Task::from_json(&event.node.value) {
                        Ok(task) => {
                            if task_tx.send(task).is_err() {
                                debug!(watch_id, "Desired task receiver dropped");
                                break;
                            }
                        }
                        Err(source) => {
                            warn!(watch_id, key = %event.node.key, error = %source, "Skipping undecodable task record");
                            let _ = error_tx.send(BbsError::InvalidRecord {
                                key: event.node.key,
                                source,
                            });
                        }
                    }
                }
            }
        }
    });

    Ok((
        DesiredTasks {
            rx: task_rx,
            cancelled: Arc::clone(&cancelled),
        },
        error_rx,
        WatchCanceller {
            cancel: Some(cancel_tx),
            cancelled,
        },
    ))
}
