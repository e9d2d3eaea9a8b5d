//! Out-of-band notifications from stage workers to the owning process.
//!
//! Workers never talk to the operator directly; they push notifications onto
//! the pipeline's channel and keep processing (or exit, for fatal errors).
//! The channel is unbounded so a slow consumer can never stall a worker loop.

use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::types::TaskId;

/// Event delivered from a stage worker to the pipeline owner.
#[derive(Debug)]
pub enum StageNotification {
    /// A worker entered its processing loop and the stage is in sequence.
    InSequence {
        stage: String,
        task_id: TaskId,
    },
    /// A worker hit a fatal failure and stopped, reporting its last known
    /// position.
    Error {
        stage: String,
        task_id: TaskId,
        seqno: Option<u64>,
        event_id: Option<String>,
        error: RelayError,
    },
}

/// Transmitter side of the notification channel.
pub type NotificationTx = mpsc::UnboundedSender<StageNotification>;

/// Receiver side of the notification channel.
pub type NotificationRx = mpsc::UnboundedReceiver<StageNotification>;

/// Creates the notification channel for one pipeline.
pub fn create_notification_channel() -> (NotificationTx, NotificationRx) {
    mpsc::unbounded_channel()
}
