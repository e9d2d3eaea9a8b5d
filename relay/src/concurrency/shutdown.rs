//! Broadcast shutdown channel shared by all workers of a pipeline.

use tokio::sync::watch;

use crate::error::{ErrorKind, RelayResult};
use crate::relay_error;

/// Transmitter side of the shutdown channel.
///
/// A single [`ShutdownTx`] is owned by the pipeline; every worker holds a
/// subscribed [`ShutdownRx`]. Sending the signal reaches all current
/// subscribers at once.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

/// Receiver side of the shutdown channel.
pub type ShutdownRx = watch::Receiver<()>;

impl ShutdownTx {
    /// Broadcasts the shutdown signal to all subscribed workers.
    pub fn shutdown(&self) -> RelayResult<()> {
        self.0.send(()).map_err(|err| {
            relay_error!(
                ErrorKind::ShutdownFailed,
                "Failed to broadcast shutdown signal",
                source: err
            )
        })
    }

    /// Creates a new receiver subscribed to this channel.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Creates the shutdown channel for one pipeline.
///
/// The receiver returned here can be dropped; workers subscribe through the
/// transmitter when they are spawned.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}
