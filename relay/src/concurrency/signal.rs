//! Lightweight wake signal used to interrupt workers at blocking points.
//!
//! Abstracts a watch channel into a payload-free signal. A stage fires it when
//! a cancellation must reach workers that are parked inside a blocking
//! extractor call; the workers race their blocking futures against
//! [`SignalRx::changed`] and re-check their cancellation flags when it fires.

use tokio::sync::watch;

/// Transmitter side of a wake signal channel.
pub type SignalTx = watch::Sender<()>;

/// Receiver side of a wake signal channel.
pub type SignalRx = watch::Receiver<()>;

/// Creates a new wake signal channel.
///
/// Watch semantics fit here: every receiver observes the latest signal even if
/// it was sent while the receiver was not waiting, so an interrupt requested
/// just before a worker blocks is never lost.
pub fn create_signal() -> (SignalTx, SignalRx) {
    let (tx, rx) = watch::channel(());
    (tx, rx)
}
