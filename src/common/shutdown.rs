//! Shutdown handling for the recorder binary
//!
//! A single broadcast channel fans the Ctrl+C signal out to the recorder
//! task and anything else that waits on it.

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shutdown signal type (unit type, just signals "shutdown now")
pub type ShutdownSignal = ();

/// Shutdown channel sender
pub type ShutdownSender = broadcast::Sender<ShutdownSignal>;

/// Shutdown channel receiver
pub type ShutdownReceiver = broadcast::Receiver<ShutdownSignal>;

/// Create a shutdown channel without any signal handler attached
///
/// Tests and embedders trigger shutdown by sending on the returned sender.
pub fn shutdown_channel() -> (ShutdownSender, ShutdownReceiver) {
    broadcast::channel::<ShutdownSignal>(1)
}

/// Setup shutdown handling with Ctrl+C signal
///
/// Returns (sender, receiver). The sender can be cloned for additional
/// shutdown triggers, e.g. the end of a fixed-length recording.
///
/// # Example
/// ```ignore
/// let (_shutdown_tx, shutdown_rx) = setup_shutdown();
/// recorder.run(shutdown_rx).await?;
/// ```
pub fn setup_shutdown() -> (ShutdownSender, ShutdownReceiver) {
    let (tx, rx) = shutdown_channel();

    let tx_clone = tx.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Ctrl+C received, initiating shutdown");
        let _ = tx_clone.send(());
    });

    (tx, rx)
}
