//! The event loop: one service, one signal channel, one thread.

use crate::signals::{termination_signal, SignalChannel};
use anyhow::{bail, Context, Result};
use kmod_core::ipc::{VarlinkDispatch, VarlinkService};
use tracing::{info, warn};

/// Serve until a termination signal arrives.
///
/// Returns `Ok` only for a clean, signal-initiated shutdown.
pub async fn run<D: VarlinkDispatch>(
    mut service: VarlinkService<D>,
    mut signals: SignalChannel,
) -> Result<()> {
    let mut shutting_down = false;

    while !shutting_down {
        tokio::select! {
            signo = signals.recv() => {
                let signo = signo.context("Failed to read signal")?;
                match termination_signal(signo) {
                    Some(signal) => {
                        info!("Received {}, shutting down", signal);
                        shutting_down = true;
                    }
                    None => bail!("Unexpected signal {}", signo),
                }
            }
            result = service.process_events() => {
                if let Err(e) = result {
                    if !e.is_disconnect() {
                        return Err(e).context("Failed to process service events");
                    }
                    warn!("Client disconnected: {}", e);
                }
            }
        }
    }

    service.shutdown().await;
    Ok(())
}
