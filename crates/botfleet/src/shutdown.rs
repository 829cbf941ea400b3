// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graceful shutdown coordination.
//!
//! SIGTERM and SIGINT cancel a [`CancellationToken`] that the worker
//! pools, sweeps and the ingress task all monitor. Late acks mean an
//! interrupted task is simply re-claimed after its lock expires.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Installs signal handlers; the returned token cancels on SIGTERM or
/// SIGINT.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    token_clone.cancel();
                    return;
                }
            };

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT (Ctrl+C), initiating shutdown");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, initiating shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, initiating shutdown");
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}
