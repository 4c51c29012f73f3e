use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel `token` on the first SIGTERM or SIGINT.
///
/// If the unix handlers cannot be installed, falls back to ctrl-c.
pub fn install_shutdown_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());

        let (mut sigterm, mut sigint) = match (sigterm, sigint) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Failed to install signal handler, falling back to ctrl-c");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for ctrl-c");
                    return;
                }
                tracing::info!("Received ctrl-c, initiating graceful shutdown");
                token.cancel();
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
            _ = token.cancelled() => return,
        }

        token.cancel();
    });
}
