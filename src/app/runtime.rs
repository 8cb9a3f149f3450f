use super::{AllskyOrchestrator, ShutdownReason};
use crate::error::Result;
use chrono::Utc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

impl AllskyOrchestrator {
    /// Run the capture scheduler until SIGINT/SIGTERM
    pub async fn run(&mut self) -> Result<i32> {
        info!("Allsky scheduler is starting");

        let mut scheduler = self.build_scheduler().await?;
        self.setup_signal_handlers();

        let started = Utc::now();
        if let Err(e) = scheduler.run(self.cancellation_token.clone()).await {
            error!("Scheduler failed: {}", e);
            request_shutdown(&self.cancellation_token, ShutdownReason::Error(e.to_string()));
            return Err(e);
        }

        info!(
            "Allsky scheduler shut down after {} minutes",
            (Utc::now() - started).num_minutes()
        );
        Ok(0)
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&self) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let token = self.cancellation_token.clone();
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            request_shutdown(&token, ShutdownReason::Signal("SIGTERM".to_string()));
                        }
                    }
                    Err(e) => error!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                request_shutdown(&token, ShutdownReason::Signal("SIGINT".to_string()));
            }
        });
    }
}

/// Cancel `token`, logging why; the scheduler stops after its current cycle.
pub fn request_shutdown(token: &CancellationToken, reason: ShutdownReason) {
    info!("Shutdown requested: {:?}", reason);
    token.cancel();
}
