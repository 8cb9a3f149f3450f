use crate::config::AllskyConfig;
use crate::error::Result;
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;

/// Wires the configured components together for each command
pub struct AllskyOrchestrator {
    pub(super) config: AllskyConfig,
    pub(super) tz: Tz,
    pub(super) simulate: bool,
    pub(super) cancellation_token: CancellationToken,
}

impl AllskyOrchestrator {
    /// Create a new orchestrator with the given configuration
    pub fn new(config: AllskyConfig) -> Result<Self> {
        let tz = config.site.tz()?;
        Ok(Self {
            config,
            tz,
            simulate: false,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Use the simulated camera regardless of the configured driver
    pub fn set_simulate(&mut self, simulate: bool) {
        self.simulate = simulate;
    }

    pub fn config(&self) -> &AllskyConfig {
        &self.config
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Token cancelled on SIGINT/SIGTERM; cancelling it stops `run` between cycles
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}
