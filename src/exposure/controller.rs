use crate::camera::CameraHandle;
use crate::config::{ExposureConfig, ExposurePolicy};
use crate::error::Result;
use crate::frame::{BrightnessMethod, BrightnessStats, CaptureSettings};
use crate::status::StatusPublisher;
use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Exposure multiplier used when a frame reads completely black.
const BLACK_FRAME_GROWTH: f64 = 10.0;

/// How a convergence run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Brightness within tolerance and, for the `max` method, saturation within its limit
    Converged,
    /// The next step would exceed the exposure ceiling; the ceiling was applied
    CeilingReached,
    /// Iteration budget exhausted; the last computed exposure was applied
    NotConverged,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceOutcome {
    /// Settings left on the camera
    pub settings: CaptureSettings,
    pub status: ConvergenceStatus,
    /// Frames captured during the run
    pub iterations: u32,
    /// Statistics of the last captured frame
    pub stats: BrightnessStats,
}

impl ConvergenceOutcome {
    pub fn converged(&self) -> bool {
        self.status == ConvergenceStatus::Converged
    }
}

/// Result of validating the current settings against a policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityReport {
    pub passed: bool,
    pub stats: BrightnessStats,
    /// Settings in effect after the check (corrected ones when auto-fix ran)
    pub settings: CaptureSettings,
    pub correction: Option<ConvergenceOutcome>,
}

/// Where a quality check takes its starting settings from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsSource {
    /// Last known good settings from the status record, phase defaults when unusable
    StatusRecord,
    /// Phase defaults only
    PhaseDefaults,
}

/// Drives the camera towards a brightness target.
pub struct ExposureController {
    config: ExposureConfig,
    default_exposure_us: u64,
    status: Option<StatusPublisher>,
}

impl ExposureController {
    pub fn new(config: ExposureConfig, default_exposure_us: u64) -> Self {
        Self {
            config,
            default_exposure_us,
            status: None,
        }
    }

    /// Persist corrected settings through `publisher` after an auto-fix.
    pub fn with_status(mut self, publisher: StatusPublisher) -> Self {
        self.status = Some(publisher);
        self
    }

    pub fn default_exposure_us(&self) -> u64 {
        self.default_exposure_us
    }

    /// Capture previews and rescale the exposure until the policy target is met.
    ///
    /// Never fails on non-convergence: the outcome status says how the run ended
    /// and the camera is left with the settings in the outcome. Only camera
    /// errors are returned as `Err`.
    pub async fn converge_exposure(
        &self,
        camera: &mut CameraHandle,
        initial_exposure_us: u64,
        policy: &ExposurePolicy,
    ) -> Result<ConvergenceOutcome> {
        self.converge_with_budget(camera, initial_exposure_us, policy, self.config.max_iterations)
            .await
    }

    pub async fn converge_with_budget(
        &self,
        camera: &mut CameraHandle,
        initial_exposure_us: u64,
        policy: &ExposurePolicy,
        max_iterations: u32,
    ) -> Result<ConvergenceOutcome> {
        let min_exposure = camera.min_exposure_us().max(self.config.min_exposure_us);
        let max_exposure = camera
            .max_exposure_us()
            .min(self.config.max_exposure_us)
            .max(min_exposure);
        let mut exposure = initial_exposure_us.clamp(min_exposure, max_exposure);
        let mut trimming = false;
        let mut last_stats = None;

        debug!(
            "Converging exposure from {}us at gain {} towards {:.0}±{:.0} ({:?})",
            exposure, policy.gain, policy.target, policy.tolerance, policy.method
        );

        for iteration in 1..=max_iterations.max(1) {
            let applied = camera
                .apply(CaptureSettings::new(exposure, policy.gain))
                .await?;
            let frame = camera.capture().await?;
            let stats = BrightnessStats::measure(&frame);
            let value = stats.statistic(policy.method);
            last_stats = Some(stats);

            debug!(
                "Iteration {}: exposure {}us -> brightness {:.1}, saturated {:.3}",
                iteration, applied.exposure_us, value, stats.saturated_fraction
            );

            // Once saturation trimming has started only saturation is re-checked
            let on_target = trimming || (value - policy.target).abs() <= policy.tolerance;
            let next = if on_target {
                if !exceeds_saturation(&stats, policy) {
                    info!(
                        "Exposure converged at {}us gain {} after {} captures",
                        applied.exposure_us, applied.gain, iteration
                    );
                    return Ok(ConvergenceOutcome {
                        settings: applied,
                        status: ConvergenceStatus::Converged,
                        iterations: iteration,
                        stats,
                    });
                }
                trimming = true;
                applied.exposure_us as f64 * self.config.saturation_trim_factor
            } else if value <= 0.0 {
                applied.exposure_us as f64 * BLACK_FRAME_GROWTH
            } else {
                applied.exposure_us as f64 * policy.target / value
            };

            let next = next.round().max(min_exposure as f64);
            if next > max_exposure as f64 {
                let settings = camera
                    .apply(CaptureSettings::new(max_exposure, policy.gain))
                    .await?;
                warn!(
                    "Exposure ceiling reached: wanted {:.0}us, using {}us",
                    next, max_exposure
                );
                return Ok(ConvergenceOutcome {
                    settings,
                    status: ConvergenceStatus::CeilingReached,
                    iterations: iteration,
                    stats,
                });
            }

            sleep(applied.settle_time()).await;
            exposure = next as u64;
        }

        let settings = camera
            .apply(CaptureSettings::new(exposure, policy.gain))
            .await?;
        warn!(
            "Exposure did not converge in {} captures, keeping {}us",
            max_iterations, settings.exposure_us
        );
        Ok(ConvergenceOutcome {
            settings,
            status: ConvergenceStatus::NotConverged,
            iterations: max_iterations.max(1),
            stats: last_stats.unwrap_or(BrightnessStats {
                mean: 0.0,
                median: 0.0,
                max: 0,
                saturated_fraction: 0.0,
            }),
        })
    }

    /// Capture one frame at `settings` and judge it against `policy`.
    ///
    /// With `auto_fix`, a failing check re-converges from the failing settings
    /// and the result becomes the new status record.
    pub async fn quality_check(
        &self,
        camera: &mut CameraHandle,
        settings: CaptureSettings,
        policy: &ExposurePolicy,
        auto_fix: bool,
    ) -> Result<QualityReport> {
        let applied = camera.apply(settings).await?;
        let frame = camera.capture().await?;
        let stats = BrightnessStats::measure(&frame);
        let value = stats.statistic(policy.method);

        let in_tolerance = (value - policy.target).abs() <= policy.tolerance;
        let passed = in_tolerance && !exceeds_saturation(&stats, policy);

        if passed {
            debug!(
                "Quality check passed at {}us gain {} (brightness {:.1})",
                applied.exposure_us, applied.gain, value
            );
            return Ok(QualityReport {
                passed,
                stats,
                settings: applied,
                correction: None,
            });
        }

        info!(
            "Quality check failed at {}us gain {}: brightness {:.1}, saturated {:.3}",
            applied.exposure_us, applied.gain, value, stats.saturated_fraction
        );
        if !auto_fix {
            return Ok(QualityReport {
                passed,
                stats,
                settings: applied,
                correction: None,
            });
        }

        let fix_policy = ExposurePolicy {
            gain: applied.gain,
            ..*policy
        };
        let outcome = self
            .converge_exposure(camera, applied.exposure_us, &fix_policy)
            .await?;

        if let Some(publisher) = &self.status {
            let temperature_dc = camera.temperature_dc().await?;
            publisher
                .publish(outcome.settings, temperature_dc, Utc::now())
                .await?;
        }

        Ok(QualityReport {
            passed,
            stats,
            settings: outcome.settings,
            correction: Some(outcome),
        })
    }

    /// Quality check with auto-fix from the chosen settings source.
    ///
    /// The policy gain is always forced; only the exposure comes from the record.
    pub async fn auto(
        &self,
        camera: &mut CameraHandle,
        policy: &ExposurePolicy,
        source: SettingsSource,
    ) -> Result<QualityReport> {
        let start = self.starting_settings(policy, source).await;
        self.quality_check(camera, start, policy, true).await
    }

    async fn starting_settings(
        &self,
        policy: &ExposurePolicy,
        source: SettingsSource,
    ) -> CaptureSettings {
        let defaults = CaptureSettings::new(self.default_exposure_us, policy.gain);
        if source == SettingsSource::PhaseDefaults {
            return defaults;
        }

        let Some(publisher) = &self.status else {
            return defaults;
        };
        match publisher.store().load().await {
            Some(record) => {
                debug!(
                    "Starting from status record: {}us (recorded gain {})",
                    record.exposure_us(),
                    record.gain
                );
                CaptureSettings::new(record.exposure_us(), policy.gain)
            }
            None => {
                info!(
                    "No usable status record, starting from defaults ({}us gain {})",
                    defaults.exposure_us, defaults.gain
                );
                defaults
            }
        }
    }
}

fn exceeds_saturation(stats: &BrightnessStats, policy: &ExposurePolicy) -> bool {
    policy.method == BrightnessMethod::Max && stats.saturated_fraction > policy.saturation_limit
}
