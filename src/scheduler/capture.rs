use super::output::{corrected_path, OutputLayout, REFERENCE_PREFIX};
use super::policy::{CaptureMode, PhasePlan, Recalibration};
use crate::camera::CameraHandle;
use crate::config::ScheduleConfig;
use crate::correction::CorrectionPipeline;
use crate::darks::DarkLibrary;
use crate::error::{AllskyError, CameraError, Result};
use crate::exposure::{ExposureController, SettingsSource};
use crate::fits::{self, FitsHeader, FitsImage};
use crate::frame::{CaptureSettings, RawFrame};
use crate::metadata::CaptureMetadata;
use crate::sky::{classify, SkyPhase, SkyPhaseOracle};
use crate::status::StatusPublisher;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one scheduler cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// `None` when the oracle answers contradicted each other and nothing was captured
    pub phase: Option<SkyPhase>,
    pub recalibrated: bool,
    pub live: Option<PathBuf>,
    pub fit: Option<PathBuf>,
    pub reference: Option<PathBuf>,
    /// Corrected JPEGs written next to FIT captures
    pub corrected: Vec<PathBuf>,
    /// Corrected JPEGs that had a dark subtracted
    pub darks_applied: usize,
    /// Settings left on the camera for the next live capture
    pub settings: Option<CaptureSettings>,
    /// Wait before the next cycle
    pub next_wait: Duration,
}

/// Sky-phase driven capture loop over one exclusively owned camera.
pub struct CaptureScheduler {
    camera: CameraHandle,
    oracle: Box<dyn SkyPhaseOracle>,
    controller: ExposureController,
    darks: DarkLibrary,
    pipeline: CorrectionPipeline,
    publisher: StatusPublisher,
    layout: OutputLayout,
    schedule: ScheduleConfig,
    last_reference: Instant,
    calibrated: bool,
}

impl CaptureScheduler {
    pub fn builder() -> CaptureSchedulerBuilder {
        CaptureSchedulerBuilder::new()
    }

    pub fn camera(&self) -> &CameraHandle {
        &self.camera
    }

    /// Initial quality check from the phase defaults, before the first cycle.
    pub async fn initialize(&mut self, now: DateTime<Utc>) -> Result<()> {
        let Some(phase) = self.phase(now) else {
            warn!("Sky phase unknown at startup, skipping initial exposure check");
            return Ok(());
        };
        let plan = PhasePlan::for_phase(phase, &self.schedule);
        info!("Initial exposure check for {}", phase);
        let report = self
            .controller
            .auto(&mut self.camera, &plan.policy, SettingsSource::PhaseDefaults)
            .await?;
        debug!(
            "Initial settings {}us gain {}",
            report.settings.exposure_us, report.settings.gain
        );
        self.calibrated = true;
        Ok(())
    }

    fn phase(&self, now: DateTime<Utc>) -> Option<SkyPhase> {
        classify(self.oracle.as_ref(), now, self.schedule.near_transition_window())
    }

    /// Run one cycle for the wall-clock instant `now`.
    ///
    /// The phase is recomputed from `now` every time. Camera failures that
    /// survive the handle's single retry are returned to the caller.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport {
            next_wait: self.cadence(now),
            ..CycleReport::default()
        };

        let Some(phase) = self.phase(now) else {
            warn!(
                "Unknown sky phase: night={} near={} nautical={} astronomical={}",
                self.oracle.is_night(now),
                self.oracle
                    .is_near_sunset_or_sunrise(now, self.schedule.near_transition_window()),
                self.oracle.is_nautical_twilight(now),
                self.oracle.is_astronomical_twilight(now)
            );
            return Ok(report);
        };
        report.phase = Some(phase);

        let plan = PhasePlan::for_phase(phase, &self.schedule);
        let reference_due = self.reference_due();
        info!("{}: taking {} capture", phase, plan.mode);

        let recalibrate = match plan.recalibration {
            Recalibration::EveryCapture => true,
            Recalibration::WithReference => reference_due || !self.calibrated,
        };
        if recalibrate {
            self.controller
                .auto(&mut self.camera, &plan.policy, SettingsSource::StatusRecord)
                .await?;
            self.calibrated = true;
            report.recalibrated = true;
        } else if self.camera.settings().gain != plan.policy.gain {
            let settings = CaptureSettings::new(self.camera.settings().exposure_us, plan.policy.gain);
            self.camera.apply(settings).await?;
        }

        let frame = self.camera.capture().await?;
        let live = self.layout.capture_path(now, "", CaptureMode::LiveJpeg);
        self.save_live(&frame, &live).await?;
        self.publish(&frame).await?;
        report.live = Some(live);

        let settings = self.camera.settings();
        if plan.fit_on_long_exposure && settings.exposure_us > self.schedule.fit_exposure_threshold_us {
            sleep(settings.settle_time()).await;
            let frame = self.camera.capture().await?;
            let fit = self.layout.capture_path(now, "", CaptureMode::CalibratedFit);
            self.save_fit(&frame, &fit, &mut report).await?;
            self.publish(&frame).await?;
            report.fit = Some(fit);
        }

        if reference_due {
            let reference = self.reference_capture(now, &mut report).await?;
            report.reference = Some(reference);
        }

        report.settings = Some(self.camera.settings());
        Ok(report)
    }

    fn reference_due(&self) -> bool {
        self.last_reference.elapsed() >= self.schedule.reference_interval()
    }

    fn cadence(&self, now: DateTime<Utc>) -> Duration {
        let secs = if self.oracle.is_night(now) {
            self.schedule.night_interval_secs
        } else {
            self.schedule.day_interval_secs
        };
        Duration::from_secs(secs)
    }

    /// Gain 0 FIT from a fresh convergence, then back to the live settings.
    async fn reference_capture(
        &mut self,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<PathBuf> {
        let previous = self.camera.settings();
        sleep(previous.settle_time()).await;

        let policy = self.schedule.reference;
        let outcome = self
            .controller
            .converge_exposure(&mut self.camera, previous.exposure_us, &policy)
            .await?;
        info!(
            "Reference capture at {}us gain {} ({:?})",
            outcome.settings.exposure_us, outcome.settings.gain, outcome.status
        );

        let frame = self.camera.capture().await?;
        let path = self
            .layout
            .capture_path(now, REFERENCE_PREFIX, CaptureMode::CalibratedFit);
        self.save_fit(&frame, &path, report).await?;
        self.publish(&frame).await?;

        sleep(outcome.settings.settle_time()).await;
        let restored = self.camera.apply(previous).await?;
        self.last_reference = Instant::now();

        // The shared record must describe the live settings again, not the reference.
        let temperature_dc = self.camera.temperature_dc().await?;
        self.publisher
            .publish(restored, temperature_dc, Utc::now())
            .await?;
        debug!(
            "Restored live settings {}us gain {}",
            restored.exposure_us, restored.gain
        );
        Ok(path)
    }

    async fn save_live(&self, frame: &RawFrame, path: &Path) -> Result<()> {
        let image = self.pipeline.process_frame(frame);
        self.pipeline.save_jpeg(path, &image).await?;

        let last = self.layout.last_path();
        fs::copy(path, &last).await?;
        info!("Saved {}", path.display());
        Ok(())
    }

    /// Write the raw FIT and its dark-corrected JPEG.
    ///
    /// A missing or unusable dark still produces a JPEG, just uncorrected.
    async fn save_fit(&self, frame: &RawFrame, path: &Path, report: &mut CycleReport) -> Result<()> {
        let metadata = CaptureMetadata::describe(frame, self.publisher.identity(), self.publisher.tz());
        let image = FitsImage {
            width: frame.width,
            height: frame.height,
            data: frame.data.clone(),
            header: FitsHeader::with_metadata(&metadata),
        };
        fits::write_fits(path, &image).await?;
        info!("Saved {}", path.display());

        let data = match self.darks.apply_dark(&image).await {
            Ok(corrected) => {
                debug!("Subtracted dark {}", corrected.dark);
                report.darks_applied += 1;
                corrected.image.data
            }
            Err(AllskyError::Calibration(e)) => {
                warn!("Writing {} without dark correction: {}", path.display(), e);
                image.data
            }
            Err(e) => return Err(e),
        };

        let rgb = self.pipeline.process(frame.width, frame.height, &data);
        let corrected = corrected_path(path);
        self.pipeline.save_jpeg(&corrected, &rgb).await?;
        report.corrected.push(corrected);
        Ok(())
    }

    async fn publish(&self, frame: &RawFrame) -> Result<()> {
        self.publisher
            .publish(frame.settings, frame.temperature_dc, frame.captured_at)
            .await?;
        Ok(())
    }

    /// Cycle until `cancel` fires; cancellation is observed between cycles.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        self.initialize(Utc::now()).await?;

        while !cancel.is_cancelled() {
            let wait = match self.run_cycle(Utc::now()).await {
                Ok(report) => report.next_wait,
                Err(e) if is_fatal(&e) => {
                    error!("Scheduler stopping: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Capture cycle failed: {}", e);
                    self.cadence(Utc::now())
                }
            };

            debug!("Waiting {:?} until the next cycle", wait);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }
}

fn is_fatal(error: &AllskyError) -> bool {
    error.is_camera_missing() || matches!(error, AllskyError::Camera(CameraError::Disconnected))
}

/// Builder for [`CaptureScheduler`]
pub struct CaptureSchedulerBuilder {
    camera: Option<CameraHandle>,
    oracle: Option<Box<dyn SkyPhaseOracle>>,
    controller: Option<ExposureController>,
    darks: Option<DarkLibrary>,
    pipeline: CorrectionPipeline,
    publisher: Option<StatusPublisher>,
    layout: Option<OutputLayout>,
    schedule: ScheduleConfig,
}

impl CaptureSchedulerBuilder {
    pub fn new() -> Self {
        Self {
            camera: None,
            oracle: None,
            controller: None,
            darks: None,
            pipeline: CorrectionPipeline::default(),
            publisher: None,
            layout: None,
            schedule: ScheduleConfig::default(),
        }
    }

    pub fn camera(mut self, camera: CameraHandle) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn oracle(mut self, oracle: Box<dyn SkyPhaseOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn controller(mut self, controller: ExposureController) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn darks(mut self, darks: DarkLibrary) -> Self {
        self.darks = Some(darks);
        self
    }

    pub fn pipeline(mut self, pipeline: CorrectionPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn publisher(mut self, publisher: StatusPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn layout(mut self, layout: OutputLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn build(self) -> Result<CaptureScheduler> {
        let missing = |part: &str| {
            AllskyError::component("scheduler".to_string(), format!("{} must be specified", part))
        };

        Ok(CaptureScheduler {
            camera: self.camera.ok_or_else(|| missing("camera"))?,
            oracle: self.oracle.ok_or_else(|| missing("sky phase oracle"))?,
            controller: self.controller.ok_or_else(|| missing("exposure controller"))?,
            darks: self.darks.ok_or_else(|| missing("dark library"))?,
            pipeline: self.pipeline,
            publisher: self.publisher.ok_or_else(|| missing("status publisher"))?,
            layout: self.layout.ok_or_else(|| missing("output layout"))?,
            schedule: self.schedule,
            last_reference: Instant::now(),
            calibrated: false,
        })
    }
}

impl Default for CaptureSchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
