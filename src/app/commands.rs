use super::types::{PhaseReport, SnapRequest};
use super::AllskyOrchestrator;
use crate::correction::save_raw_tiff;
use crate::darks::BuildReport;
use crate::error::{AllskyError, Result};
use crate::exposure::SettingsSource;
use crate::fits::{self, FitsHeader, FitsImage};
use crate::frame::CaptureSettings;
use crate::metadata::{CaptureMetadata, Identity};
use crate::scheduler::{corrected_path, CaptureMode, PhasePlan};
use crate::sky::{classify, SkyPhase, SkyPhaseOracle};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

impl AllskyOrchestrator {
    /// Capture a single frame and write it as JPEG, FIT or raw TIFF.
    pub async fn snap(&self, request: &SnapRequest) -> Result<PathBuf> {
        let mut camera = self.open_camera().await?;
        let identity = self.identity(&camera);
        let publisher = self.status_publisher(identity.clone());
        let now = Utc::now();

        if request.auto_exposure {
            let phase = classify(&self.oracle(), now, self.config.schedule.near_transition_window())
                .unwrap_or(SkyPhase::Day);
            let mut policy = PhasePlan::for_phase(phase, &self.config.schedule).policy;
            if let Some(gain) = request.gain {
                policy.gain = gain;
            }
            info!("Auto exposure for {} at gain {}", phase, policy.gain);
            self.exposure_controller(publisher.clone())
                .auto(&mut camera, &policy, SettingsSource::StatusRecord)
                .await?;
        } else if request.exposure_us.is_some() || request.gain.is_some() {
            let current = camera.settings();
            camera
                .apply(CaptureSettings::new(
                    request.exposure_us.unwrap_or(current.exposure_us),
                    request.gain.unwrap_or(current.gain),
                ))
                .await?;
        }

        let frame = camera.capture().await?;
        let path = request
            .output
            .clone()
            .unwrap_or_else(|| self.layout().capture_path(now, "", request.mode));

        match request.mode {
            CaptureMode::LiveJpeg => {
                let pipeline = self.pipeline();
                pipeline.save_jpeg(&path, &pipeline.process_frame(&frame)).await?;
            }
            CaptureMode::CalibratedFit => {
                let metadata = CaptureMetadata::describe(&frame, &identity, self.tz);
                let image = FitsImage {
                    width: frame.width,
                    height: frame.height,
                    data: frame.data.clone(),
                    header: FitsHeader::with_metadata(&metadata),
                };
                fits::write_fits(&path, &image).await?;
            }
            CaptureMode::RawTiff => save_raw_tiff(&path, &frame).await?,
        }

        publisher
            .publish(frame.settings, frame.temperature_dc, frame.captured_at)
            .await?;
        info!(
            "Saved {} ({}us, gain {})",
            path.display(),
            frame.settings.exposure_us,
            frame.settings.gain
        );
        Ok(path)
    }

    /// Capture missing darks for the current sensor temperature and merge masters.
    pub async fn build_darks(&self) -> Result<BuildReport> {
        let mut camera = self.open_camera().await?;
        let mut library = self.dark_library(self.identity(&camera)).await?;
        library
            .build_library(&mut camera, &self.oracle(), &self.shell())
            .await
    }

    /// Dark-subtract and debayer a FIT into a JPEG.
    ///
    /// Without a usable dark the JPEG is written uncorrected, with a warning.
    pub async fn correct(&self, input: &Path, output: Option<PathBuf>) -> Result<PathBuf> {
        let light = fits::read_fits(input).await?;
        let identity = Identity::from_config(&self.config, light.header.get_str("INSTRUME").unwrap_or_default());
        let library = self.dark_library(identity).await?;

        let data = match library.apply_dark(&light).await {
            Ok(corrected) => {
                info!("Subtracted {}", corrected.dark_path.display());
                corrected.image.data
            }
            Err(AllskyError::Calibration(e)) => {
                warn!("Writing {} without dark correction: {}", input.display(), e);
                light.data
            }
            Err(e) => return Err(e),
        };

        let pipeline = self.pipeline();
        let path = output.unwrap_or_else(|| corrected_path(input));
        pipeline
            .save_jpeg(&path, &pipeline.process(light.width, light.height, &data))
            .await?;
        Ok(path)
    }

    /// Current sky phase at the site and the next phase change.
    pub fn phase_report(&self, at: DateTime<Utc>) -> PhaseReport {
        let oracle = self.oracle();
        PhaseReport {
            at,
            phase: classify(&oracle, at, self.config.schedule.near_transition_window()),
            sun_altitude_deg: oracle.altitude(at),
            next_transition: oracle.next_transition(at),
        }
    }
}
