use super::AllskyOrchestrator;
use crate::camera::{CameraDriver, CameraHandle, CameraHandleBuilder, SimulatedCamera, SimulatedScene};
use crate::config::CameraDriverKind;
use crate::correction::CorrectionPipeline;
use crate::darks::DarkLibrary;
use crate::error::Result;
use crate::exposure::ExposureController;
use crate::frame::CaptureSettings;
use crate::metadata::Identity;
use crate::scheduler::{CaptureScheduler, OutputLayout};
use crate::shell::ShellStateFile;
use crate::sky::SolarOracle;
use crate::status::{StatusPublisher, StatusStore};
use tracing::{error, info};

impl AllskyOrchestrator {
    /// Open the sensor and apply the configured start-up settings.
    ///
    /// A missing camera or SDK is returned as is; callers treat it as fatal.
    pub async fn open_camera(&self) -> Result<CameraHandle> {
        let camera = &self.config.camera;
        let kind = if self.simulate {
            CameraDriverKind::Simulated
        } else {
            camera.driver
        };

        let driver: Box<dyn CameraDriver> = match kind {
            CameraDriverKind::Simulated => {
                info!("Using simulated camera");
                Box::new(SimulatedCamera::new(
                    SimulatedScene::two_level(64, 48, 60.0, 400.0, 1),
                    camera.simulated_temperature_dc,
                ))
            }
            CameraDriverKind::Asi => self.open_asi()?,
        };

        CameraHandleBuilder::new()
            .driver(driver)
            .exposure_range(self.config.exposure.min_exposure_us, camera.max_exposure_us)
            .retry_delay(camera.retry_delay())
            .initial_settings(CaptureSettings::new(camera.default_exposure_us, camera.default_gain))
            .build()
            .await
    }

    #[cfg(feature = "asi")]
    fn open_asi(&self) -> Result<Box<dyn CameraDriver>> {
        let camera = crate::camera::AsiCamera::open(&self.config.camera).map_err(|e| {
            error!("Failed to open ASI camera: {}", e);
            e
        })?;
        Ok(Box::new(camera))
    }

    #[cfg(not(feature = "asi"))]
    fn open_asi(&self) -> Result<Box<dyn CameraDriver>> {
        error!("ASI driver requested but support was not compiled in");
        Err(crate::error::CameraError::SdkUnavailable {
            details: "built without the asi feature".to_string(),
        }
        .into())
    }

    pub fn identity(&self, camera: &CameraHandle) -> Identity {
        Identity::from_config(&self.config, camera.name())
    }

    pub fn oracle(&self) -> SolarOracle {
        SolarOracle::from_config(&self.config.site, &self.config.schedule)
    }

    pub fn shell(&self) -> ShellStateFile {
        ShellStateFile::new(&self.config.storage.shell_state_file)
    }

    pub fn status_publisher(&self, identity: Identity) -> StatusPublisher {
        StatusPublisher::new(
            StatusStore::new(&self.config.storage.status_file),
            identity,
            self.tz,
        )
    }

    pub fn exposure_controller(&self, publisher: StatusPublisher) -> ExposureController {
        ExposureController::new(self.config.exposure.clone(), self.config.camera.default_exposure_us)
            .with_status(publisher)
    }

    pub fn pipeline(&self) -> CorrectionPipeline {
        CorrectionPipeline::new(self.config.storage.jpeg_quality)
    }

    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(self.config.storage.images_dir(), self.tz)
    }

    pub async fn dark_library(&self, identity: Identity) -> Result<DarkLibrary> {
        DarkLibrary::open(self.config.darks.clone(), identity, self.tz).await
    }

    /// Scheduler over a freshly opened camera
    pub async fn build_scheduler(&self) -> Result<CaptureScheduler> {
        let camera = self.open_camera().await?;
        let identity = self.identity(&camera);
        let publisher = self.status_publisher(identity.clone());

        CaptureScheduler::builder()
            .controller(self.exposure_controller(publisher.clone()))
            .darks(self.dark_library(identity).await?)
            .oracle(Box::new(self.oracle()))
            .pipeline(self.pipeline())
            .publisher(publisher)
            .layout(self.layout())
            .schedule(self.config.schedule.clone())
            .camera(camera)
            .build()
    }
}
