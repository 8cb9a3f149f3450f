use crate::frame::BrightnessMethod;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AllskyConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub exposure: ExposureConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub darks: DarksConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraDriverKind {
    Asi,
    Simulated,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Which driver backs the camera handle
    #[serde(default = "default_camera_driver")]
    pub driver: CameraDriverKind,

    /// Index of the connected camera to open
    #[serde(default)]
    pub index: u32,

    /// Explicit path to libASICamera2; searched in standard locations when unset
    #[serde(default)]
    pub sdk_path: Option<String>,

    /// Gain applied right after opening the camera
    #[serde(default = "default_camera_gain")]
    pub default_gain: u32,

    /// Exposure applied right after opening the camera (microseconds)
    #[serde(default = "default_camera_exposure_us")]
    pub default_exposure_us: u64,

    /// Longest exposure the handle passes to the sensor (microseconds)
    #[serde(default = "default_max_exposure_us")]
    pub max_exposure_us: u64,

    #[serde(default = "default_wb_r")]
    pub wb_r: i64,

    #[serde(default = "default_wb_b")]
    pub wb_b: i64,

    #[serde(default = "default_gamma")]
    pub gamma: i64,

    #[serde(default = "default_brightness")]
    pub brightness: i64,

    /// Extra time allowed past the exposure before a frame is considered lost
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,

    /// Delay before the single retry of a failed capture
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Sensor temperature reported by the simulated driver (tenths of a degree C)
    #[serde(default = "default_simulated_temperature_dc")]
    pub simulated_temperature_dc: i32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SiteConfig {
    #[serde(default = "default_latitude")]
    pub latitude: f64,

    #[serde(default = "default_longitude")]
    pub longitude: f64,

    #[serde(default = "default_elevation")]
    pub elevation_m: f64,

    /// IANA timezone used for file names, directories and record timestamps
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExposureConfig {
    /// Capture budget of one convergence run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Factor applied per step while too many pixels are saturated
    #[serde(default = "default_trim_factor")]
    pub saturation_trim_factor: f64,

    /// Shortest exposure the sensor accepts (microseconds)
    #[serde(default = "default_min_exposure_us")]
    pub min_exposure_us: u64,

    /// Ceiling for automatically chosen exposures (microseconds)
    #[serde(default = "default_auto_max_exposure_us")]
    pub max_exposure_us: u64,
}

/// Gain and brightness target used for one sky phase.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ExposurePolicy {
    pub gain: u32,
    pub target: f64,
    pub tolerance: f64,
    pub method: BrightnessMethod,
    pub saturation_limit: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ScheduleConfig {
    /// Cadence while the sun is up
    #[serde(default = "default_day_interval")]
    pub day_interval_secs: u64,

    /// Cadence once the sun is down
    #[serde(default = "default_night_interval")]
    pub night_interval_secs: u64,

    /// Run time between forced gain 0 reference captures
    #[serde(default = "default_reference_interval")]
    pub reference_interval_secs: u64,

    /// Window around sunrise and sunset where settings are recomputed every capture
    #[serde(default = "default_near_transition_hours")]
    pub near_transition_hours: f64,

    /// Exposure above which a twilight capture also stores a FIT frame
    #[serde(default = "default_fit_threshold_us")]
    pub fit_exposure_threshold_us: u64,

    #[serde(default = "default_day_policy")]
    pub day: ExposurePolicy,

    #[serde(default = "default_near_transition_policy")]
    pub near_transition: ExposurePolicy,

    #[serde(default = "default_nautical_policy")]
    pub nautical: ExposurePolicy,

    #[serde(default = "default_astronomical_policy")]
    pub astronomical: ExposurePolicy,

    #[serde(default = "default_reference_policy")]
    pub reference: ExposurePolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CombineMethod {
    Median,
    Mean,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DarksConfig {
    /// Root of the dark library
    #[serde(default = "default_darks_path")]
    pub path: String,

    /// Raw samples merged into one master
    #[serde(default = "default_dark_samples")]
    pub samples: u32,

    #[serde(default = "default_dark_exposures")]
    pub exposures_secs: Vec<u32>,

    #[serde(default = "default_dark_gains")]
    pub gains: Vec<u32>,

    /// Width of a temperature bucket (tenths of a degree C)
    #[serde(default = "default_temperature_step")]
    pub temperature_step_dc: i32,

    #[serde(default = "default_combine")]
    pub combine: CombineMethod,

    /// Pause after each raw dark capture
    #[serde(default = "default_dark_settle_ms")]
    pub settle_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    /// Root of the per-night image directories
    #[serde(default = "default_images_path")]
    pub images_path: String,

    /// Shared record of the last known good camera settings
    #[serde(default = "default_status_file")]
    pub status_file: String,

    /// File holding the shell (dome) state written by the servo controller
    #[serde(default = "default_shell_state_file")]
    pub shell_state_file: String,

    #[serde(default = "default_author")]
    pub author: String,

    #[serde(default = "default_telescope")]
    pub telescope: String,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl AllskyConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("allsky.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.driver", "asi")?
            .set_default("camera.max_exposure_us", default_max_exposure_us())?
            .set_default("camera.retry_delay_ms", default_retry_delay_ms())?
            .set_default("site.latitude", default_latitude())?
            .set_default("site.longitude", default_longitude())?
            .set_default("site.timezone", default_timezone())?
            .set_default("exposure.max_iterations", default_max_iterations())?
            .set_default("exposure.max_exposure_us", default_auto_max_exposure_us())?
            .set_default("schedule.day_interval_secs", default_day_interval())?
            .set_default("schedule.night_interval_secs", default_night_interval())?
            .set_default("schedule.reference_interval_secs", default_reference_interval())?
            .set_default("darks.path", default_darks_path())?
            .set_default("darks.samples", default_dark_samples())?
            .set_default("storage.images_path", default_images_path())?
            .set_default("storage.status_file", default_status_file())?
            .set_default("storage.shell_state_file", default_shell_state_file())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // ALLSKY_CAMERA__MAX_EXPOSURE_US=... style overrides
            .add_source(
                Environment::with_prefix("ALLSKY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: AllskyConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.max_exposure_us == 0 {
            return Err(ConfigError::Message(
                "Camera max_exposure_us must be greater than 0".to_string(),
            ));
        }

        if self.exposure.min_exposure_us == 0 || self.exposure.min_exposure_us > self.camera.max_exposure_us {
            return Err(ConfigError::Message(
                "Exposure min_exposure_us must be between 1 and camera.max_exposure_us".to_string(),
            ));
        }

        if self.exposure.max_exposure_us < self.exposure.min_exposure_us
            || self.exposure.max_exposure_us > self.camera.max_exposure_us
        {
            return Err(ConfigError::Message(
                "Exposure max_exposure_us must be between min_exposure_us and camera.max_exposure_us"
                    .to_string(),
            ));
        }

        if self.camera.default_gain > 100 {
            return Err(ConfigError::Message(
                "Camera default_gain must be within 0..=100".to_string(),
            ));
        }

        if self.exposure.max_iterations == 0 {
            return Err(ConfigError::Message(
                "Exposure max_iterations must be greater than 0".to_string(),
            ));
        }

        if !(self.exposure.saturation_trim_factor > 0.0 && self.exposure.saturation_trim_factor < 1.0) {
            return Err(ConfigError::Message(
                "Exposure saturation_trim_factor must be within (0, 1)".to_string(),
            ));
        }

        self.site.tz()?;

        let schedule = &self.schedule;
        if schedule.day_interval_secs == 0 || schedule.night_interval_secs == 0 {
            return Err(ConfigError::Message(
                "Schedule intervals must be greater than 0".to_string(),
            ));
        }

        for (name, policy) in [
            ("day", &schedule.day),
            ("near_transition", &schedule.near_transition),
            ("nautical", &schedule.nautical),
            ("astronomical", &schedule.astronomical),
            ("reference", &schedule.reference),
        ] {
            if policy.gain > 100 {
                return Err(ConfigError::Message(format!(
                    "Schedule policy {} gain must be within 0..=100",
                    name
                )));
            }
            if policy.tolerance <= 0.0 || policy.target <= 0.0 {
                return Err(ConfigError::Message(format!(
                    "Schedule policy {} target and tolerance must be positive",
                    name
                )));
            }
            if !(0.0..=1.0).contains(&policy.saturation_limit) {
                return Err(ConfigError::Message(format!(
                    "Schedule policy {} saturation_limit must be within [0, 1]",
                    name
                )));
            }
        }

        if self.darks.samples == 0 {
            return Err(ConfigError::Message(
                "Darks samples must be greater than 0".to_string(),
            ));
        }

        if self.darks.exposures_secs.is_empty() || self.darks.gains.is_empty() {
            return Err(ConfigError::Message(
                "Darks exposure and gain grids must not be empty".to_string(),
            ));
        }

        let longest_dark_us = self.darks.exposures_secs.iter().max().copied().unwrap_or(0) as u64 * 1_000_000;
        if self.darks.exposures_secs.contains(&0) || longest_dark_us > self.camera.max_exposure_us {
            return Err(ConfigError::Message(
                "Darks exposures must be between 1s and camera.max_exposure_us".to_string(),
            ));
        }

        if self.darks.gains.iter().any(|&g| g > 100) {
            return Err(ConfigError::Message(
                "Darks gains must be within 0..=100".to_string(),
            ));
        }

        if self.darks.temperature_step_dc <= 0 {
            return Err(ConfigError::Message(
                "Darks temperature_step_dc must be greater than 0".to_string(),
            ));
        }

        if self.storage.jpeg_quality == 0 || self.storage.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "Storage jpeg_quality must be within 1..=100".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for AllskyConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            site: SiteConfig::default(),
            exposure: ExposureConfig::default(),
            schedule: ScheduleConfig::default(),
            darks: DarksConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            driver: default_camera_driver(),
            index: 0,
            sdk_path: None,
            default_gain: default_camera_gain(),
            default_exposure_us: default_camera_exposure_us(),
            max_exposure_us: default_max_exposure_us(),
            wb_r: default_wb_r(),
            wb_b: default_wb_b(),
            gamma: default_gamma(),
            brightness: default_brightness(),
            capture_timeout_ms: default_capture_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            simulated_temperature_dc: default_simulated_temperature_dc(),
        }
    }
}

impl CameraConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            latitude: default_latitude(),
            longitude: default_longitude(),
            elevation_m: default_elevation(),
            timezone: default_timezone(),
        }
    }
}

impl SiteConfig {
    /// Parsed site timezone
    pub fn tz(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| ConfigError::Message(format!("Invalid site timezone '{}': {}", self.timezone, e)))
    }
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            saturation_trim_factor: default_trim_factor(),
            min_exposure_us: default_min_exposure_us(),
            max_exposure_us: default_auto_max_exposure_us(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            day_interval_secs: default_day_interval(),
            night_interval_secs: default_night_interval(),
            reference_interval_secs: default_reference_interval(),
            near_transition_hours: default_near_transition_hours(),
            fit_exposure_threshold_us: default_fit_threshold_us(),
            day: default_day_policy(),
            near_transition: default_near_transition_policy(),
            nautical: default_nautical_policy(),
            astronomical: default_astronomical_policy(),
            reference: default_reference_policy(),
        }
    }
}

impl ScheduleConfig {
    pub fn reference_interval(&self) -> Duration {
        Duration::from_secs(self.reference_interval_secs)
    }

    pub fn near_transition_window(&self) -> Duration {
        Duration::from_secs_f64(self.near_transition_hours.max(0.0) * 3600.0)
    }
}

impl Default for DarksConfig {
    fn default() -> Self {
        Self {
            path: default_darks_path(),
            samples: default_dark_samples(),
            exposures_secs: default_dark_exposures(),
            gains: default_dark_gains(),
            temperature_step_dc: default_temperature_step(),
            combine: default_combine(),
            settle_ms: default_dark_settle_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            images_path: default_images_path(),
            status_file: default_status_file(),
            shell_state_file: default_shell_state_file(),
            author: default_author(),
            telescope: default_telescope(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl StorageConfig {
    pub fn images_dir(&self) -> PathBuf {
        PathBuf::from(&self.images_path)
    }
}

// Default value functions
fn default_camera_driver() -> CameraDriverKind {
    CameraDriverKind::Asi
}
fn default_camera_gain() -> u32 {
    10
}
fn default_camera_exposure_us() -> u64 {
    1_000_000
}
fn default_max_exposure_us() -> u64 {
    60_000_000
}
fn default_wb_r() -> i64 {
    75
}
fn default_wb_b() -> i64 {
    99
}
fn default_gamma() -> i64 {
    50
}
fn default_brightness() -> i64 {
    50
}
fn default_capture_timeout_ms() -> u64 {
    10_000
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_simulated_temperature_dc() -> i32 {
    250
}

fn default_latitude() -> f64 {
    43.25916375853605
}
fn default_longitude() -> f64 {
    -6.603491884147439
}
fn default_elevation() -> f64 {
    700.0
}
fn default_timezone() -> String {
    "Europe/Madrid".to_string()
}

fn default_max_iterations() -> u32 {
    12
}
fn default_trim_factor() -> f64 {
    0.8
}
fn default_min_exposure_us() -> u64 {
    32
}
fn default_auto_max_exposure_us() -> u64 {
    10_000_000
}

fn default_day_interval() -> u64 {
    30
}
fn default_night_interval() -> u64 {
    30
}
fn default_reference_interval() -> u64 {
    120
}
fn default_near_transition_hours() -> f64 {
    1.0
}
fn default_fit_threshold_us() -> u64 {
    1_000_000
}
fn default_day_policy() -> ExposurePolicy {
    ExposurePolicy {
        gain: 0,
        target: 120.0,
        tolerance: 50.0,
        method: BrightnessMethod::Max,
        saturation_limit: 0.07,
    }
}
fn default_near_transition_policy() -> ExposurePolicy {
    default_day_policy()
}
fn default_nautical_policy() -> ExposurePolicy {
    ExposurePolicy {
        gain: 40,
        target: 120.0,
        tolerance: 50.0,
        method: BrightnessMethod::Max,
        saturation_limit: 0.07,
    }
}
fn default_astronomical_policy() -> ExposurePolicy {
    ExposurePolicy {
        gain: 60,
        target: 90.0,
        tolerance: 60.0,
        method: BrightnessMethod::Max,
        saturation_limit: 0.07,
    }
}
fn default_reference_policy() -> ExposurePolicy {
    ExposurePolicy {
        gain: 0,
        target: 120.0,
        tolerance: 50.0,
        method: BrightnessMethod::Max,
        saturation_limit: 0.04,
    }
}

fn default_darks_path() -> String {
    "./darks".to_string()
}
fn default_dark_samples() -> u32 {
    10
}
fn default_dark_exposures() -> Vec<u32> {
    (1..=20).collect()
}
fn default_dark_gains() -> Vec<u32> {
    (0..=100).step_by(10).collect()
}
fn default_temperature_step() -> i32 {
    5
}
fn default_combine() -> CombineMethod {
    CombineMethod::Median
}
fn default_dark_settle_ms() -> u64 {
    500
}

fn default_images_path() -> String {
    "./images".to_string()
}
fn default_status_file() -> String {
    "./camera_status.json".to_string()
}
fn default_shell_state_file() -> String {
    "./shell_state".to_string()
}
fn default_author() -> String {
    "CERECEDA OBS".to_string()
}
fn default_telescope() -> String {
    "ALLSKY".to_string()
}
fn default_jpeg_quality() -> u8 {
    90
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AllskyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.darks.exposures_secs.len(), 20);
        assert_eq!(config.darks.gains, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
        assert_eq!(config.schedule.nautical.gain, 40);
        assert_eq!(config.schedule.astronomical.target, 90.0);
        assert_eq!(config.schedule.reference.saturation_limit, 0.04);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
driver = "simulated"
max_exposure_us = 30000000

[exposure]
max_exposure_us = 5000000

[schedule.astronomical]
gain = 70
target = 80.0
tolerance = 40.0
method = "median"
saturation_limit = 0.05
"#
        )
        .unwrap();

        let config = AllskyConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.camera.driver, CameraDriverKind::Simulated);
        assert_eq!(config.camera.max_exposure_us, 30_000_000);
        assert_eq!(config.exposure.max_exposure_us, 5_000_000);
        assert_eq!(config.exposure.max_iterations, 12);
        assert_eq!(config.schedule.astronomical.gain, 70);
        assert_eq!(config.schedule.astronomical.method, BrightnessMethod::Median);
        assert_eq!(config.schedule.day, default_day_policy());
        assert_eq!(config.darks.samples, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AllskyConfig::default();

        config.schedule.day.saturation_limit = 1.5;
        assert!(config.validate().is_err());
        config.schedule.day.saturation_limit = 0.07;

        config.site.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
        config.site.timezone = "UTC".to_string();

        config.darks.gains.clear();
        assert!(config.validate().is_err());
        config.darks.gains = vec![0];

        config.exposure.min_exposure_us = config.camera.max_exposure_us + 1;
        assert!(config.validate().is_err());
        config.exposure.min_exposure_us = 1;

        config.darks.exposures_secs = vec![1, 90];
        assert!(config.validate().is_err());
        config.darks.exposures_secs = vec![1, 20];

        config.exposure.max_exposure_us = config.camera.max_exposure_us * 2;
        assert!(config.validate().is_err());
        config.exposure.max_exposure_us = 10_000_000;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let text = toml::to_string_pretty(&AllskyConfig::default()).unwrap();
        assert!(text.contains("[schedule.reference]"));
        assert!(text.contains("Europe/Madrid"));
    }
}
