use super::index::DarkIndex;
use super::key::{temperature_bucket, DarkFrameKey, SampleIndex};
use super::master::combine;
use crate::camera::CameraHandle;
use crate::config::{CombineMethod, DarksConfig};
use crate::error::{CalibrationError, Result};
use crate::fits::{self, FitsHeader, FitsImage, FitsValue};
use crate::frame::CaptureSettings;
use crate::metadata::{CaptureMetadata, Identity};
use crate::shell::ShellState;
use crate::sky::SkyPhaseOracle;
use chrono::Utc;
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// What one library build did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Temperature bucket the capture pass worked on
    pub temperature_dc: Option<i32>,
    pub captured: usize,
    pub merged: usize,
    pub pruned_dirs: usize,
    /// Why the capture pass stopped early, if it did
    pub interrupted: Option<String>,
}

/// Light frame with the matching dark subtracted.
#[derive(Debug, Clone, PartialEq)]
pub struct DarkCorrection {
    pub image: FitsImage,
    pub dark: DarkFrameKey,
    pub dark_path: PathBuf,
}

/// Calibration frames indexed by (temperature, exposure, gain).
pub struct DarkLibrary {
    root: PathBuf,
    config: DarksConfig,
    identity: Identity,
    tz: Tz,
    index: DarkIndex,
}

impl DarkLibrary {
    /// Scan the library root once and keep the result as the lookup index.
    pub async fn open(config: DarksConfig, identity: Identity, tz: Tz) -> Result<Self> {
        let root = PathBuf::from(&config.path);
        let index = DarkIndex::scan(&root).await?;
        info!(
            "Dark library {} holds {} masters",
            root.display(),
            index.master_count()
        );
        Ok(Self {
            root,
            config,
            identity,
            tz,
            index,
        })
    }

    pub fn index(&self) -> &DarkIndex {
        &self.index
    }

    /// Capture missing raw darks for the current sensor temperature, merge
    /// complete keys into masters and prune empty directories.
    ///
    /// Capturing requires a closed shell and astronomical darkness; both are
    /// checked before every exposure and losing either stops the capture pass.
    /// Merging and pruning run regardless.
    pub async fn build_library(
        &mut self,
        camera: &mut CameraHandle,
        oracle: &dyn SkyPhaseOracle,
        shell: &dyn ShellState,
    ) -> Result<BuildReport> {
        let mut report = BuildReport::default();

        let temperature_dc = temperature_bucket(
            camera.temperature_dc().await?,
            self.config.temperature_step_dc,
        );
        report.temperature_dc = Some(temperature_dc);
        info!("Building dark library for temperature bucket {}", temperature_dc);

        if let Some(reason) = self
            .capture_pass(camera, oracle, shell, temperature_dc, &mut report)
            .await?
        {
            warn!("Dark capture stopped: {}", reason);
            report.interrupted = Some(reason.to_string());
        }

        report.merged = self.merge_darks().await?;
        report.pruned_dirs = self.remove_empty_dirs().await?;

        info!(
            "Dark library build done: {} captured, {} merged, {} directories pruned",
            report.captured, report.merged, report.pruned_dirs
        );
        Ok(report)
    }

    async fn capture_pass(
        &mut self,
        camera: &mut CameraHandle,
        oracle: &dyn SkyPhaseOracle,
        shell: &dyn ShellState,
        temperature_dc: i32,
        report: &mut BuildReport,
    ) -> Result<Option<CalibrationError>> {
        let settle = Duration::from_millis(self.config.settle_ms);
        let exposures = self.config.exposures_secs.clone();
        let gains = self.config.gains.clone();

        for &exposure_secs in &exposures {
            for &gain in &gains {
                let key = DarkFrameKey::new(temperature_dc, exposure_secs, gain);
                if self.index.has_master(&key) {
                    continue;
                }

                for i in 0..self.config.samples {
                    if self.index.has_sample(&key, i) {
                        continue;
                    }
                    if let Err(stop) = capture_conditions(oracle, shell).await {
                        return Ok(Some(stop));
                    }

                    debug!("Taking dark for {} ---> {}", key, i);
                    camera
                        .apply(CaptureSettings::new(key.exposure_us(), gain))
                        .await?;
                    let frame = camera.capture().await?;
                    let metadata = CaptureMetadata::describe(&frame, &self.identity, self.tz);
                    let image = FitsImage {
                        width: frame.width,
                        height: frame.height,
                        data: frame.data,
                        header: FitsHeader::with_metadata(&metadata),
                    };
                    fits::write_fits(&key.path(&self.root, SampleIndex::Raw(i)), &image).await?;
                    self.index.insert_sample(key, i);
                    report.captured += 1;

                    sleep(settle).await;
                }
            }
        }

        Ok(None)
    }

    /// Merge every key holding enough raw samples into a master and delete the samples.
    ///
    /// Covers all temperature buckets, not only the one just captured. Raw
    /// samples that cannot be read are deleted so the next build retakes them.
    pub async fn merge_darks(&mut self) -> Result<usize> {
        let needed = (self.config.samples as usize).max(1);
        let ready: Vec<(DarkFrameKey, Vec<u32>)> = self
            .index
            .iter()
            .filter(|(_, state)| !state.master && state.samples.len() >= needed)
            .map(|(key, state)| (key, state.samples.iter().copied().collect()))
            .collect();

        let mut merged = 0;
        for (key, samples) in &ready {
            info!("Merging {} darks for {}", samples.len(), key);
            let mut frames = Vec::with_capacity(samples.len());
            let mut readable = Vec::with_capacity(samples.len());
            for &i in samples {
                let path = key.path(&self.root, SampleIndex::Raw(i));
                match fits::read_fits(&path).await {
                    Ok(frame) => {
                        frames.push(frame);
                        readable.push(i);
                    }
                    Err(e) => {
                        warn!("Discarding unreadable raw dark {}: {}", path.display(), e);
                        if let Err(e) = fs::remove_file(&path).await {
                            warn!("Could not remove raw dark {}: {}", path.display(), e);
                        }
                        self.index.remove_sample(key, i);
                    }
                }
            }
            if frames.len() < needed {
                warn!(
                    "Only {} of {} darks usable for {}, leaving it for the next build",
                    frames.len(),
                    needed,
                    key
                );
                continue;
            }

            let data = combine(&frames, self.config.combine)?;
            let master = FitsImage {
                width: frames[0].width,
                height: frames[0].height,
                data,
                header: self.master_header(key, frames.len()),
            };
            let master_path = key.master_path(&self.root);
            fits::write_fits(&master_path, &master).await?;
            self.index.mark_master(*key);
            info!("Created master file {}", master_path.display());

            for &i in &readable {
                let path = key.path(&self.root, SampleIndex::Raw(i));
                if let Err(e) = fs::remove_file(&path).await {
                    warn!("Could not remove raw dark {}: {}", path.display(), e);
                }
            }
            self.index.clear_samples(key);
            merged += 1;
        }

        Ok(merged)
    }

    fn master_header(&self, key: &DarkFrameKey, combined: usize) -> FitsHeader {
        let metadata = CaptureMetadata::new(
            CaptureSettings::new(key.exposure_us(), key.gain),
            key.temperature_dc,
            Utc::now(),
            &self.identity,
            self.tz,
        );
        let mut header = FitsHeader::with_metadata(&metadata);
        header.set("IMAGETYP", FitsValue::String("MASTER DARK".to_string()));
        header.set("NCOMBINE", FitsValue::Integer(combined as i64));
        let method = match self.config.combine {
            CombineMethod::Median => "median",
            CombineMethod::Mean => "mean",
        };
        header.set("COMBTYPE", FitsValue::String(method.to_string()));
        header
    }

    /// Remove directories left without files, deepest first.
    pub async fn remove_empty_dirs(&mut self) -> Result<usize> {
        let removed = if fs::try_exists(&self.root).await? {
            prune_empty_dirs(&self.root).await?
        } else {
            0
        };
        self.index.prune();
        Ok(removed)
    }

    /// Master path of the greedy nearest key, if that master exists on disk.
    pub async fn find_closest_dark(
        &self,
        temperature_dc: i32,
        exposure_secs: u32,
        gain: u32,
    ) -> Result<Option<PathBuf>> {
        Ok(self
            .closest_master(temperature_dc, exposure_secs, gain)
            .await?
            .map(|(_, path)| path))
    }

    async fn closest_master(
        &self,
        temperature_dc: i32,
        exposure_secs: u32,
        gain: u32,
    ) -> Result<Option<(DarkFrameKey, PathBuf)>> {
        let Some(key) = self.index.find_closest(temperature_dc, exposure_secs, gain) else {
            return Ok(None);
        };
        let path = key.master_path(&self.root);
        if fs::try_exists(&path).await? {
            debug!(
                "Closest dark to {}/{}/{} is {}",
                temperature_dc,
                exposure_secs,
                gain,
                path.display()
            );
            Ok(Some((key, path)))
        } else {
            warn!("Indexed master {} is missing on disk", path.display());
            Ok(None)
        }
    }

    /// Subtract the closest master dark from a light frame, pixel by pixel.
    ///
    /// The lookup uses the light's `CCDTEMP` rounded to tenths of a degree and
    /// `EXPTIME` truncated to whole seconds; frames shorter than a second have
    /// no dark. No exposure scaling is applied; differences below zero clip to zero.
    pub async fn apply_dark(&self, light: &FitsImage) -> Result<DarkCorrection> {
        let metadata = light.header.metadata()?;
        let temperature_dc = metadata.temperature_dc();
        let exposure_secs = metadata.exposure_secs.max(0.0) as u32;
        let gain = metadata.gain;

        // Sub-second frames carry too little dark current to correct.
        if exposure_secs == 0 {
            return Err(CalibrationError::Unavailable {
                temperature_dc,
                exposure_secs,
                gain,
            }
            .into());
        }

        debug!(
            "Looking for dark for TEMP {} - EXP {} - GAIN {}",
            temperature_dc, exposure_secs, gain
        );
        let (dark_key, dark_path) = self
            .closest_master(temperature_dc, exposure_secs, gain)
            .await?
            .ok_or(CalibrationError::Unavailable {
                temperature_dc,
                exposure_secs,
                gain,
            })?;

        let dark = fits::read_fits(&dark_path).await?;
        if dark.width != light.width || dark.height != light.height {
            return Err(CalibrationError::DimensionMismatch {
                light_width: light.width,
                light_height: light.height,
                dark_width: dark.width,
                dark_height: dark.height,
            }
            .into());
        }

        let data = light
            .data
            .iter()
            .zip(&dark.data)
            .map(|(&l, &d)| l.saturating_sub(d))
            .collect();

        let mut header = light.header.clone();
        let dark_name = dark_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        header.set("DARKFILE", FitsValue::String(dark_name));

        Ok(DarkCorrection {
            image: FitsImage {
                width: light.width,
                height: light.height,
                data,
                header,
            },
            dark: dark_key,
            dark_path,
        })
    }
}

async fn capture_conditions(
    oracle: &dyn SkyPhaseOracle,
    shell: &dyn ShellState,
) -> std::result::Result<(), CalibrationError> {
    if !shell.is_closed().await {
        return Err(CalibrationError::ConditionsNotMet {
            reason: "shell is open".to_string(),
        });
    }
    if !oracle.is_astronomical_twilight(Utc::now()) {
        return Err(CalibrationError::ConditionsNotMet {
            reason: "sky is not in astronomical darkness".to_string(),
        });
    }
    Ok(())
}

/// Remove directories below `root` that hold nothing, deepest first.
async fn prune_empty_dirs(root: &Path) -> Result<usize> {
    let mut dirs = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                pending.push(entry.path());
                dirs.push(entry.path());
            }
        }
    }

    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    let mut removed = 0;
    for dir in dirs {
        let mut entries = fs::read_dir(&dir).await?;
        if entries.next_entry().await?.is_none() {
            debug!("Removing empty folder {}", dir.display());
            fs::remove_dir(&dir).await?;
            removed += 1;
        }
    }
    Ok(removed)
}
