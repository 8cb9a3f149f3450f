use std::fmt;
use std::path::{Path, PathBuf};

/// Which file of a calibration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SampleIndex {
    Raw(u32),
    Master,
}

impl fmt::Display for SampleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleIndex::Raw(i) => write!(f, "{}", i),
            SampleIndex::Master => f.write_str("master"),
        }
    }
}

/// Calibration conditions a dark frame was taken under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DarkFrameKey {
    /// Sensor temperature bucket, tenths of a degree C
    pub temperature_dc: i32,
    pub exposure_secs: u32,
    pub gain: u32,
}

impl DarkFrameKey {
    pub fn new(temperature_dc: i32, exposure_secs: u32, gain: u32) -> Self {
        Self {
            temperature_dc,
            exposure_secs,
            gain,
        }
    }

    /// `{root}/{temperature}/{exposure}/{gain}`
    pub fn dir(&self, root: &Path) -> PathBuf {
        root.join(self.temperature_dc.to_string())
            .join(self.exposure_secs.to_string())
            .join(self.gain.to_string())
    }

    /// `{temperature}_{gain}_{exposure}_{index}.fit`
    pub fn file_name(&self, index: SampleIndex) -> String {
        format!(
            "{}_{}_{}_{}.fit",
            self.temperature_dc, self.gain, self.exposure_secs, index
        )
    }

    pub fn path(&self, root: &Path, index: SampleIndex) -> PathBuf {
        self.dir(root).join(self.file_name(index))
    }

    pub fn master_path(&self, root: &Path) -> PathBuf {
        self.path(root, SampleIndex::Master)
    }

    pub fn exposure_us(&self) -> u64 {
        self.exposure_secs as u64 * 1_000_000
    }

    /// Parse a dark file name back into its key and index.
    pub fn parse_file_name(name: &str) -> Option<(Self, SampleIndex)> {
        let stem = name
            .strip_suffix(".fit")
            .or_else(|| name.strip_suffix(".fits"))?;
        let mut parts = stem.split('_');
        let temperature_dc = parts.next()?.parse().ok()?;
        let gain = parts.next()?.parse().ok()?;
        let exposure_secs = parts.next()?.parse().ok()?;
        let index = match parts.next()? {
            "master" => SampleIndex::Master,
            raw => SampleIndex::Raw(raw.parse().ok()?),
        };
        if parts.next().is_some() {
            return None;
        }
        Some((Self::new(temperature_dc, exposure_secs, gain), index))
    }
}

impl fmt::Display for DarkFrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TEMP {} - EXP {}s - GAIN {}",
            self.temperature_dc, self.exposure_secs, self.gain
        )
    }
}

/// Round a sensor temperature to the nearest multiple of `step` (half away from zero).
pub fn temperature_bucket(temperature_dc: i32, step: i32) -> i32 {
    let step = step.max(1);
    ((temperature_dc as f64 / step as f64).round() as i32) * step
}
