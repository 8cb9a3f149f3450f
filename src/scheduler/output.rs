use super::policy::CaptureMode;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};

/// File-name prefix of the periodic gain 0 reference captures.
pub const REFERENCE_PREFIX: &str = "gain0_";

const NIGHT_DIR_FORMAT: &str = "%Y-%m-%d";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Where captures land: one directory per observing night under `root`.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    tz: Tz,
}

impl OutputLayout {
    pub fn new<P: Into<PathBuf>>(root: P, tz: Tz) -> Self {
        Self {
            root: root.into(),
            tz,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory named after the local date twelve hours earlier, so one
    /// night never spans two directories.
    pub fn night_dir(&self, at: DateTime<Utc>) -> PathBuf {
        let shifted = (at - ChronoDuration::hours(12)).with_timezone(&self.tz);
        self.root.join(shifted.format(NIGHT_DIR_FORMAT).to_string())
    }

    pub fn capture_path(&self, at: DateTime<Utc>, prefix: &str, mode: CaptureMode) -> PathBuf {
        let stamp = at.with_timezone(&self.tz).format(STAMP_FORMAT);
        self.night_dir(at)
            .join(format!("{}{}.{}", prefix, stamp, mode.extension()))
    }

    /// Copy of the most recent live image
    pub fn last_path(&self) -> PathBuf {
        self.root.join("last.jpg")
    }
}

/// `{stem}_corrected.jpg` next to a FIT capture.
pub fn corrected_path(fit_path: &Path) -> PathBuf {
    let stem = fit_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    fit_path.with_file_name(format!("{}_corrected.jpg", stem))
}
