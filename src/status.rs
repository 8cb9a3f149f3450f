//! Last known good camera settings, shared with other processes through a
//! versioned JSON snapshot.
//!
//! Writers replace the whole file by renaming a freshly written sibling, and
//! readers reject anything whose version or checksum does not match, so a torn
//! or hand-edited record degrades to "no prior state".

use crate::error::Result;
use crate::frame::CaptureSettings;
use crate::metadata::{CaptureMetadata, Identity};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub type CameraStatusRecord = CaptureMetadata;

/// Format version written into every snapshot.
pub const STATUS_VERSION: u32 = 1;

const CHECKSUM: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, Serialize, Deserialize)]
struct StatusSnapshot {
    #[serde(rename = "VERSION")]
    version: u32,
    #[serde(flatten)]
    record: CameraStatusRecord,
    #[serde(rename = "CHECKSUM")]
    checksum: u32,
}

/// Checksum over a fixed textual rendering of the record, independent of JSON float formatting.
pub fn record_checksum(record: &CameraStatusRecord) -> u32 {
    let canonical = format!(
        "{}|{:.6}|{:.2}|{}|{}|{}|{}",
        record.gain,
        record.exposure_secs,
        record.ccd_temp_c,
        record.date,
        record.author,
        record.instrument,
        record.telescope
    );
    CHECKSUM.checksum(canonical.as_bytes())
}

#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record; missing, torn or mismatching content yields `None`.
    pub async fn load(&self) -> Option<CameraStatusRecord> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No status record at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Cannot read status record {}: {}", self.path.display(), e);
                return None;
            }
        };

        match parse_snapshot(&bytes) {
            Ok(record) => Some(record),
            Err(reason) => {
                warn!(
                    "Ignoring malformed status record {}: {}",
                    self.path.display(),
                    reason
                );
                None
            }
        }
    }

    /// Atomically replace the record.
    pub async fn save(&self, record: &CameraStatusRecord) -> Result<()> {
        let snapshot = StatusSnapshot {
            version: STATUS_VERSION,
            record: record.clone(),
            checksum: record_checksum(record),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!(
            "Saved status record gain={} exptime={}s to {}",
            record.gain,
            record.exposure_secs,
            self.path.display()
        );
        Ok(())
    }
}

/// Stamps settings with the rig identity and local time before storing them.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    store: StatusStore,
    identity: Identity,
    tz: Tz,
}

impl StatusPublisher {
    pub fn new(store: StatusStore, identity: Identity, tz: Tz) -> Self {
        Self {
            store,
            identity,
            tz,
        }
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub async fn publish(
        &self,
        settings: CaptureSettings,
        temperature_dc: i32,
        at: DateTime<Utc>,
    ) -> Result<CameraStatusRecord> {
        let record = CaptureMetadata::new(settings, temperature_dc, at, &self.identity, self.tz);
        self.store.save(&record).await?;
        Ok(record)
    }
}

fn parse_snapshot(bytes: &[u8]) -> std::result::Result<CameraStatusRecord, String> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err("empty file".to_string());
    }
    let snapshot: StatusSnapshot = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    if snapshot.version != STATUS_VERSION {
        return Err(format!("unsupported version {}", snapshot.version));
    }
    let expected = record_checksum(&snapshot.record);
    if snapshot.checksum != expected {
        return Err(format!(
            "checksum mismatch (stored {:08x}, computed {:08x})",
            snapshot.checksum, expected
        ));
    }
    if !(snapshot.record.exposure_secs.is_finite() && snapshot.record.exposure_secs > 0.0) {
        return Err(format!("invalid EXPTIME {}", snapshot.record.exposure_secs));
    }
    Ok(snapshot.record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CameraStatusRecord {
        CameraStatusRecord {
            gain: 40,
            exposure_secs: 1.25,
            ccd_temp_c: 18.3,
            date: "02/07/2024 00:05:09".to_string(),
            author: "CERECEDA OBS".to_string(),
            instrument: "ZWO ASI224MC".to_string(),
            telescope: "ALLSKY".to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("status").join("camera.json"));

        store.save(&record()).await.unwrap();
        assert_eq!(store.load().await, Some(record()));
        assert!(!dir.path().join("status").join("camera.json.tmp").exists());

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\"EXPTIME\": 1.25"));
        assert!(text.contains("\"VERSION\": 1"));
    }

    #[tokio::test]
    async fn test_missing_and_empty_records_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("camera.json"));
        assert_eq!(store.load().await, None);

        std::fs::write(store.path(), "").unwrap();
        assert_eq!(store.load().await, None);

        std::fs::write(store.path(), "{\"GAIN\": 4").unwrap();
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn test_tampered_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("camera.json"));
        store.save(&record()).await.unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        std::fs::write(store.path(), text.replace("\"GAIN\": 40", "\"GAIN\": 41")).unwrap();
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn test_unversioned_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("camera.json"));
        let legacy = serde_json::to_string(&record()).unwrap();
        std::fs::write(store.path(), legacy).unwrap();
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn test_publisher_stamps_identity_and_local_time() {
        use chrono::TimeZone;

        let dir = tempfile::tempdir().unwrap();
        let identity = Identity {
            author: "CERECEDA OBS".to_string(),
            instrument: "Simulated ASI".to_string(),
            telescope: "ALLSKY".to_string(),
        };
        let publisher = StatusPublisher::new(
            StatusStore::new(dir.path().join("camera.json")),
            identity,
            chrono_tz::Europe::Madrid,
        );

        let at = Utc.with_ymd_and_hms(2024, 1, 15, 23, 30, 0).unwrap();
        let written = publisher
            .publish(CaptureSettings::new(2_000_000, 60), -52, at)
            .await
            .unwrap();

        assert_eq!(written.date, "16/01/2024 00:30:00");
        assert_eq!(written.ccd_temp_c, -5.2);
        assert_eq!(publisher.store().load().await, Some(written));
    }
}
