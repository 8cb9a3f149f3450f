use super::*;
use crate::camera::{CameraHandle, CameraHandleBuilder, SimulatedCamera, SimulatedProbe, SimulatedScene};
use crate::config::{CombineMethod, DarksConfig};
use crate::error::{AllskyError, CalibrationError};
use crate::fits::{self, FitsHeader, FitsImage, FitsValue};
use crate::metadata::Identity;
use crate::shell::testing::ScriptedShell;
use crate::sky::testing::FixedOracle;
use crate::sky::SkyPhase;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn identity() -> Identity {
    Identity {
        author: "CERECEDA OBS".to_string(),
        instrument: "Simulated ASI".to_string(),
        telescope: "ALLSKY".to_string(),
    }
}

fn small_grid(root: &Path) -> DarksConfig {
    DarksConfig {
        path: root.to_string_lossy().into_owned(),
        samples: 3,
        exposures_secs: vec![1, 2],
        gains: vec![0, 10],
        temperature_step_dc: 5,
        combine: CombineMethod::Median,
        settle_ms: 100,
    }
}

async fn dark_camera(temperature_dc: i32) -> (CameraHandle, SimulatedProbe) {
    let camera = SimulatedCamera::new(SimulatedScene::dark(6, 4), temperature_dc);
    let probe = camera.probe();
    let handle = CameraHandleBuilder::new()
        .driver(Box::new(camera))
        .exposure_range(32, 30_000_000)
        .retry_delay(Duration::from_millis(10))
        .build()
        .await
        .unwrap();
    (handle, probe)
}

fn frame(width: u32, height: u32, value: u16) -> FitsImage {
    FitsImage {
        width,
        height,
        data: vec![value; (width * height) as usize],
        header: FitsHeader::new(),
    }
}

/// Write a master with a constant pixel value straight into the library layout.
async fn write_master(root: &Path, key: DarkFrameKey, value: u16) {
    let mut image = frame(4, 2, value);
    image.header.set("IMAGETYP", FitsValue::String("MASTER DARK".to_string()));
    fits::write_fits(&key.master_path(root), &image).await.unwrap();
}

fn index_with_masters(keys: &[(i32, u32, u32)]) -> DarkIndex {
    let mut index = DarkIndex::new();
    for &(t, e, g) in keys {
        index.mark_master(DarkFrameKey::new(t, e, g));
    }
    index
}

#[test]
fn test_key_layout() {
    let root = Path::new("/darks");
    let key = DarkFrameKey::new(250, 5, 30);

    assert_eq!(key.dir(root), Path::new("/darks/250/5/30"));
    assert_eq!(
        key.master_path(root),
        Path::new("/darks/250/5/30/250_30_5_master.fit")
    );
    assert_eq!(
        key.path(root, SampleIndex::Raw(7)),
        Path::new("/darks/250/5/30/250_30_5_7.fit")
    );
    assert_eq!(key.exposure_us(), 5_000_000);
}

#[test]
fn test_file_names_parse_back() {
    assert_eq!(
        DarkFrameKey::parse_file_name("250_30_5_master.fit"),
        Some((DarkFrameKey::new(250, 5, 30), SampleIndex::Master))
    );
    assert_eq!(
        DarkFrameKey::parse_file_name("-50_0_12_3.fit"),
        Some((DarkFrameKey::new(-50, 12, 0), SampleIndex::Raw(3)))
    );
    assert_eq!(DarkFrameKey::parse_file_name("250_30_5.fit"), None);
    assert_eq!(DarkFrameKey::parse_file_name("notes.txt"), None);
}

#[test]
fn test_temperature_buckets() {
    assert_eq!(temperature_bucket(253, 5), 255);
    assert_eq!(temperature_bucket(252, 5), 250);
    assert_eq!(temperature_bucket(-7, 5), -5);
    assert_eq!(temperature_bucket(-8, 5), -10);
}

#[test]
fn test_exact_key_is_returned() {
    let index = index_with_masters(&[(200, 5, 30), (200, 5, 40), (200, 6, 30), (205, 5, 30)]);
    assert_eq!(
        index.find_closest(200, 5, 30),
        Some(DarkFrameKey::new(200, 5, 30))
    );
}

#[test]
fn test_nearest_temperature_bucket() {
    let index = index_with_masters(&[(100, 5, 30), (150, 5, 30), (200, 5, 30)]);

    assert_eq!(index.find_closest(180, 5, 30).unwrap().temperature_dc, 200);
    assert_eq!(index.find_closest(160, 5, 30).unwrap().temperature_dc, 150);
    // Equal distance: the first bucket in ascending order wins
    assert_eq!(index.find_closest(175, 5, 30).unwrap().temperature_dc, 150);
    assert_eq!(index.find_closest(125, 5, 30).unwrap().temperature_dc, 100);
}

#[test]
fn test_search_is_greedy_per_dimension() {
    // Temperature 200 is nearest even though only 300 has the requested exposure
    let index = index_with_masters(&[(200, 1, 0), (300, 10, 0)]);
    assert_eq!(
        index.find_closest(240, 10, 0),
        Some(DarkFrameKey::new(200, 1, 0))
    );
}

#[test]
fn test_lookup_is_deterministic() {
    let keys = [(100, 1, 0), (100, 3, 20), (150, 2, 10), (150, 4, 10), (200, 2, 0)];
    let index = index_with_masters(&keys);
    let mut reversed = DarkIndex::new();
    for &(t, e, g) in keys.iter().rev() {
        reversed.mark_master(DarkFrameKey::new(t, e, g));
    }

    for _ in 0..3 {
        assert_eq!(index.find_closest(140, 3, 15), index.find_closest(140, 3, 15));
        assert_eq!(index.find_closest(140, 3, 15), reversed.find_closest(140, 3, 15));
    }
    assert_eq!(
        index.find_closest(140, 3, 15),
        Some(DarkFrameKey::new(150, 2, 10))
    );
}

#[test]
fn test_key_without_master_is_not_found() {
    let mut index = DarkIndex::new();
    index.insert_sample(DarkFrameKey::new(200, 5, 30), 0);
    assert_eq!(index.find_closest(200, 5, 30), None);
    assert_eq!(DarkIndex::new().find_closest(200, 5, 30), None);
}

#[test]
fn test_combine_median_and_mean() {
    let frames = [frame(2, 1, 10), frame(2, 1, 40), frame(2, 1, 13)];
    assert_eq!(combine(&frames, CombineMethod::Median).unwrap(), vec![13, 13]);
    assert_eq!(combine(&frames, CombineMethod::Mean).unwrap(), vec![21, 21]);

    let even = [frame(1, 1, 10), frame(1, 1, 13)];
    assert_eq!(combine(&even, CombineMethod::Median).unwrap(), vec![12]);

    let mismatched = [frame(2, 1, 0), frame(1, 2, 0)];
    assert!(matches!(
        combine(&mismatched, CombineMethod::Median),
        Err(CalibrationError::DimensionMismatch { .. })
    ));
}

#[tokio::test]
async fn test_scan_indexes_existing_library() {
    let dir = TempDir::new().unwrap();
    write_master(dir.path(), DarkFrameKey::new(250, 5, 30), 7).await;
    let raw = DarkFrameKey::new(250, 6, 30);
    fits::write_fits(&raw.path(dir.path(), SampleIndex::Raw(2)), &frame(4, 2, 1))
        .await
        .unwrap();
    std::fs::create_dir_all(dir.path().join("notes")).unwrap();

    let index = DarkIndex::scan(dir.path()).await.unwrap();
    assert!(index.has_master(&DarkFrameKey::new(250, 5, 30)));
    assert!(index.has_sample(&raw, 2));
    assert_eq!(index.len(), 2);
    assert_eq!(index.master_count(), 1);

    let missing = DarkIndex::scan(&dir.path().join("absent")).await.unwrap();
    assert!(missing.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_build_captures_merges_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let mut library = DarkLibrary::open(small_grid(dir.path()), identity(), chrono_tz::UTC)
        .await
        .unwrap();
    let (mut camera, probe) = dark_camera(253).await;
    let oracle = FixedOracle::for_phase(SkyPhase::Night);

    let report = library
        .build_library(&mut camera, &oracle, &ScriptedShell::closed())
        .await
        .unwrap();

    assert_eq!(report.temperature_dc, Some(255));
    assert_eq!(report.captured, 12);
    assert_eq!(report.merged, 4);
    assert_eq!(report.interrupted, None);
    assert_eq!(probe.captures(), 12);
    assert_eq!(probe.max_exposure_seen(), 2_000_000);

    for (exposure, gain) in [(1, 0), (1, 10), (2, 0), (2, 10)] {
        let key = DarkFrameKey::new(255, exposure, gain);
        assert!(key.master_path(dir.path()).exists());
        assert!(!key.path(dir.path(), SampleIndex::Raw(0)).exists());

        let master = fits::read_fits(&key.master_path(dir.path())).await.unwrap();
        assert_eq!(master.header.get_str("IMAGETYP"), Some("MASTER DARK"));
        assert_eq!(master.header.get_int("NCOMBINE"), Some(3));
        assert_eq!(master.header.get_int("GAIN"), Some(gain as i64));
        assert_eq!(master.header.get_float("EXPTIME"), Some(exposure as f64));
        assert_eq!(master.header.get_float("CCDTEMP"), Some(25.5));
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_build_captures_nothing() {
    let dir = TempDir::new().unwrap();
    let oracle = FixedOracle::for_phase(SkyPhase::AstronomicalTwilight);
    let (mut camera, probe) = dark_camera(250).await;

    let mut library = DarkLibrary::open(small_grid(dir.path()), identity(), chrono_tz::UTC)
        .await
        .unwrap();
    library
        .build_library(&mut camera, &oracle, &ScriptedShell::closed())
        .await
        .unwrap();
    let after_first = probe.captures();

    // Fresh index from disk, as after a restart
    let mut library = DarkLibrary::open(small_grid(dir.path()), identity(), chrono_tz::UTC)
        .await
        .unwrap();
    let report = library
        .build_library(&mut camera, &oracle, &ScriptedShell::closed())
        .await
        .unwrap();

    assert_eq!(report.captured, 0);
    assert_eq!(report.merged, 0);
    assert_eq!(probe.captures(), after_first);
}

#[tokio::test(start_paused = true)]
async fn test_build_requires_closed_shell_and_darkness() {
    let dir = TempDir::new().unwrap();
    let mut library = DarkLibrary::open(small_grid(dir.path()), identity(), chrono_tz::UTC)
        .await
        .unwrap();
    let (mut camera, probe) = dark_camera(250).await;

    let report = library
        .build_library(
            &mut camera,
            &FixedOracle::for_phase(SkyPhase::Night),
            &ScriptedShell::open(),
        )
        .await
        .unwrap();
    assert_eq!(report.captured, 0);
    assert!(report.interrupted.unwrap().contains("shell"));

    let report = library
        .build_library(
            &mut camera,
            &FixedOracle::for_phase(SkyPhase::NauticalTwilight),
            &ScriptedShell::closed(),
        )
        .await
        .unwrap();
    assert_eq!(report.captured, 0);
    assert!(report.interrupted.is_some());
    assert_eq!(probe.captures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_opening_shell_interrupts_and_build_resumes() {
    let dir = TempDir::new().unwrap();
    let oracle = FixedOracle::for_phase(SkyPhase::Night);
    let (mut camera, _) = dark_camera(250).await;
    let mut library = DarkLibrary::open(small_grid(dir.path()), identity(), chrono_tz::UTC)
        .await
        .unwrap();

    let shell = ScriptedShell::closed_for(4);
    let report = library
        .build_library(&mut camera, &oracle, &shell)
        .await
        .unwrap();
    assert_eq!(report.captured, 4);
    assert_eq!(shell.checks(), 5);
    assert!(report.interrupted.is_some());
    // First key complete, second holds one raw sample
    assert_eq!(report.merged, 1);
    assert!(DarkFrameKey::new(250, 1, 0).master_path(dir.path()).exists());
    assert!(DarkFrameKey::new(250, 1, 10)
        .path(dir.path(), SampleIndex::Raw(0))
        .exists());

    let report = library
        .build_library(&mut camera, &oracle, &ScriptedShell::closed())
        .await
        .unwrap();
    assert_eq!(report.captured, 8);
    assert_eq!(report.merged, 3);
    assert_eq!(library.index().master_count(), 4);
}

#[tokio::test]
async fn test_merge_covers_other_buckets_and_prunes() {
    let dir = TempDir::new().unwrap();
    let key = DarkFrameKey::new(300, 4, 20);
    for i in 0..3 {
        fits::write_fits(&key.path(dir.path(), SampleIndex::Raw(i)), &frame(4, 2, 10 + i as u16))
            .await
            .unwrap();
    }
    std::fs::create_dir_all(dir.path().join("150").join("1").join("0")).unwrap();

    let mut library = DarkLibrary::open(small_grid(dir.path()), identity(), chrono_tz::UTC)
        .await
        .unwrap();
    assert_eq!(library.merge_darks().await.unwrap(), 1);
    let pruned = library.remove_empty_dirs().await.unwrap();

    assert_eq!(pruned, 3);
    assert!(!dir.path().join("150").exists());
    let master = fits::read_fits(&key.master_path(dir.path())).await.unwrap();
    assert!(master.data.iter().all(|&v| v == 11));
    assert_eq!(library.index().len(), 1);
}

#[tokio::test]
async fn test_unreadable_raw_dark_is_discarded_and_retaken() {
    let dir = TempDir::new().unwrap();
    let key = DarkFrameKey::new(250, 1, 0);
    for i in 0..3 {
        fits::write_fits(&key.path(dir.path(), SampleIndex::Raw(i)), &frame(4, 2, 10))
            .await
            .unwrap();
    }
    let torn = key.path(dir.path(), SampleIndex::Raw(2));
    let bytes = std::fs::read(&torn).unwrap();
    std::fs::write(&torn, &bytes[..1200]).unwrap();

    let mut library = DarkLibrary::open(small_grid(dir.path()), identity(), chrono_tz::UTC)
        .await
        .unwrap();
    assert_eq!(library.merge_darks().await.unwrap(), 0);

    assert!(!torn.exists());
    assert!(!key.master_path(dir.path()).exists());
    let state = library.index().get(&key).unwrap();
    assert_eq!(state.samples.len(), 2);
    assert!(!state.master);

    // The next build only needs to retake the discarded sample
    fits::write_fits(&torn, &frame(4, 2, 10)).await.unwrap();
    let mut library = DarkLibrary::open(small_grid(dir.path()), identity(), chrono_tz::UTC)
        .await
        .unwrap();
    assert_eq!(library.merge_darks().await.unwrap(), 1);
    assert!(key.master_path(dir.path()).exists());
}

#[tokio::test]
async fn test_apply_dark_to_identical_frame_is_zero() {
    let dir = TempDir::new().unwrap();
    let key = DarkFrameKey::new(200, 5, 30);
    write_master(dir.path(), key, 1234).await;
    let library = DarkLibrary::open(small_grid(dir.path()), identity(), chrono_tz::UTC)
        .await
        .unwrap();

    let mut light = frame(4, 2, 1234);
    light.header.set("GAIN", FitsValue::Integer(30));
    light.header.set("EXPTIME", FitsValue::Float(5.4));
    light.header.set("CCDTEMP", FitsValue::Float(20.0));

    let corrected = library.apply_dark(&light).await.unwrap();
    assert_eq!(corrected.dark, key);
    assert_eq!(corrected.dark_path, key.master_path(dir.path()));
    assert!(corrected.image.data.iter().all(|&v| v == 0));
    assert_eq!(
        corrected.image.header.get_str("DARKFILE"),
        Some("200_30_5_master.fit")
    );

    light.data = vec![2000; 8];
    let corrected = library.apply_dark(&light).await.unwrap();
    assert!(corrected.image.data.iter().all(|&v| v == 766));
}

#[tokio::test]
async fn test_apply_dark_without_library_reports_unavailable() {
    let dir = TempDir::new().unwrap();
    let library = DarkLibrary::open(small_grid(dir.path()), identity(), chrono_tz::UTC)
        .await
        .unwrap();

    let mut light = frame(4, 2, 500);
    light.header.set("GAIN", FitsValue::Integer(60));
    light.header.set("EXPTIME", FitsValue::Float(12.0));
    light.header.set("CCDTEMP", FitsValue::Float(-3.5));

    let result = library.apply_dark(&light).await;
    assert!(matches!(
        result,
        Err(AllskyError::Calibration(CalibrationError::Unavailable {
            temperature_dc: -35,
            exposure_secs: 12,
            gain: 60
        }))
    ));
    assert_eq!(library.find_closest_dark(-35, 12, 60).await.unwrap(), None);
}

#[tokio::test]
async fn test_apply_dark_rejects_size_mismatch() {
    let dir = TempDir::new().unwrap();
    write_master(dir.path(), DarkFrameKey::new(200, 5, 30), 10).await;
    let library = DarkLibrary::open(small_grid(dir.path()), identity(), chrono_tz::UTC)
        .await
        .unwrap();

    let mut light = frame(8, 8, 100);
    light.header.set("GAIN", FitsValue::Integer(30));
    light.header.set("EXPTIME", FitsValue::Float(5.0));
    light.header.set("CCDTEMP", FitsValue::Float(20.0));

    assert!(matches!(
        library.apply_dark(&light).await,
        Err(AllskyError::Calibration(CalibrationError::DimensionMismatch { .. }))
    ));
}

#[tokio::test]
async fn test_sub_second_light_has_no_dark() {
    let dir = TempDir::new().unwrap();
    write_master(dir.path(), DarkFrameKey::new(200, 1, 0), 100).await;
    let library = DarkLibrary::open(small_grid(dir.path()), identity(), chrono_tz::UTC)
        .await
        .unwrap();

    let mut light = frame(4, 2, 150);
    light.header.set("GAIN", FitsValue::Integer(0));
    light.header.set("EXPTIME", FitsValue::Float(0.001));
    light.header.set("CCDTEMP", FitsValue::Float(20.0));

    assert!(matches!(
        library.apply_dark(&light).await,
        Err(AllskyError::Calibration(CalibrationError::Unavailable {
            exposure_secs: 0,
            ..
        }))
    ));

    light.header.set("EXPTIME", FitsValue::Float(1.0));
    let corrected = library.apply_dark(&light).await.unwrap();
    assert!(corrected.image.data.iter().all(|&v| v == 50));
}
