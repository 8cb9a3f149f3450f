//! ZWO ASI cameras through the vendor SDK (`libASICamera2`), loaded at runtime.

use super::driver::{CameraDriver, ControlValues};
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::{CaptureSettings, RawFrame};
use async_trait::async_trait;
use chrono::Utc;
use libloading::Library;
use std::ffi::{c_char, c_int, c_long, c_uchar};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// ASI_CAMERA_INFO from ASICamera2.h
#[repr(C)]
#[allow(dead_code)]
struct AsiCameraInfo {
    name: [c_char; 64],
    camera_id: c_int,
    max_height: c_long,
    max_width: c_long,
    is_color_cam: c_int,
    bayer_pattern: c_int,
    supported_bins: [c_int; 16],
    supported_video_format: [c_int; 8],
    pixel_size: f64,
    mechanical_shutter: c_int,
    st4_port: c_int,
    is_cooler_cam: c_int,
    is_usb3_host: c_int,
    is_usb3_camera: c_int,
    elec_per_adu: f32,
    bit_depth: c_int,
    is_trigger_cam: c_int,
    unused: [c_char; 16],
}

const ASI_FALSE: c_int = 0;

const ASI_GAIN: c_int = 0;
const ASI_EXPOSURE: c_int = 1;
const ASI_GAMMA: c_int = 2;
const ASI_WB_R: c_int = 3;
const ASI_WB_B: c_int = 4;
const ASI_OFFSET: c_int = 5;
/// Reported as 10 x degrees C
const ASI_TEMPERATURE: c_int = 8;

const ASI_IMG_RAW16: c_int = 2;

const ASI_EXP_WORKING: c_int = 1;
const ASI_EXP_SUCCESS: c_int = 2;
const ASI_EXP_FAILED: c_int = 3;

const ASI_ERROR_CAMERA_REMOVED: c_int = 5;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct AsiSdk {
    _lib: Library,
    get_num_cameras: unsafe extern "C" fn() -> c_int,
    get_camera_property: unsafe extern "C" fn(*mut AsiCameraInfo, c_int) -> c_int,
    open_camera: unsafe extern "C" fn(c_int) -> c_int,
    init_camera: unsafe extern "C" fn(c_int) -> c_int,
    close_camera: unsafe extern "C" fn(c_int) -> c_int,
    get_control_value: unsafe extern "C" fn(c_int, c_int, *mut c_long, *mut c_int) -> c_int,
    set_control_value: unsafe extern "C" fn(c_int, c_int, c_long, c_int) -> c_int,
    set_roi_format: unsafe extern "C" fn(c_int, c_int, c_int, c_int, c_int) -> c_int,
    start_exposure: unsafe extern "C" fn(c_int, c_int) -> c_int,
    stop_exposure: unsafe extern "C" fn(c_int) -> c_int,
    get_exp_status: unsafe extern "C" fn(c_int, *mut c_int) -> c_int,
    get_data_after_exp: unsafe extern "C" fn(c_int, *mut c_uchar, c_long) -> c_int,
}

static ASI_SDK: OnceLock<Result<AsiSdk, String>> = OnceLock::new();

impl AsiSdk {
    /// Load once per process; the first caller's path wins.
    fn get(explicit: Option<&str>) -> Result<&'static AsiSdk, CameraError> {
        ASI_SDK
            .get_or_init(|| Self::load(explicit))
            .as_ref()
            .map_err(|details| CameraError::SdkUnavailable {
                details: details.clone(),
            })
    }

    fn load(explicit: Option<&str>) -> Result<Self, String> {
        let candidates: Vec<String> = match explicit {
            Some(path) => vec![path.to_string()],
            None if cfg!(target_os = "macos") => vec![
                "libASICamera2.dylib".to_string(),
                "/usr/local/lib/libASICamera2.dylib".to_string(),
            ],
            None => vec![
                "libASICamera2.so".to_string(),
                "libASICamera2.so.1".to_string(),
                "/usr/lib/libASICamera2.so".to_string(),
                "/usr/local/lib/libASICamera2.so".to_string(),
            ],
        };

        let mut failures = Vec::new();
        for path in &candidates {
            debug!("Trying to load ASI SDK from: {}", path);
            match unsafe { Library::new(path) } {
                Ok(lib) => {
                    info!("Found ASI SDK at: {}", path);
                    return unsafe { Self::bind(lib) }.map_err(|e| format!("{}: {}", path, e));
                }
                Err(e) => failures.push(format!("{}: {}", path, e)),
            }
        }
        Err(failures.join("; "))
    }

    unsafe fn bind(lib: Library) -> Result<Self, libloading::Error> {
        unsafe fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Result<T, libloading::Error> {
            Ok(*lib.get::<T>(name)?)
        }

        Ok(Self {
            get_num_cameras: symbol(&lib, b"ASIGetNumOfConnectedCameras\0")?,
            get_camera_property: symbol(&lib, b"ASIGetCameraProperty\0")?,
            open_camera: symbol(&lib, b"ASIOpenCamera\0")?,
            init_camera: symbol(&lib, b"ASIInitCamera\0")?,
            close_camera: symbol(&lib, b"ASICloseCamera\0")?,
            get_control_value: symbol(&lib, b"ASIGetControlValue\0")?,
            set_control_value: symbol(&lib, b"ASISetControlValue\0")?,
            set_roi_format: symbol(&lib, b"ASISetROIFormat\0")?,
            start_exposure: symbol(&lib, b"ASIStartExposure\0")?,
            stop_exposure: symbol(&lib, b"ASIStopExposure\0")?,
            get_exp_status: symbol(&lib, b"ASIGetExpStatus\0")?,
            get_data_after_exp: symbol(&lib, b"ASIGetDataAfterExp\0")?,
            _lib: lib,
        })
    }
}

fn check(code: c_int, call: &'static str) -> Result<(), CameraError> {
    match code {
        0 => Ok(()),
        ASI_ERROR_CAMERA_REMOVED => Err(CameraError::Disconnected),
        code => Err(CameraError::Sdk { call, code }),
    }
}

pub struct AsiCamera {
    sdk: &'static AsiSdk,
    camera_id: c_int,
    name: String,
    width: u32,
    height: u32,
    settings: CaptureSettings,
    capture_timeout: Duration,
}

impl AsiCamera {
    /// Open the configured camera and apply the start-up controls.
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let sdk = AsiSdk::get(config.sdk_path.as_deref())?;

        let count = unsafe { (sdk.get_num_cameras)() };
        if count <= 0 || config.index as c_int >= count {
            warn!("No ASI camera at index {} ({} connected)", config.index, count.max(0));
            return Err(CameraError::NotFound);
        }

        let mut info: AsiCameraInfo = unsafe { std::mem::zeroed() };
        check(
            unsafe { (sdk.get_camera_property)(&mut info, config.index as c_int) },
            "ASIGetCameraProperty",
        )?;
        let camera_id = info.camera_id;
        check(unsafe { (sdk.open_camera)(camera_id) }, "ASIOpenCamera")?;
        check(unsafe { (sdk.init_camera)(camera_id) }, "ASIInitCamera")?;

        let name_bytes: Vec<u8> = info
            .name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        let name = String::from_utf8_lossy(&name_bytes).trim().to_string();
        let (width, height) = (info.max_width as u32, info.max_height as u32);

        check(
            unsafe {
                (sdk.set_roi_format)(camera_id, width as c_int, height as c_int, 1, ASI_IMG_RAW16)
            },
            "ASISetROIFormat",
        )?;

        let mut camera = Self {
            sdk,
            camera_id,
            name,
            width,
            height,
            settings: CaptureSettings::new(config.default_exposure_us, config.default_gain),
            capture_timeout: Duration::from_millis(config.capture_timeout_ms),
        };

        camera.set_control(ASI_GAIN, config.default_gain as c_long)?;
        camera.set_control(ASI_EXPOSURE, config.default_exposure_us as c_long)?;
        camera.set_control(ASI_WB_R, config.wb_r as c_long)?;
        camera.set_control(ASI_WB_B, config.wb_b as c_long)?;
        camera.set_control(ASI_GAMMA, config.gamma as c_long)?;
        camera.set_control(ASI_OFFSET, config.brightness as c_long)?;

        info!(
            "Opened {} (id {}, {}x{}, {}-bit, colour: {})",
            camera.name,
            camera_id,
            width,
            height,
            info.bit_depth,
            info.is_color_cam != 0
        );
        Ok(camera)
    }

    fn set_control(&mut self, control: c_int, value: c_long) -> Result<(), CameraError> {
        check(
            unsafe { (self.sdk.set_control_value)(self.camera_id, control, value, ASI_FALSE) },
            "ASISetControlValue",
        )
    }

    fn get_control(&self, control: c_int) -> Result<c_long, CameraError> {
        let mut value: c_long = 0;
        let mut is_auto: c_int = ASI_FALSE;
        check(
            unsafe { (self.sdk.get_control_value)(self.camera_id, control, &mut value, &mut is_auto) },
            "ASIGetControlValue",
        )?;
        Ok(value)
    }

    async fn wait_for_exposure(&self) -> Result<(), CameraError> {
        let timeout = self.settings.exposure() + self.capture_timeout;
        let deadline = Instant::now() + timeout;
        sleep(self.settings.exposure()).await;

        loop {
            let mut status: c_int = ASI_EXP_WORKING;
            check(
                unsafe { (self.sdk.get_exp_status)(self.camera_id, &mut status) },
                "ASIGetExpStatus",
            )?;
            match status {
                ASI_EXP_SUCCESS => return Ok(()),
                ASI_EXP_FAILED => {
                    return Err(CameraError::Capture {
                        details: "exposure reported failed".to_string(),
                    })
                }
                _ if Instant::now() >= deadline => {
                    unsafe { (self.sdk.stop_exposure)(self.camera_id) };
                    return Err(CameraError::FrameTimeout { timeout });
                }
                _ => sleep(POLL_INTERVAL).await,
            }
        }
    }
}

#[async_trait]
impl CameraDriver for AsiCamera {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_exposure(&mut self, exposure_us: u64) -> Result<(), CameraError> {
        self.set_control(ASI_EXPOSURE, exposure_us as c_long)?;
        self.settings = CaptureSettings::new(exposure_us, self.settings.gain);
        Ok(())
    }

    async fn set_gain(&mut self, gain: u32) -> Result<(), CameraError> {
        self.set_control(ASI_GAIN, gain as c_long)?;
        self.settings = CaptureSettings::new(self.settings.exposure_us, gain);
        Ok(())
    }

    async fn capture(&mut self) -> Result<RawFrame, CameraError> {
        check(
            unsafe { (self.sdk.start_exposure)(self.camera_id, ASI_FALSE) },
            "ASIStartExposure",
        )?;
        self.wait_for_exposure().await?;

        let mut buffer = vec![0u8; self.width as usize * self.height as usize * 2];
        check(
            unsafe {
                (self.sdk.get_data_after_exp)(self.camera_id, buffer.as_mut_ptr(), buffer.len() as c_long)
            },
            "ASIGetDataAfterExp",
        )?;
        let data = buffer
            .chunks_exact(2)
            .map(|c| u16::from_ne_bytes([c[0], c[1]]))
            .collect();
        let temperature_dc = self.get_control(ASI_TEMPERATURE)? as i32;

        debug!(
            "Captured {}x{} at {}us gain {} ({} dC)",
            self.width, self.height, self.settings.exposure_us, self.settings.gain, temperature_dc
        );
        Ok(RawFrame::new(
            self.width,
            self.height,
            data,
            temperature_dc,
            self.settings,
            Utc::now(),
        ))
    }

    async fn control_values(&mut self) -> Result<ControlValues, CameraError> {
        Ok(ControlValues {
            gain: self.get_control(ASI_GAIN)?.max(0) as u32,
            exposure_us: self.get_control(ASI_EXPOSURE)?.max(1) as u64,
            temperature_dc: self.get_control(ASI_TEMPERATURE)? as i32,
        })
    }
}

impl Drop for AsiCamera {
    fn drop(&mut self) {
        let code = unsafe { (self.sdk.close_camera)(self.camera_id) };
        if code != 0 {
            warn!("Closing camera {} returned {}", self.camera_id, code);
        }
    }
}
