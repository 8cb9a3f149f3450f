use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Highest analog gain accepted by the sensor.
pub const MAX_GAIN: u32 = 100;

/// 8-bit preview value counted as saturated.
pub const SATURATION_LEVEL: u8 = u8::MAX;

/// Exposure and analog gain applied to the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    pub exposure_us: u64,
    pub gain: u32,
}

impl CaptureSettings {
    pub fn new(exposure_us: u64, gain: u32) -> Self {
        Self {
            exposure_us: exposure_us.max(1),
            gain: gain.min(MAX_GAIN),
        }
    }

    /// Same settings with the exposure limited to `max_exposure_us`.
    pub fn clamped(self, max_exposure_us: u64) -> Self {
        Self::new(self.exposure_us.min(max_exposure_us), self.gain)
    }

    pub fn exposure(&self) -> Duration {
        Duration::from_micros(self.exposure_us)
    }

    pub fn exposure_secs(&self) -> f64 {
        self.exposure_us as f64 / 1_000_000.0
    }

    /// Half of the exposure; the sensor settle time used between captures.
    pub fn settle_time(&self) -> Duration {
        self.exposure() / 2
    }
}

/// Single-channel frame as read from the Bayer sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u16>,
    /// Sensor temperature at readout, tenths of a degree C
    pub temperature_dc: i32,
    pub settings: CaptureSettings,
    pub captured_at: DateTime<Utc>,
}

impl RawFrame {
    pub fn new(
        width: u32,
        height: u32,
        data: Vec<u16>,
        temperature_dc: i32,
        settings: CaptureSettings,
        captured_at: DateTime<Utc>,
    ) -> Self {
        debug_assert_eq!(data.len(), (width as usize) * (height as usize));
        Self {
            width,
            height,
            data,
            temperature_dc,
            settings,
            captured_at,
        }
    }
}

/// Interleaved RGB image with 16 bits per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbFrame16 {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u16>,
}

impl RgbFrame16 {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 3],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u16; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// Interleaved RGB image with 8 bits per channel, ready for JPEG encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbFrame8 {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Statistic compared against the brightness target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrightnessMethod {
    Average,
    Median,
    /// Mean brightness plus a cap on the saturated pixel fraction
    Max,
}

impl std::str::FromStr for BrightnessMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "average" | "mean" => Ok(Self::Average),
            "median" => Ok(Self::Median),
            "max" => Ok(Self::Max),
            other => Err(format!("unknown brightness method '{}'", other)),
        }
    }
}

/// Brightness of a frame on the 8-bit preview scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrightnessStats {
    pub mean: f64,
    pub median: f64,
    pub max: u8,
    /// Fraction of pixels at [`SATURATION_LEVEL`]
    pub saturated_fraction: f64,
}

impl BrightnessStats {
    pub fn measure(frame: &RawFrame) -> Self {
        let mut histogram = [0u64; 256];
        for &value in &frame.data {
            histogram[(value >> 8) as usize] += 1;
        }
        Self::from_histogram(&histogram)
    }

    fn from_histogram(histogram: &[u64; 256]) -> Self {
        let total: u64 = histogram.iter().sum();
        if total == 0 {
            return Self {
                mean: 0.0,
                median: 0.0,
                max: 0,
                saturated_fraction: 0.0,
            };
        }

        let sum: u64 = histogram
            .iter()
            .enumerate()
            .map(|(level, &count)| level as u64 * count)
            .sum();
        let max = histogram.iter().rposition(|&count| count > 0).unwrap_or(0) as u8;

        // Average of the two middle ranks for even counts
        let lower = nth_level(histogram, (total - 1) / 2);
        let upper = nth_level(histogram, total / 2);

        Self {
            mean: sum as f64 / total as f64,
            median: (lower + upper) as f64 / 2.0,
            max,
            saturated_fraction: histogram[SATURATION_LEVEL as usize] as f64 / total as f64,
        }
    }

    pub fn statistic(&self, method: BrightnessMethod) -> f64 {
        match method {
            BrightnessMethod::Average | BrightnessMethod::Max => self.mean,
            BrightnessMethod::Median => self.median,
        }
    }
}

fn nth_level(histogram: &[u64; 256], rank: u64) -> u64 {
    let mut seen = 0u64;
    for (level, &count) in histogram.iter().enumerate() {
        seen += count;
        if seen > rank {
            return level as u64;
        }
    }
    255
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_from_levels(levels: &[u8]) -> RawFrame {
        let data = levels.iter().map(|&l| (l as u16) << 8).collect::<Vec<_>>();
        RawFrame::new(
            levels.len() as u32,
            1,
            data,
            200,
            CaptureSettings::new(1000, 0),
            Utc::now(),
        )
    }

    #[test]
    fn test_settings_are_clamped() {
        let settings = CaptureSettings::new(0, 250);
        assert_eq!(settings.exposure_us, 1);
        assert_eq!(settings.gain, MAX_GAIN);

        let clamped = CaptureSettings::new(20_000_000, 10).clamped(10_000_000);
        assert_eq!(clamped.exposure_us, 10_000_000);
        assert_eq!(clamped.settle_time(), Duration::from_secs(5));
    }

    #[test]
    fn test_brightness_stats() {
        let stats = BrightnessStats::measure(&frame_from_levels(&[10, 20, 30, 255]));
        assert_eq!(stats.mean, 78.75);
        assert_eq!(stats.median, 25.0);
        assert_eq!(stats.max, 255);
        assert_eq!(stats.saturated_fraction, 0.25);
        assert_eq!(stats.statistic(BrightnessMethod::Median), 25.0);
        assert_eq!(stats.statistic(BrightnessMethod::Max), 78.75);
    }

    #[test]
    fn test_odd_count_median_and_empty_frame() {
        let stats = BrightnessStats::measure(&frame_from_levels(&[1, 200, 3]));
        assert_eq!(stats.median, 3.0);

        let empty = BrightnessStats::measure(&frame_from_levels(&[]));
        assert_eq!(empty.mean, 0.0);
        assert_eq!(empty.saturated_fraction, 0.0);
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("MAX".parse::<BrightnessMethod>(), Ok(BrightnessMethod::Max));
        assert_eq!("mean".parse::<BrightnessMethod>(), Ok(BrightnessMethod::Average));
        assert!("brightest".parse::<BrightnessMethod>().is_err());
    }
}
