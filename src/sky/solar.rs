use super::{SkyPhase, SkyPhaseOracle};
use crate::config::{ScheduleConfig, SiteConfig};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Apparent altitude of the sun's upper limb at sunrise/sunset, refraction included.
const HORIZON_DEG: f64 = -0.833;
const CIVIL_DEG: f64 = -6.0;
const NAUTICAL_DEG: f64 = -12.0;
const ASTRONOMICAL_DEG: f64 = -18.0;

/// Dip of the visible horizon per square root of metre of observer height
const DIP_DEG_PER_SQRT_M: f64 = 0.0293;

/// How far ahead transitions are searched
const SEARCH_HOURS: i64 = 36;

fn julian_day(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 86_400_000.0 + 2_440_587.5
}

/// Local sidereal time in degrees
fn local_sidereal_time(jd: f64, longitude: f64) -> f64 {
    let d = jd - 2_451_545.0;
    let t = d / 36_525.0;
    let gmst = 280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t
        - t * t * t / 38_710_000.0;
    (gmst + longitude).rem_euclid(360.0)
}

/// Sun right ascension and declination in degrees (low-precision almanac formulas).
fn sun_equatorial(jd: f64) -> (f64, f64) {
    let d = jd - 2_451_545.0;
    let mean_longitude = (280.460 + 0.985_647_4 * d).rem_euclid(360.0);
    let mean_anomaly = (357.528 + 0.985_600_3 * d).rem_euclid(360.0).to_radians();
    let ecliptic_longitude = (mean_longitude
        + 1.915 * mean_anomaly.sin()
        + 0.020 * (2.0 * mean_anomaly).sin())
    .to_radians();
    let obliquity = (23.439 - 0.000_000_4 * d).to_radians();

    let ra = (obliquity.cos() * ecliptic_longitude.sin())
        .atan2(ecliptic_longitude.cos())
        .to_degrees()
        .rem_euclid(360.0);
    let dec = (obliquity.sin() * ecliptic_longitude.sin()).asin().to_degrees();
    (ra, dec)
}

/// Altitude of the sun above the horizon in degrees.
pub fn sun_altitude(at: DateTime<Utc>, latitude: f64, longitude: f64) -> f64 {
    let jd = julian_day(at);
    let (ra, dec) = sun_equatorial(jd);
    let hour_angle = (local_sidereal_time(jd, longitude) - ra).to_radians();
    let lat = latitude.to_radians();
    let dec = dec.to_radians();

    (lat.sin() * dec.sin() + lat.cos() * dec.cos() * hour_angle.cos())
        .asin()
        .to_degrees()
}

/// Sky phase from the computed solar altitude at a fixed site.
#[derive(Debug, Clone)]
pub struct SolarOracle {
    latitude: f64,
    longitude: f64,
    near_window: Duration,
    /// Sun altitude at sunrise/sunset seen from this site
    horizon_deg: f64,
}

impl SolarOracle {
    pub fn new(latitude: f64, longitude: f64, near_window: Duration) -> Self {
        Self {
            latitude,
            longitude,
            near_window,
            horizon_deg: HORIZON_DEG,
        }
    }

    /// Lower the horizon by the dip seen from `elevation_m` above the surroundings.
    pub fn with_elevation(mut self, elevation_m: f64) -> Self {
        self.horizon_deg = HORIZON_DEG - DIP_DEG_PER_SQRT_M * elevation_m.max(0.0).sqrt();
        self
    }

    pub fn from_config(site: &SiteConfig, schedule: &ScheduleConfig) -> Self {
        Self::new(site.latitude, site.longitude, schedule.near_transition_window())
            .with_elevation(site.elevation_m)
    }

    pub fn horizon_deg(&self) -> f64 {
        self.horizon_deg
    }

    pub fn altitude(&self, at: DateTime<Utc>) -> f64 {
        sun_altitude(at, self.latitude, self.longitude)
    }

    fn horizon_crossed_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        let step = ChronoDuration::minutes(5);
        let mut t = from;
        let mut above = self.altitude(t) >= self.horizon_deg;
        while t < to {
            t = (t + step).min(to);
            let now_above = self.altitude(t) >= self.horizon_deg;
            if now_above != above {
                return true;
            }
            above = now_above;
        }
        false
    }
}

impl SkyPhaseOracle for SolarOracle {
    fn is_night(&self, at: DateTime<Utc>) -> bool {
        self.altitude(at) < self.horizon_deg
    }

    fn is_astronomical_twilight(&self, at: DateTime<Utc>) -> bool {
        self.altitude(at) < NAUTICAL_DEG
    }

    fn is_nautical_twilight(&self, at: DateTime<Utc>) -> bool {
        let altitude = self.altitude(at);
        (NAUTICAL_DEG..CIVIL_DEG).contains(&altitude)
    }

    fn is_near_sunset_or_sunrise(&self, at: DateTime<Utc>, within: Duration) -> bool {
        let window = ChronoDuration::from_std(within).unwrap_or_else(|_| ChronoDuration::hours(1));
        self.horizon_crossed_between(at - window, at + window)
    }

    fn phase_at(&self, at: DateTime<Utc>) -> SkyPhase {
        let altitude = self.altitude(at);
        if altitude < ASTRONOMICAL_DEG {
            SkyPhase::Night
        } else if altitude < NAUTICAL_DEG {
            SkyPhase::AstronomicalTwilight
        } else if altitude < self.horizon_deg {
            SkyPhase::NauticalTwilight
        } else if self.is_near_sunset_or_sunrise(at, self.near_window) {
            SkyPhase::CivilNearTransition
        } else {
            SkyPhase::Day
        }
    }

    fn next_transition(&self, at: DateTime<Utc>) -> Option<(DateTime<Utc>, SkyPhase)> {
        let current = self.phase_at(at);
        let step = ChronoDuration::minutes(1);
        let end = at + ChronoDuration::hours(SEARCH_HOURS);

        let mut before = at;
        while before < end {
            let after = before + step;
            let phase = self.phase_at(after);
            if phase != current {
                // Bisect to one second
                let (mut lo, mut hi) = (before, after);
                while hi - lo > ChronoDuration::seconds(1) {
                    let mid = lo + (hi - lo) / 2;
                    if self.phase_at(mid) == current {
                        lo = mid;
                    } else {
                        hi = mid;
                    }
                }
                return Some((hi, self.phase_at(hi)));
            }
            before = after;
        }
        None
    }
}
