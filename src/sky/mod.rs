mod solar;
#[cfg(test)]
mod tests;

pub use solar::{sun_altitude, SolarOracle};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Ambient light regime, ordered by decreasing light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SkyPhase {
    Day,
    CivilNearTransition,
    NauticalTwilight,
    AstronomicalTwilight,
    Night,
}

impl fmt::Display for SkyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SkyPhase::Day => "day",
            SkyPhase::CivilNearTransition => "near sunrise/sunset",
            SkyPhase::NauticalTwilight => "nautical twilight",
            SkyPhase::AstronomicalTwilight => "astronomical twilight",
            SkyPhase::Night => "night",
        };
        f.write_str(name)
    }
}

/// Sun-position questions asked by the scheduler and the dark library.
///
/// All answers are pure functions of the instant and the observing site.
pub trait SkyPhaseOracle: Send + Sync {
    /// Sun below the horizon
    fn is_night(&self, at: DateTime<Utc>) -> bool;

    /// Sun at least 12 degrees below the horizon (astronomical twilight or darker)
    fn is_astronomical_twilight(&self, at: DateTime<Utc>) -> bool;

    /// Sun between 6 and 12 degrees below the horizon
    fn is_nautical_twilight(&self, at: DateTime<Utc>) -> bool;

    /// A sunrise or sunset lies within `within` of `at`
    fn is_near_sunset_or_sunrise(&self, at: DateTime<Utc>, within: Duration) -> bool;

    /// Phase reported for display and transition search
    fn phase_at(&self, at: DateTime<Utc>) -> SkyPhase;

    /// Next instant the phase changes, with the phase entered
    fn next_transition(&self, at: DateTime<Utc>) -> Option<(DateTime<Utc>, SkyPhase)>;
}

/// Phase derived from the oracle predicates, `None` when they contradict each other.
pub fn classify(oracle: &dyn SkyPhaseOracle, at: DateTime<Utc>, near_window: Duration) -> Option<SkyPhase> {
    let night = oracle.is_night(at);
    let nautical = oracle.is_nautical_twilight(at);
    let astronomical = oracle.is_astronomical_twilight(at);

    match (night, nautical, astronomical) {
        (false, false, false) => {
            if oracle.is_near_sunset_or_sunrise(at, near_window) {
                Some(SkyPhase::CivilNearTransition)
            } else {
                Some(SkyPhase::Day)
            }
        }
        (true, _, false) => Some(SkyPhase::NauticalTwilight),
        (true, false, true) => match oracle.phase_at(at) {
            SkyPhase::Night => Some(SkyPhase::Night),
            _ => Some(SkyPhase::AstronomicalTwilight),
        },
        _ => None,
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Oracle answering fixed predicates regardless of time.
    #[derive(Debug, Clone, Copy)]
    pub struct FixedOracle {
        pub night: bool,
        pub nautical: bool,
        pub astronomical: bool,
        pub near: bool,
        pub phase: SkyPhase,
    }

    impl FixedOracle {
        pub fn for_phase(phase: SkyPhase) -> Self {
            let (night, nautical, astronomical, near) = match phase {
                SkyPhase::Day => (false, false, false, false),
                SkyPhase::CivilNearTransition => (false, false, false, true),
                SkyPhase::NauticalTwilight => (true, true, false, false),
                SkyPhase::AstronomicalTwilight | SkyPhase::Night => (true, false, true, false),
            };
            Self {
                night,
                nautical,
                astronomical,
                near,
                phase,
            }
        }

        /// Daylight and astronomical darkness at once
        pub fn inconsistent() -> Self {
            Self {
                night: false,
                nautical: false,
                astronomical: true,
                near: false,
                phase: SkyPhase::Day,
            }
        }
    }

    impl SkyPhaseOracle for FixedOracle {
        fn is_night(&self, _at: DateTime<Utc>) -> bool {
            self.night
        }

        fn is_astronomical_twilight(&self, _at: DateTime<Utc>) -> bool {
            self.astronomical
        }

        fn is_nautical_twilight(&self, _at: DateTime<Utc>) -> bool {
            self.nautical
        }

        fn is_near_sunset_or_sunrise(&self, _at: DateTime<Utc>, _within: Duration) -> bool {
            self.near
        }

        fn phase_at(&self, _at: DateTime<Utc>) -> SkyPhase {
            self.phase
        }

        fn next_transition(&self, _at: DateTime<Utc>) -> Option<(DateTime<Utc>, SkyPhase)> {
            None
        }
    }
}
