use super::testing::FixedOracle;
use super::*;
use approx::assert_abs_diff_eq;
use chrono::TimeZone;

const LATITUDE: f64 = 43.25916375853605;
const LONGITUDE: f64 = -6.603491884147439;

fn oracle() -> SolarOracle {
    SolarOracle::new(LATITUDE, LONGITUDE, Duration::from_secs(3600))
}

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

#[test]
fn test_sun_altitude_reference_points() {
    assert_abs_diff_eq!(
        sun_altitude(utc(2024, 6, 21, 12, 28), LATITUDE, LONGITUDE),
        70.17,
        epsilon = 0.05
    );
    assert_abs_diff_eq!(
        sun_altitude(utc(2024, 6, 21, 21, 0), LATITUDE, LONGITUDE),
        -7.93,
        epsilon = 0.05
    );
    assert_abs_diff_eq!(
        sun_altitude(utc(2024, 12, 21, 0, 28), LATITUDE, LONGITUDE),
        -70.16,
        epsilon = 0.05
    );
}

#[test]
fn test_predicates_through_a_summer_evening() {
    let oracle = oracle();

    let noon = utc(2024, 6, 21, 12, 28);
    assert!(!oracle.is_night(noon));
    assert!(!oracle.is_nautical_twilight(noon));
    assert!(!oracle.is_astronomical_twilight(noon));
    assert!(!oracle.is_near_sunset_or_sunrise(noon, Duration::from_secs(3600)));

    let dusk = utc(2024, 6, 21, 21, 0);
    assert!(oracle.is_night(dusk));
    assert!(oracle.is_nautical_twilight(dusk));
    assert!(!oracle.is_astronomical_twilight(dusk));

    let late = utc(2024, 6, 21, 22, 0);
    assert!(oracle.is_night(late));
    assert!(!oracle.is_nautical_twilight(late));
    assert!(oracle.is_astronomical_twilight(late));
}

#[test]
fn test_near_window_brackets_sunset() {
    let oracle = oracle();
    let before_sunset = utc(2024, 6, 21, 19, 30);

    assert!(oracle.is_near_sunset_or_sunrise(before_sunset, Duration::from_secs(3600)));
    assert!(!oracle.is_near_sunset_or_sunrise(before_sunset, Duration::from_secs(1800)));
}

#[test]
fn test_phase_sequence() {
    let oracle = oracle();
    let expected = [
        (utc(2024, 6, 21, 12, 28), SkyPhase::Day),
        (utc(2024, 6, 21, 19, 30), SkyPhase::CivilNearTransition),
        (utc(2024, 6, 21, 20, 30), SkyPhase::NauticalTwilight),
        (utc(2024, 6, 21, 21, 0), SkyPhase::NauticalTwilight),
        (utc(2024, 6, 21, 22, 0), SkyPhase::AstronomicalTwilight),
        (utc(2024, 6, 21, 23, 0), SkyPhase::Night),
    ];

    for (at, phase) in expected {
        assert_eq!(oracle.phase_at(at), phase, "phase at {}", at);
        assert_eq!(
            classify(&oracle, at, Duration::from_secs(3600)),
            Some(phase),
            "classified at {}",
            at
        );
    }
}

#[test]
fn test_next_transition() {
    let oracle = oracle();

    let (at, phase) = oracle.next_transition(utc(2024, 6, 21, 22, 0)).unwrap();
    assert_eq!(phase, SkyPhase::Night);
    assert_eq!(at.format("%H:%M").to_string(), "22:30");

    let (at, phase) = oracle.next_transition(utc(2024, 6, 21, 12, 28)).unwrap();
    assert_eq!(phase, SkyPhase::CivilNearTransition);
    assert_eq!(at.format("%H:%M").to_string(), "19:10");
}

#[test]
fn test_phases_are_ordered_by_decreasing_light() {
    assert!(SkyPhase::Day < SkyPhase::CivilNearTransition);
    assert!(SkyPhase::NauticalTwilight < SkyPhase::AstronomicalTwilight);
    assert!(SkyPhase::AstronomicalTwilight < SkyPhase::Night);
}

#[test]
fn test_classify_fixed_predicates() {
    let at = utc(2024, 1, 1, 0, 0);
    let window = Duration::from_secs(3600);

    for phase in [
        SkyPhase::Day,
        SkyPhase::CivilNearTransition,
        SkyPhase::NauticalTwilight,
        SkyPhase::AstronomicalTwilight,
        SkyPhase::Night,
    ] {
        assert_eq!(classify(&FixedOracle::for_phase(phase), at, window), Some(phase));
    }
}

#[test]
fn test_classify_rejects_contradictions() {
    let at = utc(2024, 1, 1, 0, 0);
    let window = Duration::from_secs(3600);

    assert_eq!(classify(&FixedOracle::inconsistent(), at, window), None);

    let both_twilights = FixedOracle {
        night: true,
        nautical: true,
        astronomical: true,
        near: false,
        phase: SkyPhase::Night,
    };
    assert_eq!(classify(&both_twilights, at, window), None);
}

#[test]
fn test_site_elevation_lowers_the_horizon() {
    let plain = oracle();
    let elevated = oracle().with_elevation(700.0);
    assert_abs_diff_eq!(elevated.horizon_deg(), -0.833 - 0.0293 * 700f64.sqrt(), epsilon = 1e-9);
    assert_abs_diff_eq!(oracle().with_elevation(0.0).horizon_deg(), -0.833, epsilon = 1e-9);

    // First minute after sunset seen from sea level
    let mut t = utc(2024, 6, 21, 20, 0);
    while plain.altitude(t) >= -1.0 {
        t += chrono::Duration::minutes(1);
    }
    assert!(plain.is_night(t));
    assert!(!elevated.is_night(t));
    assert_eq!(plain.phase_at(t), SkyPhase::NauticalTwilight);
    assert_ne!(elevated.phase_at(t), SkyPhase::NauticalTwilight);
}
