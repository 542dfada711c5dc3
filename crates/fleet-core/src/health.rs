//! Drone fitness scoring
//!
//! A drone scores well only when it is both charged and proven: a full
//! battery on a drone with no completed missions scores zero, as does a
//! veteran drone with an empty battery.

/// Mission count at which a drone counts as fully proven
pub const PROVEN_MISSION_COUNT: u32 = 200;

/// Compute the 0-100 health score from battery percentage and completed missions.
///
/// The arithmetic is performed in `f64` in a fixed order and rounded half
/// away from zero so scores match the backend's published values exactly.
pub fn score(battery: u8, missions_completed: u32) -> u8 {
    let normalized_missions =
        (missions_completed as f64 / PROVEN_MISSION_COUNT as f64).min(1.0) * 100.0;
    let raw = (battery as f64 * normalized_missions) / 100.0;
    raw.round().clamp(0.0, 100.0) as u8
}

/// Zero-sized scorer for call sites that want a value rather than a free function
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthScorer;

impl HealthScorer {
    pub fn score(&self, battery: u8, missions_completed: u32) -> u8 {
        score(battery, missions_completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_battery_scores_zero() {
        for missions in [0, 1, 50, 200, 10_000] {
            assert_eq!(score(0, missions), 0);
        }
    }

    #[test]
    fn test_full_and_proven_scores_hundred() {
        assert_eq!(score(100, 200), 100);
        assert_eq!(score(100, 5_000), 100);
    }

    #[test]
    fn test_unproven_drone_scores_zero() {
        assert_eq!(score(100, 0), 0);
    }

    #[test]
    fn test_rounding() {
        // 75 * 50 / 100 = 37.5 -> 38
        assert_eq!(score(75, 100), 38);
        // 33 * 1.5 / 100 = 0.495 -> 0
        assert_eq!(score(33, 3), 0);
        // 80 * 60.5 / 100 = 48.4 -> 48
        assert_eq!(score(80, 121), 48);
    }

    #[test]
    fn test_monotonic_in_both_inputs() {
        for battery in (0..=100u8).step_by(5) {
            let mut previous = 0;
            for missions in 0..=200u32 {
                let s = score(battery, missions);
                assert!(s >= previous, "missions monotonic at {battery}/{missions}");
                assert!(s <= 100);
                previous = s;
            }
        }
        for missions in (0..=200u32).step_by(10) {
            let mut previous = 0;
            for battery in 0..=100u8 {
                let s = score(battery, missions);
                assert!(s >= previous, "battery monotonic at {battery}/{missions}");
                previous = s;
            }
        }
    }

    #[test]
    fn test_scorer_value_matches_function() {
        assert_eq!(HealthScorer.score(90, 180), score(90, 180));
    }
}
