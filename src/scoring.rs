//! Answer scoring
//!
//! Maps correctness and response speed to points. The function is pure
//! and deterministic: an incorrect answer is worth nothing, a correct
//! answer decays linearly from the full base points for an instant
//! response down to half the base points at the time limit.

use std::time::Duration;

/// Calculates the points earned for an answer
///
/// The response time is clamped to the question's time limit, then the
/// speed factor `1 - (t / max) / 2` is applied to the base points. A
/// correct answer therefore always lands in `[base / 2, base]`; an
/// incorrect answer always scores zero.
///
/// # Arguments
///
/// * `correct` - Whether the chosen option was the correct one
/// * `response_time` - Server-stamped time between question start and answer
/// * `max_time` - The question's time limit
/// * `base_points` - Points awarded for an instant correct answer
pub fn score(correct: bool, response_time: Duration, max_time: Duration, base_points: u64) -> u64 {
    if !correct {
        return 0;
    }

    let max_ms = max_time.as_millis().max(1) as f64;
    let taken_ms = (response_time.as_millis() as f64).min(max_ms);

    let speed_factor = 1. - (taken_ms / max_ms) / 2.;
    let points = (base_points as f64 * speed_factor) as u64;

    points.max(base_points / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::constants::session::BASE_POINTS;

    const LIMIT: Duration = Duration::from_secs(20);

    #[test]
    fn test_incorrect_scores_zero() {
        assert_eq!(score(false, Duration::ZERO, LIMIT, BASE_POINTS), 0);
        assert_eq!(score(false, LIMIT, LIMIT, BASE_POINTS), 0);
    }

    #[test]
    fn test_instant_answer_earns_base_points() {
        assert_eq!(score(true, Duration::ZERO, LIMIT, BASE_POINTS), BASE_POINTS);
    }

    #[test]
    fn test_answer_at_limit_earns_half() {
        assert_eq!(score(true, LIMIT, LIMIT, BASE_POINTS), BASE_POINTS / 2);
    }

    #[test]
    fn test_answer_past_limit_is_clamped() {
        assert_eq!(
            score(true, LIMIT * 3, LIMIT, BASE_POINTS),
            BASE_POINTS / 2
        );
    }

    #[test]
    fn test_midpoint_answer() {
        // 5000ms of 20000ms: 1000 * (1 - 0.25 / 2) = 875
        assert_eq!(
            score(true, Duration::from_millis(5000), LIMIT, BASE_POINTS),
            875
        );
    }

    #[test]
    fn test_score_is_non_increasing_in_time() {
        let mut previous = u64::MAX;
        for ms in (0..=20_000).step_by(250) {
            let points = score(true, Duration::from_millis(ms), LIMIT, BASE_POINTS);
            assert!(
                points <= previous,
                "score increased from {previous} to {points} at {ms}ms"
            );
            previous = points;
        }
    }

    #[test]
    fn test_correct_score_always_within_range() {
        for ms in (0..60_000).step_by(777) {
            let points = score(true, Duration::from_millis(ms), LIMIT, BASE_POINTS);
            assert!((BASE_POINTS / 2..=BASE_POINTS).contains(&points));
        }
    }

    #[test]
    fn test_custom_base_points() {
        assert_eq!(score(true, Duration::ZERO, LIMIT, 100), 100);
        assert_eq!(score(true, LIMIT, LIMIT, 100), 50);
    }
}
