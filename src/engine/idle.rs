use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};

/// Tracks recency and diversity of user activity.
///
/// Idle state is a plain threshold on time since the last recorded activity.
/// Activity intensity measures how quickly the user is switching contexts,
/// which the scorer reads as an inverse proxy for focus.
pub struct IdleDetector {
    idle_threshold: Duration,
    activity_window: Duration,
    history_capacity: usize,
    last_activity: DateTime<Utc>,
    history: VecDeque<(DateTime<Utc>, String)>,
}

impl IdleDetector {
    pub fn new(
        idle_threshold_secs: i64,
        activity_window_secs: i64,
        history_capacity: usize,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            idle_threshold: Duration::seconds(idle_threshold_secs.max(0)),
            activity_window: Duration::seconds(activity_window_secs.max(0)),
            history_capacity: history_capacity.max(1),
            last_activity: started_at,
            history: VecDeque::new(),
        }
    }

    /// Record one unit of user activity. Called once per raw observation
    /// regardless of dedup outcome: a repeated context still proves the user
    /// is active.
    pub fn record_activity(&mut self, window_title: &str, at: DateTime<Utc>) {
        if self.history.len() >= self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back((at, window_title.to_string()));
        self.last_activity = at;
    }

    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        now - self.last_activity > self.idle_threshold
    }

    /// Seconds since the last activity, clamped non-negative.
    pub fn idle_duration_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_activity).num_seconds().max(0)
    }

    /// Activity intensity in [0, 1]: the fraction of up-to-10 unique window
    /// titles seen inside the trailing window. Returns 0 with fewer than two
    /// events, since switching behavior cannot be inferred from one sample.
    pub fn activity_intensity(&self, now: DateTime<Utc>) -> f64 {
        let cutoff = now - self.activity_window;
        let recent: Vec<&(DateTime<Utc>, String)> = self
            .history
            .iter()
            .filter(|(at, _)| *at >= cutoff)
            .collect();

        if recent.len() < 2 {
            return 0.0;
        }

        let unique: HashSet<&str> = recent
            .iter()
            .filter(|(_, title)| !title.is_empty())
            .map(|(_, title)| title.as_str())
            .collect();

        (unique.len() as f64 / 10.0).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn detector() -> IdleDetector {
        IdleDetector::new(120, 60, 100, base())
    }

    #[test]
    fn not_idle_at_start() {
        let detector = detector();
        assert!(!detector.is_idle(base() + Duration::seconds(60)));
        assert!(detector.is_idle(base() + Duration::seconds(121)));
    }

    #[test]
    fn activity_resets_idle_clock() {
        let mut detector = detector();
        detector.record_activity("editor", base() + Duration::seconds(200));

        assert!(!detector.is_idle(base() + Duration::seconds(250)));
        assert_eq!(detector.idle_duration_secs(base() + Duration::seconds(260)), 60);
    }

    #[test]
    fn idle_duration_clamps_negative() {
        let mut detector = detector();
        detector.record_activity("editor", base() + Duration::seconds(100));
        // Clock skew: "now" before the last activity
        assert_eq!(detector.idle_duration_secs(base()), 0);
    }

    #[test]
    fn intensity_needs_at_least_two_samples() {
        let mut detector = detector();
        assert_eq!(detector.activity_intensity(base()), 0.0);

        detector.record_activity("editor", base());
        assert_eq!(detector.activity_intensity(base() + Duration::seconds(1)), 0.0);
    }

    #[test]
    fn intensity_scales_with_unique_titles() {
        let mut detector = detector();
        for i in 0..5 {
            detector.record_activity(&format!("window {i}"), base() + Duration::seconds(i));
        }

        let intensity = detector.activity_intensity(base() + Duration::seconds(10));
        assert!((intensity - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn intensity_caps_at_one() {
        let mut detector = detector();
        for i in 0..15 {
            detector.record_activity(&format!("window {i}"), base() + Duration::seconds(i));
        }

        assert_eq!(detector.activity_intensity(base() + Duration::seconds(20)), 1.0);
    }

    #[test]
    fn intensity_ignores_events_outside_window() {
        let mut detector = detector();
        detector.record_activity("old one", base());
        detector.record_activity("old two", base() + Duration::seconds(1));
        detector.record_activity("fresh", base() + Duration::seconds(200));

        // Only one event inside the trailing 60s window
        assert_eq!(detector.activity_intensity(base() + Duration::seconds(210)), 0.0);
    }

    #[test]
    fn history_is_bounded() {
        let mut detector = IdleDetector::new(120, 60, 10, base());
        for i in 0..50 {
            detector.record_activity("w", base() + Duration::seconds(i));
        }
        assert!(detector.history.len() <= 10);
    }
}
