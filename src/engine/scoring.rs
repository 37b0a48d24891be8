use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::models::Observation;

/// Heuristic significance scoring for observations.
///
/// The scorer is deliberately stateful: every `score` call counts one more
/// sighting of the observation's context hash, so novelty decays with
/// repetition. Calling it twice for the same observation changes the result;
/// callers score each observation exactly once.
pub struct SignificanceScorer {
    staleness_after: Duration,
    seen_contexts: HashMap<String, u32>,
    last_significant: Option<DateTime<Utc>>,
}

fn category_weight(category: &str) -> f64 {
    match category.to_lowercase().as_str() {
        "development" => 0.6,
        "work" => 0.5,
        "communication" => 0.4,
        "media" => 0.3,
        _ => 0.2,
    }
}

impl SignificanceScorer {
    pub fn new(staleness_after_secs: i64) -> Self {
        Self {
            staleness_after: Duration::seconds(staleness_after_secs.max(0)),
            seen_contexts: HashMap::new(),
            last_significant: None,
        }
    }

    /// Weighted significance in [0, 1] for one observation given its
    /// immediate predecessor and the current activity intensity.
    pub fn score(
        &mut self,
        obs: &Observation,
        previous: Option<&Observation>,
        activity_intensity: f64,
        now: DateTime<Utc>,
    ) -> f64 {
        let seen_count = *self.seen_contexts.get(&obs.context_hash).unwrap_or(&0);

        // Novelty decays with repeats of the same context
        let novelty = 1.0 / (1.0 + seen_count as f64 * 0.5);
        let mut score = novelty * 0.3;

        score += category_weight(&obs.app_category) * 0.2;

        match previous {
            Some(prev) => {
                if obs.app_name != prev.app_name {
                    score += 0.2;
                }
                if obs.app_category != prev.app_category {
                    score += 0.15;
                }
            }
            // First observation of a cycle gets partial credit
            None => score += 0.1,
        }

        // Quieter context switching scores higher
        score += (1.0 - activity_intensity.clamp(0.0, 1.0)) * 0.15;

        if self.is_stale(now) {
            score += 0.1;
        }

        self.seen_contexts.insert(obs.context_hash.clone(), seen_count + 1);

        score.min(1.0)
    }

    /// Reset the staleness clock. Called once per cycle when at least one
    /// observation clears the significance threshold.
    pub fn mark_significant(&mut self, now: DateTime<Utc>) {
        self.last_significant = Some(now);
    }

    /// Forget the novelty count for a context, e.g. after a major change.
    pub fn reset_context(&mut self, context_hash: &str) {
        self.seen_contexts.remove(context_hash);
    }

    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.last_significant {
            Some(at) => now - at > self.staleness_after,
            None => true,
        }
    }
}
