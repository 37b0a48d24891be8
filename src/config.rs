use std::path::PathBuf;
use tokio::time::Duration;

/// Configuration for the attention engine with tunable thresholds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ring buffer capacity for unprocessed observations
    pub buffer_capacity: usize,

    /// How long a context hash suppresses re-buffering of the same context
    pub dedup_ttl_secs: i64,

    /// Bounded activity history used for the intensity signal
    pub activity_history_capacity: usize,

    /// Elapsed time without activity before the user counts as idle
    pub idle_threshold_secs: i64,

    /// Idle duration past which the engine rests instead of reflecting
    pub resting_threshold_secs: i64,

    /// Trailing window for the activity intensity signal
    pub activity_window_secs: i64,

    /// Minimum gap between thinking cycles
    pub cycle_interval_secs: i64,

    /// Minimum gap between spoken notifications
    pub notification_cooldown_secs: i64,

    /// Minimum score for an observation to count as significant
    pub significance_threshold: f64,

    /// Minimum score before the external analyzer is consulted.
    /// Equal to `significance_threshold` by default, which collapses the
    /// two tiers into one; raise it independently for real two-tier filtering.
    pub analysis_threshold: f64,

    /// Quiet period after which the staleness bonus kicks in
    pub staleness_after_secs: i64,

    /// Activity intensity below which the user counts as focused
    pub focus_intensity_ceiling: f64,

    /// Score an observation needs to interrupt a focused user
    pub focused_significance_floor: f64,

    /// How many withheld thoughts are retained
    pub saved_thoughts_capacity: usize,

    /// Gap without observations that closes the open episode
    pub episode_gap_timeout_secs: i64,

    /// Episodes with fewer observations are not promoted to knowledge
    pub min_episode_observations: usize,

    /// Perceptual-hash hamming distance that counts as a large visual jump
    pub visual_delta_threshold: u32,

    /// Optional JSON file holding the hand-authored gate tier
    pub curated_gate_path: Option<PathBuf>,

    /// Capture loop tick
    pub capture_interval: Duration,

    /// Per-capture deadline before the tick is abandoned
    pub capture_timeout: Duration,

    /// Poll loop tick driving state updates and thinking cycles
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10,
            dedup_ttl_secs: 30,
            activity_history_capacity: 100,
            idle_threshold_secs: 120,
            resting_threshold_secs: 300,
            activity_window_secs: 60,
            cycle_interval_secs: 10,
            notification_cooldown_secs: 15,
            significance_threshold: 0.4,
            analysis_threshold: 0.4,
            staleness_after_secs: 300,
            focus_intensity_ceiling: 0.3,
            focused_significance_floor: 0.6,
            saved_thoughts_capacity: 10,
            episode_gap_timeout_secs: 120,
            min_episode_observations: 2,
            visual_delta_threshold: 8,
            curated_gate_path: None,
            capture_interval: Duration::from_secs(5),
            capture_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
        }
    }
}
