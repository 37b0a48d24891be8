use chrono::{DateTime, Utc};
use serde::Serialize;

/// One timestamped snapshot of user context.
#[derive(Debug, Clone)]
pub struct Observation {
    pub window_title: String,
    pub app_name: String,
    pub app_category: String,
    pub context_hash: String,
    pub timestamp: DateTime<Utc>,
    pub image: Option<Vec<u8>>,
    pub audio: Option<Vec<u8>>,
    pub phash: Option<String>,
    pub description: Option<String>,
    pub significance_score: f64,
}

impl Observation {
    pub fn new(
        window_title: impl Into<String>,
        app_name: impl Into<String>,
        app_category: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let window_title = window_title.into();
        let app_name = app_name.into();
        let context_hash = context_hash(&app_name, &window_title);

        Self {
            window_title,
            app_name,
            app_category: app_category.into(),
            context_hash,
            timestamp,
            image: None,
            audio: None,
            phash: None,
            description: None,
            significance_score: 0.0,
        }
    }
}

/// Case-insensitive fingerprint of `app:title`, used for deduplication
/// and novelty tracking.
pub fn context_hash(app_name: &str, window_title: &str) -> String {
    let content = format!("{app_name}:{window_title}").to_lowercase();
    let hex = blake3::hash(content.as_bytes()).to_hex();
    hex[..16].to_string()
}

/// Current thinking mode of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingState {
    /// User is active, observations accumulate
    Active,
    /// Reviewing buffered observations
    Thinking,
    /// User idle, knowledge reorganization
    DeepReflection,
    /// Long idle, minimal processing
    Resting,
}

impl ThinkingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingState::Active => "active",
            ThinkingState::Thinking => "thinking",
            ThinkingState::DeepReflection => "deep_reflection",
            ThinkingState::Resting => "resting",
        }
    }
}

/// A thought withheld from immediate delivery, kept for on-demand retrieval.
#[derive(Debug, Clone, Serialize)]
pub struct SavedThought {
    pub content: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub context: Option<String>,
}

/// Content cleared for delivery to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub content: String,
    pub context: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Cumulative counters, reset on restart.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub observations_total: u64,
    pub observations_buffered: u64,
    pub observations_deduplicated: u64,
    pub significant_count: u64,
    pub analysis_consulted: u64,
    pub edge_filtered: u64,
    pub gate_hits: u64,
    pub thoughts_saved: u64,
    pub notifications_sent: u64,
}

/// Point-in-time view of the engine for the surrounding application.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: ThinkingState,
    pub observations_buffered: usize,
    pub idle_seconds: i64,
    pub can_notify: bool,
    pub last_cycle_ago_seconds: Option<i64>,
    pub stats: EngineStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_hash_is_case_insensitive() {
        assert_eq!(
            context_hash("Visual Studio Code", "main.py"),
            context_hash("visual studio code", "MAIN.PY"),
        );
    }

    #[test]
    fn context_hash_distinguishes_app_and_title() {
        assert_ne!(
            context_hash("Terminal", "main.py"),
            context_hash("Visual Studio Code", "main.py"),
        );
        assert_eq!(context_hash("a", "b").len(), 16);
    }
}
