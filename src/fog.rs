use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{context_hash, Observation};

/// How the user held the context: sustained work or background consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeKind {
    Focused,
    Passive,
}

impl EpisodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeKind::Focused => "focused",
            EpisodeKind::Passive => "passive",
        }
    }
}

/// A closed run of observations sharing a dominant app.
#[derive(Debug, Clone)]
pub struct Episode {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub dominant_app: String,
    pub dominant_category: String,
    pub dominant_title: Option<String>,
    pub observation_count: usize,
    pub kind: EpisodeKind,
}

impl Episode {
    pub fn duration_secs(&self) -> i64 {
        (self.ended_at - self.started_at).num_seconds().max(0)
    }

    /// Stable fingerprint of the episode's dominant context, used as the
    /// persistence key for promoted patterns.
    pub fn signature(&self) -> String {
        context_hash(&self.dominant_app, &self.dominant_category)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} session in {} ({}): {}s across {} observations",
            self.kind.as_str(),
            self.dominant_app,
            self.dominant_category,
            self.duration_secs(),
            self.observation_count,
        )
    }
}

/// A pattern extracted from a consumed episode, ready for the staging tier
/// and fire-and-forget persistence.
#[derive(Debug, Clone)]
pub struct PromotedPattern {
    pub signature: String,
    pub app_name: String,
    pub content: String,
}

struct OpenEpisode {
    id: String,
    started_at: DateTime<Utc>,
    last_observation_at: DateTime<Utc>,
    app_name: String,
    category_counts: HashMap<String, usize>,
    title_counts: HashMap<String, usize>,
    observation_count: usize,
}

impl OpenEpisode {
    fn start(obs: &Observation) -> Self {
        let mut episode = Self {
            id: Uuid::new_v4().to_string(),
            started_at: obs.timestamp,
            last_observation_at: obs.timestamp,
            app_name: obs.app_name.clone(),
            category_counts: HashMap::new(),
            title_counts: HashMap::new(),
            observation_count: 0,
        };
        episode.fold(obs);
        episode
    }

    fn fold(&mut self, obs: &Observation) {
        *self
            .category_counts
            .entry(obs.app_category.clone())
            .or_insert(0) += 1;
        *self
            .title_counts
            .entry(obs.window_title.clone())
            .or_insert(0) += 1;
        self.observation_count += 1;
        self.last_observation_at = obs.timestamp;
    }

    fn close(self) -> Episode {
        let dominant_category = most_common(&self.category_counts).unwrap_or_default();
        let dominant_title = most_common(&self.title_counts);

        let kind = match dominant_category.to_lowercase().as_str() {
            "development" | "work" => EpisodeKind::Focused,
            _ => EpisodeKind::Passive,
        };

        Episode {
            id: self.id,
            started_at: self.started_at,
            ended_at: self.last_observation_at,
            dominant_app: self.app_name,
            dominant_category,
            dominant_title,
            observation_count: self.observation_count,
            kind,
        }
    }
}

fn most_common(counts: &HashMap<String, usize>) -> Option<String> {
    counts
        .iter()
        .max_by_key(|(_, count)| *count)
        .map(|(value, _)| value.clone())
}

/// Aggregates the observation stream into episodes: contiguous runs under
/// one dominant app, closed on an app switch or a gap timeout.
pub struct FogLayer {
    gap_timeout: Duration,
    open: Option<OpenEpisode>,
}

impl FogLayer {
    pub fn new(gap_timeout_secs: i64) -> Self {
        Self {
            gap_timeout: Duration::seconds(gap_timeout_secs.max(0)),
            open: None,
        }
    }

    /// Fold an observation into the open episode, or close it and open a new
    /// one when the app changes. A returned episode has just closed and is
    /// consumed exactly once by the caller.
    pub fn add_observation(&mut self, obs: &Observation) -> Option<Episode> {
        match &mut self.open {
            Some(open) if open.app_name == obs.app_name => {
                open.fold(obs);
                None
            }
            _ => {
                let closed = self.open.take().map(OpenEpisode::close);
                self.open = Some(OpenEpisode::start(obs));
                closed
            }
        }
    }

    /// Close the open episode when no observation has arrived within the gap
    /// timeout. Invoked from the deep-reflection path.
    pub fn close_if_stale(&mut self, now: DateTime<Utc>) -> Option<Episode> {
        let stale = self
            .open
            .as_ref()
            .map(|open| now - open.last_observation_at > self.gap_timeout)
            .unwrap_or(false);

        if stale {
            self.open.take().map(OpenEpisode::close)
        } else {
            None
        }
    }

    pub fn has_open_episode(&self) -> bool {
        self.open.is_some()
    }
}
