use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::config::EngineConfig;
use crate::fog::{Episode, FogLayer, PromotedPattern};
use crate::gate::{GateDecision, KnowledgeGate};
use crate::models::{
    EngineStats, Notification, Observation, SavedThought, StatusSnapshot, ThinkingState,
};
use crate::sensing::Snapshot;

mod buffer;
mod idle;
mod scoring;

pub use buffer::ObservationBuffer;
pub use idle::IdleDetector;
pub use scoring::SignificanceScorer;

/// Significance assigned to escalations that bypass scoring entirely.
const URGENT_SIGNIFICANCE: f64 = 1.0;

/// Canned gate reactions skip the focus bar but still respect state and
/// cooldown when run through `deliver_insight`.
const CACHED_REACTION_SIGNIFICANCE: f64 = 0.6;

/// What happened to one raw observation on arrival.
#[derive(Debug)]
pub enum ObserveOutcome {
    /// Queued for the next thinking cycle
    Buffered,
    /// Rejected by the recency set; payload dropped
    Deduplicated,
    /// Gate recognized the context and chose silence
    Recognized,
    /// Gate supplied a canned reaction, already run through speak/withhold
    Reaction(Disposition),
    /// Unknown-urgent: caller dispatches external analysis immediately
    Escalate(Observation),
}

/// Speak/withhold decision for one piece of content.
#[derive(Debug)]
pub enum Disposition {
    Speak(Notification),
    Withheld(String),
}

/// Result of one thinking cycle.
#[derive(Debug, Default)]
pub struct CycleResult {
    pub drained: usize,
    pub significant: Vec<Observation>,
}

/// Top-level orchestrator: owns the buffer, detector, scorer, gate and fog
/// layer, runs the state machine, and applies the speak/withhold policy.
///
/// All methods are synchronous and take `now` from the driving loop; the
/// async plumbing lives in `sensing`.
pub struct ThinkingEngine {
    config: EngineConfig,
    state: ThinkingState,
    buffer: ObservationBuffer,
    idle: IdleDetector,
    scorer: SignificanceScorer,
    gate: KnowledgeGate,
    fog: FogLayer,
    closed_episodes: Vec<Episode>,
    last_cycle: Option<DateTime<Utc>>,
    last_notification: Option<DateTime<Utc>>,
    saved_thoughts: Vec<SavedThought>,
    pending_thoughts: Vec<String>,
    cycle_count: u64,
    stats: EngineStats,
}

impl ThinkingEngine {
    pub fn new(config: EngineConfig, now: DateTime<Utc>) -> Self {
        let mut gate = KnowledgeGate::new(config.visual_delta_threshold);
        if let Some(path) = &config.curated_gate_path {
            gate.load_curated(path);
        }

        Self {
            buffer: ObservationBuffer::new(config.buffer_capacity, config.dedup_ttl_secs),
            idle: IdleDetector::new(
                config.idle_threshold_secs,
                config.activity_window_secs,
                config.activity_history_capacity,
                now,
            ),
            scorer: SignificanceScorer::new(config.staleness_after_secs),
            gate,
            fog: FogLayer::new(config.episode_gap_timeout_secs),
            closed_episodes: Vec::new(),
            state: ThinkingState::Active,
            last_cycle: None,
            last_notification: None,
            saved_thoughts: Vec::new(),
            pending_thoughts: Vec::new(),
            cycle_count: 0,
            stats: EngineStats::default(),
            config,
        }
    }

    pub fn state(&self) -> ThinkingState {
        self.state
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Ingest one raw observation from the capture path.
    pub fn observe(
        &mut self,
        snapshot: Snapshot,
        phash: Option<String>,
        now: DateTime<Utc>,
    ) -> ObserveOutcome {
        self.stats.observations_total += 1;

        // Activity is recorded before any gating or dedup: a repeated
        // context still proves the user is at the keyboard.
        self.idle.record_activity(&snapshot.window_title, now);

        let mut obs = Observation::new(
            snapshot.window_title,
            snapshot.app_name,
            snapshot.app_category,
            now,
        );
        obs.image = snapshot.image;
        obs.audio = snapshot.audio;
        obs.phash = phash;

        let gate_result =
            self.gate
                .classify(&obs.window_title, &obs.app_name, obs.phash.as_deref());

        match gate_result.decision {
            GateDecision::CachedReaction | GateDecision::Template => {
                self.stats.gate_hits += 1;
                debug!(
                    "gate hit ({}) for {}: canned reaction",
                    gate_result.source, obs.app_name
                );
                match gate_result.reaction {
                    Some(reaction) => ObserveOutcome::Reaction(self.deliver_insight(
                        reaction,
                        Some(obs.window_title),
                        CACHED_REACTION_SIGNIFICANCE,
                        now,
                    )),
                    None => ObserveOutcome::Recognized,
                }
            }
            GateDecision::NoReactionNeeded => {
                self.stats.gate_hits += 1;
                debug!(
                    "gate hit ({}) for {}: recognized, staying quiet",
                    gate_result.source, obs.app_name
                );
                ObserveOutcome::Recognized
            }
            GateDecision::UnknownUrgent => {
                info!("urgent unknown context: {} / {}", obs.app_name, obs.window_title);
                obs.significance_score = URGENT_SIGNIFICANCE;
                ObserveOutcome::Escalate(obs)
            }
            GateDecision::UnknownDeferrable => {
                if let Some(closed) = self.fog.add_observation(&obs) {
                    debug!("episode closed: {}", closed.summary());
                    self.closed_episodes.push(closed);
                }
                if self.buffer.add(obs) {
                    self.stats.observations_buffered += 1;
                    ObserveOutcome::Buffered
                } else {
                    self.stats.observations_deduplicated += 1;
                    ObserveOutcome::Deduplicated
                }
            }
        }
    }

    /// Update the thinking state. Pure given (idle duration, buffer
    /// occupancy, time since last cycle); idle takes priority over buffer
    /// occupancy. Transitions are logged once; repeated calls with unchanged
    /// inputs neither change state nor re-log.
    pub fn update_state(&mut self, now: DateTime<Utc>) -> ThinkingState {
        let previous = self.state;

        let next = if self.idle.is_idle(now) {
            if self.idle.idle_duration_secs(now) > self.config.resting_threshold_secs {
                ThinkingState::Resting
            } else {
                ThinkingState::DeepReflection
            }
        } else if !self.buffer.is_empty() && self.should_run_cycle(now) {
            ThinkingState::Thinking
        } else {
            ThinkingState::Active
        };

        if next != previous {
            info!("thinking state: {} -> {}", previous.as_str(), next.as_str());
            self.state = next;
        }

        self.state
    }

    pub fn should_run_cycle(&self, now: DateTime<Utc>) -> bool {
        match self.last_cycle {
            Some(at) => (now - at).num_seconds() >= self.config.cycle_interval_secs,
            None => true,
        }
    }

    /// Drain the buffer once: score every observation against its immediate
    /// predecessor and the current activity intensity, collect those above
    /// the significance threshold, then clear the buffer unconditionally.
    /// Non-significant observations are discarded, not reconsidered.
    pub fn run_thinking_cycle(&mut self, now: DateTime<Utc>) -> CycleResult {
        self.last_cycle = Some(now);
        self.cycle_count += 1;

        let mut observations = self.buffer.all();
        if observations.is_empty() {
            return CycleResult::default();
        }

        let intensity = self.idle.activity_intensity(now);

        for i in 0..observations.len() {
            let previous = if i == 0 { None } else { Some(&observations[i - 1]) };
            let score = self.scorer.score(&observations[i], previous, intensity, now);
            observations[i].significance_score = score;
        }

        let drained = observations.len();
        let significant: Vec<Observation> = observations
            .into_iter()
            .filter(|obs| obs.significance_score >= self.config.significance_threshold)
            .collect();

        if !significant.is_empty() {
            // Once per cycle, not once per qualifying observation
            self.scorer.mark_significant(now);
        }

        self.stats.significant_count += significant.len() as u64;
        self.buffer.clear();

        info!(
            "thinking cycle #{}: {} drained, {} significant",
            self.cycle_count,
            drained,
            significant.len()
        );

        CycleResult { drained, significant }
    }

    /// Second gating tier: consult the external analyzer only above the
    /// analysis threshold. A refusal counts as edge-filtered.
    pub fn should_consult_analysis(&mut self, obs: &Observation) -> bool {
        if obs.significance_score >= self.config.analysis_threshold {
            true
        } else {
            self.stats.edge_filtered += 1;
            false
        }
    }

    pub fn note_analysis_dispatched(&mut self) {
        self.stats.analysis_consulted += 1;
    }

    /// Speak/withhold policy, applied to any content about to reach the
    /// user: cached gate reactions and analysis recommendations alike.
    pub fn deliver_insight(
        &mut self,
        content: String,
        context: Option<String>,
        significance: f64,
        now: DateTime<Utc>,
    ) -> Disposition {
        let withhold_reason = if self.state == ThinkingState::Resting {
            Some("User is resting".to_string())
        } else if self.state == ThinkingState::DeepReflection {
            Some("User is idle, saving for later.".to_string())
        } else if !self.can_notify(now) {
            Some("Notification cooldown active".to_string())
        } else if self.idle.activity_intensity(now) < self.config.focus_intensity_ceiling
            && significance < self.config.focused_significance_floor
        {
            Some("User is in deep focus".to_string())
        } else {
            None
        };

        match withhold_reason {
            Some(reason) => {
                self.save_thought_for_later(content, reason.clone(), context, now);
                Disposition::Withheld(reason)
            }
            None => {
                self.mark_notification_sent(now);
                Disposition::Speak(Notification {
                    content,
                    context,
                    sent_at: now,
                })
            }
        }
    }

    pub fn can_notify(&self, now: DateTime<Utc>) -> bool {
        match self.last_notification {
            Some(at) => {
                // Clamp: clock skew must not produce a negative cooldown
                (now - at).num_seconds().max(0) >= self.config.notification_cooldown_secs
            }
            None => true,
        }
    }

    pub fn mark_notification_sent(&mut self, now: DateTime<Utc>) {
        self.last_notification = Some(now);
        self.stats.notifications_sent += 1;
    }

    /// Retain a withheld insight for on-demand retrieval, capped to the most
    /// recent entries.
    pub fn save_thought_for_later(
        &mut self,
        content: String,
        reason: String,
        context: Option<String>,
        now: DateTime<Utc>,
    ) {
        let preview: String = content.chars().take(50).collect();
        info!("saved thought for later [{reason}]: {preview}");

        self.saved_thoughts.push(SavedThought {
            content,
            reason,
            timestamp: now,
            context,
        });
        self.stats.thoughts_saved += 1;

        let cap = self.config.saved_thoughts_capacity;
        if self.saved_thoughts.len() > cap {
            let drop = self.saved_thoughts.len() - cap;
            self.saved_thoughts.drain(..drop);
        }
    }

    pub fn saved_thoughts(&self) -> &[SavedThought] {
        &self.saved_thoughts
    }

    pub fn drain_saved_thoughts(&mut self) -> Vec<SavedThought> {
        std::mem::take(&mut self.saved_thoughts)
    }

    pub fn add_thought(&mut self, thought: String) {
        self.pending_thoughts.push(thought);
    }

    pub fn take_pending_thoughts(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_thoughts)
    }

    /// Deep-reflection work: close a stale episode if due, then consume all
    /// closed episodes, promoting the well-evidenced ones into the gate's
    /// staging tier. Returns the promoted patterns for persistence.
    pub fn run_deep_reflection(&mut self, now: DateTime<Utc>) -> Vec<PromotedPattern> {
        if let Some(closed) = self.fog.close_if_stale(now) {
            debug!("episode closed by gap timeout: {}", closed.summary());
            self.closed_episodes.push(closed);
        }

        let mut promoted = Vec::new();
        for episode in self.closed_episodes.drain(..) {
            if episode.observation_count < self.config.min_episode_observations {
                debug!(
                    "skipping promotion of thin episode in {} ({} observations)",
                    episode.dominant_app, episode.observation_count
                );
                continue;
            }

            let content = episode.summary();
            self.gate.promote(&episode.dominant_app, content.clone());
            promoted.push(PromotedPattern {
                signature: episode.signature(),
                app_name: episode.dominant_app.clone(),
                content,
            });
        }

        if !promoted.is_empty() {
            info!("deep reflection promoted {} episode pattern(s)", promoted.len());
        }

        promoted
    }

    pub fn status(&self, now: DateTime<Utc>) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            observations_buffered: self.buffer.len(),
            idle_seconds: self.idle.idle_duration_secs(now),
            can_notify: self.can_notify(now),
            last_cycle_ago_seconds: self.last_cycle.map(|at| (now - at).num_seconds().max(0)),
            stats: self.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    fn engine() -> ThinkingEngine {
        ThinkingEngine::new(EngineConfig::default(), base())
    }

    fn snapshot(app: &str, title: &str, category: &str) -> Snapshot {
        Snapshot {
            window_title: title.to_string(),
            app_name: app.to_string(),
            app_category: category.to_string(),
            image: None,
            audio: None,
        }
    }

    #[test]
    fn repeated_context_is_deduplicated() {
        let mut engine = engine();

        let first = engine.observe(snapshot("Code", "main.rs", "development"), None, base());
        assert!(matches!(first, ObserveOutcome::Buffered));

        let second =
            engine.observe(snapshot("Code", "main.rs", "development"), None, base() + secs(1));
        assert!(matches!(second, ObserveOutcome::Deduplicated));

        let stats = engine.stats();
        assert_eq!(stats.observations_total, 2);
        assert_eq!(stats.observations_buffered, 1);
        assert_eq!(stats.observations_deduplicated, 1);
    }

    #[test]
    fn never_seen_app_escalates_immediately() {
        let mut engine = engine();
        engine.observe(snapshot("Code", "main.rs", "development"), None, base());

        let outcome =
            engine.observe(snapshot("Thunderbird", "inbox", "communication"), None, base() + secs(1));
        match outcome {
            ObserveOutcome::Escalate(obs) => {
                assert_eq!(obs.app_name, "Thunderbird");
                assert_eq!(obs.significance_score, 1.0);
            }
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[test]
    fn visual_jump_escalates_with_phash_attached() {
        use crate::sensing::visual;
        use crate::sensing::visual::test_support::{gradient_png, solid_png};

        let config = EngineConfig {
            visual_delta_threshold: 1,
            ..EngineConfig::default()
        };
        let mut engine = ThinkingEngine::new(config, base());

        let flat = visual::perceptual_hash(&solid_png(255, 255, 255)).unwrap();
        let ramp = visual::perceptual_hash(&gradient_png()).unwrap();

        let first = engine.observe(
            snapshot("Code", "main.rs", "development"),
            Some(flat.clone()),
            base(),
        );
        assert!(matches!(first, ObserveOutcome::Buffered));

        // Same app, so only the visual delta can trip the urgency signal
        let second = engine.observe(
            snapshot("Code", "lib.rs", "development"),
            Some(ramp.clone()),
            base() + secs(5),
        );
        match second {
            ObserveOutcome::Escalate(obs) => {
                assert_eq!(obs.phash.as_deref(), Some(ramp.as_str()));
                assert_eq!(obs.significance_score, 1.0);
            }
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[test]
    fn state_machine_follows_idle_and_buffer() {
        let mut engine = engine();
        let t0 = base();

        engine.observe(snapshot("Code", "a.rs", "development"), None, t0);
        assert_eq!(engine.update_state(t0 + secs(1)), ThinkingState::Thinking);
        // Unchanged inputs: same state, no flapping
        assert_eq!(engine.update_state(t0 + secs(1)), ThinkingState::Thinking);

        engine.run_thinking_cycle(t0 + secs(2));
        assert_eq!(engine.update_state(t0 + secs(3)), ThinkingState::Active);

        // Idle wins over everything else
        assert_eq!(engine.update_state(t0 + secs(150)), ThinkingState::DeepReflection);
        assert_eq!(engine.update_state(t0 + secs(400)), ThinkingState::Resting);

        // New activity clears the idle condition
        engine.observe(snapshot("Code", "b.rs", "development"), None, t0 + secs(401));
        assert_eq!(engine.update_state(t0 + secs(402)), ThinkingState::Thinking);
        engine.run_thinking_cycle(t0 + secs(402));
        assert_eq!(engine.update_state(t0 + secs(403)), ThinkingState::Active);
    }

    #[test]
    fn cycle_scores_and_clears_unconditionally() {
        let mut engine = engine();
        let t0 = base();

        engine.observe(snapshot("Code", "a.rs", "development"), None, t0);
        engine.observe(snapshot("Code", "b.rs", "development"), None, t0 + secs(1));

        let cycle = engine.run_thinking_cycle(t0 + secs(5));
        assert_eq!(cycle.drained, 2);
        assert!(!cycle.significant.is_empty());
        for obs in &cycle.significant {
            assert!(obs.significance_score >= 0.4);
            assert!(obs.significance_score <= 1.0);
        }

        assert_eq!(engine.status(t0 + secs(5)).observations_buffered, 0);
        assert!(!engine.should_run_cycle(t0 + secs(10)));
        assert!(engine.should_run_cycle(t0 + secs(15)));
    }

    #[test]
    fn analysis_gate_counts_edge_filtered() {
        let mut engine = engine();

        let mut obs = Observation::new("main.py", "Code", "development", base());
        obs.significance_score = 0.55;
        assert!(engine.should_consult_analysis(&obs));

        obs.significance_score = 0.3;
        assert!(!engine.should_consult_analysis(&obs));
        assert_eq!(engine.stats().edge_filtered, 1);
    }

    #[test]
    fn idle_delivery_is_saved_for_later() {
        let mut engine = engine();
        let resolution = base() + secs(150);
        assert_eq!(engine.update_state(resolution), ThinkingState::DeepReflection);

        let disposition = engine.deliver_insight(
            "You seem stuck on this error".to_string(),
            Some("main.py".to_string()),
            0.55,
            resolution,
        );

        match disposition {
            Disposition::Withheld(reason) => {
                assert_eq!(reason, "User is idle, saving for later.");
            }
            other => panic!("expected withholding, got {other:?}"),
        }

        let saved = engine.saved_thoughts();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].reason, "User is idle, saving for later.");
        assert_eq!(saved[0].context.as_deref(), Some("main.py"));
        assert_eq!(engine.stats().notifications_sent, 0);
    }

    #[test]
    fn notifications_respect_cooldown() {
        let mut engine = engine();
        let t0 = base() + secs(1);
        assert_eq!(engine.update_state(t0), ThinkingState::Active);

        let first = engine.deliver_insight("one".to_string(), None, 0.7, t0);
        assert!(matches!(first, Disposition::Speak(_)));

        let second = engine.deliver_insight("two".to_string(), None, 0.7, t0 + secs(5));
        match second {
            Disposition::Withheld(reason) => assert_eq!(reason, "Notification cooldown active"),
            other => panic!("expected cooldown withholding, got {other:?}"),
        }

        let third = engine.deliver_insight("three".to_string(), None, 0.7, t0 + secs(16));
        assert!(matches!(third, Disposition::Speak(_)));
        assert_eq!(engine.stats().notifications_sent, 2);
    }

    #[test]
    fn focused_user_needs_a_stronger_signal() {
        let mut engine = engine();
        let t0 = base() + secs(1);
        assert_eq!(engine.update_state(t0), ThinkingState::Active);

        // No recent switching: intensity 0, user counts as focused
        let weak = engine.deliver_insight("minor".to_string(), None, 0.5, t0);
        match weak {
            Disposition::Withheld(reason) => assert_eq!(reason, "User is in deep focus"),
            other => panic!("expected focus withholding, got {other:?}"),
        }

        let strong = engine.deliver_insight("major".to_string(), None, 0.6, t0);
        assert!(matches!(strong, Disposition::Speak(_)));
    }

    #[test]
    fn saved_thoughts_are_capped() {
        let mut engine = engine();
        for i in 0..15 {
            engine.save_thought_for_later(
                format!("thought {i}"),
                "User in flow".to_string(),
                None,
                base() + secs(i),
            );
        }

        let saved = engine.drain_saved_thoughts();
        assert_eq!(saved.len(), 10);
        assert_eq!(saved[0].content, "thought 5");
        assert_eq!(saved[9].content, "thought 14");
        assert!(engine.saved_thoughts().is_empty());
        assert_eq!(engine.stats().thoughts_saved, 15);
    }

    #[test]
    fn deep_reflection_promotes_episodes_to_staging() {
        let mut engine = engine();
        let t0 = base();

        engine.observe(snapshot("Code", "a.rs", "development"), None, t0);
        engine.observe(snapshot("Code", "b.rs", "development"), None, t0 + secs(10));

        // Gap timeout closes the episode during reflection
        let promoted = engine.run_deep_reflection(t0 + secs(300));
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].app_name, "Code");
        assert!(promoted[0].content.contains("focused"));

        // The staging tier now recognizes the context
        let outcome =
            engine.observe(snapshot("Code", "c.rs", "development"), None, t0 + secs(301));
        assert!(matches!(outcome, ObserveOutcome::Reaction(_)));
        assert_eq!(engine.stats().gate_hits, 1);
    }

    #[test]
    fn thin_episodes_are_not_promoted() {
        let mut engine = engine();
        engine.observe(snapshot("Spotify", "Now Playing", "media"), None, base());

        let promoted = engine.run_deep_reflection(base() + secs(300));
        assert!(promoted.is_empty());
    }

    #[test]
    fn pending_thoughts_are_drained() {
        let mut engine = engine();
        engine.add_thought("hmm".to_string());
        engine.add_thought("interesting".to_string());

        assert_eq!(engine.take_pending_thoughts().len(), 2);
        assert!(engine.take_pending_thoughts().is_empty());
    }

    #[test]
    fn status_reflects_engine_state() {
        let mut engine = engine();
        engine.observe(snapshot("Code", "a.rs", "development"), None, base());
        engine.run_thinking_cycle(base() + secs(2));

        let status = engine.status(base() + secs(7));
        assert_eq!(status.state, ThinkingState::Active);
        assert_eq!(status.observations_buffered, 0);
        assert_eq!(status.idle_seconds, 7);
        assert!(status.can_notify);
        assert_eq!(status.last_cycle_ago_seconds, Some(5));
        assert_eq!(status.stats.observations_total, 1);
    }
}
