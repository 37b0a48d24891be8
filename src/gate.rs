use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{debug, warn};
use serde::Deserialize;

use crate::sensing::visual;

/// Decision for one context, in priority order of the tiers consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Curated tier matched an entry with a canned response
    CachedReaction,
    /// Staging tier matched a promoted pattern with a template response
    Template,
    /// Recognized, deliberately silent (noisy but harmless context)
    NoReactionNeeded,
    /// Unknown and the local urgency signal fired: escalate immediately
    UnknownUrgent,
    /// Unknown, queue for the next thinking cycle
    UnknownDeferrable,
}

/// Outcome of a gate lookup: the decision, which tier answered, and the
/// canned reaction when one exists.
#[derive(Debug, Clone)]
pub struct GateResult {
    pub decision: GateDecision,
    pub source: &'static str,
    pub reaction: Option<String>,
}

impl GateResult {
    fn edge(decision: GateDecision) -> Self {
        Self {
            decision,
            source: "edge",
            reaction: None,
        }
    }
}

/// One hand-authored entry in the curated tier.
#[derive(Debug, Clone, Deserialize)]
pub struct CuratedEntry {
    /// App name, matched case-insensitively
    pub app: String,
    /// Optional substring the window title must contain (case-insensitive)
    #[serde(default)]
    pub title_contains: Option<String>,
    /// Canned response delivered on match
    #[serde(default)]
    pub reaction: Option<String>,
    /// Recognized but never worth reacting to (e.g. idle desktop)
    #[serde(default)]
    pub suppress: bool,
}

#[derive(Debug, Clone)]
struct StagingEntry {
    content: String,
    evidence: u32,
}

/// Fast local classifier over two in-memory knowledge tiers.
///
/// Tier one is a small hand-authored mapping; tier two is a staging mapping
/// grown from consumed episodes. Lookups never block and never fail: anything
/// the tiers cannot answer falls through to a lightweight urgency signal.
pub struct KnowledgeGate {
    curated: Vec<CuratedEntry>,
    staging: HashMap<String, StagingEntry>,
    seen_apps: HashSet<String>,
    last_phash: Option<String>,
    visual_delta_threshold: u32,
}

impl KnowledgeGate {
    pub fn new(visual_delta_threshold: u32) -> Self {
        Self {
            curated: Vec::new(),
            staging: HashMap::new(),
            seen_apps: HashSet::new(),
            last_phash: None,
            visual_delta_threshold,
        }
    }

    /// Load the curated tier from a JSON array. Fails open: an unreadable
    /// file yields an empty tier and each malformed entry is skipped on its
    /// own, so one bad record cannot poison the rest.
    pub fn load_curated(&mut self, path: &Path) {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!("curated gate tier unreadable at {}: {err}", path.display());
                return;
            }
        };

        let raw: Vec<serde_json::Value> = match serde_json::from_str(&contents) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("curated gate tier is not a JSON array: {err}");
                return;
            }
        };

        for value in raw {
            match serde_json::from_value::<CuratedEntry>(value) {
                Ok(entry) => self.curated.push(entry),
                Err(err) => warn!("skipping malformed curated gate entry: {err}"),
            }
        }

        debug!("loaded {} curated gate entries", self.curated.len());
    }

    pub fn add_curated(&mut self, entry: CuratedEntry) {
        self.curated.push(entry);
    }

    /// Grow the staging tier from a consumed episode. Repeated promotions of
    /// the same app accumulate evidence and refresh the template content.
    pub fn promote(&mut self, app_name: &str, content: String) {
        let entry = self
            .staging
            .entry(app_name.to_lowercase())
            .or_insert_with(|| StagingEntry {
                content: String::new(),
                evidence: 0,
            });
        entry.content = content;
        entry.evidence += 1;
    }

    pub fn staging_len(&self) -> usize {
        self.staging.len()
    }

    /// Classify one context. In-memory only; cannot error.
    pub fn classify(
        &mut self,
        window_title: &str,
        app_name: &str,
        phash: Option<&str>,
    ) -> GateResult {
        let app_key = app_name.to_lowercase();

        // Urgency inputs are sampled before tier lookup so the visual
        // baseline tracks every capture, recognized or not.
        let visual_jump = match (self.last_phash.as_deref(), phash) {
            (Some(prev), Some(current)) => visual::hamming_distance(prev, current)
                .map(|distance| distance >= self.visual_delta_threshold)
                .unwrap_or(false),
            _ => false,
        };
        if let Some(current) = phash {
            self.last_phash = Some(current.to_string());
        }
        let never_seen_app = !self.seen_apps.is_empty() && !self.seen_apps.contains(&app_key);
        self.seen_apps.insert(app_key.clone());

        // Reaction-bearing tiers answer before recognized-but-silent ones: a
        // curated suppress match must not shadow a promoted template.
        let title_lower = window_title.to_lowercase();
        let mut suppressed = false;
        for entry in &self.curated {
            if !entry.app.eq_ignore_ascii_case(app_name) {
                continue;
            }
            let title_matches = entry
                .title_contains
                .as_ref()
                .map(|needle| title_lower.contains(&needle.to_lowercase()))
                .unwrap_or(true);
            if !title_matches {
                continue;
            }

            if let Some(reaction) = &entry.reaction {
                return GateResult {
                    decision: GateDecision::CachedReaction,
                    source: "curated",
                    reaction: Some(reaction.clone()),
                };
            }
            if entry.suppress {
                suppressed = true;
            }
        }

        if let Some(entry) = self.staging.get(&app_key) {
            return GateResult {
                decision: GateDecision::Template,
                source: "staging",
                reaction: Some(entry.content.clone()),
            };
        }

        if suppressed {
            return GateResult {
                decision: GateDecision::NoReactionNeeded,
                source: "curated",
                reaction: None,
            };
        }

        if visual_jump || never_seen_app {
            GateResult::edge(GateDecision::UnknownUrgent)
        } else {
            GateResult::edge(GateDecision::UnknownDeferrable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensing::visual::test_support::{gradient_png, solid_png};

    fn reaction_entry(app: &str, reaction: &str) -> CuratedEntry {
        CuratedEntry {
            app: app.to_string(),
            title_contains: None,
            reaction: Some(reaction.to_string()),
            suppress: false,
        }
    }

    #[test]
    fn first_ever_context_is_deferrable() {
        let mut gate = KnowledgeGate::new(8);
        let result = gate.classify("main.py", "Visual Studio Code", None);
        assert_eq!(result.decision, GateDecision::UnknownDeferrable);
        assert_eq!(result.source, "edge");
    }

    #[test]
    fn never_seen_app_after_warmup_is_urgent() {
        let mut gate = KnowledgeGate::new(8);
        gate.classify("main.py", "Visual Studio Code", None);

        let result = gate.classify("inbox", "Thunderbird", None);
        assert_eq!(result.decision, GateDecision::UnknownUrgent);

        // Second sighting of the same app is no longer urgent
        let result = gate.classify("inbox", "Thunderbird", None);
        assert_eq!(result.decision, GateDecision::UnknownDeferrable);
    }

    #[test]
    fn large_visual_delta_is_urgent() {
        let mut gate = KnowledgeGate::new(1);
        let a = visual::perceptual_hash(&solid_png(255, 255, 255)).unwrap();
        let b = visual::perceptual_hash(&gradient_png()).unwrap();
        assert!(visual::hamming_distance(&a, &b).unwrap() >= 1);

        gate.classify("one", "App", Some(&a));
        let result = gate.classify("one", "App", Some(&b));
        assert_eq!(result.decision, GateDecision::UnknownUrgent);
    }

    #[test]
    fn malformed_phash_fails_open_to_deferrable() {
        let mut gate = KnowledgeGate::new(1);
        gate.classify("one", "App", Some("garbage"));
        let result = gate.classify("one", "App", Some("also garbage"));
        assert_eq!(result.decision, GateDecision::UnknownDeferrable);
    }

    #[test]
    fn curated_reaction_beats_staging() {
        let mut gate = KnowledgeGate::new(8);
        gate.add_curated(reaction_entry("Spotify", "Enjoying the music?"));
        gate.promote("Spotify", "Listening session".to_string());

        let result = gate.classify("Now Playing", "Spotify", None);
        assert_eq!(result.decision, GateDecision::CachedReaction);
        assert_eq!(result.source, "curated");
        assert_eq!(result.reaction.as_deref(), Some("Enjoying the music?"));
    }

    #[test]
    fn curated_title_filter_applies() {
        let mut gate = KnowledgeGate::new(8);
        gate.add_curated(CuratedEntry {
            app: "Firefox".to_string(),
            title_contains: Some("YouTube".to_string()),
            reaction: Some("Break time?".to_string()),
            suppress: false,
        });

        let hit = gate.classify("cats - YouTube", "Firefox", None);
        assert_eq!(hit.decision, GateDecision::CachedReaction);

        let miss = gate.classify("docs.rs", "Firefox", None);
        assert_ne!(miss.decision, GateDecision::CachedReaction);
    }

    #[test]
    fn staging_template_beats_curated_suppress() {
        let mut gate = KnowledgeGate::new(8);
        gate.add_curated(CuratedEntry {
            app: "Firefox".to_string(),
            title_contains: Some("New Tab".to_string()),
            reaction: None,
            suppress: true,
        });
        gate.promote("Firefox", "Browsing session, usually short".to_string());

        // The suppressed title must still surface the promoted template
        let result = gate.classify("New Tab", "Firefox", None);
        assert_eq!(result.decision, GateDecision::Template);
        assert_eq!(result.source, "staging");
        assert!(result.reaction.unwrap().contains("Browsing"));
    }

    #[test]
    fn suppress_entry_recognizes_without_reaction() {
        let mut gate = KnowledgeGate::new(8);
        gate.add_curated(CuratedEntry {
            app: "Finder".to_string(),
            title_contains: None,
            reaction: None,
            suppress: true,
        });

        let result = gate.classify("Desktop", "Finder", None);
        assert_eq!(result.decision, GateDecision::NoReactionNeeded);
        assert!(result.reaction.is_none());
    }

    #[test]
    fn staging_hit_returns_template() {
        let mut gate = KnowledgeGate::new(8);
        gate.classify("warmup", "Other", None);
        gate.promote("Blender", "Modeling session, usually ~40min".to_string());

        let result = gate.classify("donut.blend", "Blender", None);
        assert_eq!(result.decision, GateDecision::Template);
        assert_eq!(result.source, "staging");
        assert!(result.reaction.unwrap().contains("Modeling"));
    }

    #[test]
    fn malformed_curated_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curated.json");
        std::fs::write(
            &path,
            r#"[{"app": "Spotify", "reaction": "hi"}, {"reaction": 42}, "nope"]"#,
        )
        .unwrap();

        let mut gate = KnowledgeGate::new(8);
        gate.load_curated(&path);
        assert_eq!(gate.curated.len(), 1);

        gate.load_curated(Path::new("/does/not/exist.json"));
        assert_eq!(gate.curated.len(), 1);
    }
}
