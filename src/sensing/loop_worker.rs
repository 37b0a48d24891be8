use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::engine::{Disposition, ObserveOutcome, ThinkingEngine};
use crate::models::{Notification, Observation, ThinkingState};
use crate::store::KnowledgeStore;

use super::visual;
use super::{Analysis, AnalysisRequest, Analyzer, CaptureSource};

/// Completed escalation flowing back to the resolver.
pub(crate) struct AnalysisOutcome {
    context: String,
    significance: f64,
    result: Result<Analysis>,
}

/// Fast path: tick, capture, gate, buffer. A slow or failing capture skips
/// the tick; it never stops the loop.
pub(crate) async fn capture_loop(
    engine: Arc<Mutex<ThinkingEngine>>,
    source: Arc<dyn CaptureSource>,
    analyzer: Arc<dyn Analyzer>,
    outcome_tx: mpsc::UnboundedSender<AnalysisOutcome>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    config: EngineConfig,
    cancel_token: CancellationToken,
) {
    let mut ticker = interval(config.capture_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                let fut = perform_capture(
                    now,
                    &engine,
                    &source,
                    &analyzer,
                    &outcome_tx,
                    &notify_tx,
                );

                match timeout(config.capture_timeout, fut).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!("capture tick failed, skipping: {err:?}"),
                    Err(_) => warn!(
                        "capture tick timed out (> {:?}), skipping",
                        config.capture_timeout
                    ),
                }
            }
            _ = cancel_token.cancelled() => {
                info!("capture loop shutting down");
                break;
            }
        }
    }
}

async fn perform_capture(
    now: DateTime<Utc>,
    engine: &Arc<Mutex<ThinkingEngine>>,
    source: &Arc<dyn CaptureSource>,
    analyzer: &Arc<dyn Analyzer>,
    outcome_tx: &mpsc::UnboundedSender<AnalysisOutcome>,
    notify_tx: &mpsc::UnboundedSender<Notification>,
) -> Result<()> {
    let snapshot = {
        let source = Arc::clone(source);
        tokio::task::spawn_blocking(move || source.capture())
            .await
            .context("capture worker join failed")??
    };

    let phash = match &snapshot.image {
        Some(bytes) => {
            let bytes = bytes.clone();
            tokio::task::spawn_blocking(move || visual::perceptual_hash(&bytes))
                .await
                .context("phash worker join failed")?
                .map_err(|err| debug!("perceptual hash failed: {err}"))
                .ok()
        }
        None => None,
    };

    let outcome = {
        let mut guard = engine.lock().await;
        guard.observe(snapshot, phash, now)
    };

    match outcome {
        ObserveOutcome::Escalate(obs) => {
            dispatch_analysis(engine, analyzer, outcome_tx, obs).await;
        }
        ObserveOutcome::Reaction(Disposition::Speak(notification)) => {
            let _ = notify_tx.send(notification);
        }
        ObserveOutcome::Reaction(Disposition::Withheld(reason)) => {
            debug!("gate reaction withheld: {reason}");
        }
        ObserveOutcome::Buffered
        | ObserveOutcome::Deduplicated
        | ObserveOutcome::Recognized => {}
    }

    Ok(())
}

/// Slow path: state updates, thinking cycles, deep reflection. Escalations
/// are detached tasks; nothing here ever blocks the capture loop.
pub(crate) async fn poll_loop(
    engine: Arc<Mutex<ThinkingEngine>>,
    analyzer: Arc<dyn Analyzer>,
    store: Option<KnowledgeStore>,
    outcome_tx: mpsc::UnboundedSender<AnalysisOutcome>,
    config: EngineConfig,
    cancel_token: CancellationToken,
) {
    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                run_poll_tick(now, &engine, &analyzer, &store, &outcome_tx).await;
            }
            _ = cancel_token.cancelled() => {
                info!("poll loop shutting down");
                break;
            }
        }
    }
}

async fn run_poll_tick(
    now: DateTime<Utc>,
    engine: &Arc<Mutex<ThinkingEngine>>,
    analyzer: &Arc<dyn Analyzer>,
    store: &Option<KnowledgeStore>,
    outcome_tx: &mpsc::UnboundedSender<AnalysisOutcome>,
) {
    // Decide under one short lock, dispatch outside it.
    let (to_dispatch, promoted) = {
        let mut guard = engine.lock().await;
        let state = guard.update_state(now);

        let mut to_dispatch: Vec<Observation> = Vec::new();
        let mut promoted = Vec::new();

        match state {
            ThinkingState::Thinking => {
                if guard.should_run_cycle(now) {
                    let cycle = guard.run_thinking_cycle(now);
                    for obs in cycle.significant {
                        if obs.image.is_some() && guard.should_consult_analysis(&obs) {
                            to_dispatch.push(obs);
                        } else if let Some(description) = obs.description.clone() {
                            guard.save_thought_for_later(
                                description,
                                "below analysis threshold".to_string(),
                                Some(obs.window_title.clone()),
                                now,
                            );
                        }
                    }
                }
            }
            ThinkingState::DeepReflection => {
                promoted = guard.run_deep_reflection(now);
            }
            ThinkingState::Active | ThinkingState::Resting => {}
        }

        (to_dispatch, promoted)
    };

    for obs in to_dispatch {
        dispatch_analysis(engine, analyzer, outcome_tx, obs).await;
    }

    if let Some(store) = store {
        for pattern in promoted {
            let store = store.clone();
            tokio::spawn(async move {
                if let Err(err) = store
                    .persist_episode_pattern(&pattern.signature, &pattern.content, now)
                    .await
                {
                    warn!("failed to persist episode pattern: {err:?}");
                }
            });
        }
    }
}

/// Fire-and-forget escalation: the blocking analyzer call runs on a detached
/// worker and its outcome flows back over the channel. A call in flight is
/// allowed to finish even after the state machine moves on.
async fn dispatch_analysis(
    engine: &Arc<Mutex<ThinkingEngine>>,
    analyzer: &Arc<dyn Analyzer>,
    outcome_tx: &mpsc::UnboundedSender<AnalysisOutcome>,
    obs: Observation,
) {
    let Some(image) = obs.image.clone() else {
        return;
    };

    engine.lock().await.note_analysis_dispatched();

    let request = AnalysisRequest {
        window_title: obs.window_title.clone(),
        image,
        audio: obs.audio.clone(),
        recent_context: obs.description.clone(),
    };
    let analyzer = Arc::clone(analyzer);
    let tx = outcome_tx.clone();
    let context = obs.window_title;
    let significance = obs.significance_score;

    tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(move || analyzer.analyze(&request))
            .await
            .map_err(|err| anyhow!("analysis worker join failed: {err}"))
            .and_then(|result| result);

        let _ = tx.send(AnalysisOutcome {
            context,
            significance,
            result,
        });
    });
}

/// Resolver: applies the speak/withhold policy to each analysis outcome. A
/// failed analysis is logged and dropped, never retried.
pub(crate) async fn outcome_loop(
    engine: Arc<Mutex<ThinkingEngine>>,
    store: Option<KnowledgeStore>,
    mut outcome_rx: mpsc::UnboundedReceiver<AnalysisOutcome>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            maybe = outcome_rx.recv() => {
                let Some(outcome) = maybe else { break };
                let now = Utc::now();

                let analysis = match outcome.result {
                    Ok(analysis) => analysis,
                    Err(err) => {
                        warn!("external analysis failed, dropping observation: {err:?}");
                        continue;
                    }
                };

                let Some(recommendation) = analysis.recommendation else {
                    debug!("analysis returned no recommendation for {}", outcome.context);
                    continue;
                };

                let disposition = {
                    let mut guard = engine.lock().await;
                    guard.deliver_insight(
                        recommendation,
                        Some(outcome.context),
                        outcome.significance,
                        now,
                    )
                };

                match disposition {
                    Disposition::Speak(notification) => {
                        if let Some(store) = &store {
                            let store = store.clone();
                            let content = notification.content.clone();
                            tokio::spawn(async move {
                                if let Err(err) =
                                    store.persist_memory("notification", &content, now).await
                                {
                                    warn!("failed to persist notification memory: {err:?}");
                                }
                            });
                        }
                        let _ = notify_tx.send(notification);
                    }
                    Disposition::Withheld(reason) => {
                        debug!("analysis result withheld: {reason}");
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("outcome resolver shutting down");
                break;
            }
        }
    }
}
