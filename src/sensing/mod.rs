use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::info;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::engine::ThinkingEngine;
use crate::models::{Notification, StatusSnapshot};
use crate::store::KnowledgeStore;

mod loop_worker;
pub mod visual;

use loop_worker::{capture_loop, outcome_loop, poll_loop};

/// One capture from the platform collaborator.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub window_title: String,
    pub app_name: String,
    pub app_category: String,
    pub image: Option<Vec<u8>>,
    pub audio: Option<Vec<u8>>,
}

/// Screen/audio capture collaborator. Blocking; the capture loop drives it
/// through `spawn_blocking`. A failed capture means "no observation this
/// tick", never a fatal condition.
pub trait CaptureSource: Send + Sync {
    fn capture(&self) -> Result<Snapshot>;
}

/// Request handed to the external analysis collaborator.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub window_title: String,
    pub image: Vec<u8>,
    pub audio: Option<Vec<u8>>,
    pub recent_context: Option<String>,
}

/// Response from the external analysis collaborator.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub recommendation: Option<String>,
    pub confidence: f64,
    pub description: Option<String>,
}

/// Expensive model-backed analysis collaborator: unbounded latency,
/// occasional failure. Blocking; escalations run it on a detached
/// `spawn_blocking` task so capture is never delayed.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis>;
}

/// Owns the engine and its driving loops: a capture loop feeding
/// observations, a poll loop running state updates and thinking cycles, and
/// a resolver applying speak/withhold to analysis outcomes.
pub struct EngineController {
    engine: Arc<Mutex<ThinkingEngine>>,
    config: EngineConfig,
    handles: Vec<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl EngineController {
    pub fn new(config: EngineConfig) -> Self {
        let engine = ThinkingEngine::new(config.clone(), Utc::now());
        Self {
            engine: Arc::new(Mutex::new(engine)),
            config,
            handles: Vec::new(),
            cancel_token: None,
        }
    }

    /// Shared handle for the surrounding application (status endpoint,
    /// saved-thoughts accessors).
    pub fn engine(&self) -> Arc<Mutex<ThinkingEngine>> {
        Arc::clone(&self.engine)
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.engine.lock().await.status(Utc::now())
    }

    /// Start the loops. Returns the notification channel consumed by the
    /// presentation layer on its own cadence.
    pub fn start(
        &mut self,
        source: Arc<dyn CaptureSource>,
        analyzer: Arc<dyn Analyzer>,
        store: Option<KnowledgeStore>,
    ) -> Result<mpsc::UnboundedReceiver<Notification>> {
        if self.cancel_token.is_some() {
            bail!("engine loops already running");
        }

        let cancel_token = CancellationToken::new();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        self.handles.push(tokio::spawn(capture_loop(
            Arc::clone(&self.engine),
            source,
            Arc::clone(&analyzer),
            outcome_tx.clone(),
            notify_tx.clone(),
            self.config.clone(),
            cancel_token.clone(),
        )));

        self.handles.push(tokio::spawn(poll_loop(
            Arc::clone(&self.engine),
            analyzer,
            store.clone(),
            outcome_tx,
            self.config.clone(),
            cancel_token.clone(),
        )));

        self.handles.push(tokio::spawn(outcome_loop(
            Arc::clone(&self.engine),
            store,
            outcome_rx,
            notify_tx,
            cancel_token.clone(),
        )));

        self.cancel_token = Some(cancel_token);
        info!("engine loops started");
        Ok(notify_rx)
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        for handle in self.handles.drain(..) {
            handle.await.context("engine loop task failed to join")?;
        }

        info!("engine loops stopped");
        Ok(())
    }
}
