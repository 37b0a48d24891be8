//! Headless demo: drives the engine with a synthetic capture source and an
//! echo analyzer, printing whatever the engine decides to speak.
//!
//! Run with `RUST_LOG=debug cargo run --bin vigil-demo` to watch the state
//! machine and gate decisions.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::info;

use vigil::{
    Analysis, AnalysisRequest, Analyzer, CaptureSource, EngineConfig, EngineController,
    KnowledgeStore, Snapshot,
};

const SCRIPT: &[(&str, &str, &str)] = &[
    ("Visual Studio Code", "main.rs - vigil", "development"),
    ("Visual Studio Code", "engine.rs - vigil", "development"),
    ("Terminal", "cargo test", "development"),
    ("Firefox", "tokio::sync - docs.rs", "media"),
    ("Slack", "#team-platform", "communication"),
    ("Visual Studio Code", "main.rs - vigil", "development"),
];

struct ScriptedSource {
    tick: AtomicUsize,
}

impl ScriptedSource {
    fn frame(seed: u8) -> Result<Vec<u8>> {
        let img = image::RgbImage::from_pixel(
            64,
            64,
            image::Rgb([seed, seed.wrapping_mul(3), seed.wrapping_mul(7)]),
        );
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img).write_to(&mut buf, image::ImageFormat::Png)?;
        Ok(buf.into_inner())
    }
}

impl CaptureSource for ScriptedSource {
    fn capture(&self) -> Result<Snapshot> {
        let tick = self.tick.fetch_add(1, Ordering::SeqCst);
        let (app, title, category) = SCRIPT[tick % SCRIPT.len()];

        Ok(Snapshot {
            window_title: title.to_string(),
            app_name: app.to_string(),
            app_category: category.to_string(),
            image: Some(Self::frame((tick * 31) as u8)?),
            audio: None,
        })
    }
}

struct EchoAnalyzer;

impl Analyzer for EchoAnalyzer {
    fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis> {
        // Stand-in for a slow vision model call
        std::thread::sleep(Duration::from_millis(300));
        Ok(Analysis {
            recommendation: Some(format!(
                "You have been in \"{}\" for a while; worth a stretch?",
                request.window_title
            )),
            confidence: 0.8,
            description: Some(format!("screen shows {}", request.window_title)),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let store = KnowledgeStore::new(std::env::temp_dir().join("vigil-demo.sqlite3"))?;

    let mut controller = EngineController::new(EngineConfig::default());
    let mut notify_rx = controller.start(
        Arc::new(ScriptedSource {
            tick: AtomicUsize::new(0),
        }),
        Arc::new(EchoAnalyzer),
        Some(store),
    )?;

    info!("demo running for 60s; notifications print below");

    let deadline = tokio::time::sleep(Duration::from_secs(60));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            maybe = notify_rx.recv() => {
                match maybe {
                    Some(notification) => println!(">> {}", notification.content),
                    None => break,
                }
            }
            _ = &mut deadline => break,
        }
    }

    let status = controller.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    controller.stop().await
}
