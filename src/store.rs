use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection};
use tokio::sync::oneshot;
use uuid::Uuid;

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("failed to join store thread: {join_err:?}");
            }
        }
    }
}

fn init_schema(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS episode_patterns (
             signature      TEXT PRIMARY KEY,
             content        TEXT NOT NULL,
             evidence_count INTEGER NOT NULL DEFAULT 1,
             first_seen     TEXT NOT NULL,
             last_seen      TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS memories (
             id         TEXT PRIMARY KEY,
             kind       TEXT NOT NULL,
             content    TEXT NOT NULL,
             created_at TEXT NOT NULL
         );",
    )
    .context("failed to initialize store schema")
}

/// A promoted pattern as stored.
#[derive(Debug, Clone)]
pub struct EpisodePatternRecord {
    pub signature: String,
    pub content: String,
    pub evidence_count: i64,
}

/// Record store for episode patterns and memories.
///
/// All writes are best-effort from the engine's point of view: callers fire
/// and forget, logging failures. A dedicated worker thread owns the SQLite
/// connection; async callers reach it through a oneshot bridge.
#[derive(Clone)]
pub struct KnowledgeStore {
    inner: Arc<StoreInner>,
    db_path: Arc<PathBuf>,
}

impl KnowledgeStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("vigil-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(
                            anyhow::Error::new(err).context("failed to open SQLite store")
                        ));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("failed to enable WAL mode: {err}");
                }

                let init_result = init_schema(&mut conn);
                if ready_tx.send(init_result).is_err() {
                    error!("store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => task(&mut conn),
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("store thread shutting down");
            })
            .context("failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        info!("knowledge store initialized at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    /// Upsert a promoted episode pattern; repeats accumulate evidence.
    pub async fn persist_episode_pattern(
        &self,
        signature: &str,
        content: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let signature = signature.to_string();
        let content = content.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO episode_patterns (signature, content, evidence_count, first_seen, last_seen)
                 VALUES (?1, ?2, 1, ?3, ?3)
                 ON CONFLICT(signature) DO UPDATE SET
                     content = excluded.content,
                     evidence_count = evidence_count + 1,
                     last_seen = excluded.last_seen",
                params![signature, content, seen_at.to_rfc3339()],
            )
            .context("failed to persist episode pattern")?;
            Ok(())
        })
        .await
    }

    /// Append one memory record.
    pub async fn persist_memory(
        &self,
        kind: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let kind = kind.to_string();
        let content = content.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO memories (id, kind, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    kind,
                    content,
                    created_at.to_rfc3339(),
                ],
            )
            .context("failed to persist memory")?;
            Ok(())
        })
        .await
    }

    pub async fn get_episode_patterns(&self) -> Result<Vec<EpisodePatternRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT signature, content, evidence_count
                 FROM episode_patterns
                 ORDER BY last_seen DESC",
            )?;

            let mut rows = stmt.query([])?;
            let mut patterns = Vec::new();
            while let Some(row) = rows.next()? {
                patterns.push(EpisodePatternRecord {
                    signature: row.get(0)?,
                    content: row.get(1)?,
                    evidence_count: row.get(2)?,
                });
            }

            Ok(patterns)
        })
        .await
    }

    pub async fn count_memories(&self, kind: &str) -> Result<i64> {
        let kind = kind.to_string();
        self.execute(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM memories WHERE kind = ?1",
                params![kind],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }
}
