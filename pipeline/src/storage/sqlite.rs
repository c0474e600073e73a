//! SQLite backend for pipeline storage.
//!
//! The default backend: one file under the data directory, or an in-memory
//! database for tests.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chess_core::{GameResult, Move};

use super::{DeleteOutcome, Store};
use crate::types::{
    now_secs, ActivePointer, EpochMetrics, EvaluationResult, GameRecord, JobKind, JobState,
    JobStatus, ModelId, ModelMetadata, ModelVersion, PromotionEntry, SessionStatus,
    TrainingConfig, TrainingExample, TrainingSession,
};

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS examples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    move_index INTEGER NOT NULL,
    ply INTEGER NOT NULL,
    fen TEXT NOT NULL,
    encoding BLOB NOT NULL,
    policy TEXT NOT NULL,
    value REAL NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_examples_session ON examples(session_id, move_index);

CREATE TABLE IF NOT EXISTS training_sessions (
    id TEXT PRIMARY KEY,
    config TEXT NOT NULL,
    status TEXT NOT NULL,
    positions INTEGER NOT NULL,
    model_id TEXT,
    error TEXT,
    started_at INTEGER NOT NULL,
    finished_at INTEGER
);

CREATE TABLE IF NOT EXISTS epoch_metrics (
    session_id TEXT NOT NULL REFERENCES training_sessions(id) ON DELETE CASCADE,
    epoch INTEGER NOT NULL,
    total_loss REAL NOT NULL,
    policy_loss REAL NOT NULL,
    value_loss REAL NOT NULL,
    duration_secs REAL NOT NULL,
    device TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    PRIMARY KEY (session_id, epoch)
);

CREATE TABLE IF NOT EXISTS evaluations (
    id TEXT PRIMARY KEY,
    challenger TEXT NOT NULL,
    champion TEXT NOT NULL,
    wins INTEGER NOT NULL,
    losses INTEGER NOT NULL,
    draws INTEGER NOT NULL,
    win_rate REAL NOT NULL,
    threshold REAL NOT NULL,
    promoted INTEGER NOT NULL,
    automatic INTEGER NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS evaluation_games (
    evaluation_id TEXT NOT NULL REFERENCES evaluations(id) ON DELETE CASCADE,
    idx INTEGER NOT NULL,
    challenger_white INTEGER NOT NULL,
    result TEXT NOT NULL,
    plies INTEGER NOT NULL,
    reason TEXT NOT NULL,
    PRIMARY KEY (evaluation_id, idx)
);

CREATE TABLE IF NOT EXISTS model_families (
    family TEXT PRIMARY KEY,
    last_version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS model_versions (
    family TEXT NOT NULL,
    version INTEGER NOT NULL,
    blob BLOB NOT NULL,
    metadata TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (family, version)
);

CREATE TABLE IF NOT EXISTS active_model (
    slot INTEGER PRIMARY KEY CHECK (slot = 0),
    family TEXT NOT NULL,
    version INTEGER NOT NULL,
    promoted_at INTEGER NOT NULL,
    win_rate REAL NOT NULL,
    previous TEXT,
    manual INTEGER NOT NULL,
    FOREIGN KEY (family, version) REFERENCES model_versions(family, version)
);

CREATE TABLE IF NOT EXISTS promotion_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model TEXT NOT NULL,
    previous TEXT,
    win_rate REAL NOT NULL,
    manual INTEGER NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    state TEXT NOT NULL,
    progress INTEGER NOT NULL,
    message TEXT NOT NULL,
    error TEXT,
    started_at INTEGER,
    finished_at INTEGER
);
";

/// SQLite-based store.
///
/// Uses a Mutex for thread-safety since rusqlite Connection is not Sync.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file, creating parent directories.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening {}", db_path.display()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("Lock poisoned: {}", e))
    }
}

// ============================================================================
// Row helpers
// ============================================================================

fn encode_f32s(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_f32s(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(anyhow!("encoding blob has {} bytes", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn parse_model_id(s: &str) -> Result<ModelId> {
    s.parse().map_err(|e| anyhow!("{}", e))
}

fn parse_optional_model_id(s: Option<String>) -> Result<Option<ModelId>> {
    s.as_deref().map(parse_model_id).transpose()
}

fn model_version_from_row(
    family: String,
    version: u32,
    metadata: &str,
    created_at: i64,
) -> Result<ModelVersion> {
    Ok(ModelVersion {
        id: ModelId::new(family, version),
        metadata: serde_json::from_str(metadata).context("decoding model metadata")?,
        created_at: created_at as u64,
    })
}

struct SessionRow {
    id: String,
    config: String,
    status: String,
    positions: i64,
    model_id: Option<String>,
    error: Option<String>,
    started_at: i64,
    finished_at: Option<i64>,
}

const SESSION_COLUMNS: &str =
    "id, config, status, positions, model_id, error, started_at, finished_at";

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        config: row.get(1)?,
        status: row.get(2)?,
        positions: row.get(3)?,
        model_id: row.get(4)?,
        error: row.get(5)?,
        started_at: row.get(6)?,
        finished_at: row.get(7)?,
    })
}

fn load_epochs(conn: &Connection, session_id: &str) -> Result<Vec<EpochMetrics>> {
    let mut stmt = conn.prepare_cached(
        "SELECT epoch, total_loss, policy_loss, value_loss, duration_secs, device, timestamp
         FROM epoch_metrics WHERE session_id = ?1 ORDER BY epoch",
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        Ok(EpochMetrics {
            epoch: row.get(0)?,
            total_loss: row.get::<_, f64>(1)? as f32,
            policy_loss: row.get::<_, f64>(2)? as f32,
            value_loss: row.get::<_, f64>(3)? as f32,
            duration_secs: row.get(4)?,
            device: row.get(5)?,
            timestamp: row.get::<_, i64>(6)? as u64,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn assemble_session(conn: &Connection, row: SessionRow) -> Result<TrainingSession> {
    let config: TrainingConfig =
        serde_json::from_str(&row.config).context("decoding training config")?;
    let status = SessionStatus::parse(&row.status)
        .ok_or_else(|| anyhow!("unknown session status '{}'", row.status))?;
    Ok(TrainingSession {
        epochs: load_epochs(conn, &row.id)?,
        id: row.id,
        config,
        status,
        positions: row.positions as usize,
        model: parse_optional_model_id(row.model_id)?,
        error: row.error,
        started_at: row.started_at as u64,
        finished_at: row.finished_at.map(|t| t as u64),
    })
}

fn load_evaluation_games(conn: &Connection, evaluation_id: &str) -> Result<Vec<GameRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT idx, challenger_white, result, plies, reason
         FROM evaluation_games WHERE evaluation_id = ?1 ORDER BY idx",
    )?;
    let rows = stmt
        .query_map(params![evaluation_id], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(index, challenger_white, result, plies, reason)| {
            let result = GameResult::parse(&result)
                .ok_or_else(|| anyhow!("unknown game result '{}'", result))?;
            Ok(GameRecord {
                index,
                challenger_white,
                result,
                plies,
                reason,
            })
        })
        .collect()
}

fn model_exists(tx: &Transaction<'_>, id: &ModelId) -> Result<bool> {
    Ok(tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM model_versions WHERE family = ?1 AND version = ?2)",
        params![id.family, id.version],
        |row| row.get(0),
    )?)
}

fn job_status_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        state: row.get(2)?,
        progress: row.get(3)?,
        message: row.get(4)?,
        error: row.get(5)?,
        started_at: row.get(6)?,
        finished_at: row.get(7)?,
    })
}

struct JobRow {
    id: String,
    kind: String,
    state: String,
    progress: u8,
    message: String,
    error: Option<String>,
    started_at: Option<i64>,
    finished_at: Option<i64>,
}

impl Store for SqliteStore {
    fn save_examples(&self, examples: &[TrainingExample]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let created_at = now_secs() as i64;

        // Prepare the INSERT statement once and reuse it for the whole batch
        let mut stmt = tx.prepare_cached(
            "INSERT INTO examples
             (session_id, move_index, ply, fen, encoding, policy, value, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for example in examples {
            stmt.execute(params![
                example.session_id,
                example.move_index,
                example.ply,
                example.fen,
                encode_f32s(&example.encoding),
                serde_json::to_string(&example.policy)?,
                example.value as f64,
                created_at,
            ])?;
        }

        // Drop stmt before commit to release borrow on tx
        drop(stmt);
        tx.commit()?;
        Ok(())
    }

    fn load_examples(&self, session_id: &str) -> Result<Vec<TrainingExample>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT move_index, ply, fen, encoding, policy, value
             FROM examples WHERE session_id = ?1 ORDER BY move_index",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(move_index, ply, fen, encoding, policy, value)| {
                let policy: Vec<(Move, f32)> =
                    serde_json::from_str(&policy).context("decoding example policy")?;
                Ok(TrainingExample {
                    encoding: decode_f32s(&encoding)?,
                    policy,
                    value: value as f32,
                    fen,
                    session_id: session_id.to_string(),
                    move_index,
                    ply,
                })
            })
            .collect()
    }

    fn count_examples(&self, session_id: Option<&str>) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = match session_id {
            Some(id) => conn.query_row(
                "SELECT COUNT(*) FROM examples WHERE session_id = ?1",
                params![id],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM examples", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }

    fn create_session(&self, session: &TrainingSession) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO training_sessions
             (id, config, status, positions, model_id, error, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.id,
                serde_json::to_string(&session.config)?,
                session.status.as_str(),
                session.positions as i64,
                session.model.as_ref().map(|m| m.to_string()),
                session.error,
                session.started_at as i64,
                session.finished_at.map(|t| t as i64),
            ],
        )?;
        Ok(())
    }

    fn append_epoch(&self, session_id: &str, metrics: &EpochMetrics) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO epoch_metrics
             (session_id, epoch, total_loss, policy_loss, value_loss, duration_secs, device, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                metrics.epoch,
                metrics.total_loss as f64,
                metrics.policy_loss as f64,
                metrics.value_loss as f64,
                metrics.duration_secs,
                metrics.device,
                metrics.timestamp as i64,
            ],
        )?;
        Ok(())
    }

    fn finish_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        model: Option<&ModelId>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE training_sessions
             SET status = ?2, model_id = ?3, error = ?4, finished_at = ?5
             WHERE id = ?1",
            params![
                session_id,
                status.as_str(),
                model.map(|m| m.to_string()),
                error,
                now_secs() as i64,
            ],
        )?;
        if updated == 0 {
            return Err(anyhow!("training session '{}' does not exist", session_id));
        }
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> Result<Option<TrainingSession>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM training_sessions WHERE id = ?1"),
                params![session_id],
                session_row,
            )
            .optional()?;
        row.map(|r| assemble_session(&conn, r)).transpose()
    }

    fn list_sessions(&self, limit: usize) -> Result<Vec<TrainingSession>> {
        let conn = self.lock()?;
        let rows = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM training_sessions
                 ORDER BY started_at DESC, rowid DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map(params![limit as i64], session_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter()
            .map(|r| assemble_session(&conn, r))
            .collect()
    }

    fn count_sessions(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM training_sessions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn count_epochs(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM epoch_metrics", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn save_evaluation(&self, result: &EvaluationResult) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO evaluations
             (id, challenger, champion, wins, losses, draws, win_rate, threshold,
              promoted, automatic, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                result.id,
                result.challenger.to_string(),
                result.champion.to_string(),
                result.wins,
                result.losses,
                result.draws,
                result.win_rate,
                result.threshold,
                result.promoted,
                result.automatic,
                result.timestamp as i64,
            ],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO evaluation_games
                 (evaluation_id, idx, challenger_white, result, plies, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for game in &result.games {
                stmt.execute(params![
                    result.id,
                    game.index,
                    game.challenger_white,
                    game.result.as_str(),
                    game.plies,
                    game.reason,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn list_evaluations(&self, limit: usize) -> Result<Vec<EvaluationResult>> {
        let conn = self.lock()?;
        let rows = {
            let mut stmt = conn.prepare(
                "SELECT id, challenger, champion, wins, losses, draws, win_rate, threshold,
                        promoted, automatic, timestamp
                 FROM evaluations ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        (row.get::<_, u32>(3)?, row.get::<_, u32>(4)?, row.get::<_, u32>(5)?),
                        row.get::<_, f64>(6)?,
                        row.get::<_, f64>(7)?,
                        row.get::<_, bool>(8)?,
                        row.get::<_, bool>(9)?,
                        row.get::<_, i64>(10)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        rows.into_iter()
            .map(
                |(id, challenger, champion, (wins, losses, draws), win_rate, threshold, promoted, automatic, timestamp)| {
                    Ok(EvaluationResult {
                        games: load_evaluation_games(&conn, &id)?,
                        id,
                        challenger: parse_model_id(&challenger)?,
                        champion: parse_model_id(&champion)?,
                        wins,
                        losses,
                        draws,
                        win_rate,
                        threshold,
                        promoted,
                        automatic,
                        timestamp: timestamp as u64,
                    })
                },
            )
            .collect()
    }

    fn count_evaluations(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM evaluations", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn insert_model(
        &self,
        family: &str,
        blob: &[u8],
        metadata: &ModelMetadata,
    ) -> Result<ModelVersion> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        // Versions never repeat, even after the newest one is deleted
        tx.execute(
            "INSERT INTO model_families (family, last_version) VALUES (?1, 1)
             ON CONFLICT(family) DO UPDATE SET last_version = last_version + 1",
            params![family],
        )?;
        let version: u32 = tx.query_row(
            "SELECT last_version FROM model_families WHERE family = ?1",
            params![family],
            |row| row.get(0),
        )?;

        let created_at = now_secs();
        tx.execute(
            "INSERT INTO model_versions (family, version, blob, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                family,
                version,
                blob,
                serde_json::to_string(metadata)?,
                created_at as i64,
            ],
        )?;
        tx.commit()?;

        Ok(ModelVersion {
            id: ModelId::new(family, version),
            metadata: metadata.clone(),
            created_at,
        })
    }

    fn get_model(&self, id: &ModelId) -> Result<Option<ModelVersion>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT metadata, created_at FROM model_versions
                 WHERE family = ?1 AND version = ?2",
                params![id.family, id.version],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        row.map(|(metadata, created_at)| {
            model_version_from_row(id.family.clone(), id.version, &metadata, created_at)
        })
        .transpose()
    }

    fn model_blob(&self, id: &ModelId) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT blob FROM model_versions WHERE family = ?1 AND version = ?2",
                params![id.family, id.version],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn list_models(&self, family: Option<&str>) -> Result<Vec<ModelVersion>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT family, version, metadata, created_at FROM model_versions
             WHERE ?1 IS NULL OR family = ?1
             ORDER BY family, version",
        )?;
        let rows = stmt
            .query_map(params![family], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(family, version, metadata, created_at)| {
                model_version_from_row(family, version, &metadata, created_at)
            })
            .collect()
    }

    fn latest_model(&self, family: &str) -> Result<Option<ModelVersion>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT version, metadata, created_at FROM model_versions
                 WHERE family = ?1 ORDER BY version DESC LIMIT 1",
                params![family],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(version, metadata, created_at)| {
            model_version_from_row(family.to_string(), version, &metadata, created_at)
        })
        .transpose()
    }

    fn delete_model(&self, id: &ModelId) -> Result<DeleteOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let is_active: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM active_model WHERE family = ?1 AND version = ?2)",
            params![id.family, id.version],
            |row| row.get(0),
        )?;
        if is_active {
            return Ok(DeleteOutcome::Active);
        }

        let deleted = tx.execute(
            "DELETE FROM model_versions WHERE family = ?1 AND version = ?2",
            params![id.family, id.version],
        )?;
        tx.commit()?;

        Ok(if deleted == 0 {
            DeleteOutcome::NotFound
        } else {
            DeleteOutcome::Deleted
        })
    }

    fn get_active(&self) -> Result<Option<ActivePointer>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT family, version, promoted_at, win_rate, previous, manual
                 FROM active_model WHERE slot = 0",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, bool>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(family, version, promoted_at, win_rate, previous, manual)| {
            Ok(ActivePointer {
                model: ModelId::new(family, version),
                promoted_at: promoted_at as u64,
                win_rate,
                previous: parse_optional_model_id(previous)?,
                manual,
            })
        })
        .transpose()
    }

    fn set_active(
        &self,
        model: &ModelId,
        win_rate: f64,
        manual: bool,
    ) -> Result<Option<ActivePointer>> {
        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front, so the champion read below
        // cannot be replaced by another connection before the swap
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !model_exists(&tx, model)? {
            return Ok(None);
        }

        let previous = tx
            .query_row(
                "SELECT family, version FROM active_model WHERE slot = 0",
                [],
                |row| Ok(ModelId::new(row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
            )
            .optional()?;
        let pointer = ActivePointer {
            model: model.clone(),
            promoted_at: now_secs(),
            win_rate,
            previous,
            manual,
        };

        let previous = pointer.previous.as_ref().map(|m| m.to_string());
        tx.execute(
            "INSERT OR REPLACE INTO active_model
             (slot, family, version, promoted_at, win_rate, previous, manual)
             VALUES (0, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                pointer.model.family,
                pointer.model.version,
                pointer.promoted_at as i64,
                pointer.win_rate,
                previous,
                pointer.manual,
            ],
        )?;
        tx.execute(
            "INSERT INTO promotion_history (model, previous, win_rate, manual, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                pointer.model.to_string(),
                previous,
                pointer.win_rate,
                pointer.manual,
                pointer.promoted_at as i64,
            ],
        )?;
        tx.commit()?;
        Ok(Some(pointer))
    }

    fn promotion_history(&self, limit: usize) -> Result<Vec<PromotionEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT model, previous, win_rate, manual, timestamp
             FROM promotion_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(model, previous, win_rate, manual, timestamp)| {
                Ok(PromotionEntry {
                    model: parse_model_id(&model)?,
                    previous: parse_optional_model_id(previous)?,
                    win_rate,
                    manual,
                    timestamp: timestamp as u64,
                })
            })
            .collect()
    }

    fn save_job(&self, status: &JobStatus) -> Result<()> {
        let Some(id) = status.id.as_deref() else {
            return Ok(());
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO jobs
             (id, kind, state, progress, message, error, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                status.kind.as_str(),
                status.state.as_str(),
                status.progress,
                status.message,
                status.error,
                status.started_at.map(|t| t as i64),
                status.finished_at.map(|t| t as i64),
            ],
        )?;
        Ok(())
    }

    fn list_jobs(&self, limit: usize) -> Result<Vec<JobStatus>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, state, progress, message, error, started_at, finished_at
             FROM jobs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], job_status_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|row| {
                Ok(JobStatus {
                    kind: JobKind::parse(&row.kind)
                        .ok_or_else(|| anyhow!("unknown job kind '{}'", row.kind))?,
                    state: JobState::parse(&row.state)
                        .ok_or_else(|| anyhow!("unknown job state '{}'", row.state))?,
                    id: Some(row.id),
                    progress: row.progress,
                    message: row.message,
                    error: row.error,
                    started_at: row.started_at.map(|t| t as u64),
                    finished_at: row.finished_at.map(|t| t as u64),
                })
            })
            .collect()
    }
}
