use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use tracing::debug;

pub const AD_HOC_EVENT: &str = "Individual Fight";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PredictionStatus {
    Pending,
    Correct,
    Incorrect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    pub id: i64,
    pub event_name: String,
    pub fighter_1: String,
    pub fighter_2: String,
    pub weight_class: String,
    pub predicted_winner: String,
    pub confidence: f64,
    pub prediction_date: String,
    pub actual_winner: Option<String>,
    pub is_correct: Option<bool>,
}

impl PredictionRecord {
    pub fn status(&self) -> PredictionStatus {
        match self.is_correct {
            None => PredictionStatus::Pending,
            Some(true) => PredictionStatus::Correct,
            Some(false) => PredictionStatus::Incorrect,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_name: row.get(1)?,
            fighter_1: row.get(2)?,
            fighter_2: row.get(3)?,
            weight_class: row.get(4)?,
            predicted_winner: row.get(5)?,
            confidence: row.get(6)?,
            prediction_date: row.get(7)?,
            actual_winner: row.get(8)?,
            is_correct: row.get::<_, Option<i64>>(9)?.map(|v| v != 0),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PredictionStats {
    pub resolved: usize,
    pub correct: usize,
    pub pending: usize,
}

impl PredictionStats {
    pub fn accuracy(&self) -> Option<f64> {
        (self.resolved > 0).then(|| self.correct as f64 / self.resolved as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSummary {
    pub event_name: String,
    pub records: Vec<PredictionRecord>,
}

impl EventSummary {
    pub fn correct(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status() == PredictionStatus::Correct)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub id: i64,
    pub actual_winner: String,
}

const SELECT_COLUMNS: &str = "id, event_name, fighter_1, fighter_2, weight_class, predicted_winner,
     confidence, prediction_date, actual_winner, is_correct";

pub struct PredictionStore {
    conn: Connection,
}

impl PredictionStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open predictions db {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("enable wal journal")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory predictions db")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_name TEXT NOT NULL,
                fighter_1 TEXT NOT NULL,
                fighter_2 TEXT NOT NULL,
                weight_class TEXT NOT NULL,
                predicted_winner TEXT NOT NULL,
                confidence REAL NOT NULL,
                prediction_date TEXT NOT NULL,
                actual_winner TEXT NULL,
                is_correct INTEGER NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_predictions_event_pair
            ON predictions(event_name, fighter_1, fighter_2);
            "#,
        )
        .context("create predictions schema")?;
        Ok(Self { conn })
    }

    pub fn record_prediction(
        &self,
        event_name: &str,
        fighter_1: &str,
        fighter_2: &str,
        weight_class: &str,
        predicted_winner: &str,
        confidence: f64,
    ) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO predictions(
                    event_name, fighter_1, fighter_2, weight_class, predicted_winner,
                    confidence, prediction_date, actual_winner, is_correct)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL)",
                params![
                    event_name,
                    fighter_1,
                    fighter_2,
                    weight_class,
                    predicted_winner,
                    confidence,
                    Utc::now().to_rfc3339()
                ],
            )
            .context("insert prediction")?;
        debug!(event_name, fighter_1, fighter_2, inserted, "prediction recorded");
        Ok(inserted > 0)
    }

    pub fn pending(&self) -> Result<Vec<PredictionRecord>> {
        self.query_records(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM predictions
                 WHERE actual_winner IS NULL AND event_name != ?1
                 ORDER BY id ASC"
            ),
            params![AD_HOC_EVENT],
        )
    }

    pub fn resolve(&mut self, resolutions: &[Resolution]) -> Result<usize> {
        let tx = self.conn.transaction().context("begin audit transaction")?;
        let mut updated = 0usize;
        {
            let mut stmt = tx
                .prepare(
                    "UPDATE predictions
                     SET actual_winner = ?1,
                         is_correct = CASE WHEN predicted_winner = ?1 THEN 1 ELSE 0 END
                     WHERE id = ?2 AND actual_winner IS NULL",
                )
                .context("prepare prediction update")?;
            for r in resolutions {
                updated += stmt
                    .execute(params![r.actual_winner, r.id])
                    .context("update prediction")?;
            }
        }
        tx.commit().context("commit audit transaction")?;
        Ok(updated)
    }

    pub fn get(&self, id: i64) -> Result<Option<PredictionRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM predictions WHERE id = ?1"),
                params![id],
                PredictionRecord::from_row,
            )
            .optional()
            .context("query prediction")
    }

    pub fn statistics(&self) -> Result<PredictionStats> {
        let (resolved, correct, pending) = self
            .conn
            .query_row(
                "SELECT
                    COALESCE(SUM(CASE WHEN actual_winner IS NOT NULL THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN is_correct = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN actual_winner IS NULL AND event_name != ?1 THEN 1 ELSE 0 END), 0)
                 FROM predictions",
                params![AD_HOC_EVENT],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .context("query prediction statistics")?;
        Ok(PredictionStats {
            resolved: resolved.max(0) as usize,
            correct: correct.max(0) as usize,
            pending: pending.max(0) as usize,
        })
    }

    pub fn event_predictions(&self, event_name: &str) -> Result<Vec<PredictionRecord>> {
        self.query_records(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM predictions
                 WHERE id IN (
                    SELECT MIN(id) FROM predictions
                    WHERE event_name = ?1
                    GROUP BY fighter_1, fighter_2
                 )
                 ORDER BY id ASC"
            ),
            params![event_name],
        )
    }

    pub fn last_event_summary(&self) -> Result<Option<EventSummary>> {
        let event_name: Option<String> = self
            .conn
            .query_row(
                "SELECT event_name FROM predictions
                 WHERE actual_winner IS NOT NULL AND event_name != ?1
                 ORDER BY id DESC LIMIT 1",
                params![AD_HOC_EVENT],
                |row| row.get(0),
            )
            .optional()
            .context("query last resolved event")?;
        let Some(event_name) = event_name else {
            return Ok(None);
        };
        let records = self.event_predictions(&event_name)?;
        Ok(Some(EventSummary {
            event_name,
            records,
        }))
    }

    fn query_records(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<PredictionRecord>> {
        let mut stmt = self.conn.prepare(sql).context("prepare prediction query")?;
        let rows = stmt
            .query_map(params, PredictionRecord::from_row)
            .context("query predictions")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode prediction row")?);
        }
        Ok(out)
    }
}
