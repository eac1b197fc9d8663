use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::source::{RawFightRecord, RawFighterRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestKind {
    Fights,
    Fighters,
}

impl IngestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestKind::Fights => "fights",
            IngestKind::Fighters => "fighters",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRun {
    pub run_id: i64,
    pub kind: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub items_total: usize,
    pub items_persisted: usize,
    pub items_skipped: usize,
    pub errors: Vec<String>,
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")
        .context("enable wal journal")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS raw_fights (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            fight_link TEXT NOT NULL UNIQUE,
            event_name TEXT NOT NULL,
            event_date TEXT NOT NULL,
            payload TEXT NOT NULL,
            fetched_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fighters (
            fighter_link TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            payload TEXT NOT NULL,
            fetched_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            items_total INTEGER NOT NULL,
            items_persisted INTEGER NOT NULL,
            items_skipped INTEGER NOT NULL,
            errors_json TEXT NOT NULL
        );
        "#,
    )
    .context("create corpus schema")?;
    Ok(())
}

pub fn persisted_fight_links(conn: &Connection) -> Result<HashSet<String>> {
    collect_keys(conn, "SELECT fight_link FROM raw_fights")
}

pub fn persisted_fighter_links(conn: &Connection) -> Result<HashSet<String>> {
    collect_keys(conn, "SELECT fighter_link FROM fighters")
}

fn collect_keys(conn: &Connection, sql: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(sql).context("prepare key query")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("query keys")?;
    let mut out = HashSet::new();
    for row in rows {
        out.insert(row.context("decode key row")?);
    }
    Ok(out)
}

pub fn append_fights(conn: &mut Connection, batch: &[RawFightRecord]) -> Result<usize> {
    let tx = conn.transaction().context("begin fight batch")?;
    let mut inserted = 0usize;
    {
        let mut stmt = tx
            .prepare(
                "INSERT OR IGNORE INTO raw_fights(fight_link, event_name, event_date, payload, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .context("prepare fight insert")?;
        let now = Utc::now().to_rfc3339();
        for fight in batch {
            let payload = serde_json::to_string(fight).context("serialize raw fight")?;
            inserted += stmt
                .execute(params![
                    fight.fight_link.trim(),
                    fight.event_name,
                    fight.event_date,
                    payload,
                    now
                ])
                .context("insert raw fight")?;
        }
    }
    tx.commit().context("commit fight batch")?;
    Ok(inserted)
}

pub fn upsert_fighters(conn: &mut Connection, batch: &[RawFighterRecord]) -> Result<usize> {
    let tx = conn.transaction().context("begin fighter batch")?;
    let mut written = 0usize;
    {
        let mut stmt = tx
            .prepare(
                r#"
                INSERT INTO fighters(fighter_link, name, payload, fetched_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(fighter_link) DO UPDATE SET
                    name = excluded.name,
                    payload = excluded.payload,
                    fetched_at = excluded.fetched_at
                "#,
            )
            .context("prepare fighter upsert")?;
        let now = Utc::now().to_rfc3339();
        for fighter in batch {
            let payload = serde_json::to_string(fighter).context("serialize raw fighter")?;
            written += stmt
                .execute(params![fighter.link.trim(), fighter.name, payload, now])
                .context("upsert fighter")?;
        }
    }
    tx.commit().context("commit fighter batch")?;
    Ok(written)
}

pub fn load_raw_fights(conn: &Connection) -> Result<Vec<RawFightRecord>> {
    let mut stmt = conn
        .prepare("SELECT fight_link, payload FROM raw_fights ORDER BY seq ASC")
        .context("prepare raw fight load")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .context("query raw fights")?;
    let mut out = Vec::new();
    for row in rows {
        let (link, payload) = row.context("decode raw fight row")?;
        let fight = serde_json::from_str::<RawFightRecord>(&payload)
            .with_context(|| format!("corrupted raw fight payload for {link}"))?;
        out.push(fight);
    }
    Ok(out)
}

pub fn load_raw_fighters(conn: &Connection) -> Result<Vec<RawFighterRecord>> {
    let mut stmt = conn
        .prepare("SELECT fighter_link, payload FROM fighters ORDER BY fighter_link ASC")
        .context("prepare fighter load")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .context("query fighters")?;
    let mut out = Vec::new();
    for row in rows {
        let (link, payload) = row.context("decode fighter row")?;
        let fighter = serde_json::from_str::<RawFighterRecord>(&payload)
            .with_context(|| format!("corrupted fighter payload for {link}"))?;
        out.push(fighter);
    }
    Ok(out)
}

pub fn referenced_fighter_links(conn: &Connection) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for fight in load_raw_fights(conn)? {
        for link in [fight.winner_link.trim(), fight.loser_link.trim()] {
            if !link.is_empty() && seen.insert(link.to_string()) {
                out.push(link.to_string());
            }
        }
    }
    Ok(out)
}

pub fn fight_count(conn: &Connection) -> Result<usize> {
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM raw_fights", [], |row| row.get(0))
        .context("count raw fights")?;
    Ok(n.max(0) as usize)
}

pub fn begin_run(conn: &Connection, kind: IngestKind, items_total: usize) -> Result<i64> {
    conn.execute(
        "INSERT INTO ingest_runs(kind, started_at, finished_at, items_total, items_persisted, items_skipped, errors_json)
         VALUES (?1, ?2, NULL, ?3, 0, 0, '[]')",
        params![kind.as_str(), Utc::now().to_rfc3339(), items_total as i64],
    )
    .context("insert ingest run")?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_run(
    conn: &Connection,
    run_id: i64,
    items_persisted: usize,
    items_skipped: usize,
    errors: &[String],
) -> Result<()> {
    let errors_json = serde_json::to_string(errors).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "UPDATE ingest_runs
         SET finished_at = ?1, items_persisted = ?2, items_skipped = ?3, errors_json = ?4
         WHERE run_id = ?5",
        params![
            Utc::now().to_rfc3339(),
            items_persisted as i64,
            items_skipped as i64,
            errors_json,
            run_id
        ],
    )
    .context("update ingest run")?;
    Ok(())
}

pub fn last_run(conn: &Connection, kind: IngestKind) -> Result<Option<IngestRun>> {
    conn.query_row(
        "SELECT run_id, kind, started_at, finished_at, items_total, items_persisted, items_skipped,
                errors_json
         FROM ingest_runs WHERE kind = ?1 ORDER BY run_id DESC LIMIT 1",
        params![kind.as_str()],
        |row| {
            Ok(IngestRun {
                run_id: row.get(0)?,
                kind: row.get(1)?,
                started_at: row.get(2)?,
                finished_at: row.get(3)?,
                items_total: row.get::<_, i64>(4)?.max(0) as usize,
                items_persisted: row.get::<_, i64>(5)?.max(0) as usize,
                items_skipped: row.get::<_, i64>(6)?.max(0) as usize,
                errors: row
                    .get::<_, Option<String>>(7)?
                    .and_then(|json| serde_json::from_str(&json).ok())
                    .unwrap_or_default(),
            })
        },
    )
    .optional()
    .context("query last ingest run")
}
