use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Result, anyhow};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::corpus::{self, IngestKind};
use crate::normalize::{normalize_fight, normalize_fighter};
use crate::settings::Settings;
use crate::source::FightSource;

const RETRY_BACKOFF_BASE_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub request_delay: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
    pub refresh: bool,
    pub limit: Option<usize>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            request_delay: Duration::from_millis(100),
            retries: 2,
            retry_backoff: Duration::from_millis(RETRY_BACKOFF_BASE_MS),
            refresh: false,
            limit: None,
        }
    }
}

impl IngestOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            request_delay: settings.request_delay,
            retries: settings.fetch_retries,
            retry_backoff: Duration::from_millis(RETRY_BACKOFF_BASE_MS),
            refresh: settings.refresh_fighters,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub source_total: usize,
    pub already_persisted: usize,
    pub attempted: usize,
    pub persisted: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub batches: usize,
    pub errors: Vec<String>,
}

pub fn pending_items(source_ids: &[String], persisted: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    source_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && !persisted.contains(*id))
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

pub fn ingest_fights(
    conn: &mut Connection,
    source: &dyn FightSource,
    opts: &IngestOptions,
) -> Result<IngestSummary> {
    let source_ids = source.list_fight_links()?;
    let persisted = corpus::persisted_fight_links(conn)?;
    let pending = pending_items(&source_ids, &persisted);
    info!(
        source_total = source_ids.len(),
        already_persisted = persisted.len(),
        pending = pending.len(),
        "resuming fight ingestion"
    );

    let mut summary = IngestSummary {
        source_total: source_ids.len(),
        already_persisted: persisted.len(),
        ..Default::default()
    };
    run_checkpointed(
        conn,
        IngestKind::Fights,
        &pending,
        opts,
        &mut summary,
        |link| {
            let mut record = source.fetch_fight(link)?;
            record.fight_link = link.to_string();
            Ok(record)
        },
        |record| normalize_fight(record).is_some(),
        corpus::append_fights,
    )?;
    Ok(summary)
}

pub fn ingest_fighters(
    conn: &mut Connection,
    source: &dyn FightSource,
    opts: &IngestOptions,
) -> Result<IngestSummary> {
    let referenced = corpus::referenced_fighter_links(conn)?;
    let persisted = if opts.refresh {
        HashSet::new()
    } else {
        corpus::persisted_fighter_links(conn)?
    };
    let pending = pending_items(&referenced, &persisted);
    info!(
        referenced = referenced.len(),
        pending = pending.len(),
        refresh = opts.refresh,
        "resuming fighter ingestion"
    );

    let mut summary = IngestSummary {
        source_total: referenced.len(),
        already_persisted: referenced.len() - pending.len(),
        ..Default::default()
    };
    run_checkpointed(
        conn,
        IngestKind::Fighters,
        &pending,
        opts,
        &mut summary,
        |link| {
            let mut record = source.fetch_fighter(link)?;
            record.link = link.to_string();
            Ok(record)
        },
        |record| normalize_fighter(record).is_some(),
        corpus::upsert_fighters,
    )?;
    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
fn run_checkpointed<T>(
    conn: &mut Connection,
    kind: IngestKind,
    pending: &[String],
    opts: &IngestOptions,
    summary: &mut IngestSummary,
    mut fetch: impl FnMut(&str) -> Result<T>,
    usable: impl Fn(&T) -> bool,
    flush: impl Fn(&mut Connection, &[T]) -> Result<usize>,
) -> Result<()> {
    let run_id = corpus::begin_run(conn, kind, pending.len())?;
    let outcome = fetch_and_flush(conn, kind, pending, opts, summary, &mut fetch, &usable, &flush);
    if let Err(err) = &outcome {
        summary.errors.push(format!("flush failed: {err:#}"));
    }

    let finished = corpus::finish_run(
        conn,
        run_id,
        summary.persisted,
        summary.skipped + summary.dropped,
        &summary.errors,
    );
    outcome?;
    finished?;
    info!(
        kind = kind.as_str(),
        persisted = summary.persisted,
        skipped = summary.skipped,
        dropped = summary.dropped,
        "ingestion finished"
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn fetch_and_flush<T>(
    conn: &mut Connection,
    kind: IngestKind,
    pending: &[String],
    opts: &IngestOptions,
    summary: &mut IngestSummary,
    fetch: &mut impl FnMut(&str) -> Result<T>,
    usable: &impl Fn(&T) -> bool,
    flush: &impl Fn(&mut Connection, &[T]) -> Result<usize>,
) -> Result<()> {
    let batch_size = opts.batch_size.max(1);
    let mut batch: Vec<T> = Vec::with_capacity(batch_size);

    for id in pending {
        if opts.limit.is_some_and(|limit| summary.attempted >= limit) {
            break;
        }
        if summary.attempted > 0 && !opts.request_delay.is_zero() {
            std::thread::sleep(opts.request_delay);
        }
        summary.attempted += 1;

        let record = match fetch_with_retry(id, opts, &mut *fetch) {
            Ok(record) => record,
            Err(err) => {
                warn!(kind = kind.as_str(), item = %id, error = %err, "fetch failed, item skipped");
                summary.skipped += 1;
                summary.errors.push(format!("{id}: {err}"));
                continue;
            }
        };
        if !usable(&record) {
            warn!(kind = kind.as_str(), item = %id, "unusable record dropped");
            summary.dropped += 1;
            continue;
        }

        batch.push(record);
        if batch.len() >= batch_size {
            flush_batch(conn, kind, &mut batch, summary, flush)?;
        }
    }
    flush_batch(conn, kind, &mut batch, summary, flush)
}

fn flush_batch<T>(
    conn: &mut Connection,
    kind: IngestKind,
    batch: &mut Vec<T>,
    summary: &mut IngestSummary,
    flush: &impl Fn(&mut Connection, &[T]) -> Result<usize>,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let written = flush(conn, batch)?;
    summary.persisted += written;
    summary.batches += 1;
    debug!(kind = kind.as_str(), written, "batch flushed");
    batch.clear();
    Ok(())
}

fn fetch_with_retry<T>(
    id: &str,
    opts: &IngestOptions,
    fetch: &mut impl FnMut(&str) -> Result<T>,
) -> Result<T> {
    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 0..=opts.retries {
        match fetch(id) {
            Ok(record) => return Ok(record),
            Err(err) => {
                debug!(item = %id, attempt, error = %err, "fetch attempt failed");
                last_err = Some(err);
                if attempt < opts.retries && !opts.retry_backoff.is_zero() {
                    std::thread::sleep(opts.retry_backoff.saturating_mul(1 << attempt.min(6)));
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("fetch failed for {id}")))
}
