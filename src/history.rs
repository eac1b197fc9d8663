use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, params};
use tracing::info;

use crate::normalize::{CornerStats, NormalizedFight};

pub const STAT_COUNT: usize = 5;

pub type StatVector = [f64; STAT_COUNT];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Knockdowns,
    SigStrikesLanded,
    TakedownsLanded,
    ControlSeconds,
    SigStrikeAccuracy,
}

pub const TRACKED_STATS: [Stat; STAT_COUNT] = [
    Stat::Knockdowns,
    Stat::SigStrikesLanded,
    Stat::TakedownsLanded,
    Stat::ControlSeconds,
    Stat::SigStrikeAccuracy,
];

impl Stat {
    pub fn key(self) -> &'static str {
        match self {
            Stat::Knockdowns => "kd",
            Stat::SigStrikesLanded => "sig_str_landed",
            Stat::TakedownsLanded => "td_landed",
            Stat::ControlSeconds => "ctrl",
            Stat::SigStrikeAccuracy => "sig_pct",
        }
    }

    pub fn value(self, stats: &CornerStats) -> f64 {
        match self {
            Stat::Knockdowns => stats.kd as f64,
            Stat::SigStrikesLanded => stats.sig_str_landed as f64,
            Stat::TakedownsLanded => stats.td_landed as f64,
            Stat::ControlSeconds => stats.ctrl_seconds as f64,
            Stat::SigStrikeAccuracy => stats.sig_pct,
        }
    }
}

pub fn stat_vector(stats: &CornerStats) -> StatVector {
    TRACKED_STATS.map(|s| s.value(stats))
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub fighter_link: String,
    pub fighter_name: String,
    pub fight_link: String,
    pub event_date: NaiveDate,
    pub prior_fights: usize,
    pub prior_avg: StatVector,
    pub stats: StatVector,
}

impl HistoryEntry {
    pub fn averages_after(&self) -> StatVector {
        let n = self.prior_fights as f64;
        let mut out = [0.0; STAT_COUNT];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = (self.prior_avg[i] * n + self.stats[i]) / (n + 1.0);
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct FighterHistory {
    by_fighter: HashMap<String, Vec<HistoryEntry>>,
}

impl FighterHistory {
    pub fn fighter_count(&self) -> usize {
        self.by_fighter.len()
    }

    pub fn entry_count(&self) -> usize {
        self.by_fighter.values().map(Vec::len).sum()
    }

    pub fn timeline(&self, fighter_link: &str) -> &[HistoryEntry] {
        self.by_fighter
            .get(fighter_link)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn entry(&self, fighter_link: &str, fight_link: &str) -> Option<&HistoryEntry> {
        self.timeline(fighter_link)
            .iter()
            .find(|e| e.fight_link == fight_link)
    }

    pub fn prior_averages(&self, fighter_link: &str, fight_link: &str) -> StatVector {
        self.entry(fighter_link, fight_link)
            .map(|e| e.prior_avg)
            .unwrap_or([0.0; STAT_COUNT])
    }

    pub fn latest(&self, fighter_link: &str) -> Option<&HistoryEntry> {
        self.timeline(fighter_link).last()
    }

    pub fn fighters(&self) -> impl Iterator<Item = (&str, &[HistoryEntry])> {
        self.by_fighter
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    fn from_entries(entries: impl IntoIterator<Item = HistoryEntry>) -> Self {
        let mut by_fighter: HashMap<String, Vec<HistoryEntry>> = HashMap::new();
        for entry in entries {
            by_fighter
                .entry(entry.fighter_link.clone())
                .or_default()
                .push(entry);
        }
        for timeline in by_fighter.values_mut() {
            timeline.sort_by(|a, b| {
                a.event_date
                    .cmp(&b.event_date)
                    .then_with(|| a.fight_link.cmp(&b.fight_link))
            });
        }
        Self { by_fighter }
    }
}

pub fn build_history(fights: &[NormalizedFight]) -> FighterHistory {
    let sides = fights.iter().flat_map(|f| {
        [
            (&f.winner.link, &f.winner.name, &f.winner_stats, f),
            (&f.loser.link, &f.loser.name, &f.loser_stats, f),
        ]
    });
    let raw = sides.map(|(link, name, stats, fight)| HistoryEntry {
        fighter_link: link.clone(),
        fighter_name: name.clone(),
        fight_link: fight.fight_link.clone(),
        event_date: fight.event_date,
        prior_fights: 0,
        prior_avg: [0.0; STAT_COUNT],
        stats: stat_vector(stats),
    });

    let mut history = FighterHistory::from_entries(raw);
    for timeline in history.by_fighter.values_mut() {
        let mut sums = [0.0; STAT_COUNT];
        for (i, entry) in timeline.iter_mut().enumerate() {
            entry.prior_fights = i;
            if i > 0 {
                for (k, sum) in sums.iter().enumerate() {
                    entry.prior_avg[k] = sum / i as f64;
                }
            }
            for (k, sum) in sums.iter_mut().enumerate() {
                *sum += entry.stats[k];
            }
        }
    }
    history
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS fight_history (
            fighter_link TEXT NOT NULL,
            fight_link TEXT NOT NULL,
            fighter_name TEXT NOT NULL,
            event_date TEXT NOT NULL,
            prior_fights INTEGER NOT NULL,
            kd_hist_avg REAL NOT NULL,
            sig_str_landed_hist_avg REAL NOT NULL,
            td_landed_hist_avg REAL NOT NULL,
            ctrl_hist_avg REAL NOT NULL,
            sig_pct_hist_avg REAL NOT NULL,
            kd REAL NOT NULL,
            sig_str_landed REAL NOT NULL,
            td_landed REAL NOT NULL,
            ctrl REAL NOT NULL,
            sig_pct REAL NOT NULL,
            PRIMARY KEY (fighter_link, fight_link)
        );
        "#,
    )
    .context("create fight_history schema")?;
    Ok(())
}

pub fn save_history(conn: &mut Connection, history: &FighterHistory) -> Result<usize> {
    init_schema(conn)?;
    let tx = conn.transaction().context("begin history transaction")?;
    tx.execute("DELETE FROM fight_history", [])
        .context("clear fight_history")?;
    let mut written = 0usize;
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO fight_history(
                    fighter_link, fight_link, fighter_name, event_date, prior_fights,
                    kd_hist_avg, sig_str_landed_hist_avg, td_landed_hist_avg, ctrl_hist_avg, sig_pct_hist_avg,
                    kd, sig_str_landed, td_landed, ctrl, sig_pct)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )
            .context("prepare history insert")?;
        for (_, timeline) in history.fighters() {
            for e in timeline {
                let a = e.prior_avg;
                let s = e.stats;
                stmt.execute(params![
                    e.fighter_link,
                    e.fight_link,
                    e.fighter_name,
                    e.event_date.format("%Y-%m-%d").to_string(),
                    e.prior_fights as i64,
                    a[0],
                    a[1],
                    a[2],
                    a[3],
                    a[4],
                    s[0],
                    s[1],
                    s[2],
                    s[3],
                    s[4]
                ])
                .context("insert history row")?;
                written += 1;
            }
        }
    }
    tx.commit().context("commit history transaction")?;
    info!(rows = written, fighters = history.fighter_count(), "fight history saved");
    Ok(written)
}

pub fn load_history(conn: &Connection) -> Result<FighterHistory> {
    init_schema(conn)?;
    let mut stmt = conn
        .prepare(
            "SELECT fighter_link, fight_link, fighter_name, event_date, prior_fights,
                    kd_hist_avg, sig_str_landed_hist_avg, td_landed_hist_avg, ctrl_hist_avg, sig_pct_hist_avg,
                    kd, sig_str_landed, td_landed, ctrl, sig_pct
             FROM fight_history",
        )
        .context("prepare history load")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                HistoryEntry {
                    fighter_link: row.get(0)?,
                    fight_link: row.get(1)?,
                    fighter_name: row.get(2)?,
                    event_date: NaiveDate::MIN,
                    prior_fights: row.get::<_, i64>(4)?.max(0) as usize,
                    prior_avg: [row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?],
                    stats: [
                        row.get(10)?,
                        row.get(11)?,
                        row.get(12)?,
                        row.get(13)?,
                        row.get(14)?,
                    ],
                },
                row.get::<_, String>(3)?,
            ))
        })
        .context("query history")?;

    let mut entries = Vec::new();
    for row in rows {
        let (mut entry, date) = row.context("decode history row")?;
        entry.event_date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .with_context(|| format!("corrupted history date {date} for {}", entry.fight_link))?;
        entries.push(entry);
    }
    Ok(FighterHistory::from_entries(entries))
}
