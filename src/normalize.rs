use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::warn;

use crate::source::{RawCornerStats, RawFightRecord, RawFighterRecord};

pub const DEFAULT_STANCE: &str = "Orthodox";
pub const ROUND_SECONDS: u32 = 5 * 60;

const CM_PER_FOOT: f64 = 30.48;
const CM_PER_INCH: f64 = 2.54;
const KG_PER_POUND: f64 = 0.453592;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FightOutcome {
    Win,
    Draw,
    NoContest,
}

impl FightOutcome {
    pub fn is_resolved(self) -> bool {
        self == FightOutcome::Win
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Participant {
    pub link: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CornerStats {
    pub kd: u32,
    pub sig_str_landed: u32,
    pub sig_str_attempted: u32,
    pub sig_pct: f64,
    pub tot_str_landed: u32,
    pub tot_str_attempted: u32,
    pub td_landed: u32,
    pub td_attempted: u32,
    pub td_pct: f64,
    pub sub_att: u32,
    pub rev: u32,
    pub ctrl_seconds: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFight {
    pub fight_link: String,
    pub event_name: String,
    pub event_date: NaiveDate,
    pub winner: Participant,
    pub loser: Participant,
    pub outcome: FightOutcome,
    pub weight_class: String,
    pub method: String,
    pub end_round: u32,
    pub total_time_seconds: u32,
    pub winner_stats: CornerStats,
    pub loser_stats: CornerStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FighterSnapshot {
    pub link: String,
    pub name: String,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub reach_cm: Option<f64>,
    pub stance: String,
    pub dob: Option<NaiveDate>,
}

pub fn is_sentinel(raw: &str) -> bool {
    let t = raw.trim();
    t.is_empty() || t.chars().all(|c| matches!(c, '-' | '\u{2013}' | '\u{2014}'))
}

/// "55%" -> 0.55, clamped into [0, 1].
pub fn parse_percentage(raw: &str) -> f64 {
    if is_sentinel(raw) {
        return 0.0;
    }
    match raw.trim().trim_end_matches('%').trim().parse::<f64>() {
        Ok(v) if v.is_finite() => (v / 100.0).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// "31 of 55" -> (31, 55).
pub fn parse_ratio(raw: &str) -> (u32, u32) {
    if is_sentinel(raw) {
        return (0, 0);
    }
    let Some((landed, attempted)) = raw.trim().split_once(" of ") else {
        return (0, 0);
    };
    match (
        landed.trim().parse::<u32>(),
        attempted.trim().parse::<u32>(),
    ) {
        (Ok(l), Ok(a)) => (l, a),
        _ => (0, 0),
    }
}

/// "4:31" -> 271.
pub fn parse_clock(raw: &str) -> u32 {
    clock_seconds(raw).unwrap_or(0)
}

fn clock_seconds(raw: &str) -> Option<u32> {
    if is_sentinel(raw) {
        return None;
    }
    let (minutes, seconds) = raw.trim().split_once(':')?;
    let m = minutes.trim().parse::<u32>().ok()?;
    let s = seconds.trim().parse::<u32>().ok()?;
    Some(m.saturating_mul(60).saturating_add(s))
}

pub fn parse_count(raw: &str) -> u32 {
    if is_sentinel(raw) {
        return 0;
    }
    raw.trim().parse::<u32>().unwrap_or(0)
}

/// Collapses newlines and runs of whitespace into single spaces.
pub fn collapse_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// "Colby Covington \n Record: 17-3" -> "Colby Covington".
pub fn clean_fighter_name(raw: &str) -> String {
    let head = match raw.find("Record:") {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    collapse_text(head)
}

/// `5' 10"` -> 177.8
pub fn parse_height_cm(raw: &str) -> Option<f64> {
    if is_sentinel(raw) {
        return None;
    }
    let cleaned = raw.replace('"', "");
    let (feet, inches) = cleaned.trim().split_once('\'')?;
    let feet = feet.trim().parse::<u32>().ok()?;
    let inches = inches.trim().parse::<u32>().ok()?;
    Some(feet as f64 * CM_PER_FOOT + inches as f64 * CM_PER_INCH)
}

/// "155 lbs." -> 70.3
pub fn parse_weight_kg(raw: &str) -> Option<f64> {
    if is_sentinel(raw) {
        return None;
    }
    let lbs = raw.split_whitespace().next()?.parse::<f64>().ok()?;
    lbs.is_finite().then_some(lbs * KG_PER_POUND)
}

/// `70"` -> 177.8
pub fn parse_reach_cm(raw: &str) -> Option<f64> {
    if is_sentinel(raw) {
        return None;
    }
    let inches = raw.replace('"', "").trim().parse::<f64>().ok()?;
    inches.is_finite().then_some(inches * CM_PER_INCH)
}

/// "Jul 21, 1991"
pub fn parse_dob(raw: &str) -> Option<NaiveDate> {
    if is_sentinel(raw) {
        return None;
    }
    NaiveDate::parse_from_str(&collapse_text(raw), "%b %d, %Y").ok()
}

/// Event listing dates: "January 18, 2025", "Jan 18, 2025" or ISO.
pub fn parse_event_date(raw: &str) -> Option<NaiveDate> {
    if is_sentinel(raw) {
        return None;
    }
    let text = collapse_text(raw);
    ["%B %d, %Y", "%b %d, %Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&text, fmt).ok())
}

pub fn parse_outcome(raw: &str) -> FightOutcome {
    let t = raw.trim().to_ascii_lowercase();
    if t.starts_with("draw") || t == "d" {
        FightOutcome::Draw
    } else if t.starts_with("nc") || t.starts_with("no contest") {
        FightOutcome::NoContest
    } else {
        FightOutcome::Win
    }
}

pub fn normalize_stance(raw: &str) -> String {
    if is_sentinel(raw) {
        return DEFAULT_STANCE.to_string();
    }
    collapse_text(raw)
}

/// Elapsed bout time: completed rounds at five minutes each plus the clock of
/// the final round.
pub fn total_time_seconds(end_round: &str, end_time: &str) -> u32 {
    let Ok(round) = end_round.trim().parse::<u32>() else {
        return 0;
    };
    match (round, clock_seconds(end_time)) {
        (1.., Some(last)) => (round - 1).saturating_mul(ROUND_SECONDS).saturating_add(last),
        _ => 0,
    }
}

/// Age in fractional years on `on`.
pub fn age_at(dob: Option<NaiveDate>, on: NaiveDate) -> Option<f64> {
    let dob = dob?;
    Some((on - dob).num_days() as f64 / 365.25)
}

pub fn normalize_corner(raw: &RawCornerStats) -> CornerStats {
    let (sig_str_landed, sig_str_attempted) = parse_ratio(&raw.sig_str);
    let (tot_str_landed, tot_str_attempted) = parse_ratio(&raw.tot_str);
    let (td_landed, td_attempted) = parse_ratio(&raw.td);
    CornerStats {
        kd: parse_count(&raw.kd),
        sig_str_landed,
        sig_str_attempted,
        sig_pct: parse_percentage(&raw.sig_pct),
        tot_str_landed,
        tot_str_attempted,
        td_landed,
        td_attempted,
        td_pct: parse_percentage(&raw.td_pct),
        sub_att: parse_count(&raw.sub_att),
        rev: parse_count(&raw.rev),
        ctrl_seconds: parse_clock(&raw.ctrl),
    }
}

/// Returns `None` when the record lacks what the pipeline needs to place it
/// in history: an identity key, both fighter links, and a parseable date.
pub fn normalize_fight(raw: &RawFightRecord) -> Option<NormalizedFight> {
    let fight_link = raw.fight_link.trim();
    let winner_link = raw.winner_link.trim();
    let loser_link = raw.loser_link.trim();
    if fight_link.is_empty() || winner_link.is_empty() || loser_link.is_empty() {
        warn!(fight_link, "dropping fight without identity links");
        return None;
    }
    if winner_link == loser_link {
        warn!(fight_link, "dropping fight with identical corners");
        return None;
    }
    let Some(event_date) = parse_event_date(&raw.event_date) else {
        warn!(fight_link, event_date = %raw.event_date, "dropping fight with unparseable date");
        return None;
    };

    Some(NormalizedFight {
        fight_link: fight_link.to_string(),
        event_name: collapse_text(&raw.event_name),
        event_date,
        winner: Participant {
            link: winner_link.to_string(),
            name: clean_fighter_name(&raw.winner),
        },
        loser: Participant {
            link: loser_link.to_string(),
            name: clean_fighter_name(&raw.loser),
        },
        outcome: parse_outcome(&raw.outcome),
        weight_class: collapse_text(&raw.weight_class),
        method: collapse_text(&raw.method),
        end_round: parse_count(&raw.end_round),
        total_time_seconds: total_time_seconds(&raw.end_round, &raw.end_time),
        winner_stats: normalize_corner(&raw.f1),
        loser_stats: normalize_corner(&raw.f2),
    })
}

pub fn normalize_fighter(raw: &RawFighterRecord) -> Option<FighterSnapshot> {
    let link = raw.link.trim();
    if link.is_empty() {
        return None;
    }
    Some(FighterSnapshot {
        link: link.to_string(),
        name: clean_fighter_name(&raw.name),
        height_cm: parse_height_cm(&raw.height),
        weight_kg: parse_weight_kg(&raw.weight),
        reach_cm: parse_reach_cm(&raw.reach),
        stance: normalize_stance(&raw.stance),
        dob: parse_dob(&raw.dob),
    })
}

/// Normalized snapshots keyed by link. The first row for a duplicated link
/// wins.
pub fn index_fighters(raw: &[RawFighterRecord]) -> HashMap<String, FighterSnapshot> {
    let mut out = HashMap::with_capacity(raw.len());
    for snapshot in raw.iter().filter_map(normalize_fighter) {
        out.entry(snapshot.link.clone()).or_insert(snapshot);
    }
    out
}
