use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::http_client::http_client;

/// Per-corner raw strings as they appear on a fight detail page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCornerStats {
    pub kd: String,
    pub sig_str: String,
    pub sig_pct: String,
    pub tot_str: String,
    pub td: String,
    pub td_pct: String,
    pub sub_att: String,
    pub rev: String,
    pub ctrl: String,
}

/// One completed bout as scraped. `fight_link` is the identity key.
/// Corner `f1` is the winner's corner and `f2` the loser's.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawFightRecord {
    pub fight_link: String,
    pub event_name: String,
    pub event_date: String,
    pub winner: String,
    pub winner_link: String,
    pub loser: String,
    pub loser_link: String,
    /// Raw result token ("W", "draw", "NC"...). Empty means a decided win.
    pub outcome: String,
    pub weight_class: String,
    pub method: String,
    pub end_round: String,
    pub end_time: String,
    pub f1: RawCornerStats,
    pub f2: RawCornerStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawFighterRecord {
    pub link: String,
    pub name: String,
    pub height: String,
    pub weight: String,
    pub reach: String,
    pub stance: String,
    pub dob: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealOutcome {
    pub winner: String,
    pub loser: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub fighter_1: String,
    pub fighter_2: String,
    pub weight_class: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingCard {
    pub event_name: String,
    #[serde(default)]
    pub fixtures: Vec<Fixture>,
}

pub trait FightSource {
    /// Every known fight identity, in source order.
    fn list_fight_links(&self) -> Result<Vec<String>>;
    fn fetch_fight(&self, fight_link: &str) -> Result<RawFightRecord>;
    fn fetch_fighter(&self, fighter_link: &str) -> Result<RawFighterRecord>;
}

pub trait OutcomeSource {
    /// Decided bouts of the most recently completed event.
    fn latest_outcomes(&self) -> Result<Vec<RealOutcome>>;
}

pub trait FixtureSource {
    /// The next card with unresolved fixtures, if one is announced.
    fn upcoming_card(&self) -> Result<Option<UpcomingCard>>;
}

/// Maps each participant's display name to the winner's display name.
pub fn winners_by_name(outcomes: &[RealOutcome]) -> HashMap<String, String> {
    let mut out = HashMap::with_capacity(outcomes.len() * 2);
    for o in outcomes {
        let winner = o.winner.trim();
        let loser = o.loser.trim();
        if winner.is_empty() || loser.is_empty() {
            continue;
        }
        out.insert(winner.to_string(), winner.to_string());
        out.insert(loser.to_string(), winner.to_string());
    }
    out
}

#[derive(Debug, Clone)]
pub struct HttpSource {
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct FightLinkRow {
    fight_link: String,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn client(&self) -> Result<&'static Client> {
        http_client(Some(self.timeout))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client()?
            .get(&url)
            .query(query)
            .send()
            .with_context(|| format!("request failed: {url}"))?;
        let status = resp.status();
        let body = resp.text().context("failed reading body")?;
        if !status.is_success() {
            return Err(anyhow!("http {status} for {url}"));
        }
        serde_json::from_str::<T>(body.trim()).with_context(|| format!("invalid json from {url}"))
    }
}

impl FightSource for HttpSource {
    fn list_fight_links(&self) -> Result<Vec<String>> {
        let rows: Vec<FightLinkRow> = self.get_json("/fights", &[])?;
        Ok(rows
            .into_iter()
            .map(|r| r.fight_link.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    fn fetch_fight(&self, fight_link: &str) -> Result<RawFightRecord> {
        let mut record: RawFightRecord = self.get_json("/fight", &[("link", fight_link)])?;
        if record.fight_link.trim().is_empty() {
            record.fight_link = fight_link.to_string();
        }
        Ok(record)
    }

    fn fetch_fighter(&self, fighter_link: &str) -> Result<RawFighterRecord> {
        let mut record: RawFighterRecord = self.get_json("/fighter", &[("link", fighter_link)])?;
        if record.link.trim().is_empty() {
            record.link = fighter_link.to_string();
        }
        Ok(record)
    }
}

impl OutcomeSource for HttpSource {
    fn latest_outcomes(&self) -> Result<Vec<RealOutcome>> {
        self.get_json("/results/latest", &[])
    }
}

impl FixtureSource for HttpSource {
    fn upcoming_card(&self) -> Result<Option<UpcomingCard>> {
        let card: Option<UpcomingCard> = self.get_json("/events/upcoming", &[])?;
        Ok(card.filter(|c| !c.fixtures.is_empty()))
    }
}
