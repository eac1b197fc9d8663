#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};

use octagon_oracle::ingest::IngestOptions;
use octagon_oracle::source::{
    FightSource, FixtureSource, OutcomeSource, RawFightRecord, RawFighterRecord, RealOutcome,
    UpcomingCard,
};

pub const FIGHT_BASE: &str = "http://ufcstats.com/fight-details/";
pub const FIGHTER_BASE: &str = "http://ufcstats.com/fighter-details/";

pub fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

pub fn fight_link(id: &str) -> String {
    format!("{FIGHT_BASE}{id}")
}

pub fn fighter_link(slug: &str) -> String {
    format!("{FIGHTER_BASE}{slug}")
}

pub fn raw_fights() -> Vec<RawFightRecord> {
    serde_json::from_str(&read_fixture("fights.json")).expect("fights fixture should parse")
}

pub fn raw_fighters() -> Vec<RawFighterRecord> {
    serde_json::from_str(&read_fixture("fighters.json")).expect("fighters fixture should parse")
}

pub fn quick_opts() -> IngestOptions {
    IngestOptions {
        batch_size: 3,
        request_delay: Duration::ZERO,
        retries: 0,
        retry_backoff: Duration::ZERO,
        refresh: false,
        limit: None,
    }
}

/// In-memory scrape source backed by the JSON fixtures. Links listed but
/// absent from the fixtures fail to fetch, as do links marked failing.
pub struct FakeSource {
    links: Vec<String>,
    fights: HashMap<String, RawFightRecord>,
    fighters: HashMap<String, RawFighterRecord>,
    failing: Mutex<HashSet<String>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl FakeSource {
    pub fn from_fixtures() -> Self {
        let fights = raw_fights();
        let mut links: Vec<String> = fights.iter().map(|f| f.fight_link.clone()).collect();
        links.push(fight_link("f13"));
        Self {
            links,
            fights: fights
                .into_iter()
                .map(|f| (f.fight_link.clone(), f))
                .collect(),
            fighters: raw_fighters()
                .into_iter()
                .map(|f| (f.link.clone(), f))
                .collect(),
            failing: Mutex::new(HashSet::new()),
            fetches: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail(&self, link: &str) {
        self.failing.lock().unwrap().insert(link.to_string());
    }

    pub fn heal(&self, link: &str) {
        self.failing.lock().unwrap().remove(link);
    }

    pub fn fetch_count(&self, link: &str) -> usize {
        self.fetches.lock().unwrap().get(link).copied().unwrap_or(0)
    }

    fn note_fetch(&self, link: &str) -> Result<()> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(link.to_string())
            .or_default() += 1;
        if self.failing.lock().unwrap().contains(link) {
            return Err(anyhow!("connection reset fetching {link}"));
        }
        Ok(())
    }
}

impl FightSource for FakeSource {
    fn list_fight_links(&self) -> Result<Vec<String>> {
        Ok(self.links.clone())
    }

    fn fetch_fight(&self, link: &str) -> Result<RawFightRecord> {
        self.note_fetch(link)?;
        self.fights
            .get(link)
            .cloned()
            .ok_or_else(|| anyhow!("http 404 for {link}"))
    }

    fn fetch_fighter(&self, link: &str) -> Result<RawFighterRecord> {
        self.note_fetch(link)?;
        self.fighters
            .get(link)
            .cloned()
            .ok_or_else(|| anyhow!("http 404 for {link}"))
    }
}

pub struct FakeOutcomes(pub Result<Vec<RealOutcome>, String>);

impl FakeOutcomes {
    pub fn from_fixture() -> Self {
        Self(Ok(serde_json::from_str(&read_fixture("latest_outcomes.json"))
            .expect("outcomes fixture should parse")))
    }
}

impl OutcomeSource for FakeOutcomes {
    fn latest_outcomes(&self) -> Result<Vec<RealOutcome>> {
        self.0.clone().map_err(|e| anyhow!(e))
    }
}

pub struct FakeFixtures(pub Option<UpcomingCard>);

impl FakeFixtures {
    pub fn from_fixture() -> Self {
        Self(Some(
            serde_json::from_str(&read_fixture("upcoming_card.json"))
                .expect("card fixture should parse"),
        ))
    }
}

impl FixtureSource for FakeFixtures {
    fn upcoming_card(&self) -> Result<Option<UpcomingCard>> {
        Ok(self.0.clone())
    }
}
