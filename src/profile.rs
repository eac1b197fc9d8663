use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::warn;

use crate::features::{CornerFeatures, FeatureRow, matchup_features};
use crate::history::{FighterHistory, StatVector};
use crate::normalize::{DEFAULT_STANCE, FighterSnapshot, age_at, collapse_text};

#[derive(Debug, Clone, PartialEq)]
pub struct FighterProfile {
    pub link: String,
    pub name: String,
    pub fights: usize,
    pub last_fight_date: NaiveDate,
    pub snapshot: Option<FighterSnapshot>,
    pub hist_avg: StatVector,
}

impl FighterProfile {
    pub fn corner_features(&self, as_of: NaiveDate) -> CornerFeatures {
        let snapshot = self.snapshot.as_ref();
        CornerFeatures {
            age: snapshot.and_then(|s| age_at(s.dob, as_of)),
            height_cm: snapshot.and_then(|s| s.height_cm),
            reach_cm: snapshot.and_then(|s| s.reach_cm),
            stance: snapshot
                .map(|s| s.stance.clone())
                .unwrap_or_else(|| DEFAULT_STANCE.to_string()),
            hist_avg: self.hist_avg,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Box<FighterProfile>),
    NotFound { query: String },
    Ambiguous { query: String, links: Vec<String> },
}

impl Resolution {
    pub fn profile(&self) -> Option<&FighterProfile> {
        match self {
            Resolution::Resolved(p) => Some(p),
            _ => None,
        }
    }
}

fn name_key(name: &str) -> String {
    collapse_text(name).to_lowercase()
}

pub fn looks_like_link(query: &str) -> bool {
    let q = query.trim();
    q.starts_with("http://") || q.starts_with("https://") || q.contains("/fighter-details/")
}

#[derive(Debug, Clone, Default)]
pub struct ProfileIndex {
    profiles: HashMap<String, FighterProfile>,
    by_name: HashMap<String, Vec<String>>,
}

impl ProfileIndex {
    pub fn build(history: &FighterHistory, fighters: &HashMap<String, FighterSnapshot>) -> Self {
        let mut profiles = HashMap::new();
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
        for (link, timeline) in history.fighters() {
            let Some(latest) = timeline.last() else {
                continue;
            };
            let snapshot = fighters.get(link).cloned();
            let name = snapshot
                .as_ref()
                .map(|s| s.name.clone())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| latest.fighter_name.clone());

            let mut keys = vec![name_key(&name), name_key(&latest.fighter_name)];
            keys.sort();
            keys.dedup();
            for key in keys.into_iter().filter(|k| !k.is_empty()) {
                by_name.entry(key).or_default().push(link.to_string());
            }

            profiles.insert(
                link.to_string(),
                FighterProfile {
                    link: link.to_string(),
                    name,
                    fights: timeline.len(),
                    last_fight_date: latest.event_date,
                    snapshot,
                    hist_avg: latest.averages_after(),
                },
            );
        }
        for links in by_name.values_mut() {
            links.sort();
            links.dedup();
        }
        Self { profiles, by_name }
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get(&self, link: &str) -> Option<&FighterProfile> {
        self.profiles.get(link.trim())
    }

    pub fn resolve(&self, query: &str) -> Resolution {
        let trimmed = query.trim();
        let resolution = if looks_like_link(trimmed) {
            match self.profiles.get(trimmed) {
                Some(p) => Resolution::Resolved(Box::new(p.clone())),
                None => Resolution::NotFound {
                    query: trimmed.to_string(),
                },
            }
        } else {
            match self.by_name.get(&name_key(trimmed)).map(Vec::as_slice) {
                Some([link]) => match self.profiles.get(link) {
                    Some(p) => Resolution::Resolved(Box::new(p.clone())),
                    None => Resolution::NotFound {
                        query: trimmed.to_string(),
                    },
                },
                Some(links) if links.len() > 1 => Resolution::Ambiguous {
                    query: trimmed.to_string(),
                    links: links.to_vec(),
                },
                _ => Resolution::NotFound {
                    query: trimmed.to_string(),
                },
            }
        };
        match &resolution {
            Resolution::NotFound { query } => warn!(%query, "no fighter profile found"),
            Resolution::Ambiguous { query, links } => {
                warn!(%query, candidates = links.len(), "fighter name is ambiguous")
            }
            Resolution::Resolved(_) => {}
        }
        resolution
    }
}

pub fn matchup_row(
    f1: &FighterProfile,
    f2: &FighterProfile,
    weight_class: &str,
    as_of: NaiveDate,
) -> FeatureRow {
    matchup_features(
        &f1.corner_features(as_of),
        &f2.corner_features(as_of),
        weight_class,
    )
}
