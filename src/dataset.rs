use std::collections::HashMap;

use chrono::NaiveDate;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::info;

use crate::features::{CornerFeatures, FeatureRow, matchup_features};
use crate::history::FighterHistory;
use crate::normalize::{DEFAULT_STANCE, FighterSnapshot, NormalizedFight, age_at};

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub fight_link: String,
    pub event_date: NaiveDate,
    pub fighter_1: String,
    pub fighter_2: String,
    pub weight_class: String,
    pub features: FeatureRow,
    pub label: u8,
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub train: Vec<TrainingRow>,
    pub eval: Vec<TrainingRow>,
    pub fights_used: usize,
    pub fights_unresolved: usize,
}

impl Dataset {
    pub fn rows(&self) -> impl Iterator<Item = &TrainingRow> {
        self.train.iter().chain(self.eval.iter())
    }
}

pub fn corner_for_fight(
    fighter_link: &str,
    fight: &NormalizedFight,
    history: &FighterHistory,
    fighters: &HashMap<String, FighterSnapshot>,
) -> CornerFeatures {
    let snapshot = fighters.get(fighter_link);
    CornerFeatures {
        age: snapshot.and_then(|s| age_at(s.dob, fight.event_date)),
        height_cm: snapshot.and_then(|s| s.height_cm),
        reach_cm: snapshot.and_then(|s| s.reach_cm),
        stance: snapshot
            .map(|s| s.stance.clone())
            .unwrap_or_else(|| DEFAULT_STANCE.to_string()),
        hist_avg: history.prior_averages(fighter_link, &fight.fight_link),
    }
}

pub fn symmetric_rows(
    fight: &NormalizedFight,
    history: &FighterHistory,
    fighters: &HashMap<String, FighterSnapshot>,
) -> Option<[TrainingRow; 2]> {
    if !fight.outcome.is_resolved() {
        return None;
    }
    let winner = corner_for_fight(&fight.winner.link, fight, history, fighters);
    let loser = corner_for_fight(&fight.loser.link, fight, history, fighters);
    let row = |f1: &CornerFeatures, f2: &CornerFeatures, f1_link: &str, f2_link: &str, label| {
        TrainingRow {
            fight_link: fight.fight_link.clone(),
            event_date: fight.event_date,
            fighter_1: f1_link.to_string(),
            fighter_2: f2_link.to_string(),
            weight_class: fight.weight_class.clone(),
            features: matchup_features(f1, f2, &fight.weight_class),
            label,
        }
    };
    Some([
        row(&winner, &loser, &fight.winner.link, &fight.loser.link, 1),
        row(&loser, &winner, &fight.loser.link, &fight.winner.link, 0),
    ])
}

pub fn build_rows(
    fights: &[NormalizedFight],
    history: &FighterHistory,
    fighters: &HashMap<String, FighterSnapshot>,
) -> (Vec<TrainingRow>, usize) {
    let mut rows = Vec::with_capacity(fights.len() * 2);
    let mut unresolved = 0usize;
    for fight in fights {
        match symmetric_rows(fight, history, fighters) {
            Some(pair) => rows.extend(pair),
            None => unresolved += 1,
        }
    }
    (rows, unresolved)
}

pub fn eval_len(total: usize, eval_fraction: f64) -> usize {
    if total < 2 {
        return 0;
    }
    let raw = (total as f64 * eval_fraction.clamp(0.0, 1.0)).ceil() as usize;
    raw.clamp(1, total - 1)
}

pub fn build_dataset(
    fights: &[NormalizedFight],
    history: &FighterHistory,
    fighters: &HashMap<String, FighterSnapshot>,
    seed: u64,
    eval_fraction: f64,
) -> Dataset {
    let (mut rows, fights_unresolved) = build_rows(fights, history, fighters);
    let fights_used = rows.len() / 2;

    let mut rng = StdRng::seed_from_u64(seed);
    rows.shuffle(&mut rng);

    let n_eval = eval_len(rows.len(), eval_fraction);
    let train = rows.split_off(n_eval);
    let eval = rows;
    info!(
        fights_used,
        fights_unresolved,
        train = train.len(),
        eval = eval.len(),
        seed,
        "symmetric dataset built"
    );
    Dataset {
        train,
        eval,
        fights_used,
        fights_unresolved,
    }
}
