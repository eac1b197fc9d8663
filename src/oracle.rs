use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::corpus;
use crate::history;
use crate::model::ModelBundle;
use crate::normalize::index_fighters;
use crate::predictions::{AD_HOC_EVENT, PredictionRecord, PredictionStore};
use crate::profile::{FighterProfile, ProfileIndex, Resolution, matchup_row};
use crate::source::{Fixture, FixtureSource};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub fighter_1: String,
    pub fighter_1_link: String,
    pub fighter_2: String,
    pub fighter_2_link: String,
    pub weight_class: String,
    pub predicted_winner: String,
    /// Probability of the predicted winner, in [0.5, 1].
    pub confidence: f64,
    /// Probability that fighter 1 wins.
    pub probability_f1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UnresolvedReason {
    NotFound,
    Ambiguous(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedFighter {
    pub query: String,
    pub reason: UnresolvedReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Forecast {
    Predicted(Prediction),
    Unresolved(Vec<UnresolvedFighter>),
}

impl Forecast {
    pub fn prediction(&self) -> Option<&Prediction> {
        match self {
            Forecast::Predicted(p) => Some(p),
            Forecast::Unresolved(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventForecast {
    pub event_name: String,
    /// True when every predicted fixture was already stored.
    pub cached: bool,
    pub records: Vec<PredictionRecord>,
    pub unresolved: Vec<(Fixture, Vec<UnresolvedFighter>)>,
}

pub struct OracleContext {
    bundle: ModelBundle,
    profiles: ProfileIndex,
    as_of: NaiveDate,
}

impl OracleContext {
    pub fn new(bundle: ModelBundle, profiles: ProfileIndex) -> Self {
        Self {
            bundle,
            profiles,
            as_of: Utc::now().date_naive(),
        }
    }

    /// Loads the bundle and builds profiles from the persisted history and
    /// fighter snapshots.
    pub fn load(model_path: &Path, corpus_db: &Path) -> Result<Self> {
        let bundle = ModelBundle::load(model_path)?;
        let conn = corpus::open_db(corpus_db)?;
        let history = history::load_history(&conn).context("load fight history")?;
        let fighters = index_fighters(&corpus::load_raw_fighters(&conn)?);
        let profiles = ProfileIndex::build(&history, &fighters);
        info!(
            profiles = profiles.len(),
            columns = bundle.schema.width(),
            trained_at = %bundle.trained_at,
            "oracle context ready"
        );
        Ok(Self::new(bundle, profiles))
    }

    /// Ages are computed on this date instead of today.
    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = as_of;
        self
    }

    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    pub fn profiles(&self) -> &ProfileIndex {
        &self.profiles
    }

    /// Order-symmetric probability that `f1` beats `f2`.
    pub fn win_probability(&self, f1: &FighterProfile, f2: &FighterProfile, weight_class: &str) -> f64 {
        let p_ab = self
            .bundle
            .predict_row(&matchup_row(f1, f2, weight_class, self.as_of));
        let p_ba = self
            .bundle
            .predict_row(&matchup_row(f2, f1, weight_class, self.as_of));
        ((p_ab + (1.0 - p_ba)) / 2.0).clamp(0.0, 1.0)
    }

    pub fn predict(&self, fighter_1: &str, fighter_2: &str, weight_class: &str) -> Forecast {
        let resolved = (
            self.profiles.resolve(fighter_1),
            self.profiles.resolve(fighter_2),
        );
        let (f1, f2) = match resolved {
            (Resolution::Resolved(a), Resolution::Resolved(b)) => (a, b),
            (r1, r2) => {
                let missing = [r1, r2].into_iter().filter_map(unresolved).collect();
                return Forecast::Unresolved(missing);
            }
        };

        let p = self.win_probability(&f1, &f2, weight_class);
        let (predicted_winner, confidence) = if p >= 0.5 {
            (f1.name.clone(), p)
        } else {
            (f2.name.clone(), 1.0 - p)
        };
        Forecast::Predicted(Prediction {
            fighter_1: f1.name.clone(),
            fighter_1_link: f1.link.clone(),
            fighter_2: f2.name.clone(),
            fighter_2_link: f2.link.clone(),
            weight_class: weight_class.to_string(),
            predicted_winner,
            confidence,
            probability_f1: p,
        })
    }

    /// Unresolved forecasts are returned without touching the store.
    pub fn predict_and_record(
        &self,
        store: &PredictionStore,
        event_name: &str,
        fighter_1: &str,
        fighter_2: &str,
        weight_class: &str,
    ) -> Result<Forecast> {
        let forecast = self.predict(fighter_1, fighter_2, weight_class);
        if let Forecast::Predicted(p) = &forecast {
            record(store, event_name, p)?;
        }
        Ok(forecast)
    }

    pub fn predict_ad_hoc(
        &self,
        store: &PredictionStore,
        fighter_1: &str,
        fighter_2: &str,
        weight_class: &str,
    ) -> Result<Forecast> {
        self.predict_and_record(store, AD_HOC_EVENT, fighter_1, fighter_2, weight_class)
    }

    /// Every fixture is predicted on each call; pairs already stored for the
    /// event keep their first prediction.
    pub fn predict_next_event(
        &self,
        store: &PredictionStore,
        fixtures: &dyn FixtureSource,
    ) -> Result<Option<EventForecast>> {
        let Some(card) = fixtures.upcoming_card()? else {
            info!("no upcoming card announced");
            return Ok(None);
        };

        let mut inserted = 0usize;
        let mut unresolved = Vec::new();
        for fixture in &card.fixtures {
            match self.predict(&fixture.fighter_1, &fixture.fighter_2, &fixture.weight_class) {
                Forecast::Predicted(p) => {
                    if record(store, &card.event_name, &p)? {
                        inserted += 1;
                    }
                }
                Forecast::Unresolved(missing) => unresolved.push((fixture.clone(), missing)),
            }
        }
        let records = store.event_predictions(&card.event_name)?;
        let cached = inserted == 0 && !records.is_empty();
        info!(
            event = %card.event_name,
            records = records.len(),
            inserted,
            unresolved = unresolved.len(),
            cached,
            "event forecast"
        );
        Ok(Some(EventForecast {
            event_name: card.event_name,
            cached,
            records,
            unresolved,
        }))
    }
}

fn record(store: &PredictionStore, event_name: &str, p: &Prediction) -> Result<bool> {
    store.record_prediction(
        event_name,
        &p.fighter_1,
        &p.fighter_2,
        &p.weight_class,
        &p.predicted_winner,
        p.confidence,
    )
}

fn unresolved(resolution: Resolution) -> Option<UnresolvedFighter> {
    match resolution {
        Resolution::Resolved(_) => None,
        Resolution::NotFound { query } => Some(UnresolvedFighter {
            query,
            reason: UnresolvedReason::NotFound,
        }),
        Resolution::Ambiguous { query, links } => Some(UnresolvedFighter {
            query,
            reason: UnresolvedReason::Ambiguous(links),
        }),
    }
}
