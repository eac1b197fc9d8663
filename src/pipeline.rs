use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{error, info};

use crate::calibration::Metrics;
use crate::corpus;
use crate::dataset::{self, Dataset};
use crate::error::PipelineError;
use crate::history::{self, FighterHistory};
use crate::ingest::{self, IngestOptions, IngestSummary};
use crate::model;
use crate::normalize::{NormalizedFight, index_fighters, normalize_fight};
use crate::settings::Settings;
use crate::source::FightSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    OpenCorpus,
    IngestFights,
    IngestFighters,
    Normalize,
    BuildHistory,
    BuildDataset,
    Train,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::OpenCorpus => "open-corpus",
            Stage::IngestFights => "ingest-fights",
            Stage::IngestFighters => "ingest-fighters",
            Stage::Normalize => "normalize",
            Stage::BuildHistory => "build-history",
            Stage::BuildDataset => "build-dataset",
            Stage::Train => "train",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub corpus_db: PathBuf,
    pub model_path: PathBuf,
    pub ingest: Option<IngestOptions>,
    pub seed: u64,
    pub eval_fraction: f64,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            corpus_db: settings.corpus_db.clone(),
            model_path: settings.model_path.clone(),
            ingest: Some(IngestOptions::from_settings(settings)),
            seed: settings.seed,
            eval_fraction: settings.eval_fraction,
        }
    }

    pub fn plan(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::OpenCorpus];
        if self.ingest.is_some() {
            stages.extend([Stage::IngestFights, Stage::IngestFighters]);
        }
        stages.extend([
            Stage::Normalize,
            Stage::BuildHistory,
            Stage::BuildDataset,
            Stage::Train,
        ]);
        stages
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub stages_run: Vec<Stage>,
    pub fights_ingest: Option<IngestSummary>,
    pub fighters_ingest: Option<IngestSummary>,
    pub raw_fights: usize,
    pub normalized_fights: usize,
    pub dropped_fights: usize,
    pub history_rows: usize,
    pub train_rows: usize,
    pub eval_rows: usize,
    pub schema_columns: usize,
    pub metrics: Option<Metrics>,
    pub model_path: Option<PathBuf>,
}

struct PipelineState<'a> {
    opts: &'a PipelineOptions,
    source: Option<&'a dyn FightSource>,
    conn: Option<Connection>,
    fights: Vec<NormalizedFight>,
    history: FighterHistory,
    dataset: Dataset,
    report: PipelineReport,
}

impl<'a> PipelineState<'a> {
    fn conn(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or_else(|| anyhow!("corpus is not open"))
    }

    fn source(&self) -> Result<&'a dyn FightSource> {
        self.source
            .ok_or_else(|| anyhow!("ingestion requested without a fight source"))
    }

    fn ingest_opts(&self) -> Result<&IngestOptions> {
        self.opts
            .ingest
            .as_ref()
            .ok_or_else(|| anyhow!("ingestion options missing"))
    }

    fn run(&mut self, stage: Stage) -> Result<()> {
        match stage {
            Stage::OpenCorpus => {
                let conn = corpus::open_db(&self.opts.corpus_db)?;
                history::init_schema(&conn)?;
                self.conn = Some(conn);
            }
            Stage::IngestFights => {
                let source = self.source()?;
                let opts = self.ingest_opts()?.clone();
                let summary = ingest::ingest_fights(self.conn()?, source, &opts)?;
                self.report.fights_ingest = Some(summary);
            }
            Stage::IngestFighters => {
                let source = self.source()?;
                let opts = self.ingest_opts()?.clone();
                let summary = ingest::ingest_fighters(self.conn()?, source, &opts)?;
                self.report.fighters_ingest = Some(summary);
            }
            Stage::Normalize => {
                let raw = corpus::load_raw_fights(self.conn()?)?;
                if raw.is_empty() {
                    return Err(anyhow!("raw corpus is empty"));
                }
                self.fights = raw.iter().filter_map(normalize_fight).collect();
                self.report.raw_fights = raw.len();
                self.report.normalized_fights = self.fights.len();
                self.report.dropped_fights = raw.len() - self.fights.len();
                if self.fights.is_empty() {
                    return Err(anyhow!("no usable fights after normalization"));
                }
            }
            Stage::BuildHistory => {
                let built = history::build_history(&self.fights);
                let rows = history::save_history(self.conn()?, &built)?;
                self.history = built;
                self.report.history_rows = rows;
            }
            Stage::BuildDataset => {
                let fighters = index_fighters(&corpus::load_raw_fighters(self.conn()?)?);
                self.dataset = dataset::build_dataset(
                    &self.fights,
                    &self.history,
                    &fighters,
                    self.opts.seed,
                    self.opts.eval_fraction,
                );
                if self.dataset.train.is_empty() {
                    return Err(anyhow!("no decided fights to train on"));
                }
                self.report.train_rows = self.dataset.train.len();
                self.report.eval_rows = self.dataset.eval.len();
            }
            Stage::Train => {
                let bundle = model::train_bundle(&self.dataset, self.opts.seed)?;
                bundle
                    .save(&self.opts.model_path)
                    .with_context(|| format!("save bundle to {}", self.opts.model_path.display()))?;
                self.report.schema_columns = bundle.schema.width();
                self.report.metrics = Some(bundle.metrics);
                self.report.model_path = Some(self.opts.model_path.clone());
            }
        }
        Ok(())
    }
}

pub fn run_pipeline(
    opts: &PipelineOptions,
    source: Option<&dyn FightSource>,
) -> Result<PipelineReport, PipelineError> {
    let mut state = PipelineState {
        opts,
        source,
        conn: None,
        fights: Vec::new(),
        history: FighterHistory::default(),
        dataset: Dataset::default(),
        report: PipelineReport::default(),
    };

    for stage in opts.plan() {
        info!(stage = %stage, "stage started");
        if let Err(source) = state.run(stage) {
            error!(stage = %stage, error = %format!("{source:#}"), "stage failed");
            return Err(PipelineError { stage, source });
        }
        state.report.stages_run.push(stage);
        info!(stage = %stage, "stage finished");
    }
    Ok(state.report)
}
