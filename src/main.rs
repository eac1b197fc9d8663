use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use octagon_oracle::audit::run_audit;
use octagon_oracle::corpus::{self, IngestKind};
use octagon_oracle::ingest::{self, IngestOptions, IngestSummary};
use octagon_oracle::logging;
use octagon_oracle::oracle::{Forecast, OracleContext, UnresolvedReason};
use octagon_oracle::pipeline::{PipelineOptions, PipelineReport, run_pipeline};
use octagon_oracle::predictions::{AD_HOC_EVENT, PredictionRecord, PredictionStore};
use octagon_oracle::retrain::{BackgroundRetrainer, PipelineLock};
use octagon_oracle::settings::Settings;
use octagon_oracle::source::HttpSource;

#[derive(Parser)]
#[command(name = "octagon_oracle")]
#[command(about = "Fight outcome forecasting: ingest, train, predict, audit")]
struct Cli {
    #[arg(long, global = true)]
    corpus_db: Option<PathBuf>,
    #[arg(long, global = true)]
    predictions_db: Option<PathBuf>,
    #[arg(long, global = true)]
    model: Option<PathBuf>,
    #[arg(long, global = true)]
    source_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new fights and fighter snapshots into the corpus
    Ingest {
        /// Stop after this many fetches per kind
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        refresh_fighters: bool,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Run every stage: ingest, normalize, history, dataset, train
    Pipeline {
        /// Rebuild from the stored corpus without fetching
        #[arg(long)]
        offline: bool,
    },
    /// Predict a single matchup (names or fighter links)
    Predict {
        fighter_1: String,
        fighter_2: String,
        #[arg(long, default_value = "")]
        weight_class: String,
        /// Store under this event instead of the ad-hoc bucket
        #[arg(long)]
        event: Option<String>,
    },
    /// Forecast the next announced card
    NextEvent,
    /// Resolve pending predictions and retrain when anything changed
    Audit {
        /// How long to wait for a triggered retrain before exiting
        #[arg(long, default_value_t = 3600)]
        wait_secs: u64,
    },
    /// Prediction accuracy so far
    Stats,
    /// Stored predictions for one event
    Event { name: String },
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let settings = apply_overrides(Settings::from_env(), &cli);

    match cli.command {
        Commands::Ingest {
            limit,
            refresh_fighters,
            batch_size,
        } => {
            let mut opts = IngestOptions::from_settings(&settings);
            opts.limit = limit;
            opts.refresh |= refresh_fighters;
            if let Some(n) = batch_size {
                opts.batch_size = n.max(1);
            }
            let source = HttpSource::new(&settings.source_url, settings.request_timeout);
            let _lock = PipelineLock::acquire(&settings.pipeline_lock_path())?;
            let mut conn = corpus::open_db(&settings.corpus_db)?;
            let fights = ingest::ingest_fights(&mut conn, &source, &opts)?;
            print_ingest("fights", &fights);
            let fighters = ingest::ingest_fighters(&mut conn, &source, &opts)?;
            print_ingest("fighters", &fighters);
            println!("Corpus: {} fights", corpus::fight_count(&conn)?);
            if let Some(run) = corpus::last_run(&conn, IngestKind::Fights)? {
                println!("Last fight run #{} started {}", run.run_id, run.started_at);
            }
        }
        Commands::Pipeline { offline } => {
            let mut opts = PipelineOptions::from_settings(&settings);
            if offline {
                opts.ingest = None;
            }
            let source = HttpSource::new(&settings.source_url, settings.request_timeout);
            let _lock = PipelineLock::acquire(&settings.pipeline_lock_path())?;
            let report = run_pipeline(&opts, Some(&source))?;
            print_pipeline(&report);
        }
        Commands::Predict {
            fighter_1,
            fighter_2,
            weight_class,
            event,
        } => {
            let ctx = OracleContext::load(&settings.model_path, &settings.corpus_db)?;
            let store = PredictionStore::open(&settings.predictions_db)?;
            let event = event.unwrap_or_else(|| AD_HOC_EVENT.to_string());
            let forecast =
                ctx.predict_and_record(&store, &event, &fighter_1, &fighter_2, &weight_class)?;
            print_forecast(&forecast);
        }
        Commands::NextEvent => {
            let ctx = OracleContext::load(&settings.model_path, &settings.corpus_db)?;
            let store = PredictionStore::open(&settings.predictions_db)?;
            let source = HttpSource::new(&settings.source_url, settings.request_timeout);
            match ctx.predict_next_event(&store, &source)? {
                None => println!("No upcoming card announced."),
                Some(card) => {
                    let origin = if card.cached { " (cached)" } else { "" };
                    println!("{}{}", card.event_name, origin);
                    for record in &card.records {
                        print_record(record);
                    }
                    for (fixture, missing) in &card.unresolved {
                        let who: Vec<&str> = missing.iter().map(|m| m.query.as_str()).collect();
                        println!(
                            "  {} vs {}: unresolved ({})",
                            fixture.fighter_1,
                            fixture.fighter_2,
                            who.join(", ")
                        );
                    }
                }
            }
        }
        Commands::Audit { wait_secs } => {
            let mut store = PredictionStore::open(&settings.predictions_db)?;
            let source = HttpSource::new(&settings.source_url, settings.request_timeout);
            let job_opts = PipelineOptions::from_settings(&settings);
            let job_source = source.clone();
            let retrainer = BackgroundRetrainer::new(settings.pipeline_lock_path(), move || {
                run_pipeline(&job_opts, Some(&job_source))?;
                Ok(())
            });
            let outcome = run_audit(&mut store, &source, &retrainer)
                .context("audit failed")?;
            println!(
                "Audit: {} pending, {} updated, {} correct",
                outcome.report.pending, outcome.report.updated, outcome.report.correct
            );
            if let Some(handle) = outcome.retrain {
                println!("Retrain triggered, waiting up to {wait_secs}s...");
                let status = handle.wait(Duration::from_secs(wait_secs));
                let snapshot = handle.snapshot();
                println!("Retrain status: {status:?}");
                if let Some(err) = snapshot.error {
                    println!("  error: {err}");
                }
            }
        }
        Commands::Stats => {
            let store = PredictionStore::open(&settings.predictions_db)?;
            let stats = store.statistics()?;
            println!(
                "Resolved: {}  Correct: {}  Pending: {}",
                stats.resolved, stats.correct, stats.pending
            );
            if let Some(acc) = stats.accuracy() {
                println!("Accuracy: {:.1}%", acc * 100.0);
            }
            if let Some(last) = store.last_event_summary()? {
                println!(
                    "Last event: {} ({}/{} correct)",
                    last.event_name,
                    last.correct(),
                    last.records.len()
                );
            }
        }
        Commands::Event { name } => {
            let store = PredictionStore::open(&settings.predictions_db)?;
            let records = store.event_predictions(&name)?;
            if records.is_empty() {
                println!("No predictions stored for {name}.");
            }
            for record in &records {
                print_record(record);
            }
        }
    }
    Ok(())
}

fn apply_overrides(mut settings: Settings, cli: &Cli) -> Settings {
    if let Some(path) = &cli.corpus_db {
        settings.corpus_db = path.clone();
    }
    if let Some(path) = &cli.predictions_db {
        settings.predictions_db = path.clone();
    }
    if let Some(path) = &cli.model {
        settings.model_path = path.clone();
    }
    if let Some(url) = &cli.source_url {
        settings.source_url = url.trim_end_matches('/').to_string();
    }
    settings
}

fn print_ingest(label: &str, s: &IngestSummary) {
    println!(
        "{label}: source={} known={} attempted={} persisted={} skipped={} dropped={} batches={}",
        s.source_total,
        s.already_persisted,
        s.attempted,
        s.persisted,
        s.skipped,
        s.dropped,
        s.batches
    );
    for err in s.errors.iter().take(6) {
        println!("   - {err}");
    }
}

fn print_pipeline(report: &PipelineReport) {
    println!("Pipeline complete");
    if let Some(s) = &report.fights_ingest {
        print_ingest("fights", s);
    }
    if let Some(s) = &report.fighters_ingest {
        print_ingest("fighters", s);
    }
    println!(
        "Fights: raw={} normalized={} dropped={}",
        report.raw_fights, report.normalized_fights, report.dropped_fights
    );
    println!("History rows: {}", report.history_rows);
    println!(
        "Rows: train={} eval={} columns={}",
        report.train_rows, report.eval_rows, report.schema_columns
    );
    if let Some(m) = &report.metrics {
        println!(
            "Eval: n={} acc={:.3} brier={:.4} logloss={:.4}",
            m.samples, m.accuracy, m.brier, m.log_loss
        );
    }
    if let Some(path) = &report.model_path {
        println!("Model: {}", path.display());
    }
}

fn print_forecast(forecast: &Forecast) {
    match forecast {
        Forecast::Predicted(p) => {
            println!("{} vs {} ({})", p.fighter_1, p.fighter_2, p.weight_class);
            println!(
                "Predicted winner: {} ({:.1}%)",
                p.predicted_winner,
                p.confidence * 100.0
            );
        }
        Forecast::Unresolved(missing) => {
            println!("Cannot predict this matchup:");
            for m in missing {
                match &m.reason {
                    UnresolvedReason::NotFound => println!("  {}: no fight history", m.query),
                    UnresolvedReason::Ambiguous(links) => {
                        println!("  {}: ambiguous, use one of:", m.query);
                        for link in links {
                            println!("    {link}");
                        }
                    }
                }
            }
        }
    }
}

fn print_record(r: &PredictionRecord) {
    let outcome = match (&r.actual_winner, r.is_correct) {
        (Some(actual), Some(true)) => format!("correct ({actual})"),
        (Some(actual), _) => format!("wrong ({actual})"),
        _ => "pending".to_string(),
    };
    println!(
        "  {} vs {} [{}]: {} {:.1}% -> {}",
        r.fighter_1,
        r.fighter_2,
        r.weight_class,
        r.predicted_winner,
        r.confidence * 100.0,
        outcome
    );
}
