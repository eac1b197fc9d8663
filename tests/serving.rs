mod common;

use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDate;

use octagon_oracle::audit::run_audit;
use octagon_oracle::error::AuditError;
use octagon_oracle::oracle::{Forecast, OracleContext, UnresolvedReason};
use octagon_oracle::pipeline::{PipelineOptions, PipelineReport, Stage, run_pipeline};
use octagon_oracle::predictions::{AD_HOC_EVENT, PredictionStatus, PredictionStore};
use octagon_oracle::retrain::{
    BackgroundRetrainer, PipelineLock, RetrainHandle, RetrainScheduler, RetrainStatus,
};
use octagon_oracle::source::{Fixture, UpcomingCard};

use common::{FakeFixtures, FakeOutcomes, FakeSource, fighter_link, quick_opts};

fn options(dir: &Path) -> PipelineOptions {
    PipelineOptions {
        corpus_db: dir.join("corpus.sqlite"),
        model_path: dir.join("model.json"),
        ingest: Some(quick_opts()),
        seed: 42,
        eval_fraction: 0.2,
    }
}

fn trained(dir: &Path) -> (PipelineReport, OracleContext) {
    let opts = options(dir);
    let source = FakeSource::from_fixtures();
    let report = run_pipeline(&opts, Some(&source)).unwrap();
    let ctx = OracleContext::load(&opts.model_path, &opts.corpus_db)
        .unwrap()
        .with_as_of(NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
    (report, ctx)
}

#[derive(Default)]
struct RecordingScheduler {
    reasons: Mutex<Vec<String>>,
}

impl RecordingScheduler {
    fn calls(&self) -> usize {
        self.reasons.lock().unwrap().len()
    }
}

impl RetrainScheduler for RecordingScheduler {
    fn schedule(&self, reason: &str) -> RetrainHandle {
        self.reasons.lock().unwrap().push(reason.to_string());
        RetrainHandle::queued(reason)
    }
}

/// Card from the fixture: two resolvable bouts, one pending without an
/// outcome, plus an ad-hoc pick that the audit must ignore.
fn seeded_store() -> PredictionStore {
    let store = PredictionStore::in_memory().unwrap();
    for (f1, f2, pick) in [
        ("Alex Stone", "Ben Hart", "Ben Hart"),
        ("Caleb Ortiz", "Eli Park", "Eli Park"),
        ("Dan Moss", "Gus Nobody", "Dan Moss"),
    ] {
        store
            .record_prediction("UFC 270", f1, f2, "Lightweight", pick, 0.6)
            .unwrap();
    }
    store
        .record_prediction(AD_HOC_EVENT, "Alex Stone", "Ben Hart", "Lightweight", "Alex Stone", 0.55)
        .unwrap();
    store
}

#[test]
fn full_pipeline_trains_and_persists_a_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let (report, ctx) = trained(dir.path());

    assert_eq!(
        report.stages_run,
        vec![
            Stage::OpenCorpus,
            Stage::IngestFights,
            Stage::IngestFighters,
            Stage::Normalize,
            Stage::BuildHistory,
            Stage::BuildDataset,
            Stage::Train,
        ]
    );
    assert_eq!(report.raw_fights, 11);
    assert_eq!(report.normalized_fights, 11);
    assert_eq!(report.history_rows, 22);
    assert_eq!((report.train_rows, report.eval_rows), (16, 4));
    assert_eq!(report.metrics.as_ref().map(|m| m.samples), Some(4));

    let bundle = ctx.bundle();
    assert_eq!(bundle.schema.width(), report.schema_columns);
    assert!(bundle.schema.is_consistent());
    assert_eq!(ctx.profiles().len(), 7);
}

#[test]
fn failed_stage_stops_the_run_and_keeps_the_previous_bundle() {
    let dir = tempfile::tempdir().unwrap();
    trained(dir.path());
    let model_path = dir.path().join("model.json");
    let before = fs::read_to_string(&model_path).unwrap();

    let mut empty = options(dir.path());
    empty.corpus_db = dir.path().join("empty.sqlite");
    empty.ingest = None;
    let err = run_pipeline(&empty, None).unwrap_err();
    assert_eq!(err.stage, Stage::Normalize);
    assert!(err.to_string().contains("normalize"));
    assert_eq!(fs::read_to_string(&model_path).unwrap(), before);

    let no_source = options(dir.path());
    let err = run_pipeline(&no_source, None).unwrap_err();
    assert_eq!(err.stage, Stage::IngestFights);
}

#[test]
fn prediction_is_order_symmetric() {
    let dir = tempfile::tempdir().unwrap();
    let (_, ctx) = trained(dir.path());

    let ab = ctx.predict("Alex Stone", "Ben Hart", "Lightweight");
    let ba = ctx.predict("ben hart", "  Alex   Stone ", "Lightweight");
    let (ab, ba) = (ab.prediction().unwrap(), ba.prediction().unwrap());
    assert!((ab.probability_f1 + ba.probability_f1 - 1.0).abs() < 1e-9);
    assert_eq!(ab.predicted_winner, ba.predicted_winner);
    assert!(ab.confidence >= 0.5 && ab.confidence <= 1.0);
    assert_eq!(ab.fighter_1_link, fighter_link("alex-stone"));
}

#[test]
fn unknown_and_ambiguous_names_are_reported_not_guessed() {
    let dir = tempfile::tempdir().unwrap();
    let (_, ctx) = trained(dir.path());
    let store = PredictionStore::in_memory().unwrap();

    let forecast = ctx
        .predict_ad_hoc(&store, "Gus Nobody", "Chris Lee", "Welterweight")
        .unwrap();
    let Forecast::Unresolved(missing) = forecast else {
        panic!("expected an unresolved forecast");
    };
    assert_eq!(missing.len(), 2);
    assert_eq!(missing[0].query, "Gus Nobody");
    assert_eq!(missing[0].reason, UnresolvedReason::NotFound);
    assert_eq!(
        missing[1].reason,
        UnresolvedReason::Ambiguous(vec![fighter_link("chris-lee-1"), fighter_link("chris-lee-2")])
    );
    assert_eq!(store.statistics().unwrap().pending, 0);
    assert!(store.event_predictions(AD_HOC_EVENT).unwrap().is_empty());

    // A link picks one of the namesakes.
    let by_link = ctx.predict(&fighter_link("chris-lee-1"), "Dan Moss", "Welterweight");
    assert!(by_link.prediction().is_some());
}

#[test]
fn unseen_weight_class_still_predicts() {
    let dir = tempfile::tempdir().unwrap();
    let (_, ctx) = trained(dir.path());
    let forecast = ctx.predict("Alex Stone", "Dan Moss", "Catch Weight");
    let p = forecast.prediction().unwrap().probability_f1;
    assert!(p.is_finite() && (0.0..=1.0).contains(&p));
}

#[test]
fn next_event_is_forecast_once_then_served_from_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let (_, ctx) = trained(dir.path());
    let store = PredictionStore::in_memory().unwrap();
    let card = FakeFixtures::from_fixture();

    let first = ctx.predict_next_event(&store, &card).unwrap().unwrap();
    assert_eq!(first.event_name, "UFC 270");
    assert!(!first.cached);
    assert_eq!(first.records.len(), 2);
    assert_eq!(first.unresolved.len(), 2);
    assert!(first.records.iter().all(|r| r.status() == PredictionStatus::Pending));

    let second = ctx.predict_next_event(&store, &card).unwrap().unwrap();
    assert!(second.cached);
    assert_eq!(second.records, first.records);
    assert_eq!(store.statistics().unwrap().pending, 2);

    let nothing = ctx.predict_next_event(&store, &FakeFixtures(None)).unwrap();
    assert!(nothing.is_none());
}

#[test]
fn growing_card_predicts_only_the_new_bouts() {
    let dir = tempfile::tempdir().unwrap();
    let (_, ctx) = trained(dir.path());
    let store = PredictionStore::in_memory().unwrap();
    let fixture = |f1: &str, f2: &str| Fixture {
        fighter_1: f1.to_string(),
        fighter_2: f2.to_string(),
        weight_class: "Lightweight".to_string(),
    };
    let mut card = UpcomingCard {
        event_name: "UFC 271".to_string(),
        fixtures: vec![fixture("Alex Stone", "Ben Hart")],
    };

    let first = ctx
        .predict_next_event(&store, &FakeFixtures(Some(card.clone())))
        .unwrap()
        .unwrap();
    assert_eq!(first.records.len(), 1);

    card.fixtures.push(fixture("Caleb Ortiz", "Eli Park"));
    let grown = ctx
        .predict_next_event(&store, &FakeFixtures(Some(card.clone())))
        .unwrap()
        .unwrap();
    assert!(!grown.cached);
    assert_eq!(grown.records.len(), 2);
    assert_eq!(grown.records[0], first.records[0]);

    let again = ctx
        .predict_next_event(&store, &FakeFixtures(Some(card)))
        .unwrap()
        .unwrap();
    assert!(again.cached);
    assert_eq!(again.records, grown.records);
}

#[test]
fn audit_resolves_once_and_schedules_one_retrain() {
    let mut store = seeded_store();
    let scheduler = RecordingScheduler::default();
    let outcomes = FakeOutcomes::from_fixture();

    let first = run_audit(&mut store, &outcomes, &scheduler).unwrap();
    assert_eq!(first.report.pending, 3);
    assert_eq!(first.report.updated, 2);
    assert_eq!(first.report.correct, 1);
    assert!(first.retrain.is_some());
    assert_eq!(scheduler.calls(), 1);

    let records = store.event_predictions("UFC 270").unwrap();
    assert_eq!(records[0].actual_winner.as_deref(), Some("Ben Hart"));
    assert_eq!(records[0].is_correct, Some(true));
    assert_eq!(records[1].actual_winner.as_deref(), Some("Caleb Ortiz"));
    assert_eq!(records[1].is_correct, Some(false));
    assert_eq!(records[2].status(), PredictionStatus::Pending);
    let ad_hoc = &store.event_predictions(AD_HOC_EVENT).unwrap()[0];
    assert_eq!(ad_hoc.status(), PredictionStatus::Pending);

    let second = run_audit(&mut store, &outcomes, &scheduler).unwrap();
    assert_eq!(second.report.pending, 1);
    assert_eq!(second.report.updated, 0);
    assert!(second.retrain.is_none());
    assert_eq!(scheduler.calls(), 1);
    assert_eq!(store.event_predictions("UFC 270").unwrap(), records);

    let stats = store.statistics().unwrap();
    assert_eq!((stats.resolved, stats.correct, stats.pending), (2, 1, 1));
    let summary = store.last_event_summary().unwrap().unwrap();
    assert_eq!(summary.event_name, "UFC 270");
    assert_eq!(summary.correct(), 1);
}

#[test]
fn unavailable_outcomes_change_nothing() {
    let mut store = seeded_store();
    let scheduler = RecordingScheduler::default();

    let down = FakeOutcomes(Err("gateway timeout".to_string()));
    let err = run_audit(&mut store, &down, &scheduler).unwrap_err();
    assert!(matches!(err, AuditError::OutcomesUnavailable(_)));

    let empty = FakeOutcomes(Ok(Vec::new()));
    let err = run_audit(&mut store, &empty, &scheduler).unwrap_err();
    assert!(matches!(err, AuditError::OutcomesUnavailable(_)));

    assert_eq!(store.pending().unwrap().len(), 3);
    assert_eq!(scheduler.calls(), 0);
}

#[test]
fn audit_without_pending_records_skips_the_fetch() {
    let mut store = PredictionStore::in_memory().unwrap();
    store
        .record_prediction(AD_HOC_EVENT, "Alex Stone", "Ben Hart", "", "Alex Stone", 0.5)
        .unwrap();
    let scheduler = RecordingScheduler::default();
    let down = FakeOutcomes(Err("should not be called".to_string()));

    let outcome = run_audit(&mut store, &down, &scheduler).unwrap();
    assert_eq!(outcome.report.updated, 0);
    assert!(outcome.retrain.is_none());
}

#[test]
fn audit_retrain_rebuilds_the_bundle_in_the_background() {
    let dir = tempfile::tempdir().unwrap();
    trained(dir.path());
    let model_path = dir.path().join("model.json");
    let first_trained = OracleContext::load(&model_path, &dir.path().join("corpus.sqlite"))
        .unwrap()
        .bundle()
        .trained_at
        .clone();

    let mut job_opts = options(dir.path());
    job_opts.ingest = None;
    let retrainer = BackgroundRetrainer::new(dir.path().join("pipeline.lock"), move || {
        run_pipeline(&job_opts, None)?;
        Ok(())
    });

    let mut store = seeded_store();
    let outcome = run_audit(&mut store, &FakeOutcomes::from_fixture(), &retrainer).unwrap();
    let handle = outcome.retrain.unwrap();
    assert_eq!(handle.wait(Duration::from_secs(60)), RetrainStatus::Succeeded);

    let reloaded = OracleContext::load(&model_path, &dir.path().join("corpus.sqlite")).unwrap();
    assert!(reloaded.bundle().trained_at >= first_trained);
    assert!(PipelineLock::acquire(&dir.path().join("pipeline.lock")).is_ok());
}
