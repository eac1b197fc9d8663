use serde::Serialize;
use tracing::info;

use crate::error::AuditError;
use crate::predictions::{PredictionStore, Resolution};
use crate::retrain::{RetrainHandle, RetrainScheduler};
use crate::source::{OutcomeSource, winners_by_name};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub pending: usize,
    pub updated: usize,
    pub correct: usize,
}

#[derive(Debug)]
pub struct AuditOutcome {
    pub report: AuditReport,
    pub retrain: Option<RetrainHandle>,
}

pub fn run_audit(
    store: &mut PredictionStore,
    outcomes: &dyn OutcomeSource,
    scheduler: &dyn RetrainScheduler,
) -> Result<AuditOutcome, AuditError> {
    let pending = store.pending().map_err(AuditError::Store)?;
    if pending.is_empty() {
        info!(updated = 0, "no predictions pending audit");
        return Ok(AuditOutcome {
            report: AuditReport::default(),
            retrain: None,
        });
    }

    let latest = outcomes
        .latest_outcomes()
        .map_err(AuditError::OutcomesUnavailable)?;
    let winners = winners_by_name(&latest);
    if winners.is_empty() {
        return Err(AuditError::OutcomesUnavailable(anyhow::anyhow!(
            "latest event returned no decided bouts"
        )));
    }

    let mut resolutions = Vec::new();
    let mut correct = 0usize;
    for record in &pending {
        let Some(actual) = winners
            .get(&record.fighter_1)
            .or_else(|| winners.get(&record.fighter_2))
        else {
            continue;
        };
        if *actual == record.predicted_winner {
            correct += 1;
        }
        resolutions.push(Resolution {
            id: record.id,
            actual_winner: actual.clone(),
        });
    }

    let updated = store.resolve(&resolutions).map_err(AuditError::Store)?;
    let report = AuditReport {
        pending: pending.len(),
        updated,
        correct,
    };
    info!(
        pending = report.pending,
        updated = report.updated,
        correct = report.correct,
        "audit finished"
    );

    let retrain = (updated > 0).then(|| scheduler.schedule("audit resolved predictions"));
    Ok(AuditOutcome { report, retrain })
}
