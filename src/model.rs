use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calibration::{CalibrationBin, Metrics, calibration_bins, evaluate_probs};
use crate::dataset::{Dataset, TrainingRow};
use crate::schema::SchemaDefinition;

pub const BUNDLE_VERSION: u32 = 1;

const FIT_SPLIT: f64 = 0.85;
const L2_REG: f64 = 0.01;
const MAX_ITERS: usize = 2000;
const LR_START: f64 = 0.3;
const IMPROVEMENT_EPS: f64 = 1e-5;
const PATIENCE_CHECKS: usize = 20;
const CALIBRATION_BINS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    pub coeffs: Vec<f64>,
    pub intercept: f64,
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn standardized(x: f64, mean: f64, std: f64) -> f64 {
    (x - mean) / std.max(1e-6)
}

fn feature_norm_stats(xs: &[Vec<f64>], width: usize) -> (Vec<f64>, Vec<f64>) {
    let mut mean = vec![0.0; width];
    let mut var = vec![0.0; width];
    if xs.is_empty() {
        return (mean, vec![1.0; width]);
    }
    for x in xs {
        for i in 0..width {
            mean[i] += x[i];
        }
    }
    let n = xs.len() as f64;
    for v in &mut mean {
        *v /= n;
    }
    for x in xs {
        for i in 0..width {
            let d = x[i] - mean[i];
            var[i] += d * d;
        }
    }
    for v in &mut var {
        *v = (*v / n).sqrt().max(1e-6);
    }
    (mean, var)
}

impl LogisticModel {
    pub fn width(&self) -> usize {
        self.coeffs.len()
    }

    fn logit_standardized(&self, z: &[f64]) -> f64 {
        self.intercept + self.coeffs.iter().zip(z).map(|(c, x)| c * x).sum::<f64>()
    }

    fn standardize(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .enumerate()
            .map(|(i, v)| standardized(*v, self.mean[i], self.std[i]))
            .collect()
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.logit_standardized(&self.standardize(x)))
    }

    pub fn fit(xs: &[Vec<f64>], ys: &[u8]) -> Result<Self> {
        if xs.is_empty() || xs.len() != ys.len() {
            return Err(anyhow!("cannot fit on {} rows with {} labels", xs.len(), ys.len()));
        }
        let width = xs[0].len();
        if xs.iter().any(|x| x.len() != width) {
            return Err(anyhow!("ragged feature matrix"));
        }

        let (mean, std) = feature_norm_stats(xs, width);
        let mut model = LogisticModel {
            mean,
            std,
            coeffs: vec![0.0; width],
            intercept: 0.0,
        };
        let zs: Vec<Vec<f64>> = xs.iter().map(|x| model.standardize(x)).collect();

        let cut = ((zs.len() as f64) * FIT_SPLIT).round() as usize;
        let cut = cut.clamp(1, zs.len());
        let (train, val) = zs.split_at(cut);
        let (train_y, val_y) = ys.split_at(cut);
        let (val, val_y) = if val.is_empty() { (train, train_y) } else { (val, val_y) };

        let mut best = (model.coeffs.clone(), model.intercept);
        let mut best_val = model.log_loss_standardized(val, val_y);
        let mut no_improve = 0usize;

        for iter in 0..MAX_ITERS {
            let mut grad = vec![0.0; width];
            let mut grad_b = 0.0;
            for (z, y) in train.iter().zip(train_y) {
                let p = sigmoid(model.logit_standardized(z));
                let dz = p - f64::from(*y);
                for j in 0..width {
                    grad[j] += dz * z[j];
                }
                grad_b += dz;
            }

            let n = train.len() as f64;
            let lr = LR_START / (1.0 + (iter as f64 * 0.003));
            for j in 0..width {
                let g = grad[j] / n + L2_REG * model.coeffs[j];
                model.coeffs[j] -= lr * g;
            }
            model.intercept -= lr * grad_b / n;

            if iter % 20 == 0 || iter + 1 == MAX_ITERS {
                let val_ll = model.log_loss_standardized(val, val_y);
                if val_ll + IMPROVEMENT_EPS < best_val {
                    best_val = val_ll;
                    best = (model.coeffs.clone(), model.intercept);
                    no_improve = 0;
                } else {
                    no_improve = no_improve.saturating_add(1);
                    if no_improve >= PATIENCE_CHECKS {
                        break;
                    }
                }
            }
        }

        model.coeffs = best.0;
        model.intercept = best.1;
        Ok(model)
    }

    fn log_loss_standardized(&self, zs: &[Vec<f64>], ys: &[u8]) -> f64 {
        if zs.is_empty() {
            return f64::INFINITY;
        }
        let mut sum = 0.0;
        for (z, y) in zs.iter().zip(ys) {
            let p = sigmoid(self.logit_standardized(z));
            let p = if *y == 1 { p } else { 1.0 - p };
            sum += -p.max(1e-9).ln();
        }
        sum / zs.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub version: u32,
    pub trained_at: String,
    pub seed: u64,
    pub train_rows: usize,
    pub eval_rows: usize,
    pub schema: SchemaDefinition,
    pub model: LogisticModel,
    pub metrics: Metrics,
    pub calibration: Vec<CalibrationBin>,
}

fn matrix(schema: &SchemaDefinition, rows: &[TrainingRow]) -> (Vec<Vec<f64>>, Vec<u8>) {
    let xs = rows.iter().map(|r| schema.transform(&r.features)).collect();
    let ys = rows.iter().map(|r| r.label).collect();
    (xs, ys)
}

pub fn train_bundle(dataset: &Dataset, seed: u64) -> Result<ModelBundle> {
    if dataset.train.is_empty() {
        return Err(anyhow!("training partition is empty"));
    }
    let schema = SchemaDefinition::freeze(
        dataset.rows().map(|r| &r.features),
        dataset.train.iter().map(|r| &r.features),
    );

    let (train_x, train_y) = matrix(&schema, &dataset.train);
    let model = LogisticModel::fit(&train_x, &train_y)?;

    let (eval_x, eval_y) = matrix(&schema, &dataset.eval);
    let probs: Vec<f64> = eval_x.iter().map(|x| model.predict_proba(x)).collect();
    let metrics = evaluate_probs(&probs, &eval_y);
    let calibration = calibration_bins(&probs, &eval_y, CALIBRATION_BINS);
    info!(
        columns = schema.width(),
        eval_samples = metrics.samples,
        accuracy = metrics.accuracy,
        brier = metrics.brier,
        log_loss = metrics.log_loss,
        "model trained"
    );

    Ok(ModelBundle {
        version: BUNDLE_VERSION,
        trained_at: Utc::now().to_rfc3339(),
        seed,
        train_rows: dataset.train.len(),
        eval_rows: dataset.eval.len(),
        schema,
        model,
        metrics,
        calibration,
    })
}

impl ModelBundle {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create model dir {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self).context("serialize model bundle")?;
        fs::write(&tmp, json).context("write model bundle")?;
        fs::rename(&tmp, path).context("swap model bundle")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read model bundle {}", path.display()))?;
        let bundle: ModelBundle =
            serde_json::from_str(&raw).context("decode model bundle")?;
        if bundle.version != BUNDLE_VERSION {
            return Err(anyhow!("unsupported model bundle version {}", bundle.version));
        }
        if !bundle.schema.is_consistent() {
            return Err(anyhow!("model bundle schema fingerprint mismatch"));
        }
        if bundle.model.width() != bundle.schema.width()
            || bundle.model.mean.len() != bundle.schema.width()
            || bundle.model.std.len() != bundle.schema.width()
        {
            return Err(anyhow!(
                "model width {} does not match schema width {}",
                bundle.model.width(),
                bundle.schema.width()
            ));
        }
        Ok(bundle)
    }

    pub fn predict_row(&self, row: &crate::features::FeatureRow) -> f64 {
        self.model.predict_proba(&self.schema.transform(row))
    }
}
