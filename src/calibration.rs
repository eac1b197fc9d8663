use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

impl Metrics {
    pub fn empty() -> Self {
        Self {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        }
    }
}

pub fn evaluate_probs(predictions: &[f64], labels: &[u8]) -> Metrics {
    if predictions.is_empty() || predictions.len() != labels.len() {
        return Metrics::empty();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;

    for (&p, &label) in predictions.iter().zip(labels) {
        let p = p.clamp(0.0, 1.0);
        let won = label == 1;
        let y = if won { 1.0 } else { 0.0 };
        brier_sum += (p - y).powi(2);

        let actual_prob: f64 = if won { p } else { 1.0 - p };
        log_loss_sum += -actual_prob.clamp(1e-12, 1.0).ln();

        if (p >= 0.5) == won {
            correct += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
    }
}

pub fn calibration_bins(predictions: &[f64], labels: &[u8], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (&p, &label) in predictions.iter().zip(labels) {
        let p = p.clamp(0.0, 1.0);
        let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += p;
        if label == 1 {
            actual_sum[idx] += 1.0;
        }
    }

    let mut out = Vec::with_capacity(bins);
    for i in 0..bins {
        let count = counts[i];
        let (avg_pred, actual_rate) = if count > 0 {
            (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
        } else {
            (0.0, 0.0)
        };
        out.push(CalibrationBin {
            bucket_start: i as f64 / bins as f64,
            bucket_end: (i + 1) as f64 / bins as f64,
            count,
            avg_pred,
            actual_rate,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions_have_zero_brier() {
        let m = evaluate_probs(&[1.0, 0.0, 1.0], &[1, 0, 1]);
        assert_eq!(m.samples, 3);
        assert!(m.brier.abs() < 1e-12);
        assert!(m.log_loss < 1e-9);
        assert_eq!(m.accuracy, 1.0);
    }

    #[test]
    fn coin_flip_scores() {
        let m = evaluate_probs(&[0.5, 0.5], &[1, 0]);
        assert!((m.brier - 0.25).abs() < 1e-12);
        assert!((m.log_loss - std::f64::consts::LN_2).abs() < 1e-12);
    }

    #[test]
    fn mismatched_lengths_are_empty() {
        assert_eq!(evaluate_probs(&[0.2], &[]).samples, 0);
    }

    #[test]
    fn bins_cover_unit_interval() {
        let bins = calibration_bins(&[0.05, 0.95, 1.0], &[0, 1, 1], 10);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins[0].count, 1);
        assert_eq!(bins[9].count, 2);
        assert_eq!(bins[9].actual_rate, 1.0);
    }
}
