use std::collections::{BTreeSet, HashSet};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::features::{FeatureRow, is_categorical, numeric_columns};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanImputer {
    /// One fill value per schema column, fit-time only.
    pub means: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub columns: Vec<String>,
    pub imputer: MeanImputer,
    pub fingerprint: String,
}

/// An aligned vector plus what alignment had to do to produce it.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub values: Vec<f64>,
    /// Columns of the input row that the schema does not know. Ignored.
    pub unseen: Vec<String>,
    /// Schema columns whose value came from the imputer.
    pub imputed: Vec<String>,
}

pub fn fingerprint(columns: &[String]) -> String {
    let mut hasher = Sha256::new();
    for col in columns {
        hasher.update(col.as_bytes());
        hasher.update(b"\n");
    }
    BASE64.encode(hasher.finalize())
}

/// Value a row contributes to `column` before imputation. Absent columns are
/// zero, which is how a one-hot category the row does not have is encoded.
fn raw_value(row: &FeatureRow, column: &str) -> Option<f64> {
    match row.get(column) {
        None => Some(0.0),
        Some(value) => value.filter(|v| v.is_finite()),
    }
}

impl SchemaDefinition {
    /// Enumerates columns over `all_rows` and fits the imputer on
    /// `train_rows`.
    pub fn freeze<'a>(
        all_rows: impl IntoIterator<Item = &'a FeatureRow>,
        train_rows: impl IntoIterator<Item = &'a FeatureRow>,
    ) -> Self {
        let mut columns = numeric_columns();
        let mut categorical = BTreeSet::new();
        for row in all_rows {
            for col in row.columns().filter(|c| is_categorical(c)) {
                categorical.insert(col.to_string());
            }
        }
        columns.extend(categorical);

        let mut sums = vec![0.0; columns.len()];
        let mut counts = vec![0usize; columns.len()];
        for row in train_rows {
            for (i, col) in columns.iter().enumerate() {
                if let Some(v) = raw_value(row, col) {
                    sums[i] += v;
                    counts[i] += 1;
                }
            }
        }
        let means = sums
            .iter()
            .zip(&counts)
            .map(|(sum, n)| if *n == 0 { 0.0 } else { sum / *n as f64 })
            .collect();

        let fingerprint = fingerprint(&columns);
        Self {
            columns,
            imputer: MeanImputer { means },
            fingerprint,
        }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// True when the stored fingerprint still matches the column list.
    pub fn is_consistent(&self) -> bool {
        self.imputer.means.len() == self.columns.len()
            && fingerprint(&self.columns) == self.fingerprint
    }

    pub fn align(&self, row: &FeatureRow) -> Alignment {
        let mut values = Vec::with_capacity(self.columns.len());
        let mut imputed = Vec::new();
        for (i, col) in self.columns.iter().enumerate() {
            match raw_value(row, col) {
                Some(v) => values.push(v),
                None => {
                    values.push(self.imputer.means.get(i).copied().unwrap_or(0.0));
                    imputed.push(col.clone());
                }
            }
        }
        let known: HashSet<&str> = self.columns.iter().map(String::as_str).collect();
        let unseen: Vec<String> = row
            .columns()
            .filter(|c| !known.contains(c))
            .map(str::to_string)
            .collect();
        if !unseen.is_empty() {
            debug!(unseen = ?unseen, "ignoring columns outside the frozen schema");
        }
        Alignment {
            values,
            unseen,
            imputed,
        }
    }

    pub fn transform(&self, row: &FeatureRow) -> Vec<f64> {
        self.align(row).values
    }
}
