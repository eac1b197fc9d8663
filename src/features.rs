use std::collections::BTreeMap;

use crate::history::{STAT_COUNT, StatVector, TRACKED_STATS};
use crate::normalize::DEFAULT_STANCE;

pub const WEIGHT_CLASS_PREFIX: &str = "weight_class_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    One,
    Two,
}

impl Corner {
    pub fn prefix(self) -> &'static str {
        match self {
            Corner::One => "f1_",
            Corner::Two => "f2_",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CornerFeatures {
    pub age: Option<f64>,
    pub height_cm: Option<f64>,
    pub reach_cm: Option<f64>,
    pub stance: String,
    pub hist_avg: StatVector,
}

impl Default for CornerFeatures {
    fn default() -> Self {
        Self {
            age: None,
            height_cm: None,
            reach_cm: None,
            stance: DEFAULT_STANCE.to_string(),
            hist_avg: [0.0; STAT_COUNT],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRow {
    values: BTreeMap<String, Option<f64>>,
}

impl FeatureRow {
    pub fn get(&self, column: &str) -> Option<Option<f64>> {
        self.values.get(column).copied()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn set(&mut self, column: String, value: Option<f64>) {
        self.values.insert(column, value);
    }
}

pub fn numeric_columns() -> Vec<String> {
    let mut out = vec![
        "diff_age".to_string(),
        "diff_height".to_string(),
        "diff_reach".to_string(),
    ];
    for corner in [Corner::One, Corner::Two] {
        for stat in TRACKED_STATS {
            out.push(hist_avg_column(corner, stat.key()));
        }
    }
    out
}

pub fn hist_avg_column(corner: Corner, stat_key: &str) -> String {
    format!("{}{stat_key}_hist_avg", corner.prefix())
}

pub fn weight_class_column(weight_class: &str) -> String {
    format!("{WEIGHT_CLASS_PREFIX}{}", category_slug(weight_class))
}

pub fn stance_column(corner: Corner, stance: &str) -> String {
    format!("{}stance_{}", corner.prefix(), category_slug(stance))
}

pub fn is_categorical(column: &str) -> bool {
    column.starts_with(WEIGHT_CLASS_PREFIX)
        || column.starts_with("f1_stance_")
        || column.starts_with("f2_stance_")
}

pub fn category_slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        "unknown".to_string()
    } else {
        out
    }
}

fn diff(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? - b?)
}

pub fn matchup_features(f1: &CornerFeatures, f2: &CornerFeatures, weight_class: &str) -> FeatureRow {
    let mut row = FeatureRow::default();
    row.set("diff_age".to_string(), diff(f1.age, f2.age));
    row.set("diff_height".to_string(), diff(f1.height_cm, f2.height_cm));
    row.set("diff_reach".to_string(), diff(f1.reach_cm, f2.reach_cm));
    for (corner, side) in [(Corner::One, f1), (Corner::Two, f2)] {
        for (i, stat) in TRACKED_STATS.iter().enumerate() {
            row.set(hist_avg_column(corner, stat.key()), Some(side.hist_avg[i]));
        }
        row.set(stance_column(corner, &side.stance), Some(1.0));
    }
    row.set(weight_class_column(weight_class), Some(1.0));
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corner(age: f64, stance: &str, kd: f64) -> CornerFeatures {
        CornerFeatures {
            age: Some(age),
            height_cm: Some(180.0),
            reach_cm: None,
            stance: stance.to_string(),
            hist_avg: [kd, 0.0, 0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn slug_is_stable() {
        assert_eq!(category_slug("Women's Strawweight"), "women_s_strawweight");
        assert_eq!(category_slug("  Light Heavyweight "), "light_heavyweight");
        assert_eq!(category_slug(""), "unknown");
    }

    #[test]
    fn swapping_corners_mirrors_the_row() {
        let a = corner(30.0, "Orthodox", 1.0);
        let b = corner(27.5, "Southpaw", 0.5);
        let ab = matchup_features(&a, &b, "Lightweight");
        let ba = matchup_features(&b, &a, "Lightweight");
        assert_eq!(ab.get("diff_age"), Some(Some(2.5)));
        assert_eq!(ba.get("diff_age"), Some(Some(-2.5)));
        assert_eq!(ab.get("diff_reach"), Some(None));
        assert_eq!(ab.get("f1_kd_hist_avg"), ba.get("f2_kd_hist_avg"));
        assert_eq!(ab.get("f1_stance_orthodox"), Some(Some(1.0)));
        assert_eq!(ba.get("f2_stance_orthodox"), Some(Some(1.0)));
        assert_eq!(ab.get("weight_class_lightweight"), Some(Some(1.0)));
        assert_eq!(ab.len(), ba.len());
    }

    #[test]
    fn numeric_columns_are_fixed() {
        let cols = numeric_columns();
        assert_eq!(cols.len(), 3 + 2 * STAT_COUNT);
        assert_eq!(cols[3], "f1_kd_hist_avg");
        assert!(cols.iter().all(|c| !is_categorical(c)));
        assert!(is_categorical(&stance_column(Corner::Two, "Switch")));
    }
}
