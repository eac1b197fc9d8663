mod common;

use octagon_oracle::dataset::{Dataset, build_dataset, symmetric_rows};
use octagon_oracle::corpus;
use octagon_oracle::features::{
    Corner, CornerFeatures, hist_avg_column, matchup_features, numeric_columns,
};
use octagon_oracle::history::{self, Stat, TRACKED_STATS, build_history};
use octagon_oracle::normalize::{NormalizedFight, index_fighters, normalize_fight};
use octagon_oracle::schema::SchemaDefinition;

use common::{fight_link, fighter_link, raw_fighters, raw_fights};

fn fights() -> Vec<NormalizedFight> {
    raw_fights().iter().filter_map(normalize_fight).collect()
}

fn sig_idx() -> usize {
    TRACKED_STATS
        .iter()
        .position(|s| *s == Stat::SigStrikesLanded)
        .unwrap()
}

#[test]
fn malformed_fixture_fight_is_dropped() {
    assert_eq!(raw_fights().len(), 12);
    assert_eq!(fights().len(), 11);
}

#[test]
fn history_uses_only_strictly_earlier_fights() {
    let history = build_history(&fights());
    let alex = fighter_link("alex-stone");
    let caleb = fighter_link("caleb-ortiz");
    let sig = sig_idx();

    // Debut: nothing before it.
    let debut = history.entry(&alex, &fight_link("f01")).unwrap();
    assert_eq!(debut.prior_fights, 0);
    assert_eq!(debut.prior_avg, [0.0; 5]);

    // Alex landed 10 in f01, Caleb debuts in f02.
    let second = history.entry(&alex, &fight_link("f02")).unwrap();
    assert_eq!(second.prior_fights, 1);
    assert_eq!(second.prior_avg[sig], 10.0);
    assert_eq!(history.prior_averages(&caleb, &fight_link("f02"))[sig], 0.0);

    // 10 and 20 before f06; f06 itself is not included.
    let third = history.entry(&alex, &fight_link("f06")).unwrap();
    assert_eq!(third.prior_avg[sig], 15.0);
    assert_eq!(third.averages_after()[sig], (10.0 + 20.0 + 18.0) / 3.0);
}

#[test]
fn draws_count_toward_history() {
    let history = build_history(&fights());
    let timeline = history.timeline(&fighter_link("alex-stone"));
    let links: Vec<&str> = timeline.iter().map(|e| e.fight_link.as_str()).collect();
    assert_eq!(
        links,
        vec![
            fight_link("f01"),
            fight_link("f02"),
            fight_link("f06"),
            fight_link("f10")
        ]
    );
    assert!(timeline.windows(2).all(|w| w[0].event_date <= w[1].event_date));
}

#[test]
fn history_table_roundtrips_through_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = corpus::open_db(&dir.path().join("corpus.sqlite")).unwrap();
    history::init_schema(&conn).unwrap();
    let built = build_history(&fights());
    let rows = history::save_history(&mut conn, &built).unwrap();
    assert_eq!(rows, 22);

    // Saving again replaces instead of appending.
    history::save_history(&mut conn, &built).unwrap();
    let loaded = history::load_history(&conn).unwrap();
    assert_eq!(loaded.entry_count(), 22);
    let alex = fighter_link("alex-stone");
    assert_eq!(
        loaded.entry(&alex, &fight_link("f06")).unwrap().prior_avg,
        built.entry(&alex, &fight_link("f06")).unwrap().prior_avg
    );
}

#[test]
fn each_decided_fight_yields_two_mirrored_rows() {
    let fights = fights();
    let history = build_history(&fights);
    let fighters = index_fighters(&raw_fighters());
    let alex_ben = fights
        .iter()
        .find(|f| f.fight_link == fight_link("f01"))
        .unwrap();

    let [won, lost] = symmetric_rows(alex_ben, &history, &fighters).unwrap();
    assert_eq!((won.label, lost.label), (1, 0));
    assert_eq!(won.fighter_1, lost.fighter_2);
    for column in numeric_columns().iter().filter(|c| c.starts_with("diff_")) {
        let a = won.features.get(column).flatten();
        let b = lost.features.get(column).flatten();
        match (a, b) {
            (Some(a), Some(b)) => assert!((a + b).abs() < 1e-9, "{column} should flip sign"),
            (None, None) => {}
            other => panic!("{column} missing on one side only: {other:?}"),
        }
    }
    assert_eq!(won.features.len(), lost.features.len());
    assert_eq!(won.weight_class, lost.weight_class);
    let mut swapped = 0;
    for column in won.features.columns() {
        let mirror = if let Some(rest) = column.strip_prefix("f1_") {
            format!("f2_{rest}")
        } else if let Some(rest) = column.strip_prefix("f2_") {
            format!("f1_{rest}")
        } else if column.starts_with("weight_class_") {
            column.to_string()
        } else {
            continue;
        };
        assert_eq!(
            won.features.get(column),
            lost.features.get(&mirror),
            "{column} should reappear as {mirror}"
        );
        swapped += 1;
    }
    assert!(won.features.columns().any(|c| c.starts_with("f1_stance_")));
    assert!(won.features.columns().any(|c| c.starts_with("weight_class_")));
    assert!(swapped > 2 * TRACKED_STATS.len());
    let sig = TRACKED_STATS[sig_idx()].key();
    assert_eq!(
        won.features.get(&hist_avg_column(Corner::One, sig)),
        lost.features.get(&hist_avg_column(Corner::Two, sig))
    );

    let draw = fights
        .iter()
        .find(|f| f.fight_link == fight_link("f10"))
        .unwrap();
    assert!(symmetric_rows(draw, &history, &fighters).is_none());
}

#[test]
fn dataset_split_is_balanced_and_seeded() {
    let fights = fights();
    let history = build_history(&fights);
    let fighters = index_fighters(&raw_fighters());

    let a = build_dataset(&fights, &history, &fighters, 42, 0.2);
    let b = build_dataset(&fights, &history, &fighters, 42, 0.2);
    assert_eq!(a.fights_used, 10);
    assert_eq!(a.fights_unresolved, 1);
    assert_eq!(a.train.len() + a.eval.len(), 20);
    assert_eq!(a.eval.len(), 4);
    let labels = |d: &Dataset| {
        d.rows()
            .map(|r| (r.fight_link.clone(), r.fighter_1.clone(), r.label))
            .collect::<Vec<_>>()
    };
    assert_eq!(labels(&a), labels(&b));
    assert_eq!(a.rows().filter(|r| r.label == 1).count(), 10);
}

#[test]
fn frozen_schema_ignores_new_categories_at_serving_time() {
    let fights = fights();
    let history = build_history(&fights);
    let fighters = index_fighters(&raw_fighters());
    let dataset = build_dataset(&fights, &history, &fighters, 7, 0.2);
    let schema = SchemaDefinition::freeze(
        dataset.rows().map(|r| &r.features),
        dataset.train.iter().map(|r| &r.features),
    );

    assert!(schema.columns.iter().any(|c| c == "weight_class_welterweight"));
    assert!(!schema.columns.iter().any(|c| c.contains("heavyweight")));

    let corner = CornerFeatures {
        stance: "Open Stance".to_string(),
        ..Default::default()
    };
    let row = matchup_features(&corner, &corner, "Heavyweight");
    let aligned = schema.align(&row);
    assert_eq!(aligned.values.len(), schema.width());
    assert!(aligned.unseen.iter().any(|c| c.contains("heavyweight")));
    assert!(aligned.unseen.iter().any(|c| c.contains("open_stance")));
    for (col, v) in schema.columns.iter().zip(&aligned.values) {
        if col.starts_with("weight_class_") {
            assert_eq!(*v, 0.0, "{col} should be zero for an unseen class");
        }
    }
}
