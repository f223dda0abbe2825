#![forbid(unsafe_code)]

//! End-to-end scenarios: each builds a pipeline across several crates and
//! checks its materialized output.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use lf_conformance::{load_fixtures, run_suite};
use lf_frame::{DataFrame, DataFrameConfig, FrameError, Series, SeriesConfig, WhichIndex};
use lf_groupby::{group_frame_by_column, group_sequential_by, sequential_distinct_values};
use lf_index::{Index, IndexError, IndexType};
use lf_join::{join, join_frames, join_outer, JoinType};
use lf_seq::{Seq, SeqError, SortDirection};
use lf_types::{Row, Scalar};

// ---------------------------------------------------------------------------
// Scenario 1: re-iteration and laziness
// ---------------------------------------------------------------------------

#[test]
fn e2e_unbaked_chain_recomputes_on_each_iteration() {
    let evaluations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&evaluations);
    let source = Series::from_values(vec![1, 2, 3, 4]);
    let chain = source
        .select(move |v, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            v * 2
        })
        .filter(|v| *v > 2);

    assert_eq!(evaluations.load(Ordering::SeqCst), 0, "construction is lazy");
    assert_eq!(chain.to_array(), vec![4, 6, 8]);
    assert_eq!(chain.to_array(), vec![4, 6, 8]);
    assert_eq!(evaluations.load(Ordering::SeqCst), 8);
    assert_eq!(source.to_array(), vec![1, 2, 3, 4]);

    let baked = chain.bake();
    let after_bake = evaluations.load(Ordering::SeqCst);
    assert_eq!(baked.to_array(), vec![4, 6, 8]);
    assert_eq!(baked.to_array(), vec![4, 6, 8]);
    assert_eq!(evaluations.load(Ordering::SeqCst), after_bake);
}

#[test]
fn e2e_self_referential_index_resolves_on_first_access() {
    let words = Series::from_values(vec!["pear", "fig", "banana"]);
    let by_length = words.with_index_from(|w| w.len());
    assert_eq!(by_length.at(&3), Some("fig"));
    let sorted = by_length.order_by(|w| w.len()).into_series();
    assert_eq!(sorted.index_seq().to_vec(), vec![3, 4, 6]);
}

// ---------------------------------------------------------------------------
// Scenario 2: combinator boundaries
// ---------------------------------------------------------------------------

#[test]
fn e2e_zip_uses_shortest_length() {
    let out = Series::from_values(vec![1, 2, 3]).zip(&Series::from_values(vec![10, 20]), |a, b| {
        (*a, *b)
    });
    assert_eq!(out.to_array(), vec![(1, 10), (2, 20)]);
}

#[test]
fn e2e_skip_take_boundaries() {
    let series = Series::from_values(vec![1, 2, 3, 4]);
    assert!(series.skip(2).take(0).to_array().is_empty());
    assert!(series.skip(10).to_array().is_empty());
}

#[test]
fn e2e_distinct_is_first_seen() {
    let series = Series::from_values(vec![1, 2, 1, 3, 2]);
    assert_eq!(series.distinct().to_array(), vec![1, 2, 3]);
}

// ---------------------------------------------------------------------------
// Scenario 3: windows
// ---------------------------------------------------------------------------

#[test]
fn e2e_fixed_window_keeps_partial_tail() {
    let windows = Series::from_values(vec![1, 2, 3, 4, 5]).window(2).expect("window");
    let chunks: Vec<Vec<i32>> = windows.to_array().iter().map(Series::to_array).collect();
    assert_eq!(chunks, vec![vec![1, 2], vec![3, 4], vec![5]]);
}

#[test]
fn e2e_rolling_window_needs_a_full_period() {
    let windows = Series::from_values(vec![1, 2])
        .rolling_window(3, WhichIndex::First)
        .expect("rolling window");
    assert!(windows.to_array().is_empty());
}

#[test]
fn e2e_zero_period_is_rejected_at_call_time() {
    let series = Series::from_values(vec![1, 2, 3]);
    assert!(matches!(
        series.window(0),
        Err(FrameError::Seq(SeqError::InvalidArgument { operation: "window", .. }))
    ));
    assert!(matches!(
        series.rolling_window(0, WhichIndex::Last),
        Err(FrameError::Seq(SeqError::InvalidArgument { .. }))
    ));
}

#[test]
fn e2e_runs_and_sequential_distinct() {
    let series = Series::from_values(vec!['a', 'a', 'b', 'a', 'a', 'a']);
    let runs = group_sequential_by(&series, |c| *c);
    assert_eq!(runs.count(), 3);
    let collapsed = sequential_distinct_values(&series);
    assert_eq!(collapsed.to_pairs(), vec![(1, 'a'), (2, 'b'), (5, 'a')]);
}

// ---------------------------------------------------------------------------
// Scenario 4: ordering
// ---------------------------------------------------------------------------

#[test]
fn e2e_multi_key_sort_breaks_ties_in_order() {
    let rows = Series::from_values(vec![(1, 300), (2, 100), (0, 100), (3, 5)]);
    let sorted = rows.order_by(|r| r.1).then_by(|r| r.0);
    assert_eq!(sorted.to_array(), vec![(3, 5), (0, 100), (2, 100), (1, 300)]);
}

#[test]
fn e2e_descending_levels_are_independent() {
    let rows = Series::from_values(vec![(1, 1), (2, 2), (1, 2), (2, 1)]);
    let sorted = rows.order_by_descending(|r| r.0).then_by(|r| r.1);
    assert_eq!(sorted.to_array(), vec![(2, 1), (2, 2), (1, 1), (1, 2)]);
    assert_eq!(SortDirection::default(), SortDirection::Ascending);
}

#[test]
fn e2e_nan_keys_sort_as_ties() {
    let values = Series::from_values(vec![2.0, f64::NAN, 1.0]);
    let sorted = values.order_by(|v| *v).to_array();
    assert_eq!(sorted.len(), 3);
    assert!(sorted.iter().any(|v| v.is_nan()));
}

// ---------------------------------------------------------------------------
// Scenario 5: index and range queries
// ---------------------------------------------------------------------------

#[test]
fn e2e_date_index_range_query() {
    let day = |d| NaiveDate::from_ymd_opt(2024, 3, d).expect("valid date");
    let prices = Series::from_index_values(
        vec![day(1), day(4), day(7), day(9)],
        vec![10.0, 11.5, 9.25, 12.0],
    );
    let march = prices.between(day(2), day(8)).expect("between");
    assert_eq!(march.to_array(), vec![11.5, 9.25]);
    assert_eq!(prices.get_index().index_type(), IndexType::Date);
}

#[test]
fn e2e_unsupported_index_type_only_fails_predicates() {
    let index = Index::from_keys(vec![true, false]);
    assert_eq!(index.count(), 2);
    assert!(matches!(
        index.greater_than(&true, &false),
        Err(IndexError::UnsupportedKeyType { .. })
    ));
}

#[test]
fn e2e_string_index_range_query() {
    let series = Series::from_index_values(
        vec!["apple".to_owned(), "banana".to_owned(), "cherry".to_owned()],
        vec![1, 2, 3],
    );
    let out = series.after("apple".to_owned()).expect("after");
    assert_eq!(out.to_array(), vec![2, 3]);
}

// ---------------------------------------------------------------------------
// Scenario 6: elision, aggregation and baking
// ---------------------------------------------------------------------------

#[test]
fn e2e_missing_values_are_elided() {
    let series = Series::from_values(vec![Some(1), None, Some(2)]);
    assert_eq!(series.to_array(), vec![Some(1), Some(2)]);
    assert_eq!(series.to_pairs().len(), 2);

    let cells = Series::from_values(vec![Scalar::Int64(1), Scalar::Null, Scalar::Int64(2)]);
    assert_eq!(cells.to_array().len(), 2);
    assert_eq!(cells.count(), 3);
}

#[test]
fn e2e_empty_source_errors_only_when_demanded() {
    let empty: Series<usize, i32> = Series::empty();
    let chain = empty.select(|v, _| v + 1);
    assert!(matches!(
        chain.first(),
        Err(FrameError::Seq(SeqError::EmptySequence { operation: "first" }))
    ));
    assert!(chain.aggregate(None, |a, b| a + b).is_err());
    assert_eq!(chain.aggregate(Some(7), |a, b| a + b), Ok(7));
}

#[test]
fn e2e_bake_identity() {
    let series = Series::from_values(vec![1, 2, 3]).skip(1);
    let baked = series.bake();
    assert!(!baked.ptr_eq(&series));
    assert!(baked.bake().ptr_eq(&baked));

    let pre_baked: Series<usize, i32> =
        Series::new(SeriesConfig::values(Seq::from_vec(vec![1])).baked(true));
    assert!(pre_baked.bake().ptr_eq(&pre_baked));
}

// ---------------------------------------------------------------------------
// Scenario 7: relational layer
// ---------------------------------------------------------------------------

#[test]
fn e2e_join_correctness() {
    let outer = Series::from_values(vec![1_i64, 2]);
    let inner = Series::from_values(vec![(1_i64, "a")]);

    let inner_join = join(&outer, &inner, |id| *id, |row| row.0, |id, row| (*id, row.1));
    assert_eq!(inner_join.to_array(), vec![(1, "a")]);

    let full = join_outer(&outer, &inner, |id| *id, |row| row.0, |id, row| {
        (id.copied(), row.map(|r| r.1))
    });
    let rows = full.to_array();
    assert_eq!(rows.len(), 2);
    assert!(rows.contains(&(Some(2), None)));
    assert!(rows.contains(&(Some(1), Some("a"))));
}

#[test]
fn e2e_frame_pipeline() {
    let orders = DataFrame::from_rows(vec![
        Row::new().with("id", 1_i64).with("customer", "ann").with("total", 30.0),
        Row::new().with("id", 2_i64).with("customer", "bob").with("total", 12.5),
        Row::new().with("id", 3_i64).with("customer", "ann").with("total", 7.5),
    ]);
    let customers = DataFrame::from_rows(vec![
        Row::new().with("customer", "ann").with("city", "Oslo"),
        Row::new().with("customer", "cat").with("city", "Rome"),
    ]);

    let joined = join_frames(&orders, &customers, JoinType::OuterLeft, "customer", "customer")
        .expect("join frames");
    assert_eq!(joined.column_names(), vec!["id", "customer", "total", "city"]);
    assert_eq!(joined.count(), 3);

    let by_customer = group_frame_by_column(&orders, "customer").expect("group");
    let totals: Vec<f64> = by_customer
        .to_array()
        .iter()
        .map(|frame| frame.get_column("total").sum())
        .collect();
    assert_eq!(totals, vec![37.5, 12.5]);

    let top = orders
        .order_by_column_descending("total")
        .head(2)
        .select_columns(&["id"])
        .reset_index();
    assert_eq!(
        top.to_pairs(),
        vec![
            (0, Row::new().with("id", 1_i64)),
            (1, Row::new().with("id", 2_i64)),
        ]
    );
}

#[test]
fn e2e_frame_configuration_surface() {
    let rows = Seq::from_vec(vec![
        Row::new().with("a", 1_i64),
        Row::new().with("b", 2_i64),
    ]);
    let frame: DataFrame<usize> = DataFrame::new(DataFrameConfig {
        rows: Some(rows),
        consider_all_rows: true,
        ..DataFrameConfig::default()
    });
    assert_eq!(frame.column_names(), vec!["a", "b"]);

    let keyed: Result<DataFrame<String>, FrameError> = DataFrame::try_new(DataFrameConfig {
        rows: Some(Seq::from_vec(vec![Row::new()])),
        ..DataFrameConfig::default()
    });
    assert!(matches!(keyed, Err(FrameError::MissingIndex { .. })));
}

// ---------------------------------------------------------------------------
// Scenario 8: serialization and fixtures
// ---------------------------------------------------------------------------

#[test]
fn e2e_options_serialize_snake_case() {
    assert_eq!(
        serde_json::to_string(&WhichIndex::Last).expect("serialize"),
        "\"last\""
    );
    assert_eq!(
        serde_json::to_string(&SortDirection::Descending).expect("serialize"),
        "\"descending\""
    );
    let row = Row::new().with("x", Scalar::Null);
    assert_eq!(
        serde_json::to_string(&row).expect("serialize"),
        r#"{"x":{"kind":"null"}}"#
    );
}

#[test]
fn e2e_fixture_suite_is_green() {
    let fixtures = load_fixtures(
        r#"[
        {"name":"window","input":[{"kind":"int64","value":1},{"kind":"int64","value":2},{"kind":"int64","value":3}],
         "operation":{"op":"window","period":2},
         "expected":{"kind":"windows","values":[[{"kind":"int64","value":1},{"kind":"int64","value":2}],[{"kind":"int64","value":3}]]}},
        {"name":"distinct","input":[{"kind":"utf8","value":"a"},{"kind":"utf8","value":"a"}],
         "operation":{"op":"distinct"},
         "expected":{"kind":"pairs","values":[[0,{"kind":"utf8","value":"a"}]]}},
        {"name":"except","input":[{"kind":"int64","value":1},{"kind":"int64","value":2}],
         "operation":{"op":"except","other":[{"kind":"int64","value":2}]},
         "expected":{"kind":"pairs","values":[[0,{"kind":"int64","value":1}]]}},
        {"name":"sort_desc","input":[{"kind":"int64","value":1},{"kind":"int64","value":3}],
         "operation":{"op":"sort_descending"},
         "expected":{"kind":"pairs","values":[[1,{"kind":"int64","value":3}],[0,{"kind":"int64","value":1}]]}}
    ]"#,
    )
    .expect("fixtures parse");
    let report = run_suite(&fixtures).expect("suite");
    assert!(report.is_green(), "{report:?}");
    assert_eq!(report.passed, 4);
}
