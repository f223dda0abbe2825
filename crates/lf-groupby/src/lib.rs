#![forbid(unsafe_code)]

use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexMap;
use lf_frame::{DataFrame, Series};
use lf_seq::Seq;
use lf_types::{Element, Scalar, Value};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GroupByError {
    #[error("frame has no column `{name}`")]
    UnknownColumn { name: String },
}

/// Hash-groups the pairs of `series` by `selector`.
///
/// Groups come out in order of each key's first appearance and keep their
/// members in source order. The table is built when the result is iterated.
pub fn group_by<K, V, G, F>(series: &Series<K, V>, selector: F) -> Series<usize, Series<K, V>>
where
    K: Element,
    V: Value,
    G: Hash + Eq + 'static,
    F: Fn(&V) -> G + Send + Sync + 'static,
{
    let source = series.clone();
    let selector = Arc::new(selector);
    Series::from_seq(Seq::from_fn(move || {
        let mut groups: IndexMap<G, Vec<(K, V)>> = IndexMap::new();
        for (key, value) in source.pairs_seq().cursor() {
            groups
                .entry(selector(&value))
                .or_default()
                .push((key, value));
        }
        tracing::debug!(groups = groups.len(), "built group table");
        groups
            .into_values()
            .map(Series::from_baked_pairs)
            .collect::<Vec<_>>()
    }))
}

/// Splits `series` into contiguous runs of equal `selector` output.
pub fn group_sequential_by<K, V, G, F>(
    series: &Series<K, V>,
    selector: F,
) -> Series<usize, Series<K, V>>
where
    K: Element,
    V: Value,
    G: PartialEq,
    F: Fn(&V) -> G + Send + Sync + 'static,
{
    series.variable_window(move |prev, next| selector(prev) == selector(next))
}

/// Runs of equal values.
pub fn group_sequential_by_values<K, V>(series: &Series<K, V>) -> Series<usize, Series<K, V>>
where
    K: Element,
    V: Value + PartialEq,
{
    group_sequential_by(series, V::clone)
}

/// Collapses each run of equal `selector` output to its last pair, index
/// included.
pub fn sequential_distinct<K, V, G, F>(series: &Series<K, V>, selector: F) -> Series<K, V>
where
    K: Element,
    V: Value,
    G: PartialEq,
    F: Fn(&V) -> G + Send + Sync + 'static,
{
    let runs = group_sequential_by(series, selector);
    Series::from_pairs_seq(Seq::from_fn(move || {
        runs.values_seq()
            .cursor()
            .filter_map(|run| run.pairs_seq().last().ok())
    }))
}

/// [`sequential_distinct`] over the values themselves.
pub fn sequential_distinct_values<K, V>(series: &Series<K, V>) -> Series<K, V>
where
    K: Element,
    V: Value + PartialEq,
{
    sequential_distinct(series, V::clone)
}

/// Groups the rows of `frame` by the cells of `column`. Each group keeps the
/// frame's column names.
///
/// The column is checked against the detected column names at call time,
/// which reads the frame's first row. Grouping itself happens on iteration.
pub fn group_frame_by_column<K: Element>(
    frame: &DataFrame<K>,
    column: &str,
) -> Result<Series<usize, DataFrame<K>>, GroupByError> {
    if !frame.column_names().is_empty() && !frame.has_column(column) {
        return Err(GroupByError::UnknownColumn {
            name: column.to_owned(),
        });
    }
    let column = column.to_owned();
    let template = frame.clone();
    let groups = group_by(frame.as_series(), move |row| row.get_or_null(&column));
    Ok(groups.select(move |group, _| template.with_series(group.clone())))
}

/// Sums each group of `series`, keyed by group.
pub fn group_sum<K, G, F>(series: &Series<K, Scalar>, selector: F) -> Series<G, f64>
where
    K: Element,
    G: Value + Hash + Eq,
    F: Fn(&Scalar) -> G + Send + Sync + 'static,
{
    let selector = Arc::new(selector);
    let keyed = Arc::clone(&selector);
    let groups = group_by(series, move |value| keyed(value));
    Series::from_pairs_seq(Seq::from_fn(move || {
        let selector = Arc::clone(&selector);
        groups.values_seq().cursor().filter_map(move |group| {
            let key = selector(&group.first().ok()?);
            Some((key, group.sum()))
        })
    }))
}

#[cfg(test)]
mod tests {
    use lf_frame::{DataFrame, Series};
    use lf_types::{Row, Scalar};

    use super::{
        group_by, group_frame_by_column, group_sequential_by, group_sequential_by_values,
        group_sum, sequential_distinct, sequential_distinct_values, GroupByError,
    };

    #[test]
    fn group_by_preserves_first_appearance_order() {
        let series = Series::from_values(vec![3, 1, 4, 1, 5, 9, 2, 6]);
        let groups = group_by(&series, |v| v % 3);
        let pairs: Vec<Vec<(usize, i32)>> =
            groups.to_array().iter().map(Series::to_pairs).collect();
        assert_eq!(
            pairs,
            vec![
                vec![(0, 3), (5, 9), (7, 6)],
                vec![(1, 1), (2, 4), (3, 1)],
                vec![(4, 5), (6, 2)],
            ]
        );
        assert!(groups.to_array().iter().all(Series::is_baked));
    }

    #[test]
    fn group_by_on_empty_series_has_no_groups() {
        let series: Series<usize, i32> = Series::empty();
        assert!(group_by(&series, |v| *v).to_array().is_empty());
    }

    #[test]
    fn group_sequential_by_splits_runs() {
        let series = Series::from_values(vec!["a", "ab", "b", "ba", "a"]);
        let runs = group_sequential_by(&series, |v| v.chars().next());
        let values: Vec<Vec<&str>> = runs.to_array().iter().map(Series::to_array).collect();
        assert_eq!(values, vec![vec!["a", "ab"], vec!["b", "ba"], vec!["a"]]);
    }

    #[test]
    fn group_sequential_by_values_splits_equal_runs() {
        let series = Series::from_values(vec![7, 7, 8, 7]);
        let runs = group_sequential_by_values(&series);
        let pairs: Vec<Vec<(usize, i32)>> =
            runs.to_array().iter().map(Series::to_pairs).collect();
        assert_eq!(
            pairs,
            vec![vec![(0, 7), (1, 7)], vec![(2, 8)], vec![(3, 7)]]
        );
    }

    #[test]
    fn sequential_distinct_keeps_last_of_each_run() {
        let series = Series::from_pairs(vec![(10, 1), (11, 1), (12, 2), (13, 1), (14, 1)]);
        let out = sequential_distinct_values(&series);
        assert_eq!(out.to_pairs(), vec![(11, 1), (12, 2), (14, 1)]);

        let by_parity = sequential_distinct(&series, |v| v % 2);
        assert_eq!(by_parity.to_pairs(), vec![(11, 1), (12, 2), (14, 1)]);
    }

    #[test]
    fn group_frame_by_column_keeps_column_names() {
        let frame = DataFrame::from_rows(vec![
            Row::new().with("k", "x").with("v", 1_i64),
            Row::new().with("k", "y").with("v", 2_i64),
            Row::new().with("k", "x").with("v", 3_i64),
        ]);
        let groups = group_frame_by_column(&frame, "k").expect("group");
        let frames = groups.to_array();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].count(), 2);
        assert_eq!(frames[0].column_names(), vec!["k", "v"]);
        assert_eq!(
            frames[0].get_column("v").to_array(),
            vec![Scalar::Int64(1), Scalar::Int64(3)]
        );
    }

    #[test]
    fn group_frame_by_unknown_column_fails() {
        let frame = DataFrame::from_rows(vec![Row::new().with("k", 1_i64)]);
        assert_eq!(
            group_frame_by_column(&frame, "nope").expect_err("unknown"),
            GroupByError::UnknownColumn {
                name: "nope".to_owned()
            }
        );
    }

    #[test]
    fn group_sum_totals_each_key() {
        let series = Series::from_values(vec![
            Scalar::Int64(1),
            Scalar::Int64(2),
            Scalar::Int64(3),
            Scalar::Null,
        ]);
        let sums = group_sum(&series, |v| v.to_f64().map(|n| n > 1.5).unwrap_or(false));
        assert_eq!(sums.to_pairs(), vec![(false, 1.0), (true, 5.0)]);
    }
}
