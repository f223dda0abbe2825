#![forbid(unsafe_code)]

//! Set algebra and relational joins over series.
//!
//! Every operator is lazy: hash tables are built when the result is first
//! iterated, and rebuilt on each fresh iteration of an unbaked result.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use lf_frame::{DataFrame, DataFrameConfig, Series, SeriesConfig};
use lf_seq::Seq;
use lf_types::{Element, Row, Scalar, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    #[default]
    Inner,
    Outer,
    OuterLeft,
    OuterRight,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("{side} frame has no column `{name}`")]
    UnknownColumn { side: &'static str, name: String },
}

type KeyFn<V, G> = Arc<dyn Fn(&V) -> G + Send + Sync>;
type MatchFn<V, W, R> = Arc<dyn Fn(&V, &W) -> R + Send + Sync>;
type PairFn<V, W, R> = Arc<dyn Fn(Option<&V>, Option<&W>) -> R + Send + Sync>;

/// Concatenation of `left` and `right` keeping the first pair for each key.
pub fn union<K, V, G, F>(left: &Series<K, V>, right: &Series<K, V>, key_of: F) -> Series<K, V>
where
    K: Element,
    V: Value,
    G: Hash + Eq + 'static,
    F: Fn(&V) -> G + Send + Sync + 'static,
{
    left.concat_with(right).distinct_by(key_of)
}

/// [`union`] keyed by the values themselves.
pub fn union_values<K, V>(left: &Series<K, V>, right: &Series<K, V>) -> Series<K, V>
where
    K: Element,
    V: Value + Hash + Eq,
{
    left.concat_with(right).distinct()
}

/// Outer pairs whose key matches some inner key, in outer order and with
/// outer duplicates kept.
pub fn intersection<K, V, K2, W, G, FO, FI>(
    outer: &Series<K, V>,
    inner: &Series<K2, W>,
    outer_key: FO,
    inner_key: FI,
) -> Series<K, V>
where
    K: Element,
    V: Value,
    K2: Element,
    W: Value,
    G: Hash + Eq + 'static,
    FO: Fn(&V) -> G + Send + Sync + 'static,
    FI: Fn(&W) -> G + Send + Sync + 'static,
{
    filter_by_inner_keys(outer, inner, Arc::new(outer_key), Arc::new(inner_key), true)
}

/// Outer pairs whose key matches no inner key, in outer order and with
/// outer duplicates kept.
pub fn except<K, V, K2, W, G, FO, FI>(
    outer: &Series<K, V>,
    inner: &Series<K2, W>,
    outer_key: FO,
    inner_key: FI,
) -> Series<K, V>
where
    K: Element,
    V: Value,
    K2: Element,
    W: Value,
    G: Hash + Eq + 'static,
    FO: Fn(&V) -> G + Send + Sync + 'static,
    FI: Fn(&W) -> G + Send + Sync + 'static,
{
    filter_by_inner_keys(outer, inner, Arc::new(outer_key), Arc::new(inner_key), false)
}

/// [`intersection`] keyed by the values themselves.
pub fn intersection_values<K, V, K2>(outer: &Series<K, V>, inner: &Series<K2, V>) -> Series<K, V>
where
    K: Element,
    V: Value + Hash + Eq,
    K2: Element,
{
    intersection(outer, inner, V::clone, V::clone)
}

/// [`except`] keyed by the values themselves.
pub fn except_values<K, V, K2>(outer: &Series<K, V>, inner: &Series<K2, V>) -> Series<K, V>
where
    K: Element,
    V: Value + Hash + Eq,
    K2: Element,
{
    except(outer, inner, V::clone, V::clone)
}

fn filter_by_inner_keys<K, V, K2, W, G>(
    outer: &Series<K, V>,
    inner: &Series<K2, W>,
    outer_key: KeyFn<V, G>,
    inner_key: KeyFn<W, G>,
    keep_matches: bool,
) -> Series<K, V>
where
    K: Element,
    V: Value,
    K2: Element,
    W: Value,
    G: Hash + Eq + 'static,
{
    let outer = outer.clone();
    let inner = inner.clone();
    Series::from_pairs_seq(Seq::from_fn(move || {
        let keys: HashSet<G> = inner
            .values_seq()
            .cursor()
            .map(|value| inner_key(&value))
            .collect();
        let outer_key = Arc::clone(&outer_key);
        outer
            .pairs_seq()
            .cursor()
            .filter(move |(_, value)| keys.contains(&outer_key(value)) == keep_matches)
    }))
}

/// Inner values grouped by key, each group in encounter order.
fn build_groups<W, G>(inner: &Seq<W>, inner_key: &KeyFn<W, G>) -> HashMap<G, Arc<[W]>>
where
    W: Element,
    G: Hash + Eq,
{
    let mut groups: HashMap<G, Vec<W>> = HashMap::new();
    for value in inner.cursor() {
        groups.entry(inner_key(&value)).or_default().push(value);
    }
    tracing::debug!(groups = groups.len(), "built join hash table");
    groups
        .into_iter()
        .map(|(key, members)| (key, Arc::from(members)))
        .collect()
}

fn inner_join<V, W, G, R>(
    outer: Seq<V>,
    inner: Seq<W>,
    outer_key: KeyFn<V, G>,
    inner_key: KeyFn<W, G>,
    result: MatchFn<V, W, R>,
) -> Seq<R>
where
    V: Value,
    W: Value,
    G: Hash + Eq + 'static,
    R: Value,
{
    Seq::from_fn(move || {
        let groups = build_groups(&inner, &inner_key);
        let outer_key = Arc::clone(&outer_key);
        let result = Arc::clone(&result);
        outer.cursor().flat_map(move |left| {
            let matches: Arc<[W]> = groups
                .get(&outer_key(&left))
                .map_or_else(|| Arc::from(Vec::new()), Arc::clone);
            let result = Arc::clone(&result);
            (0..matches.len()).map(move |slot| result(&left, &matches[slot]))
        })
    })
}

/// Pairs each outer value with every inner value of equal key; unmatched
/// outer values are dropped. The result has a fresh `0..n` index.
pub fn join<K, V, K2, W, G, R, FO, FI, FR>(
    outer: &Series<K, V>,
    inner: &Series<K2, W>,
    outer_key: FO,
    inner_key: FI,
    result: FR,
) -> Series<usize, R>
where
    K: Element,
    V: Value,
    K2: Element,
    W: Value,
    G: Hash + Eq + 'static,
    R: Value,
    FO: Fn(&V) -> G + Send + Sync + 'static,
    FI: Fn(&W) -> G + Send + Sync + 'static,
    FR: Fn(&V, &W) -> R + Send + Sync + 'static,
{
    let values = inner_join(
        lazy_values(outer),
        lazy_values(inner),
        Arc::new(outer_key),
        Arc::new(inner_key),
        Arc::new(result),
    );
    Series::new(SeriesConfig::values(values))
}

/// Full outer join: unmatched outer values, then matches, then unmatched
/// inner values. The result has a fresh `0..n` index.
pub fn join_outer<K, V, K2, W, G, R, FO, FI, FR>(
    outer: &Series<K, V>,
    inner: &Series<K2, W>,
    outer_key: FO,
    inner_key: FI,
    result: FR,
) -> Series<usize, R>
where
    K: Element,
    V: Value,
    K2: Element,
    W: Value,
    G: Hash + Eq + 'static,
    R: Value,
    FO: Fn(&V) -> G + Send + Sync + 'static,
    FI: Fn(&W) -> G + Send + Sync + 'static,
    FR: Fn(Option<&V>, Option<&W>) -> R + Send + Sync + 'static,
{
    join_series(outer, inner, JoinType::Outer, outer_key, inner_key, result)
}

/// Unmatched outer values followed by matches.
pub fn join_outer_left<K, V, K2, W, G, R, FO, FI, FR>(
    outer: &Series<K, V>,
    inner: &Series<K2, W>,
    outer_key: FO,
    inner_key: FI,
    result: FR,
) -> Series<usize, R>
where
    K: Element,
    V: Value,
    K2: Element,
    W: Value,
    G: Hash + Eq + 'static,
    R: Value,
    FO: Fn(&V) -> G + Send + Sync + 'static,
    FI: Fn(&W) -> G + Send + Sync + 'static,
    FR: Fn(Option<&V>, Option<&W>) -> R + Send + Sync + 'static,
{
    join_series(outer, inner, JoinType::OuterLeft, outer_key, inner_key, result)
}

/// Matches followed by unmatched inner values.
pub fn join_outer_right<K, V, K2, W, G, R, FO, FI, FR>(
    outer: &Series<K, V>,
    inner: &Series<K2, W>,
    outer_key: FO,
    inner_key: FI,
    result: FR,
) -> Series<usize, R>
where
    K: Element,
    V: Value,
    K2: Element,
    W: Value,
    G: Hash + Eq + 'static,
    R: Value,
    FO: Fn(&V) -> G + Send + Sync + 'static,
    FI: Fn(&W) -> G + Send + Sync + 'static,
    FR: Fn(Option<&V>, Option<&W>) -> R + Send + Sync + 'static,
{
    join_series(outer, inner, JoinType::OuterRight, outer_key, inner_key, result)
}

/// Dispatches on `join_type`. `result` receives `None` for the side that has
/// no match; for [`JoinType::Inner`] both sides are always present.
pub fn join_series<K, V, K2, W, G, R, FO, FI, FR>(
    outer: &Series<K, V>,
    inner: &Series<K2, W>,
    join_type: JoinType,
    outer_key: FO,
    inner_key: FI,
    result: FR,
) -> Series<usize, R>
where
    K: Element,
    V: Value,
    K2: Element,
    W: Value,
    G: Hash + Eq + 'static,
    R: Value,
    FO: Fn(&V) -> G + Send + Sync + 'static,
    FI: Fn(&W) -> G + Send + Sync + 'static,
    FR: Fn(Option<&V>, Option<&W>) -> R + Send + Sync + 'static,
{
    let outer_key: KeyFn<V, G> = Arc::new(outer_key);
    let inner_key: KeyFn<W, G> = Arc::new(inner_key);
    let result: PairFn<V, W, R> = Arc::new(result);

    let both = Arc::clone(&result);
    let matched = inner_join(
        lazy_values(outer),
        lazy_values(inner),
        Arc::clone(&outer_key),
        Arc::clone(&inner_key),
        Arc::new(move |left: &V, right: &W| both(Some(left), Some(right))),
    );

    let left_only = || {
        let result = Arc::clone(&result);
        filter_by_inner_keys(
            outer,
            inner,
            Arc::clone(&outer_key),
            Arc::clone(&inner_key),
            false,
        )
        .values_seq()
        .map(move |left, _| result(Some(&left), None))
    };
    let right_only = || {
        let result = Arc::clone(&result);
        filter_by_inner_keys(
            inner,
            outer,
            Arc::clone(&inner_key),
            Arc::clone(&outer_key),
            false,
        )
        .values_seq()
        .map(move |right, _| result(None, Some(&right)))
    };

    let values = match join_type {
        JoinType::Inner => matched,
        JoinType::Outer => Seq::concat(vec![left_only(), matched, right_only()]),
        JoinType::OuterLeft => Seq::concat(vec![left_only(), matched]),
        JoinType::OuterRight => Seq::concat(vec![matched, right_only()]),
    };
    Series::new(SeriesConfig::values(values))
}

/// Value sequence that resolves the series content only when iterated.
fn lazy_values<K: Element, V: Value>(series: &Series<K, V>) -> Seq<V> {
    let source = series.clone();
    Seq::from_fn(move || source.values_seq().cursor())
}

/// Joins two frames on equal cells of `outer_column` and `inner_column`.
///
/// Joined rows hold the outer cells followed by the inner cells the outer row
/// lacks. Column names are detected across every joined row.
///
/// A frame with detected columns must contain its join column. That check
/// runs at call time, so it reads each input's first row (or every row under
/// `consider_all_rows`); the join itself stays lazy.
pub fn join_frames<K, K2>(
    outer: &DataFrame<K>,
    inner: &DataFrame<K2>,
    join_type: JoinType,
    outer_column: &str,
    inner_column: &str,
) -> Result<DataFrame<usize>, JoinError>
where
    K: Element,
    K2: Element,
{
    check_join_column("outer", outer, outer_column)?;
    check_join_column("inner", inner, inner_column)?;

    let joined = join_series(
        outer.as_series(),
        inner.as_series(),
        join_type,
        column_key(outer_column),
        column_key(inner_column),
        merge_rows,
    );
    Ok(DataFrame::new(DataFrameConfig {
        rows: Some(lazy_values(&joined)),
        consider_all_rows: true,
        ..DataFrameConfig::default()
    }))
}

fn check_join_column<K: Element>(
    side: &'static str,
    frame: &DataFrame<K>,
    column: &str,
) -> Result<(), JoinError> {
    let names = frame.column_names();
    if names.is_empty() || names.iter().any(|name| name == column) {
        Ok(())
    } else {
        Err(JoinError::UnknownColumn {
            side,
            name: column.to_owned(),
        })
    }
}

fn merge_rows(left: Option<&Row>, right: Option<&Row>) -> Row {
    let mut merged = left.cloned().unwrap_or_default();
    if let Some(right) = right {
        for (name, cell) in right.iter() {
            if !merged.contains(name) {
                merged.set(name, cell.clone());
            }
        }
    }
    merged
}

/// Join key read from a row cell; absent cells key as `Null`.
#[must_use]
pub fn column_key(column: &str) -> impl Fn(&Row) -> Scalar + Send + Sync + 'static {
    let column = column.to_owned();
    move |row: &Row| row.get_or_null(&column)
}

#[cfg(test)]
mod tests {
    use lf_frame::{DataFrame, Series};
    use lf_types::{Row, Scalar};

    use super::{
        column_key, except, except_values, intersection, intersection_values, join, join_frames,
        join_outer, join_outer_left, join_outer_right, join_series, union, union_values,
        JoinError, JoinType,
    };

    fn ids(values: &[i64]) -> Series<usize, i64> {
        Series::from_values(values.to_vec())
    }

    #[test]
    fn union_is_distinct_concat() {
        let out = union_values(&ids(&[1, 2, 1]), &ids(&[3, 2]));
        assert_eq!(out.to_array(), vec![1, 2, 3]);

        let by_parity = union(&ids(&[1, 3]), &ids(&[2, 5]), |v| v % 2);
        assert_eq!(by_parity.to_array(), vec![1, 2]);
    }

    #[test]
    fn intersection_keeps_outer_order_and_duplicates() {
        let out = intersection(&ids(&[3, 1, 3, 2]), &ids(&[3, 2, 2]), |v| *v, |v| *v);
        assert_eq!(out.to_pairs(), vec![(0, 3), (2, 3), (3, 2)]);
    }

    #[test]
    fn except_keeps_unmatched_outer_values() {
        let out = except(&ids(&[3, 1, 3, 2]), &ids(&[3]), |v| *v, |v| *v);
        assert_eq!(out.to_pairs(), vec![(1, 1), (3, 2)]);
        assert_eq!(except(&ids(&[1]), &ids(&[]), |v| *v, |v| *v).to_array(), vec![1]);
    }

    #[test]
    fn value_keyed_intersection_and_except_split_outer() {
        let outer = ids(&[4, 1, 4, 2]);
        let inner = Series::from_pairs(vec![("a", 4), ("b", 9)]);
        assert_eq!(
            intersection_values(&outer, &inner).to_pairs(),
            vec![(0, 4), (2, 4)]
        );
        assert_eq!(except_values(&outer, &inner).to_pairs(), vec![(1, 1), (3, 2)]);
    }

    #[test]
    fn inner_join_cross_multiplies_ties() {
        let outer = Series::from_values(vec![("k", 1), ("k", 2), ("x", 3)]);
        let inner = Series::from_values(vec![("k", 10), ("k", 20)]);
        let out = join(&outer, &inner, |o| o.0, |i| i.0, |o, i| o.1 + i.1);
        assert_eq!(out.to_pairs(), vec![(0, 11), (1, 21), (2, 12), (3, 22)]);
    }

    #[test]
    fn outer_joins_pad_missing_side_with_none() {
        let outer = ids(&[1, 2]);
        let inner = ids(&[1, 3]);
        let pair = |o: Option<&i64>, i: Option<&i64>| (o.copied(), i.copied());

        let full = join_outer(&outer, &inner, |v| *v, |v| *v, pair);
        assert_eq!(
            full.to_array(),
            vec![(Some(2), None), (Some(1), Some(1)), (None, Some(3))]
        );
        assert_eq!(full.index_seq().to_vec(), vec![0, 1, 2]);

        let left = join_outer_left(&outer, &inner, |v| *v, |v| *v, pair);
        assert_eq!(left.to_array(), vec![(Some(2), None), (Some(1), Some(1))]);

        let right = join_outer_right(&outer, &inner, |v| *v, |v| *v, pair);
        assert_eq!(right.to_array(), vec![(Some(1), Some(1)), (None, Some(3))]);
    }

    #[test]
    fn join_series_inner_matches_join() {
        let outer = ids(&[1, 2, 2]);
        let inner = ids(&[2]);
        let dispatched = join_series(&outer, &inner, JoinType::Inner, |v| *v, |v| *v, |o, i| {
            (o.copied(), i.copied())
        });
        assert_eq!(dispatched.to_array(), vec![(Some(2), Some(2)); 2]);
    }

    #[test]
    fn join_is_lazy_and_reiterable() {
        let outer = ids(&[1, 2]);
        let inner = ids(&[2, 2]);
        let out = join(&outer, &inner, |v| *v, |v| *v, |o, i| o * i);
        assert_eq!(out.to_array(), vec![4, 4]);
        assert_eq!(out.to_array(), vec![4, 4]);
    }

    #[test]
    fn join_frames_pairs_unmatched_rows_with_absent_cells() {
        let outer = DataFrame::from_rows(vec![
            Row::new().with("id", 1_i64),
            Row::new().with("id", 2_i64),
        ]);
        let inner = DataFrame::from_rows(vec![Row::new().with("id", 1_i64).with("x", "a")]);

        let inner_rows = join_frames(&outer, &inner, JoinType::Inner, "id", "id").expect("join");
        assert_eq!(
            inner_rows.to_rows(),
            vec![Row::new().with("id", 1_i64).with("x", "a")]
        );

        let full = join_frames(&outer, &inner, JoinType::Outer, "id", "id").expect("join");
        let rows = full.to_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_or_null("id"), Scalar::Int64(2));
        assert_eq!(rows[0].get_or_null("x"), Scalar::Null);
        assert_eq!(full.column_names(), vec!["id", "x"]);
    }

    #[test]
    fn join_frames_rejects_unknown_column() {
        let outer = DataFrame::from_rows(vec![Row::new().with("id", 1_i64)]);
        let err = join_frames(&outer, &outer, JoinType::Inner, "id", "nope").expect_err("unknown");
        assert_eq!(
            err,
            JoinError::UnknownColumn {
                side: "inner",
                name: "nope".to_owned()
            }
        );
    }

    #[test]
    fn column_key_reads_cells() {
        let key = column_key("a");
        assert_eq!(key(&Row::new().with("a", 3_i64)), Scalar::Int64(3));
        assert_eq!(key(&Row::new()), Scalar::Null);
    }

    #[test]
    fn join_type_serializes_snake_case() {
        let json = serde_json::to_string(&JoinType::OuterLeft).expect("serialize");
        assert_eq!(json, "\"outer_left\"");
    }
}
