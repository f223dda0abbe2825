#![forbid(unsafe_code)]

//! Conformance harness for the lazy series engine.
//!
//! Two halves: eager reference oracles written as plain loops over slices,
//! and a JSON fixture runner that drives the lazy engine through a named
//! operation and compares the materialized output with the expectation.

use std::hash::Hash;

use lf_frame::{FrameError, Series, WhichIndex};
use lf_groupby::sequential_distinct_values;
use lf_join::{except, intersection, union_values};
use lf_types::Scalar;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Reference oracles
// ---------------------------------------------------------------------------

/// First occurrence of each element, in encounter order (quadratic scan).
pub fn oracle_distinct<T: Clone + PartialEq>(items: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Non-overlapping chunks; the final chunk may be shorter.
pub fn oracle_window<T: Clone>(items: &[T], period: usize) -> Vec<Vec<T>> {
    let mut out = Vec::new();
    let mut start = 0;
    while start < items.len() {
        let end = (start + period).min(items.len());
        out.push(items[start..end].to_vec());
        start = end;
    }
    out
}

/// Every full-length run of `period` consecutive elements.
pub fn oracle_rolling_window<T: Clone>(items: &[T], period: usize) -> Vec<Vec<T>> {
    if period == 0 || period > items.len() {
        return Vec::new();
    }
    (0..=items.len() - period)
        .map(|start| items[start..start + period].to_vec())
        .collect()
}

/// Stable multi-key sort by insertion: an element moves left only past
/// elements that are strictly greater on the first differing level.
pub fn oracle_sort<T: Clone>(items: &[T], levels: &[(fn(&T) -> i64, bool)]) -> Vec<T> {
    let before = |a: &T, b: &T| -> bool {
        for (key, descending) in levels {
            let (ka, kb) = (key(a), key(b));
            if ka != kb {
                return if *descending { ka > kb } else { ka < kb };
            }
        }
        false
    };
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        let mut slot = out.len();
        while slot > 0 && before(item, &out[slot - 1]) {
            slot -= 1;
        }
        out.insert(slot, item.clone());
    }
    out
}

/// Nested-loop inner join.
pub fn oracle_inner_join<V, W, G, R>(
    outer: &[V],
    inner: &[W],
    outer_key: impl Fn(&V) -> G,
    inner_key: impl Fn(&W) -> G,
    result: impl Fn(&V, &W) -> R,
) -> Vec<R>
where
    G: PartialEq,
{
    let mut out = Vec::new();
    for left in outer {
        for right in inner {
            if outer_key(left) == inner_key(right) {
                out.push(result(left, right));
            }
        }
    }
    out
}

/// Outer elements with (`keep_matches`) or without a matching inner key.
pub fn oracle_semi_join<V, W, G>(
    outer: &[V],
    inner: &[W],
    outer_key: impl Fn(&V) -> G,
    inner_key: impl Fn(&W) -> G,
    keep_matches: bool,
) -> Vec<V>
where
    V: Clone,
    G: PartialEq,
{
    outer
        .iter()
        .filter(|left| {
            let key = outer_key(*left);
            inner.iter().any(|right| inner_key(right) == key) == keep_matches
        })
        .cloned()
        .collect()
}

/// Groups in order of first appearance (linear group search).
pub fn oracle_group_by<T: Clone, G: PartialEq>(items: &[T], key: impl Fn(&T) -> G) -> Vec<Vec<T>> {
    let mut keys: Vec<G> = Vec::new();
    let mut groups: Vec<Vec<T>> = Vec::new();
    for item in items {
        let k = key(item);
        match keys.iter().position(|existing| *existing == k) {
            Some(slot) => groups[slot].push(item.clone()),
            None => {
                keys.push(k);
                groups.push(vec![item.clone()]);
            }
        }
    }
    groups
}

/// Last `(position, element)` of each run of equal elements.
pub fn oracle_sequential_distinct<T: Clone + PartialEq>(items: &[T]) -> Vec<(usize, T)> {
    items
        .iter()
        .enumerate()
        .filter(|(position, item)| items.get(position + 1) != Some(*item))
        .map(|(position, item)| (position, item.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Fixture harness
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("fixture json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Operation applied to a fixture's input series (index `0..n`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FixtureOperation {
    Skip { count: usize },
    Take { count: usize },
    Tail { count: usize },
    Reverse,
    Distinct,
    SortAscending,
    SortDescending,
    Window { period: usize },
    RollingWindow { period: usize },
    SequentialDistinct,
    Union { other: Vec<Scalar> },
    Intersection { other: Vec<Scalar> },
    Except { other: Vec<Scalar> },
    Sum,
}

/// Materialized output of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum FixtureOutput {
    Pairs(Vec<(usize, Scalar)>),
    Windows(Vec<Vec<Scalar>>),
    Number(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub name: String,
    pub input: Vec<Scalar>,
    pub operation: FixtureOperation,
    pub expected: FixtureOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub name: String,
    pub status: CaseStatus,
    pub actual: FixtureOutput,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl SuiteReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0
    }
}

pub fn load_fixtures(json: &str) -> Result<Vec<Fixture>, HarnessError> {
    Ok(serde_json::from_str(json)?)
}

fn windows_of(series: &Series<usize, Series<usize, Scalar>>) -> FixtureOutput {
    FixtureOutput::Windows(series.to_array().iter().map(Series::to_array).collect())
}

/// Runs `operation` over `input` through the lazy engine.
pub fn execute(input: &[Scalar], operation: &FixtureOperation) -> Result<FixtureOutput, HarnessError> {
    let series = Series::from_values(input.to_vec());
    let other = |values: &[Scalar]| Series::from_values(values.to_vec());
    let out = match operation {
        FixtureOperation::Skip { count } => series.skip(*count),
        FixtureOperation::Take { count } => series.take(*count),
        FixtureOperation::Tail { count } => series.tail(*count),
        FixtureOperation::Reverse => series.reverse(),
        FixtureOperation::Distinct => series.distinct(),
        FixtureOperation::SortAscending => series.order_by(Scalar::clone).into_series(),
        FixtureOperation::SortDescending => series.order_by_descending(Scalar::clone).into_series(),
        FixtureOperation::Window { period } => return Ok(windows_of(&series.window(*period)?)),
        FixtureOperation::RollingWindow { period } => {
            return Ok(windows_of(&series.rolling_window(*period, WhichIndex::First)?));
        }
        FixtureOperation::SequentialDistinct => sequential_distinct_values(&series),
        FixtureOperation::Union { other: values } => union_values(&series, &other(values)),
        FixtureOperation::Intersection { other: values } => {
            intersection(&series, &other(values), Scalar::clone, Scalar::clone)
        }
        FixtureOperation::Except { other: values } => {
            except(&series, &other(values), Scalar::clone, Scalar::clone)
        }
        FixtureOperation::Sum => return Ok(FixtureOutput::Number(series.sum())),
    };
    Ok(FixtureOutput::Pairs(out.to_pairs()))
}

pub fn run_fixture(fixture: &Fixture) -> Result<CaseResult, HarnessError> {
    let actual = execute(&fixture.input, &fixture.operation)?;
    let status = if actual == fixture.expected {
        CaseStatus::Pass
    } else {
        tracing::warn!(fixture = %fixture.name, "fixture output mismatch");
        CaseStatus::Fail
    };
    Ok(CaseResult {
        name: fixture.name.clone(),
        status,
        actual,
    })
}

pub fn run_suite(fixtures: &[Fixture]) -> Result<SuiteReport, HarnessError> {
    let mut report = SuiteReport::default();
    for fixture in fixtures {
        let result = run_fixture(fixture)?;
        match result.status {
            CaseStatus::Pass => report.passed += 1,
            CaseStatus::Fail => report.failed += 1,
        }
        report.results.push(result);
    }
    tracing::info!(passed = report.passed, failed = report.failed, "fixture suite finished");
    Ok(report)
}

/// Keys used by hashing operators must agree with `PartialEq`.
pub fn hash_agrees_with_eq<T: Hash + Eq>(a: &T, b: &T) -> bool {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::Hasher;

    let digest = |value: &T| {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    };
    a != b || digest(a) == digest(b)
}
