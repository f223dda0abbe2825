#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use indexmap::{IndexMap, IndexSet};
use lf_index::{Index, IndexError, KeyOrdering};
use lf_seq::{Seq, SeqError, SortDirection, SortLevel};
use lf_types::{DefaultKey, Element, IndexKey, KeyKind, Row, Scalar, ToNumber, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("{operation}: values were supplied without an index or pairs and the key type has no default index")]
    MissingIndex { operation: &'static str },
    #[error(transparent)]
    Seq(#[from] SeqError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Which key a rolling window reports as its own index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhichIndex {
    #[default]
    First,
    Last,
}

/// Construction input for a [`Series`].
///
/// When `pairs` is present it is authoritative: whichever of `index`/`values`
/// is absent is plucked from it. Otherwise pairs are the positional zip of
/// `index` and `values`, which stops at the shorter of the two.
pub struct SeriesConfig<K, V> {
    pub values: Option<Seq<V>>,
    pub index: Option<Seq<K>>,
    pub pairs: Option<Seq<(K, V)>>,
    pub baked: bool,
}

impl<K, V> Default for SeriesConfig<K, V> {
    fn default() -> Self {
        Self {
            values: None,
            index: None,
            pairs: None,
            baked: false,
        }
    }
}

impl<K, V> Clone for SeriesConfig<K, V> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            index: self.index.clone(),
            pairs: self.pairs.clone(),
            baked: self.baked,
        }
    }
}

impl<K, V> fmt::Debug for SeriesConfig<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesConfig")
            .field("values", &self.values.is_some())
            .field("index", &self.index.is_some())
            .field("pairs", &self.pairs.is_some())
            .field("baked", &self.baked)
            .finish()
    }
}

impl<K: Element, V: Element> SeriesConfig<K, V> {
    #[must_use]
    pub fn values(values: Seq<V>) -> Self {
        Self {
            values: Some(values),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn pairs(pairs: Seq<(K, V)>) -> Self {
        Self {
            pairs: Some(pairs),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn index_values(index: Seq<K>, values: Seq<V>) -> Self {
        Self {
            index: Some(index),
            values: Some(values),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_index(mut self, index: Seq<K>) -> Self {
        self.index = Some(index);
        self
    }

    #[must_use]
    pub fn baked(mut self, baked: bool) -> Self {
        self.baked = baked;
        self
    }
}

/// Resolved storage of a series: the three parallel views plus the baked flag.
pub struct SeriesContent<K, V> {
    index: Seq<K>,
    values: Seq<V>,
    pairs: Seq<(K, V)>,
    is_baked: bool,
}

impl<K, V> Clone for SeriesContent<K, V> {
    fn clone(&self) -> Self {
        Self {
            index: self.index.clone(),
            values: self.values.clone(),
            pairs: self.pairs.clone(),
            is_baked: self.is_baked,
        }
    }
}

impl<K: Element, V: Element> SeriesContent<K, V> {
    fn from_pairs(pairs: Seq<(K, V)>) -> Self {
        Self {
            index: pairs.pluck_first(),
            values: pairs.pluck_second(),
            pairs,
            is_baked: false,
        }
    }

    fn from_index_values(index: Seq<K>, values: Seq<V>) -> Self {
        Self {
            pairs: index.zip(&values),
            index,
            values,
            is_baked: false,
        }
    }

    fn from_config<E>(
        config: SeriesConfig<K, V>,
        default_index: impl FnOnce(&Seq<V>) -> Result<Seq<K>, E>,
    ) -> Result<Self, E> {
        let SeriesConfig {
            values,
            index,
            pairs,
            baked,
        } = config;

        let mut content = match pairs {
            Some(pairs) => Self {
                index: index.unwrap_or_else(|| pairs.pluck_first()),
                values: values.unwrap_or_else(|| pairs.pluck_second()),
                pairs,
                is_baked: false,
            },
            None => {
                let index = match (index, &values) {
                    (Some(index), _) => index,
                    (None, Some(values)) => default_index(values)?,
                    (None, None) => Seq::empty(),
                };
                Self::from_index_values(index, values.unwrap_or_else(Seq::empty))
            }
        };
        content.is_baked = baked;
        Ok(content)
    }

    #[must_use]
    pub fn index(&self) -> &Seq<K> {
        &self.index
    }

    #[must_use]
    pub fn values(&self) -> &Seq<V> {
        &self.values
    }

    #[must_use]
    pub fn pairs(&self) -> &Seq<(K, V)> {
        &self.pairs
    }

    #[must_use]
    pub fn is_baked(&self) -> bool {
        self.is_baked
    }
}

fn positional_index<K: DefaultKey, V: Element>(values: &Seq<V>) -> Seq<K> {
    values.map(|_, position| K::from_position(position))
}

type ContentFn<K, V> = Arc<dyn Fn() -> SeriesContent<K, V> + Send + Sync>;

struct SeriesState<K, V> {
    content: OnceLock<SeriesContent<K, V>>,
    deferred: Option<ContentFn<K, V>>,
}

/// An immutable, lazily evaluated, indexed sequence of values.
///
/// Cloning a `Series` is cheap and shares its state. Content handed over as a
/// function is resolved on first access and memoized; nothing is evaluated at
/// construction.
pub struct Series<K, V> {
    state: Arc<SeriesState<K, V>>,
}

impl<K, V> Clone for Series<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<K, V> fmt::Debug for Series<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolved = self.state.content.get();
        f.debug_struct("Series")
            .field("resolved", &resolved.is_some())
            .field("baked", &resolved.is_some_and(|c| c.is_baked))
            .finish_non_exhaustive()
    }
}

impl<K: Element, V: Element> Value for Series<K, V> {}

impl<K: Element, V: Value> Default for Series<K, V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<V: Value> Series<usize, V> {
    #[must_use]
    pub fn from_values(values: Vec<V>) -> Self {
        Self::from_seq(Seq::from_vec(values))
    }

    #[must_use]
    pub fn from_seq(values: Seq<V>) -> Self {
        Self::new(SeriesConfig::values(values))
    }
}

impl<K: DefaultKey, V: Value> Series<K, V> {
    fn resolve(config: SeriesConfig<K, V>) -> SeriesContent<K, V> {
        let resolved =
            SeriesContent::from_config(config, |values| Ok::<_, Infallible>(positional_index(values)));
        match resolved {
            Ok(content) => content,
            Err(never) => match never {},
        }
    }

    /// Values without an index or pairs get the positional index `0..n`.
    #[must_use]
    pub fn new(config: SeriesConfig<K, V>) -> Self {
        Self::from_content(Self::resolve(config))
    }

    /// Deferred construction: `config` runs once, on first access.
    pub fn from_fn<F>(config: F) -> Self
    where
        F: Fn() -> SeriesConfig<K, V> + Send + Sync + 'static,
    {
        Self::from_content_fn(move || Self::resolve(config()))
    }
}

impl<K: Element, V: Value> Series<K, V> {
    #[must_use]
    pub fn empty() -> Self {
        Self::from_content(SeriesContent::from_pairs(Seq::empty()))
    }

    /// Builds a series from `config`. Supplying values with neither an index
    /// nor pairs is rejected because `K` has no default index.
    pub fn try_new(config: SeriesConfig<K, V>) -> Result<Self, FrameError> {
        let content = SeriesContent::from_config(config, |_| {
            Err(FrameError::MissingIndex {
                operation: "Series::try_new",
            })
        });
        content.map(Self::from_content)
    }

    #[must_use]
    pub fn from_pairs(pairs: Vec<(K, V)>) -> Self {
        Self::from_pairs_seq(Seq::from_vec(pairs))
    }

    #[must_use]
    pub fn from_pairs_seq(pairs: Seq<(K, V)>) -> Self {
        Self::from_content(SeriesContent::from_pairs(pairs))
    }

    #[must_use]
    pub fn from_index_values(index: Vec<K>, values: Vec<V>) -> Self {
        Self::from_content(SeriesContent::from_index_values(
            Seq::from_vec(index),
            Seq::from_vec(values),
        ))
    }

    fn from_content(content: SeriesContent<K, V>) -> Self {
        Self {
            state: Arc::new(SeriesState {
                content: OnceLock::from(content),
                deferred: None,
            }),
        }
    }

    fn from_content_fn<F>(make: F) -> Self
    where
        F: Fn() -> SeriesContent<K, V> + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(SeriesState {
                content: OnceLock::new(),
                deferred: Some(Arc::new(make)),
            }),
        }
    }

    /// Array-backed series over already materialized pairs, marked baked.
    #[must_use]
    pub fn from_baked_pairs(pairs: Vec<(K, V)>) -> Self {
        let index: Vec<K> = pairs.iter().map(|(key, _)| key.clone()).collect();
        let values: Vec<V> = pairs.iter().map(|(_, value)| value.clone()).collect();
        Self::from_content(SeriesContent {
            index: Seq::from_vec(index),
            values: Seq::from_vec(values),
            pairs: Seq::from_vec(pairs),
            is_baked: true,
        })
    }

    /// Derived series resolved lazily from this one's content.
    fn derive<K2, V2, F>(&self, build: F) -> Series<K2, V2>
    where
        K2: Element,
        V2: Value,
        F: Fn(&SeriesContent<K, V>) -> SeriesContent<K2, V2> + Send + Sync + 'static,
    {
        let source = self.clone();
        Series::from_content_fn(move || build(source.content()))
    }

    fn derive_pairs<F>(&self, build: F) -> Self
    where
        F: Fn(&Seq<(K, V)>) -> Seq<(K, V)> + Send + Sync + 'static,
    {
        self.derive(move |content| SeriesContent::from_pairs(build(&content.pairs)))
    }

    /// Pairs view that resolves this series only when a cursor is taken.
    fn deferred_pairs(&self) -> Seq<(K, V)> {
        let source = self.clone();
        Seq::from_fn(move || source.pairs_seq().cursor())
    }

    /// Resolved content, running the deferred constructor on first access.
    pub fn content(&self) -> &SeriesContent<K, V> {
        self.state.content.get_or_init(|| match &self.state.deferred {
            Some(make) => make(),
            None => SeriesContent::from_pairs(Seq::empty()),
        })
    }

    /// Whether both handles share the same underlying series.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    #[must_use]
    pub fn index_seq(&self) -> Seq<K> {
        self.content().index.clone()
    }

    #[must_use]
    pub fn values_seq(&self) -> Seq<V> {
        self.content().values.clone()
    }

    #[must_use]
    pub fn pairs_seq(&self) -> Seq<(K, V)> {
        self.content().pairs.clone()
    }

    #[must_use]
    pub fn is_baked(&self) -> bool {
        self.content().is_baked
    }

    // ── Materialization ────────────────────────────────────────────────

    /// Values in order, with missing values elided.
    #[must_use]
    pub fn to_array(&self) -> Vec<V> {
        self.content()
            .values
            .cursor()
            .filter(|value| !value.is_missing())
            .collect()
    }

    /// `(index, value)` pairs in order, with missing values elided.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(K, V)> {
        self.content()
            .pairs
            .cursor()
            .filter(|(_, value)| !value.is_missing())
            .collect()
    }

    /// Index to value; later duplicates overwrite earlier ones.
    #[must_use]
    pub fn to_map(&self) -> IndexMap<K, V>
    where
        K: Hash + Eq,
    {
        self.to_pairs().into_iter().collect()
    }

    /// Forces full evaluation into array-backed storage. Already-baked series
    /// are returned as is.
    #[must_use]
    pub fn bake(&self) -> Self {
        if self.is_baked() {
            return self.clone();
        }
        let pairs: Vec<(K, V)> = self.content().pairs.to_vec();
        tracing::debug!(pairs = pairs.len(), "baked series");
        Self::from_baked_pairs(pairs)
    }

    // ── Queries ────────────────────────────────────────────────────────

    #[must_use]
    pub fn count(&self) -> usize {
        self.content().values.count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content().values.is_empty()
    }

    pub fn first(&self) -> Result<V, FrameError> {
        Ok(self.content().values.first()?)
    }

    pub fn last(&self) -> Result<V, FrameError> {
        Ok(self.content().values.last()?)
    }

    pub fn first_index(&self) -> Result<K, FrameError> {
        Ok(self.content().index.first()?)
    }

    pub fn last_index(&self) -> Result<K, FrameError> {
        Ok(self.content().index.last()?)
    }

    /// Value at the first pair whose key equals `key` (linear scan).
    #[must_use]
    pub fn at(&self, key: &K) -> Option<V>
    where
        K: PartialEq,
    {
        self.content()
            .pairs
            .cursor()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn contains_index(&self, key: &K) -> bool
    where
        K: PartialEq,
    {
        self.content().index.cursor().any(|candidate| candidate == *key)
    }

    pub fn any<F>(&self, predicate: F) -> bool
    where
        F: Fn(&V) -> bool,
    {
        self.content().values.cursor().any(|value| predicate(&value))
    }

    pub fn all<F>(&self, predicate: F) -> bool
    where
        F: Fn(&V) -> bool,
    {
        self.content().values.cursor().all(|value| predicate(&value))
    }

    pub fn none<F>(&self, predicate: F) -> bool
    where
        F: Fn(&V) -> bool,
    {
        !self.any(predicate)
    }

    /// Folds the values. Without a seed the first value seeds the fold and an
    /// empty series is an error.
    pub fn aggregate<F>(&self, seed: Option<V>, reducer: F) -> Result<V, FrameError>
    where
        F: Fn(V, V) -> V,
    {
        Ok(self.content().values.aggregate(seed, reducer)?)
    }

    /// Folds the values into an accumulator of another type.
    pub fn fold<A, F>(&self, seed: A, reducer: F) -> A
    where
        F: Fn(A, &V) -> A,
    {
        self.content()
            .values
            .cursor()
            .fold(seed, |acc, value| reducer(acc, &value))
    }

    // ── Transforms ─────────────────────────────────────────────────────

    pub fn select<R, F>(&self, selector: F) -> Series<K, R>
    where
        R: Value,
        F: Fn(&V, usize) -> R + Send + Sync + 'static,
    {
        let selector = Arc::new(selector);
        self.derive(move |content| {
            let selector = Arc::clone(&selector);
            SeriesContent::from_index_values(
                content.index.clone(),
                content.values.map(move |value, position| selector(&value, position)),
            )
        })
    }

    /// Flattens each value into zero or more values that keep its index key.
    pub fn select_many<R, I, F>(&self, selector: F) -> Series<K, R>
    where
        R: Value,
        I: IntoIterator<Item = R>,
        I::IntoIter: 'static,
        F: Fn(&V, usize) -> I + Send + Sync + 'static,
    {
        let selector = Arc::new(selector);
        self.derive(move |content| {
            let selector = Arc::clone(&selector);
            SeriesContent::from_pairs(content.pairs.flat_map(move |(key, value), position| {
                selector(&value, position)
                    .into_iter()
                    .map(move |out| (key.clone(), out))
            }))
        })
    }

    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.derive_pairs(move |pairs| {
            let predicate = Arc::clone(&predicate);
            pairs.filter(move |(_, value)| predicate(value))
        })
    }

    #[must_use]
    pub fn skip(&self, count: usize) -> Self {
        self.derive_pairs(move |pairs| pairs.skip(count))
    }

    #[must_use]
    pub fn take(&self, count: usize) -> Self {
        self.derive_pairs(move |pairs| pairs.take(count))
    }

    #[must_use]
    pub fn head(&self, count: usize) -> Self {
        self.take(count)
    }

    /// The last `count` pairs.
    #[must_use]
    pub fn tail(&self, count: usize) -> Self {
        self.derive_pairs(move |pairs| {
            let total = pairs.count();
            pairs.skip(total.saturating_sub(count))
        })
    }

    pub fn skip_while<F>(&self, predicate: F) -> Self
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.derive_pairs(move |pairs| {
            let predicate = Arc::clone(&predicate);
            pairs.skip_while(move |(_, value)| predicate(value))
        })
    }

    pub fn skip_until<F>(&self, predicate: F) -> Self
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        self.skip_while(move |value| !predicate(value))
    }

    pub fn take_while<F>(&self, predicate: F) -> Self
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.derive_pairs(move |pairs| {
            let predicate = Arc::clone(&predicate);
            pairs.take_while(move |(_, value)| predicate(value))
        })
    }

    pub fn take_until<F>(&self, predicate: F) -> Self
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        self.take_while(move |value| !predicate(value))
    }

    #[must_use]
    pub fn reverse(&self) -> Self {
        self.derive_pairs(Seq::reverse)
    }

    /// Keeps the first pair seen for each distinct value.
    #[must_use]
    pub fn distinct(&self) -> Self
    where
        V: Hash + Eq,
    {
        self.distinct_by(V::clone)
    }

    /// Keeps the first pair seen for each distinct key produced by `key_of`.
    pub fn distinct_by<G, F>(&self, key_of: F) -> Self
    where
        G: Hash + Eq + 'static,
        F: Fn(&V) -> G + Send + Sync + 'static,
    {
        let key_of = Arc::new(key_of);
        self.derive_pairs(move |pairs| {
            let key_of = Arc::clone(&key_of);
            pairs.distinct_by(move |(_, value)| key_of(value))
        })
    }

    /// Sequential concatenation; indexes are kept as they are.
    #[must_use]
    pub fn concat(series: &[Series<K, V>]) -> Self {
        let sources: Vec<Series<K, V>> = series.to_vec();
        Self::from_content_fn(move || {
            SeriesContent::from_pairs(Seq::concat(
                sources.iter().map(Series::pairs_seq).collect(),
            ))
        })
    }

    #[must_use]
    pub fn concat_with(&self, other: &Series<K, V>) -> Self {
        Self::concat(&[self.clone(), other.clone()])
    }

    #[must_use]
    pub fn append_pair(&self, key: K, value: V) -> Self {
        self.concat_with(&Series::from_pairs(vec![(key, value)]))
    }

    #[must_use]
    pub fn insert_pair(&self, key: K, value: V) -> Self {
        Series::from_pairs(vec![(key, value)]).concat_with(self)
    }

    /// Positional zip of the values; stops at the shorter side and resets the
    /// index.
    pub fn zip<K2, W, R, F>(&self, other: &Series<K2, W>, combine: F) -> Series<usize, R>
    where
        K2: Element,
        W: Value,
        R: Value,
        F: Fn(&V, &W) -> R + Send + Sync + 'static,
    {
        let left = self.clone();
        let right = other.clone();
        let combine = Arc::new(combine);
        Series::from_content_fn(move || {
            let combine = Arc::clone(&combine);
            let values = left
                .values_seq()
                .zip(&right.values_seq())
                .map(move |(l, r), _| combine(&l, &r));
            SeriesContent::from_index_values(positional_index(&values), values)
        })
    }

    /// Repeats the values `count` times under a fresh `0..n` index.
    #[must_use]
    pub fn tile(&self, count: usize) -> Series<usize, V> {
        self.derive(move |content| {
            let values = content.values.tile(count);
            SeriesContent::from_index_values(positional_index(&values), values)
        })
    }

    // ── Index manipulation ─────────────────────────────────────────────

    /// Strips the index back to `0..n`.
    #[must_use]
    pub fn reset_index(&self) -> Series<usize, V> {
        self.derive(|content| {
            let values = content.values.clone();
            SeriesContent::from_index_values(positional_index(&values), values)
        })
    }

    #[must_use]
    pub fn get_index(&self) -> Index<K>
    where
        K: IndexKey,
    {
        let source = self.clone();
        Index::new(Seq::from_fn(move || source.index_seq().cursor()))
    }

    /// Replaces the index with `index`, pairing positionally.
    #[must_use]
    pub fn with_index<K2: Element>(&self, index: Seq<K2>) -> Series<K2, V> {
        self.derive(move |content| {
            SeriesContent::from_index_values(index.clone(), content.values.clone())
        })
    }

    /// Replaces the index with one computed from each value.
    ///
    /// The new index is `self.select(selector)`, resolved only when the new
    /// series is first accessed.
    pub fn with_index_from<K2, F>(&self, selector: F) -> Series<K2, V>
    where
        K2: Value,
        F: Fn(&V) -> K2 + Send + Sync + 'static,
    {
        let keys = self.select(move |value, _| selector(value));
        self.derive(move |content| {
            SeriesContent::from_index_values(keys.values_seq(), content.values.clone())
        })
    }

    // ── Windows ────────────────────────────────────────────────────────

    /// Non-overlapping windows of `period`; the last may be shorter.
    pub fn window(&self, period: usize) -> Result<Series<usize, Series<K, V>>, FrameError> {
        let windows = self.deferred_pairs().window(period)?;
        Ok(Series::from_seq(
            windows.map(|window, _| Series::from_pairs_seq(window)),
        ))
    }

    /// Overlapping windows of exactly `period`, each keyed by its first or
    /// last index.
    pub fn rolling_window(
        &self,
        period: usize,
        which_index: WhichIndex,
    ) -> Result<Series<K, Series<K, V>>, FrameError> {
        let windows = self.deferred_pairs().rolling_window(period)?;
        let keyed = windows.flat_map(move |window, _| {
            let key = match which_index {
                WhichIndex::First => window.cursor().next(),
                WhichIndex::Last => window.cursor().last(),
            };
            key.map(|(key, _)| (key, Series::from_pairs_seq(window)))
        });
        Ok(Series::from_pairs_seq(keyed))
    }

    /// Contiguous runs; a new run starts whenever `comparer(prev, next)` is
    /// false.
    pub fn variable_window<F>(&self, comparer: F) -> Series<usize, Series<K, V>>
    where
        F: Fn(&V, &V) -> bool + Send + Sync + 'static,
    {
        let comparer = Arc::new(comparer);
        self.derive(move |content| {
            let comparer = Arc::clone(&comparer);
            let groups = content
                .pairs
                .variable_window(move |(_, prev), (_, next)| comparer(prev, next))
                .map(|group, _| Series::from_baked_pairs(group));
            SeriesContent::from_index_values(positional_index(&groups), groups)
        })
    }

    // ── Ordering ───────────────────────────────────────────────────────

    pub fn order_by<S, F>(&self, selector: F) -> OrderedSeries<K, V>
    where
        S: PartialOrd + 'static,
        F: Fn(&V) -> S + Send + Sync + 'static,
    {
        OrderedSeries::new(self.clone(), None, selector, SortDirection::Ascending)
    }

    pub fn order_by_descending<S, F>(&self, selector: F) -> OrderedSeries<K, V>
    where
        S: PartialOrd + 'static,
        F: Fn(&V) -> S + Send + Sync + 'static,
    {
        OrderedSeries::new(self.clone(), None, selector, SortDirection::Descending)
    }

    // ── Numeric summaries ──────────────────────────────────────────────

    fn numbers(&self) -> impl Iterator<Item = f64>
    where
        V: ToNumber,
    {
        self.content()
            .values
            .cursor()
            .filter(|value| !value.is_missing())
            .filter_map(|value| value.to_number())
    }

    #[must_use]
    pub fn sum(&self) -> f64
    where
        V: ToNumber,
    {
        self.numbers().sum()
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average(&self) -> Option<f64>
    where
        V: ToNumber,
    {
        let (total, count) = self
            .numbers()
            .fold((0.0, 0_usize), |(total, count), n| (total + n, count + 1));
        (count > 0).then(|| total / count as f64)
    }

    #[must_use]
    pub fn min(&self) -> Option<f64>
    where
        V: ToNumber,
    {
        self.numbers().reduce(f64::min)
    }

    #[must_use]
    pub fn max(&self) -> Option<f64>
    where
        V: ToNumber,
    {
        self.numbers().reduce(f64::max)
    }
}

// ── Range queries ──────────────────────────────────────────────────────

impl<K: IndexKey, V: Value> Series<K, V> {
    /// Applies a bounded scan once the index type is known. A bound of an
    /// unorderable kind is rejected here; the index itself is inspected only
    /// when the result is first accessed.
    fn range<F>(&self, operation: &'static str, bound: K, scan: F) -> Result<Self, FrameError>
    where
        F: Fn(&Seq<(K, V)>, KeyOrdering, K) -> Seq<(K, V)> + Send + Sync + 'static,
    {
        if bound.key_kind() == Some(KeyKind::Other) {
            return Err(IndexError::UnsupportedKeyType { operation }.into());
        }
        Ok(self.derive_pairs(move |pairs| {
            let ordering = Index::new(pairs.pluck_first()).key_ordering();
            scan(pairs, ordering, bound.clone())
        }))
    }

    /// Pairs from the first key not less than `start`. Assumes an ascending
    /// index.
    pub fn start_at(&self, start: K) -> Result<Self, FrameError> {
        self.range("start_at", start, |pairs, ordering, start| {
            pairs.skip_while(move |(key, _)| ordering.less_than(key, &start))
        })
    }

    /// Pairs up to and including `end`. Assumes an ascending index.
    pub fn end_at(&self, end: K) -> Result<Self, FrameError> {
        self.range("end_at", end, |pairs, ordering, end| {
            pairs.take_while(move |(key, _)| ordering.less_than_or_equal_to(key, &end))
        })
    }

    /// Pairs strictly after `key`. Assumes an ascending index.
    pub fn after(&self, key: K) -> Result<Self, FrameError> {
        self.range("after", key, |pairs, ordering, bound| {
            pairs.skip_while(move |(key, _)| ordering.less_than_or_equal_to(key, &bound))
        })
    }

    /// Pairs strictly before `key`. Assumes an ascending index.
    pub fn before(&self, key: K) -> Result<Self, FrameError> {
        self.range("before", key, |pairs, ordering, bound| {
            pairs.take_while(move |(key, _)| ordering.less_than(key, &bound))
        })
    }

    pub fn between(&self, start: K, end: K) -> Result<Self, FrameError> {
        self.start_at(start)?.end_at(end)
    }
}

// ── Ordered series ─────────────────────────────────────────────────────

struct SortNode<K, V> {
    level: SortLevel<(K, V)>,
    parent: Option<Arc<SortNode<K, V>>>,
}

/// A series sorted by a chain of levels.
///
/// The `order_by` call is the most significant level; each `then_by` adds a
/// strictly less significant one. The sort is stable, so pairs equal on every
/// level keep their source order.
pub struct OrderedSeries<K, V> {
    source: Series<K, V>,
    node: Arc<SortNode<K, V>>,
    sorted: Series<K, V>,
}

impl<K, V> Clone for OrderedSeries<K, V> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            node: Arc::clone(&self.node),
            sorted: self.sorted.clone(),
        }
    }
}

impl<K, V> fmt::Debug for OrderedSeries<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedSeries")
            .field("sorted", &self.sorted)
            .finish_non_exhaustive()
    }
}

impl<K: Element, V: Value> OrderedSeries<K, V> {
    fn new<S, F>(
        source: Series<K, V>,
        parent: Option<Arc<SortNode<K, V>>>,
        selector: F,
        direction: SortDirection,
    ) -> Self
    where
        S: PartialOrd + 'static,
        F: Fn(&V) -> S + Send + Sync + 'static,
    {
        let node = Arc::new(SortNode {
            level: SortLevel::new(move |pair: &(K, V)| selector(&pair.1), direction),
            parent,
        });
        let levels = Self::levels(&node);
        let sorted = source.derive_pairs(move |pairs| pairs.order_by_levels(levels.clone()));
        Self {
            source,
            node,
            sorted,
        }
    }

    /// Sort levels, most significant first.
    fn levels(node: &Arc<SortNode<K, V>>) -> Vec<SortLevel<(K, V)>> {
        let mut levels = Vec::new();
        let mut current = Some(node);
        while let Some(node) = current {
            levels.push(node.level.clone());
            current = node.parent.as_ref();
        }
        levels.reverse();
        levels
    }

    #[must_use]
    pub fn level_count(&self) -> usize {
        Self::levels(&self.node).len()
    }

    pub fn then_by<S, F>(&self, selector: F) -> Self
    where
        S: PartialOrd + 'static,
        F: Fn(&V) -> S + Send + Sync + 'static,
    {
        Self::new(
            self.source.clone(),
            Some(Arc::clone(&self.node)),
            selector,
            SortDirection::Ascending,
        )
    }

    pub fn then_by_descending<S, F>(&self, selector: F) -> Self
    where
        S: PartialOrd + 'static,
        F: Fn(&V) -> S + Send + Sync + 'static,
    {
        Self::new(
            self.source.clone(),
            Some(Arc::clone(&self.node)),
            selector,
            SortDirection::Descending,
        )
    }

    #[must_use]
    pub fn series(&self) -> &Series<K, V> {
        &self.sorted
    }

    #[must_use]
    pub fn into_series(self) -> Series<K, V> {
        self.sorted
    }
}

impl<K, V> Deref for OrderedSeries<K, V> {
    type Target = Series<K, V>;

    fn deref(&self) -> &Series<K, V> {
        &self.sorted
    }
}

impl<K, V> From<OrderedSeries<K, V>> for Series<K, V> {
    fn from(ordered: OrderedSeries<K, V>) -> Self {
        ordered.sorted
    }
}

// ── DataFrame ──────────────────────────────────────────────────────────

/// Construction input for a [`DataFrame`].
pub struct DataFrameConfig<K> {
    pub rows: Option<Seq<Row>>,
    pub index: Option<Seq<K>>,
    pub pairs: Option<Seq<(K, Row)>>,
    /// Explicit column names; overrides detection from the rows.
    pub column_names: Option<Vec<String>>,
    /// Detect column names from every row instead of only the first.
    pub consider_all_rows: bool,
    pub baked: bool,
}

impl<K> Default for DataFrameConfig<K> {
    fn default() -> Self {
        Self {
            rows: None,
            index: None,
            pairs: None,
            column_names: None,
            consider_all_rows: false,
            baked: false,
        }
    }
}

impl<K> DataFrameConfig<K> {
    fn split(self) -> (SeriesConfig<K, Row>, Option<Vec<String>>, bool) {
        (
            SeriesConfig {
                values: self.rows,
                index: self.index,
                pairs: self.pairs,
                baked: self.baked,
            },
            self.column_names,
            self.consider_all_rows,
        )
    }
}

fn detected_column_names(rows: Seq<Row>, consider_all_rows: bool) -> Seq<String> {
    Seq::from_fn(move || {
        let mut names = IndexSet::new();
        let mut cursor = rows.cursor();
        if consider_all_rows {
            for row in cursor {
                names.extend(row.columns().map(str::to_owned));
            }
        } else if let Some(row) = cursor.next() {
            names.extend(row.columns().map(str::to_owned));
        }
        names.into_iter().collect::<Vec<_>>()
    })
}

/// Sort key for one frame cell under a total order.
///
/// Present cells order by kind (bool, number, text, date) and then by value,
/// with `Int64` and `Float64` compared numerically. NaN cells and then
/// missing cells always sort last, whatever the direction.
#[derive(Debug, Clone)]
struct CellOrder {
    cell: Scalar,
    descending: bool,
}

impl CellOrder {
    fn rank(&self) -> u8 {
        match &self.cell {
            Scalar::Bool(_) => 0,
            Scalar::Float64(v) if v.is_nan() => 4,
            Scalar::Int64(_) | Scalar::Float64(_) => 1,
            Scalar::Utf8(_) => 2,
            Scalar::Date(_) => 3,
            Scalar::Null => 5,
        }
    }
}

impl Ord for CellOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        let (left, right) = (self.rank(), other.rank());
        if left >= 4 || right >= 4 {
            return left.cmp(&right);
        }
        let ordering = left.cmp(&right).then_with(|| {
            self.cell
                .partial_cmp(&other.cell)
                .unwrap_or(Ordering::Equal)
        });
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

impl PartialOrd for CellOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CellOrder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CellOrder {}

/// A series of rows plus the names of its columns.
pub struct DataFrame<K> {
    series: Series<K, Row>,
    column_names: Seq<String>,
}

impl<K> Clone for DataFrame<K> {
    fn clone(&self) -> Self {
        Self {
            series: self.series.clone(),
            column_names: self.column_names.clone(),
        }
    }
}

impl<K> fmt::Debug for DataFrame<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFrame")
            .field("series", &self.series)
            .finish_non_exhaustive()
    }
}

impl<K: Element> Value for DataFrame<K> {}

impl DataFrame<usize> {
    #[must_use]
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::new(DataFrameConfig {
            rows: Some(Seq::from_vec(rows)),
            ..DataFrameConfig::default()
        })
    }

    /// Rows assembled from named columns; stops at the shortest column.
    #[must_use]
    pub fn from_columns(columns: Vec<(String, Vec<Scalar>)>) -> Self {
        let names: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();
        let row_names = names.clone();
        let sources: Vec<Seq<Scalar>> = columns
            .into_iter()
            .map(|(_, cells)| Seq::from_vec(cells))
            .collect();
        let rows = Seq::zip_all(sources, move |cells| {
            row_names.iter().cloned().zip(cells).collect::<Row>()
        });
        Self::new(DataFrameConfig {
            rows: Some(rows),
            column_names: Some(names),
            ..DataFrameConfig::default()
        })
    }

    /// Rows of positional cells expanded to named columns on demand. A short
    /// row lacks its trailing columns; surplus cells are dropped.
    #[must_use]
    pub fn from_row_values(column_names: Vec<String>, rows: Vec<Vec<Scalar>>) -> Self {
        let names = column_names.clone();
        let rows = Seq::from_vec(rows).map(move |cells, _| {
            names.iter().cloned().zip(cells).collect::<Row>()
        });
        Self::new(DataFrameConfig {
            rows: Some(rows),
            column_names: Some(column_names),
            ..DataFrameConfig::default()
        })
    }
}

impl<K: DefaultKey> DataFrame<K> {
    #[must_use]
    pub fn new(config: DataFrameConfig<K>) -> Self {
        let (series, column_names, consider_all_rows) = config.split();
        Self::assemble(Series::new(series), column_names, consider_all_rows)
    }
}

impl<K: Element> DataFrame<K> {
    pub fn try_new(config: DataFrameConfig<K>) -> Result<Self, FrameError> {
        let (series, column_names, consider_all_rows) = config.split();
        Ok(Self::assemble(
            Series::try_new(series)?,
            column_names,
            consider_all_rows,
        ))
    }

    #[must_use]
    pub fn from_pairs(pairs: Vec<(K, Row)>) -> Self {
        Self::from_series(Series::from_pairs(pairs))
    }

    /// Wraps a series of rows, detecting column names from its first row.
    #[must_use]
    pub fn from_series(series: Series<K, Row>) -> Self {
        Self::assemble(series, None, false)
    }

    fn assemble(
        series: Series<K, Row>,
        column_names: Option<Vec<String>>,
        consider_all_rows: bool,
    ) -> Self {
        let column_names = match column_names {
            Some(names) => Seq::from_vec(names),
            None => {
                let source = series.clone();
                let detected = Seq::from_fn(move || source.values_seq().cursor());
                detected_column_names(detected, consider_all_rows)
            }
        };
        Self {
            series,
            column_names,
        }
    }

    /// Same column names over a different series of rows.
    #[must_use]
    pub fn with_series(&self, series: Series<K, Row>) -> Self {
        Self {
            series,
            column_names: self.column_names.clone(),
        }
    }

    #[must_use]
    pub fn as_series(&self) -> &Series<K, Row> {
        &self.series
    }

    #[must_use]
    pub fn into_series(self) -> Series<K, Row> {
        self.series
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.column_names.to_vec()
    }

    #[must_use]
    pub fn column_names_seq(&self) -> Seq<String> {
        self.column_names.clone()
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column_names.cursor().any(|column| column == name)
    }

    /// One column as a series sharing the frame's index. Absent cells are
    /// null and so are elided on materialization.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Series<K, Scalar> {
        let name = name.to_owned();
        self.series.select(move |row, _| row.get_or_null(&name))
    }

    #[must_use]
    pub fn select_columns(&self, names: &[&str]) -> Self {
        let keep: Vec<String> = names.iter().map(|&name| name.to_owned()).collect();
        let row_keep = keep.clone();
        let series = self.series.select(move |row, _| {
            row_keep
                .iter()
                .filter_map(|name| row.get(name).map(|cell| (name.clone(), cell.clone())))
                .collect::<Row>()
        });
        Self {
            series,
            column_names: Seq::from_vec(keep),
        }
    }

    #[must_use]
    pub fn drop_columns(&self, names: &[&str]) -> Self {
        let dropped: Arc<[String]> = names.iter().map(|&name| name.to_owned()).collect();
        let row_dropped = Arc::clone(&dropped);
        let series = self.series.select(move |row, _| {
            let mut row = row.clone();
            for name in row_dropped.iter() {
                row.remove(name);
            }
            row
        });
        Self {
            series,
            column_names: self
                .column_names
                .filter(move |name| !dropped.contains(name)),
        }
    }

    #[must_use]
    pub fn rename_column(&self, from: &str, to: &str) -> Self {
        let (from, to) = (from.to_owned(), to.to_owned());
        let (row_from, row_to) = (from.clone(), to.clone());
        let series = self.series.select(move |row, _| {
            row.iter()
                .map(|(name, cell)| {
                    let name = if name == row_from { row_to.as_str() } else { name };
                    (name.to_owned(), cell.clone())
                })
                .collect::<Row>()
        });
        Self {
            series,
            column_names: self
                .column_names
                .map(move |name, _| if name == from { to.clone() } else { name }),
        }
    }

    /// Sets column `name` positionally from `cells`; rows past the end of
    /// `cells` get null.
    #[must_use]
    pub fn with_column(&self, name: &str, cells: Seq<Scalar>) -> Self {
        let nulls = Seq::counting().map(|_, _| Scalar::Null);
        let padded = cells.chain(&nulls);
        let row_name = name.to_owned();
        let series = self.series.derive(move |content| {
            let row_name = row_name.clone();
            SeriesContent::from_pairs(content.pairs.zip(&padded).map(
                move |((key, row), cell), _| {
                    let mut row = row;
                    row.set(row_name.clone(), cell);
                    (key, row)
                },
            ))
        });
        let column = name.to_owned();
        let extra = Seq::from_vec(vec![column.clone()]);
        let column_names = self
            .column_names
            .filter(move |existing| *existing != column)
            .chain(&extra);
        Self {
            series,
            column_names,
        }
    }

    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        self.with_series(self.series.filter(predicate))
    }

    #[must_use]
    pub fn skip(&self, count: usize) -> Self {
        self.with_series(self.series.skip(count))
    }

    #[must_use]
    pub fn take(&self, count: usize) -> Self {
        self.with_series(self.series.take(count))
    }

    #[must_use]
    pub fn head(&self, count: usize) -> Self {
        self.with_series(self.series.head(count))
    }

    #[must_use]
    pub fn tail(&self, count: usize) -> Self {
        self.with_series(self.series.tail(count))
    }

    #[must_use]
    pub fn reverse(&self) -> Self {
        self.with_series(self.series.reverse())
    }

    #[must_use]
    pub fn reset_index(&self) -> DataFrame<usize> {
        DataFrame {
            series: self.series.reset_index(),
            column_names: self.column_names.clone(),
        }
    }

    fn order_by_cells(&self, name: &str, descending: bool) -> Self {
        let name = name.to_owned();
        let ordered = self.series.order_by(move |row| CellOrder {
            cell: row.get_or_null(&name),
            descending,
        });
        self.with_series(ordered.into_series())
    }

    /// Stable sort on the cells of `name`. Rows lacking the column, or
    /// holding NaN there, go last.
    #[must_use]
    pub fn order_by_column(&self, name: &str) -> Self {
        self.order_by_cells(name, false)
    }

    /// Descending counterpart of [`DataFrame::order_by_column`]; rows lacking
    /// the column still go last.
    #[must_use]
    pub fn order_by_column_descending(&self, name: &str) -> Self {
        self.order_by_cells(name, true)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.series.count()
    }

    #[must_use]
    pub fn is_baked(&self) -> bool {
        self.series.is_baked()
    }

    /// Bakes the rows and freezes the column names.
    #[must_use]
    pub fn bake(&self) -> Self {
        if self.series.is_baked() {
            return self.clone();
        }
        Self {
            series: self.series.bake(),
            column_names: Seq::from_vec(self.column_names.to_vec()),
        }
    }

    #[must_use]
    pub fn to_rows(&self) -> Vec<Row> {
        self.series.to_array()
    }

    #[must_use]
    pub fn to_pairs(&self) -> Vec<(K, Row)> {
        self.series.to_pairs()
    }
}

impl<K> From<DataFrame<K>> for Series<K, Row> {
    fn from(frame: DataFrame<K>) -> Self {
        frame.series
    }
}
