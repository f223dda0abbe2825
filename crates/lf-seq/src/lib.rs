#![forbid(unsafe_code)]

//! Re-iterable lazy sequences.
//!
//! A [`Seq`] is a handle to a producer that builds a brand-new cursor every
//! time it is asked to. Combinators never store cursor progress on the
//! producer itself: iterating the same `Seq` twice re-runs its whole ancestor
//! chain, and two cursors over one `Seq` never observe each other.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::iter::Peekable;
use std::sync::Arc;

use lf_types::Element;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single-pass cursor over a sequence.
pub type Cursor<T> = Box<dyn Iterator<Item = T>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeqError {
    #[error("{operation}: invalid argument `{parameter}`: {reason}")]
    InvalidArgument {
        operation: &'static str,
        parameter: &'static str,
        reason: String,
    },
    #[error("{operation}: sequence is empty")]
    EmptySequence { operation: &'static str },
}

/// Produces a fresh, independent cursor on each call.
pub trait Producer<T>: Send + Sync {
    fn cursor(&self) -> Cursor<T>;
}

pub struct Seq<T> {
    producer: Arc<dyn Producer<T>>,
}

impl<T> Clone for Seq<T> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<T> fmt::Debug for Seq<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seq").finish_non_exhaustive()
    }
}

impl<T: Element> Default for Seq<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Element> FromIterator<T> for Seq<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<T: Element> IntoIterator for &Seq<T> {
    type Item = T;
    type IntoIter = Cursor<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.cursor()
    }
}

// ── Primitive producers ────────────────────────────────────────────────

struct CountingProducer;

impl Producer<usize> for CountingProducer {
    fn cursor(&self) -> Cursor<usize> {
        Box::new(0_usize..)
    }
}

struct EmptyProducer;

impl<T: Element> Producer<T> for EmptyProducer {
    fn cursor(&self) -> Cursor<T> {
        Box::new(std::iter::empty())
    }
}

struct ArrayProducer<T> {
    items: Arc<[T]>,
}

struct ArrayCursor<T> {
    items: Arc<[T]>,
    position: usize,
}

impl<T: Clone> Iterator for ArrayCursor<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.items.get(self.position)?.clone();
        self.position += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.items.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl<T: Element> Producer<T> for ArrayProducer<T> {
    fn cursor(&self) -> Cursor<T> {
        Box::new(ArrayCursor {
            items: Arc::clone(&self.items),
            position: 0,
        })
    }
}

struct DeferredProducer<T> {
    make: Arc<dyn Fn() -> Cursor<T> + Send + Sync>,
}

impl<T: Element> Producer<T> for DeferredProducer<T> {
    fn cursor(&self) -> Cursor<T> {
        (self.make)()
    }
}

// ── Transform producers ────────────────────────────────────────────────

struct MapProducer<T, U> {
    source: Seq<T>,
    f: Arc<dyn Fn(T, usize) -> U + Send + Sync>,
}

impl<T: Element, U: Element> Producer<U> for MapProducer<T, U> {
    fn cursor(&self) -> Cursor<U> {
        let f = Arc::clone(&self.f);
        Box::new(
            self.source
                .cursor()
                .enumerate()
                .map(move |(position, value)| f(value, position)),
        )
    }
}

struct FlatMapProducer<T, U> {
    source: Seq<T>,
    f: Arc<dyn Fn(T, usize) -> Cursor<U> + Send + Sync>,
}

impl<T: Element, U: Element> Producer<U> for FlatMapProducer<T, U> {
    fn cursor(&self) -> Cursor<U> {
        let f = Arc::clone(&self.f);
        Box::new(
            self.source
                .cursor()
                .enumerate()
                .flat_map(move |(position, value)| f(value, position)),
        )
    }
}

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct FilterProducer<T> {
    source: Seq<T>,
    predicate: Predicate<T>,
}

impl<T: Element> Producer<T> for FilterProducer<T> {
    fn cursor(&self) -> Cursor<T> {
        let predicate = Arc::clone(&self.predicate);
        Box::new(self.source.cursor().filter(move |value| predicate(value)))
    }
}

struct SkipProducer<T> {
    source: Seq<T>,
    count: usize,
}

impl<T: Element> Producer<T> for SkipProducer<T> {
    fn cursor(&self) -> Cursor<T> {
        Box::new(self.source.cursor().skip(self.count))
    }
}

struct TakeProducer<T> {
    source: Seq<T>,
    count: usize,
}

impl<T: Element> Producer<T> for TakeProducer<T> {
    fn cursor(&self) -> Cursor<T> {
        Box::new(self.source.cursor().take(self.count))
    }
}

struct SkipWhileProducer<T> {
    source: Seq<T>,
    predicate: Predicate<T>,
}

impl<T: Element> Producer<T> for SkipWhileProducer<T> {
    fn cursor(&self) -> Cursor<T> {
        let predicate = Arc::clone(&self.predicate);
        Box::new(self.source.cursor().skip_while(move |value| predicate(value)))
    }
}

struct TakeWhileProducer<T> {
    source: Seq<T>,
    predicate: Predicate<T>,
}

impl<T: Element> Producer<T> for TakeWhileProducer<T> {
    fn cursor(&self) -> Cursor<T> {
        let predicate = Arc::clone(&self.predicate);
        Box::new(self.source.cursor().take_while(move |value| predicate(value)))
    }
}

struct ConcatProducer<T> {
    sources: Arc<[Seq<T>]>,
}

impl<T: Element> Producer<T> for ConcatProducer<T> {
    fn cursor(&self) -> Cursor<T> {
        let sources = Arc::clone(&self.sources);
        Box::new((0..sources.len()).flat_map(move |slot| sources[slot].cursor()))
    }
}

struct ReverseProducer<T> {
    source: Seq<T>,
}

impl<T: Element> Producer<T> for ReverseProducer<T> {
    fn cursor(&self) -> Cursor<T> {
        let mut items: Vec<T> = self.source.cursor().collect();
        items.reverse();
        Box::new(items.into_iter())
    }
}

struct DistinctProducer<T, G> {
    source: Seq<T>,
    key_of: Arc<dyn Fn(&T) -> G + Send + Sync>,
}

impl<T: Element, G: Hash + Eq + 'static> Producer<T> for DistinctProducer<T, G> {
    fn cursor(&self) -> Cursor<T> {
        let key_of = Arc::clone(&self.key_of);
        let mut seen = HashSet::new();
        Box::new(
            self.source
                .cursor()
                .filter(move |value| seen.insert(key_of(value))),
        )
    }
}

struct ZipPairProducer<A, B> {
    left: Seq<A>,
    right: Seq<B>,
}

impl<A: Element, B: Element> Producer<(A, B)> for ZipPairProducer<A, B> {
    fn cursor(&self) -> Cursor<(A, B)> {
        Box::new(self.left.cursor().zip(self.right.cursor()))
    }
}

struct ZipAllProducer<T, U> {
    sources: Arc<[Seq<T>]>,
    combine: Arc<dyn Fn(Vec<T>) -> U + Send + Sync>,
}

impl<T: Element, U: Element> Producer<U> for ZipAllProducer<T, U> {
    fn cursor(&self) -> Cursor<U> {
        if self.sources.is_empty() {
            return Box::new(std::iter::empty());
        }
        let mut cursors: Vec<Cursor<T>> = self.sources.iter().map(Seq::cursor).collect();
        let combine = Arc::clone(&self.combine);
        Box::new(std::iter::from_fn(move || {
            let mut tuple = Vec::with_capacity(cursors.len());
            for cursor in &mut cursors {
                tuple.push(cursor.next()?);
            }
            Some(combine(tuple))
        }))
    }
}

struct TileProducer<T> {
    source: Seq<T>,
    count: usize,
}

impl<T: Element> Producer<T> for TileProducer<T> {
    fn cursor(&self) -> Cursor<T> {
        let source = self.source.clone();
        Box::new((0..self.count).flat_map(move |_| source.cursor()))
    }
}

// ── Window producers ───────────────────────────────────────────────────

struct FixedWindowProducer<T> {
    source: Seq<T>,
    period: usize,
}

struct FixedWindowCursor<T> {
    source: Seq<T>,
    period: usize,
    position: usize,
}

impl<T: Element> Iterator for FixedWindowCursor<T> {
    type Item = Seq<T>;

    fn next(&mut self) -> Option<Seq<T>> {
        let window = self.source.skip(self.position).take(self.period);
        if window.is_empty() {
            return None;
        }
        tracing::trace!(position = self.position, period = self.period, "fixed window");
        self.position += self.period;
        Some(window)
    }
}

impl<T: Element> Producer<Seq<T>> for FixedWindowProducer<T> {
    fn cursor(&self) -> Cursor<Seq<T>> {
        Box::new(FixedWindowCursor {
            source: self.source.clone(),
            period: self.period,
            position: 0,
        })
    }
}

struct RollingWindowProducer<T> {
    source: Seq<T>,
    period: usize,
}

struct RollingWindowCursor<T> {
    source: Seq<T>,
    period: usize,
    position: usize,
}

impl<T: Element> Iterator for RollingWindowCursor<T> {
    type Item = Seq<T>;

    fn next(&mut self) -> Option<Seq<T>> {
        let window = self.source.skip(self.position).take(self.period);
        if window.count() < self.period {
            return None;
        }
        tracing::trace!(position = self.position, period = self.period, "rolling window");
        self.position += 1;
        Some(window)
    }
}

impl<T: Element> Producer<Seq<T>> for RollingWindowProducer<T> {
    fn cursor(&self) -> Cursor<Seq<T>> {
        Box::new(RollingWindowCursor {
            source: self.source.clone(),
            period: self.period,
            position: 0,
        })
    }
}

type Comparer<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

struct VariableWindowProducer<T> {
    source: Seq<T>,
    comparer: Comparer<T>,
}

struct VariableWindowCursor<T> {
    items: Peekable<Cursor<T>>,
    comparer: Comparer<T>,
}

impl<T: Element> Iterator for VariableWindowCursor<T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Vec<T>> {
        let mut group = vec![self.items.next()?];
        loop {
            let continues = match (group.last(), self.items.peek()) {
                (Some(prev), Some(next)) => (self.comparer)(prev, next),
                _ => false,
            };
            if !continues {
                break;
            }
            match self.items.next() {
                Some(item) => group.push(item),
                None => break,
            }
        }
        Some(group)
    }
}

impl<T: Element> Producer<Vec<T>> for VariableWindowProducer<T> {
    fn cursor(&self) -> Cursor<Vec<T>> {
        Box::new(VariableWindowCursor {
            items: self.source.cursor().peekable(),
            comparer: Arc::clone(&self.comparer),
        })
    }
}

// ── Ordering ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Compares two sort keys: equality first, then greater, then less.
/// Keys that are none of the three (NaN, mismatched kinds) compare equal.
pub fn compare_sort_keys<S: PartialOrd + ?Sized>(left: &S, right: &S) -> Ordering {
    if left == right {
        Ordering::Equal
    } else if left > right {
        Ordering::Greater
    } else if left < right {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

type PositionComparer = Box<dyn Fn(usize, usize) -> Ordering>;

/// One tier of a multi-key ordering.
///
/// The selector runs once per element per level; the resulting keys are held
/// for the duration of a single sort.
pub struct SortLevel<T> {
    keyed: Arc<dyn Fn(&[T]) -> PositionComparer + Send + Sync>,
    direction: SortDirection,
}

impl<T> Clone for SortLevel<T> {
    fn clone(&self) -> Self {
        Self {
            keyed: Arc::clone(&self.keyed),
            direction: self.direction,
        }
    }
}

impl<T> fmt::Debug for SortLevel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortLevel")
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

impl<T: Element> SortLevel<T> {
    pub fn new<S, F>(selector: F, direction: SortDirection) -> Self
    where
        S: PartialOrd + 'static,
        F: Fn(&T) -> S + Send + Sync + 'static,
    {
        Self {
            keyed: Arc::new(move |items: &[T]| -> PositionComparer {
                let keys: Vec<S> = items.iter().map(&selector).collect();
                Box::new(move |a: usize, b: usize| compare_sort_keys(&keys[a], &keys[b]))
            }),
            direction,
        }
    }

    pub fn ascending<S, F>(selector: F) -> Self
    where
        S: PartialOrd + 'static,
        F: Fn(&T) -> S + Send + Sync + 'static,
    {
        Self::new(selector, SortDirection::Ascending)
    }

    pub fn descending<S, F>(selector: F) -> Self
    where
        S: PartialOrd + 'static,
        F: Fn(&T) -> S + Send + Sync + 'static,
    {
        Self::new(selector, SortDirection::Descending)
    }

    #[must_use]
    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    fn comparer(&self, items: &[T]) -> PositionComparer {
        let compare = (self.keyed)(items);
        match self.direction {
            SortDirection::Ascending => compare,
            SortDirection::Descending => {
                Box::new(move |a: usize, b: usize| compare(a, b).reverse())
            }
        }
    }
}

/// Stable sort of a snapshot by `levels`, level 0 most significant.
pub fn sort_by_levels<T: Element>(items: Vec<T>, levels: &[SortLevel<T>]) -> Vec<T> {
    tracing::debug!(items = items.len(), levels = levels.len(), "ordering snapshot");
    let comparers: Vec<PositionComparer> = levels.iter().map(|level| level.comparer(&items)).collect();
    let mut positions: Vec<usize> = (0..items.len()).collect();
    positions.sort_by(|&a, &b| {
        comparers
            .iter()
            .map(|compare| compare(a, b))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    positions
        .into_iter()
        .filter_map(|position| slots[position].take())
        .collect()
}

struct OrderedProducer<T> {
    source: Seq<T>,
    levels: Arc<[SortLevel<T>]>,
}

impl<T: Element> Producer<T> for OrderedProducer<T> {
    fn cursor(&self) -> Cursor<T> {
        let items: Vec<T> = self.source.cursor().collect();
        Box::new(sort_by_levels(items, &self.levels).into_iter())
    }
}

// ── Seq surface ────────────────────────────────────────────────────────

impl Seq<usize> {
    /// The unbounded counting sequence `0, 1, 2, ...`.
    #[must_use]
    pub fn counting() -> Self {
        Self::from_producer(CountingProducer)
    }
}

impl<T: Element> Seq<T> {
    pub fn from_producer(producer: impl Producer<T> + 'static) -> Self {
        Self {
            producer: Arc::new(producer),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::from_producer(EmptyProducer)
    }

    #[must_use]
    pub fn from_vec(items: Vec<T>) -> Self {
        Self::from_arc(items.into())
    }

    /// Array-backed sequence sharing `items` by reference.
    #[must_use]
    pub fn from_arc(items: Arc<[T]>) -> Self {
        Self::from_producer(ArrayProducer { items })
    }

    /// Sequence whose cursor is built by `make` on every iteration.
    pub fn from_fn<I, F>(make: F) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static,
        F: Fn() -> I + Send + Sync + 'static,
    {
        Self::from_producer(DeferredProducer {
            make: Arc::new(move || -> Cursor<T> { Box::new(make().into_iter()) }),
        })
    }

    #[must_use]
    pub fn cursor(&self) -> Cursor<T> {
        self.producer.cursor()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.cursor().collect()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.cursor().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cursor().next().is_none()
    }

    pub fn first(&self) -> Result<T, SeqError> {
        self.cursor()
            .next()
            .ok_or(SeqError::EmptySequence { operation: "first" })
    }

    pub fn last(&self) -> Result<T, SeqError> {
        self.cursor()
            .last()
            .ok_or(SeqError::EmptySequence { operation: "last" })
    }

    pub fn map<U, F>(&self, f: F) -> Seq<U>
    where
        U: Element,
        F: Fn(T, usize) -> U + Send + Sync + 'static,
    {
        Seq::from_producer(MapProducer {
            source: self.clone(),
            f: Arc::new(f),
        })
    }

    /// Concatenates the outputs of `f` in encounter order.
    pub fn flat_map<U, I, F>(&self, f: F) -> Seq<U>
    where
        U: Element,
        I: IntoIterator<Item = U>,
        I::IntoIter: 'static,
        F: Fn(T, usize) -> I + Send + Sync + 'static,
    {
        Seq::from_producer(FlatMapProducer {
            source: self.clone(),
            f: Arc::new(move |value: T, position: usize| -> Cursor<U> {
                Box::new(f(value, position).into_iter())
            }),
        })
    }

    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::from_producer(FilterProducer {
            source: self.clone(),
            predicate: Arc::new(predicate),
        })
    }

    #[must_use]
    pub fn skip(&self, count: usize) -> Self {
        Self::from_producer(SkipProducer {
            source: self.clone(),
            count,
        })
    }

    #[must_use]
    pub fn take(&self, count: usize) -> Self {
        Self::from_producer(TakeProducer {
            source: self.clone(),
            count,
        })
    }

    /// Skips the prefix matching `predicate`; once an element is emitted the
    /// predicate is never consulted again.
    pub fn skip_while<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::from_producer(SkipWhileProducer {
            source: self.clone(),
            predicate: Arc::new(predicate),
        })
    }

    /// Emits the prefix matching `predicate` and stops at the first miss.
    pub fn take_while<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::from_producer(TakeWhileProducer {
            source: self.clone(),
            predicate: Arc::new(predicate),
        })
    }

    #[must_use]
    pub fn concat(sources: Vec<Seq<T>>) -> Self {
        Self::from_producer(ConcatProducer {
            sources: sources.into(),
        })
    }

    #[must_use]
    pub fn chain(&self, other: &Seq<T>) -> Self {
        Self::concat(vec![self.clone(), other.clone()])
    }

    #[must_use]
    pub fn reverse(&self) -> Self {
        Self::from_producer(ReverseProducer {
            source: self.clone(),
        })
    }

    /// Keeps the first element seen for each key.
    pub fn distinct_by<G, F>(&self, key_of: F) -> Self
    where
        G: Hash + Eq + 'static,
        F: Fn(&T) -> G + Send + Sync + 'static,
    {
        Self::from_producer(DistinctProducer {
            source: self.clone(),
            key_of: Arc::new(key_of),
        })
    }

    #[must_use]
    pub fn distinct(&self) -> Self
    where
        T: Hash + Eq,
    {
        self.distinct_by(T::clone)
    }

    /// Positional pairing; stops at the shorter side.
    #[must_use]
    pub fn zip<U: Element>(&self, other: &Seq<U>) -> Seq<(T, U)> {
        Seq::from_producer(ZipPairProducer {
            left: self.clone(),
            right: other.clone(),
        })
    }

    /// N-way positional zip; stops at the first exhausted source and is empty
    /// when `sources` is.
    pub fn zip_all<U, F>(sources: Vec<Seq<T>>, combine: F) -> Seq<U>
    where
        U: Element,
        F: Fn(Vec<T>) -> U + Send + Sync + 'static,
    {
        Seq::from_producer(ZipAllProducer {
            sources: sources.into(),
            combine: Arc::new(combine),
        })
    }

    /// Repeats the sequence `count` times.
    #[must_use]
    pub fn tile(&self, count: usize) -> Self {
        Self::from_producer(TileProducer {
            source: self.clone(),
            count,
        })
    }

    /// Non-overlapping chunks of `period`; the final chunk may be shorter.
    pub fn window(&self, period: usize) -> Result<Seq<Seq<T>>, SeqError> {
        check_period("window", period)?;
        Ok(Seq::from_producer(FixedWindowProducer {
            source: self.clone(),
            period,
        }))
    }

    /// Overlapping chunks of exactly `period`, advancing by one.
    pub fn rolling_window(&self, period: usize) -> Result<Seq<Seq<T>>, SeqError> {
        check_period("rolling_window", period)?;
        Ok(Seq::from_producer(RollingWindowProducer {
            source: self.clone(),
            period,
        }))
    }

    /// Contiguous runs; a new run starts whenever `comparer(prev, next)` is false.
    pub fn variable_window<F>(&self, comparer: F) -> Seq<Vec<T>>
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Seq::from_producer(VariableWindowProducer {
            source: self.clone(),
            comparer: Arc::new(comparer),
        })
    }

    /// Stable multi-key ordering over a snapshot of the whole sequence.
    #[must_use]
    pub fn order_by_levels(&self, levels: Vec<SortLevel<T>>) -> Self {
        Self::from_producer(OrderedProducer {
            source: self.clone(),
            levels: levels.into(),
        })
    }

    /// Folds the sequence. Without a seed the first element seeds the fold.
    pub fn aggregate<F>(&self, seed: Option<T>, reducer: F) -> Result<T, SeqError>
    where
        F: Fn(T, T) -> T,
    {
        let mut cursor = self.cursor();
        let seed = match seed {
            Some(seed) => seed,
            None => cursor
                .next()
                .ok_or(SeqError::EmptySequence { operation: "aggregate" })?,
        };
        Ok(cursor.fold(seed, reducer))
    }
}

impl<A: Element, B: Element> Seq<(A, B)> {
    /// Projects tuple slot 0.
    #[must_use]
    pub fn pluck_first(&self) -> Seq<A> {
        self.map(|(first, _), _| first)
    }

    /// Projects tuple slot 1.
    #[must_use]
    pub fn pluck_second(&self) -> Seq<B> {
        self.map(|(_, second), _| second)
    }
}

fn check_period(operation: &'static str, period: usize) -> Result<(), SeqError> {
    if period == 0 {
        return Err(SeqError::InvalidArgument {
            operation,
            parameter: "period",
            reason: "must be greater than zero".to_owned(),
        });
    }
    Ok(())
}
