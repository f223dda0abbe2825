#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, OnceLock};

use lf_seq::{Seq, SeqError};
use lf_types::{IndexKey, KeyKind};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("{operation}: index key type does not support ordering comparisons")]
    UnsupportedKeyType { operation: &'static str },
    #[error(transparent)]
    Seq(#[from] SeqError),
}

/// Key type of an index, detected once from its first non-missing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    Number,
    String,
    Date,
    /// No comparable keys: every predicate holds, so range filters are no-ops.
    Empty,
    Unsupported,
}

fn detect_index_type<K: IndexKey>(keys: &Seq<K>) -> IndexType {
    match keys.cursor().find_map(|key| key.key_kind()) {
        Some(KeyKind::Number) => IndexType::Number,
        Some(KeyKind::Text) => IndexType::String,
        Some(KeyKind::Date) => IndexType::Date,
        Some(KeyKind::Other) => IndexType::Unsupported,
        None => IndexType::Empty,
    }
}

fn partial<T: PartialOrd>(left: Option<T>, right: Option<T>) -> Option<Ordering> {
    match (left, right) {
        (Some(left), Some(right)) => left.partial_cmp(&right),
        _ => None,
    }
}

/// Ordering predicates resolved for a detected index type.
///
/// Keys that cannot be read as the detected type (or NaN numbers) make every
/// comparison false, so `less_than_or_equal_to` holds for them. Under an
/// unsupported type no key is comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOrdering {
    index_type: IndexType,
}

impl KeyOrdering {
    #[must_use]
    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn less_than<K: IndexKey>(&self, left: &K, right: &K) -> bool {
        match self.ordering(left, right) {
            Some(ordering) => ordering == Ordering::Less,
            None => self.index_type == IndexType::Empty,
        }
    }

    pub fn greater_than<K: IndexKey>(&self, left: &K, right: &K) -> bool {
        match self.ordering(left, right) {
            Some(ordering) => ordering == Ordering::Greater,
            None => self.index_type == IndexType::Empty,
        }
    }

    pub fn less_than_or_equal_to<K: IndexKey>(&self, left: &K, right: &K) -> bool {
        self.index_type == IndexType::Empty || !self.greater_than(left, right)
    }

    fn ordering<K: IndexKey>(&self, left: &K, right: &K) -> Option<Ordering> {
        match self.index_type {
            IndexType::Number => partial(left.as_number(), right.as_number()),
            IndexType::String => match (left.as_text(), right.as_text()) {
                (Some(left), Some(right)) => Some(left.cmp(right)),
                _ => None,
            },
            IndexType::Date => partial(left.as_date(), right.as_date()),
            IndexType::Empty | IndexType::Unsupported => None,
        }
    }
}

/// A typed wrapper over a key sequence.
///
/// The key type is detected lazily, on the first predicate call, and cached
/// for the life of the index (and of its clones).
pub struct Index<K> {
    keys: Seq<K>,
    detected: Arc<OnceLock<IndexType>>,
}

impl<K> Clone for Index<K> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            detected: Arc::clone(&self.detected),
        }
    }
}

impl<K> fmt::Debug for Index<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("detected", &self.detected.get())
            .finish_non_exhaustive()
    }
}

impl<K: IndexKey> Index<K> {
    #[must_use]
    pub fn new(keys: Seq<K>) -> Self {
        Self {
            keys,
            detected: Arc::new(OnceLock::new()),
        }
    }

    #[must_use]
    pub fn from_keys(keys: Vec<K>) -> Self {
        Self::new(Seq::from_vec(keys))
    }

    #[must_use]
    pub fn keys(&self) -> &Seq<K> {
        &self.keys
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<K> {
        self.keys.to_vec()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.keys.count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn first(&self) -> Result<K, IndexError> {
        Ok(self.keys.first()?)
    }

    pub fn last(&self) -> Result<K, IndexError> {
        Ok(self.keys.last()?)
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.keys.cursor().any(|candidate| candidate == *key)
    }

    /// Position of the first occurrence of `key` (linear scan).
    #[must_use]
    pub fn position(&self, key: &K) -> Option<usize> {
        self.keys.cursor().position(|candidate| candidate == *key)
    }

    #[must_use]
    pub fn index_type(&self) -> IndexType {
        *self.detected.get_or_init(|| detect_index_type(&self.keys))
    }

    /// Predicates for the detected type, unsupported types included.
    #[must_use]
    pub fn key_ordering(&self) -> KeyOrdering {
        KeyOrdering {
            index_type: self.index_type(),
        }
    }

    /// Resolves the ordering predicates, failing for unsupported key types.
    pub fn ordering(&self, operation: &'static str) -> Result<KeyOrdering, IndexError> {
        match self.key_ordering() {
            KeyOrdering {
                index_type: IndexType::Unsupported,
            } => Err(IndexError::UnsupportedKeyType { operation }),
            ordering => Ok(ordering),
        }
    }

    pub fn less_than(&self, left: &K, right: &K) -> Result<bool, IndexError> {
        Ok(self.ordering("less_than")?.less_than(left, right))
    }

    pub fn less_than_or_equal_to(&self, left: &K, right: &K) -> Result<bool, IndexError> {
        Ok(self
            .ordering("less_than_or_equal_to")?
            .less_than_or_equal_to(left, right))
    }

    pub fn greater_than(&self, left: &K, right: &K) -> Result<bool, IndexError> {
        Ok(self.ordering("greater_than")?.greater_than(left, right))
    }

    /// Whether the keys are in non-decreasing order under the detected type.
    pub fn is_sorted(&self) -> Result<bool, IndexError> {
        let ordering = self.ordering("is_sorted")?;
        let keys = self.keys.to_vec();
        Ok(keys
            .windows(2)
            .all(|pair| ordering.less_than_or_equal_to(&pair[0], &pair[1])))
    }
}
