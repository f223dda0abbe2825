#![forbid(unsafe_code)]

//! Element, key and cell contracts shared by every layer of the engine.
//!
//! Sequences only ever need [`Element`]. Series values additionally implement
//! [`Value`] so that materialization can elide missing entries, and index keys
//! implement [`IndexKey`] so the index layer can pick its ordering predicates
//! from the first key it observes.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Anything that can flow through a sequence.
pub trait Element: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Element for T {}

/// A value that can be stored in a series.
///
/// `is_missing` is the null/undefined marker: missing values are carried
/// through lazy pipelines untouched but are dropped by `to_array`/`to_pairs`.
pub trait Value: Element {
    fn is_missing(&self) -> bool {
        false
    }
}

macro_rules! never_missing {
    ($($ty:ty),* $(,)?) => {
        $(impl Value for $ty {})*
    };
}

never_missing!(
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    bool,
    char,
    String,
    &'static str,
    NaiveDate,
    NaiveDateTime,
    DateTime<Utc>,
);

impl<T: Value> Value for Option<T> {
    fn is_missing(&self) -> bool {
        match self {
            Some(inner) => inner.is_missing(),
            None => true,
        }
    }
}

impl<T: Element> Value for Vec<T> {}

impl<T: Send + Sync + 'static + ?Sized> Value for Arc<T> {}

impl<A: Element, B: Element> Value for (A, B) {}

impl<A: Element, B: Element, C: Element> Value for (A, B, C) {}

/// Runtime classification of an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Number,
    Text,
    Date,
    Other,
}

/// A key usable in an index.
///
/// `key_kind` returning `None` marks a missing key, which is skipped when an
/// index detects its type. The accessors are only consulted for the kind the
/// key reports.
pub trait IndexKey: Element + PartialEq {
    fn key_kind(&self) -> Option<KeyKind>;

    fn as_number(&self) -> Option<f64> {
        None
    }

    fn as_text(&self) -> Option<&str> {
        None
    }

    fn as_date(&self) -> Option<NaiveDateTime> {
        None
    }
}

macro_rules! numeric_key {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IndexKey for $ty {
                fn key_kind(&self) -> Option<KeyKind> {
                    Some(KeyKind::Number)
                }

                #[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
                fn as_number(&self) -> Option<f64> {
                    Some(*self as f64)
                }
            }
        )*
    };
}

numeric_key!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl IndexKey for String {
    fn key_kind(&self) -> Option<KeyKind> {
        Some(KeyKind::Text)
    }

    fn as_text(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl IndexKey for &'static str {
    fn key_kind(&self) -> Option<KeyKind> {
        Some(KeyKind::Text)
    }

    fn as_text(&self) -> Option<&str> {
        Some(*self)
    }
}

impl IndexKey for bool {
    fn key_kind(&self) -> Option<KeyKind> {
        Some(KeyKind::Other)
    }
}

impl IndexKey for NaiveDate {
    fn key_kind(&self) -> Option<KeyKind> {
        Some(KeyKind::Date)
    }

    fn as_date(&self) -> Option<NaiveDateTime> {
        self.and_hms_opt(0, 0, 0)
    }
}

impl IndexKey for NaiveDateTime {
    fn key_kind(&self) -> Option<KeyKind> {
        Some(KeyKind::Date)
    }

    fn as_date(&self) -> Option<NaiveDateTime> {
        Some(*self)
    }
}

impl IndexKey for DateTime<Utc> {
    fn key_kind(&self) -> Option<KeyKind> {
        Some(KeyKind::Date)
    }

    fn as_date(&self) -> Option<NaiveDateTime> {
        Some(self.naive_utc())
    }
}

impl<T: IndexKey> IndexKey for Option<T> {
    fn key_kind(&self) -> Option<KeyKind> {
        self.as_ref().and_then(IndexKey::key_kind)
    }

    fn as_number(&self) -> Option<f64> {
        self.as_ref().and_then(IndexKey::as_number)
    }

    fn as_text(&self) -> Option<&str> {
        self.as_ref().and_then(IndexKey::as_text)
    }

    fn as_date(&self) -> Option<NaiveDateTime> {
        self.as_ref().and_then(IndexKey::as_date)
    }
}

/// Keys that can be synthesised from a position, used for the implicit
/// `0..n` index of a series built from values alone.
pub trait DefaultKey: Element {
    fn from_position(position: usize) -> Self;
}

impl DefaultKey for usize {
    fn from_position(position: usize) -> Self {
        position
    }
}

impl DefaultKey for u64 {
    fn from_position(position: usize) -> Self {
        u64::try_from(position).unwrap_or(u64::MAX)
    }
}

impl DefaultKey for u32 {
    fn from_position(position: usize) -> Self {
        u32::try_from(position).unwrap_or(u32::MAX)
    }
}

impl DefaultKey for i64 {
    fn from_position(position: usize) -> Self {
        i64::try_from(position).unwrap_or(i64::MAX)
    }
}

impl DefaultKey for i32 {
    fn from_position(position: usize) -> Self {
        i32::try_from(position).unwrap_or(i32::MAX)
    }
}

impl DefaultKey for Scalar {
    fn from_position(position: usize) -> Self {
        Scalar::Int64(i64::from_position(position))
    }
}

/// Numeric view used by the summary operations (`sum`, `average`, ...).
pub trait ToNumber {
    fn to_number(&self) -> Option<f64>;
}

macro_rules! to_number {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToNumber for $ty {
                #[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
                fn to_number(&self) -> Option<f64> {
                    Some(*self as f64)
                }
            }
        )*
    };
}

to_number!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl<T: ToNumber> ToNumber for Option<T> {
    fn to_number(&self) -> Option<f64> {
        self.as_ref().and_then(ToNumber::to_number)
    }
}

impl ToNumber for Scalar {
    fn to_number(&self) -> Option<f64> {
        self.to_f64().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Null,
    Bool,
    Int64,
    Float64,
    Utf8,
    Date,
}

/// A dynamically typed cell, the value type of data-frame rows.
///
/// Equality and hashing are total: floats compare by canonical bit pattern, so
/// `NaN == NaN` and `-0.0 == 0.0`. This lets scalars act as group and join keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Date(NaiveDateTime),
}

fn canonical_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value == 0.0 {
        0.0_f64.to_bits()
    } else {
        value.to_bits()
    }
}

impl Scalar {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Null => DType::Null,
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Utf8(_) => DType::Utf8,
            Self::Date(_) => DType::Date,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Float64(v) if v.is_nan())
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8(v) => Some(v),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            Self::Null => Err(TypeError::ValueIsMissing),
            Self::Utf8(v) => Err(TypeError::NonNumericValue {
                value: v.clone(),
                dtype: DType::Utf8,
            }),
            Self::Date(v) => Err(TypeError::NonNumericValue {
                value: v.to_string(),
                dtype: DType::Date,
            }),
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => canonical_bits(*a) == canonical_bits(*b),
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dtype().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => canonical_bits(*v).hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
        }
    }
}

impl PartialOrd for Scalar {
    /// Same-kind scalars order naturally and numbers order across
    /// `Int64`/`Float64`. Any other pairing, and NaN, is unordered.
    #[allow(clippy::cast_precision_loss)]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Bool(a), Self::Bool(b)) => a.partial_cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.partial_cmp(b),
            (Self::Float64(a), Self::Float64(b)) => a.partial_cmp(b),
            (Self::Int64(a), Self::Float64(b)) => (*a as f64).partial_cmp(b),
            (Self::Float64(a), Self::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Utf8(a), Self::Utf8(b)) => a.partial_cmp(b),
            (Self::Date(a), Self::Date(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl Value for Scalar {
    fn is_missing(&self) -> bool {
        self.is_null()
    }
}

impl IndexKey for Scalar {
    fn key_kind(&self) -> Option<KeyKind> {
        match self {
            Self::Null => None,
            Self::Int64(_) | Self::Float64(_) => Some(KeyKind::Number),
            Self::Utf8(_) => Some(KeyKind::Text),
            Self::Date(_) => Some(KeyKind::Date),
            Self::Bool(_) => Some(KeyKind::Other),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int64(_) | Self::Float64(_) => self.to_f64().ok(),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<&str> {
        self.as_str()
    }

    fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Date(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
            Self::Date(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int64(i64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl From<NaiveDateTime> for Scalar {
    fn from(value: NaiveDateTime) -> Self {
        Self::Date(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One data-frame row: column name to cell, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    cells: IndexMap<String, Scalar>,
}

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.cells.insert(column.into(), value.into());
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Scalar>) {
        self.cells.insert(column.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.cells.get(column)
    }

    /// Cell value, `Scalar::Null` when the column is absent.
    #[must_use]
    pub fn get_or_null(&self, column: &str) -> Scalar {
        self.cells.get(column).cloned().unwrap_or(Scalar::Null)
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.cells.contains_key(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Scalar> {
        self.cells.shift_remove(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Value for Row {}

impl<S: Into<String>, V: Into<Scalar>> FromIterator<(S, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        Self {
            cells: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("value {value:?} has non-numeric dtype {dtype:?}")]
    NonNumericValue { value: String, dtype: DType },
    #[error("value is missing")]
    ValueIsMissing,
}
