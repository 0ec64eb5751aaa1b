//! Column types, values and typed column storage
//!
//! A Column is an array-like random-access container indexed by row slot.
//! Every value stored in a column has the column's type or is null.
//!
//! # String dictionaries
//!
//! String columns store a `StringId` per row and keep the distinct strings in
//! a `StringDictionary` owned by the column, which keeps memory flat for the
//! low-cardinality columns typically used as pivot keys.

use crate::interner::{DictionaryStats, StringDictionary, StringId};
use crate::sequence::{ArraySequence, ChunkedSequence, Sequence};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    Date,
    #[serde(alias = "date_time")]
    DateTime,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::DateTime)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Column value enum to support multiple types
///
/// Values are totally ordered and hashable so they can key primary-key
/// indexes and pivot buckets. Floats compare by `f64::total_cmp` and hash by
/// bit pattern, with `-0.0` folded into `0.0`.
#[derive(Debug, Clone)]
pub enum ColumnValue {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Null,
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of integer and float values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Integer(v) => Some(*v as f64),
            ColumnValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ColumnValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ColumnValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            ColumnValue::Date(d) => Some(*d),
            ColumnValue::DateTime(dt) => Some(dt.date()),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            ColumnValue::DateTime(dt) => Some(*dt),
            ColumnValue::Date(d) => d.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }

    /// The type of a non-null value.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            ColumnValue::Integer(_) => Some(ColumnType::Integer),
            ColumnValue::Float(_) => Some(ColumnType::Float),
            ColumnValue::String(_) => Some(ColumnType::String),
            ColumnValue::Boolean(_) => Some(ColumnType::Boolean),
            ColumnValue::Date(_) => Some(ColumnType::Date),
            ColumnValue::DateTime(_) => Some(ColumnType::DateTime),
            ColumnValue::Null => None,
        }
    }

    /// Absolute value for numeric values, identity otherwise.
    pub fn abs(&self) -> ColumnValue {
        match self {
            ColumnValue::Integer(v) => ColumnValue::Integer(v.saturating_abs()),
            ColumnValue::Float(v) => ColumnValue::Float(v.abs()),
            other => other.clone(),
        }
    }

    /// Convert into a value of `target` type.
    ///
    /// Integers widen into floats, integral floats narrow into integers, ISO
    /// strings parse into dates and datetimes, and epoch milliseconds become
    /// datetimes. Anything else is a mismatch.
    pub fn coerce(self, target: ColumnType) -> Result<ColumnValue, String> {
        let value = match (self, target) {
            (ColumnValue::Null, _) => ColumnValue::Null,
            (v @ ColumnValue::Integer(_), ColumnType::Integer) => v,
            (v @ ColumnValue::Float(_), ColumnType::Float) => v,
            (v @ ColumnValue::String(_), ColumnType::String) => v,
            (v @ ColumnValue::Boolean(_), ColumnType::Boolean) => v,
            (v @ ColumnValue::Date(_), ColumnType::Date) => v,
            (v @ ColumnValue::DateTime(_), ColumnType::DateTime) => v,
            (ColumnValue::Integer(i), ColumnType::Float) => ColumnValue::Float(i as f64),
            (ColumnValue::Float(f), ColumnType::Integer) if f.fract() == 0.0 && f.is_finite() => {
                ColumnValue::Integer(f as i64)
            }
            (ColumnValue::Date(d), ColumnType::DateTime) => d
                .and_hms_opt(0, 0, 0)
                .map(ColumnValue::DateTime)
                .unwrap_or(ColumnValue::Null),
            (ColumnValue::Integer(ms), ColumnType::DateTime) => DateTime::from_timestamp_millis(ms)
                .map(|dt| ColumnValue::DateTime(dt.naive_utc()))
                .ok_or_else(|| format!("Timestamp {} out of range", ms))?,
            (ColumnValue::String(s), ColumnType::Date) => {
                parse_date(&s).ok_or_else(|| format!("Cannot parse '{}' as date", s))?
            }
            (ColumnValue::String(s), ColumnType::DateTime) => {
                parse_datetime(&s).ok_or_else(|| format!("Cannot parse '{}' as datetime", s))?
            }
            (other, target) => {
                return Err(format!("Type mismatch: expected {}, got {}", target, other));
            }
        };
        Ok(value)
    }

    /// JSON representation; dates and datetimes render as ISO strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ColumnValue::Integer(v) => serde_json::Value::Number((*v).into()),
            ColumnValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ColumnValue::String(s) => serde_json::Value::String(s.clone()),
            ColumnValue::Boolean(b) => serde_json::Value::Bool(*b),
            ColumnValue::Date(_) | ColumnValue::DateTime(_) => {
                serde_json::Value::String(self.to_string())
            }
            ColumnValue::Null => serde_json::Value::Null,
        }
    }

    /// Infer a value from JSON. Arrays and objects are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<ColumnValue, String> {
        match value {
            serde_json::Value::Null => Ok(ColumnValue::Null),
            serde_json::Value::Bool(b) => Ok(ColumnValue::Boolean(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ColumnValue::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(ColumnValue::Float(f))
                } else {
                    Err(format!("Unsupported number {}", n))
                }
            }
            serde_json::Value::String(s) => Ok(ColumnValue::String(s.clone())),
            other => Err(format!("Unsupported JSON value {}", other)),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ColumnValue::Null => 0,
            ColumnValue::Boolean(_) => 1,
            ColumnValue::Integer(_) | ColumnValue::Float(_) => 2,
            ColumnValue::String(_) => 3,
            ColumnValue::Date(_) => 4,
            ColumnValue::DateTime(_) => 5,
        }
    }
}

/// Parse `YYYY-MM-DD` into a date value.
pub fn parse_date(s: &str) -> Option<ColumnValue> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .ok()
        .map(ColumnValue::Date)
}

/// Parse an ISO 8601 datetime (`T` or space separated, optional fraction).
/// A bare date parses as midnight.
pub fn parse_datetime(s: &str) -> Option<ColumnValue> {
    let s = s.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(ColumnValue::DateTime)
}

impl PartialEq for ColumnValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ColumnValue {}

impl PartialOrd for ColumnValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ColumnValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ColumnValue::Integer(a), ColumnValue::Integer(b)) => a.cmp(b),
            (ColumnValue::Float(a), ColumnValue::Float(b)) => normalize(*a).total_cmp(&normalize(*b)),
            (ColumnValue::Integer(a), ColumnValue::Float(b)) => (*a as f64).total_cmp(&normalize(*b)),
            (ColumnValue::Float(a), ColumnValue::Integer(b)) => normalize(*a).total_cmp(&(*b as f64)),
            (ColumnValue::String(a), ColumnValue::String(b)) => a.cmp(b),
            (ColumnValue::Boolean(a), ColumnValue::Boolean(b)) => a.cmp(b),
            (ColumnValue::Date(a), ColumnValue::Date(b)) => a.cmp(b),
            (ColumnValue::DateTime(a), ColumnValue::DateTime(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl Hash for ColumnValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            // Integers and floats share a rank and can compare equal, so both
            // hash through the same f64 bit pattern.
            ColumnValue::Integer(v) => normalize(*v as f64).to_bits().hash(state),
            ColumnValue::Float(v) => normalize(*v).to_bits().hash(state),
            ColumnValue::String(s) => s.hash(state),
            ColumnValue::Boolean(b) => b.hash(state),
            ColumnValue::Date(d) => d.hash(state),
            ColumnValue::DateTime(dt) => dt.hash(state),
            ColumnValue::Null => {}
        }
    }
}

#[inline]
fn normalize(f: f64) -> f64 {
    if f == 0.0 {
        0.0
    } else {
        f
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Integer(v) => write!(f, "{}", v),
            ColumnValue::Float(v) => write!(f, "{}", v),
            ColumnValue::String(s) => f.write_str(s),
            ColumnValue::Boolean(b) => write!(f, "{}", b),
            ColumnValue::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            ColumnValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3f")),
            ColumnValue::Null => f.write_str("null"),
        }
    }
}

impl Serialize for ColumnValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ColumnValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        ColumnValue::from_json(&value).map_err(serde::de::Error::custom)
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        ColumnValue::Integer(v)
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        ColumnValue::Integer(v as i64)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Float(v)
    }
}

impl From<bool> for ColumnValue {
    fn from(v: bool) -> Self {
        ColumnValue::Boolean(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::String(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::String(v)
    }
}

impl From<NaiveDate> for ColumnValue {
    fn from(v: NaiveDate) -> Self {
        ColumnValue::Date(v)
    }
}

impl From<NaiveDateTime> for ColumnValue {
    fn from(v: NaiveDateTime) -> Self {
        ColumnValue::DateTime(v)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ColumnValue::Null)
    }
}

enum Storage {
    Values(Box<dyn Sequence<ColumnValue>>),
    Dictionary {
        ids: Box<dyn Sequence<Option<StringId>>>,
        dict: StringDictionary,
    },
}

/// Typed column storage.
///
/// Every column is nullable. String columns are dictionary encoded.
pub struct Column {
    name: String,
    column_type: ColumnType,
    storage: Storage,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self::with_storage(name, column_type, false)
    }

    /// Create a column; `chunked` selects `ChunkedSequence` storage.
    pub fn with_storage(name: impl Into<String>, column_type: ColumnType, chunked: bool) -> Self {
        fn sequence<T: Clone + fmt::Debug + Send + Sync + 'static>(
            chunked: bool,
        ) -> Box<dyn Sequence<T>> {
            if chunked {
                Box::new(ChunkedSequence::new())
            } else {
                Box::new(ArraySequence::new())
            }
        }

        let storage = if column_type == ColumnType::String {
            Storage::Dictionary {
                ids: sequence(chunked),
                dict: StringDictionary::new(),
            }
        } else {
            Storage::Values(sequence(chunked))
        };

        Column {
            name: name.into(),
            column_type,
            storage,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Values(seq) => seq.len(),
            Storage::Dictionary { ids, .. } => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate_value(&self, value: &ColumnValue) -> Result<(), String> {
        match value.column_type() {
            None => Ok(()),
            Some(ty) if ty == self.column_type => Ok(()),
            Some(_) => Err(format!(
                "Type mismatch in column '{}': expected {}, got {:?}",
                self.name, self.column_type, value
            )),
        }
    }

    pub fn get(&self, index: usize) -> Result<ColumnValue, String> {
        match &self.storage {
            Storage::Values(seq) => seq.get(index),
            Storage::Dictionary { ids, dict } => match ids.get(index)? {
                None => Ok(ColumnValue::Null),
                Some(id) => dict
                    .resolve(id)
                    .map(|s| ColumnValue::String(s.to_string()))
                    .ok_or_else(|| format!("Invalid string ID {} at index {}", id, index)),
            },
        }
    }

    /// Fast numeric access without cloning.
    #[inline]
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match &self.storage {
            Storage::Values(seq) => seq.get_ref(index).and_then(|v| v.as_f64()),
            Storage::Dictionary { .. } => None,
        }
    }

    #[inline]
    pub fn is_null_at(&self, index: usize) -> bool {
        match &self.storage {
            Storage::Values(seq) => seq.get_ref(index).map(|v| v.is_null()).unwrap_or(true),
            Storage::Dictionary { ids, .. } => ids.get_ref(index).map(|id| id.is_none()).unwrap_or(true),
        }
    }

    pub fn set(&mut self, index: usize, value: ColumnValue) -> Result<(), String> {
        self.validate_value(&value)?;
        match &mut self.storage {
            Storage::Values(seq) => seq.set(index, value),
            Storage::Dictionary { ids, dict } => {
                let old = ids.get(index)?;
                let new = value.as_str().map(|s| dict.intern(s));
                ids.set(index, new)?;
                if let Some(old) = old {
                    dict.release(old);
                }
                Ok(())
            }
        }
    }

    pub fn append(&mut self, value: ColumnValue) -> Result<(), String> {
        self.validate_value(&value)?;
        match &mut self.storage {
            Storage::Values(seq) => seq.append(value),
            Storage::Dictionary { ids, dict } => {
                let id = value.as_str().map(|s| dict.intern(s));
                ids.append(id);
            }
        }
        Ok(())
    }

    /// Dictionary statistics for string columns.
    pub fn dictionary_stats(&self) -> Option<DictionaryStats> {
        match &self.storage {
            Storage::Dictionary { dict, .. } => Some(dict.stats()),
            Storage::Values(_) => None,
        }
    }

    pub fn iter(&self) -> ColumnIterator<'_> {
        ColumnIterator {
            column: self,
            index: 0,
        }
    }
}

pub struct ColumnIterator<'a> {
    column: &'a Column,
    index: usize,
}

impl<'a> Iterator for ColumnIterator<'a> {
    type Item = ColumnValue;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.column.len() {
            None
        } else {
            let result = self.column.get(self.index).ok();
            self.index += 1;
            result
        }
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Column {{ name: '{}', type: {}, len: {} }}",
            self.name,
            self.column_type,
            self.len()
        )
    }
}
