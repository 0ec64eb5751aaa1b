//! Aggregate functions for pivot nodes
//!
//! Each pivot node and cell keeps one running `AggregateState` per
//! aggregate. A row contributes a `Contribution` (its input value, plus the
//! weight for `weighted mean`) that is captured when the row is filed and
//! subtracted again when the row leaves, so a single-row update touches the
//! state of the nodes on its path without reading the other members.
//!
//! Every state evaluates to the same value no matter in which order rows
//! were added and removed, which keeps an incrementally maintained tree
//! identical to one rebuilt from scratch:
//!
//! - integer sums are exact in `i128`
//! - float sums use `ExactSum`, which rounds the exact total once
//! - value aggregates (`distinct count`, `unique`, `low`, `high`,
//!   `median`) keep a counted value map
//! - `dominant` remembers which rows hold each value, so ties still go to
//!   the value seen first in row-id order
//! - `first` and `last` read the lowest and highest member row

use crate::changeset::RowId;
use crate::column::{ColumnType, ColumnValue};
use crate::error::{EngineError, Result};
use crate::store::RowSource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "AggregateRepr", into = "AggregateRepr")]
pub enum Aggregate {
    Sum,
    SumAbs,
    Avg,
    Count,
    DistinctCount,
    /// The value when every row agrees, null otherwise.
    Unique,
    /// Most frequent value; ties go to the value seen first.
    Dominant,
    Low,
    High,
    /// Upper median, same type as the input.
    Median,
    First,
    Last,
    /// Mean weighted by another column.
    WeightedMean(String),
}

/// Aggregate applied when a view does not name one for a column: `sum`
/// for numeric columns, `count` for everything else. This also decides how
/// a hidden sort column is aggregated at pivoted nodes.
pub fn default_aggregate(ty: ColumnType) -> Aggregate {
    if ty.is_numeric() {
        Aggregate::Sum
    } else {
        Aggregate::Count
    }
}

impl Aggregate {
    pub fn name(&self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::SumAbs => "sum abs",
            Aggregate::Avg => "avg",
            Aggregate::Count => "count",
            Aggregate::DistinctCount => "distinct count",
            Aggregate::Unique => "unique",
            Aggregate::Dominant => "dominant",
            Aggregate::Low => "low",
            Aggregate::High => "high",
            Aggregate::Median => "median",
            Aggregate::First => "first",
            Aggregate::Last => "last",
            Aggregate::WeightedMean(_) => "weighted mean",
        }
    }

    /// Extra column this aggregate reads.
    pub fn weight_column(&self) -> Option<&str> {
        match self {
            Aggregate::WeightedMean(w) => Some(w),
            _ => None,
        }
    }

    /// Output type for an input column of type `input`.
    pub fn output_type(&self, column: &str, input: ColumnType) -> Result<ColumnType> {
        let numeric_only = |out: ColumnType| {
            if input.is_numeric() {
                Ok(out)
            } else {
                Err(EngineError::Type(format!(
                    "'{}' aggregate needs a numeric column, '{}' is {}",
                    self.name(),
                    column,
                    input
                )))
            }
        };
        match self {
            Aggregate::Sum | Aggregate::SumAbs => numeric_only(input),
            Aggregate::Avg | Aggregate::WeightedMean(_) => numeric_only(ColumnType::Float),
            Aggregate::Count | Aggregate::DistinctCount => Ok(ColumnType::Integer),
            Aggregate::Unique
            | Aggregate::Dominant
            | Aggregate::Low
            | Aggregate::High
            | Aggregate::Median
            | Aggregate::First
            | Aggregate::Last => Ok(input),
        }
    }

    /// Empty running state for this aggregate.
    pub fn state(&self) -> AggregateState {
        match self {
            Aggregate::Sum | Aggregate::Avg => AggregateState::Sum(SumState::default()),
            Aggregate::SumAbs => AggregateState::Sum(SumState {
                abs: true,
                ..SumState::default()
            }),
            Aggregate::Count => AggregateState::Count(0),
            Aggregate::DistinctCount
            | Aggregate::Unique
            | Aggregate::Low
            | Aggregate::High
            | Aggregate::Median => AggregateState::Values(BTreeMap::new()),
            Aggregate::Dominant => AggregateState::Modes(HashMap::new()),
            Aggregate::First | Aggregate::Last => AggregateState::Position,
            Aggregate::WeightedMean(_) => AggregateState::Weighted {
                num: ExactSum::default(),
                den: ExactSum::default(),
            },
        }
    }

    /// What `row` feeds into this aggregate of `column`.
    pub fn contribution(&self, row: RowId, column: &str, source: &dyn RowSource) -> Contribution {
        match self {
            // Positional aggregates read the member rows when evaluated.
            Aggregate::First | Aggregate::Last => Contribution::default(),
            Aggregate::WeightedMean(weight) => Contribution {
                value: source.value(row, column),
                weight: source.value(row, weight),
            },
            _ => Contribution {
                value: source.value(row, column),
                weight: ColumnValue::Null,
            },
        }
    }

    /// Aggregate `column` over `members` from scratch.
    pub fn evaluate(
        &self,
        members: &BTreeSet<RowId>,
        column: &str,
        source: &dyn RowSource,
    ) -> ColumnValue {
        let owned: Vec<(RowId, Contribution)> = members
            .iter()
            .map(|&r| (r, self.contribution(r, column, source)))
            .collect();
        let inputs: Vec<(RowId, &Contribution)> = owned.iter().map(|(r, c)| (*r, c)).collect();
        let mut state = self.state();
        self.refold(&mut state, &inputs, members, column, source)
    }

    /// Replace `state` with one folded from `inputs` in row-id order and
    /// evaluate it. Sums that cannot be kept exact (a value beyond
    /// `ExactSum::LIMIT`, or an overflowing partial) are added left to right
    /// instead, which is still a function of the member rows alone.
    pub fn refold(
        &self,
        state: &mut AggregateState,
        inputs: &[(RowId, &Contribution)],
        members: &BTreeSet<RowId>,
        column: &str,
        source: &dyn RowSource,
    ) -> ColumnValue {
        let mut fresh = self.state();
        for (row, input) in inputs {
            fresh.add(*row, input);
        }
        *state = fresh;
        state
            .value(self, members, column, source)
            .unwrap_or_else(|| self.sequential(inputs.iter().map(|(_, c)| *c)))
    }

    fn sequential<'a>(&self, inputs: impl Iterator<Item = &'a Contribution>) -> ColumnValue {
        let present = inputs.filter(|c| !c.value.is_null());
        match self {
            Aggregate::Sum => sum(present.map(|c| c.value.clone())),
            Aggregate::SumAbs => sum(present.map(|c| c.value.abs())),
            Aggregate::Avg => {
                let (total, n) = present
                    .filter_map(|c| c.value.as_f64())
                    .fold((0.0, 0usize), |(t, n), v| (t + v, n + 1));
                if n == 0 {
                    ColumnValue::Null
                } else {
                    ColumnValue::Float(total / n as f64)
                }
            }
            Aggregate::WeightedMean(_) => {
                let (num, den) = present
                    .filter_map(|c| Some((c.value.as_f64()?, c.weight.as_f64()?)))
                    .fold((0.0, 0.0), |(n, d), (v, w)| (n + v * w, d + w));
                if den == 0.0 {
                    ColumnValue::Null
                } else {
                    ColumnValue::Float(num / den)
                }
            }
            _ => ColumnValue::Null,
        }
    }
}

/// Inputs one row feeds into one aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub value: ColumnValue,
    /// Only set for `weighted mean`.
    pub weight: ColumnValue,
}

impl Default for Contribution {
    fn default() -> Self {
        Contribution {
            value: ColumnValue::Null,
            weight: ColumnValue::Null,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SumState {
    abs: bool,
    ints: i128,
    int_count: usize,
    floats: ExactSum,
    float_count: usize,
}

impl SumState {
    fn shift(&mut self, value: &ColumnValue, up: bool) {
        let value = if self.abs { value.abs() } else { value.clone() };
        match value {
            ColumnValue::Integer(i) => {
                if up {
                    self.ints += i as i128;
                    self.int_count += 1;
                } else {
                    self.ints -= i as i128;
                    self.int_count = self.int_count.saturating_sub(1);
                }
            }
            ColumnValue::Float(f) => {
                if up {
                    self.floats.add(f);
                    self.float_count += 1;
                } else {
                    self.floats.remove(f);
                    self.float_count = self.float_count.saturating_sub(1);
                }
            }
            _ => {}
        }
    }

    fn count(&self) -> usize {
        self.int_count + self.float_count
    }

    /// Float total of every value, integers included.
    fn total(&self) -> Option<f64> {
        self.floats.total_with(self.ints as f64)
    }

    fn sum(&self) -> Option<ColumnValue> {
        if self.count() == 0 {
            return Some(ColumnValue::Null);
        }
        if self.float_count == 0 {
            // An integer sum outside i64 has no value of the declared type.
            return Some(
                i64::try_from(self.ints)
                    .map(ColumnValue::Integer)
                    .unwrap_or(ColumnValue::Null),
            );
        }
        self.total().map(ColumnValue::Float)
    }

    fn mean(&self) -> Option<ColumnValue> {
        match self.count() {
            0 => Some(ColumnValue::Null),
            n => self.total().map(|t| ColumnValue::Float(t / n as f64)),
        }
    }
}

/// Running state of one aggregate over a member set.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateState {
    /// `sum`, `sum abs` and `avg`.
    Sum(SumState),
    Count(usize),
    /// Non-null values with their multiplicity.
    Values(BTreeMap<ColumnValue, usize>),
    /// Non-null values with the rows holding them.
    Modes(HashMap<ColumnValue, BTreeSet<RowId>>),
    Position,
    Weighted { num: ExactSum, den: ExactSum },
}

impl AggregateState {
    pub fn add(&mut self, row: RowId, input: &Contribution) {
        self.shift(row, input, true);
    }

    pub fn remove(&mut self, row: RowId, input: &Contribution) {
        self.shift(row, input, false);
    }

    fn shift(&mut self, row: RowId, input: &Contribution, up: bool) {
        match self {
            AggregateState::Sum(state) => state.shift(&input.value, up),
            AggregateState::Count(n) => {
                if !input.value.is_null() {
                    *n = if up { *n + 1 } else { n.saturating_sub(1) };
                }
            }
            AggregateState::Values(counts) => {
                if input.value.is_null() {
                    return;
                }
                let key = canonical(&input.value);
                if up {
                    *counts.entry(key).or_insert(0) += 1;
                } else if let Some(n) = counts.get_mut(&key) {
                    *n -= 1;
                    if *n == 0 {
                        counts.remove(&key);
                    }
                }
            }
            AggregateState::Modes(rows) => {
                if input.value.is_null() {
                    return;
                }
                let key = canonical(&input.value);
                if up {
                    rows.entry(key).or_default().insert(row);
                } else if let Some(holders) = rows.get_mut(&key) {
                    holders.remove(&row);
                    if holders.is_empty() {
                        rows.remove(&key);
                    }
                }
            }
            AggregateState::Position => {}
            AggregateState::Weighted { num, den } => {
                let (Some(v), Some(w)) = (input.value.as_f64(), input.weight.as_f64()) else {
                    return;
                };
                if up {
                    num.add(v * w);
                    den.add(w);
                } else {
                    num.remove(v * w);
                    den.remove(w);
                }
            }
        }
    }

    /// Current value, or `None` when a running sum is no longer exact and
    /// the state has to be refolded from its members.
    pub fn value(
        &self,
        aggregate: &Aggregate,
        members: &BTreeSet<RowId>,
        column: &str,
        source: &dyn RowSource,
    ) -> Option<ColumnValue> {
        let value = match (self, aggregate) {
            (AggregateState::Sum(state), Aggregate::Avg) => return state.mean(),
            (AggregateState::Sum(state), _) => return state.sum(),
            (AggregateState::Count(n), _) => ColumnValue::Integer(*n as i64),
            (AggregateState::Values(counts), Aggregate::DistinctCount) => {
                ColumnValue::Integer(counts.len() as i64)
            }
            (AggregateState::Values(counts), Aggregate::Unique) => match counts.len() {
                1 => counts.keys().next().cloned().unwrap_or(ColumnValue::Null),
                _ => ColumnValue::Null,
            },
            (AggregateState::Values(counts), Aggregate::Low) => {
                counts.keys().next().cloned().unwrap_or(ColumnValue::Null)
            }
            (AggregateState::Values(counts), Aggregate::High) => {
                counts.keys().next_back().cloned().unwrap_or(ColumnValue::Null)
            }
            (AggregateState::Values(counts), _) => median(counts),
            (AggregateState::Modes(rows), _) => rows
                .iter()
                .max_by(|(_, a), (_, b)| a.len().cmp(&b.len()).then(b.first().cmp(&a.first())))
                .map(|(v, _)| v.clone())
                .unwrap_or(ColumnValue::Null),
            (AggregateState::Position, Aggregate::Last) => members
                .last()
                .map(|&r| source.value(r, column))
                .unwrap_or(ColumnValue::Null),
            (AggregateState::Position, _) => members
                .first()
                .map(|&r| source.value(r, column))
                .unwrap_or(ColumnValue::Null),
            (AggregateState::Weighted { num, den }, _) => {
                let den = den.total()?;
                let num = num.total()?;
                if den == 0.0 {
                    ColumnValue::Null
                } else {
                    ColumnValue::Float(num / den)
                }
            }
        };
        Some(value)
    }
}

/// Upper median of a counted value map.
fn median(counts: &BTreeMap<ColumnValue, usize>) -> ColumnValue {
    let mid = counts.values().sum::<usize>() / 2;
    let mut seen = 0;
    for (value, n) in counts {
        seen += n;
        if seen > mid {
            return value.clone();
        }
    }
    ColumnValue::Null
}

/// `-0.0` and `0.0` compare equal; store one spelling so the reported value
/// does not depend on which row arrived first.
fn canonical(value: &ColumnValue) -> ColumnValue {
    match value {
        ColumnValue::Float(f) if *f == 0.0 => ColumnValue::Float(0.0),
        other => other.clone(),
    }
}

/// Float sum that supports removal and rounds only once.
///
/// The running total is held exactly as a list of non-overlapping partials
/// (Shewchuk's algorithm, as in Python's `math.fsum`), so the rounded total
/// depends only on the multiset of values added, not on the order of adds
/// and removes. Infinities and NaNs are counted instead of accumulated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExactSum {
    partials: Vec<f64>,
    pos_inf: usize,
    neg_inf: usize,
    nan: usize,
    /// Values beyond `LIMIT`; their partial sums could overflow.
    huge: usize,
    overflowed: bool,
}

impl ExactSum {
    pub const LIMIT: f64 = 1e300;

    pub fn add(&mut self, x: f64) {
        if !self.tally(x, true) {
            self.accumulate(x);
        }
    }

    pub fn remove(&mut self, x: f64) {
        if !self.tally(x, false) {
            self.accumulate(-x);
        }
    }

    fn tally(&mut self, x: f64, up: bool) -> bool {
        let counter = if x.is_nan() {
            &mut self.nan
        } else if x == f64::INFINITY {
            &mut self.pos_inf
        } else if x == f64::NEG_INFINITY {
            &mut self.neg_inf
        } else if x.abs() > Self::LIMIT {
            &mut self.huge
        } else {
            return false;
        };
        *counter = if up { *counter + 1 } else { counter.saturating_sub(1) };
        true
    }

    fn accumulate(&mut self, mut x: f64) {
        let mut kept = 0;
        for i in 0..self.partials.len() {
            let mut y = self.partials[i];
            if x.abs() < y.abs() {
                std::mem::swap(&mut x, &mut y);
            }
            let hi = x + y;
            let lo = y - (hi - x);
            if lo != 0.0 {
                self.partials[kept] = lo;
                kept += 1;
            }
            x = hi;
        }
        if !x.is_finite() {
            self.overflowed = true;
        }
        self.partials.truncate(kept);
        if x != 0.0 {
            self.partials.push(x);
        }
    }

    /// Correctly rounded total, or `None` when it cannot be computed exactly.
    pub fn total(&self) -> Option<f64> {
        self.total_with(0.0)
    }

    /// Total of the held values plus `extra`.
    pub fn total_with(&self, extra: f64) -> Option<f64> {
        if self.overflowed || self.huge > 0 {
            return None;
        }
        if self.nan > 0 || (self.pos_inf > 0 && self.neg_inf > 0) {
            return Some(f64::NAN);
        }
        if self.pos_inf > 0 {
            return Some(f64::INFINITY);
        }
        if self.neg_inf > 0 {
            return Some(f64::NEG_INFINITY);
        }
        if extra == 0.0 {
            return Some(round(&self.partials));
        }
        let mut with = self.clone();
        with.add(extra);
        with.total()
    }
}

/// Round non-overlapping partials, smallest magnitude first, to the nearest
/// double (ties to even).
fn round(partials: &[f64]) -> f64 {
    let Some((&top, rest)) = partials.split_last() else {
        return 0.0;
    };
    let mut n = rest.len();
    let mut hi = top;
    let mut lo = 0.0;
    while n > 0 {
        let x = hi;
        n -= 1;
        let y = partials[n];
        hi = x + y;
        lo = y - (hi - x);
        if lo != 0.0 {
            break;
        }
    }
    if n > 0 && ((lo < 0.0 && partials[n - 1] < 0.0) || (lo > 0.0 && partials[n - 1] > 0.0)) {
        let y = lo * 2.0;
        let x = hi + y;
        if y == x - hi {
            hi = x;
        }
    }
    hi
}

fn sum(values: impl Iterator<Item = ColumnValue>) -> ColumnValue {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;
    let mut is_float = false;
    let mut any = false;
    for v in values {
        any = true;
        match v {
            ColumnValue::Integer(i) => {
                int_total = int_total.and_then(|t| t.checked_add(i));
                float_total += i as f64;
            }
            ColumnValue::Float(f) => {
                is_float = true;
                float_total += f;
            }
            _ => {}
        }
    }
    match (any, is_float, int_total) {
        (false, _, _) => ColumnValue::Null,
        (true, false, Some(total)) => ColumnValue::Integer(total),
        (true, false, None) => ColumnValue::Null,
        (true, true, _) => ColumnValue::Float(float_total),
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::WeightedMean(w) => write!(f, "weighted mean({})", w),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for Aggregate {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let agg = match s.trim().to_lowercase().as_str() {
            "sum" => Aggregate::Sum,
            "sum abs" | "abs sum" => Aggregate::SumAbs,
            "avg" | "mean" | "average" => Aggregate::Avg,
            "count" => Aggregate::Count,
            "distinct count" | "distinctcount" => Aggregate::DistinctCount,
            "unique" => Aggregate::Unique,
            "dominant" => Aggregate::Dominant,
            "low" | "min" => Aggregate::Low,
            "high" | "max" => Aggregate::High,
            "median" => Aggregate::Median,
            "first" | "first by index" => Aggregate::First,
            "last" | "last by index" => Aggregate::Last,
            "weighted mean" => {
                return Err(EngineError::Config(
                    "'weighted mean' needs a weight column: [\"weighted mean\", \"<column>\"]"
                        .to_string(),
                ))
            }
            other => return Err(EngineError::Config(format!("unknown aggregate '{}'", other))),
        };
        Ok(agg)
    }
}

/// Wire form: `"sum"` or `["weighted mean", "weight"]`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum AggregateRepr {
    Name(String),
    WithArgs(Vec<String>),
}

impl TryFrom<AggregateRepr> for Aggregate {
    type Error = EngineError;

    fn try_from(repr: AggregateRepr) -> Result<Self> {
        match repr {
            AggregateRepr::Name(name) => name.parse(),
            AggregateRepr::WithArgs(args) => match args.as_slice() {
                [name] => name.parse(),
                [name, weight] if name.trim().eq_ignore_ascii_case("weighted mean") => {
                    Ok(Aggregate::WeightedMean(weight.clone()))
                }
                _ => Err(EngineError::Config(format!("invalid aggregate {:?}", args))),
            },
        }
    }
}

impl From<Aggregate> for AggregateRepr {
    fn from(agg: Aggregate) -> Self {
        match agg {
            Aggregate::WeightedMean(w) => {
                AggregateRepr::WithArgs(vec!["weighted mean".to_string(), w])
            }
            other => AggregateRepr::Name(other.name().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Row;
    use crate::store::ColumnStore;
    use crate::table::{Schema, StorageHint};

    fn store(values: &[(ColumnValue, ColumnValue)]) -> ColumnStore {
        let schema = Schema::new(vec![("v", ColumnType::Float), ("w", ColumnType::Float)]);
        let mut store = ColumnStore::new(schema, None, StorageHint::FastReads).unwrap();
        let rows: Vec<Row> = values
            .iter()
            .map(|(v, w)| {
                [("v".to_string(), v.clone()), ("w".to_string(), w.clone())]
                    .into_iter()
                    .collect()
            })
            .collect();
        store.apply_rows(rows).unwrap();
        store
    }

    fn strings(values: &[&str]) -> ColumnStore {
        let schema = Schema::new(vec![("s", ColumnType::String)]);
        let mut store = ColumnStore::new(schema, None, StorageHint::FastReads).unwrap();
        let rows: Vec<Row> = values
            .iter()
            .map(|s| [("s".to_string(), ColumnValue::from(*s))].into_iter().collect())
            .collect();
        store.apply_rows(rows).unwrap();
        store
    }

    fn all(source: &dyn RowSource) -> BTreeSet<RowId> {
        source.live_rows().into_iter().collect()
    }

    #[test]
    fn test_numeric_aggregates() {
        let s = store(&[
            (1.0.into(), 1.0.into()),
            ((-4.0).into(), 3.0.into()),
            (ColumnValue::Null, 1.0.into()),
            (3.0.into(), ColumnValue::Null),
        ]);
        let m = all(&s);
        assert_eq!(Aggregate::Sum.evaluate(&m, "v", &s), ColumnValue::Float(0.0));
        assert_eq!(Aggregate::SumAbs.evaluate(&m, "v", &s), ColumnValue::Float(8.0));
        assert_eq!(Aggregate::Avg.evaluate(&m, "v", &s), ColumnValue::Float(0.0));
        assert_eq!(Aggregate::Count.evaluate(&m, "v", &s), ColumnValue::Integer(3));
        assert_eq!(Aggregate::Low.evaluate(&m, "v", &s), ColumnValue::Float(-4.0));
        assert_eq!(Aggregate::High.evaluate(&m, "v", &s), ColumnValue::Float(3.0));
        assert_eq!(Aggregate::Median.evaluate(&m, "v", &s), ColumnValue::Float(1.0));
        assert_eq!(Aggregate::First.evaluate(&m, "v", &s), ColumnValue::Float(1.0));
        assert_eq!(Aggregate::Last.evaluate(&m, "v", &s), ColumnValue::Float(3.0));
        assert_eq!(
            Aggregate::WeightedMean("w".into()).evaluate(&m, "v", &s),
            ColumnValue::Float((1.0 - 12.0) / 4.0)
        );
    }

    #[test]
    fn test_empty_members() {
        let s = store(&[]);
        let m = BTreeSet::new();
        assert!(Aggregate::Sum.evaluate(&m, "v", &s).is_null());
        assert_eq!(Aggregate::Count.evaluate(&m, "v", &s), ColumnValue::Integer(0));
        assert!(Aggregate::Median.evaluate(&m, "v", &s).is_null());
    }

    #[test]
    fn test_dominant_ties_go_to_first_seen() {
        let s = strings(&["b", "a", "a", "b", "c"]);
        assert_eq!(Aggregate::Dominant.evaluate(&all(&s), "s", &s), ColumnValue::from("b"));
        assert_eq!(Aggregate::DistinctCount.evaluate(&all(&s), "s", &s), ColumnValue::Integer(3));
    }

    #[test]
    fn test_unique() {
        let same = strings(&["a", "a"]);
        assert_eq!(Aggregate::Unique.evaluate(&all(&same), "s", &same), ColumnValue::from("a"));
        let mixed = strings(&["a", "b"]);
        assert!(Aggregate::Unique.evaluate(&all(&mixed), "s", &mixed).is_null());
    }

    #[test]
    fn test_integer_sum_overflow_is_null() {
        let schema = Schema::new(vec![("n", ColumnType::Integer)]);
        let mut s = ColumnStore::new(schema, None, StorageHint::FastReads).unwrap();
        let rows: Vec<Row> = [i64::MAX, 1]
            .iter()
            .map(|&n| [("n".to_string(), ColumnValue::from(n))].into_iter().collect())
            .collect();
        s.apply_rows(rows).unwrap();
        let m = all(&s);
        assert!(Aggregate::Sum.evaluate(&m, "n", &s).is_null());
        assert_eq!(Aggregate::Count.evaluate(&m, "n", &s), ColumnValue::Integer(2));
        assert!(matches!(Aggregate::Avg.evaluate(&m, "n", &s), ColumnValue::Float(_)));
    }

    #[test]
    fn test_exact_sum_ignores_order() {
        let mut fresh = ExactSum::default();
        for _ in 0..10 {
            fresh.add(0.1);
        }
        assert_eq!(fresh.total(), Some(1.0));

        let mut churned = ExactSum::default();
        churned.add(1e16);
        for _ in 0..10 {
            churned.add(0.1);
        }
        churned.add(3.0);
        churned.remove(1e16);
        churned.remove(3.0);
        assert_eq!(churned.total().map(f64::to_bits), fresh.total().map(f64::to_bits));

        churned.add(f64::INFINITY);
        assert_eq!(churned.total(), Some(f64::INFINITY));
        churned.remove(f64::INFINITY);
        churned.add(1e308);
        assert_eq!(churned.total(), None);
    }

    #[test]
    fn test_state_follows_adds_and_removes() {
        let s = store(&[
            (5.0.into(), 1.0.into()),
            (1.0.into(), 2.0.into()),
            (5.0.into(), 1.0.into()),
            (9.0.into(), 4.0.into()),
            (1.0.into(), 1.0.into()),
        ]);
        let aggregates = [
            Aggregate::Sum,
            Aggregate::Avg,
            Aggregate::Count,
            Aggregate::DistinctCount,
            Aggregate::Unique,
            Aggregate::Dominant,
            Aggregate::Low,
            Aggregate::High,
            Aggregate::Median,
            Aggregate::First,
            Aggregate::Last,
            Aggregate::WeightedMean("w".into()),
        ];
        for agg in aggregates {
            let mut members = all(&s);
            let mut state = agg.state();
            for &r in &members {
                state.add(r, &agg.contribution(r, "v", &s));
            }
            // Drop the current high and the first row.
            for r in [3, 0] {
                state.remove(r, &agg.contribution(r, "v", &s));
                members.remove(&r);
            }
            assert_eq!(
                state.value(&agg, &members, "v", &s),
                Some(agg.evaluate(&members, "v", &s)),
                "{}",
                agg
            );
        }
    }

    #[test]
    fn test_output_types() {
        assert_eq!(Aggregate::Sum.output_type("x", ColumnType::Integer).unwrap(), ColumnType::Integer);
        assert!(matches!(Aggregate::Sum.output_type("s", ColumnType::String), Err(EngineError::Type(_))));
        assert_eq!(Aggregate::Count.output_type("s", ColumnType::String).unwrap(), ColumnType::Integer);
        assert_eq!(default_aggregate(ColumnType::Float), Aggregate::Sum);
        assert_eq!(default_aggregate(ColumnType::Date), Aggregate::Count);
    }

    #[test]
    fn test_serde_names() {
        let aggs: Vec<Aggregate> =
            serde_json::from_str(r#"["distinct count", "sum abs", ["weighted mean", "w"], "max"]"#).unwrap();
        assert_eq!(
            aggs,
            vec![
                Aggregate::DistinctCount,
                Aggregate::SumAbs,
                Aggregate::WeightedMean("w".into()),
                Aggregate::High
            ]
        );
        assert_eq!(
            serde_json::to_string(&Aggregate::WeightedMean("w".into())).unwrap(),
            r#"["weighted mean","w"]"#
        );
        assert!(serde_json::from_str::<Aggregate>(r#""weighted mean""#).is_err());
        assert!(serde_json::from_str::<Aggregate>(r#""bogus""#).is_err());
    }
}
