//! Computed-column function registry
//!
//! The set of functions a computed column may call is closed: every
//! function is a `ComputedFunction` variant with a fixed arity, declared
//! input kinds and an output rule. Specs are checked against the signature
//! when the column is registered, so evaluation only ever sees well-typed
//! inputs. Evaluation is pure; nulls propagate and failures (division by
//! zero, log of a non-positive number, non-finite results) produce null.

use crate::column::{ColumnType, ColumnValue};
use crate::error::{EngineError, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Kind of value a function argument accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Numeric,
    String,
    Temporal,
    /// Any type, as long as all `Comparable` arguments agree.
    Comparable,
}

impl ArgKind {
    fn accepts(&self, ty: ColumnType) -> bool {
        match self {
            ArgKind::Numeric => ty.is_numeric(),
            ArgKind::String => ty == ColumnType::String,
            ArgKind::Temporal => ty.is_temporal(),
            ArgKind::Comparable => true,
        }
    }
}

/// How a function's output type is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRule {
    /// Always this type; a conflicting declared type is an error.
    Fixed(ColumnType),
    /// Integer or float, chosen by the declared type. Without one, integer
    /// when every input is an integer, float otherwise.
    Numeric,
    /// Float unless the caller declares integer.
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub inputs: &'static [ArgKind],
    pub output: OutputRule,
}

const NUM: &[ArgKind] = &[ArgKind::Numeric];
const NUM_NUM: &[ArgKind] = &[ArgKind::Numeric, ArgKind::Numeric];
const STR: &[ArgKind] = &[ArgKind::String];
const STR_STR: &[ArgKind] = &[ArgKind::String, ArgKind::String];
const TIME: &[ArgKind] = &[ArgKind::Temporal];
const CMP_CMP: &[ArgKind] = &[ArgKind::Comparable, ArgKind::Comparable];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputedFunction {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Subtract,
    #[serde(rename = "*")]
    Multiply,
    #[serde(rename = "/")]
    Divide,
    #[serde(rename = "%")]
    Modulo,
    #[serde(rename = "pow")]
    Pow,
    #[serde(rename = "abs")]
    Abs,
    #[serde(rename = "sqrt")]
    Sqrt,
    #[serde(rename = "invert")]
    Invert,
    #[serde(rename = "log")]
    Log,
    #[serde(rename = "exp")]
    Exp,
    #[serde(rename = "percent_of")]
    PercentOf,
    #[serde(rename = "==")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "uppercase")]
    Uppercase,
    #[serde(rename = "lowercase")]
    Lowercase,
    #[serde(rename = "length")]
    Length,
    #[serde(rename = "concat_space")]
    ConcatSpace,
    #[serde(rename = "concat_comma")]
    ConcatComma,
    #[serde(rename = "hour_of_day")]
    HourOfDay,
    #[serde(rename = "day_of_week")]
    DayOfWeek,
    #[serde(rename = "month_of_year")]
    MonthOfYear,
    #[serde(rename = "second_bucket")]
    SecondBucket,
    #[serde(rename = "minute_bucket")]
    MinuteBucket,
    #[serde(rename = "hour_bucket")]
    HourBucket,
    #[serde(rename = "day_bucket")]
    DayBucket,
    #[serde(rename = "week_bucket")]
    WeekBucket,
    #[serde(rename = "month_bucket")]
    MonthBucket,
    #[serde(rename = "year_bucket")]
    YearBucket,
}

impl ComputedFunction {
    pub const ALL: [ComputedFunction; 31] = [
        ComputedFunction::Add,
        ComputedFunction::Subtract,
        ComputedFunction::Multiply,
        ComputedFunction::Divide,
        ComputedFunction::Modulo,
        ComputedFunction::Pow,
        ComputedFunction::Abs,
        ComputedFunction::Sqrt,
        ComputedFunction::Invert,
        ComputedFunction::Log,
        ComputedFunction::Exp,
        ComputedFunction::PercentOf,
        ComputedFunction::Equals,
        ComputedFunction::NotEquals,
        ComputedFunction::GreaterThan,
        ComputedFunction::LessThan,
        ComputedFunction::Uppercase,
        ComputedFunction::Lowercase,
        ComputedFunction::Length,
        ComputedFunction::ConcatSpace,
        ComputedFunction::ConcatComma,
        ComputedFunction::HourOfDay,
        ComputedFunction::DayOfWeek,
        ComputedFunction::MonthOfYear,
        ComputedFunction::SecondBucket,
        ComputedFunction::MinuteBucket,
        ComputedFunction::HourBucket,
        ComputedFunction::DayBucket,
        ComputedFunction::WeekBucket,
        ComputedFunction::MonthBucket,
        ComputedFunction::YearBucket,
    ];

    /// Registry name, as used in specs and JSON.
    pub fn name(&self) -> &'static str {
        use ComputedFunction::*;
        match self {
            Add => "+",
            Subtract => "-",
            Multiply => "*",
            Divide => "/",
            Modulo => "%",
            Pow => "pow",
            Abs => "abs",
            Sqrt => "sqrt",
            Invert => "invert",
            Log => "log",
            Exp => "exp",
            PercentOf => "percent_of",
            Equals => "==",
            NotEquals => "!=",
            GreaterThan => ">",
            LessThan => "<",
            Uppercase => "uppercase",
            Lowercase => "lowercase",
            Length => "length",
            ConcatSpace => "concat_space",
            ConcatComma => "concat_comma",
            HourOfDay => "hour_of_day",
            DayOfWeek => "day_of_week",
            MonthOfYear => "month_of_year",
            SecondBucket => "second_bucket",
            MinuteBucket => "minute_bucket",
            HourBucket => "hour_bucket",
            DayBucket => "day_bucket",
            WeekBucket => "week_bucket",
            MonthBucket => "month_bucket",
            YearBucket => "year_bucket",
        }
    }

    pub fn signature(&self) -> Signature {
        use ComputedFunction::*;
        let (inputs, output) = match self {
            Add | Subtract | Multiply | Divide | Modulo => (NUM_NUM, OutputRule::Numeric),
            Pow => (NUM_NUM, OutputRule::Float),
            PercentOf => (NUM_NUM, OutputRule::Fixed(ColumnType::Float)),
            Abs => (NUM, OutputRule::Numeric),
            Sqrt | Invert | Log | Exp => (NUM, OutputRule::Fixed(ColumnType::Float)),
            Equals | NotEquals | GreaterThan | LessThan => {
                (CMP_CMP, OutputRule::Fixed(ColumnType::Boolean))
            }
            Uppercase | Lowercase => (STR, OutputRule::Fixed(ColumnType::String)),
            Length => (STR, OutputRule::Fixed(ColumnType::Integer)),
            ConcatSpace | ConcatComma => (STR_STR, OutputRule::Fixed(ColumnType::String)),
            HourOfDay => (TIME, OutputRule::Fixed(ColumnType::Integer)),
            DayOfWeek | MonthOfYear => (TIME, OutputRule::Fixed(ColumnType::String)),
            SecondBucket | MinuteBucket | HourBucket => {
                (TIME, OutputRule::Fixed(ColumnType::DateTime))
            }
            DayBucket | WeekBucket | MonthBucket | YearBucket => {
                (TIME, OutputRule::Fixed(ColumnType::Date))
            }
        };
        Signature { inputs, output }
    }

    /// Check input types against the signature and settle the output type.
    pub fn check(&self, inputs: &[ColumnType], declared: Option<ColumnType>) -> Result<ColumnType> {
        let sig = self.signature();
        if inputs.len() != sig.inputs.len() {
            return Err(EngineError::Type(format!(
                "'{}' takes {} argument(s), got {}",
                self.name(),
                sig.inputs.len(),
                inputs.len()
            )));
        }
        for (i, (kind, ty)) in sig.inputs.iter().zip(inputs).enumerate() {
            if !kind.accepts(*ty) {
                return Err(EngineError::Type(format!(
                    "argument {} of '{}' must be {:?}, got {}",
                    i + 1,
                    self.name(),
                    kind,
                    ty
                )));
            }
        }
        if sig.inputs.iter().all(|k| *k == ArgKind::Comparable) && inputs.len() == 2 {
            let comparable =
                inputs[0] == inputs[1] || (inputs[0].is_numeric() && inputs[1].is_numeric());
            if !comparable {
                return Err(EngineError::Type(format!(
                    "'{}' cannot compare {} with {}",
                    self.name(),
                    inputs[0],
                    inputs[1]
                )));
            }
        }

        let natural = match sig.output {
            OutputRule::Fixed(ty) => ty,
            OutputRule::Float => ColumnType::Float,
            OutputRule::Numeric => {
                let all_int = inputs.iter().all(|t| *t == ColumnType::Integer);
                if all_int && *self != ComputedFunction::Divide {
                    ColumnType::Integer
                } else {
                    ColumnType::Float
                }
            }
        };
        match declared {
            None => Ok(natural),
            Some(ty) if ty == natural => Ok(ty),
            Some(ty) if ty.is_numeric() && sig.output != OutputRule::Fixed(natural) => Ok(ty),
            Some(ty) => Err(EngineError::Type(format!(
                "'{}' produces {}, cannot declare {}",
                self.name(),
                natural,
                ty
            ))),
        }
    }

    /// Evaluate for one row. `None` means the cell resolves to null.
    pub fn eval(&self, args: &[ColumnValue], output: ColumnType) -> Option<ColumnValue> {
        use ComputedFunction::*;
        if args.iter().any(ColumnValue::is_null) {
            return None;
        }
        match self {
            Add | Subtract | Multiply | Divide | Modulo => arithmetic(*self, &args[0], &args[1], output),
            Pow => finite(args[0].as_f64()?.powf(args[1].as_f64()?), output),
            PercentOf => {
                let denom = args[1].as_f64()?;
                if denom == 0.0 {
                    return None;
                }
                finite(args[0].as_f64()? / denom * 100.0, output)
            }
            Abs => match &args[0] {
                ColumnValue::Integer(i) if output == ColumnType::Integer => {
                    i.checked_abs().map(ColumnValue::Integer)
                }
                v => finite(v.as_f64()?.abs(), output),
            },
            Sqrt => {
                let v = args[0].as_f64()?;
                (v >= 0.0).then(|| v.sqrt()).and_then(|r| finite(r, output))
            }
            Invert => {
                let v = args[0].as_f64()?;
                (v != 0.0).then(|| 1.0 / v).and_then(|r| finite(r, output))
            }
            Log => {
                let v = args[0].as_f64()?;
                (v > 0.0).then(|| v.ln()).and_then(|r| finite(r, output))
            }
            Exp => finite(args[0].as_f64()?.exp(), output),
            Equals => Some(ColumnValue::Boolean(args[0] == args[1])),
            NotEquals => Some(ColumnValue::Boolean(args[0] != args[1])),
            GreaterThan => Some(ColumnValue::Boolean(args[0] > args[1])),
            LessThan => Some(ColumnValue::Boolean(args[0] < args[1])),
            Uppercase => Some(ColumnValue::String(args[0].as_str()?.to_uppercase())),
            Lowercase => Some(ColumnValue::String(args[0].as_str()?.to_lowercase())),
            Length => Some(ColumnValue::Integer(args[0].as_str()?.chars().count() as i64)),
            ConcatSpace => Some(ColumnValue::String(format!(
                "{} {}",
                args[0].as_str()?,
                args[1].as_str()?
            ))),
            ConcatComma => Some(ColumnValue::String(format!(
                "{}, {}",
                args[0].as_str()?,
                args[1].as_str()?
            ))),
            HourOfDay => Some(ColumnValue::Integer(args[0].as_datetime()?.hour() as i64)),
            DayOfWeek => {
                let day = args[0].as_date()?.weekday();
                Some(ColumnValue::String(format!(
                    "{} {}",
                    day.num_days_from_sunday() + 1,
                    weekday_name(day)
                )))
            }
            MonthOfYear => {
                let date = args[0].as_date()?;
                Some(ColumnValue::String(format!(
                    "{:02} {}",
                    date.month(),
                    MONTH_NAMES[date.month0() as usize]
                )))
            }
            SecondBucket => truncate_time(args[0].as_datetime()?, 1),
            MinuteBucket => truncate_time(args[0].as_datetime()?, 60),
            HourBucket => truncate_time(args[0].as_datetime()?, 3600),
            DayBucket => Some(ColumnValue::Date(args[0].as_date()?)),
            WeekBucket => {
                let date = args[0].as_date()?;
                let back = Duration::days(date.weekday().num_days_from_monday() as i64);
                date.checked_sub_signed(back).map(ColumnValue::Date)
            }
            MonthBucket => {
                let date = args[0].as_date()?;
                NaiveDate::from_ymd_opt(date.year(), date.month(), 1).map(ColumnValue::Date)
            }
            YearBucket => {
                NaiveDate::from_ymd_opt(args[0].as_date()?.year(), 1, 1).map(ColumnValue::Date)
            }
        }
    }
}

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

fn weekday_name(day: chrono::Weekday) -> &'static str {
    match day {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    }
}

fn truncate_time(dt: NaiveDateTime, seconds: u32) -> Option<ColumnValue> {
    let secs = dt.num_seconds_from_midnight();
    let start = dt.date().and_hms_opt(0, 0, 0)?;
    Some(ColumnValue::DateTime(
        start + Duration::seconds((secs - secs % seconds) as i64),
    ))
}

/// Finite float result, narrowed to integer when that is the output type.
fn finite(v: f64, output: ColumnType) -> Option<ColumnValue> {
    if !v.is_finite() {
        return None;
    }
    match output {
        ColumnType::Integer => {
            let t = v.trunc();
            (t >= i64::MIN as f64 && t <= i64::MAX as f64).then(|| ColumnValue::Integer(t as i64))
        }
        _ => Some(ColumnValue::Float(v)),
    }
}

fn arithmetic(
    f: ComputedFunction,
    a: &ColumnValue,
    b: &ColumnValue,
    output: ColumnType,
) -> Option<ColumnValue> {
    if let (ColumnValue::Integer(x), ColumnValue::Integer(y), ColumnType::Integer) = (a, b, output) {
        let r = match f {
            ComputedFunction::Add => x.checked_add(*y),
            ComputedFunction::Subtract => x.checked_sub(*y),
            ComputedFunction::Multiply => x.checked_mul(*y),
            ComputedFunction::Divide => x.checked_div(*y),
            ComputedFunction::Modulo => x.checked_rem(*y),
            _ => None,
        };
        return r.map(ColumnValue::Integer);
    }
    let (x, y) = (a.as_f64()?, b.as_f64()?);
    let r = match f {
        ComputedFunction::Add => x + y,
        ComputedFunction::Subtract => x - y,
        ComputedFunction::Multiply => x * y,
        ComputedFunction::Divide if y == 0.0 => return None,
        ComputedFunction::Divide => x / y,
        ComputedFunction::Modulo if y == 0.0 => return None,
        ComputedFunction::Modulo => x % y,
        _ => return None,
    };
    finite(r, output)
}

/// Versioned lookup table from function name to `ComputedFunction`.
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: Vec<ComputedFunction>,
}

impl FunctionRegistry {
    /// Bumped whenever a function is added or its semantics change.
    pub const VERSION: u32 = 1;

    pub fn new() -> Self {
        FunctionRegistry {
            functions: ComputedFunction::ALL.to_vec(),
        }
    }

    pub fn version(&self) -> u32 {
        Self::VERSION
    }

    pub fn lookup(&self, name: &str) -> Option<ComputedFunction> {
        self.functions.iter().copied().find(|f| f.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.functions.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> ColumnValue {
        crate::column::parse_datetime(s).unwrap()
    }

    #[test]
    fn test_registry_lookup_matches_serde_names() {
        let registry = FunctionRegistry::new();
        for f in ComputedFunction::ALL {
            assert_eq!(registry.lookup(f.name()), Some(f));
            let json = serde_json::to_string(&f).unwrap();
            assert_eq!(json, format!("\"{}\"", f.name()));
        }
        assert!(registry.lookup("eval").is_none());
    }

    #[test]
    fn test_check_arity_and_types() {
        let add = ComputedFunction::Add;
        assert_eq!(
            add.check(&[ColumnType::Float, ColumnType::Integer], None).unwrap(),
            ColumnType::Float
        );
        assert_eq!(
            add.check(&[ColumnType::Integer, ColumnType::Integer], None).unwrap(),
            ColumnType::Integer
        );
        assert!(matches!(add.check(&[ColumnType::Float], None), Err(EngineError::Type(_))));
        assert!(matches!(
            add.check(&[ColumnType::String, ColumnType::Integer], None),
            Err(EngineError::Type(_))
        ));
        assert!(matches!(
            ComputedFunction::Uppercase.check(&[ColumnType::String], Some(ColumnType::Integer)),
            Err(EngineError::Type(_))
        ));
        assert!(ComputedFunction::Equals
            .check(&[ColumnType::String, ColumnType::Date], None)
            .is_err());
    }

    #[test]
    fn test_integer_division_follows_declared_output() {
        let div = ComputedFunction::Divide;
        let args = [ColumnValue::Integer(7), ColumnValue::Integer(2)];
        assert_eq!(div.eval(&args, ColumnType::Float), Some(ColumnValue::Float(3.5)));
        assert_eq!(div.eval(&args, ColumnType::Integer), Some(ColumnValue::Integer(3)));
        let zero = [ColumnValue::Integer(7), ColumnValue::Integer(0)];
        assert_eq!(div.eval(&zero, ColumnType::Float), None);
        assert_eq!(div.eval(&zero, ColumnType::Integer), None);
    }

    #[test]
    fn test_nulls_and_failures_resolve_to_none() {
        assert_eq!(
            ComputedFunction::Add.eval(&[ColumnValue::Null, 1.into()], ColumnType::Integer),
            None
        );
        assert_eq!(ComputedFunction::Log.eval(&[0.0.into()], ColumnType::Float), None);
        assert_eq!(ComputedFunction::Sqrt.eval(&[(-1.0).into()], ColumnType::Float), None);
    }

    #[test]
    fn test_string_functions() {
        let up = ComputedFunction::Uppercase.eval(&["abc".into()], ColumnType::String);
        assert_eq!(up, Some("ABC".into()));
        let joined =
            ComputedFunction::ConcatComma.eval(&["a".into(), "b".into()], ColumnType::String);
        assert_eq!(joined, Some("a, b".into()));
        assert_eq!(
            ComputedFunction::Length.eval(&["héllo".into()], ColumnType::Integer),
            Some(ColumnValue::Integer(5))
        );
    }

    #[test]
    fn test_date_buckets() {
        let t = dt("2024-03-14 17:45:31.250");
        let date = |y, m, d| ColumnValue::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap());

        assert_eq!(
            ComputedFunction::DayBucket.eval(&[t.clone()], ColumnType::Date),
            Some(date(2024, 3, 14))
        );
        assert_eq!(
            ComputedFunction::WeekBucket.eval(&[t.clone()], ColumnType::Date),
            Some(date(2024, 3, 11))
        );
        assert_eq!(
            ComputedFunction::MonthBucket.eval(&[t.clone()], ColumnType::Date),
            Some(date(2024, 3, 1))
        );
        assert_eq!(
            ComputedFunction::YearBucket.eval(&[t.clone()], ColumnType::Date),
            Some(date(2024, 1, 1))
        );
        assert_eq!(
            ComputedFunction::HourBucket.eval(&[t.clone()], ColumnType::DateTime),
            Some(dt("2024-03-14 17:00:00"))
        );
        assert_eq!(
            ComputedFunction::MinuteBucket.eval(&[t.clone()], ColumnType::DateTime),
            Some(dt("2024-03-14 17:45:00"))
        );
        assert_eq!(
            ComputedFunction::HourOfDay.eval(&[t.clone()], ColumnType::Integer),
            Some(ColumnValue::Integer(17))
        );
        assert_eq!(
            ComputedFunction::DayOfWeek.eval(&[t.clone()], ColumnType::String),
            Some("5 Thursday".into())
        );
        assert_eq!(
            ComputedFunction::MonthOfYear.eval(&[t], ColumnType::String),
            Some("03 March".into())
        );
    }
}
