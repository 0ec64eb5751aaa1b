//! View filters
//!
//! A filter is a list of `[column, op, value]` terms joined by a single
//! combinator (`and` / `or`). Terms can also be written as text and parsed:
//!
//! - `score > 90`
//! - `name == 'Alice'`
//! - `region in ('east', 'west')`
//! - `name begins with 'A'`
//! - `value is not null`
//!
//! A null cell fails every term except `is null`.

use crate::changeset::RowId;
use crate::column::{ColumnType, ColumnValue};
use crate::error::{EngineError, Result};
use crate::store::RowSource;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "begins with")]
    BeginsWith,
    #[serde(rename = "ends with")]
    EndsWith,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in")]
    NotIn,
    #[serde(rename = "is null")]
    IsNull,
    #[serde(rename = "is not null")]
    IsNotNull,
}

impl FilterOp {
    fn takes_value(&self) -> bool {
        !matches!(self, FilterOp::IsNull | FilterOp::IsNotNull)
    }

    fn takes_list(&self) -> bool {
        matches!(self, FilterOp::In | FilterOp::NotIn)
    }

    fn is_text(&self) -> bool {
        matches!(self, FilterOp::Contains | FilterOp::BeginsWith | FilterOp::EndsWith)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterCombinator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum FilterValue {
    #[default]
    None,
    Scalar(ColumnValue),
    List(Vec<ColumnValue>),
}

impl FilterValue {
    fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            FilterValue::None => None,
            FilterValue::Scalar(v) => Some(v.to_json()),
            FilterValue::List(vs) => Some(serde_json::Value::Array(vs.iter().map(|v| v.to_json()).collect())),
        }
    }
}

/// One filter term. Serialised as `["column", "op"]` or `["column", "op", value]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<serde_json::Value>", into = "Vec<serde_json::Value>")]
pub struct FilterTerm {
    pub column: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl FilterTerm {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<ColumnValue>) -> Self {
        FilterTerm {
            column: column.into(),
            op,
            value: FilterValue::Scalar(value.into()),
        }
    }

    pub fn list(column: impl Into<String>, op: FilterOp, values: Vec<ColumnValue>) -> Self {
        FilterTerm {
            column: column.into(),
            op,
            value: FilterValue::List(values),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        FilterTerm {
            column: column.into(),
            op: FilterOp::IsNull,
            value: FilterValue::None,
        }
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        FilterTerm {
            column: column.into(),
            op: FilterOp::IsNotNull,
            value: FilterValue::None,
        }
    }

    /// Parse a single term from text.
    ///
    /// ```
    /// use livepivot::{FilterOp, FilterTerm};
    ///
    /// let term = FilterTerm::parse("score >= 90").unwrap();
    /// assert_eq!(term, FilterTerm::new("score", FilterOp::Ge, 90));
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser::new(text)?;
        let term = parser.parse_term()?;
        parser.expect(&Token::Eof)?;
        Ok(term)
    }

    /// Coerce the literal to the column type and check the operator applies.
    fn resolve(&self, ty: ColumnType) -> Result<FilterTerm> {
        let bad = |msg: String| EngineError::Config(format!("filter on '{}': {}", self.column, msg));
        if self.op.is_text() && ty != ColumnType::String {
            return Err(bad(format!("'{:?}' needs a string column, got {}", self.op, ty)));
        }
        let coerce = |v: &ColumnValue| -> Result<ColumnValue> {
            if ty.is_numeric() && v.as_f64().is_some() {
                return Ok(v.clone());
            }
            v.clone().coerce(ty).map_err(bad)
        };
        let value = match (&self.value, self.op.takes_value(), self.op.takes_list()) {
            (_, false, _) => FilterValue::None,
            (FilterValue::None, true, _) => return Err(bad(format!("'{:?}' needs a value", self.op))),
            (FilterValue::List(vs), true, true) => {
                FilterValue::List(vs.iter().map(coerce).collect::<Result<_>>()?)
            }
            (FilterValue::Scalar(v), true, true) => FilterValue::List(vec![coerce(v)?]),
            (FilterValue::Scalar(v), true, false) => FilterValue::Scalar(coerce(v)?),
            (FilterValue::List(_), true, false) => {
                return Err(bad(format!("'{:?}' takes a single value", self.op)))
            }
        };
        Ok(FilterTerm {
            column: self.column.clone(),
            op: self.op,
            value,
        })
    }

    fn matches(&self, cell: &ColumnValue) -> bool {
        match self.op {
            FilterOp::IsNull => return cell.is_null(),
            FilterOp::IsNotNull => return !cell.is_null(),
            _ if cell.is_null() => return false,
            _ => {}
        }
        match (&self.value, self.op) {
            (FilterValue::List(vs), FilterOp::In) => vs.contains(cell),
            (FilterValue::List(vs), FilterOp::NotIn) => !vs.contains(cell),
            (FilterValue::Scalar(v), op) => match op {
                FilterOp::Eq => cell == v,
                FilterOp::Ne => cell != v,
                FilterOp::Lt => cell < v,
                FilterOp::Le => cell <= v,
                FilterOp::Gt => cell > v,
                FilterOp::Ge => cell >= v,
                FilterOp::Contains => text_match(cell, v, |s, p| s.contains(p)),
                FilterOp::BeginsWith => text_match(cell, v, |s, p| s.starts_with(p)),
                FilterOp::EndsWith => text_match(cell, v, |s, p| s.ends_with(p)),
                _ => false,
            },
            _ => false,
        }
    }
}

fn text_match(cell: &ColumnValue, pattern: &ColumnValue, f: impl Fn(&str, &str) -> bool) -> bool {
    match (cell.as_str(), pattern.as_str()) {
        (Some(s), Some(p)) => f(s, p),
        _ => false,
    }
}

impl fmt::Display for FilterTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = serde_json::to_value(self.op)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        match self.value.to_json() {
            Some(v) => write!(f, "{} {} {}", self.column, op, v),
            None => write!(f, "{} {}", self.column, op),
        }
    }
}

impl TryFrom<Vec<serde_json::Value>> for FilterTerm {
    type Error = EngineError;

    fn try_from(parts: Vec<serde_json::Value>) -> Result<Self> {
        let (column, op, value) = match parts.as_slice() {
            [c, o] => (c, o, None),
            [c, o, v] => (c, o, Some(v)),
            _ => return Err(EngineError::Parse(format!("filter term needs 2 or 3 parts, got {}", parts.len()))),
        };
        let column = column
            .as_str()
            .ok_or_else(|| EngineError::Parse(format!("filter column must be a string, got {}", column)))?
            .to_string();
        let op: FilterOp = serde_json::from_value(op.clone())?;
        let value = match value {
            None | Some(serde_json::Value::Null) => FilterValue::None,
            Some(serde_json::Value::Array(items)) => FilterValue::List(
                items
                    .iter()
                    .map(|v| ColumnValue::from_json(v).map_err(EngineError::Parse))
                    .collect::<Result<_>>()?,
            ),
            Some(v) => FilterValue::Scalar(ColumnValue::from_json(v).map_err(EngineError::Parse)?),
        };
        Ok(FilterTerm { column, op, value })
    }
}

impl From<FilterTerm> for Vec<serde_json::Value> {
    fn from(term: FilterTerm) -> Self {
        let mut parts = vec![
            serde_json::Value::String(term.column.clone()),
            serde_json::to_value(term.op).unwrap_or(serde_json::Value::Null),
        ];
        if let Some(v) = term.value.to_json() {
            parts.push(v);
        }
        parts
    }
}

/// Terms checked and coerced against a view's columns.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    terms: Vec<FilterTerm>,
    combinator: FilterCombinator,
}

impl Filter {
    pub fn resolve(terms: &[FilterTerm], combinator: FilterCombinator, source: &dyn RowSource) -> Result<Self> {
        let terms = terms
            .iter()
            .map(|t| {
                let ty = source.column_type(&t.column).ok_or_else(|| {
                    EngineError::Config(format!("filter references unknown column '{}'", t.column))
                })?;
                t.resolve(ty)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Filter { terms, combinator })
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|t| t.column.as_str())
    }

    pub fn matches(&self, row: RowId, source: &dyn RowSource) -> bool {
        let check = |t: &FilterTerm| t.matches(&source.value(row, &t.column));
        match self.combinator {
            FilterCombinator::And => self.terms.iter().all(check),
            FilterCombinator::Or => self.terms.is_empty() || self.terms.iter().any(check),
        }
    }
}

/// Parse `term AND term AND ...` (or `OR`). Mixing the two is rejected.
pub fn parse_filters(text: &str) -> Result<(Vec<FilterTerm>, FilterCombinator)> {
    let mut parser = Parser::new(text)?;
    let mut terms = vec![parser.parse_term()?];
    let mut combinator = None;
    loop {
        let next = match parser.current {
            Token::And => FilterCombinator::And,
            Token::Or => FilterCombinator::Or,
            Token::Eof => break,
            ref other => return Err(EngineError::Parse(format!("unexpected {:?}", other))),
        };
        if combinator.is_some_and(|c| c != next) {
            return Err(EngineError::Parse("cannot mix AND and OR in one filter".to_string()));
        }
        combinator = Some(next);
        parser.advance()?;
        terms.push(parser.parse_term()?);
    }
    Ok((terms, combinator.unwrap_or_default()))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(ColumnValue),
    Op(FilterOp),
    And,
    Or,
    Not,
    Is,
    In,
    Contains,
    Begins,
    Ends,
    With,
    LParen,
    RParen,
    Comma,
    Eof,
}

struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek().filter(|c| pred(*c)) {
            out.push(c);
            self.advance();
        }
        out
    }

    fn read_number(&mut self, negative: bool) -> Result<Token> {
        let text = self.read_while(|c| c.is_ascii_digit() || c == '.');
        let text = if negative { format!("-{}", text) } else { text };
        let value = if text.contains('.') {
            text.parse::<f64>().map(ColumnValue::Float).ok()
        } else {
            text.parse::<i64>().map(ColumnValue::Integer).ok()
        };
        value
            .map(Token::Literal)
            .ok_or_else(|| EngineError::Parse(format!("bad number '{}'", text)))
    }

    fn read_string(&mut self, quote: char) -> Result<Token> {
        self.advance();
        let mut s = String::new();
        while let Some(c) = self.advance() {
            match c {
                c if c == quote => return Ok(Token::Literal(ColumnValue::String(s))),
                '\\' => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(other) => s.push(other),
                    None => break,
                },
                c => s.push(c),
            }
        }
        Err(EngineError::Parse("unterminated string".to_string()))
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();
        let Some(c) = self.peek() else {
            return Ok(Token::Eof);
        };
        let two = |lexer: &mut Lexer, single: Token, double: Token| {
            lexer.advance();
            if lexer.peek() == Some('=') {
                lexer.advance();
                double
            } else {
                single
            }
        };
        let token = match c {
            '(' => {
                self.advance();
                Token::LParen
            }
            ')' => {
                self.advance();
                Token::RParen
            }
            ',' => {
                self.advance();
                Token::Comma
            }
            '=' => two(self, Token::Op(FilterOp::Eq), Token::Op(FilterOp::Eq)),
            '!' => two(self, Token::Not, Token::Op(FilterOp::Ne)),
            '<' => two(self, Token::Op(FilterOp::Lt), Token::Op(FilterOp::Le)),
            '>' => two(self, Token::Op(FilterOp::Gt), Token::Op(FilterOp::Ge)),
            '\'' | '"' => self.read_string(c)?,
            '-' if self.input.get(self.pos + 1).is_some_and(|n| n.is_ascii_digit()) => {
                self.advance();
                self.read_number(true)?
            }
            c if c.is_ascii_digit() => self.read_number(false)?,
            c if c.is_alphabetic() || c == '_' => {
                let ident = self.read_while(|c| c.is_alphanumeric() || c == '_');
                match ident.to_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "IS" => Token::Is,
                    "IN" => Token::In,
                    "CONTAINS" => Token::Contains,
                    "BEGINS" => Token::Begins,
                    "ENDS" => Token::Ends,
                    "WITH" => Token::With,
                    "NULL" => Token::Literal(ColumnValue::Null),
                    "TRUE" => Token::Literal(ColumnValue::Boolean(true)),
                    "FALSE" => Token::Literal(ColumnValue::Boolean(false)),
                    _ => Token::Ident(ident),
                }
            }
            other => return Err(EngineError::Parse(format!("unexpected character '{}'", other))),
        };
        Ok(token)
    }
}

struct Parser {
    lexer: Lexer,
    current: Token,
}

impl Parser {
    fn new(input: &str) -> Result<Self> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Parser { lexer, current })
    }

    fn advance(&mut self) -> Result<()> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        if &self.current == expected {
            self.advance()
        } else {
            Err(EngineError::Parse(format!("expected {:?}, got {:?}", expected, self.current)))
        }
    }

    fn literal(&mut self) -> Result<ColumnValue> {
        match std::mem::replace(&mut self.current, Token::Eof) {
            Token::Literal(v) => {
                self.advance()?;
                Ok(v)
            }
            other => Err(EngineError::Parse(format!("expected a literal, got {:?}", other))),
        }
    }

    fn literal_list(&mut self) -> Result<Vec<ColumnValue>> {
        self.expect(&Token::LParen)?;
        let mut values = vec![self.literal()?];
        while self.current == Token::Comma {
            self.advance()?;
            values.push(self.literal()?);
        }
        self.expect(&Token::RParen)?;
        Ok(values)
    }

    fn parse_term(&mut self) -> Result<FilterTerm> {
        let column = match std::mem::replace(&mut self.current, Token::Eof) {
            Token::Ident(name) => name,
            Token::Literal(ColumnValue::String(name)) => name,
            other => return Err(EngineError::Parse(format!("expected a column name, got {:?}", other))),
        };
        self.advance()?;

        let term = match self.current.clone() {
            Token::Op(op) => {
                self.advance()?;
                FilterTerm::new(column, op, self.literal()?)
            }
            Token::Is => {
                self.advance()?;
                let negated = self.current == Token::Not;
                if negated {
                    self.advance()?;
                }
                self.expect(&Token::Literal(ColumnValue::Null))?;
                if negated {
                    FilterTerm::is_not_null(column)
                } else {
                    FilterTerm::is_null(column)
                }
            }
            Token::Not => {
                self.advance()?;
                self.expect(&Token::In)?;
                FilterTerm::list(column, FilterOp::NotIn, self.literal_list()?)
            }
            Token::In => {
                self.advance()?;
                FilterTerm::list(column, FilterOp::In, self.literal_list()?)
            }
            Token::Contains => {
                self.advance()?;
                FilterTerm::new(column, FilterOp::Contains, self.literal()?)
            }
            Token::Begins | Token::Ends => {
                let op = if self.current == Token::Begins {
                    FilterOp::BeginsWith
                } else {
                    FilterOp::EndsWith
                };
                self.advance()?;
                self.expect(&Token::With)?;
                FilterTerm::new(column, op, self.literal()?)
            }
            other => return Err(EngineError::Parse(format!("expected an operator, got {:?}", other))),
        };
        Ok(term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Row;
    use crate::store::ColumnStore;
    use crate::table::{Schema, StorageHint};

    fn store() -> ColumnStore {
        let schema = Schema::new(vec![("name", ColumnType::String), ("score", ColumnType::Integer)]);
        let mut store = ColumnStore::new(schema, None, StorageHint::FastReads).unwrap();
        let rows: Vec<Row> = [("Alice", Some(95)), ("Bob", Some(72)), ("Anna", None)]
            .iter()
            .map(|(n, s)| {
                [
                    ("name".to_string(), ColumnValue::from(*n)),
                    ("score".to_string(), ColumnValue::from(*s)),
                ]
                .into_iter()
                .collect()
            })
            .collect();
        store.apply_rows(rows).unwrap();
        store
    }

    fn matching(filter: &Filter, store: &ColumnStore) -> Vec<RowId> {
        store.live_rows().into_iter().filter(|&r| filter.matches(r, store)).collect()
    }

    #[test]
    fn test_parse_terms() {
        assert_eq!(FilterTerm::parse("x = 'a'").unwrap(), FilterTerm::new("x", FilterOp::Eq, "a"));
        assert_eq!(FilterTerm::parse("x != -2.5").unwrap(), FilterTerm::new("x", FilterOp::Ne, -2.5));
        assert_eq!(FilterTerm::parse("x IS NOT NULL").unwrap(), FilterTerm::is_not_null("x"));
        assert_eq!(
            FilterTerm::parse("x not in (1, 2)").unwrap(),
            FilterTerm::list("x", FilterOp::NotIn, vec![1.into(), 2.into()])
        );
        assert_eq!(
            FilterTerm::parse("name begins with 'A'").unwrap(),
            FilterTerm::new("name", FilterOp::BeginsWith, "A")
        );
        assert!(FilterTerm::parse("x >").is_err());
        assert!(FilterTerm::parse("x > 1 extra").is_err());
        assert!(FilterTerm::parse("x = 'open").is_err());
    }

    #[test]
    fn test_parse_filter_list() {
        let (terms, op) = parse_filters("score > 80 or name contains 'nn'").unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(op, FilterCombinator::Or);
        assert!(parse_filters("a = 1 and b = 2 or c = 3").is_err());
    }

    #[test]
    fn test_json_form() {
        let terms: Vec<FilterTerm> =
            serde_json::from_str(r#"[["score", ">", 80], ["name", "is null"], ["name", "in", ["a", "b"]]]"#).unwrap();
        assert_eq!(terms[0], FilterTerm::new("score", FilterOp::Gt, 80));
        assert_eq!(terms[1], FilterTerm::is_null("name"));
        assert_eq!(terms[2].value, FilterValue::List(vec!["a".into(), "b".into()]));
        assert_eq!(serde_json::to_string(&terms[0]).unwrap(), r#"["score",">",80]"#);
    }

    #[test]
    fn test_matching() {
        let store = store();
        let and = Filter::resolve(
            &[FilterTerm::new("name", FilterOp::BeginsWith, "A"), FilterTerm::new("score", FilterOp::Gt, 90.0)],
            FilterCombinator::And,
            &store,
        )
        .unwrap();
        assert_eq!(matching(&and, &store), vec![0]);

        let or = Filter::resolve(
            &[FilterTerm::is_null("score"), FilterTerm::new("name", FilterOp::Eq, "Bob")],
            FilterCombinator::Or,
            &store,
        )
        .unwrap();
        assert_eq!(matching(&or, &store), vec![1, 2]);

        // A null cell fails comparisons, including !=.
        let ne = Filter::resolve(&[FilterTerm::new("score", FilterOp::Ne, 1)], FilterCombinator::And, &store).unwrap();
        assert_eq!(matching(&ne, &store), vec![0, 1]);
    }

    #[test]
    fn test_resolve_errors() {
        let store = store();
        let unknown = Filter::resolve(&[FilterTerm::is_null("nope")], FilterCombinator::And, &store);
        assert!(matches!(unknown, Err(EngineError::Config(_))));
        let text_on_int = Filter::resolve(&[FilterTerm::new("score", FilterOp::Contains, "9")], FilterCombinator::And, &store);
        assert!(matches!(text_on_int, Err(EngineError::Config(_))));
        let bad_literal = Filter::resolve(&[FilterTerm::new("score", FilterOp::Eq, "high")], FilterCombinator::And, &store);
        assert!(matches!(bad_literal, Err(EngineError::Config(_))));
    }
}
