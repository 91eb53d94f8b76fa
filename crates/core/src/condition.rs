//! Condition builder.
//!
//! Conditions are pure data describing a predicate over named columns. Any
//! row type that implements [`Record`] can be evaluated against them, and a
//! [`Query`] adds ordering and paging on top. Conditions are cheap to clone
//! and can be reused and composed freely.

use core::cmp::Ordering;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A named column of a projected row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Column(&'static str);

impl Column {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl core::fmt::Display for Column {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.0)
    }
}

/// Columns every projected row carries.
pub mod columns {
    use super::Column;

    pub const INSTANCE_ID: Column = Column::new("instance_id");
    pub const ORG_ID: Column = Column::new("org_id");
    pub const ID: Column = Column::new("id");
    pub const STATE: Column = Column::new("state");
    pub const CREATED_AT: Column = Column::new("created_at");
    pub const UPDATED_AT: Column = Column::new("updated_at");
}

/// A column value as seen by the condition evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
    TextList(Vec<String>),
}

impl Value {
    /// Ordering between two values of the same type. `Null` sorts first.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Number(a), Value::Number(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::TextList(a), Value::TextList(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Text(value.clone())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Number(i64::from(value))
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::TextList(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Anything the condition evaluator can read columns from.
///
/// Returning `None` means the row has no such column; predicates over an
/// unknown column never match.
pub trait Record {
    fn value(&self, column: &Column) -> Option<Value>;
}

/// Operations over text columns.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TextOperation {
    Equal,
    EqualIgnoreCase,
    NotEqual,
    StartsWith,
    StartsWithIgnoreCase,
    EndsWith,
    Contains,
    ContainsIgnoreCase,
}

impl TextOperation {
    fn matches(self, actual: &str, expected: &str) -> bool {
        match self {
            TextOperation::Equal => actual == expected,
            TextOperation::EqualIgnoreCase => actual.to_lowercase() == expected.to_lowercase(),
            TextOperation::NotEqual => actual != expected,
            TextOperation::StartsWith => actual.starts_with(expected),
            TextOperation::StartsWithIgnoreCase => {
                actual.to_lowercase().starts_with(&expected.to_lowercase())
            }
            TextOperation::EndsWith => actual.ends_with(expected),
            TextOperation::Contains => actual.contains(expected),
            TextOperation::ContainsIgnoreCase => {
                actual.to_lowercase().contains(&expected.to_lowercase())
            }
        }
    }
}

/// Comparisons over numbers, timestamps and any other ordered value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NumberOperation {
    Equal,
    NotEqual,
    LessThan,
    AtMost,
    GreaterThan,
    AtLeast,
}

impl NumberOperation {
    fn matches(self, actual: &Value, expected: &Value) -> bool {
        let Some(ordering) = actual.compare(expected) else {
            return false;
        };
        if actual.is_null() || expected.is_null() {
            // Nulls only take part in ordering, never in comparisons.
            return false;
        }
        match self {
            NumberOperation::Equal => ordering == Ordering::Equal,
            NumberOperation::NotEqual => ordering != Ordering::Equal,
            NumberOperation::LessThan => ordering == Ordering::Less,
            NumberOperation::AtMost => ordering != Ordering::Greater,
            NumberOperation::GreaterThan => ordering == Ordering::Greater,
            NumberOperation::AtLeast => ordering != Ordering::Less,
        }
    }
}

/// Rejected condition constructions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("AND requires at least one sub-condition")]
    EmptyAnd,

    #[error("OR requires at least one sub-condition")]
    EmptyOr,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Text {
        column: Column,
        op: TextOperation,
        value: String,
    },
    Compare {
        column: Column,
        op: NumberOperation,
        value: Value,
    },
    IsNull(Column),
    IsNotNull(Column),
    ListContains {
        column: Column,
        value: String,
    },
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    fn matches<R: Record + ?Sized>(&self, row: &R) -> bool {
        match self {
            Expr::Text { column, op, value } => match row.value(column) {
                Some(Value::Text(actual)) => op.matches(&actual, value),
                _ => false,
            },
            Expr::Compare { column, op, value } => match row.value(column) {
                Some(actual) => op.matches(&actual, value),
                None => false,
            },
            Expr::IsNull(column) => matches!(row.value(column), Some(Value::Null)),
            Expr::IsNotNull(column) => {
                matches!(row.value(column), Some(v) if !v.is_null())
            }
            Expr::ListContains { column, value } => match row.value(column) {
                Some(Value::TextList(items)) => items.iter().any(|item| item == value),
                _ => false,
            },
            Expr::Not(inner) => !inner.matches(row),
            Expr::And(children) => children.iter().all(|c| c.matches(row)),
            Expr::Or(children) => children.iter().any(|c| c.matches(row)),
        }
    }

    fn pins(&self, target: &Column) -> bool {
        match self {
            Expr::Text {
                column,
                op: TextOperation::Equal,
                ..
            }
            | Expr::Compare {
                column,
                op: NumberOperation::Equal,
                ..
            } => column == target,
            Expr::And(children) => children.iter().any(|c| c.pins(target)),
            Expr::Or(children) => children.iter().all(|c| c.pins(target)),
            _ => false,
        }
    }
}

/// A composable predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition(Expr);

impl Condition {
    /// Equality on any value type. `Value::Null` becomes an `IS NULL` check.
    pub fn equal(column: Column, value: impl Into<Value>) -> Self {
        match value.into() {
            Value::Null => Self(Expr::IsNull(column)),
            Value::Text(text) => Self::text(column, TextOperation::Equal, text),
            value => Self::compare(column, NumberOperation::Equal, value),
        }
    }

    pub fn not_equal(column: Column, value: impl Into<Value>) -> Self {
        match value.into() {
            Value::Null => Self(Expr::IsNotNull(column)),
            Value::Text(text) => Self::text(column, TextOperation::NotEqual, text),
            value => Self::compare(column, NumberOperation::NotEqual, value),
        }
    }

    pub fn text(column: Column, op: TextOperation, value: impl Into<String>) -> Self {
        Self(Expr::Text {
            column,
            op,
            value: value.into(),
        })
    }

    pub fn starts_with(column: Column, value: impl Into<String>) -> Self {
        Self::text(column, TextOperation::StartsWith, value)
    }

    pub fn contains(column: Column, value: impl Into<String>) -> Self {
        Self::text(column, TextOperation::Contains, value)
    }

    pub fn compare(column: Column, op: NumberOperation, value: impl Into<Value>) -> Self {
        Self(Expr::Compare {
            column,
            op,
            value: value.into(),
        })
    }

    pub fn is_null(column: Column) -> Self {
        Self(Expr::IsNull(column))
    }

    pub fn is_not_null(column: Column) -> Self {
        Self(Expr::IsNotNull(column))
    }

    /// Matches rows whose list column holds `value`.
    pub fn list_contains(column: Column, value: impl Into<String>) -> Self {
        Self(Expr::ListContains {
            column,
            value: value.into(),
        })
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self(Expr::Not(Box::new(self.0)))
    }

    /// Conjunction of all `conditions`. An empty input is rejected.
    pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Result<Self, ConditionError> {
        let children: Vec<Expr> = conditions.into_iter().map(|c| c.0).collect();
        if children.is_empty() {
            return Err(ConditionError::EmptyAnd);
        }
        Ok(Self(Expr::And(children)))
    }

    /// Disjunction of all `conditions`. An empty input is rejected.
    pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Result<Self, ConditionError> {
        let children: Vec<Expr> = conditions.into_iter().map(|c| c.0).collect();
        if children.is_empty() {
            return Err(ConditionError::EmptyOr);
        }
        Ok(Self(Expr::Or(children)))
    }

    /// Binary conjunction; never empty, so it cannot fail.
    pub fn and_also(self, other: Condition) -> Self {
        match self.0 {
            Expr::And(mut children) => {
                children.push(other.0);
                Self(Expr::And(children))
            }
            expr => Self(Expr::And(vec![expr, other.0])),
        }
    }

    pub fn matches<R: Record + ?Sized>(&self, row: &R) -> bool {
        self.0.matches(row)
    }

    /// Whether every row matched by this condition must have `column` equal
    /// to one fixed value.
    pub fn pins(&self, column: &Column) -> bool {
        self.0.pins(column)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A condition plus ordering and paging.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    condition: Condition,
    order: Vec<(Column, Direction)>,
    limit: Option<usize>,
    offset: usize,
}

impl Query {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            order: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    pub fn order_by_asc(mut self, column: Column) -> Self {
        self.order.push((column, Direction::Ascending));
        self
    }

    pub fn order_by_desc(mut self, column: Column) -> Self {
        self.order.push((column, Direction::Descending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn order(&self) -> &[(Column, Direction)] {
        &self.order
    }

    pub fn max_rows(&self) -> Option<usize> {
        self.limit
    }

    /// Filter, sort and page `rows`. Sorting is stable, so rows that tie on
    /// every order column keep their input order.
    pub fn apply<R: Record>(&self, rows: impl IntoIterator<Item = R>) -> Vec<R> {
        let mut matched: Vec<R> = rows
            .into_iter()
            .filter(|row| self.condition.matches(row))
            .collect();

        if !self.order.is_empty() {
            matched.sort_by(|a, b| self.compare_rows(a, b));
        }

        let paged = matched.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => paged.take(limit).collect(),
            None => paged.collect(),
        }
    }

    fn compare_rows<R: Record>(&self, a: &R, b: &R) -> Ordering {
        for (column, direction) in &self.order {
            let left = a.value(column).unwrap_or(Value::Null);
            let right = b.value(column).unwrap_or(Value::Null);
            let ordering = left.compare(&right).unwrap_or(Ordering::Equal);
            let ordering = match direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl From<Condition> for Query {
    fn from(condition: Condition) -> Self {
        Query::new(condition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const NAME: Column = Column::new("name");
    const ROLES: Column = Column::new("roles");
    const PARENT: Column = Column::new("parent");

    #[derive(Debug, Clone)]
    struct Row {
        instance: &'static str,
        name: String,
        roles: Vec<String>,
        parent: Option<&'static str>,
        updated_at: DateTime<Utc>,
    }

    impl Record for Row {
        fn value(&self, column: &Column) -> Option<Value> {
            match column.name() {
                "instance_id" => Some(self.instance.into()),
                "name" => Some(self.name.as_str().into()),
                "roles" => Some(self.roles.clone().into()),
                "parent" => Some(self.parent.into()),
                "updated_at" => Some(self.updated_at.into()),
                _ => None,
            }
        }
    }

    fn row(instance: &'static str, name: &'static str, minute: u32) -> Row {
        Row {
            instance,
            name: name.to_string(),
            roles: vec!["reader".to_string()],
            parent: None,
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
        }
    }

    #[test]
    fn empty_and_or_are_rejected() {
        assert_eq!(Condition::and(vec![]), Err(ConditionError::EmptyAnd));
        assert_eq!(Condition::or(Vec::new()), Err(ConditionError::EmptyOr));
    }

    #[test]
    fn text_operations_match() {
        let r = row("i1", "Acme Corp", 0);
        assert!(Condition::starts_with(NAME, "Acme").matches(&r));
        assert!(Condition::contains(NAME, "me C").matches(&r));
        assert!(Condition::text(NAME, TextOperation::EqualIgnoreCase, "acme corp").matches(&r));
        assert!(Condition::text(NAME, TextOperation::EndsWith, "Corp").matches(&r));
        assert!(!Condition::equal(NAME, "acme corp").matches(&r));
    }

    #[test]
    fn unknown_columns_never_match() {
        let r = row("i1", "a", 0);
        assert!(!Condition::equal(Column::new("nope"), "a").matches(&r));
        assert!(!Condition::is_null(Column::new("nope")).matches(&r));
    }

    #[test]
    fn null_and_list_predicates() {
        let mut r = row("i1", "a", 0);
        assert!(Condition::equal(PARENT, Option::<&str>::None).matches(&r));
        r.parent = Some("p");
        assert!(Condition::is_not_null(PARENT).matches(&r));
        assert!(Condition::list_contains(ROLES, "reader").matches(&r));
        assert!(!Condition::list_contains(ROLES, "writer").matches(&r));
    }

    #[test]
    fn timestamp_comparisons() {
        let r = row("i1", "a", 30);
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap();
        let newer = Condition::compare(columns::UPDATED_AT, NumberOperation::GreaterThan, cutoff);
        let older = Condition::compare(columns::UPDATED_AT, NumberOperation::AtMost, cutoff);
        assert!(newer.matches(&r));
        assert!(!older.matches(&r));
    }

    #[test]
    fn pins_follows_boolean_structure() {
        let pinned = Condition::equal(columns::INSTANCE_ID, "i1")
            .and_also(Condition::contains(NAME, "x"));
        assert!(pinned.pins(&columns::INSTANCE_ID));

        let either = Condition::or(vec![
            Condition::equal(columns::INSTANCE_ID, "i1"),
            Condition::equal(columns::INSTANCE_ID, "i2"),
        ])
        .unwrap();
        assert!(either.pins(&columns::INSTANCE_ID));

        let leaky = Condition::or(vec![
            Condition::equal(columns::INSTANCE_ID, "i1"),
            Condition::equal(NAME, "x"),
        ])
        .unwrap();
        assert!(!leaky.pins(&columns::INSTANCE_ID));
        assert!(!Condition::starts_with(columns::INSTANCE_ID, "i").pins(&columns::INSTANCE_ID));
        assert!(!Condition::equal(columns::INSTANCE_ID, "i1").not().pins(&columns::INSTANCE_ID));
    }

    #[test]
    fn query_orders_and_pages() {
        let rows = vec![row("i1", "b", 2), row("i1", "a", 3), row("i2", "c", 1), row("i1", "c", 1)];
        let query = Query::new(Condition::equal(columns::INSTANCE_ID, "i1"))
            .order_by_desc(columns::UPDATED_AT)
            .offset(1)
            .limit(1);

        let page = query.apply(rows.clone());
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "b");

        let by_name = Query::new(Condition::equal(columns::INSTANCE_ID, "i1")).order_by_asc(NAME);
        let names: Vec<_> = by_name.apply(rows).into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn conditions_are_reusable() {
        let base = Condition::equal(columns::INSTANCE_ID, "i1");
        let a = base.clone().and_also(Condition::equal(NAME, "a"));
        let b = base.clone().and_also(Condition::equal(NAME, "b"));
        assert!(a.matches(&row("i1", "a", 0)));
        assert!(b.matches(&row("i1", "b", 0)));
        assert!(base.matches(&row("i1", "z", 0)));
    }

    proptest::proptest! {
        #[test]
        fn not_inverts_every_text_match(name in "[a-zA-Z ]{0,12}", needle in "[a-zA-Z]{0,4}") {
            let r = Row { name, ..row("i1", "", 0) };
            let ops = [
                TextOperation::StartsWith,
                TextOperation::ContainsIgnoreCase,
                TextOperation::EndsWith,
            ];
            for op in ops {
                let c = Condition::text(NAME, op, needle.clone());
                proptest::prop_assert_ne!(c.matches(&r), c.clone().not().matches(&r));
            }
        }

        #[test]
        fn paging_never_exceeds_the_limit(
            n in 0usize..20,
            offset in 0usize..25,
            limit in 0usize..10,
        ) {
            let rows: Vec<_> = (0..n).map(|m| row("i1", "x", m as u32)).collect();
            let page = Query::new(Condition::equal(columns::INSTANCE_ID, "i1"))
                .offset(offset)
                .limit(limit)
                .apply(rows);
            proptest::prop_assert_eq!(page.len(), n.saturating_sub(offset).min(limit));
        }
    }
}
