use crate::domain::value::Value;
use crate::storage::Order;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    Match,
    Sort(Order),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
    Between,
    Like,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operator::Eq => "=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Between => "BETWEEN",
            Operator::Like => "LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "ISNULL",
            Operator::IsNotNull => "ISNOTNULL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ClauseValue {
    #[default]
    None,
    One(Value),
    Range(Value, Value),
    List(Vec<Value>),
}

/// One step of a query: a condition on a field, or a sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub kind: ClauseKind,
    pub field: String,
    /// `None` until a modifier sets the condition.
    pub operator: Option<Operator>,
    pub value: ClauseValue,
}

impl Clause {
    pub fn matching(field: impl Into<String>) -> Self {
        Self {
            kind: ClauseKind::Match,
            field: field.into(),
            operator: None,
            value: ClauseValue::None,
        }
    }

    pub fn sort(field: impl Into<String>, order: Order) -> Self {
        Self {
            kind: ClauseKind::Sort(order),
            field: field.into(),
            operator: None,
            value: ClauseValue::None,
        }
    }

    /// Sets the condition, replacing any earlier one on this clause.
    pub fn set(&mut self, operator: Operator, value: ClauseValue) {
        self.operator = Some(operator);
        self.value = value;
    }
}
