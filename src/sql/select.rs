//! Backend-neutral query description. Identifiers come from validated documents only; values stay values.

use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnRef {
    /// Base table name or join alias.
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        ColumnRef {
            table: table.into(),
            column: column.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    /// Query-parameter suffix: `price_gte=10`.
    pub fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "ne" => Some(CmpOp::Ne),
            "gt" => Some(CmpOp::Gt),
            "gte" => Some(CmpOp::Gte),
            "lt" => Some(CmpOp::Lt),
            "lte" => Some(CmpOp::Lte),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare { column: ColumnRef, op: CmpOp, value: Value },
    /// Case-insensitive substring match.
    Contains { column: ColumnRef, needle: String },
    In { column: ColumnRef, values: Vec<Value> },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: ColumnRef, value: Value) -> Self {
        Predicate::Compare {
            column,
            op: CmpOp::Eq,
            value,
        }
    }

    /// Conjunction of `preds`; None when there is nothing to filter on.
    pub fn all(mut preds: Vec<Predicate>) -> Option<Predicate> {
        match preds.len() {
            0 => None,
            1 => preds.pop(),
            _ => Some(Predicate::And(preds)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    /// Every column of the base table or of a join alias, under its own name.
    All(String),
    Column { column: ColumnRef, alias: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    /// Column of the joined table ...
    pub on_column: String,
    /// ... equal to this column.
    pub to: ColumnRef,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub order: SortOrder,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Select {
    pub table: String,
    pub projection: Vec<Projection>,
    pub joins: Vec<Join>,
    pub filter: Option<Predicate>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    /// `SELECT table.* FROM table`.
    pub fn from(table: impl Into<String>) -> Self {
        let table = table.into();
        Select {
            projection: vec![Projection::All(table.clone())],
            table,
            joins: Vec::new(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn col(&self, column: impl Into<String>) -> ColumnRef {
        ColumnRef::new(self.table.clone(), column)
    }

    /// AND `pred` into the current filter.
    pub fn and_where(&mut self, pred: Predicate) -> &mut Self {
        self.filter = match self.filter.take() {
            None => Some(pred),
            Some(Predicate::And(mut v)) => {
                v.push(pred);
                Some(Predicate::And(v))
            }
            Some(existing) => Some(Predicate::And(vec![existing, pred])),
        };
        self
    }

    pub fn order(&mut self, column: ColumnRef, order: SortOrder) -> &mut Self {
        self.order_by.push(OrderBy { column, order });
        self
    }

    pub fn page(&mut self, limit: u64, offset: u64) -> &mut Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn and_where_flattens() {
        let mut s = Select::from("products");
        s.and_where(Predicate::eq(ColumnRef::new("products", "a"), json!(1)));
        s.and_where(Predicate::eq(ColumnRef::new("products", "b"), json!(2)));
        s.and_where(Predicate::eq(ColumnRef::new("products", "c"), json!(3)));
        match s.filter {
            Some(Predicate::And(v)) => assert_eq!(v.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn all_of_nothing_is_none() {
        assert_eq!(Predicate::all(vec![]), None);
        let single = Predicate::eq(ColumnRef::new("t", "a"), json!(1));
        assert_eq!(Predicate::all(vec![single.clone()]), Some(single));
    }
}
