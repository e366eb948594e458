// SPDX-License-Identifier: Apache-2.0

//! Translation of relational filters into OGR attribute filters
//!
//! The host normalizes its filter expressions into the closed [`Expr`] form
//! before asking for pushdown. Every node shape has one translation rule;
//! anything without a rule (including [`Expr::Opaque`]) declines the whole
//! conjunct it appears in, and the host keeps checking that conjunct itself.
//! A pushed fragment is therefore never narrower than the relational
//! predicate it replaces.

pub mod cache;

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use tracing::trace;

use crate::schema::{Column, ColumnVariant, Table};
use crate::types::io::is_numeric_literal;
use crate::source::FieldSubType;
use crate::types::{ExternalFieldType, TypeOid};

pub use cache::DeparseCache;

/// Constant operand
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary precision number in its textual form
    Numeric(String),
    Text(String),
}

/// Comparison operators with a direct OGR SQL spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }

    /// Operator with the operands swapped (`a < b` is `b > a`)
    pub fn commute(&self) -> CompareOp {
        match self {
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::NotEq => CompareOp::NotEq,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
        }
    }

    fn is_equality(&self) -> bool {
        matches!(self, CompareOp::Eq | CompareOp::NotEq)
    }
}

/// Normalized filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Reference to a column by attribute number
    Column(usize),
    Literal(Literal),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// A host construct with no normalized form (function calls, spatial
    /// operators, subqueries, ...), kept only as its display text
    Opaque(String),
}

impl Expr {
    pub fn column(attnum: usize) -> Self {
        Expr::Column(attnum)
    }

    pub fn int(value: i64) -> Self {
        Expr::Literal(Literal::Int(value))
    }

    pub fn text(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::Text(value.into()))
    }

    pub fn compare(left: Expr, op: CompareOp, right: Expr) -> Self {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn is_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    pub fn is_not_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: true,
        }
    }

    pub fn negate(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    /// Attribute numbers the expression refers to
    pub fn referenced_columns(&self) -> Vec<usize> {
        fn walk(expr: &Expr, out: &mut Vec<usize>) {
            match expr {
                Expr::Column(attnum) => out.push(*attnum),
                Expr::Compare { left, right, .. } => {
                    walk(left, out);
                    walk(right, out);
                }
                Expr::And(items) | Expr::Or(items) => items.iter().for_each(|e| walk(e, out)),
                Expr::Not(inner) | Expr::IsNull { expr: inner, .. } => walk(inner, out),
                Expr::Literal(_) | Expr::Opaque(_) => {}
            }
        }

        let mut out = Vec::new();
        walk(self, &mut out);
        out.sort_unstable();
        out.dedup();
        out
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Bool(v) => write!(f, "{}", v),
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Float(v) => write!(f, "{:?}::float", v),
            Literal::Numeric(v) => write!(f, "{}::numeric", v),
            Literal::Text(v) => write!(f, "{}", escape_string_literal(v)),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, items: &[Expr], sep: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", item)?;
            }
            write!(f, ")")
        }

        match self {
            Expr::Column(attnum) => write!(f, "${}", attnum),
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Compare { op, left, right } => {
                write!(f, "({} {} {})", left, op.as_str(), right)
            }
            Expr::And(items) => list(f, items, "AND"),
            Expr::Or(items) => list(f, items, "OR"),
            Expr::Not(inner) => write!(f, "NOT {}", inner),
            Expr::IsNull { expr, negated } => {
                write!(f, "({} IS {}NULL)", expr, if *negated { "NOT " } else { "" })
            }
            Expr::Opaque(text) => write!(f, "opaque({:?})", text),
        }
    }
}

/// Flatten nested top-level `AND`s into a conjunct list
pub fn split_conjuncts(expr: Expr) -> Vec<Expr> {
    match expr {
        Expr::And(items) => items.into_iter().flat_map(split_conjuncts).collect(),
        other => vec![other],
    }
}

/// Outcome of deparsing a conjunct list
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Deparsed {
    /// `AND` of every translated conjunct; `None` when nothing was pushed
    pub fragment: Option<String>,
    /// One flag per input conjunct
    pub pushed: Vec<bool>,
}

impl Deparsed {
    pub fn pushed_count(&self) -> usize {
        self.pushed.iter().filter(|p| **p).count()
    }

    /// Indexes of conjuncts the host must still check after retrieval
    pub fn local_conjuncts(&self) -> Vec<usize> {
        self.pushed
            .iter()
            .enumerate()
            .filter(|(_, p)| !**p)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Value domain in which a comparison is evaluated on both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    /// Numbers compared against an integer field
    Integral,
    /// Numbers compared against a double field
    Real,
    Text,
    Boolean,
}

/// Translates filters against one bound table
#[derive(Debug, Clone, Copy)]
pub struct Deparser<'a> {
    table: &'a Table,
    cache: Option<&'a DeparseCache>,
}

impl<'a> Deparser<'a> {
    pub fn new(table: &'a Table) -> Self {
        Self { table, cache: None }
    }

    pub fn with_cache(mut self, cache: &'a DeparseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn table(&self) -> &Table {
        self.table
    }

    /// Deparse each conjunct on its own and `AND` the ones that translate
    pub fn deparse_conjuncts(&self, conjuncts: &[Expr]) -> Deparsed {
        let mut parts = Vec::new();
        let mut pushed = Vec::with_capacity(conjuncts.len());

        for conjunct in conjuncts {
            match self.deparse(conjunct) {
                Some(fragment) => {
                    parts.push(fragment);
                    pushed.push(true);
                }
                None => pushed.push(false),
            }
        }

        let fragment = (!parts.is_empty()).then(|| parts.join(" AND "));
        trace!(
            "Deparsed {} of {} conjuncts for {}: {:?}",
            parts.len(),
            conjuncts.len(),
            self.table.relation_name(),
            fragment
        );
        Deparsed { fragment, pushed }
    }

    /// OGR SQL fragment equivalent to a boolean expression, or `None`
    pub fn deparse(&self, expr: &Expr) -> Option<String> {
        match self.cache {
            Some(cache) => cache.get_or_deparse(self.table, expr, || self.deparse_bool(expr)),
            None => self.deparse_bool(expr),
        }
    }

    fn deparse_bool(&self, expr: &Expr) -> Option<String> {
        match expr {
            Expr::Compare { op, left, right } => self.deparse_compare(*op, left, right),
            Expr::And(items) => self.deparse_connective(items, "AND"),
            Expr::Or(items) => self.deparse_connective(items, "OR"),
            Expr::Not(inner) => Some(format!("NOT ({})", self.deparse_bool(inner)?)),
            Expr::IsNull { expr, negated } => {
                let Expr::Column(attnum) = &**expr else {
                    return None;
                };
                let column = self.pushable_column(*attnum)?;
                let name = self.column_name(column)?;
                Some(format!(
                    "{} IS {}NULL",
                    name,
                    if *negated { "NOT " } else { "" }
                ))
            }
            // bare columns and constants are not predicates in OGR SQL
            Expr::Column(_) | Expr::Literal(_) | Expr::Opaque(_) => None,
        }
    }

    fn deparse_connective(&self, items: &[Expr], keyword: &str) -> Option<String> {
        match items {
            [] => None,
            [single] => self.deparse_bool(single),
            _ => {
                let parts = items
                    .iter()
                    .map(|item| self.deparse_bool(item))
                    .collect::<Option<Vec<_>>>()?;
                Some(format!("({})", parts.join(&format!(" {} ", keyword))))
            }
        }
    }

    fn deparse_compare(&self, op: CompareOp, left: &Expr, right: &Expr) -> Option<String> {
        let (attnum, op, literal) = match (left, right) {
            (Expr::Column(attnum), Expr::Literal(lit)) => (*attnum, op, lit),
            (Expr::Literal(lit), Expr::Column(attnum)) => (*attnum, op.commute(), lit),
            _ => return None,
        };

        let column = self.pushable_column(attnum)?;
        let category = self.category(column)?;
        if matches!(category, Category::Text | Category::Boolean) && !op.is_equality() {
            return None;
        }

        let value = render_literal(category, literal)?;
        let name = self.column_name(column)?;
        Some(format!("{} {} {}", name, op.as_str(), value))
    }

    /// Columns with an OGR SQL name: ordinary fields and the feature id
    fn pushable_column(&self, attnum: usize) -> Option<&'a Column> {
        let column = self.table.column(attnum)?;
        if column.dropped {
            return None;
        }
        match column.variant {
            ColumnVariant::OrdinaryField { .. } | ColumnVariant::RowIdentifier => Some(column),
            ColumnVariant::Geometry | ColumnVariant::Unmatched => None,
        }
    }

    fn column_name(&self, column: &Column) -> Option<String> {
        match column.variant {
            ColumnVariant::RowIdentifier => Some("FID".to_string()),
            ColumnVariant::OrdinaryField { field_index, .. } => {
                self.table.field_name(field_index).map(quote_identifier)
            }
            _ => None,
        }
    }

    /// Domain shared by the relational column and its OGR field
    ///
    /// Numbers are only pushed when the column holds exactly the value the
    /// field stores; a lossy pairing (`real` over a double field, `double
    /// precision` over a 64-bit integer field) could exclude rows the host
    /// would keep.
    fn category(&self, column: &Column) -> Option<Category> {
        let (field_index, field_type) = match column.variant {
            ColumnVariant::RowIdentifier => return Some(Category::Integral),
            ColumnVariant::OrdinaryField {
                field_index,
                field_type,
            } => (field_index, field_type),
            _ => return None,
        };

        let oid = column.type_oid;
        match field_type {
            ExternalFieldType::Integer if oid == TypeOid::BOOL => Some(Category::Boolean),
            ExternalFieldType::Integer | ExternalFieldType::Integer64
                if oid.is_integer() || oid == TypeOid::NUMERIC =>
            {
                Some(Category::Integral)
            }
            ExternalFieldType::Integer if oid == TypeOid::FLOAT8 => Some(Category::Integral),
            ExternalFieldType::Real if matches!(oid, TypeOid::FLOAT8 | TypeOid::NUMERIC) => {
                Some(Category::Real)
            }
            ExternalFieldType::Real
                if oid == TypeOid::FLOAT4
                    && self.table.field_subtype(field_index) == Some(FieldSubType::Float32) =>
            {
                Some(Category::Real)
            }
            ExternalFieldType::String | ExternalFieldType::WideString if oid.is_varlena_text() => {
                Some(Category::Text)
            }
            _ => None,
        }
    }
}

/// Largest integer magnitude a double holds exactly
const MAX_EXACT_DOUBLE_INT: u64 = 1 << 53;

fn render_literal(category: Category, literal: &Literal) -> Option<String> {
    match (category, literal) {
        (Category::Integral, Literal::Int(v)) => Some(v.to_string()),
        (Category::Integral | Category::Real, Literal::Float(v)) if v.is_finite() => {
            Some(float_literal(*v))
        }
        (Category::Integral, Literal::Numeric(v)) if is_integer_literal(v) => {
            Some(v.trim().trim_start_matches('+').to_string())
        }
        (Category::Real, Literal::Int(v)) if v.unsigned_abs() <= MAX_EXACT_DOUBLE_INT => {
            Some(v.to_string())
        }
        (Category::Real, Literal::Numeric(v)) if is_numeric_literal(v) => {
            exact_double_literal(v.trim())
        }
        (Category::Text, Literal::Text(v)) => Some(escape_string_literal(v)),
        (Category::Boolean, Literal::Bool(v)) => Some((if *v { "1" } else { "0" }).to_string()),
        _ => None,
    }
}

fn is_integer_literal(text: &str) -> bool {
    let digits = text.trim().trim_start_matches(['+', '-']);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// A decimal constant spelled as a double, when the double is the same number
fn exact_double_literal(text: &str) -> Option<String> {
    let value: f64 = text.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    let spelled = float_literal(value);
    let plain = text.trim_start_matches('+');
    (spelled == plain || value.to_string() == plain).then_some(spelled)
}

fn float_literal(value: f64) -> String {
    let text = value.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

/// Quote a string constant, doubling embedded single quotes
pub fn escape_string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

const RESERVED_WORDS: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "case", "cast", "desc", "distinct", "else",
    "end", "escape", "fid", "from", "group", "having", "ilike", "in", "is", "join", "left",
    "like", "limit", "name", "not", "null", "offset", "on", "or", "order", "select", "then",
    "union", "when", "where",
];

/// Field name as an OGR SQL identifier, double-quoted unless it is a plain
/// lower-case name that is not a keyword
pub fn quote_identifier(name: &str) -> String {
    static PLAIN_IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    let re = PLAIN_IDENTIFIER.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap());

    if re.is_match(name) && !RESERVED_WORDS.contains(&name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}
