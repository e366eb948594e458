// SPDX-License-Identifier: Apache-2.0

//! Relational values exchanged with the host engine

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// One relational value
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    /// Decimal kept in its textual form
    Numeric(String),
    Text(String),
    Bytea(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    /// Well-known binary with the SRID from the column type modifier
    Geometry { srid: i32, wkb: Vec<u8> },
}

/// A relational row; slot `i` holds attribute number `i + 1`, `None` is SQL NULL
pub type Row = Vec<Option<Datum>>;

impl Datum {
    /// Integer value, for feature ids
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int2(v) => Some(*v as i64),
            Datum::Int4(v) => Some(*v as i64),
            Datum::Int8(v) => Some(*v),
            Datum::Numeric(v) => v.parse().ok(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Bool(_) => "boolean",
            Datum::Int2(_) => "smallint",
            Datum::Int4(_) => "integer",
            Datum::Int8(_) => "bigint",
            Datum::Float4(_) => "real",
            Datum::Float8(_) => "double precision",
            Datum::Numeric(_) => "numeric",
            Datum::Text(_) => "text",
            Datum::Bytea(_) => "bytea",
            Datum::Date(_) => "date",
            Datum::Time(_) => "time",
            Datum::Timestamp(_) => "timestamp",
            Datum::Geometry { .. } => "geometry",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_i64() {
        assert_eq!(Datum::Int2(7).as_i64(), Some(7));
        assert_eq!(Datum::Int4(-3).as_i64(), Some(-3));
        assert_eq!(Datum::Int8(1 << 40).as_i64(), Some(1 << 40));
        assert_eq!(Datum::Numeric("12".to_string()).as_i64(), Some(12));
        assert_eq!(Datum::Numeric("1.5".to_string()).as_i64(), None);
        assert_eq!(Datum::Text("12".to_string()).as_i64(), None);
    }
}
