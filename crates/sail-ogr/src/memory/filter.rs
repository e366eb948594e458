// SPDX-License-Identifier: Apache-2.0

//! Attribute filter evaluation for the in-memory layers
//!
//! Filters are parsed with `sqlparser` and compiled against the layer's
//! field list, so unknown fields and unsupported syntax are rejected when
//! the filter is installed rather than while iterating.

use std::cmp::Ordering;

use sqlparser::ast as sql_ast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::source::{Feature, FieldDefn, FieldValue, SourceError};

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Fid,
    Field(usize),
    Integer(i64),
    Number(f64),
    Text(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Compare(Comparison, Operand, Operand),
    IsNull(Operand, bool),
}

/// A compiled attribute filter
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFilter {
    text: String,
    predicate: Predicate,
}

impl AttributeFilter {
    pub fn parse(text: &str, fields: &[FieldDefn]) -> Result<Self, SourceError> {
        let invalid = |reason: String| SourceError::InvalidFilter {
            filter: text.to_string(),
            reason,
        };

        let dialect = GenericDialect {};
        let expr = Parser::new(&dialect)
            .try_with_sql(text)
            .and_then(|mut parser| parser.parse_expr())
            .map_err(|e| invalid(e.to_string()))?;

        let predicate = compile_predicate(expr, fields).map_err(invalid)?;
        Ok(Self {
            text: text.to_string(),
            predicate,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the feature passes; unknown (null) results do not pass
    pub fn matches(&self, feature: &Feature) -> bool {
        evaluate(&self.predicate, feature) == Some(true)
    }
}

fn compile_predicate(expr: sql_ast::Expr, fields: &[FieldDefn]) -> Result<Predicate, String> {
    match expr {
        sql_ast::Expr::Nested(inner) => compile_predicate(*inner, fields),
        sql_ast::Expr::BinaryOp { left, op, right } => {
            let comparison = match op {
                sql_ast::BinaryOperator::And => {
                    return Ok(Predicate::And(
                        Box::new(compile_predicate(*left, fields)?),
                        Box::new(compile_predicate(*right, fields)?),
                    ))
                }
                sql_ast::BinaryOperator::Or => {
                    return Ok(Predicate::Or(
                        Box::new(compile_predicate(*left, fields)?),
                        Box::new(compile_predicate(*right, fields)?),
                    ))
                }
                sql_ast::BinaryOperator::Eq => Comparison::Eq,
                sql_ast::BinaryOperator::NotEq => Comparison::NotEq,
                sql_ast::BinaryOperator::Lt => Comparison::Lt,
                sql_ast::BinaryOperator::LtEq => Comparison::LtEq,
                sql_ast::BinaryOperator::Gt => Comparison::Gt,
                sql_ast::BinaryOperator::GtEq => Comparison::GtEq,
                other => return Err(format!("unsupported operator {}", other)),
            };
            Ok(Predicate::Compare(
                comparison,
                compile_operand(*left, fields)?,
                compile_operand(*right, fields)?,
            ))
        }
        sql_ast::Expr::UnaryOp {
            op: sql_ast::UnaryOperator::Not,
            expr,
        } => Ok(Predicate::Not(Box::new(compile_predicate(*expr, fields)?))),
        sql_ast::Expr::IsNull(inner) => Ok(Predicate::IsNull(compile_operand(*inner, fields)?, false)),
        sql_ast::Expr::IsNotNull(inner) => {
            Ok(Predicate::IsNull(compile_operand(*inner, fields)?, true))
        }
        other => Err(format!("unsupported expression {}", other)),
    }
}

fn compile_operand(expr: sql_ast::Expr, fields: &[FieldDefn]) -> Result<Operand, String> {
    match expr {
        sql_ast::Expr::Nested(inner) => compile_operand(*inner, fields),
        sql_ast::Expr::Identifier(ident) => {
            // field names are matched case-insensitively, like OGR SQL does
            if let Some(index) = fields.iter().position(|f| f.name == ident.value) {
                return Ok(Operand::Field(index));
            }
            if let Some(index) = fields
                .iter()
                .position(|f| f.name.eq_ignore_ascii_case(&ident.value))
            {
                return Ok(Operand::Field(index));
            }
            if ident.value.eq_ignore_ascii_case("fid") {
                return Ok(Operand::Fid);
            }
            Err(format!("unknown field \"{}\"", ident.value))
        }
        sql_ast::Expr::Value(sql_ast::Value::Number(n, _)) => {
            if let Ok(v) = n.parse::<i64>() {
                return Ok(Operand::Integer(v));
            }
            n.parse()
                .map(Operand::Number)
                .map_err(|_| format!("invalid number {}", n))
        }
        sql_ast::Expr::Value(sql_ast::Value::SingleQuotedString(s)) => Ok(Operand::Text(s)),
        sql_ast::Expr::Value(sql_ast::Value::Null) => Ok(Operand::Null),
        sql_ast::Expr::UnaryOp {
            op: sql_ast::UnaryOperator::Minus,
            expr,
        } => match compile_operand(*expr, fields)? {
            Operand::Integer(n) => Ok(n
                .checked_neg()
                .map_or(Operand::Number(-(n as f64)), Operand::Integer)),
            Operand::Number(n) => Ok(Operand::Number(-n)),
            _ => Err("unary minus on a non-number".to_string()),
        },
        other => Err(format!("unsupported operand {}", other)),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Integer(i64),
    Number(f64),
    Text(String),
}

fn resolve(operand: &Operand, feature: &Feature) -> Option<Scalar> {
    match operand {
        Operand::Fid => feature.fid.map(Scalar::Integer),
        Operand::Field(index) => match feature.field(*index) {
            FieldValue::Null => None,
            FieldValue::Integer(v) => Some(Scalar::Integer(i64::from(*v))),
            FieldValue::Integer64(v) => Some(Scalar::Integer(*v)),
            FieldValue::Real(v) => Some(Scalar::Number(*v)),
            other => other.as_text().map(Scalar::Text),
        },
        Operand::Integer(n) => Some(Scalar::Integer(*n)),
        Operand::Number(n) => Some(Scalar::Number(*n)),
        Operand::Text(s) => Some(Scalar::Text(s.clone())),
        Operand::Null => None,
    }
}

/// Integers compare exactly; a comparison involving a real compares as doubles
fn compare(left: &Scalar, right: &Scalar) -> Option<Ordering> {
    match (left, right) {
        (Scalar::Integer(a), Scalar::Integer(b)) => Some(a.cmp(b)),
        (Scalar::Integer(a), Scalar::Number(b)) => (*a as f64).partial_cmp(b),
        (Scalar::Number(a), Scalar::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Scalar::Number(a), Scalar::Number(b)) => a.partial_cmp(b),
        (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
        (Scalar::Text(a), other) => compare(&numeric_text(a)?, other),
        (other, Scalar::Text(b)) => compare(other, &numeric_text(b)?),
    }
}

fn numeric_text(text: &str) -> Option<Scalar> {
    let text = text.trim();
    match text.parse::<i64>() {
        Ok(v) => Some(Scalar::Integer(v)),
        Err(_) => text.parse().ok().map(Scalar::Number),
    }
}

/// Three-valued evaluation; `None` is unknown
fn evaluate(predicate: &Predicate, feature: &Feature) -> Option<bool> {
    match predicate {
        Predicate::And(a, b) => match (evaluate(a, feature), evaluate(b, feature)) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Predicate::Or(a, b) => match (evaluate(a, feature), evaluate(b, feature)) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        Predicate::Not(inner) => evaluate(inner, feature).map(|v| !v),
        Predicate::IsNull(operand, negated) => {
            Some(resolve(operand, feature).is_none() != *negated)
        }
        Predicate::Compare(op, left, right) => {
            let ordering = compare(&resolve(left, feature)?, &resolve(right, feature)?)?;
            Some(match op {
                Comparison::Eq => ordering == Ordering::Equal,
                Comparison::NotEq => ordering != Ordering::Equal,
                Comparison::Lt => ordering == Ordering::Less,
                Comparison::LtEq => ordering != Ordering::Greater,
                Comparison::Gt => ordering == Ordering::Greater,
                Comparison::GtEq => ordering != Ordering::Less,
            })
        }
    }
}
