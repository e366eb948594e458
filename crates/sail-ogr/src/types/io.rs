// SPDX-License-Identifier: Apache-2.0

//! Host conversion functions
//!
//! The host engine owns the text and binary forms of its types. The bridge
//! only resolves function identifiers per column and calls through them;
//! [`BuiltinTypeIo`] provides those functions for the builtin scalar types
//! and the registered geometry type.

use std::fmt::Debug;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use super::{Datum, FunctionId, GeometryRegistry, IoFunctions, TypeMod, TypeOid, VARHDRSZ};

/// A value was rejected by a conversion function
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ConversionError(pub String);

impl ConversionError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Direction of a conversion function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoDirection {
    Input,
    Receive,
    Output,
    Send,
}

/// Conversion capability consumed from the host engine
pub trait TypeIo: Send + Sync + Debug {
    /// Conversion functions registered for a type, if any
    fn io_functions(&self, oid: TypeOid) -> Option<IoFunctions>;

    /// Parse a value from its text form
    fn input(&self, func: FunctionId, text: &str, typmod: TypeMod) -> Result<Datum, ConversionError>;

    /// Parse a value from its binary form
    fn receive(&self, func: FunctionId, bytes: &[u8], typmod: TypeMod)
        -> Result<Datum, ConversionError>;

    /// Render a value to its text form
    fn output(&self, func: FunctionId, value: &Datum) -> Result<String, ConversionError>;

    /// Render a value to its binary form
    fn send(&self, func: FunctionId, value: &Datum) -> Result<Vec<u8>, ConversionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Varchar,
    Bpchar,
    Bytea,
    Date,
    Time,
    Timestamp,
    Geometry,
}

const BUILTINS: [Builtin; 15] = [
    Builtin::Bool,
    Builtin::Int2,
    Builtin::Int4,
    Builtin::Int8,
    Builtin::Float4,
    Builtin::Float8,
    Builtin::Numeric,
    Builtin::Text,
    Builtin::Varchar,
    Builtin::Bpchar,
    Builtin::Bytea,
    Builtin::Date,
    Builtin::Time,
    Builtin::Timestamp,
    Builtin::Geometry,
];

const FUNCTION_BASE: u32 = 7000;

const DIRECTIONS: [IoDirection; 4] = [
    IoDirection::Input,
    IoDirection::Receive,
    IoDirection::Output,
    IoDirection::Send,
];

fn function_id(kind: Builtin, direction: IoDirection) -> FunctionId {
    let slot = BUILTINS.iter().position(|b| *b == kind).unwrap_or(0) as u32;
    let dir = DIRECTIONS.iter().position(|d| *d == direction).unwrap_or(0) as u32;
    FunctionId(FUNCTION_BASE + slot * 4 + dir)
}

fn decode_function(func: FunctionId) -> Option<(Builtin, IoDirection)> {
    let offset = func.0.checked_sub(FUNCTION_BASE)? as usize;
    let kind = *BUILTINS.get(offset / 4)?;
    Some((kind, DIRECTIONS[offset % 4]))
}

fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default()
}

/// Conversion functions for the builtin scalar types
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTypeIo {
    registry: GeometryRegistry,
}

impl BuiltinTypeIo {
    pub fn new(registry: GeometryRegistry) -> Self {
        Self { registry }
    }

    fn kind_of(&self, oid: TypeOid) -> Option<Builtin> {
        if self.registry.is_geometry(oid) {
            return Some(Builtin::Geometry);
        }
        let kind = match oid {
            TypeOid::BOOL => Builtin::Bool,
            TypeOid::INT2 => Builtin::Int2,
            TypeOid::INT4 => Builtin::Int4,
            TypeOid::INT8 => Builtin::Int8,
            TypeOid::FLOAT4 => Builtin::Float4,
            TypeOid::FLOAT8 => Builtin::Float8,
            TypeOid::NUMERIC => Builtin::Numeric,
            TypeOid::TEXT => Builtin::Text,
            TypeOid::VARCHAR => Builtin::Varchar,
            TypeOid::BPCHAR => Builtin::Bpchar,
            TypeOid::BYTEA => Builtin::Bytea,
            TypeOid::DATE => Builtin::Date,
            TypeOid::TIME => Builtin::Time,
            TypeOid::TIMESTAMP => Builtin::Timestamp,
            _ => return None,
        };
        Some(kind)
    }

    fn resolve(&self, func: FunctionId, expected: IoDirection) -> Result<Builtin, ConversionError> {
        match decode_function(func) {
            Some((kind, direction)) if direction == expected => Ok(kind),
            Some((_, direction)) => Err(ConversionError::new(format!(
                "{} is a {:?} function, not {:?}",
                func, direction, expected
            ))),
            None => Err(ConversionError::new(format!("unknown conversion function {}", func))),
        }
    }
}

impl TypeIo for BuiltinTypeIo {
    fn io_functions(&self, oid: TypeOid) -> Option<IoFunctions> {
        let kind = self.kind_of(oid)?;
        Some(IoFunctions {
            input: function_id(kind, IoDirection::Input),
            receive: function_id(kind, IoDirection::Receive),
            output: function_id(kind, IoDirection::Output),
            send: function_id(kind, IoDirection::Send),
        })
    }

    fn input(&self, func: FunctionId, text: &str, typmod: TypeMod) -> Result<Datum, ConversionError> {
        match self.resolve(func, IoDirection::Input)? {
            Builtin::Bool => parse_bool(text).map(Datum::Bool),
            Builtin::Int2 => parse_int::<i16>(text, "smallint").map(Datum::Int2),
            Builtin::Int4 => parse_int::<i32>(text, "integer").map(Datum::Int4),
            Builtin::Int8 => parse_int::<i64>(text, "bigint").map(Datum::Int8),
            Builtin::Float4 => parse_float(text, "real").map(|v| Datum::Float4(v as f32)),
            Builtin::Float8 => parse_float(text, "double precision").map(Datum::Float8),
            Builtin::Numeric => parse_numeric(text).map(Datum::Numeric),
            Builtin::Text => Ok(Datum::Text(text.to_string())),
            Builtin::Varchar => check_length(text, typmod, "character varying").map(Datum::Text),
            Builtin::Bpchar => pad_bpchar(text, typmod).map(Datum::Text),
            Builtin::Bytea => parse_bytea(text).map(Datum::Bytea),
            Builtin::Date => parse_date(text).map(Datum::Date),
            Builtin::Time => parse_time(text).map(Datum::Time),
            Builtin::Timestamp => parse_timestamp(text).map(Datum::Timestamp),
            Builtin::Geometry => {
                let wkb = hex::decode(text.trim())
                    .map_err(|_| ConversionError::new(format!("invalid geometry: \"{}\"", text)))?;
                Ok(Datum::Geometry {
                    srid: typmod_srid(typmod),
                    wkb,
                })
            }
        }
    }

    fn receive(
        &self,
        func: FunctionId,
        bytes: &[u8],
        typmod: TypeMod,
    ) -> Result<Datum, ConversionError> {
        let kind = self.resolve(func, IoDirection::Receive)?;
        match kind {
            Builtin::Bool => match bytes {
                [b] => Ok(Datum::Bool(*b != 0)),
                _ => Err(wrong_length("boolean", bytes.len())),
            },
            Builtin::Int2 => fixed::<2>(bytes, "smallint").map(|b| Datum::Int2(i16::from_be_bytes(b))),
            Builtin::Int4 => fixed::<4>(bytes, "integer").map(|b| Datum::Int4(i32::from_be_bytes(b))),
            Builtin::Int8 => fixed::<8>(bytes, "bigint").map(|b| Datum::Int8(i64::from_be_bytes(b))),
            Builtin::Float4 => fixed::<4>(bytes, "real").map(|b| Datum::Float4(f32::from_be_bytes(b))),
            Builtin::Float8 => {
                fixed::<8>(bytes, "double precision").map(|b| Datum::Float8(f64::from_be_bytes(b)))
            }
            Builtin::Bytea => Ok(Datum::Bytea(bytes.to_vec())),
            Builtin::Date => fixed::<4>(bytes, "date").and_then(|b| {
                epoch_date()
                    .checked_add_signed(Duration::days(i32::from_be_bytes(b) as i64))
                    .map(Datum::Date)
                    .ok_or_else(|| ConversionError::new("date out of range"))
            }),
            Builtin::Time => fixed::<8>(bytes, "time").and_then(|b| {
                let micros = i64::from_be_bytes(b);
                NaiveTime::from_num_seconds_from_midnight_opt(
                    (micros / 1_000_000) as u32,
                    ((micros % 1_000_000) * 1_000) as u32,
                )
                .map(Datum::Time)
                .ok_or_else(|| ConversionError::new("time out of range"))
            }),
            Builtin::Timestamp => fixed::<8>(bytes, "timestamp").and_then(|b| {
                epoch_date()
                    .and_hms_opt(0, 0, 0)
                    .and_then(|epoch| {
                        epoch.checked_add_signed(Duration::microseconds(i64::from_be_bytes(b)))
                    })
                    .map(Datum::Timestamp)
                    .ok_or_else(|| ConversionError::new("timestamp out of range"))
            }),
            Builtin::Geometry => Ok(Datum::Geometry {
                srid: typmod_srid(typmod),
                wkb: bytes.to_vec(),
            }),
            Builtin::Numeric | Builtin::Text | Builtin::Varchar | Builtin::Bpchar => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| ConversionError::new(format!("invalid UTF-8: {}", e)))?;
                self.input(function_id(kind, IoDirection::Input), text, typmod)
            }
        }
    }

    fn output(&self, func: FunctionId, value: &Datum) -> Result<String, ConversionError> {
        let kind = self.resolve(func, IoDirection::Output)?;
        let text = match (kind, value) {
            (Builtin::Bool, Datum::Bool(v)) => (if *v { "t" } else { "f" }).to_string(),
            (Builtin::Int2, Datum::Int2(v)) => v.to_string(),
            (Builtin::Int4, Datum::Int4(v)) => v.to_string(),
            (Builtin::Int8, Datum::Int8(v)) => v.to_string(),
            (Builtin::Float4, Datum::Float4(v)) => format_float(*v as f64, v.to_string()),
            (Builtin::Float8, Datum::Float8(v)) => format_float(*v, v.to_string()),
            (Builtin::Numeric, Datum::Numeric(v)) => v.clone(),
            (Builtin::Text | Builtin::Varchar | Builtin::Bpchar, Datum::Text(v)) => v.clone(),
            (Builtin::Bytea, Datum::Bytea(v)) => format!("\\x{}", hex::encode(v)),
            (Builtin::Date, Datum::Date(v)) => v.format("%Y-%m-%d").to_string(),
            (Builtin::Time, Datum::Time(v)) => v.format("%H:%M:%S%.f").to_string(),
            (Builtin::Timestamp, Datum::Timestamp(v)) => v.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            (Builtin::Geometry, Datum::Geometry { wkb, .. }) => hex::encode(wkb),
            (_, other) => {
                return Err(ConversionError::new(format!(
                    "{} cannot render a {} value",
                    func,
                    other.type_name()
                )))
            }
        };
        Ok(text)
    }

    fn send(&self, func: FunctionId, value: &Datum) -> Result<Vec<u8>, ConversionError> {
        let kind = self.resolve(func, IoDirection::Send)?;
        let bytes = match (kind, value) {
            (Builtin::Bool, Datum::Bool(v)) => vec![*v as u8],
            (Builtin::Int2, Datum::Int2(v)) => v.to_be_bytes().to_vec(),
            (Builtin::Int4, Datum::Int4(v)) => v.to_be_bytes().to_vec(),
            (Builtin::Int8, Datum::Int8(v)) => v.to_be_bytes().to_vec(),
            (Builtin::Float4, Datum::Float4(v)) => v.to_be_bytes().to_vec(),
            (Builtin::Float8, Datum::Float8(v)) => v.to_be_bytes().to_vec(),
            (Builtin::Numeric, Datum::Numeric(v)) => v.as_bytes().to_vec(),
            (Builtin::Text | Builtin::Varchar | Builtin::Bpchar, Datum::Text(v)) => {
                v.as_bytes().to_vec()
            }
            (Builtin::Bytea, Datum::Bytea(v)) => v.clone(),
            (Builtin::Date, Datum::Date(v)) => {
                let days = v.signed_duration_since(epoch_date()).num_days() as i32;
                days.to_be_bytes().to_vec()
            }
            (Builtin::Time, Datum::Time(v)) => {
                let micros = v.num_seconds_from_midnight() as i64 * 1_000_000
                    + (v.nanosecond() / 1_000) as i64;
                micros.to_be_bytes().to_vec()
            }
            (Builtin::Timestamp, Datum::Timestamp(v)) => {
                let epoch = epoch_date().and_hms_opt(0, 0, 0).unwrap_or_default();
                let micros = v
                    .signed_duration_since(epoch)
                    .num_microseconds()
                    .ok_or_else(|| ConversionError::new("timestamp out of range"))?;
                micros.to_be_bytes().to_vec()
            }
            (Builtin::Geometry, Datum::Geometry { wkb, .. }) => wkb.clone(),
            (_, other) => {
                return Err(ConversionError::new(format!(
                    "{} cannot render a {} value",
                    func,
                    other.type_name()
                )))
            }
        };
        Ok(bytes)
    }
}

/// SRID stored in a geometry type modifier
pub fn typmod_srid(typmod: TypeMod) -> i32 {
    if typmod < 0 {
        return 0;
    }
    (typmod & 0x0FFF_FF00) >> 8
}

fn wrong_length(type_name: &str, len: usize) -> ConversionError {
    ConversionError::new(format!("invalid binary length {} for type {}", len, type_name))
}

fn fixed<const N: usize>(bytes: &[u8], type_name: &str) -> Result<[u8; N], ConversionError> {
    bytes.try_into().map_err(|_| wrong_length(type_name, bytes.len()))
}

fn invalid(type_name: &str, text: &str) -> ConversionError {
    ConversionError::new(format!(
        "invalid input syntax for type {}: \"{}\"",
        type_name, text
    ))
}

fn parse_bool(text: &str) -> Result<bool, ConversionError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "yes" | "on" | "1" => Ok(true),
        "f" | "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid("boolean", text)),
    }
}

fn parse_int<T: std::str::FromStr>(text: &str, type_name: &str) -> Result<T, ConversionError> {
    text.trim().parse().map_err(|_| invalid(type_name, text))
}

fn parse_float(text: &str, type_name: &str) -> Result<f64, ConversionError> {
    match text.trim() {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        s => s.parse().map_err(|_| invalid(type_name, text)),
    }
}

fn format_float(value: f64, finite: String) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        (if value > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
    } else {
        finite
    }
}

fn numeric_regex() -> &'static Regex {
    static NUMERIC_REGEX: OnceLock<Regex> = OnceLock::new();
    NUMERIC_REGEX.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").unwrap()
    })
}

/// Validate a decimal literal
pub fn is_numeric_literal(text: &str) -> bool {
    numeric_regex().is_match(text)
}

fn parse_numeric(text: &str) -> Result<String, ConversionError> {
    let trimmed = text.trim();
    if trimmed == "NaN" {
        return Ok(trimmed.to_string());
    }
    if !is_numeric_literal(trimmed) {
        return Err(invalid("numeric", text));
    }
    Ok(trimmed.trim_start_matches('+').to_string())
}

fn max_chars(typmod: TypeMod) -> Option<usize> {
    (typmod >= VARHDRSZ).then(|| (typmod - VARHDRSZ) as usize)
}

fn check_length(text: &str, typmod: TypeMod, type_name: &str) -> Result<String, ConversionError> {
    if let Some(limit) = max_chars(typmod) {
        if text.chars().count() > limit {
            return Err(ConversionError::new(format!(
                "value too long for type {}({})",
                type_name, limit
            )));
        }
    }
    Ok(text.to_string())
}

fn pad_bpchar(text: &str, typmod: TypeMod) -> Result<String, ConversionError> {
    let Some(limit) = max_chars(typmod) else {
        return Ok(text.to_string());
    };
    let trimmed = text.trim_end_matches(' ');
    let len = trimmed.chars().count();
    if len > limit {
        return Err(ConversionError::new(format!(
            "value too long for type character({})",
            limit
        )));
    }
    let mut padded = trimmed.to_string();
    padded.extend(std::iter::repeat(' ').take(limit - len));
    Ok(padded)
}

fn parse_bytea(text: &str) -> Result<Vec<u8>, ConversionError> {
    match text.strip_prefix("\\x") {
        Some(digits) => hex::decode(digits).map_err(|_| invalid("bytea", text)),
        None => Ok(text.as_bytes().to_vec()),
    }
}

fn parse_date(text: &str) -> Result<NaiveDate, ConversionError> {
    let trimmed = text.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y/%m/%d"))
        .or_else(|_| parse_timestamp(trimmed).map(|ts| ts.date()))
        .map_err(|_| invalid("date", text))
}

fn parse_time(text: &str) -> Result<NaiveTime, ConversionError> {
    let trimmed = text.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| invalid("time", text))
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime, ConversionError> {
    let trimmed = text.trim();
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    for format in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y/%m/%d"))
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| invalid("timestamp", text))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: TypeOid = TypeOid(90001);

    fn io() -> BuiltinTypeIo {
        BuiltinTypeIo::new(GeometryRegistry::new(GEOMETRY))
    }

    fn text_round_trip(oid: TypeOid, typmod: TypeMod, text: &str) -> Datum {
        let io = io();
        let funcs = io.io_functions(oid).unwrap();
        let value = io.input(funcs.input, text, typmod).unwrap();
        let rendered = io.output(funcs.output, &value).unwrap();
        let again = io.input(funcs.input, &rendered, typmod).unwrap();
        assert_eq!(value, again, "{} via \"{}\"", text, rendered);
        value
    }

    #[test]
    fn test_text_round_trip_scalars() {
        assert_eq!(text_round_trip(TypeOid::BOOL, -1, "true"), Datum::Bool(true));
        assert_eq!(text_round_trip(TypeOid::INT2, -1, "-12"), Datum::Int2(-12));
        assert_eq!(text_round_trip(TypeOid::INT4, -1, " 42 "), Datum::Int4(42));
        assert_eq!(text_round_trip(TypeOid::INT8, -1, "9007199254740993"), Datum::Int8(9007199254740993));
        assert_eq!(text_round_trip(TypeOid::FLOAT8, -1, "0.1"), Datum::Float8(0.1));
        assert_eq!(text_round_trip(TypeOid::FLOAT8, -1, "1e300"), Datum::Float8(1e300));
        assert_eq!(text_round_trip(TypeOid::FLOAT4, -1, "3.25"), Datum::Float4(3.25));
        assert_eq!(
            text_round_trip(TypeOid::NUMERIC, -1, "+123.4500"),
            Datum::Numeric("123.4500".to_string())
        );
        assert_eq!(
            text_round_trip(TypeOid::TEXT, -1, "O'Hare"),
            Datum::Text("O'Hare".to_string())
        );
        assert_eq!(
            text_round_trip(TypeOid::BYTEA, -1, "\\x00ff10"),
            Datum::Bytea(vec![0x00, 0xff, 0x10])
        );
    }

    #[test]
    fn test_text_round_trip_date_time() {
        assert_eq!(
            text_round_trip(TypeOid::DATE, -1, "2015-06-30"),
            Datum::Date(NaiveDate::from_ymd_opt(2015, 6, 30).unwrap())
        );
        text_round_trip(TypeOid::DATE, -1, "2015/06/30");
        text_round_trip(TypeOid::TIME, -1, "23:59:58");
        text_round_trip(TypeOid::TIME, -1, "08:15:00.125");
        text_round_trip(TypeOid::TIMESTAMP, -1, "2015-06-30 23:59:58.5");
        text_round_trip(TypeOid::TIMESTAMP, -1, "2015-06-30T01:02:03");
    }

    #[test]
    fn test_float_special_values() {
        let io = io();
        let funcs = io.io_functions(TypeOid::FLOAT8).unwrap();
        let inf = io.input(funcs.input, "-Infinity", -1).unwrap();
        assert_eq!(io.output(funcs.output, &inf).unwrap(), "-Infinity");
        let nan = io.input(funcs.input, "NaN", -1).unwrap();
        assert_eq!(io.output(funcs.output, &nan).unwrap(), "NaN");
    }

    #[test]
    fn test_binary_round_trip() {
        let io = io();
        let values = [
            (TypeOid::BOOL, Datum::Bool(false)),
            (TypeOid::INT4, Datum::Int4(-77)),
            (TypeOid::INT8, Datum::Int8(1 << 50)),
            (TypeOid::FLOAT8, Datum::Float8(-2.5)),
            (TypeOid::TEXT, Datum::Text("Zürich".to_string())),
            (TypeOid::DATE, Datum::Date(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap())),
            (TypeOid::TIME, Datum::Time(NaiveTime::from_hms_micro_opt(12, 0, 1, 250).unwrap())),
            (
                TypeOid::TIMESTAMP,
                Datum::Timestamp(
                    NaiveDate::from_ymd_opt(2021, 3, 4)
                        .unwrap()
                        .and_hms_micro_opt(5, 6, 7, 8)
                        .unwrap(),
                ),
            ),
        ];
        for (oid, value) in values {
            let funcs = io.io_functions(oid).unwrap();
            let bytes = io.send(funcs.send, &value).unwrap();
            assert_eq!(io.receive(funcs.receive, &bytes, -1).unwrap(), value);
        }
    }

    #[test]
    fn test_geometry_srid_from_typmod() {
        let io = io();
        let funcs = io.io_functions(GEOMETRY).unwrap();
        let typmod = (4326 << 8) | 1;
        let value = io.receive(funcs.receive, &[1, 1, 0, 0, 0], typmod).unwrap();
        assert_eq!(
            value,
            Datum::Geometry {
                srid: 4326,
                wkb: vec![1, 1, 0, 0, 0]
            }
        );
        assert_eq!(io.output(funcs.output, &value).unwrap(), "0101000000");
        assert_eq!(typmod_srid(-1), 0);
    }

    #[test]
    fn test_hex_text_forms() {
        let io = io();
        let bytea = io.io_functions(TypeOid::BYTEA).unwrap();
        let value = io.input(bytea.input, "\\xDEADbeef", -1).unwrap();
        assert_eq!(value, Datum::Bytea(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(io.output(bytea.output, &value).unwrap(), "\\xdeadbeef");
        assert!(io.input(bytea.input, "\\xabc", -1).is_err());
        assert!(io.input(bytea.input, "\\xzz", -1).is_err());

        let geometry = io.io_functions(GEOMETRY).unwrap();
        assert_eq!(
            io.input(geometry.input, " 0101000000 ", -1).unwrap(),
            Datum::Geometry {
                srid: 0,
                wkb: vec![1, 1, 0, 0, 0]
            }
        );
        assert!(io.input(geometry.input, "01010", -1).is_err());
    }

    #[test]
    fn test_length_limits() {
        let io = io();
        let varchar = io.io_functions(TypeOid::VARCHAR).unwrap();
        assert!(io.input(varchar.input, "abcd", 4 + 4).is_ok());
        let err = io.input(varchar.input, "abcde", 4 + 4).unwrap_err();
        assert!(err.to_string().contains("character varying(4)"));

        let bpchar = io.io_functions(TypeOid::BPCHAR).unwrap();
        assert_eq!(
            io.input(bpchar.input, "ab", 4 + 4).unwrap(),
            Datum::Text("ab  ".to_string())
        );
    }

    #[test]
    fn test_invalid_input() {
        let io = io();
        let int4 = io.io_functions(TypeOid::INT4).unwrap();
        let err = io.input(int4.input, "12abc", -1).unwrap_err();
        assert!(err.to_string().contains("integer"));

        let numeric = io.io_functions(TypeOid::NUMERIC).unwrap();
        assert!(io.input(numeric.input, "1.2.3", -1).is_err());
    }

    #[test]
    fn test_function_direction_is_checked() {
        let io = io();
        let funcs = io.io_functions(TypeOid::INT4).unwrap();
        assert!(io.input(funcs.output, "1", -1).is_err());
        assert!(io.output(funcs.output, &Datum::Text("1".to_string())).is_err());
        assert!(io.input(FunctionId(1), "1", -1).is_err());
    }

    #[test]
    fn test_unknown_types_have_no_functions() {
        let io = BuiltinTypeIo::new(GeometryRegistry::without_geometry());
        assert!(io.io_functions(GEOMETRY).is_none());
        assert!(io.io_functions(TypeOid(4242)).is_none());
        assert!(io.io_functions(TypeOid::TIMESTAMP).is_some());
    }
}
