// SPDX-License-Identifier: Apache-2.0

//! Capability interface consumed from the OGR geodata layer
//!
//! The bridge never talks to a driver implementation directly. A [`Driver`]
//! opens a [`DataSource`], which hands out [`Layer`]s; everything the
//! planning, scan and modify phases need goes through these traits.

use std::fmt::{self, Debug};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

use crate::types::ExternalFieldType;

/// Errors reported by the external layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The data source could not be opened
    #[error("{0}")]
    Open(String),

    /// The layer does not support the requested operation
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// The layer was opened read-only
    #[error("layer \"{0}\" is opened read-only")]
    ReadOnly(String),

    /// No feature with the given id
    #[error("feature {0} not found")]
    FeatureNotFound(i64),

    /// The attribute filter was rejected
    #[error("invalid attribute filter \"{filter}\": {reason}")]
    InvalidFilter { filter: String, reason: String },

    /// A field value could not be parsed for its field type
    #[error("invalid value \"{value}\" for {field_type} field")]
    InvalidValue {
        value: String,
        field_type: ExternalFieldType,
    },

    /// Any other driver failure
    #[error("{0}")]
    Failed(String),
}

/// Everything needed to open a data source
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpenRequest {
    /// Connection string (file path, URL, database DSN)
    pub datasource: String,
    /// Driver short name; `None` lets the library pick one
    pub format: Option<String>,
    /// Library configuration options applied before opening
    pub config_options: Vec<(String, String)>,
    /// Driver-specific open options
    pub open_options: Vec<(String, String)>,
    /// Open for writing
    pub update: bool,
}

/// Opens data sources
pub trait Driver: Send + Sync + Debug {
    fn open(&self, request: &OpenRequest) -> Result<Box<dyn DataSource>, SourceError>;
}

/// An open data source; dropping it closes it
pub trait DataSource {
    fn name(&self) -> &str;

    fn layer_names(&self) -> Vec<String>;

    /// Layer handle by name; the handle must not outlive the data source
    fn layer_by_name(&mut self, name: &str) -> Option<Box<dyn Layer>>;
}

/// Optional layer features, tested before use
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum LayerCapability {
    /// Feature count without a full scan
    FastFeatureCount,
    /// Create new features
    SequentialWrite,
    /// Rewrite existing features by id
    RandomWrite,
    /// Delete features by id
    DeleteFeature,
    /// Skip reading selected fields
    IgnoreFields,
}

impl fmt::Display for LayerCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerCapability::FastFeatureCount => "FastFeatureCount",
            LayerCapability::SequentialWrite => "SequentialWrite",
            LayerCapability::RandomWrite => "RandomWrite",
            LayerCapability::DeleteFeature => "DeleteFeature",
            LayerCapability::IgnoreFields => "IgnoreFields",
        };
        write!(f, "{}", name)
    }
}

/// One feature layer of a data source
pub trait Layer {
    fn name(&self) -> &str;

    /// Ordered field descriptors; the position is the field index
    fn field_defns(&self) -> Vec<FieldDefn>;

    fn test_capability(&self, capability: LayerCapability) -> bool;

    /// Feature count honoring the active filter; `None` when unknown and `force` is false
    fn feature_count(&self, force: bool) -> Option<u64>;

    /// Install (or clear) the attribute filter, in the layer's query language
    fn set_attribute_filter(&mut self, filter: Option<&str>) -> Result<(), SourceError>;

    /// Fields the reader may skip; they come back null
    fn set_ignored_fields(&mut self, _fields: &[String]) -> Result<(), SourceError> {
        Err(SourceError::Unsupported(LayerCapability::IgnoreFields.to_string()))
    }

    /// Restart iteration from the first feature
    fn reset_reading(&mut self);

    /// Next feature passing the filter, `None` once exhausted
    fn next_feature(&mut self) -> Result<Option<Feature>, SourceError>;

    fn get_feature(&mut self, fid: i64) -> Result<Option<Feature>, SourceError>;

    /// Write a new feature, returning its assigned id
    fn create_feature(&mut self, feature: Feature) -> Result<i64, SourceError>;

    /// Rewrite the feature with the same id
    fn set_feature(&mut self, feature: Feature) -> Result<(), SourceError>;

    fn delete_feature(&mut self, fid: i64) -> Result<(), SourceError>;
}

/// Field subtypes refining the storage type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FieldSubType {
    #[default]
    None,
    Boolean,
    Int16,
    Float32,
}

/// Field descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefn {
    pub name: String,
    pub field_type: ExternalFieldType,
    pub subtype: FieldSubType,
    /// Formatting width; `0` when unbounded
    pub width: u32,
    pub precision: u32,
}

impl FieldDefn {
    pub fn new(name: impl Into<String>, field_type: ExternalFieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            subtype: FieldSubType::None,
            width: 0,
            precision: 0,
        }
    }

    pub fn with_subtype(mut self, subtype: FieldSubType) -> Self {
        self.subtype = subtype;
        self
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }
}

/// One field value of a feature
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i32),
    Integer64(i64),
    Real(f64),
    String(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    IntegerList(Vec<i32>),
    Integer64List(Vec<i64>),
    RealList(Vec<f64>),
    StringList(Vec<String>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Text form of the value, as the relational text parsers accept it
    ///
    /// Lists render as array literals (`{1,2,3}`).
    pub fn as_text(&self) -> Option<String> {
        let text = match self {
            FieldValue::Null => return None,
            FieldValue::Integer(v) => v.to_string(),
            FieldValue::Integer64(v) => v.to_string(),
            FieldValue::Real(v) => real_text(*v),
            FieldValue::String(v) => v.clone(),
            FieldValue::Binary(v) => format!("\\x{}", hex::encode(v)),
            FieldValue::Date(v) => v.format("%Y-%m-%d").to_string(),
            FieldValue::Time(v) => v.format("%H:%M:%S%.f").to_string(),
            FieldValue::DateTime(v) => v.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            FieldValue::IntegerList(v) => array_literal(v.iter().map(|i| i.to_string())),
            FieldValue::Integer64List(v) => array_literal(v.iter().map(|i| i.to_string())),
            FieldValue::RealList(v) => array_literal(v.iter().map(|r| real_text(*r))),
            FieldValue::StringList(v) => array_literal(v.iter().map(|s| quote_element(s))),
        };
        Some(text)
    }

    /// Parse a text value for a field type, the way the layer's set-field-from-string does
    pub fn from_text(field_type: ExternalFieldType, text: &str) -> Result<FieldValue, SourceError> {
        let invalid = || SourceError::InvalidValue {
            value: text.to_string(),
            field_type,
        };
        let trimmed = text.trim();
        let value = match field_type {
            ExternalFieldType::Integer => FieldValue::Integer(trimmed.parse().map_err(|_| invalid())?),
            ExternalFieldType::Integer64 => {
                FieldValue::Integer64(trimmed.parse().map_err(|_| invalid())?)
            }
            ExternalFieldType::Real => FieldValue::Real(parse_real(trimmed).ok_or_else(invalid)?),
            ExternalFieldType::String | ExternalFieldType::WideString => {
                FieldValue::String(text.to_string())
            }
            ExternalFieldType::Binary => FieldValue::Binary(text.as_bytes().to_vec()),
            ExternalFieldType::Date => FieldValue::Date(
                NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                    .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y/%m/%d"))
                    .map_err(|_| invalid())?,
            ),
            ExternalFieldType::Time => FieldValue::Time(
                NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f").map_err(|_| invalid())?,
            ),
            ExternalFieldType::DateTime => FieldValue::DateTime(
                NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
                    .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y/%m/%d %H:%M:%S%.f"))
                    .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f"))
                    .map_err(|_| invalid())?,
            ),
            ExternalFieldType::IntegerList => FieldValue::IntegerList(
                split_array(trimmed)
                    .ok_or_else(invalid)?
                    .iter()
                    .map(|s| s.parse().map_err(|_| invalid()))
                    .collect::<Result<_, _>>()?,
            ),
            ExternalFieldType::Integer64List => FieldValue::Integer64List(
                split_array(trimmed)
                    .ok_or_else(invalid)?
                    .iter()
                    .map(|s| s.parse().map_err(|_| invalid()))
                    .collect::<Result<_, _>>()?,
            ),
            ExternalFieldType::RealList => FieldValue::RealList(
                split_array(trimmed)
                    .ok_or_else(invalid)?
                    .iter()
                    .map(|s| parse_real(s).ok_or_else(invalid))
                    .collect::<Result<_, _>>()?,
            ),
            ExternalFieldType::StringList | ExternalFieldType::WideStringList => {
                FieldValue::StringList(split_array(trimmed).ok_or_else(invalid)?)
            }
        };
        Ok(value)
    }
}

fn parse_real(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        s => s.parse().ok(),
    }
}

fn real_text(value: f64) -> String {
    if value.is_infinite() {
        (if value > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
    } else {
        value.to_string()
    }
}

fn array_literal(elements: impl Iterator<Item = String>) -> String {
    format!("{{{}}}", elements.collect::<Vec<_>>().join(","))
}

fn quote_element(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Split `{a,"b c",d}` into its elements
fn split_array(text: &str) -> Option<Vec<String>> {
    let inner = text.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() {
        return Some(Vec::new());
    }

    let mut elements = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' if quoted => current.push(chars.next()?),
            '"' => quoted = !quoted,
            ',' if !quoted => elements.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    if quoted {
        return None;
    }
    elements.push(current);
    Some(elements)
}

/// One record of a layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Feature {
    /// Feature id; `None` until the layer assigns one
    pub fid: Option<i64>,
    /// Geometry as well-known binary
    pub geometry: Option<Vec<u8>>,
    /// Values in field-index order
    pub fields: Vec<FieldValue>,
}

impl Feature {
    /// Feature with all fields null
    pub fn new(field_count: usize) -> Self {
        Self {
            fid: None,
            geometry: None,
            fields: vec![FieldValue::Null; field_count],
        }
    }

    pub fn with_fid(mut self, fid: i64) -> Self {
        self.fid = Some(fid);
        self
    }

    pub fn with_geometry(mut self, wkb: Vec<u8>) -> Self {
        self.geometry = Some(wkb);
        self
    }

    pub fn with_field(mut self, index: usize, value: FieldValue) -> Self {
        if index >= self.fields.len() {
            self.fields.resize(index + 1, FieldValue::Null);
        }
        self.fields[index] = value;
        self
    }

    pub fn field(&self, index: usize) -> &FieldValue {
        static NULL: FieldValue = FieldValue::Null;
        self.fields.get(index).unwrap_or(&NULL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_forms() {
        assert_eq!(FieldValue::Integer(5).as_text(), Some("5".to_string()));
        assert_eq!(FieldValue::Real(2.5).as_text(), Some("2.5".to_string()));
        assert_eq!(FieldValue::Null.as_text(), None);
        assert_eq!(
            FieldValue::Date(NaiveDate::from_ymd_opt(2020, 2, 29).unwrap()).as_text(),
            Some("2020-02-29".to_string())
        );
        assert_eq!(
            FieldValue::IntegerList(vec![1, 2, 3]).as_text(),
            Some("{1,2,3}".to_string())
        );
        assert_eq!(
            FieldValue::StringList(vec!["a b".to_string(), "c\"d".to_string()]).as_text(),
            Some("{\"a b\",\"c\\\"d\"}".to_string())
        );
    }

    #[test]
    fn test_from_text() {
        assert_eq!(
            FieldValue::from_text(ExternalFieldType::Integer, " 12 ").unwrap(),
            FieldValue::Integer(12)
        );
        assert_eq!(
            FieldValue::from_text(ExternalFieldType::Date, "2020/02/29").unwrap(),
            FieldValue::Date(NaiveDate::from_ymd_opt(2020, 2, 29).unwrap())
        );
        assert!(matches!(
            FieldValue::from_text(ExternalFieldType::Integer, "twelve"),
            Err(SourceError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_list_text_round_trip() {
        let values = [
            FieldValue::IntegerList(vec![-1, 0, 7]),
            FieldValue::RealList(vec![0.5, 1e10]),
            FieldValue::StringList(vec!["x,y".to_string(), "".to_string(), "q\"".to_string()]),
            FieldValue::StringList(vec![]),
        ];
        let types = [
            ExternalFieldType::IntegerList,
            ExternalFieldType::RealList,
            ExternalFieldType::StringList,
            ExternalFieldType::StringList,
        ];
        for (value, ty) in values.iter().zip(types) {
            let text = value.as_text().unwrap();
            assert_eq!(&FieldValue::from_text(ty, &text).unwrap(), value, "{}", text);
        }
    }

    #[test]
    fn test_feature_builder() {
        let feature = Feature::new(2)
            .with_fid(9)
            .with_field(3, FieldValue::Integer(1));
        assert_eq!(feature.fid, Some(9));
        assert_eq!(feature.fields.len(), 4);
        assert_eq!(feature.field(3), &FieldValue::Integer(1));
        assert_eq!(feature.field(10), &FieldValue::Null);
    }
}
