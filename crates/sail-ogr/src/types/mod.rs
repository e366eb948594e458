// SPDX-License-Identifier: Apache-2.0

//! Type mappings between OGR field types and relational column types
//!
//! The catalog answers three questions for the schema binder and the
//! conversion paths:
//!
//! - which OGR field type best stores a relational type (write path, schema inference)
//! - which relational type best represents an OGR field (schema inference)
//! - whether an existing pair can exchange values at all (binding)
//!
//! Values cross the boundary through the host's per-type conversion
//! functions, resolved once per column into [`IoFunctions`].

pub(crate) mod convert;
pub mod datum;
pub mod io;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::source::{FieldDefn, FieldSubType};

pub use datum::{Datum, Row};
pub use io::{BuiltinTypeIo, ConversionError, IoDirection, TypeIo};

/// Relational type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeOid(pub u32);

impl TypeOid {
    pub const BOOL: TypeOid = TypeOid(16);
    pub const BYTEA: TypeOid = TypeOid(17);
    pub const INT8: TypeOid = TypeOid(20);
    pub const INT2: TypeOid = TypeOid(21);
    pub const INT4: TypeOid = TypeOid(23);
    pub const TEXT: TypeOid = TypeOid(25);
    pub const FLOAT4: TypeOid = TypeOid(700);
    pub const FLOAT8: TypeOid = TypeOid(701);
    pub const BPCHAR: TypeOid = TypeOid(1042);
    pub const VARCHAR: TypeOid = TypeOid(1043);
    pub const DATE: TypeOid = TypeOid(1082);
    pub const TIME: TypeOid = TypeOid(1083);
    pub const TIMESTAMP: TypeOid = TypeOid(1114);
    pub const NUMERIC: TypeOid = TypeOid(1700);

    /// Builtin type name, if this is one of the builtin scalar types
    pub fn builtin_name(&self) -> Option<&'static str> {
        let name = match *self {
            TypeOid::BOOL => "boolean",
            TypeOid::BYTEA => "bytea",
            TypeOid::INT8 => "bigint",
            TypeOid::INT2 => "smallint",
            TypeOid::INT4 => "integer",
            TypeOid::TEXT => "text",
            TypeOid::FLOAT4 => "real",
            TypeOid::FLOAT8 => "double precision",
            TypeOid::BPCHAR => "character",
            TypeOid::VARCHAR => "character varying",
            TypeOid::DATE => "date",
            TypeOid::TIME => "time",
            TypeOid::TIMESTAMP => "timestamp",
            TypeOid::NUMERIC => "numeric",
            _ => return None,
        };
        Some(name)
    }

    pub fn is_integer(&self) -> bool {
        matches!(*self, TypeOid::INT2 | TypeOid::INT4 | TypeOid::INT8)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer()
            || matches!(*self, TypeOid::FLOAT4 | TypeOid::FLOAT8 | TypeOid::NUMERIC)
    }

    /// Character types other than blank-padded `character`
    pub fn is_varlena_text(&self) -> bool {
        matches!(*self, TypeOid::TEXT | TypeOid::VARCHAR)
    }

    pub fn is_text(&self) -> bool {
        self.is_varlena_text() || *self == TypeOid::BPCHAR
    }
}

impl fmt::Display for TypeOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Relational type modifier; `-1` when the type carries none
pub type TypeMod = i32;

/// No type modifier
pub const NO_TYPMOD: TypeMod = -1;

/// Header added to length-style type modifiers (`varchar(n)` stores `n + 4`)
pub const VARHDRSZ: TypeMod = 4;

/// Identifier of one host conversion function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// The four conversion functions cached per column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IoFunctions {
    /// Parse from text (read path)
    pub input: FunctionId,
    /// Parse from binary (read path)
    pub receive: FunctionId,
    /// Render to text (write path)
    pub output: FunctionId,
    /// Render to binary (write path)
    pub send: FunctionId,
}

/// OGR field types, numbered as the OGR library numbers them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExternalFieldType {
    Integer,
    IntegerList,
    Real,
    RealList,
    String,
    StringList,
    WideString,
    WideStringList,
    Binary,
    Date,
    Time,
    DateTime,
    Integer64,
    Integer64List,
}

impl ExternalFieldType {
    /// Numeric type code
    pub fn code(&self) -> i32 {
        match self {
            ExternalFieldType::Integer => 0,
            ExternalFieldType::IntegerList => 1,
            ExternalFieldType::Real => 2,
            ExternalFieldType::RealList => 3,
            ExternalFieldType::String => 4,
            ExternalFieldType::StringList => 5,
            ExternalFieldType::WideString => 6,
            ExternalFieldType::WideStringList => 7,
            ExternalFieldType::Binary => 8,
            ExternalFieldType::Date => 9,
            ExternalFieldType::Time => 10,
            ExternalFieldType::DateTime => 11,
            ExternalFieldType::Integer64 => 12,
            ExternalFieldType::Integer64List => 13,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let ty = match code {
            0 => ExternalFieldType::Integer,
            1 => ExternalFieldType::IntegerList,
            2 => ExternalFieldType::Real,
            3 => ExternalFieldType::RealList,
            4 => ExternalFieldType::String,
            5 => ExternalFieldType::StringList,
            6 => ExternalFieldType::WideString,
            7 => ExternalFieldType::WideStringList,
            8 => ExternalFieldType::Binary,
            9 => ExternalFieldType::Date,
            10 => ExternalFieldType::Time,
            11 => ExternalFieldType::DateTime,
            12 => ExternalFieldType::Integer64,
            13 => ExternalFieldType::Integer64List,
            _ => return None,
        };
        Some(ty)
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            ExternalFieldType::IntegerList
                | ExternalFieldType::Integer64List
                | ExternalFieldType::RealList
                | ExternalFieldType::StringList
                | ExternalFieldType::WideStringList
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ExternalFieldType::Integer | ExternalFieldType::Integer64 | ExternalFieldType::Real
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, ExternalFieldType::String | ExternalFieldType::WideString)
    }
}

impl fmt::Display for ExternalFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternalFieldType::Integer => "Integer",
            ExternalFieldType::IntegerList => "IntegerList",
            ExternalFieldType::Real => "Real",
            ExternalFieldType::RealList => "RealList",
            ExternalFieldType::String => "String",
            ExternalFieldType::StringList => "StringList",
            ExternalFieldType::WideString => "WideString",
            ExternalFieldType::WideStringList => "WideStringList",
            ExternalFieldType::Binary => "Binary",
            ExternalFieldType::Date => "Date",
            ExternalFieldType::Time => "Time",
            ExternalFieldType::DateTime => "DateTime",
            ExternalFieldType::Integer64 => "Integer64",
            ExternalFieldType::Integer64List => "Integer64List",
        };
        write!(f, "{}", name)
    }
}

/// Geometry type identity, resolved once by the host at startup
///
/// Hosts without a spatial extension register no geometry type; geometry
/// then travels as `bytea` only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryRegistry {
    geometry: Option<TypeOid>,
}

impl GeometryRegistry {
    pub fn new(geometry: TypeOid) -> Self {
        Self {
            geometry: Some(geometry),
        }
    }

    pub fn without_geometry() -> Self {
        Self { geometry: None }
    }

    pub fn geometry_type(&self) -> Option<TypeOid> {
        self.geometry
    }

    pub fn is_geometry(&self, oid: TypeOid) -> bool {
        self.geometry == Some(oid)
    }
}

/// Relational type -> preferred OGR field type
const RELATIONAL_TO_EXTERNAL: &[(TypeOid, ExternalFieldType)] = &[
    (TypeOid::BOOL, ExternalFieldType::Integer),
    (TypeOid::INT2, ExternalFieldType::Integer),
    (TypeOid::INT4, ExternalFieldType::Integer),
    (TypeOid::INT8, ExternalFieldType::Integer64),
    (TypeOid::FLOAT4, ExternalFieldType::Real),
    (TypeOid::FLOAT8, ExternalFieldType::Real),
    (TypeOid::NUMERIC, ExternalFieldType::Real),
    (TypeOid::TEXT, ExternalFieldType::String),
    (TypeOid::VARCHAR, ExternalFieldType::String),
    (TypeOid::BPCHAR, ExternalFieldType::String),
    (TypeOid::BYTEA, ExternalFieldType::Binary),
    (TypeOid::DATE, ExternalFieldType::Date),
    (TypeOid::TIME, ExternalFieldType::Time),
    (TypeOid::TIMESTAMP, ExternalFieldType::DateTime),
];

/// OGR field type -> preferred relational type, before subtype and width refinements
const EXTERNAL_TO_RELATIONAL: &[(ExternalFieldType, TypeOid)] = &[
    (ExternalFieldType::Integer, TypeOid::INT4),
    (ExternalFieldType::Integer64, TypeOid::INT8),
    (ExternalFieldType::Real, TypeOid::FLOAT8),
    (ExternalFieldType::String, TypeOid::VARCHAR),
    (ExternalFieldType::WideString, TypeOid::VARCHAR),
    (ExternalFieldType::Binary, TypeOid::BYTEA),
    (ExternalFieldType::Date, TypeOid::DATE),
    (ExternalFieldType::Time, TypeOid::TIME),
    (ExternalFieldType::DateTime, TypeOid::TIMESTAMP),
    (ExternalFieldType::IntegerList, TypeOid::TEXT),
    (ExternalFieldType::Integer64List, TypeOid::TEXT),
    (ExternalFieldType::RealList, TypeOid::TEXT),
    (ExternalFieldType::StringList, TypeOid::TEXT),
    (ExternalFieldType::WideStringList, TypeOid::TEXT),
];

/// Bidirectional mapping between OGR field types and relational types
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeCatalog {
    registry: GeometryRegistry,
}

impl TypeCatalog {
    pub fn new(registry: GeometryRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &GeometryRegistry {
        &self.registry
    }

    /// Best OGR field type for storing a relational type
    ///
    /// Geometry and unknown types have no field representation.
    pub fn external_type_for(&self, oid: TypeOid, _typmod: TypeMod) -> Option<ExternalFieldType> {
        RELATIONAL_TO_EXTERNAL
            .iter()
            .find(|(rel, _)| *rel == oid)
            .map(|(_, ext)| *ext)
    }

    /// Best relational type and modifier for representing an OGR field
    pub fn relational_type_for(&self, field: &FieldDefn) -> (TypeOid, TypeMod) {
        match (field.field_type, field.subtype) {
            (ExternalFieldType::Integer, FieldSubType::Boolean) => return (TypeOid::BOOL, NO_TYPMOD),
            (ExternalFieldType::Integer, FieldSubType::Int16) => return (TypeOid::INT2, NO_TYPMOD),
            (ExternalFieldType::Real, FieldSubType::Float32) => return (TypeOid::FLOAT4, NO_TYPMOD),
            _ => {}
        }

        let oid = EXTERNAL_TO_RELATIONAL
            .iter()
            .find(|(ext, _)| *ext == field.field_type)
            .map(|(_, rel)| *rel)
            .unwrap_or(TypeOid::TEXT);

        let typmod = if oid == TypeOid::VARCHAR && field.width > 0 {
            field.width as TypeMod + VARHDRSZ
        } else {
            NO_TYPMOD
        };
        (oid, typmod)
    }

    /// Whether values of an OGR field type can be read into and written from a relational type
    pub fn is_compatible(&self, ext: ExternalFieldType, oid: TypeOid) -> bool {
        if self.registry.is_geometry(oid) {
            return false;
        }
        match ext {
            ExternalFieldType::Binary => oid == TypeOid::BYTEA,
            ExternalFieldType::String | ExternalFieldType::WideString => {
                oid != TypeOid::BYTEA && oid.builtin_name().is_some()
            }
            ExternalFieldType::Integer | ExternalFieldType::Integer64 => {
                oid == TypeOid::BOOL || oid.is_numeric() || oid.is_text()
            }
            ExternalFieldType::Real => {
                matches!(oid, TypeOid::FLOAT4 | TypeOid::FLOAT8 | TypeOid::NUMERIC) || oid.is_text()
            }
            ExternalFieldType::Date => {
                matches!(oid, TypeOid::DATE | TypeOid::TIMESTAMP) || oid.is_text()
            }
            ExternalFieldType::Time => oid == TypeOid::TIME || oid.is_text(),
            ExternalFieldType::DateTime => oid == TypeOid::TIMESTAMP || oid.is_text(),
            ExternalFieldType::IntegerList
            | ExternalFieldType::Integer64List
            | ExternalFieldType::RealList
            | ExternalFieldType::StringList
            | ExternalFieldType::WideStringList => oid.is_text(),
        }
    }

    /// Conversion functions the host registered for a type
    pub fn resolve_io(&self, io: &dyn TypeIo, oid: TypeOid) -> Option<IoFunctions> {
        io.io_functions(oid)
    }

    /// Display name for error messages
    pub fn type_name(&self, oid: TypeOid) -> String {
        if self.registry.is_geometry(oid) {
            return "geometry".to_string();
        }
        oid.builtin_name()
            .map(|name| name.to_string())
            .unwrap_or_else(|| format!("type {}", oid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: TypeOid = TypeOid(90001);

    fn catalog() -> TypeCatalog {
        TypeCatalog::new(GeometryRegistry::new(GEOMETRY))
    }

    #[test]
    fn test_external_type_codes() {
        for code in 0..=13 {
            let ty = ExternalFieldType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
        }
        assert_eq!(ExternalFieldType::from_code(14), None);
        assert_eq!(ExternalFieldType::Integer64.to_string(), "Integer64");
    }

    #[test]
    fn test_relational_to_external() {
        let catalog = catalog();
        assert_eq!(
            catalog.external_type_for(TypeOid::INT4, NO_TYPMOD),
            Some(ExternalFieldType::Integer)
        );
        assert_eq!(
            catalog.external_type_for(TypeOid::INT8, NO_TYPMOD),
            Some(ExternalFieldType::Integer64)
        );
        assert_eq!(
            catalog.external_type_for(TypeOid::VARCHAR, 14),
            Some(ExternalFieldType::String)
        );
        assert_eq!(
            catalog.external_type_for(TypeOid::TIMESTAMP, NO_TYPMOD),
            Some(ExternalFieldType::DateTime)
        );
        assert_eq!(catalog.external_type_for(GEOMETRY, NO_TYPMOD), None);
        assert_eq!(catalog.external_type_for(TypeOid(4242), NO_TYPMOD), None);
    }

    #[test]
    fn test_external_to_relational() {
        let catalog = catalog();

        let field = FieldDefn::new("name", ExternalFieldType::String).with_width(32);
        assert_eq!(catalog.relational_type_for(&field), (TypeOid::VARCHAR, 36));

        let field = FieldDefn::new("note", ExternalFieldType::String);
        assert_eq!(catalog.relational_type_for(&field), (TypeOid::VARCHAR, NO_TYPMOD));

        let field = FieldDefn::new("flag", ExternalFieldType::Integer)
            .with_subtype(FieldSubType::Boolean);
        assert_eq!(catalog.relational_type_for(&field), (TypeOid::BOOL, NO_TYPMOD));

        let field = FieldDefn::new("tags", ExternalFieldType::StringList);
        assert_eq!(catalog.relational_type_for(&field), (TypeOid::TEXT, NO_TYPMOD));

        let field = FieldDefn::new("pop", ExternalFieldType::Integer64);
        assert_eq!(catalog.relational_type_for(&field), (TypeOid::INT8, NO_TYPMOD));
    }

    #[test]
    fn test_mapping_tables_agree() {
        // every preferred relational type maps back to a compatible field type
        let catalog = catalog();
        for (ext, rel) in EXTERNAL_TO_RELATIONAL {
            assert!(catalog.is_compatible(*ext, *rel), "{} -> {}", ext, rel);
        }
        for (rel, ext) in RELATIONAL_TO_EXTERNAL {
            assert!(catalog.is_compatible(*ext, *rel), "{} -> {}", rel, ext);
        }
    }

    #[test]
    fn test_compatibility() {
        let catalog = catalog();
        assert!(catalog.is_compatible(ExternalFieldType::String, TypeOid::INT4));
        assert!(catalog.is_compatible(ExternalFieldType::Integer, TypeOid::BOOL));
        assert!(!catalog.is_compatible(ExternalFieldType::Binary, TypeOid::TEXT));
        assert!(!catalog.is_compatible(ExternalFieldType::Real, TypeOid::INT4));
        assert!(!catalog.is_compatible(ExternalFieldType::Time, TypeOid::DATE));
        assert!(!catalog.is_compatible(ExternalFieldType::String, GEOMETRY));
        assert!(!catalog.is_compatible(ExternalFieldType::String, TypeOid(4242)));
    }

    #[test]
    fn test_type_names() {
        let catalog = catalog();
        assert_eq!(catalog.type_name(TypeOid::INT4), "integer");
        assert_eq!(catalog.type_name(GEOMETRY), "geometry");
        assert_eq!(catalog.type_name(TypeOid(4242)), "type 4242");
    }
}
