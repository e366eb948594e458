// SPDX-License-Identifier: Apache-2.0

//! Binding relational column declarations to OGR layer fields

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OgrFdwConfig;
use crate::error::{OgrFdwError, OgrResult};
use crate::source::{FieldDefn, FieldSubType, Layer};
use crate::types::{
    ExternalFieldType, IoFunctions, TypeCatalog, TypeIo, TypeMod, TypeOid, NO_TYPMOD,
};

/// Engine-assigned relation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationId(pub u32);

/// One relational column as declared by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDecl {
    /// Attribute number, starting at 1
    pub attnum: usize,
    pub name: String,
    pub type_oid: TypeOid,
    pub typmod: TypeMod,
    pub dropped: bool,
    /// Field name to match instead of `name`
    pub external_name: Option<String>,
}

impl ColumnDecl {
    pub fn new(attnum: usize, name: impl Into<String>, type_oid: TypeOid) -> Self {
        Self {
            attnum,
            name: name.into(),
            type_oid,
            typmod: NO_TYPMOD,
            dropped: false,
            external_name: None,
        }
    }

    pub fn with_typmod(mut self, typmod: TypeMod) -> Self {
        self.typmod = typmod;
        self
    }

    pub fn with_external_name(mut self, name: impl Into<String>) -> Self {
        self.external_name = Some(name.into());
        self
    }

    pub fn dropped(mut self) -> Self {
        self.dropped = true;
        self
    }

    /// Name matched against the layer's fields and the reserved names
    pub fn match_name(&self) -> &str {
        self.external_name.as_deref().unwrap_or(&self.name)
    }
}

/// A foreign table definition as the host catalog describes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDesc {
    pub id: RelationId,
    pub name: String,
    pub columns: Vec<ColumnDecl>,
}

impl RelationDesc {
    pub fn new(id: RelationId, name: impl Into<String>, columns: Vec<ColumnDecl>) -> Self {
        Self {
            id,
            name: name.into(),
            columns,
        }
    }
}

/// Role of a relational column relative to the layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnVariant {
    /// No counterpart; reads as null, ignored on write
    Unmatched,
    /// The layer geometry
    Geometry,
    /// The feature id
    RowIdentifier,
    /// One layer field
    OrdinaryField {
        field_index: usize,
        field_type: ExternalFieldType,
    },
}

/// A bound column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub attnum: usize,
    pub dropped: bool,
    pub name: String,
    pub type_oid: TypeOid,
    pub typmod: TypeMod,
    /// Resolved for every live column; `None` only for dropped ones
    pub io: Option<IoFunctions>,
    pub variant: ColumnVariant,
}

impl Column {
    pub fn field_index(&self) -> Option<usize> {
        match self.variant {
            ColumnVariant::OrdinaryField { field_index, .. } => Some(field_index),
            _ => None,
        }
    }

    pub fn field_type(&self) -> Option<ExternalFieldType> {
        match self.variant {
            ColumnVariant::OrdinaryField { field_type, .. } => Some(field_type),
            _ => None,
        }
    }
}

/// Column mapping for one foreign table against one layer
///
/// Columns are kept in attribute-number order, including dropped and
/// unmatched ones, so that `columns()[attnum - 1]` is always the column
/// with that attribute number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Table {
    relation_id: RelationId,
    relation_name: String,
    layer_name: String,
    /// Layer field names in field-index order, as seen when bound
    field_names: Vec<String>,
    field_subtypes: Vec<FieldSubType>,
    columns: Vec<Column>,
}

impl Table {
    pub fn relation_id(&self) -> RelationId {
        self.relation_id
    }

    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    pub fn field_count(&self) -> usize {
        self.field_names.len()
    }

    /// Name of the layer field at an index
    pub fn field_name(&self, field_index: usize) -> Option<&str> {
        self.field_names.get(field_index).map(String::as_str)
    }

    pub fn field_subtype(&self, field_index: usize) -> Option<FieldSubType> {
        self.field_subtypes.get(field_index).copied()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Width of rows produced for this table
    pub fn natts(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, attnum: usize) -> Option<&Column> {
        attnum.checked_sub(1).and_then(|i| self.columns.get(i))
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| !c.dropped && c.name == name)
    }

    pub fn row_identifier(&self) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.variant == ColumnVariant::RowIdentifier)
    }

    pub fn geometry(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.variant == ColumnVariant::Geometry)
    }

    /// Stable digest of the binding, used to key cached deparse results
    pub fn signature(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Reconciles relation definitions with layer field lists
#[derive(Debug, Clone)]
pub struct SchemaBinder<'a> {
    config: &'a OgrFdwConfig,
    catalog: &'a TypeCatalog,
    io: &'a dyn TypeIo,
}

impl<'a> SchemaBinder<'a> {
    pub fn new(config: &'a OgrFdwConfig, catalog: &'a TypeCatalog, io: &'a dyn TypeIo) -> Self {
        Self {
            config,
            catalog,
            io,
        }
    }

    /// Bind every declared column against the layer's fields
    ///
    /// Fails as a whole when a live column has no conversion functions or a
    /// reserved column has a type that cannot hold its value.
    pub fn bind(
        &self,
        relation: &RelationDesc,
        layer_name: &str,
        fields: &[FieldDefn],
    ) -> OgrResult<Table> {
        let mut decls: Vec<&ColumnDecl> = relation.columns.iter().collect();
        decls.sort_by_key(|c| c.attnum);

        let natts = decls.last().map(|c| c.attnum).unwrap_or(0);
        let mut columns: Vec<Column> = (1..=natts).map(placeholder).collect();
        let mut used_fields = HashSet::new();
        let mut has_fid = false;
        let mut has_geometry = false;

        for decl in decls {
            if decl.attnum == 0 {
                return Err(OgrFdwError::InvalidState(format!(
                    "column \"{}\" of table \"{}\" has attribute number 0",
                    decl.name, relation.name
                )));
            }
            let slot = decl.attnum - 1;
            if decl.dropped {
                columns[slot] = Column {
                    name: decl.name.clone(),
                    ..placeholder(decl.attnum)
                };
                continue;
            }

            let io = self
                .catalog
                .resolve_io(self.io, decl.type_oid)
                .ok_or_else(|| OgrFdwError::ConversionFunctionMissing {
                    table: relation.name.clone(),
                    column: decl.name.clone(),
                    type_oid: decl.type_oid,
                })?;

            let variant = self.bind_column(relation, decl, fields, &mut has_fid, &mut has_geometry)?;
            if let ColumnVariant::OrdinaryField { field_index, .. } = variant {
                used_fields.insert(field_index);
            }
            if variant == ColumnVariant::Unmatched {
                if self.config.error_on_unmatched_columns {
                    return Err(OgrFdwError::ColumnNotMatched {
                        table: relation.name.clone(),
                        column: decl.name.clone(),
                    });
                }
                debug!(
                    "Column {} of {} has no OGR counterpart; it reads as null",
                    decl.name, relation.name
                );
            }

            columns[slot] = Column {
                attnum: decl.attnum,
                dropped: false,
                name: decl.name.clone(),
                type_oid: decl.type_oid,
                typmod: decl.typmod,
                io: Some(io),
                variant,
            };
        }

        for (index, field) in fields.iter().enumerate() {
            if used_fields.contains(&index) {
                continue;
            }
            if self.config.error_on_unmapped_fields {
                return Err(OgrFdwError::FieldNotMapped {
                    table: relation.name.clone(),
                    field: field.name.clone(),
                });
            }
            debug!("OGR field {} of {} is not mapped; ignoring", field.name, layer_name);
        }

        Ok(Table {
            relation_id: relation.id,
            relation_name: relation.name.clone(),
            layer_name: layer_name.to_string(),
            field_names: fields.iter().map(|f| f.name.clone()).collect(),
            field_subtypes: fields.iter().map(|f| f.subtype).collect(),
            columns,
        })
    }

    fn bind_column(
        &self,
        relation: &RelationDesc,
        decl: &ColumnDecl,
        fields: &[FieldDefn],
        has_fid: &mut bool,
        has_geometry: &mut bool,
    ) -> OgrResult<ColumnVariant> {
        let name = decl.match_name();
        let registry = self.catalog.registry();
        let unsupported = || OgrFdwError::UnsupportedType {
            table: relation.name.clone(),
            column: decl.name.clone(),
            type_name: self.catalog.type_name(decl.type_oid),
        };

        if name == self.config.fid_column {
            if !decl.type_oid.is_integer() {
                return Err(unsupported());
            }
            if *has_fid {
                warn!("Table {} has more than one feature id column", relation.name);
                return Ok(ColumnVariant::Unmatched);
            }
            *has_fid = true;
            return Ok(ColumnVariant::RowIdentifier);
        }

        if name == self.config.geometry_column || registry.is_geometry(decl.type_oid) {
            if !registry.is_geometry(decl.type_oid) && decl.type_oid != TypeOid::BYTEA {
                return Err(unsupported());
            }
            if *has_geometry {
                debug!(
                    "Only the first geometry column of {} is bound; {} reads as null",
                    relation.name, decl.name
                );
                return Ok(ColumnVariant::Unmatched);
            }
            *has_geometry = true;
            return Ok(ColumnVariant::Geometry);
        }

        let Some((field_index, field)) = fields.iter().enumerate().find(|(_, f)| f.name == name)
        else {
            return Ok(ColumnVariant::Unmatched);
        };

        if !self.catalog.is_compatible(field.field_type, decl.type_oid) {
            warn!(
                "Column {} ({}) of {} cannot exchange values with OGR {} field {}",
                decl.name,
                self.catalog.type_name(decl.type_oid),
                relation.name,
                field.field_type,
                field.name
            );
            return Ok(ColumnVariant::Unmatched);
        }

        Ok(ColumnVariant::OrdinaryField {
            field_index,
            field_type: field.field_type,
        })
    }

    /// Column declarations describing a layer
    ///
    /// Produces the feature id and geometry columns followed by one column
    /// per field, with laundered names; the original field name is kept as
    /// the external name when laundering changed it.
    pub fn infer_columns(&self, layer: &dyn Layer) -> Vec<ColumnDecl> {
        let geometry_type = self
            .catalog
            .registry()
            .geometry_type()
            .unwrap_or(TypeOid::BYTEA);

        let mut columns = vec![
            ColumnDecl::new(1, self.config.fid_column.clone(), TypeOid::INT8),
            ColumnDecl::new(2, self.config.geometry_column.clone(), geometry_type),
        ];
        let mut taken: HashSet<String> = columns.iter().map(|c| c.name.clone()).collect();

        for field in layer.field_defns() {
            let (type_oid, typmod) = self.catalog.relational_type_for(&field);
            let base = launder_name(&field.name);
            let mut name = base.clone();
            let mut suffix = 1;
            while taken.contains(&name) {
                name = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            taken.insert(name.clone());

            let mut decl = ColumnDecl::new(columns.len() + 1, name, type_oid).with_typmod(typmod);
            if decl.name != field.name {
                decl = decl.with_external_name(field.name.clone());
            }
            columns.push(decl);
        }

        debug!(
            "Inferred {} columns for OGR layer {}",
            columns.len(),
            layer.name()
        );
        columns
    }
}

fn placeholder(attnum: usize) -> Column {
    Column {
        attnum,
        dropped: true,
        name: String::new(),
        type_oid: TypeOid::TEXT,
        typmod: NO_TYPMOD,
        io: None,
        variant: ColumnVariant::Unmatched,
    }
}

/// Lower-case a field name and replace anything but `[a-z0-9_]` with `_`
pub fn launder_name(name: &str) -> String {
    static LAUNDER_REGEX: OnceLock<Regex> = OnceLock::new();
    let re = LAUNDER_REGEX.get_or_init(|| Regex::new(r"[^a-z0-9_]").unwrap());
    let laundered = re.replace_all(&name.to_lowercase(), "_").into_owned();
    if laundered.is_empty() {
        "field".to_string()
    } else {
        laundered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDriver, MemoryLayerDef};
    use crate::source::{DataSource, Driver, FieldSubType, OpenRequest};
    use crate::types::{BuiltinTypeIo, GeometryRegistry};

    const GEOMETRY: TypeOid = TypeOid(90001);

    struct Fixture {
        config: OgrFdwConfig,
        catalog: TypeCatalog,
        io: BuiltinTypeIo,
    }

    impl Fixture {
        fn new(config: OgrFdwConfig) -> Self {
            let registry = GeometryRegistry::new(GEOMETRY);
            Self {
                config,
                catalog: TypeCatalog::new(registry),
                io: BuiltinTypeIo::new(registry),
            }
        }

        fn binder(&self) -> SchemaBinder<'_> {
            SchemaBinder::new(&self.config, &self.catalog, &self.io)
        }
    }

    fn fields() -> Vec<FieldDefn> {
        vec![
            FieldDefn::new("name", ExternalFieldType::String),
            FieldDefn::new("pop", ExternalFieldType::Integer64),
            FieldDefn::new("Area Km2", ExternalFieldType::Real),
        ]
    }

    fn relation(columns: Vec<ColumnDecl>) -> RelationDesc {
        RelationDesc::new(RelationId(100), "places", columns)
    }

    #[test]
    fn test_bind_variants() {
        let fixture = Fixture::new(OgrFdwConfig::default());
        let rel = relation(vec![
            ColumnDecl::new(1, "fid", TypeOid::INT8),
            ColumnDecl::new(2, "geom", GEOMETRY).with_typmod(4326 << 8),
            ColumnDecl::new(3, "name", TypeOid::TEXT),
            ColumnDecl::new(4, "pop", TypeOid::INT8),
            ColumnDecl::new(5, "area", TypeOid::FLOAT8).with_external_name("Area Km2"),
        ]);

        let table = fixture.binder().bind(&rel, "places", &fields()).unwrap();
        let variants: Vec<_> = table.columns().iter().map(|c| c.variant).collect();
        assert_eq!(
            variants,
            vec![
                ColumnVariant::RowIdentifier,
                ColumnVariant::Geometry,
                ColumnVariant::OrdinaryField {
                    field_index: 0,
                    field_type: ExternalFieldType::String
                },
                ColumnVariant::OrdinaryField {
                    field_index: 1,
                    field_type: ExternalFieldType::Integer64
                },
                ColumnVariant::OrdinaryField {
                    field_index: 2,
                    field_type: ExternalFieldType::Real
                },
            ]
        );
        assert!(table.columns().iter().all(|c| c.io.is_some()));
        assert_eq!(table.row_identifier().map(|c| c.attnum), Some(1));
        assert_eq!(table.geometry().map(|c| c.attnum), Some(2));
        assert_eq!(table.layer_name(), "places");
    }

    #[test]
    fn test_unmatched_column_keeps_its_slot() {
        let fixture = Fixture::new(OgrFdwConfig::default());
        let fields = vec![FieldDefn::new("name", ExternalFieldType::String)];
        let rel = relation(vec![
            ColumnDecl::new(1, "name", TypeOid::TEXT),
            ColumnDecl::new(2, "pop", TypeOid::INT4),
            ColumnDecl::new(3, "Name", TypeOid::TEXT),
        ]);

        let table = fixture.binder().bind(&rel, "places", &fields).unwrap();
        assert_eq!(table.natts(), 3);
        assert_eq!(table.column(2).unwrap().name, "pop");
        assert_eq!(table.column(2).unwrap().variant, ColumnVariant::Unmatched);
        // matching is case-sensitive
        assert_eq!(table.column(3).unwrap().variant, ColumnVariant::Unmatched);
    }

    #[test]
    fn test_dropped_columns_are_placeholders() {
        let fixture = Fixture::new(OgrFdwConfig::default());
        let rel = relation(vec![
            ColumnDecl::new(1, "name", TypeOid::TEXT),
            ColumnDecl::new(2, "pop", TypeOid(4242)).dropped(),
            ColumnDecl::new(4, "pop", TypeOid::INT8),
        ]);

        let table = fixture.binder().bind(&rel, "places", &fields()).unwrap();
        assert_eq!(table.natts(), 4);
        let dropped = table.column(2).unwrap();
        assert!(dropped.dropped);
        assert_eq!(dropped.io, None);
        assert_eq!(dropped.variant, ColumnVariant::Unmatched);
        assert!(table.column(3).unwrap().dropped);
        assert_eq!(table.column_by_name("pop").unwrap().attnum, 4);
    }

    #[test]
    fn test_missing_conversion_functions_fail_the_bind() {
        let fixture = Fixture::new(OgrFdwConfig::default());
        let rel = relation(vec![
            ColumnDecl::new(1, "name", TypeOid::TEXT),
            ColumnDecl::new(2, "extra", TypeOid(4242)),
        ]);
        let err = fixture.binder().bind(&rel, "places", &fields()).unwrap_err();
        assert!(matches!(
            err,
            OgrFdwError::ConversionFunctionMissing { ref column, type_oid: TypeOid(4242), .. }
                if column == "extra"
        ));
    }

    #[test]
    fn test_reserved_column_types() {
        let fixture = Fixture::new(OgrFdwConfig::default());

        let rel = relation(vec![ColumnDecl::new(1, "fid", TypeOid::TEXT)]);
        let err = fixture.binder().bind(&rel, "places", &fields()).unwrap_err();
        assert!(matches!(err, OgrFdwError::UnsupportedType { ref column, .. } if column == "fid"));

        let rel = relation(vec![ColumnDecl::new(1, "geom", TypeOid::TEXT)]);
        let err = fixture.binder().bind(&rel, "places", &fields()).unwrap_err();
        assert!(matches!(err, OgrFdwError::UnsupportedType { ref type_name, .. } if type_name == "text"));

        // bytea geometry is fine, and only the first geometry column binds
        let rel = relation(vec![
            ColumnDecl::new(1, "geom", TypeOid::BYTEA),
            ColumnDecl::new(2, "shape", GEOMETRY),
        ]);
        let table = fixture.binder().bind(&rel, "places", &fields()).unwrap();
        assert_eq!(table.column(1).unwrap().variant, ColumnVariant::Geometry);
        assert_eq!(table.column(2).unwrap().variant, ColumnVariant::Unmatched);
    }

    #[test]
    fn test_incompatible_field_is_unmatched() {
        let fixture = Fixture::new(OgrFdwConfig::default());
        let rel = relation(vec![ColumnDecl::new(1, "name", TypeOid::BYTEA)]);
        let table = fixture.binder().bind(&rel, "places", &fields()).unwrap();
        assert_eq!(table.column(1).unwrap().variant, ColumnVariant::Unmatched);
    }

    #[test]
    fn test_strict_binding() {
        let fixture = Fixture::new(OgrFdwConfig {
            error_on_unmatched_columns: true,
            ..Default::default()
        });
        let rel = relation(vec![ColumnDecl::new(1, "missing", TypeOid::TEXT)]);
        let err = fixture.binder().bind(&rel, "places", &fields()).unwrap_err();
        assert!(matches!(err, OgrFdwError::ColumnNotMatched { .. }));

        let fixture = Fixture::new(OgrFdwConfig {
            error_on_unmapped_fields: true,
            ..Default::default()
        });
        let rel = relation(vec![ColumnDecl::new(1, "name", TypeOid::TEXT)]);
        let err = fixture.binder().bind(&rel, "places", &fields()).unwrap_err();
        assert!(matches!(err, OgrFdwError::FieldNotMapped { ref field, .. } if field == "pop"));
    }

    #[test]
    fn test_signature_tracks_binding() {
        let fixture = Fixture::new(OgrFdwConfig::default());
        let rel = relation(vec![ColumnDecl::new(1, "name", TypeOid::TEXT)]);
        let a = fixture.binder().bind(&rel, "places", &fields()).unwrap();
        let b = fixture.binder().bind(&rel, "places", &fields()).unwrap();
        assert_eq!(a.signature(), b.signature());

        let c = fixture.binder().bind(&rel, "places", &fields()[1..]).unwrap();
        assert_ne!(a.signature(), c.signature());
    }

    #[test]
    fn test_launder_name() {
        assert_eq!(launder_name("Area Km2"), "area_km2");
        assert_eq!(launder_name("pop-2020"), "pop_2020");
        assert_eq!(launder_name("name"), "name");
        assert_eq!(launder_name(""), "field");
    }

    #[test]
    fn test_infer_columns() {
        let driver = MemoryDriver::new();
        driver.add_layer(
            "mem://places",
            MemoryLayerDef::new("places")
                .field(FieldDefn::new("Name", ExternalFieldType::String).with_width(40))
                .field(FieldDefn::new("capital", ExternalFieldType::Integer).with_subtype(FieldSubType::Boolean))
                .field(FieldDefn::new("name", ExternalFieldType::String)),
        );
        let mut source = driver
            .open(&OpenRequest {
                datasource: "mem://places".to_string(),
                ..Default::default()
            })
            .unwrap();
        let layer = source.layer_by_name("places").unwrap();

        let fixture = Fixture::new(OgrFdwConfig::default());
        let columns = fixture.binder().infer_columns(layer.as_ref());
        let summary: Vec<_> = columns
            .iter()
            .map(|c| (c.attnum, c.name.as_str(), c.type_oid, c.external_name.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, "fid", TypeOid::INT8, None),
                (2, "geom", GEOMETRY, None),
                (3, "name", TypeOid::VARCHAR, Some("Name")),
                (4, "capital", TypeOid::BOOL, None),
                (5, "name_1", TypeOid::VARCHAR, Some("name")),
            ]
        );
        assert_eq!(columns[2].typmod, 44);

        // inferred declarations bind back onto the same layer
        let rel = RelationDesc::new(RelationId(7), "places", columns);
        let table = fixture
            .binder()
            .bind(&rel, "places", &layer.field_defns())
            .unwrap();
        assert!(table
            .columns()
            .iter()
            .all(|c| c.variant != ColumnVariant::Unmatched));
    }
}
