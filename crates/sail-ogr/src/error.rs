// SPDX-License-Identifier: Apache-2.0

//! Error types for the OGR foreign-table bridge

use thiserror::Error;

use crate::source::SourceError;
use crate::types::TypeOid;

/// Result type for OGR bridge operations
pub type OgrResult<T> = Result<T, OgrFdwError>;

/// Errors surfaced to the host engine as statement-level failures
#[derive(Debug, Error)]
pub enum OgrFdwError {
    /// The external data source could not be opened
    #[error("unable to open OGR data source \"{datasource}\": {reason}")]
    SourceOpen { datasource: String, reason: String },

    /// The data source opened but has no layer with the requested name
    #[error("unable to find layer \"{layer}\" in data source \"{datasource}\"")]
    LayerNotFound { datasource: String, layer: String },

    /// A column type cannot serve the role it was bound to
    #[error("column \"{column}\" of table \"{table}\" has unsupported type {type_name}")]
    UnsupportedType {
        table: String,
        column: String,
        type_name: String,
    },

    /// The host has no registered converter for a column type
    #[error("no conversion functions for type {type_oid} of column \"{column}\" in table \"{table}\"")]
    ConversionFunctionMissing {
        table: String,
        column: String,
        type_oid: TypeOid,
    },

    /// Strict binding: a relational column has no external field
    #[error("column \"{column}\" of table \"{table}\" has no matching OGR field")]
    ColumnNotMatched { table: String, column: String },

    /// Strict binding: an external field has no relational column
    #[error("OGR field \"{field}\" of layer \"{table}\" is not mapped to any column")]
    FieldNotMapped { table: String, field: String },

    /// Invalid or missing table options
    #[error("invalid OGR options: {0}")]
    InvalidOptions(String),

    /// A feature value could not be converted into a column value
    #[error("cannot convert value for column \"{column}\" of table \"{table}\": {reason}")]
    Conversion {
        table: String,
        column: String,
        reason: String,
    },

    /// A row could not be written to the layer
    #[error("row {row} rejected by table \"{table}\": {reason}")]
    RowRejected {
        table: String,
        row: u64,
        reason: String,
    },

    /// The table was declared read-only or the layer cannot be written
    #[error("table \"{table}\" is not updateable: {reason}")]
    NotUpdateable { table: String, reason: String },

    /// Update/delete needs a column bound to the feature id
    #[error("table \"{table}\" has no feature id column for update or delete")]
    MissingRowIdentifier { table: String },

    /// An external layer call failed
    #[error("OGR error: {0}")]
    Source(String),

    /// A phase operation was called out of order
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Plan-private data could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<SourceError> for OgrFdwError {
    fn from(err: SourceError) -> Self {
        OgrFdwError::Source(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offender() {
        let err = OgrFdwError::LayerNotFound {
            datasource: "/data/cities.shp".to_string(),
            layer: "towns".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("towns"));
        assert!(msg.contains("/data/cities.shp"));

        let err = OgrFdwError::ConversionFunctionMissing {
            table: "cities".to_string(),
            column: "shape".to_string(),
            type_oid: TypeOid(90210),
        };
        assert!(err.to_string().contains("90210"));
        assert!(err.to_string().contains("shape"));
    }

    #[test]
    fn test_source_error_conversion() {
        let err: OgrFdwError = SourceError::Unsupported("DeleteFeature".to_string()).into();
        assert!(matches!(err, OgrFdwError::Source(_)));
        assert!(err.to_string().contains("DeleteFeature"));
    }
}
