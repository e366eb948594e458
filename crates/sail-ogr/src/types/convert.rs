// SPDX-License-Identifier: Apache-2.0

//! Feature <-> row conversion through the per-column conversion functions

use crate::error::{OgrFdwError, OgrResult};
use crate::schema::{Column, ColumnVariant, Table};
use crate::source::{Feature, FieldValue};
use crate::types::{Datum, ExternalFieldType, IoFunctions, Row, TypeIo, TypeOid};

/// Build the relational row for a feature
///
/// `wanted` limits conversion to the listed attribute numbers; every other
/// slot stays null. Any conversion failure aborts with the column named.
pub(crate) fn feature_to_row(
    table: &Table,
    feature: &Feature,
    io: &dyn TypeIo,
    wanted: Option<&[usize]>,
) -> OgrResult<Row> {
    let mut row: Row = vec![None; table.natts()];

    for (slot, column) in table.columns().iter().enumerate() {
        if column.dropped {
            continue;
        }
        if let Some(wanted) = wanted {
            if !wanted.contains(&column.attnum) {
                continue;
            }
        }
        let Some(funcs) = column.io else {
            continue;
        };

        let converted = match column.variant {
            ColumnVariant::Unmatched => None,
            ColumnVariant::RowIdentifier => feature
                .fid
                .map(|fid| io.input(funcs.input, &fid.to_string(), column.typmod))
                .transpose()
                .map_err(|e| conversion_error(table, column, e))?,
            ColumnVariant::Geometry => feature
                .geometry
                .as_deref()
                .map(|wkb| io.receive(funcs.receive, wkb, column.typmod))
                .transpose()
                .map_err(|e| conversion_error(table, column, e))?,
            ColumnVariant::OrdinaryField { field_index, .. } => {
                read_field(table, column, funcs, feature.field(field_index), io)?
            }
        };
        row[slot] = converted;
    }

    Ok(row)
}

fn read_field(
    table: &Table,
    column: &Column,
    funcs: IoFunctions,
    value: &FieldValue,
    io: &dyn TypeIo,
) -> OgrResult<Option<Datum>> {
    let datum = match value {
        FieldValue::Null => return Ok(None),
        FieldValue::Binary(bytes) => io.receive(funcs.receive, bytes, column.typmod),
        other => match other.as_text() {
            Some(text) => io.input(funcs.input, &text, column.typmod),
            None => return Ok(None),
        },
    };
    datum.map(Some).map_err(|e| conversion_error(table, column, e))
}

fn conversion_error(table: &Table, column: &Column, err: impl ToString) -> OgrFdwError {
    OgrFdwError::Conversion {
        table: table.relation_name().to_string(),
        column: column.name.clone(),
        reason: err.to_string(),
    }
}

/// Write a relational row into a feature
///
/// Only the feature passed in is modified, so a failure leaves the layer
/// untouched. The feature id is taken from the row identifier column when
/// the row carries one.
pub(crate) fn apply_row(
    table: &Table,
    row: &Row,
    io: &dyn TypeIo,
    feature: &mut Feature,
    row_number: u64,
) -> OgrResult<()> {
    let rejected = |reason: String| OgrFdwError::RowRejected {
        table: table.relation_name().to_string(),
        row: row_number,
        reason,
    };

    if feature.fields.len() < table.field_count() {
        feature.fields.resize(table.field_count(), FieldValue::Null);
    }

    for (slot, column) in table.columns().iter().enumerate() {
        if column.dropped {
            continue;
        }
        let Some(funcs) = column.io else {
            continue;
        };
        let datum = row.get(slot).and_then(|d| d.as_ref());

        match column.variant {
            ColumnVariant::Unmatched => {}
            ColumnVariant::RowIdentifier => {
                if let Some(datum) = datum {
                    let fid = datum.as_i64().ok_or_else(|| {
                        rejected(format!(
                            "feature id column \"{}\" holds a {} value",
                            column.name,
                            datum.type_name()
                        ))
                    })?;
                    feature.fid = Some(fid);
                }
            }
            ColumnVariant::Geometry => {
                feature.geometry = datum
                    .map(|d| io.send(funcs.send, d))
                    .transpose()
                    .map_err(|e| rejected(format!("column \"{}\": {}", column.name, e)))?;
            }
            ColumnVariant::OrdinaryField {
                field_index,
                field_type,
            } => {
                let value = match datum {
                    None => FieldValue::Null,
                    Some(d) => write_field(column, funcs, field_type, d, io)
                        .map_err(|e| rejected(format!("column \"{}\": {}", column.name, e)))?,
                };
                if field_index >= feature.fields.len() {
                    feature.fields.resize(field_index + 1, FieldValue::Null);
                }
                feature.fields[field_index] = value;
            }
        }
    }

    Ok(())
}

fn write_field(
    column: &Column,
    funcs: IoFunctions,
    field_type: ExternalFieldType,
    datum: &Datum,
    io: &dyn TypeIo,
) -> Result<FieldValue, String> {
    if field_type == ExternalFieldType::Binary {
        return io
            .send(funcs.send, datum)
            .map(FieldValue::Binary)
            .map_err(|e| e.to_string());
    }

    let text = io.output(funcs.output, datum).map_err(|e| e.to_string())?;
    // integer fields store booleans as 1/0
    let text = match (column.type_oid, text.as_str()) {
        (TypeOid::BOOL, "t") => "1".to_string(),
        (TypeOid::BOOL, "f") => "0".to_string(),
        _ => text,
    };
    FieldValue::from_text(field_type, &text).map_err(|e| e.to_string())
}
