// SPDX-License-Identifier: Apache-2.0

//! Insert, update and delete

use std::sync::Arc;

use tracing::{debug, info, trace};

use super::{impl_fdw_state, FdwContext, Phase, StateHeader};
use crate::error::{OgrFdwError, OgrResult};
use crate::options::OgrOptions;
use crate::schema::{RelationDesc, Table};
use crate::source::{Feature, Layer, LayerCapability, SourceError};
use crate::types::convert::apply_row;
use crate::types::Row;

/// State of a modification
///
/// Every row either reaches the layer whole or fails the statement with the
/// number of the row that was rejected.
#[derive(Debug)]
pub struct ModifyState {
    ctx: Arc<FdwContext>,
    header: StateHeader,
    table: Table,
    /// Rows handed to the state so far, including a failed one
    rows_seen: u64,
}

impl_fdw_state!(ModifyState);

impl ModifyState {
    /// Open the table's layer for writing and bind it
    pub fn begin(ctx: Arc<FdwContext>, relation: RelationDesc, options: &OgrOptions) -> OgrResult<Self> {
        if !options.updateable {
            return Err(OgrFdwError::NotUpdateable {
                table: relation.name.clone(),
                reason: "the updateable option is false".to_string(),
            });
        }
        let header = StateHeader::open(&ctx, Phase::Modify, relation, options, true)?;
        let table = header.bind(&ctx)?;
        info!(
            "Modifying {} through layer {}",
            table.relation_name(),
            table.layer_name()
        );
        Ok(Self {
            ctx,
            header,
            table,
            rows_seen: 0,
        })
    }

    /// Write a new feature, returning the row with its feature id filled in
    pub fn insert(&mut self, row: &Row) -> OgrResult<Row> {
        let row_number = self.next_row_number();
        let layer = writable_layer(&mut self.header, &self.table, LayerCapability::SequentialWrite)?;

        let mut feature = Feature::new(self.table.field_count());
        apply_row(&self.table, row, self.ctx.type_io(), &mut feature, row_number)?;
        let fid = layer
            .create_feature(feature)
            .map_err(|e| rejected(&self.table, row_number, e))?;
        trace!("Inserted feature {} into {}", fid, self.table.layer_name());

        let mut inserted = row.clone();
        if let Some(column) = self.table.row_identifier() {
            let slot = column.attnum - 1;
            if let (Some(funcs), Some(value)) = (column.io, inserted.get_mut(slot)) {
                let datum = self
                    .ctx
                    .type_io()
                    .input(funcs.input, &fid.to_string(), column.typmod)
                    .map_err(|e| rejected(&self.table, row_number, e))?;
                *value = Some(datum);
            }
        }
        Ok(inserted)
    }

    /// Rewrite the feature the row's feature id points at
    pub fn update(&mut self, row: &Row) -> OgrResult<()> {
        let row_number = self.next_row_number();
        let fid = self.target_fid(row, row_number)?;
        let layer = writable_layer(&mut self.header, &self.table, LayerCapability::RandomWrite)?;

        let mut feature = layer
            .get_feature(fid)
            .map_err(|e| rejected(&self.table, row_number, e))?
            .ok_or_else(|| rejected(&self.table, row_number, SourceError::FeatureNotFound(fid)))?;
        apply_row(&self.table, row, self.ctx.type_io(), &mut feature, row_number)?;
        feature.fid = Some(fid);
        layer
            .set_feature(feature)
            .map_err(|e| rejected(&self.table, row_number, e))?;
        trace!("Updated feature {} of {}", fid, self.table.layer_name());
        Ok(())
    }

    /// Remove the feature the row's feature id points at
    pub fn delete(&mut self, row: &Row) -> OgrResult<()> {
        let row_number = self.next_row_number();
        let fid = self.target_fid(row, row_number)?;
        let layer = writable_layer(&mut self.header, &self.table, LayerCapability::DeleteFeature)?;
        layer
            .delete_feature(fid)
            .map_err(|e| rejected(&self.table, row_number, e))?;
        trace!("Deleted feature {} of {}", fid, self.table.layer_name());
        Ok(())
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    pub fn end(mut self) {
        debug!(
            "Modification of {} saw {} rows",
            self.table.relation_name(),
            self.rows_seen
        );
        self.header.close();
    }

    fn next_row_number(&mut self) -> u64 {
        self.rows_seen += 1;
        self.rows_seen
    }

    fn target_fid(&self, row: &Row, row_number: u64) -> OgrResult<i64> {
        let column = self
            .table
            .row_identifier()
            .ok_or_else(|| OgrFdwError::MissingRowIdentifier {
                table: self.table.relation_name().to_string(),
            })?;
        let datum = row
            .get(column.attnum - 1)
            .and_then(|d| d.as_ref())
            .ok_or_else(|| {
                rejected(
                    &self.table,
                    row_number,
                    format!("feature id column \"{}\" is null", column.name),
                )
            })?;
        datum.as_i64().ok_or_else(|| {
            rejected(
                &self.table,
                row_number,
                format!("feature id column \"{}\" holds a {} value", column.name, datum.type_name()),
            )
        })
    }
}

fn writable_layer<'a>(
    header: &'a mut StateHeader,
    table: &Table,
    capability: LayerCapability,
) -> OgrResult<&'a mut dyn Layer> {
    let layer = header.connection.layer_mut()?;
    if !layer.test_capability(capability) {
        return Err(OgrFdwError::NotUpdateable {
            table: table.relation_name().to_string(),
            reason: format!("layer \"{}\" does not support {}", table.layer_name(), capability),
        });
    }
    Ok(layer)
}

fn rejected(table: &Table, row: u64, reason: impl ToString) -> OgrFdwError {
    OgrFdwError::RowRejected {
        table: table.relation_name().to_string(),
        row,
        reason: reason.to_string(),
    }
}
