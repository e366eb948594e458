// SPDX-License-Identifier: Apache-2.0

//! Scan phase

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, trace};

use super::plan::ForeignScanPlan;
use super::{impl_fdw_state, FdwContext, Phase, StateHeader};
use crate::deparse::Expr;
use crate::error::{OgrFdwError, OgrResult};
use crate::options::OgrOptions;
use crate::schema::{RelationDesc, Table};
use crate::source::LayerCapability;
use crate::types::convert::feature_to_row;
use crate::types::Row;

/// State of a running scan
#[derive(Debug)]
pub struct ExecState {
    ctx: Arc<FdwContext>,
    header: StateHeader,
    table: Table,
    filter: Option<String>,
    /// Attribute numbers the host reads; `None` for all
    wanted: Option<Vec<usize>>,
    rows_read: u64,
}

impl_fdw_state!(ExecState);

impl ExecState {
    /// Open, bind and position the layer for a planned scan
    ///
    /// `conjuncts` must be the list the plan classified. The filter is
    /// rebuilt from the conjuncts the plan marked as pushed; a pushed
    /// conjunct that no longer translates against the current layer fails
    /// the scan instead of silently widening it.
    pub fn begin(
        ctx: Arc<FdwContext>,
        relation: RelationDesc,
        options: &OgrOptions,
        plan: &ForeignScanPlan,
        conjuncts: &[Expr],
        wanted: Option<Vec<usize>>,
    ) -> OgrResult<Self> {
        if plan.relation_id != relation.id {
            return Err(OgrFdwError::InvalidState(format!(
                "scan plan for relation {:?} used for {} ({:?})",
                plan.relation_id, relation.name, relation.id
            )));
        }
        if plan.pushed.len() != conjuncts.len() {
            return Err(OgrFdwError::InvalidState(format!(
                "scan plan classified {} conjuncts, got {}",
                plan.pushed.len(),
                conjuncts.len()
            )));
        }

        let mut header = StateHeader::open(&ctx, Phase::Exec, relation, options, false)?;
        let table = header.bind(&ctx)?;

        let deparser = ctx.deparser(&table);
        let mut parts = Vec::new();
        let mut filtered_columns = BTreeSet::new();
        for (index, conjunct) in conjuncts.iter().enumerate() {
            if !plan.pushed[index] {
                continue;
            }
            let fragment = deparser.deparse(conjunct).ok_or_else(|| {
                OgrFdwError::InvalidState(format!(
                    "conjunct {} of the scan on {} was planned for pushdown but no longer translates",
                    index,
                    table.relation_name()
                ))
            })?;
            parts.push(fragment);
            filtered_columns.extend(conjunct.referenced_columns());
        }
        let filter = (!parts.is_empty()).then(|| parts.join(" AND "));

        let layer = header.connection.layer_mut()?;
        layer.set_attribute_filter(filter.as_deref())?;

        if let Some(wanted) = &wanted {
            let ignored: Vec<String> = table
                .columns()
                .iter()
                .filter(|c| !wanted.contains(&c.attnum) && !filtered_columns.contains(&c.attnum))
                .filter_map(|c| c.field_index())
                .filter_map(|index| table.field_name(index).map(str::to_string))
                .collect();
            if !ignored.is_empty() && layer.test_capability(LayerCapability::IgnoreFields) {
                debug!("Ignoring OGR fields {:?} of {}", ignored, table.layer_name());
                layer.set_ignored_fields(&ignored)?;
            }
        }

        layer.reset_reading();
        info!(
            "Scanning {} from layer {} with filter {:?}",
            table.relation_name(),
            table.layer_name(),
            filter
        );

        Ok(Self {
            ctx,
            header,
            table,
            filter,
            wanted,
            rows_read: 0,
        })
    }

    /// Next row, or `None` once the layer is exhausted
    pub fn next_row(&mut self) -> OgrResult<Option<Row>> {
        let layer = self.header.connection.layer_mut()?;
        let Some(feature) = layer.next_feature()? else {
            trace!("Scan of {} exhausted after {} rows", self.table.relation_name(), self.rows_read);
            return Ok(None);
        };

        let row = feature_to_row(
            &self.table,
            &feature,
            self.ctx.type_io(),
            self.wanted.as_deref(),
        )?;
        self.rows_read += 1;
        Ok(Some(row))
    }

    /// Restart the scan from the first feature, keeping the filter
    pub fn rescan(&mut self) -> OgrResult<()> {
        debug!("Rescanning {}", self.table.relation_name());
        self.header.connection.layer_mut()?.reset_reading();
        Ok(())
    }

    /// EXPLAIN lines describing the scan
    pub fn explain(&self) -> Vec<String> {
        let mut lines = vec![
            format!("OGR Datasource: {}", self.header.connection.datasource_name()),
            format!("OGR Layer: {}", self.table.layer_name()),
        ];
        if let Some(filter) = &self.filter {
            lines.push(format!("OGR Filter: {}", filter));
        }
        lines
    }

    /// Rows produced since the scan began, across rescans
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Attribute filter installed on the layer
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn end(mut self) {
        debug!("Scan of {} read {} rows", self.table.relation_name(), self.rows_read);
        self.header.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OgrFdwConfig;
    use crate::deparse::CompareOp;
    use crate::memory::{MemoryDriver, MemoryLayerDef};
    use crate::schema::{ColumnDecl, RelationId};
    use crate::source::{Feature, FieldDefn, FieldValue};
    use crate::state::plan::{CostEstimate, PlanState};
    use crate::state::FdwState;
    use crate::types::{Datum, ExternalFieldType, GeometryRegistry, TypeOid};

    fn setup() -> (Arc<FdwContext>, MemoryDriver) {
        let driver = MemoryDriver::new();
        driver.add_layer(
            "mem://rivers",
            MemoryLayerDef::new("rivers")
                .field(FieldDefn::new("name", ExternalFieldType::String))
                .field(FieldDefn::new("length", ExternalFieldType::Real))
                .feature(
                    Feature::new(2)
                        .with_field(0, FieldValue::String("Glomma".into()))
                        .with_field(1, FieldValue::Real(621.0)),
                )
                .feature(
                    Feature::new(2)
                        .with_field(0, FieldValue::String("Tana".into()))
                        .with_field(1, FieldValue::Real(361.0)),
                ),
        );
        let ctx = FdwContext::new(
            OgrFdwConfig::default(),
            GeometryRegistry::without_geometry(),
            Arc::new(driver.clone()),
        );
        (Arc::new(ctx), driver)
    }

    fn relation() -> RelationDesc {
        RelationDesc::new(
            RelationId(9),
            "rivers",
            vec![
                ColumnDecl::new(1, "fid", TypeOid::INT8),
                ColumnDecl::new(2, "name", TypeOid::TEXT),
                ColumnDecl::new(3, "length", TypeOid::FLOAT8),
            ],
        )
    }

    fn options() -> OgrOptions {
        OgrOptions {
            datasource: "mem://rivers".to_string(),
            layer: "rivers".to_string(),
            ..Default::default()
        }
    }

    fn plan(ctx: &Arc<FdwContext>, conjuncts: &[Expr]) -> ForeignScanPlan {
        let mut state = PlanState::begin(ctx.clone(), relation(), &options()).unwrap();
        state.classify_filters(conjuncts).unwrap();
        state.into_plan().unwrap()
    }

    fn drain(state: &mut ExecState) -> Vec<Row> {
        let mut rows = Vec::new();
        while let Some(row) = state.next_row().unwrap() {
            rows.push(row);
        }
        rows
    }

    #[test]
    fn test_scan_with_filter_and_rescan() {
        let (ctx, driver) = setup();
        let conjuncts = vec![Expr::compare(
            Expr::column(3),
            CompareOp::Gt,
            Expr::Literal(crate::deparse::Literal::Float(400.0)),
        )];
        let plan = plan(&ctx, &conjuncts);
        let mut state = ExecState::begin(ctx, relation(), &options(), &plan, &conjuncts, None).unwrap();
        assert_eq!(state.phase(), Phase::Exec);
        assert_eq!(state.filter(), Some("length > 400.0"));

        let rows = drain(&mut state);
        assert_eq!(
            rows,
            vec![vec![
                Some(Datum::Int8(1)),
                Some(Datum::Text("Glomma".to_string())),
                Some(Datum::Float8(621.0)),
            ]]
        );

        state.rescan().unwrap();
        assert_eq!(drain(&mut state).len(), 1);
        assert_eq!(state.rows_read(), 2);
        assert_eq!(
            state.explain(),
            vec![
                "OGR Datasource: mem://rivers".to_string(),
                "OGR Layer: rivers".to_string(),
                "OGR Filter: length > 400.0".to_string(),
            ]
        );

        state.end();
        assert_eq!(driver.live_sources(), 0);
    }

    #[test]
    fn test_projection() {
        let (ctx, _) = setup();
        let plan = plan(&ctx, &[]);
        let mut state =
            ExecState::begin(ctx, relation(), &options(), &plan, &[], Some(vec![2])).unwrap();
        let rows = drain(&mut state);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec![None, Some(Datum::Text("Tana".to_string())), None]);
        assert!(state.explain().iter().all(|line| !line.starts_with("OGR Filter")));
    }

    #[test]
    fn test_plan_mismatch() {
        let (ctx, _) = setup();
        let plan = ForeignScanPlan {
            relation_id: RelationId(9),
            pushed: vec![true],
            cost: CostEstimate {
                startup_cost: 25.0,
                total_cost: 27.0,
                rows: 2.0,
            },
            filter: None,
        };
        let err = ExecState::begin(ctx.clone(), relation(), &options(), &plan, &[], None).unwrap_err();
        assert!(matches!(err, OgrFdwError::InvalidState(_)));

        // pushed conjunct that cannot be translated
        let opaque = [Expr::Opaque("f(name)".into())];
        let err = ExecState::begin(ctx, relation(), &options(), &plan, &opaque, None).unwrap_err();
        assert!(matches!(err, OgrFdwError::InvalidState(ref msg) if msg.contains("no longer translates")));
    }
}
