// SPDX-License-Identifier: Apache-2.0

//! Planning phase

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{impl_fdw_state, FdwContext, Phase, StateHeader};
use crate::deparse::{Deparsed, Expr};
use crate::error::OgrResult;
use crate::options::OgrOptions;
use crate::schema::{RelationDesc, RelationId};
use crate::source::LayerCapability;

/// Cost of scanning a foreign table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub startup_cost: f64,
    pub total_cost: f64,
    pub rows: f64,
}

/// Planning output handed to the scan
///
/// The host stores it as plan-private text between planning and execution
/// (see [`to_private`](Self::to_private)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignScanPlan {
    pub relation_id: RelationId,
    /// One flag per filter conjunct, as classified while planning
    pub pushed: Vec<bool>,
    pub cost: CostEstimate,
    /// Attribute filter planned for the layer, for diagnostics
    pub filter: Option<String>,
}

impl ForeignScanPlan {
    pub fn to_private(&self) -> OgrResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_private(text: &str) -> OgrResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Conjuncts the host must evaluate on every returned row
    pub fn local_conjuncts(&self) -> Vec<usize> {
        self.pushed
            .iter()
            .enumerate()
            .filter(|(_, p)| !**p)
            .map(|(i, _)| i)
            .collect()
    }
}

/// State of the planning phase
///
/// Planning only reads metadata: the field list, the capabilities and the
/// feature count. No features are read.
#[derive(Debug)]
pub struct PlanState {
    ctx: Arc<FdwContext>,
    header: StateHeader,
    deparsed: Deparsed,
    cost: Option<CostEstimate>,
}

impl_fdw_state!(PlanState);

impl PlanState {
    /// Open the table's layer for planning
    ///
    /// Fails before any estimate exists when the data source or the layer
    /// cannot be opened.
    pub fn begin(ctx: Arc<FdwContext>, relation: RelationDesc, options: &OgrOptions) -> OgrResult<Self> {
        let header = StateHeader::open(&ctx, Phase::Plan, relation, options, false)?;
        Ok(Self {
            ctx,
            header,
            deparsed: Deparsed::default(),
            cost: None,
        })
    }

    /// Decide which conjuncts the layer can evaluate, one flag per conjunct
    pub fn classify_filters(&mut self, conjuncts: &[Expr]) -> OgrResult<Vec<bool>> {
        let table = self.header.bind(&self.ctx)?;
        self.deparsed = self.ctx.deparser(&table).deparse_conjuncts(conjuncts);
        // counts taken before the filter was known no longer apply
        self.cost = None;

        debug!(
            "Planning {}: {} of {} conjuncts pushed down, filter {:?}",
            self.header.relation.name,
            self.deparsed.pushed_count(),
            conjuncts.len(),
            self.deparsed.fragment
        );
        Ok(self.deparsed.pushed.clone())
    }

    /// Estimate rows and costs from the layer's feature count
    ///
    /// The count is only asked for when the layer can produce it without a
    /// scan, with the pushed filter applied; otherwise the configured
    /// fallback is used.
    pub fn estimate(&mut self) -> OgrResult<CostEstimate> {
        if let Some(cost) = self.cost {
            return Ok(cost);
        }

        let config = self.ctx.config();
        let layer = self.header.connection.layer_mut()?;
        let rows = if layer.test_capability(LayerCapability::FastFeatureCount) {
            layer.set_attribute_filter(self.deparsed.fragment.as_deref())?;
            let count = layer.feature_count(false);
            layer.set_attribute_filter(None)?;
            count.unwrap_or(config.fallback_row_estimate)
        } else {
            config.fallback_row_estimate
        };

        let cost = CostEstimate {
            startup_cost: config.startup_cost,
            total_cost: config.startup_cost + rows as f64,
            rows: rows as f64,
        };
        debug!(
            "Estimated {} rows for {} (startup {}, total {})",
            cost.rows, self.header.relation.name, cost.startup_cost, cost.total_cost
        );
        self.cost = Some(cost);
        Ok(cost)
    }

    /// Result of the last [`classify_filters`](Self::classify_filters)
    pub fn deparsed(&self) -> &Deparsed {
        &self.deparsed
    }

    /// Finish planning and release the connection
    pub fn into_plan(mut self) -> OgrResult<ForeignScanPlan> {
        let cost = self.estimate()?;
        let plan = ForeignScanPlan {
            relation_id: self.header.relation.id,
            pushed: std::mem::take(&mut self.deparsed.pushed),
            cost,
            filter: self.deparsed.fragment.take(),
        };
        info!(
            "Planned scan of {} ({} rows, filter {:?})",
            self.header.relation.name, cost.rows, plan.filter
        );
        self.end();
        Ok(plan)
    }

    pub fn end(mut self) {
        self.header.close();
    }
}
