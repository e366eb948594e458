// SPDX-License-Identifier: Apache-2.0

//! Per-phase state for planning, scanning and modifying a foreign table
//!
//! Each phase opens its own [`OgrConnection`] and closes it when the state
//! is ended or dropped; nothing but the relation id crosses from one phase
//! to the next.

pub mod exec;
pub mod modify;
pub mod plan;

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::OgrFdwConfig;
use crate::connection::OgrConnection;
use crate::deparse::{DeparseCache, Deparser};
use crate::error::OgrResult;
use crate::options::OgrOptions;
use crate::schema::{RelationDesc, RelationId, SchemaBinder, Table};
use crate::source::Driver;
use crate::types::{BuiltinTypeIo, GeometryRegistry, TypeCatalog, TypeIo};

pub use exec::ExecState;
pub use modify::ModifyState;
pub use plan::{CostEstimate, ForeignScanPlan, PlanState};

/// Query phase a state belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Plan,
    Exec,
    Modify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Plan => "plan",
            Phase::Exec => "exec",
            Phase::Modify => "modify",
        };
        write!(f, "{}", name)
    }
}

/// Process-wide services shared by every state
pub struct FdwContext {
    config: OgrFdwConfig,
    catalog: TypeCatalog,
    type_io: Arc<dyn TypeIo>,
    driver: Arc<dyn Driver>,
    cache: DeparseCache,
}

impl FdwContext {
    /// Context using the builtin conversion functions
    pub fn new(config: OgrFdwConfig, registry: GeometryRegistry, driver: Arc<dyn Driver>) -> Self {
        Self::with_type_io(config, registry, driver, Arc::new(BuiltinTypeIo::new(registry)))
    }

    pub fn with_type_io(
        config: OgrFdwConfig,
        registry: GeometryRegistry,
        driver: Arc<dyn Driver>,
        type_io: Arc<dyn TypeIo>,
    ) -> Self {
        let cache = DeparseCache::new(config.deparse_cache.clone());
        Self {
            config,
            catalog: TypeCatalog::new(registry),
            type_io,
            driver,
            cache,
        }
    }

    pub fn config(&self) -> &OgrFdwConfig {
        &self.config
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn type_io(&self) -> &dyn TypeIo {
        self.type_io.as_ref()
    }

    pub fn cache(&self) -> &DeparseCache {
        &self.cache
    }

    pub fn binder(&self) -> SchemaBinder<'_> {
        SchemaBinder::new(&self.config, &self.catalog, self.type_io.as_ref())
    }

    /// Deparser for a bound table, going through the cache when enabled
    pub fn deparser<'a>(&'a self, table: &'a Table) -> Deparser<'a> {
        let deparser = Deparser::new(table);
        if self.config.deparse_cache.enabled {
            deparser.with_cache(&self.cache)
        } else {
            deparser
        }
    }

    /// Unopened connection for a table's options
    pub fn connection(&self, options: &OgrOptions) -> OgrConnection {
        OgrConnection::new(self.driver.clone(), options)
    }
}

impl fmt::Debug for FdwContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdwContext")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .field("driver", &self.driver)
            .finish()
    }
}

/// Fields every phase state starts with
#[derive(Debug)]
pub(crate) struct StateHeader {
    phase: Phase,
    relation: RelationDesc,
    connection: OgrConnection,
}

impl StateHeader {
    /// Open a connection for a phase; the header only exists once it is open
    fn open(
        ctx: &FdwContext,
        phase: Phase,
        relation: RelationDesc,
        options: &OgrOptions,
        update: bool,
    ) -> OgrResult<Self> {
        options.validate()?;
        let mut connection = ctx.connection(options);
        connection.open(update)?;
        debug!(
            "Began {} phase for {} on layer {}",
            phase,
            relation.name,
            connection.layer_name()
        );
        Ok(Self {
            phase,
            relation,
            connection,
        })
    }

    /// Bind the relation against the connected layer
    fn bind(&self, ctx: &FdwContext) -> OgrResult<Table> {
        let layer = self.connection.layer()?;
        ctx.binder()
            .bind(&self.relation, layer.name(), &layer.field_defns())
    }

    fn close(&mut self) {
        self.connection.close();
        debug!("Ended {} phase for {}", self.phase, self.relation.name);
    }
}

/// Common view of the three phase states
pub trait FdwState {
    fn phase(&self) -> Phase;

    fn relation_id(&self) -> RelationId;

    fn connection(&self) -> &OgrConnection;
}

macro_rules! impl_fdw_state {
    ($ty:ty) => {
        impl $crate::state::FdwState for $ty {
            fn phase(&self) -> $crate::state::Phase {
                self.header.phase
            }

            fn relation_id(&self) -> $crate::schema::RelationId {
                self.header.relation.id
            }

            fn connection(&self) -> &$crate::connection::OgrConnection {
                &self.header.connection
            }
        }
    };
}
pub(crate) use impl_fdw_state;

/// Any phase state
#[derive(Debug)]
pub enum OgrFdwState {
    Plan(PlanState),
    Exec(ExecState),
    Modify(ModifyState),
}

impl OgrFdwState {
    fn inner(&self) -> &dyn FdwState {
        match self {
            OgrFdwState::Plan(state) => state,
            OgrFdwState::Exec(state) => state,
            OgrFdwState::Modify(state) => state,
        }
    }

    /// End the phase, closing its connection
    pub fn end(self) {
        match self {
            OgrFdwState::Plan(state) => state.end(),
            OgrFdwState::Exec(state) => state.end(),
            OgrFdwState::Modify(state) => state.end(),
        }
    }
}

impl FdwState for OgrFdwState {
    fn phase(&self) -> Phase {
        self.inner().phase()
    }

    fn relation_id(&self) -> RelationId {
        self.inner().relation_id()
    }

    fn connection(&self) -> &OgrConnection {
        self.inner().connection()
    }
}

impl From<PlanState> for OgrFdwState {
    fn from(state: PlanState) -> Self {
        OgrFdwState::Plan(state)
    }
}

impl From<ExecState> for OgrFdwState {
    fn from(state: ExecState) -> Self {
        OgrFdwState::Exec(state)
    }
}

impl From<ModifyState> for OgrFdwState {
    fn from(state: ModifyState) -> Self {
        OgrFdwState::Modify(state)
    }
}
