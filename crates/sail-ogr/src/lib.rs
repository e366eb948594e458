// SPDX-License-Identifier: Apache-2.0

//! Foreign-table bridge between a relational engine and OGR geodata layers.
//!
//! The host engine drives three phases per statement. Each phase opens its
//! own connection to the external layer and closes it when the phase ends.
//!
//! # Architecture
//!
//! ```text
//! Host query
//!   ↓
//! PlanState   feature count, pushdown flags  →  ForeignScanPlan
//!   ↓
//! ExecState   bind schema, set filter, iterate features  →  rows
//!
//! Host DML
//!   ↓
//! ModifyState bind schema, rows  →  create/set/delete feature
//! ```
//!
//! Binding ([`SchemaBinder`]) maps relational columns onto the layer's
//! fields by name, resolving the conversion functions for each column
//! through the [`TypeCatalog`]. Filters are handed over as a closed
//! [`Expr`] tree; the [`Deparser`] translates the conjuncts it can into
//! the layer's attribute query language and declines the rest, which the
//! host re-checks on every returned row.
//!
//! The external library is reached only through the [`source`] traits.
//! [`memory::MemoryDriver`] implements them in process.

pub mod config;
pub mod connection;
pub mod deparse;
pub mod error;
pub mod memory;
pub mod options;
pub mod schema;
pub mod source;
pub mod state;
pub mod types;

pub use config::{DeparseCacheConfig, OgrFdwConfig};
pub use connection::OgrConnection;
pub use deparse::{split_conjuncts, CompareOp, DeparseCache, Deparsed, Deparser, Expr, Literal};
pub use error::{OgrFdwError, OgrResult};
pub use options::{merge_options, OgrOptions};
pub use schema::{Column, ColumnDecl, ColumnVariant, RelationDesc, RelationId, SchemaBinder, Table};
pub use state::{
    CostEstimate, ExecState, FdwContext, FdwState, ForeignScanPlan, ModifyState, OgrFdwState, Phase,
    PlanState,
};
pub use types::{Datum, GeometryRegistry, Row, TypeCatalog, TypeOid};
