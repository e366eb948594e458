// SPDX-License-Identifier: Apache-2.0

//! Deparse result cache

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::sync::Cache;
use tracing::{debug, trace};

use super::Expr;
use crate::config::DeparseCacheConfig;
use crate::schema::{RelationId, Table};

/// (relation, binding signature, expression text)
type CacheKey = (RelationId, u64, String);

/// Deparse outcomes per (table, expression)
///
/// Declines are cached as well as fragments. Entries never go stale: a
/// changed layer schema changes the binding signature and therefore the key.
pub struct DeparseCache {
    entries: Cache<CacheKey, Arc<Option<String>>>,
    config: DeparseCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DeparseCache {
    pub fn new(config: DeparseCacheConfig) -> Self {
        let entries = if config.enabled {
            Cache::builder()
                .max_capacity(config.max_capacity)
                .name("ogr-deparse")
                .build()
        } else {
            Cache::builder().max_capacity(0).build()
        };

        Self {
            entries,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached outcome for an expression, computing it with `deparse` on a miss
    pub fn get_or_deparse(
        &self,
        table: &Table,
        expr: &Expr,
        deparse: impl FnOnce() -> Option<String>,
    ) -> Option<String> {
        if !self.config.enabled {
            return deparse();
        }

        let key = (table.relation_id(), table.signature(), expr.to_string());
        if let Some(cached) = self.entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!("Deparse cache hit for {}: {}", table.relation_name(), key.2);
            return (*cached).clone();
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!("Deparse cache miss for {}: {}", table.relation_name(), key.2);
        let result = deparse();
        self.entries.insert(key, Arc::new(result.clone()));
        result
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        debug!("Clearing deparse cache");
        self.entries.invalidate_all();
    }

    /// Get cache statistics
    pub fn stats(&self) -> DeparseCacheStats {
        DeparseCacheStats {
            entries: self.entries.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for DeparseCache {
    fn default() -> Self {
        Self::new(DeparseCacheConfig::default())
    }
}

impl fmt::Debug for DeparseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeparseCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeparseCacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OgrFdwConfig;
    use crate::deparse::{CompareOp, Deparser};
    use crate::schema::{ColumnDecl, RelationDesc, SchemaBinder};
    use crate::source::FieldDefn;
    use crate::types::{BuiltinTypeIo, ExternalFieldType, GeometryRegistry, TypeCatalog, TypeOid};

    fn table(fields: &[FieldDefn]) -> Table {
        let registry = GeometryRegistry::without_geometry();
        let config = OgrFdwConfig::default();
        let catalog = TypeCatalog::new(registry);
        let io = BuiltinTypeIo::new(registry);
        let rel = RelationDesc::new(
            RelationId(3),
            "roads",
            vec![ColumnDecl::new(1, "lanes", TypeOid::INT4)],
        );
        SchemaBinder::new(&config, &catalog, &io)
            .bind(&rel, "roads", fields)
            .unwrap()
    }

    fn filter() -> Expr {
        Expr::compare(Expr::column(1), CompareOp::GtEq, Expr::int(2))
    }

    #[test]
    fn test_cache_hits() {
        let cache = DeparseCache::default();
        let table = table(&[FieldDefn::new("lanes", ExternalFieldType::Integer)]);
        let deparser = Deparser::new(&table).with_cache(&cache);

        assert_eq!(deparser.deparse(&filter()).as_deref(), Some("lanes >= 2"));
        assert_eq!(deparser.deparse(&filter()).as_deref(), Some("lanes >= 2"));
        assert_eq!(deparser.deparse(&Expr::Opaque("f()".into())), None);
        assert_eq!(deparser.deparse(&Expr::Opaque("f()".into())), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_rebinding_changes_the_key() {
        let cache = DeparseCache::default();
        let bound = table(&[FieldDefn::new("lanes", ExternalFieldType::Integer)]);
        assert!(Deparser::new(&bound).with_cache(&cache).deparse(&filter()).is_some());

        // the field disappeared from the layer; the cached fragment must not be reused
        let rebound = table(&[]);
        assert_eq!(Deparser::new(&rebound).with_cache(&cache).deparse(&filter()), None);
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn test_disabled_cache() {
        let cache = DeparseCache::new(DeparseCacheConfig {
            enabled: false,
            ..Default::default()
        });
        let table = table(&[FieldDefn::new("lanes", ExternalFieldType::Integer)]);
        let deparser = Deparser::new(&table).with_cache(&cache);
        assert!(deparser.deparse(&filter()).is_some());
        assert!(deparser.deparse(&filter()).is_some());
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.stats().misses, 0);
    }
}
