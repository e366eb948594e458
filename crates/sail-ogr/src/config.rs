// SPDX-License-Identifier: Apache-2.0

//! Configuration for the OGR bridge

use serde::{Deserialize, Serialize};

/// Process-wide bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OgrFdwConfig {
    /// Column name bound to the feature id
    #[serde(default = "default_fid_column")]
    pub fid_column: String,

    /// Column name bound to the layer geometry
    #[serde(default = "default_geometry_column")]
    pub geometry_column: String,

    /// Fail the bind when a column has no matching field
    #[serde(default)]
    pub error_on_unmatched_columns: bool,

    /// Fail the bind when a field has no matching column
    #[serde(default)]
    pub error_on_unmapped_fields: bool,

    /// Fixed cost of opening the source
    #[serde(default = "default_startup_cost")]
    pub startup_cost: f64,

    /// Row estimate when the layer has no fast feature count
    #[serde(default = "default_fallback_row_estimate")]
    pub fallback_row_estimate: u64,

    /// Deparse result cache
    #[serde(default)]
    pub deparse_cache: DeparseCacheConfig,
}

impl Default for OgrFdwConfig {
    fn default() -> Self {
        Self {
            fid_column: default_fid_column(),
            geometry_column: default_geometry_column(),
            error_on_unmatched_columns: false,
            error_on_unmapped_fields: false,
            startup_cost: default_startup_cost(),
            fallback_row_estimate: default_fallback_row_estimate(),
            deparse_cache: Default::default(),
        }
    }
}

/// Deparse cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeparseCacheConfig {
    /// Enable caching
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Maximum number of cached (table, filter) entries
    #[serde(default = "default_cache_max_capacity")]
    pub max_capacity: u64,
}

impl Default for DeparseCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_capacity: default_cache_max_capacity(),
        }
    }
}

fn default_fid_column() -> String {
    "fid".to_string()
}

fn default_geometry_column() -> String {
    "geom".to_string()
}

fn default_startup_cost() -> f64 {
    25.0
}

fn default_fallback_row_estimate() -> u64 {
    1_000_000
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_max_capacity() -> u64 {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OgrFdwConfig::default();
        assert_eq!(config.fid_column, "fid");
        assert_eq!(config.geometry_column, "geom");
        assert!(!config.error_on_unmatched_columns);
        assert!(!config.error_on_unmapped_fields);
        assert_eq!(config.startup_cost, 25.0);
        assert_eq!(config.fallback_row_estimate, 1_000_000);
        assert!(config.deparse_cache.enabled);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: OgrFdwConfig = serde_json::from_str(
            r#"{"geometry_column": "the_geom", "deparse_cache": {"enabled": false}}"#,
        )
        .unwrap();
        assert_eq!(config.geometry_column, "the_geom");
        assert_eq!(config.fid_column, "fid");
        assert!(!config.deparse_cache.enabled);
        assert_eq!(config.deparse_cache.max_capacity, 1024);
    }

    #[test]
    fn test_serialize_round_trip() {
        let config = OgrFdwConfig {
            error_on_unmatched_columns: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: OgrFdwConfig = serde_json::from_str(&json).unwrap();
        assert!(parsed.error_on_unmatched_columns);
    }
}
