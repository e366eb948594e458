// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{OgrFdwError, OgrResult};

/// Foreign table options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OgrOptions {
    /// Data source connection string (e.g., "/data/places.shp", "PG:dbname=gis")
    pub datasource: String,

    /// Driver short name (e.g., "ESRI Shapefile"); detected when absent
    pub format: Option<String>,

    /// Layer name within the data source
    pub layer: String,

    /// Library configuration options
    pub config_options: Vec<(String, String)>,

    /// Driver open options
    pub open_options: Vec<(String, String)>,

    /// Whether inserts, updates and deletes are allowed
    pub updateable: bool,
}

impl Default for OgrOptions {
    fn default() -> Self {
        Self {
            datasource: String::new(),
            format: None,
            layer: String::new(),
            config_options: Vec::new(),
            open_options: Vec::new(),
            updateable: true,
        }
    }
}

impl OgrOptions {
    /// Parse options from a hashmap
    pub fn from_hashmap(options: &HashMap<String, String>) -> OgrResult<Self> {
        let mut ogr_opts = Self::default();

        // Required: datasource and layer
        ogr_opts.datasource = options
            .get("datasource")
            .ok_or_else(|| OgrFdwError::InvalidOptions("missing 'datasource' option".to_string()))?
            .clone();

        ogr_opts.layer = options
            .get("layer")
            .ok_or_else(|| OgrFdwError::InvalidOptions("missing 'layer' option".to_string()))?
            .clone();

        ogr_opts.format = options.get("format").cloned();

        if let Some(config_options) = options.get("config_options") {
            ogr_opts.config_options = parse_option_list(config_options)?;
        }

        if let Some(open_options) = options.get("open_options") {
            ogr_opts.open_options = parse_option_list(open_options)?;
        }

        if let Some(updateable) = options.get("updateable") {
            ogr_opts.updateable = parse_bool_option(updateable).ok_or_else(|| {
                OgrFdwError::InvalidOptions(format!("invalid updateable: {}", updateable))
            })?;
        }

        ogr_opts.validate()?;
        Ok(ogr_opts)
    }

    /// Validate options
    pub fn validate(&self) -> OgrResult<()> {
        if self.datasource.trim().is_empty() {
            return Err(OgrFdwError::InvalidOptions("empty datasource".to_string()));
        }

        if self.layer.trim().is_empty() {
            return Err(OgrFdwError::InvalidOptions("empty layer".to_string()));
        }

        if matches!(&self.format, Some(format) if format.trim().is_empty()) {
            return Err(OgrFdwError::InvalidOptions("empty format".to_string()));
        }

        Ok(())
    }
}

/// Merge multiple option sets into a single HashMap
/// Later options override earlier ones
pub fn merge_options(options_vec: Vec<HashMap<String, String>>) -> HashMap<String, String> {
    let mut merged = HashMap::new();

    for options in options_vec {
        for (key, value) in options {
            // Convert keys to lowercase for case-insensitive matching
            merged.insert(key.to_lowercase(), value);
        }
    }

    merged
}

/// Parse a whitespace separated `KEY=VALUE` list
pub fn parse_option_list(list: &str) -> OgrResult<Vec<(String, String)>> {
    static OPTION_REGEX: OnceLock<Regex> = OnceLock::new();
    let re = OPTION_REGEX.get_or_init(|| Regex::new(r"^([A-Za-z0-9_.\-]+)=(.*)$").unwrap());

    list.split_whitespace()
        .map(|item| {
            let captures = re.captures(item).ok_or_else(|| {
                OgrFdwError::InvalidOptions(format!("expected KEY=VALUE, got '{}'", item))
            })?;
            Ok((captures[1].to_string(), captures[2].to_string()))
        })
        .collect()
}

fn parse_bool_option(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_hashmap() {
        let opts = OgrOptions::from_hashmap(&options(&[
            ("datasource", "/data/places.shp"),
            ("layer", "places"),
            ("format", "ESRI Shapefile"),
            ("config_options", "SHAPE_ENCODING=LATIN1 CPL_DEBUG=ON"),
            ("open_options", "ADJUST_TYPE=YES"),
            ("updateable", "false"),
        ]))
        .unwrap();

        assert_eq!(opts.datasource, "/data/places.shp");
        assert_eq!(opts.layer, "places");
        assert_eq!(opts.format.as_deref(), Some("ESRI Shapefile"));
        assert_eq!(
            opts.config_options,
            vec![
                ("SHAPE_ENCODING".to_string(), "LATIN1".to_string()),
                ("CPL_DEBUG".to_string(), "ON".to_string()),
            ]
        );
        assert_eq!(opts.open_options.len(), 1);
        assert!(!opts.updateable);
    }

    #[test]
    fn test_missing_required() {
        let err = OgrOptions::from_hashmap(&options(&[("layer", "places")])).unwrap_err();
        assert!(err.to_string().contains("datasource"));

        let err = OgrOptions::from_hashmap(&options(&[("datasource", "x.shp")])).unwrap_err();
        assert!(err.to_string().contains("layer"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(OgrOptions::from_hashmap(&options(&[
            ("datasource", "x.shp"),
            ("layer", "x"),
            ("updateable", "maybe"),
        ]))
        .is_err());

        assert!(OgrOptions::from_hashmap(&options(&[
            ("datasource", "x.shp"),
            ("layer", "x"),
            ("open_options", "NOEQUALS"),
        ]))
        .is_err());
    }

    #[test]
    fn test_merge_options() {
        let server = options(&[("DataSource", "/data/a.gpkg"), ("format", "GPKG")]);
        let table = options(&[("layer", "roads"), ("datasource", "/data/b.gpkg")]);

        let merged = merge_options(vec![server, table]);

        // Later options override earlier ones
        assert_eq!(merged.get("datasource"), Some(&"/data/b.gpkg".to_string()));
        assert_eq!(merged.get("format"), Some(&"GPKG".to_string()));
        assert_eq!(merged.get("layer"), Some(&"roads".to_string()));
    }

    #[test]
    fn test_parse_option_list() {
        assert!(parse_option_list("").unwrap().is_empty());
        assert_eq!(
            parse_option_list("  A=1   B= ").unwrap(),
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "".to_string()),
            ]
        );
    }
}
