// SPDX-License-Identifier: Apache-2.0

//! In-memory OGR driver
//!
//! Data sources are registered by name on a [`MemoryDriver`] and shared by
//! every handle opened from it, so writes made through one connection are
//! visible to the next. Used by the test suites and by hosts that want to
//! exercise the bridge without a geodata library.

pub mod filter;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::source::{
    DataSource, Driver, Feature, FieldDefn, FieldValue, Layer, LayerCapability, OpenRequest,
    SourceError,
};

pub use filter::AttributeFilter;

const ALL_CAPABILITIES: [LayerCapability; 5] = [
    LayerCapability::FastFeatureCount,
    LayerCapability::SequentialWrite,
    LayerCapability::RandomWrite,
    LayerCapability::DeleteFeature,
    LayerCapability::IgnoreFields,
];

/// Definition of one in-memory layer
#[derive(Debug, Clone)]
pub struct MemoryLayerDef {
    name: String,
    fields: Vec<FieldDefn>,
    capabilities: HashSet<LayerCapability>,
    features: Vec<Feature>,
}

impl MemoryLayerDef {
    /// A layer with every capability and no fields
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            capabilities: ALL_CAPABILITIES.into_iter().collect(),
            features: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDefn) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a feature; features without an id get the next free one
    pub fn feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    pub fn without_capability(mut self, capability: LayerCapability) -> Self {
        self.capabilities.remove(&capability);
        self
    }
}

#[derive(Debug)]
struct LayerData {
    name: String,
    fields: Vec<FieldDefn>,
    capabilities: HashSet<LayerCapability>,
    features: BTreeMap<i64, Feature>,
    /// `None` once a feature holds `i64::MAX`
    next_fid: Option<i64>,
}

impl LayerData {
    fn from_def(def: MemoryLayerDef) -> Self {
        let mut data = Self {
            name: def.name,
            fields: def.fields,
            capabilities: def.capabilities,
            features: BTreeMap::new(),
            next_fid: Some(1),
        };
        for feature in def.features {
            if let Err(e) = data.insert(feature) {
                warn!("Dropping feature of layer {}: {}", data.name, e);
            }
        }
        data
    }

    fn insert(&mut self, mut feature: Feature) -> Result<i64, SourceError> {
        let fid = feature
            .fid
            .or(self.next_fid)
            .ok_or_else(|| SourceError::Failed(format!("layer \"{}\" has no feature id left", self.name)))?;
        self.next_fid = self
            .next_fid
            .and_then(|next| if next > fid { Some(next) } else { fid.checked_add(1) });
        feature.fid = Some(fid);
        feature.fields.resize(self.fields.len(), FieldValue::Null);
        self.features.insert(fid, feature);
        Ok(fid)
    }
}

type SharedLayer = Arc<RwLock<LayerData>>;

#[derive(Debug, Default)]
struct DriverState {
    datasets: RwLock<HashMap<String, Vec<SharedLayer>>>,
    opened: AtomicUsize,
    live: Arc<AtomicUsize>,
}

/// Driver serving registered in-memory data sources
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    state: Arc<DriverState>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layer under a data source name, replacing a layer of the same name
    pub fn add_layer(&self, datasource: &str, def: MemoryLayerDef) {
        let mut datasets = self.state.datasets.write();
        let layers = datasets.entry(datasource.to_string()).or_default();
        layers.retain(|layer| layer.read().name != def.name);
        layers.push(Arc::new(RwLock::new(LayerData::from_def(def))));
    }

    /// Snapshot of a layer's features in id order
    pub fn features(&self, datasource: &str, layer: &str) -> Vec<Feature> {
        self.find_layer(datasource, layer)
            .map(|data| data.read().features.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of successful opens so far
    pub fn open_count(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Number of data source handles not yet dropped
    pub fn live_sources(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    fn find_layer(&self, datasource: &str, layer: &str) -> Option<SharedLayer> {
        self.state
            .datasets
            .read()
            .get(datasource)?
            .iter()
            .find(|data| data.read().name == layer)
            .cloned()
    }
}

impl Driver for MemoryDriver {
    fn open(&self, request: &OpenRequest) -> Result<Box<dyn DataSource>, SourceError> {
        if let Some(format) = &request.format {
            if !format.eq_ignore_ascii_case("memory") {
                return Err(SourceError::Open(format!("unknown format \"{}\"", format)));
            }
        }
        let layers = self
            .state
            .datasets
            .read()
            .get(&request.datasource)
            .cloned()
            .ok_or_else(|| {
                SourceError::Open(format!("no such data source \"{}\"", request.datasource))
            })?;

        self.state.opened.fetch_add(1, Ordering::SeqCst);
        self.state.live.fetch_add(1, Ordering::SeqCst);
        trace!("Opened memory data source {}", request.datasource);
        Ok(Box::new(MemoryDataSource {
            name: request.datasource.clone(),
            layers,
            update: request.update,
            live: self.state.live.clone(),
        }))
    }
}

/// Open handle on a registered data source
pub struct MemoryDataSource {
    name: String,
    layers: Vec<SharedLayer>,
    update: bool,
    live: Arc<AtomicUsize>,
}

impl Drop for MemoryDataSource {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for MemoryDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDataSource")
            .field("name", &self.name)
            .field("update", &self.update)
            .finish()
    }
}

impl DataSource for MemoryDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.read().name.clone()).collect()
    }

    fn layer_by_name(&mut self, name: &str) -> Option<Box<dyn Layer>> {
        let data = self.layers.iter().find(|l| l.read().name == name)?.clone();
        Some(Box::new(MemoryLayer {
            name: name.to_string(),
            data,
            update: self.update,
            filter: None,
            ignored: Vec::new(),
            cursor: None,
        }))
    }
}

/// Layer handle with its own filter and read cursor
#[derive(Debug)]
pub struct MemoryLayer {
    name: String,
    data: SharedLayer,
    update: bool,
    filter: Option<AttributeFilter>,
    ignored: Vec<usize>,
    /// Id of the last feature returned
    cursor: Option<i64>,
}

impl MemoryLayer {
    fn check_write(&self, capability: LayerCapability) -> Result<(), SourceError> {
        if !self.update {
            return Err(SourceError::ReadOnly(self.name.clone()));
        }
        if !self.test_capability(capability) {
            return Err(SourceError::Unsupported(capability.to_string()));
        }
        Ok(())
    }

    fn passes(&self, feature: &Feature) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches(feature))
    }
}

impl Layer for MemoryLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn field_defns(&self) -> Vec<FieldDefn> {
        self.data.read().fields.clone()
    }

    fn test_capability(&self, capability: LayerCapability) -> bool {
        self.data.read().capabilities.contains(&capability)
    }

    fn feature_count(&self, force: bool) -> Option<u64> {
        if !force && !self.test_capability(LayerCapability::FastFeatureCount) {
            return None;
        }
        let data = self.data.read();
        Some(data.features.values().filter(|f| self.passes(f)).count() as u64)
    }

    fn set_attribute_filter(&mut self, filter: Option<&str>) -> Result<(), SourceError> {
        self.filter = match filter {
            Some(text) => {
                let fields = self.data.read().fields.clone();
                Some(AttributeFilter::parse(text, &fields)?)
            }
            None => None,
        };
        self.cursor = None;
        Ok(())
    }

    fn set_ignored_fields(&mut self, fields: &[String]) -> Result<(), SourceError> {
        if !self.test_capability(LayerCapability::IgnoreFields) {
            return Err(SourceError::Unsupported(
                LayerCapability::IgnoreFields.to_string(),
            ));
        }
        let data = self.data.read();
        self.ignored = fields
            .iter()
            .map(|name| {
                data.fields
                    .iter()
                    .position(|f| &f.name == name)
                    .ok_or_else(|| SourceError::Failed(format!("no field \"{}\"", name)))
            })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn reset_reading(&mut self) {
        self.cursor = None;
    }

    fn next_feature(&mut self) -> Result<Option<Feature>, SourceError> {
        let data = self.data.read();
        let start = match self.cursor {
            None => i64::MIN,
            Some(fid) => match fid.checked_add(1) {
                Some(start) => start,
                None => return Ok(None),
            },
        };
        let next = data
            .features
            .range(start..)
            .map(|(_, feature)| feature)
            .find(|feature| self.passes(feature))
            .cloned();
        drop(data);

        let Some(mut feature) = next else {
            return Ok(None);
        };
        self.cursor = feature.fid;
        for index in &self.ignored {
            if let Some(value) = feature.fields.get_mut(*index) {
                *value = FieldValue::Null;
            }
        }
        Ok(Some(feature))
    }

    fn get_feature(&mut self, fid: i64) -> Result<Option<Feature>, SourceError> {
        Ok(self.data.read().features.get(&fid).cloned())
    }

    fn create_feature(&mut self, feature: Feature) -> Result<i64, SourceError> {
        self.check_write(LayerCapability::SequentialWrite)?;
        let mut data = self.data.write();
        if let Some(fid) = feature.fid {
            if data.features.contains_key(&fid) {
                return Err(SourceError::Failed(format!("feature {} already exists", fid)));
            }
        }
        data.insert(feature)
    }

    fn set_feature(&mut self, feature: Feature) -> Result<(), SourceError> {
        self.check_write(LayerCapability::RandomWrite)?;
        let fid = feature
            .fid
            .ok_or_else(|| SourceError::Failed("feature has no id".to_string()))?;
        let mut data = self.data.write();
        if !data.features.contains_key(&fid) {
            return Err(SourceError::FeatureNotFound(fid));
        }
        data.insert(feature)?;
        Ok(())
    }

    fn delete_feature(&mut self, fid: i64) -> Result<(), SourceError> {
        self.check_write(LayerCapability::DeleteFeature)?;
        self.data
            .write()
            .features
            .remove(&fid)
            .map(|_| ())
            .ok_or(SourceError::FeatureNotFound(fid))
    }
}
