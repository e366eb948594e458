// SPDX-License-Identifier: Apache-2.0

//! Data source and layer handle ownership

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{OgrFdwError, OgrResult};
use crate::options::OgrOptions;
use crate::source::{DataSource, Driver, Layer, OpenRequest};

/// One data source handle and one layer handle within it
///
/// The connection strings are fixed at creation; the handles are opened
/// lazily and released exactly once, on [`close`](Self::close) or drop.
/// Nothing outside the connection can close or reopen them: the layer is
/// only lent out through [`layer_mut`](Self::layer_mut).
pub struct OgrConnection {
    datasource: String,
    format: Option<String>,
    layer_name: String,
    config_options: Vec<(String, String)>,
    open_options: Vec<(String, String)>,
    driver: Arc<dyn Driver>,
    // field order matters: the layer is released before its data source
    layer: Option<Box<dyn Layer>>,
    source: Option<Box<dyn DataSource>>,
}

impl OgrConnection {
    pub fn new(driver: Arc<dyn Driver>, options: &OgrOptions) -> Self {
        Self {
            datasource: options.datasource.clone(),
            format: options.format.clone(),
            layer_name: options.layer.clone(),
            config_options: options.config_options.clone(),
            open_options: options.open_options.clone(),
            driver,
            layer: None,
            source: None,
        }
    }

    pub fn datasource_name(&self) -> &str {
        &self.datasource
    }

    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    pub fn is_open(&self) -> bool {
        self.layer.is_some()
    }

    /// Open the data source and resolve the layer; no-op when already open
    pub fn open(&mut self, update: bool) -> OgrResult<()> {
        if self.is_open() {
            return Ok(());
        }

        let request = OpenRequest {
            datasource: self.datasource.clone(),
            format: self.format.clone(),
            config_options: self.config_options.clone(),
            open_options: self.open_options.clone(),
            update,
        };

        debug!(
            "Opening OGR data source {} (format={:?}, update={})",
            self.datasource, self.format, update
        );
        let mut source = self
            .driver
            .open(&request)
            .map_err(|e| OgrFdwError::SourceOpen {
                datasource: self.datasource.clone(),
                reason: e.to_string(),
            })?;

        let layer = source
            .layer_by_name(&self.layer_name)
            .ok_or_else(|| OgrFdwError::LayerNotFound {
                datasource: self.datasource.clone(),
                layer: self.layer_name.clone(),
            })?;

        info!("Opened OGR layer {} in {}", self.layer_name, self.datasource);
        self.layer = Some(layer);
        self.source = Some(source);
        Ok(())
    }

    /// Release both handles; safe on a closed or never-opened connection
    pub fn close(&mut self) {
        let was_open = self.is_open();
        self.layer.take();
        self.source.take();
        if was_open {
            debug!("Closed OGR layer {} in {}", self.layer_name, self.datasource);
        }
    }

    /// Borrow the open layer
    pub fn layer_mut(&mut self) -> OgrResult<&mut dyn Layer> {
        if self.layer.is_none() {
            return Err(self.not_open());
        }
        match self.layer.as_deref_mut() {
            Some(layer) => Ok(layer),
            None => Err(OgrFdwError::InvalidState("layer handle released".to_string())),
        }
    }

    pub fn layer(&self) -> OgrResult<&dyn Layer> {
        match self.layer.as_deref() {
            Some(layer) => Ok(layer),
            None => Err(self.not_open()),
        }
    }

    fn not_open(&self) -> OgrFdwError {
        OgrFdwError::InvalidState(format!(
            "connection to layer {} in {} is not open",
            self.layer_name, self.datasource
        ))
    }
}

impl Drop for OgrConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for OgrConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OgrConnection")
            .field("datasource", &self.datasource)
            .field("format", &self.format)
            .field("layer", &self.layer_name)
            .field("open", &self.is_open())
            .finish()
    }
}
