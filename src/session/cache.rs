//! Per-session metadata caches.
//!
//! Qualified names are matched case-insensitively. The table and layer maps
//! are populated together by one bulk catalog enumeration; raster columns are
//! populated by their own bulk query. Invalidation is wholesale, never
//! per-entry. All access happens on the session's confined worker, so no
//! locking is needed here.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{LayerDescriptor, RasterColumnDescriptor, TableDescriptor, TableRegistration};

fn cache_key(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

#[derive(Default)]
pub(crate) struct MetadataCache {
    tables: HashMap<String, Arc<TableDescriptor>>,
    layers: HashMap<String, Arc<LayerDescriptor>>,
    rasters: HashMap<String, Arc<RasterColumnDescriptor>>,
    tables_populated: bool,
    rasters_populated: bool,
}

impl MetadataCache {
    pub fn table(&self, name: &str) -> Option<Arc<TableDescriptor>> {
        self.tables.get(&cache_key(name)).cloned()
    }

    pub fn layer(&self, name: &str) -> Option<Arc<LayerDescriptor>> {
        self.layers.get(&cache_key(name)).cloned()
    }

    pub fn raster_column(&self, name: &str) -> Option<Arc<RasterColumnDescriptor>> {
        self.rasters.get(&cache_key(name)).cloned()
    }

    pub fn tables_populated(&self) -> bool {
        self.tables_populated
    }

    pub fn rasters_populated(&self) -> bool {
        self.rasters_populated
    }

    /// Replaces the table and layer maps with the result of one bulk catalog
    /// enumeration.
    pub fn store_registrations(&mut self, registrations: Vec<TableRegistration>) {
        self.tables.clear();
        self.layers.clear();
        for registration in registrations {
            let key = cache_key(&registration.table.qualified_name);
            self.tables.insert(key, Arc::new(registration.table));
            if let Some(layer) = registration.layer {
                self.layers
                    .insert(cache_key(&layer.qualified_name), Arc::new(layer));
            }
        }
        self.tables_populated = true;
    }

    /// Replaces the raster column map with the result of its bulk query.
    pub fn store_raster_columns(&mut self, columns: Vec<RasterColumnDescriptor>) {
        self.rasters.clear();
        for column in columns {
            self.rasters
                .insert(cache_key(&column.qualified_name), Arc::new(column));
        }
        self.rasters_populated = true;
    }

    /// Drops every cached descriptor. The next lookup repopulates from the
    /// service.
    pub fn invalidate_all(&mut self) {
        self.tables.clear();
        self.layers.clear();
        self.rasters.clear();
        self.tables_populated = false;
        self.rasters_populated = false;
    }
}
