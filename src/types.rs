//! Descriptor records resolved through the session's metadata caches, plus the
//! minimal row surface returned by query commands.
//!
//! Descriptors are plain records: the session hands them out as `Arc`-shared
//! values so repeated lookups observe the identical cached instance.

use bitflags::bitflags;

bitflags! {
    /// Geometry classes a layer declares for its spatial column.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GeometryTypes: u32 {
        const POINT = 1;
        const LINESTRING = 1 << 1;
        const POLYGON = 1 << 2;
        /// Multi-part variants of the base classes are allowed.
        const MULTIPART = 1 << 3;
    }
}

/// Axis-aligned bounding box in the layer's coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }
}

/// A registered table as reported by the service catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    /// Fully qualified name, e.g. `GIS.ROADS`.
    pub qualified_name: String,
    /// Owning schema or user.
    pub owner: String,
    /// Registration id assigned by the service.
    pub registration_id: i64,
    /// Row id column maintained by the service, when the table has one.
    pub row_id_column: Option<String>,
}

/// A spatial layer registered on top of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerDescriptor {
    /// Fully qualified name of the backing table.
    pub qualified_name: String,
    /// Layer id assigned by the service.
    pub layer_id: i32,
    /// Name of the geometry column.
    pub spatial_column: String,
    /// Spatial reference system identifier.
    pub srid: i32,
    /// Geometry classes the layer accepts.
    pub geometry_types: GeometryTypes,
    /// Declared extent, when the service tracks one.
    pub extent: Option<Envelope>,
}

/// A raster column registered with the service.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterColumnDescriptor {
    /// Fully qualified name of the backing table.
    pub qualified_name: String,
    /// Raster column id assigned by the service.
    pub raster_column_id: i32,
    /// Name of the raster column.
    pub raster_column: String,
    /// Spatial reference system identifier.
    pub srid: i32,
}

/// One record of the bulk catalog enumeration: a table together with its
/// layer, when the table carries a spatial column.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRegistration {
    pub table: TableDescriptor,
    pub layer: Option<LayerDescriptor>,
}

/// A single cell value fetched from the service.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
}

pub type Row = Vec<Value>;

/// Rows fetched by a query command.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
