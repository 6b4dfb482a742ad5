use chrono::{DateTime, Utc};
use gdal::spatial_ref::SpatialRef;
use ndarray::{Array2, Array4, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

/// Vegetation index sample (NaN = no valid observation)
pub type IndexValue = f32;

/// Raw digital-number sample as delivered by the acquisition stack
pub type RawValue = f64;

/// Affine pixel-to-map transformation (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square-ish pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinates of a (fractional) pixel position
    pub fn pixel_to_map(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Fractional pixel position of a map coordinate, `None` for a singular transform
    pub fn map_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det == 0.0 || !det.is_finite() {
            return None;
        }

        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (self.pixel_width * dy - self.rotation_y * dx) / det;
        Some((col, row))
    }
}

/// Coordinate reference system, kept as the definition string it was created from
/// (WKT, `EPSG:xxxx`, PROJ string). Equality is exact string identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs(String);

impl Crs {
    pub fn new(definition: impl Into<String>) -> Self {
        Self(definition.into())
    }

    pub fn from_epsg(code: u32) -> Self {
        Self(format!("EPSG:{}", code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_spatial_ref(&self) -> NdviResult<SpatialRef> {
        Ok(SpatialRef::from_definition(&self.0)?)
    }

    /// WKT form used when embedding the CRS in a GeoTIFF
    pub fn to_wkt(&self) -> NdviResult<String> {
        Ok(self.to_spatial_ref()?.to_wkt()?)
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.chars().count() > 48 {
            let head: String = self.0.chars().take(48).collect();
            write!(f, "{}...", head)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// One year of raw reflectance samples, indexed (time, band, row, column)
#[derive(Debug, Clone)]
pub struct BandStack {
    data: Array4<RawValue>,
    bands: Vec<String>,
    crs: Crs,
    transform: GeoTransform,
    acquisitions: Vec<DateTime<Utc>>,
}

impl BandStack {
    pub fn new(
        data: Array4<RawValue>,
        bands: Vec<String>,
        crs: Crs,
        transform: GeoTransform,
    ) -> NdviResult<Self> {
        let (_, band_count, _, _) = data.dim();
        if bands.len() != band_count {
            return Err(NdviError::ShapeMismatch(format!(
                "stack has {} bands but {} band names were given",
                band_count,
                bands.len()
            )));
        }

        Ok(Self {
            data,
            bands,
            crs,
            transform,
            acquisitions: Vec::new(),
        })
    }

    /// Attach per-slice acquisition times (one per time index)
    pub fn with_acquisitions(mut self, acquisitions: Vec<DateTime<Utc>>) -> NdviResult<Self> {
        if acquisitions.len() != self.time_steps() {
            return Err(NdviError::ShapeMismatch(format!(
                "{} acquisition times for {} time slices",
                acquisitions.len(),
                self.time_steps()
            )));
        }
        self.acquisitions = acquisitions;
        Ok(self)
    }

    /// All time slices of a named band, shaped (time, row, column)
    pub fn band(&self, name: &str) -> NdviResult<ArrayView3<'_, RawValue>> {
        let idx = self
            .bands
            .iter()
            .position(|b| b == name)
            .ok_or_else(|| {
                NdviError::NotFound(format!(
                    "band '{}' not present in stack (have {:?})",
                    name, self.bands
                ))
            })?;
        Ok(self.data.index_axis(Axis(1), idx))
    }

    pub fn time_steps(&self) -> usize {
        self.data.dim().0
    }

    /// Spatial shape as (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        let (_, _, rows, cols) = self.data.dim();
        (rows, cols)
    }

    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn acquisitions(&self) -> &[DateTime<Utc>] {
        &self.acquisitions
    }
}

/// Single-band georeferenced raster (composite or delta)
#[derive(Debug, Clone)]
pub struct GeoRaster {
    pub data: Array2<IndexValue>,
    pub crs: Crs,
    pub transform: GeoTransform,
    /// Declared nodata value; `None` means NaN marks missing pixels
    pub nodata: Option<f64>,
}

impl GeoRaster {
    pub fn new(data: Array2<IndexValue>, crs: Crs, transform: GeoTransform) -> Self {
        Self {
            data,
            crs,
            transform,
            nodata: None,
        }
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Exact grid identity: CRS, transform and pixel dimensions
    pub fn same_grid(&self, other: &GeoRaster) -> bool {
        self.crs == other.crs && self.transform == other.transform && self.shape() == other.shape()
    }

    /// Pixels that are finite and not equal to the declared nodata value
    pub fn valid_count(&self) -> usize {
        let nodata = self.nodata.map(|v| v as f32);
        self.data
            .iter()
            .filter(|v| v.is_finite() && Some(**v) != nodata)
            .count()
    }
}

/// Symmetric (or fixed) colour-scale bounds for a rendering collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayRange {
    pub vmin: f32,
    pub vmax: f32,
}

impl DisplayRange {
    /// Fixed base-layer scale so two swiped years share one colour ramp
    pub const NDVI_FIXED: DisplayRange = DisplayRange { vmin: 0.0, vmax: 1.0 };

    pub fn symmetric(magnitude: f32) -> Self {
        let m = magnitude.abs();
        Self { vmin: -m, vmax: m }
    }

    pub fn width(&self) -> f32 {
        self.vmax - self.vmin
    }
}

/// Error types for composite and change processing
#[derive(Debug, thiserror::Error)]
pub enum NdviError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl From<toml::de::Error> for NdviError {
    fn from(err: toml::de::Error) -> Self {
        NdviError::InvalidFormat(format!("TOML: {}", err))
    }
}

/// Result type for composite and change operations
pub type NdviResult<T> = Result<T, NdviError>;
