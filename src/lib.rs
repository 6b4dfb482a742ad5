//! Canopy: cloud-masked yearly NDVI composites and change layers
//!
//! Raw surface-reflectance band stacks go in; per-year composite rasters and
//! year-pair delta rasters (with a stable display range) come out, persisted
//! as Cloud-Optimized GeoTIFFs next to each other in one directory.

pub mod types;
pub mod core;
pub mod io;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    BandStack, Crs, DisplayRange, GeoRaster, GeoTransform, IndexValue, NdviError, NdviResult, RawValue,
};

pub use crate::core::{
    ChangePipeline, ChangeProduct, CompositeStatistic, ExecutionContext, PipelineConfig, RangeParams, Resampling,
    SensorProfile, SensorRegistry,
};
pub use io::{ArtifactKey, FileCache, RasterCache};
