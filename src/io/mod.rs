//! Raster files and the artifact cache

pub mod geotiff;
pub mod store;

pub use geotiff::{publish_atomically, read_geotiff, write_cog, Publish};
pub use store::{ArtifactKey, CacheOutcome, FileCache, RasterCache};
