//! File-resident composite and delta artifacts.
//!
//! Artifacts are cached by existence: once a file for a key is present it is
//! returned as-is and never recomputed, even when the inputs it was derived
//! from have since changed. Deleting the file is the only invalidation.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::io::geotiff::{publish_atomically, read_geotiff, Publish};
use crate::types::{GeoRaster, NdviError, NdviResult};

const COMPOSITE_PREFIX: &str = "ndvi_median_";
const DELTA_PREFIX: &str = "ndvi_delta_";

/// Identity of a durable artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKey {
    /// Yearly composite
    Composite { year: i32 },
    /// Change layer `to_year - from_year`
    Delta { from_year: i32, to_year: i32 },
}

impl ArtifactKey {
    /// Canonical file name (the name external viewers look for)
    pub fn file_name(&self) -> String {
        match self {
            ArtifactKey::Composite { year } => format!("{}{}.tif", COMPOSITE_PREFIX, year),
            ArtifactKey::Delta { from_year, to_year } => {
                format!("{}{}_{}.tif", DELTA_PREFIX, from_year, to_year)
            }
        }
    }

    /// Accepted file names, preferred first
    fn candidate_names(&self) -> Vec<String> {
        match self {
            ArtifactKey::Composite { year } => vec![
                self.file_name(),
                format!("{}{}.tiff", COMPOSITE_PREFIX, year),
            ],
            ArtifactKey::Delta { .. } => vec![self.file_name()],
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKey::Composite { year } => write!(f, "composite {}", year),
            ArtifactKey::Delta { from_year, to_year } => write!(f, "delta {}->{}", from_year, to_year),
        }
    }
}

/// Result of a cache request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOutcome {
    pub path: PathBuf,
    /// False when an existing file was returned and the producer never ran
    pub computed: bool,
}

/// Parameter-addressed raster cache
pub trait RasterCache {
    /// Path of the stored artifact, if present
    fn lookup(&self, key: &ArtifactKey) -> Option<PathBuf>;

    /// Return the stored artifact for `key`, or produce and store it.
    ///
    /// The producer is not called when the artifact exists. Stored files are
    /// never refreshed automatically.
    fn get_or_compute<F>(&self, key: &ArtifactKey, producer: F) -> NdviResult<CacheOutcome>
    where
        F: FnOnce() -> NdviResult<GeoRaster>;

    /// Load a stored artifact; absence is `NotFound`
    fn load(&self, key: &ArtifactKey) -> NdviResult<GeoRaster> {
        let path = self
            .lookup(key)
            .ok_or_else(|| NdviError::NotFound(format!("no stored {}", key)))?;
        read_geotiff(path)
    }
}

/// Raster cache backed by one directory
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Composite for `year`, `.tif` preferred over `.tiff`
    pub fn composite_path(&self, year: i32) -> Option<PathBuf> {
        self.lookup(&ArtifactKey::Composite { year })
    }

    pub fn delta_path(&self, from_year: i32, to_year: i32) -> Option<PathBuf> {
        self.lookup(&ArtifactKey::Delta { from_year, to_year })
    }

    pub fn load_composite(&self, year: i32) -> NdviResult<GeoRaster> {
        self.load(&ArtifactKey::Composite { year })
    }

    /// Years with a stored composite, ascending and de-duplicated
    pub fn available_composite_years(&self) -> NdviResult<Vec<i32>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut years = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(year) = entry.file_name().to_str().and_then(parse_composite_year) {
                years.push(year);
            }
        }

        years.sort_unstable();
        years.dedup();
        Ok(years)
    }
}

fn parse_composite_year(name: &str) -> Option<i32> {
    let stem = name.strip_prefix(COMPOSITE_PREFIX)?;
    let year = stem.strip_suffix(".tif").or_else(|| stem.strip_suffix(".tiff"))?;
    year.parse().ok()
}

impl RasterCache for FileCache {
    fn lookup(&self, key: &ArtifactKey) -> Option<PathBuf> {
        key.candidate_names()
            .into_iter()
            .map(|name| self.root.join(name))
            .find(|path| path.is_file())
    }

    fn get_or_compute<F>(&self, key: &ArtifactKey, producer: F) -> NdviResult<CacheOutcome>
    where
        F: FnOnce() -> NdviResult<GeoRaster>,
    {
        if let Some(path) = self.lookup(key) {
            log::info!("Cache hit for {}: {}", key, path.display());
            return Ok(CacheOutcome { path, computed: false });
        }

        log::info!("Cache miss for {}; computing", key);
        let raster = producer()?;
        let path = self.root.join(key.file_name());

        let computed = match publish_atomically(&raster, &path, false)? {
            Publish::Created => true,
            Publish::AlreadyPresent => false,
        };
        Ok(CacheOutcome { path, computed })
    }
}
