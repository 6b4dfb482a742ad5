use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::align::{align_to_reference, Resampling};
use crate::core::change::delta_raster;
use crate::core::composite::{composite_band_stack, CompositeStatistic};
use crate::core::execution::ExecutionContext;
use crate::core::range::{raster_display_range, RangeParams};
use crate::core::sensor::SensorRegistry;
use crate::io::geotiff::read_geotiff;
use crate::io::store::{ArtifactKey, FileCache, RasterCache};
use crate::types::{BandStack, DisplayRange, NdviError, NdviResult};

/// Per-run pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub statistic: CompositeStatistic,
    pub resampling: Resampling,
    pub execution: ExecutionContext,
    pub delta_range: RangeParams,
    pub index_range: RangeParams,
    /// Also mask no-data and saturated/defective pixels
    pub include_defective: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            statistic: CompositeStatistic::Median,
            resampling: Resampling::Nearest,
            execution: ExecutionContext::default(),
            delta_range: RangeParams::delta(),
            index_range: RangeParams::index(),
            include_defective: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> NdviResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> NdviResult<Self> {
        log::info!("Loading pipeline config: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> NdviResult<()> {
        self.execution.validate()?;
        for (name, params) in [("delta_range", &self.delta_range), ("index_range", &self.index_range)] {
            let ordered = params.lower_percentile <= params.upper_percentile;
            let bounded = (0.0..=100.0).contains(&params.lower_percentile)
                && (0.0..=100.0).contains(&params.upper_percentile);
            if !(ordered && bounded) {
                return Err(NdviError::Config(format!(
                    "{}: percentiles must satisfy 0 <= lower <= upper <= 100",
                    name
                )));
            }
            if !(params.fallback.is_finite() && params.fallback != 0.0) {
                return Err(NdviError::Config(format!("{}: fallback must be non-zero", name)));
            }
        }
        Ok(())
    }
}

/// Persisted change layer plus its display range
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeProduct {
    pub path: PathBuf,
    pub range: DisplayRange,
    /// False when the delta came from the cache
    pub computed: bool,
}

/// Yearly composite and year-pair change jobs over one artifact cache
#[derive(Debug, Clone)]
pub struct ChangePipeline<C: RasterCache = FileCache> {
    registry: SensorRegistry,
    cache: C,
    config: PipelineConfig,
}

impl ChangePipeline<FileCache> {
    /// Standard sensor registry and default settings over a directory
    pub fn with_directory<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            registry: SensorRegistry::standard(),
            cache: FileCache::new(root),
            config: PipelineConfig::default(),
        }
    }
}

impl<C: RasterCache> ChangePipeline<C> {
    /// `config.include_defective` extends every profile of `registry`
    pub fn new(registry: SensorRegistry, cache: C, config: PipelineConfig) -> NdviResult<Self> {
        config.validate()?;
        let registry = if config.include_defective {
            log::info!("Masking saturated/defective pixels for all sensor profiles");
            registry.with_defective_masking()
        } else {
            registry
        };
        Ok(Self {
            registry,
            cache,
            config,
        })
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    /// Build (or reuse) the composite for `year` from its band stack
    pub fn composite_year(&self, year: i32, stack: &BandStack) -> NdviResult<PathBuf> {
        let profile = self.registry.resolve(year)?;
        log::info!("Composite job for {} using sensor profile '{}'", year, profile.name);
        check_acquisition_years(year, stack);

        let outcome = self.cache.get_or_compute(&ArtifactKey::Composite { year }, || {
            composite_band_stack(stack, profile, self.config.statistic, &self.config.execution)
        })?;
        Ok(outcome.path)
    }

    /// Delta `to_year - from_year` and its symmetric display range.
    ///
    /// An existing delta file is reused untouched; the range is always
    /// estimated from the stored file.
    pub fn change_layer(&self, from_year: i32, to_year: i32) -> NdviResult<ChangeProduct> {
        let key = ArtifactKey::Delta { from_year, to_year };

        let outcome = self.cache.get_or_compute(&key, || {
            let from = self.cache.load(&ArtifactKey::Composite { year: from_year })?;
            let to = self.cache.load(&ArtifactKey::Composite { year: to_year })?;
            let to = align_to_reference(&from, to, self.config.resampling)?;
            delta_raster(&from, &to)
        })?;

        let delta = read_geotiff(&outcome.path)?;
        let range = raster_display_range(&delta, &self.config.delta_range);
        log::info!(
            "Change layer {}->{}: {} (range {:.3}..{:.3})",
            from_year,
            to_year,
            outcome.path.display(),
            range.vmin,
            range.vmax
        );

        Ok(ChangeProduct {
            path: outcome.path,
            range,
            computed: outcome.computed,
        })
    }

    /// Symmetric robust range of a stored composite
    pub fn composite_display_range(&self, year: i32) -> NdviResult<DisplayRange> {
        let composite = self.cache.load(&ArtifactKey::Composite { year })?;
        Ok(raster_display_range(&composite, &self.config.index_range))
    }
}

/// Warn about scenes dated outside the composite year; results are unaffected
fn check_acquisition_years(year: i32, stack: &BandStack) {
    let times = stack.acquisitions();
    let (Some(first), Some(last)) = (times.iter().min(), times.iter().max()) else {
        return;
    };

    log::debug!("Acquisitions span {} .. {}", first.date_naive(), last.date_naive());
    let outside = times.iter().filter(|t| t.year() != year).count();
    if outside > 0 {
        log::warn!(
            "{} of {} scenes were acquired outside {}",
            outside,
            times.len(),
            year
        );
    }
}
