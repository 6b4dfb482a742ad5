use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::types::{DisplayRange, GeoRaster, IndexValue};

/// Percentile-clipped symmetric range parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeParams {
    /// Lower percentile in [0, 100]
    pub lower_percentile: f64,
    /// Upper percentile in [0, 100]
    pub upper_percentile: f64,
    /// Smallest magnitude returned for data-bearing rasters
    pub floor: f32,
    /// Magnitude returned when no valid value exists; must be non-zero
    pub fallback: f32,
}

impl RangeParams {
    /// Change layers
    pub fn delta() -> Self {
        Self {
            lower_percentile: 2.0,
            upper_percentile: 98.0,
            floor: 0.05,
            fallback: 0.3,
        }
    }

    /// Base index layers
    pub fn index() -> Self {
        Self {
            fallback: 0.1,
            ..Self::delta()
        }
    }

    fn fallback_range(&self) -> DisplayRange {
        let magnitude = if self.fallback.is_finite() && self.fallback != 0.0 {
            self.fallback
        } else {
            Self::delta().fallback
        };
        DisplayRange::symmetric(magnitude)
    }
}

impl Default for RangeParams {
    fn default() -> Self {
        Self::delta()
    }
}

/// Linear-interpolated percentile of an ascending-sorted slice
fn percentile(sorted: &[IndexValue], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let q = q.clamp(0.0, 100.0);
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] as f64 + (sorted[hi] as f64 - sorted[lo] as f64) * frac
}

/// Symmetric display range `(-m, m)` with `m = max(|p_lo|, |p_hi|, floor)`.
///
/// Values that are non-finite or equal to `nodata` are ignored; with none
/// left, the configured fallback range is returned. Never zero-width.
pub fn estimate_display_range(values: ArrayView2<'_, IndexValue>, nodata: Option<f64>, params: &RangeParams) -> DisplayRange {
    let nodata = nodata.map(|v| v as IndexValue);
    let mut valid: Vec<IndexValue> = values
        .iter()
        .copied()
        .filter(|v| v.is_finite() && Some(*v) != nodata)
        .collect();

    if valid.is_empty() {
        let range = params.fallback_range();
        log::warn!(
            "No valid pixels for range estimation; using fallback ({}, {})",
            range.vmin,
            range.vmax
        );
        return range;
    }

    valid.sort_unstable_by(|a, b| a.total_cmp(b));
    let low = percentile(&valid, params.lower_percentile);
    let high = percentile(&valid, params.upper_percentile);

    let floor = if params.floor.is_finite() { params.floor.abs() } else { 0.0 };
    let magnitude = (low.abs().max(high.abs()) as IndexValue).max(floor);
    if magnitude == 0.0 {
        return params.fallback_range();
    }

    log::debug!(
        "Display range from {} pixels: p{}={:.4}, p{}={:.4} -> +/-{:.4}",
        valid.len(),
        params.lower_percentile,
        low,
        params.upper_percentile,
        high,
        magnitude
    );
    DisplayRange::symmetric(magnitude)
}

/// [`estimate_display_range`] over a raster using its declared nodata
pub fn raster_display_range(raster: &GeoRaster, params: &RangeParams) -> DisplayRange {
    estimate_display_range(raster.data.view(), raster.nodata, params)
}
