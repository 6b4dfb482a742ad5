use ndarray::{s, Array2, ArrayView1, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::core::execution::ExecutionContext;
use crate::core::index::compute_index;
use crate::core::sensor::SensorProfile;
use crate::core::validity::apply_validity_mask;
use crate::types::{BandStack, GeoRaster, IndexValue, NdviError, NdviResult};

/// Per-pixel reduction over the time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeStatistic {
    /// Robust to residual cloud; suits well-sampled years
    #[default]
    Median,
    /// Suits thin years where low outliers are mostly leftover contamination
    Max,
}

impl std::fmt::Display for CompositeStatistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompositeStatistic::Median => write!(f, "median"),
            CompositeStatistic::Max => write!(f, "max"),
        }
    }
}

impl std::str::FromStr for CompositeStatistic {
    type Err = NdviError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "median" => Ok(CompositeStatistic::Median),
            "max" => Ok(CompositeStatistic::Max),
            other => Err(NdviError::Config(format!(
                "unknown composite statistic '{}' (expected median or max)",
                other
            ))),
        }
    }
}

/// Reduce one pixel's time series, skipping non-finite observations.
/// `scratch` is reused between pixels to avoid per-pixel allocation.
fn reduce_series(series: ArrayView1<'_, IndexValue>, statistic: CompositeStatistic, scratch: &mut Vec<IndexValue>) -> IndexValue {
    scratch.clear();
    scratch.extend(series.iter().copied().filter(|v| v.is_finite()));

    if scratch.is_empty() {
        return IndexValue::NAN;
    }

    match statistic {
        CompositeStatistic::Max => scratch.iter().copied().fold(IndexValue::NEG_INFINITY, IndexValue::max),
        CompositeStatistic::Median => {
            scratch.sort_unstable_by(|a, b| a.total_cmp(b));
            let n = scratch.len();
            if n % 2 == 1 {
                scratch[n / 2]
            } else {
                ((scratch[n / 2 - 1] as f64 + scratch[n / 2] as f64) / 2.0) as IndexValue
            }
        }
    }
}

fn reduce_block(
    stack: ArrayView3<'_, IndexValue>,
    rows: (usize, usize),
    statistic: CompositeStatistic,
) -> Array2<IndexValue> {
    let block = stack.slice(s![.., rows.0..rows.1, ..]);
    let (time_steps, block_rows, cols) = block.dim();
    let mut scratch = Vec::with_capacity(time_steps);

    Array2::from_shape_fn((block_rows, cols), |(r, c)| {
        reduce_series(block.slice(s![.., r, c]), statistic, &mut scratch)
    })
}

/// Collapse a (time, row, column) index stack into one value per pixel.
///
/// Pixels with no finite observation stay NaN; any non-finite result is
/// normalised to NaN. Spatial blocks are reduced independently, so the
/// result does not depend on `ctx`.
pub fn temporal_composite(
    stack: ArrayView3<'_, IndexValue>,
    statistic: CompositeStatistic,
    ctx: &ExecutionContext,
) -> NdviResult<Array2<IndexValue>> {
    let (time_steps, rows, cols) = stack.dim();
    log::debug!(
        "Reducing {} time slices of {}x{} with {}",
        time_steps,
        rows,
        cols,
        statistic
    );

    let chunks = ctx.row_chunks(rows);
    if chunks.is_empty() {
        return Ok(Array2::from_elem((rows, cols), IndexValue::NAN));
    }

    #[cfg(feature = "parallel")]
    let blocks: Vec<Array2<IndexValue>> = {
        use rayon::prelude::*;
        chunks
            .into_par_iter()
            .map(|range| reduce_block(stack, range, statistic))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let blocks: Vec<Array2<IndexValue>> = chunks
        .into_iter()
        .map(|range| reduce_block(stack, range, statistic))
        .collect();

    let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
    let mut composite = ndarray::concatenate(Axis(0), &views)
        .map_err(|e| NdviError::Processing(format!("Failed to assemble composite blocks: {}", e)))?;

    composite.mapv_inplace(|v| if v.is_finite() { v } else { IndexValue::NAN });
    Ok(composite)
}

/// Index, mask and reduce one year's band stack into a composite raster.
///
/// The composite takes its grid from the stack, whose bands (NIR included)
/// share CRS and transform by construction.
pub fn composite_band_stack(
    stack: &BandStack,
    profile: &SensorProfile,
    statistic: CompositeStatistic,
    ctx: &ExecutionContext,
) -> NdviResult<GeoRaster> {
    log::info!(
        "Compositing {} scenes of {}x{} with profile '{}' ({})",
        stack.time_steps(),
        stack.shape().0,
        stack.shape().1,
        profile.name,
        statistic
    );

    let red = stack.band(&profile.red_band)?;
    let nir = stack.band(&profile.nir_band)?;
    let quality = stack.band(&profile.quality_band)?;

    let data = ctx.install(|| -> NdviResult<Array2<IndexValue>> {
        let index = compute_index(red, nir, profile)?;
        let masked = apply_validity_mask(index.view(), quality, &profile.validity)?;
        temporal_composite(masked.view(), statistic, ctx)
    })??;

    let raster = GeoRaster::new(data, stack.crs().clone(), *stack.transform());
    let total = raster.data.len().max(1);
    let valid = raster.valid_count();
    log::info!(
        "Composite coverage: {}/{} pixels ({:.1}%)",
        valid,
        raster.data.len(),
        valid as f64 / total as f64 * 100.0
    );
    if valid == 0 {
        log::warn!("Composite has no valid pixels; every observation was masked");
    }

    Ok(raster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform};
    use approx::assert_relative_eq;
    use ndarray::{array, Array3, Array4};

    fn series(values: &[f32]) -> Array3<f32> {
        Array3::from_shape_fn((values.len(), 1, 1), |(t, _, _)| values[t])
    }

    #[test]
    fn test_median_skips_nan() {
        let stack = series(&[0.4, f32::NAN, 0.6]);
        let out = temporal_composite(stack.view(), CompositeStatistic::Median, &ExecutionContext::default()).unwrap();
        assert_relative_eq!(out[[0, 0]], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_median_odd_count() {
        let stack = series(&[0.9, 0.1, f32::NAN, 0.3]);
        let out = temporal_composite(stack.view(), CompositeStatistic::Median, &ExecutionContext::default()).unwrap();
        assert_eq!(out[[0, 0]], 0.3);
    }

    #[test]
    fn test_max_skips_nan() {
        let stack = series(&[f32::NAN, 0.2, 0.7, f32::NAN, -0.1]);
        let out = temporal_composite(stack.view(), CompositeStatistic::Max, &ExecutionContext::default()).unwrap();
        assert_eq!(out[[0, 0]], 0.7);
    }

    #[test]
    fn test_all_nan_pixel_stays_nan() {
        let stack = series(&[f32::NAN, f32::NAN]);
        for stat in [CompositeStatistic::Median, CompositeStatistic::Max] {
            let out = temporal_composite(stack.view(), stat, &ExecutionContext::default()).unwrap();
            assert!(out[[0, 0]].is_nan());
        }
    }

    #[test]
    fn test_infinite_observations_never_reach_output() {
        let stack = series(&[f32::INFINITY, f32::NEG_INFINITY]);
        let out = temporal_composite(stack.view(), CompositeStatistic::Max, &ExecutionContext::default()).unwrap();
        assert!(out[[0, 0]].is_nan());

        let stack = series(&[f32::INFINITY, 0.25]);
        let out = temporal_composite(stack.view(), CompositeStatistic::Max, &ExecutionContext::default()).unwrap();
        assert_eq!(out[[0, 0]], 0.25);
    }

    #[test]
    fn test_chunking_does_not_change_result() {
        let stack = Array3::from_shape_fn((7, 37, 11), |(t, r, c)| {
            if (t + r + c) % 5 == 0 {
                f32::NAN
            } else {
                ((t * 31 + r * 7 + c * 3) % 200) as f32 / 100.0 - 1.0
            }
        });

        let reference =
            temporal_composite(stack.view(), CompositeStatistic::Median, &ExecutionContext::sequential()).unwrap();
        for ctx in [
            ExecutionContext::with_parallelism(4, 1),
            ExecutionContext::with_parallelism(2, 5),
            ExecutionContext::with_parallelism(3, 100),
        ] {
            let out = temporal_composite(stack.view(), CompositeStatistic::Median, &ctx).unwrap();
            assert_eq!(out.dim(), (37, 11));
            for (a, b) in reference.iter().zip(out.iter()) {
                assert_eq!(a.to_bits(), b.to_bits());
            }
        }
    }

    #[test]
    fn test_statistic_parsing() {
        assert_eq!("MEDIAN".parse::<CompositeStatistic>().unwrap(), CompositeStatistic::Median);
        assert_eq!("max".parse::<CompositeStatistic>().unwrap(), CompositeStatistic::Max);
        assert!(matches!("mean".parse::<CompositeStatistic>(), Err(NdviError::Config(_))));
    }

    #[test]
    fn test_composite_band_stack_masks_and_reduces() {
        let profile = SensorProfile::sentinel2_l2a();
        // (time, band, row, col): B04, B08, SCL
        let mut data = Array4::<f64>::zeros((2, 3, 1, 2));
        data.slice_mut(s![.., 0, .., ..]).fill(1000.0);
        data.slice_mut(s![.., 1, .., ..]).fill(3000.0);
        data.slice_mut(s![.., 2, .., ..]).fill(4.0);
        // Second scene: cloud over pixel (0, 1)
        data[[1, 2, 0, 1]] = 9.0;
        data[[1, 1, 0, 1]] = 9000.0;
        // First scene: no acquisition over pixel (0, 1)
        data[[0, 0, 0, 1]] = 0.0;

        let stack = BandStack::new(
            data,
            vec!["B04".into(), "B08".into(), "SCL".into()],
            Crs::from_epsg(32633),
            GeoTransform::north_up(0.0, 0.0, 10.0, -10.0),
        )
        .unwrap();

        let composite = composite_band_stack(&stack, &profile, CompositeStatistic::Median, &ExecutionContext::default())
            .unwrap();

        let expected = ((0.3 - 0.1) / (0.3 + 0.1 + 1e-6)) as f32;
        assert_relative_eq!(composite.data[[0, 0]], expected, epsilon = 1e-6);
        assert!(composite.data[[0, 1]].is_nan());
        assert_eq!(composite.crs, Crs::from_epsg(32633));
        assert_eq!(composite.transform, *stack.transform());
        assert_eq!(composite.nodata, None);
    }

    #[test]
    fn test_missing_quality_band_is_reported() {
        let stack = BandStack::new(
            Array4::<f64>::ones((1, 2, 2, 2)),
            vec!["B04".into(), "B08".into()],
            Crs::from_epsg(32633),
            GeoTransform::north_up(0.0, 0.0, 10.0, -10.0),
        )
        .unwrap();
        let result = composite_band_stack(
            &stack,
            &SensorProfile::sentinel2_l2a(),
            CompositeStatistic::Median,
            &ExecutionContext::default(),
        );
        assert!(matches!(result, Err(NdviError::NotFound(_))));
    }

    #[test]
    fn test_reduce_series_even_median_is_midpoint() {
        let mut scratch = Vec::new();
        let values = array![0.2f32, 0.8, 0.4, 0.6];
        assert_relative_eq!(
            reduce_series(values.view(), CompositeStatistic::Median, &mut scratch),
            0.5,
            epsilon = 1e-6
        );
    }
}
