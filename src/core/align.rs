use gdal::spatial_ref::CoordTransform;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::types::{Crs, GeoRaster, IndexValue, NdviResult};

/// Sampling kernel used when a raster has to be moved onto another grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    #[default]
    Nearest,
    /// Only interpolates when all contributing neighbours are valid
    Bilinear,
}

/// Map coordinates between two CRSs in traditional x/y (lon/lat) order
struct CoordinateTransformer {
    inner: CoordTransform,
}

impl CoordinateTransformer {
    fn new(from: &Crs, to: &Crs) -> NdviResult<Self> {
        let source = from.to_spatial_ref()?;
        let target = to.to_spatial_ref()?;
        source.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
        target.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);

        Ok(Self {
            inner: CoordTransform::new(&source, &target)?,
        })
    }

    /// Transform in place; points that cannot be transformed become NaN
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) {
        let mut zs = vec![0.0; xs.len()];
        let (orig_x, orig_y) = (xs.to_vec(), ys.to_vec());
        if self.inner.transform_coords(xs, ys, &mut zs).is_ok() {
            mark_failed_points(xs, ys);
            return;
        }

        // Batch failed on at least one point: retry point by point
        for i in 0..xs.len() {
            let mut x = [orig_x[i]];
            let mut y = [orig_y[i]];
            let mut z = [0.0];
            if self.inner.transform_coords(&mut x, &mut y, &mut z).is_ok() {
                xs[i] = x[0];
                ys[i] = y[0];
            } else {
                xs[i] = f64::NAN;
                ys[i] = f64::NAN;
            }
        }
        mark_failed_points(xs, ys);
    }
}

/// PROJ reports per-point failures as HUGE_VAL; normalise both axes to NaN
fn mark_failed_points(xs: &mut [f64], ys: &mut [f64]) {
    for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
        if !(x.is_finite() && y.is_finite()) {
            *x = f64::NAN;
            *y = f64::NAN;
        }
    }
}

/// Sample that carries a value (finite, not the declared sentinel)
#[inline]
fn usable(value: IndexValue, nodata: Option<IndexValue>) -> bool {
    value.is_finite() && Some(value) != nodata
}

fn sample_nearest(data: &Array2<IndexValue>, col: f64, row: f64, nodata: Option<IndexValue>) -> Option<IndexValue> {
    let (rows, cols) = data.dim();
    if !(col >= 0.0 && row >= 0.0) {
        return None;
    }
    let (c, r) = (col.floor() as usize, row.floor() as usize);
    if c >= cols || r >= rows {
        return None;
    }
    let value = data[[r, c]];
    usable(value, nodata).then_some(value)
}

fn sample_bilinear(data: &Array2<IndexValue>, col: f64, row: f64, nodata: Option<IndexValue>) -> Option<IndexValue> {
    let (rows, cols) = data.dim();
    if !(col >= 0.0 && row >= 0.0 && col < cols as f64 && row < rows as f64) {
        return None;
    }

    // Pixel centres sit at (i + 0.5); clamp the stencil at the raster edge
    let x = (col - 0.5).clamp(0.0, (cols - 1) as f64);
    let y = (row - 0.5).clamp(0.0, (rows - 1) as f64);
    let x1 = x.floor() as usize;
    let y1 = y.floor() as usize;
    let x2 = (x1 + 1).min(cols - 1);
    let y2 = (y1 + 1).min(rows - 1);
    let dx = x - x1 as f64;
    let dy = y - y1 as f64;

    let taps = [
        (y1, x1, (1.0 - dx) * (1.0 - dy)),
        (y1, x2, dx * (1.0 - dy)),
        (y2, x1, (1.0 - dx) * dy),
        (y2, x2, dx * dy),
    ];

    let mut acc = 0.0f64;
    for (r, c, weight) in taps {
        if weight == 0.0 {
            continue;
        }
        let value = data[[r, c]];
        if !usable(value, nodata) {
            return None;
        }
        acc += value as f64 * weight;
    }
    Some(acc as IndexValue)
}

/// Return `raster` on exactly the grid of `reference` (CRS, transform, shape).
///
/// Already-aligned rasters are returned untouched. Otherwise every reference
/// pixel centre is mapped into the source grid and sampled; pixels falling
/// outside the source, or touching missing data, come out missing.
pub fn align_to_reference(reference: &GeoRaster, raster: GeoRaster, resampling: Resampling) -> NdviResult<GeoRaster> {
    if reference.same_grid(&raster) {
        log::debug!("Grids already identical; alignment is a no-op");
        return Ok(raster);
    }

    let (rows, cols) = reference.shape();
    log::info!(
        "Resampling {}x{} raster onto reference grid {}x{} ({:?})",
        raster.shape().0,
        raster.shape().1,
        rows,
        cols,
        resampling
    );

    let transformer = if reference.crs != raster.crs {
        log::info!("Reprojecting from {} to {}", raster.crs, reference.crs);
        Some(CoordinateTransformer::new(&reference.crs, &raster.crs)?)
    } else {
        None
    };

    let nodata = raster.nodata.map(|v| v as IndexValue);
    let fill = nodata.unwrap_or(IndexValue::NAN);
    let (src_rows, src_cols) = raster.shape();
    let mut aligned = Array2::from_elem((rows, cols), fill);

    if src_rows > 0 && src_cols > 0 {
        let mut xs = vec![0.0; cols];
        let mut ys = vec![0.0; cols];

        for row in 0..rows {
            for col in 0..cols {
                let (x, y) = reference.transform.pixel_to_map(col as f64 + 0.5, row as f64 + 0.5);
                xs[col] = x;
                ys[col] = y;
            }
            if let Some(transformer) = &transformer {
                transformer.transform(&mut xs, &mut ys);
            }

            for col in 0..cols {
                if !(xs[col].is_finite() && ys[col].is_finite()) {
                    continue;
                }
                let Some((src_col, src_row)) = raster.transform.map_to_pixel(xs[col], ys[col]) else {
                    continue;
                };
                let sampled = match resampling {
                    Resampling::Nearest => sample_nearest(&raster.data, src_col, src_row, nodata),
                    Resampling::Bilinear => sample_bilinear(&raster.data, src_col, src_row, nodata),
                };
                if let Some(value) = sampled {
                    aligned[[row, col]] = value;
                }
            }
        }
    }

    Ok(GeoRaster {
        data: aligned,
        crs: reference.crs.clone(),
        transform: reference.transform,
        nodata: raster.nodata,
    })
}
