use ndarray::{Array2, Zip};

use crate::types::{GeoRaster, IndexValue, NdviError, NdviResult};

/// Declared nodata value of persisted delta rasters
pub const DELTA_NODATA: IndexValue = -9999.0;

#[inline]
fn usable(value: IndexValue, nodata: Option<IndexValue>) -> bool {
    value.is_finite() && Some(value) != nodata
}

/// `to - from` wherever both composites hold a value, NaN elsewhere.
///
/// Both rasters must already share one grid; alignment is the caller's
/// precondition and a mismatch is reported, never patched up here.
pub fn composite_difference(from: &GeoRaster, to: &GeoRaster) -> NdviResult<Array2<IndexValue>> {
    if !from.same_grid(to) {
        return Err(NdviError::GridMismatch(format!(
            "composites differ in grid ({}x{} {} {:?} vs {}x{} {} {:?}); align before differencing",
            from.shape().0,
            from.shape().1,
            from.crs,
            from.transform,
            to.shape().0,
            to.shape().1,
            to.crs,
            to.transform
        )));
    }

    let from_nodata = from.nodata.map(|v| v as IndexValue);
    let to_nodata = to.nodata.map(|v| v as IndexValue);

    let delta = Zip::from(&from.data).and(&to.data).map_collect(|&a, &b| {
        if usable(a, from_nodata) && usable(b, to_nodata) {
            b - a
        } else {
            IndexValue::NAN
        }
    });

    Ok(delta)
}

/// Replace every non-finite sample with `sentinel`
pub fn fill_nodata(mut data: Array2<IndexValue>, sentinel: IndexValue) -> Array2<IndexValue> {
    data.mapv_inplace(|v| if v.is_finite() { v } else { sentinel });
    data
}

/// Persistable delta raster: difference with NaN replaced by [`DELTA_NODATA`],
/// which is also declared as the raster's nodata value
pub fn delta_raster(from: &GeoRaster, to: &GeoRaster) -> NdviResult<GeoRaster> {
    let delta = composite_difference(from, to)?;
    let data = fill_nodata(delta, DELTA_NODATA);

    let raster = GeoRaster::new(data, from.crs.clone(), from.transform).with_nodata(DELTA_NODATA as f64);
    log::info!(
        "Delta raster: {} of {} pixels carry a change value",
        raster.valid_count(),
        raster.data.len()
    );
    Ok(raster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn composite(data: Array2<f32>) -> GeoRaster {
        GeoRaster::new(
            data,
            Crs::from_epsg(32633),
            GeoTransform::north_up(500_000.0, 4_200_000.0, 10.0, -10.0),
        )
    }

    #[test]
    fn test_difference_where_both_valid() {
        let from = composite(array![[0.3f32, 0.8], [f32::NAN, 0.1]]);
        let to = composite(array![[0.5f32, 0.2], [0.4, f32::NAN]]);

        let delta = composite_difference(&from, &to).unwrap();
        assert_relative_eq!(delta[[0, 0]], 0.2, epsilon = 1e-6);
        assert_relative_eq!(delta[[0, 1]], -0.6, epsilon = 1e-6);
        assert!(delta[[1, 0]].is_nan());
        assert!(delta[[1, 1]].is_nan());
    }

    #[test]
    fn test_delta_raster_uses_sentinel_not_nan() {
        let from = composite(array![[0.3f32, f32::NAN]]);
        let to = composite(array![[0.5f32, 0.5]]);

        let delta = delta_raster(&from, &to).unwrap();
        assert_eq!(delta.nodata, Some(-9999.0));
        assert_eq!(delta.data[[0, 1]], DELTA_NODATA);
        assert!(delta.data.iter().all(|v| !v.is_nan()));
        assert_relative_eq!(delta.data[[0, 0]], 0.2, epsilon = 1e-6);
    }

    #[test]
    fn test_misaligned_inputs_are_rejected() {
        let from = composite(Array2::zeros((2, 2)));
        let mut to = composite(Array2::zeros((2, 2)));
        to.transform.top_left_y += 10.0;

        assert!(matches!(composite_difference(&from, &to), Err(NdviError::GridMismatch(_))));
    }

    #[test]
    fn test_declared_nodata_inputs_are_missing() {
        let from = composite(array![[DELTA_NODATA, 0.1]]).with_nodata(DELTA_NODATA as f64);
        let to = composite(array![[0.4f32, 0.4]]);

        let delta = composite_difference(&from, &to).unwrap();
        assert!(delta[[0, 0]].is_nan());
        assert_relative_eq!(delta[[0, 1]], 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_fill_nodata_replaces_infinities_too() {
        let filled = fill_nodata(array![[f32::INFINITY, f32::NAN, 0.0]], -1.0);
        assert_eq!(filled, array![[-1.0f32, -1.0, 0.0]]);
    }
}
