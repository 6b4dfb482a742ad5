use ndarray::{Array, ArrayView, Dimension, Zip};

use crate::core::sensor::SensorProfile;
use crate::types::{IndexValue, NdviError, NdviResult, RawValue};

/// Added to the denominator so that nir = red = 0 reflectance stays finite
pub const INDEX_EPSILON: f64 = 1e-6;

/// Raw sample that carries no acquisition (non-finite or the profile's fill value)
#[inline]
pub fn is_raw_nodata(value: RawValue, profile: &SensorProfile) -> bool {
    !value.is_finite() || value == profile.raw_nodata
}

/// Digital number to physical reflectance
#[inline]
pub fn to_reflectance(value: RawValue, profile: &SensorProfile) -> f64 {
    value * profile.scale + profile.offset
}

/// NDVI of a single red/NIR digital-number pair
#[inline]
pub fn normalized_difference(red_dn: RawValue, nir_dn: RawValue, profile: &SensorProfile) -> IndexValue {
    if is_raw_nodata(red_dn, profile) || is_raw_nodata(nir_dn, profile) {
        return IndexValue::NAN;
    }

    let red = to_reflectance(red_dn, profile);
    let nir = to_reflectance(nir_dn, profile);
    ((nir - red) / (nir + red + INDEX_EPSILON)) as IndexValue
}

/// Compute NDVI for every sample of identically-shaped red and NIR arrays.
///
/// Works on any dimensionality, so a whole (time, row, column) stack is
/// converted in one pass. Raw nodata becomes NaN.
pub fn compute_index<D: Dimension>(
    red: ArrayView<'_, RawValue, D>,
    nir: ArrayView<'_, RawValue, D>,
    profile: &SensorProfile,
) -> NdviResult<Array<IndexValue, D>> {
    if red.shape() != nir.shape() {
        return Err(NdviError::ShapeMismatch(format!(
            "red band {:?} and NIR band {:?} differ in shape",
            red.shape(),
            nir.shape()
        )));
    }

    log::debug!(
        "Computing NDVI over {:?} samples with profile '{}' (scale {}, offset {})",
        red.shape(),
        profile.name,
        profile.scale,
        profile.offset
    );

    #[cfg(feature = "parallel")]
    let index = Zip::from(red)
        .and(nir)
        .par_map_collect(|&r, &n| normalized_difference(r, n, profile));

    #[cfg(not(feature = "parallel"))]
    let index = Zip::from(red)
        .and(nir)
        .map_collect(|&r, &n| normalized_difference(r, n, profile));

    Ok(index)
}
