use ndarray::{Array, ArrayView, Dimension, Zip};

use crate::core::sensor::ValidityRule;
use crate::types::{IndexValue, NdviError, NdviResult, RawValue};

/// Precomputed per-pixel test for one validity rule
#[derive(Debug, Clone)]
pub struct QualityMask {
    kind: MaskKind,
}

#[derive(Debug, Clone)]
enum MaskKind {
    Classes(Box<[bool; 256]>),
    Bits(u16),
}

impl QualityMask {
    pub fn new(rule: &ValidityRule) -> Self {
        let kind = match rule {
            ValidityRule::Categorical { bad_classes } => {
                let mut table = Box::new([false; 256]);
                for &class in bad_classes {
                    table[class as usize] = true;
                }
                MaskKind::Classes(table)
            }
            ValidityRule::Bitmask { bad_mask } => MaskKind::Bits(*bad_mask),
        };
        Self { kind }
    }

    /// True when the quality sample marks the pixel unusable.
    ///
    /// Class codes are rounded first: resampling upstream can leave
    /// fractional codes. Non-finite quality means no observation.
    #[inline]
    pub fn is_invalid(&self, quality: RawValue) -> bool {
        if !quality.is_finite() {
            return true;
        }

        match &self.kind {
            MaskKind::Classes(table) => {
                let class = quality.round() as i16;
                (0..256).contains(&class) && table[class as usize]
            }
            MaskKind::Bits(bad_mask) => (quality as u16) & bad_mask != 0,
        }
    }
}

/// Replace index values at pixels flagged by the quality band with NaN.
///
/// Valid pixels pass through bit-for-bit, so applying the same mask twice
/// is the same as applying it once.
pub fn apply_validity_mask<D: Dimension>(
    index: ArrayView<'_, IndexValue, D>,
    quality: ArrayView<'_, RawValue, D>,
    rule: &ValidityRule,
) -> NdviResult<Array<IndexValue, D>> {
    if index.shape() != quality.shape() {
        return Err(NdviError::ShapeMismatch(format!(
            "index {:?} and quality band {:?} differ in shape",
            index.shape(),
            quality.shape()
        )));
    }

    let mask = QualityMask::new(rule);

    #[cfg(feature = "parallel")]
    let masked = Zip::from(index)
        .and(quality)
        .par_map_collect(|&value, &q| if mask.is_invalid(q) { IndexValue::NAN } else { value });

    #[cfg(not(feature = "parallel"))]
    let masked = Zip::from(index)
        .and(quality)
        .map_collect(|&value, &q| if mask.is_invalid(q) { IndexValue::NAN } else { value });

    if log::log_enabled!(log::Level::Debug) {
        let total = masked.len().max(1);
        let missing = masked.iter().filter(|v| v.is_nan()).count();
        log::debug!(
            "Validity mask ({}): {:.1}% of samples without a usable observation",
            rule.kind(),
            missing as f64 / total as f64 * 100.0
        );
    }

    Ok(masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sensor::{qa_bits, SCL_BAD_CLASSES};
    use ndarray::array;

    #[test]
    fn test_categorical_classes_masked() {
        let rule = ValidityRule::scene_classification(false);
        let index = array![[0.5f32, 0.6, 0.7, 0.8], [0.1, 0.2, 0.3, 0.4]];
        // vegetation, cloud high, water, bare soil / shadow, snow, cirrus, unclassified
        let scl = array![[4.0, 9.0, 6.0, 5.0], [3.0, 11.0, 10.0, 7.0]];

        let masked = apply_validity_mask(index.view(), scl.view(), &rule).unwrap();
        assert_eq!(masked[[0, 0]], 0.5);
        assert_eq!(masked[[0, 3]], 0.8);
        assert!(masked[[0, 1]].is_nan());
        assert!(masked[[0, 2]].is_nan());
        assert!(masked.row(1).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_fractional_class_codes_are_rounded() {
        let mask = QualityMask::new(&ValidityRule::scene_classification(false));
        assert!(mask.is_invalid(8.6)); // rounds to 9
        assert!(mask.is_invalid(7.6)); // rounds to 8
        assert!(!mask.is_invalid(4.4)); // rounds to 4
        assert!(!mask.is_invalid(300.0));
        assert!(!mask.is_invalid(-2.0));
    }

    #[test]
    fn test_every_documented_class_is_masked() {
        let mask = QualityMask::new(&ValidityRule::scene_classification(false));
        for class in SCL_BAD_CLASSES {
            assert!(mask.is_invalid(class as f64), "class {} should be masked", class);
        }
        for class in [2u8, 4, 5] {
            assert!(!mask.is_invalid(class as f64));
        }
        assert!(!mask.is_invalid(1.0));
        assert!(QualityMask::new(&ValidityRule::scene_classification(true)).is_invalid(1.0));
    }

    #[test]
    fn test_bitmask_any_bad_bit() {
        let mask = QualityMask::new(&ValidityRule::qa_pixel(false));
        // 21824 = clear land with high confidence bits only
        assert!(!mask.is_invalid(21824.0));
        assert!(mask.is_invalid((21824 | qa_bits::CLOUD) as f64));
        assert!(mask.is_invalid(qa_bits::CLOUD_SHADOW as f64));
        assert!(mask.is_invalid(qa_bits::DILATED_CLOUD as f64));
        assert!(mask.is_invalid(qa_bits::SNOW as f64));
        assert!(mask.is_invalid(qa_bits::CIRRUS as f64));
        assert!(mask.is_invalid(qa_bits::WATER as f64));
        assert!(!mask.is_invalid(qa_bits::FILL as f64));
    }

    #[test]
    fn test_non_finite_quality_is_invalid() {
        let mask = QualityMask::new(&ValidityRule::qa_pixel(false));
        assert!(mask.is_invalid(f64::NAN));
        let mask = QualityMask::new(&ValidityRule::scene_classification(false));
        assert!(mask.is_invalid(f64::INFINITY));
    }

    #[test]
    fn test_masking_is_idempotent() {
        let rule = ValidityRule::scene_classification(false);
        let index = ndarray::Array2::from_shape_fn((6, 6), |(r, c)| (r as f32 - c as f32) / 10.0);
        let scl = ndarray::Array2::from_shape_fn((6, 6), |(r, c)| ((r * 6 + c) % 12) as f64);

        let once = apply_validity_mask(index.view(), scl.view(), &rule).unwrap();
        let twice = apply_validity_mask(once.view(), scl.view(), &rule).unwrap();

        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_bitmask_masking_is_idempotent() {
        let rule = ValidityRule::qa_pixel(true);
        let index = ndarray::Array2::from_shape_fn((8, 8), |(r, c)| (c as f32 - r as f32) / 8.0);
        // Walk single bits and their combinations with the clear-land word
        let qa = ndarray::Array2::from_shape_fn((8, 8), |(r, c)| {
            let bits = 1u16 << ((r * 8 + c) % 9);
            (if c % 2 == 0 { 21824 | bits } else { bits }) as f64
        });

        let once = apply_validity_mask(index.view(), qa.view(), &rule).unwrap();
        let twice = apply_validity_mask(once.view(), qa.view(), &rule).unwrap();

        assert!(once.iter().any(|v| v.is_nan()));
        assert!(once.iter().any(|v| !v.is_nan()));
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let index = ndarray::Array2::<f32>::zeros((2, 2));
        let scl = ndarray::Array2::<f64>::zeros((2, 3));
        let rule = ValidityRule::scene_classification(false);
        assert!(matches!(
            apply_validity_mask(index.view(), scl.view(), &rule),
            Err(NdviError::ShapeMismatch(_))
        ));
    }
}
