//! Index compositing and change detection

pub mod sensor;
pub mod index;
pub mod validity;
pub mod execution;
pub mod composite;
pub mod align;
pub mod change;
pub mod range;
pub mod pipeline;

// Re-export main types
pub use sensor::{SensorProfile, SensorRegistry, ValidityRule, YearRange};
pub use index::{compute_index, normalized_difference};
pub use validity::{apply_validity_mask, QualityMask};
pub use execution::ExecutionContext;
pub use composite::{composite_band_stack, temporal_composite, CompositeStatistic};
pub use align::{align_to_reference, Resampling};
pub use change::{composite_difference, delta_raster, DELTA_NODATA};
pub use range::{estimate_display_range, raster_display_range, RangeParams};
pub use pipeline::{ChangePipeline, ChangeProduct, PipelineConfig};
