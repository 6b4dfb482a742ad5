use approx::assert_relative_eq;
use canopy::core::{ChangePipeline, DELTA_NODATA};
use canopy::io::{read_geotiff, write_cog};
use canopy::types::{Crs, DisplayRange, GeoRaster, GeoTransform, NdviError};
use ndarray::Array2;
use std::path::Path;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn utm_grid() -> GeoTransform {
    GeoTransform::north_up(500_000.0, 4_200_000.0, 10.0, -10.0)
}

fn store_composite(dir: &Path, year: i32, raster: &GeoRaster) {
    write_cog(raster, dir.join(format!("ndvi_median_{}.tif", year))).expect("Failed to write composite");
}

fn constant_composite(value: f32, crs: Crs, transform: GeoTransform) -> GeoRaster {
    GeoRaster::new(Array2::from_elem((4, 4), value), crs, transform)
}

#[test]
fn test_delta_and_symmetric_range() {
    init_logging();
    let dir = TempDir::new().unwrap();
    store_composite(dir.path(), 2019, &constant_composite(0.3, Crs::from_epsg(32633), utm_grid()));
    store_composite(dir.path(), 2024, &constant_composite(0.5, Crs::from_epsg(32633), utm_grid()));

    let pipeline = ChangePipeline::with_directory(dir.path());
    let product = pipeline.change_layer(2019, 2024).expect("Change job failed");

    assert!(product.computed);
    assert_eq!(product.path, dir.path().join("ndvi_delta_2019_2024.tif"));
    assert_relative_eq!(product.range.vmax, 0.2, epsilon = 1e-5);
    assert_relative_eq!(product.range.vmin, -0.2, epsilon = 1e-5);

    let delta = read_geotiff(&product.path).unwrap();
    assert_eq!(delta.nodata, Some(-9999.0));
    for value in delta.data.iter() {
        assert_relative_eq!(*value, 0.2, epsilon = 1e-5);
    }
}

#[test]
fn test_missing_pixels_are_written_as_sentinel() {
    init_logging();
    let dir = TempDir::new().unwrap();

    let mut from = constant_composite(0.3, Crs::from_epsg(32633), utm_grid());
    from.data[[0, 0]] = f32::NAN;
    let mut to = constant_composite(0.5, Crs::from_epsg(32633), utm_grid());
    to.data[[3, 3]] = f32::NAN;
    store_composite(dir.path(), 2019, &from);
    store_composite(dir.path(), 2024, &to);

    let pipeline = ChangePipeline::with_directory(dir.path());
    let product = pipeline.change_layer(2019, 2024).unwrap();
    let delta = read_geotiff(&product.path).unwrap();

    assert!(delta.data.iter().all(|v| !v.is_nan()));
    assert_eq!(delta.data[[0, 0]], DELTA_NODATA);
    assert_eq!(delta.data[[3, 3]], DELTA_NODATA);
    assert_eq!(delta.valid_count(), 14);
    assert_relative_eq!(product.range.vmax, 0.2, epsilon = 1e-5);
}

#[test]
fn test_existing_delta_is_reused_untouched() {
    init_logging();
    let dir = TempDir::new().unwrap();
    store_composite(dir.path(), 2019, &constant_composite(0.3, Crs::from_epsg(32633), utm_grid()));
    store_composite(dir.path(), 2024, &constant_composite(0.5, Crs::from_epsg(32633), utm_grid()));

    let pipeline = ChangePipeline::with_directory(dir.path());
    let first = pipeline.change_layer(2019, 2024).unwrap();
    let bytes = std::fs::read(&first.path).unwrap();

    // A later composite change does not invalidate the stored delta
    std::fs::remove_file(dir.path().join("ndvi_median_2024.tif")).unwrap();
    store_composite(dir.path(), 2024, &constant_composite(0.9, Crs::from_epsg(32633), utm_grid()));

    let second = pipeline.change_layer(2019, 2024).unwrap();
    assert!(!second.computed);
    assert_eq!(second.path, first.path);
    assert_eq!(second.range, first.range);
    assert_eq!(std::fs::read(&second.path).unwrap(), bytes);
}

#[test]
fn test_missing_composite_is_not_found() {
    init_logging();
    let dir = TempDir::new().unwrap();
    store_composite(dir.path(), 2019, &constant_composite(0.3, Crs::from_epsg(32633), utm_grid()));

    let pipeline = ChangePipeline::with_directory(dir.path());
    let result = pipeline.change_layer(2019, 2024);

    assert!(matches!(result, Err(NdviError::NotFound(_))));
    assert!(!dir.path().join("ndvi_delta_2019_2024.tif").exists());
}

#[test]
fn test_equivalent_crs_definitions_align_without_resampling() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let wkt = Crs::from_epsg(32633).to_wkt().expect("Failed to expand EPSG code");

    store_composite(dir.path(), 2019, &constant_composite(0.3, Crs::from_epsg(32633), utm_grid()));
    store_composite(dir.path(), 2024, &constant_composite(0.5, Crs::new(wkt), utm_grid()));

    let pipeline = ChangePipeline::with_directory(dir.path());
    let product = pipeline.change_layer(2019, 2024).unwrap();
    let delta = read_geotiff(&product.path).unwrap();

    assert_eq!(delta.valid_count(), 16);
    for value in delta.data.iter() {
        assert_relative_eq!(*value, 0.2, epsilon = 1e-5);
    }
}

#[test]
fn test_shifted_grid_is_aligned_to_earlier_year() {
    init_logging();
    let dir = TempDir::new().unwrap();

    let from = constant_composite(0.3, Crs::from_epsg(32633), utm_grid());
    // One pixel east; columns hold distinct values to trace the shift
    let to_data = Array2::from_shape_fn((4, 4), |(_, c)| 0.4 + c as f32 * 0.1);
    let to = GeoRaster::new(
        to_data,
        Crs::from_epsg(32633),
        GeoTransform::north_up(500_010.0, 4_200_000.0, 10.0, -10.0),
    );
    store_composite(dir.path(), 2019, &from);
    store_composite(dir.path(), 2024, &to);

    let pipeline = ChangePipeline::with_directory(dir.path());
    let product = pipeline.change_layer(2019, 2024).unwrap();
    let delta = read_geotiff(&product.path).unwrap();

    assert_eq!(delta.transform, utm_grid());
    assert_eq!(delta.shape(), (4, 4));
    for row in 0..4 {
        assert_eq!(delta.data[[row, 0]], DELTA_NODATA);
        assert_relative_eq!(delta.data[[row, 1]], 0.1, epsilon = 1e-5);
        assert_relative_eq!(delta.data[[row, 3]], 0.3, epsilon = 1e-5);
    }
}

#[test]
fn test_composite_display_ranges() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let mut composite = constant_composite(0.7, Crs::from_epsg(32633), utm_grid());
    composite.data[[2, 2]] = f32::NAN;
    store_composite(dir.path(), 2020, &composite);

    let pipeline = ChangePipeline::with_directory(dir.path());
    let range = pipeline.composite_display_range(2020).unwrap();
    assert_relative_eq!(range.vmax, 0.7, epsilon = 1e-5);
    assert_eq!(range.vmin, -range.vmax);

    assert_eq!(DisplayRange::NDVI_FIXED, DisplayRange { vmin: 0.0, vmax: 1.0 });
    assert!(matches!(pipeline.composite_display_range(2021), Err(NdviError::NotFound(_))));
}
