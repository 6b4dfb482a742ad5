//! Python bindings for the viewer front end

use numpy::PyReadonlyArray4;
use pyo3::exceptions::{PyFileNotFoundError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::core::{ChangePipeline, CompositeStatistic, PipelineConfig, SensorRegistry};
use crate::io::FileCache;
use crate::types::{BandStack, Crs, DisplayRange, GeoTransform, NdviError};

fn to_py_err(err: NdviError) -> PyErr {
    match err {
        NdviError::NotFound(_) => PyFileNotFoundError::new_err(err.to_string()),
        NdviError::Config(_) => PyValueError::new_err(err.to_string()),
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

fn pipeline(cache_dir: String, statistic: &str, include_defective: bool) -> PyResult<ChangePipeline> {
    let config = PipelineConfig {
        statistic: statistic.parse::<CompositeStatistic>().map_err(to_py_err)?,
        include_defective,
        ..PipelineConfig::default()
    };
    ChangePipeline::new(SensorRegistry::standard(), FileCache::new(cache_dir), config).map_err(to_py_err)
}

/// Build (or reuse) the composite for `year`; returns its path
#[pyfunction]
#[pyo3(signature = (cache_dir, year, stack, bands, crs, transform, statistic = "median", include_defective = false))]
fn composite_year(
    cache_dir: String,
    year: i32,
    stack: PyReadonlyArray4<f64>,
    bands: Vec<String>,
    crs: String,
    transform: Vec<f64>,
    statistic: &str,
    include_defective: bool,
) -> PyResult<String> {
    let gt: [f64; 6] = transform
        .as_slice()
        .try_into()
        .map_err(|_| PyValueError::new_err(format!("transform needs 6 values, got {}", transform.len())))?;

    let stack = BandStack::new(
        stack.as_array().to_owned(),
        bands,
        Crs::new(crs),
        GeoTransform::from_gdal(gt),
    )
    .map_err(to_py_err)?;

    let path = pipeline(cache_dir, statistic, include_defective)?
        .composite_year(year, &stack)
        .map_err(to_py_err)?;
    Ok(path.to_string_lossy().into_owned())
}

/// Delta `to_year - from_year`: `(path, vmin, vmax)`
#[pyfunction]
fn change_layer(cache_dir: String, from_year: i32, to_year: i32) -> PyResult<(String, f32, f32)> {
    let product = pipeline(cache_dir, "median", false)?
        .change_layer(from_year, to_year)
        .map_err(to_py_err)?;
    Ok((product.path.to_string_lossy().into_owned(), product.range.vmin, product.range.vmax))
}

/// Display range of a stored composite; `fixed = True` gives the shared (0, 1) scale
#[pyfunction]
#[pyo3(signature = (cache_dir, year, fixed = true))]
fn display_range(cache_dir: String, year: i32, fixed: bool) -> PyResult<(f32, f32)> {
    let range = if fixed {
        // Keep the missing-year error even for the fixed scale
        FileCache::new(cache_dir.as_str())
            .composite_path(year)
            .ok_or_else(|| to_py_err(NdviError::NotFound(format!("no stored composite {}", year))))?;
        DisplayRange::NDVI_FIXED
    } else {
        pipeline(cache_dir, "median", false)?
            .composite_display_range(year)
            .map_err(to_py_err)?
    };
    Ok((range.vmin, range.vmax))
}

#[pyfunction]
fn available_years(cache_dir: String) -> PyResult<Vec<i32>> {
    FileCache::new(cache_dir).available_composite_years().map_err(to_py_err)
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(composite_year, m)?)?;
    m.add_function(wrap_pyfunction!(change_layer, m)?)?;
    m.add_function(wrap_pyfunction!(display_range, m)?)?;
    m.add_function(wrap_pyfunction!(available_years, m)?)?;
    Ok(())
}
