use gdal::raster::{Buffer, RasterCreationOption};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::types::{Crs, GeoRaster, GeoTransform, NdviError, NdviResult};

/// Internal tile edge of written rasters
const BLOCK_SIZE: usize = 512;

/// Outcome of publishing a staged raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    /// This call created the target file
    Created,
    /// Another writer published the same target first; its file was kept
    AlreadyPresent,
}

/// Read band 1 of a single-band raster with its CRS, transform and nodata
pub fn read_geotiff<P: AsRef<Path>>(path: P) -> NdviResult<GeoRaster> {
    log::debug!("Reading raster: {}", path.as_ref().display());

    let dataset = Dataset::open(path.as_ref())?;
    let (width, height) = dataset.raster_size();
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);

    let projection = dataset.projection();
    if projection.is_empty() {
        return Err(NdviError::InvalidFormat(format!(
            "{} has no coordinate reference system",
            path.as_ref().display()
        )));
    }

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value();
    let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

    let data = Array2::from_shape_vec((height, width), band_data.data)
        .map_err(|e| NdviError::InvalidFormat(format!("Failed to reshape raster data: {}", e)))?;

    Ok(GeoRaster {
        data,
        crs: Crs::new(projection),
        transform,
        nodata,
    })
}

fn memory_dataset(raster: &GeoRaster) -> NdviResult<Dataset> {
    let (height, width) = raster.shape();
    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut dataset = driver.create_with_band_type::<f32, _>("", width as isize, height as isize, 1)?;

    dataset.set_geo_transform(&raster.transform.to_gdal())?;
    dataset.set_projection(&raster.crs.to_wkt()?)?;

    {
        let mut rasterband = dataset.rasterband(1)?;
        let flat_data: Vec<f32> = raster.data.iter().copied().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;

        if let Some(nodata) = raster.nodata {
            rasterband.set_no_data_value(Some(nodata))?;
        }
    }

    Ok(dataset)
}

/// Power-of-two overview factors until the coarsest level fits in one tile
fn overview_levels(width: usize, height: usize) -> Vec<i32> {
    let mut levels = Vec::new();
    let mut factor = 2usize;
    while width.max(height) / factor >= BLOCK_SIZE / 2 {
        levels.push(factor as i32);
        factor *= 2;
    }
    levels
}

/// Write a DEFLATE-compressed, tiled raster with overviews.
///
/// Uses GDAL's COG driver when present; otherwise a tiled GeoTIFF with
/// internal overviews built in place.
pub fn write_cog<P: AsRef<Path>>(raster: &GeoRaster, path: P) -> NdviResult<()> {
    let (height, width) = raster.shape();
    log::debug!("Writing {}x{} raster: {}", height, width, path.as_ref().display());

    let source = memory_dataset(raster)?;
    let block = BLOCK_SIZE.to_string();

    match DriverManager::get_driver_by_name("COG") {
        Ok(driver) => {
            let options = [
                RasterCreationOption { key: "COMPRESS", value: "DEFLATE" },
                RasterCreationOption { key: "BLOCKSIZE", value: block.as_str() },
                RasterCreationOption { key: "OVERVIEW_RESAMPLING", value: "NEAREST" },
                RasterCreationOption { key: "BIGTIFF", value: "IF_SAFER" },
                RasterCreationOption { key: "NUM_THREADS", value: "ALL_CPUS" },
            ];
            let written = source.create_copy(&driver, path.as_ref(), &options)?;
            drop(written);
        }
        Err(_) => {
            log::warn!("COG driver unavailable; writing tiled GeoTIFF with internal overviews");
            let driver = DriverManager::get_driver_by_name("GTiff")?;
            let options = [
                RasterCreationOption { key: "COMPRESS", value: "DEFLATE" },
                RasterCreationOption { key: "TILED", value: "YES" },
                RasterCreationOption { key: "BLOCKXSIZE", value: block.as_str() },
                RasterCreationOption { key: "BLOCKYSIZE", value: block.as_str() },
                RasterCreationOption { key: "BIGTIFF", value: "IF_SAFER" },
            ];
            let mut written = source.create_copy(&driver, path.as_ref(), &options)?;
            let levels = overview_levels(width, height);
            if !levels.is_empty() {
                written.build_overviews("NEAREST", &levels, &[])?;
            }
        }
    }

    Ok(())
}

/// Write `raster` to `target` so that readers only ever see a complete file.
///
/// The raster is staged in a private directory next to the target and then
/// published in one filesystem operation. With `overwrite = false` the
/// publish is a hard link, which fails if the target exists; the earlier
/// file then wins and the staged copy is discarded. Where hard links are
/// unsupported the same guarantee comes from a lock-guarded rename.
pub fn publish_atomically<P: AsRef<Path>>(raster: &GeoRaster, target: P, overwrite: bool) -> NdviResult<Publish> {
    let target = target.as_ref();
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    fs::create_dir_all(&dir)?;

    let file_name = target
        .file_name()
        .ok_or_else(|| NdviError::Processing(format!("{} is not a file path", target.display())))?;

    let staging = tempfile::Builder::new().prefix(".staging-").tempdir_in(&dir)?;
    let staged = staging.path().join(file_name);
    write_cog(raster, &staged)?;

    if overwrite {
        fs::rename(&staged, target)?;
        log::info!("Published {}", target.display());
        return Ok(Publish::Created);
    }

    match fs::hard_link(&staged, target) {
        Ok(()) => {
            log::info!("Published {}", target.display());
            Ok(Publish::Created)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            log::info!("{} was published concurrently; keeping the existing file", target.display());
            Ok(Publish::AlreadyPresent)
        }
        Err(e) => {
            log::warn!("Hard link publish failed ({}); falling back to a locked rename", e);
            publish_with_lock(&staged, target)
        }
    }
}

/// No-clobber publish for filesystems without hard links.
///
/// Writers serialise on an exclusively created `<target>.lock`; the holder
/// renames only when the target is still absent. A held lock is reported as
/// an error rather than waited on.
fn publish_with_lock(staged: &Path, target: &Path) -> NdviResult<Publish> {
    let mut lock_name = target.as_os_str().to_owned();
    lock_name.push(".lock");
    let lock_path = PathBuf::from(lock_name);

    match fs::OpenOptions::new().write(true).create_new(true).open(&lock_path) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(NdviError::Processing(format!(
                "{} is being published by another writer (lock file {})",
                target.display(),
                lock_path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    }

    let outcome = if target.exists() {
        log::info!("{} was published concurrently; keeping the existing file", target.display());
        Ok(Publish::AlreadyPresent)
    } else {
        fs::rename(staged, target)
            .map(|_| {
                log::info!("Published {}", target.display());
                Publish::Created
            })
            .map_err(NdviError::from)
    };

    if let Err(e) = fs::remove_file(&lock_path) {
        log::warn!("Failed to remove publish lock {}: {}", lock_path.display(), e);
    }
    outcome
}
