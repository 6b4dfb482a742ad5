use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{NdviError, NdviResult};

/// Scene classification codes excluded by default
/// (3 shadow, 6 water, 7 unclassified, 8/9 cloud, 10 cirrus, 11 snow/ice)
pub const SCL_BAD_CLASSES: [u8; 7] = [3, 6, 7, 8, 9, 10, 11];

/// Scene classification code for saturated or defective pixels
pub const SCL_SATURATED_DEFECTIVE: u8 = 1;

/// Scene classification code for no data
pub const SCL_NO_DATA: u8 = 0;

/// QA_PIXEL bit positions
pub mod qa_bits {
    pub const FILL: u16 = 1 << 0;
    pub const DILATED_CLOUD: u16 = 1 << 1;
    pub const CIRRUS: u16 = 1 << 2;
    pub const CLOUD: u16 = 1 << 3;
    pub const CLOUD_SHADOW: u16 = 1 << 4;
    pub const SNOW: u16 = 1 << 5;
    pub const WATER: u16 = 1 << 7;
}

/// QA_PIXEL bits treated as "any set => invalid"
pub const QA_PIXEL_BAD_BITS: u16 = qa_bits::DILATED_CLOUD
    | qa_bits::CIRRUS
    | qa_bits::CLOUD
    | qa_bits::CLOUD_SHADOW
    | qa_bits::SNOW
    | qa_bits::WATER;

/// How a sensor's quality band marks unusable pixels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidityRule {
    /// Quality band holds class codes; listed codes are invalid
    Categorical { bad_classes: Vec<u8> },
    /// Quality band holds a 16-bit word; `(value & bad_mask) != 0` is invalid
    Bitmask { bad_mask: u16 },
}

impl ValidityRule {
    /// Sentinel-2 scene classification layer rule
    pub fn scene_classification(include_defective: bool) -> Self {
        let mut bad_classes = SCL_BAD_CLASSES.to_vec();
        if include_defective {
            bad_classes.push(SCL_NO_DATA);
            bad_classes.push(SCL_SATURATED_DEFECTIVE);
            bad_classes.sort_unstable();
        }
        ValidityRule::Categorical { bad_classes }
    }

    /// Landsat Collection-2 QA_PIXEL rule
    pub fn qa_pixel(include_defective: bool) -> Self {
        let mut bad_mask = QA_PIXEL_BAD_BITS;
        if include_defective {
            bad_mask |= qa_bits::FILL;
        }
        ValidityRule::Bitmask { bad_mask }
    }

    /// Same rule, additionally rejecting no-data and saturated/defective pixels
    pub fn with_defective(self) -> Self {
        match self {
            ValidityRule::Categorical { mut bad_classes } => {
                bad_classes.extend([SCL_NO_DATA, SCL_SATURATED_DEFECTIVE]);
                bad_classes.sort_unstable();
                bad_classes.dedup();
                ValidityRule::Categorical { bad_classes }
            }
            ValidityRule::Bitmask { bad_mask } => ValidityRule::Bitmask {
                bad_mask: bad_mask | qa_bits::FILL,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ValidityRule::Categorical { .. } => "categorical",
            ValidityRule::Bitmask { .. } => "bitmask",
        }
    }
}

/// Inclusive range of acquisition years
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub first: i32,
    pub last: i32,
}

impl YearRange {
    pub fn new(first: i32, last: i32) -> Self {
        Self { first, last }
    }

    pub fn contains(&self, year: i32) -> bool {
        year >= self.first && year <= self.last
    }

    pub fn overlaps(&self, other: &YearRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

fn default_raw_nodata() -> f64 {
    0.0
}

/// Per-sensor-family radiometry, band identities and validity rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorProfile {
    pub name: String,
    pub years: YearRange,
    /// reflectance = dn * scale + offset
    pub scale: f64,
    pub offset: f64,
    pub red_band: String,
    pub nir_band: String,
    pub quality_band: String,
    pub validity: ValidityRule,
    /// Digital number meaning "no acquisition"
    #[serde(default = "default_raw_nodata")]
    pub raw_nodata: f64,
}

impl SensorProfile {
    /// Landsat 4/5/7 Collection-2 Level-2 surface reflectance
    pub fn landsat_tm_etm() -> Self {
        Self {
            name: "landsat_tm_etm".to_string(),
            years: YearRange::new(1984, 2012),
            scale: 0.0000275,
            offset: -0.2,
            red_band: "SR_B3".to_string(),
            nir_band: "SR_B4".to_string(),
            quality_band: "QA_PIXEL".to_string(),
            validity: ValidityRule::qa_pixel(false),
            raw_nodata: 0.0,
        }
    }

    /// Landsat 8/9 Collection-2 Level-2 surface reflectance
    pub fn landsat_oli() -> Self {
        Self {
            name: "landsat_oli".to_string(),
            years: YearRange::new(2013, 2016),
            scale: 0.0000275,
            offset: -0.2,
            red_band: "SR_B4".to_string(),
            nir_band: "SR_B5".to_string(),
            quality_band: "QA_PIXEL".to_string(),
            validity: ValidityRule::qa_pixel(false),
            raw_nodata: 0.0,
        }
    }

    /// Sentinel-2 Level-2A bottom-of-atmosphere reflectance
    pub fn sentinel2_l2a() -> Self {
        Self {
            name: "sentinel2_l2a".to_string(),
            years: YearRange::new(2017, 2100),
            scale: 1.0 / 10_000.0,
            offset: 0.0,
            red_band: "B04".to_string(),
            nir_band: "B08".to_string(),
            quality_band: "SCL".to_string(),
            validity: ValidityRule::scene_classification(false),
            raw_nodata: 0.0,
        }
    }

    pub fn with_defective_masking(mut self) -> Self {
        self.validity = self.validity.with_defective();
        self
    }

    fn validate(&self) -> NdviResult<()> {
        if self.years.first > self.years.last {
            return Err(NdviError::Config(format!(
                "profile '{}' has an empty year range {}..={}",
                self.name, self.years.first, self.years.last
            )));
        }
        if !self.scale.is_finite() || self.scale == 0.0 || !self.offset.is_finite() {
            return Err(NdviError::Config(format!(
                "profile '{}' has unusable scale/offset ({}, {})",
                self.name, self.scale, self.offset
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(rename = "profile")]
    profiles: Vec<SensorProfile>,
}

/// Year-range lookup table of sensor profiles
#[derive(Debug, Clone)]
pub struct SensorRegistry {
    profiles: Vec<SensorProfile>,
}

impl SensorRegistry {
    /// Build a registry, rejecting malformed profiles and overlapping year ranges
    pub fn new(profiles: Vec<SensorProfile>) -> NdviResult<Self> {
        for profile in &profiles {
            profile.validate()?;
        }

        for (i, a) in profiles.iter().enumerate() {
            for b in profiles.iter().skip(i + 1) {
                if a.years.overlaps(&b.years) {
                    return Err(NdviError::Config(format!(
                        "sensor profiles '{}' ({}..={}) and '{}' ({}..={}) overlap",
                        a.name, a.years.first, a.years.last, b.name, b.years.first, b.years.last
                    )));
                }
            }
        }

        Ok(Self { profiles })
    }

    /// Landsat TM/ETM+, Landsat OLI and Sentinel-2 L2A
    pub fn standard() -> Self {
        Self::standard_with(false)
    }

    /// Built-in families, optionally also masking saturated/defective pixels
    pub fn standard_with(include_defective: bool) -> Self {
        let registry = Self {
            profiles: vec![
                SensorProfile::landsat_tm_etm(),
                SensorProfile::landsat_oli(),
                SensorProfile::sentinel2_l2a(),
            ],
        };
        if include_defective {
            registry.with_defective_masking()
        } else {
            registry
        }
    }

    /// Extend every profile's rule to no-data and saturated/defective pixels
    pub fn with_defective_masking(self) -> Self {
        Self {
            profiles: self
                .profiles
                .into_iter()
                .map(SensorProfile::with_defective_masking)
                .collect(),
        }
    }

    /// Parse a registry from `[[profile]]` TOML tables
    pub fn from_toml_str(text: &str) -> NdviResult<Self> {
        let file: RegistryFile = toml::from_str(text)?;
        Self::new(file.profiles)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> NdviResult<Self> {
        log::info!("Loading sensor registry: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// The single profile covering `year`
    pub fn resolve(&self, year: i32) -> NdviResult<&SensorProfile> {
        let mut matches = self.profiles.iter().filter(|p| p.years.contains(year));

        let profile = matches.next().ok_or_else(|| {
            NdviError::Config(format!("no sensor profile configured for year {}", year))
        })?;

        if let Some(other) = matches.next() {
            return Err(NdviError::Config(format!(
                "year {} resolves to both '{}' and '{}'",
                year, profile.name, other.name
            )));
        }

        log::debug!("Year {} resolved to sensor profile '{}'", year, profile.name);
        Ok(profile)
    }

    pub fn profiles(&self) -> &[SensorProfile] {
        &self.profiles
    }
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
