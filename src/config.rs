//! Picking configuration settings.

use crate::consts::OVERVIEW_CAMERA;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Error raised by malformed or missing configuration data. Treated as fatal
/// by the picking plan.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path of the offending file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The configuration file could not be parsed.
    #[error("malformed config file {path}: {source}")]
    Malformed {
        /// Path of the offending file.
        path: String,
        /// Underlying parse error.
        source: serde_json::Error,
    },
    /// A configuration value is out of its valid range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Parameter bundle consumed by the vision pipeline and the picking plan.
/// Immutable once the plan starts; created once per run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PickingConfig {
    /// Aspirated volume per pick, in µl.
    pub vol: f64,
    /// Aspirate/dispense flow rate, in µl/s.
    pub flow_rate: f64,
    /// Height of the dish bottom above the deck, in mm.
    pub dish_bottom: f64,
    /// Pickup height above the dish bottom, in mm.
    pub pickup_offset: f64,
    /// Candidate diameter window, in µm. Bounds are exclusive.
    pub cuboid_size_threshold: (f64, f64),
    /// Radius around a previous pick position within which a re-detected
    /// object counts as a miss, in mm.
    pub failure_threshold: f64,
    /// Minimum distance to the nearest neighbor required for an isolated
    /// candidate, in mm.
    pub minimum_distance: f64,
    /// Wait time after dispensing into a destination well, in seconds.
    pub wait_time_after_deposit: f64,
    /// Destination well x offset, in mm.
    pub well_offset_x: f64,
    /// Destination well y offset, in mm.
    pub well_offset_y: f64,
    /// Z offset above the well bottom at which the deposit dispense happens,
    /// in mm.
    pub deposit_offset_z: f64,
    /// Deck slot of the destination labware.
    pub destination_slot: String,
    /// Center of the detection region, in px.
    pub circle_center: (f64, f64),
    /// Radius of the detection region, in px.
    pub circle_radius: f64,
    /// Contour area window, in px². Bounds are exclusive.
    pub contour_filter_window: (f64, f64),
    /// Bounding-box aspect ratio window. Bounds are exclusive.
    pub aspect_ratio_window: (f64, f64),
    /// Circularity window (`4πA/P²`). Bounds are exclusive.
    pub circularity_window: (f64, f64),
    /// Pick exactly one candidate per cycle instead of a batch.
    pub one_by_one: bool,
    /// Identifier of the overview camera.
    pub overview_camera: String,
}

impl Default for PickingConfig {
    fn default() -> Self {
        Self {
            vol: 10.0,
            flow_rate: 50.0,
            dish_bottom: 10.3,
            pickup_offset: 0.5,
            cuboid_size_threshold: (250.0, 500.0),
            failure_threshold: 0.5,
            minimum_distance: 1.7,
            wait_time_after_deposit: 0.5,
            well_offset_x: -0.3,
            well_offset_y: -0.9,
            deposit_offset_z: 0.0,
            destination_slot: "6".to_string(),
            circle_center: (1296.0, 972.0),
            circle_radius: 900.0,
            contour_filter_window: (30.0, 1000.0),
            aspect_ratio_window: (0.75, 1.25),
            circularity_window: (0.6, 1.2),
            one_by_one: true,
            overview_camera: OVERVIEW_CAMERA.to_string(),
        }
    }
}

impl PickingConfig {
    /// Height of the pipette tip during pickup, in mm.
    #[must_use]
    pub fn pickup_height(&self) -> f64 {
        self.dish_bottom + self.pickup_offset
    }

    /// Loads the configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Malformed {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Stores the configuration to a JSON file.
    pub fn store(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)
            .wrap_err_with(|| format!("failed to write config to {}", path.as_ref().display()))?;
        Ok(())
    }

    /// Checks value ranges which would make the run physically meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vol <= 0.0 {
            return Err(ConfigError::Invalid(format!("vol must be positive, got {}", self.vol)));
        }
        if self.flow_rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "flow_rate must be positive, got {}",
                self.flow_rate
            )));
        }
        if self.circle_radius <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "circle_radius must be positive, got {}",
                self.circle_radius
            )));
        }
        for (name, (lo, hi)) in [
            ("cuboid_size_threshold", self.cuboid_size_threshold),
            ("contour_filter_window", self.contour_filter_window),
            ("aspect_ratio_window", self.aspect_ratio_window),
            ("circularity_window", self.circularity_window),
        ] {
            if lo >= hi {
                return Err(ConfigError::Invalid(format!("{name} window is empty: ({lo}, {hi})")));
            }
        }
        Ok(())
    }
}
