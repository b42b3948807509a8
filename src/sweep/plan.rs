//! Validated sweep geometry and exposure bracketing.

use crate::config::SweepSettings;
use crate::error::{RigError, RigResult};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Full travel of the stage in controller units.
pub const TRAVEL_UNITS: u32 = 1000;

/// Coordinate of the home position.
pub const HOME_POSITION: u32 = 0;

/// Sweep parameters that passed validation.
///
/// Constructing a plan is the only check between the configuration and the
/// hardware: every accessor assumes `n_views >= 2`.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    n_views: u32,
    n_exposures: u32,
    stops: f64,
    base_exposure: f64,
    output_path: PathBuf,
    file_extension: String,
}

impl SweepPlan {
    /// Validate `settings`.
    ///
    /// # Errors
    ///
    /// `Configuration` when the positions cannot be spaced on the travel
    /// range (`n_views < 2` or more views than controller units), when no
    /// exposure is requested, when the capture count overflows `u32`, or when
    /// the exposure arithmetic or the file extension is unusable.
    pub fn new(settings: &SweepSettings) -> RigResult<Self> {
        if settings.n_views < 2 {
            return Err(RigError::Configuration(format!(
                "n_views must be at least 2, got {}",
                settings.n_views
            )));
        }
        if settings.n_views > TRAVEL_UNITS + 1 {
            return Err(RigError::Configuration(format!(
                "n_views must not exceed {}, got {}",
                TRAVEL_UNITS + 1,
                settings.n_views
            )));
        }
        if settings.n_exposures < 1 {
            return Err(RigError::Configuration(
                "n_exposures must be at least 1".to_string(),
            ));
        }
        if settings.n_views.checked_mul(settings.n_exposures).is_none() {
            return Err(RigError::Configuration(format!(
                "{} views x {} exposures exceeds the capture counter",
                settings.n_views, settings.n_exposures
            )));
        }
        if !settings.base_exposure.is_finite() || settings.base_exposure <= 0.0 {
            return Err(RigError::Configuration(format!(
                "base_exposure must be a positive number of seconds, got {}",
                settings.base_exposure
            )));
        }
        if !settings.stops.is_finite() {
            return Err(RigError::Configuration(format!(
                "stops must be finite, got {}",
                settings.stops
            )));
        }

        let file_extension = settings.file_extension.trim_start_matches('.').to_string();
        if file_extension.is_empty() || file_extension.contains('/') {
            return Err(RigError::Configuration(format!(
                "invalid file_extension '{}'",
                settings.file_extension
            )));
        }

        let plan = Self {
            n_views: settings.n_views,
            n_exposures: settings.n_exposures,
            stops: settings.stops,
            base_exposure: settings.base_exposure,
            output_path: settings.output_path.clone(),
            file_extension,
        };

        let longest = plan.shutter_speed(plan.n_exposures - 1);
        if !longest.is_finite() || longest <= 0.0 {
            return Err(RigError::Configuration(format!(
                "bracket of {} exposures at {} stops overflows the shutter speed",
                plan.n_exposures, plan.stops
            )));
        }

        Ok(plan)
    }

    pub fn n_views(&self) -> u32 {
        self.n_views
    }

    pub fn n_exposures(&self) -> u32 {
        self.n_exposures
    }

    pub fn stops(&self) -> f64 {
        self.stops
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Extension without the leading dot.
    pub fn file_extension(&self) -> &str {
        &self.file_extension
    }

    pub fn positions(&self) -> Range<u32> {
        0..self.n_views
    }

    pub fn exposure_steps(&self) -> Range<u32> {
        0..self.n_exposures
    }

    pub fn is_last_position(&self, position: u32) -> bool {
        position + 1 == self.n_views
    }

    /// Controller coordinate of `position`: `floor(position * 1000 / (n_views - 1))`.
    ///
    /// The product is taken before dividing so the last position lands on
    /// exactly [`TRAVEL_UNITS`].
    pub fn coordinate(&self, position: u32) -> u32 {
        let scaled = u64::from(position) * u64::from(TRAVEL_UNITS) / u64::from(self.n_views - 1);
        u32::try_from(scaled).unwrap_or(u32::MAX)
    }

    /// Every coordinate the stage visits, in order, excluding the final return home.
    pub fn coordinates(&self) -> Vec<u32> {
        self.positions().map(|p| self.coordinate(p)).collect()
    }

    /// Exposure value offset of a bracket step, `stops * step`.
    pub fn exposure_value(&self, step: u32) -> f64 {
        // step 0 is always +0.0, even for negative stops
        if step == 0 {
            return 0.0;
        }
        self.stops * f64::from(step)
    }

    /// Shutter speed in seconds, `base_exposure * 2^(stops * step)`.
    pub fn shutter_speed(&self, step: u32) -> f64 {
        self.base_exposure * self.exposure_value(step).exp2()
    }

    /// Running capture number across the sweep.
    ///
    /// Cannot overflow: `new` rejects plans whose capture count exceeds `u32`.
    pub fn sequence_index(&self, position: u32, step: u32) -> u32 {
        position * self.n_exposures + step
    }

    pub fn total_captures(&self) -> u32 {
        self.n_views * self.n_exposures
    }
}
