//! Typed configuration loading and validation.
//!
//! Configuration is loaded from a TOML file merged with `CAM_SYNC_`-prefixed
//! environment variable overrides, then validated once. All semantic checks
//! (exposure bounds, brightness target range, master/follower wiring) happen
//! here, before any camera is opened: a follower naming a missing master is a
//! startup failure, never a per-frame one.
//!
//! # Example
//!
//! ```toml
//! [[cameras]]
//! name = "cam0"
//! serial = "21039765"
//!
//! [cameras.exposure_controller]
//! type = "master"
//! brightness_target = 120
//! brightness_tolerance = 10
//! min_exposure_time = 1000
//! max_exposure_time = 100000
//! max_gain = 0.0
//!
//! [[cameras]]
//! name = "cam1"
//! serial = "21081518"
//!
//! [cameras.exposure_controller]
//! type = "follower"
//! master = "cam0"
//! ```

use std::collections::HashSet;
use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::camera::{CameraIdentity, PixelFormat, RegionOfInterest};
use crate::error::{AppResult, CamSyncError};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Application settings.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// One entry per camera in the synchronized group.
    pub cameras: Vec<CameraDefinition>,
}

/// Application-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name used in logs.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

/// One camera and its exposure controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraDefinition {
    /// Unique camera name, e.g. `cam0`.
    pub name: String,
    /// Hardware serial number.
    pub serial: String,
    /// Frame id for outgoing frames; defaults to the camera name.
    #[serde(default)]
    pub frame_id: Option<String>,
    /// Pixel format delivered by the camera.
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,
    /// Exposure controller settings for this camera.
    pub exposure_controller: ExposureControlConfig,
}

impl CameraDefinition {
    /// Immutable identity derived from this definition.
    pub fn identity(&self) -> CameraIdentity {
        CameraIdentity {
            name: self.name.clone(),
            serial: self.serial.clone(),
            frame_id: self.frame_id.clone().unwrap_or_else(|| self.name.clone()),
        }
    }
}

/// Role of a controller within its synchronization group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerRole {
    /// Runs the closed brightness loop and broadcasts its decisions.
    Master,
    /// Mirrors its master's decisions; never solves locally.
    Follower,
}

/// Exposure controller settings, loaded once at startup and immutable
/// thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureControlConfig {
    /// Controller role.
    #[serde(rename = "type")]
    pub role: ControllerRole,
    /// Name of the master camera. Required iff `type = "follower"`.
    #[serde(default)]
    pub master: Option<String>,
    /// Brightness setpoint in [0, 255].
    #[serde(default = "default_brightness_target")]
    pub brightness_target: f64,
    /// Dead-band half-width around the setpoint; no correction is applied
    /// while the measured brightness stays inside it.
    #[serde(default = "default_brightness_tolerance")]
    pub brightness_tolerance: f64,
    /// Lower exposure bound, microseconds.
    #[serde(default = "default_min_exposure_time")]
    pub min_exposure_time: f64,
    /// Upper exposure bound, microseconds. Must stay short enough to support
    /// the external trigger rate.
    #[serde(default = "default_max_exposure_time")]
    pub max_exposure_time: f64,
    /// Gain ceiling in dB; 0 disables gain increases entirely.
    #[serde(default = "default_max_gain")]
    pub max_gain: f64,
    /// Correct with gain before exposure time (for trigger-rate-constrained
    /// setups that must hold exposure short).
    #[serde(default)]
    pub gain_priority: bool,
    /// Frames to skip after pushing new settings, waiting for them to reach
    /// the sensor.
    #[serde(default = "default_max_frames_skip")]
    pub max_frames_skip: u32,
    /// Brightness ROI; defaults to a central region of the frame.
    #[serde(default)]
    pub roi: Option<RegionOfInterest>,
    /// Subsampling stride for brightness estimation.
    #[serde(default = "default_pixel_skip")]
    pub pixel_skip: u32,
}

fn default_app_name() -> String {
    "cam-sync".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_pixel_format() -> PixelFormat {
    PixelFormat::Mono8
}
fn default_brightness_target() -> f64 {
    120.0
}
fn default_brightness_tolerance() -> f64 {
    5.0
}
fn default_min_exposure_time() -> f64 {
    10.0
}
fn default_max_exposure_time() -> f64 {
    1000.0
}
fn default_max_gain() -> f64 {
    10.0
}
fn default_max_frames_skip() -> u32 {
    10
}
fn default_pixel_skip() -> u32 {
    1
}

impl ExposureControlConfig {
    /// Validate bounds that must hold regardless of role.
    fn validate(&self, camera: &str) -> AppResult<()> {
        if !(0.0..=255.0).contains(&self.brightness_target) {
            return Err(CamSyncError::Configuration(format!(
                "{camera}: brightness_target {} outside [0, 255]",
                self.brightness_target
            )));
        }
        if self.brightness_tolerance < 0.0 {
            return Err(CamSyncError::Configuration(format!(
                "{camera}: brightness_tolerance must be >= 0"
            )));
        }
        if self.min_exposure_time <= 0.0 || self.min_exposure_time > self.max_exposure_time {
            return Err(CamSyncError::Configuration(format!(
                "{camera}: exposure bounds [{}, {}] invalid",
                self.min_exposure_time, self.max_exposure_time
            )));
        }
        if self.max_gain < 0.0 {
            return Err(CamSyncError::Configuration(format!(
                "{camera}: max_gain must be >= 0"
            )));
        }
        match self.role {
            ControllerRole::Master => {
                if self.master.is_some() {
                    return Err(CamSyncError::Configuration(format!(
                        "{camera}: role is master but a master reference is set"
                    )));
                }
            }
            ControllerRole::Follower => {
                if self.master.is_none() {
                    return Err(CamSyncError::Configuration(format!(
                        "{camera}: role is follower but no master is named"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file merged with `CAM_SYNC_` env
    /// overrides and validate it.
    ///
    /// # Errors
    /// [`CamSyncError::ConfigLoad`] on parse failure,
    /// [`CamSyncError::Configuration`] on semantic errors.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let config: SyncConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("CAM_SYNC_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Run all semantic checks. Called by [`SyncConfig::load`]; exposed for
    /// configurations assembled in code.
    ///
    /// # Errors
    /// [`CamSyncError::Configuration`] naming the offending camera.
    pub fn validate(&self) -> AppResult<()> {
        if self.cameras.is_empty() {
            return Err(CamSyncError::Configuration(
                "no cameras configured".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for cam in &self.cameras {
            if !names.insert(cam.name.as_str()) {
                return Err(CamSyncError::Configuration(format!(
                    "duplicate camera name '{}'",
                    cam.name
                )));
            }
            cam.exposure_controller.validate(&cam.name)?;
        }
        for cam in &self.cameras {
            if let Some(master) = &cam.exposure_controller.master {
                let target = self.cameras.iter().find(|c| &c.name == master).ok_or_else(
                    || {
                        CamSyncError::Configuration(format!(
                            "{}: master '{master}' not found",
                            cam.name
                        ))
                    },
                )?;
                if target.exposure_controller.role != ControllerRole::Master {
                    return Err(CamSyncError::Configuration(format!(
                        "{}: master '{master}' is itself a follower",
                        cam.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Camera definition by name.
    pub fn camera(&self, name: &str) -> Option<&CameraDefinition> {
        self.cameras.iter().find(|c| c.name == name)
    }
}
