//! Per-camera exposure controllers and their registry.
//!
//! Roles are fixed at construction and never transition. A master runs the
//! closed brightness loop every frame and publishes its decision into a
//! `tokio::sync::watch` slot; followers hold the matching receiver and adopt
//! whatever the slot holds at their own update, never calling the solver.
//! The watch channel gives the single-writer/multi-reader semantics the
//! decision slot needs: one producer, non-blocking reads, and a reader can
//! never observe a partially written decision.

use tokio::sync::watch;
use tracing::{debug, info};

use crate::brightness;
use crate::camera::CapturedFrame;
use crate::config::{CameraDefinition, ControllerRole, ExposureControlConfig};
use crate::error::{AppResult, CamSyncError};
use crate::metadata::ExposureSample;
use crate::solver::{self, ExposureDecision};

/// Relative mismatch below which a reported sample is considered to match
/// the pending decision (the settings have reached the sensor).
const SETTLE_MATCH_FRACTION: f64 = 0.05;

enum Role {
    Master {
        /// Decision slot read by the followers.
        slot: watch::Sender<Option<ExposureDecision>>,
        /// Frames left to skip while pushed settings travel to the sensor.
        frames_to_skip: u32,
    },
    Follower {
        /// Handle into the master's decision slot. Non-owning: dropping a
        /// follower never affects the master.
        master_slot: watch::Receiver<Option<ExposureDecision>>,
    },
}

/// Closed-loop (master) or mirroring (follower) exposure controller for one
/// camera.
pub struct ExposureController {
    name: String,
    config: ExposureControlConfig,
    role: Role,
    current: Option<ExposureDecision>,
}

impl ExposureController {
    /// Camera name this controller belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Controller configuration.
    pub fn config(&self) -> &ExposureControlConfig {
        &self.config
    }

    /// Last computed (master) or adopted (follower) decision. Never blocks.
    /// `None` until the first frame has been processed.
    pub fn current_decision(&self) -> Option<ExposureDecision> {
        self.current
    }

    /// Process one captured frame.
    ///
    /// Returns the decision the driver must apply to this camera's hardware,
    /// or `None` when nothing changed this cycle. For masters the sample's
    /// `brightness` field is filled in as a side product.
    ///
    /// # Errors
    /// Propagates brightness-estimation failures (`ImageEmpty`); the caller
    /// drops the frame from the control loop and retains the previous
    /// decision.
    pub fn update(
        &mut self,
        sample: &mut ExposureSample,
        frame: &CapturedFrame,
    ) -> AppResult<Option<ExposureDecision>> {
        // Locally measured brightness is ignored entirely by followers; the
        // master dictates their settings.
        let adopted = match &self.role {
            Role::Master { .. } => return self.update_master(sample, frame),
            Role::Follower { master_slot } => *master_slot.borrow(),
        };
        match adopted {
            Some(decision) if Some(decision) != self.current => {
                debug!(
                    camera = %self.name,
                    exposure_us = decision.exposure_time_us,
                    gain_db = decision.gain_db,
                    "follower adopting master decision"
                );
                self.current = Some(decision);
                Ok(Some(decision))
            }
            Some(_) => Ok(None),
            None => {
                debug!(camera = %self.name, "master has not decided yet");
                Ok(None)
            }
        }
    }

    fn update_master(
        &mut self,
        sample: &mut ExposureSample,
        frame: &CapturedFrame,
    ) -> AppResult<Option<ExposureDecision>> {
        let b = brightness::estimate(frame, self.config.roi.as_ref(), self.config.pixel_skip)?;
        sample.brightness = Some(b);

        // First frame seeds the loop from the settings the camera actually
        // used, clamped into the configured bounds.
        let current = match self.current {
            Some(current) => current,
            None => {
                let seed = ExposureDecision {
                    exposure_time_us: sample.exposure_time_us,
                    gain_db: sample.gain_db,
                    source_frame_id: sample.frame_id,
                }
                .clamped(&self.config);
                self.set_current(seed);
                return Ok(Some(seed));
            }
        };

        if let Role::Master { frames_to_skip, .. } = &mut self.role {
            // Settings take a few frames to reach the sensor. Stop skipping
            // early once the reported metadata matches the pending decision.
            if settled(current.exposure_time_us, sample.exposure_time_us)
                && settled(current.gain_db, sample.gain_db)
            {
                *frames_to_skip = 0;
            }
            if *frames_to_skip > 0 {
                *frames_to_skip -= 1;
                return Ok(None);
            }
        }

        let decision = solver::solve(b, &current, &self.config, sample.frame_id);
        if decision.exposure_time_us == current.exposure_time_us
            && decision.gain_db == current.gain_db
        {
            return Ok(None);
        }
        info!(
            camera = %self.name,
            brightness = b,
            old_exposure_us = current.exposure_time_us,
            old_gain_db = current.gain_db,
            new_exposure_us = decision.exposure_time_us,
            new_gain_db = decision.gain_db,
            "exposure updated"
        );
        self.set_current(decision);
        if let Role::Master { frames_to_skip, .. } = &mut self.role {
            *frames_to_skip = self.config.max_frames_skip;
        }
        Ok(Some(decision))
    }

    fn set_current(&mut self, decision: ExposureDecision) {
        self.current = Some(decision);
        if let Role::Master { slot, .. } = &self.role {
            // Send only fails with no receivers; a master without followers
            // is a valid group of one.
            let _ = slot.send(Some(decision));
        }
    }
}

/// Both values zero, or within 5 % of their mean.
fn settled(decided: f64, reported: f64) -> bool {
    (decided - reported).abs() <= SETTLE_MATCH_FRACTION * (decided + reported)
}

/// Owns controller construction and master/follower wiring.
///
/// Controllers reference their master through a watch handle resolved here by
/// name, not through pointers; the registry hands the finished controllers to
/// the driver, which moves each into its camera task.
pub struct ControllerRegistry {
    controllers: Vec<ExposureController>,
}

impl ControllerRegistry {
    /// Build one controller per camera definition and wire followers to
    /// their masters.
    ///
    /// # Errors
    /// [`CamSyncError::Configuration`] on invalid controller settings or an
    /// unresolvable master reference. Raised before any frame is processed.
    pub fn build(cameras: &[CameraDefinition]) -> AppResult<Self> {
        let mut controllers = Vec::with_capacity(cameras.len());
        let mut slots: Vec<(String, watch::Sender<Option<ExposureDecision>>)> = Vec::new();

        for cam in cameras {
            if cam.exposure_controller.role == ControllerRole::Master {
                let (tx, _rx) = watch::channel(None);
                slots.push((cam.name.clone(), tx));
            }
        }

        for cam in cameras {
            let cfg = cam.exposure_controller.clone();
            let role = match cfg.role {
                ControllerRole::Master => {
                    let slot = slots
                        .iter()
                        .find(|(name, _)| name == &cam.name)
                        .map(|(_, tx)| tx.clone())
                        .ok_or_else(|| {
                            CamSyncError::Configuration(format!(
                                "{}: master slot missing",
                                cam.name
                            ))
                        })?;
                    Role::Master {
                        slot,
                        frames_to_skip: 0,
                    }
                }
                ControllerRole::Follower => {
                    let master_name = cfg.master.as_deref().ok_or_else(|| {
                        CamSyncError::Configuration(format!(
                            "{}: follower without master reference",
                            cam.name
                        ))
                    })?;
                    let master_slot = slots
                        .iter()
                        .find(|(name, _)| name == master_name)
                        .map(|(_, tx)| tx.subscribe())
                        .ok_or_else(|| {
                            CamSyncError::Configuration(format!(
                                "{}: master '{master_name}' not found",
                                cam.name
                            ))
                        })?;
                    Role::Follower { master_slot }
                }
            };
            controllers.push(ExposureController {
                name: cam.name.clone(),
                config: cfg,
                role,
                current: None,
            });
        }
        Ok(Self { controllers })
    }

    /// Number of controllers.
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// True when no controllers were built.
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Hand the controllers over for the driver's per-camera tasks, in the
    /// same order as the camera definitions they were built from.
    pub fn into_controllers(self) -> Vec<ExposureController> {
        self.controllers
    }
}
