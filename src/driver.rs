//! Synchronized camera driver.
//!
//! Owns one tokio task per camera. Each task consumes that camera's frame
//! stream, runs the exposure controller, pushes updated settings back to the
//! hardware handle for the next exposure cycle, and republishes the frame
//! annotated with its exposure metadata. Camera tasks never wait on each
//! other: the master's decision travels through the watch slot wired by the
//! [`ControllerRegistry`], and a follower that updates before the slot
//! refreshes simply reuses the previous decision (self-correcting, logged).
//!
//! Per-frame failures (missing metadata, empty image, settings-apply errors)
//! are logged and isolated to their camera; the frame is still forwarded
//! downstream without its annotation.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::camera::{CameraControl, CameraIdentity, CapturedFrame};
use crate::config::SyncConfig;
use crate::controller::{ControllerRegistry, ExposureController};
use crate::error::{AppResult, CamSyncError};
use crate::metadata::{self, ExposureSample};

/// Downstream fan-out capacity. Slow consumers lag rather than block
/// capture.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// A captured frame annotated for downstream consumers.
///
/// `sample` lets consumers verify that frames from different cameras were
/// captured under matching (or at least correlatable) settings. It is absent
/// when the frame's metadata could not be extracted.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    /// Which camera captured the frame.
    pub camera: CameraIdentity,
    /// Exposure metadata, if it could be extracted.
    pub sample: Option<ExposureSample>,
    /// The frame itself.
    pub frame: CapturedFrame,
}

/// One camera's connection to the driver: its settings handle and its
/// incoming frame stream.
pub struct CameraEndpoint {
    /// Settings-apply side of the camera.
    pub control: Arc<dyn CameraControl>,
    /// Frames delivered by the SDK capture callback.
    pub frames: mpsc::Receiver<CapturedFrame>,
}

/// Driver coordinating N cameras and their exposure controllers.
pub struct SynchronizedCameraDriver {
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    output_tx: broadcast::Sender<AnnotatedFrame>,
}

impl SynchronizedCameraDriver {
    /// Build controllers from `config`, wire followers to masters, and spawn
    /// one dispatch task per camera.
    ///
    /// Endpoints are matched to camera definitions by name; every configured
    /// camera must have exactly one endpoint.
    ///
    /// # Errors
    /// [`CamSyncError::Configuration`] on invalid wiring or a missing or
    /// surplus endpoint. No frames are processed when this fails.
    pub fn launch(
        config: &SyncConfig,
        mut endpoints: Vec<CameraEndpoint>,
    ) -> AppResult<Self> {
        config.validate()?;
        let controllers = ControllerRegistry::build(&config.cameras)?.into_controllers();

        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        // Resolve every endpoint before spawning anything, so a wiring error
        // leaves no task behind.
        let mut paired = Vec::with_capacity(controllers.len());
        for controller in controllers {
            let pos = endpoints
                .iter()
                .position(|e| e.control.identity().name == controller.name())
                .ok_or_else(|| {
                    CamSyncError::Configuration(format!(
                        "no camera endpoint for '{}'",
                        controller.name()
                    ))
                })?;
            paired.push((endpoints.swap_remove(pos), controller));
        }
        if let Some(extra) = endpoints.first() {
            return Err(CamSyncError::Configuration(format!(
                "endpoint '{}' has no camera configuration",
                extra.control.identity().name
            )));
        }

        let mut tasks = Vec::with_capacity(paired.len());
        for (endpoint, controller) in paired {
            tasks.push(tokio::spawn(camera_task(
                endpoint,
                controller,
                output_tx.clone(),
                shutdown_tx.subscribe(),
            )));
        }
        info!(cameras = tasks.len(), "synchronized camera driver started");
        Ok(Self {
            tasks,
            shutdown_tx,
            output_tx,
        })
    }

    /// Subscribe to the annotated output frames.
    pub fn subscribe(&self) -> broadcast::Receiver<AnnotatedFrame> {
        self.output_tx.subscribe()
    }

    /// Stop dispatching new frames and wait for the per-camera tasks to
    /// finish. In-flight controller updates run to completion.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("synchronized camera driver stopped");
    }
}

async fn camera_task(
    mut endpoint: CameraEndpoint,
    mut controller: ExposureController,
    output_tx: broadcast::Sender<AnnotatedFrame>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let identity = endpoint.control.identity().clone();
    debug!(camera = %identity.name, "camera task started");
    loop {
        let frame = tokio::select! {
            _ = shutdown_rx.changed() => break,
            received = endpoint.frames.recv() => match received {
                Some(frame) => frame,
                None => {
                    debug!(camera = %identity.name, "frame stream closed");
                    break;
                }
            },
        };
        process_frame(
            &identity,
            endpoint.control.as_ref(),
            &mut controller,
            frame,
            &output_tx,
        )
        .await;
    }
    debug!(camera = %identity.name, "camera task stopped");
}

async fn process_frame(
    identity: &CameraIdentity,
    control: &dyn CameraControl,
    controller: &mut ExposureController,
    frame: CapturedFrame,
    output_tx: &broadcast::Sender<AnnotatedFrame>,
) {
    let sample = match metadata::read_sample(&frame) {
        Ok(mut sample) => {
            match controller.update(&mut sample, &frame) {
                Ok(Some(decision)) => {
                    // Takes effect on the camera's next exposure cycle;
                    // triggered hardware always applies one cycle late.
                    if let Err(e) = control
                        .apply_settings(decision.exposure_time_us, decision.gain_db)
                        .await
                    {
                        warn!(camera = %identity.name, error = %e, "failed to apply settings");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        camera = %identity.name,
                        error = %e,
                        "frame dropped from control loop; keeping previous settings"
                    );
                }
            }
            Some(sample)
        }
        Err(e) => {
            warn!(
                camera = %identity.name,
                error = %e,
                "metadata extraction failed; forwarding frame unannotated"
            );
            None
        }
    };

    // Send only fails when nobody subscribed, which is fine.
    let _ = output_tx.send(AnnotatedFrame {
        camera: identity.clone(),
        sample,
        frame,
    });
}
