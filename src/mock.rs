//! Simulated externally triggered camera.
//!
//! Stands in for the SDK layer in tests and demos. Each trigger produces one
//! frame whose mean brightness follows the active settings linearly in
//! exposure time and exponentially in gain (dB), plus optional uniform pixel
//! noise. Settings pushed through [`CameraControl::apply_settings`] take
//! effect only after a configurable number of triggers, reproducing the
//! one-cycle-late behavior of real triggered hardware.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};

use crate::camera::{chunk, CameraControl, CameraIdentity, CapturedFrame, ChunkData, PixelFormat};

/// Frame channel depth between the mock camera and the driver.
const FRAME_CHANNEL_CAPACITY: usize = 16;

/// Configuration of the simulated camera and its scene.
#[derive(Debug, Clone, Deserialize)]
pub struct MockCameraConfig {
    /// Frame width in pixels.
    #[serde(default = "default_width")]
    pub width: u32,
    /// Frame height in pixels.
    #[serde(default = "default_height")]
    pub height: u32,
    /// Scene brightness produced per millisecond of exposure at 0 dB gain.
    #[serde(default = "default_illuminance")]
    pub scene_illuminance: f64,
    /// Uniform pixel noise amplitude (0 disables noise).
    #[serde(default)]
    pub noise_amplitude: u8,
    /// Triggers that elapse before applied settings reach the sensor.
    #[serde(default = "default_settings_lag")]
    pub settings_lag_frames: u32,
    /// Exposure time the camera starts with, microseconds.
    #[serde(default = "default_initial_exposure")]
    pub initial_exposure_us: f64,
    /// Gain the camera starts with, dB.
    #[serde(default)]
    pub initial_gain_db: f64,
}

fn default_width() -> u32 {
    64
}
fn default_height() -> u32 {
    48
}
fn default_illuminance() -> f64 {
    6.0
}
fn default_settings_lag() -> u32 {
    1
}
fn default_initial_exposure() -> f64 {
    10_000.0
}

impl Default for MockCameraConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            scene_illuminance: default_illuminance(),
            noise_amplitude: 0,
            settings_lag_frames: default_settings_lag(),
            initial_exposure_us: default_initial_exposure(),
            initial_gain_db: 0.0,
        }
    }
}

struct MockState {
    frame_counter: u64,
    exposure_time_us: f64,
    gain_db: f64,
    /// Pending settings: (triggers remaining, exposure, gain).
    pending: VecDeque<(u32, f64, f64)>,
}

/// Simulated externally triggered camera.
pub struct MockTriggeredCamera {
    identity: CameraIdentity,
    config: MockCameraConfig,
    state: Mutex<MockState>,
    frame_tx: mpsc::Sender<CapturedFrame>,
}

impl MockTriggeredCamera {
    /// Create the camera and the frame stream the driver will consume.
    pub fn connect(
        identity: CameraIdentity,
        config: MockCameraConfig,
    ) -> (Arc<Self>, mpsc::Receiver<CapturedFrame>) {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let camera = Arc::new(Self {
            identity,
            state: Mutex::new(MockState {
                frame_counter: 0,
                exposure_time_us: config.initial_exposure_us,
                gain_db: config.initial_gain_db,
                pending: VecDeque::new(),
            }),
            config,
            frame_tx,
        });
        (camera, frame_rx)
    }

    /// Mean brightness the scene model yields for the given settings.
    fn model_brightness(&self, exposure_time_us: f64, gain_db: f64) -> f64 {
        let gain_factor = 10f64.powf(gain_db / 10.0);
        (self.config.scene_illuminance * exposure_time_us / 1000.0 * gain_factor)
            .clamp(0.0, 255.0)
    }

    /// Deliver one frame, as a hardware trigger pulse would.
    ///
    /// # Errors
    /// Fails when the driver side of the frame channel is gone.
    pub async fn trigger(&self) -> Result<()> {
        let frame = {
            let mut state = self.state.lock().await;

            // Advance pending settings by one trigger; the newest ready
            // entry wins.
            for entry in state.pending.iter_mut() {
                entry.0 = entry.0.saturating_sub(1);
            }
            while let Some(&(remaining, exposure, gain)) = state.pending.front() {
                if remaining > 0 {
                    break;
                }
                state.exposure_time_us = exposure;
                state.gain_db = gain;
                state.pending.pop_front();
            }

            state.frame_counter += 1;
            let mean = self.model_brightness(state.exposure_time_us, state.gain_db);
            let pixels = self.render(mean);

            let mut chunks = ChunkData::new();
            chunks.set(chunk::FRAME_ID, state.frame_counter.to_string());
            chunks.set(chunk::EXPOSURE_TIME, state.exposure_time_us.to_string());
            chunks.set(chunk::GAIN, state.gain_db.to_string());
            chunks.set(chunk::TIMESTAMP, now_ns().to_string());

            CapturedFrame {
                width: self.config.width,
                height: self.config.height,
                stride: self.config.width as usize,
                pixel_format: PixelFormat::Mono8,
                pixel_data: pixels,
                chunks,
            }
        };
        self.frame_tx
            .send(frame)
            .await
            .map_err(|_| anyhow::anyhow!("frame channel closed"))?;
        Ok(())
    }

    fn render(&self, mean: f64) -> Vec<u8> {
        let count = (self.config.width * self.config.height) as usize;
        let base = mean.round().clamp(0.0, 255.0) as i16;
        if self.config.noise_amplitude == 0 {
            return vec![base as u8; count];
        }
        let amplitude = self.config.noise_amplitude as i16;
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| {
                let noisy = base + rng.gen_range(-amplitude..=amplitude);
                noisy.clamp(0, 255) as u8
            })
            .collect()
    }

    /// Settings currently active on the simulated sensor.
    pub async fn active_settings(&self) -> (f64, f64) {
        let state = self.state.lock().await;
        (state.exposure_time_us, state.gain_db)
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl CameraControl for MockTriggeredCamera {
    fn identity(&self) -> &CameraIdentity {
        &self.identity
    }

    async fn apply_settings(&self, exposure_time_us: f64, gain_db: f64) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.config.settings_lag_frames == 0 {
            state.exposure_time_us = exposure_time_us;
            state.gain_db = gain_db;
        } else {
            state
                .pending
                .push_back((self.config.settings_lag_frames, exposure_time_us, gain_db));
        }
        Ok(())
    }
}
