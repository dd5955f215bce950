//! Camera SDK boundary types.
//!
//! Hardware-agnostic interface to the camera layer. The real SDK (or the mock
//! in [`crate::mock`]) delivers [`CapturedFrame`]s with embedded chunk
//! metadata and accepts exposure settings through [`CameraControl`].
//! Everything above this module is SDK-independent.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Pixel format of the delivered frames.
///
/// Only single-byte-per-pixel formats participate in brightness estimation;
/// a Bayer mosaic is treated as a raw intensity plane (no demosaicing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit monochrome.
    Mono8,
    /// Bayer RGB mosaic, 8 bits per photosite.
    Bayer8,
}

impl PixelFormat {
    /// GenICam-style name of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Bayer8 => "Bayer8",
        }
    }
}

/// Region of interest for brightness estimation, in sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    /// Top-left X coordinate (pixel).
    pub x: u32,
    /// Top-left Y coordinate (pixel).
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Identity of one camera in the synchronized group.
///
/// Assigned once at startup from configuration and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraIdentity {
    /// Configuration key and log name, e.g. `cam0`.
    pub name: String,
    /// Hardware serial number.
    pub serial: String,
    /// Frame id attached to outgoing annotated frames.
    pub frame_id: String,
}

/// Chunk names used by the metadata reader.
pub mod chunk {
    /// Per-frame hardware frame counter.
    pub const FRAME_ID: &str = "FrameID";
    /// Exposure time actually used for this frame, microseconds.
    pub const EXPOSURE_TIME: &str = "ExposureTime";
    /// Analog gain actually used for this frame, dB.
    pub const GAIN: &str = "Gain";
    /// Capture timestamp, nanoseconds. Optional.
    pub const TIMESTAMP: &str = "Timestamp";
}

/// Raw chunk fields embedded in a captured frame, keyed by chunk name.
///
/// Values are kept in their on-wire string encoding; parsing (and parse
/// failures) belong to the metadata reader.
#[derive(Debug, Clone, Default)]
pub struct ChunkData {
    entries: HashMap<String, String>,
}

impl ChunkData {
    /// Empty chunk set (a frame captured with chunk mode disabled).
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a chunk field.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(name.to_string(), value.into());
    }

    /// Raw value of a chunk field, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }
}

/// One captured frame as delivered by the SDK layer: pixel buffer plus
/// embedded chunk metadata.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row stride in bytes (>= width for the supported formats).
    pub stride: usize,
    /// Pixel format.
    pub pixel_format: PixelFormat,
    /// Raw pixel data, `height * stride` bytes.
    pub pixel_data: Vec<u8>,
    /// Embedded chunk metadata.
    pub chunks: ChunkData,
}

/// Settings-apply side of a camera handle.
///
/// Implementations push the settings to hardware registers; they take effect
/// on the camera's *next* exposure (triggered cameras apply settings one or
/// more cycles late).
#[async_trait]
pub trait CameraControl: Send + Sync {
    /// Identity of this camera.
    fn identity(&self) -> &CameraIdentity;

    /// Apply exposure time (microseconds) and gain (dB) for the next
    /// exposure cycle.
    ///
    /// # Errors
    /// Hardware communication failure. The driver logs and isolates the
    /// failure to this camera.
    async fn apply_settings(&self, exposure_time_us: f64, gain_db: f64) -> Result<()>;
}
