//! Frame metadata extraction.
//!
//! Parses the chunk fields embedded in a captured frame into an
//! [`ExposureSample`]. Frame id, exposure time and gain are required; the
//! timestamp chunk is best-effort and falls back to the local receipt time,
//! because the control loop only needs the timestamp for downstream
//! correlation, not for its own decision.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::camera::{chunk, CapturedFrame};
use crate::error::{AppResult, CamSyncError};

/// Per-frame exposure metadata, produced once per captured frame.
///
/// `brightness` is filled in only when the frame's controller measured it
/// locally (master role); followers leave it empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureSample {
    /// Hardware frame counter.
    pub frame_id: u64,
    /// Exposure time actually used for this frame, microseconds.
    pub exposure_time_us: f64,
    /// Gain actually used for this frame, dB.
    pub gain_db: f64,
    /// Capture timestamp, nanoseconds since the Unix epoch.
    pub capture_timestamp_ns: i64,
    /// Locally measured mean brightness, if computed.
    pub brightness: Option<f64>,
}

fn parse_chunk<T: std::str::FromStr>(
    frame: &CapturedFrame,
    name: &'static str,
) -> AppResult<T>
where
    T::Err: std::fmt::Display,
{
    let raw = frame
        .chunks
        .get(name)
        .ok_or(CamSyncError::MetadataMissing(name))?;
    raw.trim()
        .parse::<T>()
        .map_err(|e| CamSyncError::MetadataMalformed {
            chunk: name,
            reason: e.to_string(),
        })
}

fn local_receipt_time_ns() -> i64 {
    // Pre-epoch clocks are not a concern on capture hosts; clamp instead of
    // failing the frame.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Extract an [`ExposureSample`] from a captured frame's chunk metadata.
///
/// # Errors
/// [`CamSyncError::MetadataMissing`] if the frame id, exposure time or gain
/// chunk is absent; [`CamSyncError::MetadataMalformed`] if a present chunk
/// cannot be parsed. A missing timestamp chunk is substituted with the local
/// receipt time and never fails.
pub fn read_sample(frame: &CapturedFrame) -> AppResult<ExposureSample> {
    let frame_id: u64 = parse_chunk(frame, chunk::FRAME_ID)?;
    let exposure_time_us: f64 = parse_chunk(frame, chunk::EXPOSURE_TIME)?;
    let gain_db: f64 = parse_chunk(frame, chunk::GAIN)?;

    let capture_timestamp_ns = match frame.chunks.get(chunk::TIMESTAMP) {
        Some(_) => parse_chunk::<i64>(frame, chunk::TIMESTAMP)?,
        None => local_receipt_time_ns(),
    };

    Ok(ExposureSample {
        frame_id,
        exposure_time_us,
        gain_db,
        capture_timestamp_ns,
        brightness: None,
    })
}
