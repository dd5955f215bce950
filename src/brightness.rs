//! Brightness estimation.
//!
//! Computes the scalar brightness measure driving the exposure loop: a
//! trimmed mean of subsampled pixel intensities over a central region or a
//! configured ROI. Trimming discards the extreme tails so a handful of hot or
//! dead pixels cannot tug the servo. Pure and deterministic.

use crate::camera::{CapturedFrame, RegionOfInterest};
use crate::error::{AppResult, CamSyncError};

/// Fraction of samples discarded at each tail of the intensity distribution.
const TRIM_FRACTION: f64 = 0.02;

/// Margin (per side, as a fraction of each dimension) of the default central
/// region used when no ROI is configured.
const CENTER_MARGIN: f64 = 0.125;

fn effective_region(frame: &CapturedFrame, roi: Option<&RegionOfInterest>) -> RegionOfInterest {
    match roi {
        Some(r) => {
            // Intersect with the frame; a fully out-of-bounds ROI degrades to
            // an empty region and is reported as ImageEmpty by the caller.
            let x = r.x.min(frame.width);
            let y = r.y.min(frame.height);
            RegionOfInterest {
                x,
                y,
                width: r.width.min(frame.width - x),
                height: r.height.min(frame.height - y),
            }
        }
        None => {
            let mx = (frame.width as f64 * CENTER_MARGIN) as u32;
            let my = (frame.height as f64 * CENTER_MARGIN) as u32;
            RegionOfInterest {
                x: mx,
                y: my,
                width: frame.width - 2 * mx,
                height: frame.height - 2 * my,
            }
        }
    }
}

/// Estimate mean brightness of a frame in `[0, 255]`.
///
/// Pixels are visited with a `pixel_skip` stride in both directions (1 visits
/// every pixel), matching the subsampling the hardware-side estimator uses to
/// stay cheap at full trigger rate. Bayer data is averaged as a raw intensity
/// plane; channel weighting is irrelevant for a scalar servo.
///
/// # Errors
/// [`CamSyncError::ImageEmpty`] if the frame or the effective region contains
/// no pixels.
pub fn estimate(
    frame: &CapturedFrame,
    roi: Option<&RegionOfInterest>,
    pixel_skip: u32,
) -> AppResult<f64> {
    if frame.width == 0 || frame.height == 0 || frame.pixel_data.is_empty() {
        return Err(CamSyncError::ImageEmpty);
    }
    let region = effective_region(frame, roi);
    if region.width == 0 || region.height == 0 {
        return Err(CamSyncError::ImageEmpty);
    }
    let skip = pixel_skip.max(1) as usize;

    let mut samples = Vec::with_capacity(
        (region.width as usize / skip + 1) * (region.height as usize / skip + 1),
    );
    for row in (region.y..region.y + region.height).step_by(skip) {
        let base = row as usize * frame.stride;
        for col in (region.x..region.x + region.width).step_by(skip) {
            let idx = base + col as usize;
            if let Some(&px) = frame.pixel_data.get(idx) {
                samples.push(px);
            }
        }
    }
    if samples.is_empty() {
        return Err(CamSyncError::ImageEmpty);
    }

    samples.sort_unstable();
    let trim = (samples.len() as f64 * TRIM_FRACTION) as usize;
    let kept = &samples[trim..samples.len() - trim];
    let total: u64 = kept.iter().map(|&p| p as u64).sum();
    Ok(total as f64 / kept.len() as f64)
}
