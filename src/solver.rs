//! Exposure/gain solver.
//!
//! Pure function of (measured brightness, current settings, bounds). One
//! multiplicative correction per call; multi-frame convergence is intended,
//! since iterating to the target inside a single call would chase measurement
//! noise.
//!
//! Gain arithmetic is in dB: `dB(G) = 10 * log10(G)`, so a linear brightness
//! factor `f` maps to a gain delta of `4.34 * ln(f)` dB. Gains that land
//! below 0.5 dB snap to zero because the hardware can no longer set them
//! accurately.

use crate::config::ExposureControlConfig;

/// dB per unit of natural log: 10 / ln(10).
const DB_PER_LN: f64 = 4.34;

/// Gains below this threshold (dB) are set to zero.
const GAIN_SNAP_DB: f64 = 0.5;

/// The authoritative output of one solve cycle. Produced by the master,
/// adopted verbatim by its followers; overwritten each cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureDecision {
    /// Exposure time for the next cycle, microseconds.
    pub exposure_time_us: f64,
    /// Gain for the next cycle, dB.
    pub gain_db: f64,
    /// Frame id of the sample that produced this decision.
    pub source_frame_id: u64,
}

impl ExposureDecision {
    /// Clamp exposure and gain into the configured bounds. Used when seeding
    /// a decision from hardware-reported values that may lie outside them.
    pub fn clamped(self, cfg: &ExposureControlConfig) -> Self {
        Self {
            exposure_time_us: self
                .exposure_time_us
                .clamp(cfg.min_exposure_time, cfg.max_exposure_time),
            gain_db: snap_gain(self.gain_db.clamp(0.0, cfg.max_gain)),
            source_frame_id: self.source_frame_id,
        }
    }
}

fn snap_gain(gain_db: f64) -> f64 {
    if gain_db < GAIN_SNAP_DB {
        0.0
    } else {
        gain_db
    }
}

/// Linear brightness factor produced by a gain change of `delta_db`.
fn gain_factor(delta_db: f64) -> f64 {
    (delta_db / DB_PER_LN).exp()
}

/// Compute the next exposure/gain decision for one measured brightness.
///
/// Dead-band first: within `brightness_tolerance` of the target the current
/// decision is returned unchanged. Otherwise a multiplicative correction
/// `f = target / max(b, 1)` is split across exposure time and gain according
/// to `gain_priority`; whichever knob goes first absorbs as much of `f` as
/// its bounds allow, and the residual spills into the other knob only if the
/// predicted brightness error still exceeds the tolerance.
///
/// Every returned decision satisfies the exposure bounds and
/// `0 <= gain <= max_gain`.
pub fn solve(
    brightness: f64,
    current: &ExposureDecision,
    cfg: &ExposureControlConfig,
    frame_id: u64,
) -> ExposureDecision {
    if (brightness - cfg.brightness_target).abs() <= cfg.brightness_tolerance {
        return *current;
    }
    // Guards divide-by-zero on a black frame.
    let factor = cfg.brightness_target / brightness.max(1.0);

    let (exposure_time_us, gain_db) = if cfg.gain_priority {
        solve_gain_first(brightness, current, cfg, factor)
    } else {
        solve_exposure_first(brightness, current, cfg, factor)
    };

    ExposureDecision {
        exposure_time_us,
        gain_db,
        source_frame_id: frame_id,
    }
}

/// Exposure-first policy: exposure time changes add no sensor noise, so
/// exhaust exposure headroom before touching gain.
fn solve_exposure_first(
    brightness: f64,
    current: &ExposureDecision,
    cfg: &ExposureControlConfig,
    factor: f64,
) -> (f64, f64) {
    let exposure = (current.exposure_time_us * factor)
        .clamp(cfg.min_exposure_time, cfg.max_exposure_time);
    let achieved = exposure / current.exposure_time_us;
    let predicted = brightness * achieved;

    let gain = if (predicted - cfg.brightness_target).abs() > cfg.brightness_tolerance {
        // Exposure hit a bound; move the residual into gain.
        let residual = factor / achieved;
        snap_gain((current.gain_db + DB_PER_LN * residual.ln()).clamp(0.0, cfg.max_gain))
    } else {
        current.gain_db
    };
    (exposure, gain)
}

/// Gain-first policy: hold exposure short, accept gain noise.
fn solve_gain_first(
    brightness: f64,
    current: &ExposureDecision,
    cfg: &ExposureControlConfig,
    factor: f64,
) -> (f64, f64) {
    let gain = snap_gain((current.gain_db + DB_PER_LN * factor.ln()).clamp(0.0, cfg.max_gain));
    let achieved = gain_factor(gain - current.gain_db);
    let predicted = brightness * achieved;

    let exposure = if (predicted - cfg.brightness_target).abs() > cfg.brightness_tolerance {
        let residual = factor / achieved;
        (current.exposure_time_us * residual)
            .clamp(cfg.min_exposure_time, cfg.max_exposure_time)
    } else {
        current.exposure_time_us
    };
    (exposure, gain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControllerRole, ExposureControlConfig};

    fn config() -> ExposureControlConfig {
        ExposureControlConfig {
            role: ControllerRole::Master,
            master: None,
            brightness_target: 120.0,
            brightness_tolerance: 10.0,
            min_exposure_time: 1000.0,
            max_exposure_time: 100_000.0,
            max_gain: 0.0,
            gain_priority: false,
            max_frames_skip: 10,
            roi: None,
            pixel_skip: 1,
        }
    }

    fn decision(exposure_time_us: f64, gain_db: f64) -> ExposureDecision {
        ExposureDecision {
            exposure_time_us,
            gain_db,
            source_frame_id: 0,
        }
    }

    #[test]
    fn test_dead_band_returns_input_unchanged() {
        let cfg = config();
        let current = decision(10_000.0, 0.0);
        for b in [110.0, 115.0, 120.0, 125.0, 130.0] {
            assert_eq!(solve(b, &current, &cfg, 99), current);
        }
    }

    #[test]
    fn test_doubling_factor_scales_exposure() {
        // target=120, b=60 -> f=2.0 -> exposure 10000 -> 20000, gain stays 0.
        let cfg = config();
        let d = solve(60.0, &decision(10_000.0, 0.0), &cfg, 7);
        assert!((d.exposure_time_us - 20_000.0).abs() < 1e-9);
        assert_eq!(d.gain_db, 0.0);
        assert_eq!(d.source_frame_id, 7);
    }

    #[test]
    fn test_exposure_clamps_and_residual_spills_to_gain() {
        // b=10 -> f=12 -> exposure requests 120000, clamps to 100000;
        // residual factor 1.2 wants gain, but max_gain=0 pins it.
        let cfg = config();
        let d = solve(10.0, &decision(10_000.0, 0.0), &cfg, 1);
        assert_eq!(d.exposure_time_us, 100_000.0);
        assert_eq!(d.gain_db, 0.0);

        // With gain headroom the residual lands in gain: 4.34 * ln(1.2).
        let mut cfg = config();
        cfg.max_gain = 10.0;
        let d = solve(10.0, &decision(10_000.0, 0.0), &cfg, 1);
        assert_eq!(d.exposure_time_us, 100_000.0);
        let expected = 4.34 * (1.2f64).ln();
        assert!((d.gain_db - expected).abs() < 1e-9);
    }

    #[test]
    fn test_gain_stays_zero_until_exposure_saturates() {
        let mut cfg = config();
        cfg.max_gain = 10.0;
        // Brightness below target but exposure headroom remains.
        let d = solve(60.0, &decision(10_000.0, 0.0), &cfg, 1);
        assert_eq!(d.gain_db, 0.0);
        assert!(d.exposure_time_us < cfg.max_exposure_time);
    }

    #[test]
    fn test_max_gain_zero_never_yields_gain() {
        let cfg = config();
        let mut current = decision(10_000.0, 0.0);
        for b in [60.0, 30.0, 10.0, 5.0, 2.0, 1.0] {
            current = solve(b, &current, &cfg, 1);
            assert_eq!(current.gain_db, 0.0);
        }
    }

    #[test]
    fn test_bounds_hold_for_every_decision() {
        let mut cfg = config();
        cfg.max_gain = 12.0;
        let mut current = decision(10_000.0, 0.0);
        for b in [1.0, 3.0, 250.0, 255.0, 40.0, 200.0, 2.0, 254.0] {
            current = solve(b, &current, &cfg, 1);
            assert!(current.exposure_time_us >= cfg.min_exposure_time);
            assert!(current.exposure_time_us <= cfg.max_exposure_time);
            assert!(current.gain_db >= 0.0);
            assert!(current.gain_db <= cfg.max_gain);
        }
    }

    #[test]
    fn test_small_gain_snaps_to_zero() {
        let mut cfg = config();
        cfg.max_gain = 10.0;
        // f = 120/10.8 ≈ 11.1, exposure clamps at 10x, residual ≈ 1.11 maps
        // to 0.46 dB, below the 0.5 dB snap threshold.
        let d = solve(10.8, &decision(10_000.0, 0.0), &cfg, 1);
        assert_eq!(d.exposure_time_us, 100_000.0);
        assert_eq!(d.gain_db, 0.0);
    }

    #[test]
    fn test_gain_priority_moves_gain_first() {
        let mut cfg = config();
        cfg.max_gain = 20.0;
        cfg.gain_priority = true;
        let d = solve(60.0, &decision(10_000.0, 0.0), &cfg, 1);
        // f=2 -> gain delta 4.34*ln(2) ≈ 3.0 dB fits inside max_gain, so the
        // exposure time is untouched.
        assert!((d.gain_db - 4.34 * (2.0f64).ln()).abs() < 1e-9);
        assert_eq!(d.exposure_time_us, 10_000.0);
    }

    #[test]
    fn test_gain_priority_spills_residual_into_exposure() {
        let mut cfg = config();
        cfg.max_gain = 3.0;
        cfg.gain_priority = true;
        // f=4 needs ≈6 dB; the 3 dB ceiling absorbs only half, the rest
        // moves into exposure time.
        let d = solve(30.0, &decision(10_000.0, 0.0), &cfg, 1);
        assert_eq!(d.gain_db, 3.0);
        let achieved = (3.0f64 / 4.34).exp();
        let expected = 10_000.0 * 4.0 / achieved;
        assert!((d.exposure_time_us - expected).abs() < 1e-6);
    }

    #[test]
    fn test_too_bright_reduces_exposure() {
        let cfg = config();
        let d = solve(240.0, &decision(10_000.0, 0.0), &cfg, 1);
        assert!((d.exposure_time_us - 5_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_clamped_seed_respects_bounds() {
        let cfg = config();
        let seeded = decision(500_000.0, 7.0).clamped(&cfg);
        assert_eq!(seeded.exposure_time_us, 100_000.0);
        assert_eq!(seeded.gain_db, 0.0);
    }
}
