//! Custom error types for the exposure synchronization crate.
//!
//! A single `CamSyncError` enum covers the whole taxonomy. The split matters
//! operationally: `Configuration` and `ConfigLoad` are fatal at startup and
//! must prevent capture from beginning, while the per-frame variants
//! (`MetadataMissing`, `MetadataMalformed`, `ImageEmpty`) only drop the
//! offending frame from the control loop. A frame that fails metadata
//! extraction is still forwarded downstream; the previous exposure decision
//! stays in effect. No error here ever terminates capture on other cameras.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, CamSyncError>;

/// Error taxonomy for the exposure synchronization controller.
#[derive(Error, Debug)]
pub enum CamSyncError {
    /// Semantic configuration error (invalid bounds, missing master
    /// reference, role conflict). Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failure loading or parsing the configuration sources.
    #[error("configuration load error: {0}")]
    ConfigLoad(#[from] figment::Error),

    /// A required chunk (frame id, exposure time, gain) was absent from the
    /// frame's embedded metadata.
    #[error("required metadata chunk '{0}' missing")]
    MetadataMissing(&'static str),

    /// A chunk was present but its encoding could not be parsed.
    #[error("metadata chunk '{chunk}' malformed: {reason}")]
    MetadataMalformed {
        /// Name of the offending chunk.
        chunk: &'static str,
        /// Parse failure detail.
        reason: String,
    },

    /// Brightness estimation was asked to operate on a zero-sized image.
    #[error("cannot estimate brightness of an empty image")]
    ImageEmpty,

    /// Error reported by a camera handle while applying settings. Isolated
    /// per camera; never propagates to the other cameras' loops.
    #[error("camera error: {0}")]
    Camera(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
