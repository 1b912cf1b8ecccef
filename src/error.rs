use std::{fmt, path::PathBuf};
use thiserror::Error;

/// Errors that abort a run.
///
/// Configuration and source errors surface before any rendering is scheduled.
/// Per-item render failures never appear here on their own; they are collected
/// and reported together through [`Error::Incomplete`], or through
/// [`Error::Aborted`] when the run was stopped.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read frame source {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("expected field of view in (0, 180) degrees but got: {fov_deg}")]
    InvalidFieldOfView { fov_deg: f64 },

    #[error("expected a non-zero output resolution but got: {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },

    #[error("expected a finite, positive principal point but got: ({cx}, {cy})")]
    InvalidPrincipalPoint { cx: f64, cy: f64 },

    #[error("expected a frame interval of at least 1 but got: {interval}")]
    InvalidFrameInterval { interval: usize },

    #[error("view {name} has an invalid orientation: pitch={pitch_deg}, yaw={yaw_deg}")]
    InvalidViewAngle {
        name: String,
        pitch_deg: f64,
        yaw_deg: f64,
    },

    #[error("view {name} appears more than once in the catalog")]
    DuplicateView { name: String },

    #[error("view catalog is empty")]
    EmptyCatalog,

    #[error("reference view {name} is not in the catalog")]
    UnknownReference { name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to write {path}: {reason}")]
    SerializationFailure { path: PathBuf, reason: String },

    #[error("run aborted after {completed} images with {} failures", .failures.len())]
    Aborted {
        completed: usize,
        failures: Vec<ItemFailure>,
    },

    #[error("{} images failed, {completed} completed", .failures.len())]
    Incomplete {
        completed: usize,
        failures: Vec<ItemFailure>,
    },

    #[error("reconstruction engine {program} is not available: {reason}")]
    EngineUnavailable { program: String, reason: String },

    #[error("reconstruction step {step} exited with status {status}")]
    EngineFailure { step: String, status: i32 },
}

/// Why a single `(frame, view)` item could not be produced.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("source frame is empty")]
    EmptyFrame,

    #[error("source frame buffer holds {len} bytes but {width}x{height} RGB needs {expected}")]
    CorruptFrame {
        width: u32,
        height: u32,
        len: usize,
        expected: usize,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A per-item failure keyed by the frame index and view name it belongs to.
#[derive(Debug)]
pub struct ItemFailure {
    pub frame_index: usize,
    pub view_name: String,
    pub error: RenderError,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {} view {}: {}",
            self.frame_index, self.view_name, self.error
        )
    }
}
