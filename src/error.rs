// src/error.rs

//! Error taxonomy shared by every stage of a stretch session.
//!
//! Each variant maps to one user-facing message. `RestoreFailed` and
//! `OriginalUnknown` are kept apart from everything else because they are the
//! only outcomes that leave the monitor in a non-original mode.

use crate::config::ValidationError;
use crate::display::{AspectRatio, DisplayIdentity, DisplayMode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StretchError {
    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("Could not load config file {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("Another instance of this application is already running.")]
    AlreadyRunning,

    #[error("Please close the target application ({window_class}) before starting.")]
    TargetAlreadyRunning { window_class: String },

    #[error("Target window {window_class} did not appear in time.")]
    TargetNotFound { window_class: String },

    #[error("Failed to find screen {index}.")]
    DisplayNotFound { index: u32 },

    #[error("Failed to enumerate display modes of {display}: {reason}")]
    Enumeration {
        display: DisplayIdentity,
        reason: String,
    },

    #[error("Failed to retrieve display settings of {display}: {reason}")]
    Query {
        display: DisplayIdentity,
        reason: String,
    },

    #[error("Failed to find a fitting resolution for aspect ratio {ratio} on {display}.")]
    NoMatchingMode {
        display: DisplayIdentity,
        ratio: AspectRatio,
    },

    #[error("Failed to set screen resolution to {mode}: {reason}")]
    Apply { mode: DisplayMode, reason: String },

    #[error("Could not open target process {pid}: {reason}")]
    Access { pid: u32, reason: String },

    #[error("Failed to adjust the target window: {reason}")]
    WindowStyle { reason: String },

    #[error("Lost track of the target process: {reason}")]
    Watch { reason: String },

    #[error(
        "Failed to reset screen resolution to {mode}: {reason}. \
         The monitor is still in the stretched mode; restore it manually in the display settings."
    )]
    RestoreFailed { mode: DisplayMode, reason: String },

    #[error(
        "The original mode of {display} was never captured, so it cannot be reset. \
         Restore the resolution manually in the display settings."
    )]
    OriginalUnknown { display: DisplayIdentity },

    #[error("Interrupted by a termination signal.")]
    Interrupted,

    #[error("Platform backend unavailable: {0:#}")]
    Platform(#[from] anyhow::Error),
}

impl StretchError {
    /// True only for the outcomes that leave the display misconfigured.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StretchError::RestoreFailed { .. } | StretchError::OriginalUnknown { .. }
        )
    }
}
