// src/display/driver.rs
//! DisplayDriver trait - minimal interface to the OS display subsystem.
//!
//! Backends only provide the primitives: name a display, enumerate its modes,
//! read the current mode and set a mode. All decision making (which mode,
//! when to restore) lives in `select_best` and `DisplaySession`.
//!
//! ## Apply semantics
//! - `ApplyKind::Reset` performs a full reset of the display configuration to
//!   the requested mode (Win32 `CDS_RESET`), not an incremental change.
//! - `ApplyKind::Restore` puts a previously captured mode back in a single
//!   mode-set call.

use super::mode::{DisplayIdentity, DisplayMode};
use crate::error::StretchError;

/// Lazy sequence of modes as the driver reports them.
pub type ModeIter<'a> = Box<dyn Iterator<Item = DisplayMode> + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyKind {
    /// Switch to a newly selected mode.
    Reset,
    /// Return to the mode captured before the session started.
    Restore,
}

/// Enumerates the modes a display supports.
pub trait ModeCatalog {
    /// Every mode the driver reports for `display`, in driver order.
    ///
    /// Each call starts a fresh sequence. An empty sequence is not an error;
    /// an unknown display or a failing OS call is `StretchError::Enumeration`.
    fn list_modes<'a>(&'a self, display: &'a DisplayIdentity) -> Result<ModeIter<'a>, StretchError>;
}

/// Platform-specific display primitives.
pub trait DisplayDriver: ModeCatalog {
    /// Maps a zero-based screen index to the OS display name.
    fn resolve_display(&self, index: u32) -> Option<DisplayIdentity>;

    /// Reads the mode the display is currently running.
    fn current_mode(&self, display: &DisplayIdentity) -> Result<DisplayMode, StretchError>;

    /// Sets `mode` on `display`.
    ///
    /// Returns the OS rejection reason on failure; the caller decides which
    /// `StretchError` it becomes (`Apply` or `RestoreFailed`).
    fn apply_mode(
        &mut self,
        display: &DisplayIdentity,
        mode: &DisplayMode,
        kind: ApplyKind,
    ) -> Result<(), String>;
}
