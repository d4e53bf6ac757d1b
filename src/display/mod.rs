// src/display/mod.rs
//! Display modes and the negotiation between a requested aspect ratio and
//! what the hardware reports.
//!
//! - DisplayDriver / ModeCatalog: platform primitives (Win32, XRandR, mock)
//! - select_best: the mode negotiation policy
//! - mode: value types

pub mod driver;
pub mod mode;
pub mod selector;

pub use driver::{ApplyKind, DisplayDriver, ModeCatalog, ModeIter};
pub use mode::{AspectRatio, DisplayIdentity, DisplayMode};
pub use selector::select_best;
