// src/lib.rs

//! Switches a monitor to the best mode for a configured aspect ratio while a
//! target application runs, then puts the original mode back.

pub mod app;
pub mod config;
pub mod display;
pub mod error;
pub mod lock;
pub mod notify;
pub mod platform;
pub mod session;
pub mod watcher;

pub use config::{Config, Plan};
pub use display::{select_best, AspectRatio, DisplayIdentity, DisplayMode};
pub use error::StretchError;
pub use session::{DisplaySession, SessionOutcome};
