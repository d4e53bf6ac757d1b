// src/display/mode.rs

//! Value types describing what a monitor can be configured to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One hardware-reportable configuration of a display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_rate_hz: u32,
}

impl DisplayMode {
    pub const fn new(width: u32, height: u32, refresh_rate_hz: u32) -> Self {
        Self {
            width,
            height,
            refresh_rate_hz,
        }
    }

    /// Total number of pixels, widened so 32-bit dimensions cannot overflow.
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}Hz", self.width, self.height, self.refresh_rate_hz)
    }
}

/// Horizontal to vertical pixel ratio. Both components are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AspectRatio {
    x: u32,
    y: u32,
}

impl AspectRatio {
    /// Returns `None` when either component is zero.
    pub fn new(x: u32, y: u32) -> Option<Self> {
        (x > 0 && y > 0).then_some(Self { x, y })
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    /// Exact match by cross-multiplication: `height * x == width * y`.
    pub fn matches(&self, mode: &DisplayMode) -> bool {
        u64::from(mode.height) * u64::from(self.x) == u64::from(mode.width) * u64::from(self.y)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.x, self.y)
    }
}

/// Name of a physical display as the OS knows it (`\\.\DISPLAY1`, `HDMI-1`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DisplayIdentity(String);

impl DisplayIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
