// src/config.rs

//! Configuration for a stretch session.
//!
//! The file is TOML, grouped into sections the same way the rest of the
//! settings are grouped at runtime. Every section has defaults except the
//! two values that actually describe what the user wants: which screen and
//! which aspect ratio.
//!
//! Parsing only checks types. `Config::validate` turns the raw values into a
//! `Plan`, reporting malformed input as a `ValidationError` before anything
//! touches the display.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::display::AspectRatio;
use crate::error::StretchError;

/// Default location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Upper bound for `confirmation.timeout_secs`: one hour.
pub const MAX_CONFIRM_TIMEOUT_SECS: u64 = 60 * 60;

/// Window class of the game this tool was written for.
pub const DEFAULT_WINDOW_CLASS: &str = "VALORANTUnrealWindow";

// --- Top-Level Configuration Structure ---

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Which monitor to stretch and to what ratio.
    pub display: DisplayConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub instance: InstanceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplayConfig {
    /// Zero-based index into the OS display list.
    pub screen_index: u32,
    /// Requested ratio as `"X:Y"`, e.g. `"4:3"`.
    pub aspect_ratio: String,
}

/// Safety prompt shown right after the mode switch.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfirmationConfig {
    /// When false the new mode is kept without asking.
    pub enabled: bool,
    /// Seconds to wait for an answer. No answer means "no".
    pub timeout_secs: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        ConfirmationConfig {
            enabled: true,
            timeout_secs: 10,
        }
    }
}

/// The application whose lifetime bounds the session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    /// Native window class name (Win32 class / X11 WM_CLASS).
    pub window_class: String,
    /// Delay between checks while waiting for the window to appear.
    pub poll_interval_ms: u64,
    /// Refuse to start when the target is already running.
    pub require_fresh_launch: bool,
    /// Give up waiting for the window after this many seconds. Unset waits forever.
    pub resolve_timeout_secs: Option<u64>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            window_class: DEFAULT_WINDOW_CLASS.to_string(),
            poll_interval_ms: 250,
            require_fresh_launch: true,
            resolve_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstanceConfig {
    /// Name of the system-wide single-instance lock.
    pub lock_name: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        InstanceConfig {
            lock_name: "TrueStretchRunning".to_string(),
        }
    }
}

// --- Validation ---

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("aspect_ratio \"{0}\" needs formatting x:y where x and y are numbers")]
    MissingSeparator(String),
    #[error("aspect_ratio \"{0}\" needs formatting x:y where x and y are numbers")]
    InvalidNumber(String),
    #[error("aspect_ratio \"{0}\" must not contain a zero component")]
    ZeroComponent(String),
    #[error("confirmation.timeout_secs must be greater than zero")]
    ZeroTimeout,
    #[error("confirmation.timeout_secs must be at most {max}, got {0}", max = MAX_CONFIRM_TIMEOUT_SECS)]
    TimeoutTooLong(u64),
    #[error("target.poll_interval_ms must be greater than zero")]
    ZeroPollInterval,
    #[error("target.window_class must not be empty")]
    EmptyWindowClass,
}

/// Validated settings, ready for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub screen_index: u32,
    pub aspect_ratio: AspectRatio,
    /// `None` skips the confirmation prompt.
    pub confirm_timeout: Option<Duration>,
    pub window_class: String,
    pub poll_interval: Duration,
    pub require_fresh_launch: bool,
    pub resolve_timeout: Option<Duration>,
    pub lock_name: String,
}

impl Config {
    /// Reads and parses the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, StretchError> {
        let text = fs::read_to_string(path).map_err(|e| StretchError::Config {
            path: path.display().to_string(),
            reason: format!("could not open config file: {}", e),
        })?;
        Self::from_toml(&text).map_err(|e| match e {
            StretchError::Config { reason, .. } => StretchError::Config {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, StretchError> {
        toml::from_str(text).map_err(|e| StretchError::Config {
            path: "<inline>".to_string(),
            reason: e.message().to_string(),
        })
    }

    pub fn validate(&self) -> Result<Plan, ValidationError> {
        let aspect_ratio = parse_aspect_ratio(&self.display.aspect_ratio)?;

        let confirm_timeout = if self.confirmation.enabled {
            match self.confirmation.timeout_secs {
                0 => return Err(ValidationError::ZeroTimeout),
                secs if secs > MAX_CONFIRM_TIMEOUT_SECS => {
                    return Err(ValidationError::TimeoutTooLong(secs))
                }
                secs => Some(Duration::from_secs(secs)),
            }
        } else {
            None
        };

        if self.target.poll_interval_ms == 0 {
            return Err(ValidationError::ZeroPollInterval);
        }
        let window_class = self.target.window_class.trim();
        if window_class.is_empty() {
            return Err(ValidationError::EmptyWindowClass);
        }

        Ok(Plan {
            screen_index: self.display.screen_index,
            aspect_ratio,
            confirm_timeout,
            window_class: window_class.to_string(),
            poll_interval: Duration::from_millis(self.target.poll_interval_ms),
            require_fresh_launch: self.target.require_fresh_launch,
            resolve_timeout: self.target.resolve_timeout_secs.map(Duration::from_secs),
            lock_name: self.instance.lock_name.clone(),
        })
    }
}

/// Parses `"X:Y"` into an `AspectRatio`.
pub fn parse_aspect_ratio(text: &str) -> Result<AspectRatio, ValidationError> {
    let (x, y) = text
        .split_once(':')
        .ok_or_else(|| ValidationError::MissingSeparator(text.to_string()))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<u32>()
            .map_err(|_| ValidationError::InvalidNumber(text.to_string()))
    };
    let (x, y) = (parse(x)?, parse(y)?);
    AspectRatio::new(x, y).ok_or_else(|| ValidationError::ZeroComponent(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    const MINIMAL: &str = r#"
        [display]
        screen_index = 1
        aspect_ratio = "4:3"
    "#;

    #[test]
    fn it_should_fill_defaults_for_missing_sections() {
        let config = Config::from_toml(MINIMAL).unwrap();
        let plan = config.validate().unwrap();

        assert_eq!(plan.screen_index, 1);
        assert_eq!(plan.aspect_ratio, AspectRatio::new(4, 3).unwrap());
        assert_eq!(plan.confirm_timeout, Some(Duration::from_secs(10)));
        assert_eq!(plan.window_class, DEFAULT_WINDOW_CLASS);
        assert_eq!(plan.poll_interval, Duration::from_millis(250));
        assert!(plan.require_fresh_launch);
        assert_eq!(plan.resolve_timeout, None);
        assert_eq!(plan.lock_name, "TrueStretchRunning");
    }

    #[test]
    fn it_should_read_every_section() {
        let text = r#"
            [display]
            screen_index = 0
            aspect_ratio = "16:10"

            [confirmation]
            enabled = false

            [target]
            window_class = "MyGameWindow"
            poll_interval_ms = 50
            require_fresh_launch = false
            resolve_timeout_secs = 30

            [instance]
            lock_name = "Other"
        "#;
        let plan = Config::from_toml(text).unwrap().validate().unwrap();
        assert_eq!(plan.confirm_timeout, None);
        assert_eq!(plan.window_class, "MyGameWindow");
        assert_eq!(plan.poll_interval, Duration::from_millis(50));
        assert!(!plan.require_fresh_launch);
        assert_eq!(plan.resolve_timeout, Some(Duration::from_secs(30)));
        assert_eq!(plan.lock_name, "Other");
    }

    #[test]
    fn it_should_accept_the_shipped_sample() {
        let plan = Config::from_toml(include_str!("../config.toml"))
            .unwrap()
            .validate()
            .unwrap();
        // The sample spells out the defaults.
        let defaults = Config::from_toml(MINIMAL).unwrap().validate().unwrap();
        assert_eq!(plan, Plan { screen_index: 0, ..defaults });
    }

    #[test]
    fn it_should_reject_a_missing_display_section() {
        let err = Config::from_toml("[confirmation]\nenabled = true\n").unwrap_err();
        assert!(matches!(err, StretchError::Config { .. }));
    }

    #[test]
    fn it_should_reject_unknown_keys() {
        let text = format!("{}\nscreen = 2\n", MINIMAL);
        assert!(Config::from_toml(&text).is_err());
    }

    #[test]
    fn it_should_parse_aspect_ratios() {
        assert_eq!(parse_aspect_ratio("21:9"), Ok(AspectRatio::new(21, 9).unwrap()));
        assert_eq!(parse_aspect_ratio(" 4 : 3 "), Ok(AspectRatio::new(4, 3).unwrap()));
    }

    #[test]
    fn it_should_reject_malformed_aspect_ratios() {
        assert_eq!(
            parse_aspect_ratio("4x3"),
            Err(ValidationError::MissingSeparator("4x3".to_string()))
        );
        assert_eq!(
            parse_aspect_ratio("4:three"),
            Err(ValidationError::InvalidNumber("4:three".to_string()))
        );
        assert_eq!(
            parse_aspect_ratio("-4:3"),
            Err(ValidationError::InvalidNumber("-4:3".to_string()))
        );
        assert_eq!(
            parse_aspect_ratio("4:0"),
            Err(ValidationError::ZeroComponent("4:0".to_string()))
        );
        assert!(parse_aspect_ratio("4:3:2").is_err());
    }

    #[test]
    fn it_should_reject_a_zero_timeout_only_when_confirmation_is_enabled() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.confirmation.timeout_secs = 0;
        assert_eq!(config.validate(), Err(ValidationError::ZeroTimeout));

        config.confirmation.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn it_should_bound_the_confirmation_timeout() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.confirmation.timeout_secs = MAX_CONFIRM_TIMEOUT_SECS;
        assert_eq!(
            config.validate().unwrap().confirm_timeout,
            Some(Duration::from_secs(MAX_CONFIRM_TIMEOUT_SECS))
        );

        config.confirmation.timeout_secs = i64::MAX as u64;
        assert_eq!(
            config.validate(),
            Err(ValidationError::TimeoutTooLong(i64::MAX as u64))
        );
    }

    #[test]
    fn it_should_reject_a_blank_window_class() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.target.window_class = "  ".to_string();
        assert_eq!(config.validate(), Err(ValidationError::EmptyWindowClass));
    }

    #[test]
    fn it_should_report_the_path_of_a_missing_file() {
        let err = Config::load(Path::new("/definitely/not/here/config.toml")).unwrap_err();
        match err {
            StretchError::Config { path, .. } => assert!(path.contains("definitely")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
