// src/app.rs

//! Wires configuration, platform and session together for one launch.

use log::info;
use serde::Serialize;
use std::process::ExitCode;

use crate::config::Plan;
use crate::display::{
    select_best, AspectRatio, DisplayDriver, DisplayIdentity, DisplayMode, ModeCatalog,
};
use crate::error::StretchError;
use crate::lock::InstanceLocker;
use crate::notify::{AlertLevel, Notifier};
use crate::platform::Platform;
use crate::session::{DisplaySession, SessionOutcome, SessionSettings};
use crate::watcher::ProcessWatcher;

/// Message shown after a declined or timed out confirmation.
pub const DECLINED_MESSAGE: &str = "Did not confirm - display settings reset.";

/// Runs one full launch: lock, wait for the target, stretch, watch, restore.
///
/// The instance lock is taken before anything else, so a second launch fails
/// with `AlreadyRunning` without looking at windows or displays.
pub fn run(
    platform: &mut Platform,
    notifier: &mut dyn Notifier,
    plan: &Plan,
) -> Result<SessionOutcome, StretchError> {
    let lock = platform.locks.acquire(&plan.lock_name)?;

    let mut watcher = ProcessWatcher::new(platform.windows.as_mut(), plan.poll_interval)
        .with_resolve_timeout(plan.resolve_timeout);
    if plan.require_fresh_launch {
        watcher.ensure_not_running(&plan.window_class)?;
    }
    let mut target = watcher.resolve(&plan.window_class)?;

    let display = platform
        .display
        .resolve_display(plan.screen_index)
        .ok_or(StretchError::DisplayNotFound {
            index: plan.screen_index,
        })?;
    info!("Screen {} is {}", plan.screen_index, display);

    let mut session = DisplaySession::new(
        platform.display.as_mut(),
        display,
        SessionSettings::from(plan),
        lock,
    );
    session.run(notifier, &mut target)
}

/// Maps a launch result to the process exit code and tells the user about it.
///
/// `0` clean completion, `1` any error, `2` the new mode was declined.
pub fn report(result: &Result<SessionOutcome, StretchError>, notifier: &mut dyn Notifier) -> ExitCode {
    ExitCode::from(exit_status(result, notifier))
}

pub fn exit_status(result: &Result<SessionOutcome, StretchError>, notifier: &mut dyn Notifier) -> u8 {
    match result {
        Ok(SessionOutcome::Completed) => {
            info!("Session completed");
            0
        }
        Ok(SessionOutcome::Declined(decision)) => {
            info!("Session declined ({:?})", decision);
            notifier.alert(AlertLevel::Notice, DECLINED_MESSAGE);
            2
        }
        Err(e) => {
            let level = if e.is_fatal() {
                AlertLevel::Fatal
            } else {
                AlertLevel::Error
            };
            log::error!("{}", e);
            notifier.alert(level, &e.to_string());
            1
        }
    }
}

/// Catalog dump for `--list-modes`.
#[derive(Debug, Serialize)]
pub struct ModeReport {
    pub display: DisplayIdentity,
    pub current: DisplayMode,
    pub aspect_ratio: String,
    pub best: Option<DisplayMode>,
    pub modes: Vec<DisplayMode>,
}

/// Describes what a session on `screen_index` would pick, without changing anything.
pub fn describe_modes(
    platform: &Platform,
    screen_index: u32,
    ratio: AspectRatio,
) -> Result<ModeReport, StretchError> {
    let display = platform
        .display
        .resolve_display(screen_index)
        .ok_or(StretchError::DisplayNotFound { index: screen_index })?;
    let current = platform.display.current_mode(&display)?;
    let modes: Vec<DisplayMode> = platform.display.list_modes(&display)?.collect();
    let best = select_best(modes.iter().copied(), ratio);

    Ok(ModeReport {
        display,
        current,
        aspect_ratio: ratio.to_string(),
        best,
        modes,
    })
}
