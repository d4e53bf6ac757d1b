// src/session.rs

//! The display session: capture, apply, confirm, watch, restore.
//!
//! ```text
//! Idle -> OriginalCaptured -> ModeApplied -> AwaitingConfirmation
//!      -> Confirmed -> Watching -> Restoring -> Closed | RestoreFailed
//!      -> Rejected  ------------^
//! ```
//!
//! `SessionState` records which resources are currently held or modified.
//! Teardown consults it and undoes exactly those, in reverse order. Once the
//! new mode is applied, restoration is attempted on every exit path: normal
//! completion, errors, a declined prompt, and unwinding (see the `Drop` impl).

use bitflags::bitflags;
use log::{debug, error, info, warn};
use std::time::Duration;

use crate::config::Plan;
use crate::display::{
    select_best, ApplyKind, AspectRatio, DisplayDriver, DisplayIdentity, DisplayMode, ModeCatalog,
};
use crate::error::StretchError;
use crate::lock::InstanceLock;
use crate::notify::{Confirmation, Notifier};

bitflags! {
    /// Resources a session currently holds or has modified.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SessionState: u8 {
        const MUTEX_HELD = 1 << 0;
        const ORIGINAL_CAPTURED = 1 << 1;
        const MODE_APPLIED = 1 << 2;
        const WINDOW_STYLE_MODIFIED = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    OriginalCaptured,
    ModeApplied,
    AwaitingConfirmation,
    Confirmed,
    Rejected,
    Watching,
    Restoring,
    Closed,
    RestoreFailed,
}

/// Non-error ways a session can end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The target ran to completion and the original mode is back.
    Completed,
    /// The new mode was not confirmed and the original mode is back.
    Declined(Confirmation),
}

/// What the session needs from the application it is bound to.
pub trait SessionTarget {
    /// Borderless, maximized.
    fn prepare_window(&mut self) -> Result<(), StretchError>;
    /// Undoes `prepare_window` while the target is still running.
    fn revert_window(&mut self) -> Result<(), StretchError>;
    /// Blocks until the target process is gone.
    fn wait_for_exit(&mut self) -> Result<(), StretchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub aspect_ratio: AspectRatio,
    /// `None` applies the mode without asking.
    pub confirm_timeout: Option<Duration>,
}

impl From<&Plan> for SessionSettings {
    fn from(plan: &Plan) -> Self {
        SessionSettings {
            aspect_ratio: plan.aspect_ratio,
            confirm_timeout: plan.confirm_timeout,
        }
    }
}

pub const CONFIRM_TITLE: &str = "Confirmation";

pub struct DisplaySession<'d> {
    driver: &'d mut dyn DisplayDriver,
    display: DisplayIdentity,
    settings: SessionSettings,
    state: SessionState,
    phase: SessionPhase,
    original: Option<DisplayMode>,
    applied: Option<DisplayMode>,
    lock: Option<InstanceLock>,
}

impl<'d> DisplaySession<'d> {
    /// Takes ownership of the instance lock; it is released when the session
    /// is torn down.
    pub fn new(
        driver: &'d mut dyn DisplayDriver,
        display: DisplayIdentity,
        settings: SessionSettings,
        lock: InstanceLock,
    ) -> Self {
        Self {
            driver,
            display,
            settings,
            state: SessionState::MUTEX_HELD,
            phase: SessionPhase::Idle,
            original: None,
            applied: None,
            lock: Some(lock),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn display(&self) -> &DisplayIdentity {
        &self.display
    }

    pub fn original_mode(&self) -> Option<DisplayMode> {
        self.original
    }

    pub fn applied_mode(&self) -> Option<DisplayMode> {
        self.applied
    }

    /// Runs the whole session against `target` and tears it down.
    ///
    /// A failed restore overrides any earlier error: it is the one outcome the
    /// user has to act on.
    pub fn run(
        &mut self,
        notifier: &mut dyn Notifier,
        target: &mut dyn SessionTarget,
    ) -> Result<SessionOutcome, StretchError> {
        let result = self.drive(notifier, target);
        if let Err(e) = &result {
            warn!("Session on {} failed in phase {:?}: {}", self.display, self.phase, e);
        }
        match self.teardown(target) {
            Err(fatal) => Err(fatal),
            Ok(()) => result,
        }
    }

    fn drive(
        &mut self,
        notifier: &mut dyn Notifier,
        target: &mut dyn SessionTarget,
    ) -> Result<SessionOutcome, StretchError> {
        self.capture_original()?;
        self.apply_best()?;

        let decision = self.await_confirmation(notifier);
        if !decision.is_accepted() {
            info!("New display mode not confirmed ({:?}); restoring", decision);
            self.phase = SessionPhase::Rejected;
            return Ok(SessionOutcome::Declined(decision));
        }
        self.phase = SessionPhase::Confirmed;

        target.prepare_window()?;
        self.state.insert(SessionState::WINDOW_STYLE_MODIFIED);

        self.phase = SessionPhase::Watching;
        target.wait_for_exit()?;
        // The window died with the process.
        self.state.remove(SessionState::WINDOW_STYLE_MODIFIED);

        Ok(SessionOutcome::Completed)
    }

    /// Idle -> OriginalCaptured.
    pub fn capture_original(&mut self) -> Result<DisplayMode, StretchError> {
        let original = self.driver.current_mode(&self.display)?;
        info!("Captured original mode of {}: {}", self.display, original);
        self.original = Some(original);
        self.state.insert(SessionState::ORIGINAL_CAPTURED);
        self.phase = SessionPhase::OriginalCaptured;
        Ok(original)
    }

    /// OriginalCaptured -> ModeApplied.
    ///
    /// Refuses to touch the display until `capture_original` has succeeded,
    /// since there would be nothing to restore afterwards.
    pub fn apply_best(&mut self) -> Result<DisplayMode, StretchError> {
        if !self.state.contains(SessionState::ORIGINAL_CAPTURED) || self.original.is_none() {
            return Err(StretchError::Query {
                display: self.display.clone(),
                reason: "original mode not captured".to_string(),
            });
        }
        let ratio = self.settings.aspect_ratio;
        let best = {
            let modes = self.driver.list_modes(&self.display)?;
            select_best(modes, ratio)
        };
        let mode = best.ok_or_else(|| StretchError::NoMatchingMode {
            display: self.display.clone(),
            ratio,
        })?;

        info!("Applying {} to {} for aspect ratio {}", mode, self.display, ratio);
        self.driver
            .apply_mode(&self.display, &mode, ApplyKind::Reset)
            .map_err(|reason| StretchError::Apply { mode, reason })?;

        self.applied = Some(mode);
        self.state.insert(SessionState::MODE_APPLIED);
        self.phase = SessionPhase::ModeApplied;
        Ok(mode)
    }

    fn await_confirmation(&mut self, notifier: &mut dyn Notifier) -> Confirmation {
        let Some(timeout) = self.settings.confirm_timeout else {
            debug!("Confirmation disabled; keeping new mode");
            return Confirmation::Accepted;
        };
        self.phase = SessionPhase::AwaitingConfirmation;

        if !notifier.supports_timeout() {
            warn!("Notifier cannot time out a prompt; defaulting to reject");
            return Confirmation::Unavailable;
        }

        let message = format!(
            "Please confirm your new display settings within {} seconds, otherwise they will be reset.",
            timeout.as_secs()
        );
        let decision = notifier.confirm(CONFIRM_TITLE, &message, timeout);
        debug!("Confirmation answered: {:?}", decision);
        decision
    }

    /// Undoes everything `state` says is held, then releases the lock.
    fn teardown(&mut self, target: &mut dyn SessionTarget) -> Result<(), StretchError> {
        if self.state.contains(SessionState::WINDOW_STYLE_MODIFIED) {
            if let Err(e) = target.revert_window() {
                warn!("Could not revert target window style: {}", e);
            }
            self.state.remove(SessionState::WINDOW_STYLE_MODIFIED);
        }

        let restored = if self.state.contains(SessionState::MODE_APPLIED) {
            self.restore()
        } else {
            self.phase = SessionPhase::Closed;
            Ok(())
        };

        if self.phase == SessionPhase::Closed {
            // Nothing is left to put back.
            self.state.remove(SessionState::ORIGINAL_CAPTURED);
        }
        if self.lock.take().is_some() {
            self.state.remove(SessionState::MUTEX_HELD);
        }
        restored
    }

    /// Restoring -> Closed | RestoreFailed. Single attempt.
    fn restore(&mut self) -> Result<(), StretchError> {
        self.phase = SessionPhase::Restoring;
        // Attempted once, whatever the result.
        self.state.remove(SessionState::MODE_APPLIED);

        let Some(original) = self.original else {
            error!("{} left in {:?} with no captured original mode", self.display, self.applied);
            self.phase = SessionPhase::RestoreFailed;
            return Err(StretchError::OriginalUnknown {
                display: self.display.clone(),
            });
        };

        match self
            .driver
            .apply_mode(&self.display, &original, ApplyKind::Restore)
        {
            Ok(()) => {
                info!("Restored {} to {}", self.display, original);
                self.phase = SessionPhase::Closed;
                Ok(())
            }
            Err(reason) => {
                error!("Restoring {} to {} failed: {}", self.display, original, reason);
                self.phase = SessionPhase::RestoreFailed;
                Err(StretchError::RestoreFailed {
                    mode: original,
                    reason,
                })
            }
        }
    }
}

impl Drop for DisplaySession<'_> {
    fn drop(&mut self) {
        if self.state.contains(SessionState::MODE_APPLIED) {
            warn!(
                "Session on {} dropped while {:?}; restoring original mode",
                self.display, self.phase
            );
            if let Err(e) = self.restore() {
                error!("{}", e);
            }
        }
    }
}
