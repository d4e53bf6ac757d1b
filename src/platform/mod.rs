// src/platform/mod.rs
//
// Native backends and the bundle the session runs against.

use crate::display::DisplayDriver;
use crate::error::StretchError;
use crate::lock::InstanceLocker;
use crate::notify::Notifier;
use crate::watcher::WindowHost;

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod win32;
#[cfg(all(unix, feature = "x11"))]
pub mod xrandr;

#[cfg(test)]
pub mod mock;

/// The OS services a session needs, each behind its own trait.
///
/// Fields are public and separate so a caller can borrow the display driver
/// and the window host at the same time.
pub struct Platform {
    pub display: Box<dyn DisplayDriver>,
    pub windows: Box<dyn WindowHost>,
    pub locks: Box<dyn InstanceLocker>,
}

impl Platform {
    /// Builds the backend for the OS this binary was compiled for.
    #[cfg(windows)]
    pub fn native() -> Result<Self, StretchError> {
        log::info!("Using Win32 display backend");
        Ok(Self {
            display: Box::new(win32::Win32Display::new()),
            windows: Box::new(win32::Win32Windows::new()),
            locks: Box::new(win32::NamedMutexLocker),
        })
    }

    #[cfg(all(unix, feature = "x11"))]
    pub fn native() -> Result<Self, StretchError> {
        use anyhow::Context;
        use std::rc::Rc;

        log::info!("Using X11/XRandR display backend");
        let connection = Rc::new(xrandr::Connection::open().context("Failed to initialize X11 backend")?);
        Ok(Self {
            display: Box::new(xrandr::XrandrDisplay::new(Rc::clone(&connection))?),
            windows: Box::new(xrandr::X11Windows::new(connection)),
            locks: Box::new(unix::FlockLocker::in_temp_dir()),
        })
    }

    #[cfg(not(any(windows, all(unix, feature = "x11"))))]
    pub fn native() -> Result<Self, StretchError> {
        Err(StretchError::Platform(anyhow::anyhow!(
            "no display backend compiled for this platform (on X11, rebuild with `--features x11`)"
        )))
    }
}

/// Notifier for this OS. Available even when no display backend is.
pub fn native_notifier() -> Box<dyn Notifier> {
    #[cfg(windows)]
    {
        Box::new(win32::MessageBoxNotifier::new())
    }
    #[cfg(unix)]
    {
        Box::new(unix::TerminalNotifier::new())
    }
}

/// Turns Ctrl-C and friends into an orderly teardown where the OS allows it.
///
/// On Unix the handlers only raise a flag that the blocking loops poll. Win32
/// has no equivalent here: the process wait is a single uninterruptible
/// `WaitForSingleObject`.
pub fn install_termination_handlers() {
    #[cfg(unix)]
    {
        match unix::install_termination_handlers(&unix::TERMINATION_SIGNALS) {
            Ok(()) => log::debug!("Termination signals routed to session teardown"),
            Err(e) => log::warn!("Could not install termination handlers: {}", e),
        }
    }
    #[cfg(windows)]
    {
        log::debug!("No termination handlers on this platform");
    }
}
