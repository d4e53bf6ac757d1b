// src/watcher.rs

//! Finds the target application and follows its process lifetime.
//!
//! The watcher waits for the target's window to appear (the user starts the
//! game after launching this tool), opens its owning process and hands back a
//! `TargetProcess`. The session then blocks on that process until it exits.

use crate::error::StretchError;
use crate::session::SessionTarget;
use log::{debug, info, trace, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Opaque native window handle (`HWND`, X11 `Window`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

/// Opaque window style snapshot, used to undo `make_borderless_maximized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStyle(pub u64);

/// An opened process. `raw` is the OS handle where the platform has one.
#[derive(Debug, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub raw: u64,
}

/// Platform window and process primitives.
pub trait WindowHost {
    /// Looks up a top-level window by class name.
    fn find_window(&mut self, window_class: &str) -> Option<WindowHandle>;

    /// Opens the process owning `window` with permission to wait on it.
    /// Fails with `StretchError::Access`.
    fn open_process(&mut self, window: WindowHandle) -> Result<ProcessHandle, StretchError>;

    /// Strips the frame and border and maximizes. Returns the previous style.
    fn make_borderless_maximized(
        &mut self,
        window: WindowHandle,
    ) -> Result<WindowStyle, StretchError>;

    fn restore_style(&mut self, window: WindowHandle, style: WindowStyle)
        -> Result<(), StretchError>;

    /// Blocks until the process exits. No timeout.
    fn wait_for_exit(&mut self, process: &ProcessHandle) -> Result<(), StretchError>;

    /// Releases the OS handle.
    fn close_process(&mut self, process: ProcessHandle);

    /// True once the user has asked this process to stop.
    fn interrupted(&self) -> bool {
        false
    }
}

pub struct ProcessWatcher<'h> {
    host: &'h mut dyn WindowHost,
    poll_interval: Duration,
    resolve_timeout: Option<Duration>,
}

impl<'h> ProcessWatcher<'h> {
    pub fn new(host: &'h mut dyn WindowHost, poll_interval: Duration) -> Self {
        Self {
            host,
            poll_interval,
            resolve_timeout: None,
        }
    }

    /// Bounds how long `resolve` waits. `None` waits forever.
    pub fn with_resolve_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Fails if the target window already exists.
    ///
    /// The display switch has to happen before the game creates its swap chain,
    /// so an already running instance would never pick up the new mode.
    pub fn ensure_not_running(&mut self, window_class: &str) -> Result<(), StretchError> {
        match self.host.find_window(window_class) {
            Some(window) => {
                warn!(
                    "Target window '{}' already exists ({:?})",
                    window_class, window
                );
                Err(StretchError::TargetAlreadyRunning {
                    window_class: window_class.to_string(),
                })
            }
            None => Ok(()),
        }
    }

    /// Waits for the window to appear and opens its owning process.
    pub fn resolve(self, window_class: &str) -> Result<TargetProcess<'h>, StretchError> {
        info!(
            "Waiting for window '{}' (poll every {:?})",
            window_class, self.poll_interval
        );
        let started = Instant::now();
        let mut attempts: u64 = 0;

        let window = loop {
            if self.host.interrupted() {
                info!("Stopped waiting for '{}': interrupted", window_class);
                return Err(StretchError::Interrupted);
            }
            attempts += 1;
            if let Some(window) = self.host.find_window(window_class) {
                break window;
            }
            if let Some(limit) = self.resolve_timeout {
                if started.elapsed() >= limit {
                    return Err(StretchError::TargetNotFound {
                        window_class: window_class.to_string(),
                    });
                }
            }
            trace!("Window '{}' not found yet (attempt {})", window_class, attempts);
            thread::sleep(self.poll_interval);
        };
        debug!(
            "Found window {:?} after {} attempt(s) in {:?}",
            window,
            attempts,
            started.elapsed()
        );

        let process = self.host.open_process(window)?;
        info!("Target process {} resolved", process.pid);

        Ok(TargetProcess {
            host: self.host,
            window,
            process: Some(process),
            saved_style: None,
        })
    }
}

/// The running target. Closes its process handle on drop.
pub struct TargetProcess<'h> {
    host: &'h mut dyn WindowHost,
    window: WindowHandle,
    process: Option<ProcessHandle>,
    saved_style: Option<WindowStyle>,
}

impl TargetProcess<'_> {
    pub fn window(&self) -> WindowHandle {
        self.window
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.pid)
    }
}

impl SessionTarget for TargetProcess<'_> {
    fn prepare_window(&mut self) -> Result<(), StretchError> {
        let previous = self.host.make_borderless_maximized(self.window)?;
        self.saved_style = Some(previous);
        Ok(())
    }

    fn revert_window(&mut self) -> Result<(), StretchError> {
        match self.saved_style.take() {
            Some(style) => self.host.restore_style(self.window, style),
            None => Ok(()),
        }
    }

    fn wait_for_exit(&mut self) -> Result<(), StretchError> {
        let process = self.process.as_ref().ok_or_else(|| StretchError::Watch {
            reason: "process handle already closed".to_string(),
        })?;
        info!("Watching process {} until it exits", process.pid);
        self.host.wait_for_exit(process)?;
        info!("Process {} exited", process.pid);
        // The window is gone with the process; nothing left to revert.
        self.saved_style = None;
        Ok(())
    }
}

impl Drop for TargetProcess<'_> {
    fn drop(&mut self) {
        if let Some(process) = self.process.take() {
            trace!("Closing handle of process {}", process.pid);
            self.host.close_process(process);
        }
    }
}
