// src/platform/mock.rs

//! In-memory platform that records every call, for tests.
//!
//! Each mock is a cheap `Clone` handle over shared state, so a test can hand
//! one copy to the code under test and keep another to inspect afterwards.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use crate::display::{ApplyKind, DisplayDriver, DisplayIdentity, DisplayMode, ModeCatalog, ModeIter};
use crate::error::StretchError;
use crate::lock::{HeldLock, InstanceLock, InstanceLocker};
use crate::notify::{AlertLevel, Confirmation, Notifier};
use crate::platform::Platform;
use crate::watcher::{ProcessHandle, WindowHandle, WindowHost, WindowStyle};

// --- Display ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayCall {
    Current(DisplayIdentity),
    List(DisplayIdentity),
    Apply(DisplayMode, ApplyKind),
}

#[derive(Debug, Default)]
struct DisplayInner {
    displays: Vec<(DisplayIdentity, Vec<DisplayMode>)>,
    current: HashMap<DisplayIdentity, DisplayMode>,
    calls: Vec<DisplayCall>,
    fail_query: bool,
    fail_enumeration: bool,
    reject_apply: Option<String>,
    reject_restore: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockDisplay(Rc<RefCell<DisplayInner>>);

impl MockDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a display at the next screen index.
    pub fn with_display(self, name: &str, current: DisplayMode, modes: Vec<DisplayMode>) -> Self {
        {
            let mut inner = self.0.borrow_mut();
            let identity = DisplayIdentity::new(name);
            inner.current.insert(identity.clone(), current);
            inner.displays.push((identity, modes));
        }
        self
    }

    pub fn current(&self, name: &str) -> Option<DisplayMode> {
        self.0.borrow().current.get(&DisplayIdentity::new(name)).copied()
    }

    pub fn calls(&self) -> Vec<DisplayCall> {
        self.0.borrow().calls.clone()
    }

    /// Number of mode-set calls, successful or not.
    pub fn mutations(&self) -> usize {
        self.applies().len()
    }

    pub fn applies(&self) -> Vec<(DisplayMode, ApplyKind)> {
        self.0
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                DisplayCall::Apply(mode, kind) => Some((*mode, *kind)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_query(&self) {
        self.0.borrow_mut().fail_query = true;
    }

    pub fn fail_enumeration(&self) {
        self.0.borrow_mut().fail_enumeration = true;
    }

    pub fn reject_apply(&self, reason: &str) {
        self.0.borrow_mut().reject_apply = Some(reason.to_string());
    }

    pub fn reject_restore(&self, reason: &str) {
        self.0.borrow_mut().reject_restore = Some(reason.to_string());
    }
}

impl ModeCatalog for MockDisplay {
    fn list_modes<'a>(&'a self, display: &'a DisplayIdentity) -> Result<ModeIter<'a>, StretchError> {
        let mut inner = self.0.borrow_mut();
        inner.calls.push(DisplayCall::List(display.clone()));
        if inner.fail_enumeration {
            return Err(StretchError::Enumeration {
                display: display.clone(),
                reason: "mock enumeration failure".to_string(),
            });
        }
        let modes = inner
            .displays
            .iter()
            .find(|(id, _)| id == display)
            .map(|(_, modes)| modes.clone())
            .ok_or_else(|| StretchError::Enumeration {
                display: display.clone(),
                reason: "unknown display".to_string(),
            })?;
        Ok(Box::new(modes.into_iter()))
    }
}

impl DisplayDriver for MockDisplay {
    fn resolve_display(&self, index: u32) -> Option<DisplayIdentity> {
        let inner = self.0.borrow();
        inner.displays.get(index as usize).map(|(id, _)| id.clone())
    }

    fn current_mode(&self, display: &DisplayIdentity) -> Result<DisplayMode, StretchError> {
        let mut inner = self.0.borrow_mut();
        inner.calls.push(DisplayCall::Current(display.clone()));
        if inner.fail_query {
            return Err(StretchError::Query {
                display: display.clone(),
                reason: "mock query failure".to_string(),
            });
        }
        inner
            .current
            .get(display)
            .copied()
            .ok_or_else(|| StretchError::Query {
                display: display.clone(),
                reason: "unknown display".to_string(),
            })
    }

    fn apply_mode(
        &mut self,
        display: &DisplayIdentity,
        mode: &DisplayMode,
        kind: ApplyKind,
    ) -> Result<(), String> {
        let mut inner = self.0.borrow_mut();
        inner.calls.push(DisplayCall::Apply(*mode, kind));
        let rejection = match kind {
            ApplyKind::Reset => inner.reject_apply.clone(),
            ApplyKind::Restore => inner.reject_restore.clone(),
        };
        if let Some(reason) = rejection {
            return Err(reason);
        }
        inner.current.insert(display.clone(), *mode);
        Ok(())
    }
}

// --- Windows ---

pub const MOCK_WINDOW: WindowHandle = WindowHandle(0x1234);
pub const MOCK_PID: u32 = 4242;
pub const MOCK_STYLE: WindowStyle = WindowStyle(0x00CF_0000);

#[derive(Default)]
struct WindowsInner {
    /// Lookups that miss before the window shows up. `None` never shows it.
    appears_after: Option<usize>,
    lookups: usize,
    deny_access: bool,
    fail_style: bool,
    fail_wait: bool,
    interrupted: bool,
    style_modified: bool,
    style_restored: bool,
    waits: usize,
    opened: usize,
    closed: usize,
    on_wait: Option<Box<dyn FnMut()>>,
}

#[derive(Clone, Default)]
pub struct MockWindows(Rc<RefCell<WindowsInner>>);

impl MockWindows {
    /// A target whose window exists on the first lookup.
    pub fn running() -> Self {
        Self::appearing_after(0)
    }

    pub fn appearing_after(misses: usize) -> Self {
        let windows = Self::default();
        windows.0.borrow_mut().appears_after = Some(misses);
        windows
    }

    pub fn never_appearing() -> Self {
        Self::default()
    }

    pub fn deny_access(&self) {
        self.0.borrow_mut().deny_access = true;
    }

    pub fn fail_style(&self) {
        self.0.borrow_mut().fail_style = true;
    }

    /// Makes the process wait end in a `Watch` error.
    pub fn fail_wait(&self) {
        self.0.borrow_mut().fail_wait = true;
    }

    /// Acts as if a termination signal arrived.
    pub fn interrupt(&self) {
        self.0.borrow_mut().interrupted = true;
    }

    /// Runs `hook` while the session is blocked on the target process.
    pub fn on_wait(&self, hook: impl FnMut() + 'static) {
        self.0.borrow_mut().on_wait = Some(Box::new(hook));
    }

    pub fn lookups(&self) -> usize {
        self.0.borrow().lookups
    }

    pub fn waits(&self) -> usize {
        self.0.borrow().waits
    }

    pub fn style_modified(&self) -> bool {
        self.0.borrow().style_modified
    }

    pub fn style_restored(&self) -> bool {
        self.0.borrow().style_restored
    }

    /// (opened, closed) process handle counts.
    pub fn handles(&self) -> (usize, usize) {
        let inner = self.0.borrow();
        (inner.opened, inner.closed)
    }
}

impl WindowHost for MockWindows {
    fn find_window(&mut self, _window_class: &str) -> Option<WindowHandle> {
        let mut inner = self.0.borrow_mut();
        let misses = inner.lookups;
        inner.lookups += 1;
        match inner.appears_after {
            Some(after) if misses >= after => Some(MOCK_WINDOW),
            _ => None,
        }
    }

    fn open_process(&mut self, _window: WindowHandle) -> Result<ProcessHandle, StretchError> {
        let mut inner = self.0.borrow_mut();
        if inner.deny_access {
            return Err(StretchError::Access {
                pid: MOCK_PID,
                reason: "access denied".to_string(),
            });
        }
        inner.opened += 1;
        Ok(ProcessHandle {
            pid: MOCK_PID,
            raw: 1,
        })
    }

    fn make_borderless_maximized(
        &mut self,
        _window: WindowHandle,
    ) -> Result<WindowStyle, StretchError> {
        let mut inner = self.0.borrow_mut();
        if inner.fail_style {
            return Err(StretchError::WindowStyle {
                reason: "mock style failure".to_string(),
            });
        }
        inner.style_modified = true;
        Ok(MOCK_STYLE)
    }

    fn restore_style(&mut self, _window: WindowHandle, style: WindowStyle) -> Result<(), StretchError> {
        assert_eq!(style, MOCK_STYLE);
        self.0.borrow_mut().style_restored = true;
        Ok(())
    }

    fn wait_for_exit(&mut self, _process: &ProcessHandle) -> Result<(), StretchError> {
        let hook = {
            let mut inner = self.0.borrow_mut();
            inner.waits += 1;
            inner.on_wait.take()
        };
        // Borrow released before the hook so it may inspect this mock.
        if let Some(mut hook) = hook {
            hook();
        }
        let inner = self.0.borrow();
        if inner.interrupted {
            return Err(StretchError::Interrupted);
        }
        if inner.fail_wait {
            return Err(StretchError::Watch {
                reason: "mock watch failure".to_string(),
            });
        }
        Ok(())
    }

    fn interrupted(&self) -> bool {
        self.0.borrow().interrupted
    }

    fn close_process(&mut self, _process: ProcessHandle) {
        self.0.borrow_mut().closed += 1;
    }
}

// --- Notifier ---

#[derive(Debug)]
struct NotifierInner {
    answer: Confirmation,
    supports_timeout: bool,
    prompts: Vec<(String, Duration)>,
    alerts: Vec<(AlertLevel, String)>,
}

#[derive(Debug, Clone)]
pub struct MockNotifier(Rc<RefCell<NotifierInner>>);

impl MockNotifier {
    pub fn answering(answer: Confirmation) -> Self {
        Self(Rc::new(RefCell::new(NotifierInner {
            answer,
            supports_timeout: true,
            prompts: Vec::new(),
            alerts: Vec::new(),
        })))
    }

    pub fn without_timeout_support(self) -> Self {
        self.0.borrow_mut().supports_timeout = false;
        self
    }

    pub fn prompts(&self) -> Vec<(String, Duration)> {
        self.0.borrow().prompts.clone()
    }

    pub fn alerts(&self) -> Vec<(AlertLevel, String)> {
        self.0.borrow().alerts.clone()
    }
}

impl Notifier for MockNotifier {
    fn alert(&mut self, level: AlertLevel, message: &str) {
        self.0.borrow_mut().alerts.push((level, message.to_string()));
    }

    fn supports_timeout(&self) -> bool {
        self.0.borrow().supports_timeout
    }

    fn confirm(&mut self, _title: &str, message: &str, timeout: Duration) -> Confirmation {
        let mut inner = self.0.borrow_mut();
        inner.prompts.push((message.to_string(), timeout));
        inner.answer
    }
}

// --- Instance locks ---

/// Lock registry shared by every `MockLocks` clone, standing in for the OS.
#[derive(Debug, Clone, Default)]
pub struct MockLocks(Rc<RefCell<HashSet<String>>>);

impl MockLocks {
    pub fn is_held(&self, name: &str) -> bool {
        self.0.borrow().contains(name)
    }
}

#[derive(Debug)]
struct MockLockToken {
    registry: MockLocks,
    name: String,
}

impl HeldLock for MockLockToken {}

impl Drop for MockLockToken {
    fn drop(&mut self) {
        self.registry.0.borrow_mut().remove(&self.name);
    }
}

impl InstanceLocker for MockLocks {
    fn acquire(&mut self, name: &str) -> Result<InstanceLock, StretchError> {
        if !self.0.borrow_mut().insert(name.to_string()) {
            return Err(StretchError::AlreadyRunning);
        }
        Ok(InstanceLock::new(
            name,
            Box::new(MockLockToken {
                registry: self.clone(),
                name: name.to_string(),
            }),
        ))
    }
}

/// Bundles mock handles into a `Platform`.
pub fn platform(display: &MockDisplay, windows: &MockWindows, locks: &MockLocks) -> Platform {
    Platform {
        display: Box::new(display.clone()),
        windows: Box::new(windows.clone()),
        locks: Box::new(locks.clone()),
    }
}
