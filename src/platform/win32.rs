// src/platform/win32.rs

//! Win32 backend: GDI display settings, top-level window lookup, process
//! waits, the global named mutex and message boxes.

use log::{debug, info, trace, warn};
use once_cell::sync::Lazy;
use std::ffi::c_void;
use std::mem;
use windows::core::{s, w, PCWSTR};
use windows::Win32::Foundation::{
    CloseHandle, GetLastError, SetLastError, ERROR_ALREADY_EXISTS, HANDLE, HWND, WAIT_FAILED,
    WAIT_OBJECT_0, WIN32_ERROR,
};
use windows::Win32::Graphics::Gdi::{
    ChangeDisplaySettingsExW, EnumDisplayDevicesW, EnumDisplaySettingsW, CDS_RESET, CDS_TYPE,
    DEVMODEW, DISPLAY_DEVICEW, DISP_CHANGE, DISP_CHANGE_BADDUALVIEW, DISP_CHANGE_BADFLAGS,
    DISP_CHANGE_BADMODE, DISP_CHANGE_BADPARAM, DISP_CHANGE_FAILED, DISP_CHANGE_NOTUPDATED,
    DISP_CHANGE_RESTART, DISP_CHANGE_SUCCESSFUL, DM_DISPLAYFREQUENCY, DM_PELSHEIGHT,
    DM_PELSWIDTH, ENUM_CURRENT_SETTINGS, ENUM_DISPLAY_SETTINGS_MODE,
};
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows::Win32::System::Threading::{
    CreateMutexW, OpenProcess, ReleaseMutex, WaitForSingleObject, INFINITE, PROCESS_SYNCHRONIZE,
};
use windows::Win32::UI::WindowsAndMessaging::{
    FindWindowW, GetWindowLongPtrW, GetWindowThreadProcessId, MessageBoxW, SetWindowLongPtrW,
    ShowWindow, GWL_STYLE, IDYES, MB_ICONERROR, MB_ICONQUESTION, MB_ICONWARNING, MB_OK,
    MB_YESNO, MESSAGEBOX_STYLE, SW_MAXIMIZE, SW_RESTORE, WS_BORDER, WS_DLGFRAME,
};

use crate::display::{
    ApplyKind, DisplayDriver, DisplayIdentity, DisplayMode, ModeCatalog, ModeIter,
};
use crate::error::StretchError;
use crate::lock::{HeldLock, InstanceLock, InstanceLocker};
use crate::notify::{AlertLevel, Confirmation, Notifier};
use crate::watcher::{ProcessHandle, WindowHandle, WindowHost, WindowStyle};

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

fn empty_devmode() -> DEVMODEW {
    DEVMODEW {
        dmSize: mem::size_of::<DEVMODEW>() as u16,
        ..Default::default()
    }
}

fn mode_of(dm: &DEVMODEW) -> DisplayMode {
    DisplayMode::new(dm.dmPelsWidth, dm.dmPelsHeight, dm.dmDisplayFrequency)
}

fn describe_disp_change(code: DISP_CHANGE) -> String {
    let name = match code {
        DISP_CHANGE_RESTART => "DISP_CHANGE_RESTART",
        DISP_CHANGE_FAILED => "DISP_CHANGE_FAILED",
        DISP_CHANGE_BADMODE => "DISP_CHANGE_BADMODE",
        DISP_CHANGE_NOTUPDATED => "DISP_CHANGE_NOTUPDATED",
        DISP_CHANGE_BADFLAGS => "DISP_CHANGE_BADFLAGS",
        DISP_CHANGE_BADPARAM => "DISP_CHANGE_BADPARAM",
        DISP_CHANGE_BADDUALVIEW => "DISP_CHANGE_BADDUALVIEW",
        _ => return format!("DISP_CHANGE({})", code.0),
    };
    name.to_string()
}

// --- Display ---

#[derive(Debug, Default)]
pub struct Win32Display;

impl Win32Display {
    pub fn new() -> Self {
        Self
    }
}

/// Walks `EnumDisplaySettingsW` indices until the driver runs out.
struct Win32Modes {
    device: Vec<u16>,
    index: u32,
    first: Option<DisplayMode>,
}

impl Iterator for Win32Modes {
    type Item = DisplayMode;

    fn next(&mut self) -> Option<DisplayMode> {
        if let Some(first) = self.first.take() {
            return Some(first);
        }
        let mode = enum_settings(&self.device, ENUM_DISPLAY_SETTINGS_MODE(self.index))?;
        self.index += 1;
        Some(mode)
    }
}

fn enum_settings(device: &[u16], which: ENUM_DISPLAY_SETTINGS_MODE) -> Option<DisplayMode> {
    let mut dm = empty_devmode();
    // SAFETY: `device` is NUL-terminated and `dm` is sized for the call.
    let found = unsafe { EnumDisplaySettingsW(PCWSTR(device.as_ptr()), which, &mut dm) };
    found.as_bool().then(|| mode_of(&dm))
}

impl ModeCatalog for Win32Display {
    fn list_modes<'a>(&'a self, display: &'a DisplayIdentity) -> Result<ModeIter<'a>, StretchError> {
        let device = to_wide(display.as_str());
        // Index 0 fails only for a device the driver does not know.
        let first = enum_settings(&device, ENUM_DISPLAY_SETTINGS_MODE(0)).ok_or_else(|| {
            StretchError::Enumeration {
                display: display.clone(),
                reason: "EnumDisplaySettingsW rejected the device".to_string(),
            }
        })?;
        Ok(Box::new(Win32Modes {
            device,
            index: 1,
            first: Some(first),
        }))
    }
}

impl DisplayDriver for Win32Display {
    fn resolve_display(&self, index: u32) -> Option<DisplayIdentity> {
        let mut device = DISPLAY_DEVICEW {
            cb: mem::size_of::<DISPLAY_DEVICEW>() as u32,
            ..Default::default()
        };
        // SAFETY: `device.cb` is initialized as the API requires.
        let found = unsafe { EnumDisplayDevicesW(PCWSTR::null(), index, &mut device, 0) };
        if !found.as_bool() {
            debug!("EnumDisplayDevicesW has no device at index {}", index);
            return None;
        }
        Some(DisplayIdentity::new(from_wide(&device.DeviceName)))
    }

    fn current_mode(&self, display: &DisplayIdentity) -> Result<DisplayMode, StretchError> {
        enum_settings(&to_wide(display.as_str()), ENUM_CURRENT_SETTINGS).ok_or_else(|| {
            StretchError::Query {
                display: display.clone(),
                reason: format!("EnumDisplaySettingsW failed: {:?}", unsafe { GetLastError() }),
            }
        })
    }

    fn apply_mode(
        &mut self,
        display: &DisplayIdentity,
        mode: &DisplayMode,
        kind: ApplyKind,
    ) -> Result<(), String> {
        let device = to_wide(display.as_str());
        let mut dm = empty_devmode();
        dm.dmPelsWidth = mode.width;
        dm.dmPelsHeight = mode.height;
        dm.dmDisplayFrequency = mode.refresh_rate_hz;
        dm.dmFields = DM_PELSWIDTH | DM_PELSHEIGHT | DM_DISPLAYFREQUENCY;

        let flags = match kind {
            ApplyKind::Reset => CDS_RESET,
            ApplyKind::Restore => CDS_TYPE(0),
        };
        debug!("ChangeDisplaySettingsExW({}, {}, {:?})", display, mode, kind);
        // SAFETY: `device` is NUL-terminated and `dm` outlives the call.
        let code = unsafe {
            ChangeDisplaySettingsExW(
                PCWSTR(device.as_ptr()),
                Some(&dm as *const DEVMODEW),
                HWND::default(),
                flags,
                None,
            )
        };
        if code == DISP_CHANGE_SUCCESSFUL {
            Ok(())
        } else {
            Err(describe_disp_change(code))
        }
    }
}

// --- Windows and processes ---

#[derive(Debug, Default)]
pub struct Win32Windows;

impl Win32Windows {
    pub fn new() -> Self {
        Self
    }
}

fn hwnd(window: WindowHandle) -> HWND {
    HWND(window.0 as usize as *mut c_void)
}

fn handle(process: &ProcessHandle) -> HANDLE {
    HANDLE(process.raw as usize as *mut c_void)
}

impl WindowHost for Win32Windows {
    fn find_window(&mut self, window_class: &str) -> Option<WindowHandle> {
        let class = to_wide(window_class);
        // SAFETY: `class` is NUL-terminated.
        let found = unsafe { FindWindowW(PCWSTR(class.as_ptr()), PCWSTR::null()) };
        match found {
            Ok(window) if !window.is_invalid() => Some(WindowHandle(window.0 as usize as u64)),
            _ => None,
        }
    }

    fn open_process(&mut self, window: WindowHandle) -> Result<ProcessHandle, StretchError> {
        let mut pid = 0u32;
        // SAFETY: `pid` is a valid out pointer.
        unsafe { GetWindowThreadProcessId(hwnd(window), Some(&mut pid as *mut u32)) };
        if pid == 0 {
            return Err(StretchError::Access {
                pid,
                reason: "window has no owning process".to_string(),
            });
        }

        // SAFETY: plain handle request; closed in `close_process`.
        let raw = unsafe { OpenProcess(PROCESS_SYNCHRONIZE, false, pid) }.map_err(|e| {
            StretchError::Access {
                pid,
                reason: e.message(),
            }
        })?;
        trace!("Opened process {} as {:?}", pid, raw);
        Ok(ProcessHandle {
            pid,
            raw: raw.0 as usize as u64,
        })
    }

    fn make_borderless_maximized(
        &mut self,
        window: WindowHandle,
    ) -> Result<WindowStyle, StretchError> {
        let hwnd = hwnd(window);
        // SAFETY: `hwnd` came from FindWindowW; a stale handle only makes the calls fail.
        let previous = unsafe {
            SetLastError(WIN32_ERROR(0));
            GetWindowLongPtrW(hwnd, GWL_STYLE)
        };
        let stripped = previous & !((WS_DLGFRAME.0 | WS_BORDER.0) as isize);

        // SetWindowLongPtrW returns the old value, which may legitimately be 0.
        let failed = unsafe {
            SetLastError(WIN32_ERROR(0));
            SetWindowLongPtrW(hwnd, GWL_STYLE, stripped) == 0 && GetLastError() != WIN32_ERROR(0)
        };
        if failed {
            return Err(StretchError::WindowStyle {
                reason: format!("SetWindowLongPtrW failed: {:?}", unsafe { GetLastError() }),
            });
        }

        // The return value is the previous visibility, not an error.
        let _ = unsafe { ShowWindow(hwnd, SW_MAXIMIZE) };
        info!("Window {:?} made borderless and maximized", window);
        Ok(WindowStyle(previous as usize as u64))
    }

    fn restore_style(
        &mut self,
        window: WindowHandle,
        style: WindowStyle,
    ) -> Result<(), StretchError> {
        let hwnd = hwnd(window);
        let failed = unsafe {
            SetLastError(WIN32_ERROR(0));
            SetWindowLongPtrW(hwnd, GWL_STYLE, style.0 as usize as isize) == 0
                && GetLastError() != WIN32_ERROR(0)
        };
        if failed {
            return Err(StretchError::WindowStyle {
                reason: format!("SetWindowLongPtrW failed: {:?}", unsafe { GetLastError() }),
            });
        }
        let _ = unsafe { ShowWindow(hwnd, SW_RESTORE) };
        Ok(())
    }

    fn wait_for_exit(&mut self, process: &ProcessHandle) -> Result<(), StretchError> {
        // SAFETY: the handle stays open until `close_process`.
        let event = unsafe { WaitForSingleObject(handle(process), INFINITE) };
        if event == WAIT_OBJECT_0 {
            Ok(())
        } else if event == WAIT_FAILED {
            Err(StretchError::Watch {
                reason: format!("WaitForSingleObject failed: {:?}", unsafe { GetLastError() }),
            })
        } else {
            Err(StretchError::Watch {
                reason: format!("unexpected wait result {:?}", event),
            })
        }
    }

    fn close_process(&mut self, process: ProcessHandle) {
        // SAFETY: each handle is closed exactly once; `process` is consumed.
        if let Err(e) = unsafe { CloseHandle(handle(&process)) } {
            warn!("CloseHandle for process {} failed: {}", process.pid, e);
        }
    }
}

// --- Instance lock ---

/// `Global\<name>` mutex, created owned.
#[derive(Debug, Default)]
pub struct NamedMutexLocker;

#[derive(Debug)]
struct HeldMutex(HANDLE);

impl HeldLock for HeldMutex {}

impl Drop for HeldMutex {
    fn drop(&mut self) {
        // SAFETY: we created and own the mutex.
        unsafe {
            let _ = ReleaseMutex(self.0);
            let _ = CloseHandle(self.0);
        }
    }
}

impl InstanceLocker for NamedMutexLocker {
    fn acquire(&mut self, name: &str) -> Result<InstanceLock, StretchError> {
        let global = to_wide(&format!("Global\\{}", name));
        // SAFETY: `global` is NUL-terminated.
        let mutex = unsafe { CreateMutexW(None, true, PCWSTR(global.as_ptr())) }
            .map_err(|e| StretchError::Platform(anyhow::anyhow!("CreateMutexW failed: {}", e)))?;
        let held = HeldMutex(mutex);

        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            // Dropping `held` closes our handle to the other instance's mutex.
            return Err(StretchError::AlreadyRunning);
        }
        Ok(InstanceLock::new(name, Box::new(held)))
    }
}

// --- Message boxes ---

type MessageBoxTimeoutFn =
    unsafe extern "system" fn(HWND, PCWSTR, PCWSTR, MESSAGEBOX_STYLE, u16, u32) -> i32;

/// `MessageBoxTimeoutW` is undocumented; look it up once and fall back if absent.
static MESSAGE_BOX_TIMEOUT: Lazy<Option<MessageBoxTimeoutFn>> = Lazy::new(|| {
    // SAFETY: user32 is already loaded for MessageBoxW; the signature matches the export.
    unsafe {
        let user32 = GetModuleHandleW(w!("user32.dll")).ok()?;
        let export = GetProcAddress(user32, s!("MessageBoxTimeoutW"))?;
        Some(mem::transmute::<unsafe extern "system" fn() -> isize, MessageBoxTimeoutFn>(export))
    }
});

const MB_TIMEDOUT: i32 = 32000;

#[derive(Debug, Default)]
pub struct MessageBoxNotifier;

impl MessageBoxNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for MessageBoxNotifier {
    fn alert(&mut self, level: AlertLevel, message: &str) {
        let (title, icon) = match level {
            AlertLevel::Notice => ("Notice", MB_ICONWARNING),
            AlertLevel::Error => ("Error", MB_ICONWARNING),
            AlertLevel::Fatal => ("Error", MB_ICONERROR),
        };
        let text = to_wide(message);
        let caption = to_wide(title);
        // SAFETY: both strings are NUL-terminated and outlive the modal call.
        unsafe {
            MessageBoxW(
                HWND::default(),
                PCWSTR(text.as_ptr()),
                PCWSTR(caption.as_ptr()),
                MB_OK | icon,
            );
        }
    }

    fn supports_timeout(&self) -> bool {
        MESSAGE_BOX_TIMEOUT.is_some()
    }

    fn confirm(
        &mut self,
        title: &str,
        message: &str,
        timeout: std::time::Duration,
    ) -> Confirmation {
        let Some(message_box_timeout) = *MESSAGE_BOX_TIMEOUT else {
            return Confirmation::Unavailable;
        };
        let text = to_wide(message);
        let caption = to_wide(title);
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);

        // SAFETY: see `alert`.
        let result = unsafe {
            message_box_timeout(
                HWND::default(),
                PCWSTR(text.as_ptr()),
                PCWSTR(caption.as_ptr()),
                MB_YESNO | MB_ICONQUESTION,
                0,
                millis,
            )
        };
        match result {
            r if r == IDYES.0 => Confirmation::Accepted,
            MB_TIMEDOUT => Confirmation::TimedOut,
            _ => Confirmation::Rejected,
        }
    }
}
