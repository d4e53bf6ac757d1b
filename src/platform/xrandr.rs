// src/platform/xrandr.rs
#![allow(non_snake_case)] // Xlib/XRandR struct fields

//! X11 backend: XRandR outputs as displays, EWMH client windows as targets.
//!
//! A "display" is a connected output driven by a CRTC (`HDMI-1`, `DP-2`),
//! indexed in the order XRandR lists outputs. Modes are the ones the output
//! advertises; the refresh rate is derived from the pixel clock.
//!
//! The target window is located by `WM_CLASS` among the window manager's
//! `_NET_CLIENT_LIST`; its process comes from `_NET_WM_PID`. Borderless means
//! `_MOTIF_WM_HINTS` with no decorations; maximized means the two
//! `_NET_WM_STATE_MAXIMIZED_*` states.

use anyhow::{anyhow, Result};
use libc::{c_int, c_long, c_uchar, c_ulong};
use log::{debug, info, trace, warn};
use std::ffi::{CStr, CString};
use std::ptr;
use std::rc::Rc;
use std::slice;
use std::time::Duration;
use x11::{xlib, xrandr};

use super::unix::{
    probe_process, termination_flag, termination_requested, wait_for_pid_exit, ProcessProbe,
};
use crate::display::{
    ApplyKind, DisplayDriver, DisplayIdentity, DisplayMode, ModeCatalog, ModeIter,
};
use crate::error::StretchError;
use crate::watcher::{ProcessHandle, WindowHandle, WindowHost, WindowStyle};

/// How often a watched pid is checked for exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `_MOTIF_WM_HINTS` layout: flags, functions, decorations, input_mode, status.
const MOTIF_HINTS_LEN: usize = 5;
const MOTIF_HINTS_DECORATIONS: c_ulong = 1 << 1;
/// Saved style meaning "the window had no `_MOTIF_WM_HINTS`".
const NO_MOTIF_HINTS: u64 = u64::MAX;

const NET_WM_STATE_REMOVE: c_long = 0;
const NET_WM_STATE_ADD: c_long = 1;

unsafe extern "C" fn log_x_error(_display: *mut xlib::Display, event: *mut xlib::XErrorEvent) -> c_int {
    // SAFETY: Xlib passes a valid event for the duration of the callback.
    if let Some(event) = unsafe { event.as_ref() } {
        debug!(
            "X error: code {} on request {}.{} for resource {:#x}",
            event.error_code, event.request_code, event.minor_code, event.resourceid
        );
    }
    0
}

/// Owned Xlib connection. Closed on drop.
#[derive(Debug)]
pub struct Connection {
    display: *mut xlib::Display,
    root: xlib::Window,
}

impl Connection {
    /// Opens the display named by `DISPLAY`.
    pub fn open() -> Result<Self> {
        // SAFETY: NULL selects the DISPLAY environment variable.
        let display = unsafe { xlib::XOpenDisplay(ptr::null()) };
        if display.is_null() {
            return Err(anyhow!(
                "Failed to open X display. Check DISPLAY environment variable or X server status."
            ));
        }
        // Windows may vanish between lookup and query; log instead of exiting.
        // SAFETY: installs a process-wide handler that never unwinds.
        unsafe { xlib::XSetErrorHandler(Some(log_x_error)) };
        let root = unsafe { xlib::XDefaultRootWindow(display) };
        debug!("X display opened: {:p}, root {:#x}", display, root);
        Ok(Self { display, root })
    }

    fn raw(&self) -> *mut xlib::Display {
        self.display
    }

    fn atom(&self, name: &str) -> xlib::Atom {
        let Ok(name) = CString::new(name) else {
            return 0;
        };
        // SAFETY: `name` is NUL-terminated and outlives the call.
        unsafe { xlib::XInternAtom(self.display, name.as_ptr(), xlib::False) }
    }

    /// Reads a format-32 property. `None` if absent or of another type.
    fn read_longs(
        &self,
        window: xlib::Window,
        property: xlib::Atom,
        expected_type: xlib::Atom,
    ) -> Option<Vec<c_ulong>> {
        let mut actual_type: xlib::Atom = 0;
        let mut actual_format: c_int = 0;
        let mut nitems: c_ulong = 0;
        let mut bytes_after: c_ulong = 0;
        let mut data: *mut c_uchar = ptr::null_mut();

        // SAFETY: out pointers are valid locals; `data` is freed below.
        let status = unsafe {
            xlib::XGetWindowProperty(
                self.display,
                window,
                property,
                0,
                c_long::MAX,
                xlib::False,
                expected_type,
                &mut actual_type,
                &mut actual_format,
                &mut nitems,
                &mut bytes_after,
                &mut data,
            )
        };
        if status != xlib::Success as c_int || data.is_null() {
            return None;
        }
        let values = (actual_type == expected_type && actual_format == 32).then(|| {
            // SAFETY: format 32 properties are returned as arrays of C longs.
            unsafe { slice::from_raw_parts(data as *const c_ulong, nitems as usize) }.to_vec()
        });
        unsafe { xlib::XFree(data.cast()) };
        values
    }

    fn write_longs(
        &self,
        window: xlib::Window,
        property: xlib::Atom,
        ty: xlib::Atom,
        values: &[c_ulong],
    ) {
        // SAFETY: `values` stays alive for the call; Xlib copies it.
        unsafe {
            xlib::XChangeProperty(
                self.display,
                window,
                property,
                ty,
                32,
                xlib::PropModeReplace,
                values.as_ptr().cast(),
                values.len() as c_int,
            );
        }
    }

    fn flush(&self) {
        // SAFETY: valid display for the lifetime of `self`.
        unsafe { xlib::XSync(self.display, xlib::False) };
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        info!("Closing X11 display connection: {:p}", self.display);
        // SAFETY: opened in `open`, closed exactly once.
        let status = unsafe { xlib::XCloseDisplay(self.display) };
        if status != 0 {
            warn!("XCloseDisplay returned non-zero status: {}", status);
        }
    }
}

// --- XRandR resource wrappers ---

struct ScreenResources<'c> {
    conn: &'c Connection,
    ptr: *mut xrandr::XRRScreenResources,
}

impl<'c> ScreenResources<'c> {
    fn fetch(conn: &'c Connection) -> Option<Self> {
        // SAFETY: freed in Drop.
        let ptr = unsafe { xrandr::XRRGetScreenResourcesCurrent(conn.raw(), conn.root) };
        (!ptr.is_null()).then(|| Self { conn, ptr })
    }

    fn res(&self) -> &xrandr::XRRScreenResources {
        // SAFETY: non-null by construction and alive until Drop.
        unsafe { &*self.ptr }
    }

    fn outputs(&self) -> &[xrandr::RROutput] {
        let res = self.res();
        if res.outputs.is_null() {
            return &[];
        }
        unsafe { slice::from_raw_parts(res.outputs, res.noutput as usize) }
    }

    fn modes(&self) -> &[xrandr::XRRModeInfo] {
        let res = self.res();
        if res.modes.is_null() {
            return &[];
        }
        unsafe { slice::from_raw_parts(res.modes, res.nmode as usize) }
    }

    fn output(&self, output: xrandr::RROutput) -> Option<OutputInfo<'_>> {
        let ptr = unsafe { xrandr::XRRGetOutputInfo(self.conn.raw(), self.ptr, output) };
        (!ptr.is_null()).then(|| OutputInfo { _res: self, ptr })
    }

    fn crtc(&self, crtc: xrandr::RRCrtc) -> Option<CrtcInfo<'_>> {
        let ptr = unsafe { xrandr::XRRGetCrtcInfo(self.conn.raw(), self.ptr, crtc) };
        (!ptr.is_null()).then(|| CrtcInfo { _res: self, ptr })
    }

    fn mode_info(&self, id: xrandr::RRMode) -> Option<&xrandr::XRRModeInfo> {
        self.modes().iter().find(|m| m.id == id)
    }

    /// Connected outputs that currently drive a CRTC, in XRandR order.
    fn active_outputs(&self) -> Vec<(xrandr::RROutput, String)> {
        self.outputs()
            .iter()
            .filter_map(|&id| {
                let info = self.output(id)?;
                info.is_active().then(|| (id, info.name()))
            })
            .collect()
    }

    fn find_output(&self, display: &DisplayIdentity) -> Option<(xrandr::RROutput, OutputInfo<'_>)> {
        self.outputs().iter().find_map(|&id| {
            let info = self.output(id)?;
            (info.name() == display.as_str()).then_some((id, info))
        })
    }
}

impl Drop for ScreenResources<'_> {
    fn drop(&mut self) {
        unsafe { xrandr::XRRFreeScreenResources(self.ptr) };
    }
}

struct OutputInfo<'r> {
    _res: &'r ScreenResources<'r>,
    ptr: *mut xrandr::XRROutputInfo,
}

impl OutputInfo<'_> {
    fn info(&self) -> &xrandr::XRROutputInfo {
        unsafe { &*self.ptr }
    }

    fn name(&self) -> String {
        let info = self.info();
        if info.name.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(info.name) }.to_string_lossy().into_owned()
    }

    fn is_active(&self) -> bool {
        let info = self.info();
        info.connection == xrandr::RR_Connected as u16 && info.crtc != 0
    }

    fn mode_ids(&self) -> &[xrandr::RRMode] {
        let info = self.info();
        if info.modes.is_null() {
            return &[];
        }
        unsafe { slice::from_raw_parts(info.modes, info.nmode as usize) }
    }
}

impl Drop for OutputInfo<'_> {
    fn drop(&mut self) {
        unsafe { xrandr::XRRFreeOutputInfo(self.ptr) };
    }
}

struct CrtcInfo<'r> {
    _res: &'r ScreenResources<'r>,
    ptr: *mut xrandr::XRRCrtcInfo,
}

impl CrtcInfo<'_> {
    fn info(&self) -> &xrandr::XRRCrtcInfo {
        unsafe { &*self.ptr }
    }
}

impl Drop for CrtcInfo<'_> {
    fn drop(&mut self) {
        unsafe { xrandr::XRRFreeCrtcInfo(self.ptr) };
    }
}

/// Refresh rate in whole Hz from the mode timings.
fn refresh_hz(mode: &xrandr::XRRModeInfo) -> u32 {
    let mut v_total = mode.vTotal as f64;
    if mode.modeFlags & xrandr::RR_DoubleScan as c_ulong != 0 {
        v_total *= 2.0;
    }
    if mode.modeFlags & xrandr::RR_Interlace as c_ulong != 0 {
        v_total /= 2.0;
    }
    let pixels = mode.hTotal as f64 * v_total;
    if pixels == 0.0 {
        return 0;
    }
    (mode.dotClock as f64 / pixels).round() as u32
}

fn display_mode(mode: &xrandr::XRRModeInfo) -> DisplayMode {
    DisplayMode::new(mode.width, mode.height, refresh_hz(mode))
}

// --- Display driver ---

pub struct XrandrDisplay {
    conn: Rc<Connection>,
}

impl XrandrDisplay {
    /// Fails if the server does not speak XRandR 1.3 or later.
    pub fn new(conn: Rc<Connection>) -> Result<Self, StretchError> {
        let (mut major, mut minor) = (0, 0);
        // SAFETY: out pointers are valid locals.
        let ok = unsafe { xrandr::XRRQueryVersion(conn.raw(), &mut major, &mut minor) };
        if ok == 0 || (major, minor) < (1, 3) {
            return Err(StretchError::Platform(anyhow!(
                "XRandR 1.3 or later is required (server reports {}.{})",
                major,
                minor
            )));
        }
        debug!("XRandR {}.{}", major, minor);
        Ok(Self { conn })
    }

    fn resources(&self) -> Option<ScreenResources<'_>> {
        ScreenResources::fetch(&self.conn)
    }
}

impl ModeCatalog for XrandrDisplay {
    fn list_modes<'a>(&'a self, display: &'a DisplayIdentity) -> Result<ModeIter<'a>, StretchError> {
        let enumeration = |reason: &str| StretchError::Enumeration {
            display: display.clone(),
            reason: reason.to_string(),
        };
        let res = self
            .resources()
            .ok_or_else(|| enumeration("XRRGetScreenResourcesCurrent failed"))?;
        let (_, output) = res
            .find_output(display)
            .ok_or_else(|| enumeration("no such output"))?;

        let modes: Vec<DisplayMode> = output
            .mode_ids()
            .iter()
            .filter_map(|&id| res.mode_info(id))
            .map(display_mode)
            .collect();
        trace!("{} advertises {} mode(s)", display, modes.len());
        Ok(Box::new(modes.into_iter()))
    }
}

impl DisplayDriver for XrandrDisplay {
    fn resolve_display(&self, index: u32) -> Option<DisplayIdentity> {
        let res = self.resources()?;
        let outputs = res.active_outputs();
        debug!("Active outputs: {:?}", outputs.iter().map(|(_, n)| n).collect::<Vec<_>>());
        outputs
            .into_iter()
            .nth(index as usize)
            .map(|(_, name)| DisplayIdentity::new(name))
    }

    fn current_mode(&self, display: &DisplayIdentity) -> Result<DisplayMode, StretchError> {
        let query = |reason: &str| StretchError::Query {
            display: display.clone(),
            reason: reason.to_string(),
        };
        let res = self
            .resources()
            .ok_or_else(|| query("XRRGetScreenResourcesCurrent failed"))?;
        let (_, output) = res.find_output(display).ok_or_else(|| query("no such output"))?;
        let crtc = res
            .crtc(output.info().crtc)
            .ok_or_else(|| query("output is not driven by a CRTC"))?;
        let mode = res
            .mode_info(crtc.info().mode)
            .ok_or_else(|| query("CRTC mode is not in the resource list"))?;
        Ok(display_mode(mode))
    }

    fn apply_mode(
        &mut self,
        display: &DisplayIdentity,
        mode: &DisplayMode,
        kind: ApplyKind,
    ) -> Result<(), String> {
        let res = self
            .resources()
            .ok_or("XRRGetScreenResourcesCurrent failed")?;
        let (output_id, output) = res.find_output(display).ok_or("no such output")?;
        let mode_id = output
            .mode_ids()
            .iter()
            .copied()
            .find(|&id| res.mode_info(id).map(display_mode).as_ref() == Some(mode))
            .ok_or_else(|| format!("{} does not advertise {}", display, mode))?;
        let crtc_id = output.info().crtc;
        let crtc = res.crtc(crtc_id).ok_or("output is not driven by a CRTC")?;
        let current = crtc.info();

        let mut outputs = [output_id];
        debug!("XRRSetCrtcConfig({}, {}, {:?})", display, mode, kind);
        // SAFETY: all ids come from the same resource snapshot.
        let status = unsafe {
            xrandr::XRRSetCrtcConfig(
                self.conn.raw(),
                res.ptr,
                crtc_id,
                xlib::CurrentTime,
                current.x,
                current.y,
                mode_id,
                current.rotation,
                outputs.as_mut_ptr(),
                outputs.len() as c_int,
            )
        };
        self.conn.flush();
        if status == xlib::Success as c_int {
            Ok(())
        } else {
            Err(format!("XRRSetCrtcConfig returned status {}", status))
        }
    }
}

// --- Windows ---

struct Atoms {
    net_client_list: xlib::Atom,
    net_wm_pid: xlib::Atom,
    net_wm_state: xlib::Atom,
    maximized_vert: xlib::Atom,
    maximized_horz: xlib::Atom,
    motif_wm_hints: xlib::Atom,
}

/// First `_NET_WM_PID` value, if it names a real process.
fn pid_from_property(values: &[c_ulong]) -> Option<u32> {
    values
        .first()
        .and_then(|&pid| u32::try_from(pid).ok())
        .filter(|&pid| pid != 0)
}

pub struct X11Windows {
    conn: Rc<Connection>,
    atoms: Atoms,
}

impl X11Windows {
    pub fn new(conn: Rc<Connection>) -> Self {
        let atoms = Atoms {
            net_client_list: conn.atom("_NET_CLIENT_LIST"),
            net_wm_pid: conn.atom("_NET_WM_PID"),
            net_wm_state: conn.atom("_NET_WM_STATE"),
            maximized_vert: conn.atom("_NET_WM_STATE_MAXIMIZED_VERT"),
            maximized_horz: conn.atom("_NET_WM_STATE_MAXIMIZED_HORZ"),
            motif_wm_hints: conn.atom("_MOTIF_WM_HINTS"),
        };
        Self { conn, atoms }
    }

    /// Managed client windows, or the root's children without an EWMH manager.
    fn candidates(&self) -> Vec<xlib::Window> {
        if let Some(list) =
            self.conn
                .read_longs(self.conn.root, self.atoms.net_client_list, xlib::XA_WINDOW)
        {
            return list;
        }
        let (mut root, mut parent) = (0, 0);
        let mut children: *mut xlib::Window = ptr::null_mut();
        let mut count: u32 = 0;
        // SAFETY: out pointers are valid; `children` is freed below.
        let ok = unsafe {
            xlib::XQueryTree(
                self.conn.raw(),
                self.conn.root,
                &mut root,
                &mut parent,
                &mut children,
                &mut count,
            )
        };
        if ok == 0 || children.is_null() {
            return Vec::new();
        }
        let windows = unsafe { slice::from_raw_parts(children, count as usize) }.to_vec();
        unsafe { xlib::XFree(children.cast()) };
        windows
    }

    fn class_matches(&self, window: xlib::Window, window_class: &str) -> bool {
        let mut hint = xlib::XClassHint {
            res_name: ptr::null_mut(),
            res_class: ptr::null_mut(),
        };
        // SAFETY: both strings are Xlib-allocated and freed below.
        if unsafe { xlib::XGetClassHint(self.conn.raw(), window, &mut hint) } == 0 {
            return false;
        }
        let mut matched = false;
        for part in [hint.res_name, hint.res_class] {
            if part.is_null() {
                continue;
            }
            matched |= unsafe { CStr::from_ptr(part) }.to_bytes() == window_class.as_bytes();
            unsafe { xlib::XFree(part.cast()) };
        }
        matched
    }

    fn send_wm_state(&self, window: xlib::Window, action: c_long) {
        let mut data = xlib::ClientMessageData::new();
        data.set_long(0, action);
        data.set_long(1, self.atoms.maximized_vert as c_long);
        data.set_long(2, self.atoms.maximized_horz as c_long);
        data.set_long(3, 1); // normal application source

        let mut event = xlib::XEvent {
            client_message: xlib::XClientMessageEvent {
                type_: xlib::ClientMessage,
                serial: 0,
                send_event: xlib::True,
                display: self.conn.raw(),
                window,
                message_type: self.atoms.net_wm_state,
                format: 32,
                data,
            },
        };
        // SAFETY: `event` is a fully initialized client message.
        unsafe {
            xlib::XSendEvent(
                self.conn.raw(),
                self.conn.root,
                xlib::False,
                xlib::SubstructureRedirectMask | xlib::SubstructureNotifyMask,
                &mut event,
            );
        }
    }
}

impl WindowHost for X11Windows {
    fn find_window(&mut self, window_class: &str) -> Option<WindowHandle> {
        self.candidates()
            .into_iter()
            .find(|&w| self.class_matches(w, window_class))
            .map(|w| WindowHandle(w as u64))
    }

    fn open_process(&mut self, window: WindowHandle) -> Result<ProcessHandle, StretchError> {
        let pid = self
            .conn
            .read_longs(window.0 as xlib::Window, self.atoms.net_wm_pid, xlib::XA_CARDINAL)
            .and_then(|values| pid_from_property(&values))
            .ok_or_else(|| StretchError::Access {
                pid: 0,
                reason: format!("window {:#x} does not publish a usable _NET_WM_PID", window.0),
            })?;

        match probe_process(pid) {
            ProcessProbe::Alive => Ok(ProcessHandle { pid, raw: 0 }),
            ProcessProbe::Denied => Err(StretchError::Access {
                pid,
                reason: "not permitted to watch this process".to_string(),
            }),
            ProcessProbe::Gone => Err(StretchError::Access {
                pid,
                reason: "process exited before it could be watched".to_string(),
            }),
        }
    }

    fn make_borderless_maximized(
        &mut self,
        window: WindowHandle,
    ) -> Result<WindowStyle, StretchError> {
        let w = window.0 as xlib::Window;
        let hints = self.atoms.motif_wm_hints;
        if hints == 0 {
            return Err(StretchError::WindowStyle {
                reason: "could not intern _MOTIF_WM_HINTS".to_string(),
            });
        }

        let previous = self
            .conn
            .read_longs(w, hints, hints)
            .filter(|v| v.len() >= MOTIF_HINTS_LEN);
        let saved = match &previous {
            Some(values) => values[2] as u64,
            None => NO_MOTIF_HINTS,
        };

        let mut next = previous.unwrap_or_else(|| vec![0; MOTIF_HINTS_LEN]);
        next[0] |= MOTIF_HINTS_DECORATIONS;
        next[2] = 0;
        self.conn.write_longs(w, hints, hints, &next[..MOTIF_HINTS_LEN]);
        self.send_wm_state(w, NET_WM_STATE_ADD);
        self.conn.flush();

        info!("Window {:#x} made borderless and maximized", window.0);
        Ok(WindowStyle(saved))
    }

    fn restore_style(&mut self, window: WindowHandle, style: WindowStyle) -> Result<(), StretchError> {
        let w = window.0 as xlib::Window;
        let hints = self.atoms.motif_wm_hints;
        if style.0 == NO_MOTIF_HINTS {
            // SAFETY: deleting a missing property is a no-op.
            unsafe { xlib::XDeleteProperty(self.conn.raw(), w, hints) };
        } else {
            let mut values = self
                .conn
                .read_longs(w, hints, hints)
                .filter(|v| v.len() >= MOTIF_HINTS_LEN)
                .unwrap_or_else(|| vec![MOTIF_HINTS_DECORATIONS, 0, 0, 0, 0]);
            values[2] = style.0 as c_ulong;
            self.conn.write_longs(w, hints, hints, &values[..MOTIF_HINTS_LEN]);
        }
        self.send_wm_state(w, NET_WM_STATE_REMOVE);
        self.conn.flush();
        Ok(())
    }

    fn wait_for_exit(&mut self, process: &ProcessHandle) -> Result<(), StretchError> {
        if probe_process(process.pid) == ProcessProbe::Denied {
            return Err(StretchError::Watch {
                reason: format!("lost permission to watch process {}", process.pid),
            });
        }
        wait_for_pid_exit(process.pid, EXIT_POLL_INTERVAL, termination_flag())
    }

    fn close_process(&mut self, process: ProcessHandle) {
        // Nothing to release; pids are not handles.
        trace!("Released process {}", process.pid);
    }

    fn interrupted(&self) -> bool {
        termination_requested()
    }
}
