// src/platform/unix.rs

//! Unix pieces that do not depend on a display server: the `flock`-based
//! instance lock, the terminal confirmation prompt, process liveness checks
//! and the termination signal flag.
//!
//! SIGINT, SIGTERM and SIGHUP only raise a flag. The blocking loops here
//! (the prompt and the pid poll) check it and return early, so the session
//! unwinds through its normal teardown and puts the display back.

use anyhow::Context;
use log::{debug, info, trace, warn};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use termios::{tcflag_t, tcsetattr, Termios, ECHO, ICANON, ISIG, TCSANOW, VMIN, VTIME};

use crate::error::StretchError;
use crate::lock::{HeldLock, InstanceLock, InstanceLocker};
use crate::notify::{AlertLevel, Confirmation, Notifier};

const STDIN_FILENO: libc::c_int = libc::STDIN_FILENO;

/// Longest wait a prompt will honour, whatever it was asked for.
const MAX_PROMPT_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

// --- Termination signals ---

static TERMINATION: AtomicBool = AtomicBool::new(false);

/// Signals that end a session early instead of killing the process outright.
pub const TERMINATION_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

extern "C" fn note_termination(_signal: libc::c_int) {
    TERMINATION.store(true, Ordering::SeqCst);
}

/// Routes `signals` to the termination flag.
pub fn install_termination_handlers(signals: &[Signal]) -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(note_termination),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for &signal in signals {
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
        unsafe { sigaction(signal, &action) }?;
        debug!("Handling {} as a termination request", signal);
    }
    Ok(())
}

/// The flag set by the handlers above.
pub fn termination_flag() -> &'static AtomicBool {
    &TERMINATION
}

pub fn termination_requested() -> bool {
    TERMINATION.load(Ordering::SeqCst)
}

// --- Instance lock ---

/// Advisory `flock` on `<dir>/<name>.lock`.
///
/// The lock belongs to the open file description, so a crashed holder never
/// leaves a stale lock behind.
#[derive(Debug, Clone)]
pub struct FlockLocker {
    dir: PathBuf,
}

impl FlockLocker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn lock_path(&self, name: &str) -> PathBuf {
        let file_name: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.lock", file_name))
    }
}

struct HeldFlock {
    path: PathBuf,
    _flock: Flock<File>,
}

impl fmt::Debug for HeldFlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeldFlock").field("path", &self.path).finish()
    }
}

impl HeldLock for HeldFlock {}

impl InstanceLocker for FlockLocker {
    fn acquire(&mut self, name: &str) -> Result<InstanceLock, StretchError> {
        let path = self.lock_path(name);
        let file = open_lock_file(&path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => {
                debug!("Locked {}", path.display());
                Ok(InstanceLock::new(
                    name,
                    Box::new(HeldFlock {
                        path,
                        _flock: flock,
                    }),
                ))
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(StretchError::AlreadyRunning),
            Err((_, errno)) => Err(StretchError::Platform(anyhow::anyhow!(
                "flock({}) failed: {}",
                path.display(),
                errno
            ))),
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File, StretchError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open lock file {}", path.display()))
        .map_err(StretchError::Platform)
}

// --- Terminal notifier ---

/// Prints alerts to stderr and asks for confirmation on the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalNotifier;

impl TerminalNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for TerminalNotifier {
    fn alert(&mut self, level: AlertLevel, message: &str) {
        let prefix = match level {
            AlertLevel::Notice => "Notice",
            AlertLevel::Error => "Error",
            AlertLevel::Fatal => "FATAL",
        };
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "{}: {}", prefix, message);
    }

    /// Only a real terminal on stdin can answer within a deadline.
    fn supports_timeout(&self) -> bool {
        Termios::from_fd(STDIN_FILENO).is_ok()
    }

    fn confirm(&mut self, title: &str, message: &str, timeout: Duration) -> Confirmation {
        let Ok(original) = Termios::from_fd(STDIN_FILENO) else {
            return Confirmation::Unavailable;
        };
        let _restore = RawInput::enable(original);

        {
            let mut stderr = io::stderr().lock();
            let _ = write!(stderr, "{}: {} [y/N] ", title, message);
            let _ = stderr.flush();
        }

        let answer = match read_key(timeout, termination_flag()) {
            Ok(key) => answer_for(key),
            Err(e) => {
                warn!("Reading confirmation failed: {}", e);
                Confirmation::Rejected
            }
        };
        let _ = writeln!(io::stderr());
        answer
    }
}

/// Only `y` keeps the new mode. Ctrl-C arrives as 0x03 and counts as "no".
fn answer_for(key: Option<u8>) -> Confirmation {
    match key {
        Some(b'y' | b'Y') => Confirmation::Accepted,
        Some(_) => Confirmation::Rejected,
        None => Confirmation::TimedOut,
    }
}

/// Local modes for the prompt: single keys, no echo, and no signals from
/// the line discipline.
fn raw_local_modes(lflag: tcflag_t) -> tcflag_t {
    lflag & !(ICANON | ECHO | ISIG)
}

/// Non-canonical, no-echo stdin for the duration of a prompt.
struct RawInput {
    original: Termios,
}

impl RawInput {
    fn enable(original: Termios) -> Self {
        let mut raw = original;
        raw.c_lflag = raw_local_modes(raw.c_lflag);
        raw.c_cc[VMIN] = 1;
        raw.c_cc[VTIME] = 0;
        if let Err(e) = tcsetattr(STDIN_FILENO, TCSANOW, &raw) {
            warn!("Failed to switch terminal to single-key input: {}", e);
        }
        Self { original }
    }
}

impl Drop for RawInput {
    fn drop(&mut self) {
        if let Err(e) = tcsetattr(STDIN_FILENO, TCSANOW, &self.original) {
            warn!("Failed to restore terminal attributes: {}", e);
        }
    }
}

/// The instant `timeout` from now, capped at `MAX_PROMPT_WAIT`.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(MAX_PROMPT_WAIT)).unwrap_or(now)
}

/// Waits up to `timeout` for one byte on stdin. `None` on timeout.
/// Fails with `Interrupted` once `stop` is raised.
fn read_key(timeout: Duration, stop: &AtomicBool) -> io::Result<Option<u8>> {
    let stdin = io::stdin();
    let deadline = deadline_after(timeout);

    loop {
        if stop.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "termination requested"));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        // Poll in slices that always fit PollTimeout's u16 constructor.
        let slice = remaining.min(Duration::from_millis(1000)).as_millis() as u16;
        let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(slice)) {
            Ok(0) => continue,
            Ok(_) => {
                let mut byte = 0u8;
                // SAFETY: reading one byte into a valid stack buffer.
                let n = unsafe {
                    libc::read(STDIN_FILENO, &mut byte as *mut u8 as *mut libc::c_void, 1)
                };
                return match n {
                    1 => Ok(Some(byte)),
                    0 => Ok(Some(b'\n')), // EOF answers "no"
                    _ => Err(io::Error::last_os_error()),
                };
            }
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(io::Error::from(errno)),
        }
    }
}

// --- Processes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessProbe {
    Alive,
    Gone,
    /// Exists, but we may not signal it.
    Denied,
}

/// Signal-0 liveness check. Pid 0 names a process group, not a process.
pub fn probe_process(pid: u32) -> ProcessProbe {
    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return ProcessProbe::Gone,
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => ProcessProbe::Alive,
        Err(Errno::EPERM) => ProcessProbe::Denied,
        Err(_) => ProcessProbe::Gone,
    }
}

/// Blocks until `pid` no longer exists, checking every `interval`.
/// Gives up with `Interrupted` once `stop` is raised.
pub fn wait_for_pid_exit(pid: u32, interval: Duration, stop: &AtomicBool) -> Result<(), StretchError> {
    let mut checks: u64 = 0;
    while probe_process(pid) != ProcessProbe::Gone {
        if stop.load(Ordering::SeqCst) {
            info!("Stopped watching process {}: termination requested", pid);
            return Err(StretchError::Interrupted);
        }
        checks += 1;
        trace!("Process {} still running (check {})", pid, checks);
        thread::sleep(interval);
    }
    debug!("Process {} gone after {} check(s)", pid, checks);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use test_log::test;

    #[test]
    fn it_should_allow_only_one_holder_per_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut locker = FlockLocker::new(dir.path());

        let first = locker.acquire("Stretch").unwrap();
        assert_eq!(first.name(), "Stretch");
        assert!(matches!(
            locker.acquire("Stretch"),
            Err(StretchError::AlreadyRunning)
        ));
        // Different names do not interfere.
        let _other = locker.acquire("Other").unwrap();

        drop(first);
        assert!(locker.acquire("Stretch").is_ok());
    }

    #[test]
    fn it_should_keep_lock_names_inside_the_lock_dir() {
        let locker = FlockLocker::new("/tmp/locks");
        let path = locker.lock_path(r"Global\..\Evil/Name");
        assert_eq!(path.parent(), Some(Path::new("/tmp/locks")));
        assert_eq!(path.file_name().unwrap(), "Global____Evil_Name.lock");
    }

    #[test]
    fn it_should_report_an_unusable_lock_dir() {
        let mut locker = FlockLocker::new("/definitely/not/a/dir");
        assert!(matches!(
            locker.acquire("Stretch"),
            Err(StretchError::Platform(_))
        ));
    }

    #[test]
    fn it_should_see_its_own_process_alive() {
        assert_eq!(probe_process(std::process::id()), ProcessProbe::Alive);
    }

    #[test]
    fn it_should_see_a_reaped_child_as_gone() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert_eq!(probe_process(pid), ProcessProbe::Gone);
    }

    #[test]
    fn it_should_wait_until_a_process_exits() {
        let mut child = Command::new("sleep").arg("0.2").spawn().unwrap();
        let pid = child.id();
        // Reap from another thread; an unreaped zombie still answers signal 0.
        let reaper = thread::spawn(move || child.wait());

        let started = Instant::now();
        wait_for_pid_exit(pid, Duration::from_millis(10), &AtomicBool::new(false)).unwrap();

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(reaper.join().unwrap().is_ok());
    }

    #[test]
    fn it_should_treat_out_of_range_pids_as_gone() {
        assert_eq!(probe_process(u32::MAX), ProcessProbe::Gone);
    }

    #[test]
    fn it_should_never_probe_pid_zero() {
        // kill(0, 0) would address our own process group and always succeed.
        assert_eq!(probe_process(0), ProcessProbe::Gone);
    }

    #[test]
    fn it_should_stop_waiting_once_termination_is_requested() {
        let stop = AtomicBool::new(true);
        let result = wait_for_pid_exit(std::process::id(), Duration::from_millis(10), &stop);
        assert!(matches!(result, Err(StretchError::Interrupted)));
    }

    #[test]
    fn it_should_give_up_on_a_prompt_once_termination_is_requested() {
        let stop = AtomicBool::new(true);
        let err = read_key(Duration::from_secs(10), &stop).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[test]
    fn it_should_treat_ctrl_c_as_no() {
        assert_eq!(answer_for(Some(0x03)), Confirmation::Rejected);
        assert_eq!(answer_for(Some(b'y')), Confirmation::Accepted);
        assert_eq!(answer_for(Some(b'Y')), Confirmation::Accepted);
        assert_eq!(answer_for(Some(b'n')), Confirmation::Rejected);
        assert_eq!(answer_for(None), Confirmation::TimedOut);
    }

    #[test]
    fn it_should_keep_ctrl_c_away_from_the_line_discipline() {
        let lflag = raw_local_modes(ICANON | ECHO | ISIG);
        assert_eq!(lflag & (ICANON | ECHO | ISIG), 0);
    }

    #[test]
    fn it_should_cap_huge_prompt_timeouts() {
        let before = Instant::now();
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline >= before);
        assert!(deadline <= Instant::now() + MAX_PROMPT_WAIT);
    }

    #[test]
    fn it_should_route_termination_signals_to_the_flag() {
        // SIGUSR2 stands in so the test binary keeps its own SIGINT/SIGTERM.
        install_termination_handlers(&[Signal::SIGUSR2]).unwrap();
        nix::sys::signal::raise(Signal::SIGUSR2).unwrap();
        assert!(termination_requested());
        assert!(termination_flag().load(Ordering::SeqCst));
    }
}
