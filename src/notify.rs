// src/notify.rs

//! User-facing messages: terminal alerts and the timed safety prompt.

use std::time::Duration;

/// How an alert should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    /// Safe, expected stop (e.g. the user declined the new mode).
    Notice,
    Error,
    /// The display could not be put back; the user has to act.
    Fatal,
}

/// Answer to the timed confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Accepted,
    Rejected,
    TimedOut,
    /// The notifier cannot show a prompt that times out.
    Unavailable,
}

impl Confirmation {
    /// Only an explicit yes keeps the new mode.
    pub fn is_accepted(self) -> bool {
        self == Confirmation::Accepted
    }
}

pub trait Notifier {
    /// Blocking message to the user.
    fn alert(&mut self, level: AlertLevel, message: &str);

    /// Whether `confirm` can enforce its timeout.
    ///
    /// An unreadable display must never wait on an answer forever, so when
    /// this is false the session does not prompt and takes the default
    /// decision: reject.
    fn supports_timeout(&self) -> bool;

    /// Yes/no question that answers itself with `TimedOut` after `timeout`.
    fn confirm(&mut self, title: &str, message: &str, timeout: Duration) -> Confirmation;
}
