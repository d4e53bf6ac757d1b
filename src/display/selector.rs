// src/display/selector.rs

//! Picks the best display mode for an aspect ratio.

use super::mode::{AspectRatio, DisplayMode};
use std::cmp::Ordering;

/// Returns the best mode whose dimensions match `target` exactly.
///
/// Candidates are ranked by refresh rate, then by pixel count. On a full tie
/// the mode seen first wins, so the result is deterministic for a given
/// enumeration order. `None` means nothing in `modes` has the requested ratio.
pub fn select_best<I>(modes: I, target: AspectRatio) -> Option<DisplayMode>
where
    I: IntoIterator<Item = DisplayMode>,
{
    let mut best: Option<DisplayMode> = None;

    for candidate in modes.into_iter().filter(|mode| target.matches(mode)) {
        let replace = match &best {
            None => true,
            Some(current) => rank(&candidate, current) == Ordering::Greater,
        };
        if replace {
            log::trace!("select_best: new best candidate {}", candidate);
            best = Some(candidate);
        }
    }

    best
}

fn rank(a: &DisplayMode, b: &DisplayMode) -> Ordering {
    a.refresh_rate_hz
        .cmp(&b.refresh_rate_hz)
        .then_with(|| a.pixel_count().cmp(&b.pixel_count()))
}
