// throttle.rs
//
// `now` is station seconds (cumulative active time), never wall-clock time,
// which does not survive deep sleep.

/// True when at least `interval` seconds passed since `last`.
pub fn seconds_elapsed(now: u32, last: u32, interval: u32) -> bool {
    now.saturating_sub(last) >= interval
}

/// Like [`seconds_elapsed`], and moves `last` to `now` when the interval
/// elapsed. The caller runs its action afterwards; a failing action waits a
/// full interval before the next try.
pub fn seconds_elapsed_and_update(now: u32, last: &mut u32, interval: u32) -> bool {
    if seconds_elapsed(now, *last, interval) {
        *last = now;
        true
    } else {
        false
    }
}

// EOF
