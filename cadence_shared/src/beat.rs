//! Musical-time helpers layered on top of the event-list clock.
//!
//! These are client-side conveniences; the engine core never calls them.

/// Distance in beats from `now` to the next multiple of `b`.
///
/// When `now` sits exactly on a multiple the *next* one is returned, so
/// scheduling `now + next_beat(now, b)` from inside an event always lands
/// strictly in the future and a self-rescheduling event fires once per
/// period instead of piling up.
pub fn next_beat(now: f64, b: f64) -> f64 {
    let d = (now / b).ceil() * b - now;
    if d > 0.0 {
        d
    } else {
        b
    }
}

/// Duration in seconds of `n` beats at `tempo` BPM.
pub fn beats(n: f64, tempo: f64) -> f64 {
    n * 60.0 / tempo
}

/// `t` folded into a cycle of `m` beats, rounded to the nearest beat.
pub fn beat_mod(t: f64, m: f64) -> f64 {
    (t % m).round()
}
