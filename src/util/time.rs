/// Compact human-readable duration, e.g. `"42s"`, `"3m 07s"`, `"1h 02m 03s"`,
/// `"2d 05h 00m"`. Seconds are rounded half to even.
pub fn format_time(seconds: f64) -> String {
    let s = seconds.max(0.0).round_ties_even() as u64;
    if s < 60 {
        format!("{s}s")
    } else if s < 60 * 60 {
        format!("{}m {:02}s", s / 60, s % 60)
    } else if s < 24 * 60 * 60 {
        format!("{}h {:02}m {:02}s", s / 3600, (s / 60) % 60, s % 60)
    } else {
        format!("{}d {:02}h {:02}m", s / 86400, (s / 3600) % 24, (s / 60) % 60)
    }
}
