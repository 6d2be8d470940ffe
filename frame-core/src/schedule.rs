//! Active window and sleep duration arithmetic
//!
//! All functions take a UTC unix timestamp and a timezone offset in minutes and
//! work on local seconds-of-day. Hours are local wall-clock hours in `0..=23`.

use crate::config::DeviceConfig;
use log::debug;

/// Floor for every computed sleep, avoids rapid wake loops
pub const MIN_SLEEP_SECS: u64 = 60;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Local seconds since midnight
pub fn local_seconds_of_day(utc: u64, tz_offset_minutes: i16) -> u32 {
    let local = utc as i64 + tz_offset_minutes as i64 * 60;
    local.rem_euclid(SECS_PER_DAY) as u32
}

/// Forward distance from `sod` to `hour:00`, in `[0, 24h)`
fn seconds_until_hour(sod: u32, hour: u8) -> u64 {
    let target = hour as i64 * 3600;
    (target - sod as i64).rem_euclid(SECS_PER_DAY) as u64
}

/// Is `utc` inside the local `[start, end)` window? `start == end` means always.
pub fn is_within_active_window(utc: u64, start: u8, end: u8, tz_offset_minutes: i16) -> bool {
    if start == end {
        return true;
    }

    let sod = local_seconds_of_day(utc, tz_offset_minutes);
    let start = start as u32 * 3600;
    let end = end as u32 * 3600;

    if start < end {
        sod >= start && sod < end
    } else {
        // Window wraps midnight
        sod >= start || sod < end
    }
}

/// Seconds until the next local `start` hour (0 when exactly at it)
pub fn seconds_until_next_window_start(utc: u64, start: u8, tz_offset_minutes: i16) -> u64 {
    seconds_until_hour(local_seconds_of_day(utc, tz_offset_minutes), start)
}

/// Seconds until the local `end` hour, `None` when the window never ends
pub fn seconds_until_window_end(utc: u64, start: u8, end: u8, tz_offset_minutes: i16) -> Option<u64> {
    if start == end {
        return None;
    }
    Some(seconds_until_hour(
        local_seconds_of_day(utc, tz_offset_minutes),
        end,
    ))
}

/// How long to sleep after this wake.
///
/// Without a trusted clock the refresh interval is used. Outside the window the
/// device sleeps until the next start. Inside it sleeps one interval, unless
/// that lands at or past the window end, in which case it skips ahead to the
/// next start. Never below [`MIN_SLEEP_SECS`].
pub fn compute_sleep_duration(config: &DeviceConfig, utc: u64, clock_valid: bool) -> u64 {
    let interval = config.refresh_interval_minutes as u64 * 60;
    let (start, end, tz) = (
        config.active_start_hour,
        config.active_end_hour,
        config.timezone_offset_minutes,
    );

    let secs = if !clock_valid {
        debug!("Clock not synced, sleeping one interval");
        interval
    } else if !is_within_active_window(utc, start, end, tz) {
        seconds_until_next_window_start(utc, start, tz)
    } else {
        match seconds_until_window_end(utc, start, end, tz) {
            Some(until_end) if interval >= until_end => {
                seconds_until_next_window_start(utc, start, tz)
            }
            _ => interval,
        }
    };

    secs.max(MIN_SLEEP_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // 2025-01-01 00:00:00 UTC
    const MIDNIGHT: u64 = 1_735_689_600;

    fn at(hour: u64, minute: u64) -> u64 {
        MIDNIGHT + hour * 3600 + minute * 60
    }

    fn config(interval: u16, start: u8, end: u8, tz: i16) -> DeviceConfig {
        DeviceConfig {
            refresh_interval_minutes: interval,
            active_start_hour: start,
            active_end_hour: end,
            timezone_offset_minutes: tz,
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn test_day_window() {
        assert!(is_within_active_window(at(8, 0), 8, 20, 0));
        assert!(is_within_active_window(at(19, 59), 8, 20, 0));
        assert!(!is_within_active_window(at(20, 0), 8, 20, 0));
        assert!(!is_within_active_window(at(7, 59), 8, 20, 0));
    }

    #[test]
    fn test_window_wrapping_midnight() {
        assert!(is_within_active_window(at(23, 0), 20, 8, 0));
        assert!(is_within_active_window(at(3, 0), 20, 8, 0));
        assert!(!is_within_active_window(at(12, 0), 20, 8, 0));
    }

    #[test]
    fn test_equal_hours_always_active() {
        for hour in 0..24 {
            assert!(is_within_active_window(at(hour, 30), 6, 6, 0));
        }
        assert_eq!(seconds_until_window_end(at(12, 0), 6, 6, 0), None);
    }

    #[test]
    fn test_timezone_offset() {
        // 07:00 UTC is 08:00 at +60
        assert!(is_within_active_window(at(7, 0), 8, 20, 60));
        // 20:30 UTC is 23:30 at +180
        assert_eq!(local_seconds_of_day(at(20, 30), 180), 23 * 3600 + 30 * 60);
        // 01:00 UTC is 20:00 the previous day at -300
        assert_eq!(local_seconds_of_day(at(1, 0), -300), 20 * 3600);
    }

    #[test]
    fn test_seconds_until_start_wraps() {
        assert_eq!(seconds_until_next_window_start(at(7, 0), 8, 0), 3600);
        assert_eq!(seconds_until_next_window_start(at(8, 0), 8, 0), 0);
        assert_eq!(seconds_until_next_window_start(at(21, 0), 8, 0), 11 * 3600);
    }

    #[test]
    fn test_seconds_until_end() {
        assert_eq!(seconds_until_window_end(at(19, 0), 8, 20, 0), Some(3600));
        assert_eq!(seconds_until_window_end(at(23, 0), 20, 8, 0), Some(9 * 3600));
    }

    #[test]
    fn test_sleep_without_clock_uses_interval() {
        assert_eq!(compute_sleep_duration(&config(15, 8, 20, 0), 0, false), 900);
    }

    #[test]
    fn test_sleep_outside_window() {
        let secs = compute_sleep_duration(&config(15, 8, 20, 0), at(22, 0), true);
        assert_eq!(secs, 10 * 3600);
    }

    #[test]
    fn test_sleep_inside_window() {
        let secs = compute_sleep_duration(&config(15, 8, 20, 0), at(12, 0), true);
        assert_eq!(secs, 900);
    }

    #[test]
    fn test_sleep_skips_window_tail() {
        // 19:50 + 15 min would land past 20:00
        let secs = compute_sleep_duration(&config(15, 8, 20, 0), at(19, 50), true);
        assert_eq!(secs, 12 * 3600 + 10 * 60);

        // Landing exactly on the end also skips
        let secs = compute_sleep_duration(&config(10, 8, 20, 0), at(19, 50), true);
        assert_eq!(secs, 12 * 3600 + 10 * 60);
    }

    #[test]
    fn test_sleep_floor() {
        let secs = compute_sleep_duration(&config(1, 8, 20, 0), at(7, 59) + 30, true);
        assert_eq!(secs, MIN_SLEEP_SECS);
        let secs = compute_sleep_duration(&config(1, 8, 20, 0), at(12, 0), false);
        assert_eq!(secs, MIN_SLEEP_SECS);
    }

    proptest! {
        #[test]
        fn prop_sleep_never_below_minimum(
            utc in 0u64..4_102_444_800,
            interval in 1u16..=1440,
            start in 0u8..24,
            end in 0u8..24,
            tz in -720i16..=840,
            clock_valid in any::<bool>(),
        ) {
            let secs = compute_sleep_duration(&config(interval, start, end, tz), utc, clock_valid);
            prop_assert!(secs >= MIN_SLEEP_SECS);
            prop_assert!(secs <= (SECS_PER_DAY as u64).max(interval as u64 * 60));
        }

        #[test]
        fn prop_window_start_is_active(start in 0u8..24, end in 0u8..24, day in 0u64..1000) {
            let utc = MIDNIGHT + day * SECS_PER_DAY as u64 + start as u64 * 3600;
            prop_assert!(is_within_active_window(utc, start, end, 0));
        }
    }
}
