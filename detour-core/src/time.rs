//! Time utilities: trip-local clocks and minute arithmetic on slot windows.

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

pub const MINUTES_PER_DAY: i32 = 24 * 60;

fn parse_tz(tz: &str) -> Result<Tz> {
    tz.parse()
        .map_err(|_| anyhow::anyhow!("invalid timezone: {tz}"))
}

/// Parse a local time like "2026-05-02 19:30" in an IANA tz like "Europe/Lisbon",
/// returning UTC.
pub fn parse_local_to_utc(local: &str, tz: &str) -> Result<DateTime<Utc>> {
    let tz = parse_tz(tz)?;

    let ndt = NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M")
        .map_err(|e| anyhow::anyhow!("invalid local datetime '{local}': {e}"))?;

    let local_dt = tz
        .from_local_datetime(&ndt)
        .single()
        .ok_or_else(|| anyhow::anyhow!("ambiguous or invalid local time (DST?): {local} {tz}"))?;

    Ok(local_dt.with_timezone(&Utc))
}

/// Convert a UTC instant into the trip's wall clock.
pub fn to_trip_local(at: DateTime<Utc>, tz: &str) -> Result<NaiveDateTime> {
    let tz = parse_tz(tz)?;
    Ok(at.with_timezone(&tz).naive_local())
}

/// Minutes since local midnight.
pub fn minute_of_day(t: NaiveTime) -> i32 {
    (t.hour() * 60 + t.minute()) as i32
}

/// Inverse of [`minute_of_day`]; `None` when the value falls outside the day.
pub fn time_at_minute(minute: i32) -> Option<NaiveTime> {
    if !(0..MINUTES_PER_DAY).contains(&minute) {
        return None;
    }
    NaiveTime::from_hms_opt((minute / 60) as u32, (minute % 60) as u32, 0)
}

/// Signed minutes from `a` to `b`.
pub fn minutes_between(a: NaiveTime, b: NaiveTime) -> i32 {
    minute_of_day(b) - minute_of_day(a)
}

/// `t + minutes`, refusing to wrap past midnight.
pub fn add_minutes(t: NaiveTime, minutes: i32) -> Option<NaiveTime> {
    time_at_minute(minute_of_day(t) + minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lisbon_local_time() {
        // May is WEST (UTC+1)
        let utc = parse_local_to_utc("2026-05-02 19:30", "Europe/Lisbon").unwrap();
        assert_eq!(utc.to_rfc3339(), "2026-05-02T18:30:00+00:00");
    }

    #[test]
    fn trip_local_roundtrips_with_parse() {
        let utc = parse_local_to_utc("2026-05-02 09:15", "Asia/Tokyo").unwrap();
        let local = to_trip_local(utc, "Asia/Tokyo").unwrap();
        assert_eq!(local.format("%Y-%m-%d %H:%M").to_string(), "2026-05-02 09:15");
    }

    #[test]
    fn add_minutes_refuses_to_wrap() {
        let t = NaiveTime::from_hms_opt(23, 30, 0).unwrap();
        assert_eq!(add_minutes(t, 20), NaiveTime::from_hms_opt(23, 50, 0));
        assert!(add_minutes(t, 45).is_none());
        assert!(add_minutes(NaiveTime::from_hms_opt(0, 10, 0).unwrap(), -20).is_none());
    }

    #[test]
    fn invalid_timezone_is_an_error() {
        assert!(to_trip_local(Utc::now(), "Mars/Olympus").is_err());
    }
}
