//! Access-log timestamp decoding.

use thiserror::Error;

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Why a timestamp could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid access log date {input:?}: {reason}")]
pub struct DateError {
    input: String,
    reason: &'static str,
}

impl DateError {
    fn new(input: &str, reason: &'static str) -> Self {
        DateError {
            input: input.to_string(),
            reason,
        }
    }
}

/// Decode an access-log timestamp (`DD/Mon/YYYY:HH:MM:SS ±HHMM`) into seconds
/// since the Unix epoch.
///
/// The wall-clock fields are read as if they were UTC and the zone offset is
/// then subtracted, so the result never depends on the host's timezone.
///
/// # Examples
///
/// ```
/// use wwwatch::parse_date;
///
/// assert_eq!(parse_date("29/Jul/2014:13:07:06 +0000").unwrap(), 1406639226);
/// assert_eq!(parse_date("29/Jul/2014:17:07:06 +0400").unwrap(), 1406639226);
/// ```
pub fn parse_date(input: &str) -> Result<i64, DateError> {
    let err = |reason| DateError::new(input, reason);

    let (stamp, zone) = input
        .split_once(' ')
        .ok_or_else(|| err("missing zone offset"))?;
    let (date, time) = stamp
        .split_once(':')
        .ok_or_else(|| err("missing time of day"))?;

    let mut date_parts = date.split('/');
    let (Some(day), Some(month), Some(year), None) = (
        date_parts.next(),
        date_parts.next(),
        date_parts.next(),
        date_parts.next(),
    ) else {
        return Err(err("date is not DD/Mon/YYYY"));
    };
    let day: u32 = day.parse().map_err(|_| err("bad day"))?;
    let year: i64 = year.parse().map_err(|_| err("bad year"))?;
    let month = MONTHS
        .iter()
        .position(|name| name.eq_ignore_ascii_case(month))
        .ok_or_else(|| err("unknown month name"))? as u32
        + 1;
    if day == 0 || day > 31 {
        return Err(err("day out of range"));
    }
    if !(1..=9999).contains(&year) {
        return Err(err("year out of range"));
    }

    let mut time_parts = time.split(':');
    let (Some(hh), Some(mm), Some(ss), None) = (
        time_parts.next(),
        time_parts.next(),
        time_parts.next(),
        time_parts.next(),
    ) else {
        return Err(err("time is not HH:MM:SS"));
    };
    let hh: i64 = hh.parse().map_err(|_| err("bad hour"))?;
    let mm: i64 = mm.parse().map_err(|_| err("bad minute"))?;
    let ss: i64 = ss.parse().map_err(|_| err("bad second"))?;
    // 60 allows for a leap second.
    if !(0..24).contains(&hh) || !(0..60).contains(&mm) || !(0..=60).contains(&ss) {
        return Err(err("time of day out of range"));
    }

    let offset = zone_offset(zone).ok_or_else(|| err("zone offset is not ±HHMM"))?;

    let days = days_from_civil(year, month, day);
    Ok(days * 86_400 + hh * 3_600 + mm * 60 + ss - offset)
}

/// Signed zone offset in seconds for `+HHMM` / `-HHMM`.
fn zone_offset(zone: &str) -> Option<i64> {
    let (sign, digits) = match zone.as_bytes().first()? {
        b'+' => (1, &zone[1..]),
        b'-' => (-1, &zone[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i64 = digits[..2].parse().ok()?;
    let minutes: i64 = digits[2..].parse().ok()?;
    Some(sign * 60 * (hours * 60 + minutes))
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let yoe = year - era * 400;
    let month = month as i64;
    let mp = if month > 2 { month - 3 } else { month + 9 };
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
