pub mod guess;

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use regex::Regex;

/// Format used when printing a resolved capture time to the user.
pub const DISPLAY_FORMAT: &str = "%Y.%m.%d - %H.%M.%S";

/// A capture timestamp together with what is known about its timezone.
///
/// Only the instant is compared when picking the earliest of several
/// candidates, whatever the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeValue {
    /// Exact UTC instant; the timezone at capture is unknown.
    Utc(NaiveDateTime),
    /// Wall-clock time at capture, in the given timezone.
    LocalKnown(NaiveDateTime, FixedOffset),
    /// Wall-clock time at capture; the timezone is unknown.
    LocalUnknown(NaiveDateTime),
}

impl TimeValue {
    /// Builds a local value, known when an offset came with it.
    pub fn local(instant: NaiveDateTime, offset: Option<FixedOffset>) -> Self {
        match offset {
            Some(offset) => TimeValue::LocalKnown(instant, offset),
            None => TimeValue::LocalUnknown(instant),
        }
    }

    pub fn instant(&self) -> NaiveDateTime {
        match *self {
            TimeValue::Utc(t) | TimeValue::LocalKnown(t, _) | TimeValue::LocalUnknown(t) => t,
        }
    }

    pub fn offset(&self) -> Option<FixedOffset> {
        match *self {
            TimeValue::LocalKnown(_, offset) => Some(offset),
            _ => None,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            TimeValue::Utc(_) => "utc",
            TimeValue::LocalKnown(..) => "local",
            TimeValue::LocalUnknown(_) => "local-unknown-offset",
        }
    }

    /// Returns whichever value has the earlier instant; `self` wins ties.
    pub fn earlier(self, other: TimeValue) -> TimeValue {
        if other.instant() < self.instant() {
            other
        } else {
            self
        }
    }

    /// Best-effort UTC instant: exact for `Utc` and `LocalKnown`, the bare
    /// wall-clock reading for `LocalUnknown`.
    pub fn approximate_utc(&self) -> DateTime<Utc> {
        match *self {
            TimeValue::Utc(t) | TimeValue::LocalUnknown(t) => t.and_utc(),
            TimeValue::LocalKnown(t, offset) => (t - offset).and_utc(),
        }
    }

    /// Wall-clock time at capture.
    ///
    /// Local modes already are wall-clock times. A `Utc` value is converted
    /// with `zone` when the caller knows where the picture was taken, and
    /// otherwise with this computer's current timezone, which is only a guess.
    pub fn to_local(&self, zone: Option<FixedOffset>) -> NaiveDateTime {
        match *self {
            TimeValue::LocalKnown(t, _) | TimeValue::LocalUnknown(t) => t,
            TimeValue::Utc(t) => match zone {
                Some(offset) => t.and_utc().with_timezone(&offset).naive_local(),
                None => t.and_utc().with_timezone(&Local).naive_local(),
            },
        }
    }

    pub fn checked_add(self, delta: TimeDelta) -> Option<TimeValue> {
        Some(match self {
            TimeValue::Utc(t) => TimeValue::Utc(t.checked_add_signed(delta)?),
            TimeValue::LocalKnown(t, o) => TimeValue::LocalKnown(t.checked_add_signed(delta)?, o),
            TimeValue::LocalUnknown(t) => TimeValue::LocalUnknown(t.checked_add_signed(delta)?),
        })
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeValue::Utc(t) => write!(f, "{}", t.format("%Y:%m:%dT%H:%M:%SZ")),
            TimeValue::LocalKnown(t, offset) => {
                write!(f, "{}{}", t.format("%Y:%m:%d %H:%M:%S"), offset)
            }
            TimeValue::LocalUnknown(t) => write!(f, "{}", t.format("%Y:%m:%d %H:%M:%S")),
        }
    }
}

static OFFSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([+-])([0-9]{2}):?([0-9]{2})$").unwrap());

static ISO_DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^([0-9]{4})-([0-9]{2})-([0-9]{2})T([0-9]{2}):([0-9]{2}):([0-9]{2})",
        r"(?:\.[0-9]+)?(Z|[+-][0-9]{2}:?[0-9]{2})?$",
    ))
    .unwrap()
});

static US_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{1,2})/([0-9]{1,2})/([0-9]{4})$").unwrap());

/// Parses a UTC offset such as `+08:00`, `-0530` or `Z`.
pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if s == "Z" {
        return FixedOffset::east_opt(0);
    }
    let caps = OFFSET_RE.captures(s)?;
    let hours: i32 = caps[2].parse().ok()?;
    let minutes: i32 = caps[3].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    let secs = (hours * 60 + minutes) * 60;
    match &caps[1] {
        "-" => FixedOffset::west_opt(secs),
        _ => FixedOffset::east_opt(secs),
    }
}

/// Parses the date strings found in QuickTime user data and PNG text
/// chunks: `2021-01-16T20:29:24-0800`, `2013-12-31T00:00:00Z`, or a bare
/// `2013-12-31T00:00:00`. Apple also documents a date-only `12/31/2012`.
/// Returns the wall-clock time and the offset, when one was given.
pub fn parse_iso_datetime(s: &str) -> Option<(NaiveDateTime, Option<FixedOffset>)> {
    let s = s.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if let Some(caps) = ISO_DATETIME_RE.captures(s) {
        let num = |i: usize| caps[i].parse::<u32>().ok();
        let date = NaiveDate::from_ymd_opt(caps[1].parse().ok()?, num(2)?, num(3)?)?;
        let time = date.and_hms_opt(num(4)?, num(5)?, num(6)?)?;
        let offset = match caps.get(7) {
            Some(m) => Some(parse_utc_offset(m.as_str())?),
            None => None,
        };
        return Some((time, offset));
    }
    let caps = US_DATE_RE.captures(s)?;
    let date = NaiveDate::from_ymd_opt(
        caps[3].parse().ok()?,
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
    )?;
    Some((date.and_hms_opt(0, 0, 0)?, None))
}

/// Parses only the leading `yyyy-MM-ddTHH:mm:ss` of a free-form date,
/// ignoring fractions and timezone, as PNG writers vary in what follows.
pub fn parse_iso_prefix(s: &str) -> Option<NaiveDateTime> {
    let head = s.trim_start().get(..19)?;
    NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S").ok()
}

/// Formats a wall-clock time the way `©day` and Apple creation dates are
/// rewritten: `yyyy-MM-ddTHH:mm:ss` followed by `±hhmm` when an offset is
/// known.
pub fn format_iso_datetime(time: NaiveDateTime, offset: Option<FixedOffset>) -> String {
    match offset {
        Some(offset) => {
            let secs = offset.local_minus_utc();
            let sign = if secs < 0 { '-' } else { '+' };
            let secs = secs.abs();
            format!(
                "{}{}{:02}{:02}",
                time.format("%Y-%m-%dT%H:%M:%S"),
                sign,
                secs / 3600,
                secs % 3600 / 60
            )
        }
        None => time.format("%Y-%m-%dT%H:%M:%S").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_earlier_compares_instants_only() {
        let utc = TimeValue::Utc(dt(2013, 12, 28, 10, 0, 0));
        let local =
            TimeValue::LocalKnown(dt(2013, 12, 28, 9, 0, 0), FixedOffset::east_opt(3600).unwrap());
        assert_eq!(utc.earlier(local), local);
        assert_eq!(local.earlier(utc), local);
        let tie = TimeValue::LocalUnknown(dt(2013, 12, 28, 10, 0, 0));
        assert_eq!(utc.earlier(tie), utc);
    }

    #[test]
    fn test_to_local_keeps_local_modes() {
        let t = dt(2013, 12, 28, 15, 48, 42);
        assert_eq!(TimeValue::LocalUnknown(t).to_local(None), t);
        let pst = FixedOffset::west_opt(8 * 3600).unwrap();
        assert_eq!(TimeValue::LocalKnown(t, pst).to_local(None), t);
        assert_eq!(TimeValue::Utc(t).to_local(Some(pst)), dt(2013, 12, 28, 7, 48, 42));
    }

    #[test]
    fn test_display_per_mode() {
        let t = dt(2013, 12, 28, 15, 48, 42);
        assert_eq!(TimeValue::Utc(t).to_string(), "2013:12:28T15:48:42Z");
        assert_eq!(TimeValue::LocalUnknown(t).to_string(), "2013:12:28 15:48:42");
        let pst = FixedOffset::west_opt(8 * 3600).unwrap();
        assert_eq!(TimeValue::LocalKnown(t, pst).to_string(), "2013:12:28 15:48:42-08:00");
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+08:00"), FixedOffset::east_opt(8 * 3600));
        assert_eq!(parse_utc_offset("-0530\0"), FixedOffset::west_opt(5 * 3600 + 30 * 60));
        assert_eq!(parse_utc_offset("Z"), FixedOffset::east_opt(0));
        assert_eq!(parse_utc_offset("+8"), None);
        assert_eq!(parse_utc_offset("+08:75"), None);
    }

    #[test]
    fn test_parse_iso_datetime_variants() {
        let (t, o) = parse_iso_datetime("2021-01-16T20:29:24-0800").unwrap();
        assert_eq!(t, dt(2021, 1, 16, 20, 29, 24));
        assert_eq!(o, FixedOffset::west_opt(8 * 3600));

        let (t, o) = parse_iso_datetime("2013-12-31T00:00:00Z").unwrap();
        assert_eq!(t, dt(2013, 12, 31, 0, 0, 0));
        assert_eq!(o, FixedOffset::east_opt(0));

        let (_, o) = parse_iso_datetime("2013-12-31T00:00:00").unwrap();
        assert!(o.is_none());

        let (t, _) = parse_iso_datetime("12/31/2012").unwrap();
        assert_eq!(t, dt(2012, 12, 31, 0, 0, 0));

        assert!(parse_iso_datetime("2013-13-31T00:00:00").is_none());
        assert!(parse_iso_datetime("yesterday").is_none());
    }

    #[test]
    fn test_format_iso_datetime_matches_source_width() {
        let t = dt(2021, 1, 16, 20, 29, 24);
        let pst = FixedOffset::west_opt(8 * 3600);
        assert_eq!(format_iso_datetime(t, pst), "2021-01-16T20:29:24-0800");
        assert_eq!(format_iso_datetime(t, None), "2021-01-16T20:29:24");
    }

    #[test]
    fn test_parse_iso_prefix_ignores_tail() {
        assert_eq!(
            parse_iso_prefix("2020-05-01T10:11:12+00:00"),
            Some(dt(2020, 5, 1, 10, 11, 12))
        );
        assert_eq!(parse_iso_prefix("2020-05-01"), None);
    }
}
