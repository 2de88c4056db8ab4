use std::fs;
use std::path::Path;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use filetime::FileTime;
use log::debug;

use super::{Extraction, TimeSource};
use crate::date::guess::guess_date_from_filename;
use crate::date::TimeValue;
use crate::rewrite::{FieldEncoding, FilenameDateGuard, RewritePlan};

fn to_utc(time: FileTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.unix_seconds(), time.nanoseconds())
}

/// Capture time for files without usable metadata: the earlier of the
/// filesystem creation and last-write times, as UTC.
///
/// Windows Phone names its pictures `WP_yyyyMMdd_...` without writing any
/// metadata. When such a name disagrees with the filesystem date, the name
/// wins and the time becomes noon of that day, wall-clock, which no offset
/// may move. When the two agree, offsets must keep the named day.
pub fn filestamp_extract(path: &Path, meta: &fs::Metadata) -> Extraction {
    let modified_stamp = FileTime::from_last_modification_time(meta);
    let earliest = match FileTime::from_creation_time(meta) {
        Some(created) => created.min(modified_stamp),
        None => modified_stamp,
    };
    let from_modified = earliest == modified_stamp;
    let (Some(earliest), Some(modified)) = (to_utc(earliest), to_utc(modified_stamp)) else {
        return Extraction::default();
    };

    let mut plan = RewritePlan::default();
    plan.push(MODIFIED_FIELD, FieldEncoding::FileModified { original: modified });

    let mut found = Extraction {
        time: Some(TimeValue::Utc(earliest.naive_utc())),
        source: Some(TimeSource::FileStamp),
        gps: None,
        plan,
    };

    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if let Some(named) = guess_date_from_filename(name) {
        let stamped = earliest.with_timezone(&Local).naive_local();
        let reference = if stamped.date() == named {
            Some(stamped)
        } else {
            debug!(
                "{name}: filesystem date {} disagrees with file name, using {named}",
                stamped.date()
            );
            found.time = Some(TimeValue::LocalUnknown(noon_of(named)));
            found.source = Some(TimeSource::FileName);
            None
        };
        found.plan.set_guard(FilenameDateGuard {
            date: named,
            reference,
        });
    }
    if from_modified && found.source == Some(TimeSource::FileStamp) {
        found.plan.set_time_field(MODIFIED_FIELD);
    }
    found
}

const MODIFIED_FIELD: &str = "file modified";

fn noon_of(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(12, 0, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use std::fs::File;

    fn set_mtime(path: &Path, local: NaiveDateTime) -> DateTime<Utc> {
        let utc = Local
            .from_local_datetime(&local)
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        let ft = FileTime::from_unix_time(utc.timestamp(), 0);
        filetime::set_file_times(path, ft, ft).unwrap();
        utc
    }

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_plain_file_uses_filesystem_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.jpg");
        File::create(&path).unwrap();
        let utc = set_mtime(&path, dt(2013, 12, 28, 15, 48, 42));

        let found = filestamp_extract(&path, &fs::metadata(&path).unwrap());
        assert_eq!(found.source, Some(TimeSource::FileStamp));
        // Creation time, where the platform reports it, is "now" and later.
        assert_eq!(found.time, Some(TimeValue::Utc(utc.naive_utc())));
        assert!(found.plan.guard().is_none());
        assert_eq!(found.plan.fields()[0].name, "file modified");
        assert_eq!(found.plan.time_field(), Some("file modified"));
    }

    #[test]
    fn test_windows_phone_name_overrides_disagreeing_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("WP_20131228_15_48_42_Pro.jpg");
        File::create(&path).unwrap();
        set_mtime(&path, dt(2014, 3, 1, 9, 0, 0));

        let found = filestamp_extract(&path, &fs::metadata(&path).unwrap());
        assert_eq!(found.source, Some(TimeSource::FileName));
        assert_eq!(found.time, Some(TimeValue::LocalUnknown(dt(2013, 12, 28, 12, 0, 0))));
        let guard = found.plan.guard().unwrap();
        assert_eq!(guard.reference, None);
        assert!(guard.allows(TimeDelta::zero()));
        assert!(!guard.allows(TimeDelta::hours(1)));
        assert!(!guard.allows(TimeDelta::minutes(-1)));
        // The noon time is not the stamp, so moving the stamp must not move it.
        assert_eq!(found.plan.time_field(), None);
    }

    #[test]
    fn test_windows_phone_name_agreeing_with_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("WP_20131228_001.mp4");
        File::create(&path).unwrap();
        set_mtime(&path, dt(2013, 12, 28, 20, 0, 0));

        let found = filestamp_extract(&path, &fs::metadata(&path).unwrap());
        assert_eq!(found.source, Some(TimeSource::FileStamp));
        let guard = found.plan.guard().unwrap();
        assert_eq!(guard.reference, Some(dt(2013, 12, 28, 20, 0, 0)));
        assert!(guard.allows(TimeDelta::hours(3)));
        assert!(!guard.allows(TimeDelta::hours(4)));
    }
}
