//! In-place timestamp rewriting.
//!
//! Extraction records every timestamp field it found as a [`TimeField`]:
//! where the field lives, how it is encoded and what it held. Applying an
//! offset re-encodes each field at its original width and writes it back at
//! the same position, so the file never changes size.

use std::fmt;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use filetime::FileTime;
use log::debug;
use serde::Serialize;

use crate::cursor::{encode_exif_date, Epoch};
use crate::date::format_iso_datetime;

/// How a timestamp field is stored, and the value it held when read.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEncoding {
    /// 19 ASCII bytes `yyyy:MM:dd HH:mm:ss` at an absolute offset.
    ExifAscii { pos: u64, original: NaiveDateTime },
    /// Big-endian seconds counter of 4 or 8 bytes.
    Seconds {
        pos: u64,
        width: u8,
        epoch: Epoch,
        original: NaiveDateTime,
    },
    /// ISO-8601 string of a fixed byte length, rewritten only when the
    /// shifted value has exactly that length.
    IsoString {
        pos: u64,
        len: usize,
        original: NaiveDateTime,
        offset: Option<FixedOffset>,
    },
    /// The file's last-write time in the filesystem.
    FileModified { original: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeField {
    pub name: &'static str,
    pub encoding: FieldEncoding,
}

/// Set when a file's name carries its capture date.
///
/// With a `reference` time that agrees with the name, offsets that move it
/// onto another calendar day are refused. Without one the date comes from
/// the name alone and every offset is refused: no rewrite could change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilenameDateGuard {
    pub date: NaiveDate,
    pub reference: Option<NaiveDateTime>,
}

impl FilenameDateGuard {
    pub fn allows(&self, delta: TimeDelta) -> bool {
        match self.reference {
            Some(reference) => reference
                .checked_add_signed(delta)
                .is_some_and(|t| t.date() == self.date),
            None => delta == TimeDelta::zero(),
        }
    }

    fn refusal(&self) -> String {
        let date = self.date.format("%Y-%m-%d");
        match self.reference {
            Some(_) => {
                format!("date {date} comes from the file name and the offset would change it")
            }
            None => format!("date {date} comes from the file name and cannot be shifted"),
        }
    }
}

/// Result of applying an offset to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RewriteOutcome {
    Applied { fields: Vec<String> },
    Partial { applied: Vec<String>, skipped: Vec<String> },
    Refused { reason: String },
    Failed { reason: String },
}

impl RewriteOutcome {
    /// Names of the fields that were rewritten.
    pub fn applied(&self) -> &[String] {
        match self {
            RewriteOutcome::Applied { fields } => fields,
            RewriteOutcome::Partial { applied, .. } => applied,
            _ => &[],
        }
    }

    /// Whether any byte of the file's timestamps now differs.
    pub fn changed_time(&self) -> bool {
        match self {
            RewriteOutcome::Applied { fields } => !fields.is_empty(),
            RewriteOutcome::Partial { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for RewriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteOutcome::Applied { fields } if fields.is_empty() => {
                write!(f, "no timestamp fields to rewrite")
            }
            RewriteOutcome::Applied { fields } => write!(f, "rewrote {}", fields.join(", ")),
            RewriteOutcome::Partial { applied, skipped } => write!(
                f,
                "partially rewritten: {} updated, {} skipped",
                applied.join(", "),
                skipped.join(", ")
            ),
            RewriteOutcome::Refused { reason } => write!(f, "refused: {reason}"),
            RewriteOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Every timestamp field found in one file, ready to be shifted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewritePlan {
    fields: Vec<TimeField>,
    guard: Option<FilenameDateGuard>,
    read_only: Option<&'static str>,
    /// The field the resolved capture time was read from.
    time_field: Option<&'static str>,
}

enum Staged {
    Bytes { pos: u64, bytes: Vec<u8> },
    Modified(FileTime),
}

impl RewritePlan {
    /// A plan that refuses every offset with `reason`.
    pub fn read_only(reason: &'static str) -> Self {
        Self {
            read_only: Some(reason),
            ..Self::default()
        }
    }

    pub fn push(&mut self, name: &'static str, encoding: FieldEncoding) {
        self.fields.push(TimeField { name, encoding });
    }

    pub fn append(&mut self, other: RewritePlan) {
        self.fields.extend(other.fields);
        self.guard = self.guard.or(other.guard);
        self.read_only = self.read_only.or(other.read_only);
    }

    pub fn set_guard(&mut self, guard: FilenameDateGuard) {
        self.guard = Some(guard);
    }

    pub fn set_time_field(&mut self, name: &'static str) {
        self.time_field = Some(name);
    }

    pub fn time_field(&self) -> Option<&'static str> {
        self.time_field
    }

    /// Whether `outcome` rewrote the field the capture time comes from, so
    /// that reading the file again yields the shifted time.
    pub fn moves_time(&self, outcome: &RewriteOutcome) -> bool {
        self.time_field
            .is_some_and(|name| outcome.applied().iter().any(|f| f == name))
    }

    pub fn guard(&self) -> Option<&FilenameDateGuard> {
        self.guard.as_ref()
    }

    pub fn fields(&self) -> &[TimeField] {
        &self.fields
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.is_some()
    }

    /// Shifts every field by `delta`. The file must be open for writing.
    ///
    /// Nothing is written unless every binary field can be re-encoded;
    /// string fields whose width would change are skipped individually and
    /// reported as `Partial`.
    pub fn apply(&self, file: &mut File, delta: TimeDelta) -> RewriteOutcome {
        let prepared = match self.prepare(delta) {
            Ok(prepared) => prepared,
            Err(refused) => return refused,
        };
        if let Err(err) = write_staged(file, &prepared.staged) {
            return RewriteOutcome::Failed {
                reason: err.to_string(),
            };
        }
        prepared.outcome()
    }

    /// The outcome `apply` would have, without touching the file.
    pub fn preview(&self, delta: TimeDelta) -> RewriteOutcome {
        match self.prepare(delta) {
            Ok(prepared) => prepared.outcome(),
            Err(refused) => refused,
        }
    }

    fn prepare(&self, delta: TimeDelta) -> Result<Prepared, RewriteOutcome> {
        if let Some(reason) = self.read_only {
            return Err(RewriteOutcome::Refused {
                reason: reason.to_string(),
            });
        }
        if let Some(guard) = &self.guard {
            if !guard.allows(delta) {
                return Err(RewriteOutcome::Refused {
                    reason: guard.refusal(),
                });
            }
        }

        let mut prepared = Prepared {
            staged: Vec::with_capacity(self.fields.len()),
            applied: Vec::new(),
            skipped: Vec::new(),
        };
        for field in &self.fields {
            match stage(&field.encoding, delta) {
                Ok(Some(write)) => {
                    prepared.staged.push(write);
                    prepared.applied.push(field.name.to_string());
                }
                Ok(None) => {
                    debug!("{}: shifted value no longer fits its field, skipping", field.name);
                    prepared.skipped.push(field.name.to_string());
                }
                Err(reason) => {
                    return Err(RewriteOutcome::Refused {
                        reason: format!("{}: {reason}", field.name),
                    })
                }
            }
        }
        if prepared.applied.is_empty() && !prepared.skipped.is_empty() {
            return Err(RewriteOutcome::Refused {
                reason: format!(
                    "{}: shifted date would change the field length",
                    prepared.skipped.join(", ")
                ),
            });
        }
        Ok(prepared)
    }
}

struct Prepared {
    staged: Vec<Staged>,
    applied: Vec<String>,
    skipped: Vec<String>,
}

impl Prepared {
    fn outcome(self) -> RewriteOutcome {
        if self.skipped.is_empty() {
            RewriteOutcome::Applied { fields: self.applied }
        } else {
            RewriteOutcome::Partial {
                applied: self.applied,
                skipped: self.skipped,
            }
        }
    }
}

/// Encodes one shifted field. `Ok(None)` means the field is skippable and
/// does not fit; `Err` means the whole plan must be refused.
fn stage(encoding: &FieldEncoding, delta: TimeDelta) -> Result<Option<Staged>, String> {
    let shift = |t: NaiveDateTime| {
        t.checked_add_signed(delta)
            .ok_or_else(|| format!("{t} shifted by {delta} is out of range"))
    };
    match *encoding {
        FieldEncoding::ExifAscii { pos, original } => {
            let shifted = shift(original)?;
            let bytes = encode_exif_date(shifted)
                .ok_or_else(|| format!("{shifted} cannot be written as an EXIF date"))?;
            Ok(Some(Staged::Bytes {
                pos,
                bytes: bytes.to_vec(),
            }))
        }
        FieldEncoding::Seconds {
            pos,
            width,
            epoch,
            original,
        } => {
            let shifted = shift(original)?;
            let secs = epoch
                .encode(shifted)
                .ok_or_else(|| format!("{shifted} predates the container epoch"))?;
            let bytes = match width {
                4 => u32::try_from(secs)
                    .map_err(|_| format!("{shifted} overflows a 32-bit field"))?
                    .to_be_bytes()
                    .to_vec(),
                _ => secs.to_be_bytes().to_vec(),
            };
            Ok(Some(Staged::Bytes { pos, bytes }))
        }
        FieldEncoding::IsoString {
            pos,
            len,
            original,
            offset,
        } => {
            let shifted = shift(original)?;
            let text = format_iso_datetime(shifted, offset);
            if text.len() != len {
                return Ok(None);
            }
            Ok(Some(Staged::Bytes {
                pos,
                bytes: text.into_bytes(),
            }))
        }
        FieldEncoding::FileModified { original } => {
            let shifted = original
                .checked_add_signed(delta)
                .ok_or_else(|| format!("{original} shifted by {delta} is out of range"))?;
            Ok(Some(Staged::Modified(FileTime::from_unix_time(
                shifted.timestamp(),
                shifted.timestamp_subsec_nanos(),
            ))))
        }
    }
}

fn write_staged(file: &mut File, staged: &[Staged]) -> io::Result<()> {
    let mut modified = None;
    for write in staged {
        match write {
            Staged::Bytes { pos, bytes } => {
                file.seek(SeekFrom::Start(*pos))?;
                file.write_all(bytes)?;
            }
            Staged::Modified(time) => modified = Some(*time),
        }
    }
    file.flush()?;
    // Set last so the content writes above do not bump it again.
    if let Some(time) = modified {
        filetime::set_file_handle_times(file, None, Some(time))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn file_with(bytes: &[u8]) -> File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    fn contents(file: &mut File) -> Vec<u8> {
        let mut buf = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_exif_and_seconds_fields_shift_in_place() {
        let mut data = b"xxxx2013:12:28 15:48:42\0".to_vec();
        data.extend_from_slice(&3_565_800_000u32.to_be_bytes());
        let mut file = file_with(&data);

        let mut plan = RewritePlan::default();
        plan.push(
            "DateTimeOriginal",
            FieldEncoding::ExifAscii {
                pos: 4,
                original: dt(2013, 12, 28, 15, 48, 42),
            },
        );
        plan.push(
            "mvhd creation",
            FieldEncoding::Seconds {
                pos: 24,
                width: 4,
                epoch: Epoch::Mac1904,
                original: dt(2016, 12, 28, 20, 0, 0),
            },
        );

        let outcome = plan.apply(&mut file, TimeDelta::days(1));
        assert_eq!(
            outcome,
            RewriteOutcome::Applied {
                fields: vec!["DateTimeOriginal".into(), "mvhd creation".into()]
            }
        );
        let out = contents(&mut file);
        assert_eq!(out.len(), data.len());
        assert_eq!(&out[4..23], b"2013:12:29 15:48:42");
        assert_eq!(&out[24..28], &(3_565_800_000u32 + 86_400).to_be_bytes());
    }

    #[test]
    fn test_unencodable_field_refuses_whole_plan() {
        let data = b"2013:12:28 15:48:42\0\0\0\0\x01".to_vec();
        let mut file = file_with(&data);
        let mut plan = RewritePlan::default();
        plan.push(
            "DateTime",
            FieldEncoding::ExifAscii {
                pos: 0,
                original: dt(2013, 12, 28, 15, 48, 42),
            },
        );
        plan.push(
            "mvhd creation",
            FieldEncoding::Seconds {
                pos: 20,
                width: 4,
                epoch: Epoch::Unix1970,
                original: dt(1970, 1, 1, 0, 0, 1),
            },
        );

        let outcome = plan.apply(&mut file, TimeDelta::days(-1));
        assert!(matches!(outcome, RewriteOutcome::Refused { .. }));
        assert_eq!(contents(&mut file), data);
    }

    #[test]
    fn test_iso_string_width_change_is_partial() {
        // Written with a colon in the offset; the rewrite format has none.
        let mut data = b"2013-12-28T15:48:42-08:00".to_vec();
        data.extend_from_slice(&[0u8; 4]);
        let mut file = file_with(&data);
        let mut plan = RewritePlan::default();
        plan.push(
            "\u{a9}day",
            FieldEncoding::IsoString {
                pos: 0,
                len: 25,
                original: dt(2013, 12, 28, 15, 48, 42),
                offset: FixedOffset::west_opt(8 * 3600),
            },
        );
        plan.push(
            "mvhd creation",
            FieldEncoding::Seconds {
                pos: 25,
                width: 4,
                epoch: Epoch::Unix1970,
                original: dt(2013, 12, 28, 23, 48, 42),
            },
        );

        let outcome = plan.apply(&mut file, TimeDelta::hours(1));
        assert_eq!(
            outcome,
            RewriteOutcome::Partial {
                applied: vec!["mvhd creation".into()],
                skipped: vec!["\u{a9}day".into()],
            }
        );
        assert!(outcome.changed_time());
        let out = contents(&mut file);
        assert_eq!(&out[..25], &data[..25]);
        assert_eq!(&out[25..], &1_388_278_122u32.to_be_bytes());
    }

    #[test]
    fn test_only_skipped_fields_is_refused() {
        let mut file = file_with(b"2013-12-28T15:48:42Z");
        let mut plan = RewritePlan::default();
        plan.push(
            "\u{a9}day",
            FieldEncoding::IsoString {
                pos: 0,
                len: 20,
                original: dt(2013, 12, 28, 15, 48, 42),
                offset: None,
            },
        );
        assert!(matches!(
            plan.apply(&mut file, TimeDelta::days(1)),
            RewriteOutcome::Refused { .. }
        ));
    }

    #[test]
    fn test_filename_guard_refuses_date_change() {
        let mut file = file_with(b"");
        let mut plan = RewritePlan::default();
        plan.push(
            "file modified",
            FieldEncoding::FileModified {
                original: dt(2013, 12, 28, 12, 0, 0).and_utc(),
            },
        );
        plan.set_guard(FilenameDateGuard {
            date: NaiveDate::from_ymd_opt(2013, 12, 28).unwrap(),
            reference: Some(dt(2013, 12, 28, 12, 0, 0)),
        });

        let refused = plan.apply(&mut file, TimeDelta::hours(13));
        assert!(matches!(
            refused,
            RewriteOutcome::Refused { ref reason } if reason.contains("2013-12-28")
        ));

        let applied = plan.apply(&mut file, TimeDelta::hours(-3));
        assert!(applied.changed_time());
        let modified = FileTime::from_last_modification_time(&file.metadata().unwrap());
        assert_eq!(modified.unix_seconds(), dt(2013, 12, 28, 9, 0, 0).and_utc().timestamp());
    }

    #[test]
    fn test_date_from_name_alone_refuses_any_offset() {
        let mut file = file_with(b"");
        let mut plan = RewritePlan::default();
        plan.push(
            "file modified",
            FieldEncoding::FileModified {
                original: dt(2014, 3, 1, 9, 0, 0).and_utc(),
            },
        );
        plan.set_time_field("file modified");
        plan.set_guard(FilenameDateGuard {
            date: NaiveDate::from_ymd_opt(2013, 12, 28).unwrap(),
            reference: None,
        });

        let outcome = plan.apply(&mut file, TimeDelta::minutes(1));
        assert!(matches!(
            outcome,
            RewriteOutcome::Refused { ref reason } if reason.contains("cannot be shifted")
        ));
        assert!(!plan.moves_time(&outcome));
    }

    #[test]
    fn test_moves_time_only_when_its_field_was_written() {
        let mut data = b"2013-12-28T15:48:42-08:00".to_vec();
        data.extend_from_slice(&[0u8; 4]);
        let mut file = file_with(&data);
        let mut plan = RewritePlan::default();
        plan.push(
            "\u{a9}day",
            FieldEncoding::IsoString {
                pos: 0,
                len: 25,
                original: dt(2013, 12, 28, 15, 48, 42),
                offset: FixedOffset::west_opt(8 * 3600),
            },
        );
        plan.push(
            "mvhd creation",
            FieldEncoding::Seconds {
                pos: 25,
                width: 4,
                epoch: Epoch::Unix1970,
                original: dt(2013, 12, 28, 23, 48, 42),
            },
        );
        plan.set_time_field("\u{a9}day");

        let outcome = plan.apply(&mut file, TimeDelta::days(1));
        assert_eq!(outcome.applied(), ["mvhd creation".to_string()]);
        assert!(outcome.changed_time());
        assert!(!plan.moves_time(&outcome));

        plan.set_time_field("mvhd creation");
        assert!(plan.moves_time(&outcome));
    }

    #[test]
    fn test_preview_matches_apply_without_writing() {
        let data = b"2013:12:28 15:48:42\0".to_vec();
        let mut file = file_with(&data);
        let mut plan = RewritePlan::default();
        plan.push(
            "DateTimeOriginal",
            FieldEncoding::ExifAscii {
                pos: 0,
                original: dt(2013, 12, 28, 15, 48, 42),
            },
        );

        let preview = plan.preview(TimeDelta::minutes(-30));
        assert_eq!(contents(&mut file), data);
        assert_eq!(preview, plan.apply(&mut file, TimeDelta::minutes(-30)));
        assert_eq!(&contents(&mut file)[..19], b"2013:12:28 15:18:42");
    }

    #[test]
    fn test_read_only_and_empty_plans() {
        let mut file = file_with(b"\x89PNG");
        let plan = RewritePlan::read_only("PNG metadata is read-only");
        let outcome = plan.apply(&mut file, TimeDelta::days(1));
        assert_eq!(
            outcome,
            RewriteOutcome::Refused {
                reason: "PNG metadata is read-only".into()
            }
        );

        let outcome = RewritePlan::default().apply(&mut file, TimeDelta::days(1));
        assert_eq!(outcome, RewriteOutcome::Applied { fields: vec![] });
        assert!(!outcome.changed_time());
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_string(&RewriteOutcome::Refused {
            reason: "nope".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"refused","reason":"nope"}"#);
    }
}
