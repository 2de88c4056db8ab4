//! JPEG segment and TIFF/EXIF directory walking.
//!
//! Only the tags needed to date and locate a picture are read: the three
//! ASCII date tags, their companion offset tags, and the GPS position.

use std::collections::HashSet;
use std::io::{self, Read, Seek};

use chrono::{FixedOffset, NaiveDateTime};
use log::debug;

use super::{Extraction, GpsCoordinates, TimeSource};
use crate::cursor::{decode_exif_date, ByteCursor, ByteOrder, EXIF_DATE_LEN};
use crate::date::{parse_utc_offset, TimeValue};
use crate::rewrite::{FieldEncoding, RewritePlan};

const MARKER_SOS: u16 = 0xFFDA;
const MARKER_APP1: u16 = 0xFFE1;
const EXIF_HEADER: &[u8; 6] = b"Exif\0\0";

const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_GPS_IFD: u16 = 0x8825;
const TAG_GPS_LAT_REF: u16 = 0x0001;
const TAG_GPS_LAT: u16 = 0x0002;
const TAG_GPS_LON_REF: u16 = 0x0003;
const TAG_GPS_LON: u16 = 0x0004;

const FORMAT_ASCII: u16 = 2;
const FORMAT_LONG: u16 = 4;
const FORMAT_RATIONAL: u16 = 5;

struct DateTag {
    tag: u16,
    offset_tag: u16,
    name: &'static str,
}

// Index order matters: the winner is chosen by starting from the first
// entry and replacing it with any strictly earlier later entry.
const DATE_TAGS: [DateTag; 3] = [
    DateTag {
        tag: 0x0132,
        offset_tag: 0x9010,
        name: "DateTime",
    },
    DateTag {
        tag: 0x9004,
        offset_tag: 0x9012,
        name: "DateTimeDigitized",
    },
    DateTag {
        tag: 0x9003,
        offset_tag: 0x9011,
        name: "DateTimeOriginal",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directory {
    Image,
    Exif,
    Gps,
}

#[derive(Default)]
struct ExifFields {
    dates: [Option<(NaiveDateTime, u64)>; 3],
    offsets: [Option<FixedOffset>; 3],
    lat_ref: Option<u8>,
    lon_ref: Option<u8>,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl ExifFields {
    fn into_extraction(self) -> Extraction {
        let mut winner: Option<(usize, NaiveDateTime)> = None;
        for (i, date) in self.dates.iter().enumerate() {
            if let Some((t, _)) = date {
                if winner.map_or(true, |(_, w)| *t < w) {
                    winner = Some((i, *t));
                }
            }
        }
        let time = winner.map(|(i, t)| TimeValue::local(t, self.offsets[i]));

        let mut plan = RewritePlan::default();
        for (tag, date) in DATE_TAGS.iter().zip(self.dates) {
            if let Some((original, pos)) = date {
                plan.push(tag.name, FieldEncoding::ExifAscii { pos, original });
            }
        }
        if let Some((i, _)) = winner {
            plan.set_time_field(DATE_TAGS[i].name);
        }

        let gps = match (self.lat_ref, self.lat, self.lon_ref, self.lon) {
            (Some(lat_ref), Some(lat), Some(lon_ref), Some(lon)) => {
                GpsCoordinates::from_hemispheres(lat_ref, lat, lon_ref, lon)
            }
            _ => None,
        };

        Extraction {
            source: time.map(|_| TimeSource::Exif),
            time,
            gps,
            plan,
        }
    }
}

/// Walks JPEG segments in `[start, end)`, which must begin with the SOI
/// marker, and reads the first APP1 segment carrying EXIF data.
pub fn jpeg_extract<R: Read + Seek>(cur: &mut ByteCursor<R>, start: u64, end: u64) -> Extraction {
    let mut pos = start + 2;
    while pos + 4 <= end {
        let header = (cur.u16_at(pos, ByteOrder::Big), cur.u16_at(pos + 2, ByteOrder::Big));
        let (marker, size) = match header {
            (Ok(m), Ok(s)) => (m, u64::from(s)),
            _ => break,
        };
        if marker >> 8 != 0xFF || size < 2 || pos + 2 + size > end {
            debug!("jpeg: bad segment {marker:#06x} of {size} bytes at {pos}");
            break;
        }
        let segment = pos;
        pos += 2 + size;
        if marker == MARKER_SOS {
            break;
        }
        if marker != MARKER_APP1 || size < 14 {
            continue;
        }
        if cur.array_at::<6>(segment + 4).ok().as_ref() != Some(EXIF_HEADER) {
            continue;
        }
        if let Some(found) = tiff_extract(cur, segment + 10, segment + 2 + size) {
            return found;
        }
    }
    Extraction::default()
}

/// Reads a TIFF structure starting at its byte-order mark at `tiff`.
/// Returns `None` when the header is not a TIFF header. All offsets inside
/// are relative to `tiff` and must stay below `end`.
pub fn tiff_extract<R: Read + Seek>(
    cur: &mut ByteCursor<R>,
    tiff: u64,
    end: u64,
) -> Option<Extraction> {
    let order = match &cur.array_at::<4>(tiff).ok()? {
        b"II*\0" => ByteOrder::Little,
        b"MM\0*" => ByteOrder::Big,
        _ => return None,
    };
    let mut fields = ExifFields::default();
    if let Err(err) = walk_directories(cur, tiff, end, order, &mut fields) {
        debug!("exif: stopped walking directories at {tiff}: {err}");
    }
    Some(fields.into_extraction())
}

fn walk_directories<R: Read + Seek>(
    cur: &mut ByteCursor<R>,
    tiff: u64,
    end: u64,
    order: ByteOrder,
    fields: &mut ExifFields,
) -> io::Result<()> {
    let mut next = u64::from(cur.u32_at(tiff + 4, order)?);
    let mut dir = Directory::Image;
    let mut exif_ifd = 0u64;
    let mut gps_ifd = 0u64;
    let mut visited = HashSet::new();

    loop {
        if next == 0 {
            // Main chain exhausted: the EXIF directory, then the GPS one,
            // each taken once.
            if exif_ifd != 0 {
                next = std::mem::take(&mut exif_ifd);
                dir = Directory::Exif;
            } else if gps_ifd != 0 {
                next = std::mem::take(&mut gps_ifd);
                dir = Directory::Gps;
            } else {
                return Ok(());
            }
        }
        if !visited.insert(next) {
            debug!("exif: directory at {next} already visited");
            return Ok(());
        }

        let ifd = tiff + next;
        let count = u64::from(cur.u16_at(ifd, order)?);
        let link = ifd + 2 + count * 12;
        if link + 4 > end {
            debug!("exif: directory at {ifd} with {count} entries overruns its segment");
            return Ok(());
        }
        for i in 0..count {
            let entry = ifd + 2 + i * 12;
            let tag = cur.u16_at(entry, order)?;
            let format = cur.u16_at(entry + 2, order)?;
            let components = cur.u32_at(entry + 4, order)?;
            let value = cur.u32_at(entry + 8, order)?;

            match (dir, tag, format) {
                (_, TAG_EXIF_IFD, FORMAT_LONG) => exif_ifd = u64::from(value),
                (_, TAG_GPS_IFD, FORMAT_LONG) => gps_ifd = u64::from(value),
                (Directory::Gps, TAG_GPS_LAT_REF | TAG_GPS_LON_REF, FORMAT_ASCII)
                    if components == 2 =>
                {
                    let letter = cur.u8_at(entry + 8)?;
                    if tag == TAG_GPS_LAT_REF {
                        fields.lat_ref = Some(letter);
                    } else {
                        fields.lon_ref = Some(letter);
                    }
                }
                (Directory::Gps, TAG_GPS_LAT | TAG_GPS_LON, FORMAT_RATIONAL) if components == 3 => {
                    let pos = tiff + u64::from(value);
                    if pos + 24 > end {
                        continue;
                    }
                    let degrees = read_degrees(cur, pos, order)?;
                    if tag == TAG_GPS_LAT {
                        fields.lat = degrees;
                    } else {
                        fields.lon = degrees;
                    }
                }
                (_, _, FORMAT_ASCII) => {
                    let entry = Entry {
                        pos: entry,
                        tag,
                        components,
                        value: u64::from(value),
                    };
                    read_date_entry(cur, tiff, end, &entry, fields)?;
                }
                _ => {}
            }
        }
        next = u64::from(cur.u32_at(link, order)?);
    }
}

struct Entry {
    pos: u64,
    tag: u16,
    components: u32,
    value: u64,
}

fn read_date_entry<R: Read + Seek>(
    cur: &mut ByteCursor<R>,
    tiff: u64,
    end: u64,
    entry: &Entry,
    fields: &mut ExifFields,
) -> io::Result<()> {
    let components = entry.components;
    for (i, date_tag) in DATE_TAGS.iter().enumerate() {
        if entry.tag == date_tag.tag && components == 20 {
            let pos = tiff + entry.value;
            if pos + 20 > end {
                return Ok(());
            }
            if let Some(date) = decode_exif_date(&cur.bytes_at(pos, EXIF_DATE_LEN)?) {
                fields.dates[i] = Some((date, pos));
            }
        } else if entry.tag == date_tag.offset_tag && (2..=10).contains(&components) {
            // `+hh:mm\0` is 7 bytes and lives out of line; `Z\0` fits inline.
            let pos = if components <= 4 {
                entry.pos + 8
            } else {
                tiff + entry.value
            };
            if pos + u64::from(components) > end {
                return Ok(());
            }
            let raw = cur.latin1_at(pos, components as usize)?;
            fields.offsets[i] = parse_utc_offset(&raw);
        }
    }
    Ok(())
}

/// Degrees + minutes/60 + seconds/3600 from three unsigned rationals.
/// A zero denominator makes the whole value unreadable.
fn read_degrees<R: Read + Seek>(
    cur: &mut ByteCursor<R>,
    pos: u64,
    order: ByteOrder,
) -> io::Result<Option<f64>> {
    let mut parts = [0f64; 3];
    for (i, part) in parts.iter_mut().enumerate() {
        let num = cur.u32_at(pos + i as u64 * 8, order)?;
        let den = cur.u32_at(pos + i as u64 * 8 + 4, order)?;
        if den == 0 {
            return Ok(None);
        }
        *part = f64::from(num) / f64::from(den);
    }
    Ok(Some(parts[0] + parts[1] / 60.0 + parts[2] / 3600.0))
}
