//! Capture time and position from ISO base media files (MP4, MOV, HEIC).
//!
//! Sources, best first: an Exif item in a HEIF `meta` box, `moov.udta.©day`,
//! the Apple `com.apple.quicktime.creationdate` key, the EXIF blob that
//! some cameras put in `moov.udta.CNTH`, and finally `moov.mvhd`.

use std::io::{Read, Seek};

use chrono::{FixedOffset, NaiveDateTime};
use log::debug;

use super::boxes::{boxes, find_box, BoxInfo};
use super::exif::{jpeg_extract, tiff_extract};
use super::{Extraction, GpsCoordinates, TimeSource};
use crate::cursor::{ByteCursor, ByteOrder, Epoch};
use crate::date::{parse_iso_datetime, TimeValue};
use crate::rewrite::{FieldEncoding, RewritePlan};

const FTYP: &[u8; 4] = b"ftyp";
const MOOV: &[u8; 4] = b"moov";
const MVHD: &[u8; 4] = b"mvhd";
const UDTA: &[u8; 4] = b"udta";
const DAY: &[u8; 4] = b"\xa9day";
const XYZ: &[u8; 4] = b"\xa9xyz";
const CNTH: &[u8; 4] = b"CNTH";
const META: &[u8; 4] = b"meta";
const KEYS: &[u8; 4] = b"keys";
const ILST: &[u8; 4] = b"ilst";
const DATA: &[u8; 4] = b"data";
const IINF: &[u8; 4] = b"iinf";
const INFE: &[u8; 4] = b"infe";
const ILOC: &[u8; 4] = b"iloc";

/// Sony cameras write local time into `mvhd` under this major brand.
const BRAND_LOCAL_MVHD: &[u8; 4] = b"MSNV";

const KEY_CREATION_DATE: &str = "com.apple.quicktime.creationdate";
const KEY_LOCATION: &str = "com.apple.quicktime.location.ISO6709";

const DAY_FIELD: &str = "\u{a9}day";
const CREATION_DATE_FIELD: &str = "creationdate";

/// Longest metadata string read; dates and ISO 6709 points are far shorter.
const MAX_STRING: u64 = 256;

/// A date stored as text, rewritable only at the same length.
struct TextDate {
    pos: u64,
    len: usize,
    time: NaiveDateTime,
    offset: Option<FixedOffset>,
}

impl TextDate {
    fn value(&self) -> TimeValue {
        TimeValue::local(self.time, self.offset)
    }

    fn encoding(&self) -> FieldEncoding {
        FieldEncoding::IsoString {
            pos: self.pos,
            len: self.len,
            original: self.time,
            offset: self.offset,
        }
    }
}

struct MovieHeader {
    creation: Option<(NaiveDateTime, Epoch)>,
    modification: Option<(NaiveDateTime, Epoch)>,
    payload: u64,
    width: u8,
}

const MVHD_CREATION: &str = "mvhd creation";
const MVHD_MODIFICATION: &str = "mvhd modification";

impl MovieHeader {
    /// The earlier of the two times, with the name of its field.
    fn earliest(&self) -> Option<(NaiveDateTime, &'static str)> {
        match (self.creation, self.modification) {
            (Some((c, _)), Some((m, _))) if m < c => Some((m, MVHD_MODIFICATION)),
            (Some((t, _)), _) => Some((t, MVHD_CREATION)),
            (None, Some((t, _))) => Some((t, MVHD_MODIFICATION)),
            (None, None) => None,
        }
    }

    fn plan(&self, plan: &mut RewritePlan) {
        let slots = [
            (MVHD_CREATION, self.creation, self.payload + 4),
            (MVHD_MODIFICATION, self.modification, self.payload + 4 + u64::from(self.width)),
        ];
        for (name, value, pos) in slots {
            if let Some((original, epoch)) = value {
                plan.push(
                    name,
                    FieldEncoding::Seconds {
                        pos,
                        width: self.width,
                        epoch,
                        original,
                    },
                );
            }
        }
    }
}

#[derive(Default)]
struct AppleKeys {
    creation: Option<TextDate>,
    location: Option<GpsCoordinates>,
}

pub fn mp4_extract<R: Read + Seek>(cur: &mut ByteCursor<R>, start: u64, end: u64) -> Extraction {
    let Some(ftyp) = find_box(cur, FTYP, start, end) else {
        return Extraction::default();
    };
    let brand = if ftyp.payload_len() >= 4 {
        cur.array_at::<4>(ftyp.payload).ok()
    } else {
        None
    };

    let heif = heif_exif(cur, start, end);
    let moov = find_box(cur, MOOV, start, end);
    let header = moov.and_then(|m| movie_header(cur, &m));

    let mut day = None;
    let mut cnth = None;
    let mut xyz = None;
    if let Some(udta) = moov.and_then(|m| find_box(cur, UDTA, m.payload, m.end)) {
        day = find_box(cur, DAY, udta.payload, udta.end)
            .and_then(|b| user_data_string(cur, &b))
            .and_then(|(pos, text)| {
                let (time, offset) = parse_iso_datetime(&text)?;
                Some(TextDate {
                    pos,
                    len: text.len(),
                    time,
                    offset,
                })
            });
        xyz = find_box(cur, XYZ, udta.payload, udta.end)
            .and_then(|b| user_data_string(cur, &b))
            .and_then(|(_, text)| GpsCoordinates::parse_iso6709(&text));
        cnth = find_box(cur, CNTH, udta.payload, udta.end)
            .filter(|b| b.payload_len() > 16)
            .map(|b| jpeg_extract(cur, b.payload + 8, b.end));
    }
    let apple = moov.map(|m| apple_keys(cur, &m)).unwrap_or_default();

    let mut plan = RewritePlan::default();
    if let Some(heif) = &heif {
        plan.append(heif.plan.clone());
    }
    if let Some(header) = &header {
        header.plan(&mut plan);
    }
    if let Some(day) = &day {
        plan.push(DAY_FIELD, day.encoding());
    }
    if let Some(creation) = &apple.creation {
        plan.push(CREATION_DATE_FIELD, creation.encoding());
    }
    if let Some(cnth) = &cnth {
        plan.append(cnth.plan.clone());
    }

    let gps = heif
        .as_ref()
        .and_then(|h| h.gps)
        .or_else(|| cnth.as_ref().and_then(|c| c.gps))
        .or(apple.location)
        .or(xyz);

    let movie_time = header.as_ref().and_then(|h| {
        let (t, field) = h.earliest()?;
        let time = if brand.as_ref() == Some(BRAND_LOCAL_MVHD) {
            TimeValue::LocalUnknown(t)
        } else {
            TimeValue::Utc(t)
        };
        Some((time, Some(field)))
    });
    let candidates = [
        (
            heif.as_ref().and_then(|h| Some((h.time?, h.plan.time_field()))),
            TimeSource::Heif,
        ),
        (
            day.as_ref().map(|d| (d.value(), Some(DAY_FIELD))),
            TimeSource::QuickTimeDay,
        ),
        (
            apple
                .creation
                .as_ref()
                .map(|c| (c.value(), Some(CREATION_DATE_FIELD))),
            TimeSource::QuickTimeCreationDate,
        ),
        (
            cnth.as_ref().and_then(|c| Some((c.time?, c.plan.time_field()))),
            TimeSource::Cnth,
        ),
        (movie_time, TimeSource::MovieHeader),
    ];
    let Some(((time, field), source)) = candidates
        .into_iter()
        .find_map(|(found, source)| found.map(|f| (f, source)))
    else {
        return Extraction {
            gps,
            plan,
            ..Extraction::default()
        };
    };
    debug!("mp4: capture time from {source:?}");
    if let Some(field) = field {
        plan.set_time_field(field);
    }

    Extraction {
        time: Some(time),
        source: Some(source),
        gps,
        plan,
    }
}

fn movie_header<R: Read + Seek>(cur: &mut ByteCursor<R>, moov: &BoxInfo) -> Option<MovieHeader> {
    let mvhd = find_box(cur, MVHD, moov.payload, moov.end)?;
    if mvhd.payload_len() < 20 {
        return None;
    }
    let version = cur.u8_at(mvhd.payload).ok()?;
    let width: u8 = if version == 0 { 4 } else { 8 };
    if mvhd.payload_len() < 4 + 2 * u64::from(width) {
        return None;
    }
    let creation = cur.uint_at(mvhd.payload + 4, width, ByteOrder::Big).ok()?;
    let modification = cur
        .uint_at(mvhd.payload + 4 + u64::from(width), width, ByteOrder::Big)
        .ok()?;
    Some(MovieHeader {
        creation: Epoch::decode(creation),
        modification: Epoch::decode(modification),
        payload: mvhd.payload,
        width,
    })
}

/// QuickTime user-data text: 2-byte length, 2-byte language, then the text.
/// Returns the text's absolute position and the text.
fn user_data_string<R: Read + Seek>(cur: &mut ByteCursor<R>, b: &BoxInfo) -> Option<(u64, String)> {
    if b.payload_len() <= 4 {
        return None;
    }
    let len = u64::from(cur.u16_at(b.payload, ByteOrder::Big).ok()?);
    if len > MAX_STRING || b.payload + 4 + len > b.end {
        return None;
    }
    let text = cur.latin1_at(b.payload + 4, len as usize).ok()?;
    Some((b.payload + 4, text))
}

/// Reads the `moov.meta` key list and the matching `ilst` values that Apple
/// devices write. QuickTime's `meta` has no version/flags prefix.
fn apple_keys<R: Read + Seek>(cur: &mut ByteCursor<R>, moov: &BoxInfo) -> AppleKeys {
    let mut found = AppleKeys::default();
    let Some(meta) = find_box(cur, META, moov.payload, moov.end) else {
        return found;
    };
    let (Some(keys), Some(ilst)) = (
        find_box(cur, KEYS, meta.payload, meta.end),
        find_box(cur, ILST, meta.payload, meta.end),
    ) else {
        return found;
    };

    let names = key_names(cur, &keys);
    let items: Vec<BoxInfo> = boxes(cur, ilst.payload, ilst.end).collect();
    for item in items {
        let index = u32::from_be_bytes(item.kind) as usize;
        let Some(name) = index.checked_sub(1).and_then(|i| names.get(i)) else {
            continue;
        };
        if name != KEY_CREATION_DATE && name != KEY_LOCATION {
            continue;
        }
        let Some((pos, text)) = utf8_data(cur, &item) else {
            continue;
        };
        if name == KEY_CREATION_DATE {
            found.creation = parse_iso_datetime(&text).map(|(time, offset)| TextDate {
                pos,
                len: text.len(),
                time,
                offset,
            });
        } else {
            found.location = GpsCoordinates::parse_iso6709(&text);
        }
    }
    found
}

/// Key names in order; item `n` of `ilst` refers to `names[n - 1]`.
fn key_names<R: Read + Seek>(cur: &mut ByteCursor<R>, keys: &BoxInfo) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(count) = cur.u32_at(keys.payload + 4, ByteOrder::Big) else {
        return names;
    };
    let mut pos = keys.payload + 8;
    for _ in 0..count {
        let Ok(size) = cur.u32_at(pos, ByteOrder::Big).map(u64::from) else {
            break;
        };
        if size < 8 || pos + size > keys.end {
            break;
        }
        let name = if size - 8 <= MAX_STRING {
            cur.bytes_at(pos + 8, (size - 8) as usize)
                .map(|raw| String::from_utf8_lossy(&raw).into_owned())
                .unwrap_or_default()
        } else {
            String::new()
        };
        names.push(name);
        pos += size;
    }
    names
}

/// The UTF-8 value of an `ilst` item's `data` box: 4-byte type (1 for
/// UTF-8), 4-byte locale, then the value.
fn utf8_data<R: Read + Seek>(cur: &mut ByteCursor<R>, item: &BoxInfo) -> Option<(u64, String)> {
    let data = find_box(cur, DATA, item.payload, item.end)?;
    if data.payload_len() < 8 || data.payload_len() - 8 > MAX_STRING {
        return None;
    }
    if cur.u32_at(data.payload, ByteOrder::Big).ok()? != 1 {
        return None;
    }
    let raw = cur.bytes_at(data.payload + 8, (data.payload_len() - 8) as usize).ok()?;
    let text = String::from_utf8(raw).ok()?;
    Some((data.payload + 8, text))
}

/// The EXIF block of a HEIF image, located through `meta.iinf` and
/// `meta.iloc`.
fn heif_exif<R: Read + Seek>(cur: &mut ByteCursor<R>, start: u64, end: u64) -> Option<Extraction> {
    let meta = find_box(cur, META, start, end)?;
    let children = meta.payload + 4;
    let iinf = find_box(cur, IINF, children, meta.end)?;
    let item_id = exif_item_id(cur, &iinf)?;
    let iloc = find_box(cur, ILOC, children, meta.end)?;
    let (offset, length) = item_extent(cur, &iloc, item_id)?;

    // The item starts with the offset from its fifth byte to the TIFF
    // header, which is usually 6 to skip "Exif\0\0".
    let skip = u64::from(cur.u32_at(offset, ByteOrder::Big).ok()?);
    let item_end = offset.checked_add(length)?.min(cur.len());
    let tiff = offset.checked_add(4)?.checked_add(skip)?;
    if tiff >= item_end {
        return None;
    }
    let mut found = tiff_extract(cur, tiff, item_end)?;
    found.source = found.time.map(|_| TimeSource::Heif);
    Some(found)
}

fn exif_item_id<R: Read + Seek>(cur: &mut ByteCursor<R>, iinf: &BoxInfo) -> Option<u32> {
    let version = cur.u8_at(iinf.payload).ok()?;
    let entries = if version == 0 { iinf.payload + 6 } else { iinf.payload + 8 };
    let infes: Vec<BoxInfo> = boxes(cur, entries, iinf.end).filter(|b| &b.kind == INFE).collect();
    for infe in infes {
        let (id, kind) = match cur.u8_at(infe.payload).ok()? {
            2 => (
                u32::from(cur.u16_at(infe.payload + 4, ByteOrder::Big).ok()?),
                infe.payload + 8,
            ),
            3 => (cur.u32_at(infe.payload + 4, ByteOrder::Big).ok()?, infe.payload + 10),
            _ => continue,
        };
        if kind + 4 <= infe.end && &cur.array_at::<4>(kind).ok()? == b"Exif" {
            return Some(id);
        }
    }
    None
}

/// Absolute offset and length of `item_id`'s first extent. Only items
/// stored in this file (construction method 0, data reference 0) are
/// supported.
fn item_extent<R: Read + Seek>(
    cur: &mut ByteCursor<R>,
    iloc: &BoxInfo,
    item_id: u32,
) -> Option<(u64, u64)> {
    let be = ByteOrder::Big;
    let version = cur.u8_at(iloc.payload).ok()?;
    if version > 2 {
        return None;
    }
    let mut pos = iloc.payload + 4;
    let sizes = cur.u8_at(pos).ok()?;
    let more = cur.u8_at(pos + 1).ok()?;
    let (offset_size, length_size) = (sizes >> 4, sizes & 0x0F);
    let base_offset_size = more >> 4;
    let index_size = if version == 0 { 0 } else { more & 0x0F };
    pos += 2;

    let id_width: u8 = if version < 2 { 2 } else { 4 };
    let count = cur.uint_at(pos, id_width, be).ok()?;
    pos += u64::from(id_width);

    for _ in 0..count {
        if pos >= iloc.end {
            return None;
        }
        let id = cur.uint_at(pos, id_width, be).ok()?;
        pos += u64::from(id_width);
        let method = if version == 0 {
            0
        } else {
            let m = cur.u16_at(pos, be).ok()? & 0x0F;
            pos += 2;
            m
        };
        let data_ref = cur.u16_at(pos, be).ok()?;
        let base_offset = cur.uint_at(pos + 2, base_offset_size, be).ok()?;
        pos += 2 + u64::from(base_offset_size);
        let extents = cur.u16_at(pos, be).ok()?;
        pos += 2;

        let mut first = None;
        for _ in 0..extents {
            pos += u64::from(index_size);
            let offset = cur.uint_at(pos, offset_size, be).ok()?;
            pos += u64::from(offset_size);
            let length = cur.uint_at(pos, length_size, be).ok()?;
            pos += u64::from(length_size);
            first.get_or_insert((offset, length));
        }

        if id == u64::from(item_id) {
            if method != 0 || data_ref != 0 {
                debug!("heif: Exif item {item_id} is not stored inline in this file");
                return None;
            }
            let (offset, length) = first?;
            return Some((base_offset.checked_add(offset)?, length));
        }
    }
    None
}
