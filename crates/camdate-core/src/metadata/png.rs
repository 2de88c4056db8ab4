use std::io::{Read, Seek};

use chrono::NaiveDateTime;
use encoding_rs::WINDOWS_1252;
use log::debug;

use super::exif::tiff_extract;
use super::{Extraction, TimeSource};
use crate::cursor::{ByteCursor, ByteOrder};
use crate::date::{parse_iso_prefix, TimeValue};
use crate::rewrite::RewritePlan;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

const EXIF: &[u8; 4] = b"eXIf";
const TEXT: &[u8; 4] = b"tEXt";
const IEND: &[u8; 4] = b"IEND";

const DATE_KEYS: [&str; 2] = ["date:create", "date:modify"];

/// Longest `tEXt` chunk read; date entries are a few dozen bytes.
const MAX_TEXT: u64 = 1024;

const READ_ONLY: &str = "PNG metadata cannot be rewritten";

/// Decodes a `tEXt` payload. The format says Latin-1, but many writers put
/// UTF-8 there.
fn decode_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = WINDOWS_1252.decode(raw);
            decoded.into_owned()
        }
    }
}

/// Walks the chunks after the signature. An `eXIf` chunk is read as EXIF;
/// otherwise the earliest `date:create`/`date:modify` text entry is used.
/// Offsets are never applied to PNG files.
pub fn png_extract<R: Read + Seek>(cur: &mut ByteCursor<R>, start: u64, end: u64) -> Extraction {
    let mut exif: Option<Extraction> = None;
    let mut text_date: Option<NaiveDateTime> = None;

    let mut pos = start + PNG_SIGNATURE.len() as u64;
    while pos + 12 <= end {
        let (Ok(len), Ok(kind)) = (cur.u32_at(pos, ByteOrder::Big), cur.array_at::<4>(pos + 4))
        else {
            break;
        };
        let data = pos + 8;
        let Some(next) = data.checked_add(u64::from(len) + 4).filter(|n| *n <= end) else {
            debug!("png: chunk at {pos} overruns the file");
            break;
        };
        match &kind {
            IEND => break,
            EXIF if exif.is_none() => exif = tiff_extract(cur, data, data + u64::from(len)),
            TEXT if u64::from(len) <= MAX_TEXT => {
                if let Some(date) = text_chunk_date(cur, data, len as usize) {
                    text_date = Some(text_date.map_or(date, |d| d.min(date)));
                }
            }
            _ => {}
        }
        pos = next;
    }

    let mut found = Extraction {
        plan: RewritePlan::read_only(READ_ONLY),
        ..Extraction::default()
    };
    if let Some(exif) = exif {
        found.gps = exif.gps;
        if let Some(time) = exif.time {
            found.time = Some(time);
            found.source = Some(TimeSource::PngExif);
            return found;
        }
    }
    if let Some(date) = text_date {
        found.time = Some(TimeValue::LocalUnknown(date));
        found.source = Some(TimeSource::PngText);
    }
    found
}

fn text_chunk_date<R: Read + Seek>(
    cur: &mut ByteCursor<R>,
    data: u64,
    len: usize,
) -> Option<NaiveDateTime> {
    let raw = cur.bytes_at(data, len).ok()?;
    let split = raw.iter().position(|b| *b == 0)?;
    let key = std::str::from_utf8(&raw[..split]).ok()?;
    if !DATE_KEYS.contains(&key) {
        return None;
    }
    parse_iso_prefix(&decode_text(&raw[split + 1..]))
}
