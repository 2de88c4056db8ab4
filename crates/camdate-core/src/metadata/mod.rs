//! Capture-time discovery: sniff the container, run its extractor, and fall
//! back to filesystem timestamps when the container has no usable time.

pub mod boxes;
pub mod exif;
pub mod filestamp;
pub mod gps;
pub mod mp4;
pub mod png;

use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use serde::Serialize;

use crate::cursor::ByteCursor;
use crate::date::TimeValue;
use crate::rewrite::RewritePlan;

pub use gps::GpsCoordinates;

/// Container formats recognized from the first eight bytes of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Jpeg,
    Mp4,
    Png,
    Unknown,
}

impl Container {
    pub fn sniff(head: &[u8; 8]) -> Self {
        if head[..2] == [0xFF, 0xD8] {
            Container::Jpeg
        } else if &head[4..] == b"ftyp" {
            Container::Mp4
        } else if *head == png::PNG_SIGNATURE {
            Container::Png
        } else {
            Container::Unknown
        }
    }
}

/// Which field a resolved capture time was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    Exif,
    Heif,
    QuickTimeDay,
    QuickTimeCreationDate,
    Cnth,
    MovieHeader,
    PngExif,
    PngText,
    FileStamp,
    FileName,
}

/// What one extractor found. Any part may be missing independently: a
/// video can carry a position but no usable time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub time: Option<TimeValue>,
    pub source: Option<TimeSource>,
    pub gps: Option<GpsCoordinates>,
    pub plan: RewritePlan,
}

/// Runs the extractor matching the container's header over the whole
/// source. Malformed content yields an empty extraction, never an error;
/// only failing to read the header is reported.
pub fn extract_metadata<R: Read + Seek>(reader: R) -> io::Result<(Container, Extraction)> {
    let mut cur = ByteCursor::new(reader)?;
    let end = cur.len();
    if end < 8 {
        return Ok((Container::Unknown, Extraction::default()));
    }
    let container = Container::sniff(&cur.array_at::<8>(0)?);
    let found = match container {
        Container::Jpeg => exif::jpeg_extract(&mut cur, 0, end),
        Container::Mp4 => mp4::mp4_extract(&mut cur, 0, end),
        Container::Png => png::png_extract(&mut cur, 0, end),
        Container::Unknown => Extraction::default(),
    };
    Ok((container, found))
}

/// Everything known about one media file's capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub container: Container,
    pub time: TimeValue,
    pub source: TimeSource,
    pub gps: Option<GpsCoordinates>,
    pub plan: RewritePlan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Not a JPEG, MP4/MOV/HEIC or PNG file; skip it.
    Unrecognized,
    Resolved(MediaInfo),
}

/// Resolves the capture time of the file at `path`.
///
/// The file is opened read-only and closed before returning. When the
/// container holds no usable time, the filesystem timestamps are used
/// instead, keeping any position the container did hold.
pub fn resolve(path: &Path) -> Result<Resolution> {
    let (container, found) = {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        extract_metadata(file).with_context(|| format!("reading {}", path.display()))?
    };
    if container == Container::Unknown {
        return Ok(Resolution::Unrecognized);
    }

    let found = match (found.time, found.source) {
        (Some(_), Some(_)) => found,
        _ => {
            debug!("{}: no capture time in {container:?} metadata", path.display());
            let meta = fs::metadata(path)
                .with_context(|| format!("reading metadata of {}", path.display()))?;
            let mut fallback = filestamp::filestamp_extract(path, &meta);
            fallback.gps = found.gps;
            if found.plan.is_read_only() {
                fallback.plan = found.plan;
            }
            fallback
        }
    };

    let (Some(time), Some(source)) = (found.time, found.source) else {
        anyhow::bail!("{}: no usable filesystem timestamp", path.display());
    };
    Ok(Resolution::Resolved(MediaInfo {
        container,
        time,
        source,
        gps: found.gps,
        plan: found.plan,
    }))
}
