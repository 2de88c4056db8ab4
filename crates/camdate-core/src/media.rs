use std::path::PathBuf;

use chrono::{NaiveDateTime, TimeDelta};

use crate::metadata::MediaInfo;
use crate::place::{sanitize_place_name, Place};

#[derive(Debug, Clone)]
pub struct Media {
    pub path: PathBuf,
    /// Just the filename
    pub filename: String,
    /// Capture time and rewrite plan as read from the file
    pub info: MediaInfo,
    /// Reverse-geocoded place, when the file carries a position
    pub place: Option<Place>,
    /// Wall-clock capture time used for display and renaming
    pub local_time: NaiveDateTime,
}

impl Media {
    pub fn new(path: PathBuf, info: MediaInfo) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let local_time = info.time.to_local(None);
        Self {
            path,
            filename,
            info,
            place: None,
            local_time,
        }
    }

    /// Records the resolved place and recomputes the wall-clock time with
    /// the place's offset.
    pub fn set_place(&mut self, mut place: Place) {
        place.name = sanitize_place_name(&place.name);
        self.local_time = self.info.time.to_local(place.utc_offset);
        self.place = Some(place);
    }

    /// Moves the recorded capture time after its fields were rewritten on
    /// disk. Returns false when the result is out of range.
    pub fn shift(&mut self, delta: TimeDelta) -> bool {
        let Some(time) = self.info.time.checked_add(delta) else {
            return false;
        };
        self.info.time = time;
        self.local_time = time.to_local(self.place.as_ref().and_then(|p| p.utc_offset));
        true
    }

    pub fn place_name(&self) -> &str {
        self.place.as_ref().map_or("", |p| p.name.as_str())
    }

    /// Extension of the current file name, including its dot.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default()
    }

    /// File name without its extension.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
