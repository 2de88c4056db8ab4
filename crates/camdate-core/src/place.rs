use chrono::{DateTime, FixedOffset, Utc};

use crate::metadata::GpsCoordinates;

/// A resolved place name, ready to go into a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    pub name: String,
    /// Offset in force at the place at the time asked about. Used to turn a
    /// UTC capture time into wall-clock time.
    pub utc_offset: Option<FixedOffset>,
}

/// Reverse geocoding: coordinates to a place name. Returned names are run
/// through [`sanitize_place_name`] before they reach a file name.
pub trait PlaceResolver {
    fn resolve(&self, gps: &GpsCoordinates, at: DateTime<Utc>) -> Option<Place>;
}

/// Resolves nothing. Files keep an empty place.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPlaces;

impl PlaceResolver for NoPlaces {
    fn resolve(&self, _gps: &GpsCoordinates, _at: DateTime<Utc>) -> Option<Place> {
        None
    }
}

/// Removes characters that cannot appear in a file name on common
/// filesystems and trims surrounding whitespace and dots.
pub fn sanitize_place_name(name: &str) -> String {
    name.chars()
        .filter(|c| {
            !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') && !c.is_control()
        })
        .collect::<String>()
        .trim_matches(|c: char| c.is_whitespace() || c == '.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_places_resolves_nothing() {
        let gps = GpsCoordinates::new(47.6, -122.3).unwrap();
        assert_eq!(NoPlaces.resolve(&gps, Utc::now()), None);
    }

    #[test]
    fn test_sanitize_place_name() {
        assert_eq!(sanitize_place_name(" Seattle, WA "), "Seattle, WA");
        assert_eq!(sanitize_place_name("A/B: \"C\"?"), "AB C");
        assert_eq!(sanitize_place_name("St. Louis."), "St. Louis");
        assert_eq!(sanitize_place_name("\u{1}"), "");
    }
}
