use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Signed latitude/longitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsCoordinates {
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }

    /// Builds coordinates from unsigned EXIF values and their `N`/`S` and
    /// `E`/`W` reference letters.
    pub fn from_hemispheres(
        lat_ref: u8,
        latitude: f64,
        lon_ref: u8,
        longitude: f64,
    ) -> Option<Self> {
        let lat = match lat_ref.to_ascii_uppercase() {
            b'N' => latitude,
            b'S' => -latitude,
            _ => return None,
        };
        let lon = match lon_ref.to_ascii_uppercase() {
            b'E' => longitude,
            b'W' => -longitude,
            _ => return None,
        };
        Self::new(lat, lon)
    }

    /// Parses an ISO 6709 point such as `+47.6062-122.3321+050.000/`.
    /// Altitude and the coordinate reference system are ignored.
    pub fn parse_iso6709(s: &str) -> Option<Self> {
        let caps = ISO6709_RE.captures(s.trim_start())?;
        let lat = iso6709_degrees(&caps[1], &caps[2], caps.get(3).map(|m| m.as_str()), 2)?;
        let lon = iso6709_degrees(&caps[4], &caps[5], caps.get(6).map(|m| m.as_str()), 3)?;
        Self::new(lat, lon)
    }
}

impl fmt::Display for GpsCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

static ISO6709_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^([+-])([0-9]{2}|[0-9]{4}|[0-9]{6})(\.[0-9]*)?",
        r"([+-])([0-9]{3}|[0-9]{5}|[0-9]{7})(\.[0-9]*)?",
        r"(?:[-+/]|$)",
    ))
    .unwrap()
});

/// `±DD`, `±DDMM` or `±DDMMSS` (with `deg_width` degree digits), the
/// fraction applying to the last unit given.
fn iso6709_degrees(
    sign: &str,
    digits: &str,
    fraction: Option<&str>,
    deg_width: usize,
) -> Option<f64> {
    let fraction: f64 = match fraction {
        Some(f) if f.len() > 1 => format!("0{f}").parse().ok()?,
        _ => 0.0,
    };
    let unit = |range: std::ops::Range<usize>| digits[range].parse::<f64>().ok();
    let degrees = match digits.len() - deg_width {
        0 => unit(0..deg_width)? + fraction,
        2 => unit(0..deg_width)? + (unit(deg_width..deg_width + 2)? + fraction) / 60.0,
        _ => {
            unit(0..deg_width)?
                + unit(deg_width..deg_width + 2)? / 60.0
                + (unit(deg_width + 2..deg_width + 4)? + fraction) / 3600.0
        }
    };
    Some(if sign == "-" { -degrees } else { degrees })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_hemispheres_set_signs() {
        let gps = GpsCoordinates::from_hemispheres(b'S', 33.5, b'W', 70.25).unwrap();
        assert_eq!((gps.latitude, gps.longitude), (-33.5, -70.25));
        assert!(GpsCoordinates::from_hemispheres(0, 33.5, b'E', 70.25).is_none());
        assert!(GpsCoordinates::from_hemispheres(b'N', 95.0, b'E', 70.25).is_none());
    }

    #[test]
    fn test_iso6709_decimal_degrees() {
        let gps = GpsCoordinates::parse_iso6709("+47.6062-122.3321+050.000/").unwrap();
        assert!(close(gps.latitude, 47.6062));
        assert!(close(gps.longitude, -122.3321));
    }

    #[test]
    fn test_iso6709_minutes_and_seconds() {
        let gps = GpsCoordinates::parse_iso6709("+4736-12218/").unwrap();
        assert!(close(gps.latitude, 47.6));
        assert!(close(gps.longitude, -(122.0 + 18.0 / 60.0)));

        let gps = GpsCoordinates::parse_iso6709("-333000+0703000/").unwrap();
        assert!(close(gps.latitude, -33.5));
        assert!(close(gps.longitude, 70.5));
    }

    #[test]
    fn test_iso6709_rejects_garbage() {
        assert!(GpsCoordinates::parse_iso6709("47.6,-122.3").is_none());
        assert!(GpsCoordinates::parse_iso6709("+95.0000+010.0000/").is_none());
    }
}
