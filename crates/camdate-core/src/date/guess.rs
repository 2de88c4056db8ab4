use chrono::NaiveDate;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

struct DatePattern {
    regex: &'static LazyLock<Regex>,
    format: &'static str,
}

// Windows Phone camera roll: WP_20131228_15_48_42_Pro.jpg. Only the date
// part is trusted; the clock part is often off by the phone's timezone.
static RE_WP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"WP_(?P<date>20\d{2}(0[1-9]|1[0-2])[0-3]\d)").unwrap());

static PATTERNS: &[DatePattern] = &[DatePattern {
    regex: &RE_WP,
    format: "%Y%m%d",
}];

/// Capture date carried in a file name by cameras that stamp one there.
pub fn guess_date_from_filename(filename: &str) -> Option<NaiveDate> {
    let basename = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    for pat in PATTERNS {
        if let Some(date_str) = pat.regex.captures(basename).and_then(|c| c.name("date")) {
            if let Ok(date) = NaiveDate::parse_from_str(date_str.as_str(), pat.format) {
                return Some(date);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_patterns() {
        assert_eq!(
            guess_date_from_filename("WP_20131228_15_48_42_Pro.jpg"),
            NaiveDate::from_ymd_opt(2013, 12, 28)
        );
        assert_eq!(
            guess_date_from_filename("/phone/WP_20140101_001.mp4"),
            NaiveDate::from_ymd_opt(2014, 1, 1)
        );
        assert!(guess_date_from_filename("IMG_20190509_154733.jpg").is_none());
        assert!(guess_date_from_filename("WP_20131332_x.jpg").is_none());
        assert!(guess_date_from_filename("WP_20130231.jpg").is_none());
    }

    #[test]
    fn test_guess_ignores_directory_names() {
        assert!(guess_date_from_filename("WP_20131228/holiday.jpg").is_none());
    }
}
