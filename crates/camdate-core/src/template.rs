//! File name templates such as `{datetime} - {fn} - {place}`.
//!
//! A template is compiled once and then used both ways: to render a new
//! name from a capture time, base name and place, and to take an existing
//! name apart again so that renaming an already-renamed file is a no-op.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Template used by `--rename` when none is given.
pub const DEFAULT_TEMPLATE: &str = "{datetime} - {fn} - {place}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template is empty")]
    Empty,
    #[error("field opened at byte {0} is never closed")]
    Unclosed(usize),
    #[error("unknown field {{{0}}}")]
    UnknownField(String),
    #[error("{{fn}} may appear only once")]
    DuplicateBaseName,
    #[error("template names a file, not a folder: remove '{0}'")]
    PathSeparator(char),
}

/// Date and time fields, each rendered at a fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    DateTime,
    Date,
    Time,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

static DATETIME_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{4}\.[0-9]{2}\.[0-9]{2} - [0-9]{2}\.[0-9]{2}\.[0-9]{2}$").unwrap()
});
static DATE_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}\.[0-9]{2}\.[0-9]{2}$").unwrap());
static TIME_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{2}\.[0-9]{2}\.[0-9]{2}$").unwrap());
static YEAR_SHAPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{4}$").unwrap());
static TWO_DIGIT_SHAPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{2}$").unwrap());

impl DateField {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "datetime" => DateField::DateTime,
            "date" => DateField::Date,
            "time" => DateField::Time,
            "year" => DateField::Year,
            "month" => DateField::Month,
            "day" => DateField::Day,
            "hour" => DateField::Hour,
            "minute" => DateField::Minute,
            "second" => DateField::Second,
            _ => return None,
        })
    }

    fn format(self) -> &'static str {
        match self {
            DateField::DateTime => "%Y.%m.%d - %H.%M.%S",
            DateField::Date => "%Y.%m.%d",
            DateField::Time => "%H.%M.%S",
            DateField::Year => "%Y",
            DateField::Month => "%m",
            DateField::Day => "%d",
            DateField::Hour => "%H",
            DateField::Minute => "%M",
            DateField::Second => "%S",
        }
    }

    fn shape(self) -> (&'static Regex, usize) {
        match self {
            DateField::DateTime => (&DATETIME_SHAPE, 21),
            DateField::Date => (&DATE_SHAPE, 10),
            DateField::Time => (&TIME_SHAPE, 8),
            DateField::Year => (&YEAR_SHAPE, 4),
            _ => (&TWO_DIGIT_SHAPE, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternPart {
    Literal(String),
    /// The file's original name, without extension.
    BaseName,
    Place,
    Date(DateField),
}

/// How a part recognizes its text at the start of what is left of a name.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    Exact,
    Shape,
    /// Everything up to some occurrence of this text, or everything.
    UntilText(String),
    Rest,
    /// A free-text part followed directly by a date field; its end cannot
    /// be found.
    Unmatchable,
}

/// One way of taking a name apart.
#[derive(Debug, Clone, Copy, Default)]
struct Split<'s> {
    base_name: Option<&'s str>,
    place: Option<&'s str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMatch {
    pub base_name: String,
    pub place: Option<String>,
    /// False when the name did not fit the template, in which case
    /// `base_name` is the whole name.
    pub matched: bool,
}

#[derive(Debug, Clone)]
pub struct PatternTemplate {
    source: String,
    parts: Vec<PatternPart>,
    matchers: Vec<Matcher>,
    extension: Option<String>,
    relax_missing_place: bool,
}

fn is_media_extension(ext: &str) -> bool {
    !ext.is_empty()
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
        && mime_guess::from_ext(ext).first().map_or(false, |mime| {
            mime.type_() == mime_guess::mime::IMAGE || mime.type_() == mime_guess::mime::VIDEO
        })
}

impl PatternTemplate {
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        if source.is_empty() {
            return Err(TemplateError::Empty);
        }
        if let Some(sep) = source.chars().find(|c| *c == '/' || *c == '\\') {
            return Err(TemplateError::PathSeparator(sep));
        }

        let (body, extension) = match source.rfind('.') {
            Some(dot)
                if source[dot..].find('}').is_none() && is_media_extension(&source[dot + 1..]) =>
            {
                (&source[..dot], Some(source[dot..].to_string()))
            }
            _ => (source, None),
        };

        let mut parts = Vec::new();
        let mut rest = body;
        let mut consumed = 0;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                parts.push(PatternPart::Literal(rest[..open].to_string()));
            }
            let close = rest[open..]
                .find('}')
                .map(|i| open + i)
                .ok_or(TemplateError::Unclosed(consumed + open))?;
            let name = &rest[open + 1..close];
            if name.contains('{') {
                return Err(TemplateError::Unclosed(consumed + open));
            }
            let part = match name {
                "fn" => {
                    if parts.contains(&PatternPart::BaseName) {
                        return Err(TemplateError::DuplicateBaseName);
                    }
                    PatternPart::BaseName
                }
                "place" => PatternPart::Place,
                _ => PatternPart::Date(
                    DateField::from_name(name)
                        .ok_or_else(|| TemplateError::UnknownField(name.to_string()))?,
                ),
            };
            parts.push(part);
            consumed += close + 1;
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            parts.push(PatternPart::Literal(rest.to_string()));
        }
        if parts.is_empty() {
            return Err(TemplateError::Empty);
        }

        let matchers = parts
            .iter()
            .enumerate()
            .map(|(i, part)| match part {
                PatternPart::Literal(_) => Matcher::Exact,
                PatternPart::Date(_) => Matcher::Shape,
                PatternPart::BaseName | PatternPart::Place => match parts.get(i + 1) {
                    None => Matcher::Rest,
                    Some(PatternPart::Literal(text)) => Matcher::UntilText(text.clone()),
                    Some(_) => Matcher::Unmatchable,
                },
            })
            .collect();

        Ok(Self {
            source: source.to_string(),
            parts,
            matchers,
            extension,
            relax_missing_place: true,
        })
    }

    /// Whether a name lacking the trailing separator-and-place still counts
    /// as matching. On by default.
    pub fn with_place_relaxation(mut self, relax: bool) -> Self {
        self.relax_missing_place = relax;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn parts(&self) -> &[PatternPart] {
        &self.parts
    }

    /// Extension fixed by the template, including its dot.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Whether the template ends in a separator and `{place}`, after at
    /// least one other part. Such names drop both when the place is empty.
    fn ends_with_separated_place(&self) -> bool {
        self.parts.len() > 2
            && matches!(self.parts.as_slice(), [.., PatternPart::Literal(_), PatternPart::Place])
    }

    /// Lengths the part at `i` may take at the start of `rest`, shortest
    /// first.
    fn candidates(&self, i: usize, rest: &str) -> Vec<usize> {
        match (&self.matchers[i], &self.parts[i]) {
            (Matcher::Exact, PatternPart::Literal(text)) => {
                rest.starts_with(text.as_str()).then_some(text.len()).into_iter().collect()
            }
            (Matcher::Shape, PatternPart::Date(field)) => {
                let (shape, width) = field.shape();
                rest.get(..width)
                    .filter(|head| shape.is_match(head))
                    .map(|_| width)
                    .into_iter()
                    .collect()
            }
            (Matcher::UntilText(text), _) => rest
                .match_indices(text.as_str())
                .map(|(at, _)| at)
                .chain([rest.len()])
                .collect(),
            (Matcher::Rest, _) => vec![rest.len()],
            _ => Vec::new(),
        }
    }

    /// Collects every way the parts from `i` on can cover `rest`.
    fn splits<'s>(&self, i: usize, rest: &'s str, found: Split<'s>, out: &mut Vec<Split<'s>>) {
        if rest.is_empty() {
            let complete = i == self.parts.len();
            let relaxed = self.relax_missing_place
                && i + 2 == self.parts.len()
                && self.ends_with_separated_place();
            if complete || relaxed {
                out.push(found);
            }
            return;
        }
        if i == self.parts.len() {
            return;
        }
        for n in self.candidates(i, rest) {
            let mut next = found;
            match self.parts[i] {
                PatternPart::BaseName => next.base_name = Some(&rest[..n]),
                PatternPart::Place => next.place = Some(&rest[..n]),
                _ => {}
            }
            self.splits(i + 1, &rest[n..], next, out);
        }
    }

    fn best_match(&self, stem: &str, prefer: impl Fn(&Split<'_>) -> bool) -> TemplateMatch {
        let stem: String = stem.nfc().collect();
        let mut found = Vec::new();
        self.splits(0, &stem, Split::default(), &mut found);
        match found.iter().find(|split| prefer(split)).or(found.first()) {
            Some(split) => TemplateMatch {
                base_name: split.base_name.unwrap_or_default().to_string(),
                place: split.place.map(str::to_string),
                matched: true,
            },
            None => TemplateMatch {
                base_name: stem.clone(),
                place: None,
                matched: false,
            },
        }
    }

    /// Splits an extension-less file name into the template's parts. When
    /// the separator after `{fn}` also occurs inside the base name, the
    /// shortest base name wins.
    pub fn match_name(&self, stem: &str) -> TemplateMatch {
        self.best_match(stem, |_| true)
    }

    /// Like [`match_name`](Self::match_name), but prefers the split whose
    /// place equals `place`, empty meaning none. Renaming a file whose base
    /// name contains the separator then gives back the same name.
    pub fn match_name_with_place(&self, stem: &str, place: &str) -> TemplateMatch {
        let place: String = place.nfc().collect();
        self.best_match(stem, |split| split.place.unwrap_or_default() == place)
    }

    /// Renders a file name. `original_ext` (with its dot, possibly empty)
    /// is used when the template fixes no extension. With an empty place,
    /// a trailing separator before `{place}` is left out.
    pub fn generate(
        &self,
        base_name: &str,
        local: NaiveDateTime,
        place: &str,
        original_ext: &str,
    ) -> String {
        let parts = if place.is_empty() && self.ends_with_separated_place() {
            &self.parts[..self.parts.len() - 2]
        } else {
            &self.parts[..]
        };
        let mut name = String::new();
        for part in parts {
            match part {
                PatternPart::Literal(text) => name.push_str(text),
                PatternPart::BaseName => name.push_str(base_name),
                PatternPart::Place => name.push_str(place),
                PatternPart::Date(field) => {
                    name.push_str(&local.format(field.format()).to_string())
                }
            }
        }
        name.push_str(self.extension.as_deref().unwrap_or(original_ext));
        name
    }
}
