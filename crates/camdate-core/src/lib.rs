pub mod cursor;
pub mod date;
pub mod media;
pub mod metadata;
pub mod place;
pub mod rewrite;
pub mod template;
pub mod writer;

use std::fmt;
use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDateTime, TimeDelta};
use log::{debug, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::date::DISPLAY_FORMAT;
use crate::media::Media;
use crate::metadata::{Container, GpsCoordinates, Resolution, TimeSource};
use crate::place::PlaceResolver;
use crate::rewrite::RewriteOutcome;
use crate::template::PatternTemplate;
use crate::writer::RenameOutcome;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessOptions {
    pub files: Vec<PathBuf>,
    /// Rename template; files keep their names when absent.
    pub template: Option<String>,
    /// Offset added to every capture time, in seconds.
    pub offset_seconds: i64,
    /// Report offsets and new names without changing any file.
    pub dry_run: bool,
}

impl ProcessOptions {
    pub fn offset(&self) -> anyhow::Result<Option<TimeDelta>> {
        if self.offset_seconds == 0 {
            return Ok(None);
        }
        TimeDelta::try_seconds(self.offset_seconds)
            .map(Some)
            .with_context(|| {
                format!("offset of {} seconds is out of range", self.offset_seconds)
            })
    }
}

/// What happened to one resolved file.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedFile {
    /// Name the file had before any rename
    pub file: String,
    pub container: Container,
    pub source: TimeSource,
    /// Capture time as stored, after any offset
    pub time: String,
    pub mode: &'static str,
    pub local_time: NaiveDateTime,
    /// Wall-clock time before the offset was applied
    pub corrected_from: Option<NaiveDateTime>,
    pub gps: Option<GpsCoordinates>,
    pub place: Option<String>,
    pub rewrite: Option<RewriteOutcome>,
    pub rename: Option<RenameOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FileReport {
    /// Not a recognized photo or video container.
    Unrecognized { file: String },
    Error { file: String, message: String },
    Processed(ProcessedFile),
}

impl fmt::Display for ProcessedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\": {}", self.file, self.local_time.format(DISPLAY_FORMAT))?;
        if let Some(previous) = self.corrected_from {
            write!(f, ", corrected from {}", previous.format(DISPLAY_FORMAT))?;
        }
        if let Some(outcome) = &self.rewrite {
            match outcome {
                RewriteOutcome::Applied { .. } => {}
                other => write!(f, ", offset {other}")?,
            }
        }
        if let Some(rename) = &self.rename {
            write!(f, ", {rename}")?;
        }
        Ok(())
    }
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileReport::Unrecognized { file } => {
                write!(f, "\"{file}\": not a recognized photo or video")
            }
            FileReport::Error { file, message } => write!(f, "\"{file}\": {message}"),
            FileReport::Processed(processed) => processed.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessResult {
    pub total: u64,
    pub processed: u64,
    pub unrecognized: u64,
    pub errors: u64,
    pub rewritten: u64,
    pub renamed: u64,
}

/// Type alias for the per-file report callback
pub type ReportCallback<'a> = dyn Fn(&FileReport) + Send + Sync + 'a;

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Run the pipeline: resolve every file's capture time, then per file look
/// up its place, apply the offset and rename it.
///
/// Resolution runs in parallel and only reads. Rewrites and renames happen
/// one file at a time, in input order. Per-file problems are reported
/// through `report`; only invalid options fail the whole run.
pub fn process(
    options: &ProcessOptions,
    places: &(dyn PlaceResolver + Sync),
    report: &ReportCallback<'_>,
) -> anyhow::Result<ProcessResult> {
    let template = options
        .template
        .as_deref()
        .map(PatternTemplate::compile)
        .transpose()
        .context("invalid rename template")?;
    let delta = options.offset()?;

    let resolutions: Vec<_> = options
        .files
        .par_iter()
        .map(|path| metadata::resolve(path))
        .collect();

    let mut result = ProcessResult {
        total: options.files.len() as u64,
        ..ProcessResult::default()
    };
    for (path, resolution) in options.files.iter().zip(resolutions) {
        let file = display_name(path);
        let info = match resolution {
            Ok(Resolution::Resolved(info)) => info,
            Ok(Resolution::Unrecognized) => {
                debug!("{}: unrecognized container, skipping", path.display());
                result.unrecognized += 1;
                report(&FileReport::Unrecognized { file });
                continue;
            }
            Err(e) => {
                result.errors += 1;
                report(&FileReport::Error {
                    file,
                    message: format!("{e:#}"),
                });
                continue;
            }
        };

        let mut media = Media::new(path.clone(), info);
        if let Some(gps) = media.info.gps {
            if let Some(place) = places.resolve(&gps, media.info.time.approximate_utc()) {
                media.set_place(place);
            }
        }

        let mut corrected_from = None;
        let rewrite = delta.map(|delta| {
            let outcome = apply_offset(&media, delta, options.dry_run);
            let previous = media.local_time;
            let moved = media.info.plan.moves_time(&outcome);
            if moved && media.shift(delta) {
                corrected_from = Some(previous);
            } else if outcome.changed_time() {
                warn!("{file}: the field holding the capture time was not shifted");
            }
            match &outcome {
                RewriteOutcome::Applied { .. } => {}
                other => warn!("{file}: {other}"),
            }
            outcome
        });
        if rewrite.as_ref().is_some_and(RewriteOutcome::changed_time) && !options.dry_run {
            result.rewritten += 1;
        }

        let rename = template
            .as_ref()
            .map(|template| writer::rename_media(&mut media, template, options.dry_run));
        if matches!(rename, Some(RenameOutcome::Renamed(_))) {
            result.renamed += 1;
        }

        result.processed += 1;
        report(&FileReport::Processed(ProcessedFile {
            file,
            container: media.info.container,
            source: media.info.source,
            time: media.info.time.to_string(),
            mode: media.info.time.mode(),
            local_time: media.local_time,
            corrected_from,
            gps: media.info.gps,
            place: media.place.as_ref().map(|p| p.name.clone()),
            rewrite,
            rename,
        }));
    }
    Ok(result)
}

/// Applies the offset through the file's rewrite plan, opening the file for
/// writing only for this step.
fn apply_offset(media: &Media, delta: TimeDelta, dry_run: bool) -> RewriteOutcome {
    if dry_run || media.info.plan.is_read_only() {
        return media.info.plan.preview(delta);
    }
    match OpenOptions::new().read(true).write(true).open(&media.path) {
        Ok(mut file) => media.info.plan.apply(&mut file, delta),
        Err(e) => RewriteOutcome::Failed {
            reason: format!("opening for writing: {e}"),
        },
    }
}
