use std::fs;
use std::fmt;

use log::{debug, info};
use serde::Serialize;

use crate::media::Media;
use crate::template::PatternTemplate;

/// Result of the rename step for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "name", rename_all = "snake_case")]
pub enum RenameOutcome {
    Renamed(String),
    /// The file already carries the generated name.
    Unchanged,
    /// Another file already has the generated name; nothing was moved.
    AlreadyExists(String),
    /// Dry run: the name the file would get.
    WouldRename(String),
    Failed(String),
}

impl fmt::Display for RenameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenameOutcome::Renamed(name) => write!(f, "renamed to \"{name}\""),
            RenameOutcome::Unchanged => write!(f, "already named"),
            RenameOutcome::AlreadyExists(name) => write!(f, "\"{name}\" already exists"),
            RenameOutcome::WouldRename(name) => write!(f, "would rename to \"{name}\""),
            RenameOutcome::Failed(reason) => write!(f, "rename failed: {reason}"),
        }
    }
}

/// The name `template` gives `media`. The current name is first matched
/// against the template so that an earlier rename is not nested.
pub fn planned_name(media: &Media, template: &PatternTemplate) -> String {
    let found = template.match_name_with_place(&media.stem(), media.place_name());
    if found.matched {
        debug!(
            "{}: already follows the template, base name \"{}\"",
            media.filename, found.base_name
        );
    }
    template.generate(
        &found.base_name,
        media.local_time,
        media.place_name(),
        &media.extension(),
    )
}

/// Renames the file in its own folder. Never overwrites another file.
pub fn rename_media(media: &mut Media, template: &PatternTemplate, dry_run: bool) -> RenameOutcome {
    let new_name = planned_name(media, template);
    if new_name == media.filename {
        return RenameOutcome::Unchanged;
    }
    let target = media.path.with_file_name(&new_name);
    if target.exists() {
        return RenameOutcome::AlreadyExists(new_name);
    }
    if dry_run {
        return RenameOutcome::WouldRename(new_name);
    }
    match fs::rename(&media.path, &target) {
        Ok(()) => {
            info!("{} -> {}", media.filename, new_name);
            media.path = target;
            media.filename = new_name.clone();
            RenameOutcome::Renamed(new_name)
        }
        Err(e) => RenameOutcome::Failed(e.to_string()),
    }
}
