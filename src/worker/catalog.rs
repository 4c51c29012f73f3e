use std::io::ErrorKind;
use std::path::Path;
use std::time::UNIX_EPOCH;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::scheduler::job::{Lake, DATE_FORMAT};

/// File a finished model run leaves in its output directory.
pub const OUTPUT_FILE: &str = "out.nc";

/// A finished output folder available for download.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactEntry {
    pub folder: String,
    pub date: String,
    pub lake: String,
    /// Seconds since the epoch the folder was created (or last modified).
    pub ctime: f64,
}

/// Output folders under `data_dir` that hold a model output, newest first.
///
/// Folders whose name is not a `<YYYYMMDD_HH><lake initial>` run name are
/// skipped, which also skips suffixed collision folders.
pub fn list_artifacts(data_dir: &Path) -> std::io::Result<Vec<ArtifactEntry>> {
    let entries = match std::fs::read_dir(data_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() || !path.join(OUTPUT_FILE).exists() {
            continue;
        }
        let Some(folder) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let Some((date, lake)) = parse_folder_name(&folder) else {
            continue;
        };
        let ctime = entry
            .metadata()
            .and_then(|m| m.created().or_else(|_| m.modified()))
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        found.push(ArtifactEntry {
            folder,
            date,
            lake: capitalize(lake.name()),
            ctime,
        });
    }

    found.sort_by(|a, b| b.ctime.total_cmp(&a.ctime));
    Ok(found)
}

fn parse_folder_name(folder: &str) -> Option<(String, Lake)> {
    if folder.len() != 12 || !folder.is_ascii() {
        return None;
    }
    let (stamp, initial) = folder.split_at(11);
    let lake = Lake::from_initial(initial.chars().next()?)?;
    // Minutes are not part of the folder name
    let time = NaiveDateTime::parse_from_str(&format!("{}00", stamp), "%Y%m%d_%H%M").ok()?;
    Some((time.format(DATE_FORMAT).to_string(), lake))
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
