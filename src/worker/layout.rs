use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::scheduler::JobParams;

/// Output directory chosen for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub folder_name: String,
    pub path: PathBuf,
}

/// Decides where a run writes its artifacts.
///
/// Called by the worker before the execution unit starts, outside the
/// per-run failure boundary.
pub trait OutputLayout: Send + Sync {
    fn resolve(&self, params: &JobParams) -> std::io::Result<OutputTarget>;
}

/// Deterministic `<data_dir>/<run_name>` with an age-based collision policy.
///
/// - no directory: use it
/// - directory older than the collision window: orphan of an aborted run,
///   remove it and reuse the name
/// - younger: somebody may still be looking at it, so suffix the name with
///   `_<unix seconds mod 10000>`
///
/// The suffix can still collide for two submissions of the same run within
/// one second; the output namespace is best-effort.
#[derive(Debug, Clone)]
pub struct CollisionAwareLayout {
    data_dir: PathBuf,
    collision_window: Duration,
}

impl CollisionAwareLayout {
    pub fn new(data_dir: impl Into<PathBuf>, collision_window: Duration) -> Self {
        Self {
            data_dir: data_dir.into(),
            collision_window,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Age of an existing path, by creation time where the filesystem has it.
fn path_age(path: &Path) -> std::io::Result<Duration> {
    let meta = std::fs::metadata(path)?;
    let born = meta.created().or_else(|_| meta.modified())?;
    Ok(SystemTime::now().duration_since(born).unwrap_or_default())
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

impl OutputLayout for CollisionAwareLayout {
    fn resolve(&self, params: &JobParams) -> std::io::Result<OutputTarget> {
        let name = params.run_name();
        let path = self.data_dir.join(&name);

        let age = match path_age(&path) {
            Ok(age) => age,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(OutputTarget {
                    folder_name: name,
                    path,
                })
            }
            Err(e) => return Err(e),
        };

        if age > self.collision_window {
            tracing::info!(
                path = %path.display(),
                age_minutes = age.as_secs() / 60,
                "Removing old output directory"
            );
            if let Err(e) = remove_path(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove old output directory");
            }
            return Ok(OutputTarget {
                folder_name: name,
                path,
            });
        }

        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            % 10_000;
        let folder_name = format!("{}_{}", name, suffix);
        let path = self.data_dir.join(&folder_name);
        tracing::info!(
            age_minutes = age.as_secs() / 60,
            path = %path.display(),
            "Recent output directory exists, using alternative path"
        );
        Ok(OutputTarget { folder_name, path })
    }
}
