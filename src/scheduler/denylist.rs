use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::scheduler::job::JobParams;

/// Lake/hour combinations known to be impossible to run.
pub trait Denylist: Send + Sync {
    fn is_denied(&self, params: &JobParams) -> bool;
}

/// Rejection text shown to callers for a denied combination.
pub fn denied_message(params: &JobParams) -> String {
    format!(
        "The requested date ({} UTC) has missing data for {} and cannot be processed.",
        params.date_label(),
        params.lake
    )
}

/// Run names with missing upstream data, one per line.
///
/// The file is re-read on every check so operators can edit it without a
/// restart. A missing file denies nothing.
#[derive(Debug, Clone)]
pub struct MissingDataList {
    path: PathBuf,
}

impl MissingDataList {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> HashSet<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read missing-data list");
                HashSet::new()
            }
        }
    }
}

impl Denylist for MissingDataList {
    fn is_denied(&self, params: &JobParams) -> bool {
        self.load().contains(&params.run_name())
    }
}

/// Fixed set of run names, mostly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticDenylist {
    names: HashSet<String>,
}

impl StaticDenylist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Denylist for StaticDenylist {
    fn is_denied(&self, params: &JobParams) -> bool {
        self.names.contains(&params.run_name())
    }
}
