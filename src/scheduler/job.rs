use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnowcastError};

/// Input format for the requested model hour, always UTC.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    // Existing clients poll for "error", not "failed".
    #[serde(rename = "error")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lake {
    Erie,
    Michigan,
    Ontario,
    Superior,
}

impl Lake {
    pub const ALL: [Lake; 4] = [Lake::Erie, Lake::Michigan, Lake::Ontario, Lake::Superior];

    pub fn name(self) -> &'static str {
        match self {
            Lake::Erie => "erie",
            Lake::Michigan => "michigan",
            Lake::Ontario => "ontario",
            Lake::Superior => "superior",
        }
    }

    /// Single-letter code used in run names and by the preparation service.
    pub fn initial(self) -> char {
        match self {
            Lake::Erie => 'e',
            Lake::Michigan => 'm',
            Lake::Ontario => 'o',
            Lake::Superior => 's',
        }
    }

    pub fn from_initial(c: char) -> Option<Lake> {
        Lake::ALL.into_iter().find(|lake| lake.initial() == c)
    }
}

impl fmt::Display for Lake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Lake {
    type Err = SnowcastError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Lake::ALL
            .into_iter()
            .find(|lake| lake.name() == wanted)
            .ok_or_else(|| SnowcastError::Validation(format!("Unknown lake: {}", s.trim())))
    }
}

/// Immutable parameters of one model run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParams {
    pub lake: Lake,
    pub time: DateTime<Utc>,
}

impl JobParams {
    pub fn new(lake: Lake, time: DateTime<Utc>) -> Self {
        Self { lake, time }
    }

    /// Validate raw submission fields.
    pub fn parse(lake: &str, date: &str) -> Result<Self> {
        if lake.trim().is_empty() || date.trim().is_empty() {
            return Err(SnowcastError::Validation(
                "Missing required parameters".to_string(),
            ));
        }
        let lake: Lake = lake.parse()?;
        let invalid = |detail: String| {
            SnowcastError::Validation(format!(
                "Invalid date '{}', expected YYYY-MM-DD HH:00 ({})",
                date.trim(),
                detail
            ))
        };
        // chrono needs a minute field to build a time, so parse it and insist on :00
        let naive = NaiveDateTime::parse_from_str(date.trim(), "%Y-%m-%d %H:%M")
            .map_err(|e| invalid(e.to_string()))?;
        if naive.minute() != 0 {
            return Err(invalid("runs are hourly".to_string()));
        }
        Ok(Self::new(lake, Utc.from_utc_datetime(&naive)))
    }

    /// Deterministic output name: hour bucket plus lake initial, e.g. `20240115_06e`.
    pub fn run_name(&self) -> String {
        format!("{}{}", self.time.format("%Y%m%d_%H"), self.lake.initial())
    }

    pub fn iso_time(&self) -> String {
        self.time.format("%Y-%m-%dT%H:%M:00Z").to_string()
    }

    /// The hour as clients submitted it.
    pub fn date_label(&self) -> String {
        self.time.format(DATE_FORMAT).to_string()
    }
}

/// Where a finished run left its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub folder_name: String,
    pub data_path: String,
}

impl ArtifactLocation {
    pub fn for_folder(folder_name: impl Into<String>) -> Self {
        let folder_name = folder_name.into();
        Self {
            data_path: format!("data/{}/", folder_name),
            folder_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Completed(ArtifactLocation),
    Failed { message: String },
}

/// Attempted a status change the lifecycle does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot move run from {} to {}", self.from, self.to)
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub params: JobParams,
    /// Queue depth seen at submission. Never recomputed.
    pub queue_position: usize,
    pub result: Option<JobResult>,
}

impl JobRecord {
    pub fn new(id: String, params: JobParams, queue_position: usize) -> Self {
        Self::with_submitted_at(id, params, queue_position, Utc::now())
    }

    pub fn with_submitted_at(
        id: String,
        params: JobParams,
        queue_position: usize,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            submitted_at,
            params,
            queue_position,
            result: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Queued -> Processing`.
    pub fn start(&mut self) -> std::result::Result<(), InvalidTransition> {
        if self.status != JobStatus::Queued {
            return Err(InvalidTransition {
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        self.status = JobStatus::Processing;
        Ok(())
    }

    /// `Processing -> Completed | Failed`, setting the result once.
    pub fn finish(&mut self, result: JobResult) -> std::result::Result<(), InvalidTransition> {
        let to = match result {
            JobResult::Completed(_) => JobStatus::Completed,
            JobResult::Failed { .. } => JobStatus::Failed,
        };
        if self.status != JobStatus::Processing {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.result = Some(result);
        Ok(())
    }
}
