use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tokio_util::sync::CancellationToken;

/// Empties the data directory once a day at a fixed UTC hour.
#[derive(Debug, Clone)]
pub struct DataJanitor {
    data_dir: PathBuf,
    hour_utc: u32,
}

impl DataJanitor {
    pub fn new(data_dir: impl Into<PathBuf>, hour_utc: u32) -> Self {
        Self {
            data_dir: data_dir.into(),
            hour_utc: hour_utc.min(23),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(hour_utc = self.hour_utc, "Daily data cleanup scheduled");
        loop {
            let now = Utc::now();
            let next = next_run_after(now, self.hour_utc);
            let wait = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    tracing::info!(dir = %self.data_dir.display(), "Executing scheduled data cleanup");
                    let removed = clean_data_dir(&self.data_dir).await;
                    tracing::info!(removed, "Data directory cleanup complete");
                }
            }
        }
    }
}

/// First `hour:00` UTC strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or_default();
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Remove every entry under `dir`. Returns how many entries went away.
pub async fn clean_data_dir(dir: &Path) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "Nothing to clean");
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to list data directory");
                break;
            }
        };
        let path = entry.path();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        let result = if is_dir {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Error removing entry"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_run_is_later_today_or_tomorrow() {
        let before = Utc.with_ymd_and_hms(2024, 1, 15, 4, 30, 0).unwrap();
        assert_eq!(
            next_run_after(before, 6),
            Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap()
        );

        let after = Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap();
        assert_eq!(
            next_run_after(after, 6),
            Utc.with_ymd_and_hms(2024, 1, 16, 6, 0, 0).unwrap()
        );

        let exactly = Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap();
        assert_eq!(
            next_run_after(exactly, 6),
            Utc.with_ymd_and_hms(2024, 1, 16, 6, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn clean_removes_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("20240115_06e")).unwrap();
        std::fs::write(dir.path().join("20240115_06e/out.nc"), b"x").unwrap();
        std::fs::write(dir.path().join("stray.tmp"), b"y").unwrap();

        assert_eq!(clean_data_dir(dir.path()).await, 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        // The directory itself stays
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn clean_missing_directory_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(clean_data_dir(&dir.path().join("absent")).await, 0);
    }
}
