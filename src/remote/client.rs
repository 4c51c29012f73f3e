use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::scheduler::JobParams;

const PROGRESS_STEP_BYTES: u64 = 50 * 1024 * 1024;

/// Handle returned by the preparation service for a started unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub dirname: String,
}

/// The remote data-preparation service.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Ask the service to prepare model input for `params`.
    async fn start_processing(&self, params: &JobParams) -> Result<WorkUnit, RemoteError>;

    /// Stream the prepared input for `unit` into `dest`. Returns bytes written.
    async fn download_result(&self, unit: &WorkUnit, dest: &Path) -> Result<u64, RemoteError>;
}

#[derive(Serialize)]
struct ProcessRequest<'a> {
    date: String,
    lake: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// HTTP client for the preparation service.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    http: reqwest::Client,
    base_url: String,
    start_timeout: Duration,
    download_timeout: Duration,
}

impl HttpRemoteClient {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            start_timeout: config.start_timeout,
            download_timeout: config.download_timeout,
        }
    }

    async fn idle_bounded<T>(&self, step: impl Future<Output = T>) -> Result<T, RemoteError> {
        tokio::time::timeout(self.download_timeout, step)
            .await
            .map_err(|_| {
                RemoteError::Transport(format!(
                    "download stalled for {}s",
                    self.download_timeout.as_secs_f64()
                ))
            })
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn start_processing(&self, params: &JobParams) -> Result<WorkUnit, RemoteError> {
        let lake = params.lake.initial().to_string();
        tracing::info!(date = %params.iso_time(), lake = %lake, "Requesting remote data preparation");

        let response = self
            .http
            .post(format!("{}/process", self.base_url))
            .json(&ProcessRequest {
                date: params.time.to_rfc3339(),
                lake: &lake,
            })
            .timeout(self.start_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(RemoteError::Rejected(message));
        }

        Ok(response.json::<WorkUnit>().await?)
    }

    async fn download_result(&self, unit: &WorkUnit, dest: &Path) -> Result<u64, RemoteError> {
        // `download_timeout` bounds each wait on the server, not the whole transfer
        let request = self
            .http
            .get(format!("{}/download/{}", self.base_url, unit.dirname))
            .send();
        let mut response = self.idle_bounded(request).await??;

        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status().as_u16()));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let started = tokio::time::Instant::now();
        let mut downloaded: u64 = 0;
        let mut next_report = PROGRESS_STEP_BYTES;

        while let Some(chunk) = self.idle_bounded(response.chunk()).await?? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if downloaded >= next_report {
                let elapsed = started.elapsed().as_secs_f64();
                let mb = downloaded as f64 / (1024.0 * 1024.0);
                let speed = if elapsed > 0.0 { mb / elapsed } else { 0.0 };
                tracing::info!(
                    "Downloaded {:.1} MB in {:.1}s ({:.1} MB/s)",
                    mb,
                    elapsed,
                    speed
                );
                next_report += PROGRESS_STEP_BYTES;
            }
        }
        file.flush().await?;

        tracing::info!(path = %dest.display(), bytes = downloaded, "Downloaded prepared input");
        Ok(downloaded)
    }
}
