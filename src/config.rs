use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// How long bookkeeping and on-disk artifacts are kept around.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Delay between a run reaching a terminal state and its record being removed.
    pub terminal_grace: Duration,
    /// How often the global sweep walks every record.
    pub sweep_interval: Duration,
    /// Terminal records older than this (from submission) are swept.
    pub terminal_ttl: Duration,
    /// Any record older than this is swept, whatever its status.
    pub hard_ttl: Duration,
    /// An existing output directory younger than this is treated as live.
    pub collision_window: Duration,
    /// UTC hour at which the data directory is emptied. `None` disables it.
    pub janitor_hour_utc: Option<u32>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            terminal_grace: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            terminal_ttl: Duration::from_secs(24 * 60 * 60),
            hard_ttl: Duration::from_secs(72 * 60 * 60),
            collision_window: Duration::from_secs(30 * 60),
            janitor_hour_utc: Some(6),
        }
    }
}

/// Retry budget for the remote data-preparation call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Wait before the second attempt; doubled after every further failure.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

/// Remote data-preparation service endpoint.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub start_timeout: Duration,
    /// Longest wait for response headers or the next body chunk.
    pub download_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5001".to_string(),
            start_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(300),
        }
    }
}

/// External model process invoked once the input data is in place.
///
/// The process receives `--input`, `--output`, `--lake`, `--time` and
/// `--device` after `args`.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub program: String,
    pub args: Vec<String>,
    pub device: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["run_model.py".to_string()],
            device: "cpu".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    /// Number of workers, and so the ceiling on runs in `processing`.
    pub max_concurrent_runs: usize,
    pub data_dir: PathBuf,
    /// Newline-separated run names with known-missing input data.
    pub missing_list: PathBuf,
    pub supervisor_interval: Duration,
    pub status_log_interval: Duration,
    pub retention: RetentionConfig,
    pub retry: RetryConfig,
    pub remote: RemoteConfig,
    pub model: ModelConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "0.0.0.0:5000"
                .parse()
                .expect("default listen address is valid"),
            max_concurrent_runs: 1,
            data_dir: PathBuf::from("data"),
            missing_list: PathBuf::from("splits/missing.txt"),
            supervisor_interval: Duration::from_secs(60),
            status_log_interval: Duration::from_secs(5 * 60),
            retention: RetentionConfig::default(),
            retry: RetryConfig::default(),
            remote: RemoteConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn new(listen_addr: SocketAddr, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr,
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.max_concurrent_runs = workers.max(1);
        self
    }

    pub fn with_remote_url(mut self, base_url: impl Into<String>) -> Self {
        self.remote.base_url = base_url.into();
        self
    }

    pub fn with_missing_list(mut self, path: impl Into<PathBuf>) -> Self {
        self.missing_list = path.into();
        self
    }

    pub fn with_supervisor_interval(mut self, interval: Duration) -> Self {
        self.supervisor_interval = interval;
        self
    }
}
