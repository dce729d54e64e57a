//! Worker configuration loaded once at process start.
//!
//! [`WorkerConfig`] is built from environment variables by the binary and
//! then passed by reference into every component. Nothing else in the
//! workspace reads the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Host (and port) where ComfyUI listens.
pub const DEFAULT_COMFY_HOST: &str = "127.0.0.1:8188";

/// Directory where ComfyUI writes generated files.
pub const DEFAULT_OUTPUT_PATH: &str = "/comfyui/output";

/// Delay between readiness probes.
pub const DEFAULT_READINESS_INTERVAL_MS: u64 = 50;

/// Readiness probes before the backend is declared unreachable.
pub const DEFAULT_READINESS_MAX_ATTEMPTS: u32 = 1200;

/// Delay between history polls.
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 250;

/// History polls before the job is declared timed out.
pub const DEFAULT_POLLING_MAX_ATTEMPTS: u32 = 500;

/// Region used for the object store when none is configured.
pub const DEFAULT_BUCKET_REGION: &str = "us-east-1";

// ---------------------------------------------------------------------------
// Retry budget
// ---------------------------------------------------------------------------

/// Fixed attempt count with a fixed sleep between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryBudget {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Upper bound on the time spent sleeping while the budget is consumed.
    pub fn total_wait(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

// ---------------------------------------------------------------------------
// Completion policy
// ---------------------------------------------------------------------------

/// Predicate deciding when a history record describes a finished job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// The record has at least one node output.
    #[default]
    OutputsPresent,
    /// Every workflow node has a timing entry.
    AllNodesTimed,
}

impl CompletionPolicy {
    /// Evaluate the predicate against the counts taken from an existing
    /// history record.
    pub fn is_satisfied(&self, output_count: usize, timing_count: usize, node_count: usize) -> bool {
        match self {
            Self::OutputsPresent => output_count > 0,
            Self::AllNodesTimed => node_count > 0 && timing_count == node_count,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutputsPresent => "outputs",
            Self::AllNodesTimed => "timings",
        }
    }
}

impl FromStr for CompletionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outputs" => Ok(Self::OutputsPresent),
            "timings" => Ok(Self::AllNodesTimed),
            other => Err(ConfigError::Invalid {
                key: "COMFY_COMPLETION_POLICY",
                value: other.to_string(),
                expected: "one of: outputs, timings",
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Settings for the S3-compatible bucket that receives artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Bucket endpoint, e.g. `https://my-bucket.s3.us-east-1.amazonaws.com`.
    pub endpoint_url: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Explicit bucket name; derived from the endpoint host when `None`.
    pub bucket_name: Option<String>,
    pub region: String,
}

// ---------------------------------------------------------------------------
// Worker configuration
// ---------------------------------------------------------------------------

/// Process-wide settings for the job worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// `host:port` of the ComfyUI server.
    pub comfy_host: String,
    /// Root of the ComfyUI output directory.
    pub output_dir: PathBuf,
    /// Budget for waiting until ComfyUI accepts requests.
    pub readiness: RetryBudget,
    /// Budget for waiting until a submitted job finishes.
    pub completion: RetryBudget,
    pub completion_policy: CompletionPolicy,
    /// Run the WebSocket progress monitor alongside polling.
    pub progress_monitor: bool,
    /// Emit the per-node execution report and per-message monitor logs.
    pub detailed_logging: bool,
    /// Ask the caller to recycle the worker after each job.
    pub refresh_worker: bool,
    /// Object storage; artifacts are returned inline as base64 when `None`.
    pub storage: Option<StorageConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            comfy_host: DEFAULT_COMFY_HOST.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_PATH),
            readiness: RetryBudget::new(
                DEFAULT_READINESS_MAX_ATTEMPTS,
                Duration::from_millis(DEFAULT_READINESS_INTERVAL_MS),
            ),
            completion: RetryBudget::new(
                DEFAULT_POLLING_MAX_ATTEMPTS,
                Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            ),
            completion_policy: CompletionPolicy::default(),
            progress_monitor: true,
            detailed_logging: true,
            refresh_worker: false,
            storage: None,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default           |
    /// |-----------------------------------|-------------------|
    /// | `COMFY_HOST`                      | `127.0.0.1:8188`  |
    /// | `COMFY_OUTPUT_PATH`               | `/comfyui/output` |
    /// | `COMFY_API_AVAILABLE_INTERVAL_MS` | `50`              |
    /// | `COMFY_API_AVAILABLE_MAX_RETRIES` | `1200`            |
    /// | `COMFY_POLLING_INTERVAL_MS`       | `250`             |
    /// | `COMFY_POLLING_MAX_RETRIES`       | `500`             |
    /// | `COMFY_COMPLETION_POLICY`         | `outputs`         |
    /// | `COMFY_PROGRESS_MONITOR`          | `true`            |
    /// | `DETAILED_COMFY_LOGGING`          | `true`            |
    /// | `REFRESH_WORKER`                  | `false`           |
    /// | `BUCKET_ENDPOINT_URL`             | unset             |
    /// | `BUCKET_ACCESS_KEY_ID`            | unset             |
    /// | `BUCKET_SECRET_ACCESS_KEY`        | unset             |
    /// | `BUCKET_NAME`                     | endpoint host     |
    /// | `BUCKET_REGION`                   | `us-east-1`       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let readiness = RetryBudget::new(
            parse_or(&get, "COMFY_API_AVAILABLE_MAX_RETRIES", defaults.readiness.max_attempts)?,
            Duration::from_millis(parse_or(
                &get,
                "COMFY_API_AVAILABLE_INTERVAL_MS",
                DEFAULT_READINESS_INTERVAL_MS,
            )?),
        );

        let completion = RetryBudget::new(
            parse_or(&get, "COMFY_POLLING_MAX_RETRIES", defaults.completion.max_attempts)?,
            Duration::from_millis(parse_or(
                &get,
                "COMFY_POLLING_INTERVAL_MS",
                DEFAULT_POLLING_INTERVAL_MS,
            )?),
        );

        let completion_policy = match get("COMFY_COMPLETION_POLICY") {
            Some(raw) => raw.parse()?,
            None => defaults.completion_policy,
        };

        let storage = get("BUCKET_ENDPOINT_URL").map(|endpoint_url| StorageConfig {
            endpoint_url,
            access_key_id: get("BUCKET_ACCESS_KEY_ID"),
            secret_access_key: get("BUCKET_SECRET_ACCESS_KEY"),
            bucket_name: get("BUCKET_NAME"),
            region: get("BUCKET_REGION").unwrap_or_else(|| DEFAULT_BUCKET_REGION.to_string()),
        });

        Ok(Self {
            comfy_host: get("COMFY_HOST").unwrap_or(defaults.comfy_host),
            output_dir: get("COMFY_OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            readiness,
            completion,
            completion_policy,
            progress_monitor: flag_or(&get, "COMFY_PROGRESS_MONITOR", defaults.progress_monitor)?,
            detailed_logging: flag_or(&get, "DETAILED_COMFY_LOGGING", defaults.detailed_logging)?,
            refresh_worker: flag_or(&get, "REFRESH_WORKER", defaults.refresh_worker)?,
            storage,
        })
    }

    /// HTTP base URL of the ComfyUI server, e.g. `http://127.0.0.1:8188`.
    pub fn api_url(&self) -> String {
        format!("http://{}", self.comfy_host)
    }

    /// WebSocket base URL of the ComfyUI server.
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.comfy_host)
    }

    pub fn storage_enabled(&self) -> bool {
        self.storage.is_some()
    }
}

fn parse_or<F, T>(get: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
            expected: "a non-negative integer",
        }),
        None => Ok(default),
    }
}

fn flag_or<F>(get: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value: raw,
                expected: "true or false",
            }),
        },
        None => Ok(default),
    }
}

/// Errors raised while reading the worker configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: expected {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
