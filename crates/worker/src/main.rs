//! `comfyjob-worker` -- runs one ComfyUI job and prints its result.
//!
//! Reads a job envelope (`{"id": ..., "input": {...}}`) from the file named
//! by the first argument, or from stdin when no argument is given. The
//! result document goes to stdout; logs go to stderr.
//!
//! Configuration comes from the environment (see
//! [`WorkerConfig::from_env`]). Set `LOG_FORMAT=json` for JSON logs.

use std::path::PathBuf;
use std::sync::Arc;

use comfyjob_cloud::s3::S3ObjectStore;
use comfyjob_cloud::store::ObjectStore;
use comfyjob_core::config::WorkerConfig;
use comfyjob_core::error::JobError;
use comfyjob_core::input::{InputError, Job};
use comfyjob_core::response::JobResponse;
use comfyjob_pipeline::runner::JobRunner;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str =
    "comfyjob_worker=info,comfyjob_pipeline=info,comfyjob_comfyui=info,comfyjob_cloud=info";

#[derive(Debug, thiserror::Error)]
enum ReadJobError {
    #[error("Failed to read job from {source_name}: {error}")]
    Io {
        source_name: String,
        error: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid worker configuration");
        std::process::exit(1);
    });
    let refresh_worker = config.refresh_worker;

    let store = match &config.storage {
        Some(storage) => match S3ObjectStore::from_config(storage).await {
            Ok(store) => {
                tracing::info!(endpoint = %storage.endpoint_url, "Object storage enabled");
                Some(Arc::new(store) as Arc<dyn ObjectStore>)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialise object storage");
                std::process::exit(1);
            }
        },
        None => None,
    };

    let runner = JobRunner::new(config, store);
    let config = runner.config();
    tracing::info!(
        comfy_host = %config.comfy_host,
        output_dir = %config.output_dir.display(),
        completion_policy = config.completion_policy.as_str(),
        storage = config.storage_enabled(),
        "Starting comfyjob-worker",
    );

    let response = match read_job(std::env::args_os().nth(1).map(PathBuf::from)).await {
        Ok(job) => {
            tracing::info!(job_id = %job.id, "Job received");
            runner.handle(&job).await
        }
        Err(ReadJobError::Parse(e)) => {
            tracing::error!(error = %e, "Job envelope is not valid JSON");
            JobError::InvalidInput(InputError::InvalidFormat(e)).into_response(refresh_worker)
        }
        Err(e) => {
            tracing::error!(error = %e, "Could not read job");
            std::process::exit(1);
        }
    };

    tracing::info!(
        success = response.is_success(),
        refresh_worker = response.refresh_worker(),
        "Writing result",
    );
    print_response(&response);
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn read_job(path: Option<PathBuf>) -> Result<Job, ReadJobError> {
    let raw = match &path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|error| ReadJobError::Io {
                source_name: path.display().to_string(),
                error,
            })?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .map_err(|error| ReadJobError::Io {
                    source_name: "stdin".into(),
                    error,
                })?;
            raw
        }
    };

    Ok(serde_json::from_str(&raw)?)
}

fn print_response(response: &JobResponse) {
    match serde_json::to_string(response) {
        Ok(body) => println!("{body}"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize result");
            std::process::exit(1);
        }
    }
}
