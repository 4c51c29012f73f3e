use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::ModelConfig;
use crate::error::ExecutionError;
use crate::remote::RetryingClient;
use crate::scheduler::denylist::{denied_message, Denylist};
use crate::scheduler::{ArtifactLocation, JobParams};
use crate::worker::layout::OutputTarget;

/// One model run, from parameters to an artifact on disk.
///
/// Implementations report failures through [`ExecutionError`] kinds; the
/// worker turns those into the terminal status a caller sees.
#[async_trait]
pub trait ExecutionUnit: Send + Sync {
    async fn execute(
        &self,
        params: &JobParams,
        target: &OutputTarget,
    ) -> Result<ArtifactLocation, ExecutionError>;
}

/// Fetches prepared input from the remote service and runs the model
/// process against it.
///
/// The model is invoked as
/// `<program> <args..> --input <file> --output <dir> --lake <name> --time <iso> --device <dev>`
/// and is expected to leave its artifacts in the output directory.
#[derive(Clone)]
pub struct InferenceExecutor {
    remote: RetryingClient,
    model: ModelConfig,
    denylist: Arc<dyn Denylist>,
}

impl InferenceExecutor {
    pub fn new(remote: RetryingClient, model: ModelConfig, denylist: Arc<dyn Denylist>) -> Self {
        Self {
            remote,
            model,
            denylist,
        }
    }

    async fn run(&self, params: &JobParams, target: &OutputTarget) -> Result<(), ExecutionError> {
        tokio::fs::create_dir_all(&target.path)
            .await
            .map_err(ExecutionError::internal)?;

        let input = target.path.join(format!("{}_in.nc", params.run_name()));
        self.remote.fetch(params, &input).await?;

        self.run_model(params, &input, &target.path).await?;

        if let Err(e) = tokio::fs::remove_file(&input).await {
            tracing::debug!(path = %input.display(), error = %e, "Could not remove model input");
        }
        Ok(())
    }

    async fn run_model(
        &self,
        params: &JobParams,
        input: &Path,
        output_dir: &Path,
    ) -> Result<(), ExecutionError> {
        tracing::info!(
            program = %self.model.program,
            run_name = %params.run_name(),
            device = %self.model.device,
            "Starting model inference"
        );

        let output = Command::new(&self.model.program)
            .args(&self.model.args)
            .arg("--input")
            .arg(input)
            .arg("--output")
            .arg(output_dir)
            .arg("--lake")
            .arg(params.lake.name())
            .arg("--time")
            .arg(params.iso_time())
            .arg("--device")
            .arg(&self.model.device)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        Self::process_output(params, output)
    }

    fn process_output(
        params: &JobParams,
        result: Result<std::process::Output, std::io::Error>,
    ) -> Result<(), ExecutionError> {
        match result {
            Ok(output) if output.status.success() => {
                tracing::info!(run_name = %params.run_name(), "Model inference complete");
                Ok(())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let detail = if stderr.is_empty() {
                    format!("model exited with {:?}", output.status.code())
                } else {
                    stderr
                };
                Err(ExecutionError::Internal(format!(
                    "model run for {} failed: {}",
                    params.run_name(),
                    detail
                )))
            }
            Err(e) => Err(ExecutionError::Internal(format!(
                "could not start model process: {}",
                e
            ))),
        }
    }
}

#[async_trait]
impl ExecutionUnit for InferenceExecutor {
    async fn execute(
        &self,
        params: &JobParams,
        target: &OutputTarget,
    ) -> Result<ArtifactLocation, ExecutionError> {
        // The list may have changed since admission
        let denylist = self.denylist.clone();
        let checked = params.clone();
        let denied = tokio::task::spawn_blocking(move || denylist.is_denied(&checked))
            .await
            .map_err(ExecutionError::internal)?;
        if denied {
            return Err(ExecutionError::Validation(denied_message(params)));
        }

        match self.run(params, target).await {
            Ok(()) => Ok(ArtifactLocation::for_folder(target.folder_name.clone())),
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_dir_all(&target.path).await {
                    tracing::debug!(path = %target.path.display(), error = %rm, "No partial output to remove");
                }
                Err(e)
            }
        }
    }
}
