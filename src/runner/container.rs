//! Docker-backed job executor.
//!
//! Lifecycle per job: stage the job file in a bind-mounted temp dir, pull
//! the ecosystem image, create and start a container parked on `sleep`,
//! exec the CA install as root, then the `fetch_files` and `update_files`
//! phases as the unprivileged worker user, and force-remove the container
//! whatever happened. Everything the container prints goes through the
//! redactor before it reaches the logs.

use std::sync::Arc;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, RemoveContainerOptions, StartContainerOptions,
};
use futures_util::stream::TryStreamExt;
use tracing::{debug, info, warn};

use crate::errors::UpdaterError;
use crate::job::JobFile;
use crate::redact::Redactor;
use crate::runner::{JobAssignment, JobExecutor, ProxyHandle};

/// Guest directory the per-job temp dir is mounted at.
const GUEST_JOB_DIR: &str = "/home/dependabot/dependabot-updater/job";
/// Unprivileged user the update phases run as.
const WORKER_USER: &str = "dependabot";
const ROOT_USER: &str = "root";
/// Where the proxy CA lands so `update-ca-certificates` picks it up.
const GUEST_CA_PATH: &str = "/usr/local/share/ca-certificates/proxy-ca.crt";

/// The two updater phases, run in order via exec.
const PHASES: [&str; 2] = ["fetch_files", "update_files"];

pub struct UpdaterRunner {
    docker: Docker,
    /// Image reference; an `{ecosystem}` placeholder is replaced with the
    /// job's package manager so one runner serves every block.
    image_template: String,
    proxy: Option<ProxyHandle>,
    redactor: Arc<dyn Redactor>,
    memory_limit_mb: u64,
}

impl UpdaterRunner {
    pub fn new(
        image_template: String,
        proxy: Option<ProxyHandle>,
        redactor: Arc<dyn Redactor>,
        memory_limit_mb: u64,
    ) -> Result<Self, UpdaterError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| UpdaterError::Imaging(format!("Docker connection failed: {e}")))?;
        Ok(Self {
            docker,
            image_template,
            proxy,
            redactor,
            memory_limit_mb,
        })
    }

    fn image_for(&self, package_manager: &str) -> String {
        self.image_template.replace("{ecosystem}", package_manager)
    }

    async fn pull_image(&self, image: &str) -> Result<(), UpdaterError> {
        debug!(image, "Pulling updater image");
        let options = Some(CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        });
        let mut pull_stream = self.docker.create_image(options, None, None);
        while let Some(progress) = pull_stream
            .try_next()
            .await
            .map_err(|e| UpdaterError::Imaging(format!("Image pull failed: {e}")))?
        {
            if let Some(status) = progress.status {
                debug!(image, "Pull progress: {}", status);
            }
        }
        Ok(())
    }

    /// Run one command inside the container via exec, streaming demuxed
    /// output through the redactor into the logs. Returns the exit code.
    async fn exec(
        &self,
        container_id: &str,
        user: &str,
        cmd: Vec<String>,
        env: Vec<String>,
    ) -> Result<i64, UpdaterError> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    env: Some(env),
                    user: Some(user.to_string()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| UpdaterError::Other(anyhow::anyhow!("Failed to create exec: {e}")))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| UpdaterError::Other(anyhow::anyhow!("Failed to start exec: {e}")))?;

        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output
                .try_next()
                .await
                .map_err(|e| UpdaterError::Other(anyhow::anyhow!("Exec stream failed: {e}")))?
            {
                match chunk {
                    LogOutput::StdOut { message } => {
                        let line = self.redactor.redact(&String::from_utf8_lossy(&message));
                        info!(target: "updater", "{}", line.trim_end());
                    }
                    LogOutput::StdErr { message } => {
                        let line = self.redactor.redact(&String::from_utf8_lossy(&message));
                        warn!(target: "updater", "{}", line.trim_end());
                    }
                    _ => {}
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| UpdaterError::Other(anyhow::anyhow!("Failed to inspect exec: {e}")))?;
        Ok(inspect.exit_code.unwrap_or(0))
    }

    async fn remove_container(&self, container_id: &str) {
        let options = Some(RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        });
        if let Err(e) = self.docker.remove_container(container_id, options).await {
            // Never mask the job outcome with a cleanup failure.
            warn!(container_id, error = %e, "Failed to remove updater container");
        }
    }

    async fn run_phases(
        &self,
        container_id: &str,
        env: &[String],
    ) -> Result<(), UpdaterError> {
        if self.proxy.is_some() {
            let code = self
                .exec(
                    container_id,
                    ROOT_USER,
                    vec!["update-ca-certificates".to_string()],
                    Vec::new(),
                )
                .await?;
            if code != 0 {
                return Err(UpdaterError::Imaging(format!(
                    "CA certificate install exited with code {code}"
                )));
            }
        }

        for phase in PHASES {
            info!(phase, "Running updater phase");
            let code = self
                .exec(
                    container_id,
                    WORKER_USER,
                    vec!["bin/run".to_string(), phase.to_string()],
                    env.to_vec(),
                )
                .await?;
            if code != 0 {
                return Err(UpdaterError::Updater {
                    phase: phase.to_string(),
                    exit_code: code,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobExecutor for UpdaterRunner {
    async fn execute(&self, assignment: &JobAssignment) -> Result<(), UpdaterError> {
        let staging = tempfile::tempdir()
            .map_err(|e| UpdaterError::Other(anyhow::anyhow!("Failed to stage job dir: {e}")))?;
        let job_file = JobFile {
            job: assignment.spec.clone(),
        };
        let encoded = serde_json::to_vec_pretty(&job_file)
            .map_err(|e| UpdaterError::Other(anyhow::anyhow!("Failed to encode job file: {e}")))?;
        std::fs::write(staging.path().join("job.json"), encoded)
            .map_err(|e| UpdaterError::Other(anyhow::anyhow!("Failed to write job file: {e}")))?;
        std::fs::create_dir(staging.path().join("output"))
            .map_err(|e| UpdaterError::Other(anyhow::anyhow!("Failed to create output dir: {e}")))?;

        let image = self.image_for(&assignment.spec.package_manager);
        self.pull_image(&image).await?;

        let mut binds = vec![format!(
            "{}:{}",
            staging.path().display(),
            GUEST_JOB_DIR
        )];
        let mut env = vec![
            format!("DEPENDABOT_JOB_ID={}", assignment.spec.id),
            format!("DEPENDABOT_JOB_TOKEN={}", assignment.tokens.job_token),
            format!(
                "DEPENDABOT_CREDENTIALS_TOKEN={}",
                assignment.tokens.credentials_token
            ),
            format!("DEPENDABOT_API_URL={}", assignment.api_url),
            format!("DEPENDABOT_JOB_PATH={GUEST_JOB_DIR}/job.json"),
            format!("DEPENDABOT_OUTPUT_PATH={GUEST_JOB_DIR}/output"),
        ];
        let network_mode = if let Some(proxy) = &self.proxy {
            let ca_path = staging.path().join("proxy-ca.crt");
            std::fs::write(&ca_path, &proxy.ca_cert_pem).map_err(|e| {
                UpdaterError::Other(anyhow::anyhow!("Failed to write proxy CA: {e}"))
            })?;
            binds.push(format!("{}:{}", ca_path.display(), GUEST_CA_PATH));
            env.push(format!("HTTP_PROXY={}", proxy.proxy_url));
            env.push(format!("HTTPS_PROXY={}", proxy.proxy_url));
            Some(proxy.network_mode.clone())
        } else {
            None
        };

        let host_config = HostConfig {
            binds: Some(binds),
            network_mode,
            memory: Some((self.memory_limit_mb * 1024 * 1024) as i64),
            ..Default::default()
        };
        // Park the container on sleep; phases run via exec so a phase
        // failure leaves the container inspectable until teardown.
        let sleep_secs = assignment.spec.max_updater_run_time;
        let body = ContainerCreateBody {
            image: Some(image.clone()),
            cmd: Some(vec!["sleep".to_string(), sleep_secs.to_string()]),
            env: Some(env.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };
        let create_options = Some(CreateContainerOptions {
            name: Some(format!("deputy-job-{}", assignment.spec.id)),
            platform: String::new(),
        });

        let container = self
            .docker
            .create_container(create_options, body)
            .await
            .map_err(|e| UpdaterError::Imaging(format!("Container create failed: {e}")))?;
        info!(
            job_id = %assignment.spec.id,
            container_id = %container.id,
            image = %image,
            "Starting updater container"
        );
        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions>)
            .await
        {
            self.remove_container(&container.id).await;
            return Err(UpdaterError::Imaging(format!(
                "Container start failed: {e}"
            )));
        }

        let outcome = self.run_phases(&container.id, &env).await;
        self.remove_container(&container.id).await;
        outcome
    }
}
