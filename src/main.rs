use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use deputy::advisories::{AdvisorySource, FileAdvisorySource, GitHubAdvisorySource};
use deputy::api::{ApiServer, AuthMode};
use deputy::config::OrchestratorConfig;
use deputy::host::github::GitHubHost;
use deputy::job::JobRegistry;
use deputy::outputs::processor::{OpenPrSet, OutputProcessor};
use deputy::redact::{MaskingRedactor, Redactor};
use deputy::runner::{ProxyHandle, UpdaterRunner};
use deputy::scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "deputy")]
#[command(version, about = "Dependency-update pull request orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every configured update block once
    Run {
        /// Path to the parsed orchestrator configuration
        #[arg(long, default_value = "deputy.yml")]
        config: PathBuf,

        /// Plan jobs but make no pull-request changes on the host
        #[arg(long)]
        dry_run: bool,

        /// Updater image; `{ecosystem}` expands to the package manager
        #[arg(
            long,
            default_value = "ghcr.io/dependabot/dependabot-updater-{ecosystem}:latest"
        )]
        updater_image: String,

        /// Container memory ceiling in MiB
        #[arg(long, default_value_t = 4096)]
        memory_limit_mb: u64,

        /// Egress proxy URL; containers get no other route out
        #[arg(long)]
        proxy_url: Option<String>,

        /// PEM file with the proxy's CA certificate
        #[arg(long)]
        proxy_ca_cert: Option<PathBuf>,

        /// Docker network the proxy lives on
        #[arg(long)]
        proxy_network: Option<String>,

        /// Require bearer tokens on the control-plane API
        #[arg(long)]
        bearer_auth: bool,

        /// Local JSON file with additional security advisories
        #[arg(long)]
        advisory_file: Option<PathBuf>,

        /// Also query the GitHub Advisory Database
        #[arg(long)]
        query_advisory_database: bool,

        /// Host login whose open PRs this orchestrator owns
        #[arg(long, default_value = "dependabot[bot]")]
        pr_author: String,

        /// Approve each created PR with the secondary approver identity
        #[arg(long)]
        auto_approve: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            dry_run,
            updater_image,
            memory_limit_mb,
            proxy_url,
            proxy_ca_cert,
            proxy_network,
            bearer_auth,
            advisory_file,
            query_advisory_database,
            pr_author,
            auto_approve,
        } => {
            let config = OrchestratorConfig::load(&config)?;

            let token = std::env::var("DEPUTY_HOST_TOKEN")
                .or_else(|_| std::env::var("GITHUB_TOKEN"))
                .context("DEPUTY_HOST_TOKEN or GITHUB_TOKEN must be set")?;
            let approver_token = std::env::var("DEPUTY_APPROVER_TOKEN").ok();

            let redactor: Arc<dyn Redactor> = Arc::new(MaskingRedactor::new());
            redactor.register(&token);
            if let Some(approver) = &approver_token {
                redactor.register(approver);
            }

            let registry = Arc::new(JobRegistry::new(redactor.clone()));
            let host = Arc::new(GitHubHost::new(
                &config.source.api_endpoint,
                &config.source.repo,
                &token,
                approver_token,
            ));
            let open_prs = Arc::new(OpenPrSet::new());
            let processor = Arc::new(OutputProcessor::new(
                registry.clone(),
                host.clone(),
                open_prs.clone(),
                dry_run,
            ));

            let auth = if bearer_auth {
                AuthMode::Bearer
            } else {
                AuthMode::Plaintext
            };
            let mut server = ApiServer::new(registry.clone(), processor, auth);
            // The only failure that aborts a whole run.
            let api_url = server.start().await?;
            info!(api_url = %api_url, "Control-plane API listening");

            let proxy = match (proxy_url, proxy_network) {
                (Some(url), Some(network)) => {
                    let ca_cert_pem = match &proxy_ca_cert {
                        Some(path) => std::fs::read_to_string(path)
                            .with_context(|| format!("Failed to read {}", path.display()))?,
                        None => String::new(),
                    };
                    Some(ProxyHandle {
                        proxy_url: url,
                        ca_cert_pem,
                        network_mode: network,
                    })
                }
                _ => None,
            };
            let executor = Arc::new(UpdaterRunner::new(
                updater_image,
                proxy,
                redactor,
                memory_limit_mb,
            )?);

            let mut advisory_sources: Vec<Box<dyn AdvisorySource>> = Vec::new();
            if let Some(path) = advisory_file {
                advisory_sources.push(Box::new(FileAdvisorySource::new(path)));
            }
            if query_advisory_database {
                advisory_sources.push(Box::new(GitHubAdvisorySource::new(
                    &config.source.api_endpoint,
                    Some(token.clone()),
                )));
            }

            let scheduler = Scheduler::new(
                config,
                registry,
                host,
                open_prs,
                executor,
                advisory_sources,
                api_url,
                pr_author,
                auto_approve,
                dry_run,
            );
            let results = scheduler.run().await;
            server.stop().await?;
            let results = results?;

            let mut failures = 0;
            for result in &results {
                if result.success {
                    info!(
                        ecosystem = %result.package_ecosystem,
                        created = result.affected_prs.created.len(),
                        updated = result.affected_prs.updated.len(),
                        closed = result.affected_prs.closed.len(),
                        "Update block succeeded"
                    );
                } else {
                    failures += 1;
                    tracing::error!(
                        ecosystem = %result.package_ecosystem,
                        message = %result.message,
                        "Update block failed"
                    );
                }
            }
            if failures > 0 {
                anyhow::bail!("{failures} of {} update blocks failed", results.len());
            }
        }
    }
    Ok(())
}
