//! dockhand
//!
//! Converges declared docker containers and images. Each run probes the
//! runtime, applies the minimal set of operations and reports per resource
//! whether anything changed.
//!
//! ## Commands
//!
//! - `converge <file>`: converge every `[[resource]]` in a TOML file, in order
//! - `probe <name>`: print a container's lifecycle state and actual spec

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dockhand_agent::docker::DockerRuntime;
use dockhand_agent::{
    ActionExecutor, Config, Converger, ImageConverger, MockRuntime, Runtime, StateProber,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod output;

use output::{LogFormat, OutputFormat};

/// Declarative docker container lifecycle reconciler.
#[derive(Debug, Parser)]
#[command(name = "dockhand")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Log format (written to stderr).
    #[arg(long, global = true, value_enum, default_value = "json", env = "DOCKHAND_LOG_FORMAT")]
    log_format: LogFormat,

    /// Docker Engine endpoint; overrides DOCKHAND_DOCKER_HOST.
    #[arg(long, global = true)]
    docker_host: Option<String>,

    /// Default graceful stop timeout in seconds.
    #[arg(long, global = true)]
    stop_timeout: Option<u64>,

    /// Bound in seconds on waiting for transient container states.
    #[arg(long, global = true)]
    settle_timeout: Option<u64>,

    /// Use the in-memory runtime instead of the Docker Engine.
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Converge the resources declared in a TOML file.
    Converge {
        /// Resource file.
        file: PathBuf,
    },

    /// Probe a container's lifecycle state.
    Probe {
        /// Container name.
        name: String,
    },
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = Config::from_env()?;
        if let Some(host) = &self.docker_host {
            config.docker_host = host.clone();
        }
        if let Some(secs) = self.stop_timeout {
            config.stop_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.settle_timeout {
            config.settle_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    fn runtime(&self, config: &Config) -> Result<Arc<dyn Runtime>> {
        if self.mock {
            info!("Using in-memory mock runtime");
            return Ok(Arc::new(MockRuntime::new()));
        }
        let socket = config.socket_path()?;
        info!(socket = %socket.display(), "Using Docker Engine runtime");
        Ok(Arc::new(DockerRuntime::new(socket)))
    }

    /// Returns false if any resource failed.
    async fn run(self) -> Result<bool> {
        let config = self.config()?;
        init_tracing(&config, self.log_format);
        info!(
            docker_host = %config.docker_host,
            stop_timeout_secs = config.stop_timeout.as_secs(),
            settle_timeout_secs = config.settle_timeout.as_secs(),
            "Configuration loaded"
        );

        let runtime = self.runtime(&config)?;

        match &self.command {
            Commands::Converge { file } => {
                let resources = dockhand_agent::converge::load_file(file)?;
                let converger = Converger::new(
                    ActionExecutor::new(runtime.clone(), config.executor_config()),
                    ImageConverger::new(runtime),
                );
                let outcomes = converger.converge_all(&resources).await;
                output::print_outcomes(&outcomes, self.format);
                output::print_summary(&outcomes);
                Ok(outcomes.iter().all(|o| o.is_ok()))
            }
            Commands::Probe { name } => {
                let probe = StateProber::new(runtime).probe(name).await?;
                output::print_probe(name, &probe, self.format);
                Ok(true)
            }
        }
    }
}

fn init_tracing(config: &Config, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.as_str().into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.run().await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            output::print_error(&e);
            std::process::exit(1);
        }
    }
}
