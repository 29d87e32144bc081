//! Controller manager for the Tinkerbell cluster-api infrastructure provider
use std::time::Duration;

use capt_core::{TinkerbellCluster, TinkerbellMachine};
use capt_runtime::Config;
use clap::{Parser, Subcommand, ValueEnum};
use kube::{Client, CustomResourceExt};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Provision cluster-api machines on Tinkerbell managed bare metal
#[derive(Parser, Debug)]
#[command(name = "capt", version, about)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the machine and cluster controllers (default)
    Run(RunArgs),
    /// Print the provider's CustomResourceDefinitions as YAML and exit
    Crds,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Only reconcile objects in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Seconds to wait before retrying a failed reconciliation
    #[arg(long, env = "REQUEUE_SECONDS", default_value_t = 10)]
    requeue_seconds: u64,
}

impl RunArgs {
    /// Arguments for the implicit `run` command, taken from the environment only
    fn parse_from_env() -> Self {
        #[derive(Parser)]
        struct Env {
            #[command(flatten)]
            run: RunArgs,
        }
        Env::parse_from(["capt"]).run
    }

    fn config(&self) -> Config {
        Config {
            namespace: self.watch_namespace.clone().filter(|ns| !ns.is_empty()),
            requeue: Duration::from_secs(self.requeue_seconds),
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kube=warn"));
    let json = format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}

fn print_crds() -> anyhow::Result<()> {
    let crds = [TinkerbellCluster::crd(), TinkerbellMachine::crd()];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let run = match cli.command {
        Some(Command::Crds) => return print_crds(),
        Some(Command::Run(args)) => args,
        None => RunArgs::parse_from_env(),
    };

    init_tracing(cli.log_format);
    let config = run.config();
    info!(version = env!("CARGO_PKG_VERSION"), "starting capt");
    let client = Client::try_default().await?;
    capt_runtime::controller::run(client, config).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_is_the_default() {
        let cli = Cli::try_parse_from(["capt", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(cli.command.is_none());
    }

    #[test]
    fn run_arguments_build_the_config() {
        let cli = Cli::try_parse_from(["capt", "run", "--watch-namespace", "tink", "--requeue-seconds", "3"]).unwrap();
        let Some(Command::Run(args)) = cli.command else {
            panic!("expected the run command");
        };
        let config = args.config();
        assert_eq!(config.namespace.as_deref(), Some("tink"));
        assert_eq!(config.requeue, Duration::from_secs(3));
    }

    #[test]
    fn crds_are_printable() {
        let yaml = serde_yaml::to_string(&TinkerbellMachine::crd()).unwrap();
        assert!(yaml.contains("tinkerbellmachines.infrastructure.cluster.x-k8s.io"));
    }
}
