mod commands;
mod config;

use clap::{Args, Parser, Subcommand};
use commands::{CommandError, UploadCommand};
use config::{CommonConfig, Config};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "shift", about = "Host-side proxy for the SHIFT task API")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Args)]
struct ConfigArgs {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the proxy and admin listeners
    Serve(ConfigArgs),
    /// Prompt for missing credentials and write them into the config file
    Install(ConfigArgs),
    /// Create a dummy task to verify the credentials
    Test(ConfigArgs),
    /// Upload a file through the chunked upload protocol
    Upload {
        #[command(flatten)]
        args: ConfigArgs,
        file: PathBuf,
        #[arg(long)]
        temp_identifier: String,
        /// Directory user the upload is attributed to
        #[arg(long)]
        user_id: u64,
        #[arg(long)]
        mime_type: Option<String>,
        /// Send the file in one request instead of chunks
        #[arg(long)]
        single_shot: bool,
    },
}

fn init_logging(common: &CommonConfig) -> Option<sentry::ClientInitGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&common.logging.level));

    let guard = common.logging.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();

    guard
}

fn init_metrics(common: &CommonConfig) {
    if let Some(statsd) = &common.metrics {
        match StatsdBuilder::from(statsd.statsd_host.clone(), statsd.statsd_port).build(Some("shift"))
        {
            Ok(recorder) => {
                if let Err(e) = metrics::set_global_recorder(recorder) {
                    tracing::warn!(error = %e, "metrics recorder already installed");
                }
            }
            Err(e) => tracing::error!(error = %e, "could not set up statsd exporter"),
        }
    }

    shared::metrics_defs::describe_all(proxy::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(relay::metrics_defs::ALL_METRICS);
}

async fn run(command: CliCommand) -> Result<(), CommandError> {
    // Install edits the file before it is necessarily loadable.
    if let CliCommand::Install(args) = &command {
        return commands::install(&args.config).await;
    }

    let path = match &command {
        CliCommand::Serve(args) | CliCommand::Test(args) | CliCommand::Install(args) => {
            &args.config
        }
        CliCommand::Upload { args, .. } => &args.config,
    };
    let config = Config::from_file(path)?;
    let _sentry = init_logging(&config.common);
    init_metrics(&config.common);

    match command {
        CliCommand::Serve(_) => commands::serve(config).await,
        CliCommand::Test(_) => commands::run_test_task(&config).await,
        CliCommand::Upload {
            file,
            temp_identifier,
            user_id,
            mime_type,
            single_shot,
            ..
        } => {
            let command = UploadCommand {
                file,
                temp_identifier,
                user_id,
                mime_type,
                single_shot,
            };
            commands::upload(&config, command).await
        }
        CliCommand::Install(_) => Ok(()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
