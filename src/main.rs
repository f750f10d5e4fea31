mod compose;
mod config;
mod docker;
mod env;
mod error;
mod format;
mod logging;
mod mirror;
mod models;
mod naming;
mod process;
mod reference;
mod report;
mod resolve;
mod skopeo;
mod template;
mod transfer;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use compose::{collect, CollectArgs};
use config::{
    load_dotenv, load_references, DigestCheck, MirrorArgs, MirrorConfig, TargetArgs, TargetConfig,
};
use docker::DockerClient;
use error::ConfigError;
use format::{print_plan_table, print_summary, OutputFormat};
use mirror::{log_plan, MirrorRun};
use models::RunReport;
use report::write_report;
use resolve::resolve;
use skopeo::Skopeo;
use transfer::TransferExecutor;

#[derive(Parser)]
#[command(name = "regmirror")]
#[command(author = "Bentlybro <github@bentlybro.com>")]
#[command(version = "0.1.0")]
#[command(
    about = "Mirror container images into a private registry with collision-safe names",
    long_about = None
)]
struct Cli {
    /// Also append log lines to this file
    #[arg(long, global = true, env = "MIRROR_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every image in the list into the destination registry
    Mirror(MirrorArgs),

    /// Show where each image would be mirrored, without copying anything
    Plan {
        #[command(flatten)]
        target: TargetArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Build an image list from docker-compose files and a .env file
    Collect(CollectArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = logging::init(cli.log_file.as_deref())?;

    let result = match cli.command {
        Commands::Mirror(args) => mirror_images(&args).await,
        Commands::Plan { target, format } => plan_images(&target, format),
        Commands::Collect(args) => collect(&args).map(|_| 0),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "aborted");
            if e.downcast_ref::<ConfigError>().is_some() {
                2
            } else {
                1
            }
        }
    };

    // flush the log file before exiting
    drop(guard);

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn mirror_images(args: &MirrorArgs) -> Result<i32> {
    let dotenv = load_dotenv(args.target.env_file.as_deref())?;
    let config = MirrorConfig::from_args(args, &dotenv, |name| std::env::var(name).ok())?;
    let references = load_references(&config.input)?;

    let started_at = Utc::now();
    info!(
        images = references.len(),
        input = %config.input.display(),
        registry = %config.target.registry,
        namespace = %config.target.namespace,
        proxy = config.proxy.is_enabled(),
        "starting mirror run"
    );

    let plan = resolve(&references, &config.target);
    info!(
        planned = plan.resolved().count(),
        unresolved = plan.entries.len() - plan.resolved().count(),
        "resolved destinations"
    );

    let skopeo = Skopeo::new(
        config.skopeo.clone(),
        config.authfile.clone(),
        config.proxy.clone(),
        config.copy.timeout,
    );
    let executor = TransferExecutor::new(Box::new(skopeo.clone()), config.copy.clone());
    let executor = match config.digest_check {
        DigestCheck::Skopeo => executor.with_digest_check(Box::new(skopeo)),
        DigestCheck::Docker => executor.with_digest_check(Box::new(DockerClient::new()?)),
        DigestCheck::Off => executor,
    };

    let summary = MirrorRun::new(executor)
        .skip_matching(config.skip.clone())
        .continue_on_error(config.continue_on_error)
        .run(&plan)
        .await;

    print_summary(&summary);

    if let Some(ref path) = config.report {
        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            target: &config.target,
            conflicted_keys: plan.table.conflicted_keys().collect(),
            summary: &summary,
        };
        write_report(path, &report)?;
        info!(path = %path.display(), "wrote run report");
    }

    Ok(summary.exit_code())
}

fn plan_images(target: &TargetArgs, format: OutputFormat) -> Result<i32> {
    let dotenv = load_dotenv(target.env_file.as_deref())?;
    let config = TargetConfig::from_args(target, &dotenv)?;
    let references = load_references(&config.input)?;

    let plan = resolve(&references, &config.target);

    match format {
        OutputFormat::Table => {
            log_plan(&plan);
            print_plan_table(&plan);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }

    Ok(0)
}
