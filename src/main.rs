use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use bollard::{Docker, API_DEFAULT_VERSION};
use clap::{Parser, Subcommand};
use dockhand::config::load_config;
use dockhand::domain::manifest;
use dockhand::domain::model::{LogChunk, LogOptions};
use dockhand::infra::docker::DockerContainerRuntime;
use dockhand::{domain, Launcher, UpOptions};
use futures::StreamExt;
use log::{error, info};

#[derive(Parser)]
#[command(name = "dockhand", version, about = "Launch a single service container from a manifest")]
struct Cli {
    /// Manifest file (defaults to dockhand.yaml in the current directory)
    #[arg(short = 'f', long = "file", global = true)]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start the service container
    Up {
        /// Build the image from the build context before starting
        #[arg(long)]
        build: bool,
    },
    /// Stop and remove the service container
    Down,
    /// Show the service container state
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the service container logs
    Logs {
        /// Keep streaming new log output
        #[arg(long)]
        follow: bool,
        /// Only show the last N lines
        #[arg(long)]
        tail: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), anyhow::Error> {
    let config = load_config()?;
    let manifest_path = cli
        .file
        .unwrap_or_else(|| PathBuf::from(&config.manifest));
    let spec = manifest::load(&manifest_path)?;

    let docker = Docker::connect_with_socket(&config.docker_socket, 120, API_DEFAULT_VERSION)
        .context("Can't connect to docker socket")?;
    let launcher = Launcher {
        runtime: Box::new(DockerContainerRuntime { docker }),
    };

    match cli.command {
        Commands::Up { build } => {
            let outcome = domain::up(&launcher, &spec, UpOptions { build }).await?;
            info!(
                "Service {} is up (container {}, image {})",
                spec.name,
                short(&outcome.container_id),
                outcome.image
            );
        }
        Commands::Down => {
            domain::down(&launcher, &spec).await?;
        }
        Commands::Status { json } => {
            let status = domain::status(&launcher, &spec).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                match status.container {
                    Some(container) => println!(
                        "{}: {} (container {}, image {})",
                        status.service,
                        container.state,
                        short(&container.id),
                        container.image
                    ),
                    None => println!("{}: not running", status.service),
                }
            }
        }
        Commands::Logs { follow, tail } => {
            let mut stream = domain::logs(&launcher, &spec, LogOptions { follow, tail }).await?;
            let mut stdout = std::io::stdout();
            let mut stderr = std::io::stderr();
            while let Some(chunk) = stream.next().await {
                match chunk? {
                    LogChunk::Stdout(bytes) => stdout.write_all(&bytes)?,
                    LogChunk::Stderr(bytes) => stderr.write_all(&bytes)?,
                }
            }
        }
    }
    Ok(())
}

fn short(id: &str) -> &str {
    &id[..id.len().min(12)]
}
