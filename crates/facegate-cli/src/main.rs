use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_service::{Config, FaceService, HealthStatus, ServiceError};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "facegate", about = "Face enrollment and verification for exam authentication")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from a reference image
    Enroll {
        /// Identity to enroll
        identity: String,
        /// Path to the reference image
        image: PathBuf,
        /// Free-form note stored with the enrollment
        #[arg(short, long)]
        metadata: Option<String>,
    },
    /// Verify an image against a stored enrollment
    Verify {
        /// Identity to verify against
        identity: String,
        /// Path to the candidate image
        image: PathBuf,
    },
    /// Analyze the faces in an image without storing anything
    Analyze {
        /// Path to the image
        image: PathBuf,
    },
    /// Report model and store readiness
    Health,
    /// List enrollments
    List,
    /// Remove an enrollment
    Remove {
        /// Identity to remove
        identity: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries only the JSON results
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::from_env();
    let service = FaceService::new(&config)
        .await
        .context("opening the enrollment store")?;

    match cli.command {
        Commands::Enroll { identity, image, metadata } => {
            let bytes = read_image(&image)?;
            match service.enroll(&identity, &bytes, metadata).await {
                Ok(receipt) => {
                    print_json(&receipt)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => fail_user(err),
            }
        }
        Commands::Verify { identity, image } => {
            let bytes = read_image(&image)?;
            match service.verify(&identity, &bytes).await {
                // A completed non-match is a normal outcome, still exit 0
                Ok(result) => {
                    print_json(&result)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => fail_user(err),
            }
        }
        Commands::Analyze { image } => {
            let bytes = read_image(&image)?;
            match service.analyze(&bytes).await {
                Ok(reports) => {
                    print_json(&reports)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => fail_user(err),
            }
        }
        Commands::Health => {
            let report = service.health().await;
            print_json(&report)?;
            Ok(if report.status == HealthStatus::Healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::List => {
            let summaries = service.list().await?;
            print_json(&summaries)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Remove { identity } => {
            let removed = service.remove(&identity).await?;
            print_json(&json!({ "identity_id": identity, "removed": removed }))?;
            Ok(if removed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Service errors carry a user-safe message; the detail goes to the log.
fn fail_user(err: ServiceError) -> Result<ExitCode> {
    tracing::error!(error = %err, "request failed");
    eprintln!("{}", err.user_message());
    Ok(ExitCode::FAILURE)
}
