//! releasegate - release verification CLI
//!
//! Runs the verification pipeline against a local artifact using an
//! in-memory catalog, and pings the configured clamd daemon.
//!
//! ## Commands
//!
//! - `verify`: verify a file end-to-end and print the resulting status
//! - `ping-scanner`: check that clamd answers
//! - `config`: print the effective verifier configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, Level};

use release_state::fakes::{MemoryPreferenceStore, MemoryReleaseStore};
use release_state::{AccountId, Product, Release, ReleaseStore, StatusView};
use release_verify::{
    init_tracing, Channel, ChannelEmitter, ClamdScanner, FormatInspectors, LogTransport,
    MalwareScanner, RunOutcome, VerificationPipeline, VerifierConfig, METRICS,
};

#[derive(Parser)]
#[command(name = "releasegate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Release artifact verification pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// clamd address (host:port)
    #[arg(long, global = true, env = "RELEASEGATE_CLAMD_ADDRESS")]
    clamd: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a release artifact
    Verify {
        /// Artifact to verify
        file: PathBuf,

        /// Product name used in notifications
        #[arg(short, long, default_value = "local")]
        product: String,

        /// Version label of the release
        #[arg(long = "release-version", default_value = "0.0.0")]
        release_version: String,

        /// Size limit in bytes (overrides RELEASEGATE_MAX_ARTIFACT_BYTES)
        #[arg(long)]
        max_bytes: Option<u64>,

        /// Output format for the final status
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Check that the malware scanner answers
    PingScanner,

    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct VerifyReport<'a> {
    #[serde(flatten)]
    status: &'a StatusView,
    outcome: &'a RunOutcome,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let mut config = VerifierConfig::from_env().context("Invalid releasegate configuration")?;
    if let Some(address) = cli.clamd {
        config = config.with_clamd_address(address);
    }

    let result = match cli.command {
        Commands::Verify {
            file,
            product,
            release_version,
            max_bytes,
            format,
        } => {
            if let Some(bytes) = max_bytes {
                config = config.with_max_artifact_bytes(bytes);
            }
            cmd_verify(config, &file, &product, &release_version, format).await
        }
        Commands::PingScanner => cmd_ping_scanner(&config).await,
        Commands::Config => cmd_config(&config),
    };

    METRICS.flush();
    result
}

async fn cmd_verify(
    config: VerifierConfig,
    file: &Path,
    product_name: &str,
    version: &str,
    format: OutputFormat,
) -> Result<()> {
    let file = file
        .canonicalize()
        .with_context(|| format!("Cannot read artifact {}", file.display()))?;

    let store = Arc::new(MemoryReleaseStore::new());
    let submitter = AccountId::from("local");
    let product = store
        .insert_product(Product::new(product_name, submitter.clone()))
        .await?;
    let release = store
        .insert_release(Release::new(product.id.clone(), submitter, version, &file))
        .await?;
    info!(release_id = %release.id, file = %file.display(), "submitted release");

    let emitter = ChannelEmitter::new(
        Arc::new(MemoryPreferenceStore::new()),
        Arc::new(LogTransport::new(Channel::Email)),
        Arc::new(LogTransport::new(Channel::Push)),
    );
    let pipeline = VerificationPipeline::new(
        store.clone(),
        Arc::new(FormatInspectors::new()),
        Arc::new(scanner_for(&config)),
        Arc::new(emitter),
        config,
    );

    let outcome = pipeline.run_verification(&release.id).await?;
    let status = store.status(&release.id).await?;

    match format {
        OutputFormat::Json => {
            let report = VerifyReport {
                status: &status,
                outcome: &outcome,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            for line in &status.log {
                println!("{}", line);
            }
            println!();
            println!("Status:   {}", status.status);
            println!("Progress: {}/{}", status.progress, release_state::MAX_PROGRESS);
        }
    }

    match outcome.reason {
        Some(reason) => anyhow::bail!("Release rejected: {}", reason),
        None => Ok(()),
    }
}

async fn cmd_ping_scanner(config: &VerifierConfig) -> Result<()> {
    let scanner = scanner_for(config);
    let alive = scanner
        .ping()
        .await
        .with_context(|| format!("Could not reach clamd at {}", scanner.address()))?;
    if alive {
        println!("clamd at {} answered PONG", scanner.address());
        Ok(())
    } else {
        anyhow::bail!("clamd at {} did not answer PONG", scanner.address())
    }
}

fn cmd_config(config: &VerifierConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn scanner_for(config: &VerifierConfig) -> ClamdScanner {
    ClamdScanner::new(config.clamd_address.clone(), config.scanner_timeout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_verify_flags() {
        let cli = Cli::try_parse_from([
            "releasegate",
            "--json",
            "verify",
            "app.apk",
            "--product",
            "Demo",
            "--release-version",
            "1.2.3",
            "--format",
            "json",
        ])
        .expect("parse");
        assert!(cli.json);
        match cli.command {
            Commands::Verify {
                file,
                product,
                release_version,
                format,
                ..
            } => {
                assert_eq!(file, PathBuf::from("app.apk"));
                assert_eq!(product, "Demo");
                assert_eq!(release_version, "1.2.3");
                assert!(matches!(format, OutputFormat::Json));
            }
            _ => panic!("expected verify"),
        }
    }

    #[tokio::test]
    async fn test_verify_rejects_unsupported_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("installer.dmg");
        std::fs::write(&path, b"koly").expect("write");
        // Nothing listens here; the run is rejected before the scan stage.
        let config = VerifierConfig::default().with_clamd_address("127.0.0.1:9");

        let err = cmd_verify(config, &path, "Demo", "1.0.0", OutputFormat::Json)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("UnsupportedFormat"));
    }
}
