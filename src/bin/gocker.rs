//! gocker - minimal container engine CLI
//!
//! ## Usage
//!
//! ```sh
//! gocker pull <image>
//! gocker run <image> [--device <ifname>] [--cpu-shares <n>]
//! gocker images
//! ```
//!
//! Settings come from `GOCKER_BASE_DIR`, `GOCKER_REGISTRY_URL`,
//! `GOCKER_AUTH_URL` and `GOCKER_AUTH_SERVICE`, resolved by
//! [`Config::from_env`]; the matching flags take precedence. Images are
//! stored under `gocker-images` by default. Logs go to stderr; `RUST_LOG`
//! overrides `-v`.
//!
//! ## Exit Status
//!
//! `run` exits with the container's exit code. Any engine failure prints
//! the full error chain and exits 1.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gocker::storage::human_size;
use gocker::{Config, ContainerLauncher, ImageStore, LaunchOptions, PullPipeline};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::EnvFilter;

// =============================================================================
// CLI Parsing
// =============================================================================

/// gocker - pull registry images and run them in a chroot with CPU limits
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Image store directory [env: GOCKER_BASE_DIR] [default: gocker-images]
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Registry API base, including `/v2` [env: GOCKER_REGISTRY_URL]
    #[arg(long, global = true)]
    registry_url: Option<String>,

    /// Token issuer URL [env: GOCKER_AUTH_URL]
    #[arg(long, global = true)]
    auth_url: Option<String>,

    /// `service` parameter sent to the token issuer [env: GOCKER_AUTH_SERVICE]
    #[arg(long, global = true)]
    auth_service: Option<String>,

    /// Debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Pull an image into the store.
    Pull {
        /// Image reference, `[library/]name[:tag]`.
        image: String,
    },

    /// Run a pulled image's configured command.
    Run {
        /// Image reference, `[library/]name[:tag]`.
        image: String,
        /// Host network device to attach to a per-container bridge.
        #[arg(long)]
        device: Option<String>,
        /// CPU shares for the container's cgroup.
        #[arg(long)]
        cpu_shares: Option<u64>,
    },

    /// List pulled images.
    Images,
}

impl Cli {
    /// Applies the flags on top of `base`.
    fn config(&self, base: Config) -> Config {
        let mut config = base;
        if let Some(dir) = &self.base_dir {
            config.base_dir = dir.clone();
        }
        if let Some(url) = &self.registry_url {
            config.registry.registry_url = url.clone();
        }
        if let Some(url) = &self.auth_url {
            config.registry.auth_url = url.clone();
        }
        if let Some(service) = &self.auth_service {
            config.registry.auth_service = service.clone();
        }
        config
    }
}

// =============================================================================
// Command Implementations
// =============================================================================

async fn cmd_pull(config: &Config, image: &str) -> Result<ExitCode> {
    let pipeline = PullPipeline::from_config(config)?;
    let report = pipeline.pull(image).await?;
    println!(
        "Pulled {} ({} layers, {})",
        report.reference,
        report.digests.len(),
        human_size(report.bytes_written)
    );
    Ok(ExitCode::SUCCESS)
}

#[cfg(target_os = "linux")]
async fn cmd_run(config: &Config, image: &str, options: LaunchOptions) -> Result<ExitCode> {
    let launcher = ContainerLauncher::from_config(config)?;
    let outcome = launcher.run(image, &options).await?;

    for e in outcome.network_error.iter().chain(&outcome.teardown_errors) {
        eprintln!("warning: {}", e);
    }

    Ok(match outcome.exit_code {
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => {
            eprintln!("{} was killed by a signal", outcome.container_id);
            ExitCode::FAILURE
        }
    })
}

#[cfg(not(target_os = "linux"))]
async fn cmd_run(_config: &Config, _image: &str, _options: LaunchOptions) -> Result<ExitCode> {
    anyhow::bail!("run is only supported on Linux")
}

fn cmd_images(config: &Config) -> Result<ExitCode> {
    let store = ImageStore::new(&config.base_dir)?;
    let images = store.list().context("unable to list images")?;

    println!(
        "{:<32} {:<16} {:<8} {:>6} {:>10}  {}",
        "REPOSITORY", "TAG", "ARCH", "LAYERS", "SIZE", "MODIFIED"
    );
    for image in images {
        let modified = image
            .modified
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<32} {:<16} {:<8} {:>6} {:>10}  {}",
            image.name,
            image.tag,
            image.architecture,
            image.layers,
            human_size(image.size),
            modified
        );
    }
    Ok(ExitCode::SUCCESS)
}

// =============================================================================
// Main
// =============================================================================

fn init_logging(verbose: bool) {
    let default = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = cli.config(Config::from_env());

    let result = match cli.command {
        Cmd::Pull { image } => cmd_pull(&config, &image).await,
        Cmd::Run {
            image,
            device,
            cpu_shares,
        } => cmd_run(&config, &image, LaunchOptions { device, cpu_shares }).await,
        Cmd::Images => cmd_images(&config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gocker::constants::{BASE_DIR_ENV, DEFAULT_BASE_DIR, REGISTRY_URL_ENV};

    fn env(key: &str) -> Option<String> {
        match key {
            BASE_DIR_ENV => Some("/var/lib/gocker".to_string()),
            REGISTRY_URL_ENV => Some("http://mirror.local/v2".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_environment_applies_without_flags() {
        let cli = Cli::try_parse_from(["gocker", "images"]).unwrap();
        let config = cli.config(Config::from_lookup(env));

        assert_eq!(config.base_dir, PathBuf::from("/var/lib/gocker"));
        assert_eq!(config.registry.registry_url, "http://mirror.local/v2");
    }

    #[test]
    fn test_flags_override_environment() {
        let cli = Cli::try_parse_from([
            "gocker",
            "--base-dir",
            "/tmp/images",
            "pull",
            "alpine",
            "--registry-url",
            "http://localhost:5000/v2",
        ])
        .unwrap();
        let config = cli.config(Config::from_lookup(env));

        assert_eq!(config.base_dir, PathBuf::from("/tmp/images"));
        assert_eq!(config.registry.registry_url, "http://localhost:5000/v2");
    }

    #[test]
    fn test_blank_environment_falls_back_to_defaults() {
        let cli = Cli::try_parse_from(["gocker", "images"]).unwrap();
        let config = cli.config(Config::from_lookup(|_| Some(" ".to_string())));

        assert_eq!(config.base_dir, PathBuf::from(DEFAULT_BASE_DIR));
        assert_eq!(config, cli.config(Config::default()));
    }
}
