//! hostwatch - host data collection agent
//!
//! Usage:
//!   hostwatch                      Collect and upload (registered hosts only)
//!   hostwatch --register           Register this host, then collect and upload
//!   hostwatch --unregister         Unregister this host
//!   hostwatch --offline            Collect only, leave the archive on disk

mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;
use hostwatch_client::HttpRemoteService;
use hostwatch_core::config::DEFAULT_CONFIG_PATH;
use hostwatch_core::AgentConfig;
use hostwatch_orchestrator::{CommandCollector, Orchestrator, RunOutcome};
use hostwatch_state::StateStore;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "hostwatch")]
#[command(author, version, about = "Host data collection agent")]
struct Cli {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Register this host with the remote service
    #[arg(long)]
    register: bool,

    /// Discard local registration state and machine id, then register
    #[arg(long)]
    reregister: bool,

    /// Unregister this host
    #[arg(long, conflicts_with_all = ["register", "reregister"])]
    unregister: bool,

    /// With --unregister: clean up locally even if the remote call fails
    #[arg(long)]
    force: bool,

    /// Collect without contacting the remote service
    #[arg(long)]
    offline: bool,

    /// Use the legacy registration/upload protocol
    #[arg(long, conflicts_with = "no_legacy_upload")]
    legacy_upload: bool,

    /// Use the modern upload protocol
    #[arg(long)]
    no_legacy_upload: bool,

    /// Number of upload attempts
    #[arg(long, value_name = "N")]
    retries: Option<u32>,

    /// Name this host is reported under
    #[arg(long, value_name = "NAME")]
    display_name: Option<String>,

    /// Run the reduced core collection
    #[arg(long)]
    core_collect: bool,

    /// Log debug output to the console
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors to the console
    #[arg(long)]
    quiet: bool,

    /// Log nothing to the console
    #[arg(long)]
    silent: bool,

    /// Roll the log file over before running
    #[arg(long)]
    rotate_log: bool,
}

impl Cli {
    /// Command-line flags override the configuration file
    fn apply(&self, config: &mut AgentConfig) {
        config.register |= self.register;
        config.reregister |= self.reregister;
        config.unregister |= self.unregister;
        config.force |= self.force;
        config.offline |= self.offline;
        config.core_collect |= self.core_collect;

        if self.legacy_upload {
            config.legacy_upload = true;
        } else if self.no_legacy_upload {
            config.legacy_upload = false;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(name) = &self.display_name {
            config.display_name = Some(name.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AgentConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    cli.apply(&mut config);

    if cli.rotate_log {
        logging::rotate_log_file(&config.logging_file).with_context(|| {
            format!("Failed to rotate {}", config.logging_file.display())
        })?;
    }
    let _guard = logging::init_logging(
        &config.logging_file,
        logging::console_filter(cli.silent, cli.verbose, cli.quiet),
        cli.verbose,
    )?;
    debug!(
        "hostwatch {} using {}",
        env!("CARGO_PKG_VERSION"),
        cli.config.display()
    );

    let store = StateStore::new(config.state_dir.clone());
    let remote = HttpRemoteService::new(&config, store)?;
    let collector =
        CommandCollector::from_command_line(&config.collector_command, config.cache_dir.clone())?;
    let log_file = config.logging_file.clone();
    let orchestrator = Orchestrator::new(config, remote, collector);

    match orchestrator.run().await? {
        RunOutcome::Uploaded(summary) => {
            debug!("Upload finished after {} attempt(s)", summary.attempts);
        }
        RunOutcome::Collected { archive } => {
            info!("Archive: {}", archive.display());
        }
        RunOutcome::NotRegistered | RunOutcome::Unregistered => {}
        RunOutcome::UnregisterRefused => {
            bail!(
                "Unregistration failed. Please see {} for additional information",
                log_file.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "hostwatch",
            "--register",
            "--no-legacy-upload",
            "--retries",
            "3",
            "--display-name",
            "web-07",
        ]);
        let mut config = AgentConfig::default();
        cli.apply(&mut config);

        assert!(config.register);
        assert!(!config.legacy_upload);
        assert_eq!(config.retries, 3);
        assert_eq!(config.display_name.as_deref(), Some("web-07"));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_absent_flags_keep_config_values() {
        let cli = Cli::parse_from(["hostwatch"]);
        let mut config = AgentConfig {
            legacy_upload: false,
            retries: 5,
            offline: true,
            ..AgentConfig::default()
        };
        cli.apply(&mut config);

        assert!(!config.legacy_upload);
        assert_eq!(config.retries, 5);
        assert!(config.offline);
    }

    #[test]
    fn test_unregister_conflicts_with_register() {
        assert!(Cli::try_parse_from(["hostwatch", "--unregister", "--register"]).is_err());
        assert!(Cli::try_parse_from(["hostwatch", "--unregister", "--force"]).is_ok());
    }
}
