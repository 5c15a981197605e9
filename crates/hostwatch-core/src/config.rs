//! Configuration management for hostwatch
//!
//! Settings are read from a TOML file (default `/etc/hostwatch/hostwatch.toml`).
//! Every field has a default so a missing file or a partial file is valid.
//! Command-line flags are layered on top by the binary; once a run starts the
//! configuration is treated as immutable.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{BranchInfo, HostwatchError, ProtocolGeneration, Result};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostwatch/hostwatch.toml";

/// How the agent authenticates against the remote service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Username and password, both required
    #[default]
    Basic,
    /// Client certificate managed outside the agent
    Cert,
}

impl std::str::FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "cert" => Ok(Self::Cert),
            _ => Err(format!("Invalid auth method: {}. Use basic or cert.", s)),
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the remote service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Use the legacy registration/upload protocol
    #[serde(default = "default_true")]
    pub legacy_upload: bool,

    /// Number of upload attempts (at least one)
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Fixed wait between upload attempts
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    /// Per-request HTTP timeout
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    #[serde(default)]
    pub auth_method: AuthMethod,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Name shown for this host instead of the system hostname
    #[serde(default)]
    pub display_name: Option<String>,

    /// Destination account, used in the upload summary
    #[serde(default)]
    pub account_number: Option<String>,

    /// Collect without talking to the remote service
    #[serde(default)]
    pub offline: bool,

    /// Fetch collection rules from the remote service before collecting
    #[serde(default)]
    pub auto_update: bool,

    /// Register this host if it is not registered yet
    #[serde(default)]
    pub register: bool,

    /// Drop local registration state and machine identity, then register
    #[serde(default)]
    pub reregister: bool,

    /// Unregister this host instead of collecting
    #[serde(default)]
    pub unregister: bool,

    /// Clean up local state even if the remote call fails
    #[serde(default)]
    pub force: bool,

    /// Use the reduced core collector (no rule document)
    #[serde(default)]
    pub core_collect: bool,

    #[serde(default = "default_logging_file")]
    pub logging_file: PathBuf,

    /// Directory holding registration markers and records
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Directory holding cached collection files
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Scheduler entry that triggers periodic runs
    #[serde(default = "default_schedule_file")]
    pub schedule_file: PathBuf,

    /// External program that performs the collection
    #[serde(default = "default_collector_command")]
    pub collector_command: String,

    /// Local collection rules (JSON), used when not fetched remotely
    #[serde(default)]
    pub rules_file: Option<PathBuf>,

    /// Operator exclusions (TOML)
    #[serde(default)]
    pub removal_file: Option<PathBuf>,

    #[serde(default)]
    pub branch_info: BranchInfo,
}

// Default value providers
fn default_base_url() -> String {
    "https://api.hostwatch.example.com".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retries() -> u32 {
    1
}

fn default_backoff_secs() -> u64 {
    180
}

fn default_http_timeout_secs() -> u64 {
    120
}

fn default_logging_file() -> PathBuf {
    PathBuf::from("/var/log/hostwatch/hostwatch.log")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/hostwatch")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/cache/hostwatch")
}

fn default_schedule_file() -> PathBuf {
    PathBuf::from("/etc/cron.daily/hostwatch")
}

fn default_collector_command() -> String {
    "/usr/libexec/hostwatch/collect".to_string()
}

impl AgentConfig {
    /// Load configuration from `path`, or use defaults when the file is absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| {
                HostwatchError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            })
        } else {
            Ok(Self::default())
        }
    }

    /// Reject settings no run can succeed with
    pub fn validate(&self) -> Result<()> {
        if self.retries == 0 {
            return Err(HostwatchError::Config(
                "retries must be at least 1".to_string(),
            ));
        }
        if !self.offline && self.base_url.trim().is_empty() {
            return Err(HostwatchError::Config(
                "base_url is required unless running offline".to_string(),
            ));
        }
        if self.offline && self.unregister {
            return Err(HostwatchError::Offline(
                "cannot unregister without contacting the remote service".to_string(),
            ));
        }
        Ok(())
    }

    pub fn protocol(&self) -> ProtocolGeneration {
        ProtocolGeneration::from_legacy_flag(self.legacy_upload)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Name used for this host in log summaries
    pub fn host_name(&self) -> String {
        if let Some(name) = self.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        system_hostname().unwrap_or_else(|| "localhost".to_string())
    }
}

fn system_hostname() -> Option<String> {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .filter_map(|p| std::fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()))
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            legacy_upload: true,
            retries: default_retries(),
            backoff_secs: default_backoff_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            auth_method: AuthMethod::default(),
            username: None,
            password: None,
            display_name: None,
            account_number: None,
            offline: false,
            auto_update: false,
            register: false,
            reregister: false,
            unregister: false,
            force: false,
            core_collect: false,
            logging_file: default_logging_file(),
            state_dir: default_state_dir(),
            cache_dir: default_cache_dir(),
            schedule_file: default_schedule_file(),
            collector_command: default_collector_command(),
            rules_file: None,
            removal_file: None,
            branch_info: BranchInfo::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AgentConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.retries, 1);
        assert!(config.legacy_upload);
        assert_eq!(config.auth_method, AuthMethod::Basic);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hostwatch.toml");
        std::fs::write(
            &path,
            "retries = 3\nlegacy_upload = false\nauth_method = \"cert\"\n\n[branch_info]\nremote_branch = 4\nremote_leaf = 9\n",
        )
        .unwrap();

        let config = AgentConfig::load_or_default(&path).unwrap();
        assert_eq!(config.retries, 3);
        assert_eq!(config.protocol(), ProtocolGeneration::Modern);
        assert_eq!(config.auth_method, AuthMethod::Cert);
        assert_eq!(config.branch_info.remote_branch, 4);
        assert_eq!(config.backoff_secs, 180);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hostwatch.toml");
        std::fs::write(&path, "retries = \"many\"").unwrap();

        let err = AgentConfig::load_or_default(&path).unwrap_err();
        assert!(matches!(err, HostwatchError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let config = AgentConfig {
            retries: 0,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(AgentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_offline_unregister() {
        let config = AgentConfig {
            offline: true,
            unregister: true,
            ..AgentConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(HostwatchError::Offline(_))
        ));
    }

    #[test]
    fn test_display_name_wins() {
        let config = AgentConfig {
            display_name: Some("db-01".to_string()),
            ..AgentConfig::default()
        };
        assert_eq!(config.host_name(), "db-01");
    }

    #[test]
    fn test_auth_method_parse() {
        assert_eq!("BASIC".parse::<AuthMethod>().unwrap(), AuthMethod::Basic);
        assert_eq!("cert".parse::<AuthMethod>().unwrap(), AuthMethod::Cert);
        assert!("kerberos".parse::<AuthMethod>().is_err());
    }
}
