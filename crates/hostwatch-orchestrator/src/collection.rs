//! Collection runner capability and the external-command implementation

use async_trait::async_trait;
use hostwatch_core::{
    ArchiveArtifact, BlacklistReport, BranchInfo, CollectionRules, HostwatchError, RemovalConfig,
    Result,
};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument};

const ARCHIVE_NAME: &str = "hostwatch-archive.tar.gz";
const MANIFEST_NAME: &str = "collection.json";
const ARCHIVE_CONTENT_TYPE: &str = "application/vnd.hostwatch.advisor+tgz";

/// Produces the archive for one run
#[async_trait]
pub trait CollectionRunner: Send + Sync {
    /// Collect data under the given rules and exclusions
    async fn run(
        &self,
        rules: Option<&CollectionRules>,
        removal: &RemovalConfig,
        branch_info: &BranchInfo,
        blacklist_report: &BlacklistReport,
    ) -> Result<ArchiveArtifact>;

    /// Finish the run and return where the output was left
    async fn finalize(
        &self,
        rules: Option<&CollectionRules>,
        removal: &RemovalConfig,
    ) -> Result<PathBuf>;
}

#[derive(Serialize)]
struct CollectionRequest<'a> {
    rules: Option<&'a CollectionRules>,
    removal: &'a RemovalConfig,
    branch_info: &'a BranchInfo,
    blacklist_report: &'a BlacklistReport,
}

#[derive(Serialize)]
struct CollectionManifest<'a> {
    rules_version: Option<&'a str>,
    blacklist_report: BlacklistReport,
    archive: &'a Path,
}

/// Runs an external collector program
///
/// The program receives the request as JSON on stdin and `--output <path>`
/// on its command line; it must leave the archive at that path.
#[derive(Debug, Clone)]
pub struct CommandCollector {
    program: PathBuf,
    args: Vec<String>,
    work_dir: PathBuf,
}

impl CommandCollector {
    pub fn new(program: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: work_dir.into(),
        }
    }

    /// Parse a whitespace-separated command line such as `collector_command`
    pub fn from_command_line(command: &str, work_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            HostwatchError::Config("collector_command must not be empty".to_string())
        })?;
        Ok(Self::new(program, work_dir).with_args(parts.map(str::to_string)))
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn archive_path(&self) -> PathBuf {
        self.work_dir.join(ARCHIVE_NAME)
    }
}

#[async_trait]
impl CollectionRunner for CommandCollector {
    #[instrument(skip_all, fields(program = %self.program.display()))]
    async fn run(
        &self,
        rules: Option<&CollectionRules>,
        removal: &RemovalConfig,
        branch_info: &BranchInfo,
        blacklist_report: &BlacklistReport,
    ) -> Result<ArchiveArtifact> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let archive = self.archive_path();
        let request = serde_json::to_vec(&CollectionRequest {
            rules,
            removal,
            branch_info,
            blacklist_report,
        })?;

        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--output")
            .arg(&archive)
            .current_dir(&self.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                HostwatchError::Collection(format!(
                    "Failed to start collector {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        // Stdin is fed concurrently with draining stdout/stderr
        let feeder = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                // Dropping stdin afterwards closes the pipe so the collector sees EOF
                stdin.write_all(&request).await
            })
        });

        let output = child.wait_with_output().await?;
        let elapsed = started.elapsed();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HostwatchError::Collection(format!(
                "Collector exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!("Collector exited without reading the whole request");
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => {
                    return Err(HostwatchError::Collection(format!(
                        "Failed to send request to collector: {}",
                        e
                    )))
                }
            }
        }
        debug!(
            "Collector output: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );

        let bytes = tokio::fs::read(&archive).await.map_err(|e| {
            HostwatchError::Collection(format!(
                "Collector produced no archive at {}: {}",
                archive.display(),
                e
            ))
        })?;
        info!(
            "Collected {} bytes in {:.1}s",
            bytes.len(),
            elapsed.as_secs_f64()
        );
        Ok(ArchiveArtifact::new(bytes, ARCHIVE_CONTENT_TYPE).with_duration(elapsed))
    }

    async fn finalize(
        &self,
        rules: Option<&CollectionRules>,
        removal: &RemovalConfig,
    ) -> Result<PathBuf> {
        let archive = self.archive_path();
        if !tokio::fs::try_exists(&archive).await? {
            return Err(HostwatchError::Collection(format!(
                "No archive to finalize at {}",
                archive.display()
            )));
        }

        let manifest = CollectionManifest {
            rules_version: rules.and_then(|r| r.version.as_deref()),
            blacklist_report: removal.report(),
            archive: &archive,
        };
        tokio::fs::write(
            self.work_dir.join(MANIFEST_NAME),
            serde_json::to_vec_pretty(&manifest)?,
        )
        .await?;
        Ok(archive)
    }
}

/// Load collection rules from a local JSON file
pub fn load_rules(path: Option<&Path>) -> Result<Option<CollectionRules>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let content = std::fs::read_to_string(path).map_err(|e| {
        HostwatchError::Config(format!("Failed to read rules {}: {}", path.display(), e))
    })?;
    let document: serde_json::Value = serde_json::from_str(&content)?;
    let version = document
        .get("version")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    debug!("Loaded rules from {}", path.display());
    Ok(Some(CollectionRules { version, document }))
}

/// Load operator exclusions from a TOML file; absent means no exclusions
pub fn load_removal_config(path: Option<&Path>) -> Result<RemovalConfig> {
    let Some(path) = path else {
        return Ok(RemovalConfig::default());
    };
    if !path.exists() {
        debug!("No removal config at {}", path.display());
        return Ok(RemovalConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| {
        HostwatchError::Config(format!(
            "Failed to parse removal config {}: {}",
            path.display(),
            e
        ))
    })
}
