//! One agent invocation: registration, collection, upload

use hostwatch_client::RemoteService;
use hostwatch_core::{
    AgentConfig, BranchInfo, CollectionRules, HostwatchError, RegistrationRequest, Result,
};
use hostwatch_state::{CacheDir, StateStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::collection::{load_removal_config, load_rules, CollectionRunner};
use crate::registration::{registration_for, LocalCleanup, RegistrationManager};
use crate::schedule::{CronScheduler, Scheduler};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::upload::{UploadManager, UploadSummary};

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Unregistration confirmed (or forced)
    Unregistered,
    /// Remote service declined the unregistration
    UnregisterRefused,
    /// Host is not registered and registration was not requested
    NotRegistered,
    /// Offline run; the archive stays on disk
    Collected { archive: PathBuf },
    Uploaded(UploadSummary),
}

/// Sequences registration, collection and upload for one invocation
pub struct Orchestrator<R: RemoteService, C: CollectionRunner> {
    config: AgentConfig,
    remote: R,
    collector: C,
    store: StateStore,
    registration: Box<dyn RegistrationManager>,
    uploads: UploadManager<R>,
    host_name: String,
}

impl<R, C> Orchestrator<R, C>
where
    R: RemoteService + Clone + 'static,
    C: CollectionRunner,
{
    pub fn new(config: AgentConfig, remote: R, collector: C) -> Self {
        let scheduler = Arc::new(CronScheduler::new(config.schedule_file.clone()));
        Self::with_parts(config, remote, collector, Arc::new(TokioSleeper), scheduler)
    }

    /// Build with explicit sleeper and scheduler
    pub fn with_parts(
        config: AgentConfig,
        remote: R,
        collector: C,
        sleeper: Arc<dyn Sleeper>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let store = StateStore::new(config.state_dir.clone());
        let cleanup = LocalCleanup::new(
            store.clone(),
            CacheDir::new(config.cache_dir.clone()),
            scheduler,
        );
        let registration = registration_for(
            config.protocol(),
            &config,
            remote.clone(),
            store.clone(),
            cleanup,
        );
        let uploads =
            UploadManager::new(&config, remote.clone(), store.clone()).with_sleeper(sleeper);
        let host_name = config.host_name();

        Self {
            config,
            remote,
            collector,
            store,
            registration,
            uploads,
            host_name,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        self.config.validate()?;
        debug!(
            "Running with {} protocol (offline: {})",
            self.registration.generation(),
            self.config.offline
        );

        if self.config.unregister {
            return self.unregister().await;
        }

        if self.config.offline && self.config.auto_update {
            return Err(HostwatchError::Offline(
                "Cannot update rules in --offline mode. Disable auto_update in config file."
                    .to_string(),
            ));
        }

        if !self.config.offline {
            let request = RegistrationRequest {
                force_reregister: self.config.reregister,
                register: self.config.register || self.config.reregister,
            };
            let decision = self.registration.ensure_registered(request).await?;
            if !decision.may_proceed() {
                return Ok(RunOutcome::NotRegistered);
            }
        }

        let rules = self.rules().await?;
        let branch_info = if self.config.offline {
            BranchInfo::default()
        } else {
            self.config.branch_info
        };

        let removal = load_removal_config(self.config.removal_file.as_deref())?;
        if !removal.is_empty() {
            warn!("WARNING: Excluding data from files");
        }

        info!("Starting to collect data for {}", self.host_name);
        let artifact = self
            .collector
            .run(rules.as_ref(), &removal, &branch_info, &removal.report())
            .await?;
        let archive = self.collector.finalize(rules.as_ref(), &removal).await?;

        if self.config.offline {
            info!("Archive saved at {}", archive.display());
            return Ok(RunOutcome::Collected { archive });
        }

        let summary = self
            .uploads
            .upload(&artifact, artifact.collection_duration)
            .await?;
        Ok(RunOutcome::Uploaded(summary))
    }

    async fn unregister(&self) -> Result<RunOutcome> {
        if self.registration.unregister(self.config.force).await? {
            Ok(RunOutcome::Unregistered)
        } else {
            Ok(RunOutcome::UnregisterRefused)
        }
    }

    async fn rules(&self) -> Result<Option<CollectionRules>> {
        if self.config.core_collect {
            debug!("Core collection, no rule document");
            return Ok(None);
        }
        if self.config.auto_update && !self.config.offline {
            let rules = self.remote.fetch_collection_rules().await?;
            debug!(
                "Fetched rules version {}",
                rules.version.as_deref().unwrap_or("unknown")
            );
            return Ok(Some(rules));
        }
        load_rules(self.config.rules_file.as_deref())
    }
}
