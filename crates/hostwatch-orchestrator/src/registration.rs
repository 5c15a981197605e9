//! Registration and unregistration per protocol generation
//!
//! Both generations share one contract. The legacy generation registers
//! explicitly and keys everything by machine id; the modern generation leaves
//! registration to the server, so only unregistration does real work there.
//!
//! Local markers change only after the remote side confirmed the change, with
//! one documented exception: a forced unregistration still cleans up locally
//! when the remote service could not confirm anything.

use async_trait::async_trait;
use hostwatch_client::{resolve_credentials, RemoteService};
use hostwatch_core::fail_open::fail_open;
use hostwatch_core::{
    AgentConfig, ProtocolGeneration, RegistrationDecision, RegistrationRequest, RegistrationState,
    Result,
};
use hostwatch_state::{CacheDir, MachineIdentity, StateStore};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::schedule::Scheduler;

/// Decides and performs registration for one protocol generation
#[async_trait]
pub trait RegistrationManager: Send + Sync {
    fn generation(&self) -> ProtocolGeneration;

    /// Whether this host may go on to collect and upload
    async fn ensure_registered(&self, request: RegistrationRequest)
        -> Result<RegistrationDecision>;

    /// Unregister this host; `force` cleans up locally even without remote confirmation
    async fn unregister(&self, force: bool) -> Result<bool>;
}

/// Select the registration manager for `generation`
pub fn registration_for<R: RemoteService + 'static>(
    generation: ProtocolGeneration,
    config: &AgentConfig,
    remote: R,
    store: StateStore,
    cleanup: LocalCleanup,
) -> Box<dyn RegistrationManager> {
    match generation {
        ProtocolGeneration::Legacy => {
            Box::new(LegacyRegistration::new(config.clone(), remote, store, cleanup))
        }
        ProtocolGeneration::Modern => Box::new(ModernRegistration::new(config, remote, cleanup)),
    }
}

/// Local side of unregistration
pub struct LocalCleanup {
    store: StateStore,
    cache: CacheDir,
    scheduler: Arc<dyn Scheduler>,
}

impl LocalCleanup {
    pub fn new(store: StateStore, cache: CacheDir, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            store,
            cache,
            scheduler,
        }
    }

    /// Write the unregistered marker, then best-effort housekeeping
    ///
    /// The marker write is mandatory; schedule removal and cache deletion are
    /// fail-open.
    pub async fn run(&self, remove_schedule: bool) -> Result<()> {
        self.store.mark_unregistered()?;
        if remove_schedule {
            fail_open("remove_scheduling", || self.scheduler.remove_scheduling()).await;
        }
        fail_open("delete_cache_files", || async { self.cache.clear() }).await;
        Ok(())
    }
}

/// Explicit agent-side registration keyed by machine id
pub struct LegacyRegistration<R: RemoteService> {
    config: AgentConfig,
    remote: R,
    store: StateStore,
    cleanup: LocalCleanup,
    host_name: String,
}

impl<R: RemoteService> LegacyRegistration<R> {
    pub fn new(config: AgentConfig, remote: R, store: StateStore, cleanup: LocalCleanup) -> Self {
        let host_name = config.host_name();
        Self {
            config,
            remote,
            store,
            cleanup,
            host_name,
        }
    }

    /// Bring the local markers in line with a confirmed remote answer
    fn reconcile(&self, registered: bool) -> Result<()> {
        let local = self.store.registration_state();
        match (registered, local) {
            (true, RegistrationState::Registered) | (false, RegistrationState::Unregistered) => {
                Ok(())
            }
            (true, _) => {
                debug!("Local state was {}, remote reports registered", local);
                self.store.mark_registered()
            }
            (false, RegistrationState::Registered) => {
                warn!("Local state says registered but the remote service does not know this host");
                self.store.mark_unregistered()
            }
            (false, _) => Ok(()),
        }
    }
}

#[async_trait]
impl<R: RemoteService> RegistrationManager for LegacyRegistration<R> {
    fn generation(&self) -> ProtocolGeneration {
        ProtocolGeneration::Legacy
    }

    async fn ensure_registered(
        &self,
        request: RegistrationRequest,
    ) -> Result<RegistrationDecision> {
        debug!("Trying registration.");

        if request.force_reregister {
            self.store.clear_registration()?;
            debug!("Re-register set, forcing registration.");
        }

        // Regenerating also discards the old machine-id record
        let identity = MachineIdentity::resolve(&self.store, request.force_reregister)?;
        debug!("Machine-id: {}", identity);

        let registered = self.remote.check_registration().await?;
        self.reconcile(registered)?;

        if registered {
            if request.register {
                info!("This host has already been registered.");
            }
            return Ok(RegistrationDecision::AlreadyRegistered);
        }

        if !request.register {
            info!("This host has not been registered. Use --register to register this host.");
            return Ok(RegistrationDecision::NotRegistered);
        }

        resolve_credentials(&self.config)?;
        self.remote.register().await?;
        self.store.mark_registered()?;
        info!(
            "Successfully registered {} (machine id {})",
            self.host_name, identity
        );
        Ok(RegistrationDecision::NewlyRegistered)
    }

    async fn unregister(&self, force: bool) -> Result<bool> {
        let registered = match self.remote.check_registration().await {
            Ok(registered) => registered,
            Err(e) if force => {
                // No remote confirmation: local cleanup on --force is intentional
                warn!(
                    "Could not check registration status ({}), forcing local unregistration",
                    e
                );
                self.cleanup.run(true).await?;
                info!("Unregistered {} locally (forced)", self.host_name);
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        let unregistered = if registered {
            self.remote.unregister().await?
        } else {
            info!("This system is already unregistered.");
            true
        };

        if unregistered {
            self.cleanup.run(true).await?;
            info!("Successfully unregistered {}", self.host_name);
        } else {
            error!("Failed to unregister {}", self.host_name);
        }
        Ok(unregistered)
    }
}

/// Server-assumed registration
pub struct ModernRegistration<R: RemoteService> {
    remote: R,
    cleanup: LocalCleanup,
    host_name: String,
}

impl<R: RemoteService> ModernRegistration<R> {
    pub fn new(config: &AgentConfig, remote: R, cleanup: LocalCleanup) -> Self {
        Self {
            remote,
            cleanup,
            host_name: config.host_name(),
        }
    }
}

#[async_trait]
impl<R: RemoteService> RegistrationManager for ModernRegistration<R> {
    fn generation(&self) -> ProtocolGeneration {
        ProtocolGeneration::Modern
    }

    async fn ensure_registered(
        &self,
        _request: RegistrationRequest,
    ) -> Result<RegistrationDecision> {
        debug!("Registration is handled by the remote service");
        Ok(RegistrationDecision::Assumed)
    }

    async fn unregister(&self, force: bool) -> Result<bool> {
        let unregistered = match self.remote.unregister().await {
            Ok(unregistered) => unregistered,
            Err(e) if force => {
                warn!("Unregistration request failed ({}), continuing because of --force", e);
                false
            }
            Err(e) => return Err(e),
        };

        if unregistered || force {
            self.cleanup.run(false).await?;
        }

        if unregistered {
            info!("Successfully unregistered {}", self.host_name);
        } else if force {
            warn!(
                "Unregistered {} locally without confirmation from the remote service",
                self.host_name
            );
        } else {
            error!("Failed to unregister {}", self.host_name);
        }
        Ok(unregistered || force)
    }
}
