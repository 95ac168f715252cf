//! Top-level runtime assembly.
//!
//! Builds every component once at startup and injects dependencies
//! explicitly — no global singletons, no module-level caches. The
//! runtime owns the queue receiver until the worker is started and
//! hands the HTTP surface a ready [`ServerState`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::mpsc;
use tracing::info;

use crate::autonomy::{run_heartbeat, AutonomyController, AutonomyPaths};
use crate::config::StraylightConfig;
use crate::economy::Economy;
use crate::ledger::sqlite::SqliteLedger;
use crate::ledger::ExecutionLedger;
use crate::observer::Observer;
use crate::orchestrator::audit::AuditLog;
use crate::orchestrator::queue::QueueItem;
use crate::orchestrator::Orchestrator;
use crate::server::{prometheus_handle, ServerState};
use crate::tools::maintainer::MaintainerTool;
use crate::tools::memory::{MemoryStore, MemoryTool};
use crate::trust::TrustModel;

/// Fully wired straylight instance.
pub struct Runtime {
    /// Source configuration.
    pub config: StraylightConfig,
    /// Shared economy.
    pub economy: Arc<Economy>,
    /// Shared ledger.
    pub ledger: Arc<dyn ExecutionLedger>,
    /// The invocation gate.
    pub orchestrator: Arc<Orchestrator>,
    /// The autonomy controller.
    pub controller: Arc<AutonomyController>,
    /// Shared memory store.
    pub memory: Arc<MemoryStore>,
    queue_rx: Option<mpsc::Receiver<QueueItem>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").finish()
    }
}

impl Runtime {
    /// Construct every component from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when any persistent state fails to open.
    pub async fn build(config: StraylightConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(config.data_dir())
            .context("failed to create data directory")?;
        let economy = Arc::new(
            Economy::load(config.economy_path(), config.economy_defaults())
                .context("failed to load economy state")?,
        );
        let ledger: Arc<dyn ExecutionLedger> = Arc::new(
            SqliteLedger::connect(&config.db_url())
                .await
                .context("failed to open execution ledger")?,
        );
        let audit =
            AuditLog::open(config.audit_path()).context("failed to open audit log")?;
        let (orchestrator, queue_rx) = Orchestrator::new(
            Arc::clone(&economy),
            Arc::clone(&ledger),
            audit,
            config.policy_config(),
        );

        let memory = Arc::new(
            MemoryStore::load(config.memory_path()).context("failed to load memory store")?,
        );
        orchestrator.register(Arc::new(MaintainerTool::new(Arc::clone(&economy))));
        orchestrator.register(Arc::new(MemoryTool::new(Arc::clone(&memory))));

        let trust = Arc::new(
            TrustModel::load(config.trust_path()).context("failed to load trust state")?,
        );
        let observer = Observer::new(Arc::clone(&ledger), Arc::clone(&economy));
        let controller = Arc::new(
            AutonomyController::new(
                Arc::clone(&orchestrator),
                observer,
                Arc::clone(&economy),
                trust,
                Arc::clone(&memory) as Arc<dyn crate::tools::memory::Hippocampus>,
                Some(Arc::clone(&memory)),
                AutonomyPaths {
                    state_path: config.autonomy_state_path(),
                    explain_path: config.explain_path(),
                },
            )
            .context("failed to build autonomy controller")?,
        );

        info!(tools = ?orchestrator.tool_names(), "runtime assembled");
        Ok(Self {
            config,
            economy,
            ledger,
            orchestrator,
            controller,
            memory,
            queue_rx: Some(queue_rx),
        })
    }

    /// Start the async queue worker. Returns `None` when it is already
    /// running.
    pub fn start_worker(&mut self) -> Option<tokio::task::JoinHandle<()>> {
        let rx = self.queue_rx.take()?;
        Some(self.orchestrator.spawn_worker(rx))
    }

    /// Start the autonomy heartbeat at the configured interval.
    pub fn start_autonomy(&self) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(&self.controller);
        let interval = Duration::from_secs(self.config.autonomy.heartbeat_seconds.max(1));
        tokio::spawn(run_heartbeat(controller, interval))
    }

    /// Assemble the HTTP surface state.
    pub fn server_state(&self) -> Arc<ServerState> {
        Arc::new(ServerState {
            orchestrator: Arc::clone(&self.orchestrator),
            explain_path: self.config.explain_path(),
            tokens: self.config.token_scopes(),
            require_tls: self.config.server.require_tls,
            prometheus: prometheus_handle(),
        })
    }
}
