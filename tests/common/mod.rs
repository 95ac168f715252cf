//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use straylight::economy::{Economy, EconomyDefaults};
use straylight::ledger::{ExecutionLedger, MemoryLedger};
use straylight::orchestrator::audit::AuditLog;
use straylight::orchestrator::queue::QueueItem;
use straylight::orchestrator::{spine, Orchestrator, PolicyConfig};
use straylight::tools::{Tool, ToolError};
use straylight::types::{Domain, Envelope, ToolResult};

/// Cognition-domain tool that succeeds with `{ok: true}` and counts how
/// many times its body actually ran.
pub struct EchoTool {
    executions: AtomicU32,
}

impl EchoTool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            executions: AtomicU32::new(0),
        })
    }

    pub fn executions(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn domain(&self) -> Domain {
        Domain::Cognition
    }

    fn estimate_cost(&self, _envelope: &Envelope) -> f64 {
        0.1
    }

    async fn execute(&self, _envelope: &Envelope) -> Result<ToolResult, ToolError> {
        spine::verify()?;
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::ok(serde_json::json!({"ok": true})).with_cost(0.1))
    }
}

/// Tool that always fails with a retryable error.
pub struct FlakyTool {
    executions: AtomicU32,
}

impl FlakyTool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            executions: AtomicU32::new(0),
        })
    }

    pub fn executions(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }

    fn domain(&self) -> Domain {
        Domain::Cognition
    }

    fn estimate_cost(&self, _envelope: &Envelope) -> f64 {
        0.05
    }

    async fn execute(&self, _envelope: &Envelope) -> Result<ToolResult, ToolError> {
        spine::verify()?;
        self.executions.fetch_add(1, Ordering::SeqCst);
        Err(ToolError::Retryable("flaky by design".to_owned()))
    }
}

/// A wired orchestrator over an in-memory ledger and temp-dir economy.
pub struct TestCore {
    pub orchestrator: Arc<Orchestrator>,
    pub economy: Arc<Economy>,
    pub queue_rx: Option<mpsc::Receiver<QueueItem>>,
    pub dir: tempfile::TempDir,
}

impl TestCore {
    pub fn build(policy: PolicyConfig, defaults: EconomyDefaults) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let economy = Arc::new(
            Economy::load(dir.path().join("economy.json"), defaults).expect("economy"),
        );
        let ledger: Arc<dyn ExecutionLedger> = Arc::new(MemoryLedger::new());
        let audit = AuditLog::from_writer(Box::new(std::io::sink()));
        let (orchestrator, queue_rx) =
            Orchestrator::new(Arc::clone(&economy), ledger, audit, policy);
        Self {
            orchestrator,
            economy,
            queue_rx: Some(queue_rx),
            dir,
        }
    }
}

/// Minimal cognition envelope for the echo tool.
pub fn echo_envelope() -> Envelope {
    let mut envelope = Envelope::new("echo", Domain::Cognition, "say");
    envelope.estimated_cost = 0.1;
    envelope
}
