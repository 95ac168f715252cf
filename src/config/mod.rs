//! Configuration loading and management.
//!
//! Loads straylight configuration from `./straylight.toml` (or
//! `$STRAYLIGHT_CONFIG_PATH`). Environment variables override file
//! values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::economy::EconomyDefaults;
use crate::orchestrator::PolicyConfig;
use crate::types::RiskLevel;

// ── Top-level config ────────────────────────────────────────────

/// Top-level straylight configuration loaded from TOML.
///
/// Path: `./straylight.toml` or `$STRAYLIGHT_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StraylightConfig {
    /// HTTP surface settings (`[server]`).
    pub server: ServerConfig,
    /// Invocation gate policy (`[policy]`).
    pub policy: PolicySection,
    /// Economy startup values (`[economy]`).
    pub economy: EconomySection,
    /// Autonomy loop settings (`[autonomy]`).
    pub autonomy: AutonomySection,
    /// Filesystem paths for persistent state (`[paths]`).
    pub paths: PathsConfig,
}

impl StraylightConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from the TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: StraylightConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(StraylightConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(p) = env("STRAYLIGHT_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("straylight.toml")
    }

    /// Parse a TOML string into config (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: StraylightConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Server.
        if let Some(v) = env("STRAYLIGHT_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = env("ORCHESTRATOR_REQUIRE_TLS") {
            self.server.require_tls = parse_bool(&v);
        }
        if let Some(v) = env("ORCHESTRATOR_API_TOKEN") {
            self.server.api_token = Some(v);
        }
        if let Some(v) = env("ORCHESTRATOR_TOKENS_JSON") {
            match serde_json::from_str(&v) {
                Ok(tokens) => self.server.tokens = tokens,
                Err(_) => warn_invalid("ORCHESTRATOR_TOKENS_JSON", &v),
            }
        }

        // Policy.
        if let Some(v) = env("ORCHESTRATOR_KILL_SWITCH") {
            self.policy.kill_switch = parse_bool(&v);
        }
        if let Some(v) = env("ORCHESTRATOR_TOOL_ALLOWLIST") {
            self.policy.tool_allowlist = parse_list(&v);
        }
        if let Some(v) = env("ORCHESTRATOR_TOOL_DENYLIST") {
            self.policy.tool_denylist = parse_list(&v);
        }
        if let Some(v) = env("ORCHESTRATOR_DOMAIN_ALLOWLIST") {
            self.policy.domain_allowlist = parse_list(&v);
        }
        if let Some(v) = env("ORCHESTRATOR_DOMAIN_DENYLIST") {
            self.policy.domain_denylist = parse_list(&v);
        }
        if let Some(v) = env("ORCHESTRATOR_MAX_RISK") {
            self.policy.max_risk = v;
        }
        if let Some(v) = env("ORCHESTRATOR_TOOL_BUDGETS") {
            match serde_json::from_str(&v) {
                Ok(budgets) => self.policy.tool_budgets = budgets,
                Err(_) => warn_invalid("ORCHESTRATOR_TOOL_BUDGETS", &v),
            }
        }
        if let Some(v) = env("ORCHESTRATOR_TENANT_BUDGETS") {
            match serde_json::from_str(&v) {
                Ok(budgets) => self.policy.tenant_budgets = budgets,
                Err(_) => warn_invalid("ORCHESTRATOR_TENANT_BUDGETS", &v),
            }
        }
        if let Some(v) = env("ORCHESTRATOR_DEADLINE_MS") {
            match v.parse() {
                Ok(n) => self.policy.deadline_ms = Some(n),
                Err(_) => warn_invalid("ORCHESTRATOR_DEADLINE_MS", &v),
            }
        }
        if let Some(v) = env("ORCHESTRATOR_IDEMPOTENCY_TTL") {
            match v.parse() {
                Ok(n) => self.policy.idempotency_ttl_secs = n,
                Err(_) => warn_invalid("ORCHESTRATOR_IDEMPOTENCY_TTL", &v),
            }
        }
        if let Some(v) = env("ORCHESTRATOR_QUEUE_CAPACITY") {
            match v.parse() {
                Ok(n) => self.policy.queue_capacity = n,
                Err(_) => warn_invalid("ORCHESTRATOR_QUEUE_CAPACITY", &v),
            }
        }
        if let Some(v) = env("ORCHESTRATOR_WORKER") {
            self.policy.worker = parse_bool(&v);
        }

        // Economy.
        if let Some(v) = env("ORCHESTRATOR_BUDGET") {
            match v.parse() {
                Ok(n) => self.economy.budget = n,
                Err(_) => warn_invalid("ORCHESTRATOR_BUDGET", &v),
            }
        }
        if let Some(v) = env("ORCHESTRATOR_RESERVE") {
            match v.parse() {
                Ok(n) => self.economy.reserve = n,
                Err(_) => warn_invalid("ORCHESTRATOR_RESERVE", &v),
            }
        }
        if let Some(v) = env("ORCHESTRATOR_REGEN_RATE") {
            match v.parse() {
                Ok(n) => self.economy.regen_rate = n,
                Err(_) => warn_invalid("ORCHESTRATOR_REGEN_RATE", &v),
            }
        }
        if let Some(v) = env("ECONOMY_MAX_EVENTS") {
            match v.parse() {
                Ok(n) => self.economy.max_events = n,
                Err(_) => warn_invalid("ECONOMY_MAX_EVENTS", &v),
            }
        }
        if let Some(v) = env("ECONOMY_DECAY_FACTOR") {
            match v.parse() {
                Ok(n) => self.economy.decay_factor = n,
                Err(_) => warn_invalid("ECONOMY_DECAY_FACTOR", &v),
            }
        }
        if let Some(v) = env("ECONOMY_PATH") {
            self.economy.path = Some(v);
        }

        // Autonomy.
        if let Some(v) = env("STRAYLIGHT_AUTONOMY") {
            self.autonomy.enabled = parse_bool(&v);
        }
        if let Some(v) = env("STRAYLIGHT_HEARTBEAT_SECONDS") {
            match v.parse() {
                Ok(n) => self.autonomy.heartbeat_seconds = n,
                Err(_) => warn_invalid("STRAYLIGHT_HEARTBEAT_SECONDS", &v),
            }
        }
        if let Some(v) = env("AUTONOMY_STATE_PATH") {
            self.autonomy.state_path = Some(v);
        }
        if let Some(v) = env("AUTONOMY_EXPLAIN_PATH") {
            self.autonomy.explain_path = Some(v);
        }

        // Paths.
        if let Some(v) = env("STRAYLIGHT_DATA_DIR") {
            self.paths.data_dir = Some(v);
        }
        if let Some(v) = env("ORCHESTRATOR_AUDIT_PATH") {
            self.paths.audit_log = Some(v);
        }
        if let Some(v) = env("ORCHESTRATOR_DB_URL") {
            self.paths.db_url = Some(v);
        }
        if let Some(v) = env("TRUST_PATH") {
            self.paths.trust_path = Some(v);
        }
        if let Some(v) = env("MEMORY_STORE_PATH") {
            self.paths.memory_path = Some(v);
        }
    }

    // ── Derived values ──────────────────────────────────────────

    /// Root directory for persistent state. Explicit config wins, then
    /// the platform data dir, then `./data`.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.paths.data_dir {
            return PathBuf::from(dir);
        }
        directories::ProjectDirs::from("", "", "straylight")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("data"))
    }

    /// Economy state file path.
    pub fn economy_path(&self) -> PathBuf {
        self.economy
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir().join("economy.json"))
    }

    /// Audit JSONL path.
    pub fn audit_path(&self) -> PathBuf {
        self.paths
            .audit_log
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir().join("action_log.jsonl"))
    }

    /// Ledger database URL.
    pub fn db_url(&self) -> String {
        self.paths.db_url.clone().unwrap_or_else(|| {
            format!("sqlite:{}", self.data_dir().join("straylight.db").display())
        })
    }

    /// Trust state file path.
    pub fn trust_path(&self) -> PathBuf {
        self.paths
            .trust_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir().join("social_trust.json"))
    }

    /// Memory store file path.
    pub fn memory_path(&self) -> PathBuf {
        self.paths
            .memory_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir().join("memory.json"))
    }

    /// Intent stack file path.
    pub fn autonomy_state_path(&self) -> PathBuf {
        self.autonomy
            .state_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir().join("autonomy_state.json"))
    }

    /// Latest-explanation file path.
    pub fn explain_path(&self) -> PathBuf {
        self.autonomy
            .explain_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir().join("explainability.json"))
    }

    /// Economy startup values.
    pub fn economy_defaults(&self) -> EconomyDefaults {
        EconomyDefaults {
            budget: self.economy.budget,
            reserve: self.economy.reserve,
            regen_rate: self.economy.regen_rate,
            max_events: self.economy.max_events,
            decay_factor: self.economy.decay_factor,
        }
    }

    /// Gate policy assembled from the policy section.
    pub fn policy_config(&self) -> PolicyConfig {
        let max_risk = self
            .policy
            .max_risk
            .parse::<RiskLevel>()
            .unwrap_or(RiskLevel::High);
        PolicyConfig {
            kill_switch: self.policy.kill_switch,
            tool_allowlist: to_set(&self.policy.tool_allowlist),
            tool_denylist: to_set(&self.policy.tool_denylist),
            domain_allowlist: to_set(&self.policy.domain_allowlist),
            domain_denylist: to_set(&self.policy.domain_denylist),
            max_risk,
            tool_budgets: self.policy.tool_budgets.clone(),
            tenant_budgets: self.policy.tenant_budgets.clone(),
            default_deadline_ms: self.policy.deadline_ms,
            idempotency_ttl: Duration::from_secs(self.policy.idempotency_ttl_secs),
            breaker_threshold: self.policy.breaker_threshold,
            breaker_reset: Duration::from_secs(self.policy.breaker_reset_secs),
            queue_capacity: self.policy.queue_capacity,
        }
    }

    /// Token → scopes map for the HTTP surface. The single API token, if
    /// set, gets the admin wildcard.
    pub fn token_scopes(&self) -> HashMap<String, Vec<String>> {
        let mut tokens = self.server.tokens.clone();
        if let Some(token) = &self.server.api_token {
            tokens
                .entry(token.clone())
                .or_insert_with(|| vec!["*".to_owned()]);
        }
        tokens
    }
}

// ── Sections ────────────────────────────────────────────────────

/// HTTP surface settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener.
    pub bind: String,
    /// Refuse plaintext requests (checks `x-forwarded-proto`).
    pub require_tls: bool,
    /// Single admin token (gets the `*` scope).
    pub api_token: Option<String>,
    /// Token → scope list map.
    pub tokens: HashMap<String, Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_owned(),
            require_tls: false,
            api_token: None,
            tokens: HashMap::new(),
        }
    }
}

/// Invocation gate policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// Refuse every call when set.
    pub kill_switch: bool,
    /// When non-empty, only these tools may be invoked.
    pub tool_allowlist: Vec<String>,
    /// Tools that may never be invoked.
    pub tool_denylist: Vec<String>,
    /// When non-empty, only these domains may be invoked.
    pub domain_allowlist: Vec<String>,
    /// Domains that may never be invoked.
    pub domain_denylist: Vec<String>,
    /// Maximum admissible risk level ("low", "medium", "high").
    pub max_risk: String,
    /// Per-tool cost ceilings.
    pub tool_budgets: HashMap<String, f64>,
    /// Per-tenant cost ceilings.
    pub tenant_budgets: HashMap<String, f64>,
    /// Default execution deadline in milliseconds.
    pub deadline_ms: Option<u64>,
    /// Idempotency cache TTL in seconds.
    pub idempotency_ttl_secs: u64,
    /// Consecutive failures before a breaker opens.
    pub breaker_threshold: u32,
    /// Seconds an open breaker stays open.
    pub breaker_reset_secs: u64,
    /// Async queue capacity.
    pub queue_capacity: usize,
    /// Whether to run the async queue worker.
    pub worker: bool,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            kill_switch: false,
            tool_allowlist: Vec::new(),
            tool_denylist: Vec::new(),
            domain_allowlist: Vec::new(),
            domain_denylist: Vec::new(),
            max_risk: "high".to_owned(),
            tool_budgets: HashMap::new(),
            tenant_budgets: HashMap::new(),
            deadline_ms: None,
            idempotency_ttl_secs: 3600,
            breaker_threshold: 5,
            breaker_reset_secs: 30,
            queue_capacity: 256,
            worker: true,
        }
    }
}

/// Economy startup values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EconomySection {
    /// State file path override.
    pub path: Option<String>,
    /// Startup budget.
    pub budget: f64,
    /// Startup reserve.
    pub reserve: f64,
    /// Regen per minute.
    pub regen_rate: f64,
    /// Event ring capacity.
    pub max_events: usize,
    /// Realized-value scaling factor.
    pub decay_factor: f64,
}

impl Default for EconomySection {
    fn default() -> Self {
        Self {
            path: None,
            budget: 300.0,
            reserve: 100.0,
            regen_rate: 0.0,
            max_events: 500,
            decay_factor: 1.0,
        }
    }
}

/// Autonomy loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutonomySection {
    /// Run the heartbeat loop.
    pub enabled: bool,
    /// Seconds between cycles.
    pub heartbeat_seconds: u64,
    /// Intent stack file path override.
    pub state_path: Option<String>,
    /// Explanation file path override.
    pub explain_path: Option<String>,
}

impl Default for AutonomySection {
    fn default() -> Self {
        Self {
            enabled: false,
            heartbeat_seconds: 60,
            state_path: None,
            explain_path: None,
        }
    }
}

/// Filesystem paths for persistent state.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root data directory.
    pub data_dir: Option<String>,
    /// Audit JSONL path.
    pub audit_log: Option<String>,
    /// Ledger database URL.
    pub db_url: Option<String>,
    /// Trust state path.
    pub trust_path: Option<String>,
    /// Memory store path.
    pub memory_path: Option<String>,
}

// ── Helpers ─────────────────────────────────────────────────────

fn parse_bool(v: &str) -> bool {
    matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn parse_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn to_set(list: &[String]) -> HashSet<String> {
    list.iter().cloned().collect()
}

fn warn_invalid(var: &str, value: &str) {
    tracing::warn!(var, value, "ignoring invalid env override");
}
