//! Peer trust model gating externally sourced intents.
//!
//! Every intent source carries a reputation in `[0.0, 1.0]`, neutral at
//! 0.5. The identities `self`, `system`, and `user` are pinned at full
//! trust and never mutated. Scores move only through
//! [`TrustModel::update_trust`], and the peer map is rewritten to disk on
//! every mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Persisted schema version for the trust file.
const SCHEMA_VERSION: u32 = 1;

/// Identities that always score 1.0 and cannot be updated.
const PINNED_SOURCES: [&str; 3] = ["self", "system", "user"];

/// Default trust floor an intent source must clear.
pub const MIN_INTENT_TRUST: f64 = 0.4;

/// Reputation record for one peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerReputation {
    /// Peer identity.
    pub node_id: String,
    /// Trust score in `[0.0, 1.0]`; 0.5 is neutral.
    pub trust_score: f64,
    /// Number of recorded interactions.
    pub interactions: u64,
    /// When the peer was last updated.
    pub last_interaction: Option<DateTime<Utc>>,
    /// Accumulated update reasons.
    #[serde(default)]
    pub notes: String,
}

impl PeerReputation {
    fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_owned(),
            trust_score: 0.5,
            interactions: 0,
            last_interaction: None,
            notes: String::new(),
        }
    }

    fn update(&mut self, delta: f64, reason: &str) {
        self.trust_score = (self.trust_score + delta).clamp(0.0, 1.0);
        self.interactions = self.interactions.saturating_add(1);
        self.last_interaction = Some(Utc::now());
        if !reason.is_empty() {
            if self.notes.is_empty() {
                self.notes = reason.to_owned();
            } else {
                self.notes = format!("{}; {reason}", self.notes);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TrustFile {
    schema_version: u32,
    peers: BTreeMap<String, PeerReputation>,
}

impl Default for TrustFile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            peers: BTreeMap::new(),
        }
    }
}

/// Disk-backed map of peer reputations.
pub struct TrustModel {
    state: Mutex<TrustFile>,
    path: PathBuf,
}

impl std::fmt::Debug for TrustModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustModel").field("path", &self.path).finish()
    }
}

impl TrustModel {
    /// Load the trust file from `path`, starting empty when missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be parsed or has
    /// an unknown schema version.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let file: TrustFile = serde_json::from_str(&contents)?;
                if file.schema_version != SCHEMA_VERSION {
                    anyhow::bail!("unsupported trust schema version: {}", file.schema_version);
                }
                file
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TrustFile::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            state: Mutex::new(state),
            path,
        })
    }

    /// Trust score for a node: pinned identities score 1.0, unknown
    /// peers start neutral at 0.5.
    pub fn get_trust(&self, node_id: &str) -> f64 {
        if PINNED_SOURCES.contains(&node_id) {
            return 1.0;
        }
        self.lock()
            .peers
            .get(node_id)
            .map_or(0.5, |p| p.trust_score)
    }

    /// Apply a clamped delta to a peer's score, recording the reason.
    /// Pinned identities are ignored.
    pub fn update_trust(&self, node_id: &str, delta: f64, reason: &str) {
        if PINNED_SOURCES.contains(&node_id) {
            return;
        }
        let mut state = self.lock();
        state
            .peers
            .entry(node_id.to_owned())
            .or_insert_with(|| PeerReputation::new(node_id))
            .update(delta, reason);
        debug!(node_id, delta, reason, "trust updated");
        self.persist(&state);
    }

    /// Gatekeeper: should intents from this source be considered at all?
    pub fn verify_intent_source(&self, source: &str, min_trust: f64) -> bool {
        self.get_trust(source) >= min_trust
    }

    /// Snapshot of all known peers.
    pub fn peers(&self) -> Vec<PeerReputation> {
        self.lock().peers.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrustFile> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn persist(&self, state: &TrustFile) {
        let write = || -> anyhow::Result<()> {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let tmp = self.path.with_extension("json.tmp");
            std::fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
            std::fs::rename(&tmp, &self.path)?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!(path = %self.path.display(), error = %e, "failed to persist trust state");
        }
    }
}
