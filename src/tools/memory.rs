//! File-backed memory tool and the hippocampus consolidation pass.
//!
//! The [`MemoryStore`] keeps episodic entries and learned skills in one
//! JSON file. The [`MemoryTool`] exposes it through the orchestrator
//! (store_episodic, retrieve, search_patterns, store_skill, get_skills);
//! the [`Hippocampus`] trait exposes the consolidation pass the autonomy
//! controller runs during idle ticks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::orchestrator::spine;
use crate::types::{Domain, Envelope, ToolResult};

use super::{Tool, ToolError};

/// Persisted schema version for the memory file.
const SCHEMA_VERSION: u32 = 1;

/// Entries below this relevance are candidates for pruning.
const PRUNE_RELEVANCE: f64 = 0.2;

/// Episodic entries idle this many days lose relevance during
/// consolidation.
const STALE_AFTER_DAYS: i64 = 7;

/// Hard cap on episodic entries; the lowest-relevance overflow is pruned.
const MAX_EPISODIC: usize = 500;

/// One remembered episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicEntry {
    /// Entry id.
    pub id: String,
    /// Free-form remembered content.
    pub content: serde_json::Value,
    /// Classification tags used by pattern search.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Decaying usefulness score in `[0.0, 1.0]`.
    pub relevance: f64,
    /// When the episode was stored.
    pub created_at: DateTime<Utc>,
    /// Last retrieval touching this entry.
    pub last_access: DateTime<Utc>,
}

/// One learned skill outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEntry {
    /// Skill identifier (usually an intent type).
    pub skill: String,
    /// Whether the last exercise of the skill succeeded.
    pub success: bool,
    /// When the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoryFile {
    schema_version: u32,
    episodic: Vec<EpisodicEntry>,
    skills: Vec<SkillEntry>,
}

impl Default for MemoryFile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            episodic: Vec::new(),
            skills: Vec::new(),
        }
    }
}

/// Result of a consolidation pass.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConsolidationStats {
    /// Entries removed.
    pub pruned: usize,
    /// Entries kept.
    pub kept: usize,
}

/// Memory consolidation collaborator, invoked during idle autonomy ticks.
#[async_trait]
pub trait Hippocampus: Send + Sync {
    /// Prune stale low-relevance memories; returns pruned/kept counts.
    async fn consolidate(&self) -> ConsolidationStats;
}

/// JSON-file-backed episodic and skill memory.
pub struct MemoryStore {
    state: Mutex<MemoryFile>,
    path: PathBuf,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("path", &self.path).finish()
    }
}

impl MemoryStore {
    /// Load the store from `path`, starting empty when the file is
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be parsed or has
    /// an unknown schema version.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let file: MemoryFile = serde_json::from_str(&contents)?;
                if file.schema_version != SCHEMA_VERSION {
                    anyhow::bail!("unsupported memory schema version: {}", file.schema_version);
                }
                file
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MemoryFile::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            state: Mutex::new(state),
            path,
        })
    }

    /// Store an episodic entry; returns its id.
    pub fn store_episodic(&self, content: serde_json::Value, tags: Vec<String>) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut state = self.lock();
        state.episodic.push(EpisodicEntry {
            id: id.clone(),
            content,
            tags,
            relevance: 1.0,
            created_at: now,
            last_access: now,
        });
        self.persist(&state);
        id
    }

    /// Retrieve up to `limit` entries whose serialized content or tags
    /// contain `query` (case-insensitive). Matches are touched, boosting
    /// their survival through consolidation.
    pub fn retrieve(&self, query: &str, limit: usize) -> Vec<EpisodicEntry> {
        let needle = query.to_lowercase();
        let now = Utc::now();
        let mut state = self.lock();
        let mut hits = Vec::new();
        for entry in state.episodic.iter_mut() {
            if hits.len() >= limit {
                break;
            }
            let matches = needle.is_empty()
                || entry.content.to_string().to_lowercase().contains(&needle)
                || entry.tags.iter().any(|t| t.to_lowercase().contains(&needle));
            if matches {
                entry.last_access = now;
                entry.relevance = (entry.relevance + 0.1).min(1.0);
                hits.push(entry.clone());
            }
        }
        self.persist(&state);
        hits
    }

    /// Tag frequency across episodic memory, most common first.
    pub fn search_patterns(&self, limit: usize) -> Vec<(String, usize)> {
        let state = self.lock();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &state.episodic {
            for tag in &entry.tags {
                let slot = counts.entry(tag.clone()).or_insert(0);
                *slot = slot.saturating_add(1);
            }
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }

    /// Record a skill outcome.
    pub fn store_skill(&self, skill: &str, success: bool) {
        let mut state = self.lock();
        state.skills.push(SkillEntry {
            skill: skill.to_owned(),
            success,
            recorded_at: Utc::now(),
        });
        self.persist(&state);
    }

    /// All recorded skill outcomes.
    pub fn skills(&self) -> Vec<SkillEntry> {
        self.lock().skills.clone()
    }

    /// Number of episodic entries currently held.
    pub fn episodic_len(&self) -> usize {
        self.lock().episodic.len()
    }

    fn consolidate_now(&self) -> ConsolidationStats {
        let now = Utc::now();
        let mut state = self.lock();
        let before = state.episodic.len();

        // Stale entries decay before the prune decision.
        for entry in state.episodic.iter_mut() {
            let idle_days = now.signed_duration_since(entry.last_access).num_days();
            if idle_days >= STALE_AFTER_DAYS {
                entry.relevance *= 0.5;
            }
        }
        state.episodic.retain(|e| e.relevance >= PRUNE_RELEVANCE);

        // Overflow beyond the cap drops the least relevant entries.
        if state.episodic.len() > MAX_EPISODIC {
            state
                .episodic
                .sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
            state.episodic.truncate(MAX_EPISODIC);
        }

        let kept = state.episodic.len();
        self.persist(&state);
        let pruned = before.saturating_sub(kept);
        debug!(pruned, kept, "memory consolidation pass");
        ConsolidationStats { pruned, kept }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryFile> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn persist(&self, state: &MemoryFile) {
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
            warn!(path = %self.path.display(), error = %e, "failed to persist memory store");
        }
    }
}

#[async_trait]
impl Hippocampus for MemoryStore {
    async fn consolidate(&self) -> ConsolidationStats {
        self.consolidate_now()
    }
}

/// Orchestrator-facing adapter over the [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryTool {
    store: Arc<MemoryStore>,
}

impl MemoryTool {
    /// Wrap a shared memory store.
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn domain(&self) -> Domain {
        Domain::Memory
    }

    fn estimate_cost(&self, _envelope: &Envelope) -> f64 {
        0.1
    }

    async fn execute(&self, envelope: &Envelope) -> Result<ToolResult, ToolError> {
        spine::verify()?;

        match envelope.action.as_str() {
            "store_episodic" => {
                let content = envelope
                    .context
                    .get("content")
                    .cloned()
                    .ok_or_else(|| ToolError::Fatal("store_episodic requires 'content'".into()))?;
                let tags = envelope
                    .context
                    .get("tags")
                    .and_then(|v| v.as_array().cloned())
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect();
                let id = self.store.store_episodic(content, tags);
                Ok(ToolResult::ok(serde_json::json!({"stored": id})).with_cost(0.1))
            }
            "retrieve" => {
                let query = envelope
                    .context
                    .get("query")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let limit = context_limit(envelope, 5);
                let entries = self.store.retrieve(query, limit);
                Ok(ToolResult::ok(serde_json::json!({"entries": entries})).with_cost(0.1))
            }
            "search_patterns" => {
                let limit = context_limit(envelope, 1);
                let patterns: Vec<serde_json::Value> = self
                    .store
                    .search_patterns(limit)
                    .into_iter()
                    .map(|(tag, count)| serde_json::json!({"tag": tag, "count": count}))
                    .collect();
                Ok(ToolResult::ok(serde_json::json!({"patterns": patterns})).with_cost(0.1))
            }
            "store_skill" => {
                let skill = envelope
                    .context
                    .get("skill")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ToolError::Fatal("store_skill requires 'skill'".into()))?;
                let success = envelope
                    .context
                    .get("success")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                self.store.store_skill(skill, success);
                Ok(ToolResult::ok(serde_json::json!({"stored": skill})).with_cost(0.05))
            }
            "get_skills" => Ok(ToolResult::ok(
                serde_json::json!({"skills": self.store.skills()}),
            )
            .with_cost(0.05)),
            other => Err(ToolError::UnknownAction {
                tool: self.name().to_owned(),
                action: other.to_owned(),
            }),
        }
    }
}

fn context_limit(envelope: &Envelope, default: usize) -> usize {
    envelope
        .context
        .get("limit")
        .and_then(serde_json::Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (Arc<MemoryStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MemoryStore::load(dir.path().join("memory.json")).expect("load");
        (Arc::new(store), dir)
    }

    #[test]
    fn test_store_and_retrieve() {
        let (store, _dir) = temp_store();
        store.store_episodic(
            serde_json::json!({"note": "orchestrator deployed"}),
            vec!["ops".to_owned()],
        );
        store.store_episodic(serde_json::json!({"note": "lunch"}), vec![]);

        let hits = store.retrieve("orchestrator", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tags, vec!["ops"]);
    }

    #[test]
    fn test_search_patterns_ranks_by_frequency() {
        let (store, _dir) = temp_store();
        for _ in 0..3 {
            store.store_episodic(serde_json::json!({}), vec!["latency".to_owned()]);
        }
        store.store_episodic(serde_json::json!({}), vec!["cost".to_owned()]);

        let ranked = store.search_patterns(2);
        assert_eq!(ranked[0], ("latency".to_owned(), 3));
        assert_eq!(ranked[1], ("cost".to_owned(), 1));
    }

    #[tokio::test]
    async fn test_consolidate_prunes_low_relevance() {
        let (store, _dir) = temp_store();
        store.store_episodic(serde_json::json!({"keep": true}), vec![]);
        {
            let mut state = store.lock();
            state.episodic.push(EpisodicEntry {
                id: "stale".to_owned(),
                content: serde_json::json!({}),
                tags: vec![],
                relevance: 0.05,
                created_at: Utc::now(),
                last_access: Utc::now(),
            });
        }

        let stats = store.consolidate().await;
        assert_eq!(stats.pruned, 1);
        assert_eq!(stats.kept, 1);
        assert_eq!(store.episodic_len(), 1);
    }

    #[tokio::test]
    async fn test_memory_tool_refuses_outside_spine() {
        let (store, _dir) = temp_store();
        let tool = MemoryTool::new(store);
        let envelope = Envelope::new("memory", Domain::Memory, "get_skills");
        let err = tool.execute(&envelope).await.expect_err("must refuse");
        assert!(matches!(err, ToolError::SpineViolation(_)));
    }

    #[tokio::test]
    async fn test_memory_tool_unknown_action() {
        let (store, _dir) = temp_store();
        let tool = MemoryTool::new(store);
        let envelope = Envelope::new("memory", Domain::Memory, "transmogrify");
        let err = spine::enter(tool.execute(&envelope))
            .await
            .expect_err("unknown action");
        assert!(matches!(err, ToolError::UnknownAction { .. }));
    }

    #[test]
    fn test_store_survives_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("memory.json");
        {
            let store = MemoryStore::load(&path).expect("fresh");
            store.store_skill("maintain", true);
        }
        let store = MemoryStore::load(&path).expect("reload");
        assert_eq!(store.skills().len(), 1);
    }
}
