//! Rule Store seam and the cached rule book
//!
//! The store only offers whole-list read and whole-list replace. Every edit
//! the engine or UI makes is therefore a read-modify-write against the latest
//! stored list, keyed by rule identity rather than list position so edits
//! made elsewhere in the meantime are kept.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::Mutex;

use tr_core::{decode_rules, encode_rules, promote, Rule, RuleId};

/// Error type for store calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Rule store unavailable: {0}")]
    Unavailable(String),
}

/// Durable owner of the rule list.
#[async_trait]
pub trait RuleStore: Send + Sync + 'static {
    async fn get_rules(&self) -> Result<Vec<Rule>, StoreError>;

    async fn set_rules(&self, rules: Vec<Rule>) -> Result<(), StoreError>;
}

// =============================================================================
// Memory Store
// =============================================================================

/// Rule list held in memory.
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: Mutex<Vec<Rule>>,
    offline: AtomicBool,
}

impl MemoryRuleStore {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: Mutex::new(rules),
            offline: AtomicBool::new(false),
        }
    }

    /// Toggle simulated unavailability; every call fails while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn get_rules(&self) -> Result<Vec<Rule>, StoreError> {
        self.check()?;
        Ok(self.rules.lock().await.clone())
    }

    async fn set_rules(&self, rules: Vec<Rule>) -> Result<(), StoreError> {
        self.check()?;
        *self.rules.lock().await = rules;
        Ok(())
    }
}

// =============================================================================
// JSON File Store
// =============================================================================

/// Rule list persisted as a JSON document on disk.
///
/// Reads accept older record shapes; writes always use the current one.
/// A missing file reads as an empty list.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RuleStore for JsonFileStore {
    async fn get_rules(&self) -> Result<Vec<Rule>, StoreError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "Failed to read '{}': {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let decoded = decode_rules(&text).map_err(|e| {
            StoreError::Unavailable(format!("Failed to decode '{}': {}", self.path.display(), e))
        })?;
        if decoded.migrated > 0 {
            log::debug!("migrated {} older rule records from {}", decoded.migrated, self.path.display());
        }
        if decoded.skipped > 0 {
            log::warn!("skipped {} unreadable rule records in {}", decoded.skipped, self.path.display());
        }
        Ok(decoded.rules)
    }

    async fn set_rules(&self, rules: Vec<Rule>) -> Result<(), StoreError> {
        let text = encode_rules(&rules).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        tokio::fs::write(&self.path, text).await.map_err(|e| {
            StoreError::Unavailable(format!("Failed to write '{}': {}", self.path.display(), e))
        })
    }
}

// =============================================================================
// Rule Edits
// =============================================================================

/// A single change to the stored list, addressed by identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleEdit {
    /// Append a rule; its timestamp is bumped if another rule already uses it
    Add(Rule),
    /// Replace the rule with the same identity in place
    Update(Rule),
    Remove(RuleId),
    /// Move the rule into the first-evaluated slot
    Promote(RuleId),
}

impl RuleEdit {
    /// Apply to a list. Returns false when the edit had nothing to act on.
    pub fn apply(&self, rules: &mut Vec<Rule>) -> bool {
        match self {
            Self::Add(rule) => {
                let mut rule = rule.clone();
                if rules.iter().any(|r| r.id() == rule.id()) {
                    let newest = rules.iter().map(Rule::id).max().unwrap_or(0);
                    rule.created_at = newest + 1;
                }
                rules.push(rule);
                true
            }
            Self::Update(rule) => match rules.iter_mut().find(|r| r.id() == rule.id()) {
                Some(slot) => {
                    *slot = rule.clone();
                    true
                }
                None => false,
            },
            Self::Remove(id) => {
                let before = rules.len();
                rules.retain(|r| r.id() != *id);
                rules.len() != before
            }
            Self::Promote(id) => promote(rules, *id),
        }
    }
}

// =============================================================================
// Rule Book
// =============================================================================

/// Cached, edit-aware front for a [`RuleStore`].
///
/// Reads fall back to the last successful read when the store is
/// unavailable, and to an empty list when nothing was ever read. Saves that
/// fail are queued and replayed ahead of the next save.
pub struct RuleBook {
    store: Arc<dyn RuleStore>,
    cache: StdMutex<Option<Arc<Vec<Rule>>>>,
    pending: Mutex<Vec<RuleEdit>>,
}

impl RuleBook {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self {
            store,
            cache: StdMutex::new(None),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Current rule list for selection.
    pub async fn rules(&self) -> Arc<Vec<Rule>> {
        match self.store.get_rules().await {
            Ok(rules) => {
                let rules = Arc::new(rules);
                self.set_cache(Arc::clone(&rules));
                rules
            }
            Err(err) => {
                let cached = self.cached();
                log::warn!(
                    "{err}; selecting against {}",
                    if cached.is_some() { "last cached rules" } else { "an empty rule list" }
                );
                cached.unwrap_or_default()
            }
        }
    }

    /// Last successfully read or written list.
    pub fn cached(&self) -> Option<Arc<Vec<Rule>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_cache(&self, rules: Arc<Vec<Rule>>) {
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = Some(rules);
    }

    /// Number of edits waiting to be written.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// User-initiated save. Replays queued edits, then applies `edit`.
    ///
    /// On failure the edit joins the queue and the error is returned; nothing
    /// is dropped.
    pub async fn save(&self, edit: RuleEdit) -> Result<(), StoreError> {
        let mut pending = self.pending.lock().await;
        pending.push(edit);

        let mut rules = match self.store.get_rules().await {
            Ok(rules) => rules,
            Err(err) => {
                log::warn!("{err}; {} edit(s) queued for the next save", pending.len());
                return Err(err);
            }
        };
        for edit in pending.iter() {
            if !edit.apply(&mut rules) {
                log::debug!("edit {edit:?} had no target in the stored list");
            }
        }

        match self.store.set_rules(rules.clone()).await {
            Ok(()) => {
                pending.clear();
                self.set_cache(Arc::new(rules));
                Ok(())
            }
            Err(err) => {
                log::warn!("{err}; {} edit(s) queued for the next save", pending.len());
                Err(err)
            }
        }
    }

    pub async fn add(&self, rule: Rule) -> Result<(), StoreError> {
        self.save(RuleEdit::Add(rule)).await
    }

    pub async fn update(&self, rule: Rule) -> Result<(), StoreError> {
        self.save(RuleEdit::Update(rule)).await
    }

    pub async fn remove(&self, id: RuleId) -> Result<(), StoreError> {
        self.save(RuleEdit::Remove(id)).await
    }

    /// Engine-initiated promotion. Not queued on failure.
    ///
    /// Waits behind any in-flight save so the two never interleave their
    /// read and write.
    pub async fn promote(&self, id: RuleId) -> Result<bool, StoreError> {
        let _guard = self.pending.lock().await;
        let mut rules = self.store.get_rules().await?;
        if !RuleEdit::Promote(id).apply(&mut rules) {
            return Ok(false);
        }
        self.store.set_rules(rules.clone()).await?;
        self.set_cache(Arc::new(rules));
        log::debug!("promoted rule {id}");
        Ok(true)
    }
}
