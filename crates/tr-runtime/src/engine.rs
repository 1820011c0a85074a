//! Engine facade: the rule book, the shared matcher, and one page view per tab.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tr_core::{is_web_url, matching_indices, Matcher, Rule};

use crate::config::EngineConfig;
use crate::host::PageHost;
use crate::page::{spawn_page_view, PageViewDeps, PageViewHandle, ReloadMemory, TabId};
use crate::store::{RuleBook, RuleStore};

pub struct Engine {
    book: Arc<RuleBook>,
    matcher: Arc<Matcher>,
    config: EngineConfig,
    memory: Arc<ReloadMemory>,
    pages: StdMutex<HashMap<TabId, PageViewHandle>>,
}

impl Engine {
    pub fn new(store: Arc<dyn RuleStore>, config: EngineConfig) -> Self {
        Self {
            book: Arc::new(RuleBook::new(store)),
            matcher: Arc::new(Matcher::new()),
            config,
            memory: Arc::new(ReloadMemory::default()),
            pages: StdMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rule edits go through here so the engine sees them on the next lookup.
    pub fn rule_book(&self) -> &Arc<RuleBook> {
        &self.book
    }

    /// The rule that would apply to `url`, without touching any page.
    pub async fn evaluate(&self, url: &str) -> Option<Rule> {
        if self.config.web_only && !is_web_url(url) {
            return None;
        }
        let rules = self.book.rules().await;
        tr_core::select::select(&self.matcher, url, &rules).map(|s| s.rule.clone())
    }

    /// Stored indices of every rule matching `url`.
    pub async fn highlight(&self, url: &str) -> Vec<usize> {
        if self.config.web_only && !is_web_url(url) {
            return Vec::new();
        }
        let rules = self.book.rules().await;
        matching_indices(&self.matcher, url, &rules)
    }

    fn lock_pages(&self) -> std::sync::MutexGuard<'_, HashMap<TabId, PageViewHandle>> {
        self.pages.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a page view for a freshly loaded document in `tab`.
    ///
    /// Any previous page view of the tab is torn down first. Must be called
    /// within a tokio runtime.
    pub fn open_page(&self, tab: TabId, host: Arc<dyn PageHost>) -> PageViewHandle {
        let handle = spawn_page_view(
            tab,
            PageViewDeps {
                host,
                book: Arc::clone(&self.book),
                matcher: Arc::clone(&self.matcher),
                config: self.config.clone(),
                memory: Arc::clone(&self.memory),
            },
        );
        if let Some(previous) = self.lock_pages().insert(tab, handle.clone()) {
            previous.teardown();
        }
        log::debug!("opened page view for tab {tab}");
        handle
    }

    /// Live page view for `tab`, if any.
    pub fn page(&self, tab: TabId) -> Option<PageViewHandle> {
        let mut pages = self.lock_pages();
        match pages.get(&tab) {
            Some(handle) if !handle.is_closed() => Some(handle.clone()),
            Some(_) => {
                pages.remove(&tab);
                None
            }
            None => None,
        }
    }

    pub fn apply_rule_now(&self, tab: TabId, rule: Rule) -> bool {
        self.page(tab).is_some_and(|page| page.apply_rule_now(rule))
    }

    pub fn reset_title(&self, tab: TabId) -> bool {
        self.page(tab).is_some_and(|page| page.reset_title())
    }

    /// Document unload. The tab keeps its reload memory.
    pub fn teardown_page(&self, tab: TabId) -> bool {
        match self.lock_pages().remove(&tab) {
            Some(handle) => {
                handle.teardown();
                true
            }
            None => false,
        }
    }

    /// Tab closed: tear down and forget everything about it.
    pub fn close_tab(&self, tab: TabId) {
        self.teardown_page(tab);
        self.memory.forget(tab);
    }

    pub fn open_pages(&self) -> usize {
        let mut pages = self.lock_pages();
        pages.retain(|_, handle| !handle.is_closed());
        pages.len()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for (_, handle) in self.lock_pages().drain() {
            handle.teardown();
        }
    }
}
