//! Page view runtime
//!
//! One actor per loaded document. It captures the page's original title once,
//! runs rule selection for every committed URL, and owns the enforcement
//! session for whatever rule currently applies.
//!
//! Rule lookups run as separate tasks and report back through the mailbox
//! tagged with the generation they were started under. Every navigation,
//! manual override and reset bumps the generation, so a lookup that resolves
//! after a newer one is discarded instead of applied.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use tr_core::{is_web_url, render, MatchContext, Matcher, PageContext, Rule, RuleId};

use crate::config::EngineConfig;
use crate::host::{HostError, PageHost};
use crate::monitor::{EnforcementSession, MonitorState};
use crate::store::RuleBook;

/// Browser tab identifier; one page view per tab at a time.
pub type TabId = i32;

/// Snapshot of a page view, for the UI and for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageStatus {
    pub tab: TabId,
    pub generation: u64,
    pub url: String,
    pub original_title: Option<String>,
    pub state: MonitorState,
    pub applied_rule: Option<RuleId>,
}

#[derive(Debug)]
enum PageCommand {
    Navigate(String),
    TitleChanged,
    ApplyRule(Rule),
    Reset,
    Resolved { generation: u64, rule: Option<Rule> },
    HostLost { generation: u64 },
    Status(oneshot::Sender<PageStatus>),
}

/// Continuation directive from one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

// =============================================================================
// Reload Memory
// =============================================================================

/// Last applied rule per tab, kept across page views of the same tab.
#[derive(Debug, Default)]
pub(crate) struct ReloadMemory {
    rules: StdMutex<HashMap<TabId, Rule>>,
}

impl ReloadMemory {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TabId, Rule>> {
        self.rules.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn remember(&self, tab: TabId, rule: Rule) {
        self.lock().insert(tab, rule);
    }

    pub(crate) fn recall(&self, tab: TabId) -> Option<Rule> {
        self.lock().get(&tab).cloned()
    }

    pub(crate) fn forget(&self, tab: TabId) {
        self.lock().remove(&tab);
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Control handle for a page view.
///
/// The host wires its notifications here: title changes to
/// [`title_changed`](Self::title_changed), in-document navigation to
/// [`navigation_committed`](Self::navigation_committed), unload to
/// [`teardown`](Self::teardown). Sends report whether the page view was
/// still alive.
#[derive(Debug, Clone)]
pub struct PageViewHandle {
    tab: TabId,
    tx: mpsc::UnboundedSender<PageCommand>,
    cancel: CancellationToken,
}

impl PageViewHandle {
    pub fn tab(&self) -> TabId {
        self.tab
    }

    fn send(&self, command: PageCommand) -> bool {
        !self.cancel.is_cancelled() && self.tx.send(command).is_ok()
    }

    pub fn navigation_committed(&self, url: impl Into<String>) -> bool {
        self.send(PageCommand::Navigate(url.into()))
    }

    pub fn title_changed(&self) -> bool {
        self.send(PageCommand::TitleChanged)
    }

    /// Pin `rule` on this page, bypassing selection.
    pub fn apply_rule_now(&self, rule: Rule) -> bool {
        self.send(PageCommand::ApplyRule(rule))
    }

    /// Unpin and restore the page's original title.
    pub fn reset_title(&self) -> bool {
        self.send(PageCommand::Reset)
    }

    pub async fn status(&self) -> Option<PageStatus> {
        let (reply, rx) = oneshot::channel();
        if !self.send(PageCommand::Status(reply)) {
            return None;
        }
        rx.await.ok()
    }

    /// End the page view. Enforcement is cancelled before this returns.
    pub fn teardown(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

// =============================================================================
// Page View
// =============================================================================

/// Shared services a page view runs against.
pub(crate) struct PageViewDeps {
    pub host: Arc<dyn PageHost>,
    pub book: Arc<RuleBook>,
    pub matcher: Arc<Matcher>,
    pub config: EngineConfig,
    pub memory: Arc<ReloadMemory>,
}

/// Start a page view for `tab`. Must be called within a tokio runtime.
pub(crate) fn spawn_page_view(tab: TabId, deps: PageViewDeps) -> PageViewHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let view = PageView {
        tab,
        host: deps.host,
        book: deps.book,
        matcher: deps.matcher,
        config: deps.config,
        memory: deps.memory,
        tx: tx.clone(),
        cancel: cancel.clone(),
        generation: 0,
        url: String::new(),
        original_title: None,
        session: None,
        applied: None,
    };
    tokio::spawn(view.run(rx));

    PageViewHandle { tab, tx, cancel }
}

struct PageView {
    tab: TabId,
    host: Arc<dyn PageHost>,
    book: Arc<RuleBook>,
    matcher: Arc<Matcher>,
    config: EngineConfig,
    memory: Arc<ReloadMemory>,
    tx: mpsc::UnboundedSender<PageCommand>,
    cancel: CancellationToken,
    generation: u64,
    url: String,
    original_title: Option<String>,
    session: Option<EnforcementSession>,
    applied: Option<Rule>,
}

impl PageView {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PageCommand>) {
        let cancel = self.cancel.clone();

        let mut flow = tokio::select! {
            biased;
            _ = cancel.cancelled() => Flow::Stop,
            flow = self.open() => flow,
        };

        while flow == Flow::Continue {
            let command = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            flow = tokio::select! {
                biased;
                _ = cancel.cancelled() => Flow::Stop,
                flow = self.handle(command) => flow,
            };
        }

        self.close();
    }

    async fn open(&mut self) -> Flow {
        let url = match self.host.current_url().await {
            Ok(url) => url,
            Err(err) => {
                log::warn!("{err}; page view for tab {} not opened", self.tab);
                return Flow::Stop;
            }
        };

        // Captured exactly once; later writes are ours or the page's
        match self.host.displayed_title().await {
            Ok(title) => self.original_title = Some(title),
            Err(err) => {
                log::warn!("{err}; page view for tab {} not opened", self.tab);
                return Flow::Stop;
            }
        }

        let restored = if self.config.restore_on_reload {
            self.memory.recall(self.tab)
        } else {
            None
        };
        self.navigate(url, restored).await
    }

    async fn handle(&mut self, command: PageCommand) -> Flow {
        match command {
            PageCommand::Navigate(url) => self.navigate(url, None).await,
            PageCommand::TitleChanged => {
                if let Some(session) = &self.session {
                    session.nudge();
                }
                Flow::Continue
            }
            PageCommand::ApplyRule(rule) => {
                self.generation += 1;
                self.pin(rule).await
            }
            PageCommand::Reset => self.reset().await,
            PageCommand::Resolved { generation, rule } => {
                if generation != self.generation {
                    log::debug!(
                        "tab {}: discarding stale selection (generation {generation}, current {})",
                        self.tab,
                        self.generation
                    );
                    return Flow::Continue;
                }
                match rule {
                    Some(rule) => {
                        let id = rule.id();
                        let flow = self.pin(rule).await;
                        if flow == Flow::Continue && self.config.promote_on_match {
                            self.spawn_promotion(id);
                        }
                        flow
                    }
                    None => {
                        self.unpin();
                        self.memory.forget(self.tab);
                        Flow::Continue
                    }
                }
            }
            PageCommand::HostLost { generation } => {
                match &self.session {
                    Some(session) if session.generation() == generation => Flow::Stop,
                    _ => Flow::Continue,
                }
            }
            PageCommand::Status(reply) => {
                let _ = reply.send(self.status());
                Flow::Continue
            }
        }
    }

    async fn navigate(&mut self, url: String, restored: Option<Rule>) -> Flow {
        self.generation += 1;
        self.url = url;

        if self.config.web_only && !is_web_url(&self.url) {
            log::debug!("tab {}: skipping non-web page {}", self.tab, self.url);
            self.unpin();
            return Flow::Continue;
        }

        if let Some(rule) = restored {
            if self.matcher.matches_url(&self.url, &rule) {
                return self.pin(rule).await;
            }
            self.memory.forget(self.tab);
        }

        self.spawn_lookup();
        Flow::Continue
    }

    fn spawn_lookup(&self) {
        let generation = self.generation;
        let url = self.url.clone();
        let book = Arc::clone(&self.book);
        let matcher = Arc::clone(&self.matcher);
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let lookup = async {
                let rules = book.rules().await;
                tr_core::select::select(&matcher, &url, &rules).map(|s| s.rule.clone())
            };
            tokio::select! {
                _ = cancel.cancelled() => {}
                rule = lookup => {
                    let _ = tx.send(PageCommand::Resolved { generation, rule });
                }
            }
        });
    }

    fn spawn_promotion(&self, id: RuleId) {
        let book = Arc::clone(&self.book);
        tokio::spawn(async move {
            if let Err(err) = book.promote(id).await {
                log::warn!("{err}; rule {id} not promoted");
            }
        });
    }

    async fn pin(&mut self, rule: Rule) -> Flow {
        let target = self.render_title(&rule);

        if let Some(session) = &self.session {
            if session.is_active() && session.target() == target {
                self.remember(&rule);
                self.applied = Some(rule);
                return Flow::Continue;
            }
        }
        self.unpin();

        let tx = self.tx.clone();
        let generation = self.generation;
        let on_lost = move |_: HostError| {
            let _ = tx.send(PageCommand::HostLost { generation });
        };

        match EnforcementSession::pin(
            Arc::clone(&self.host),
            target,
            self.config.poll_interval(),
            generation,
            self.cancel.child_token(),
            on_lost,
        )
        .await
        {
            Ok(session) => {
                self.session = Some(session);
                self.remember(&rule);
                self.applied = Some(rule);
                Flow::Continue
            }
            Err(err) => {
                log::warn!("{err}; tearing down page view for tab {}", self.tab);
                Flow::Stop
            }
        }
    }

    fn unpin(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
        self.applied = None;
    }

    async fn reset(&mut self) -> Flow {
        self.generation += 1;
        self.unpin();
        self.memory.forget(self.tab);

        if let Some(original) = &self.original_title {
            if let Err(err) = self.host.set_displayed_title(original).await {
                log::warn!("{err}; tearing down page view for tab {}", self.tab);
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn remember(&self, rule: &Rule) {
        if self.config.restore_on_reload {
            self.memory.remember(self.tab, rule.clone());
        }
    }

    fn render_title(&self, rule: &Rule) -> String {
        let original = self.original_title.as_deref().unwrap_or("");
        match MatchContext::parse(&self.url) {
            Ok(ctx) => render(rule, &PageContext::from_match(original, &ctx)),
            Err(_) => render(
                rule,
                &PageContext {
                    original_title: original,
                    domain: "",
                    path: "",
                    query: "",
                },
            ),
        }
    }

    fn status(&self) -> PageStatus {
        let state = match &self.session {
            Some(session) if session.is_active() => MonitorState::Pinned {
                target: session.target().to_string(),
            },
            _ => MonitorState::Idle,
        };
        PageStatus {
            tab: self.tab,
            generation: self.generation,
            url: self.url.clone(),
            original_title: self.original_title.clone(),
            state,
            applied_rule: self.applied.as_ref().map(Rule::id),
        }
    }

    fn close(&mut self) {
        self.unpin();
        self.cancel.cancel();
        log::debug!("page view for tab {} closed", self.tab);
    }
}
