//! Page/Tab Host seam
//!
//! The host owns the live document. The engine only reads the displayed title
//! and writes a new one; notifications flow the other way, through the
//! [`PageViewHandle`](crate::page::PageViewHandle) the host receives when a
//! page view opens.

use std::sync::Mutex;

use async_trait::async_trait;

/// Error type for host calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("Page host unavailable: {0}")]
    Unavailable(String),
    #[error("Page view is detached")]
    Detached,
}

/// Capability to read and write the active document's title.
#[async_trait]
pub trait PageHost: Send + Sync + 'static {
    async fn current_url(&self) -> Result<String, HostError>;

    async fn displayed_title(&self) -> Result<String, HostError>;

    async fn set_displayed_title(&self, title: &str) -> Result<(), HostError>;
}

// =============================================================================
// In-memory Host
// =============================================================================

#[derive(Debug)]
struct PageState {
    url: String,
    title: String,
    detached: bool,
    writes: usize,
}

/// A document held in memory.
///
/// Used by the CLI simulator and by tests. `overwrite_title` stands in for a
/// page script changing `document.title`; it does not notify anyone, so a
/// caller that wants the notification path must also call
/// `PageViewHandle::title_changed`.
#[derive(Debug)]
pub struct MemoryPage {
    state: Mutex<PageState>,
}

impl MemoryPage {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(PageState {
                url: url.into(),
                title: title.into(),
                detached: false,
                writes: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Title currently shown, regardless of detachment.
    pub fn title(&self) -> String {
        self.lock().title.clone()
    }

    /// External write to the title (a page script).
    pub fn overwrite_title(&self, title: impl Into<String>) {
        self.lock().title = title.into();
    }

    pub fn set_url(&self, url: impl Into<String>) {
        self.lock().url = url.into();
    }

    /// Make every further host call fail, as if the document went away.
    pub fn detach(&self) {
        self.lock().detached = true;
    }

    /// Number of title writes made through the host interface.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }
}

#[async_trait]
impl PageHost for MemoryPage {
    async fn current_url(&self) -> Result<String, HostError> {
        let state = self.lock();
        if state.detached {
            return Err(HostError::Detached);
        }
        Ok(state.url.clone())
    }

    async fn displayed_title(&self) -> Result<String, HostError> {
        let state = self.lock();
        if state.detached {
            return Err(HostError::Detached);
        }
        Ok(state.title.clone())
    }

    async fn set_displayed_title(&self, title: &str) -> Result<(), HostError> {
        let mut state = self.lock();
        if state.detached {
            return Err(HostError::Detached);
        }
        state.title = title.to_string();
        state.writes += 1;
        Ok(())
    }
}
