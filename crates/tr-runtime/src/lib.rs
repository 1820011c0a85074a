//! TabRenamer runtime
//!
//! Async side of the engine: rule store access, per-tab page views and
//! title enforcement.
//!
//! ## Modules
//!
//! - `config`: Engine configuration
//! - `store`: Rule store seam, file/memory stores and the cached rule book
//! - `host`: Page host seam and an in-memory page
//! - `monitor`: Title enforcement sessions
//! - `page`: Page view actor and its handle
//! - `engine`: Engine facade tying the above together

pub mod config;
pub mod engine;
pub mod host;
pub mod monitor;
pub mod page;
pub mod store;

pub use config::EngineConfig;
pub use engine::Engine;
pub use host::{HostError, MemoryPage, PageHost};
pub use monitor::{reassert, EnforcementSession, MonitorState};
pub use page::{PageStatus, PageViewHandle, TabId};
pub use store::{JsonFileStore, MemoryRuleStore, RuleBook, RuleEdit, RuleStore, StoreError};
