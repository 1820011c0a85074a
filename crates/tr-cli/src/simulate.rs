use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tr_runtime::{
    Engine, EngineConfig, JsonFileStore, MemoryPage, MemoryRuleStore, MonitorState, PageViewHandle,
    RuleStore,
};

const SIM_TAB: i32 = 1;
const SETTLE: Duration = Duration::from_millis(50);

/// One scripted event against the simulated page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// In-document navigation to a new URL
    Navigate(String),
    /// Page script writes the title without the host noticing
    Script(String),
    /// Page script writes the title and the host reports it
    Notify(String),
    Wait(Duration),
    Reset,
}

impl Step {
    /// Parse `nav=URL`, `script=TITLE`, `notify=TITLE`, `wait=MS` or `reset`.
    pub fn parse(text: &str) -> Result<Self, String> {
        if text == "reset" {
            return Ok(Self::Reset);
        }
        let (verb, arg) = text
            .split_once('=')
            .ok_or_else(|| format!("Invalid step '{}'", text))?;
        match verb {
            "nav" => Ok(Self::Navigate(arg.to_string())),
            "script" => Ok(Self::Script(arg.to_string())),
            "notify" => Ok(Self::Notify(arg.to_string())),
            "wait" => arg
                .parse()
                .map(|ms| Self::Wait(Duration::from_millis(ms)))
                .map_err(|_| format!("Invalid wait '{}': expected milliseconds", arg)),
            _ => Err(format!("Unknown step '{}'", verb)),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Navigate(url) => write!(f, "nav {}", url),
            Self::Script(title) => write!(f, "script {:?}", title),
            Self::Notify(title) => write!(f, "notify {:?}", title),
            Self::Wait(d) => write!(f, "wait {}ms", d.as_millis()),
            Self::Reset => write!(f, "reset"),
        }
    }
}

pub struct SimulateOptions {
    pub rules: PathBuf,
    pub url: String,
    pub title: String,
    pub steps: Vec<Step>,
    pub config: EngineConfig,
}

pub fn run_simulation(opts: SimulateOptions) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(run_simulation_async(opts))
}

async fn run_simulation_async(opts: SimulateOptions) -> Result<(), String> {
    // Snapshot the file so promotion cannot rewrite it
    let rules = JsonFileStore::new(&opts.rules)
        .get_rules()
        .await
        .map_err(|e| e.to_string())?;
    log::info!("simulating {} rules from {}", rules.len(), opts.rules.display());

    let engine = Engine::new(Arc::new(MemoryRuleStore::new(rules)), opts.config);
    let page = Arc::new(MemoryPage::new(opts.url.as_str(), opts.title.as_str()));
    let handle = engine.open_page(SIM_TAB, page.clone());

    tokio::time::sleep(SETTLE).await;
    report("load", &page, &handle).await;

    for step in &opts.steps {
        match step {
            Step::Navigate(url) => {
                page.set_url(url.as_str());
                handle.navigation_committed(url.as_str());
            }
            Step::Script(title) => page.overwrite_title(title.as_str()),
            Step::Notify(title) => {
                page.overwrite_title(title.as_str());
                handle.title_changed();
            }
            Step::Wait(duration) => tokio::time::sleep(*duration).await,
            Step::Reset => {
                handle.reset_title();
            }
        }
        tokio::time::sleep(SETTLE).await;
        report(&step.to_string(), &page, &handle).await;
    }

    engine.close_tab(SIM_TAB);
    Ok(())
}

async fn report(label: &str, page: &MemoryPage, handle: &PageViewHandle) {
    let state = match handle.status().await {
        Some(status) => match status.state {
            MonitorState::Idle => "idle".to_string(),
            MonitorState::Pinned { .. } => match status.applied_rule {
                Some(id) => format!("pinned (rule {})", id),
                None => "pinned".to_string(),
            },
        },
        None => "closed".to_string(),
    };
    println!("  {:<28} {:<40} {}", label, format!("{:?}", page.title()), state);
}
