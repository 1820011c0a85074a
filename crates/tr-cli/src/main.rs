//! TabRenamer CLI
//!
//! CLI tool for inspecting, editing and migrating rule files, and for
//! replaying title enforcement against a simulated page.

mod settings;
mod simulate;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;

use tr_core::format::is_slash_pattern;
use tr_core::{
    decode_rules, encode_rules, is_web_url, matching_indices, render, render_template, select,
    MatchContext, MatchKind, Matcher, PageContext, Parameter, Rule,
};
use tr_runtime::{JsonFileStore, RuleBook};

use settings::Settings;
use simulate::{run_simulation, SimulateOptions, Step};

#[derive(Parser)]
#[command(name = "tr-cli")]
#[command(about = "TabRenamer rule tools")]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which rule applies to a URL and the title it renders
    Evaluate {
        /// Rule file
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// Page URL
        #[arg(short, long)]
        url: String,

        /// Original page title
        #[arg(short, long, default_value = "")]
        title: String,

        /// List every matching rule, not just the applied one
        #[arg(long)]
        all: bool,
    },

    /// Render a title template against a URL
    Render {
        /// Title source, e.g. "{title} | {domain}"
        #[arg(long)]
        template: String,

        #[arg(short, long)]
        url: String,

        #[arg(short, long, default_value = "")]
        title: String,
    },

    /// Check every rule in a file
    Validate {
        #[arg(short, long)]
        rules: Option<PathBuf>,
    },

    /// Rewrite a rule file in the current record format
    Migrate {
        #[arg(short, long)]
        input: String,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Append a rule to a file
    Add {
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// domain, path, params, contains or regex
        #[arg(short, long)]
        kind: String,

        #[arg(short, long)]
        pattern: String,

        /// Title source
        #[arg(short, long)]
        title: String,

        /// Query parameter constraint, key=value (value may be /regex/flags)
        #[arg(long = "param")]
        params: Vec<String>,

        /// Fragment parameter constraint, key=value
        #[arg(long = "fragment")]
        fragments: Vec<String>,
    },

    /// Remove a rule by id
    Remove {
        #[arg(short, long)]
        rules: Option<PathBuf>,

        #[arg(long)]
        id: u64,
    },

    /// Replay page events against the enforcement engine
    Simulate {
        #[arg(short, long)]
        rules: Option<PathBuf>,

        #[arg(short, long)]
        url: String,

        #[arg(short, long, default_value = "")]
        title: String,

        /// nav=URL, script=TITLE, notify=TITLE, wait=MS or reset
        #[arg(short, long = "step")]
        steps: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = Settings::load(cli.config.as_deref()).and_then(|settings| match cli.command {
        Commands::Evaluate {
            rules,
            url,
            title,
            all,
        } => cmd_evaluate(&settings, rules, &url, &title, all),
        Commands::Render {
            template,
            url,
            title,
        } => cmd_render(&template, &url, &title),
        Commands::Validate { rules } => cmd_validate(&settings, rules),
        Commands::Migrate { input, output } => cmd_migrate(&input, output.as_deref()),
        Commands::Add {
            rules,
            kind,
            pattern,
            title,
            params,
            fragments,
        } => cmd_add(&settings, rules, &kind, &pattern, &title, &params, &fragments),
        Commands::Remove { rules, id } => cmd_remove(&settings, rules, id),
        Commands::Simulate {
            rules,
            url,
            title,
            steps,
        } => cmd_simulate(&settings, rules, url, title, &steps),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    tracing_subscriber::fmt()
        .with_max_level(if verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::WARN
        })
        .with_writer(std::io::stderr)
        .init();
}

fn read_rules(path: &Path) -> Result<Vec<Rule>, String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    let decoded = decode_rules(&text)
        .map_err(|e| format!("Invalid rule file '{}': {}", path.display(), e))?;
    if decoded.migrated > 0 {
        log::info!("{} records in older format", decoded.migrated);
    }
    if decoded.skipped > 0 {
        eprintln!("Warning: skipped {} unreadable records in '{}'", decoded.skipped, path.display());
    }
    Ok(decoded.rules)
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    Ok(runtime.block_on(future))
}

fn cmd_evaluate(
    settings: &Settings,
    rules: Option<PathBuf>,
    url: &str,
    title: &str,
    all: bool,
) -> Result<(), String> {
    let path = settings.rules_path(rules)?;
    let rules = read_rules(&path)?;
    let matcher = Matcher::new();

    if settings.engine.web_only && !is_web_url(url) {
        println!("Not a web page; rules are not evaluated");
        return Ok(());
    }
    let ctx = MatchContext::parse(url).map_err(|e| e.to_string())?;

    if all {
        let indices = matching_indices(&matcher, url, &rules);
        println!("{} of {} rules match", indices.len(), rules.len());
        for index in indices {
            let rule = &rules[index];
            println!("  [{}] {:?} {} -> {:?}", index, rule.kind, rule.pattern, rule.title_source);
        }
    }

    match select(&matcher, url, &rules) {
        Some(selection) => {
            let rendered = render(selection.rule, &PageContext::from_match(title, &ctx));
            println!("Rule:   [{}] id {}", selection.index, selection.rule.id());
            println!("  Kind:    {:?}", selection.rule.kind);
            println!("  Pattern: {}", selection.rule.pattern);
            println!("  Title:   {}", rendered);
        }
        None => println!("No rule matches"),
    }

    Ok(())
}

fn cmd_render(template: &str, url: &str, title: &str) -> Result<(), String> {
    let ctx = MatchContext::parse(url).map_err(|e| e.to_string())?;
    println!("{}", render_template(template, &PageContext::from_match(title, &ctx)));
    Ok(())
}

fn cmd_validate(settings: &Settings, rules: Option<PathBuf>) -> Result<(), String> {
    let path = settings.rules_path(rules)?;
    let rules = read_rules(&path)?;

    let mut invalid = 0usize;
    for (index, rule) in rules.iter().enumerate() {
        let violations = rule.violations();
        if violations.is_empty() {
            continue;
        }
        invalid += 1;
        println!("  [{}] {:?} {}", index, rule.kind, rule.pattern);
        for violation in violations {
            println!("      {}", violation);
        }
    }

    if invalid > 0 {
        return Err(format!("{} of {} rules are invalid", invalid, rules.len()));
    }
    println!("Rule file '{}' is valid ({} rules)", path.display(), rules.len());
    Ok(())
}

fn cmd_migrate(input: &str, output: Option<&str>) -> Result<(), String> {
    let text = fs::read_to_string(input)
        .map_err(|e| format!("Failed to read '{}': {}", input, e))?;
    let decoded = decode_rules(&text).map_err(|e| format!("Invalid rule file '{}': {}", input, e))?;
    let json = encode_rules(&decoded.rules).map_err(|e| e.to_string())?;
    if decoded.skipped > 0 {
        eprintln!("Warning: dropped {} unreadable records from '{}'", decoded.skipped, input);
    }

    match output {
        Some(output) => {
            fs::write(output, json).map_err(|e| format!("Failed to write '{}': {}", output, e))?;
            println!(
                "Migrated {} of {} rules to '{}'",
                decoded.migrated,
                decoded.rules.len(),
                output
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn parse_constraint(text: &str, fragment: bool) -> Result<Parameter, String> {
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| format!("Invalid parameter '{}': expected key=value", text))?;
    let param = if fragment {
        Parameter::fragment(key, value)
    } else {
        Parameter::query(key, value)
    };
    Ok(if is_slash_pattern(value) { param.regex() } else { param })
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn cmd_add(
    settings: &Settings,
    rules: Option<PathBuf>,
    kind: &str,
    pattern: &str,
    title: &str,
    params: &[String],
    fragments: &[String],
) -> Result<(), String> {
    let path = settings.rules_path(rules)?;
    let kind = MatchKind::from_str(kind).ok_or_else(|| format!("Unknown rule kind '{}'", kind))?;

    let mut parameters = Vec::with_capacity(params.len() + fragments.len());
    for text in params {
        parameters.push(parse_constraint(text, false)?);
    }
    for text in fragments {
        parameters.push(parse_constraint(text, true)?);
    }

    let rule = Rule::new(kind, pattern, title, parameters, now_millis()).map_err(|e| e.to_string())?;
    let book = RuleBook::new(std::sync::Arc::new(JsonFileStore::new(&path)));
    block_on(book.add(rule))?.map_err(|e| e.to_string())?;

    println!("Added rule to '{}'", path.display());
    Ok(())
}

fn cmd_remove(settings: &Settings, rules: Option<PathBuf>, id: u64) -> Result<(), String> {
    let path = settings.rules_path(rules)?;
    let book = RuleBook::new(std::sync::Arc::new(JsonFileStore::new(&path)));

    let (before, removed) = block_on(async {
        let before = book.rules().await.len();
        (before, book.remove(id).await)
    })?;
    removed.map_err(|e| e.to_string())?;
    let after = book.cached().map(|rules| rules.len()).unwrap_or(before);

    if after == before {
        return Err(format!("No rule with id {}", id));
    }
    println!("Removed rule {} from '{}'", id, path.display());
    Ok(())
}

fn cmd_simulate(
    settings: &Settings,
    rules: Option<PathBuf>,
    url: String,
    title: String,
    steps: &[String],
) -> Result<(), String> {
    let steps = steps
        .iter()
        .map(|s| Step::parse(s))
        .collect::<Result<Vec<_>, _>>()?;

    run_simulation(SimulateOptions {
        rules: settings.rules_path(rules)?,
        url,
        title,
        steps,
        config: settings.engine.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_constraint() {
        let param = parse_constraint("v=abc", false).unwrap();
        assert_eq!(param, Parameter::query("v", "abc"));

        let param = parse_constraint("v=/^[a-z]+$/i", false).unwrap();
        assert!(param.is_regex_value);

        let param = parse_constraint("tab=inbox", true).unwrap();
        assert!(param.is_from_fragment);

        assert!(parse_constraint("novalue", false).is_err());
    }
}
