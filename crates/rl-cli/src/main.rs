//! RiskLens CLI
//!
//! CLI tool for scoring sites and inspecting gatekeeper state kept in a JSON
//! state file.

mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rl_client::Gatekeeper;
use rl_core::clock::{Clock, SystemClock};
use rl_core::{NavigationRequest, RequestType, ScoreResult};

use state::{describe_expiry, open_gatekeeper, parse_setting, DEFAULT_STATE_FILE};

#[derive(Parser)]
#[command(name = "rl-cli")]
#[command(about = "RiskLens site risk scoring and gatekeeper tools")]
struct Cli {
    /// State file (settings, host cache, allowlist)
    #[arg(short, long, global = true, default_value = DEFAULT_STATE_FILE)]
    state: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a URL (cache first) and record the result
    Score {
        url: String,

        /// Print the provider's raw payload too
        #[arg(long)]
        raw: bool,
    },

    /// Simulate a page load in a tab and show its indicator
    Visit {
        url: String,

        #[arg(long, default_value_t = 1)]
        tab: i32,
    },

    /// Decide a navigation against the cached state
    Check {
        url: String,

        /// Request type as reported by the browser
        #[arg(long = "type", default_value = "main_frame")]
        request_type: String,

        /// Warning page to redirect to
        #[arg(long)]
        warning_page: Option<String>,
    },

    /// Bypass blocking for a host (or the host of a URL)
    Allow { target: String },

    /// Remove a host from the allowlist
    Revoke { host: String },

    /// List allowlisted hosts
    Allowlist,

    /// Inspect or clear the host cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached hosts
    List,
    /// Drop every cached entry
    Clear,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the current settings
    Show,
    /// Change one setting, e.g. `set cacheTtlMinutes 30`
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    log::debug!("Using state file {}", cli.state.display());

    let result = match cli.command {
        Commands::Check {
            url,
            request_type,
            warning_page,
        } => open_gatekeeper(&cli.state, warning_page.as_deref())
            .and_then(|gk| cmd_check(&gk, &url, &request_type)),
        command => match open_gatekeeper(&cli.state, None) {
            Ok(gk) => run(&gk, command).await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(gk: &Gatekeeper, command: Commands) -> Result<(), String> {
    match command {
        Commands::Score { url, raw } => cmd_score(gk, &url, raw).await,
        Commands::Visit { url, tab } => cmd_visit(gk, &url, tab).await,
        Commands::Check { url, request_type, .. } => cmd_check(gk, &url, &request_type),
        Commands::Allow { target } => cmd_allow(gk, &target),
        Commands::Revoke { host } => cmd_revoke(gk, &host),
        Commands::Allowlist => cmd_allowlist(gk),
        Commands::Cache { action } => match action {
            CacheAction::List => cmd_cache_list(gk),
            CacheAction::Clear => {
                gk.clear_cache();
                println!("Host cache cleared");
                Ok(())
            }
        },
        Commands::Settings { action } => match action.unwrap_or(SettingsAction::Show) {
            SettingsAction::Show => cmd_settings_show(gk),
            SettingsAction::Set { key, value } => cmd_settings_set(gk, &key, &value),
        },
    }
}

fn print_result(result: &ScoreResult, raw: bool) {
    match result.score {
        Some(score) => println!("  Score:     {} / 100 ({})", score, result.label),
        None => println!("  Score:     none ({})", result.label),
    }
    if let Some(verdict) = &result.verdict {
        println!("  Verdict:   {}", verdict);
    }
    println!("  Reason:    {}", result.reason);
    if let Some(error) = &result.error {
        println!("  Error:     {}", error);
    }
    for (i, explanation) in result.explanations.iter().enumerate() {
        println!("  [{}] {}", i + 1, explanation);
    }
    if raw {
        if let Some(payload) = &result.raw {
            println!("  Raw:       {}", payload);
        }
    }
}

async fn cmd_score(gk: &Gatekeeper, url: &str, raw: bool) -> Result<(), String> {
    let result = gk.lookup(url).await;
    println!("{}", url);
    print_result(&result, raw);
    Ok(())
}

async fn cmd_visit(gk: &Gatekeeper, url: &str, tab: i32) -> Result<(), String> {
    let state = gk
        .on_tab_load_complete(tab, url)
        .await
        .ok_or_else(|| format!("Not an http(s) page: {}", url))?;
    let indicator = rl_core::TabIndicator::for_state(&state);

    println!("Tab {}: {}", tab, state.url);
    println!("  Indicator: {} [{}]", indicator.title, indicator.icon);
    println!("  Reason:    {}", state.reason);
    for (i, explanation) in state.explanations.iter().enumerate() {
        println!("  [{}] {}", i + 1, explanation);
    }
    Ok(())
}

fn cmd_check(gk: &Gatekeeper, url: &str, request_type: &str) -> Result<(), String> {
    let req = NavigationRequest {
        url,
        request_type: RequestType::from_str(request_type),
        tab_id: -1,
    };
    let result = gk.on_before_navigate(&req);

    println!("{} -> {} ({})", url, result.decision.as_str(), result.reason.as_str());
    if let Some(redirect) = result.redirect_url {
        println!("  Redirect:  {}", redirect);
    }
    Ok(())
}

fn cmd_allow(gk: &Gatekeeper, target: &str) -> Result<(), String> {
    let expires_at = gk
        .allow_once(target, Some(target))
        .ok_or_else(|| format!("No host in '{}'", target))?;
    println!(
        "Allowed {} ({})",
        target,
        describe_expiry(expires_at, SystemClock.now_ms())
    );
    Ok(())
}

fn cmd_revoke(gk: &Gatekeeper, host: &str) -> Result<(), String> {
    if !gk.revoke_bypass(host) {
        return Err(format!("'{}' is not allowlisted", host));
    }
    println!("Revoked {}", host);
    Ok(())
}

fn cmd_allowlist(gk: &Gatekeeper) -> Result<(), String> {
    let now = SystemClock.now_ms();
    let mut entries: Vec<_> = gk.allowlist_snapshot().into_iter().collect();
    entries.sort();

    println!("Allowlist: {} hosts", entries.len());
    for (host, expires_at) in entries {
        println!("  {:<40} {}", host, describe_expiry(expires_at, now));
    }
    Ok(())
}

fn cmd_cache_list(gk: &Gatekeeper) -> Result<(), String> {
    let now = SystemClock.now_ms();
    let mut entries: Vec<_> = gk.cache_snapshot().into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    println!("Host cache: {} entries", entries.len());
    for (host, entry) in entries {
        let score = entry
            .result
            .score
            .map(|s| format!("{:>5}", s))
            .unwrap_or_else(|| "    -".to_string());
        let age_min = now.saturating_sub(entry.updated_at_ms) / 60_000;
        println!(
            "  {:<40} {} {:<10} {} min old",
            host,
            score,
            entry.result.label.as_str(),
            age_min
        );
    }
    Ok(())
}

fn cmd_settings_show(gk: &Gatekeeper) -> Result<(), String> {
    let settings = gk.settings();
    let json = serde_json::to_string_pretty(&settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;
    println!("{}", json);
    println!("Scoring endpoint: {}", settings.score_endpoint());
    Ok(())
}

fn cmd_settings_set(gk: &Gatekeeper, key: &str, value: &str) -> Result<(), String> {
    let change = parse_setting(key, value)?;
    if gk.update_settings(change) {
        println!("Updated {}", key);
    } else {
        println!("{} unchanged (rejected or same value)", key);
    }
    Ok(())
}
