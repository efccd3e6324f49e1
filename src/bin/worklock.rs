//! worklock CLI: run lanes of items through a shared lease store.

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, info_span};
use uuid::Uuid;
use worklock::config::{self, Config};
use worklock::lease::{LeaseRecord, is_live};
use worklock::locker::LockerConfig;
use worklock::scheduler::Scheduler;
use worklock::store::{AnyStore, ItemKey, Store, StoreUrl};
use worklock::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "worklock", about = "Claim work items through a shared lease store")]
struct Cli {
    /// Store URL (overrides WORKLOCK_STORE)
    #[arg(long, global = true)]
    store: Option<String>,
    /// Lease timeout in seconds (overrides WORKLOCK_TIMEOUT)
    #[arg(long, global = true, value_parser = parse_timeout_arg)]
    timeout: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process lanes of items, skipping those done or held elsewhere
    Run {
        /// Comma-separated items; repeat for more lanes
        #[arg(long = "lane")]
        lanes: Vec<String>,
        /// TOML file of [[lane]] tables, run after the --lane lanes
        #[arg(long)]
        lanes_file: Option<PathBuf>,
        /// Program run once per item (item as argument and WORKLOCK_ITEM)
        #[arg(long)]
        exec: Option<PathBuf>,
        /// Log every Nth decision per lane (0 disables)
        #[arg(long)]
        log_step: Option<usize>,
        /// Delete finished keys instead of marking them done
        #[arg(long)]
        no_mark_done: bool,
    },
    /// List every entry in the store
    Status,
    /// Delete entries so their items run again
    Reset {
        /// Items to reset
        #[arg(required = true)]
        items: Vec<String>,
    },
}

fn parse_timeout_arg(raw: &str) -> Result<Duration, String> {
    config::parse_timeout(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "worklock".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    // Stores block (Postgres drives its own runtime), so keep the work off
    // the runtime that serves the exporters.
    let worker = std::thread::spawn(move || dispatch(cli, config));
    worker
        .join()
        .map_err(|_| anyhow::anyhow!("worker thread panicked"))?
}

fn dispatch(cli: Cli, config: Config) -> anyhow::Result<()> {
    let store_url: StoreUrl = match cli.store {
        Some(url) => url.parse()?,
        None => config.store()?,
    };
    let store = store_url.open()?;

    let mut locker_config = config.locker_config();
    if cli.timeout.is_some() {
        locker_config.timeout = cli.timeout;
    }

    match cli.command {
        Command::Run {
            lanes,
            lanes_file,
            exec,
            log_step,
            no_mark_done,
        } => {
            if let Some(step) = log_step {
                locker_config.log_step = (step > 0).then_some(step);
            }
            if no_mark_done {
                locker_config.mark_as_done = false;
            }
            // Item spans nest under this one, so a trace groups one worker's run.
            let run_span = info_span!(
                "worklock.run",
                "worker.id" = %Uuid::new_v4(),
                "store.backend" = store.backend(),
            );
            let _enter = run_span.enter();
            cmd_run(store, locker_config, lanes, lanes_file, exec)
        }
        Command::Status => cmd_status(&store, locker_config.timeout),
        Command::Reset { items } => cmd_reset(&store, &items),
    }
}

fn cmd_run(
    store: AnyStore,
    locker_config: LockerConfig,
    lanes: Vec<String>,
    lanes_file: Option<PathBuf>,
    exec: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut all_lanes: Vec<Vec<String>> = lanes.iter().map(|lane| split_lane(lane)).collect();
    if let Some(path) = lanes_file {
        all_lanes.extend(config::lanes::load(&path)?.into_iter().map(|lane| lane.items));
    }
    if all_lanes.is_empty() {
        bail!("nothing to run: pass --lane or --lanes-file");
    }

    let scheduler = all_lanes
        .into_iter()
        .fold(Scheduler::new(store, locker_config), |scheduler, lane| {
            scheduler << lane
        });

    let mut items = scheduler.into_iter();
    for item in items.by_ref() {
        let item = item?;
        match exec {
            Some(ref program) => run_hook(program, &item)?,
            None => println!("{item}"),
        }
    }

    let tally = items.tally();
    info!(
        claimed = tally.claimed(),
        restarted = tally.restarted,
        already_done = tally.already_done,
        already_started = tally.already_started,
        lost_race = tally.lost_race,
        "run finished"
    );
    Ok(())
}

fn split_lane(lane: &str) -> Vec<String> {
    lane.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Run the per-item program. A failure aborts the run; the item's lease is
/// left to expire so another worker can pick it up.
fn run_hook(program: &Path, item: &str) -> anyhow::Result<()> {
    let status = std::process::Command::new(program)
        .arg(item)
        .env("WORKLOCK_ITEM", item)
        .status()
        .with_context(|| format!("failed to run {}", program.display()))?;

    if !status.success() {
        bail!(
            "{} exited with status {} on '{item}'",
            program.display(),
            status.code().unwrap_or(-1)
        );
    }
    Ok(())
}

fn cmd_status(store: &AnyStore, timeout: Option<Duration>) -> anyhow::Result<()> {
    let keys = store.keys()?;
    if keys.is_empty() {
        println!("No entries.");
        return Ok(());
    }

    println!("{:<40}  {:<8}  SINCE", "KEY", "STATE");
    println!("{}", "-".repeat(80));

    let now = Utc::now();
    for key in &keys {
        // Another worker may have deleted it since keys() ran.
        let Some(value) = store.get(key)? else {
            continue;
        };
        let (state, since) = match LeaseRecord::decode(&value) {
            Some(LeaseRecord::Done) => ("done", "-".to_string()),
            Some(LeaseRecord::Claimed(at)) => (
                if is_live(at, now, timeout) { "live" } else { "expired" },
                at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            ),
            None => ("unknown", "-".to_string()),
        };
        println!("{key:<40}  {state:<8}  {since}");
    }

    println!("\n{} entry(ies)", keys.len());
    Ok(())
}

fn cmd_reset(store: &AnyStore, items: &[String]) -> anyhow::Result<()> {
    for item in items {
        let key = ItemKey::new(item)?;
        store.delete(key.key())?;
        println!("Reset: {item} ({})", key.key());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lanes_split_on_commas() {
        assert_eq!(split_lane("a, b,,c "), vec!["a", "b", "c"]);
        assert!(split_lane(" , ").is_empty());
    }

    #[test]
    fn cli_parses_repeated_lanes() {
        let cli = Cli::try_parse_from([
            "worklock", "--timeout", "10", "run", "--lane", "a,b", "--lane", "c",
        ])
        .unwrap();
        assert_eq!(cli.timeout, Some(Duration::from_secs(10)));
        match cli.command {
            Command::Run { lanes, .. } => assert_eq!(lanes, vec!["a,b", "c"]),
            _ => panic!("expected run"),
        }
    }
}
