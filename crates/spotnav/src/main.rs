//! `spotnav` - CLI for the guidance engine.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::mpsc::UnboundedReceiver;

use spotnav::announcer::{LogSpeaker, MutedSpeaker, Speaker};
use spotnav::cli::{
    Cli, Command, ConfigCommand, JournalCommand, ReplayCommand, RerouteProviderArg,
};
use spotnav::config::config_file_exists;
use spotnav::controller::{GuidanceEvent, NavigationState, NavigationStatus};
use spotnav::fix::PositionFix;
use spotnav::journal::Journal;
use spotnav::provider::{
    DirectRouteProvider, FixedRouteProvider, NoRouteProvider, RouteProvider,
};
use spotnav::route::{format_distance, Route};
use spotnav::session::NavigationSession;
use spotnav::source::ReplayPositionSource;
use spotnav::{init_logging, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Replay(cmd) => handle_replay(config, cmd).await,
        Command::Config(cmd) => handle_config(&config, cmd),
        Command::Journal(cmd) => handle_journal(&config, cmd),
    }
}

fn read_route(path: &Path) -> anyhow::Result<Route> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading route file {}", path.display()))?;
    Route::from_json(&json).with_context(|| format!("parsing route file {}", path.display()))
}

fn read_fixes(path: &Path) -> anyhow::Result<Vec<PositionFix>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading fix trace {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing fix trace {}", path.display()))
}

async fn handle_replay(mut config: Config, cmd: ReplayCommand) -> anyhow::Result<()> {
    let route = read_route(&cmd.route)?;
    let fixes = read_fixes(&cmd.fixes)?;

    let Some(origin) = fixes
        .first()
        .map(PositionFix::position)
        .or_else(|| route.steps().first().map(|s| s.start_point))
    else {
        bail!("route and fix trace are both empty");
    };
    let destination = route.destination();

    let provider: Arc<dyn RouteProvider> = match cmd.reroute_with {
        RerouteProviderArg::Direct => {
            Arc::new(FixedRouteProvider::new(route, DirectRouteProvider::default()))
        }
        RerouteProviderArg::Off => Arc::new(FixedRouteProvider::new(route, NoRouteProvider)),
    };
    let speaker: Arc<dyn Speaker> = if cmd.mute {
        config.guidance.audio_enabled = false;
        Arc::new(MutedSpeaker)
    } else {
        Arc::new(LogSpeaker)
    };

    let journal = if config.journal.enabled {
        Some(Journal::open(config.database_path()).context("opening journal")?)
    } else {
        None
    };

    let source = ReplayPositionSource::new(fixes, Duration::from_millis(cmd.interval_ms));
    let mut session = NavigationSession::create(
        config,
        provider,
        Box::new(source),
        speaker,
        origin,
        destination,
    )
    .await
    .context("computing initial route")?;

    let journal_session = match (&journal, session.state().route.as_deref()) {
        (Some(journal), Some(route)) => Some(journal.begin_session(destination, route)?),
        _ => None,
    };
    let Some(mut events) = session.take_events() else {
        bail!("event stream already taken");
    };
    let mut state = session.subscribe_state();

    session.start().context("starting guidance")?;

    let record = |event: &GuidanceEvent| -> anyhow::Result<()> {
        if cmd.json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!("{event}");
        }
        if let (Some(journal), Some(id)) = (&journal, journal_session) {
            journal.record_event(id, event)?;
        }
        Ok(())
    };

    loop {
        tokio::select! {
            Some(event) = events.recv() => record(&event)?,
            changed = state.changed() => {
                let status = state.borrow().status;
                if changed.is_err()
                    || matches!(status, NavigationStatus::Stopped | NavigationStatus::Error)
                {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted, stopping guidance");
                session.stop();
            }
        }
    }
    drain(&mut events, &record)?;

    let final_state = session.state();
    session.dispose().await;

    if let (Some(journal), Some(id)) = (&journal, journal_session) {
        journal.end_session(id, final_state.status)?;
    }
    print_summary(&final_state, cmd.json)?;

    if final_state.status == NavigationStatus::Error {
        bail!("guidance ended in error");
    }
    Ok(())
}

fn drain(
    events: &mut UnboundedReceiver<GuidanceEvent>,
    record: &impl Fn(&GuidanceEvent) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    while let Ok(event) = events.try_recv() {
        record(&event)?;
    }
    Ok(())
}

fn print_summary(state: &NavigationState, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(state)?);
        return Ok(());
    }

    println!();
    println!("Final status:  {}", state.status);
    if let Some(step) = state.current_step() {
        println!("Current step:  {} ({})", step.index, step.instruction_text);
    }
    if let Some(remaining) = state.remaining() {
        println!("Remaining:     {remaining}");
    }
    println!("Deviation:     {}", format_distance(state.deviation_meters));
    if state.failed_reroute_sessions > 0 {
        println!("Failed reroutes: {}", state.failed_reroute_sessions);
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Guidance]");
                println!("  Audio enabled:       {}", config.guidance.audio_enabled);
                println!(
                    "  Arrival radius:      {}",
                    format_distance(config.guidance.arrival_radius_meters)
                );
                println!("  Hysteresis:          {} m", config.guidance.hysteresis_meters);
                println!();
                println!("[Reroute]");
                println!(
                    "  Deviation threshold: {}",
                    format_distance(config.reroute.deviation_threshold_meters)
                );
                println!("  Debounce count:      {}", config.reroute.debounce_count);
                println!("  Max retries:         {}", config.reroute.max_retries);
                println!("  Backoff base:        {} ms", config.reroute.backoff_base_ms);
                println!("  Deadline:            {} ms", config.reroute.deadline_ms);
                println!(
                    "  Max failed reroutes: {}",
                    config.reroute.max_failed_sessions
                );
                println!();
                println!("[Heading]");
                println!("  Smoothing alpha:     {}", config.heading.smoothing_alpha);
                println!("  Noise floor:         {} m", config.heading.noise_floor_meters);
                println!();
                println!("[Position]");
                println!("  Stale after:         {} s", config.position.stale_after_secs);
                println!("  High accuracy:       {}", config.position.high_accuracy);
                println!();
                println!("[Journal]");
                println!("  Enabled:             {}", config.journal.enabled);
                println!("  Database path:       {}", config.database_path().display());
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            if !config_file_exists(&path) {
                bail!("configuration file not found: {}", path.display());
            }
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn handle_journal(config: &Config, cmd: JournalCommand) -> anyhow::Result<()> {
    let path = config.database_path();
    if !path.exists() {
        bail!(
            "no journal at {} (set journal.enabled = true to record sessions)",
            path.display()
        );
    }
    let journal = Journal::open(&path).context("opening journal")?;

    match cmd {
        JournalCommand::List { limit, json } => {
            let sessions = journal.recent_sessions(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("No sessions recorded.");
            } else {
                for s in sessions {
                    println!(
                        "{:>5}  {}  {:<10}  {} steps  -> {}",
                        s.id,
                        s.started_at.format("%Y-%m-%d %H:%M:%S"),
                        s.outcome.as_deref().unwrap_or("running"),
                        s.step_count,
                        s.destination
                    );
                }
            }
        }
        JournalCommand::Show { id, json } => {
            let Some(session) = journal.session(id)? else {
                bail!("no session with id {id}");
            };
            let events = journal.session_events(id)?;
            if json {
                let value = serde_json::json!({ "session": session, "events": events });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Session {}", session.id);
                println!("  Started:     {}", session.started_at.to_rfc3339());
                if let Some(ended) = session.ended_at {
                    println!("  Ended:       {}", ended.to_rfc3339());
                }
                println!("  Destination: {}", session.destination);
                println!("  Route:       {}", session.route_fingerprint);
                println!(
                    "  Outcome:     {}",
                    session.outcome.as_deref().unwrap_or("running")
                );
                println!();
                for e in events {
                    println!("  {}  {:<22} {}", e.recorded_at.format("%H:%M:%S"), e.kind, e.payload);
                }
            }
        }
        JournalCommand::Stats { json } => {
            let stats = journal.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Journal:   {}", journal.path().display());
                println!("Sessions:  {}", stats.total_sessions);
                println!("Events:    {}", stats.total_events);
                println!("Arrivals:  {}", stats.arrivals);
                println!("Reroutes:  {}", stats.reroutes);
                println!("Size:      {} bytes", stats.db_size_bytes);
            }
        }
    }
    Ok(())
}
