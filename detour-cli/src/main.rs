use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use detour_core::time::{parse_local_to_utc, to_trip_local};
use detour_core::{
    ControllerNotice, ExecutionController, ReshuffleConfig, ReshuffleEngine, ReshuffleResult, ScheduleMutator,
    TripSchedule,
};
use detour_live::{LiveSession, Replay, SessionEvent, SystemClock};
use detour_signals::{load_script, parse_report, ScriptedSource, Signal};

mod config;
mod logging;
mod state;

#[derive(Parser, Debug)]
#[command(
    name = "detour",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("DETOUR_BUILD_SHA"), ")"),
    about = "Reshuffle a trip that is already under way"
)]
struct Cli {
    /// Config file (default: ~/.detour/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// City to load when the trip file holds several itineraries
    #[arg(long, global = true)]
    city: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the default config to ~/.detour/config.toml
    InitConfig,

    /// Print the impact analysis for each trigger
    Analyze {
        #[arg(long)]
        trip: PathBuf,
        /// JSON file with one trigger or an array of triggers
        #[arg(long)]
        trigger: PathBuf,
    },

    /// Rank reshuffle options for the triggers
    Propose {
        #[arg(long)]
        trip: PathBuf,
        #[arg(long)]
        trigger: PathBuf,
        /// Print the full results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply the best (or a chosen) reshuffle and write the new schedule
    Apply {
        #[arg(long)]
        trip: PathBuf,
        #[arg(long)]
        trigger: PathBuf,
        /// 0 = best suggestion, N = its Nth alternative
        #[arg(long, default_value_t = 0)]
        pick: usize,
        /// Confirm suggestions that require it
        #[arg(long)]
        yes: bool,
        /// Output path (default: print to stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Turn a free-text traveller report into a trigger
    Report {
        #[arg(long)]
        trip: PathBuf,
        #[arg(long)]
        text: String,
        /// Trip-local time "YYYY-MM-DD HH:MM" (default: now)
        #[arg(long)]
        at: Option<String>,
        /// Also rank reshuffle options for it
        #[arg(long)]
        propose: bool,
    },

    /// Replay a scripted CSV signal feed against the trip
    Simulate {
        #[arg(long)]
        trip: PathBuf,
        #[arg(long)]
        script: PathBuf,
        /// Trip-local end time (default: 24h after the first signal)
        #[arg(long)]
        until: Option<String>,
        /// Emit one JSON object per event
        #[arg(long)]
        json: bool,
        /// Write the final schedule here
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Run a live session: poll a script in real time and read reports from stdin
    Live {
        #[arg(long)]
        trip: PathBuf,
        #[arg(long)]
        script: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    logging::init(&cfg.log.level);
    let reshuffle = cfg.reshuffle;
    let city = cli.city.as_deref();

    match cli.command {
        Command::InitConfig => config::init_config()?,
        Command::Analyze { trip, trigger } => analyze(state::read_trip(&trip, city)?, &trigger, reshuffle)?,
        Command::Propose { trip, trigger, json } => {
            propose(state::read_trip(&trip, city)?, &trigger, reshuffle, json)?
        }
        Command::Apply {
            trip,
            trigger,
            pick,
            yes,
            out,
        } => apply(state::read_trip(&trip, city)?, &trigger, pick, yes, out.as_deref(), reshuffle)?,
        Command::Report {
            trip,
            text,
            at,
            propose,
        } => report(state::read_trip(&trip, city)?, &text, at.as_deref(), propose, reshuffle)?,
        Command::Simulate {
            trip,
            script,
            until,
            json,
            out,
        } => simulate(state::read_trip(&trip, city)?, &script, until.as_deref(), json, out.as_deref(), reshuffle)?,
        Command::Live { trip, script } => live(state::read_trip(&trip, city)?, script.as_deref(), reshuffle).await?,
    }

    Ok(())
}

fn at_or_now(at: Option<&str>, trip: &TripSchedule) -> Result<DateTime<Utc>> {
    match at {
        Some(s) => parse_local_to_utc(s, &trip.timezone),
        None => Ok(Utc::now()),
    }
}

fn print_result(rank: usize, r: &ReshuffleResult) {
    let gate = if r.requires_confirmation {
        "needs confirmation".to_string()
    } else if let Some(s) = r.auto_apply_in {
        format!("auto-applies in {s}s")
    } else {
        "optional".to_string()
    };
    println!(
        "#{rank} {:<22} confidence={:.2} saved={}m affected={} | {gate}",
        r.strategy.as_str(),
        r.confidence,
        r.time_saved_minutes,
        r.activities_affected,
    );
    println!("    {}", r.explanation);
    for c in &r.changes {
        println!("    - {}", c.description);
    }
}

fn analyze(trip: TripSchedule, trigger_path: &Path, cfg: ReshuffleConfig) -> Result<()> {
    let triggers = state::read_triggers(trigger_path)?;
    let engine = ReshuffleEngine::new(cfg);

    for trigger in &triggers {
        if let Err(e) = trigger.validate() {
            eprintln!("skipping {}: {e}", trigger.id);
            continue;
        }
        let impact = engine.analyze(trigger, &trip);
        println!("{}", serde_json::to_string_pretty(&impact)?);
    }
    Ok(())
}

fn propose(trip: TripSchedule, trigger_path: &Path, cfg: ReshuffleConfig, json: bool) -> Result<()> {
    let triggers = state::read_triggers(trigger_path)?;
    let response = ReshuffleEngine::new(cfg).check(&triggers, &trip);

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.summary);
    println!(
        "status={} next check in {}s\n",
        response.schedule_status.as_str(),
        response.next_check_in_seconds
    );
    for best in &response.suggested_actions {
        println!("Trigger {}:", best.trigger_id);
        print_result(0, best);
        for (i, alt) in best.alternatives.iter().enumerate() {
            print_result(i + 1, alt);
        }
        println!();
    }
    Ok(())
}

fn apply(
    trip: TripSchedule,
    trigger_path: &Path,
    pick: usize,
    yes: bool,
    out: Option<&Path>,
    cfg: ReshuffleConfig,
) -> Result<()> {
    let triggers = state::read_triggers(trigger_path)?;
    let engine = ReshuffleEngine::new(cfg.clone());
    let mut ctl = ExecutionController::new(trip, cfg);
    let now = Utc::now();

    let ticket = ctl.begin_processing()?;
    let response = engine.check(&triggers, &ticket.schedule);
    let Some(best) = response.top_suggestion().cloned() else {
        ctl.abandon_processing(ticket);
        println!("{}; nothing to apply", response.summary);
        return Ok(());
    };
    ctl.handle_trigger_check_response(ticket, response, now)?;

    let chosen = match pick {
        0 => best,
        n => best
            .alternatives
            .get(n - 1)
            .cloned()
            .with_context(|| format!("no alternative #{n} (have {})", best.alternatives.len()))?,
    };
    if chosen.is_no_action() {
        println!("Picked no_action; schedule unchanged");
        return Ok(());
    }
    if chosen.requires_confirmation && !yes {
        print_result(pick, &chosen);
        bail!("this reshuffle needs confirmation; rerun with --yes");
    }

    let mutated = ScheduleMutator.apply(ctl.current_schedule(), &chosen.changes)?;
    for w in &mutated.warnings {
        eprintln!("warning: {w:?}");
    }
    let event = ctl.apply_reshuffle(chosen, mutated.schedule, yes, now)?;
    state::append_history(&state::history_path()?, &event)?;

    match out {
        Some(p) => {
            state::write_trip(p, ctl.current_schedule())?;
            println!("Applied {} ({}); wrote {}", event.strategy_used.as_str(), event.id, p.display());
        }
        None => println!("{}", serde_json::to_string_pretty(ctl.current_schedule())?),
    }
    Ok(())
}

fn report(trip: TripSchedule, text: &str, at: Option<&str>, propose: bool, cfg: ReshuffleConfig) -> Result<()> {
    let now = at_or_now(at, &trip)?;
    let Some(trigger) = parse_report(text, &trip, now)? else {
        println!("Nothing actionable in that report");
        return Ok(());
    };
    println!("{}", serde_json::to_string_pretty(&trigger)?);

    if propose {
        let response = ReshuffleEngine::new(cfg).check(&[trigger], &trip);
        println!("\n{}", response.summary);
        if let Some(best) = response.suggested_actions.first() {
            print_result(0, best);
            for (i, alt) in best.alternatives.iter().enumerate() {
                print_result(i + 1, alt);
            }
        }
    }
    Ok(())
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::CheckCompleted {
            summary,
            status,
            next_check_in_seconds,
        } => format!("check: {summary} [status={} next={next_check_in_seconds}s]", status.as_str()),
        SessionEvent::SourceFailed { source, error } => format!("source {source} failed: {error}"),
        SessionEvent::Notice { notice } => match notice {
            ControllerNotice::StatusChanged { from, to } => format!("status {} -> {}", from.as_str(), to.as_str()),
            ControllerNotice::CountdownStarted { result_id, seconds, .. } => {
                format!("{result_id} auto-applies in {seconds}s unless rejected")
            }
            ControllerNotice::ReshuffleApplied {
                event_id,
                strategy,
                user_confirmed,
                ..
            } => {
                let how = if *user_confirmed { "confirmed" } else { "auto" };
                format!("applied {} as {event_id} ({how})", strategy.as_str())
            }
            ControllerNotice::UndoExpired { event_ids } => {
                format!("undo window closed for {}", event_ids.join(", "))
            }
            other => serde_json::to_string(other).unwrap_or_else(|_| format!("{other:?}")),
        },
    }
}

fn simulate(
    trip: TripSchedule,
    script: &Path,
    until: Option<&str>,
    json: bool,
    out: Option<&Path>,
    cfg: ReshuffleConfig,
) -> Result<()> {
    let tz = trip.timezone.clone();
    let signals = load_script(script, &tz)?;
    let Some(from) = signals.first().map(Signal::observed_at) else {
        println!("Script is empty");
        return Ok(());
    };
    let until = match until {
        Some(s) => parse_local_to_utc(s, &tz)?,
        None => from + TimeDelta::hours(24),
    };

    let sources = ScriptedSource::per_kind(signals, &cfg);
    let engine = ReshuffleEngine::new(cfg.clone());
    let mut replay = Replay::new(ExecutionController::new(trip, cfg), engine, sources);
    let entries = replay.run(from, until, ScriptedSource::is_exhausted);

    for entry in &entries {
        if json {
            println!("{}", serde_json::to_string(entry)?);
        } else {
            let local = to_trip_local(entry.at, &tz)?;
            println!("{}  {}", local.format("%H:%M:%S"), describe(&entry.event));
        }
    }

    let ctl = replay.into_controller();
    if !json {
        println!(
            "\nstatus={} delay={}m reshuffles={} undoable={}",
            ctl.status().as_str(),
            ctl.delay_minutes(),
            ctl.history().count(),
            ctl.undo_depth()
        );
    }
    if let Some(p) = out {
        state::write_trip(p, ctl.current_schedule())?;
    }
    Ok(())
}

async fn live(trip: TripSchedule, script: Option<&Path>, cfg: ReshuffleConfig) -> Result<()> {
    let tz = trip.timezone.clone();
    let engine = ReshuffleEngine::new(cfg.clone());
    let session = LiveSession::new(ExecutionController::new(trip, cfg.clone()), engine, Arc::new(SystemClock));

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", describe(&event)),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut pollers = Vec::new();
    if let Some(path) = script {
        for source in ScriptedSource::per_kind(load_script(path, &tz)?, &cfg) {
            pollers.push(session.spawn_poller(source));
        }
    }

    println!("Type a report (\"running 20 min late\") or: confirm, reject, undo, status, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "quit" | "exit" => break,
            "confirm" => match session.confirm().await {
                Ok(event) => println!("confirmed {}", event.id),
                Err(e) => println!("cannot confirm: {e}"),
            },
            "reject" => {
                if let Err(e) = session.reject().await {
                    println!("cannot reject: {e}");
                }
            }
            "undo" => match session.undo().await {
                Ok(event) => println!("undid {}", event.id),
                Err(e) => println!("cannot undo: {e}"),
            },
            "status" => {
                let (status, delay, depth) = session
                    .inspect(|c| (c.status(), c.delay_minutes(), c.undo_depth()))
                    .await;
                println!("status={} delay={delay}m undoable={depth}", status.as_str());
            }
            text => {
                let schedule = session.schedule().await;
                match parse_report(text, &schedule, session.now()) {
                    Ok(Some(trigger)) => {
                        if let Err(e) = session.submit(vec![trigger]).await {
                            println!("check failed: {e}");
                        }
                    }
                    Ok(None) => println!("(nothing to act on)"),
                    Err(e) => println!("could not read that: {e:#}"),
                }
            }
        }
    }

    for poller in pollers {
        poller.abort();
    }
    printer.abort();
    Ok(())
}
