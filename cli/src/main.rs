//! `trackfind` CLI: scenario runs, replay evaluation, metrics export.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use detector_models::{DetectorSetup, UniformField};
use finder_core::{EventOutput, FinderConfig, FindingMetrics, MatchCriteria, TrackFinder};
use rayon::prelude::*;
use sim::replay::{load_replay, save_replay, ReplayLog};
use sim::scenarios::{Scenario, ScenarioKind};
use sim::SimEvent;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "trackfind", about = "Charged-track finder CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a named scenario, run the finder and output metrics.
    RunScenario {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Number of events (scenario default if omitted)
        #[arg(long)]
        events: Option<usize>,
        /// Finder configuration (JSON, camelCase keys)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also save the simulated events as a replay log
        #[arg(long)]
        save_replay: Option<PathBuf>,
    },
    /// Run the finder on a previously recorded replay log.
    Replay {
        /// Path to replay JSON file
        input: PathBuf,
        /// Finder configuration (JSON, camelCase keys)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunScenario {
            scenario,
            seed,
            events,
            config,
            output,
            save_replay: save_path,
        } => {
            run_scenario(scenario, seed, events, config.as_deref(), output.as_deref(), save_path.as_deref())?;
        }
        Commands::Replay { input, config, output } => {
            run_replay(&input, config.as_deref(), output.as_deref())?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<FinderConfig> {
    match path {
        Some(p) => FinderConfig::from_json_file(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(FinderConfig::default()),
    }
}

/// Totals over all events of one run.
#[derive(Default, serde::Serialize)]
struct RunSummary {
    events: usize,
    candidates: usize,
    recoverable_errors: usize,
    overflows: usize,
    mean_event_time_us: f64,
    /// Mean |extracted T0 − simulated T0| (ns), events with a T0 estimate only
    mean_t0_error: Option<f64>,
}

fn evaluate(
    events: &[SimEvent],
    config: FinderConfig,
    field: UniformField,
) -> Result<(FindingMetrics, RunSummary)> {
    let finder = TrackFinder::new(config, DetectorSetup::default(), field)?;
    let criteria = MatchCriteria {
        min_findable_hits: finder.config().min_track_hits,
        ..Default::default()
    };

    // Events are independent: one finder shared by all workers
    let results: Vec<(EventOutput, FindingMetrics, f64)> = events
        .par_iter()
        .map(|ev| {
            let out = finder.process_event(&ev.raw);
            let mut m = FindingMetrics::default();
            m.accumulate(&out.candidates, &out.hits, &out.space_points, &ev.truth, &criteria);
            info!(
                event = out.event_number,
                candidates = out.candidates.len(),
                found = m.found,
                fakes = m.fakes,
                time_us = out.total_time_us,
                "event done"
            );
            (out, m, ev.t0)
        })
        .collect();

    let mut metrics = FindingMetrics::default();
    let mut summary = RunSummary {
        events: results.len(),
        ..Default::default()
    };
    let mut t0_errors = Vec::new();
    let mut total_us = 0u64;
    for (out, m, true_t0) in &results {
        metrics.merge(m);
        summary.candidates += out.candidates.len();
        summary.recoverable_errors += out.diagnostics.n_recoverable;
        summary.overflows += out.diagnostics.count_overflows();
        total_us += out.total_time_us;
        if let Some(est) = out.t0 {
            t0_errors.push((est.t0 - true_t0).abs());
        }
    }
    if !results.is_empty() {
        summary.mean_event_time_us = total_us as f64 / results.len() as f64;
    }
    if !t0_errors.is_empty() {
        summary.mean_t0_error = Some(t0_errors.iter().sum::<f64>() / t0_errors.len() as f64);
    }
    Ok((metrics, summary))
}

fn report(name: &str, seed: u64, metrics: &FindingMetrics, summary: &RunSummary, output: Option<&Path>) -> Result<()> {
    println!(
        "Done: {} events, {} candidates, efficiency={:.3}, clones={:.3}, fakes={:.3}, {:.0} us/event",
        summary.events,
        summary.candidates,
        metrics.efficiency(),
        metrics.clone_rate(),
        metrics.fake_rate(),
        summary.mean_event_time_us,
    );
    if let Some(err) = summary.mean_t0_error {
        println!("Event T0: mean |error| = {err:.2} ns");
    }
    if summary.recoverable_errors > 0 {
        println!(
            "Recovered errors: {} ({} combinatorial overflows)",
            summary.recoverable_errors, summary.overflows
        );
    }

    if let Some(opath) = output {
        let json = serde_json::json!({
            "scenario": name,
            "seed": seed,
            "efficiency": metrics.efficiency(),
            "clone_rate": metrics.clone_rate(),
            "fake_rate": metrics.fake_rate(),
            "rms_phi0": metrics.rms_phi0(),
            "rms_rel_curvature": metrics.rms_rel_curvature(),
            "metrics": metrics,
            "summary": summary,
        });
        std::fs::write(opath, serde_json::to_string_pretty(&json)?)?;
        println!("Metrics saved to {}", opath.display());
    }
    Ok(())
}

fn run_scenario(
    kind: ScenarioKind,
    seed: u64,
    n_events: Option<usize>,
    config_path: Option<&Path>,
    output_path: Option<&Path>,
    replay_path: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut scenario = Scenario::build(kind, seed);
    if let Some(n) = n_events {
        scenario.n_events = n;
    }

    println!(
        "Running scenario '{}' (seed={}, events={})...",
        scenario.name, seed, scenario.n_events
    );
    let events = scenario.events(&DetectorSetup::default());
    let (metrics, summary) = evaluate(&events, config, scenario.field)?;
    report(&scenario.name, seed, &metrics, &summary, output_path)?;

    if let Some(rpath) = replay_path {
        let log = ReplayLog {
            scenario_name: scenario.name.clone(),
            seed,
            field: scenario.field,
            events,
        };
        save_replay(&log, rpath)?;
        println!("Replay saved to {}", rpath.display());
    }
    Ok(())
}

fn run_replay(input: &Path, config_path: Option<&Path>, output_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let log = load_replay(input)?;
    println!("Replaying '{}' ({} events)...", log.scenario_name, log.events.len());
    let (metrics, summary) = evaluate(&log.events, config, log.field)?;
    report(&log.scenario_name, log.seed, &metrics, &summary, output_path)
}
