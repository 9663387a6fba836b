//! `cpm-sim` – collective perception on a synthetic road.
//!
//! Runs one CP service per simulated vehicle and prints a line per
//! generation cycle:
//!
//! 1. Loads `~/.cpm/config.toml` (or `--config <path>`); defaults apply
//!    when the file is absent.
//! 2. Steps the [`Simulation`][scenario::Simulation] until the configured
//!    duration has elapsed or **Ctrl-C** is pressed.
//! 3. Optionally writes every station's statistics as newline-delimited
//!    JSON (`--stats <path>`).
//!
//! Other flags: `--print-schema` prints the JSON schema of the config file,
//! `--save-default` writes the default config to the config path.

mod config;
mod scenario;

use colored::Colorize;
use scenario::{Simulation, StationStatistics, StepSummary};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    stats: Option<PathBuf>,
    print_schema: bool,
    save_default: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => parsed.config = Some(args.next().ok_or("--config needs a path")?.into()),
            "--stats" => parsed.stats = Some(args.next().ok_or("--stats needs a path")?.into()),
            "--print-schema" => parsed.print_schema = true,
            "--save-default" => parsed.save_default = true,
            other => return Err(format!("unknown argument `{other}`")),
        }
    }
    Ok(parsed)
}

fn main() {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}: {}", "Usage error".red(), e);
            eprintln!("  cpm-sim [--config <path>] [--stats <path>] [--print-schema] [--save-default]");
            std::process::exit(2);
        }
    };

    if args.print_schema {
        let schema = schemars::schema_for!(config::SimConfig);
        match serde_json::to_string_pretty(&schema) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("{}: {}", "Schema error".red(), e),
        }
        return;
    }

    let _tracing = cpm_service::init_tracing("cpm-sim");

    let path = args.config.unwrap_or_else(config::config_path);
    if args.save_default {
        match config::save_to(&config::SimConfig::default(), &path) {
            Ok(()) => println!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            ),
            Err(e) => println!("{}: {}", "Error saving config".red(), e),
        }
        return;
    }

    print_banner();

    let cfg = match config::load_from(&path) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Ok(None) => {
            println!("  No config at {}; using defaults.", path.display().to_string().dimmed());
            let mut cfg = config::SimConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            std::process::exit(1);
        }
    };

    let mut sim = match Simulation::new(&cfg) {
        Ok(sim) => sim,
        Err(e) => {
            println!("{}: {}", "Invalid configuration".red(), e);
            std::process::exit(1);
        }
    };
    info!(
        vehicles = cfg.scenario.vehicles,
        duration_ms = cfg.scenario.duration_ms,
        "simulation started"
    );

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after this step …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    println!();
    println!(
        "  {:>8}  {:>4}  {:>4}  {:>4}  {:>5}  {:>6}  {:>5}",
        "time", "trig", "msgs", "segs", "objs", "recv", "cbr"
    );
    let mut total = StepSummary::default();
    while !sim.is_finished() && !shutdown.load(Ordering::SeqCst) {
        let step = sim.step();
        print_step(&step);
        accumulate(&mut total, &step);
    }
    print_summary(&total, sim.now().as_millis());

    if let Some(stats_path) = args.stats {
        match write_statistics(&sim.take_statistics(), &stats_path) {
            Ok(lines) => println!(
                "  {} {} statistics written to {}",
                "✓".green().bold(),
                lines,
                stats_path.display().to_string().bold()
            ),
            Err(e) => println!("{}: {}", "Error writing statistics".red(), e),
        }
    }
}

fn accumulate(total: &mut StepSummary, step: &StepSummary) {
    total.time_ms = step.time_ms;
    total.triggered += step.triggered;
    total.messages += step.messages;
    total.segments += step.segments;
    total.objects_sent += step.objects_sent;
    total.generated += step.generated;
    total.mitigated += step.mitigated;
    total.receptions += step.receptions;
    total.errors += step.errors;
    total.channel_busy_ratio = total.channel_busy_ratio.max(step.channel_busy_ratio);
}

/// One NDJSON line per recorded statistic, tagged with its station.
fn write_statistics(stations: &[StationStatistics], path: &Path) -> Result<usize, String> {
    let mut out = Vec::new();
    let mut lines = 0;
    for station in stations {
        for event in &station.events {
            let line = serde_json::json!({ "station": station.station, "event": event });
            serde_json::to_writer(&mut out, &line).map_err(|e| format!("Failed to serialize statistic: {}", e))?;
            out.push(b'\n');
            lines += 1;
        }
    }
    let mut file =
        std::fs::File::create(path).map_err(|e| format!("Failed to create {}: {}", path.display(), e))?;
    file.write_all(&out)
        .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
    Ok(lines)
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║   Collective Perception Simulator    ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!("  {} {}", "cpm-sim".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!();
}

fn print_step(step: &StepSummary) {
    let line = format!(
        "  {:>6}ms  {:>4}  {:>4}  {:>4}  {:>5}  {:>6}  {:>5.3}",
        step.time_ms,
        step.triggered,
        step.messages,
        step.segments,
        step.objects_sent,
        step.receptions,
        step.channel_busy_ratio
    );
    if step.errors > 0 {
        println!("{}  {}", line.red(), format!("{} error(s)", step.errors).red().bold());
    } else if step.messages == 0 {
        println!("{}", line.dimmed());
    } else {
        println!("{line}");
    }
}

fn print_summary(total: &StepSummary, elapsed_ms: i64) {
    println!();
    println!("  {} after {} ms", "Summary".bold(), elapsed_ms);
    println!("    cycles triggered   {}", total.triggered);
    println!("    messages sent      {} ({} segments)", total.messages, total.segments);
    println!(
        "    objects            {} selected, {} after mitigation, {} sent",
        total.generated, total.mitigated, total.objects_sent
    );
    println!("    receptions         {}", total.receptions);
    println!("    peak channel load  {:.3}", total.channel_busy_ratio);
    if total.errors > 0 {
        println!("    {}", format!("{} error(s); run with RUST_LOG=warn for details", total.errors).red());
    } else {
        println!("    {}", "no errors".green());
    }
    println!();
}
