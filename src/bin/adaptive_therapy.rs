use anyhow::Result;
use cancer_abm::*;
use clap::Parser;
use std::path::PathBuf;
// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(about = "Adaptive therapy: treat until the tumor halves, pause until it regrows")]
struct Args {
    /// Random seed (random if omitted)
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = 300)]
    steps: usize,
    #[arg(long, default_value_t = 2000)]
    population: usize,
    /// Step at which the first treatment cycle begins
    #[arg(long, default_value_t = 50)]
    start_step: usize,
    /// Resume treatment at this fraction of the initial size
    #[arg(long, default_value_t = 1.0)]
    start_threshold: f64,
    /// Pause treatment at this fraction of the initial size
    #[arg(long, default_value_t = 0.5)]
    stop_threshold: f64,
    #[arg(long, default_value_t = 0.9)]
    kill_fraction: f64,
    #[arg(long, default_value = "adaptive_output")]
    output: PathBuf,
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    eprintln!("=== Adaptive therapy: resistant phenotype 2, no MTD ===");

    let config = SimulationConfig {
        rules: RuleSetParams {
            adaptive_start_step: Some(args.start_step),
            adaptive_start_threshold: args.start_threshold,
            adaptive_stop_threshold: args.stop_threshold,
            kill_fraction: args.kill_fraction,
            ..RuleSetParams::default()
        },
        initial: InitialPopulationConfig {
            total_count: args.population,
            ..InitialPopulationConfig::default()
        },
        batch: BatchConfig {
            steps: args.steps,
            seed: args.seed,
            snapshot_every: 10,
            show_progress: true,
            ..BatchConfig::default()
        },
    };
    eprintln!("{:?}", config.rules);

    let driver = Driver::new(config)?;
    let mut recorder = JsonlRecorder::create(&args.output, 0)?;
    let summary = driver.run(0, &mut recorder, &CancelToken::new())?;

    // ── Summary ───────────────────────────────────────────────────────────────
    eprintln!("seed: {}", summary.seed);
    eprintln!("final population: {}", summary.final_population);
    Ok(())
}
